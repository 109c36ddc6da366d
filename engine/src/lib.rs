pub use raycts_core::{
    Affine3A,
    Vec3,
};

pub mod graphics;
pub mod scenario;
