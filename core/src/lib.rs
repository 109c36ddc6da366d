#[macro_use]
extern crate bitflags;

pub use bevy_math::{Affine3A, Mat3, Vec3};

pub use self::align::*;

pub mod gpu;
mod align;
