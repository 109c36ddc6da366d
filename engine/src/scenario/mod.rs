pub use matrix::*;
pub use params::*;
pub use report::*;
pub use runner::*;
pub use scene::*;

mod matrix;
mod params;
mod report;
mod runner;
mod scene;
