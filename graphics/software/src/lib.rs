extern crate raycts_core;

pub use self::backend::SoftBackend;
pub use self::buffer::SoftBuffer;
pub use self::command::SoftCommandBuffer;
pub use self::deferred::SoftDeferredOperation;
pub use self::device::{
    SoftDevice,
    SoftDeviceConfig,
};
pub use self::query::SoftQueryPool;
pub use self::queue::SoftQueue;
pub use self::rt::SoftAccelerationStructure;
pub use self::sync::SoftFence;

pub(crate) use self::shared::SoftShared;

mod backend;
mod buffer;
mod bvh;
mod command;
mod deferred;
mod device;
mod geometry;
mod image;
mod ops;
mod query;
mod queue;
mod rt;
mod shared;
mod sync;
mod trace;
