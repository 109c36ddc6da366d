pub use self::backend::*;
pub use self::buffer::*;
pub use self::command::*;
pub use self::deferred::*;
pub use self::device::*;
pub use self::error::*;
pub use self::format::*;
pub use self::heap::*;
pub use self::query::*;
pub use self::queue::*;
pub use self::rt::*;
pub use self::sync::*;

mod backend;
mod buffer;
mod command;
mod deferred;
mod device;
mod error;
mod format;
mod heap;
mod query;
mod queue;
mod rt;
mod sync;
