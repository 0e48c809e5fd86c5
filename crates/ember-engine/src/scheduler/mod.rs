//! Scheduler: loop-owned queues and the driver that runs them
//!
//! Everything here lives on the loop thread. The only cross-thread entry
//! points are the inbox (`LoopHandle`, `CompletionSender`) and the worker
//! pool, which posts back through the inbox.

mod driver;
mod immediate;
mod inbox;
mod microtask;
mod pending;
mod registry;
mod scope;
mod task;
mod timer;

pub use driver::{EventLoop, LoopState, LoopStats};
pub(crate) use inbox::Envelope;
pub use inbox::LoopHandle;
pub use scope::Scope;
pub use task::TaskKind;
pub use timer::MIN_INTERVAL;
