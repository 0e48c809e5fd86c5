//! Memory shared between the loop and worker jobs

mod shared_buffer;

pub use shared_buffer::{SharedBuffer, WaitResult};
