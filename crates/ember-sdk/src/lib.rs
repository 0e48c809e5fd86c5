//! Ember SDK - boundary types for event loop collaborators
//!
//! This crate holds the small set of types an external I/O collaborator needs
//! to hand results back to an Ember event loop, without depending on the
//! engine itself.
//!
//! # Example
//!
//! ```ignore
//! use ember_sdk::{CompletionSender, TaskHandle};
//!
//! fn read_config(sender: CompletionSender, handle: TaskHandle) {
//!     std::thread::spawn(move || match std::fs::read_to_string("app.toml") {
//!         Ok(text) => sender.complete(handle, text),
//!         Err(e) => sender.fail(handle, e.to_string()),
//!     });
//! }
//! ```

#![warn(missing_docs)]

mod completion;
mod error;
mod handle;

pub use completion::{CompletionEvent, CompletionSender, CompletionSink, Outcome, Payload};
pub use error::{CompletionError, PostError};
pub use handle::TaskHandle;
