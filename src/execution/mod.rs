//! Execution engine
//!
//! Supervises running programs on devices:
//! - Starting an execution powers its device on
//! - It ends when the program time is up, when the power draw stays low long
//!   enough, or when the user aborts it
//! - A watchdog switches off devices powered on without an execution

mod error;
mod finisher;
mod locks;
mod manager;
mod registry;

pub use error::ExecutionError;
pub use manager::{ExecutionEvent, ExecutionManager};
pub use registry::ExecutionRegistry;

pub(crate) use finisher::ExecutionFinisher;
