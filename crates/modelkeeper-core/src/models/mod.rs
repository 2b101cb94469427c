//! Data models shared by the scanner, orchestrator and reconciler.
//!
//! Every type here is a plain value: components hand out copies and never
//! share mutable references to them.

mod list;
mod progress;
mod status;

pub use list::*;
pub use progress::*;
pub use status::*;
