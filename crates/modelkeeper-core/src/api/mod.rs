//! API implementation submodules.
//!
//! Each submodule contains `impl KeeperApi` blocks that extend the public API
//! with domain-specific methods. The struct definition remains in `lib.rs`.

mod builder;
mod downloads;
mod models;

pub use builder::KeeperApiBuilder;
pub(crate) use downloads::RetryTokens;
