//! Local manifest/blob store.
//!
//! Layout under the models root:
//!
//! ```text
//! manifests/<host>/<namespace>/<model>/<tag>   one JSON manifest per artifact
//! blobs/sha256-<hex>                           one file per unique digest
//! blobs/sha256-<hex>-partial                   data of an in-flight layer
//! ```
//!
//! The [`BlobStoreScanner`] only reads this layout. [`StoreCleaner`] is the
//! only writer and never removes a complete blob.

mod cleanup;
mod layout;
mod manifest;
mod naming;
mod scanner;

pub use cleanup::{CleanReport, StoreCleaner};
pub use layout::{blob_file_name, StoreLayout};
pub use manifest::{LayerRef, Manifest};
pub use naming::ModelName;
pub(crate) use naming::canonical as canonical_name;
pub use scanner::BlobStoreScanner;
