//! Content-addressed caching for sandbox dependencies.
//!
//! Two sibling caches share one publish protocol (install into a private
//! temp directory, atomic-rename into the shared slot, same-key races
//! resolve silently in favor of the first publisher): [`PackageCache`] for
//! installed dependency sets and [`TarballCache`] for pre-built bundles
//! fetched from object storage.

mod error;
mod key;
mod store;
mod tarball;

pub use error::{CacheError, Result};
pub use key::cache_key;
pub use store::PackageCache;
pub use tarball::TarballCache;
