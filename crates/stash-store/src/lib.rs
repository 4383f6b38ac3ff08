//! Stash Store - the object storage capability underneath Stash.
//!
//! Stash persists records into a flat object store that offers only point
//! `get`/`put`/`delete` and prefix listing. This crate defines that
//! capability ([`ObjectStore`]) and ships the backends and decorators the
//! rest of the workspace builds on:
//!
//! | Type | Role |
//! |------|------|
//! | [`MemoryObjectStore`] | Ordered in-memory map with entity tags and conditional writes |
//! | [`FsObjectStore`] | One file per key under a local directory, last-writer-wins |
//! | [`PrefixedStore`] | Binds a key prefix so several stashes share one bucket |
//! | [`ResilientStore`] | Per-call timeout, bounded retry with jitter, in-flight cap |

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod fs;
pub mod memory;
pub mod object;
pub mod prefixed;
pub mod resilient;
pub mod retry;

pub use error::{StoreError, StoreResult};
pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;
pub use object::{
    DEFAULT_LIST_PAGE, ListPage, ObjectStore, StoredObject, WriteCondition, validate_key,
};
pub use prefixed::PrefixedStore;
pub use resilient::{ResilienceConfig, ResilientStore};
pub use retry::{RetryOutcome, RetryPolicy, retry};
