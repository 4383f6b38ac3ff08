//! Stash Test - shared test utilities for the stash crates.
//!
//! Store doubles that inject failures or lag their listings, plus schema
//! fixtures. Add as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! stash-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use stash_test::{Fault, FaultyStore, StoreOp};
//!
//! let store = FaultyStore::new(MemoryObjectStore::new());
//! store.fail_next(StoreOp::Get, Fault::Unavailable, 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
