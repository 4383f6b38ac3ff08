//! Stash Core - typed records with secondary indexes over an object store.
//!
//! The store underneath offers point reads and writes plus prefix listing,
//! nothing more. On top of it this crate provides:
//!
//! - entity schemas and per-column codecs ([`schema`], [`codec`])
//! - a digit-bucketed numeric range index behind the pluggable
//!   [`NumericIndex`] trait, plus equality and unique indexes ([`index`])
//! - the [`Stash`] coordinator: `save`, `delete`, `get`, `find`
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use stash_core::prelude::*;
//! use stash_store::MemoryObjectStore;
//!
//! # async fn example() -> StashResult<()> {
//! let registry = SchemaRegistry::new().with(
//!     EntitySchema::new("users")
//!         .column(ColumnSchema::new("email", ColumnType::String).unique())
//!         .column(ColumnSchema::new("score", ColumnType::Integer).indexed()),
//! )?;
//! let stash = Stash::new(Arc::new(MemoryObjectStore::new()), registry, StashSettings::default());
//!
//! stash
//!     .save("users", RecordData::new().set("email", "x@x.com").set("score", 20))
//!     .await?;
//! let hits = stash
//!     .find(
//!         "users",
//!         &FindOptions::new().filter(Where::new().range("score", Some(Bound::inclusive(10)), None)),
//!     )
//!     .await?;
//! assert_eq!(hits.len(), 1);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod codec;
pub mod error;
pub mod index;
pub mod keys;
pub mod query;
pub mod record;
pub mod schema;
pub mod value;

mod stash;

pub use codec::{ColumnCodec, CodecError, CodecResult, builtin_codec};
pub use error::{StashError, StashResult};
pub use index::{
    BucketIndex, Claim, EqualityIndex, IndexSettings, IndexedColumn, IndexingEngine, NumericIndex,
    RangeHit, UniqueIndex,
};
pub use query::{Bound, Clause, FindOptions, NumericRange, OrderBy, Where};
pub use record::{Record, RecordData, RecordId};
pub use schema::{ColumnSchema, ColumnType, EntitySchema, NumericDomain, SchemaRegistry};
pub use stash::{Stash, StashSettings};
pub use value::{Number, Value};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        Bound, ColumnSchema, ColumnType, EntitySchema, FindOptions, NumericDomain, NumericRange,
        OrderBy, Record, RecordData, RecordId, SchemaRegistry, Stash, StashError, StashResult,
        StashSettings, Value, Where,
    };
}
