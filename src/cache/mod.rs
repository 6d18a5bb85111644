//! Generic cache synchronization engine.
//!
//! This module is TMDB-agnostic. It provides:
//! - a live, cache-first view of any paginated list query (`observe_list`)
//! - one-page-at-a-time continuation of a cached list (`next_page`)
//! - atomic persistence of a ledger entry together with the entities it references
//! - the `Resource` envelope and `RemoteOutcome` classification both rely on

mod bound;
mod layer;
mod ledger;
mod outcome;
mod paging;
mod resource;
mod storage;
mod traits;

#[cfg(test)]
mod testing;

pub use bound::ResourceStream;
pub use layer::{CacheLayer, RefreshPolicy};
pub use ledger::Page;
pub use outcome::{RawReply, RemoteOutcome, SyncError};
pub use paging::Continuation;
pub use resource::{Resource, Status};
pub use storage::{CachedList, SqliteStorage};
pub use traits::{Cacheable, QueryKey};
