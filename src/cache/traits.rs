//! Core traits for the caching system.

use serde::{de::DeserializeOwned, Serialize};

/// Trait for entities that can be cached.
///
/// Entities are stored once per `(entity_type, cache_key)` and referenced by
/// id from any number of ledger entries.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Stable remote identifier for this entity (e.g., a movie id)
  fn cache_key(&self) -> String;

  /// Entity type name for storage organization (e.g., "movie")
  fn entity_type() -> &'static str;
}

/// A logical list query whose results are tracked in the pagination ledger.
pub trait QueryKey {
  /// Ledger identity for this query (e.g., "MovieListType.Popular").
  fn ledger_key(&self) -> String;

  /// Human-readable description used in logs.
  fn description(&self) -> String;
}
