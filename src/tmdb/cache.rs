//! Caching implementations for TMDB types.

use crate::cache::{Cacheable, QueryKey};

use super::types::{Movie, MovieList};

impl Cacheable for Movie {
  fn cache_key(&self) -> String {
    self.id.to_string()
  }

  fn entity_type() -> &'static str {
    "movie"
  }
}

impl QueryKey for MovieList {
  fn ledger_key(&self) -> String {
    format!("MovieListType.{}", self.name())
  }

  fn description(&self) -> String {
    format!("{} movies", self.title().to_lowercase())
  }
}
