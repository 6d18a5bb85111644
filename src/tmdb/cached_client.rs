//! Cached TMDB client that wraps TmdbClient with the cache-first list engine.

use color_eyre::Result;

use crate::cache::{CacheLayer, CachedList, Continuation, Page, ResourceStream, SqliteStorage};
use crate::config::Config;

use super::client::TmdbClient;
use super::types::{Credits, Movie, MovieDetail, MovieList};

/// TMDB client with transparent caching for movie lists.
///
/// Lists are served from the cache and refreshed through it. Detail, credits
/// and similar movies are passed straight through to the network.
#[derive(Clone)]
pub struct CachedTmdbClient {
  inner: TmdbClient,
  cache: CacheLayer<SqliteStorage>,
}

impl CachedTmdbClient {
  /// Create a new cached client backed by the configured cache database.
  pub fn new(config: &Config, ephemeral: bool) -> Result<Self> {
    let inner = TmdbClient::new(config)?;
    let storage = if ephemeral {
      SqliteStorage::open_in_memory()?
    } else {
      SqliteStorage::open(&config.cache_path()?)?
    };

    Ok(Self::with_storage(inner, storage, config))
  }

  pub fn with_storage(inner: TmdbClient, storage: SqliteStorage, config: &Config) -> Self {
    let cache = CacheLayer::new(storage).with_refresh_policy(config.cache.refresh_policy());
    Self { inner, cache }
  }

  /// Live view of a movie list, refreshed from the network when the
  /// refresh policy asks for it.
  pub fn movies(&self, list: MovieList) -> ResourceStream<CachedList<Movie>> {
    let inner = self.inner.clone();
    self
      .cache
      .observe_list(&list, move || async move { inner.list_page(list, None).await })
  }

  /// Fetch the next page of a list into the cache.
  pub fn fetch_next_page(&self, list: MovieList) -> Continuation {
    let inner = self.inner.clone();
    self
      .cache
      .next_page(&list, move |page| async move {
        inner.list_page(list, Some(page)).await
      })
  }

  /// Current cached contents of a list, without touching the network.
  pub async fn cached_movies(&self, list: MovieList) -> Result<Option<CachedList<Movie>>> {
    self.cache.cached_list(&list).await
  }

  /// Get movie details (not cached).
  pub async fn movie_detail(&self, movie_id: u64) -> Result<MovieDetail> {
    self.inner.movie_detail(movie_id).await
  }

  /// Get movie credits (not cached).
  pub async fn credits(&self, movie_id: u64) -> Result<Credits> {
    self.inner.credits(movie_id).await
  }

  /// Get similar movies (not cached).
  pub async fn similar(&self, movie_id: u64, page: Option<u32>) -> Result<Page<Movie>> {
    self.inner.similar(movie_id, page).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{Resource, Status};

  fn offline_client() -> CachedTmdbClient {
    // Nothing listens on port 1
    let config: Config =
      serde_yaml::from_str("tmdb:\n  url: http://127.0.0.1:1/3\n  timeout_secs: 2\n").unwrap();
    let inner = TmdbClient::with_api_key(&config, "key".to_string()).unwrap();
    let storage = SqliteStorage::open_in_memory().unwrap();
    CachedTmdbClient::with_storage(inner, storage, &config)
  }

  #[tokio::test]
  async fn test_unreachable_remote_surfaces_one_error() {
    let client = offline_client();
    let mut stream = client.movies(MovieList::Popular);

    assert_eq!(stream.next().await, Some(Resource::loading(None)));
    let error = stream.next().await.unwrap();
    assert_eq!(error.status, Status::Error);
    assert!(error.message.unwrap().starts_with("network error"));
    assert_eq!(error.data, None);
  }

  #[tokio::test]
  async fn test_paging_before_first_page_is_a_no_op() {
    let client = offline_client();
    let result = client.fetch_next_page(MovieList::Upcoming).finished().await;
    assert_eq!(result, Resource::success(Some(false)));
    assert!(client.cached_movies(MovieList::Upcoming).await.unwrap().is_none());
  }
}
