//! Cache layer that binds list queries to storage and the network.

use chrono::{Duration, Utc};
use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;

use super::bound::{run_blocking, NetworkBound, ResourceStream};
use super::ledger::{LedgerEntry, Page};
use super::outcome::RemoteOutcome;
use super::paging::{spawn_next_page, Continuation, KeyedLocks};
use super::storage::{CacheStorage, CachedList};
use super::traits::{Cacheable, QueryKey};

/// When a cached list should be refreshed from the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
  /// Only when nothing is cached yet
  WhenEmpty,
  /// When nothing is cached, or the cached list is older than the given age
  WhenStale(Duration),
}

impl RefreshPolicy {
  pub fn should_fetch<T>(&self, cached: Option<&CachedList<T>>) -> bool {
    let Some(cached) = cached else {
      return true;
    };
    if cached.is_empty() {
      return true;
    }

    match self {
      RefreshPolicy::WhenEmpty => false,
      RefreshPolicy::WhenStale(max_age) => Utc::now() - cached.cached_at > *max_age,
    }
  }
}

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the application and the network client. Callers
/// only ever see cached data; fetched pages reach them through the cache.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  locks: Arc<KeyedLocks>,
  refresh: RefreshPolicy,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      locks: Arc::new(KeyedLocks::default()),
      refresh: RefreshPolicy::WhenEmpty,
    }
  }

  /// Set the refresh policy for list queries.
  pub fn with_refresh_policy(mut self, refresh: RefreshPolicy) -> Self {
    self.refresh = refresh;
    self
  }

  /// Observe a list query.
  ///
  /// Emits the cached list immediately, fetches the first page when the
  /// refresh policy asks for it, and keeps emitting as the cache changes
  /// until the stream is dropped.
  pub fn observe_list<T, Q, F, Fut>(&self, query: &Q, fetcher: F) -> ResourceStream<CachedList<T>>
  where
    T: Cacheable + PartialEq,
    Q: QueryKey,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = RemoteOutcome<Page<T>>> + Send + 'static,
  {
    let key = query.ledger_key();
    let description = query.description();
    let refresh = self.refresh;

    let reader = Arc::clone(&self.storage);
    let read_key = key.clone();
    let writer = Arc::clone(&self.storage);

    tracing::debug!(query = %description, "Observing list");

    NetworkBound::new(
      self.storage.changes(),
      move || reader.load_list::<T>(&read_key),
      move |cached: Option<&CachedList<T>>| refresh.should_fetch(cached),
      fetcher,
      move |page: Page<T>| {
        let entry = LedgerEntry::first_page(key, &page);
        writer.save_page(&entry, &page.results)?;
        tracing::info!(query = %description, ids = entry.ids.len(), "Saved first page");
        Ok(())
      },
    )
    .observe()
  }

  /// Fetch and merge the page after the last cached one.
  ///
  /// The fetcher receives the page number to request.
  pub fn next_page<T, Q, F, Fut>(&self, query: &Q, fetcher: F) -> Continuation
  where
    T: Cacheable,
    Q: QueryKey,
    F: FnOnce(u32) -> Fut + Send + 'static,
    Fut: Future<Output = RemoteOutcome<Page<T>>> + Send + 'static,
  {
    spawn_next_page(
      Arc::clone(&self.storage),
      Arc::clone(&self.locks),
      query.ledger_key(),
      fetcher,
    )
  }

  /// Point read of a cached list, off the async workers.
  pub async fn cached_list<T, Q>(&self, query: &Q) -> Result<Option<CachedList<T>>>
  where
    T: Cacheable,
    Q: QueryKey,
  {
    let storage = Arc::clone(&self.storage);
    let key = query.ledger_key();
    Ok(run_blocking(move || storage.load_list::<T>(&key)).await?)
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      locks: Arc::clone(&self.locks),
      refresh: self.refresh,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::resource::{Resource, Status};
  use crate::cache::storage::SqliteStorage;
  use crate::cache::testing::{page_range, Item, ItemList};
  use std::sync::atomic::{AtomicU32, Ordering};

  fn layer() -> CacheLayer<SqliteStorage> {
    CacheLayer::new(SqliteStorage::open_in_memory().unwrap())
  }

  fn list(entries: usize, age: Duration) -> CachedList<Item> {
    CachedList {
      entries: (1..=entries as u32).map(Item::new).collect(),
      total_results: entries as u64,
      next_page: None,
      cached_at: Utc::now() - age,
    }
  }

  #[test]
  fn test_when_empty_policy() {
    let policy = RefreshPolicy::WhenEmpty;
    assert!(policy.should_fetch::<Item>(None));
    assert!(policy.should_fetch(Some(&list(0, Duration::zero()))));
    assert!(!policy.should_fetch(Some(&list(3, Duration::days(30)))));
  }

  #[test]
  fn test_when_stale_policy() {
    let policy = RefreshPolicy::WhenStale(Duration::minutes(60));
    assert!(policy.should_fetch::<Item>(None));
    assert!(!policy.should_fetch(Some(&list(3, Duration::minutes(5)))));
    assert!(policy.should_fetch(Some(&list(3, Duration::minutes(90)))));
  }

  #[tokio::test]
  async fn test_first_page_then_continuation() {
    let cache = layer();
    let query = ItemList("popular");

    let mut stream = cache.observe_list(&query, || async {
      RemoteOutcome::Success(page_range(1, 20, 200, Some(2)))
    });
    assert_eq!(stream.next().await, Some(Resource::loading(None)));
    let first = stream.next().await.unwrap();
    assert_eq!(first.status, Status::Success);
    assert_eq!(first.data.as_ref().unwrap().entries.len(), 20);

    let more = cache.next_page(&query, |n| async move {
      assert_eq!(n, 2);
      RemoteOutcome::Success(page_range(21, 20, 200, Some(3)))
    });
    assert_eq!(more.finished().await, Resource::success(Some(true)));

    // The open subscription picks up the merged page
    let merged = stream.next().await.unwrap();
    assert_eq!(merged.status, Status::Success);
    let ids: Vec<u32> = merged.data.unwrap().entries.iter().map(|i| i.id).collect();
    assert_eq!(ids, (1..=40).collect::<Vec<_>>());

    let cached: CachedList<Item> = cache.cached_list(&query).await.unwrap().unwrap();
    assert_eq!(cached.next_page, Some(3));
  }

  #[tokio::test]
  async fn test_second_observer_reuses_cache() {
    let cache = layer();
    let query = ItemList("top");
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..2 {
      let calls = Arc::clone(&calls);
      let mut stream = cache.observe_list(&query, move || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { RemoteOutcome::Success(page_range(1, 5, 5, None)) }
      });

      loop {
        let resource = stream.next().await.unwrap();
        if resource.is_terminal() {
          assert_eq!(resource.data.unwrap().entries.len(), 5);
          break;
        }
      }
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
