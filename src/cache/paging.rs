//! Continuation of a cached paginated list, one page at a time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, OwnedMutexGuard};

use super::bound::run_blocking;
use super::ledger::Page;
use super::outcome::RemoteOutcome;
use super::resource::Resource;
use super::storage::CacheStorage;
use super::traits::Cacheable;

/// Mutual exclusion scoped to a ledger key.
///
/// Entries nobody holds or waits on are pruned on the next acquisition.
#[derive(Default)]
pub struct KeyedLocks {
  locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
  pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
    let lock = {
      let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
      locks.retain(|_, lock| Arc::strong_count(lock) > 1);
      Arc::clone(locks.entry(key.to_string()).or_default())
    };

    lock.lock_owned().await
  }
}

/// Completion signal of a continuation task.
///
/// Starts as `Loading` and changes exactly once, to `Success(true)` when a
/// page was merged, `Success(false)` when there was nothing to fetch, or
/// `Error`.
#[derive(Debug, Clone)]
pub struct Continuation {
  rx: watch::Receiver<Resource<bool>>,
}

impl Continuation {
  /// Wait for the terminal state.
  pub async fn finished(mut self) -> Resource<bool> {
    match self.rx.wait_for(Resource::is_terminal).await {
      Ok(resource) => resource.clone(),
      Err(_) => Resource::error("Continuation ended without a result", Some(true)),
    }
  }
}

/// Fetch the next page for `query_key` and merge it into the cache.
///
/// Runs on its own task; the returned signal is live immediately. Merges for
/// the same key are serialized through `locks`.
pub fn spawn_next_page<S, T, F, Fut>(
  storage: Arc<S>,
  locks: Arc<KeyedLocks>,
  query_key: String,
  fetcher: F,
) -> Continuation
where
  S: CacheStorage,
  T: Cacheable,
  F: FnOnce(u32) -> Fut + Send + 'static,
  Fut: Future<Output = RemoteOutcome<Page<T>>> + Send + 'static,
{
  let (tx, rx) = watch::channel(Resource::loading(None));

  tokio::spawn(async move {
    let result = next_page(storage, locks, query_key, fetcher).await;
    tx.send_replace(result);
  });

  Continuation { rx }
}

async fn next_page<S, T, F, Fut>(
  storage: Arc<S>,
  locks: Arc<KeyedLocks>,
  query_key: String,
  fetcher: F,
) -> Resource<bool>
where
  S: CacheStorage,
  T: Cacheable,
  F: FnOnce(u32) -> Fut,
  Fut: Future<Output = RemoteOutcome<Page<T>>>,
{
  // Held until the merge commits or fails
  let _guard = locks.acquire(&query_key).await;

  let reader = Arc::clone(&storage);
  let key = query_key.clone();
  let entry = match run_blocking(move || reader.find_ledger_entry(&key)).await {
    Ok(entry) => entry,
    Err(e) => return Resource::error(e.to_string(), Some(true)),
  };

  let Some(entry) = entry else {
    tracing::debug!(query = %query_key, "No first page cached, nothing to continue");
    return Resource::success(Some(false));
  };
  let Some(page_number) = entry.next_page else {
    tracing::debug!(query = %query_key, "All pages cached");
    return Resource::success(Some(false));
  };

  tracing::debug!(query = %query_key, page = page_number, "Fetching next page");

  let (merged, entities) = match fetcher(page_number).await {
    RemoteOutcome::Success(page) => (entry.extended(&page), page.results),
    RemoteOutcome::Empty => (entry.exhausted(), Vec::new()),
    RemoteOutcome::Error(e) => {
      tracing::warn!(query = %query_key, page = page_number, error = %e, "Next page fetch failed");
      return Resource::error(e.to_string(), Some(true));
    }
  };

  let added = merged.ids.len() - entry.ids.len();
  let next = merged.next_page;

  // Commits only onto the ledger read above; a refresh in between wins
  match run_blocking(move || storage.merge_page(&entry, &merged, &entities)).await {
    Ok(()) => {
      tracing::info!(query = %query_key, page = page_number, added, next_page = ?next, "Merged page");
      Resource::success(Some(true))
    }
    Err(e) => {
      tracing::warn!(query = %query_key, error = %e, "Discarding fetched page");
      Resource::error(e.to_string(), Some(true))
    }
  }
}
