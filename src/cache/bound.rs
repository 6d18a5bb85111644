//! Cache-bound resource: a live view of the cache that refreshes itself from
//! the network at most once per subscription.
//!
//! The cache is the only thing callers ever see. A remote fetch is a side
//! input: its result is saved, and the saved state is what gets emitted.
//!
//! Emission order for one subscription:
//!
//! 1. `Loading(snapshot)` straight after the first cache read
//! 2. if no fetch is needed, `Success(snapshot)` (or `Loading(None)` while the
//!    cache is still empty) and then one emission per cache change
//! 3. while a fetch is in flight, `Loading(snapshot)` per cache change
//! 4. when the fetch resolves, `Success(snapshot)` read back after the save, or
//!    a single `Error(message, last snapshot)`; later cache changes emit `Success`

use color_eyre::Result;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::outcome::{RemoteOutcome, SyncError};
use super::resource::Resource;

/// Reads the current snapshot. Runs on the blocking pool.
type LoadFn<T> = Arc<dyn Fn() -> Result<Option<T>> + Send + Sync>;

/// Decides whether the first snapshot warrants a fetch.
type ShouldFetchFn<T> = Box<dyn FnOnce(Option<&T>) -> bool + Send>;

/// Creates the single remote call for this subscription.
type CallFn<R> = Box<dyn FnOnce() -> BoxFuture<'static, RemoteOutcome<R>> + Send>;

/// Persists a fetched body atomically. Runs on the blocking pool.
type SaveFn<R> = Box<dyn FnOnce(R) -> Result<()> + Send>;

/// Emissions buffered ahead of a slow subscriber. Once full, the engine
/// waits; cache changes in the meantime collapse into one re-read.
const EMISSION_BUFFER: usize = 16;

/// A cache snapshot that can be present yet hold nothing.
pub trait Snapshot {
  fn is_empty(&self) -> bool;
}

/// Run a blocking cache operation off the async workers.
///
/// The closure runs to completion even if the awaiting task is aborted, so a
/// save that has started always commits or rolls back on its own.
pub(crate) async fn run_blocking<F, O>(f: F) -> std::result::Result<O, SyncError>
where
  F: FnOnce() -> Result<O> + Send + 'static,
  O: Send + 'static,
{
  tokio::task::spawn_blocking(f)
    .await
    .map_err(|e| SyncError::Storage(e.to_string()))?
    .map_err(|e| SyncError::Storage(e.to_string()))
}

/// A resource bound to the cache, with the pieces needed to refresh it.
pub struct NetworkBound<T, R> {
  changes: watch::Receiver<u64>,
  load: LoadFn<T>,
  should_fetch: ShouldFetchFn<T>,
  create_call: CallFn<R>,
  save: SaveFn<R>,
}

impl<T, R> NetworkBound<T, R>
where
  T: Snapshot + Clone + PartialEq + Send + Sync + 'static,
  R: Send + 'static,
{
  /// Bind a resource.
  ///
  /// - `changes` ticks after every cache commit
  /// - `load` reads the current snapshot
  /// - `should_fetch` is consulted once, with the first snapshot
  /// - `create_call` issues the remote call (at most once)
  /// - `save` writes a fetched body to the cache as one transaction
  pub fn new<L, P, C, Fut, S>(
    changes: watch::Receiver<u64>,
    load: L,
    should_fetch: P,
    create_call: C,
    save: S,
  ) -> Self
  where
    L: Fn() -> Result<Option<T>> + Send + Sync + 'static,
    P: FnOnce(Option<&T>) -> bool + Send + 'static,
    C: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = RemoteOutcome<R>> + Send + 'static,
    S: FnOnce(R) -> Result<()> + Send + 'static,
  {
    Self {
      changes,
      load: Arc::new(load),
      should_fetch: Box::new(should_fetch),
      create_call: Box::new(move || create_call().boxed()),
      save: Box::new(save),
    }
  }

  /// Start observing. Dropping the returned stream cancels the subscription
  /// and any remote call still in flight.
  pub fn observe(self) -> ResourceStream<T> {
    let (tx, rx) = mpsc::channel(EMISSION_BUFFER);
    let task = tokio::spawn(self.drive(Emitter::new(tx)));

    ResourceStream { rx, task }
  }

  async fn drive(self, mut out: Emitter<T>) {
    let NetworkBound {
      mut changes,
      load,
      should_fetch,
      create_call,
      save,
    } = self;

    changes.borrow_and_update();

    let mut snapshot = match read(&load).await {
      Ok(snapshot) => snapshot,
      Err(e) => {
        tracing::warn!(error = %e, "Initial cache read failed");
        if !out.emit(Resource::error(e.to_string(), None)).await {
          return;
        }
        // Without a trustworthy snapshot, only cache changes drive emissions.
        return follow_changes(changes, load, out, None, Phase::Resolved).await;
      }
    };

    if !out.emit(Resource::loading(snapshot.clone())).await {
      return;
    }

    let mut phase;
    let mut call = None;
    let mut save = Some(save);

    if should_fetch(snapshot.as_ref()) {
      tracing::debug!("Cache needs refresh, fetching");
      call = Some(create_call());
      phase = Phase::Fetching;
    } else {
      tracing::debug!("Cache satisfies request, skipping fetch");
      phase = Phase::Skipped;
      if !out.emit(phase.settled(snapshot.clone())).await {
        return;
      }
    }

    let mut live = true;
    while call.is_some() {
      tokio::select! {
        outcome = resolve(&mut call), if call.is_some() => {
          call = None;
          phase = Phase::Resolved;

          let emitted = match outcome {
            RemoteOutcome::Success(body) => {
              let Some(save) = save.take() else { break };
              match run_blocking(move || save(body)).await {
                Ok(()) => reread(&load, &mut snapshot, phase, &mut out).await,
                Err(e) => {
                  tracing::warn!(error = %e, "Discarding fetched data");
                  out.emit(Resource::error(e.to_string(), snapshot.clone())).await
                }
              }
            }
            RemoteOutcome::Empty => {
              tracing::debug!("Remote returned no content");
              reread(&load, &mut snapshot, phase, &mut out).await
            }
            RemoteOutcome::Error(e) => {
              tracing::warn!(error = %e, "Refresh failed, keeping cached data");
              out.emit(Resource::error(e.to_string(), snapshot.clone())).await
            }
          };

          if !emitted {
            return;
          }
        }
        changed = changes.changed(), if live => {
          if changed.is_err() {
            live = false;
            continue;
          }
          if !reread(&load, &mut snapshot, phase, &mut out).await {
            return;
          }
        }
      }
    }

    if live {
      follow_changes(changes, load, out, snapshot, phase).await;
    }
  }
}

/// Lifecycle of one subscription, deciding the status of cache-driven emissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  /// No fetch was needed
  Skipped,
  /// The remote call is in flight
  Fetching,
  /// The remote call resolved (successfully or not)
  Resolved,
}

impl Phase {
  fn settled<T: Snapshot>(self, snapshot: Option<T>) -> Resource<T> {
    let empty = snapshot.as_ref().map_or(true, Snapshot::is_empty);
    match self {
      Phase::Fetching => Resource::loading(snapshot),
      Phase::Skipped if empty => Resource::loading(snapshot),
      _ => Resource::success(snapshot),
    }
  }
}

async fn resolve<R>(call: &mut Option<BoxFuture<'static, RemoteOutcome<R>>>) -> RemoteOutcome<R> {
  match call {
    Some(call) => call.await,
    None => std::future::pending().await,
  }
}

async fn read<T: Send + 'static>(load: &LoadFn<T>) -> std::result::Result<Option<T>, SyncError> {
  let load = Arc::clone(load);
  run_blocking(move || load()).await
}

/// Re-read the cache and emit it with the status `phase` dictates.
///
/// Returns `false` once the subscriber is gone.
async fn reread<T>(
  load: &LoadFn<T>,
  snapshot: &mut Option<T>,
  phase: Phase,
  out: &mut Emitter<T>,
) -> bool
where
  T: Snapshot + Clone + PartialEq + Send + Sync + 'static,
{
  match read(load).await {
    Ok(fresh) => {
      *snapshot = fresh;
      out.emit(phase.settled(snapshot.clone())).await
    }
    Err(e) => {
      tracing::warn!(error = %e, "Cache read failed");
      out.emit(Resource::error(e.to_string(), snapshot.clone())).await
    }
  }
}

/// Emit on every cache change until the subscriber leaves.
async fn follow_changes<T>(
  mut changes: watch::Receiver<u64>,
  load: LoadFn<T>,
  mut out: Emitter<T>,
  mut snapshot: Option<T>,
  phase: Phase,
) where
  T: Snapshot + Clone + PartialEq + Send + Sync + 'static,
{
  while changes.changed().await.is_ok() {
    if !reread(&load, &mut snapshot, phase, &mut out).await {
      return;
    }
  }
}

/// Delivers emissions in order and drops exact repeats.
struct Emitter<T> {
  tx: mpsc::Sender<Resource<T>>,
  last: Option<Resource<T>>,
}

impl<T: Clone + PartialEq> Emitter<T> {
  fn new(tx: mpsc::Sender<Resource<T>>) -> Self {
    Self { tx, last: None }
  }

  /// Waits for buffer space. Returns `false` once the receiver has been dropped.
  async fn emit(&mut self, resource: Resource<T>) -> bool {
    if self.last.as_ref() == Some(&resource) {
      return !self.tx.is_closed();
    }
    self.last = Some(resource.clone());
    self.tx.send(resource).await.is_ok()
  }
}

/// Live sequence of [`Resource`] emissions for one subscription.
///
/// The stream never ends on its own while the cache is alive. Dropping it
/// unsubscribes.
pub struct ResourceStream<T> {
  rx: mpsc::Receiver<Resource<T>>,
  task: JoinHandle<()>,
}

impl<T> ResourceStream<T> {
  /// Receive the next emission.
  pub async fn next(&mut self) -> Option<Resource<T>> {
    self.rx.recv().await
  }
}

impl<T> Stream for ResourceStream<T> {
  type Item = Resource<T>;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.rx.poll_recv(cx)
  }
}

impl<T> Drop for ResourceStream<T> {
  fn drop(&mut self) {
    self.task.abort();
  }
}
