//! Async access and live subscriptions over the shared [`Database`].
//!
//! Every subscription is a small polling task. It re-reads its query when
//! this process writes (a version counter on a `watch` channel) and on a
//! fixed interval, which picks up writes made by other processes on the
//! same file. Items are pushed through a bounded channel of capacity one,
//! so a subscriber never has more than one undelivered item in flight.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use twoplace_shared::constants::DEFAULT_POLL_INTERVAL_MS;
use twoplace_shared::{CallId, CallPatch, CallSession, IceCandidate, PatchOutcome, Role, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};

/// The document operations a call client needs.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_call(&self, call: &CallSession) -> Result<()>;

    async fn get_call(&self, id: &CallId) -> Result<CallSession>;

    /// Merge `patch` into the call on behalf of `writer`. Writes to an ended
    /// call fail with [`StoreError::Refused`] unless they are a retry of
    /// what is already stored.
    async fn update_call(&self, id: &CallId, writer: &UserId, patch: &CallPatch) -> Result<PatchOutcome>;

    async fn add_candidate(
        &self,
        id: &CallId,
        writer: &UserId,
        role: Role,
        candidate: &IceCandidate,
    ) -> Result<()>;

    /// Current snapshot of the call, then one snapshot per change.
    fn watch_call(&self, id: &CallId) -> Subscription<CallSession>;

    /// Every candidate in the `role` subcollection, existing ones first,
    /// each delivered once in contribution order.
    fn watch_candidates(&self, id: &CallId, role: Role) -> Subscription<IceCandidate>;

    /// Calls ringing for `callee`, each delivered once.
    fn watch_incoming(&self, callee: &UserId) -> Subscription<CallSession>;
}

/// A live feed of documents. Dropping it cancels the feed.
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    task: JoinHandle<()>,
}

impl<T> Subscription<T> {
    /// Next item, or `None` once the feed has stopped.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Stop the feed. Items not yet received are discarded.
    pub fn unsubscribe(self) {
        // Drop aborts the task.
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// [`SessionStore`] over a SQLite [`Database`].
#[derive(Clone)]
pub struct LiveStore {
    db: Arc<Mutex<Database>>,
    version: Arc<watch::Sender<u64>>,
    poll_interval: Duration,
}

impl LiveStore {
    pub fn new(db: Database) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            db: Arc::new(Mutex::new(db)),
            version: Arc::new(version),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    /// Override how often subscriptions re-read the database.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Run a read against the database.
    pub fn read<R>(&self, f: impl FnOnce(&Database) -> Result<R>) -> Result<R> {
        let db = self.db.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&db)
    }

    /// Run a write against the database and wake local subscribers.
    pub fn write<R>(&self, f: impl FnOnce(&mut Database) -> Result<R>) -> Result<R> {
        let result = {
            let mut db = self.db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut db)?
        };
        self.version.send_modify(|v| *v = v.wrapping_add(1));
        Ok(result)
    }

    fn spawn_poller<T, F>(&self, label: &'static str, mut poll: F) -> Subscription<T>
    where
        T: Send + 'static,
        F: FnMut(&Database) -> Result<Vec<T>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let db = self.db.clone();
        let mut version = self.version.subscribe();
        let poll_interval = self.poll_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                match poll_once(&db, &mut poll) {
                    Ok(items) => {
                        for item in items {
                            if tx.send(item).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => tracing::warn!(subscription = label, error = %e, "poll failed"),
                }

                tokio::select! {
                    changed = version.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = ticker.tick() => {}
                    _ = tx.closed() => return,
                }
            }
        });

        Subscription { rx, task }
    }
}

/// Open calls already delivered by an incoming-call subscription.
#[derive(Default)]
struct SeenCalls(HashSet<CallId>);

impl SeenCalls {
    /// Calls in `open` not delivered before. Ids that are no longer open
    /// are forgotten.
    fn fresh(&mut self, open: Vec<CallSession>) -> Vec<CallSession> {
        self.0.retain(|id| open.iter().any(|c| c.id == *id));
        open.into_iter().filter(|c| self.0.insert(c.id)).collect()
    }
}

fn poll_once<T>(
    db: &Mutex<Database>,
    poll: &mut impl FnMut(&Database) -> Result<Vec<T>>,
) -> Result<Vec<T>> {
    let guard = db.lock().map_err(|_| StoreError::LockPoisoned)?;
    poll(&*guard)
}

#[async_trait]
impl SessionStore for LiveStore {
    async fn create_call(&self, call: &CallSession) -> Result<()> {
        self.write(|db| db.create_call(call))?;
        tracing::debug!(call = %call.id, "call document created");
        Ok(())
    }

    async fn get_call(&self, id: &CallId) -> Result<CallSession> {
        self.read(|db| db.get_call(id))
    }

    async fn update_call(&self, id: &CallId, writer: &UserId, patch: &CallPatch) -> Result<PatchOutcome> {
        let (outcome, _) = self.write(|db| db.update_call(id, writer, patch))?;
        Ok(outcome)
    }

    async fn add_candidate(
        &self,
        id: &CallId,
        writer: &UserId,
        role: Role,
        candidate: &IceCandidate,
    ) -> Result<()> {
        self.write(|db| db.add_candidate(id, writer, role, candidate))?;
        Ok(())
    }

    fn watch_call(&self, id: &CallId) -> Subscription<CallSession> {
        let id = *id;
        let mut last: Option<CallSession> = None;
        self.spawn_poller("call", move |db| match db.get_call(&id) {
            Ok(call) if last.as_ref() != Some(&call) => {
                last = Some(call.clone());
                Ok(vec![call])
            }
            Ok(_) | Err(StoreError::NotFound) => Ok(Vec::new()),
            Err(e) => Err(e),
        })
    }

    fn watch_candidates(&self, id: &CallId, role: Role) -> Subscription<IceCandidate> {
        let id = *id;
        let mut after = 0;
        self.spawn_poller("candidates", move |db| {
            let rows = db.candidates_since(&id, role, after)?;
            if let Some((seq, _)) = rows.last() {
                after = *seq;
            }
            Ok(rows.into_iter().map(|(_, c)| c).collect())
        })
    }

    fn watch_incoming(&self, callee: &UserId) -> Subscription<CallSession> {
        let callee = callee.clone();
        let mut seen = SeenCalls::default();
        self.spawn_poller("incoming", move |db| {
            let open = db.open_calls_for_callee(&callee)?;
            Ok(seen.fresh(open))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use twoplace_shared::SessionDescription;

    fn store() -> LiveStore {
        LiveStore::new(Database::open_in_memory().unwrap())
    }

    fn alice() -> UserId {
        UserId::from("alice")
    }

    fn bob() -> UserId {
        UserId::from("bob")
    }

    async fn new_call(store: &LiveStore) -> CallSession {
        let call = CallSession::new(alice(), bob(), Utc::now()).unwrap();
        store.create_call(&call).await.unwrap();
        call
    }

    #[tokio::test(start_paused = true)]
    async fn watch_call_emits_snapshot_then_changes() {
        let store = store();
        let call = new_call(&store).await;

        let mut sub = store.watch_call(&call.id);
        assert_eq!(sub.recv().await.unwrap(), call);

        let offer = SessionDescription::offer("v=0");
        store
            .update_call(&call.id, &alice(), &CallPatch::offer(offer.clone()))
            .await
            .unwrap();
        assert_eq!(sub.recv().await.unwrap().offer, Some(offer));
    }

    #[tokio::test(start_paused = true)]
    async fn candidates_backlog_then_live() {
        let store = store();
        let call = new_call(&store).await;
        store
            .add_candidate(&call.id, &alice(), Role::Caller, &IceCandidate::new("a0"))
            .await
            .unwrap();

        let mut sub = store.watch_candidates(&call.id, Role::Caller);
        assert_eq!(sub.recv().await.unwrap().candidate, "a0");

        store
            .add_candidate(&call.id, &alice(), Role::Caller, &IceCandidate::new("a1"))
            .await
            .unwrap();
        store
            .add_candidate(&call.id, &bob(), Role::Callee, &IceCandidate::new("b0"))
            .await
            .unwrap();
        assert_eq!(sub.recv().await.unwrap().candidate, "a1");

        // Callee candidates never show up on the caller feed.
        let next = tokio::time::timeout(Duration::from_secs(2), sub.recv()).await;
        assert!(next.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn incoming_delivered_once() {
        let store = store();
        let mut sub = store.watch_incoming(&bob());
        let call = new_call(&store).await;

        assert_eq!(sub.recv().await.unwrap().id, call.id);
        store
            .update_call(&call.id, &alice(), &CallPatch::sleep_timer(5))
            .await
            .unwrap();

        let next = tokio::time::timeout(Duration::from_secs(2), sub.recv()).await;
        assert!(next.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn ended_incoming_calls_are_forgotten() {
        let store = store();
        let mut sub = store.watch_incoming(&bob());
        let first = new_call(&store).await;
        assert_eq!(sub.recv().await.unwrap().id, first.id);
        store
            .update_call(&first.id, &bob(), &CallPatch::reject(Utc::now()))
            .await
            .unwrap();

        let second = new_call(&store).await;
        assert_eq!(sub.recv().await.unwrap().id, second.id);
        let next = tokio::time::timeout(Duration::from_secs(2), sub.recv()).await;
        assert!(next.is_err());
    }

    #[test]
    fn seen_calls_track_only_open_ids() {
        let a = CallSession::new(alice(), bob(), Utc::now()).unwrap();
        let b = CallSession::new(alice(), bob(), Utc::now()).unwrap();
        let mut seen = SeenCalls::default();

        assert_eq!(seen.fresh(vec![a.clone()]).len(), 1);
        let fresh = seen.fresh(vec![a.clone(), b.clone()]);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id, b.id);
        assert_eq!(seen.0.len(), 2);

        // `a` ended: dropped from the set, `b` still suppressed.
        assert!(seen.fresh(vec![b.clone()]).is_empty());
        assert_eq!(seen.0.len(), 1);
        assert!(seen.fresh(Vec::new()).is_empty());
        assert!(seen.0.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn other_process_writes_are_polled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let ours = LiveStore::new(Database::open_at(&path).unwrap());
        let theirs = LiveStore::new(Database::open_at(&path).unwrap());

        let call = new_call(&ours).await;
        let mut sub = ours.watch_call(&call.id);
        sub.recv().await.unwrap();

        theirs
            .update_call(&call.id, &bob(), &CallPatch::reject(Utc::now()))
            .await
            .unwrap();
        let seen = sub.recv().await.unwrap();
        assert_eq!(seen.was_auto_ended, Some(false));
        assert!(seen.is_ended());
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_stops_delivery() {
        let store = store();
        let call = new_call(&store).await;
        let sub = store.watch_call(&call.id);
        sub.unsubscribe();

        // Still writable after the watcher is gone.
        store
            .update_call(&call.id, &bob(), &CallPatch::accept(Utc::now()))
            .await
            .unwrap();
        assert!(store.get_call(&call.id).await.unwrap().accepted);
    }
}
