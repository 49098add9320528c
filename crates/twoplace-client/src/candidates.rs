//! Remote candidate buffering.
//!
//! Candidates from the other side can show up before their description has
//! been applied locally. They are held here and flushed in arrival order as
//! soon as the remote description is set; afterwards they pass straight
//! through.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};
use twoplace_media::{MediaError, PeerConnection};
use twoplace_shared::{IceCandidate, SessionDescription};

struct QueueState {
    remote_set: bool,
    pending: VecDeque<IceCandidate>,
}

pub struct CandidateQueue {
    peer: Arc<dyn PeerConnection>,
    state: Mutex<QueueState>,
}

impl CandidateQueue {
    pub fn new(peer: Arc<dyn PeerConnection>) -> Self {
        Self {
            peer,
            state: Mutex::new(QueueState {
                remote_set: false,
                pending: VecDeque::new(),
            }),
        }
    }

    /// Apply `candidate` now if the remote description is set, otherwise
    /// queue it.
    pub async fn push(&self, candidate: IceCandidate) {
        let mut state = self.state.lock().await;
        if state.remote_set {
            self.apply(&candidate).await;
        } else {
            debug!(pending = state.pending.len() + 1, "queueing early remote candidate");
            state.pending.push_back(candidate);
        }
    }

    /// Set the remote description, then flush everything queued so far.
    ///
    /// The queue stays locked throughout, so a candidate arriving meanwhile
    /// lands behind the flushed ones.
    pub async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), MediaError> {
        let mut state = self.state.lock().await;
        if state.remote_set {
            return Ok(());
        }
        self.peer.set_remote_description(desc).await?;
        state.remote_set = true;

        let flushed = state.pending.len();
        while let Some(candidate) = state.pending.pop_front() {
            self.apply(&candidate).await;
        }
        if flushed > 0 {
            debug!(flushed, "flushed queued remote candidates");
        }
        Ok(())
    }

    pub async fn is_remote_set(&self) -> bool {
        self.state.lock().await.remote_set
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    async fn apply(&self, candidate: &IceCandidate) {
        // One bad candidate must not fail the call.
        if let Err(e) = self.peer.add_ice_candidate(candidate).await {
            warn!(error = %e, "failed to add remote candidate");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakePeer;

    #[tokio::test]
    async fn early_candidates_wait_for_description() {
        let (peer, _events) = FakePeer::new(0);
        let queue = CandidateQueue::new(peer.clone());

        queue.push(IceCandidate::new("c1")).await;
        queue.push(IceCandidate::new("c2")).await;
        assert!(peer.ops().is_empty());
        assert_eq!(queue.pending_len().await, 2);

        queue
            .set_remote_description(&SessionDescription::answer("a"))
            .await
            .unwrap();
        queue.push(IceCandidate::new("c3")).await;

        assert_eq!(
            peer.ops(),
            vec!["remote:a", "candidate:c1", "candidate:c2", "candidate:c3"]
        );
        assert_eq!(queue.pending_len().await, 0);
    }

    #[tokio::test]
    async fn candidates_racing_the_description_keep_order() {
        let (peer, _events) = FakePeer::new(0);
        let queue = Arc::new(CandidateQueue::new(peer.clone()));
        queue.push(IceCandidate::new("c1")).await;

        let setter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .set_remote_description(&SessionDescription::offer("o"))
                    .await
                    .unwrap();
            })
        };
        // Let the setter take the lock and park inside the description call.
        tokio::task::yield_now().await;
        queue.push(IceCandidate::new("c2")).await;
        setter.await.unwrap();

        assert_eq!(peer.ops(), vec!["remote:o", "candidate:c1", "candidate:c2"]);
    }

    #[tokio::test]
    async fn description_is_applied_once() {
        let (peer, _events) = FakePeer::new(0);
        let queue = CandidateQueue::new(peer.clone());
        let desc = SessionDescription::answer("a");

        queue.set_remote_description(&desc).await.unwrap();
        queue.set_remote_description(&desc).await.unwrap();
        assert_eq!(peer.ops(), vec!["remote:a"]);
        assert!(queue.is_remote_set().await);
    }
}
