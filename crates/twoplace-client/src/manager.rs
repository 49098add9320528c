//! The call session manager.
//!
//! One [`CallManager`] per signed-in user. It runs at most one call at a
//! time and owns everything that call holds: the peer connection, local
//! capture, remote tracks, store subscriptions and timers. Every way a call
//! can end goes through the same teardown, which releases all of it.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use twoplace_media::{
    LocalMedia, MediaDevices, MediaTrack, PeerConnection, PeerConnectionFactory, PeerEvent,
    PeerState,
};
use twoplace_shared::{CallId, CallPatch, CallSession, Role, UserId};
use twoplace_store::{SessionStore, StoreError};

use crate::candidates::CandidateQueue;
use crate::config::CallConfig;
use crate::error::{CallError, Result};
use crate::lifecycle::{CallSnapshot, CallStatus, EndReason, Lifecycle};
use crate::usage::{UsageMeter, UsageTotals};

/// Everything a call holds that must be released on teardown.
#[derive(Default)]
struct Resources {
    released: bool,
    peer: Option<Arc<dyn PeerConnection>>,
    queue: Option<Arc<CandidateQueue>>,
    local_media: Option<LocalMedia>,
    remote_tracks: Vec<MediaTrack>,
    tasks: Vec<JoinHandle<()>>,
}

struct ActiveCall {
    lifecycle: Lifecycle,
    usage: Arc<UsageMeter>,
    resources: Mutex<Resources>,
}

impl ActiveCall {
    fn new(lifecycle: Lifecycle) -> Arc<Self> {
        Arc::new(Self {
            lifecycle,
            usage: Arc::new(UsageMeter::new()),
            resources: Mutex::new(Resources::default()),
        })
    }

    fn id(&self) -> CallId {
        self.lifecycle.call_id()
    }

    fn resources(&self) -> MutexGuard<'_, Resources> {
        match self.resources.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Keep `task` until teardown. Aborted at once if teardown already ran.
    fn track_task(&self, task: JoinHandle<()>) {
        let mut res = self.resources();
        if res.released {
            task.abort();
        } else {
            res.tasks.push(task);
        }
    }

    /// Take ownership of captured media. Stops it and fails if the call is
    /// already torn down.
    fn adopt_media(&self, media: LocalMedia) -> Result<()> {
        let mut res = self.resources();
        if res.released {
            media.stop_all();
            return Err(CallError::Ended(self.id()));
        }
        res.local_media = Some(media);
        Ok(())
    }

    /// Take ownership of the peer connection. Returns `false` if the call is
    /// already torn down; the caller must close the connection then.
    fn adopt_peer(&self, peer: Arc<dyn PeerConnection>, queue: Arc<CandidateQueue>) -> bool {
        let mut res = self.resources();
        if res.released {
            return false;
        }
        res.peer = Some(peer);
        res.queue = Some(queue);
        true
    }

    fn add_remote_track(&self, track: MediaTrack) {
        let mut res = self.resources();
        if res.released {
            track.stop();
        } else {
            res.remote_tracks.push(track);
        }
    }

    fn peer(&self) -> Option<Arc<dyn PeerConnection>> {
        self.resources().peer.clone()
    }

    fn queue(&self) -> Option<Arc<CandidateQueue>> {
        self.resources().queue.clone()
    }

    fn local_media(&self) -> Option<LocalMedia> {
        self.resources().local_media.clone()
    }

    fn release(&self) -> Resources {
        let mut res = self.resources();
        res.released = true;
        std::mem::take(&mut *res)
    }
}

struct Inner {
    local: UserId,
    store: Arc<dyn SessionStore>,
    devices: Arc<dyn MediaDevices>,
    peers: Arc<dyn PeerConnectionFactory>,
    config: CallConfig,
    active: Mutex<Option<Arc<ActiveCall>>>,
    status_tx: Arc<watch::Sender<CallSnapshot>>,
    incoming: Mutex<Option<JoinHandle<()>>>,
}

/// Call session manager for one local user.
#[derive(Clone)]
pub struct CallManager {
    inner: Arc<Inner>,
}

impl CallManager {
    pub fn new(
        local: UserId,
        store: Arc<dyn SessionStore>,
        devices: Arc<dyn MediaDevices>,
        peers: Arc<dyn PeerConnectionFactory>,
        config: CallConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(CallSnapshot::idle());
        Self {
            inner: Arc::new(Inner {
                local,
                store,
                devices,
                peers,
                config,
                active: Mutex::new(None),
                status_tx: Arc::new(status_tx),
                incoming: Mutex::new(None),
            }),
        }
    }

    pub fn local_user(&self) -> &UserId {
        &self.inner.local
    }

    /// Status of the current (or most recent) call.
    pub fn subscribe_status(&self) -> watch::Receiver<CallSnapshot> {
        self.inner.status_tx.subscribe()
    }

    pub fn status(&self) -> CallSnapshot {
        self.inner.status_tx.borrow().clone()
    }

    /// Usage totals of the active call, if any.
    pub fn usage(&self) -> Option<UsageTotals> {
        self.inner.active().map(|call| call.usage.totals())
    }

    /// Local tracks of the active call.
    pub fn local_media(&self) -> Option<LocalMedia> {
        self.inner.active().and_then(|call| call.local_media())
    }

    /// Call `remote`. Returns the new call id.
    ///
    /// If capture fails the error is returned but the call stays in
    /// `calling`; the unanswered-call timeout ends it.
    pub async fn initiate(&self, remote: &UserId) -> Result<CallId> {
        let inner = &self.inner;
        let session = CallSession::new(inner.local.clone(), remote.clone(), Utc::now())?;
        let call_id = session.id;

        // Claim the slot before the first suspension point.
        let call = {
            let mut slot = inner.active_slot();
            if slot.as_ref().is_some_and(|c| !c.lifecycle.is_ended()) {
                return Err(CallError::Busy);
            }
            let lifecycle =
                Lifecycle::start(call_id, Role::Caller, remote.clone(), inner.status_tx.clone());
            let call = ActiveCall::new(lifecycle);
            *slot = Some(call.clone());
            call
        };

        if let Err(e) = inner.store.create_call(&session).await {
            inner.abandon(&call);
            return Err(e.into());
        }
        inner.arm_ring_timer(&call);
        inner.watch_session(&call);

        let media = match inner.devices.acquire(&inner.config.constraints).await {
            Ok(media) => media,
            Err(e) => {
                warn!(call = %call_id, error = %e, "capture failed, call left to time out");
                return Err(e.into());
            }
        };
        call.adopt_media(media.clone())?;

        let peer = inner.open_peer(&call).await?;
        for track in media.tracks() {
            peer.add_track(track).await?;
        }
        let offer = peer.create_offer().await?;
        peer.set_local_description(&offer).await?;
        inner
            .store
            .update_call(&call_id, &inner.local, &CallPatch::offer(offer))
            .await?;
        debug!(call = %call_id, "offer written");

        inner.watch_answer(&call);
        inner.watch_remote_candidates(&call, Role::Callee);
        Ok(call_id)
    }

    /// Answer the offer of call `call_id`: capture, apply the offer, write
    /// the answer and start taking the caller's candidates.
    ///
    /// Fails with [`CallError::NoOffer`] if the offer has not been written.
    pub async fn respond(&self, call_id: &CallId) -> Result<()> {
        let inner = &self.inner;
        let session = inner.store.get_call(call_id).await?;
        if session.is_ended() {
            return Err(CallError::Ended(*call_id));
        }
        let offer = session.offer.clone().ok_or(CallError::NoOffer(*call_id))?;
        let call = inner.ring(&session)?;
        if call.peer().is_some() {
            debug!(call = %call_id, "already responded");
            return Ok(());
        }

        let media = inner.devices.acquire(&inner.config.constraints).await?;
        call.adopt_media(media.clone())?;

        let peer = inner.open_peer(&call).await?;
        for track in media.tracks() {
            peer.add_track(track).await?;
        }
        if let Some(queue) = call.queue() {
            queue.set_remote_description(&offer).await?;
        }
        // Listen before answering so candidates the caller sends in
        // response land in the queue.
        inner.watch_remote_candidates(&call, Role::Caller);

        let answer = peer.create_answer().await?;
        peer.set_local_description(&answer).await?;
        inner
            .store
            .update_call(call_id, &inner.local, &CallPatch::answer(answer))
            .await?;
        debug!(call = %call_id, "answer written");
        Ok(())
    }

    /// Accept an incoming call: wait (bounded) for the offer, respond, then
    /// mark the call accepted.
    pub async fn accept(&self, call_id: &CallId) -> Result<()> {
        let inner = &self.inner;
        inner.wait_for_offer(call_id).await?;
        self.respond(call_id).await?;

        let patch = CallPatch::accept(Utc::now());
        match inner.store.update_call(call_id, &inner.local, &patch).await {
            Ok(_) => {}
            Err(e) if e.is_terminal() => {
                // Lost the race against a reject, hangup or timeout.
                if let Some(call) = inner.active_for(call_id) {
                    inner.finish(&call, EndReason::Remote).await;
                }
                return Err(CallError::Ended(*call_id));
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(call) = inner.active_for(call_id) {
            inner.on_accepted(&call);
        }
        Ok(())
    }

    /// Decline the ringing call `call_id`.
    pub async fn reject(&self, call_id: &CallId) -> Result<()> {
        let call = self.inner.active_for(call_id).ok_or(CallError::NoActiveCall)?;
        if call.lifecycle.status() != CallStatus::Ringing {
            return Err(CallError::NotRinging(*call_id));
        }
        self.inner.finish(&call, EndReason::Rejected).await;
        Ok(())
    }

    /// Hang up the active call (or cancel it while it is still calling).
    pub async fn end(&self) -> Result<()> {
        let call = self.inner.live_call().ok_or(CallError::NoActiveCall)?;
        self.inner.finish(&call, EndReason::Hangup).await;
        Ok(())
    }

    /// The client is going away: tear down and make one bounded attempt to
    /// record the end.
    pub async fn unload(&self) {
        if let Some(call) = self.inner.live_call() {
            self.inner.finish(&call, EndReason::Unload).await;
        }
        self.stop_listening();
    }

    /// Write a sleep timer on the active call. Both participants end the
    /// call `minutes` after it is accepted (or after this write, if it
    /// already is).
    pub async fn set_sleep_timer(&self, minutes: u32) -> Result<()> {
        let call = self.inner.live_call().ok_or(CallError::NoActiveCall)?;
        self.inner
            .store
            .update_call(&call.id(), &self.inner.local, &CallPatch::sleep_timer(minutes))
            .await?;
        self.inner.apply_sleep_minutes(&call, minutes);
        Ok(())
    }

    pub fn set_audio_enabled(&self, enabled: bool) -> Result<()> {
        let media = self.local_media().ok_or(CallError::NoActiveCall)?;
        media.set_audio_enabled(enabled);
        Ok(())
    }

    pub fn set_video_enabled(&self, enabled: bool) -> Result<()> {
        let media = self.local_media().ok_or(CallError::NoActiveCall)?;
        media.set_video_enabled(enabled);
        Ok(())
    }

    /// Start ringing for calls addressed to the local user. Calls arriving
    /// while another call is live are ignored.
    pub fn start_listening(&self) {
        let mut slot = self.inner.incoming_slot();
        if slot.is_some() {
            return;
        }
        let inner = self.inner.clone();
        let mut incoming = self.inner.store.watch_incoming(&self.inner.local);
        *slot = Some(tokio::spawn(async move {
            while let Some(session) = incoming.recv().await {
                let age = (Utc::now() - session.started_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if age > inner.config.ring_timeout {
                    debug!(call = %session.id, "skipping stale incoming call");
                    continue;
                }
                match inner.ring(&session) {
                    Ok(_) => info!(call = %session.id, from = %session.caller_uid.short(), "incoming call"),
                    Err(CallError::Busy) => {
                        debug!(call = %session.id, "busy, ignoring incoming call")
                    }
                    Err(e) => warn!(call = %session.id, error = %e, "cannot ring"),
                }
            }
        }));
        info!(user = %self.inner.local.short(), "listening for incoming calls");
    }

    pub fn stop_listening(&self) {
        if let Some(task) = self.inner.incoming_slot().take() {
            task.abort();
        }
    }

    /// Unload the active call when the signed-in identity changes away from
    /// this manager's user.
    pub fn follow_auth(&self, mut identity: watch::Receiver<Option<UserId>>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while identity.changed().await.is_ok() {
                let current = identity.borrow_and_update().clone();
                if current.as_ref() != Some(&manager.inner.local) {
                    info!(user = %manager.inner.local.short(), "signed out, unloading call");
                    manager.unload().await;
                    return;
                }
            }
        })
    }
}

impl Inner {
    fn active_slot(&self) -> MutexGuard<'_, Option<Arc<ActiveCall>>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn incoming_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.incoming.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn active(&self) -> Option<Arc<ActiveCall>> {
        self.active_slot().clone()
    }

    fn live_call(&self) -> Option<Arc<ActiveCall>> {
        self.active().filter(|c| c.lifecycle.status().is_live())
    }

    fn active_for(&self, call_id: &CallId) -> Option<Arc<ActiveCall>> {
        self.active().filter(|c| c.id() == *call_id)
    }

    /// Make `session` the active call in `ringing`, unless it already is.
    fn ring(self: &Arc<Self>, session: &CallSession) -> Result<Arc<ActiveCall>> {
        if !session.is_ringing_for(&self.local) {
            return if session.is_ended() {
                Err(CallError::Ended(session.id))
            } else {
                Err(CallError::NoActiveCall)
            };
        }

        let call = {
            let mut slot = self.active_slot();
            if let Some(current) = slot.as_ref() {
                if current.id() == session.id {
                    return if current.lifecycle.is_ended() {
                        Err(CallError::Ended(session.id))
                    } else {
                        Ok(current.clone())
                    };
                }
                if !current.lifecycle.is_ended() {
                    return Err(CallError::Busy);
                }
            }
            let lifecycle = Lifecycle::start(
                session.id,
                Role::Callee,
                session.caller_uid.clone(),
                self.status_tx.clone(),
            );
            let call = ActiveCall::new(lifecycle);
            *slot = Some(call.clone());
            call
        };

        self.arm_ring_timer(&call);
        self.watch_session(&call);
        Ok(call)
    }

    /// Undo a call that never made it into the store.
    fn abandon(&self, call: &Arc<ActiveCall>) {
        call.lifecycle.mark_ended(EndReason::Hangup);
        call.release();
        let mut slot = self.active_slot();
        if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, call)) {
            *slot = None;
        }
    }

    fn arm_ring_timer(self: &Arc<Self>, call: &Arc<ActiveCall>) {
        let inner = self.clone();
        let target = call.clone();
        let timeout = self.config.ring_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if !target.lifecycle.ring_timer_applies() {
                return;
            }
            // The accept may be stored but not yet polled.
            match inner.store.get_call(&target.id()).await {
                Ok(session) if session.accepted => {
                    info!(call = %target.id(), "answered at the deadline");
                    inner.on_accepted(&target);
                    return;
                }
                Ok(_) => {}
                Err(e) => debug!(call = %target.id(), error = %e, "deadline re-read failed"),
            }
            info!(call = %target.id(), "unanswered, ending");
            inner.spawn_finish(target, EndReason::Timeout);
        });
        call.lifecycle.arm_ring_timer(timer);
    }

    fn arm_sleep_timer(self: &Arc<Self>, call: &Arc<ActiveCall>, minutes: u32) {
        let inner = self.clone();
        let target = call.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(u64::from(minutes) * 60)).await;
            info!(call = %target.id(), minutes, "sleep timer expired");
            inner.spawn_finish(target, EndReason::SleepTimer);
        });
        call.lifecycle.arm_sleep_timer(timer);
        debug!(call = %call.id(), minutes, "sleep timer armed");
    }

    fn apply_sleep_minutes(self: &Arc<Self>, call: &Arc<ActiveCall>, minutes: u32) {
        if let Some(minutes) = call.lifecycle.set_sleep_minutes(minutes) {
            self.arm_sleep_timer(call, minutes);
        }
    }

    fn on_accepted(self: &Arc<Self>, call: &Arc<ActiveCall>) {
        let Some(pending_sleep) = call.lifecycle.mark_accepted() else {
            return;
        };
        if let Some(peer) = call.peer() {
            let sampler = call.usage.spawn_sampler(peer, self.config.stats_interval);
            call.track_task(sampler);
        }
        if let Some(minutes) = pending_sleep {
            self.arm_sleep_timer(call, minutes);
        }
    }

    /// Teardown from inside a task the teardown itself would abort.
    fn spawn_finish(self: &Arc<Self>, call: Arc<ActiveCall>, reason: EndReason) {
        let inner = self.clone();
        tokio::spawn(async move {
            inner.finish(&call, reason).await;
        });
    }

    /// Follow the call document: acceptance, sleep timer and remote end.
    fn watch_session(self: &Arc<Self>, call: &Arc<ActiveCall>) {
        let inner = self.clone();
        let target = call.clone();
        let mut updates = self.store.watch_call(&call.id());
        call.track_task(tokio::spawn(async move {
            while let Some(session) = updates.recv().await {
                if session.is_ended() {
                    inner.spawn_finish(target, EndReason::Remote);
                    return;
                }
                if session.accepted {
                    inner.on_accepted(&target);
                }
                if let Some(minutes) = session.sleep_timer_minutes {
                    inner.apply_sleep_minutes(&target, minutes);
                }
            }
        }));
    }

    /// Caller side: apply the callee's answer once it is written.
    fn watch_answer(self: &Arc<Self>, call: &Arc<ActiveCall>) {
        let Some(queue) = call.queue() else { return };
        let call_id = call.id();
        let mut updates = self.store.watch_call(&call_id);
        call.track_task(tokio::spawn(async move {
            while let Some(session) = updates.recv().await {
                let Some(answer) = session.answer else { continue };
                match queue.set_remote_description(&answer).await {
                    Ok(()) => debug!(call = %call_id, "answer applied"),
                    Err(e) => warn!(call = %call_id, error = %e, "failed to apply answer"),
                }
                return;
            }
        }));
    }

    /// Feed the other role's candidates into the queue.
    fn watch_remote_candidates(self: &Arc<Self>, call: &Arc<ActiveCall>, remote: Role) {
        let Some(queue) = call.queue() else { return };
        let mut candidates = self.store.watch_candidates(&call.id(), remote);
        call.track_task(tokio::spawn(async move {
            while let Some(candidate) = candidates.recv().await {
                queue.push(candidate).await;
            }
        }));
    }

    /// Create the call's peer connection and start pumping its events.
    async fn open_peer(self: &Arc<Self>, call: &Arc<ActiveCall>) -> Result<Arc<dyn PeerConnection>> {
        let handle = self.peers.create(&self.config.peer).await?;
        let peer = handle.connection;
        let queue = Arc::new(CandidateQueue::new(peer.clone()));
        if !call.adopt_peer(peer.clone(), queue) {
            if let Err(e) = peer.close().await {
                debug!(error = %e, "closing orphaned peer connection");
            }
            return Err(CallError::Ended(call.id()));
        }

        let inner = self.clone();
        let target = call.clone();
        let role = call.lifecycle.role();
        let mut events = handle.events;
        call.track_task(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    PeerEvent::LocalCandidate(candidate) => {
                        let result = inner
                            .store
                            .add_candidate(&target.id(), &inner.local, role, &candidate)
                            .await;
                        if let Err(e) = result {
                            warn!(call = %target.id(), error = %e, "failed to publish candidate");
                        }
                    }
                    PeerEvent::RemoteTrack(track) => {
                        debug!(call = %target.id(), kind = %track.kind(), "remote track");
                        target.add_remote_track(track);
                    }
                    PeerEvent::StateChanged(state) => {
                        if matches!(state, PeerState::Failed | PeerState::Disconnected) {
                            warn!(call = %target.id(), ?state, "peer connection degraded");
                        } else {
                            debug!(call = %target.id(), ?state, "peer connection state");
                        }
                    }
                }
            }
        }));
        Ok(peer)
    }

    async fn wait_for_offer(&self, call_id: &CallId) -> Result<()> {
        let mut updates = self.store.watch_call(call_id);
        let waited = tokio::time::timeout(self.config.offer_wait, async {
            while let Some(session) = updates.recv().await {
                if session.is_ended() {
                    return Err(CallError::Ended(*call_id));
                }
                if session.offer.is_some() {
                    return Ok(());
                }
            }
            Err(CallError::NoOffer(*call_id))
        })
        .await;
        match waited {
            Ok(result) => result,
            Err(_) => {
                warn!(call = %call_id, "offer did not arrive in time");
                Err(CallError::NoOffer(*call_id))
            }
        }
    }

    /// Single teardown path. Runs once per call; later invocations return
    /// immediately.
    async fn finish(&self, call: &Arc<ActiveCall>, reason: EndReason) {
        if !call.lifecycle.mark_ended(reason) {
            return;
        }
        let call_id = call.id();
        let res = call.release();
        for task in &res.tasks {
            task.abort();
        }

        if let Some(peer) = &res.peer {
            call.usage.sample(peer.as_ref()).await;
            if let Err(e) = peer.close().await {
                debug!(call = %call_id, error = %e, "error closing peer connection");
            }
        }
        if let Some(media) = &res.local_media {
            media.stop_all();
        }
        for track in &res.remote_tracks {
            track.stop();
        }

        let totals = call.usage.totals();
        let now = Utc::now();
        let patch = match reason {
            EndReason::Hangup | EndReason::SleepTimer | EndReason::Unload => {
                Some(CallPatch::hangup(now).with_usage(totals.bytes_sent, totals.bytes_received))
            }
            EndReason::Rejected => Some(CallPatch::reject(now)),
            EndReason::Timeout => Some(CallPatch::auto_end(now)),
            EndReason::Remote => None,
        };

        if let Some(patch) = patch {
            let write = self.store.update_call(&call_id, &self.local, &patch);
            let result = if reason == EndReason::Unload {
                tokio::time::timeout(self.config.unload_grace, write).await.ok()
            } else {
                Some(write.await)
            };
            let result = match result {
                // Accepted between the deadline re-read and this write.
                Some(Err(e)) if e.is_answered() => {
                    debug!(call = %call_id, "answered after the deadline, hanging up");
                    let hangup =
                        CallPatch::hangup(now).with_usage(totals.bytes_sent, totals.bytes_received);
                    Some(self.store.update_call(&call_id, &self.local, &hangup).await)
                }
                other => other,
            };
            match result {
                None => warn!(call = %call_id, "final write did not complete before unload"),
                Some(Ok(_)) => debug!(call = %call_id, ?reason, "end recorded"),
                Some(Err(e)) if e.is_terminal() => {
                    debug!(call = %call_id, "call was already ended by the other side")
                }
                Some(Err(StoreError::NotFound)) => {
                    debug!(call = %call_id, "call document missing")
                }
                Some(Err(e)) => warn!(call = %call_id, error = %e, "failed to record call end"),
            }
        }

        info!(
            call = %call_id,
            ?reason,
            sent = totals.bytes_sent,
            received = totals.bytes_received,
            "call torn down"
        );
    }
}
