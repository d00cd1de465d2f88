//! Тестовый стенд: loopback-транспорт без сети и обёртки над хранилищем.
//!
//! Фейковый транспорт пишет id владельца и свои треки прямо в SDP
//! (`o=fake {id}`, `a=track:{kind}:{id}:{stream}`), а своих кандидатов
//! помечает ufrag = id. "Соединение" наступает, когда есть обе стороны
//! описания и применён хотя бы один кандидат владельца удалённого SDP.

#![allow(dead_code)]

use async_trait::async_trait;
use room_call::error::{Error, Result};
use room_call::peer::{
    ConnectivityState, IceCandidate, MediaTrack, PeerTransport, SdpKind, SessionDescription,
    TrackKind, TransportEvent, TransportEvents, TransportFactory,
};
use room_call::store::{StoreError, StoreResult, Subscription};
use room_call::{MemoryStore, SignalingStore};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,room_call=debug")
        .with_test_writer()
        .try_init();
}

/// Ждёт, пока условие станет истинным
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[derive(Default)]
struct FakeState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    local_tracks: Vec<MediaTrack>,
    pending: Vec<IceCandidate>,
    applied: Vec<IceCandidate>,
    remote_description_sets: usize,
    connected: bool,
    closed: bool,
}

pub struct FakeTransport {
    id: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: Mutex<FakeState>,
    fail_offer: bool,
}

impl FakeTransport {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state().local.clone()
    }

    pub fn remote_description_sets(&self) -> usize {
        self.state().remote_description_sets
    }

    pub fn pending_candidates(&self) -> Vec<IceCandidate> {
        self.state().pending.clone()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.state().applied.clone()
    }

    /// Имитация сигнала движка о потере связи
    pub fn report(&self, state: ConnectivityState) {
        let _ = self.events.send(TransportEvent::Connectivity(state));
    }

    fn sdp(&self, kind: SdpKind, tracks: &[MediaTrack]) -> SessionDescription {
        let mut sdp = format!("v=0\r\no=fake {}\r\n", self.id);
        for track in tracks {
            let kind = match track.kind() {
                TrackKind::Audio => "audio",
                TrackKind::Video => "video",
            };
            sdp.push_str(&format!(
                "a=track:{}:{}:{}\r\n",
                kind,
                track.id(),
                track.stream_id()
            ));
        }
        SessionDescription { kind, sdp }
    }

    fn candidate(&self, n: usize) -> IceCandidate {
        IceCandidate {
            candidate: format!(
                "candidate:{n} 1 udp 2130706431 127.0.0.1 {} typ host",
                50000 + n
            ),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some(self.id.clone()),
        }
    }

    /// Проверяет условие "соединения" и шлёт события
    fn check_connected(&self, state: &mut FakeState) {
        if state.connected || state.closed || state.local.is_none() {
            return;
        }
        let Some(remote_sdp) = state.remote.as_ref().map(|r| r.sdp.clone()) else {
            return;
        };
        let owner = remote_owner(&remote_sdp);
        if !state
            .applied
            .iter()
            .any(|c| c.username_fragment.as_deref() == owner)
        {
            return;
        }
        state.connected = true;
        let _ = self
            .events
            .send(TransportEvent::Connectivity(ConnectivityState::Connected));
        for track in remote_tracks(&remote_sdp) {
            let _ = self.events.send(TransportEvent::RemoteTrack(track));
        }
    }
}

fn remote_owner(sdp: &str) -> Option<&str> {
    sdp.lines().find_map(|l| l.strip_prefix("o=fake "))
}

fn remote_tracks(sdp: &str) -> Vec<MediaTrack> {
    sdp.lines()
        .filter_map(|l| l.strip_prefix("a=track:"))
        .filter_map(|rest| {
            let mut parts = rest.splitn(3, ':');
            let kind = match parts.next()? {
                "audio" => TrackKind::Audio,
                _ => TrackKind::Video,
            };
            Some(MediaTrack::new(parts.next()?, kind, parts.next()?))
        })
        .collect()
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn create_local_description(&self, kind: SdpKind) -> Result<SessionDescription> {
        let state = self.state();
        if state.closed {
            return Err(Error::Transport("closed".into()));
        }
        if kind == SdpKind::Offer && self.fail_offer {
            return Err(Error::Transport("offer generation failed".into()));
        }
        if kind == SdpKind::Answer && state.remote.is_none() {
            return Err(Error::Transport("answer without remote offer".into()));
        }
        Ok(self.sdp(kind, &state.local_tracks))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        {
            let mut state = self.state();
            if state.closed {
                return Err(Error::Transport("closed".into()));
            }
            state.local = Some(desc);
        }
        let _ = self
            .events
            .send(TransportEvent::Connectivity(ConnectivityState::Connecting));
        for n in 1..=3 {
            let _ = self
                .events
                .send(TransportEvent::LocalCandidate(Some(self.candidate(n))));
        }
        let _ = self.events.send(TransportEvent::LocalCandidate(None));
        let mut state = self.state();
        self.check_connected(&mut state);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let mut state = self.state();
        if state.closed {
            return Err(Error::Transport("closed".into()));
        }
        if state.remote.is_some() {
            return Err(Error::Transport("remote description already set".into()));
        }
        state.remote = Some(desc);
        state.remote_description_sets += 1;
        let pending: Vec<_> = state.pending.drain(..).collect();
        state.applied.extend(pending);
        self.check_connected(&mut state);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = self.state();
        if state.closed {
            return Err(Error::CandidateDeliveryFailure("closed".into()));
        }
        if state.remote.is_none() {
            state.pending.push(candidate);
            return Ok(());
        }
        state.applied.push(candidate);
        self.check_connected(&mut state);
        Ok(())
    }

    async fn add_local_track(&self, track: &MediaTrack) -> Result<()> {
        self.state().local_tracks.push(track.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state();
        if !state.closed {
            state.closed = true;
            let _ = self
                .events
                .send(TransportEvent::Connectivity(ConnectivityState::Closed));
        }
        Ok(())
    }
}

/// Фабрика фейковых транспортов; помнит всё созданное
#[derive(Default)]
pub struct LoopbackFactory {
    created: Mutex<Vec<Arc<FakeTransport>>>,
    counter: AtomicUsize,
    fail_offer: AtomicBool,
}

impl LoopbackFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_offers(&self, fail: bool) {
        self.fail_offer.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<Arc<FakeTransport>> {
        self.created.lock().unwrap().clone()
    }

    /// Транспорт, которому принадлежит SDP
    pub fn owner_of(&self, desc: &SessionDescription) -> Option<Arc<FakeTransport>> {
        let owner = remote_owner(&desc.sdp)?;
        self.created().into_iter().find(|t| t.id() == owner)
    }
}

#[async_trait]
impl TransportFactory for LoopbackFactory {
    async fn create(&self) -> Result<(Arc<dyn PeerTransport>, TransportEvents)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let transport = Arc::new(FakeTransport {
            id: format!("peer{n}"),
            events: tx,
            state: Mutex::new(FakeState::default()),
            fail_offer: self.fail_offer.load(Ordering::SeqCst),
        });
        self.created.lock().unwrap().push(Arc::clone(&transport));
        Ok((transport, rx))
    }
}

/// Хранилище, в котором не проходят записи кандидатов
pub struct FailingAppends {
    pub inner: MemoryStore,
    pub attempts: AtomicUsize,
}

impl FailingAppends {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SignalingStore for FailingAppends {
    async fn create_document(&self, collection: &str, data: Value) -> StoreResult<String> {
        self.inner.create_document(collection, data).await
    }

    async fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        self.inner.get_document(collection, id).await
    }

    async fn set_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> StoreResult<()> {
        self.inner.set_field(collection, id, field, value).await
    }

    async fn append_to_subcollection(&self, path: &str, _record: Value) -> StoreResult<String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable(format!("append to {path} dropped")))
    }

    async fn list_subcollection(&self, path: &str) -> StoreResult<Vec<String>> {
        self.inner.list_subcollection(path).await
    }

    async fn subscribe(&self, path: &str) -> StoreResult<Subscription> {
        self.inner.subscribe(path).await
    }

    async fn delete_document(&self, path: &str) -> StoreResult<()> {
        self.inner.delete_document(path).await
    }
}

/// Хранилище, в котором не удаляются кандидаты; документ комнаты удаляется
pub struct FailingCandidateDeletes {
    pub inner: MemoryStore,
    pub failed_deletes: AtomicUsize,
}

impl FailingCandidateDeletes {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            failed_deletes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SignalingStore for FailingCandidateDeletes {
    async fn create_document(&self, collection: &str, data: Value) -> StoreResult<String> {
        self.inner.create_document(collection, data).await
    }

    async fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        self.inner.get_document(collection, id).await
    }

    async fn set_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> StoreResult<()> {
        self.inner.set_field(collection, id, field, value).await
    }

    async fn append_to_subcollection(&self, path: &str, record: Value) -> StoreResult<String> {
        self.inner.append_to_subcollection(path, record).await
    }

    async fn list_subcollection(&self, path: &str) -> StoreResult<Vec<String>> {
        self.inner.list_subcollection(path).await
    }

    async fn subscribe(&self, path: &str) -> StoreResult<Subscription> {
        self.inner.subscribe(path).await
    }

    async fn delete_document(&self, path: &str) -> StoreResult<()> {
        if path.contains("Candidates/") {
            self.failed_deletes.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Unavailable(format!("delete of {path} dropped")));
        }
        self.inner.delete_document(path).await
    }
}

/// Хранилище с задержкой доставки подписок: события приходят пачками и с опозданием
/// относительно записи, но в порядке добавления
pub struct DelayedDelivery {
    pub inner: MemoryStore,
    delays_ms: Vec<u64>,
}

impl DelayedDelivery {
    pub fn new(delays_ms: Vec<u64>) -> Self {
        Self {
            inner: MemoryStore::new(),
            delays_ms,
        }
    }
}

#[async_trait]
impl SignalingStore for DelayedDelivery {
    async fn create_document(&self, collection: &str, data: Value) -> StoreResult<String> {
        self.inner.create_document(collection, data).await
    }

    async fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        self.inner.get_document(collection, id).await
    }

    async fn set_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> StoreResult<()> {
        self.inner.set_field(collection, id, field, value).await
    }

    async fn append_to_subcollection(&self, path: &str, record: Value) -> StoreResult<String> {
        self.inner.append_to_subcollection(path, record).await
    }

    async fn list_subcollection(&self, path: &str) -> StoreResult<Vec<String>> {
        self.inner.list_subcollection(path).await
    }

    async fn subscribe(&self, path: &str) -> StoreResult<Subscription> {
        let mut upstream = self.inner.subscribe(path).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let delays = self.delays_ms.clone();
        tokio::spawn(async move {
            let mut n = 0;
            loop {
                let event = tokio::select! {
                    event = upstream.next() => event,
                    _ = tx.closed() => None,
                };
                let Some(event) = event else {
                    break;
                };
                if !delays.is_empty() {
                    let delay = delays[n % delays.len()];
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                n += 1;
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        Ok(Subscription::new(path, rx))
    }

    async fn delete_document(&self, path: &str) -> StoreResult<()> {
        self.inner.delete_document(path).await
    }
}
