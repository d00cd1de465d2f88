//! Connection Session: одна попытка звонка, один транспорт, одна комната.
//!
//! Вместо глобального состояния сессия — явный объект; фоновые задачи
//! держат на неё `Weak` и после teardown ничего не делают.

use crate::config::SignalingConfig;
use crate::error::{Error, Result};
use crate::peer::media::{LocalStream, MediaTrack, RemoteStream};
use crate::peer::state::SessionState;
use crate::peer::transport::{PeerTransport, TransportEvent, TransportEvents};
use crate::peer::types::{IceCandidate, Role, SessionDescription};
use crate::store::doc_path;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// События сессии для вызывающей стороны
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    RemoteTrack(MediaTrack),
    /// Локальный кандидат ушёл в хранилище
    CandidatePublished(IceCandidate),
    /// Не фатальная ошибка доставки кандидата
    DeliveryFailed(String),
    /// Комнату удалила другая сторона
    RoomClosed,
}

/// Пути комнаты в хранилище для конкретной роли
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomPaths {
    pub room: String,
    /// Сюда пишем свои кандидаты
    pub local_candidates: String,
    /// Отсюда читаем кандидаты другой стороны
    pub remote_candidates: String,
}

impl RoomPaths {
    pub fn new(config: &SignalingConfig, room_id: &str, role: Role) -> Self {
        let room = doc_path(&config.rooms_collection, room_id);
        let candidates = |r: Role| match r {
            Role::Initiator => format!("{room}/{}", config.initiator_candidates),
            Role::Joiner => format!("{room}/{}", config.joiner_candidates),
        };
        Self {
            local_candidates: candidates(role),
            remote_candidates: candidates(role.remote()),
            room,
        }
    }

    /// Обе коллекции кандидатов комнаты
    pub fn candidate_collections(&self) -> [&str; 2] {
        [self.local_candidates.as_str(), self.remote_candidates.as_str()]
    }
}

struct SessionInner {
    state: SessionState,
    /// remote description уже принят
    remote_description_applied: bool,
}

pub struct ConnectionSession {
    role: Role,
    room_id: String,
    paths: RoomPaths,
    transport: Arc<dyn PeerTransport>,
    local_stream: LocalStream,
    remote_stream: RemoteStream,
    /// Все мутации сессии идут под этим lock
    inner: Mutex<SessionInner>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    events: broadcast::Sender<SessionEvent>,
    state_tx: watch::Sender<SessionState>,
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("role", &self.role)
            .field("room_id", &self.room_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionSession {
    /// Сессия сразу в `Negotiating`
    pub(crate) fn new(
        role: Role,
        room_id: String,
        paths: RoomPaths,
        transport: Arc<dyn PeerTransport>,
        local_stream: LocalStream,
        remote_description_applied: bool,
    ) -> Arc<Self> {
        let state = SessionState::Idle
            .begin()
            .unwrap_or(SessionState::Negotiating);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, _) = watch::channel(state);
        Arc::new(Self {
            role,
            room_id,
            paths,
            transport,
            local_stream,
            remote_stream: RemoteStream::new(),
            inner: Mutex::new(SessionInner {
                state,
                remote_description_applied,
            }),
            tasks: StdMutex::new(Vec::new()),
            events,
            state_tx,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn paths(&self) -> &RoomPaths {
        &self.paths
    }

    pub fn local_stream(&self) -> &LocalStream {
        &self.local_stream
    }

    pub fn remote_tracks(&self) -> Vec<MediaTrack> {
        self.remote_stream.tracks()
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn remote_description_applied(&self) -> bool {
        self.inner.lock().await.remote_description_applied
    }

    /// Ждём состояния; `Closed` прерывает ожидание
    pub async fn wait_for_state(&self, target: SessionState, within: Duration) -> Result<()> {
        let mut rx = self.watch_state();
        let waited = tokio::time::timeout(within, async {
            loop {
                let current = *rx.borrow_and_update();
                if current == target {
                    return Ok(());
                }
                if current.is_closed() {
                    return Err(Error::InvalidState(format!(
                        "session closed while waiting for {target:?}"
                    )));
                }
                if rx.changed().await.is_err() {
                    return Err(Error::InvalidState("session dropped".into()));
                }
            }
        })
        .await;
        waited.unwrap_or_else(|_| {
            Err(Error::InvalidState(format!(
                "timed out waiting for {target:?}, state is {:?}",
                self.state()
            )))
        })
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.events.clone()
    }

    pub(crate) fn track_task(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    fn set_state(&self, inner: &mut SessionInner, next: SessionState) {
        info!(
            "session {} ({:?}): {:?} -> {:?}",
            self.room_id, self.role, inner.state, next
        );
        inner.state = next;
        self.state_tx.send_replace(next);
        self.emit(SessionEvent::StateChanged(next));
    }

    /// Единственный путь применения удалённых кандидатов
    pub(crate) async fn apply_remote_candidate(&self, candidate: IceCandidate) {
        let inner = self.inner.lock().await;
        if inner.state.is_closed() {
            debug!("session closed, dropping remote candidate");
            return;
        }
        debug!("Got new remote ICE candidate: {}", candidate.candidate);
        if let Err(e) = self.transport.add_remote_candidate(candidate).await {
            warn!("Failed to add remote candidate: {}", e);
            self.emit(SessionEvent::DeliveryFailed(e.to_string()));
        }
    }

    /// Применяет answer ровно один раз
    pub(crate) async fn apply_remote_answer(&self, answer: SessionDescription) {
        let mut inner = self.inner.lock().await;
        if inner.state.is_closed() || inner.remote_description_applied {
            return;
        }
        info!("Got remote description for room {}", self.room_id);
        match self.transport.set_remote_description(answer).await {
            Ok(()) => inner.remote_description_applied = true,
            Err(e) => warn!("Failed to set remote description: {}", e),
        }
    }

    pub(crate) async fn on_transport_event(
        &self,
        event: TransportEvent,
        candidates: &mpsc::UnboundedSender<Option<IceCandidate>>,
    ) {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                let _ = candidates.send(candidate);
            }
            TransportEvent::RemoteTrack(track) => {
                let inner = self.inner.lock().await;
                if inner.state.is_closed() {
                    track.stop();
                    return;
                }
                info!("Add a track to the remote stream: {}", track.id());
                self.remote_stream.add_track(track.clone());
                self.emit(SessionEvent::RemoteTrack(track));
            }
            TransportEvent::Connectivity(signal) => {
                let mut inner = self.inner.lock().await;
                if let Some(next) = inner.state.on_connectivity(signal) {
                    self.set_state(&mut inner, next);
                }
            }
        }
    }

    /// Локальная часть teardown: отмена подписок, остановка треков, закрытие транспорта.
    /// Возвращает `false`, если сессия уже закрыта.
    pub(crate) async fn shutdown(&self) -> bool {
        {
            let mut inner = self.inner.lock().await;
            let Some(next) = inner.state.close() else {
                return false;
            };
            self.set_state(&mut inner, next);
        }

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in &tasks {
            task.abort();
        }
        // подписки должны быть сброшены до возврата из teardown
        for task in tasks {
            let _ = task.await;
        }

        self.local_stream.stop();
        self.remote_stream.stop_all();

        if let Err(e) = self.transport.close().await {
            warn!("Failed to close transport: {}", e);
        }
        true
    }
}

/// Разбирает события транспорта, пока сессия жива
pub(crate) fn spawn_event_pump(
    session: &Arc<ConnectionSession>,
    mut events: TransportEvents,
    candidates: mpsc::UnboundedSender<Option<IceCandidate>>,
) -> JoinHandle<()> {
    let weak: Weak<ConnectionSession> = Arc::downgrade(session);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(session) = weak.upgrade() else {
                break;
            };
            session.on_transport_event(event, &candidates).await;
        }
        debug!("transport event stream ended");
    })
}
