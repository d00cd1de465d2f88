//! Room Lifecycle Manager: создание комнаты, присоединение и teardown.

use crate::config::SignalingConfig;
use crate::error::{Error, Result};
use crate::peer::description::{read_offer, spawn_answer_listener};
use crate::peer::ice::{spawn_candidate_writer, spawn_remote_listener};
use crate::peer::media::LocalStream;
use crate::peer::transport::{PeerTransport, TransportEvents, TransportFactory};
use crate::peer::types::{Role, Room, SdpKind, SessionDescription};
use crate::session::{spawn_event_pump, ConnectionSession, RoomPaths};
use crate::store::{doc_path, SignalingStore, StoreError, Subscription};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RoomManager {
    store: Arc<dyn SignalingStore>,
    transports: Arc<dyn TransportFactory>,
    config: SignalingConfig,
}

impl RoomManager {
    pub fn new(
        store: Arc<dyn SignalingStore>,
        transports: Arc<dyn TransportFactory>,
        config: SignalingConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            transports,
            config,
        })
    }

    pub fn config(&self) -> &SignalingConfig {
        &self.config
    }

    /// A-сторона: создаём комнату с offer
    pub async fn create_session(&self, local: &LocalStream) -> Result<Arc<ConnectionSession>> {
        let (transport, events) = self.transports.create().await?;
        if let Err(e) = attach_tracks(transport.as_ref(), local).await {
            return Err(abort(transport.as_ref(), e).await);
        }

        let offer = match negotiate_local(transport.as_ref(), SdpKind::Offer).await {
            Ok(offer) => offer,
            Err(e) => return Err(abort(transport.as_ref(), e).await),
        };

        // Комната появляется в хранилище сразу с offer
        let room = Room {
            offer: Some(offer),
            answer: None,
            created_at: Some(chrono::Utc::now().timestamp()),
        };
        let data = match serde_json::to_value(&room) {
            Ok(data) => data,
            Err(e) => return Err(abort(transport.as_ref(), e.into()).await),
        };
        let room_id = match self
            .store
            .create_document(&self.config.rooms_collection, data)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                let err = match e {
                    StoreError::Unavailable(reason) => Error::StoreUnavailable(reason),
                    other => Error::DescriptionExchangeFailure(format!("offer write: {other}")),
                };
                return Err(abort(transport.as_ref(), err).await);
            }
        };
        info!("New room created with SDP offer. Room ID: {}", room_id);

        let paths = RoomPaths::new(&self.config, &room_id, Role::Initiator);
        let subscriptions = match self.subscribe_pair(&paths).await {
            Ok(subs) => subs,
            Err(e) => {
                // комната ещё никому не отдана: откатываем её
                if let Err(del) = self.store.delete_document(&paths.room).await {
                    warn!("Failed to roll back room {}: {}", room_id, del);
                }
                return Err(abort(transport.as_ref(), e).await);
            }
        };

        let session = ConnectionSession::new(
            Role::Initiator,
            room_id,
            paths,
            transport,
            local.clone(),
            false,
        );
        self.start(&session, events, subscriptions);
        Ok(session)
    }

    /// B-сторона: читаем offer, пишем answer
    pub async fn join_session(
        &self,
        room_id: &str,
        local: &LocalStream,
    ) -> Result<Arc<ConnectionSession>> {
        info!("Join room: {}", room_id);
        let (room, offer) =
            read_offer(self.store.as_ref(), &self.config.rooms_collection, room_id).await?;
        if room.answer.is_some() {
            return Err(Error::AnswerConflict(room_id.to_string()));
        }

        let paths = RoomPaths::new(&self.config, room_id, Role::Joiner);
        let (transport, events) = self.transports.create().await?;
        if let Err(e) = attach_tracks(transport.as_ref(), local).await {
            return Err(abort(transport.as_ref(), e).await);
        }

        if let Err(e) = transport.set_remote_description(offer).await {
            let err = Error::DescriptionExchangeFailure(format!("remote offer: {e}"));
            return Err(abort(transport.as_ref(), err).await);
        }
        let answer = match negotiate_local(transport.as_ref(), SdpKind::Answer).await {
            Ok(answer) => answer,
            Err(e) => return Err(abort(transport.as_ref(), e).await),
        };

        // подписываемся до записи answer, чтобы не держать полуоткрытую сессию
        let subscriptions = match self.subscribe_pair(&paths).await {
            Ok(subs) => subs,
            Err(e) => return Err(abort(transport.as_ref(), e).await),
        };

        let value = match serde_json::to_value(&answer) {
            Ok(value) => value,
            Err(e) => return Err(abort(transport.as_ref(), e.into()).await),
        };
        if let Err(e) = self
            .store
            .set_field(&self.config.rooms_collection, room_id, "answer", value)
            .await
        {
            let err = Error::from_description_write(e, room_id, "answer");
            return Err(abort(transport.as_ref(), err).await);
        }
        info!("Answer written to room {}", room_id);

        let session = ConnectionSession::new(
            Role::Joiner,
            room_id.to_string(),
            paths,
            transport,
            local.clone(),
            true,
        );
        self.start(&session, events, subscriptions);
        Ok(session)
    }

    /// Завершение звонка. Повторный вызов ничего не делает.
    ///
    /// Ошибки удаления только логируются: каждое удаление пробуется независимо.
    pub async fn teardown(&self, session: &ConnectionSession) {
        if !session.shutdown().await {
            debug!("session {} already torn down", session.room_id());
            return;
        }

        for collection in session.paths().candidate_collections() {
            let ids = match self.store.list_subcollection(collection).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!("Failed to list {}: {}", collection, e);
                    continue;
                }
            };
            for id in ids {
                if let Err(e) = self.store.delete_document(&doc_path(collection, &id)).await {
                    warn!("Failed to delete candidate {}/{}: {}", collection, id, e);
                }
            }
        }

        if let Err(e) = self.store.delete_document(&session.paths().room).await {
            warn!("Failed to delete room {}: {}", session.room_id(), e);
        }
        info!("Room {} torn down", session.room_id());
    }

    /// Подписки на документ комнаты и на кандидаты другой стороны
    async fn subscribe_pair(&self, paths: &RoomPaths) -> Result<(Subscription, Subscription)> {
        let to_error = |e: StoreError| match e {
            StoreError::Unavailable(reason) => Error::StoreUnavailable(reason),
            other => Error::DescriptionExchangeFailure(format!("subscribe: {other}")),
        };
        let room = self.store.subscribe(&paths.room).await.map_err(to_error)?;
        let candidates = self
            .store
            .subscribe(&paths.remote_candidates)
            .await
            .map_err(to_error)?;
        Ok((room, candidates))
    }

    fn start(
        &self,
        session: &Arc<ConnectionSession>,
        events: TransportEvents,
        (room_sub, candidate_sub): (Subscription, Subscription),
    ) {
        let (candidates_tx, writer) = spawn_candidate_writer(
            Arc::clone(&self.store),
            session.paths().local_candidates.clone(),
            session.event_sender(),
        );
        session.track_task(writer);
        session.track_task(spawn_event_pump(session, events, candidates_tx));
        session.track_task(spawn_remote_listener(
            candidate_sub,
            Arc::downgrade(session),
        ));
        session.track_task(spawn_answer_listener(room_sub, Arc::downgrade(session)));
    }
}

async fn attach_tracks(transport: &dyn PeerTransport, local: &LocalStream) -> Result<()> {
    for track in local.tracks() {
        debug!("Adding local {:?} track {}", track.kind(), track.id());
        transport.add_local_track(track).await?;
    }
    Ok(())
}

/// createOffer/createAnswer + setLocalDescription
async fn negotiate_local(
    transport: &dyn PeerTransport,
    kind: SdpKind,
) -> Result<SessionDescription> {
    let desc = transport
        .create_local_description(kind)
        .await
        .map_err(|e| Error::DescriptionExchangeFailure(format!("create {kind:?}: {e}")))?;
    transport
        .set_local_description(desc.clone())
        .await
        .map_err(|e| Error::DescriptionExchangeFailure(format!("set local {kind:?}: {e}")))?;
    Ok(desc)
}

/// Закрывает транспорт неудавшейся попытки и возвращает исходную ошибку
async fn abort(transport: &dyn PeerTransport, err: Error) -> Error {
    warn!("Session setup failed: {}", err);
    if let Err(e) = transport.close().await {
        warn!("Failed to close transport after setup failure: {}", e);
    }
    err
}
