//! Обмен offer/answer через документ комнаты

use crate::error::{Error, Result};
use crate::peer::types::{Room, SdpKind, SessionDescription};
use crate::session::{ConnectionSession, SessionEvent};
use crate::store::{ChangeKind, SignalingStore, StoreError, Subscription};
use std::sync::Weak;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Точечное чтение offer (сторона Joiner).
///
/// Комната без offer для присоединения не существует.
pub(crate) async fn read_offer(
    store: &dyn SignalingStore,
    collection: &str,
    room_id: &str,
) -> Result<(Room, SessionDescription)> {
    let doc = match store.get_document(collection, room_id).await {
        Ok(Some(doc)) => doc,
        Ok(None) => return Err(Error::RoomNotFound(room_id.to_string())),
        Err(StoreError::Unavailable(reason)) => return Err(Error::StoreUnavailable(reason)),
        Err(e) => return Err(Error::DescriptionExchangeFailure(e.to_string())),
    };
    let room: Room = serde_json::from_value(doc).map_err(|e| {
        Error::DescriptionExchangeFailure(format!("room {room_id} is malformed: {e}"))
    })?;
    debug!("Got room: {} (answer set: {})", room_id, room.answer.is_some());

    match &room.offer {
        Some(offer) if offer.kind == SdpKind::Offer => {
            let offer = offer.clone();
            Ok((room, offer))
        }
        _ => Err(Error::RoomNotFound(room_id.to_string())),
    }
}

/// Сторона Initiator: ждёт answer в документе комнаты и применяет его один раз
pub(crate) fn spawn_answer_listener(
    mut subscription: Subscription,
    session: Weak<ConnectionSession>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(change) = subscription.next().await {
            let Some(session) = session.upgrade() else {
                break;
            };
            match change.kind {
                ChangeKind::Removed => {
                    info!("Room {} was deleted by the remote side", session.room_id());
                    session.emit(SessionEvent::RoomClosed);
                    break;
                }
                ChangeKind::Added | ChangeKind::Modified => {
                    let room: Room = match serde_json::from_value(change.data) {
                        Ok(room) => room,
                        Err(e) => {
                            warn!("Ignoring malformed room snapshot: {}", e);
                            continue;
                        }
                    };
                    match room.answer {
                        Some(answer) if answer.kind == SdpKind::Answer => {
                            session.apply_remote_answer(answer).await;
                        }
                        Some(other) => warn!("Ignoring {:?} stored in the answer slot", other.kind),
                        None => {}
                    }
                }
            }
        }
        debug!("room subscription {} ended", subscription.path());
    })
}
