//! Граница с движком реального времени

use crate::error::Result;
use crate::peer::media::MediaTrack;
use crate::peer::state::ConnectivityState;
use crate::peer::types::{IceCandidate, SdpKind, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// События транспорта
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// `None` — сбор кандидатов завершён
    LocalCandidate(Option<IceCandidate>),
    RemoteTrack(MediaTrack),
    Connectivity(ConnectivityState),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Одно peer-соединение
///
/// Кандидаты, пришедшие до remote description, транспорт обязан
/// придержать и применить после неё.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_local_description(&self, kind: SdpKind) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn add_local_track(&self, track: &MediaTrack) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Создаёт транспорт вместе с потоком его событий
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self) -> Result<(Arc<dyn PeerTransport>, TransportEvents)>;
}
