//! Локальные и удалённые медиа-треки.
//!
//! Захват устройств и кодирование живут вне координатора; здесь только
//! описания треков и их остановка.

use crate::error::{Error, Result};
use crate::utils::random_id;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Дескриптор трека. Клоны разделяют флаг остановки.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    stream_id: String,
    stopped: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, stream_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            stream_id: stream_id.into(),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!("track {} ({:?}) stopped", self.id, self.kind);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Результат захвата камеры/микрофона
#[derive(Debug, Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn stop(&self) {
        self.tracks.iter().for_each(MediaTrack::stop);
    }
}

/// Собирает входящие треки удалённой стороны
#[derive(Debug, Default)]
pub struct RemoteStream {
    tracks: Mutex<Vec<MediaTrack>>,
}

impl RemoteStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_track(&self, track: MediaTrack) {
        let mut tracks = self.tracks.lock().unwrap_or_else(|e| e.into_inner());
        if tracks.iter().all(|t| t.id() != track.id()) {
            tracks.push(track);
        }
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.tracks.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn stop_all(&self) {
        for track in self.tracks.lock().unwrap_or_else(|e| e.into_inner()).iter() {
            track.stop();
        }
    }
}

/// Захват локального медиа ("start camera")
#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn acquire(&self, video: bool, audio: bool) -> Result<LocalStream>;
}

/// Захват без устройств: треки только описаны, кадры не пишутся
#[derive(Debug, Default, Clone)]
pub struct SyntheticCapture;

#[async_trait]
impl MediaCapture for SyntheticCapture {
    async fn acquire(&self, video: bool, audio: bool) -> Result<LocalStream> {
        if !video && !audio {
            return Err(Error::DeviceUnavailable(
                "neither video nor audio requested".into(),
            ));
        }
        let stream_id = format!("stream-{}", random_id());
        let mut tracks = Vec::new();
        if video {
            tracks.push(MediaTrack::new(
                format!("video-{}", random_id()),
                TrackKind::Video,
                stream_id.clone(),
            ));
        }
        if audio {
            tracks.push(MediaTrack::new(
                format!("audio-{}", random_id()),
                TrackKind::Audio,
                stream_id.clone(),
            ));
        }
        Ok(LocalStream::new(stream_id, tracks))
    }
}
