//! Ошибки сигнального координатора

use crate::store::StoreError;

/// Result с ошибкой координатора
pub type Result<T> = std::result::Result<T, Error>;

/// Ошибки, которые видит вызывающая сторона
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Не удалось получить камеру/микрофон
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Комнаты с таким id нет (или в ней нет offer)
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// В комнату уже кто-то ответил
    #[error("Answer already set for room {0}")]
    AnswerConflict(String),

    /// Не удалось сгенерировать или записать offer/answer
    #[error("Description exchange failed: {0}")]
    DescriptionExchangeFailure(String),

    /// Кандидат не доставлен (не фатально)
    #[error("Candidate delivery failed: {0}")]
    CandidateDeliveryFailure(String),

    /// Хранилище недоступно
    #[error("Signaling store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Ошибка нижележащего WebRTC движка
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Фатальна ли ошибка для текущего create/join
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::CandidateDeliveryFailure(_))
    }

    /// Ошибка записи описания сессии (offer/answer) в хранилище
    pub(crate) fn from_description_write(err: StoreError, room_id: &str, field: &str) -> Self {
        match err {
            StoreError::FieldAlreadySet { .. } if field == "answer" => {
                Error::AnswerConflict(room_id.to_string())
            }
            StoreError::NotFound(path) => Error::RoomNotFound(path),
            StoreError::Unavailable(reason) => Error::StoreUnavailable(reason),
            other => Error::DescriptionExchangeFailure(format!("{field} write: {other}")),
        }
    }
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Error::Transport(err.to_string())
    }
}
