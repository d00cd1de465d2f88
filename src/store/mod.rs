//! Общее хранилище сигнализации: документы, подколлекции и подписки на изменения.
//!
//! Пути разделяются `/`: нечётное число сегментов — коллекция (`rooms`,
//! `rooms/{id}/callerCandidates`), чётное — документ (`rooms/{id}`).

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Ошибки хранилища
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    /// Поле write-once уже записано
    #[error("field `{field}` already set on {path}")]
    FieldAlreadySet { path: String, field: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Тип изменения в ленте подписки
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// Одно изменение документа или коллекции
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// id документа, к которому относится изменение
    pub id: String,
    pub data: Value,
}

/// Активная подписка. Отменяется через `cancel()` или при drop.
#[derive(Debug)]
pub struct Subscription {
    path: String,
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Subscription {
    pub fn new(path: impl Into<String>, rx: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Self {
            path: path.into(),
            rx,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Следующее изменение; `None` после отмены или удаления источника
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    pub fn cancel(mut self) {
        self.rx.close();
    }
}

/// Синхронизируемое key-value хранилище с подписками
#[async_trait]
pub trait SignalingStore: Send + Sync {
    /// Создаёт документ с новым id в коллекции
    async fn create_document(&self, collection: &str, data: Value) -> StoreResult<String>;

    async fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Value>>;

    /// Записывает поле, только если оно ещё не задано
    async fn set_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> StoreResult<()>;

    async fn append_to_subcollection(&self, path: &str, record: Value) -> StoreResult<String>;

    /// id записей коллекции в порядке добавления
    async fn list_subcollection(&self, path: &str) -> StoreResult<Vec<String>>;

    /// Подписка на документ или коллекцию. Существующее состояние приходит первым как `Added`.
    async fn subscribe(&self, path: &str) -> StoreResult<Subscription>;

    /// Удаление отсутствующего документа не считается ошибкой
    async fn delete_document(&self, path: &str) -> StoreResult<()>;
}

pub fn doc_path(collection: &str, id: &str) -> String {
    format!("{collection}/{id}")
}

pub(crate) fn is_collection_path(path: &str) -> bool {
    !path.is_empty() && path.split('/').count() % 2 == 1
}

/// Делит путь документа на (коллекция, id)
pub(crate) fn split_doc_path(path: &str) -> StoreResult<(&str, &str)> {
    match path.rsplit_once('/') {
        Some((parent, id)) if !id.is_empty() && is_collection_path(parent) => Ok((parent, id)),
        _ => Err(StoreError::InvalidPath(path.to_string())),
    }
}
