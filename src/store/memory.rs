use super::{
    doc_path, is_collection_path, split_doc_path, ChangeEvent, ChangeKind, SignalingStore,
    StoreError, StoreResult, Subscription,
};
use crate::utils::random_id;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

#[derive(Default)]
struct Inner {
    /// путь документа -> данные
    docs: HashMap<String, Value>,
    /// путь коллекции -> id документов в порядке добавления
    collections: HashMap<String, Vec<String>>,
    /// путь -> подписчики
    watchers: HashMap<String, Vec<mpsc::UnboundedSender<ChangeEvent>>>,
    offline: bool,
}

impl Inner {
    fn check_online(&self) -> StoreResult<()> {
        if self.offline {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }

    fn notify(&mut self, path: &str, event: ChangeEvent) {
        if let Some(senders) = self.watchers.get_mut(path) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
            if senders.is_empty() {
                self.watchers.remove(path);
            }
        }
    }

    /// Убирает отменённые подписки и пустые ключи
    fn prune_watchers(&mut self) {
        self.watchers.retain(|_, senders| {
            senders.retain(|tx| !tx.is_closed());
            !senders.is_empty()
        });
    }

    fn insert(&mut self, collection: &str, id: String, data: Value) {
        let path = doc_path(collection, &id);
        self.docs.insert(path, data.clone());
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(id.clone());
        self.notify(
            collection,
            ChangeEvent {
                kind: ChangeKind::Added,
                id,
                data,
            },
        );
    }
}

/// Хранилище в памяти процесса. Все изменения идут под одним lock,
/// поэтому порядок в ленте подписки совпадает с порядком записи.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Имитация недоступности хранилища
    pub fn set_online(&self, online: bool) {
        self.lock().offline = !online;
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().docs.contains_key(path)
    }

    /// Количество живых подписок на путь
    pub fn watcher_count(&self, path: &str) -> usize {
        let mut inner = self.lock();
        inner.prune_watchers();
        inner.watchers.get(path).map_or(0, Vec::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // отравленный lock не ломает данные: каждая операция атомарна
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn create_document(&self, collection: &str, data: Value) -> StoreResult<String> {
        if !is_collection_path(collection) {
            return Err(StoreError::InvalidPath(collection.to_string()));
        }
        let mut inner = self.lock();
        inner.check_online()?;
        let id = random_id();
        inner.insert(collection, id.clone(), data);
        debug!("created document {}/{}", collection, id);
        Ok(id)
    }

    async fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        let inner = self.lock();
        inner.check_online()?;
        Ok(inner.docs.get(&doc_path(collection, id)).cloned())
    }

    async fn set_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> StoreResult<()> {
        let path = doc_path(collection, id);
        let mut inner = self.lock();
        inner.check_online()?;

        let doc = inner
            .docs
            .get_mut(&path)
            .ok_or_else(|| StoreError::NotFound(path.clone()))?;
        if !doc.is_object() {
            *doc = Value::Object(Map::new());
        }
        let Some(fields) = doc.as_object_mut() else {
            return Err(StoreError::InvalidPath(path));
        };
        if fields.get(field).is_some_and(|v| !v.is_null()) {
            return Err(StoreError::FieldAlreadySet {
                path,
                field: field.to_string(),
            });
        }
        fields.insert(field.to_string(), value);
        let data = doc.clone();

        inner.notify(
            &path,
            ChangeEvent {
                kind: ChangeKind::Modified,
                id: id.to_string(),
                data,
            },
        );
        Ok(())
    }

    async fn append_to_subcollection(&self, path: &str, record: Value) -> StoreResult<String> {
        if !is_collection_path(path) {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        let mut inner = self.lock();
        inner.check_online()?;
        let id = random_id();
        inner.insert(path, id.clone(), record);
        trace!("appended {} to {}", id, path);
        Ok(id)
    }

    async fn list_subcollection(&self, path: &str) -> StoreResult<Vec<String>> {
        let inner = self.lock();
        inner.check_online()?;
        Ok(inner.collections.get(path).cloned().unwrap_or_default())
    }

    async fn subscribe(&self, path: &str) -> StoreResult<Subscription> {
        let mut inner = self.lock();
        inner.check_online()?;
        let (tx, rx) = mpsc::unbounded_channel();

        // текущее состояние отдаём до регистрации, под тем же lock
        if is_collection_path(path) {
            let ids = inner.collections.get(path).cloned().unwrap_or_default();
            for id in ids {
                if let Some(data) = inner.docs.get(&doc_path(path, &id)) {
                    let _ = tx.send(ChangeEvent {
                        kind: ChangeKind::Added,
                        id,
                        data: data.clone(),
                    });
                }
            }
        } else {
            let (_, id) = split_doc_path(path)?;
            if let Some(data) = inner.docs.get(path) {
                let _ = tx.send(ChangeEvent {
                    kind: ChangeKind::Added,
                    id: id.to_string(),
                    data: data.clone(),
                });
            }
        }

        inner
            .watchers
            .entry(path.to_string())
            .or_default()
            .push(tx);
        debug!("subscribed to {}", path);
        Ok(Subscription::new(path, rx))
    }

    async fn delete_document(&self, path: &str) -> StoreResult<()> {
        let (collection, id) = split_doc_path(path)?;
        let mut inner = self.lock();
        inner.check_online()?;

        let Some(data) = inner.docs.remove(path) else {
            return Ok(());
        };
        if let Some(ids) = inner.collections.get_mut(collection) {
            ids.retain(|existing| existing != id);
            if ids.is_empty() {
                inner.collections.remove(collection);
            }
        }
        let event = ChangeEvent {
            kind: ChangeKind::Removed,
            id: id.to_string(),
            data,
        };
        inner.notify(collection, event.clone());
        inner.notify(path, event);
        // подписчики удалённого документа больше ничего не получат
        inner.watchers.remove(path);
        inner.prune_watchers();
        debug!("deleted document {}", path);
        Ok(())
    }
}
