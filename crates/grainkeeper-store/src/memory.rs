//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence. Token records are
//! kept in their encoded form so decoding failures surface the same way.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use grainkeeper_core::{
    decode_token, encode_token, EdgeId, GrainId, GrainRecord, NotificationId, NotificationRecord,
    PrincipalId, SessionId, SessionRecord, ShareEdge, TokenHash, TokenRecord,
};

use crate::error::{Result, StoreError};
use crate::traits::Store;

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    grains: HashMap<GrainId, GrainRecord>,

    /// Edges in insertion order.
    edges: Vec<ShareEdge>,

    sessions: HashMap<SessionId, SessionRecord>,

    /// Encoded token records by hash.
    tokens: HashMap<TokenHash, StoredToken>,

    notifications: HashMap<NotificationId, NotificationRecord>,
}

struct StoredToken {
    bytes: Vec<u8>,
    /// Notification referenced by the payload, indexed at insert time.
    notification: Option<NotificationId>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Task(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Task(format!("lock poisoned: {}", e)))
    }

    /// Store raw bytes under `hash`, bypassing encoding.
    ///
    /// Lets tests plant records that no current writer would produce.
    pub fn insert_raw_token(&self, hash: TokenHash, bytes: Vec<u8>) -> Result<()> {
        self.write()?.tokens.insert(
            hash,
            StoredToken {
                bytes,
                notification: None,
            },
        );
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_stored(hash: &TokenHash, bytes: &[u8]) -> Result<TokenRecord> {
    decode_token(bytes).map_err(|e| StoreError::CorruptRecord {
        key: hash.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_grain(&self, grain: &GrainRecord) -> Result<()> {
        self.write()?.grains.insert(grain.id.clone(), grain.clone());
        Ok(())
    }

    async fn get_grain(&self, id: &GrainId) -> Result<Option<GrainRecord>> {
        Ok(self.read()?.grains.get(id).cloned())
    }

    async fn set_grain_trashed(&self, id: &GrainId, trashed: bool) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.grains.get_mut(id) {
            Some(grain) => {
                grain.trashed = trashed;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_edge(&self, edge: &ShareEdge) -> Result<()> {
        let mut inner = self.write()?;
        if inner.edges.iter().any(|e| e.id == edge.id) {
            return Err(StoreError::Duplicate(format!("edge {}", edge.id)));
        }
        inner.edges.push(edge.clone());
        Ok(())
    }

    async fn get_edge(&self, id: &EdgeId) -> Result<Option<ShareEdge>> {
        Ok(self.read()?.edges.iter().find(|e| &e.id == id).cloned())
    }

    async fn edges_for_grain(&self, grain_id: &GrainId) -> Result<Vec<ShareEdge>> {
        Ok(self
            .read()?
            .edges
            .iter()
            .filter(|e| &e.grain_id == grain_id)
            .cloned()
            .collect())
    }

    async fn set_edge_active(&self, id: &EdgeId, active: bool) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.edges.iter_mut().find(|e| &e.id == id) {
            Some(edge) => {
                edge.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_edge(&self, id: &EdgeId) -> Result<bool> {
        let mut inner = self.write()?;
        let before = inner.edges.len();
        inner.edges.retain(|e| &e.id != id);
        Ok(inner.edges.len() != before)
    }

    async fn insert_session(&self, session: &SessionRecord) -> Result<()> {
        self.write()?
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>> {
        Ok(self.read()?.sessions.get(id).cloned())
    }

    async fn sessions_for_grain(&self, grain_id: &GrainId) -> Result<Vec<SessionRecord>> {
        let mut sessions: Vec<SessionRecord> = self
            .read()?
            .sessions
            .values()
            .filter(|s| &s.grain_id == grain_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created);
        Ok(sessions)
    }

    async fn delete_session(&self, id: &SessionId) -> Result<bool> {
        Ok(self.write()?.sessions.remove(id).is_some())
    }

    async fn insert_token(&self, record: &TokenRecord) -> Result<()> {
        let bytes = encode_token(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut inner = self.write()?;
        if inner.tokens.contains_key(&record.hash) {
            return Err(StoreError::Duplicate(format!("token {}", record.hash)));
        }
        inner.tokens.insert(
            record.hash,
            StoredToken {
                bytes,
                notification: record.payload.notification_id().cloned(),
            },
        );
        Ok(())
    }

    async fn get_token(&self, hash: &TokenHash) -> Result<Option<TokenRecord>> {
        let inner = self.read()?;
        inner
            .tokens
            .get(hash)
            .map(|stored| decode_stored(hash, &stored.bytes))
            .transpose()
    }

    async fn delete_token(&self, hash: &TokenHash) -> Result<bool> {
        Ok(self.write()?.tokens.remove(hash).is_some())
    }

    async fn set_token_revoked(&self, hash: &TokenHash, revoked: bool) -> Result<bool> {
        let mut inner = self.write()?;
        let Some(stored) = inner.tokens.get_mut(hash) else {
            return Ok(false);
        };
        let mut record = decode_stored(hash, &stored.bytes)?;
        record.revoked = revoked;
        stored.bytes =
            encode_token(&record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(true)
    }

    async fn count_notification_tokens(&self, notification_id: &NotificationId) -> Result<usize> {
        Ok(self
            .read()?
            .tokens
            .values()
            .filter(|t| t.notification.as_ref() == Some(notification_id))
            .count())
    }

    async fn insert_notification(&self, notification: &NotificationRecord) -> Result<()> {
        self.write()?
            .notifications
            .insert(notification.id.clone(), notification.clone());
        Ok(())
    }

    async fn get_notification(&self, id: &NotificationId) -> Result<Option<NotificationRecord>> {
        Ok(self.read()?.notifications.get(id).cloned())
    }

    async fn take_notification(&self, id: &NotificationId) -> Result<Option<NotificationRecord>> {
        Ok(self.write()?.notifications.remove(id))
    }

    async fn notifications_for(&self, account: &PrincipalId) -> Result<Vec<NotificationRecord>> {
        let mut found: Vec<NotificationRecord> = self
            .read()?
            .notifications
            .values()
            .filter(|n| &n.account == account)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(found)
    }

    async fn mark_notifications_read(&self, account: &PrincipalId) -> Result<usize> {
        let mut inner = self.write()?;
        let mut changed = 0;
        for notification in inner.notifications.values_mut() {
            if &notification.account == account && notification.is_unread {
                notification.is_unread = false;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
