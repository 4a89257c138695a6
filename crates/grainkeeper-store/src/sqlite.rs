//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend for grainkeeper. It uses rusqlite
//! with bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};

use grainkeeper_core::{
    decode_token, encode_token, EdgeId, GrainId, GrainRecord, NotificationId, NotificationRecord,
    PrincipalId, Secret, SessionId, SessionRecord, ShareEdge, TokenHash, TokenRecord,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::Store;

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Task(format!("mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }

    /// Store raw bytes under `hash`, bypassing encoding.
    ///
    /// Lets tests plant records that no current writer would produce.
    pub async fn insert_raw_token(&self, hash: TokenHash, bytes: Vec<u8>) -> Result<()> {
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO tokens (token_hash, notification_id, record, created)
                 VALUES (?1, NULL, ?2, 0)",
                params![hash.as_bytes().as_slice(), bytes],
            )?;
            Ok(())
        })
        .await
    }
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::CorruptRecord {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

// Raw edge row; blob columns are decoded after the row is read.
struct EdgeRow {
    edge_id: String,
    grain_id: String,
    sharer: String,
    recipient: String,
    role_assignment: Vec<u8>,
    add_permissions: Vec<u8>,
    remove_permissions: Vec<u8>,
    active: bool,
    created: i64,
    petname: Option<String>,
}

const EDGE_COLUMNS: &str = "edge_id, grain_id, sharer, recipient, role_assignment, \
     add_permissions, remove_permissions, active, created, petname";

fn row_to_edge_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EdgeRow> {
    Ok(EdgeRow {
        edge_id: row.get("edge_id")?,
        grain_id: row.get("grain_id")?,
        sharer: row.get("sharer")?,
        recipient: row.get("recipient")?,
        role_assignment: row.get("role_assignment")?,
        add_permissions: row.get("add_permissions")?,
        remove_permissions: row.get("remove_permissions")?,
        active: row.get("active")?,
        created: row.get("created")?,
        petname: row.get("petname")?,
    })
}

impl EdgeRow {
    fn decode(self) -> Result<ShareEdge> {
        let key = format!("edge {}", self.edge_id);
        Ok(ShareEdge {
            role_assignment: from_cbor(&key, &self.role_assignment)?,
            add_permissions: from_cbor(&key, &self.add_permissions)?,
            remove_permissions: from_cbor(&key, &self.remove_permissions)?,
            id: EdgeId::new(self.edge_id),
            grain_id: GrainId::new(self.grain_id),
            sharer: PrincipalId::new(self.sharer),
            recipient: PrincipalId::new(self.recipient),
            active: self.active,
            created: self.created,
            petname: self.petname,
        })
    }
}

// Raw grain row; the cached view is decoded after the row is read.
struct GrainRow {
    grain_id: String,
    owner: String,
    title: String,
    trashed: bool,
    created: i64,
    cached_view: Vec<u8>,
}

fn row_to_grain_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GrainRow> {
    Ok(GrainRow {
        grain_id: row.get("grain_id")?,
        owner: row.get("owner")?,
        title: row.get("title")?,
        trashed: row.get("trashed")?,
        created: row.get("created")?,
        cached_view: row.get("cached_view")?,
    })
}

impl GrainRow {
    fn decode(self) -> Result<GrainRecord> {
        let cached_view = from_cbor(&format!("grain {}", self.grain_id), &self.cached_view)?;
        Ok(GrainRecord {
            id: GrainId::new(self.grain_id),
            owner: PrincipalId::new(self.owner),
            title: self.title,
            trashed: self.trashed,
            created: self.created,
            cached_view,
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: SessionId::new(row.get::<_, String>("session_id")?),
        grain_id: GrainId::new(row.get::<_, String>("grain_id")?),
        principal: PrincipalId::new(row.get::<_, String>("principal")?),
        created: row.get("created")?,
    })
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRecord> {
    let ongoing: Option<Vec<u8>> = row.get("ongoing")?;
    Ok(NotificationRecord {
        id: NotificationId::new(row.get::<_, String>("notification_id")?),
        grain_id: GrainId::new(row.get::<_, String>("grain_id")?),
        account: PrincipalId::new(row.get::<_, String>("account")?),
        text: row.get("text")?,
        ongoing: ongoing.map(Secret::from_bytes),
        timestamp: row.get("timestamp")?,
        is_unread: row.get("is_unread")?,
    })
}

fn decode_stored(hash: &TokenHash, bytes: &[u8]) -> Result<TokenRecord> {
    decode_token(bytes).map_err(|e| StoreError::CorruptRecord {
        key: hash.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn put_grain(&self, grain: &GrainRecord) -> Result<()> {
        let cached_view = to_cbor(&grain.cached_view)?;
        let grain = grain.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO grains (grain_id, owner, title, trashed, created, cached_view)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    grain.id.as_str(),
                    grain.owner.as_str(),
                    grain.title,
                    grain.trashed,
                    grain.created,
                    cached_view
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_grain(&self, id: &GrainId) -> Result<Option<GrainRecord>> {
        let id = id.clone();
        self.blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT * FROM grains WHERE grain_id = ?1",
                    params![id.as_str()],
                    row_to_grain_row,
                )
                .optional()?;
            row.map(GrainRow::decode).transpose()
        })
        .await
    }

    async fn set_grain_trashed(&self, id: &GrainId, trashed: bool) -> Result<bool> {
        let id = id.clone();
        self.blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE grains SET trashed = ?2 WHERE grain_id = ?1",
                params![id.as_str(), trashed],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn insert_edge(&self, edge: &ShareEdge) -> Result<()> {
        let role_assignment = to_cbor(&edge.role_assignment)?;
        let add_permissions = to_cbor(&edge.add_permissions)?;
        let remove_permissions = to_cbor(&edge.remove_permissions)?;
        let edge = edge.clone();
        self.blocking(move |conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT seq FROM share_edges WHERE edge_id = ?1",
                    params![edge.id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Err(StoreError::Duplicate(format!("edge {}", edge.id)));
            }
            conn.execute(
                "INSERT INTO share_edges (
                    edge_id, grain_id, sharer, recipient, role_assignment,
                    add_permissions, remove_permissions, active, created, petname
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    edge.id.as_str(),
                    edge.grain_id.as_str(),
                    edge.sharer.as_str(),
                    edge.recipient.as_str(),
                    role_assignment,
                    add_permissions,
                    remove_permissions,
                    edge.active,
                    edge.created,
                    edge.petname,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_edge(&self, id: &EdgeId) -> Result<Option<ShareEdge>> {
        let id = id.clone();
        self.blocking(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM share_edges WHERE edge_id = ?1", EDGE_COLUMNS),
                    params![id.as_str()],
                    row_to_edge_row,
                )
                .optional()?;
            row.map(EdgeRow::decode).transpose()
        })
        .await
    }

    async fn edges_for_grain(&self, grain_id: &GrainId) -> Result<Vec<ShareEdge>> {
        let grain_id = grain_id.clone();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM share_edges WHERE grain_id = ?1 ORDER BY seq",
                EDGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![grain_id.as_str()], row_to_edge_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(EdgeRow::decode).collect()
        })
        .await
    }

    async fn set_edge_active(&self, id: &EdgeId, active: bool) -> Result<bool> {
        let id = id.clone();
        self.blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE share_edges SET active = ?2 WHERE edge_id = ?1",
                params![id.as_str(), active],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete_edge(&self, id: &EdgeId) -> Result<bool> {
        let id = id.clone();
        self.blocking(move |conn| {
            let changed = conn.execute(
                "DELETE FROM share_edges WHERE edge_id = ?1",
                params![id.as_str()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn insert_session(&self, session: &SessionRecord) -> Result<()> {
        let session = session.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sessions (session_id, grain_id, principal, created)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    session.id.as_str(),
                    session.grain_id.as_str(),
                    session.principal.as_str(),
                    session.created
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>> {
        let id = id.clone();
        self.blocking(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM sessions WHERE session_id = ?1",
                    params![id.as_str()],
                    row_to_session,
                )
                .optional()?)
        })
        .await
    }

    async fn sessions_for_grain(&self, grain_id: &GrainId) -> Result<Vec<SessionRecord>> {
        let grain_id = grain_id.clone();
        self.blocking(move |conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM sessions WHERE grain_id = ?1 ORDER BY created")?;
            let sessions = stmt
                .query_map(params![grain_id.as_str()], row_to_session)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(sessions)
        })
        .await
    }

    async fn delete_session(&self, id: &SessionId) -> Result<bool> {
        let id = id.clone();
        self.blocking(move |conn| {
            let changed = conn.execute(
                "DELETE FROM sessions WHERE session_id = ?1",
                params![id.as_str()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn insert_token(&self, record: &TokenRecord) -> Result<()> {
        let bytes = encode_token(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let hash = record.hash;
        let notification = record
            .payload
            .notification_id()
            .map(|id| id.as_str().to_string());
        let created = record.created;
        self.blocking(move |conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT created FROM tokens WHERE token_hash = ?1",
                    params![hash.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Err(StoreError::Duplicate(format!("token {}", hash)));
            }
            conn.execute(
                "INSERT INTO tokens (token_hash, notification_id, record, created)
                 VALUES (?1, ?2, ?3, ?4)",
                params![hash.as_bytes().as_slice(), notification, bytes, created],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_token(&self, hash: &TokenHash) -> Result<Option<TokenRecord>> {
        let hash = *hash;
        self.blocking(move |conn| {
            let bytes: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT record FROM tokens WHERE token_hash = ?1",
                    params![hash.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            bytes.map(|b| decode_stored(&hash, &b)).transpose()
        })
        .await
    }

    async fn delete_token(&self, hash: &TokenHash) -> Result<bool> {
        let hash = *hash;
        self.blocking(move |conn| {
            let changed = conn.execute(
                "DELETE FROM tokens WHERE token_hash = ?1",
                params![hash.as_bytes().as_slice()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn set_token_revoked(&self, hash: &TokenHash, revoked: bool) -> Result<bool> {
        let hash = *hash;
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let bytes: Option<Vec<u8>> = tx
                .query_row(
                    "SELECT record FROM tokens WHERE token_hash = ?1",
                    params![hash.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(bytes) = bytes else {
                return Ok(false);
            };
            let mut record = decode_stored(&hash, &bytes)?;
            record.revoked = revoked;
            let bytes =
                encode_token(&record).map_err(|e| StoreError::Serialization(e.to_string()))?;
            tx.execute(
                "UPDATE tokens SET record = ?2 WHERE token_hash = ?1",
                params![hash.as_bytes().as_slice(), bytes],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn count_notification_tokens(&self, notification_id: &NotificationId) -> Result<usize> {
        let notification_id = notification_id.clone();
        self.blocking(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM tokens WHERE notification_id = ?1",
                params![notification_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    async fn insert_notification(&self, notification: &NotificationRecord) -> Result<()> {
        let n = notification.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO notifications (
                    notification_id, grain_id, account, text, ongoing, timestamp, is_unread
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    n.id.as_str(),
                    n.grain_id.as_str(),
                    n.account.as_str(),
                    n.text,
                    n.ongoing.as_ref().map(|s| s.as_bytes().to_vec()),
                    n.timestamp,
                    n.is_unread,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_notification(&self, id: &NotificationId) -> Result<Option<NotificationRecord>> {
        let id = id.clone();
        self.blocking(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM notifications WHERE notification_id = ?1",
                    params![id.as_str()],
                    row_to_notification,
                )
                .optional()?)
        })
        .await
    }

    async fn take_notification(&self, id: &NotificationId) -> Result<Option<NotificationRecord>> {
        let id = id.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let found = tx
                .query_row(
                    "SELECT * FROM notifications WHERE notification_id = ?1",
                    params![id.as_str()],
                    row_to_notification,
                )
                .optional()?;
            if found.is_some() {
                tx.execute(
                    "DELETE FROM notifications WHERE notification_id = ?1",
                    params![id.as_str()],
                )?;
            }
            tx.commit()?;
            Ok(found)
        })
        .await
    }

    async fn notifications_for(&self, account: &PrincipalId) -> Result<Vec<NotificationRecord>> {
        let account = account.clone();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM notifications WHERE account = ?1 ORDER BY timestamp DESC",
            )?;
            let found = stmt
                .query_map(params![account.as_str()], row_to_notification)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(found)
        })
        .await
    }

    async fn mark_notifications_read(&self, account: &PrincipalId) -> Result<usize> {
        let account = account.clone();
        self.blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE notifications SET is_unread = 0 WHERE account = ?1 AND is_unread = 1",
                params![account.as_str()],
            )?;
            Ok(changed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grainkeeper_core::{codec, Owner, PermissionSet, RoleAssignment, RoleDef, TokenPayload, ViewInfo};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_grain_roundtrip_and_trash() {
        let store = SqliteStore::open_memory().unwrap();
        let grain = GrainRecord::new("g1", "alice")
            .with_title("Notes")
            .with_view(ViewInfo::new(["read"], vec![RoleDef::new([true]).default_role()]));
        store.put_grain(&grain).await.unwrap();
        assert_eq!(store.get_grain(&grain.id).await.unwrap(), Some(grain.clone()));

        assert!(store.set_grain_trashed(&grain.id, true).await.unwrap());
        assert!(store.get_grain(&grain.id).await.unwrap().unwrap().trashed);
        assert!(!store.set_grain_trashed(&"nope".into(), true).await.unwrap());
    }

    #[tokio::test]
    async fn test_edges_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let edge = ShareEdge::new("g".into(), "alice".into(), "bob".into(), RoleAssignment::role(2))
            .with_add([true, false])
            .with_remove(PermissionSet::from([false, false, true]))
            .with_petname("Bob's link");
        store.insert_edge(&edge).await.unwrap();
        assert!(matches!(
            store.insert_edge(&edge).await,
            Err(StoreError::Duplicate(_))
        ));

        let loaded = store.get_edge(&edge.id).await.unwrap().unwrap();
        assert_eq!(loaded, edge);

        assert!(store.set_edge_active(&edge.id, false).await.unwrap());
        let edges = store.edges_for_grain(&"g".into()).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert!(!edges[0].active);

        assert!(store.delete_edge(&edge.id).await.unwrap());
        assert!(store.get_edge(&edge.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tokens() {
        let store = SqliteStore::open_memory().unwrap();
        let secret = Secret::generate(32);
        let record = TokenRecord::new(
            secret.hash(),
            Owner::grain("g1"),
            TokenPayload::notification("n1".into()),
        );
        store.insert_token(&record).await.unwrap();
        assert_eq!(store.get_token(&secret.hash()).await.unwrap(), Some(record.clone()));
        assert_eq!(
            store.count_notification_tokens(&"n1".into()).await.unwrap(),
            1
        );

        assert!(store.set_token_revoked(&record.hash, true).await.unwrap());
        assert!(store.get_token(&record.hash).await.unwrap().unwrap().revoked);

        assert!(store.delete_token(&record.hash).await.unwrap());
        assert!(!store.delete_token(&record.hash).await.unwrap());
        assert_eq!(
            store.count_notification_tokens(&"n1".into()).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_corrupt_token() {
        let store = SqliteStore::open_memory().unwrap();
        let record = TokenRecord::new(
            TokenHash::of(b"s"),
            Owner::Frontend,
            TokenPayload::notification("n".into()),
        );
        let bytes = codec::encode_with_raw_kind(&record, 77).unwrap();
        store.insert_raw_token(record.hash, bytes).await.unwrap();
        assert!(matches!(
            store.get_token(&record.hash).await,
            Err(StoreError::CorruptRecord { .. })
        ));
    }

    #[tokio::test]
    async fn test_notifications_keep_wakelock() {
        let store = SqliteStore::open_memory().unwrap();
        let wakelock = Secret::generate(32);
        let n = NotificationRecord::new("g".into(), "alice".into(), "syncing")
            .with_ongoing(wakelock.clone());
        store.insert_notification(&n).await.unwrap();

        let listed = store.notifications_for(&"alice".into()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].ongoing, Some(wakelock));

        assert_eq!(store.mark_notifications_read(&"alice".into()).await.unwrap(), 1);
        let taken = store.take_notification(&n.id).await.unwrap().unwrap();
        assert!(!taken.is_unread);
        assert!(store.get_notification(&n.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sessions() {
        let store = SqliteStore::open_memory().unwrap();
        let s = SessionRecord::new("g".into(), "bob".into());
        store.insert_session(&s).await.unwrap();
        assert_eq!(store.sessions_for_grain(&"g".into()).await.unwrap(), vec![s.clone()]);
        assert!(store.delete_session(&s.id).await.unwrap());
        assert!(store.get_session(&s.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_backed_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("grainkeeper.db");
        let grain = GrainRecord::new("g1", "alice");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.put_grain(&grain).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get_grain(&grain.id).await.unwrap(), Some(grain));
    }
}
