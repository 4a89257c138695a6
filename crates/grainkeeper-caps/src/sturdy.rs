//! The sturdy-ref store: minting, redeeming and dropping tokens.
//!
//! A token is a random [`Secret`] handed out once. Only its hash is stored,
//! together with the owner that may redeem it and the payload it restores
//! to. Redeeming checks the owner against a caller-supplied pattern. That
//! check is the only authorization step here, and every way it can fail
//! looks the same to the caller as a token that never existed.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use grainkeeper_core::{
    now_millis, FrontendRef, GrainId, MembraneRequirement, NotificationId, ObjectId, Owner,
    OwnerPattern, Secret, TokenHash, TokenPayload, TokenRecord,
};
use grainkeeper_perms::SharingGraph;
use grainkeeper_store::{Store, StoreError, StoreExt};
use tracing::{debug, error, info};

use crate::backend::{use_grain, AppObject, GrainBackend, TokenMinter};
use crate::background::BackgroundTasks;
use crate::config::CapsConfig;
use crate::error::{CapsError, Refusal, Result};
use crate::notification::{HandleSink, NotificationHandle};

/// Longest chain of child tokens followed before giving up.
pub const MAX_CHAIN_DEPTH: usize = 32;

/// A redeemed token.
pub enum Capability {
    /// A live object in a grain.
    Object(Arc<dyn AppObject>),
    /// A handle on a notification. Always in the saved state.
    Notification(NotificationHandle),
}

impl Capability {
    pub fn as_object(&self) -> Option<&Arc<dyn AppObject>> {
        match self {
            Self::Object(object) => Some(object),
            Self::Notification(_) => None,
        }
    }

    pub fn into_notification(self) -> Option<NotificationHandle> {
        match self {
            Self::Object(_) => None,
            Self::Notification(handle) => Some(handle),
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(object) => f.debug_tuple("Object").field(object).finish(),
            Self::Notification(handle) => f.debug_tuple("Notification").field(handle).finish(),
        }
    }
}

/// What a chain of tokens bottoms out in.
enum Root {
    Object { grain_id: GrainId, object_id: ObjectId },
    Notification(NotificationId),
}

/// A token that passed every check, before any call into a grain.
pub enum Redeemed {
    /// A handle on this notification.
    Notification(NotificationId),
    /// An object still to be fetched from its grain.
    Object(PendingRestore),
}

/// The grain call that finishes redeeming an object token.
///
/// Holds no store access, so it can run while other requests are served.
pub struct PendingRestore {
    backend: Arc<dyn GrainBackend>,
    attempts: u32,
    grain_id: GrainId,
    object_id: ObjectId,
    requirements: Vec<MembraneRequirement>,
}

impl PendingRestore {
    pub fn grain_id(&self) -> &GrainId {
        &self.grain_id
    }

    /// Ask the grain for the object, restarting it once if it disconnected.
    pub async fn run(self) -> Result<Arc<dyn AppObject>> {
        let object_id = &self.object_id;
        let requirements = self.requirements.as_slice();
        let object = use_grain(
            self.backend.as_ref(),
            &self.grain_id,
            self.attempts,
            |supervisor| async move { supervisor.restore(object_id, requirements).await },
        )
        .await?;
        Ok(object)
    }
}

/// Mints and redeems sturdy refs on top of a [`Store`].
///
/// Cheap to clone; clones share the store, the grain backend and the
/// background task set.
pub struct SturdyRefStore<S: Store + 'static> {
    pub(crate) inner: Arc<Inner<S>>,
}

pub(crate) struct Inner<S> {
    pub(crate) store: Arc<S>,
    pub(crate) backend: Arc<dyn GrainBackend>,
    pub(crate) config: CapsConfig,
    pub(crate) tasks: BackgroundTasks,
}

impl<S: Store + 'static> Clone for SturdyRefStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: Store + 'static> SturdyRefStore<S> {
    pub fn new(store: Arc<S>, backend: Arc<dyn GrainBackend>, config: CapsConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                backend,
                config,
                tasks: BackgroundTasks::new(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    pub fn backend(&self) -> &Arc<dyn GrainBackend> {
        &self.inner.backend
    }

    pub fn config(&self) -> &CapsConfig {
        &self.inner.config
    }

    /// Wait for background cancels to finish.
    pub async fn settle(&self) {
        self.inner.tasks.settle().await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Minting
    // ─────────────────────────────────────────────────────────────────────────

    /// Mint a token for `payload` redeemable by `owner`. The secret is returned exactly once.
    pub async fn make_token(&self, payload: TokenPayload, owner: Owner) -> Result<Secret> {
        self.make_token_with(payload, owner, Vec::new()).await
    }

    /// Like [`make_token`](Self::make_token), with requirements that must keep holding.
    pub async fn make_token_with(
        &self,
        payload: TokenPayload,
        owner: Owner,
        requirements: Vec<MembraneRequirement>,
    ) -> Result<Secret> {
        let secret = Secret::generate(self.inner.config.secret_len);
        let hash = secret.hash();
        let expires = self
            .inner
            .config
            .token_ttl
            .map(|ttl| now_millis().saturating_add(ttl.as_millis() as i64));

        let record = TokenRecord::new(hash, owner, payload)
            .with_expires(expires)
            .with_requirements(requirements);
        self.inner.store.insert_token(&record).await?;

        info!(token = %hash, kind = payload_kind(&record.payload), "minted sturdy ref");
        Ok(secret)
    }

    /// Mint a token that restores to whatever `parent` restores to.
    ///
    /// `parent` must currently be redeemable by someone. A child of an object
    /// token stays linked to it and dies with it. A child of a notification
    /// handle is a copy instead: it names the notification directly and takes
    /// over the parent chain's requirements, so it counts as a reference of
    /// its own and the notification outlives the parent being dropped.
    pub async fn make_child_token(
        &self,
        parent: &Secret,
        owner: Owner,
        requirements: Vec<MembraneRequirement>,
    ) -> Result<Secret> {
        let parent_hash = parent.hash();
        let (root, mut inherited) = self.resolve(&parent_hash, &OwnerPattern::Any).await?;

        match root {
            Root::Notification(id) => {
                inherited.extend(requirements);
                self.make_token_with(TokenPayload::notification(id), owner, inherited)
                    .await
            }
            Root::Object { .. } => {
                self.make_token_with(TokenPayload::Child { parent: parent_hash }, owner, requirements)
                    .await
            }
        }
    }

    /// Mint another handle token on a notification that still exists.
    pub async fn save_notification(&self, id: &NotificationId, owner: Owner) -> Result<Secret> {
        if self.inner.store.get_notification(id).await?.is_none() {
            debug!(notification = %id, reason = ?Refusal::NotFound, "save refused");
            return Err(CapsError::Refused);
        }
        self.make_token(TokenPayload::notification(id.clone()), owner)
            .await
    }

    /// Where handles made by this store send their save and close requests.
    pub fn sink(&self) -> Arc<dyn HandleSink> {
        Arc::new(self.clone())
    }

    /// Mark a token revoked. It stays stored but can no longer be redeemed,
    /// and neither can its children. Returns whether the token existed.
    pub async fn revoke(&self, secret: &Secret) -> Result<bool> {
        let hash = secret.hash();
        let existed = self.inner.store.set_token_revoked(&hash, true).await?;
        if existed {
            info!(token = %hash, "revoked sturdy ref");
        }
        Ok(existed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Redeeming
    // ─────────────────────────────────────────────────────────────────────────

    /// Redeem `secret`, provided its owner matches `pattern`.
    ///
    /// Object payloads are restored by the owning grain, restarting it once
    /// if the connection was lost. Notification payloads come back as saved
    /// handles.
    pub async fn restore(&self, secret: &Secret, pattern: &OwnerPattern) -> Result<Capability> {
        match self.redeem(secret, pattern).await? {
            Redeemed::Notification(id) => Ok(Capability::Notification(NotificationHandle::saved(
                self.sink(),
                id,
            ))),
            Redeemed::Object(pending) => Ok(Capability::Object(pending.run().await?)),
        }
    }

    /// Every check [`restore`](Self::restore) makes, without calling into a grain.
    ///
    /// Only reads the store. The returned [`PendingRestore`] does the rest.
    pub async fn redeem(&self, secret: &Secret, pattern: &OwnerPattern) -> Result<Redeemed> {
        let hash = secret.hash();
        let (root, requirements) = self.resolve(&hash, pattern).await?;

        match root {
            Root::Notification(id) => Ok(Redeemed::Notification(id)),
            Root::Object {
                grain_id,
                object_id,
            } => {
                let pending = self
                    .pending_restore(&hash, grain_id, object_id, requirements)
                    .await?;
                Ok(Redeemed::Object(pending))
            }
        }
    }

    /// Follow `hash` to its root payload, collecting requirements on the way.
    async fn resolve(
        &self,
        hash: &TokenHash,
        pattern: &OwnerPattern,
    ) -> Result<(Root, Vec<MembraneRequirement>)> {
        let mut record = self
            .load(hash)
            .await?
            .ok_or_else(|| refuse(hash, Refusal::NotFound))?;
        if !pattern.matches(&record.owner) {
            return Err(refuse(hash, Refusal::OwnerMismatch));
        }

        let mut requirements = Vec::new();
        let mut depth = 0;
        let root = loop {
            check_usable(&record)?;
            requirements.extend(record.requirements.iter().cloned());

            match record.payload {
                TokenPayload::Object {
                    grain_id,
                    object_id,
                } => break Root::Object {
                    grain_id,
                    object_id,
                },
                TokenPayload::Frontend(FrontendRef::NotificationHandle(id)) => {
                    break Root::Notification(id)
                }
                TokenPayload::Child { parent } => {
                    depth += 1;
                    if depth > MAX_CHAIN_DEPTH {
                        return Err(refuse(hash, Refusal::ChainTooDeep));
                    }
                    // Parents are matched against the wildcard pattern.
                    record = self
                        .load(&parent)
                        .await?
                        .ok_or_else(|| refuse(hash, Refusal::NotFound))?;
                }
            }
        };

        if !self.requirements_hold(&requirements).await? {
            return Err(refuse(hash, Refusal::RequirementUnmet));
        }
        Ok((root, requirements))
    }

    /// Whether every requirement holds, following `TokenValid` transitively.
    pub async fn requirements_hold(&self, requirements: &[MembraneRequirement]) -> Result<bool> {
        let store = &self.inner.store;
        let mut pending = requirements.to_vec();
        let mut seen: HashSet<TokenHash> = HashSet::new();

        while let Some(requirement) = pending.pop() {
            match requirement {
                MembraneRequirement::PermissionsHeld {
                    grain_id,
                    principal,
                    permissions,
                } => {
                    let Some(grain) = store.live_grain(&grain_id).await? else {
                        return Ok(false);
                    };
                    let edges = store.active_edges(&grain_id).await?;
                    let graph = SharingGraph::new(grain.id, grain.owner, edges);
                    if graph
                        .propagate(&grain.cached_view)
                        .require(&principal, &permissions)
                        .is_err()
                    {
                        return Ok(false);
                    }
                }
                MembraneRequirement::TokenValid(hash) => {
                    if !seen.insert(hash) {
                        continue;
                    }
                    match self.load(&hash).await? {
                        Some(record) if check_usable(&record).is_ok() => {
                            if let TokenPayload::Child { parent } = record.payload {
                                pending.push(MembraneRequirement::TokenValid(parent));
                            }
                            pending.extend(record.requirements);
                        }
                        _ => return Ok(false),
                    }
                }
            }
        }
        Ok(true)
    }

    /// Refuse objects of trashed or missing grains.
    async fn pending_restore(
        &self,
        hash: &TokenHash,
        grain_id: GrainId,
        object_id: ObjectId,
        requirements: Vec<MembraneRequirement>,
    ) -> Result<PendingRestore> {
        if self.inner.store.live_grain(&grain_id).await?.is_none() {
            return Err(refuse(hash, Refusal::GrainUnavailable));
        }
        Ok(PendingRestore {
            backend: self.inner.backend.clone(),
            attempts: self.inner.config.restore_attempts,
            grain_id,
            object_id,
            requirements,
        })
    }

    pub(crate) async fn restore_object(
        &self,
        hash: &TokenHash,
        grain_id: &GrainId,
        object_id: &ObjectId,
        requirements: &[MembraneRequirement],
    ) -> Result<Arc<dyn AppObject>> {
        self.pending_restore(hash, grain_id.clone(), object_id.clone(), requirements.to_vec())
            .await?
            .run()
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dropping
    // ─────────────────────────────────────────────────────────────────────────

    /// Drop `secret`, provided its owner matches `pattern`.
    ///
    /// Dropping an unknown token, or one owned by someone else, does nothing
    /// and succeeds. Unlike [`restore`](Self::restore), a wrong owner is not
    /// an error here: an error would tell the caller the token exists, and
    /// repeated drops must stay harmless. Dropping the last handle on a
    /// notification dismisses it. Dropping a wakelock releases it in the grain.
    pub async fn drop(&self, secret: &Secret, pattern: &OwnerPattern) -> Result<()> {
        let hash = secret.hash();
        let Some(record) = self.load(&hash).await? else {
            debug!(token = %hash, "drop of unknown token ignored");
            return Ok(());
        };
        if !pattern.matches(&record.owner) {
            debug!(token = %hash, reason = ?Refusal::OwnerMismatch, "drop ignored");
            return Ok(());
        }

        match &record.payload {
            TokenPayload::Frontend(FrontendRef::NotificationHandle(id)) => {
                self.inner.store.delete_token(&hash).await?;
                if self.inner.store.count_notification_tokens(id).await? == 0 {
                    self.dismiss_notification(id).await?;
                }
            }
            TokenPayload::Object {
                grain_id,
                object_id: object_id @ ObjectId::WakeLockNotification(_),
            } => {
                self.release_wakelock(&hash, grain_id, object_id).await?;
            }
            TokenPayload::Object {
                object_id: ObjectId::AppRef(_),
                ..
            }
            | TokenPayload::Child { .. } => {
                self.inner.store.delete_token(&hash).await?;
            }
        }

        info!(token = %hash, kind = payload_kind(&record.payload), "dropped sturdy ref");
        Ok(())
    }

    /// Tell the grain a wakelock is gone, then forget its token.
    ///
    /// Only restores retry after a restart. A disconnect here is returned
    /// and the token is kept, so dropping it again releases the wakelock.
    pub(crate) async fn release_wakelock(
        &self,
        hash: &TokenHash,
        grain_id: &GrainId,
        object_id: &ObjectId,
    ) -> Result<()> {
        use_grain(
            self.inner.backend.as_ref(),
            grain_id,
            1,
            |supervisor| async move { supervisor.drop_object(object_id).await },
        )
        .await?;
        self.inner.store.delete_token(hash).await?;
        Ok(())
    }

    /// Load a record, reporting undecodable ones loudly.
    pub(crate) async fn load(&self, hash: &TokenHash) -> Result<Option<TokenRecord>> {
        match self.inner.store.get_token(hash).await {
            Ok(record) => Ok(record),
            Err(StoreError::CorruptRecord { key, reason }) => {
                error!(token = %key, %reason, "corrupt sturdy-ref record");
                Err(CapsError::CorruptToken { hash: key, reason })
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait::async_trait]
impl<S: Store + 'static> TokenMinter for SturdyRefStore<S> {
    async fn make_token(
        &self,
        payload: TokenPayload,
        owner: Owner,
        requirements: Vec<MembraneRequirement>,
    ) -> Result<Secret> {
        self.make_token_with(payload, owner, requirements).await
    }
}

/// Refuse unless the record is unrevoked and unexpired.
fn check_usable(record: &TokenRecord) -> Result<()> {
    if record.revoked {
        return Err(refuse(&record.hash, Refusal::Revoked));
    }
    if record.is_expired(now_millis()) {
        return Err(refuse(&record.hash, Refusal::Expired));
    }
    Ok(())
}

pub(crate) fn refuse(hash: &TokenHash, reason: Refusal) -> CapsError {
    debug!(token = %hash, ?reason, "refused sturdy ref");
    CapsError::Refused
}

fn payload_kind(payload: &TokenPayload) -> &'static str {
    match payload {
        TokenPayload::Object {
            object_id: ObjectId::AppRef(_),
            ..
        } => "app_ref",
        TokenPayload::Object {
            object_id: ObjectId::WakeLockNotification(_),
            ..
        } => "wake_lock",
        TokenPayload::Frontend(FrontendRef::NotificationHandle(_)) => "notification_handle",
        TokenPayload::Child { .. } => "child",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryGrain};
    use crate::error::RpcError;
    use bytes::Bytes;
    use grainkeeper_core::codec::encode_with_raw_kind;
    use grainkeeper_core::{
        GrainRecord, PermissionSet, PrincipalId, RoleAssignment, RoleDef, ShareEdge, ViewInfo,
    };
    use grainkeeper_store::MemoryStore;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct Fixture {
        refs: SturdyRefStore<MemoryStore>,
        store: Arc<MemoryStore>,
        grain: Arc<MemoryGrain>,
    }

    async fn fixture_with(config: CapsConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.put_grain(&GrainRecord::new("g1", "alice")).await.unwrap();
        let backend = MemoryBackend::new();
        let grain = backend.add_grain("g1");
        let refs = SturdyRefStore::new(store.clone(), backend, config);
        Fixture { refs, store, grain }
    }

    async fn fixture() -> Fixture {
        fixture_with(CapsConfig::default()).await
    }

    fn doc_ref() -> TokenPayload {
        TokenPayload::app_ref("g1".into(), Bytes::from_static(b"doc"))
    }

    fn app_ref_of(cap: &Capability) -> Bytes {
        match cap.as_object().map(|o| o.object_id()) {
            Some(ObjectId::AppRef(data)) => data,
            other => panic!("expected app ref, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_restore_round_trip() {
        let f = fixture().await;
        let secret = f.refs.make_token(doc_ref(), Owner::grain("g1")).await.unwrap();

        let cap = f.refs.restore(&secret, &OwnerPattern::grain("g1")).await.unwrap();
        assert_eq!(app_ref_of(&cap), Bytes::from_static(b"doc"));

        // Restoring has no side effect on the record.
        assert!(f.store.get_token(&secret.hash()).await.unwrap().is_some());
        f.refs.restore(&secret, &OwnerPattern::grain("g1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_owner_mismatch_looks_like_missing_token() {
        let f = fixture().await;
        let secret = f.refs.make_token(doc_ref(), Owner::grain("g1")).await.unwrap();

        for _ in 0..3 {
            let mismatch = f.refs.restore(&secret, &OwnerPattern::grain("g2")).await;
            assert!(matches!(mismatch, Err(CapsError::Refused)));
        }
        let missing = f
            .refs
            .restore(&Secret::generate(32), &OwnerPattern::grain("g1"))
            .await;
        assert!(matches!(missing, Err(CapsError::Refused)));
        assert_eq!(
            format!("{}", CapsError::Refused),
            "capability refused".to_string()
        );
    }

    #[tokio::test]
    async fn test_pattern_ignores_unmatched_fields() {
        let f = fixture().await;
        let owner = Owner::Grain {
            grain_id: "g1".into(),
            save_label: Some("label".into()),
        };
        let secret = f.refs.make_token(doc_ref(), owner).await.unwrap();
        assert!(f.refs.restore(&secret, &OwnerPattern::grain("g1")).await.is_ok());
        assert!(f
            .refs
            .restore(&secret, &OwnerPattern::Grain { grain_id: None })
            .await
            .is_ok());
        assert!(f.refs.restore(&secret, &OwnerPattern::Frontend).await.is_err());
    }

    #[tokio::test]
    async fn test_restore_retries_after_restart() {
        let f = fixture().await;
        let secret = f.refs.make_token(doc_ref(), Owner::grain("g1")).await.unwrap();
        f.grain.disconnect_next(1);

        f.refs.restore(&secret, &OwnerPattern::grain("g1")).await.unwrap();
        assert_eq!(f.grain.stats().restarts.load(Ordering::SeqCst), 1);

        f.grain.disconnect_next(2);
        let err = f.refs.restore(&secret, &OwnerPattern::grain("g1")).await;
        assert!(matches!(err, Err(CapsError::Rpc(RpcError::Disconnected(_)))));
    }

    #[tokio::test]
    async fn test_trashed_grain_is_refused() {
        let f = fixture().await;
        let secret = f.refs.make_token(doc_ref(), Owner::grain("g1")).await.unwrap();
        f.store.set_grain_trashed(&"g1".into(), true).await.unwrap();

        let result = f.refs.restore(&secret, &OwnerPattern::grain("g1")).await;
        assert!(matches!(result, Err(CapsError::Refused)));
        assert_eq!(f.grain.stats().restores.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_revoked_and_expired_are_refused() {
        let f = fixture().await;
        let secret = f.refs.make_token(doc_ref(), Owner::grain("g1")).await.unwrap();
        assert!(f.refs.revoke(&secret).await.unwrap());
        let result = f.refs.restore(&secret, &OwnerPattern::grain("g1")).await;
        assert!(matches!(result, Err(CapsError::Refused)));

        let record = TokenRecord::new(
            TokenHash::of(b"expired secret bytes"),
            Owner::grain("g1"),
            doc_ref(),
        )
        .with_expires(Some(now_millis() - 1));
        f.store.insert_token(&record).await.unwrap();
        let expired = Secret::from_bytes(b"expired secret bytes".to_vec());
        let result = f.refs.restore(&expired, &OwnerPattern::grain("g1")).await;
        assert!(matches!(result, Err(CapsError::Refused)));
    }

    #[tokio::test]
    async fn test_ttl_sets_expiry() {
        let f = fixture_with(CapsConfig {
            token_ttl: Some(Duration::from_secs(60)),
            ..CapsConfig::default()
        })
        .await;
        let secret = f.refs.make_token(doc_ref(), Owner::grain("g1")).await.unwrap();
        let record = f.store.get_token(&secret.hash()).await.unwrap().unwrap();
        assert!(record.expires.unwrap() > now_millis());
    }

    #[tokio::test]
    async fn test_child_token_follows_parent() {
        let f = fixture().await;
        let parent = f.refs.make_token(doc_ref(), Owner::grain("g1")).await.unwrap();
        let child = f
            .refs
            .make_child_token(&parent, Owner::user("bob"), Vec::new())
            .await
            .unwrap();

        // The child's own owner is checked; the parent's is not.
        let cap = f.refs.restore(&child, &OwnerPattern::user("bob")).await.unwrap();
        assert_eq!(app_ref_of(&cap), Bytes::from_static(b"doc"));
        assert!(f.refs.restore(&child, &OwnerPattern::grain("g1")).await.is_err());

        f.refs.revoke(&parent).await.unwrap();
        let result = f.refs.restore(&child, &OwnerPattern::user("bob")).await;
        assert!(matches!(result, Err(CapsError::Refused)));
        assert!(f
            .refs
            .make_child_token(&parent, Owner::user("carol"), Vec::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_token_valid_requirement() {
        let f = fixture().await;
        let guard = f.refs.make_token(doc_ref(), Owner::Frontend).await.unwrap();
        let secret = f
            .refs
            .make_token_with(
                doc_ref(),
                Owner::grain("g1"),
                vec![MembraneRequirement::TokenValid(guard.hash())],
            )
            .await
            .unwrap();
        assert!(f.refs.restore(&secret, &OwnerPattern::grain("g1")).await.is_ok());

        f.refs.drop(&guard, &OwnerPattern::Frontend).await.unwrap();
        let result = f.refs.restore(&secret, &OwnerPattern::grain("g1")).await;
        assert!(matches!(result, Err(CapsError::Refused)));
    }

    #[tokio::test]
    async fn test_token_valid_cycle_terminates() {
        let f = fixture().await;
        let a = TokenHash::of(b"cycle token a secret");
        let b = TokenHash::of(b"cycle token b secret");
        for (hash, other) in [(a, b), (b, a)] {
            let record = TokenRecord::new(hash, Owner::Frontend, doc_ref())
                .with_requirements(vec![MembraneRequirement::TokenValid(other)]);
            f.store.insert_token(&record).await.unwrap();
        }
        assert!(f
            .refs
            .requirements_hold(&[MembraneRequirement::TokenValid(a)])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_permissions_held_requirement() {
        let f = fixture().await;
        let view = ViewInfo::new(
            ["read", "write"],
            vec![RoleDef::new([true, true]), RoleDef::new([true, false])],
        );
        f.store
            .put_grain(&GrainRecord::new("g1", "alice").with_view(view))
            .await
            .unwrap();
        let edge = ShareEdge::new("g1".into(), "alice".into(), "bob".into(), RoleAssignment::role(1));
        f.store.insert_edge(&edge).await.unwrap();

        let held = |bits: [bool; 2]| MembraneRequirement::PermissionsHeld {
            grain_id: "g1".into(),
            principal: PrincipalId::from("bob"),
            permissions: PermissionSet::from(bits),
        };
        assert!(f.refs.requirements_hold(&[held([true, false])]).await.unwrap());
        assert!(!f.refs.requirements_hold(&[held([true, true])]).await.unwrap());

        let secret = f
            .refs
            .make_token_with(doc_ref(), Owner::user("bob"), vec![held([true, false])])
            .await
            .unwrap();
        assert!(f.refs.restore(&secret, &OwnerPattern::user("bob")).await.is_ok());

        f.store.set_edge_active(&edge.id, false).await.unwrap();
        let result = f.refs.restore(&secret, &OwnerPattern::user("bob")).await;
        assert!(matches!(result, Err(CapsError::Refused)));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_reported() {
        let f = fixture().await;
        let secret = Secret::from_bytes(b"corrupt record secret".to_vec());
        let record = TokenRecord::new(secret.hash(), Owner::grain("g1"), doc_ref());
        let bytes = encode_with_raw_kind(&record, 99).unwrap();
        f.store.insert_raw_token(secret.hash(), bytes).unwrap();

        let result = f.refs.restore(&secret, &OwnerPattern::grain("g1")).await;
        assert!(matches!(result, Err(CapsError::CorruptToken { .. })));
        let result = f.refs.drop(&secret, &OwnerPattern::grain("g1")).await;
        assert!(matches!(result, Err(CapsError::CorruptToken { .. })));
    }

    #[tokio::test]
    async fn test_drop_is_idempotent() {
        let f = fixture().await;
        let secret = f.refs.make_token(doc_ref(), Owner::grain("g1")).await.unwrap();

        f.refs.drop(&secret, &OwnerPattern::grain("g2")).await.unwrap();
        assert!(f.store.get_token(&secret.hash()).await.unwrap().is_some());

        f.refs.drop(&secret, &OwnerPattern::grain("g1")).await.unwrap();
        f.refs.drop(&secret, &OwnerPattern::grain("g1")).await.unwrap();
        assert!(f.store.get_token(&secret.hash()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_drop_wakelock_releases_it() {
        let f = fixture().await;
        let ongoing = f.grain.new_ongoing(Arc::new(f.refs.clone()));
        let wakelock = ongoing.save().await.unwrap();
        assert_eq!(f.grain.held_wakelocks(), 1);

        f.refs.drop(&wakelock, &OwnerPattern::Frontend).await.unwrap();
        assert_eq!(f.grain.held_wakelocks(), 0);
        assert_eq!(f.grain.stats().releases.load(Ordering::SeqCst), 1);
        assert!(f.store.get_token(&wakelock.hash()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_drop_wakelock_disconnect_keeps_token() {
        let f = fixture().await;
        let ongoing = f.grain.new_ongoing(Arc::new(f.refs.clone()));
        let wakelock = ongoing.save().await.unwrap();
        f.grain.disconnect_next(1);

        let result = f.refs.drop(&wakelock, &OwnerPattern::Frontend).await;
        assert!(matches!(result, Err(CapsError::Rpc(RpcError::Disconnected(_)))));
        assert_eq!(f.grain.stats().restarts.load(Ordering::SeqCst), 0);
        assert_eq!(f.grain.held_wakelocks(), 1);
        assert!(f.store.get_token(&wakelock.hash()).await.unwrap().is_some());

        f.refs.drop(&wakelock, &OwnerPattern::Frontend).await.unwrap();
        assert_eq!(f.grain.stats().releases.load(Ordering::SeqCst), 1);
        assert_eq!(f.grain.held_wakelocks(), 0);
        assert!(f.store.get_token(&wakelock.hash()).await.unwrap().is_none());
    }
}
