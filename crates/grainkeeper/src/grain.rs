//! The core object a grain sees over RPC.
//!
//! Each grain gets its own [`GrainCore`]. Tokens it mints are bound to it,
//! and it can only restore or drop tokens whose owner is that same grain.
//! Everything it does goes through the [`CoreService`] queue.

use std::sync::Arc;

use async_trait::async_trait;
use grainkeeper_caps::{
    check_ongoing, AppObject, CapsError, Capability, NotificationHandle, TokenMinter,
};
use grainkeeper_core::{
    GrainId, MembraneRequirement, ObjectId, Owner, OwnerPattern, Secret, TokenPayload,
};

use crate::error::Result;
use crate::service::{into_caps_error, CoreService};

/// A grain's handle on the frontend.
#[derive(Clone)]
pub struct GrainCore {
    grain_id: GrainId,
    service: CoreService,
}

impl GrainCore {
    pub(crate) fn new(grain_id: GrainId, service: CoreService) -> Self {
        Self { grain_id, service }
    }

    pub fn grain_id(&self) -> &GrainId {
        &self.grain_id
    }

    fn own_tokens(&self) -> OwnerPattern {
        OwnerPattern::grain(self.grain_id.clone())
    }

    /// Restore a token this grain owns.
    pub async fn restore(&self, secret: &Secret) -> Result<Capability> {
        self.service.restore(secret.clone(), self.own_tokens()).await
    }

    /// Drop a token this grain owns.
    pub async fn drop(&self, secret: &Secret) -> Result<()> {
        self.service.drop(secret.clone(), self.own_tokens()).await
    }

    /// Mint a token for one of this grain's own objects.
    pub async fn make_token(
        &self,
        object_id: ObjectId,
        owner: Owner,
        requirements: Vec<MembraneRequirement>,
    ) -> Result<Secret> {
        let payload = TokenPayload::Object {
            grain_id: self.grain_id.clone(),
            object_id,
        };
        self.service.make_token(payload, owner, requirements).await
    }

    /// Mint a child of a token the grain was handed.
    pub async fn make_child_token(
        &self,
        parent: &Secret,
        owner: Owner,
        requirements: Vec<MembraneRequirement>,
    ) -> Result<Secret> {
        self.service
            .make_child_token(parent.clone(), owner, requirements)
            .await
    }

    /// Where this grain posts notifications to its owner.
    pub fn get_owner_notification_target(&self) -> OwnerNotificationTarget {
        OwnerNotificationTarget {
            grain_id: self.grain_id.clone(),
            service: self.service.clone(),
        }
    }
}

/// Minting on behalf of a grain's objects. The payload must name this grain.
#[async_trait]
impl TokenMinter for GrainCore {
    async fn make_token(
        &self,
        payload: TokenPayload,
        owner: Owner,
        requirements: Vec<MembraneRequirement>,
    ) -> std::result::Result<Secret, CapsError> {
        if payload.grain_id() != Some(&self.grain_id) {
            return Err(CapsError::Refused);
        }
        self.service
            .make_token(payload, owner, requirements)
            .await
            .map_err(into_caps_error)
    }
}

/// The owner of a grain, as seen by that grain.
pub struct OwnerNotificationTarget {
    grain_id: GrainId,
    service: CoreService,
}

impl OwnerNotificationTarget {
    /// Show an ongoing notification backed by `notification` until dismissed.
    ///
    /// Saving the wakelock calls back into the queue to mint its token, so
    /// it happens here before the notification itself is queued.
    pub async fn add_ongoing(
        &self,
        caption: impl Into<String>,
        notification: Arc<dyn AppObject>,
    ) -> Result<NotificationHandle> {
        check_ongoing(&self.grain_id, notification.as_ref())?;
        let wakelock = notification.save().await.map_err(CapsError::from)?;
        let id = self
            .service
            .register_ongoing(self.grain_id.clone(), caption.into(), wakelock)
            .await?;
        Ok(NotificationHandle::transient(Arc::new(self.service.clone()), id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Core, CoreConfig};
    use bytes::Bytes;
    use grainkeeper_caps::memory::{MemoryBackend, MemoryGrain};
    use grainkeeper_caps::HandleState;
    use grainkeeper_core::GrainRecord;
    use grainkeeper_store::MemoryStore;
    use std::sync::atomic::Ordering;

    async fn setup() -> (Arc<Core<MemoryStore>>, CoreService, Arc<MemoryGrain>) {
        let backend = MemoryBackend::new();
        let grain = backend.add_grain("g1");
        backend.add_grain("g2");
        let core = Core::new(MemoryStore::new(), backend, CoreConfig::default());
        core.create_grain(GrainRecord::new("g1", "alice")).await.unwrap();
        core.create_grain(GrainRecord::new("g2", "alice")).await.unwrap();
        let core = Arc::new(core);
        let (svc, _) = CoreService::spawn_shared(core.clone());
        (core, svc, grain)
    }

    #[tokio::test]
    async fn test_grain_cannot_use_other_grains_tokens() {
        let (_core, svc, _) = setup().await;
        let g1 = svc.grain("g1");
        let g2 = svc.grain("g2");

        let secret = g1
            .make_token(ObjectId::AppRef(Bytes::from_static(b"x")), Owner::grain("g1"), Vec::new())
            .await
            .unwrap();
        assert!(g2.restore(&secret).await.unwrap_err().is_refused());
        assert!(g1.restore(&secret).await.is_ok());

        // A foreign drop leaves the token in place.
        g2.drop(&secret).await.unwrap();
        assert!(g1.restore(&secret).await.is_ok());
    }

    #[tokio::test]
    async fn test_minter_rejects_foreign_payload() {
        let (_core, svc, _) = setup().await;
        let g1 = svc.grain("g1");
        let payload = TokenPayload::app_ref("g2".into(), Bytes::from_static(b"x"));
        let result = TokenMinter::make_token(&g1, payload, Owner::Frontend, Vec::new()).await;
        assert!(matches!(result, Err(CapsError::Refused)));
    }

    #[tokio::test]
    async fn test_owner_notification_target() {
        let (core, svc, grain) = setup().await;
        let g1 = svc.grain("g1");
        let ongoing = grain.new_ongoing(Arc::new(g1.clone()));

        let handle = g1
            .get_owner_notification_target()
            .add_ongoing("uploading", ongoing)
            .await
            .unwrap();
        assert_eq!(handle.state(), HandleState::Transient);

        let listed = core.notifications().notifications_for(&"alice".into()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].text, "uploading");

        handle.close().await.unwrap();
        core.refs().settle().await;
        assert!(core.notifications().notifications_for(&"alice".into()).await.unwrap().is_empty());
        assert_eq!(grain.stats().cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_add_ongoing_rejects_plain_objects() {
        let (core, svc, grain) = setup().await;
        let g1 = svc.grain("g1");
        let secret = g1
            .make_token(ObjectId::AppRef(Bytes::from_static(b"x")), Owner::grain("g1"), Vec::new())
            .await
            .unwrap();
        let Capability::Object(plain) = g1.restore(&secret).await.unwrap() else {
            panic!("expected an object");
        };

        let result = g1
            .get_owner_notification_target()
            .add_ongoing("uploading", plain)
            .await;
        assert!(result.unwrap_err().is_refused());
        assert!(core.notifications().notifications_for(&"alice".into()).await.unwrap().is_empty());
        assert_eq!(grain.held_wakelocks(), 0);
    }
}
