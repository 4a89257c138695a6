//! Notification handles and ongoing notifications.
//!
//! An ongoing notification is backed by a wakelock that an app holds open
//! in its grain. The frontend keeps a token for that wakelock and hands the
//! app a [`NotificationHandle`] instead. A handle starts out transient:
//! closing it dismisses the notification. Saving it mints a sturdy ref and
//! moves it to the saved state, after which dismissal happens only once the
//! last such ref is dropped.
//!
//! Handles do not touch the store themselves. They send their save and
//! close requests to a [`HandleSink`], which is the [`SturdyRefStore`] when
//! used directly, or whatever queue serializes requests in front of it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use grainkeeper_core::{
    GrainId, GrainRecord, NotificationId, NotificationRecord, ObjectId, Owner, OwnerPattern,
    PrincipalId, Secret, TokenPayload,
};
use grainkeeper_store::{Store, StoreExt};
use tracing::{debug, info, warn};

use crate::backend::AppObject;
use crate::error::{CapsError, Refusal, Result};
use crate::sturdy::{refuse, SturdyRefStore};

/// Whether a sturdy ref stands behind a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Only this in-memory handle refers to the notification.
    Transient,
    /// At least one sturdy ref was minted for it.
    Saved,
}

/// Receives the requests of [`NotificationHandle`]s.
#[async_trait]
pub trait HandleSink: Send + Sync {
    /// Mint a handle token on `id` for `owner`. Refused once the notification is gone.
    async fn save_notification(&self, id: NotificationId, owner: Owner) -> Result<Secret>;

    /// Dismiss `id` because its transient handle was closed.
    async fn close_notification(&self, id: NotificationId) -> Result<()>;
}

#[async_trait]
impl<S: Store + 'static> HandleSink for SturdyRefStore<S> {
    async fn save_notification(&self, id: NotificationId, owner: Owner) -> Result<Secret> {
        SturdyRefStore::save_notification(self, &id, owner).await
    }

    async fn close_notification(&self, id: NotificationId) -> Result<()> {
        self.dismiss_notification(&id).await?;
        Ok(())
    }
}

/// A handle on a stored notification.
pub struct NotificationHandle {
    sink: Arc<dyn HandleSink>,
    id: NotificationId,
    state: HandleState,
}

impl NotificationHandle {
    /// A handle nothing else refers to yet.
    pub fn transient(sink: Arc<dyn HandleSink>, id: NotificationId) -> Self {
        Self {
            sink,
            id,
            state: HandleState::Transient,
        }
    }

    /// A handle restored from a sturdy ref.
    pub fn saved(sink: Arc<dyn HandleSink>, id: NotificationId) -> Self {
        Self {
            sink,
            id,
            state: HandleState::Saved,
        }
    }

    pub fn id(&self) -> &NotificationId {
        &self.id
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Mint a sturdy ref on this notification for `owner`.
    ///
    /// Every call mints a new, independently droppable ref.
    pub async fn save(&mut self, owner: Owner) -> Result<Secret> {
        let secret = self.sink.save_notification(self.id.clone(), owner).await?;
        self.state = HandleState::Saved;
        Ok(secret)
    }

    /// Release the handle. A transient handle dismisses its notification.
    pub async fn close(self) -> Result<()> {
        match self.state {
            HandleState::Transient => {
                self.sink.close_notification(self.id.clone()).await?;
            }
            HandleState::Saved => {
                debug!(notification = %self.id, "closed saved notification handle");
            }
        }
        Ok(())
    }
}

impl fmt::Debug for NotificationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationHandle")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

impl<S: Store + 'static> SturdyRefStore<S> {
    /// Remove a notification. If it was ongoing, cancel it in the background.
    ///
    /// Returns whether the notification existed.
    pub async fn dismiss_notification(&self, id: &NotificationId) -> Result<bool> {
        let Some(notification) = self.inner.store.take_notification(id).await? else {
            debug!(notification = %id, "dismissal of unknown notification ignored");
            return Ok(false);
        };
        info!(
            notification = %id,
            ongoing = notification.is_ongoing(),
            "dismissed notification"
        );

        if let Some(wakelock) = notification.ongoing {
            let refs = self.clone();
            let id = id.clone();
            self.inner.tasks.spawn(async move {
                if let Err(err) = refs.cancel_ongoing(&wakelock).await {
                    warn!(notification = %id, error = %err, "failed to cancel ongoing notification");
                }
            });
        }
        Ok(true)
    }

    /// Restore the app's notification object from its wakelock, release the
    /// wakelock, then cancel the object.
    async fn cancel_ongoing(&self, wakelock: &Secret) -> Result<()> {
        let hash = wakelock.hash();
        let Some(record) = self.load(&hash).await? else {
            return Ok(());
        };
        if !OwnerPattern::Frontend.matches(&record.owner) {
            return Err(refuse(&hash, Refusal::OwnerMismatch));
        }
        let TokenPayload::Object {
            grain_id,
            object_id,
        } = record.payload
        else {
            return Err(refuse(&hash, Refusal::NotFound));
        };

        // A grain that is gone took its notification with it.
        if self.inner.store.live_grain(&grain_id).await?.is_none() {
            self.inner.store.delete_token(&hash).await?;
            return Ok(());
        }

        let object = self
            .restore_object(&hash, &grain_id, &object_id, &record.requirements)
            .await?;
        self.release_wakelock(&hash, &grain_id, &object_id).await?;

        match object.cancel().await {
            Ok(()) => {
                info!(grain_id = %grain_id, "cancelled ongoing notification");
                Ok(())
            }
            // Cancelling may shut the grain down before it answers.
            Err(err) if err.is_disconnected() => {
                warn!(grain_id = %grain_id, "grain disconnected during cancel, treating as cancelled");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Notification entry points for grains and their owners.
pub struct NotificationCenter<S: Store + 'static> {
    refs: SturdyRefStore<S>,
}

impl<S: Store + 'static> Clone for NotificationCenter<S> {
    fn clone(&self) -> Self {
        Self {
            refs: self.refs.clone(),
        }
    }
}

impl<S: Store + 'static> NotificationCenter<S> {
    pub fn new(refs: SturdyRefStore<S>) -> Self {
        Self { refs }
    }

    pub fn refs(&self) -> &SturdyRefStore<S> {
        &self.refs
    }

    /// Post a plain notification to the owner of `grain_id`.
    pub async fn notify(
        &self,
        grain_id: &GrainId,
        text: impl Into<String>,
    ) -> Result<NotificationId> {
        let grain = self.live_grain(grain_id).await?;
        let record = NotificationRecord::new(grain.id, grain.owner, text);
        self.refs.store().insert_notification(&record).await?;
        info!(notification = %record.id, grain_id = %grain_id, "posted notification");
        Ok(record.id)
    }

    /// Register an app-held ongoing notification for the owner of `grain_id`.
    ///
    /// The live `notification` is saved right away so the wakelock survives
    /// the connection it arrived on. The returned handle is transient.
    pub async fn add_ongoing(
        &self,
        grain_id: &GrainId,
        text: impl Into<String>,
        notification: Arc<dyn AppObject>,
    ) -> Result<NotificationHandle> {
        self.live_grain(grain_id).await?;
        check_ongoing(grain_id, notification.as_ref())?;

        let wakelock = notification.save().await?;
        let id = self.register_ongoing(grain_id, text, wakelock).await?;
        Ok(NotificationHandle::transient(self.refs.sink(), id))
    }

    /// Store an ongoing notification whose wakelock the app already saved.
    ///
    /// `wakelock` must be a frontend-owned token on one of the grain's
    /// wakelocks. If the grain is gone by now the token is forgotten.
    pub async fn register_ongoing(
        &self,
        grain_id: &GrainId,
        text: impl Into<String>,
        wakelock: Secret,
    ) -> Result<NotificationId> {
        let hash = wakelock.hash();
        let Some(grain) = self.refs.store().live_grain(grain_id).await? else {
            self.refs.store().delete_token(&hash).await?;
            return Err(refuse(&hash, Refusal::GrainUnavailable));
        };
        let record = self
            .refs
            .load(&hash)
            .await?
            .ok_or_else(|| refuse(&hash, Refusal::NotFound))?;
        let is_wakelock = matches!(
            &record.payload,
            TokenPayload::Object {
                grain_id: owner_grain,
                object_id: ObjectId::WakeLockNotification(_),
            } if owner_grain == grain_id
        );
        if !is_wakelock || !OwnerPattern::Frontend.matches(&record.owner) {
            return Err(refuse(&hash, Refusal::OwnerMismatch));
        }

        let record = NotificationRecord::new(grain.id, grain.owner, text).with_ongoing(wakelock);
        self.refs.store().insert_notification(&record).await?;

        info!(notification = %record.id, grain_id = %grain_id, "added ongoing notification");
        Ok(record.id)
    }

    /// Dismiss a notification regardless of who it belongs to.
    pub async fn dismiss(&self, id: &NotificationId) -> Result<bool> {
        self.refs.dismiss_notification(id).await
    }

    /// Dismiss a notification on behalf of `account`, which must own it.
    pub async fn dismiss_for(&self, id: &NotificationId, account: &PrincipalId) -> Result<()> {
        let Some(notification) = self.refs.store().get_notification(id).await? else {
            debug!(notification = %id, reason = ?Refusal::NotFound, "dismissal refused");
            return Err(CapsError::Refused);
        };
        if notification.account != *account {
            debug!(notification = %id, reason = ?Refusal::WrongAccount, "dismissal refused");
            return Err(CapsError::Refused);
        }
        self.refs.dismiss_notification(id).await?;
        Ok(())
    }

    /// Notifications of `account`, newest first.
    pub async fn notifications_for(&self, account: &PrincipalId) -> Result<Vec<NotificationRecord>> {
        Ok(self.refs.store().notifications_for(account).await?)
    }

    /// Mark every notification of `account` read.
    pub async fn mark_all_read(&self, account: &PrincipalId) -> Result<usize> {
        Ok(self.refs.store().mark_notifications_read(account).await?)
    }

    async fn live_grain(&self, grain_id: &GrainId) -> Result<GrainRecord> {
        match self.refs.store().live_grain(grain_id).await? {
            Some(grain) => Ok(grain),
            None => {
                debug!(grain_id = %grain_id, reason = ?Refusal::GrainUnavailable, "notification refused");
                Err(CapsError::Refused)
            }
        }
    }
}

/// Refuse anything but a wakelock notification as an ongoing notification.
pub fn check_ongoing(grain_id: &GrainId, notification: &dyn AppObject) -> Result<()> {
    if !matches!(notification.object_id(), ObjectId::WakeLockNotification(_)) {
        debug!(grain_id = %grain_id, "ongoing notification is not a wakelock");
        return Err(CapsError::Refused);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryGrain};
    use crate::config::CapsConfig;
    use grainkeeper_store::MemoryStore;
    use std::sync::atomic::Ordering;

    struct Fixture {
        center: NotificationCenter<MemoryStore>,
        refs: SturdyRefStore<MemoryStore>,
        store: Arc<MemoryStore>,
        grain: Arc<MemoryGrain>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.put_grain(&GrainRecord::new("g1", "alice")).await.unwrap();
        let backend = MemoryBackend::new();
        let grain = backend.add_grain("g1");
        let refs = SturdyRefStore::new(store.clone(), backend, CapsConfig::default());
        let center = NotificationCenter::new(refs.clone());
        Fixture {
            center,
            refs,
            store,
            grain,
        }
    }

    impl Fixture {
        async fn add_ongoing(&self) -> NotificationHandle {
            let ongoing = self.grain.new_ongoing(Arc::new(self.refs.clone()));
            self.center
                .add_ongoing(&"g1".into(), "syncing", ongoing)
                .await
                .unwrap()
        }

        fn cancels(&self) -> usize {
            self.grain.stats().cancels.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_add_ongoing_stores_wakelock() {
        let f = fixture().await;
        let handle = f.add_ongoing().await;
        assert_eq!(handle.state(), HandleState::Transient);

        let record = f.store.get_notification(handle.id()).await.unwrap().unwrap();
        assert_eq!(record.account, PrincipalId::from("alice"));
        assert!(record.is_unread);
        let wakelock = record.ongoing.unwrap();
        let token = f.store.get_token(&wakelock.hash()).await.unwrap().unwrap();
        assert_eq!(token.owner, Owner::Frontend);
        assert_eq!(f.grain.held_wakelocks(), 1);
    }

    #[tokio::test]
    async fn test_add_ongoing_needs_live_grain() {
        let f = fixture().await;
        f.store.set_grain_trashed(&"g1".into(), true).await.unwrap();
        let ongoing = f.grain.new_ongoing(Arc::new(f.refs.clone()));
        let result = f.center.add_ongoing(&"g1".into(), "syncing", ongoing).await;
        assert!(matches!(result, Err(CapsError::Refused)));
    }

    #[tokio::test]
    async fn test_close_transient_dismisses_and_cancels() {
        let f = fixture().await;
        let handle = f.add_ongoing().await;
        let id = handle.id().clone();
        handle.close().await.unwrap();

        assert!(f.store.get_notification(&id).await.unwrap().is_none());
        f.refs.settle().await;
        assert_eq!(f.cancels(), 1);
        assert_eq!(f.grain.held_wakelocks(), 0);
        assert_eq!(f.grain.stats().releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_saved_is_noop() {
        let f = fixture().await;
        let mut handle = f.add_ongoing().await;
        let id = handle.id().clone();
        handle.save(Owner::grain("g1")).await.unwrap();
        assert_eq!(handle.state(), HandleState::Saved);
        handle.close().await.unwrap();

        f.refs.settle().await;
        assert!(f.store.get_notification(&id).await.unwrap().is_some());
        assert_eq!(f.cancels(), 0);
    }

    #[tokio::test]
    async fn test_last_drop_dismisses_once() {
        let f = fixture().await;
        let mut handle = f.add_ongoing().await;
        let id = handle.id().clone();
        let first = handle.save(Owner::grain("g1")).await.unwrap();

        let restored = f
            .refs
            .restore(&first, &OwnerPattern::grain("g1"))
            .await
            .unwrap();
        let mut restored = restored.into_notification().unwrap();
        assert_eq!(restored.state(), HandleState::Saved);
        let second = restored.save(Owner::grain("g1")).await.unwrap();
        assert_ne!(first, second);

        f.refs.drop(&first, &OwnerPattern::grain("g1")).await.unwrap();
        f.refs.settle().await;
        assert!(f.store.get_notification(&id).await.unwrap().is_some());
        assert_eq!(f.cancels(), 0);

        f.refs.drop(&second, &OwnerPattern::grain("g1")).await.unwrap();
        f.refs.drop(&second, &OwnerPattern::grain("g1")).await.unwrap();
        f.refs.settle().await;
        assert!(f.store.get_notification(&id).await.unwrap().is_none());
        assert_eq!(f.cancels(), 1);
        assert_eq!(f.grain.held_wakelocks(), 0);
    }

    #[tokio::test]
    async fn test_child_of_handle_keeps_notification() {
        let f = fixture().await;
        let mut handle = f.add_ongoing().await;
        let id = handle.id().clone();
        let parent = handle.save(Owner::grain("g1")).await.unwrap();

        let child = f
            .refs
            .make_child_token(&parent, Owner::user("bob"), vec![])
            .await
            .unwrap();
        f.refs.drop(&parent, &OwnerPattern::grain("g1")).await.unwrap();
        f.refs.settle().await;
        assert!(f.store.get_notification(&id).await.unwrap().is_some());
        assert_eq!(f.cancels(), 0);

        let restored = f.refs.restore(&child, &OwnerPattern::user("bob")).await.unwrap();
        assert_eq!(restored.into_notification().unwrap().id(), &id);

        f.refs.drop(&child, &OwnerPattern::user("bob")).await.unwrap();
        f.refs.settle().await;
        assert!(f.store.get_notification(&id).await.unwrap().is_none());
        assert_eq!(f.cancels(), 1);
    }

    #[tokio::test]
    async fn test_save_after_dismissal_is_refused() {
        let f = fixture().await;
        let mut handle = f.add_ongoing().await;
        let id = handle.id().clone();
        let first = handle.save(Owner::grain("g1")).await.unwrap();

        f.refs.drop(&first, &OwnerPattern::grain("g1")).await.unwrap();
        f.refs.settle().await;
        assert!(f.store.get_notification(&id).await.unwrap().is_none());

        let result = handle.save(Owner::grain("g1")).await;
        assert!(matches!(result, Err(CapsError::Refused)));
        assert_eq!(f.store.count_notification_tokens(&id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_register_ongoing_needs_frontend_wakelock() {
        let f = fixture().await;
        let app_ref = f
            .refs
            .make_token(TokenPayload::app_ref("g1".into(), &b"doc"[..]), Owner::Frontend)
            .await
            .unwrap();
        let result = f.center.register_ongoing(&"g1".into(), "x", app_ref).await;
        assert!(matches!(result, Err(CapsError::Refused)));

        let ongoing = f.grain.new_ongoing(Arc::new(f.refs.clone()));
        let wakelock = ongoing.save().await.unwrap();
        f.store.set_grain_trashed(&"g1".into(), true).await.unwrap();
        let result = f.center.register_ongoing(&"g1".into(), "x", wakelock.clone()).await;
        assert!(matches!(result, Err(CapsError::Refused)));
        assert!(f.store.get_token(&wakelock.hash()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_during_cancel_is_swallowed() {
        let f = fixture().await;
        let handle = f.add_ongoing().await;
        let record = f.store.get_notification(handle.id()).await.unwrap().unwrap();
        let wakelock = record.ongoing.unwrap();
        f.grain.disconnect_next_cancel(1);

        handle.close().await.unwrap();
        f.refs.settle().await;
        assert_eq!(f.cancels(), 0);
        assert_eq!(f.grain.held_wakelocks(), 0);
        assert!(f.store.get_token(&wakelock.hash()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dismiss_for_checks_account() {
        let f = fixture().await;
        let id = f.center.notify(&"g1".into(), "hello").await.unwrap();

        let result = f.center.dismiss_for(&id, &"mallory".into()).await;
        assert!(matches!(result, Err(CapsError::Refused)));
        assert!(f.store.get_notification(&id).await.unwrap().is_some());

        f.center.dismiss_for(&id, &"alice".into()).await.unwrap();
        assert!(f.store.get_notification(&id).await.unwrap().is_none());
        let result = f.center.dismiss_for(&id, &"alice".into()).await;
        assert!(matches!(result, Err(CapsError::Refused)));
    }

    #[tokio::test]
    async fn test_mark_all_read() {
        let f = fixture().await;
        f.center.notify(&"g1".into(), "one").await.unwrap();
        f.center.notify(&"g1".into(), "two").await.unwrap();

        assert_eq!(f.center.mark_all_read(&"alice".into()).await.unwrap(), 2);
        let all = f.center.notifications_for(&"alice".into()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|n| !n.is_unread));
    }
}
