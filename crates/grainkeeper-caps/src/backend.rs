//! Seams to running grains.
//!
//! A grain's supervisor owns the live objects an app exports. The frontend
//! reaches it through a [`GrainBackend`], which starts grains on demand and
//! restarts them when their connection is lost. Implementations may speak
//! any RPC protocol; only the shapes below are needed here.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use grainkeeper_core::{GrainId, MembraneRequirement, ObjectId, Owner, Secret, TokenPayload};
use tracing::warn;

use crate::error::{CapsError, RpcError};

/// A live capability exported by a grain.
#[async_trait]
pub trait AppObject: Send + Sync + fmt::Debug {
    /// The id the supervisor restored this object from.
    fn object_id(&self) -> ObjectId;

    /// Persist the object, returning a secret that restores it later.
    async fn save(&self) -> Result<Secret, RpcError>;

    /// Cancel an ongoing notification.
    async fn cancel(&self) -> Result<(), RpcError>;
}

/// The per-grain process that hosts an app's objects.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Reconstitute an object the grain previously saved.
    async fn restore(
        &self,
        object_id: &ObjectId,
        requirements: &[MembraneRequirement],
    ) -> Result<Arc<dyn AppObject>, RpcError>;

    /// Tell the grain an object it saved will never be restored again.
    async fn drop_object(&self, object_id: &ObjectId) -> Result<(), RpcError>;
}

/// Access to running grains.
#[async_trait]
pub trait GrainBackend: Send + Sync {
    /// The supervisor of `grain_id`, starting the grain if needed.
    async fn supervisor(&self, grain_id: &GrainId) -> Result<Arc<dyn Supervisor>, RpcError>;

    /// Throw away the current connection so the next call starts afresh.
    async fn restart(&self, grain_id: &GrainId) -> Result<(), RpcError>;
}

/// The frontend side that grains call back into to mint tokens.
#[async_trait]
pub trait TokenMinter: Send + Sync {
    async fn make_token(
        &self,
        payload: TokenPayload,
        owner: Owner,
        requirements: Vec<MembraneRequirement>,
    ) -> Result<Secret, CapsError>;
}

/// Run `call` against the grain's supervisor, restarting and retrying on disconnect.
///
/// `attempts` counts the first call, so 2 means one retry. Any error other
/// than [`RpcError::Disconnected`] is returned immediately.
pub async fn use_grain<T, F, Fut>(
    backend: &dyn GrainBackend,
    grain_id: &GrainId,
    attempts: u32,
    call: F,
) -> Result<T, RpcError>
where
    F: Fn(Arc<dyn Supervisor>) -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let supervisor = backend.supervisor(grain_id).await?;
        match call(supervisor).await {
            Err(err) if err.is_disconnected() && attempt < attempts => {
                warn!(grain_id = %grain_id, attempt, "grain disconnected, restarting");
                backend.restart(grain_id).await?;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// In-memory grains for testing.
///
/// Grains accept any app ref, hand out wakelocks on request, and count the
/// calls made into them. Failures can be scripted per grain.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Call counts and scripted failures shared by a grain and its objects.
    #[derive(Debug, Default)]
    pub struct GrainStats {
        pub restores: AtomicUsize,
        pub restarts: AtomicUsize,
        pub cancels: AtomicUsize,
        pub releases: AtomicUsize,
        /// Upcoming supervisor calls that fail with a disconnect.
        pub disconnects_pending: AtomicU32,
        /// Upcoming cancels that fail with a disconnect.
        pub cancel_disconnects_pending: AtomicU32,
    }

    impl GrainStats {
        fn take_disconnect(counter: &AtomicU32) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    /// An in-memory grain.
    #[derive(Debug)]
    pub struct MemoryGrain {
        grain_id: GrainId,
        stats: Arc<GrainStats>,
        wakelocks: Mutex<HashMap<u32, Arc<MemoryObject>>>,
        next_wakelock: AtomicU32,
    }

    impl MemoryGrain {
        pub fn grain_id(&self) -> &GrainId {
            &self.grain_id
        }

        pub fn stats(&self) -> &GrainStats {
            &self.stats
        }

        /// Make the next `n` supervisor calls fail as if the grain restarted.
        pub fn disconnect_next(&self, n: u32) {
            self.stats.disconnects_pending.store(n, Ordering::SeqCst);
        }

        /// Make the next `n` cancels fail as if the grain shut down mid-call.
        pub fn disconnect_next_cancel(&self, n: u32) {
            self.stats.cancel_disconnects_pending.store(n, Ordering::SeqCst);
        }

        /// An app-held ongoing notification whose `save` mints through `minter`.
        pub fn new_ongoing(&self, minter: Arc<dyn TokenMinter>) -> Arc<dyn AppObject> {
            let id = self.next_wakelock.fetch_add(1, Ordering::SeqCst) + 1;
            let object = Arc::new(MemoryObject {
                grain_id: self.grain_id.clone(),
                object_id: ObjectId::WakeLockNotification(id),
                stats: self.stats.clone(),
                minter: Some(minter),
            });
            if let Ok(mut wakelocks) = self.wakelocks.lock() {
                wakelocks.insert(id, object.clone());
            }
            object
        }

        /// Wakelocks still held open.
        pub fn held_wakelocks(&self) -> usize {
            self.wakelocks.lock().map(|w| w.len()).unwrap_or(0)
        }

        fn check_connected(&self) -> Result<(), RpcError> {
            if GrainStats::take_disconnect(&self.stats.disconnects_pending) {
                return Err(RpcError::Disconnected(format!("grain {}", self.grain_id)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Supervisor for MemoryGrain {
        async fn restore(
            &self,
            object_id: &ObjectId,
            _requirements: &[MembraneRequirement],
        ) -> Result<Arc<dyn AppObject>, RpcError> {
            self.check_connected()?;
            self.stats.restores.fetch_add(1, Ordering::SeqCst);
            match object_id {
                ObjectId::AppRef(_) => Ok(Arc::new(MemoryObject {
                    grain_id: self.grain_id.clone(),
                    object_id: object_id.clone(),
                    stats: self.stats.clone(),
                    minter: None,
                })),
                ObjectId::WakeLockNotification(id) => {
                    let wakelocks = self
                        .wakelocks
                        .lock()
                        .map_err(|_| RpcError::Failed("poisoned".into()))?;
                    match wakelocks.get(id) {
                        Some(object) => Ok(object.clone() as Arc<dyn AppObject>),
                        None => Err(RpcError::Failed(format!("no wakelock {}", id))),
                    }
                }
            }
        }

        async fn drop_object(&self, object_id: &ObjectId) -> Result<(), RpcError> {
            self.check_connected()?;
            if let ObjectId::WakeLockNotification(id) = object_id {
                let mut wakelocks = self
                    .wakelocks
                    .lock()
                    .map_err(|_| RpcError::Failed("poisoned".into()))?;
                if wakelocks.remove(id).is_some() {
                    self.stats.releases.fetch_add(1, Ordering::SeqCst);
                }
            }
            Ok(())
        }
    }

    /// An object living in a [`MemoryGrain`].
    pub struct MemoryObject {
        grain_id: GrainId,
        object_id: ObjectId,
        stats: Arc<GrainStats>,
        minter: Option<Arc<dyn TokenMinter>>,
    }

    impl fmt::Debug for MemoryObject {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("MemoryObject")
                .field("grain_id", &self.grain_id)
                .field("object_id", &self.object_id)
                .finish()
        }
    }

    #[async_trait]
    impl AppObject for MemoryObject {
        fn object_id(&self) -> ObjectId {
            self.object_id.clone()
        }

        async fn save(&self) -> Result<Secret, RpcError> {
            let minter = self
                .minter
                .as_ref()
                .ok_or_else(|| RpcError::Failed("object is not persistent".into()))?;
            minter
                .make_token(
                    TokenPayload::Object {
                        grain_id: self.grain_id.clone(),
                        object_id: self.object_id.clone(),
                    },
                    Owner::Frontend,
                    Vec::new(),
                )
                .await
                .map_err(|e| RpcError::Failed(e.to_string()))
        }

        async fn cancel(&self) -> Result<(), RpcError> {
            if GrainStats::take_disconnect(&self.stats.cancel_disconnects_pending) {
                return Err(RpcError::Disconnected("grain shut down".into()));
            }
            self.stats.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// A set of in-memory grains.
    #[derive(Default)]
    pub struct MemoryBackend {
        grains: Mutex<HashMap<GrainId, Arc<MemoryGrain>>>,
    }

    impl MemoryBackend {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Register a grain, returning it for scripting and inspection.
        pub fn add_grain(&self, grain_id: impl Into<GrainId>) -> Arc<MemoryGrain> {
            let grain_id = grain_id.into();
            let grain = Arc::new(MemoryGrain {
                grain_id: grain_id.clone(),
                stats: Arc::new(GrainStats::default()),
                wakelocks: Mutex::new(HashMap::new()),
                next_wakelock: AtomicU32::new(0),
            });
            if let Ok(mut grains) = self.grains.lock() {
                grains.insert(grain_id, grain.clone());
            }
            grain
        }

        fn get(&self, grain_id: &GrainId) -> Result<Arc<MemoryGrain>, RpcError> {
            self.grains
                .lock()
                .map_err(|_| RpcError::Failed("poisoned".into()))?
                .get(grain_id)
                .cloned()
                .ok_or_else(|| RpcError::Failed(format!("no such grain {}", grain_id)))
        }
    }

    #[async_trait]
    impl GrainBackend for MemoryBackend {
        async fn supervisor(&self, grain_id: &GrainId) -> Result<Arc<dyn Supervisor>, RpcError> {
            Ok(self.get(grain_id)? as Arc<dyn Supervisor>)
        }

        async fn restart(&self, grain_id: &GrainId) -> Result<(), RpcError> {
            self.get(grain_id)?.stats.restarts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
