//! The serialized request queue in front of a [`Core`].
//!
//! Every request, from the sharing UI, from a grain or from a notification
//! handle, is sent to a single actor and handled one at a time, so graph and
//! token mutations never interleave. The one exception is the grain call at
//! the end of a restore, which may wait for the grain to restart. The token
//! is resolved on the queue, in order with every other request, and only
//! that call runs off it.

use std::sync::Arc;

use async_trait::async_trait;
use grainkeeper_caps::{CapsError, Capability, HandleSink, NotificationHandle, Redeemed};
use grainkeeper_core::{
    EdgeId, GrainId, MembraneRequirement, NotificationId, Owner, OwnerPattern, PermissionSet,
    PrincipalId, Secret, SessionId, SessionRecord, ShareEdge, TokenPayload, ViewInfo,
};
use grainkeeper_store::Store;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::Core;
use crate::error::{GrainkeeperError, Result};
use crate::grain::GrainCore;

type Reply<T> = oneshot::Sender<Result<T>>;

pub enum ToCoreActor {
    GrainPermissions {
        grain_id: GrainId,
        principal: PrincipalId,
        view: ViewInfo,
        reply: Reply<PermissionSet>,
    },
    MayOpenGrain {
        grain_id: GrainId,
        principal: PrincipalId,
        reply: Reply<bool>,
    },
    DefaultSharedPermissions {
        grain_id: GrainId,
        principal: PrincipalId,
        view: ViewInfo,
        reply: Reply<PermissionSet>,
    },
    Share {
        edge: ShareEdge,
        reply: Reply<EdgeId>,
    },
    SetEdgeActive {
        edge_id: EdgeId,
        active: bool,
        reply: Reply<Vec<SessionId>>,
    },
    RemoveEdge {
        edge_id: EdgeId,
        reply: Reply<Vec<SessionId>>,
    },
    OpenSession {
        grain_id: GrainId,
        principal: PrincipalId,
        reply: Reply<SessionRecord>,
    },
    MakeToken {
        payload: TokenPayload,
        owner: Owner,
        requirements: Vec<MembraneRequirement>,
        reply: Reply<Secret>,
    },
    MakeChildToken {
        parent: Secret,
        owner: Owner,
        requirements: Vec<MembraneRequirement>,
        reply: Reply<Secret>,
    },
    Restore {
        secret: Secret,
        pattern: OwnerPattern,
        reply: Reply<Capability>,
    },
    Drop {
        secret: Secret,
        pattern: OwnerPattern,
        reply: Reply<()>,
    },
    RegisterOngoing {
        grain_id: GrainId,
        text: String,
        wakelock: Secret,
        reply: Reply<NotificationId>,
    },
    SaveNotification {
        id: NotificationId,
        owner: Owner,
        reply: Reply<Secret>,
    },
    CloseNotification {
        id: NotificationId,
        reply: Reply<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// The actor owning a [`Core`].
pub struct CoreActor<S: Store + 'static> {
    core: Arc<Core<S>>,
    inbox: mpsc::Receiver<ToCoreActor>,
    /// For handing out handles that report back here. Weak so the actor
    /// still stops once every [`CoreService`] is gone.
    outbox: mpsc::WeakSender<ToCoreActor>,
}

impl<S: Store + 'static> CoreActor<S> {
    pub async fn run(mut self) {
        while let Some(msg) = self.inbox.recv().await {
            if let ToCoreActor::Shutdown { reply } = msg {
                debug!("core actor shutting down");
                let _ = reply.send(());
                break;
            }
            self.on_actor_message(msg).await;
        }
        // Let background cancels finish before the core goes away.
        self.core.refs().settle().await;
    }

    async fn on_actor_message(&self, msg: ToCoreActor) {
        let core = &self.core;
        match msg {
            ToCoreActor::GrainPermissions {
                grain_id,
                principal,
                view,
                reply,
            } => {
                let _ = reply.send(core.grain_permissions(&grain_id, &principal, &view).await);
            }
            ToCoreActor::MayOpenGrain {
                grain_id,
                principal,
                reply,
            } => {
                let _ = reply.send(core.may_open_grain(&grain_id, &principal).await);
            }
            ToCoreActor::DefaultSharedPermissions {
                grain_id,
                principal,
                view,
                reply,
            } => {
                let result = core
                    .default_shared_grain_permissions(&grain_id, &principal, &view)
                    .await;
                let _ = reply.send(result);
            }
            ToCoreActor::Share { edge, reply } => {
                let _ = reply.send(core.share(edge).await);
            }
            ToCoreActor::SetEdgeActive {
                edge_id,
                active,
                reply,
            } => {
                let _ = reply.send(core.set_edge_active(&edge_id, active).await);
            }
            ToCoreActor::RemoveEdge { edge_id, reply } => {
                let _ = reply.send(core.remove_edge(&edge_id).await);
            }
            ToCoreActor::OpenSession {
                grain_id,
                principal,
                reply,
            } => {
                let _ = reply.send(core.open_session(&grain_id, &principal).await);
            }
            ToCoreActor::MakeToken {
                payload,
                owner,
                requirements,
                reply,
            } => {
                let result = core
                    .refs()
                    .make_token_with(payload, owner, requirements)
                    .await
                    .map_err(GrainkeeperError::from);
                let _ = reply.send(result);
            }
            ToCoreActor::MakeChildToken {
                parent,
                owner,
                requirements,
                reply,
            } => {
                let result = core
                    .refs()
                    .make_child_token(&parent, owner, requirements)
                    .await
                    .map_err(GrainkeeperError::from);
                let _ = reply.send(result);
            }
            ToCoreActor::Restore {
                secret,
                pattern,
                reply,
            } => match core.refs().redeem(&secret, &pattern).await {
                Ok(Redeemed::Notification(id)) => {
                    let result = self.service().map(|service| {
                        Capability::Notification(NotificationHandle::saved(Arc::new(service), id))
                    });
                    let _ = reply.send(result);
                }
                Ok(Redeemed::Object(pending)) => {
                    // May wait on a grain restart, so it must not hold up the queue.
                    tokio::spawn(async move {
                        let result = pending
                            .run()
                            .await
                            .map(Capability::Object)
                            .map_err(GrainkeeperError::from);
                        let _ = reply.send(result);
                    });
                }
                Err(err) => {
                    let _ = reply.send(Err(err.into()));
                }
            },
            ToCoreActor::Drop {
                secret,
                pattern,
                reply,
            } => {
                let result = core
                    .refs()
                    .drop(&secret, &pattern)
                    .await
                    .map_err(GrainkeeperError::from);
                let _ = reply.send(result);
            }
            ToCoreActor::RegisterOngoing {
                grain_id,
                text,
                wakelock,
                reply,
            } => {
                let result = core
                    .notifications()
                    .register_ongoing(&grain_id, text, wakelock)
                    .await
                    .map_err(GrainkeeperError::from);
                let _ = reply.send(result);
            }
            ToCoreActor::SaveNotification { id, owner, reply } => {
                let result = core
                    .refs()
                    .save_notification(&id, owner)
                    .await
                    .map_err(GrainkeeperError::from);
                let _ = reply.send(result);
            }
            ToCoreActor::CloseNotification { id, reply } => {
                let result = core
                    .refs()
                    .dismiss_notification(&id)
                    .await
                    .map(|_| ())
                    .map_err(GrainkeeperError::from);
                let _ = reply.send(result);
            }
            ToCoreActor::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn service(&self) -> Result<CoreService> {
        self.outbox
            .upgrade()
            .map(|tx| CoreService { tx })
            .ok_or(GrainkeeperError::ServiceStopped)
    }
}

/// A cloneable handle that submits requests to the core actor.
#[derive(Clone)]
pub struct CoreService {
    tx: mpsc::Sender<ToCoreActor>,
}

impl CoreService {
    /// Spawn the actor on the current runtime.
    pub fn spawn<S: Store + 'static>(core: Core<S>) -> (Self, JoinHandle<()>) {
        Self::spawn_shared(Arc::new(core))
    }

    /// Spawn the actor over a core the caller keeps a reference to.
    pub fn spawn_shared<S: Store + 'static>(core: Arc<Core<S>>) -> (Self, JoinHandle<()>) {
        let depth = core.config().queue_depth.max(1);
        let (tx, inbox) = mpsc::channel(depth);
        let actor = CoreActor {
            core,
            inbox,
            outbox: tx.downgrade(),
        };
        let handle = tokio::spawn(actor.run());
        (Self { tx }, handle)
    }

    async fn request<T>(&self, msg: impl FnOnce(Reply<T>) -> ToCoreActor) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(msg(reply))
            .await
            .map_err(|_| GrainkeeperError::ServiceStopped)?;
        rx.await.map_err(|_| GrainkeeperError::ServiceStopped)?
    }

    /// The core object `grain_id` sees over RPC.
    pub fn grain(&self, grain_id: impl Into<GrainId>) -> GrainCore {
        GrainCore::new(grain_id.into(), self.clone())
    }

    pub async fn grain_permissions(
        &self,
        grain_id: GrainId,
        principal: PrincipalId,
        view: ViewInfo,
    ) -> Result<PermissionSet> {
        self.request(|reply| ToCoreActor::GrainPermissions {
            grain_id,
            principal,
            view,
            reply,
        })
        .await
    }

    pub async fn may_open_grain(&self, grain_id: GrainId, principal: PrincipalId) -> Result<bool> {
        self.request(|reply| ToCoreActor::MayOpenGrain {
            grain_id,
            principal,
            reply,
        })
        .await
    }

    pub async fn default_shared_grain_permissions(
        &self,
        grain_id: GrainId,
        principal: PrincipalId,
        view: ViewInfo,
    ) -> Result<PermissionSet> {
        self.request(|reply| ToCoreActor::DefaultSharedPermissions {
            grain_id,
            principal,
            view,
            reply,
        })
        .await
    }

    pub async fn share(&self, edge: ShareEdge) -> Result<EdgeId> {
        self.request(|reply| ToCoreActor::Share { edge, reply }).await
    }

    /// Sessions invalidated by the change are gone by the time this returns.
    pub async fn set_edge_active(&self, edge_id: EdgeId, active: bool) -> Result<Vec<SessionId>> {
        self.request(|reply| ToCoreActor::SetEdgeActive {
            edge_id,
            active,
            reply,
        })
        .await
    }

    pub async fn remove_edge(&self, edge_id: EdgeId) -> Result<Vec<SessionId>> {
        self.request(|reply| ToCoreActor::RemoveEdge { edge_id, reply })
            .await
    }

    pub async fn open_session(
        &self,
        grain_id: GrainId,
        principal: PrincipalId,
    ) -> Result<SessionRecord> {
        self.request(|reply| ToCoreActor::OpenSession {
            grain_id,
            principal,
            reply,
        })
        .await
    }

    pub async fn make_token(
        &self,
        payload: TokenPayload,
        owner: Owner,
        requirements: Vec<MembraneRequirement>,
    ) -> Result<Secret> {
        self.request(|reply| ToCoreActor::MakeToken {
            payload,
            owner,
            requirements,
            reply,
        })
        .await
    }

    pub async fn make_child_token(
        &self,
        parent: Secret,
        owner: Owner,
        requirements: Vec<MembraneRequirement>,
    ) -> Result<Secret> {
        self.request(|reply| ToCoreActor::MakeChildToken {
            parent,
            owner,
            requirements,
            reply,
        })
        .await
    }

    /// A restored notification handle sends its own requests back through
    /// this queue.
    pub async fn restore(&self, secret: Secret, pattern: OwnerPattern) -> Result<Capability> {
        self.request(|reply| ToCoreActor::Restore {
            secret,
            pattern,
            reply,
        })
        .await
    }

    pub async fn drop(&self, secret: Secret, pattern: OwnerPattern) -> Result<()> {
        self.request(|reply| ToCoreActor::Drop {
            secret,
            pattern,
            reply,
        })
        .await
    }

    /// Store an ongoing notification whose wakelock token was already minted.
    pub async fn register_ongoing(
        &self,
        grain_id: GrainId,
        text: String,
        wakelock: Secret,
    ) -> Result<NotificationId> {
        self.request(|reply| ToCoreActor::RegisterOngoing {
            grain_id,
            text,
            wakelock,
            reply,
        })
        .await
    }

    /// Stop the actor after the requests already queued.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(ToCoreActor::Shutdown { reply }).await.is_err() {
            warn!("core actor already stopped");
            return;
        }
        let _ = rx.await;
    }
}

#[async_trait]
impl HandleSink for CoreService {
    async fn save_notification(
        &self,
        id: NotificationId,
        owner: Owner,
    ) -> std::result::Result<Secret, CapsError> {
        self.request(|reply| ToCoreActor::SaveNotification { id, owner, reply })
            .await
            .map_err(into_caps_error)
    }

    async fn close_notification(&self, id: NotificationId) -> std::result::Result<(), CapsError> {
        self.request(|reply| ToCoreActor::CloseNotification { id, reply })
            .await
            .map_err(into_caps_error)
    }
}

/// Narrow an error for callers that speak the capability protocol.
pub(crate) fn into_caps_error(err: GrainkeeperError) -> CapsError {
    match err {
        GrainkeeperError::Caps(err) => err,
        GrainkeeperError::Store(err) => CapsError::Store(err),
        GrainkeeperError::ServiceStopped => CapsError::QueueClosed,
        other => {
            debug!(error = %other, "refusing capability request");
            CapsError::Refused
        }
    }
}
