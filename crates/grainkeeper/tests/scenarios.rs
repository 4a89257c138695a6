//! End-to-end sharing, sturdy-ref and notification scenarios.
//!
//! Each scenario runs against the in-memory store; the sturdy-ref and
//! notification scenarios also run against a file-backed SQLite store.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use grainkeeper::caps::memory::{MemoryBackend, MemoryGrain};
use grainkeeper::caps::CapsError;
use grainkeeper::core::{GrainRecord, ObjectId, RoleAssignment, RoleDef, TokenPayload};
use grainkeeper::store::{MemoryStore, SqliteStore, Store};
use grainkeeper::{
    Core, CoreConfig, CoreService, HandleState, Owner, OwnerPattern, PermissionSet, ShareEdge,
    ViewInfo,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn scenario_view() -> ViewInfo {
    ViewInfo::new(
        ["one", "two", "three"],
        vec![
            RoleDef::new([true, true, true]),
            RoleDef::new([true, false, false]).default_role(),
            RoleDef::new([false, false, true]),
            RoleDef::new([false, false, false]),
        ],
    )
}

async fn core_with<S: Store + 'static>(store: S) -> Result<(Core<S>, Arc<MemoryGrain>)> {
    let backend = MemoryBackend::new();
    let grain = backend.add_grain("g1");
    let core = Core::new(store, backend, CoreConfig::default());
    core.create_grain(GrainRecord::new("g1", "alice").with_view(scenario_view()))
        .await?;
    Ok((core, grain))
}

#[tokio::test]
async fn scenario_a_attenuation_and_revocation() -> Result<()> {
    init_tracing();
    let (core, _) = core_with(MemoryStore::new()).await?;
    let (svc, _actor) = CoreService::spawn(core);
    let g = || "g1".into();
    let vi = scenario_view();

    let owner_to_b = svc
        .share(ShareEdge::new(g(), "alice".into(), "bob".into(), RoleAssignment::role(0)))
        .await?;
    svc.share(ShareEdge::new(g(), "bob".into(), "carol".into(), RoleAssignment::role(2)))
        .await?;

    assert_eq!(
        svc.grain_permissions(g(), "bob".into(), vi.clone()).await?,
        PermissionSet::from([true, true, true])
    );
    assert_eq!(
        svc.grain_permissions(g(), "carol".into(), vi.clone()).await?,
        PermissionSet::from([false, false, true])
    );

    svc.open_session(g(), "alice".into()).await?;
    let bob_session = svc.open_session(g(), "bob".into()).await?;
    let carol_session = svc.open_session(g(), "carol".into()).await?;

    let mut removed = svc.set_edge_active(owner_to_b, false).await?;
    removed.sort();
    let mut expected = vec![bob_session.id, carol_session.id];
    expected.sort();
    assert_eq!(removed, expected);

    assert!(!svc.may_open_grain(g(), "bob".into()).await?);
    assert!(!svc.may_open_grain(g(), "carol".into()).await?);
    assert!(svc.may_open_grain(g(), "alice".into()).await?);
    assert_eq!(
        svc.grain_permissions(g(), "carol".into(), vi).await?,
        PermissionSet::none(3)
    );

    // New sessions are refused as well.
    assert!(svc.open_session(g(), "bob".into()).await.is_err());
    Ok(())
}

#[tokio::test]
async fn scenario_a_cycle_terminates() -> Result<()> {
    init_tracing();
    let (core, _) = core_with(MemoryStore::new()).await?;
    let g = || "g1".into();

    core.share(ShareEdge::new(g(), "alice".into(), "bob".into(), RoleAssignment::role(2)))
        .await?;
    core.share(ShareEdge::new(g(), "bob".into(), "carol".into(), RoleAssignment::all_access()))
        .await?;
    core.share(ShareEdge::new(g(), "carol".into(), "bob".into(), RoleAssignment::all_access()))
        .await?;

    let vi = scenario_view();
    let bob = core.grain_permissions(&g(), &"bob".into(), &vi).await?;
    let carol = core.grain_permissions(&g(), &"carol".into(), &vi).await?;
    assert_eq!(bob, PermissionSet::from([false, false, true]));
    assert_eq!(carol, bob);
    Ok(())
}

async fn scenario_b<S: Store + 'static>(store: S) -> Result<()> {
    let (core, _) = core_with(store).await?;
    let refs = core.refs();

    let payload = TokenPayload::app_ref("g1".into(), Bytes::from_static(b"{data:1}"));
    let secret = refs.make_token(payload, Owner::grain("g1")).await?;

    let refused = refs.restore(&secret, &OwnerPattern::grain("g2")).await;
    assert!(matches!(refused, Err(CapsError::Refused)));

    let cap = refs.restore(&secret, &OwnerPattern::grain("g1")).await?;
    let object_id = cap.as_object().map(|object| object.object_id());
    assert_eq!(object_id, Some(ObjectId::AppRef(Bytes::from_static(b"{data:1}"))));
    Ok(())
}

#[tokio::test]
async fn scenario_b_owner_pattern_gates_restore() -> Result<()> {
    init_tracing();
    scenario_b(MemoryStore::new()).await
}

#[tokio::test]
async fn scenario_b_on_sqlite() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    scenario_b(SqliteStore::open(dir.path().join("grainkeeper.db"))?).await
}

async fn scenario_c<S: Store + 'static>(store: S) -> Result<()> {
    let (core, grain) = core_with(store).await?;
    let core = Arc::new(core);
    let (svc, _actor) = CoreService::spawn_shared(core.clone());
    let g1 = svc.grain("g1");
    let ongoing = grain.new_ongoing(Arc::new(g1.clone()));

    let mut handle = g1
        .get_owner_notification_target()
        .add_ongoing("backing up", ongoing)
        .await?;
    let notification_id = handle.id().clone();

    // Two independent saves of handles on the same notification.
    let first = handle.save(Owner::grain("g1")).await?;
    let mut restored = g1
        .restore(&first)
        .await?
        .into_notification()
        .ok_or_else(|| anyhow::anyhow!("expected a notification handle"))?;
    assert_eq!(restored.state(), HandleState::Saved);
    let second = restored.save(Owner::grain("g1")).await?;
    assert_ne!(first, second);
    assert!(g1.restore(&second).await.is_ok());

    handle.close().await?;
    restored.close().await?;

    g1.drop(&first).await?;
    core.refs().settle().await;
    assert!(core.store().get_notification(&notification_id).await?.is_some());
    assert_eq!(grain.stats().cancels.load(Ordering::SeqCst), 0);

    g1.drop(&second).await?;
    g1.drop(&second).await?;
    core.refs().settle().await;
    assert!(core.store().get_notification(&notification_id).await?.is_none());
    assert_eq!(grain.stats().cancels.load(Ordering::SeqCst), 1);
    assert_eq!(grain.stats().releases.load(Ordering::SeqCst), 1);
    assert_eq!(grain.held_wakelocks(), 0);
    Ok(())
}

#[tokio::test]
async fn scenario_c_last_drop_dismisses_once() -> Result<()> {
    init_tracing();
    scenario_c(MemoryStore::new()).await
}

#[tokio::test]
async fn scenario_c_on_sqlite() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    scenario_c(SqliteStore::open(dir.path().join("grainkeeper.db"))?).await
}
