//! Guards driven by a live session manager.

use std::sync::Arc;

use common::{DenyMode, GuardConfig};
use portal_access::{AccessRequirement, GuardOutcome, Guarded, RouteGuard};
use portal_auth::testing::{DEFAULT_PASSWORD, DEFAULT_USERNAME, MockIdentityService};
use portal_auth::{Credentials, ProfileStorage, Role};
use portal_session::{SessionManager, SessionOptions, spawn_storage_sync};

fn manager(mock: &MockIdentityService, storage: &Arc<ProfileStorage>) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(
        mock.gateway(storage.open_tab("portal")),
        SessionOptions::default(),
    ))
}

fn ada() -> Credentials {
    Credentials::new(DEFAULT_USERNAME, DEFAULT_PASSWORD)
}

#[tokio::test]
async fn guard_follows_the_session_lifecycle() {
    let mock = MockIdentityService::start().await;
    let storage = ProfileStorage::in_memory();
    let manager = manager(&mock, &storage);
    let guard = RouteGuard::new(&manager, GuardConfig::default());
    let student_page = AccessRequirement::role(Role::Student);

    assert_eq!(guard.evaluate(&student_page, "/courses"), GuardOutcome::Pending);

    manager.hydrate().await;
    assert_eq!(
        guard.evaluate(&student_page, "/courses"),
        GuardOutcome::Redirect("/login?redirect=%2Fcourses".into())
    );

    manager.login(&ada()).await.unwrap();
    assert_eq!(guard.evaluate(&student_page, "/courses"), GuardOutcome::Render);

    manager.logout().await;
    assert!(matches!(
        guard.evaluate(&student_page, "/courses"),
        GuardOutcome::Redirect(_)
    ));
}

#[tokio::test]
async fn settled_resolves_after_hydration() {
    let mock = MockIdentityService::start().await;
    let storage = ProfileStorage::in_memory();
    manager(&mock, &storage).login(&ada()).await.unwrap();

    let manager = manager(&mock, &storage);
    let guard = RouteGuard::new(&manager, GuardConfig::default());
    let hydrating = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.hydrate().await })
    };

    let outcome = guard
        .settled(&AccessRequirement::authenticated(), "/home")
        .await;
    assert_eq!(outcome, GuardOutcome::Render);
    hydrating.await.unwrap();
}

#[tokio::test]
async fn inline_denial_names_both_roles() {
    let mock = MockIdentityService::start().await;
    let storage = ProfileStorage::in_memory();
    let manager = manager(&mock, &storage);
    manager.login(&ada()).await.unwrap();
    let guard = RouteGuard::new(
        &manager,
        GuardConfig {
            deny_mode: DenyMode::Inline,
            ..GuardConfig::default()
        },
    );

    let rendered = guard.render(&AccessRequirement::role(Role::Admin), "/admin", |_| "admin panel");
    let Guarded::Denied(denied) = rendered else {
        panic!("expected inline denial, got {rendered:?}");
    };
    assert!(denied.message().contains("student"));
    assert!(denied.message().contains("admin"));
}

#[tokio::test]
async fn guard_in_other_tab_reacts_to_logout() {
    let mock = MockIdentityService::start().await;
    let storage = ProfileStorage::in_memory();
    let tab1 = manager(&mock, &storage);
    let tab2 = manager(&mock, &storage);
    tab1.login(&ada()).await.unwrap();
    tab2.hydrate().await;
    let sync = spawn_storage_sync(Arc::clone(&tab2));

    let mut guard = RouteGuard::new(&tab2, GuardConfig::default());
    let page = AccessRequirement::authenticated();
    assert_eq!(guard.evaluate(&page, "/home"), GuardOutcome::Render);

    tab1.logout().await;
    assert!(guard.changed().await);
    assert_eq!(
        guard.evaluate(&page, "/home"),
        GuardOutcome::Redirect("/login?redirect=%2Fhome".into())
    );
    sync.abort();
}
