use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use actix_web::{App, test, web};
use anyhow::anyhow;
use pretty_assertions::assert_eq;
use serde_json::Value;

use arena::catalog::Catalog;
use arena::config::LimitsConfig;
use arena::identity::{ROLE_HEADER, USER_HEADER};
use arena::instances::InstanceManager;
use arena::provisioner::{Deployment, Provisioner};
use arena::routes::{
    ListResponse, StartResponse, StopResponse, get_settings_handler, json_error_handler,
    list_instances_handler, start_instance_handler, stop_instance_handler,
    update_settings_handler,
};
use arena::state::StatePaths;

#[derive(Default)]
struct MockProvisioner {
    fail_deploy: AtomicBool,
}

impl Provisioner for MockProvisioner {
    fn deploy(
        &self,
        _build_dir: &Path,
        instance_id: u64,
        _internal_port: Option<u16>,
    ) -> anyhow::Result<Deployment> {
        if self.fail_deploy.load(Ordering::SeqCst) {
            return Err(anyhow!("image build failed"));
        }
        Ok(Deployment {
            external_port: 31337,
            container: format!("mock_{instance_id}"),
        })
    }

    fn teardown(&self, _container: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

// Helper that wires an isolated manager; the TempDir guard keeps the state
// directory alive for the duration of the test.
fn setup(provisioner: Arc<MockProvisioner>) -> (tempfile::TempDir, web::Data<InstanceManager>) {
    let tmp = tempfile::tempdir().unwrap();
    let catalog_path = tmp.path().join("challenges.json");
    std::fs::write(
        &catalog_path,
        serde_json::json!({
            "web1": {"dir": tmp.path().join("web1"), "port": 8080, "title": "Web One"}
        })
        .to_string(),
    )
    .unwrap();

    let manager = InstanceManager::new(
        StatePaths::new(tmp.path()),
        LimitsConfig::default(),
        Arc::new(Catalog::load(&catalog_path).unwrap()),
        provisioner,
    );

    (tmp, web::Data::new(manager))
}

macro_rules! init_app {
    ($manager:expr) => {
        test::init_service(
            App::new()
                .app_data($manager.clone())
                .app_data(web::JsonConfig::default().error_handler(json_error_handler))
                .service(start_instance_handler)
                .service(stop_instance_handler)
                .service(list_instances_handler)
                .service(get_settings_handler)
                .service(update_settings_handler),
        )
        .await
    };
}

#[actix_web::test]
async fn start_list_stop_roundtrip() {
    let (_guard, manager) = setup(Arc::new(MockProvisioner::default()));
    let app = init_app!(manager);

    let req = test::TestRequest::post()
        .uri("/api/instances/start")
        .insert_header((USER_HEADER, "alice"))
        .set_json(serde_json::json!({"problem": "web1"}))
        .to_request();
    let started: StartResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(started.status, "ok");
    assert_eq!(started.instance_id, 1);
    assert_eq!(started.title, "Web One");
    assert_eq!(started.external_port, 31337);
    assert!(started.url.ends_with(":31337"), "{}", started.url);

    let req = test::TestRequest::get()
        .uri("/api/instances")
        .insert_header((USER_HEADER, "alice"))
        .to_request();
    let listed: ListResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(listed.instances.len(), 1);
    assert_eq!(listed.instances[0].problem, "web1");
    assert!(listed.instances[0].owner.is_none());

    let req = test::TestRequest::post()
        .uri("/api/instances/stop/1")
        .insert_header((USER_HEADER, "alice"))
        .to_request();
    let stopped: StopResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stopped.status, "ok");
    assert_eq!(stopped.container, "mock_1");

    let req = test::TestRequest::get()
        .uri("/api/instances")
        .insert_header((USER_HEADER, "alice"))
        .to_request();
    let listed: ListResponse = test::call_and_read_body_json(&app, req).await;
    assert!(listed.instances.is_empty());
}

#[actix_web::test]
async fn requests_without_identity_are_unauthenticated() {
    let (_guard, manager) = setup(Arc::new(MockProvisioner::default()));
    let app = init_app!(manager);

    let req = test::TestRequest::get().uri("/api/instances").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["reason"], "ERR_UNAUTHENTICATED");
}

#[actix_web::test]
async fn unknown_challenge_is_a_bad_request() {
    let (_guard, manager) = setup(Arc::new(MockProvisioner::default()));
    let app = init_app!(manager);

    let req = test::TestRequest::post()
        .uri("/api/instances/start")
        .insert_header((USER_HEADER, "alice"))
        .set_json(serde_json::json!({"problem": "nope"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["reason"], "ERR_INVALID_CHALLENGE");
}

#[actix_web::test]
async fn deploy_failure_maps_to_a_server_error_with_no_ghost_instance() {
    let mock = Arc::new(MockProvisioner::default());
    mock.fail_deploy.store(true, Ordering::SeqCst);
    let (_guard, manager) = setup(mock);
    let app = init_app!(manager);

    let req = test::TestRequest::post()
        .uri("/api/instances/start")
        .insert_header((USER_HEADER, "alice"))
        .set_json(serde_json::json!({"problem": "web1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 500);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["reason"], "ERR_PROVISION_FAILED");

    let req = test::TestRequest::get()
        .uri("/api/instances")
        .insert_header((USER_HEADER, "alice"))
        .to_request();
    let listed: ListResponse = test::call_and_read_body_json(&app, req).await;
    assert!(listed.instances.is_empty());
}

#[actix_web::test]
async fn stopping_someone_elses_instance_is_forbidden() {
    let (_guard, manager) = setup(Arc::new(MockProvisioner::default()));
    let app = init_app!(manager);

    let req = test::TestRequest::post()
        .uri("/api/instances/start")
        .insert_header((USER_HEADER, "alice"))
        .set_json(serde_json::json!({"problem": "web1"}))
        .to_request();
    let started: StartResponse = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri(&format!("/api/instances/stop/{}", started.instance_id))
        .insert_header((USER_HEADER, "mallory"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
}

#[actix_web::test]
async fn admins_see_the_owner_column() {
    let (_guard, manager) = setup(Arc::new(MockProvisioner::default()));
    let app = init_app!(manager);

    let req = test::TestRequest::post()
        .uri("/api/instances/start")
        .insert_header((USER_HEADER, "alice"))
        .set_json(serde_json::json!({"problem": "web1"}))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::get()
        .uri("/api/instances")
        .insert_header((USER_HEADER, "root"))
        .insert_header((ROLE_HEADER, "admin"))
        .to_request();
    let listed: ListResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(listed.instances.len(), 1);
    assert_eq!(listed.instances[0].owner.as_deref(), Some("alice"));
}

#[actix_web::test]
async fn settings_are_admin_only_and_bounded() {
    let (_guard, manager) = setup(Arc::new(MockProvisioner::default()));
    let app = init_app!(manager);

    let req = test::TestRequest::get()
        .uri("/api/admin/settings")
        .insert_header((USER_HEADER, "alice"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    let req = test::TestRequest::get()
        .uri("/api/admin/settings")
        .insert_header((USER_HEADER, "root"))
        .insert_header((ROLE_HEADER, "admin"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["settings"]["user_instance_limit"], 2);

    let req = test::TestRequest::post()
        .uri("/api/admin/settings")
        .insert_header((USER_HEADER, "root"))
        .insert_header((ROLE_HEADER, "admin"))
        .set_json(serde_json::json!({"user_instance_limit": 5}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["settings"]["user_instance_limit"], 5);

    let req = test::TestRequest::post()
        .uri("/api/admin/settings")
        .insert_header((USER_HEADER, "root"))
        .insert_header((ROLE_HEADER, "admin"))
        .set_json(serde_json::json!({"user_instance_limit": 10000}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}
