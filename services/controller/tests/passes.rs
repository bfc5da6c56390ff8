//! Full passes against the in-memory Grafana.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use grafops_api::models::OrgRole;
use grafops_controller::resources::{DashboardStatus, FolderStatus, OrganizationStatus, MAIN_ORG};
use grafops_controller::state::{Condition, Kind, StateFile};
use grafops_controller::worker::{Controller, PassStats};
use grafops_testing::FakeGrafana;
use tempfile::TempDir;

const MANIFEST: &str = r#"
[[organization]]
name = "platform"
admins = ["alice@example.com"]
viewers = ["bob@example.com"]

[[folder]]
name = "ops"
org_ref = "platform"
title = "Operations"

[[datasource]]
name = "prometheus"
org_ref = "platform"
type = "prometheus"
url = "http://prometheus:9090"
json_data_encoded = '{"httpMethod": "POST"}'
secure_json_data_encoded_secret_ref = { name = "prometheus" }

[[dashboard]]
name = "overview"
org_ref = "platform"
folder_ref = "ops"
config_json = '{"title": "Overview", "panels": []}'
"#;

struct Harness {
    grafana: Arc<FakeGrafana>,
    controller: Controller<FakeGrafana>,
    dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("manifests")).unwrap();

        let mut secrets = BTreeMap::new();
        secrets.insert(
            "prometheus".to_string(),
            BTreeMap::from([("secureJsonData".to_string(), r#"{"basicAuthPassword": "s3cret"}"#.to_string())]),
        );

        let grafana = Arc::new(FakeGrafana::new());
        let controller = Controller::new(
            grafana.clone(),
            Box::new(secrets),
            dir.path().join("manifests"),
            dir.path().join("state").join("grafops-state.json"),
        );
        Self { grafana, controller, dir }
    }

    fn write_manifest(&self, file: &str, contents: &str) {
        fs::write(self.dir.path().join("manifests").join(file), contents).unwrap();
    }

    fn state_path(&self) -> PathBuf {
        self.dir.path().join("state").join("grafops-state.json")
    }

    fn state(&self) -> StateFile {
        StateFile::load(&self.state_path()).unwrap()
    }

    async fn pass(&self) -> PassStats {
        self.controller.run_pass().await.unwrap()
    }
}

fn platform_org(h: &Harness) -> grafops_id::OrgId {
    h.grafana.org_id("platform").expect("organization created")
}

#[tokio::test]
async fn test_first_pass_creates_every_kind_in_dependency_order() {
    let h = Harness::new();
    h.write_manifest("platform.toml", MANIFEST);

    let stats = h.pass().await;
    assert_eq!(stats.created, 4);
    assert_eq!(stats.failed, 0);

    let org = platform_org(&h);
    let members = h.grafana.members(org);
    assert_eq!(members.get("alice@example.com"), Some(&OrgRole::Admin));
    assert_eq!(members.get("bob@example.com"), Some(&OrgRole::Viewer));

    let folders = h.grafana.folders(org);
    assert_eq!(folders.len(), 1);
    assert_eq!(folders[0].title, "Operations");

    let ds = h.grafana.datasource(org, "prometheus").unwrap();
    assert_eq!(ds.url, "http://prometheus:9090");
    assert!(h.grafana.datasource(MAIN_ORG, "prometheus").is_none());

    let state = h.state();
    let dashboard: DashboardStatus = state.status(Kind::Dashboard, "overview").unwrap();
    assert_eq!(dashboard.org_id, Some(org));
    assert_eq!(dashboard.folder_uid.as_deref(), Some(folders[0].uid.as_str()));
    assert!(state.record(Kind::Dashboard, "overview").unwrap().condition.is_synced());
}

#[tokio::test]
async fn test_second_pass_changes_nothing() {
    let h = Harness::new();
    h.write_manifest("platform.toml", MANIFEST);
    h.pass().await;
    h.grafana.clear_calls();

    let stats = h.pass().await;
    assert_eq!(stats.up_to_date, 4);
    assert!(!stats.changed());
    assert!(h.grafana.mutations().is_empty(), "unexpected writes: {:?}", h.grafana.mutations());

    let state = h.state();
    let record = state.record(Kind::Organization, "platform").unwrap();
    assert_eq!(record.last_outcome.as_deref(), Some("up_to_date"));
}

#[tokio::test]
async fn test_drift_made_outside_is_reverted() {
    let h = Harness::new();
    h.write_manifest("platform.toml", MANIFEST);
    h.pass().await;

    let org = platform_org(&h);
    h.grafana.edit_datasource(org, "prometheus", |ds| ds.url = "http://elsewhere".into());
    let folder_uid = h.grafana.folders(org)[0].uid.to_string();
    h.grafana.rename_folder(org, &folder_uid, "Renamed");

    let stats = h.pass().await;
    assert_eq!(stats.updated, 2);
    assert_eq!(h.grafana.datasource(org, "prometheus").unwrap().url, "http://prometheus:9090");
    assert_eq!(h.grafana.folder(org, &folder_uid).unwrap().title, "Operations");
}

#[tokio::test]
async fn test_undeclared_instances_are_deleted_and_forgotten() {
    let h = Harness::new();
    h.write_manifest("platform.toml", MANIFEST);
    h.pass().await;
    let org = platform_org(&h);

    h.write_manifest(
        "platform.toml",
        r#"
        [[organization]]
        name = "platform"
        admins = ["alice@example.com"]
        viewers = ["bob@example.com"]
        "#,
    );
    let stats = h.pass().await;

    assert_eq!(stats.deleted, 3);
    assert_eq!(stats.up_to_date, 1);
    assert!(h.grafana.dashboards(org).is_empty());
    assert!(h.grafana.folders(org).is_empty());
    assert!(h.grafana.datasource(org, "prometheus").is_none());

    let state = h.state();
    assert!(state.names(Kind::Folder).is_empty());
    assert!(state.names(Kind::DataSource).is_empty());
    assert!(state.names(Kind::Dashboard).is_empty());
    assert_eq!(state.names(Kind::Organization), vec!["platform".to_string()]);
}

#[tokio::test]
async fn test_removing_everything_deletes_the_organization_last() {
    let h = Harness::new();
    h.write_manifest("platform.toml", MANIFEST);
    h.pass().await;
    let org = platform_org(&h);
    h.grafana.set_session_org(org);
    h.grafana.clear_calls();

    h.write_manifest("platform.toml", "");
    let stats = h.pass().await;

    assert_eq!(stats.deleted, 4);
    assert_eq!(stats.failed, 0);
    assert!(h.grafana.org_id("platform").is_none());
    assert_ne!(h.grafana.session_org(), Some(org));
    assert_eq!(h.grafana.mutations().last(), Some(&"delete_org"));
    assert_eq!(h.state(), StateFile::default());
}

#[tokio::test]
async fn test_unresolved_reference_is_recorded_as_condition() {
    let h = Harness::new();
    h.write_manifest(
        "ops.toml",
        r#"
        [[folder]]
        name = "ops"
        org_ref = "missing"

        [[dashboard]]
        name = "overview"
        folder_ref = "ops"
        config_json = '{"title": "Overview"}'
        "#,
    );

    let stats = h.pass().await;
    assert_eq!(stats.failed, 2);
    assert!(h.grafana.mutations().is_empty());

    let state = h.state();
    for (kind, name) in [(Kind::Folder, "ops"), (Kind::Dashboard, "overview")] {
        let record = state.record(kind, name).unwrap();
        assert!(
            matches!(&record.condition, Condition::Error(message) if message.contains("unresolved")),
            "{kind} {name}: {:?}",
            record.condition
        );
    }
}

#[tokio::test]
async fn test_failed_pass_keeps_learned_identity() {
    let h = Harness::new();
    h.write_manifest("platform.toml", MANIFEST);
    h.grafana.fail_next("add_org_user", 500);

    let stats = h.pass().await;
    assert!(stats.failed >= 1);

    let state = h.state();
    let record = state.record(Kind::Organization, "platform").unwrap();
    assert!(!record.condition.is_synced());
    let status: OrganizationStatus = state.status(Kind::Organization, "platform").unwrap();
    let org = platform_org(&h);
    assert_eq!(status.org_id, Some(org));

    let stats = h.pass().await;
    assert_eq!(stats.failed, 0);
    assert_eq!(h.grafana.call_count("create_org"), 1);
    assert!(h.state().record(Kind::Organization, "platform").unwrap().condition.is_synced());
    assert_eq!(h.grafana.members(org).get("alice@example.com"), Some(&OrgRole::Admin));
}

#[tokio::test]
async fn test_unreadable_manifest_prunes_nothing() {
    let h = Harness::new();
    h.write_manifest("platform.toml", MANIFEST);
    h.pass().await;
    let before = h.state();

    h.write_manifest("platform.toml", "[[folder]\nname = ");
    assert!(h.controller.run_pass().await.is_err());

    let org = platform_org(&h);
    assert_eq!(h.grafana.folders(org).len(), 1);
    assert_eq!(h.state(), before);
}

#[tokio::test]
async fn test_folder_reference_from_another_org_fails() {
    let h = Harness::new();
    h.write_manifest("platform.toml", MANIFEST);
    h.write_manifest(
        "main.toml",
        r#"
        [[dashboard]]
        name = "home"
        folder_ref = "ops"
        config_json = '{"title": "Home"}'
        "#,
    );

    let stats = h.pass().await;
    assert_eq!(stats.created, 4);
    assert_eq!(stats.failed, 1);
    assert!(h.grafana.dashboards(MAIN_ORG).is_empty());

    let status: FolderStatus = h.state().status(Kind::Folder, "ops").unwrap();
    assert!(status.selector().is_some());
}
