//! Data sources.
//!
//! Grafana never returns secure field values, so secure drift is judged on
//! key presence only. HTTP headers from a secret are merged into both
//! payloads as numbered `httpHeaderName{n}` / `httpHeaderValue{n}` pairs.

use std::sync::Arc;

use async_trait::async_trait;
use grafops_api::models::{DataSource, DataSourceRequest};
use grafops_api::{GatewayError, Grafana};
use grafops_id::{DataSourceId, OrgId};
use grafops_reconcile::resolve::{resolve, RemoteLookup};
use grafops_reconcile::value::keys_equal;
use grafops_reconcile::{Drift, ExternalClient, GatewayResultExt, Observation, ReconcileError, ReconcileResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::ignore_not_found;
use crate::manifest::DataSourceManifest;
use crate::secrets::SecretSource;

pub const DEFAULT_ACCESS_MODE: &str = "proxy";

/// Key read from a secure JSON secret when the reference names none.
pub const SECURE_JSON_DATA_KEY: &str = "secureJsonData";

#[derive(Debug, Clone, PartialEq)]
pub struct DataSourceSpec {
    pub org: OrgId,
    pub name: String,
    pub kind: String,
    pub access: String,
    pub basic_auth: bool,
    pub basic_auth_user: String,
    pub database: String,
    pub is_default: bool,
    pub uid: Option<String>,
    pub url: String,
    pub user: String,
    pub json_data: Map<String, Value>,
    pub secure_json_data: Map<String, Value>,
}

impl DataSourceSpec {
    /// Applies defaults and merges secret material.
    pub fn resolve(manifest: &DataSourceManifest, org: OrgId, secrets: &dyn SecretSource) -> ReconcileResult<Self> {
        let name = manifest.grafana_name.as_deref().unwrap_or(&manifest.name).to_string();
        if manifest.kind.trim().is_empty() {
            return Err(ReconcileError::InvalidSpec(format!("data source '{name}' has no type")));
        }

        let mut json_data = match manifest.json_data_encoded.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => parse_object(raw)
                .map_err(|e| ReconcileError::InvalidSpec(format!("json_data_encoded of '{name}': {e}")))?,
            _ => Map::new(),
        };

        let mut secure_json_data = match &manifest.secure_json_data_encoded_secret_ref {
            Some(secret) => {
                let raw = secrets.read_key(&secret.name, secret.key_or(SECURE_JSON_DATA_KEY))?;
                parse_object(&raw)
                    .map_err(|e| ReconcileError::Secret(format!("secure JSON data in secret '{}': {e}", secret.name)))?
            }
            None => Map::new(),
        };

        if let Some(secret) = &manifest.http_headers_secret_ref {
            let headers = secrets.read_all(&secret.name)?;
            merge_headers(&mut json_data, &mut secure_json_data, headers);
        }

        Ok(Self {
            org,
            name,
            kind: manifest.kind.clone(),
            access: manifest
                .access_mode
                .clone()
                .unwrap_or_else(|| DEFAULT_ACCESS_MODE.to_string()),
            basic_auth: manifest.basic_auth_enabled.unwrap_or(false),
            basic_auth_user: manifest.basic_auth_username.clone().unwrap_or_default(),
            database: manifest.database_name.clone().unwrap_or_default(),
            is_default: manifest.is_default.unwrap_or(false),
            uid: manifest.uid.clone().filter(|u| !u.trim().is_empty()),
            url: manifest.url.clone().unwrap_or_default(),
            user: manifest.username.clone().unwrap_or_default(),
            json_data,
            secure_json_data,
        })
    }

    fn request(&self, version: Option<i64>) -> DataSourceRequest {
        DataSourceRequest {
            name: self.name.clone(),
            kind: self.kind.clone(),
            access: self.access.clone(),
            url: self.url.clone(),
            user: self.user.clone(),
            database: self.database.clone(),
            basic_auth: self.basic_auth,
            basic_auth_user: self.basic_auth_user.clone(),
            is_default: self.is_default,
            uid: self.uid.clone(),
            json_data: Value::Object(self.json_data.clone()),
            secure_json_data: Value::Object(self.secure_json_data.clone()),
            version,
        }
    }

    fn drift(&self, actual: &DataSource) -> ReconcileResult<Drift> {
        let mut drift = Drift::new();
        drift
            .field("name", self.name.as_str(), actual.name.as_str())
            .field("type", self.kind.as_str(), actual.kind.as_str())
            .field("access", self.access.as_str(), actual.access.as_str())
            .field("url", self.url.as_str(), actual.url.as_str())
            .field("user", self.user.as_str(), actual.user.as_str())
            .field("database", self.database.as_str(), actual.database.as_str())
            .field("basic_auth", &self.basic_auth, &actual.basic_auth)
            .field("basic_auth_user", self.basic_auth_user.as_str(), actual.basic_auth_user.as_str())
            .field("is_default", &self.is_default, &actual.is_default);
        if let Some(uid) = &self.uid {
            drift.field("uid", uid.as_str(), actual.uid.as_str());
        }

        drift.value("json_data", &Value::Object(self.json_data.clone()), &observed_json(actual))?;
        drift.check("secure_json_data", keys_equal(&self.secure_json_data, actual.secure_keys()));
        Ok(drift)
    }
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, found {}", kind_name(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Injects headers in name order, numbered from 1.
fn merge_headers(
    json_data: &mut Map<String, Value>,
    secure_json_data: &mut Map<String, Value>,
    headers: impl IntoIterator<Item = (String, String)>,
) {
    for (n, (name, value)) in (1..).zip(headers) {
        json_data.insert(format!("httpHeaderName{n}"), Value::String(name));
        secure_json_data.insert(format!("httpHeaderValue{n}"), Value::String(value));
    }
}

/// Grafana reports an unset payload as null.
fn observed_json(actual: &DataSource) -> Value {
    match &actual.json_data {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceStatus {
    pub id: Option<DataSourceId>,
    pub uid: Option<String>,
    pub org_id: Option<OrgId>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub access: String,
    pub url: String,
    pub user: String,
    pub database: String,
    pub basic_auth: bool,
    pub basic_auth_user: String,
    pub is_default: bool,
    pub json_data: Value,
    pub secure_json_keys: Vec<String>,
    pub version: i64,
}

impl DataSourceStatus {
    fn record(&mut self, actual: &DataSource) {
        self.id = Some(actual.id);
        self.uid = Some(actual.uid.clone()).filter(|u| !u.is_empty());
        self.org_id = Some(actual.org_id);
        self.name = Some(actual.name.clone());
        self.kind = actual.kind.clone();
        self.access = actual.access.clone();
        self.url = actual.url.clone();
        self.user = actual.user.clone();
        self.database = actual.database.clone();
        self.basic_auth = actual.basic_auth;
        self.basic_auth_user = actual.basic_auth_user.clone();
        self.is_default = actual.is_default;
        self.json_data = observed_json(actual);
        self.secure_json_keys = actual.secure_keys().map(str::to_string).collect();
        self.version = actual.version;
    }
}

pub struct DataSources<G: ?Sized> {
    grafana: Arc<G>,
}

impl<G: Grafana + ?Sized> DataSources<G> {
    pub fn new(grafana: Arc<G>) -> Self {
        Self { grafana }
    }

    async fn find(&self, spec: &DataSourceSpec, status: &DataSourceStatus) -> ReconcileResult<Option<DataSource>> {
        let lookup = DataSourceLookup {
            grafana: &*self.grafana,
            org: spec.org,
        };
        // a recorded ID only counts inside the organization it was recorded in
        let id = status.id.filter(|_| status.org_id == Some(spec.org));
        resolve(&lookup, id.as_ref(), &spec.name).await
    }
}

#[async_trait]
impl<G: Grafana + ?Sized> ExternalClient for DataSources<G> {
    type Spec = DataSourceSpec;
    type Status = DataSourceStatus;

    fn kind(&self) -> &'static str {
        "datasource"
    }

    async fn observe(&self, spec: &DataSourceSpec, status: &mut DataSourceStatus) -> ReconcileResult<Observation> {
        let Some(actual) = self.find(spec, status).await? else {
            return Ok(Observation::absent());
        };
        status.record(&actual);
        Ok(Observation::present(spec.drift(&actual)?))
    }

    async fn create(&self, spec: &DataSourceSpec, status: &mut DataSourceStatus) -> ReconcileResult<()> {
        let created = self
            .grafana
            .create_datasource(Some(spec.org), &spec.request(None))
            .await
            .during(format!("create data source '{}'", spec.name))?;
        status.record(&created);
        Ok(())
    }

    async fn update(&self, spec: &DataSourceSpec, status: &mut DataSourceStatus) -> ReconcileResult<()> {
        let actual = self
            .find(spec, status)
            .await?
            .ok_or_else(|| ReconcileError::Vanished(format!("data source '{}'", spec.name)))?;
        if actual.name != spec.name {
            return Err(ReconcileError::InvariantViolation(format!(
                "data source {} is named '{}' but '{}' is declared; data source names cannot change",
                actual.id, actual.name, spec.name
            )));
        }
        status.record(&actual);

        let drift = spec.drift(&actual)?;
        if drift.is_up_to_date() {
            debug!(name = %spec.name, "data source converged since observe");
            return Ok(());
        }

        let updated = self
            .grafana
            .update_datasource(Some(spec.org), actual.id, &spec.request(Some(actual.version)))
            .await
            .during(format!("update data source '{}'", spec.name))?;
        status.record(&updated);
        Ok(())
    }

    async fn delete(&self, status: &mut DataSourceStatus) -> ReconcileResult<bool> {
        let Some(id) = status.id else {
            return Ok(false);
        };

        ignore_not_found(
            self.grafana.delete_datasource(status.org_id, id).await,
            format!("delete data source {id}"),
        )?;
        status.id = None;
        Ok(true)
    }
}

struct DataSourceLookup<'a, G: ?Sized> {
    grafana: &'a G,
    org: OrgId,
}

#[async_trait]
impl<G: Grafana + ?Sized> RemoteLookup for DataSourceLookup<'_, G> {
    type Identity = DataSourceId;
    type Query = String;
    type Resource = DataSource;

    async fn fetch_by_identity(&self, id: &DataSourceId) -> Result<DataSource, GatewayError> {
        self.grafana.get_datasource(Some(self.org), *id).await
    }

    async fn search_by_name(&self, name: &String) -> Result<Vec<DataSource>, GatewayError> {
        match self.grafana.get_datasource_by_name(Some(self.org), name).await {
            Ok(ds) => Ok(vec![ds]),
            Err(e) if e.is_absence_equivalent() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::MAIN_ORG;
    use crate::secrets::SecretRef;
    use grafops_reconcile::{finalize, reconcile, Outcome};
    use grafops_testing::FakeGrafana;
    use rstest::rstest;
    use serde_json::json;
    use std::collections::BTreeMap;

    type Secrets = BTreeMap<String, BTreeMap<String, String>>;

    fn manifest(name: &str) -> DataSourceManifest {
        DataSourceManifest {
            name: name.to_string(),
            org_id: None,
            org_ref: None,
            grafana_name: None,
            kind: "prometheus".to_string(),
            access_mode: None,
            basic_auth_enabled: None,
            basic_auth_username: None,
            database_name: None,
            is_default: None,
            uid: None,
            url: Some("http://prom:9090".to_string()),
            username: None,
            json_data_encoded: None,
            http_headers_secret_ref: None,
            secure_json_data_encoded_secret_ref: None,
        }
    }

    fn secrets() -> Secrets {
        let mut secrets = Secrets::new();
        secrets.insert(
            "headers".into(),
            BTreeMap::from([
                ("X-Scope-OrgID".to_string(), "tenant".to_string()),
                ("Authorization".to_string(), "Bearer t".to_string()),
            ]),
        );
        secrets.insert(
            "secure".into(),
            BTreeMap::from([(SECURE_JSON_DATA_KEY.to_string(), r#"{"basicAuthPassword": "pw"}"#.to_string())]),
        );
        secrets
    }

    fn spec(m: &DataSourceManifest) -> DataSourceSpec {
        DataSourceSpec::resolve(m, MAIN_ORG, &secrets()).unwrap()
    }

    fn setup() -> (Arc<FakeGrafana>, DataSources<FakeGrafana>) {
        let grafana = Arc::new(FakeGrafana::new());
        let client = DataSources::new(grafana.clone());
        (grafana, client)
    }

    #[test]
    fn test_defaults() {
        let s = spec(&manifest("prom"));

        assert_eq!(s.name, "prom");
        assert_eq!(s.access, "proxy");
        assert!(!s.basic_auth && !s.is_default);
        assert!(s.json_data.is_empty());
        assert_eq!(s.uid, None);
    }

    #[rstest]
    #[case::access_unset(None, "proxy")]
    #[case::access_direct(Some("direct"), "direct")]
    #[case::access_proxy(Some("proxy"), "proxy")]
    fn test_access_mode(#[case] declared: Option<&str>, #[case] expected: &str) {
        let mut m = manifest("prom");
        m.access_mode = declared.map(str::to_string);

        assert_eq!(spec(&m).access, expected);
    }

    #[rstest]
    #[case::unset(None, None)]
    #[case::blank(Some("  "), None)]
    #[case::declared(Some("prom-uid"), Some("prom-uid"))]
    fn test_uid_is_kept_only_when_not_blank(#[case] declared: Option<&str>, #[case] expected: Option<&str>) {
        let mut m = manifest("prom");
        m.uid = declared.map(str::to_string);

        assert_eq!(spec(&m).uid.as_deref(), expected);
    }

    #[rstest]
    #[case::manifest_name(None, "prom")]
    #[case::grafana_name(Some("Prometheus (prod)"), "Prometheus (prod)")]
    fn test_remote_name(#[case] grafana_name: Option<&str>, #[case] expected: &str) {
        let mut m = manifest("prom");
        m.grafana_name = grafana_name.map(str::to_string);

        assert_eq!(spec(&m).name, expected);
    }

    #[test]
    fn test_headers_are_numbered_in_name_order() {
        let mut m = manifest("prom");
        m.json_data_encoded = Some(r#"{"httpMethod": "POST"}"#.into());
        m.http_headers_secret_ref = Some(SecretRef {
            name: "headers".into(),
            key: None,
        });
        m.secure_json_data_encoded_secret_ref = Some(SecretRef {
            name: "secure".into(),
            key: None,
        });

        let s = spec(&m);

        assert_eq!(
            Value::Object(s.json_data),
            json!({"httpMethod": "POST", "httpHeaderName1": "Authorization", "httpHeaderName2": "X-Scope-OrgID"})
        );
        assert_eq!(
            Value::Object(s.secure_json_data),
            json!({"basicAuthPassword": "pw", "httpHeaderValue1": "Bearer t", "httpHeaderValue2": "tenant"})
        );
    }

    #[test]
    fn test_invalid_json_data_is_invalid_spec() {
        let mut m = manifest("prom");
        m.json_data_encoded = Some("[1, 2]".into());

        let err = DataSourceSpec::resolve(&m, MAIN_ORG, &secrets()).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidSpec(msg) if msg.contains("an array")));
    }

    #[test]
    fn test_missing_secret_is_secret_error() {
        let mut m = manifest("prom");
        m.http_headers_secret_ref = Some(SecretRef {
            name: "absent".into(),
            key: None,
        });

        let err = DataSourceSpec::resolve(&m, MAIN_ORG, &secrets()).unwrap_err();
        assert!(matches!(err, ReconcileError::Secret(_)));
    }

    #[tokio::test]
    async fn test_create_then_up_to_date() {
        let (grafana, client) = setup();
        let mut m = manifest("prom");
        m.json_data_encoded = Some(r#"{"timeInterval": 15}"#.into());
        m.secure_json_data_encoded_secret_ref = Some(SecretRef {
            name: "secure".into(),
            key: None,
        });
        let s = spec(&m);
        let mut status = DataSourceStatus::default();

        assert_eq!(reconcile(&client, &s, &mut status).await.unwrap(), Outcome::Created);
        assert_eq!(status.secure_json_keys, vec!["basicAuthPassword"]);
        assert!(grafana.datasource(MAIN_ORG, "prom").is_some());

        assert_eq!(reconcile(&client, &s, &mut status).await.unwrap(), Outcome::UpToDate);
    }

    #[tokio::test]
    async fn test_integral_float_is_not_drift() {
        let (grafana, client) = setup();
        let mut m = manifest("prom");
        m.json_data_encoded = Some(r#"{"timeout": 30}"#.into());
        let s = spec(&m);
        let mut status = DataSourceStatus::default();
        reconcile(&client, &s, &mut status).await.unwrap();

        grafana.edit_datasource(MAIN_ORG, "prom", |ds| ds.json_data = json!({"timeout": 30.0}));

        assert_eq!(reconcile(&client, &s, &mut status).await.unwrap(), Outcome::UpToDate);
    }

    #[tokio::test]
    async fn test_remote_edit_is_reverted_with_version() {
        let (grafana, client) = setup();
        let s = spec(&manifest("prom"));
        let mut status = DataSourceStatus::default();
        reconcile(&client, &s, &mut status).await.unwrap();

        grafana.edit_datasource(MAIN_ORG, "prom", |ds| ds.url = "http://elsewhere".into());

        let outcome = reconcile(&client, &s, &mut status).await.unwrap();
        assert_eq!(outcome, Outcome::Updated { drifted: vec!["url"] });
        assert_eq!(grafana.datasource(MAIN_ORG, "prom").unwrap().url, "http://prom:9090");
        assert_eq!(status.version, 3);
    }

    #[tokio::test]
    async fn test_removed_secure_key_is_drift() {
        let (grafana, client) = setup();
        let mut m = manifest("prom");
        m.secure_json_data_encoded_secret_ref = Some(SecretRef {
            name: "secure".into(),
            key: None,
        });
        let s = spec(&m);
        let mut status = DataSourceStatus::default();
        reconcile(&client, &s, &mut status).await.unwrap();

        grafana.edit_datasource(MAIN_ORG, "prom", |ds| ds.secure_json_fields.clear());

        let outcome = reconcile(&client, &s, &mut status).await.unwrap();
        assert_eq!(outcome, Outcome::Updated { drifted: vec!["secure_json_data"] });
    }

    #[tokio::test]
    async fn test_shape_mismatch_aborts_without_mutation() {
        let (grafana, client) = setup();
        let mut m = manifest("prom");
        m.json_data_encoded = Some(r#"{"tls": {"skipVerify": true}}"#.into());
        let s = spec(&m);
        let mut status = DataSourceStatus::default();
        reconcile(&client, &s, &mut status).await.unwrap();

        grafana.edit_datasource(MAIN_ORG, "prom", |ds| ds.json_data = json!({"tls": [true]}));
        grafana.clear_calls();

        let err = reconcile(&client, &s, &mut status).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Shape(_)));
        assert!(grafana.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_rename_is_an_invariant_violation() {
        let (_, client) = setup();
        let mut status = DataSourceStatus::default();
        reconcile(&client, &spec(&manifest("prom")), &mut status)
            .await
            .unwrap();

        let mut renamed = manifest("prom");
        renamed.grafana_name = Some("prometheus".into());
        let err = reconcile(&client, &spec(&renamed), &mut status).await.unwrap_err();

        assert!(matches!(err, ReconcileError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (grafana, client) = setup();
        let mut status = DataSourceStatus::default();
        reconcile(&client, &spec(&manifest("prom")), &mut status)
            .await
            .unwrap();

        assert_eq!(finalize(&client, &mut status).await.unwrap(), Outcome::Deleted);
        assert!(grafana.datasource(MAIN_ORG, "prom").is_none());

        grafana.clear_calls();
        assert_eq!(finalize(&client, &mut status).await.unwrap(), Outcome::AlreadyAbsent);
        assert!(grafana.calls().is_empty());
    }

    #[tokio::test]
    async fn test_forbidden_lookup_counts_as_absent() {
        let (grafana, client) = setup();
        let s = spec(&manifest("prom"));
        let mut status = DataSourceStatus {
            id: Some(DataSourceId::new(42)),
            org_id: Some(MAIN_ORG),
            ..Default::default()
        };
        grafana.fail_next("get_datasource", 403);

        let observation = client.observe(&s, &mut status).await.unwrap();

        assert!(!observation.exists);
        assert_eq!(grafana.call_count("get_datasource_by_name"), 0);
    }

    #[tokio::test]
    async fn test_forbidden_name_lookup_counts_as_absent() {
        let (grafana, client) = setup();
        let s = spec(&manifest("prom"));
        grafana.fail_next("get_datasource_by_name", 403);

        let observation = client.observe(&s, &mut DataSourceStatus::default()).await.unwrap();

        assert!(!observation.exists);
        assert_eq!(grafana.call_count("get_datasource_by_name"), 1);
    }
}
