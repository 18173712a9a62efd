use crate::{
    error::StateError,
    models::{url_safe, Checkpoint},
    StateStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::{json, Value as Json};
use std::time::Duration;
use tracing::{debug, warn};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const APP_LABEL: &str = "sqlextract";

/// Cluster-coordinated store backed by ConfigMaps.
///
/// Checkpoints live in `sqlextract-state-<job_id>`, leases in
/// `sqlextract-lock-<job_id>`. Checkpoint updates carry the observed
/// `resourceVersion`; the API server rejects stale writes with 409, which
/// surfaces as [`StateError::Conflict`] for the caller to re-read and
/// retry. Lease creation is atomic because ConfigMap creation is.
pub struct KubernetesStateStore {
    http: reqwest::Client,
    base_url: String,
    token: String,
    namespace: String,
}

impl KubernetesStateStore {
    /// Builds a store from the in-cluster service-account environment.
    pub async fn in_cluster(namespace: String) -> Result<Self, StateError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| StateError::Transport("not running inside a cluster".into()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());

        let token = tokio::fs::read_to_string(format!("{SERVICE_ACCOUNT_DIR}/token"))
            .await
            .map_err(|e| StateError::Transport(format!("cannot read service token: {e}")))?;

        let ca = tokio::fs::read(format!("{SERVICE_ACCOUNT_DIR}/ca.crt"))
            .await
            .map_err(|e| StateError::Transport(format!("cannot read cluster CA: {e}")))?;
        let certificate = reqwest::Certificate::from_pem(&ca)
            .map_err(|e| StateError::Transport(format!("invalid cluster CA: {e}")))?;

        let http = reqwest::Client::builder()
            .add_root_certificate(certificate)
            .build()
            .map_err(|e| StateError::Transport(e.to_string()))?;

        Ok(KubernetesStateStore {
            http,
            base_url: format!("https://{host}:{port}"),
            token: token.trim().to_string(),
            namespace,
        })
    }

    fn state_name(job_id: &str) -> String {
        format!("sqlextract-state-{}", url_safe(job_id))
    }

    fn lock_name(job_id: &str) -> String {
        format!("sqlextract-lock-{}", url_safe(job_id))
    }

    fn configmaps_url(&self) -> String {
        format!(
            "{}/api/v1/namespaces/{}/configmaps",
            self.base_url, self.namespace
        )
    }

    fn configmap_url(&self, name: &str) -> String {
        format!("{}/{name}", self.configmaps_url())
    }

    async fn get_object(&self, name: &str) -> Result<Option<Json>, StateError> {
        let response = self
            .http
            .get(self.configmap_url(name))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| StateError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(
                response
                    .json()
                    .await
                    .map_err(|e| StateError::Transport(e.to_string()))?,
            )),
            status => Err(StateError::Transport(format!(
                "GET {name}: {status}: {}",
                response.text().await.unwrap_or_default()
            ))),
        }
    }

    /// POST; returns false on 409 (object already present).
    async fn create_object(&self, body: &Json) -> Result<bool, StateError> {
        let response = self
            .http
            .post(self.configmaps_url())
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| StateError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::CONFLICT => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(StateError::Transport(format!(
                "POST configmap: {status}: {}",
                response.text().await.unwrap_or_default()
            ))),
        }
    }

    /// PUT with an expected resourceVersion; 409 means a concurrent writer
    /// won.
    async fn replace_object(
        &self,
        name: &str,
        job_id: &str,
        body: &Json,
    ) -> Result<(), StateError> {
        let response = self
            .http
            .put(self.configmap_url(name))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| StateError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::CONFLICT => Err(StateError::Conflict(job_id.to_string())),
            status if status.is_success() => Ok(()),
            status => Err(StateError::Transport(format!(
                "PUT {name}: {status}: {}",
                response.text().await.unwrap_or_default()
            ))),
        }
    }

    async fn delete_object(&self, name: &str) -> Result<(), StateError> {
        let response = self
            .http
            .delete(self.configmap_url(name))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| StateError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(StateError::Transport(format!(
                "DELETE {name}: {status}: {}",
                response.text().await.unwrap_or_default()
            ))),
        }
    }

    fn state_body(checkpoint: &Checkpoint, resource_version: Option<&str>) -> Result<Json, StateError> {
        let mut metadata = json!({
            "name": Self::state_name(&checkpoint.job_id),
            "labels": { "app": APP_LABEL },
        });
        if let Some(version) = resource_version {
            metadata["resourceVersion"] = Json::String(version.to_string());
        }
        Ok(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": metadata,
            "data": { "checkpoint": serde_json::to_string(checkpoint)? },
        }))
    }

    fn lock_body(job_id: &str, expires_at: DateTime<Utc>, resource_version: Option<&str>) -> Json {
        let mut metadata = json!({
            "name": Self::lock_name(job_id),
            "labels": { "app": APP_LABEL },
        });
        if let Some(version) = resource_version {
            metadata["resourceVersion"] = Json::String(version.to_string());
        }
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": metadata,
            "data": { "expires_at": expires_at.to_rfc3339() },
        })
    }

    fn parse_checkpoint(object: &Json) -> Result<Checkpoint, StateError> {
        let raw = object["data"]["checkpoint"].as_str().ok_or_else(|| {
            StateError::Transport("configmap is missing the checkpoint key".into())
        })?;
        Ok(serde_json::from_str(raw)?)
    }

    fn parse_lock_expiry(object: &Json) -> Option<DateTime<Utc>> {
        object["data"]["expires_at"]
            .as_str()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[async_trait]
impl StateStore for KubernetesStateStore {
    async fn get(&self, job_id: &str) -> Result<Option<Checkpoint>, StateError> {
        match self.get_object(&Self::state_name(job_id)).await? {
            Some(object) => Ok(Some(Self::parse_checkpoint(&object)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        let body = Self::state_body(checkpoint, None)?;
        if self.create_object(&body).await? {
            Ok(())
        } else {
            Err(StateError::AlreadyExists(checkpoint.job_id.clone()))
        }
    }

    async fn update(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        let name = Self::state_name(&checkpoint.job_id);
        let current = self
            .get_object(&name)
            .await?
            .ok_or_else(|| StateError::Conflict(checkpoint.job_id.clone()))?;
        let resource_version = current["metadata"]["resourceVersion"]
            .as_str()
            .map(str::to_string);

        let body = Self::state_body(checkpoint, resource_version.as_deref())?;
        self.replace_object(&name, &checkpoint.job_id, &body).await
    }

    async fn delete(&self, job_id: &str) -> Result<(), StateError> {
        self.delete_object(&Self::state_name(job_id)).await?;
        self.delete_object(&Self::lock_name(job_id)).await
    }

    async fn list(&self) -> Result<Vec<Checkpoint>, StateError> {
        let url = format!("{}?labelSelector=app%3D{APP_LABEL}", self.configmaps_url());
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| StateError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StateError::Transport(format!(
                "LIST configmaps: {}",
                response.status()
            )));
        }

        let body: Json = response
            .json()
            .await
            .map_err(|e| StateError::Transport(e.to_string()))?;

        let mut checkpoints = Vec::new();
        for item in body["items"].as_array().into_iter().flatten() {
            if item["data"]["checkpoint"].is_null() {
                continue; // lock objects carry the same label
            }
            match Self::parse_checkpoint(item) {
                Ok(cp) => checkpoints.push(cp),
                Err(e) => warn!(error = %e, "skipping unreadable state object"),
            }
        }
        Ok(checkpoints)
    }

    async fn acquire_lease(&self, job_id: &str, ttl: Duration) -> Result<bool, StateError> {
        let expires_at = Utc::now() + ttl;
        let body = Self::lock_body(job_id, expires_at, None);

        if self.create_object(&body).await? {
            return Ok(true);
        }

        // Creation lost: the lock object exists. Reclaim only if expired.
        let name = Self::lock_name(job_id);
        let Some(current) = self.get_object(&name).await? else {
            // Deleted between the POST and the GET; one more attempt.
            return self.create_object(&body).await;
        };

        match Self::parse_lock_expiry(&current) {
            Some(current_expiry) if current_expiry > Utc::now() => Ok(false),
            _ => {
                debug!(job_id, "reclaiming expired lease object");
                self.delete_object(&name).await?;
                self.create_object(&body).await
            }
        }
    }

    async fn renew_lease(&self, job_id: &str, ttl: Duration) -> Result<(), StateError> {
        let name = Self::lock_name(job_id);
        let current = self
            .get_object(&name)
            .await?
            .ok_or_else(|| StateError::Transport(format!("lease object missing for {job_id}")))?;
        let resource_version = current["metadata"]["resourceVersion"]
            .as_str()
            .map(str::to_string);

        let body = Self::lock_body(job_id, Utc::now() + ttl, resource_version.as_deref());
        self.replace_object(&name, job_id, &body).await
    }

    async fn release_lease(&self, job_id: &str) -> Result<(), StateError> {
        self.delete_object(&Self::lock_name(job_id)).await
    }
}
