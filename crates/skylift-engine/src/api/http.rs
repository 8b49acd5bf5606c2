//! HTTP clients for the regional control-plane services.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Response, StatusCode};
use tokio_util::io::ReaderStream;

use crate::api::{
    BucketCreation, BucketProbe, CreateEnvironmentRequest, CreateVersionRequest,
    EnvironmentDescription, EventDescription, IdentityApi, PlatformApi, StorageApi,
    UpdateEnvironmentRequest, VersionDescription,
};
use crate::config::ApiConfig;
use crate::error::{matches_auth_pattern, EngineError, EngineResult};

/// Header naming the account expected to own a bucket.
const EXPECTED_OWNER_HEADER: &str = "x-expected-owner";

/// Uploads get a generous per-request timeout instead of the control-call
/// default; large bundles on slow links legitimately take minutes.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(3600);

/// Build the shared HTTP client for one region's services.
pub fn build_client(config: &ApiConfig) -> EngineResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .map_err(EngineError::Http)
}

/// Turn a non-success response into the appropriate error kind.
///
/// 401/403 and auth-flavoured bodies become [`EngineError::AuthDenied`];
/// everything else is a transient remote error.
async fn error_for(context: &str, response: Response) -> EngineError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = if body.is_empty() {
        format!("{context}: {status}")
    } else {
        format!("{context}: {status} - {body}")
    };

    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || matches_auth_pattern(&detail)
    {
        EngineError::AuthDenied(detail)
    } else {
        EngineError::Remote(detail)
    }
}

#[derive(serde::Deserialize)]
struct IdentityResponse {
    account_id: String,
}

/// HTTP client for the identity service.
#[derive(Debug, Clone)]
pub struct HttpIdentity {
    client: Client,
    base_url: String,
}

impl HttpIdentity {
    /// Create a new identity client.
    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl IdentityApi for HttpIdentity {
    async fn account_id(&self) -> EngineResult<String> {
        let url = format!("{}/identity", self.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(error_for("resolve account identity", response).await);
        }

        let identity: IdentityResponse = response.json().await?;
        Ok(identity.account_id)
    }
}

/// HTTP client for the object storage service.
#[derive(Debug, Clone)]
pub struct HttpStorage {
    client: Client,
    base_url: String,
}

impl HttpStorage {
    /// Create a new storage client.
    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[derive(serde::Serialize)]
struct CreateBucketBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

#[async_trait]
impl StorageApi for HttpStorage {
    async fn probe_bucket(
        &self,
        bucket: &str,
        expected_owner: &str,
    ) -> EngineResult<BucketProbe> {
        let url = format!("{}/buckets/{}", self.base_url, bucket);
        let response = self
            .client
            .get(&url)
            .header(EXPECTED_OWNER_HEADER, expected_owner)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(BucketProbe::Owned),
            // The storage service answers 403 on an owner mismatch for this
            // endpoint; the bucket exists but is not ours.
            StatusCode::FORBIDDEN => Ok(BucketProbe::ForeignOwner),
            StatusCode::NOT_FOUND => Ok(BucketProbe::Missing),
            _ => Err(error_for("probe bucket", response).await),
        }
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        location: Option<&str>,
    ) -> EngineResult<BucketCreation> {
        let url = format!("{}/buckets/{}", self.base_url, bucket);
        let response = self
            .client
            .put(&url)
            .json(&CreateBucketBody { location })
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(BucketCreation::Created),
            StatusCode::CONFLICT => Ok(BucketCreation::AlreadyExists),
            _ => Err(error_for("create bucket", response).await),
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, source: &Path) -> EngineResult<()> {
        let file = tokio::fs::File::open(source).await?;
        let length = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let url = format!("{}/buckets/{}/objects/{}", self.base_url, bucket, key);
        let response = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_LENGTH, length)
            .timeout(UPLOAD_TIMEOUT)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for("upload object", response).await);
        }

        Ok(())
    }
}

/// HTTP client for the application platform service.
#[derive(Debug, Clone)]
pub struct HttpPlatform {
    client: Client,
    base_url: String,
}

impl HttpPlatform {
    /// Create a new platform client.
    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PlatformApi for HttpPlatform {
    async fn describe_version(
        &self,
        application: &str,
        label: &str,
    ) -> EngineResult<Option<VersionDescription>> {
        let url = format!(
            "{}/applications/{}/versions/{}",
            self.base_url, application, label
        );
        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => response.json().await.map(Some).map_err(EngineError::Http),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(error_for("describe version", response).await),
        }
    }

    async fn create_version(&self, request: &CreateVersionRequest) -> EngineResult<()> {
        let url = format!(
            "{}/applications/{}/versions",
            self.base_url, request.application
        );
        let response = self.client.post(&url).json(request).send().await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(EngineError::VersionConflict {
                application: request.application.clone(),
                label: request.label.clone(),
            }),
            _ => Err(error_for("create version", response).await),
        }
    }

    async fn describe_environment(
        &self,
        application: &str,
        environment: &str,
    ) -> EngineResult<Option<EnvironmentDescription>> {
        let url = format!(
            "{}/applications/{}/environments/{}",
            self.base_url, application, environment
        );
        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => response.json().await.map(Some).map_err(EngineError::Http),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(error_for("describe environment", response).await),
        }
    }

    async fn create_environment(
        &self,
        request: &CreateEnvironmentRequest,
    ) -> EngineResult<EnvironmentDescription> {
        let url = format!(
            "{}/applications/{}/environments",
            self.base_url, request.application
        );
        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            return Err(error_for("create environment", response).await);
        }

        response.json().await.map_err(EngineError::Http)
    }

    async fn update_environment(
        &self,
        request: &UpdateEnvironmentRequest,
    ) -> EngineResult<EnvironmentDescription> {
        let url = format!(
            "{}/applications/{}/environments/{}",
            self.base_url, request.application, request.environment
        );
        let response = self.client.put(&url).json(request).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(EngineError::not_found(format!(
                "environment {} not found for update",
                request.environment
            ))),
            status if status.is_success() => response.json().await.map_err(EngineError::Http),
            _ => Err(error_for("update environment", response).await),
        }
    }

    async fn environment_events(
        &self,
        application: &str,
        environment: &str,
        start_time: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<EventDescription>> {
        let mut url = format!(
            "{}/applications/{}/environments/{}/events",
            self.base_url, application, environment
        );
        if let Some(start) = start_time {
            url.push_str(&format!(
                "?start_time={}",
                start.to_rfc3339_opts(SecondsFormat::Millis, true)
            ));
        }

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(error_for("fetch environment events", response).await);
        }

        response.json().await.map_err(EngineError::Http)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn client_creation() {
        let config = ApiConfig::default();
        assert!(build_client(&config).is_ok());
    }

    #[test]
    fn clients_share_base_url_shape() {
        let client = build_client(&ApiConfig::default()).unwrap();
        let identity = HttpIdentity::new(client.clone(), "http://localhost:9400");
        let storage = HttpStorage::new(client.clone(), "http://localhost:9400");
        let platform = HttpPlatform::new(client, "http://localhost:9400");

        assert_eq!(identity.base_url, storage.base_url);
        assert_eq!(storage.base_url, platform.base_url);
    }
}
