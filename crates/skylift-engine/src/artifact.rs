//! Artifact publisher: upload a local source bundle and resolve its
//! storage location.

use std::path::Path;

use tracing::info;

use crate::api::StorageApi;
use crate::bucket::{ensure_bucket, EnsureBucket};
use crate::config::RetryPolicy;
use crate::error::{EngineError, EngineResult};
use crate::retry::retry;
use crate::types::ArtifactLocation;

/// Maximum source bundle size accepted by the platform: 500 MiB.
pub const MAX_ARTIFACT_BYTES: u64 = 500 * 1024 * 1024;

/// Parameters for one publish run.
#[derive(Debug, Clone)]
pub struct PublishArtifact<'a> {
    /// Target region.
    pub region: &'a str,
    /// The storage backend's default region.
    pub default_region: &'a str,
    /// Caller's account identifier.
    pub account_id: &'a str,
    /// Application name.
    pub application: &'a str,
    /// Version label being published.
    pub version_label: &'a str,
    /// Bucket override; a deterministic default is derived when `None`.
    pub bucket: Option<&'a str>,
    /// Whether a missing bucket may be created.
    pub create_bucket_if_missing: bool,
}

/// Deterministic default bucket name for a region/account pair.
#[must_use]
pub fn default_bucket_name(region: &str, account_id: &str) -> String {
    format!("skylift-artifacts-{region}-{account_id}")
}

/// Deterministic object key for a version's source bundle.
///
/// The extension is carried over from the local artifact so the platform
/// can tell bundle formats apart.
#[must_use]
pub fn artifact_key(application: &str, version_label: &str, artifact: &Path) -> String {
    match artifact.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{application}/{version_label}.{ext}"),
        None => format!("{application}/{version_label}"),
    }
}

/// Upload a local artifact and return where it landed.
///
/// The size ceiling is enforced from a local stat before any network call;
/// bucket ensure and the upload itself run through the retrier. Size,
/// ownership and transport failures stay distinguishable for the caller.
pub async fn publish(
    storage: &dyn StorageApi,
    policy: &RetryPolicy,
    params: PublishArtifact<'_>,
    artifact: &Path,
) -> EngineResult<ArtifactLocation> {
    let size = tokio::fs::metadata(artifact).await?.len();
    if size > MAX_ARTIFACT_BYTES {
        return Err(EngineError::ArtifactTooLarge {
            size,
            limit: MAX_ARTIFACT_BYTES,
        });
    }

    let bucket = params
        .bucket
        .map(str::to_owned)
        .unwrap_or_else(|| default_bucket_name(params.region, params.account_id));
    let key = artifact_key(params.application, params.version_label, artifact);

    ensure_bucket(
        storage,
        policy,
        EnsureBucket {
            bucket: &bucket,
            account_id: params.account_id,
            region: params.region,
            default_region: params.default_region,
            create_if_missing: params.create_bucket_if_missing,
        },
    )
    .await?;

    retry(policy, "upload artifact", || {
        storage.put_object(&bucket, &key, artifact)
    })
    .await?;

    info!(
        bucket = %bucket,
        key = %key,
        size_bytes = size,
        "artifact uploaded"
    );

    Ok(ArtifactLocation { bucket, key })
}
