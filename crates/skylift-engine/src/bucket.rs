//! Ownership-verifying bucket ensurer.
//!
//! Bucket names live in a shared global namespace, so "the bucket exists"
//! is never enough to write to it: another tenant could have pre-claimed
//! the name. Every upload path goes through [`ensure_bucket`], which is the
//! sole bucket mutation path in the engine.

use tracing::{debug, info};

use crate::api::{BucketCreation, BucketProbe, StorageApi};
use crate::config::RetryPolicy;
use crate::error::{EngineError, EngineResult};
use crate::retry::retry;

/// Parameters for one bucket-ensure run.
#[derive(Debug, Clone)]
pub struct EnsureBucket<'a> {
    /// Bucket name.
    pub bucket: &'a str,
    /// Account that must own the bucket.
    pub account_id: &'a str,
    /// Region the bucket should be created in.
    pub region: &'a str,
    /// The storage backend's default region; creation there omits the
    /// location qualifier.
    pub default_region: &'a str,
    /// Whether a missing bucket may be created.
    pub create_if_missing: bool,
}

/// Idempotently guarantee the bucket exists and is owned by the caller.
///
/// The existence probe is ownership-aware; a bucket owned by another
/// account fails immediately and no creation or upload is ever attempted
/// against it. A creation that races into "already exists" re-probes
/// ownership, so no path out of this function skips the ownership check.
pub async fn ensure_bucket(
    storage: &dyn StorageApi,
    policy: &RetryPolicy,
    params: EnsureBucket<'_>,
) -> EngineResult<()> {
    let probe = retry(policy, "probe bucket", || {
        storage.probe_bucket(params.bucket, params.account_id)
    })
    .await?;

    match probe {
        BucketProbe::Owned => {
            debug!(bucket = %params.bucket, "bucket exists and is owned by caller");
            Ok(())
        }
        BucketProbe::ForeignOwner => Err(EngineError::BucketOwnership {
            bucket: params.bucket.to_owned(),
        }),
        BucketProbe::Missing if !params.create_if_missing => Err(EngineError::validation(format!(
            "bucket {} does not exist and bucket creation is disabled",
            params.bucket
        ))),
        BucketProbe::Missing => create_and_verify(storage, policy, &params).await,
    }
}

async fn create_and_verify(
    storage: &dyn StorageApi,
    policy: &RetryPolicy,
    params: &EnsureBucket<'_>,
) -> EngineResult<()> {
    let location = (params.region != params.default_region).then_some(params.region);

    let creation = retry(policy, "create bucket", || {
        storage.create_bucket(params.bucket, location)
    })
    .await?;

    match creation {
        BucketCreation::Created => {
            info!(bucket = %params.bucket, region = %params.region, "bucket created");
            Ok(())
        }
        BucketCreation::AlreadyExists => {
            // Lost a creation race; whoever won may not be us.
            let probe = retry(policy, "probe bucket", || {
                storage.probe_bucket(params.bucket, params.account_id)
            })
            .await?;

            match probe {
                BucketProbe::Owned => Ok(()),
                _ => Err(EngineError::BucketOwnership {
                    bucket: params.bucket.to_owned(),
                }),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::mock::MockStorage;

    const ACCOUNT: &str = "111122223333";

    fn params<'a>(bucket: &'a str, create: bool) -> EnsureBucket<'a> {
        EnsureBucket {
            bucket,
            account_id: ACCOUNT,
            region: "eu-west-1",
            default_region: "us-east-1",
            create_if_missing: create,
        }
    }

    #[tokio::test]
    async fn owned_bucket_needs_no_creation() {
        let storage = MockStorage::new(ACCOUNT);
        storage.seed_bucket("deploys", ACCOUNT);

        ensure_bucket(&storage, &RetryPolicy::none(), params("deploys", true))
            .await
            .unwrap();
        assert_eq!(storage.create_call_count(), 0);
    }

    #[tokio::test]
    async fn foreign_bucket_fails_without_creation() {
        let storage = MockStorage::new(ACCOUNT);
        storage.seed_bucket("deploys", "999988887777");

        let result =
            ensure_bucket(&storage, &RetryPolicy::none(), params("deploys", true)).await;
        assert!(matches!(result, Err(EngineError::BucketOwnership { .. })));
        assert_eq!(storage.create_call_count(), 0);
    }

    #[tokio::test]
    async fn missing_bucket_without_create_flag_fails() {
        let storage = MockStorage::new(ACCOUNT);

        let result =
            ensure_bucket(&storage, &RetryPolicy::none(), params("deploys", false)).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert_eq!(storage.create_call_count(), 0);
    }

    #[tokio::test]
    async fn missing_bucket_is_created() {
        let storage = MockStorage::new(ACCOUNT);

        ensure_bucket(&storage, &RetryPolicy::none(), params("deploys", true))
            .await
            .unwrap();
        assert_eq!(storage.create_call_count(), 1);

        // Second run sees the bucket and is a no-op.
        ensure_bucket(&storage, &RetryPolicy::none(), params("deploys", true))
            .await
            .unwrap();
        assert_eq!(storage.create_call_count(), 1);
    }

    #[tokio::test]
    async fn creation_race_reprobes_ownership() {
        let storage = MockStorage::new(ACCOUNT);
        // The mock returns AlreadyExists when the bucket is present at
        // create time; seed it as ours to simulate winning the race
        // elsewhere in this account.
        storage.seed_bucket("deploys", ACCOUNT);

        let result = create_and_verify(
            &storage,
            &RetryPolicy::none(),
            &params("deploys", true),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn creation_race_lost_to_foreign_account_fails() {
        let storage = MockStorage::new(ACCOUNT);
        storage.seed_bucket("deploys", "999988887777");

        let result = create_and_verify(
            &storage,
            &RetryPolicy::none(),
            &params("deploys", true),
        )
        .await;
        assert!(matches!(result, Err(EngineError::BucketOwnership { .. })));
    }
}
