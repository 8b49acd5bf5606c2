//! Per-region client factory.
//!
//! One set of service clients is built lazily per region and reused for the
//! process lifetime. The factory is passed down the call graph explicitly
//! rather than living behind a global accessor; tests reset it through
//! [`ClientFactory::clear`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::api::http::{build_client, HttpIdentity, HttpPlatform, HttpStorage};
use crate::api::mock::{MockIdentity, MockPlatform, MockStorage};
use crate::api::{IdentityApi, PlatformApi, StorageApi};
use crate::config::{ApiConfig, ApiMode};
use crate::error::EngineResult;

/// The three service clients for one region.
#[derive(Clone)]
pub struct RegionClients {
    /// Identity service client.
    pub identity: Arc<dyn IdentityApi>,
    /// Object storage service client.
    pub storage: Arc<dyn StorageApi>,
    /// Application platform service client.
    pub platform: Arc<dyn PlatformApi>,
}

impl std::fmt::Debug for RegionClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionClients").finish_non_exhaustive()
    }
}

/// Lazily builds and caches service clients per region.
#[derive(Debug)]
pub struct ClientFactory {
    config: ApiConfig,
    clients: RwLock<HashMap<String, RegionClients>>,
}

impl ClientFactory {
    /// Create a factory from API configuration.
    #[must_use]
    pub fn new(config: ApiConfig) -> Self {
        Self {
            config,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// The API configuration this factory was built with.
    #[must_use]
    pub const fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Get (building if necessary) the clients for a region.
    pub async fn for_region(&self, region: &str) -> EngineResult<RegionClients> {
        {
            let clients = self.clients.read().await;
            if let Some(existing) = clients.get(region) {
                return Ok(existing.clone());
            }
        }

        let mut clients = self.clients.write().await;
        // Another caller may have built the clients between the locks.
        if let Some(existing) = clients.get(region) {
            return Ok(existing.clone());
        }

        debug!(region = %region, mode = ?self.config.mode, "building region clients");
        let built = self.build(region)?;
        clients.insert(region.to_owned(), built.clone());
        Ok(built)
    }

    /// Drop all cached clients. Intended for tests.
    pub async fn clear(&self) {
        self.clients.write().await.clear();
    }

    fn build(&self, region: &str) -> EngineResult<RegionClients> {
        match self.config.mode {
            ApiMode::Http => {
                let base_url = self.config.endpoint_for(region);
                let client = build_client(&self.config)?;
                Ok(RegionClients {
                    identity: Arc::new(HttpIdentity::new(client.clone(), base_url.clone())),
                    storage: Arc::new(HttpStorage::new(client.clone(), base_url.clone())),
                    platform: Arc::new(HttpPlatform::new(client, base_url)),
                })
            }
            ApiMode::Mock => {
                let identity = MockIdentity::default();
                Ok(RegionClients {
                    identity: Arc::new(identity),
                    storage: Arc::new(MockStorage::new("123456789012")),
                    platform: Arc::new(MockPlatform::new()),
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clients_are_reused_per_region() {
        let factory = ClientFactory::new(ApiConfig::default());

        let first = factory.for_region("eu-west-1").await.unwrap();
        let second = factory.for_region("eu-west-1").await.unwrap();
        assert!(Arc::ptr_eq(&first.platform, &second.platform));

        let other = factory.for_region("us-east-1").await.unwrap();
        assert!(!Arc::ptr_eq(&first.platform, &other.platform));
    }

    #[tokio::test]
    async fn clear_drops_cached_clients() {
        let factory = ClientFactory::new(ApiConfig::default());

        let first = factory.for_region("eu-west-1").await.unwrap();
        factory.clear().await;
        let second = factory.for_region("eu-west-1").await.unwrap();
        assert!(!Arc::ptr_eq(&first.platform, &second.platform));
    }
}
