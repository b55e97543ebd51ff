// Platform routing table
// Maps each enabled platform to its profile, transport, timeout and circuit.

use super::PlatformTransport;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::models::Platform;
use crate::transform::PlatformProfile;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct PlatformRoute {
    pub profile: PlatformProfile,
    pub transport: Arc<dyn PlatformTransport>,
    /// Upper bound on one transport call
    pub timeout: Duration,
    pub circuit: CircuitBreaker,
}

impl PlatformRoute {
    pub fn new(
        platform: Platform,
        transport: Arc<dyn PlatformTransport>,
        timeout: Duration,
        circuit: CircuitBreakerConfig,
    ) -> Self {
        Self {
            profile: PlatformProfile::for_platform(platform),
            transport,
            timeout,
            circuit: CircuitBreaker::new(platform.as_str(), circuit),
        }
    }
}

impl std::fmt::Debug for PlatformRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformRoute")
            .field("platform", &self.profile.platform)
            .field("timeout", &self.timeout)
            .field("circuit", &self.circuit.state())
            .finish()
    }
}

/// Routes for every platform the process can deliver to
#[derive(Debug, Clone, Default)]
pub struct PlatformRegistry {
    routes: HashMap<Platform, PlatformRoute>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, route: PlatformRoute) -> Self {
        self.insert(route);
        self
    }

    pub fn insert(&mut self, route: PlatformRoute) {
        self.routes.insert(route.profile.platform, route);
    }

    pub fn route(&self, platform: Platform) -> Option<&PlatformRoute> {
        self.routes.get(&platform)
    }

    /// Configured platforms in a stable order
    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.routes.keys().copied().collect();
        platforms.sort();
        platforms
    }

    /// Largest transport timeout over all routes
    pub fn max_timeout(&self) -> Duration {
        self.routes
            .values()
            .map(|r| r.timeout)
            .max()
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use crate::errors::TransportError;
    use crate::transform::PlatformPayload;
    use crate::transport::RemotePost;
    use async_trait::async_trait;

    struct NoopTransport;

    #[async_trait]
    impl PlatformTransport for NoopTransport {
        async fn publish(
            &self,
            _payload: &PlatformPayload,
            _credential: &Credential,
        ) -> Result<RemotePost, TransportError> {
            Err(TransportError::Network("unused".into()))
        }
    }

    fn route(platform: Platform, timeout_secs: u64) -> PlatformRoute {
        PlatformRoute::new(
            platform,
            Arc::new(NoopTransport),
            Duration::from_secs(timeout_secs),
            CircuitBreakerConfig::default(),
        )
    }

    #[test]
    fn test_registry_lookup_and_max_timeout() {
        let registry = PlatformRegistry::new()
            .with_route(route(Platform::Vk, 10))
            .with_route(route(Platform::Telegram, 30));

        assert_eq!(registry.platforms(), vec![Platform::Telegram, Platform::Vk]);
        assert_eq!(registry.max_timeout(), Duration::from_secs(30));
        assert!(registry.route(Platform::Instagram).is_none());
        assert_eq!(
            registry.route(Platform::Vk).map(|r| r.circuit.name().to_string()),
            Some("vk".to_string())
        );
    }

    #[test]
    fn test_empty_registry() {
        let registry = PlatformRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.max_timeout(), Duration::ZERO);
    }
}
