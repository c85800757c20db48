//! Routing entries for the control plane's own API.

use berth_routing::{FrontendSpec, RoutingError, RoutingRegistrar, DEFAULT_SERVER_NAME};
use tracing::info;

pub const PLATFORM_FRONTEND: &str = "berth";
pub const PLATFORM_BACKEND: &str = "berth_backend";

/// Make the public domain route to this process.
///
/// An existing platform frontend is left as is; the backend address is
/// always rewritten.
pub async fn register_platform(
    routing: &RoutingRegistrar,
    public_addr: &str,
    https: bool,
    self_addr: &str,
) -> Result<(), RoutingError> {
    if !routing.frontend_exists(PLATFORM_FRONTEND).await? {
        let spec = FrontendSpec {
            rule: format!("Host: {public_addr}"),
            pass_host_header: true,
            ssl_redirect: https.then_some(true),
            backend: PLATFORM_BACKEND.to_string(),
        };
        routing.register_frontend(PLATFORM_FRONTEND, &spec).await?;
        info!(frontend = PLATFORM_FRONTEND, rule = %spec.rule, "Registered platform frontend");
    }

    routing
        .upsert_backend(PLATFORM_BACKEND, DEFAULT_SERVER_NAME, self_addr)
        .await?;
    info!(backend = PLATFORM_BACKEND, address = %self_addr, "Registered platform backend");
    Ok(())
}

/// Withdraw the platform backend on shutdown.
pub async fn deregister_platform(routing: &RoutingRegistrar) -> Result<(), RoutingError> {
    routing.delete_backend(PLATFORM_BACKEND).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use berth_routing::MemoryKv;

    use super::*;

    fn registrar(kv: &Arc<MemoryKv>) -> RoutingRegistrar {
        RoutingRegistrar::new(kv.clone(), "traefik")
    }

    #[tokio::test]
    async fn test_registers_frontend_and_backend() {
        let kv = Arc::new(MemoryKv::new());
        register_platform(&registrar(&kv), "example.com", true, "http://berth:8080")
            .await
            .unwrap();

        let keys = kv.snapshot().await;
        assert_eq!(
            keys.get("traefik/frontends/berth/routes/host/rule").map(String::as_str),
            Some("Host: example.com")
        );
        assert_eq!(
            keys.get("traefik/frontends/berth/headers/sslredirect").map(String::as_str),
            Some("true")
        );
        assert_eq!(
            keys.get("traefik/frontends/berth/backend").map(String::as_str),
            Some("berth_backend")
        );
        assert_eq!(
            keys.get("traefik/backends/berth_backend/servers/main/url").map(String::as_str),
            Some("http://berth:8080")
        );
    }

    #[tokio::test]
    async fn test_existing_frontend_is_kept() {
        let kv = Arc::new(MemoryKv::new());
        let routing = registrar(&kv);
        routing
            .upsert_frontend_rule(PLATFORM_FRONTEND, "Host: custom.example.com")
            .await
            .unwrap();

        register_platform(&routing, "example.com", false, "http://berth")
            .await
            .unwrap();

        let keys = kv.snapshot().await;
        assert_eq!(
            keys.get("traefik/frontends/berth/routes/host/rule").map(String::as_str),
            Some("Host: custom.example.com")
        );
        assert!(!keys.contains_key("traefik/frontends/berth/backend"));
        assert!(keys.contains_key("traefik/backends/berth_backend/servers/main/url"));
    }

    #[tokio::test]
    async fn test_deregister_removes_backend_only() {
        let kv = Arc::new(MemoryKv::new());
        let routing = registrar(&kv);
        register_platform(&routing, "example.com", false, "http://berth")
            .await
            .unwrap();

        deregister_platform(&routing).await.unwrap();
        deregister_platform(&routing).await.unwrap();

        let keys = kv.snapshot().await;
        assert!(keys.keys().all(|k| !k.starts_with("traefik/backends/")));
        assert!(keys.contains_key("traefik/frontends/berth/backend"));
    }
}
