use serde::{Deserialize, Serialize};
use tracing::info;

use super::options::base_spec;
use super::{ADMIN_PORT, MANAGER_PORT, PROXY_PORT};
use crate::error::Result;
use crate::logs::LogConsumer;
use crate::runtime::{ContainerInstance, RuntimeClient};
use crate::spec::{ContainerSpec, Customizer, apply_all};
use crate::url;

/// Base URLs of a running gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayUrls {
    pub admin: String,
    pub proxy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<String>,
}

/// A running, ready Kong container.
#[derive(Debug)]
pub struct Gateway {
    instance: ContainerInstance,
}

impl Gateway {
    /// The spec [`run`](Self::run) would launch.
    pub fn spec(image: &str, customizers: &[Customizer]) -> Result<ContainerSpec> {
        Ok(apply_all(&base_spec(image), customizers)?)
    }

    /// Launch `image` with the gateway defaults, then `customizers` in order.
    pub fn run(client: &RuntimeClient, image: &str, customizers: &[Customizer]) -> Result<Self> {
        let spec = Self::spec(image, customizers)?;
        let instance = client.start(spec)?;
        info!(id = instance.id(), image, "gateway ready");
        Ok(Self { instance })
    }

    pub fn admin_url(&self) -> Result<String> {
        url::resolve(&self.instance, ADMIN_PORT)
    }

    pub fn proxy_url(&self) -> Result<String> {
        url::resolve(&self.instance, PROXY_PORT)
    }

    /// Fails unless the gateway was started with [`expose_manager`](super::expose_manager).
    pub fn manager_url(&self) -> Result<String> {
        url::resolve(&self.instance, MANAGER_PORT)
    }

    pub fn urls(&self) -> Result<GatewayUrls> {
        let manager = if self.instance.port_mappings().contains_key(&MANAGER_PORT) {
            Some(self.manager_url()?)
        } else {
            None
        };
        Ok(GatewayUrls {
            admin: self.admin_url()?,
            proxy: self.proxy_url()?,
            manager,
        })
    }

    pub fn follow_logs(&self) -> Result<LogConsumer> {
        self.instance.follow_logs()
    }

    pub fn instance(&self) -> &ContainerInstance {
        &self.instance
    }

    pub fn into_instance(self) -> ContainerInstance {
        self.instance
    }

    pub fn terminate(&self) -> Result<()> {
        self.instance.terminate()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::gateway::{self, DEFAULT_IMAGE};
    use crate::runtime::ContainerState;
    use crate::spec::PortSpec;
    use crate::testing::FakeEngine;
    use crate::wait::WaitStrategy;

    // No wait strategy, so starting against the fake engine is immediate.
    fn run(engine: &Arc<FakeEngine>, customizers: &[Customizer]) -> Gateway {
        let mut customizers = customizers.to_vec();
        customizers.push(Customizer::wait_for(WaitStrategy::None));
        Gateway::run(&RuntimeClient::new(engine.clone()), DEFAULT_IMAGE, &customizers).unwrap()
    }

    #[test]
    fn urls_use_mapped_ports() {
        let engine = Arc::new(FakeEngine::with_ports([
            (PROXY_PORT, 49000),
            (ADMIN_PORT, 49001),
        ]));
        let kong = run(&engine, &[]);

        let urls = kong.urls().unwrap();
        assert_eq!(urls.admin, "http://127.0.0.1:49001");
        assert_eq!(urls.proxy, "http://127.0.0.1:49000");
        assert_eq!(urls.manager, None);
        assert!(kong.manager_url().is_err());
    }

    #[test]
    fn manager_url_when_exposed() {
        let engine = Arc::new(FakeEngine::with_ports([(PortSpec::tcp(8002), 49002)]));
        let kong = run(&engine, &[gateway::expose_manager()]);
        assert_eq!(kong.urls().unwrap().manager.as_deref(), Some("http://127.0.0.1:49002"));
    }

    #[test]
    fn urls_serialize_as_json() {
        let urls = GatewayUrls {
            admin: "http://localhost:1".into(),
            proxy: "http://localhost:2".into(),
            manager: None,
        };
        let json = serde_json::to_value(&urls).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"admin": "http://localhost:1", "proxy": "http://localhost:2"})
        );
        let back: GatewayUrls = serde_json::from_value(json).unwrap();
        assert_eq!(back, urls);
    }

    #[test]
    fn terminate_then_drop_removes_once() {
        let engine = Arc::new(FakeEngine::default());
        let kong = run(&engine, &[]);
        kong.terminate().unwrap();
        assert_eq!(kong.instance().state(), ContainerState::Terminated);
        drop(kong);
        assert_eq!(engine.removed().len(), 1);
    }

    #[test]
    fn launched_spec_carries_defaults_and_overrides() {
        let engine = Arc::new(FakeEngine::default());
        let _kong = run(&engine, &[Customizer::env("KONG_LOG_LEVEL", "warn")]);
        let created = engine.created();
        let (spec, _) = &created[0];
        assert_eq!(spec.image(), DEFAULT_IMAGE);
        assert_eq!(spec.env_var("KONG_LOG_LEVEL"), Some("warn"));
        assert_eq!(spec.env_var("KONG_DATABASE"), Some("off"));
    }
}
