//! Kong-specific defaults and customizers.

mod instance;
mod options;

use crate::spec::PortSpec;

pub use instance::{Gateway, GatewayUrls};
pub use options::{base_spec, declarative_config, expose_manager, plugin_server, wasm_filter};

pub const DEFAULT_IMAGE: &str = "kong:3.4";

pub const PROXY_PORT: PortSpec = PortSpec::tcp(8000);
pub const ADMIN_PORT: PortSpec = PortSpec::tcp(8001);
pub const MANAGER_PORT: PortSpec = PortSpec::tcp(8002);

pub const DECLARATIVE_CONFIG_PATH: &str = "/usr/local/kong/kong.yaml";
pub const PLUGIN_DIR: &str = "/usr/local/kong/go-plugins/bin";
pub const WASM_FILTERS_DIR: &str = "/usr/local/kong/wasm";
