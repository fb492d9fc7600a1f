use std::path::Path;

use super::{
    ADMIN_PORT, DECLARATIVE_CONFIG_PATH, MANAGER_PORT, PLUGIN_DIR, PROXY_PORT, WASM_FILTERS_DIR,
};
use crate::spec::{ContainerSpec, Customizer};
use crate::wait::WaitStrategy;

/// A DB-less gateway listening on the proxy and admin ports, ready once the
/// admin port accepts connections. Logs go to the container's stdout/stderr.
pub fn base_spec(image: &str) -> ContainerSpec {
    let mut spec = ContainerSpec::new(image);
    spec.exposed_ports.extend([PROXY_PORT, ADMIN_PORT]);
    spec.env.extend(
        [
            ("KONG_DATABASE", "off"),
            ("KONG_LOG_LEVEL", "debug"),
            ("KONG_PROXY_ACCESS_LOG", "/dev/stdout"),
            ("KONG_ADMIN_ACCESS_LOG", "/dev/stdout"),
            ("KONG_PROXY_ERROR_LOG", "/dev/stderr"),
            ("KONG_ADMIN_ERROR_LOG", "/dev/stderr"),
            ("KONG_ADMIN_LISTEN", "0.0.0.0:8001"),
        ]
        .map(|(k, v)| (k.to_string(), v.to_string())),
    );
    spec.command = vec!["kong".into(), "start".into()];
    spec.wait_strategy = WaitStrategy::port_open(ADMIN_PORT);
    spec
}

/// Load routes and services from a declarative config file on the host.
pub fn declarative_config(host_path: impl AsRef<Path>) -> Customizer {
    Customizer::many([
        Customizer::file(host_path.as_ref(), DECLARATIVE_CONFIG_PATH, 0o644),
        Customizer::env("KONG_DECLARATIVE_CONFIG", DECLARATIVE_CONFIG_PATH),
    ])
}

/// Register an external plugin server: the binary is installed under the
/// plugin directory and wired into `KONG_PLUGINS`.
pub fn plugin_server(name: &str, host_binary: impl AsRef<Path>) -> Customizer {
    let path = format!("{PLUGIN_DIR}/{name}");
    let key = env_key_part(name);
    Customizer::many([
        Customizer::file(host_binary.as_ref(), path.clone(), 0o755),
        Customizer::append_env_list("KONG_PLUGINS", name),
        Customizer::append_env_list("KONG_PLUGINSERVER_NAMES", name),
        Customizer::env(format!("KONG_PLUGINSERVER_{key}_START_CMD"), path.clone()),
        Customizer::env(format!("KONG_PLUGINSERVER_{key}_QUERY_CMD"), format!("{path} -dump")),
    ])
}

/// Enable the wasm subsystem and install `<name>.wasm` as a filter.
pub fn wasm_filter(name: &str, host_wasm: impl AsRef<Path>) -> Customizer {
    Customizer::many([
        Customizer::env("KONG_WASM", "on"),
        Customizer::env("KONG_WASM_FILTERS_PATH", WASM_FILTERS_DIR),
        Customizer::file(
            host_wasm.as_ref(),
            format!("{WASM_FILTERS_DIR}/{name}.wasm"),
            0o644,
        ),
    ])
}

/// Also publish the Kong Manager UI port.
pub fn expose_manager() -> Customizer {
    Customizer::expose([MANAGER_PORT])
}

/// `my-plugin` → `MY_PLUGIN`
fn env_key_part(name: &str) -> String {
    name.to_ascii_uppercase().replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::apply_all;

    const IMAGE: &str = "kong:3.4";

    #[test]
    fn base_spec_defaults() {
        let spec = base_spec(IMAGE);
        assert_eq!(spec.image(), IMAGE);
        assert!(spec.is_exposed(PROXY_PORT));
        assert!(spec.is_exposed(ADMIN_PORT));
        assert!(!spec.is_exposed(MANAGER_PORT));
        assert_eq!(spec.env_var("KONG_DATABASE"), Some("off"));
        assert_eq!(spec.env_var("KONG_ADMIN_LISTEN"), Some("0.0.0.0:8001"));
        assert_eq!(spec.env_var("KONG_DECLARATIVE_CONFIG"), None);
        assert_eq!(spec.command(), ["kong", "start"]);
        assert_eq!(spec.wait_strategy().ports(), vec![ADMIN_PORT]);
        spec.validate().unwrap();
    }

    #[test]
    fn declarative_config_mounts_and_points_at_file() {
        let spec = apply_all(&base_spec(IMAGE), &[declarative_config("/work/kong.yaml")]).unwrap();
        assert_eq!(spec.env_var("KONG_DECLARATIVE_CONFIG"), Some(DECLARATIVE_CONFIG_PATH));
        let files = spec.files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].container_path, DECLARATIVE_CONFIG_PATH);
        assert_eq!(files[0].mode, 0o644);
    }

    #[test]
    fn plugin_server_sets_four_keys_and_one_executable_mount() {
        let spec = apply_all(&base_spec(IMAGE), &[plugin_server("goplug", "/build/goplug")]).unwrap();

        assert_eq!(spec.env_var("KONG_PLUGINS"), Some("goplug"));
        assert_eq!(spec.env_var("KONG_PLUGINSERVER_NAMES"), Some("goplug"));
        assert_eq!(
            spec.env_var("KONG_PLUGINSERVER_GOPLUG_START_CMD"),
            Some("/usr/local/kong/go-plugins/bin/goplug")
        );
        assert_eq!(
            spec.env_var("KONG_PLUGINSERVER_GOPLUG_QUERY_CMD"),
            Some("/usr/local/kong/go-plugins/bin/goplug -dump")
        );
        let files = spec.files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].container_path, "/usr/local/kong/go-plugins/bin/goplug");
        assert_eq!(files[0].mode, 0o755);
    }

    #[test]
    fn plugin_lists_accumulate_without_duplicates() {
        let spec = apply_all(
            &base_spec(IMAGE),
            &[
                Customizer::env("KONG_PLUGINS", "bundled"),
                plugin_server("goplug", "/build/goplug"),
                plugin_server("rate-limit-ext", "/build/rl"),
                plugin_server("goplug", "/build/goplug"),
            ],
        )
        .unwrap();
        assert_eq!(spec.env_var("KONG_PLUGINS"), Some("bundled,goplug,rate-limit-ext"));
        assert_eq!(spec.env_var("KONG_PLUGINSERVER_NAMES"), Some("goplug,rate-limit-ext"));
        assert!(spec.env_var("KONG_PLUGINSERVER_RATE_LIMIT_EXT_START_CMD").is_some());
        // Re-attaching the same plugin shadows the earlier mount.
        assert_eq!(spec.files().len(), 3);
        assert_eq!(spec.effective_files().len(), 2);
    }

    #[test]
    fn wasm_filter_enables_wasm() {
        let spec = apply_all(&base_spec(IMAGE), &[wasm_filter("hello", "/build/hello.wasm")]).unwrap();
        assert_eq!(spec.env_var("KONG_WASM"), Some("on"));
        assert_eq!(spec.env_var("KONG_WASM_FILTERS_PATH"), Some(WASM_FILTERS_DIR));
        assert_eq!(spec.files()[0].container_path, "/usr/local/kong/wasm/hello.wasm");
        assert_eq!(spec.files()[0].mode, 0o644);
    }

    #[test]
    fn overrides_apply_after_defaults() {
        let spec = apply_all(
            &base_spec(IMAGE),
            &[
                expose_manager(),
                Customizer::env("KONG_LOG_LEVEL", "info"),
                Customizer::image("kong/kong-gateway:3.4"),
            ],
        )
        .unwrap();
        assert!(spec.is_exposed(MANAGER_PORT));
        assert_eq!(spec.env_var("KONG_LOG_LEVEL"), Some("info"));
        assert_eq!(spec.image(), "kong/kong-gateway:3.4");
        // Untouched defaults survive.
        assert_eq!(spec.env_var("KONG_DATABASE"), Some("off"));
    }

    #[test]
    fn env_key_part_uppercases_and_replaces_dashes() {
        assert_eq!(env_key_part("goplug"), "GOPLUG");
        assert_eq!(env_key_part("my-plugin"), "MY_PLUGIN");
    }
}
