//! Base URLs for a container's published ports.

use crate::error::Result;
use crate::runtime::ContainerInstance;
use crate::spec::PortSpec;

/// `http://{host}:{mapped}` for `port`.
pub fn resolve(instance: &ContainerInstance, port: PortSpec) -> Result<String> {
    resolve_with_scheme(instance, port, "http")
}

pub fn resolve_with_scheme(instance: &ContainerInstance, port: PortSpec, scheme: &str) -> Result<String> {
    let mapped = instance.mapped_port(port)?;
    Ok(format_url(scheme, instance.host(), mapped))
}

fn format_url(scheme: &str, host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("{scheme}://[{host}]:{port}")
    } else {
        format!("{scheme}://{host}:{port}")
    }
}
