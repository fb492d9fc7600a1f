// Harness configuration: `.kongtest.yaml` plus `KONGTEST_*` overrides.

mod loader;
mod types;

pub use loader::{CONFIG_FILE, load, load_file};
pub use types::{DOCKER_ENV, HarnessConfig, IMAGE_ENV};
