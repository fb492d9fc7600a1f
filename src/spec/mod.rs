// Container specs: what to launch, and the customizers that build it.

mod customize;
mod types;

pub use customize::{Customizer, apply_all};
pub use types::{ContainerSpec, FileMount, PortSpec, Protocol, SpecError};
