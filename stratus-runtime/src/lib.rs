//! # Stratus Runtime
//!
//! The adapter between the compute control plane and a host container
//! runtime. [`ContainerRuntime`] is the seam: the compute service and the
//! reconciler speak only this trait. [`DockerRuntime`] implements it
//! against a local Docker daemon via `bollard`; [`FakeRuntime`] is a fully
//! scriptable in-memory implementation used by tests and available for
//! driverless development.
//!
//! Calls on the same container id are serialized with a per-id mutex so
//! lifecycle transitions cannot interleave. Failures are classified into
//! the shared error kinds: Docker 404 becomes `NotFound`, 409 (and address
//! pool overlaps) `Conflict`-class `AlreadyExists`, transport failures
//! `Unavailable`.

mod docker;
mod fake;
mod types;

pub use docker::DockerRuntime;
pub use fake::FakeRuntime;
pub use types::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ContainerStatus, ContainerSummary,
    NetworkSpec,
};

/// Label marking every container and network the emulator owns.
pub const MANAGED_LABEL: &str = "stratus.managed";
/// Label carrying the owning project id.
pub const PROJECT_LABEL: &str = "stratus.project";
/// Label carrying the zone of the instance.
pub const ZONE_LABEL: &str = "stratus.zone";
/// Label carrying the instance name.
pub const INSTANCE_LABEL: &str = "stratus.instance";

/// The label filter selecting emulator-managed containers.
pub fn managed_filter() -> String {
    format!("{MANAGED_LABEL}=true")
}
