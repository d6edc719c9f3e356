//! Container runtime implementations.
//!
//! - `docker`: Docker Engine API via bollard (also works against Podman's
//!   Docker-compatible socket)

pub mod docker;

pub use docker::DockerRuntime;
