//! Types shared between the capture-the-flag mode and the host engine's script shim.

pub mod config;
pub mod protocol;
pub mod vec3;
