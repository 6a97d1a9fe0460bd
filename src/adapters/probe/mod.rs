//! Credential probes: live HTTP check and a static stand-in.

pub mod http_probe;

pub use http_probe::{HttpCredentialProbe, StaticProbe};
