//! Browser/OS emulation profiles and the fingerprints they produce.

pub mod client_hello;
pub mod http2;
pub mod profiles;
pub mod tls;

pub use client_hello::{ClientHelloEncoder, ClientHelloInfo};
pub use http2::{Http2Spec, PriorityFrame, PseudoHeader, StreamDependency};
pub use profiles::{catalog, Profile, ProfileCatalog, TlsSpec};
pub use tls::{CertCompression, TlsVersion};
