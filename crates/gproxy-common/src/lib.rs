pub mod config;
pub mod probe_config;
pub mod registry;

pub use config::{ConfigError, GatewayConfig};
pub use probe_config::ProbeFilterConfig;
pub use registry::{AuthScheme, Registry, Scheme, UpstreamEntry};
