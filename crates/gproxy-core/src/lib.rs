pub mod auth;
pub mod dispatch;
pub mod error;
pub mod forwarder;
pub mod probe;
pub mod recorder;
pub mod registry;

pub use dispatch::{dispatch, DispatchOutcome, GatewayState, IncomingRequest, Route};
pub use error::ProxyError;
pub use forwarder::Forwarder;
pub use probe::ProbeCounter;
pub use registry::Registry;
