//! Blocking MyJD client: relay connector, device router with direct-connection failover,
//! and a plain local connector.

pub mod config;
pub mod connector;
pub mod device;
pub mod error;
pub mod local;
pub mod resources;
pub mod transport;

pub use config::{Config, ConfigError};
pub use connector::{Call, CloudConnector, DeviceSelector};
pub use device::{Clock, DeviceHandle};
pub use error::{Error, Result};
pub use local::{LocalConnector, LocalDevice};
pub use resources::{ApiExecutor, DeviceApi};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport, TransportError};
