//! MyJD remote-control protocol core.
//! Host-driven: no I/O; the host sends the strings this crate builds and feeds back what it receives.

pub mod crypto;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod wire;

pub use crypto::{CryptoError, Domain, Key};
pub use protocol::{DeviceDescriptor, DirectConnectionInfos, DirectEndpoint, Payload};
pub use registry::{DirectConnectionRegistry, DirectEntry};
pub use session::{Session, SessionError, SessionSnapshot, SnapshotFileError};
pub use wire::WireError;
