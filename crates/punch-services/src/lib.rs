//! punch-services — broker registry and service loop, rendezvous client,
//! and the peer-side hole-punch session.

pub mod broker;
pub mod client;
pub mod registry;
pub mod session;
pub mod setup;

pub use broker::{expiry_loop, Broker};
pub use client::{ClientError, RendezvousClient, RpcError};
pub use registry::{PeerRecord, Registry};
pub use session::{HolePunchSession, Inbound, SessionConfig, SessionHandle, SessionState};
pub use setup::SetupError;
