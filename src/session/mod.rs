//! Per-connection protocol state and the byte transports that carry it.

pub mod engine;
pub mod state;
pub mod transport;

pub use engine::{SessionApplication, SessionEngine};
pub use state::{Role, SessionId, SessionState};
pub use transport::{spawn_tcp_session, ChannelTransport, OutboundFrames, Transport};
