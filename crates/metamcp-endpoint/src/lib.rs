//! Per-endpoint HTTP surface: aggregated SSE/streamable-HTTP routes,
//! direct one-upstream proxy routes, and the auth-gate/rate-limit wiring
//! that guards both (§4.8, §4.9, §6).

pub mod aggregated;
pub mod channel_transport;
pub mod direct;
pub mod dispatch;
pub mod error;
pub mod router;
pub mod session;
pub mod state;

pub use channel_transport::ChannelTransport;
pub use direct::{DirectSession, DirectSessionRegistry};
pub use error::{EndpointError, EndpointResult};
pub use router::router;
pub use session::{SessionEntry, SessionRegistry};
pub use state::AppState;
