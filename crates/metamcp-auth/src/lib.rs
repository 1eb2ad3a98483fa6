//! OAuth 2.1 authorization server (§4.7) and the endpoint authentication
//! gate (§4.8).

pub mod dcr;
pub mod error;
pub mod gate;
pub mod pkce;
pub mod server;

pub use dcr::{RegistrationRequest, RegistrationResponse};
pub use error::{AuthError, AuthResult};
pub use gate::{derive_base_url, EndpointAuthGate, GateIdentity};
pub use server::{router, spawn_expiry_sweep, AdminSessionValidator, AuthServerState};
