//! Minimal [`AdminSessionValidator`] implementation wiring the OAuth
//! authorization server (`metamcp-auth`) to *something* that can say
//! "yes, an admin is logged in" — the actual login UI is explicitly out
//! of scope (spec §1's external-collaborator boundary). A caller
//! presenting the configured auth secret as a bearer token is treated as
//! the logged-in admin; anyone standing up a real login UI in front of
//! this process implements the same trait against their own session
//! store instead.

use axum::http::HeaderMap;
use metamcp_auth::AdminSessionValidator;

const ADMIN_USER_ID: &str = "admin";

pub struct SharedSecretSessionValidator {
    secret: String,
}

impl SharedSecretSessionValidator {
    #[must_use]
    pub fn new(secret: String) -> Self {
        Self { secret }
    }
}

impl AdminSessionValidator for SharedSecretSessionValidator {
    fn validate_session(&self, headers: &HeaderMap) -> Option<String> {
        let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
        let presented = header.strip_prefix("Bearer ")?;
        (presented == self.secret).then(|| ADMIN_USER_ID.to_string())
    }
}
