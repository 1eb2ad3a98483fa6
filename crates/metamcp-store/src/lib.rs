//! Persistence-facing traits and an in-memory reference implementation.
//!
//! The relational store itself (servers, namespaces, endpoints, users,
//! OAuth artifacts) is treated as an external collaborator; this crate only
//! defines the interfaces the core consumes, plus a usable in-memory
//! implementation for tests and for running without an external database.

pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use traits::{ApiKeyStore, EndpointStore, NamespaceStore, OAuthStore, UpstreamServerStore};
pub use types::{
    AccessToken, ApiKey, AuthorizationCode, CodeChallengeMethod, Endpoint, ErrorStatus,
    GrantType, Namespace, NamespaceServerStatus, OAuthClient, ServerKind, ServerParams,
    TokenEndpointAuthMethod, UpstreamServer,
};
