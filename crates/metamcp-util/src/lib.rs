//! Small, dependency-light utilities shared by the transport, pool, proxy,
//! and auth layers: upstream-name sanitization, `${VAR}` environment
//! resolution for STDIO server configs, and a sliding-window rate limiter.

pub mod env;
pub mod rate_limit;
pub mod sanitize;

pub use env::{resolve_environment, rewrite_docker_url};
pub use rate_limit::RateLimiter;
pub use sanitize::sanitize_server_name;
