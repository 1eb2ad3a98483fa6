//! Environment-sourced process configuration (§6: "The process reads
//! configuration from environment"). `clap`'s `env` feature does the
//! resolution; this struct is the single place that enumerates what the
//! process needs to start.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "metamcp", version, about = "MCP protocol aggregator")]
pub struct Config {
    /// Absolute base URL this process is reachable at, used to derive
    /// OAuth metadata and redirect targets when a request carries no
    /// `Host`/`X-Forwarded-*` headers of its own.
    #[arg(long, env = "APP_URL")]
    pub app_url: Option<String>,

    /// Shared secret gating the admin session validator. Out of scope
    /// per §1 is the actual login UI; this is the boundary this process
    /// owns: a caller presenting this secret is treated as the logged-in
    /// admin for the OAuth authorize/callback dance.
    #[arg(long, env = "AUTH_SECRET")]
    pub auth_secret: String,

    /// Connection string for the persistent store. No external database
    /// backend is wired up yet (see DESIGN.md); any value other than
    /// "memory" is rejected at startup so misconfiguration fails loudly
    /// rather than silently falling back to memory.
    #[arg(long, env = "DATABASE_URL", default_value = "memory")]
    pub database_url: String,

    /// OIDC client id, for delegating admin login to an external IdP.
    /// Reserved: accepted so deployments can set it without a parse
    /// error, but this process has no OIDC login UI to drive with it.
    #[arg(long, env = "OIDC_CLIENT_ID")]
    pub oidc_client_id: Option<String>,

    #[arg(long, env = "OIDC_CLIENT_SECRET")]
    pub oidc_client_secret: Option<String>,

    #[arg(long, env = "OIDC_DISCOVERY_URL")]
    pub oidc_discovery_url: Option<String>,

    #[arg(long, env = "OIDC_SCOPES")]
    pub oidc_scopes: Option<String>,

    /// Rewrite `localhost`/`127.0.0.1` in stdio-spawned servers' declared
    /// URLs to `host.docker.internal` so containerized upstreams can
    /// reach back out to services on the host.
    #[arg(long, env = "DOCKER_URL_REWRITE", default_value_t = false)]
    pub docker_url_rewrite: bool,

    /// Address the HTTP surface binds to.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:12008")]
    pub bind_addr: String,

    /// Identifier of the protected resource advertised in RFC 9728
    /// metadata. Defaults to `app_url` when unset.
    #[arg(long, env = "OAUTH_RESOURCE")]
    pub oauth_resource: Option<String>,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.database_url != "memory" {
            return Err(format!(
                "DATABASE_URL={:?}: only the in-memory store is implemented; set DATABASE_URL=memory or unset it",
                self.database_url
            ));
        }
        if let Some(url) = &self.app_url {
            url::Url::parse(url).map_err(|e| format!("APP_URL is not a valid absolute URL: {e}"))?;
        }
        if self.auth_secret.trim().is_empty() {
            return Err("AUTH_SECRET must not be empty".to_string());
        }
        Ok(())
    }

    pub fn resource(&self) -> String {
        self.oauth_resource.clone().or_else(|| self.app_url.clone()).unwrap_or_else(|| "http://localhost:12008".to_string())
    }
}
