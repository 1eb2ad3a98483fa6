//! `${VAR}` placeholder resolution and the per-host default environment
//! prepended to every spawned STDIO upstream.

use std::collections::HashMap;

/// Variables passed through to every spawned child process unless the
/// server config overrides them. Mirrors the inherited-environment allowlist
/// most MCP clients use so STDIO servers can find their shell, home
/// directory, and PATH.
#[cfg(unix)]
pub const DEFAULT_HOST_ENV_VARS: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER"];

#[cfg(windows)]
pub const DEFAULT_HOST_ENV_VARS: &[&str] = &[
    "APPDATA",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "PATH",
    "PROCESSOR_ARCHITECTURE",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "USERNAME",
    "USERPROFILE",
];

/// Build the default host environment by reading the named variables from
/// the current process's environment (missing ones are simply omitted).
pub fn default_host_env() -> HashMap<String, String> {
    DEFAULT_HOST_ENV_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok().map(|v| ((*name).to_string(), v)))
        .collect()
}

/// Resolve `${NAME}` placeholders in `configured` against the host process
/// environment, prepend [`default_host_env`], and drop any value beginning
/// with `()` (a defensive filter against function-export injection via
/// environment values, mirroring the shellshock-era attack class).
///
/// Unresolved placeholders (the referenced host variable is unset) are
/// passed through verbatim, with a warning logged by the caller.
pub fn resolve_environment(configured: &HashMap<String, String>) -> HashMap<String, String> {
    let mut resolved = default_host_env();

    for (key, value) in configured {
        if value.starts_with("()") {
            tracing::warn!(variable = %key, "dropping environment value starting with '()'");
            continue;
        }
        resolved.insert(key.clone(), resolve_placeholder(value));
    }

    resolved
}

fn resolve_placeholder(value: &str) -> String {
    if let Some(inner) = value.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        match std::env::var(inner) {
            Ok(resolved) => resolved,
            Err(_) => {
                tracing::warn!(placeholder = %value, "unresolved environment placeholder, passing through verbatim");
                value.to_string()
            }
        }
    } else {
        value.to_string()
    }
}

/// Rewrite literal `localhost`/`127.0.0.1` to `host.docker.internal`, used
/// when the process is itself running inside a container and upstream URLs
/// were authored for the host's point of view.
#[must_use]
pub fn rewrite_docker_url(url: &str, enabled: bool) -> String {
    if !enabled {
        return url.to_string();
    }
    url.replace("localhost", "host.docker.internal")
        .replace("127.0.0.1", "host.docker.internal")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_placeholder() {
        // SAFETY: test-local env var, not shared mutable process state in practice
        // since tests run in the same process; scoped to this test's assertions.
        unsafe { std::env::set_var("METAMCP_TEST_VAR", "resolved-value") };
        let mut configured = HashMap::new();
        configured.insert("TOKEN".to_string(), "${METAMCP_TEST_VAR}".to_string());
        let resolved = resolve_environment(&configured);
        assert_eq!(resolved.get("TOKEN").unwrap(), "resolved-value");
    }

    #[test]
    fn passes_through_unresolved_placeholder() {
        unsafe { std::env::remove_var("METAMCP_DEFINITELY_UNSET") };
        let mut configured = HashMap::new();
        configured.insert("TOKEN".to_string(), "${METAMCP_DEFINITELY_UNSET}".to_string());
        let resolved = resolve_environment(&configured);
        assert_eq!(resolved.get("TOKEN").unwrap(), "${METAMCP_DEFINITELY_UNSET}");
    }

    #[test]
    fn drops_function_export_values() {
        let mut configured = HashMap::new();
        configured.insert("EVIL".to_string(), "() { :; }; echo pwned".to_string());
        let resolved = resolve_environment(&configured);
        assert!(!resolved.contains_key("EVIL"));
    }

    #[test]
    fn docker_rewrite_only_when_enabled() {
        assert_eq!(
            rewrite_docker_url("http://localhost:3000", false),
            "http://localhost:3000"
        );
        assert_eq!(
            rewrite_docker_url("http://127.0.0.1:3000", true),
            "http://host.docker.internal:3000"
        );
    }
}
