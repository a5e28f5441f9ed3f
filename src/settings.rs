//! Frozen server configuration, built once from a flat key/value map and
//! never mutated afterwards.
//!
//! Settings don't read files or environment variables themselves — that's
//! the process shell's job (see the `mingoose` binary). [`Settings::build`]
//! only ever sees `&str` keys and values already resolved from wherever they
//! came from, and validates them all-or-nothing: either every key parses and
//! every invariant holds, or [`build`](Settings::build) returns the first
//! [`ConfigError`] it hits.

use crate::errors::ConfigError;
use std::{collections::HashMap, net::Ipv4Addr, path::PathBuf, time::Duration};

/// One listening address, parsed from the `[ipv4:]port` grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenSpec {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl ListenSpec {
    /// Parses `[ipv4:]port`. A bare port binds `0.0.0.0`. Trailing garbage
    /// after the port, an out-of-range port, or a malformed address all
    /// invalidate the spec.
    fn parse(spec: &str) -> Result<Self, ConfigError> {
        let (addr, port) = match spec.rsplit_once(':') {
            Some((addr, port)) => (
                addr.parse::<Ipv4Addr>()
                    .map_err(|_| ConfigError::InvalidListenSpec(spec.to_string()))?,
                port,
            ),
            None => (Ipv4Addr::UNSPECIFIED, spec),
        };

        let port: u16 = port
            .parse()
            .map_err(|_| ConfigError::InvalidListenSpec(spec.to_string()))?;

        if port == 0 {
            return Err(ConfigError::InvalidListenSpec(spec.to_string()));
        }

        Ok(Self { addr, port })
    }
}

/// Frozen, validated server configuration.
///
/// Build one with [`Settings::build`] from a flat `key -> value` map (e.g.
/// parsed CLI flags), then hand it to the process shell to bind listeners
/// and construct a [`Server`](crate::Server).
#[derive(Debug, Clone)]
pub struct Settings {
    /// The single `[ipv4:]port` listen spec this server binds.
    pub listen: ListenSpec,
    /// Number of worker tasks servicing the accept queue.
    pub worker_count: usize,
    /// Per-request socket read timeout.
    pub request_timeout: Duration,
    /// Whether `HTTP/1.1` keep-alive is honored at all.
    pub enable_keep_alive: bool,
    /// Sustained per-connection write-rate cap, in bytes per second.
    pub throttle_bytes_per_sec: Option<u64>,
    /// Filename patterns that are never served (e.g. `.ht*`, `.git`).
    pub hidden_file_patterns: Vec<String>,
    /// Unix account to drop privileges to after binding, if any.
    pub run_as_user: Option<String>,
    /// Root directory handlers may serve files from.
    pub document_root: Option<PathBuf>,
    /// Path to a global htpasswd-style file gating every request.
    pub global_auth_file: Option<PathBuf>,
}

impl Settings {
    /// Validates `values` and produces a frozen [`Settings`].
    ///
    /// Required keys: `listen` (a single `[ipv4:]port` spec; only one
    /// listening socket is supported). Everything else has a default and
    /// may be omitted.
    pub fn build(values: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let listen_raw = values
            .get("listen")
            .ok_or(ConfigError::MissingKey("listen"))?;

        let listen = ListenSpec::parse(listen_raw.trim())?;

        let worker_count = parse_opt(values, "worker_count", 50)?;
        if worker_count == 0 {
            return Err(ConfigError::OutOfRange {
                key: "worker_count",
                value: "0".to_string(),
            });
        }

        let request_timeout_ms: u64 = parse_opt(values, "request_timeout_ms", 2_000)?;
        let enable_keep_alive: bool = parse_opt(values, "enable_keep_alive", true)?;

        let throttle_bytes_per_sec = match values.get("throttle_bytes_per_sec") {
            None => None,
            Some(v) if v.is_empty() => None,
            Some(v) => Some(v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "throttle_bytes_per_sec",
                value: v.clone(),
            })?),
        };

        let hidden_file_patterns = values
            .get("hidden_file_patterns")
            .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_else(|| vec![".ht*".to_string()]);

        let run_as_user = values.get("run_as_user").filter(|v| !v.is_empty()).cloned();
        let document_root = values.get("document_root").filter(|v| !v.is_empty()).map(PathBuf::from);
        let global_auth_file = values.get("global_auth_file").filter(|v| !v.is_empty()).map(PathBuf::from);

        Ok(Self {
            listen,
            worker_count,
            request_timeout: Duration::from_millis(request_timeout_ms),
            enable_keep_alive,
            throttle_bytes_per_sec,
            hidden_file_patterns,
            run_as_user,
            document_root,
            global_auth_file,
        })
    }
}

fn parse_opt<T: std::str::FromStr>(
    values: &HashMap<String, String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match values.get(key) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
            key,
            value: v.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn listen_spec_grammar() {
        assert_eq!(
            ListenSpec::parse("8080").unwrap(),
            ListenSpec { addr: Ipv4Addr::UNSPECIFIED, port: 8080 }
        );
        assert_eq!(
            ListenSpec::parse("127.0.0.1:8080").unwrap(),
            ListenSpec { addr: Ipv4Addr::new(127, 0, 0, 1), port: 8080 }
        );
        assert!(ListenSpec::parse("0").is_err());
        assert!(ListenSpec::parse("99999").is_err());
        assert!(ListenSpec::parse("8080extra").is_err());
        assert!(ListenSpec::parse("not-an-ip:8080").is_err());
    }

    #[test]
    fn missing_listen_is_an_error() {
        let values = map(&[]);
        assert_eq!(Settings::build(&values), Err(ConfigError::MissingKey("listen")));
    }

    #[test]
    fn rejects_multiple_listen_specs() {
        let values = map(&[("listen", "8080, 127.0.0.1:9090")]);
        assert!(Settings::build(&values).is_err());
    }

    #[test]
    fn defaults_are_applied() {
        let values = map(&[("listen", "8080")]);
        let settings = Settings::build(&values).unwrap();

        assert_eq!(settings.worker_count, 50);
        assert!(settings.enable_keep_alive);
        assert_eq!(settings.throttle_bytes_per_sec, None);
        assert_eq!(settings.run_as_user, None);
    }

    #[test]
    fn invalid_worker_count_is_rejected() {
        let values = map(&[("listen", "8080"), ("worker_count", "0")]);
        assert!(Settings::build(&values).is_err());

        let values = map(&[("listen", "8080"), ("worker_count", "not-a-number")]);
        assert!(matches!(Settings::build(&values), Err(ConfigError::InvalidValue { .. })));
    }
}
