//! Sentinel address and credential resolution.

use percent_encoding::percent_decode_str;
use url::Url;

use crate::client::join_host_port;
use crate::config::RedisConfig;

/// Port assumed for a sentinel URL that does not name one.
pub const DEFAULT_SENTINEL_PORT: u16 = 26379;

/// Sentinel addresses in `host:port` form, in configuration order, plus the
/// password to authenticate to them with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentinelAddrs {
    pub addrs: Vec<String>,
    pub password: String,
}

/// Extract the sentinel addresses and password from `cfg`.
///
/// The password is `sentinel_password` when set; otherwise the first
/// non-empty password embedded in a sentinel URL.
pub fn sentinel_options(cfg: &RedisConfig) -> SentinelAddrs {
    let mut password = cfg.sentinel_password.clone();
    let mut addrs = Vec::with_capacity(cfg.sentinel.len());

    for url in &cfg.sentinel {
        addrs.push(host_port(url));

        if password.is_empty() {
            if let Some(pw) = url.password() {
                password = percent_decode_str(pw).decode_utf8_lossy().into_owned();
            }
        }
    }

    SentinelAddrs { addrs, password }
}

fn host_port(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    let port = url.port().unwrap_or(DEFAULT_SENTINEL_PORT);
    join_host_port(host, &port.to_string())
}
