//! Builds the process-wide redis client from configuration.

use std::sync::OnceLock;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::info;
use url::Url;

use crate::client::{Client, FailoverOptions, Options};
use crate::config::RedisConfig;
use crate::dialer::{ClassifyingDialer, TcpConnect};
use crate::error::Error;
use crate::instrument::SentinelInstrumentation;
use crate::metrics::DialCounters;
use crate::sentinel::sentinel_options;

pub const DEFAULT_MAX_IDLE: usize = 1;
pub const DEFAULT_MAX_ACTIVE: usize = 1;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Holds the single configured client.
///
/// `configure` fills the slot at most once; afterwards `client` hands out the
/// same instance to every caller without locking.
pub struct ConnectionFactory {
    client: OnceLock<Client>,
    counters: DialCounters,
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionFactory {
    /// A factory recording into the global metrics.
    pub fn new() -> Self {
        Self::with_counters(DialCounters::default())
    }

    pub fn with_counters(counters: DialCounters) -> Self {
        Self {
            client: OnceLock::new(),
            counters,
        }
    }

    /// Build a client from `cfg` and store it.
    ///
    /// `None` leaves the factory unconfigured and is not an error. A
    /// non-empty sentinel list selects sentinel mode, otherwise `url` is
    /// dialed directly. No connection is opened here.
    pub fn configure(&self, cfg: Option<&RedisConfig>) -> Result<(), Error> {
        let Some(cfg) = cfg else {
            return Ok(());
        };

        if self.client.get().is_some() {
            return Err(Error::AlreadyConfigured);
        }

        let client = if cfg.uses_sentinel() {
            self.sentinel_client(cfg)?
        } else {
            self.direct_client(cfg)?
        };

        self.client
            .set(client)
            .map_err(|_| Error::AlreadyConfigured)
    }

    /// The configured client, if any.
    pub fn client(&self) -> Option<&Client> {
        self.client.get()
    }

    fn sentinel_client(&self, cfg: &RedisConfig) -> Result<Client, Error> {
        let pool_size = pool_size(cfg)?;
        let sentinels = sentinel_options(cfg);
        let dialer =
            ClassifyingDialer::with_connector(sentinels.addrs.clone(), TcpConnect, self.counters);

        info!(
            master = %cfg.sentinel_master,
            sentinels = ?sentinels.addrs,
            "configuring redis sentinel client"
        );

        let mut client = Client::new_failover(FailoverOptions {
            master_name: cfg.sentinel_master.clone(),
            sentinel_addrs: sentinels.addrs,
            sentinel_username: None,
            sentinel_password: sentinels.password,
            username: None,
            password: cfg.password.clone(),
            db: cfg.db.unwrap_or(0),
            pool_size,
            max_idle_conns: cfg.max_idle.unwrap_or(DEFAULT_MAX_IDLE),
            conn_max_idle_time: DEFAULT_IDLE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            dialer: Some(dialer.into_dial_fn()),
        });
        client.add_hook(SentinelInstrumentation::new(self.counters));
        Ok(client)
    }

    fn direct_client(&self, cfg: &RedisConfig) -> Result<Client, Error> {
        let url = normalize_scheme(cfg.url_str())?;
        let mut opts = Options::parse_url(&url)?;

        opts.db = cfg.db.unwrap_or(0);
        opts.password = cfg.password.clone();
        opts.pool_size = pool_size(cfg)?;
        opts.max_idle_conns = cfg.max_idle.unwrap_or(DEFAULT_MAX_IDLE);
        opts.conn_max_idle_time = DEFAULT_IDLE_TIMEOUT;
        opts.read_timeout = DEFAULT_READ_TIMEOUT;
        opts.write_timeout = DEFAULT_WRITE_TIMEOUT;
        opts.dialer = Some(
            ClassifyingDialer::with_connector(Vec::new(), TcpConnect, self.counters)
                .into_dial_fn(),
        );

        info!(addr = %opts.addr, db = opts.db, "configuring redis client");

        Ok(Client::new(opts))
    }
}

/// `max_active`, or its default. Zero and sizes the pool cannot represent are
/// rejected.
fn pool_size(cfg: &RedisConfig) -> Result<usize, Error> {
    let size = cfg.max_active.unwrap_or(DEFAULT_MAX_ACTIVE);
    if size == 0 || size > Semaphore::MAX_PERMITS {
        return Err(Error::Config(format!(
            "max_active must be between 1 and {}, got {size}",
            Semaphore::MAX_PERMITS
        )));
    }
    Ok(size)
}

/// Rewrite a `tcp://` URL to `redis://`; other URLs pass through unchanged.
fn normalize_scheme(raw: &str) -> Result<String, Error> {
    let mut url = Url::parse(raw).map_err(|e| Error::Config(format!("{raw:?}: {e}")))?;
    if url.scheme() == "tcp" {
        url.set_scheme("redis")
            .map_err(|_| Error::Config(format!("{raw:?}: cannot rewrite scheme")))?;
    }
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> ConnectionFactory {
        ConnectionFactory::with_counters(DialCounters::detached())
    }

    fn direct(url: &str) -> RedisConfig {
        RedisConfig {
            url: Some(Url::parse(url).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn none_leaves_factory_empty() {
        let factory = factory();
        factory.configure(None).unwrap();
        assert!(factory.client().is_none());
    }

    #[test]
    fn unset_pool_fields_use_defaults() {
        let factory = factory();
        factory
            .configure(Some(&direct("redis://localhost:6379")))
            .unwrap();

        let settings = factory.client().unwrap().settings();
        assert_eq!(settings.pool_size, DEFAULT_MAX_ACTIVE);
        assert_eq!(settings.max_idle_conns, DEFAULT_MAX_IDLE);
        assert_eq!(settings.db, 0);
        assert_eq!(settings.conn_max_idle_time, DEFAULT_IDLE_TIMEOUT);
        assert_eq!(settings.read_timeout, DEFAULT_READ_TIMEOUT);
        assert_eq!(settings.write_timeout, DEFAULT_WRITE_TIMEOUT);
    }

    #[test]
    fn explicit_pool_fields_are_applied() {
        let factory = factory();
        let cfg = RedisConfig {
            db: Some(3),
            max_idle: Some(5),
            max_active: Some(7),
            ..direct("redis://localhost:6379")
        };
        factory.configure(Some(&cfg)).unwrap();

        let client = factory.client().unwrap();
        assert!(!client.is_failover());
        assert_eq!(client.settings().pool_size, 7);
        assert_eq!(client.settings().max_idle_conns, 5);
        assert_eq!(client.settings().db, 3);
    }

    #[test]
    fn config_db_overrides_url_path() {
        let factory = factory();
        factory
            .configure(Some(&direct("redis://localhost:6379/4")))
            .unwrap();
        assert_eq!(factory.client().unwrap().settings().db, 0);
    }

    #[test]
    fn tcp_scheme_is_accepted() {
        let factory = factory();
        factory
            .configure(Some(&direct("tcp://localhost:6380")))
            .unwrap();
        assert!(factory.client().is_some());
    }

    #[test]
    fn normalize_rewrites_only_tcp() {
        assert_eq!(
            normalize_scheme("tcp://localhost:6380").unwrap(),
            "redis://localhost:6380"
        );
        assert_eq!(
            normalize_scheme("redis://:pw@localhost:6380/1").unwrap(),
            "redis://:pw@localhost:6380/1"
        );
        assert_eq!(
            normalize_scheme("unix:///tmp/redis.sock").unwrap(),
            "unix:///tmp/redis.sock"
        );
    }

    #[test]
    fn unsupported_scheme_is_a_config_error() {
        let factory = factory();
        let err = factory
            .configure(Some(&direct("http://localhost:6379")))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(factory.client().is_none());
    }

    #[test]
    fn malformed_database_is_a_config_error() {
        let factory = factory();
        let err = factory
            .configure(Some(&direct("redis://localhost:6379/not-a-db")))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn three_sentinels_build_a_failover_client() {
        let factory = factory();
        let cfg = RedisConfig {
            sentinel: vec![
                Url::parse("redis://:pw@10.0.0.1:26379").unwrap(),
                Url::parse("redis://10.0.0.2:26379").unwrap(),
                Url::parse("redis://10.0.0.3:26380").unwrap(),
            ],
            sentinel_master: "mymaster".to_string(),
            max_active: Some(4),
            ..Default::default()
        };
        factory.configure(Some(&cfg)).unwrap();

        let client = factory.client().unwrap();
        assert!(client.is_failover());
        assert_eq!(
            client.sentinel_addrs(),
            ["10.0.0.1:26379", "10.0.0.2:26379", "10.0.0.3:26380"]
        );
        assert_eq!(client.settings().pool_size, 4);
        assert_eq!(client.settings().max_idle_conns, DEFAULT_MAX_IDLE);
    }

    #[test]
    fn zero_max_active_is_rejected() {
        let factory = factory();
        let cfg = RedisConfig {
            max_active: Some(0),
            ..direct("redis://localhost:6379")
        };

        let err = factory.configure(Some(&cfg)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(factory.client().is_none());
    }

    #[test]
    fn oversized_max_active_is_rejected() {
        let config = crate::config::Config::parse(
            "[redis]\nurl = \"redis://localhost:6379\"\nmax_active = 4611686018427387904\n",
        )
        .unwrap();

        let factory = factory();
        let err = factory.configure(config.redis.as_ref()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn sentinel_mode_validates_max_active() {
        let factory = factory();
        let cfg = RedisConfig {
            sentinel: vec![Url::parse("redis://10.0.0.1:26379").unwrap()],
            sentinel_master: "mymaster".to_string(),
            max_active: Some(0),
            ..Default::default()
        };

        assert!(matches!(
            factory.configure(Some(&cfg)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn configure_is_write_once() {
        let factory = factory();
        factory
            .configure(Some(&direct("redis://localhost:6379")))
            .unwrap();

        let err = factory
            .configure(Some(&direct("redis://localhost:6380")))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyConfigured));

        // unconfiguring is not a thing either
        factory.configure(None).unwrap();
        assert!(factory.client().is_some());
    }
}
