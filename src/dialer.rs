//! Dialing with sentinel-aware timeouts and connection metrics.
//!
//! [`ClassifyingDialer`] knows the sentinel addresses of the deployment. Every
//! dial whose address exactly matches one of them is a sentinel dial and gets
//! the short [`SENTINEL_DIAL_TIMEOUT`]; anything else is a data-node dial and
//! gets [`REDIS_DIAL_TIMEOUT`]. Sentinel clients are expected to probe each
//! sentinel with a timeout of a few hundred milliseconds before moving on to
//! the next one.
//!
//! Failed dials are counted per destination. Successful dials are counted only
//! for data nodes, since sentinel connections are short-lived lookups.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::client::{BoxFuture, Conn, DialFn};
use crate::metrics::DialCounters;

/// Connect timeout for sentinel addresses.
pub const SENTINEL_DIAL_TIMEOUT: Duration = Duration::from_millis(500);

/// Connect timeout for data nodes.
pub const REDIS_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP keep-alive interval for every dialed connection.
pub const DIAL_KEEP_ALIVE: Duration = Duration::from_secs(5 * 60);

/// What a dialed address turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Sentinel,
    Redis,
}

impl Destination {
    /// Metric label value.
    pub fn label(self) -> &'static str {
        match self {
            Destination::Sentinel => "sentinel",
            Destination::Redis => "redis",
        }
    }

    pub fn dial_timeout(self) -> Duration {
        match self {
            Destination::Sentinel => SENTINEL_DIAL_TIMEOUT,
            Destination::Redis => REDIS_DIAL_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialOptions {
    pub timeout: Duration,
    pub keep_alive: Duration,
}

/// The raw network connect step underneath [`ClassifyingDialer`].
pub trait Connect: Send + Sync + 'static {
    fn connect(
        &self,
        network: &str,
        addr: &str,
        opts: DialOptions,
    ) -> BoxFuture<'static, io::Result<Conn>>;
}

/// Connects with tokio sockets: `tcp`, `tcp4`, `tcp6` and (on unix) `unix`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnect;

impl Connect for TcpConnect {
    fn connect(
        &self,
        network: &str,
        addr: &str,
        opts: DialOptions,
    ) -> BoxFuture<'static, io::Result<Conn>> {
        let network = network.to_string();
        let addr = addr.to_string();

        Box::pin(async move {
            match network.as_str() {
                "tcp" | "tcp4" | "tcp6" => {
                    let stream = tokio::time::timeout(opts.timeout, TcpStream::connect(&addr))
                        .await
                        .map_err(|_| {
                            io::Error::new(
                                io::ErrorKind::TimedOut,
                                format!("dial tcp {addr}: i/o timeout"),
                            )
                        })??;

                    stream.set_nodelay(true)?;
                    let keepalive = TcpKeepalive::new()
                        .with_time(opts.keep_alive)
                        .with_interval(opts.keep_alive);
                    SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;

                    Ok(Box::new(stream) as Conn)
                }
                #[cfg(unix)]
                "unix" => {
                    let stream =
                        tokio::time::timeout(opts.timeout, tokio::net::UnixStream::connect(&addr))
                            .await
                            .map_err(|_| {
                                io::Error::new(
                                    io::ErrorKind::TimedOut,
                                    format!("dial unix {addr}: i/o timeout"),
                                )
                            })??;
                    Ok(Box::new(stream) as Conn)
                }
                other => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported network: {other}"),
                )),
            }
        })
    }
}

pub(crate) fn dial_cancelled() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "dial cancelled")
}

/// Dialer that classifies each target as sentinel or data node.
///
/// Holds only the immutable sentinel address list and references to global
/// counters, so one instance can serve any number of concurrent dials.
pub struct ClassifyingDialer<C = TcpConnect> {
    sentinels: Arc<[String]>,
    connector: C,
    counters: DialCounters,
}

impl ClassifyingDialer {
    /// Create a dialer over real sockets. An empty list means every dial is a
    /// data-node dial.
    pub fn new(sentinels: Vec<String>) -> Self {
        Self::with_connector(sentinels, TcpConnect, DialCounters::default())
    }
}

impl<C: Connect> ClassifyingDialer<C> {
    pub fn with_connector(sentinels: Vec<String>, connector: C, counters: DialCounters) -> Self {
        Self {
            sentinels: sentinels.into(),
            connector,
            counters,
        }
    }

    pub fn destination(&self, addr: &str) -> Destination {
        if self.sentinels.iter().any(|s| s == addr) {
            Destination::Sentinel
        } else {
            Destination::Redis
        }
    }

    /// Connect to `addr`, giving up early if `cancel` fires.
    ///
    /// Errors are returned unchanged after being counted.
    pub async fn dial(
        &self,
        cancel: &CancellationToken,
        network: &str,
        addr: &str,
    ) -> io::Result<Conn> {
        let destination = self.destination(addr);
        let opts = DialOptions {
            timeout: destination.dial_timeout(),
            keep_alive: DIAL_KEEP_ALIVE,
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(dial_cancelled()),
            result = self.connector.connect(network, addr, opts) => result,
        };

        match &result {
            Err(e) => {
                self.counters.dial_errors(destination).increment();
                debug!(addr, destination = destination.label(), error = %e, "dial failed");
            }
            Ok(_) => {
                if destination == Destination::Redis {
                    self.counters.total_connections.increment();
                }
                trace!(addr, destination = destination.label(), "dial succeeded");
            }
        }

        result
    }

    /// Convert into the dial function form the client accepts.
    pub fn into_dial_fn(self) -> DialFn {
        let dialer = Arc::new(self);
        Arc::new(
            move |cancel: CancellationToken,
                  network: String,
                  addr: String|
                  -> BoxFuture<'static, io::Result<Conn>> {
                let dialer = dialer.clone();
                Box::pin(async move { dialer.dial(&cancel, &network, &addr).await })
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::io::duplex;

    /// Records every connect call and succeeds or fails on demand.
    #[derive(Clone, Default)]
    struct FakeConnect {
        calls: Arc<Mutex<Vec<(String, DialOptions)>>>,
        fail: bool,
        hang: bool,
    }

    impl Connect for FakeConnect {
        fn connect(
            &self,
            _network: &str,
            addr: &str,
            opts: DialOptions,
        ) -> BoxFuture<'static, io::Result<Conn>> {
            self.calls.lock().push((addr.to_string(), opts));
            let fail = self.fail;
            let hang = self.hang;
            Box::pin(async move {
                if hang {
                    std::future::pending::<()>().await;
                }
                if fail {
                    Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"))
                } else {
                    let (client, _server) = duplex(64);
                    Ok(Box::new(client) as Conn)
                }
            })
        }
    }

    fn sentinels() -> Vec<String> {
        vec!["10.0.0.1:26379".to_string(), "10.0.0.2:26379".to_string()]
    }

    #[test]
    fn classifies_by_exact_match() {
        let dialer = ClassifyingDialer::new(sentinels());
        assert_eq!(dialer.destination("10.0.0.1:26379"), Destination::Sentinel);
        assert_eq!(dialer.destination("10.0.0.2:26379"), Destination::Sentinel);
        assert_eq!(dialer.destination("10.0.0.1:6379"), Destination::Redis);
        assert_eq!(dialer.destination("10.0.0.1"), Destination::Redis);
    }

    #[test]
    fn empty_set_is_always_redis() {
        let dialer = ClassifyingDialer::new(Vec::new());
        assert_eq!(dialer.destination("10.0.0.1:26379"), Destination::Redis);
    }

    #[tokio::test]
    async fn sentinel_gets_short_timeout() {
        let fake = FakeConnect::default();
        let dialer =
            ClassifyingDialer::with_connector(sentinels(), fake.clone(), DialCounters::detached());

        dialer
            .dial(&CancellationToken::new(), "tcp", "10.0.0.2:26379")
            .await
            .unwrap();
        dialer
            .dial(&CancellationToken::new(), "tcp", "10.0.0.9:6379")
            .await
            .unwrap();

        let calls = fake.calls.lock();
        assert_eq!(calls[0].0, "10.0.0.2:26379");
        assert_eq!(calls[0].1.timeout, Duration::from_millis(500));
        assert_eq!(calls[1].0, "10.0.0.9:6379");
        assert_eq!(calls[1].1.timeout, Duration::from_secs(5));
        assert!(calls.iter().all(|(_, o)| o.keep_alive == DIAL_KEEP_ALIVE));
    }

    #[tokio::test]
    async fn sentinel_failure_counts_sentinel_only() {
        let fake = FakeConnect {
            fail: true,
            ..Default::default()
        };
        let counters = DialCounters::detached();
        let dialer = ClassifyingDialer::with_connector(sentinels(), fake, counters);

        let err = dialer
            .dial(&CancellationToken::new(), "tcp", "10.0.0.1:26379")
            .await
            .err()
            .unwrap();

        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        assert_eq!(counters.sentinel_dial_errors.value(), 1);
        assert_eq!(counters.redis_dial_errors.value(), 0);
        assert_eq!(counters.total_connections.value(), 0);
    }

    #[tokio::test]
    async fn redis_failure_counts_redis_only() {
        let fake = FakeConnect {
            fail: true,
            ..Default::default()
        };
        let counters = DialCounters::detached();
        let dialer = ClassifyingDialer::with_connector(sentinels(), fake, counters);

        let err = dialer
            .dial(&CancellationToken::new(), "tcp", "10.0.0.5:6379")
            .await
            .err()
            .unwrap();

        assert_eq!(err.to_string(), "connection refused");
        assert_eq!(counters.redis_dial_errors.value(), 1);
        assert_eq!(counters.sentinel_dial_errors.value(), 0);
        assert_eq!(counters.total_connections.value(), 0);
    }

    #[tokio::test]
    async fn success_counts_only_data_nodes() {
        let counters = DialCounters::detached();
        let dialer =
            ClassifyingDialer::with_connector(sentinels(), FakeConnect::default(), counters);

        dialer
            .dial(&CancellationToken::new(), "tcp", "10.0.0.1:26379")
            .await
            .unwrap();
        assert_eq!(counters.total_connections.value(), 0);

        dialer
            .dial(&CancellationToken::new(), "tcp", "10.0.0.5:6379")
            .await
            .unwrap();
        assert_eq!(counters.total_connections.value(), 1);
        assert_eq!(counters.redis_dial_errors.value(), 0);
        assert_eq!(counters.sentinel_dial_errors.value(), 0);
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_dial() {
        let fake = FakeConnect {
            hang: true,
            ..Default::default()
        };
        let counters = DialCounters::detached();
        let dialer = ClassifyingDialer::with_connector(sentinels(), fake, counters);
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                cancel.cancel();
            })
        };

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            dialer.dial(&cancel, "tcp", "10.0.0.5:6379"),
        )
        .await
        .expect("dial did not observe cancellation")
        .err()
        .unwrap();

        canceller.await.unwrap();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        assert_eq!(counters.redis_dial_errors.value(), 1);
    }

    #[tokio::test]
    async fn concurrent_dials_are_all_counted() {
        let counters = DialCounters::detached();
        let dial_fn =
            ClassifyingDialer::with_connector(Vec::new(), FakeConnect::default(), counters)
                .into_dial_fn();

        let mut tasks = Vec::new();
        for i in 0..32 {
            let dial_fn = dial_fn.clone();
            tasks.push(tokio::spawn(async move {
                dial_fn(
                    CancellationToken::new(),
                    "tcp".to_string(),
                    format!("10.0.1.{i}:6379"),
                )
                .await
                .map(|_| ())
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(counters.total_connections.value(), 32);
    }

    #[tokio::test]
    async fn tcp_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let opts = DialOptions {
            timeout: REDIS_DIAL_TIMEOUT,
            keep_alive: DIAL_KEEP_ALIVE,
        };
        assert!(TcpConnect.connect("tcp", &addr, opts).await.is_err());
    }

    #[tokio::test]
    async fn tcp_connect_rejects_unknown_network() {
        let opts = DialOptions {
            timeout: REDIS_DIAL_TIMEOUT,
            keep_alive: DIAL_KEEP_ALIVE,
        };
        let err = TcpConnect
            .connect("udp", "127.0.0.1:6379", opts)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
