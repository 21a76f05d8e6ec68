//! Redis client with pluggable dialing and a hook chain.
//!
//! A [`Client`] talks either to one fixed address ([`Client::new`]) or to
//! whichever master the configured sentinels report
//! ([`Client::new_failover`]). Every new connection goes through the dial
//! chain: the configured dialer (or a plain TCP dial) wrapped by each added
//! [`Hook`]. Commands go through the process and pipeline chains the same way.
//!
//! Connections are opened lazily, so constructing a client never touches the
//! network.

mod conn;
mod hook;
mod options;
mod pool;
mod sentinel;

pub use hook::{BoxFuture, Conn, DialFn, Hook, PipelineFn, ProcessFn, Stream};
pub use options::{FailoverOptions, Options};
pub(crate) use sentinel::join_host_port;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::dialer::{
    Connect, DIAL_KEEP_ALIVE, DialOptions, REDIS_DIAL_TIMEOUT, TcpConnect, dial_cancelled,
};
use crate::error::Error;
use crate::resp::{Cmd, Value};

use conn::Connection;
use pool::Pool;
use sentinel::SentinelResolver;

/// Address reported to dial hooks for failover clients, whose real target is
/// only known once a sentinel answers.
pub const FAILOVER_ADDR: &str = "FailoverClient";

/// Pool and timeout settings a client was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub db: i64,
    pub pool_size: usize,
    pub max_idle_conns: usize,
    pub conn_max_idle_time: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

enum Target {
    Direct { network: String, addr: String },
    Failover { sentinel_addrs: Vec<String> },
}

struct Shared {
    target: Target,
    settings: Settings,
    username: Option<String>,
    password: String,
    pool: Pool,
    /// Dial chain including hooks. Swapped when a hook is added.
    dial: RwLock<DialFn>,
    cancel: CancellationToken,
}

impl Shared {
    async fn connect(&self) -> Result<Connection, Error> {
        let dial = self.dial.read().clone();
        let (network, addr) = match &self.target {
            Target::Direct { network, addr } => (network.clone(), addr.clone()),
            Target::Failover { .. } => ("tcp".to_string(), FAILOVER_ADDR.to_string()),
        };

        let stream = dial(self.cancel.clone(), network, addr)
            .await
            .map_err(Error::Dial)?;
        let mut conn = Connection::new(
            stream,
            self.settings.read_timeout,
            self.settings.write_timeout,
        );
        conn.init(self.username.as_deref(), &self.password, self.settings.db)
            .await?;
        Ok(conn)
    }

    async fn exec(&self, cmds: &[Cmd]) -> Result<Vec<Value>, Error> {
        let mut checkout = self.pool.get(|| self.connect()).await?;
        let replies = checkout.conn.exec(cmds).await?;
        self.pool.put(checkout);
        Ok(replies)
    }
}

/// Redis client handle.
///
/// Clone-able, Send + Sync. All clones share the same pool.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
    hooks: Vec<Arc<dyn Hook>>,
    base_dial: DialFn,
    process: ProcessFn,
    pipeline: PipelineFn,
}

impl Client {
    /// Build a client for a single fixed address.
    pub fn new(opts: Options) -> Self {
        let settings = Settings {
            db: opts.db,
            pool_size: opts.pool_size,
            max_idle_conns: opts.max_idle_conns,
            conn_max_idle_time: opts.conn_max_idle_time,
            read_timeout: opts.read_timeout,
            write_timeout: opts.write_timeout,
        };
        let base_dial = opts.dialer.unwrap_or_else(default_dialer);
        let target = Target::Direct {
            network: opts.network,
            addr: opts.addr,
        };

        Self::build(target, settings, opts.username, opts.password, base_dial)
    }

    /// Build a client that dials whichever master the sentinels report.
    pub fn new_failover(opts: FailoverOptions) -> Self {
        let settings = Settings {
            db: opts.db,
            pool_size: opts.pool_size,
            max_idle_conns: opts.max_idle_conns,
            conn_max_idle_time: opts.conn_max_idle_time,
            read_timeout: opts.read_timeout,
            write_timeout: opts.write_timeout,
        };
        let dialer = opts.dialer.unwrap_or_else(default_dialer);
        let target = Target::Failover {
            sentinel_addrs: opts.sentinel_addrs.clone(),
        };
        let resolver = Arc::new(SentinelResolver {
            master_name: opts.master_name,
            addrs: opts.sentinel_addrs,
            username: opts.sentinel_username,
            password: opts.sentinel_password,
            timeout: opts.read_timeout,
        });

        // The sentinel lookup is part of dialing the master, so hooks observe
        // its failures the same way they observe a refused connection.
        let base_dial: DialFn = Arc::new(
            move |cancel: CancellationToken,
                  network: String,
                  _addr: String|
                  -> BoxFuture<'static, io::Result<Conn>> {
                let resolver = resolver.clone();
                let dialer = dialer.clone();
                Box::pin(async move {
                    let master = resolver.master_addr(&dialer, &cancel).await?;
                    dialer(cancel, network, master).await
                })
            },
        );

        Self::build(target, settings, opts.username, opts.password, base_dial)
    }

    fn build(
        target: Target,
        settings: Settings,
        username: Option<String>,
        password: String,
        base_dial: DialFn,
    ) -> Self {
        let shared = Arc::new(Shared {
            target,
            settings,
            username,
            password,
            pool: Pool::new(
                settings.pool_size,
                settings.max_idle_conns,
                settings.conn_max_idle_time,
                settings.read_timeout + Duration::from_secs(1),
            ),
            dial: RwLock::new(base_dial.clone()),
            cancel: CancellationToken::new(),
        });

        Self {
            hooks: Vec::new(),
            base_dial,
            process: base_process(&shared),
            pipeline: base_pipeline(&shared),
            shared,
        }
    }

    /// Add a hook to the chain. Hooks added earlier wrap hooks added later.
    ///
    /// The dial chain lives in the shared state, so clones made before this
    /// call dial through the new hook as well.
    pub fn add_hook(&mut self, hook: impl Hook) {
        self.hooks.push(Arc::new(hook));
        self.rebuild_chains();
    }

    fn rebuild_chains(&mut self) {
        let mut dial = self.base_dial.clone();
        let mut process = base_process(&self.shared);
        let mut pipeline = base_pipeline(&self.shared);

        for hook in self.hooks.iter().rev() {
            dial = hook.dial_hook(dial);
            process = hook.process_hook(process);
            pipeline = hook.process_pipeline_hook(pipeline);
        }

        *self.shared.dial.write() = dial;
        self.process = process;
        self.pipeline = pipeline;
    }

    /// Run a single command. A server error reply becomes [`Error::Redis`].
    pub async fn process(&self, cmd: Cmd) -> Result<Value, Error> {
        (self.process)(cmd).await
    }

    /// Send all commands on one connection and return every reply, including
    /// server error replies.
    pub async fn pipeline(&self, cmds: Vec<Cmd>) -> Result<Vec<Value>, Error> {
        if cmds.is_empty() {
            return Ok(Vec::new());
        }
        (self.pipeline)(cmds).await
    }

    pub async fn ping(&self) -> Result<(), Error> {
        match self.process(Cmd::new("PING")).await? {
            Value::SimpleString(s) if s == "PONG" => Ok(()),
            other => Err(Error::Protocol(format!(
                "unexpected PING response: {other:?}"
            ))),
        }
    }

    pub async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, Error> {
        match self.process(Cmd::new("GET").arg(key)).await? {
            Value::BulkString(data) => Ok(Some(data)),
            Value::Null => Ok(None),
            other => Err(Error::Protocol(format!(
                "unexpected GET response: {other:?}"
            ))),
        }
    }

    pub async fn set(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        conn::expect_ok(self.process(Cmd::new("SET").arg(key).arg(value)).await?)
    }

    /// Delete a key. Returns the number of keys deleted.
    pub async fn del(&self, key: &[u8]) -> Result<u64, Error> {
        match self.process(Cmd::new("DEL").arg(key)).await? {
            Value::Integer(n) => Ok(n.max(0) as u64),
            other => Err(Error::Protocol(format!(
                "unexpected DEL response: {other:?}"
            ))),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    /// True if this client resolves its master through sentinels.
    pub fn is_failover(&self) -> bool {
        matches!(self.shared.target, Target::Failover { .. })
    }

    /// Sentinel addresses for failover clients; empty otherwise.
    pub fn sentinel_addrs(&self) -> &[String] {
        match &self.shared.target {
            Target::Failover { sentinel_addrs } => sentinel_addrs,
            Target::Direct { .. } => &[],
        }
    }

    /// Cancel in-flight dials and close idle connections. Later commands fail
    /// with [`Error::Closed`].
    pub fn close(&self) {
        self.shared.cancel.cancel();
        self.shared.pool.close();
    }
}

fn base_process(shared: &Arc<Shared>) -> ProcessFn {
    let shared = shared.clone();
    Arc::new(move |cmd: Cmd| -> BoxFuture<'static, Result<Value, Error>> {
        let shared = shared.clone();
        Box::pin(async move {
            let mut replies = shared.exec(std::slice::from_ref(&cmd)).await?;
            match replies.pop() {
                Some(Value::Error(msg)) => Err(Error::Redis(msg)),
                Some(value) => Ok(value),
                None => Err(Error::Protocol("missing reply".to_string())),
            }
        })
    })
}

fn base_pipeline(shared: &Arc<Shared>) -> PipelineFn {
    let shared = shared.clone();
    Arc::new(move |cmds: Vec<Cmd>| -> BoxFuture<'static, Result<Vec<Value>, Error>> {
        let shared = shared.clone();
        Box::pin(async move { shared.exec(&cmds).await })
    })
}

/// Plain TCP or unix dial with the data-node timeout and no metrics.
fn default_dialer() -> DialFn {
    Arc::new(
        |cancel: CancellationToken,
         network: String,
         addr: String|
         -> BoxFuture<'static, io::Result<Conn>> {
            Box::pin(async move {
                let opts = DialOptions {
                    timeout: REDIS_DIAL_TIMEOUT,
                    keep_alive: DIAL_KEEP_ALIVE,
                };
                tokio::select! {
                    _ = cancel.cancelled() => Err(dial_cancelled()),
                    result = TcpConnect.connect(&network, &addr, opts) => result,
                }
            })
        },
    )
}
