//! Master address lookup through sentinels.

use std::io;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::conn::{Connection, expect_ok};
use super::hook::DialFn;
use crate::dialer::dial_cancelled;
use crate::error::Error;
use crate::resp::{Cmd, Value};

pub(crate) struct SentinelResolver {
    pub master_name: String,
    pub addrs: Vec<String>,
    pub username: Option<String>,
    pub password: String,
    pub timeout: Duration,
}

impl SentinelResolver {
    /// Ask each sentinel in order for the current master and return the first
    /// answer. Fails with [`Error::SentinelsUnreachable`] (as an `io::Error`)
    /// when none of them can answer, or with an `Interrupted` error once
    /// `cancel` fires.
    pub async fn master_addr(
        &self,
        dial: &DialFn,
        cancel: &CancellationToken,
    ) -> io::Result<String> {
        for addr in &self.addrs {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(dial_cancelled()),
                result = self.query(dial, cancel, addr) => result,
            };

            // a sentinel dial aborted by shutdown says nothing about the group
            if cancel.is_cancelled() {
                return Err(dial_cancelled());
            }

            match result {
                Ok(master) => {
                    debug!(
                        sentinel = %addr,
                        master = %master,
                        name = %self.master_name,
                        "resolved redis master"
                    );
                    return Ok(master);
                }
                Err(e) => {
                    warn!(
                        sentinel = %addr,
                        name = %self.master_name,
                        error = %e,
                        "sentinel lookup failed"
                    );
                }
            }
        }

        Err(Error::sentinels_unreachable())
    }

    async fn query(
        &self,
        dial: &DialFn,
        cancel: &CancellationToken,
        addr: &str,
    ) -> Result<String, Error> {
        let stream = dial(cancel.clone(), "tcp".to_string(), addr.to_string())
            .await
            .map_err(Error::Dial)?;
        let mut conn = Connection::new(stream, self.timeout, self.timeout);

        if !self.password.is_empty() {
            let auth = match &self.username {
                Some(user) => Cmd::new("AUTH").arg(user).arg(&self.password),
                None => Cmd::new("AUTH").arg(&self.password),
            };
            expect_ok(conn.exec_one(&auth).await?)?;
        }

        let cmd = Cmd::new("SENTINEL")
            .arg("get-master-addr-by-name")
            .arg(&self.master_name);

        match conn.exec_one(&cmd).await? {
            Value::Array(items) if items.len() == 2 => {
                match (items[0].as_str(), items[1].as_str()) {
                    (Some(host), Some(port)) => Ok(join_host_port(host, port)),
                    _ => Err(Error::Protocol("malformed master address".to_string())),
                }
            }
            Value::Null => Err(Error::Redis(format!(
                "no master named {:?}",
                self.master_name
            ))),
            Value::Error(msg) => Err(Error::Redis(msg)),
            other => Err(Error::Protocol(format!(
                "unexpected sentinel reply: {other:?}"
            ))),
        }
    }
}

/// Join a host and port, bracketing bare IPv6 literals.
pub(crate) fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
