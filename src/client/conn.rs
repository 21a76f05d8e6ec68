use std::io;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use super::hook::Conn;
use crate::error::Error;
use crate::resp::{Cmd, ParseError, Value};

/// A single established connection with its own receive buffer.
pub(crate) struct Connection {
    stream: Conn,
    recv_buf: BytesMut,
    send_buf: Vec<u8>,
    read_timeout: Duration,
    write_timeout: Duration,
    used_at: Instant,
}

impl Connection {
    pub fn new(stream: Conn, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            stream,
            recv_buf: BytesMut::with_capacity(4096),
            send_buf: Vec::with_capacity(256),
            read_timeout,
            write_timeout,
            used_at: Instant::now(),
        }
    }

    /// Authenticate and select the database. Runs once right after dial.
    pub async fn init(
        &mut self,
        username: Option<&str>,
        password: &str,
        db: i64,
    ) -> Result<(), Error> {
        if !password.is_empty() {
            let auth = match username {
                Some(user) => Cmd::new("AUTH").arg(user).arg(password),
                None => Cmd::new("AUTH").arg(password),
            };
            expect_ok(self.exec_one(&auth).await?)?;
        }

        if db != 0 {
            let select = Cmd::new("SELECT").arg(db.to_string());
            expect_ok(self.exec_one(&select).await?)?;
        }

        Ok(())
    }

    pub async fn exec_one(&mut self, cmd: &Cmd) -> Result<Value, Error> {
        let mut values = self.exec(std::slice::from_ref(cmd)).await?;
        values
            .pop()
            .ok_or_else(|| Error::Protocol("missing reply".to_string()))
    }

    /// Write all commands, then read one reply per command.
    pub async fn exec(&mut self, cmds: &[Cmd]) -> Result<Vec<Value>, Error> {
        self.send_buf.clear();
        for cmd in cmds {
            cmd.encode(&mut self.send_buf);
        }

        timeout(self.write_timeout, async {
            self.stream.write_all(&self.send_buf).await?;
            self.stream.flush().await
        })
        .await
        .map_err(|_| timed_out("write"))??;

        let mut replies = Vec::with_capacity(cmds.len());
        for _ in cmds {
            let value = timeout(self.read_timeout, self.read_value())
                .await
                .map_err(|_| timed_out("read"))??;
            replies.push(value);
        }

        self.used_at = Instant::now();
        Ok(replies)
    }

    async fn read_value(&mut self) -> Result<Value, Error> {
        loop {
            match Value::parse(&self.recv_buf) {
                Ok((value, consumed)) => {
                    let _ = self.recv_buf.split_to(consumed);
                    return Ok(value);
                }
                Err(ParseError::Incomplete) => {}
                Err(ParseError::Protocol(msg)) => return Err(Error::Protocol(msg)),
            }

            if self.stream.read_buf(&mut self.recv_buf).await? == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                )));
            }
        }
    }

    /// Time since the connection last completed a command.
    pub fn idle_for(&self) -> Duration {
        self.used_at.elapsed()
    }
}

fn timed_out(op: &str) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{op} timed out"),
    ))
}

pub(crate) fn expect_ok(value: Value) -> Result<(), Error> {
    match value {
        Value::SimpleString(s) if s == "OK" => Ok(()),
        Value::Error(msg) => Err(Error::Redis(msg)),
        other => Err(Error::Protocol(format!("expected OK, got {other:?}"))),
    }
}
