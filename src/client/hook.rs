//! Interception points around dialing and command processing.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::resp::{Cmd, Value};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Byte stream returned by a dial.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Stream for T {}

pub type Conn = Box<dyn Stream>;

/// Opens a connection: `(cancel, network, addr)`.
pub type DialFn = Arc<
    dyn Fn(CancellationToken, String, String) -> BoxFuture<'static, io::Result<Conn>>
        + Send
        + Sync,
>;

/// Runs a single command.
pub type ProcessFn = Arc<dyn Fn(Cmd) -> BoxFuture<'static, Result<Value, Error>> + Send + Sync>;

/// Runs a batch of commands on one connection.
pub type PipelineFn =
    Arc<dyn Fn(Vec<Cmd>) -> BoxFuture<'static, Result<Vec<Value>, Error>> + Send + Sync>;

/// A hook wraps each stage of the client and returns the wrapped stage.
///
/// Hooks are composed by [`Client::add_hook`](super::Client::add_hook); the
/// first hook added is the outermost.
pub trait Hook: Send + Sync + 'static {
    fn dial_hook(&self, next: DialFn) -> DialFn;

    fn process_hook(&self, next: ProcessFn) -> ProcessFn;

    fn process_pipeline_hook(&self, next: PipelineFn) -> PipelineFn;
}
