//! Hook recording sentinel master lookup failures.

use std::io;
use std::sync::Arc;

use metriken::Counter;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::client::{BoxFuture, Conn, DialFn, Hook, PipelineFn, ProcessFn};
use crate::error::is_sentinels_unreachable;
use crate::metrics::DialCounters;

/// Counts dials that failed because no sentinel could name a master.
///
/// Individual refused connections are already counted by the dialer; this
/// tracks the case where the whole sentinel group is unreachable.
#[derive(Clone, Copy)]
pub struct SentinelInstrumentation {
    master_errors: &'static Counter,
}

impl SentinelInstrumentation {
    pub fn new(counters: DialCounters) -> Self {
        Self {
            master_errors: counters.sentinel_master_errors,
        }
    }
}

impl Default for SentinelInstrumentation {
    fn default() -> Self {
        Self::new(DialCounters::default())
    }
}

impl Hook for SentinelInstrumentation {
    fn dial_hook(&self, next: DialFn) -> DialFn {
        let master_errors = self.master_errors;
        Arc::new(
            move |cancel: CancellationToken,
                  network: String,
                  addr: String|
                  -> BoxFuture<'static, io::Result<Conn>> {
                let next = next.clone();
                Box::pin(async move {
                    let result = next(cancel, network, addr).await;
                    if let Err(e) = &result {
                        if is_sentinels_unreachable(e) {
                            master_errors.increment();
                            warn!(error = %e, "no sentinel could provide a master address");
                        }
                    }
                    result
                })
            },
        )
    }

    fn process_hook(&self, next: ProcessFn) -> ProcessFn {
        next
    }

    fn process_pipeline_hook(&self, next: PipelineFn) -> PipelineFn {
        next
    }
}
