//! Live execution
//!
//! The last hop of the pipeline: a probed cycle becomes a signed transaction
//! inside a private bundle. The executor is strictly single-flight - the
//! scheduler checks `running()` before handing over a cycle, and `run`
//! itself refuses a second entry.

mod flashbots;

pub use flashbots::{FlashbotsExecutor, RelayEndpoints};

use crate::model::{Cycle, RunResult};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

pub trait Executor: Send + Sync {
    /// True while a submission is in progress
    fn running(&self) -> bool;

    /// Sign, submit and wait for the target block. Implementations must be
    /// single-flight: a call while `running()` is an error, not a queue.
    fn run(&self, cycle: Arc<Cycle>) -> BoxFuture<'static, eyre::Result<RunResult>>;
}

/// Executor for non-live runs: never busy, never submits
pub struct NoopExecutor;

impl Executor for NoopExecutor {
    fn running(&self) -> bool {
        false
    }

    fn run(&self, _cycle: Arc<Cycle>) -> BoxFuture<'static, eyre::Result<RunResult>> {
        async {
            Ok(RunResult {
                success: false,
                error: Some("live execution disabled".to_string()),
            })
        }
        .boxed()
    }
}
