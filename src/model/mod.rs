//! Core domain types
//!
//! The vocabulary shared by every stage of the pipeline:
//! - `Amm`: which exchange family owns an edge or a hop
//! - `Notional`: the trade-size buckets, each with its own admission threshold
//! - `Half` / `Cycle`: a closed walk through the price graph with a stable
//!   identity hash and a cancellation token
//! - `TestResult` / `RunResult`: probe and live-submission outcomes

mod amm;
mod cycle;
mod notional;

pub use amm::Amm;
pub use cycle::{Cycle, Half, RunResult, TestResult};
pub use notional::Notional;
