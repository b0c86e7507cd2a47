//! Evaluation orchestration: scheduling the {test x provider} matrix with
//! bounded concurrency, cache-first lookups and per-pair error isolation.

pub mod runner;

pub use runner::{CancelHandle, RunPolicy, Runner};
