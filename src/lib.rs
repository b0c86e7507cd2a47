//! Core engine for evaluating AI model outputs against declarative test
//! suites: a content-addressed TTL cache for provider outputs, a `$ref`
//! resolver for shared config fragments, a registry of assertion evaluators,
//! and an orchestrator that drives the {test x provider} matrix.
//!
//! The crate is a library; prompt rendering, provider invocation behind the
//! [`ProviderClient`] trait, and cache-first scheduling all live here, while
//! CLI surfaces and report formatting are left to embedding applications.
//!
//! [`ProviderClient`]: providers::ProviderClient

pub mod cache;
pub mod config;
pub mod engine;
pub mod errors;
pub mod evaluators;
pub mod judge;
pub mod model;
pub mod providers;
pub mod report;
pub mod resolver;
pub mod template;

pub use cache::{cache_key, CacheStats, CacheStore};
pub use engine::{CancelHandle, RunPolicy, Runner};
pub use errors::{ConfigError, LoadError, ResolveError};
pub use model::{
    AssertionKind, AssertionOutcome, AssertionRecord, AssertionSpec, CacheSettings, EvalConfig,
    EvaluationResult, PairStatus, ProviderConfig, ProviderOutput, TestCase,
};
pub use report::{RunArtifacts, RunSummary};
