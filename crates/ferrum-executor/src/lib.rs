//! # Ferrum Executor
//!
//! Asynchronous request/response executor in front of an inference backend.
//!
//! ## Overview
//!
//! Callers submit [`ExecutorRequest`]s and get [`RequestId`]s back right away.
//! A dedicated engine thread feeds the requests to an
//! [`ExecutionBackend`](ferrum_interfaces::ExecutionBackend), polls it once per
//! iteration and publishes the resulting [`Response`]s. Callers collect them
//! with blocking awaits (optionally bounded by a timeout), for any request or
//! for specific ones, and can cancel requests or drain iteration statistics
//! at any time.
//!
//! - [`Executor`]: thread-safe facade and lifecycle (`shutdown`, scoped use)
//! - [`ExecutorEngine`]: engine loop on its own OS thread
//! - [`ResponseStore`]: per-request FIFO buffers with condition-variable waits
//! - [`StatsBuffer`]: bounded history of iteration statistics
//! - [`AsyncExecutor`]: tokio adapter running awaits on the blocking pool
//! - [`backends::EchoBackend`]: deterministic reference backend

pub mod async_executor;
pub mod backends;
pub mod engine;
pub mod executor;
pub mod response_store;
pub mod scope;
pub mod stats_buffer;

pub use async_executor::AsyncExecutor;
pub use engine::{EngineCommand, ExecutorEngine, ENGINE_THREAD_NAME};
pub use executor::{Executor, ExecutorState};
pub use response_store::ResponseStore;
pub use scope::ExecutorScope;
pub use stats_buffer::StatsBuffer;

pub use ferrum_interfaces::{BackendFactory, BackendStep, EngineSource, ExecutionBackend};
pub use ferrum_types::{
    ExecutorConfig, ExecutorRequest, FerrumError, IterationStats, ModelType, RequestId,
    RequestStatsPerIteration, Response, ResponsePayload, Result, ShutdownPolicy,
};
