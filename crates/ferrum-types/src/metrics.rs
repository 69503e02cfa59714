//! Per-iteration statistics produced by the executor engine

use crate::RequestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of one engine scheduling iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationStats {
    /// When the iteration finished
    pub timestamp: DateTime<Utc>,
    /// Iteration counter, starting at 0
    pub iter: u64,
    /// Wall-clock time spent polling the backend, in milliseconds
    pub iter_latency_ms: f64,
    /// Requests in flight after the iteration
    pub num_active_requests: usize,
    /// Highest number of requests ever in flight at once
    pub max_num_active_requests: usize,
    /// Requests accepted by the backend but not yet scheduled
    pub num_queued_requests: usize,
    /// Requests submitted to the backend during this iteration
    pub num_new_active_requests: usize,
    /// Requests that reached a terminal response during this iteration
    pub num_completed_requests: usize,
    /// Figures reported by the backend itself
    pub backend: BackendIterationStats,
}

/// Backend-reported part of [`IterationStats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendIterationStats {
    /// Device memory in use, in bytes
    pub gpu_mem_usage: Option<u64>,
    /// Host memory in use, in bytes
    pub cpu_mem_usage: Option<u64>,
    /// KV cache figures
    pub kv_cache_stats: Option<KvCacheStats>,
    /// In-flight batching figures
    pub inflight_batching_stats: Option<InflightBatchingStats>,
}

/// KV cache occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvCacheStats {
    pub max_num_blocks: usize,
    pub free_num_blocks: usize,
    pub used_num_blocks: usize,
    pub tokens_per_block: usize,
}

impl KvCacheStats {
    /// Fraction of blocks in use (0.0 to 1.0)
    pub fn utilization(&self) -> f32 {
        if self.max_num_blocks > 0 {
            self.used_num_blocks as f32 / self.max_num_blocks as f32
        } else {
            0.0
        }
    }
}

/// Composition of the running batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InflightBatchingStats {
    pub num_scheduled_requests: usize,
    pub num_context_requests: usize,
    pub num_gen_requests: usize,
    pub num_paused_requests: usize,
}

/// Per-request progress in one iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestStatsPerIteration {
    /// When the iteration finished
    pub timestamp: DateTime<Utc>,
    /// Iteration counter, matching [`IterationStats::iter`]
    pub iter: u64,
    /// One entry per request the backend knows about
    pub request_stats: Vec<RequestStats>,
}

/// Progress of a single request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStats {
    pub id: RequestId,
    pub stage: RequestStage,
    /// Number of prompt tokens already processed
    pub context_prefill_position: usize,
    pub num_generated_tokens: usize,
    /// Whether the request ran in this iteration
    pub scheduled: bool,
    /// Whether the request was paused for lack of capacity
    pub paused: bool,
}

/// Lifecycle stage of a request inside the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStage {
    Queued,
    ContextInProgress,
    GenerationInProgress,
    GenerationComplete,
}
