//! Execution backend capability
//!
//! The executor never looks inside a backend: it hands requests over, polls
//! for progress once per iteration, forwards cancellations and finally
//! releases it. Model loading, batching and tensor execution all stay behind
//! this trait.

use ferrum_types::{
    BackendIterationStats, ExecutorRequest, RequestId, RequestStats, Response, Result,
};
use serde::{Deserialize, Serialize};

/// Inference backend driven by the executor engine
///
/// The engine owns the backend exclusively and calls it from a single thread,
/// so implementations need `Send` but not `Sync`.
pub trait ExecutionBackend: Send {
    /// Backend name, used in logs
    fn name(&self) -> &str;

    /// Accept a request for execution. Must not block on compute.
    fn submit(&mut self, request_id: RequestId, request: &ExecutorRequest) -> Result<()>;

    /// Advance execution by one iteration and report what happened.
    ///
    /// Called repeatedly while requests are in flight. Implementations that
    /// compute on their own threads return whatever finished since the last
    /// call; synchronous ones run one step.
    fn poll(&mut self) -> Result<BackendStep>;

    /// Best-effort cancellation.
    ///
    /// Returns `true` when the backend dropped the request before producing
    /// its own terminal response; the backend must then never emit another
    /// response for it. `false` means the request is unknown or already
    /// finishing, in which case its own terminal response still arrives.
    fn cancel(&mut self, request_id: RequestId) -> bool;

    /// Requests accepted and not yet terminated
    fn num_active_requests(&self) -> usize;

    /// Whether the backend can still accept work at all.
    ///
    /// `false` is permanent: the executor stops accepting submissions.
    fn can_accept_requests(&self) -> bool {
        true
    }

    /// Release backend resources. Called once, after the engine quiesced.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }

    /// Static capabilities
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }
}

/// Outcome of one [`ExecutionBackend::poll`]
#[derive(Debug, Clone, Default)]
pub struct BackendStep {
    /// Responses in production order; per request they must be FIFO
    pub responses: Vec<Response>,
    /// Requests accepted but not yet scheduled
    pub num_queued_requests: usize,
    /// Backend-level iteration figures
    pub iteration_stats: BackendIterationStats,
    /// Per-request progress, if the backend tracks it
    pub request_stats: Vec<RequestStats>,
}

impl BackendStep {
    /// A step that made no progress
    pub fn idle() -> Self {
        Self::default()
    }

    /// A step with responses only
    pub fn with_responses(responses: Vec<Response>) -> Self {
        Self {
            responses,
            ..Default::default()
        }
    }

    /// Whether the step produced any response
    pub fn has_responses(&self) -> bool {
        !self.responses.is_empty()
    }
}

/// Backend capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// Backend publishes partial responses for streaming requests
    pub supports_streaming: bool,
    /// Backend honors cancellation of running requests
    pub supports_cancellation: bool,
    /// Backend reports per-request stats
    pub supports_request_stats: bool,
    /// Largest beam width supported
    pub max_beam_width: usize,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            supports_streaming: true,
            supports_cancellation: true,
            supports_request_stats: false,
            max_beam_width: 1,
        }
    }
}
