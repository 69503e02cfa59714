//! Executor engine loop
//!
//! The engine owns the backend and runs on a dedicated OS thread. Callers
//! talk to it only through [`EngineCommand`]s on a crossbeam channel; results
//! flow back through the shared [`ResponseStore`] and statistics buffers.
//!
//! One iteration:
//!
//! 1. Drain pending commands (submissions, cancellations, shutdown)
//! 2. Poll the backend once if anything is in flight
//! 3. Record iteration and per-request statistics
//! 4. Publish the step's responses in one batch

use crate::{ResponseStore, StatsBuffer};
use chrono::Utc;
use crossbeam::channel::{Receiver, RecvTimeoutError, TryRecvError};
use ferrum_interfaces::{BackendStep, ExecutionBackend};
use ferrum_types::{
    ExecutorConfig, ExecutorRequest, FerrumError, IterationStats, RequestId,
    RequestStatsPerIteration, Response, Result, ShutdownPolicy,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Name of the engine thread
pub const ENGINE_THREAD_NAME: &str = "ferrum-executor-engine";

/// Longest wait between polls while requests are in flight but the backend
/// made no progress
const BUSY_BACKOFF: Duration = Duration::from_millis(1);

/// Message from the executor facade to the engine thread
#[derive(Debug)]
pub enum EngineCommand {
    /// Submit requests, in order
    Enqueue(Vec<(RequestId, ExecutorRequest)>),
    /// Cancel one request
    Cancel(RequestId),
    /// Stop the loop
    Shutdown(ShutdownPolicy),
}

enum Intake {
    Continue,
    Shutdown(ShutdownPolicy),
    Disconnected,
}

/// State the engine shares with the facade
#[derive(Debug, Clone)]
pub struct EngineShared {
    pub store: Arc<ResponseStore>,
    pub iteration_stats: Arc<StatsBuffer<IterationStats>>,
    pub request_stats: Arc<StatsBuffer<RequestStatsPerIteration>>,
    /// Mirrors whether the backend still accepts work
    pub accepting: Arc<AtomicBool>,
}

impl EngineShared {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            store: Arc::new(ResponseStore::new()),
            iteration_stats: Arc::new(StatsBuffer::new(config.iter_stats_max_iterations)),
            request_stats: Arc::new(StatsBuffer::new(config.request_stats_max_iterations)),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }
}

/// Engine loop state. Lives on the engine thread only.
pub struct ExecutorEngine {
    backend: Box<dyn ExecutionBackend>,
    commands: Receiver<EngineCommand>,
    shared: EngineShared,
    /// Requests handed to the backend and not yet terminated
    in_flight: HashSet<RequestId>,
    iteration: u64,
    max_num_active: usize,
    new_since_last_iteration: usize,
    idle_poll_interval: Duration,
    drain_timeout: Duration,
}

impl ExecutorEngine {
    pub fn new(
        backend: Box<dyn ExecutionBackend>,
        commands: Receiver<EngineCommand>,
        shared: EngineShared,
        config: &ExecutorConfig,
    ) -> Self {
        Self {
            backend,
            commands,
            shared,
            in_flight: HashSet::new(),
            iteration: 0,
            max_num_active: 0,
            new_since_last_iteration: 0,
            idle_poll_interval: config.idle_poll_interval(),
            drain_timeout: config.drain_timeout(),
        }
    }

    /// Start the loop on its own named thread
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(ENGINE_THREAD_NAME.to_string())
            .spawn(move || {
                let _guard = ExitGuard {
                    store: self.shared.store.clone(),
                    accepting: self.shared.accepting.clone(),
                };
                self.run();
            })
            .map_err(|e| {
                FerrumError::initialization(format!("Failed to spawn engine thread: {}", e))
            })
    }

    /// Run until a shutdown command arrives or the facade disappears
    pub fn run(mut self) {
        info!("Starting executor engine on backend '{}'", self.backend.name());
        let mut productive = true;

        let policy = loop {
            let wait = if self.in_flight.is_empty() {
                Some(self.idle_poll_interval)
            } else if !productive {
                Some(self.idle_poll_interval.min(BUSY_BACKOFF))
            } else {
                None
            };

            match self.intake(wait) {
                Intake::Continue => {}
                Intake::Shutdown(policy) => break policy,
                Intake::Disconnected => {
                    warn!("Executor handle dropped without shutdown");
                    break ShutdownPolicy::Cancel;
                }
            }

            if !self.in_flight.is_empty() {
                productive = self.run_iteration();
            }
        };

        self.shutdown(policy);
        info!("Executor engine stopped after {} iterations", self.iteration);
    }

    /// Receive commands. Blocks for at most `wait` on the first one when given,
    /// then drains whatever else is queued.
    fn intake(&mut self, wait: Option<Duration>) -> Intake {
        let first = match wait {
            Some(timeout) => match self.commands.recv_timeout(timeout) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => return Intake::Disconnected,
            },
            None => None,
        };

        if let Some(command) = first {
            if let Some(policy) = self.handle_command(command) {
                return Intake::Shutdown(policy);
            }
        }

        loop {
            match self.commands.try_recv() {
                Ok(command) => {
                    if let Some(policy) = self.handle_command(command) {
                        return Intake::Shutdown(policy);
                    }
                }
                Err(TryRecvError::Empty) => return Intake::Continue,
                Err(TryRecvError::Disconnected) => return Intake::Disconnected,
            }
        }
    }

    fn handle_command(&mut self, command: EngineCommand) -> Option<ShutdownPolicy> {
        match command {
            EngineCommand::Enqueue(batch) => {
                self.submit_batch(batch);
                None
            }
            EngineCommand::Cancel(request_id) => {
                self.cancel(request_id);
                None
            }
            EngineCommand::Shutdown(policy) => Some(policy),
        }
    }

    fn submit_batch(&mut self, batch: Vec<(RequestId, ExecutorRequest)>) {
        let mut failures = Vec::new();

        for (request_id, request) in batch {
            match self.backend.submit(request_id, &request) {
                Ok(()) => {
                    self.in_flight.insert(request_id);
                    self.new_since_last_iteration += 1;
                    debug!(
                        "Submitted request {} ({} input tokens)",
                        request_id,
                        request.input_token_ids.len()
                    );
                }
                Err(e) => {
                    warn!("Backend rejected request {}: {}", request_id, e);
                    failures.push(Response::error(
                        request_id,
                        FerrumError::backend(format!("submission failed: {}", e)),
                    ));
                }
            }
        }

        self.max_num_active = self.max_num_active.max(self.in_flight.len());
        self.shared.store.publish_batch(failures);
    }

    fn cancel(&mut self, request_id: RequestId) {
        if !self.in_flight.contains(&request_id) {
            debug!("Ignoring cancel for inactive request {}", request_id);
            return;
        }

        if self.backend.cancel(request_id) {
            self.in_flight.remove(&request_id);
            self.shared.store.publish(Response::error(
                request_id,
                FerrumError::cancelled("cancelled by caller"),
            ));
            debug!("Cancelled request {}", request_id);
        } else {
            debug!(
                "Backend could not cancel request {}, waiting for its own terminal response",
                request_id
            );
        }
    }

    /// Poll the backend once. Returns whether the step produced any response.
    fn run_iteration(&mut self) -> bool {
        let started = Instant::now();
        let mut step = match self.backend.poll() {
            Ok(step) => step,
            Err(e) => {
                error!("Backend poll failed: {}", e);
                self.fail_in_flight(FerrumError::backend(format!("backend failure: {}", e)));
                self.accepting_from_backend();
                return true;
            }
        };
        let latency = started.elapsed();

        let productive = step.has_responses();
        let (outgoing, completed) = self.filter_responses(std::mem::take(&mut step.responses));

        // Stats and the accepting flag are updated before the responses
        // become visible to callers
        self.record_stats(step, latency, completed);
        self.accepting_from_backend();
        self.iteration += 1;
        self.shared.store.publish_batch(outgoing);

        productive
    }

    /// Drop responses for requests the engine no longer tracks and forget
    /// requests that terminated. Returns the kept responses and the number
    /// of terminated requests.
    fn filter_responses(&mut self, responses: Vec<Response>) -> (Vec<Response>, usize) {
        let mut completed = 0;
        let mut outgoing = Vec::with_capacity(responses.len());

        for response in responses {
            let request_id = response.request_id;
            if !self.in_flight.contains(&request_id) {
                debug!("Dropping response for inactive request {}", request_id);
                continue;
            }
            if response.is_final() {
                self.in_flight.remove(&request_id);
                completed += 1;
            }
            outgoing.push(response);
        }

        (outgoing, completed)
    }

    fn record_stats(&mut self, step: BackendStep, latency: Duration, completed: usize) {
        let timestamp = Utc::now();

        if self.shared.iteration_stats.is_enabled() {
            self.shared.iteration_stats.push(IterationStats {
                timestamp,
                iter: self.iteration,
                iter_latency_ms: latency.as_secs_f64() * 1000.0,
                num_active_requests: self.in_flight.len(),
                max_num_active_requests: self.max_num_active,
                num_queued_requests: step.num_queued_requests,
                num_new_active_requests: self.new_since_last_iteration,
                num_completed_requests: completed,
                backend: step.iteration_stats,
            });
        }

        if self.shared.request_stats.is_enabled() {
            self.shared.request_stats.push(RequestStatsPerIteration {
                timestamp,
                iter: self.iteration,
                request_stats: step.request_stats,
            });
        }

        self.new_since_last_iteration = 0;
    }

    fn accepting_from_backend(&self) {
        if !self.backend.can_accept_requests()
            && self.shared.accepting.swap(false, Ordering::SeqCst)
        {
            warn!("Backend '{}' stopped accepting requests", self.backend.name());
        }
    }

    /// Publish a terminal error for every in-flight request
    fn fail_in_flight(&mut self, error: FerrumError) {
        let responses: Vec<Response> = self
            .in_flight
            .drain()
            .map(|request_id| Response::error(request_id, error.clone()))
            .collect();
        self.shared.store.publish_batch(responses);
    }

    fn cancel_in_flight(&mut self, reason: &str) {
        let ids: Vec<RequestId> = self.in_flight.iter().copied().collect();
        for request_id in &ids {
            self.backend.cancel(*request_id);
        }
        if !ids.is_empty() {
            info!("Cancelling {} in-flight requests: {}", ids.len(), reason);
        }
        self.fail_in_flight(FerrumError::cancelled(reason.to_string()));
    }

    fn shutdown(&mut self, policy: ShutdownPolicy) {
        info!(
            "Shutting down executor engine ({:?}, {} in flight)",
            policy,
            self.in_flight.len()
        );
        self.shared.accepting.store(false, Ordering::SeqCst);

        if policy == ShutdownPolicy::Drain {
            let deadline = Instant::now() + self.drain_timeout;
            while !self.in_flight.is_empty() && Instant::now() < deadline {
                if !self.run_iteration() {
                    thread::sleep(BUSY_BACKOFF);
                }
            }
            if !self.in_flight.is_empty() {
                warn!(
                    "Drain timeout elapsed with {} requests in flight",
                    self.in_flight.len()
                );
            }
        }
        self.cancel_in_flight("executor shut down");

        // Submissions that raced with shutdown never reached the backend
        let mut late = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            if let EngineCommand::Enqueue(batch) = command {
                late.extend(batch.into_iter().map(|(request_id, _)| {
                    Response::error(request_id, FerrumError::cancelled("executor shut down"))
                }));
            }
        }
        self.shared.store.publish_batch(late);

        if let Err(e) = self.backend.release() {
            warn!("Backend release failed: {}", e);
        }
    }
}

/// Marks the executor unusable when the engine thread exits, including on panic
struct ExitGuard {
    store: Arc<ResponseStore>,
    accepting: Arc<AtomicBool>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.accepting.store(false, Ordering::SeqCst);
        if thread::panicking() {
            error!("Executor engine thread panicked");
            self.store.close();
        }
    }
}
