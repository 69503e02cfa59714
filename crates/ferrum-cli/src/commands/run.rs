//! Run command - push prompts through an executor and report the results

use crate::{
    config::CliConfig,
    output::{print_info, print_output, print_warning, OutputFormat},
    utils::{format_token_list, parse_token_list},
};
use clap::Args;
use colored::*;
use ferrum_executor::{
    backends::{EchoBackend, EchoBackendFactory},
    AsyncExecutor, Executor,
};
use ferrum_types::{
    ExecutorRequest, FinishReason, IterationStats, ModelType, RequestId, Response,
    ResponsePayload, Result, SamplingParams, TokenId,
};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Args, Debug)]
pub struct RunCommand {
    /// Model directory or config file; the configured echo model is used when omitted
    #[arg(short, long)]
    pub model: Option<String>,

    /// Model type
    #[arg(long, default_value = "decoder_only")]
    pub model_type: String,

    /// Prompt as comma separated token ids, may be repeated
    #[arg(short, long = "prompt", default_value = "1,2,3")]
    pub prompts: Vec<String>,

    /// Tokens to generate per request
    #[arg(long)]
    pub max_new_tokens: Option<usize>,

    /// Stream partial responses
    #[arg(long)]
    pub streaming: bool,

    /// Sampling temperature, 0 for greedy
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Stop when this token is generated
    #[arg(long)]
    pub end_id: Option<u32>,

    /// Submit every prompt this many times
    #[arg(long, default_value_t = 1)]
    pub requests: usize,
}

/// What happened to one submitted prompt
#[derive(Debug, Serialize)]
pub struct RequestOutcome {
    pub request_id: Option<RequestId>,
    pub prompt: Vec<TokenId>,
    pub output: Vec<TokenId>,
    pub num_responses: usize,
    pub finish_reason: Option<FinishReason>,
    pub error: Option<String>,
}

/// Aggregate figures from the drained iteration stats
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub backend: String,
    pub requests: usize,
    pub failed: usize,
    pub elapsed_ms: f64,
    pub iterations: usize,
    pub mean_iter_latency_ms: f64,
    pub max_num_active_requests: usize,
    pub dropped_iteration_stats: u64,
}

#[derive(Debug, Serialize)]
struct RunReport {
    outcomes: Vec<RequestOutcome>,
    summary: RunSummary,
}

pub async fn execute(cmd: RunCommand, config: CliConfig, format: OutputFormat) -> Result<()> {
    let prompts = cmd
        .prompts
        .iter()
        .map(|p| parse_token_list(p))
        .collect::<Result<Vec<_>>>()?;
    let requests = build_requests(&cmd, &config, &prompts)?;
    let timeout = Duration::from_millis(config.run.timeout_ms);

    let executor = start_executor(&cmd, &config)?;
    let backend = executor.backend_name().to_string();
    let executor = AsyncExecutor::new(executor);
    info!(backend = %backend, requests = requests.len(), "Submitting requests");

    let started = Instant::now();
    let request_prompts: Vec<Vec<TokenId>> = requests
        .iter()
        .map(|r| r.input_token_ids.clone())
        .collect();
    let submitted: Vec<(Vec<TokenId>, Result<RequestId>)> = request_prompts
        .into_iter()
        .zip(executor.enqueue_requests(requests))
        .collect();

    let mut outcomes = Vec::with_capacity(submitted.len());
    for (prompt, result) in submitted {
        let outcome = match result {
            Ok(id) => {
                let responses = executor.wait_for_completion(id, Some(timeout)).await?;
                summarize_request(id, prompt, &responses)
            }
            Err(e) => RequestOutcome {
                request_id: None,
                prompt,
                output: Vec::new(),
                num_responses: 0,
                finish_reason: None,
                error: Some(e.to_string()),
            },
        };
        outcomes.push(outcome);
    }
    let elapsed = started.elapsed();

    executor.shutdown().await?;

    let mut summary = summarize_iterations(&executor.get_latest_iteration_stats());
    summary.backend = backend;
    summary.requests = outcomes.len();
    summary.failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    summary.elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    summary.dropped_iteration_stats = executor.executor().num_dropped_iteration_stats();

    match format {
        OutputFormat::Json => print_output(&RunReport { outcomes, summary }),
        OutputFormat::Pretty => {
            print_pretty(&outcomes, &summary);
            Ok(())
        }
    }
}

fn start_executor(cmd: &RunCommand, config: &CliConfig) -> Result<Executor> {
    match &cmd.model {
        Some(path) => {
            let model_type: ModelType = cmd.model_type.parse()?;
            debug!(path = %path, model_type = %model_type, "Loading model");
            Executor::from_model_path(
                path,
                model_type,
                config.executor.clone(),
                &EchoBackendFactory,
            )
        }
        None => Executor::new(
            Box::new(EchoBackend::new(config.model.clone())),
            config.executor.clone(),
        ),
    }
}

fn build_requests(
    cmd: &RunCommand,
    config: &CliConfig,
    prompts: &[Vec<TokenId>],
) -> Result<Vec<ExecutorRequest>> {
    let max_new_tokens = cmd.max_new_tokens.unwrap_or(config.run.max_new_tokens);
    let temperature = cmd.temperature.unwrap_or(config.run.temperature);
    let streaming = cmd.streaming || config.run.streaming;

    let mut sampling = if temperature == 0.0 {
        SamplingParams::greedy()
    } else {
        SamplingParams::with_temperature(temperature)
    };
    sampling.seed = cmd.seed;
    sampling.validate()?;

    let mut requests = Vec::with_capacity(prompts.len() * cmd.requests);
    for _ in 0..cmd.requests {
        for prompt in prompts {
            let mut request = ExecutorRequest::new(prompt.clone(), max_new_tokens)
                .with_sampling_params(sampling.clone())
                .with_streaming(streaming)
                .with_client_id("ferrum-exec");
            if let Some(end_id) = cmd.end_id {
                request = request.with_end_id(TokenId(end_id));
            }
            requests.push(request);
        }
    }
    Ok(requests)
}

/// Fold the responses of one request into an outcome
pub fn summarize_request(
    id: RequestId,
    prompt: Vec<TokenId>,
    responses: &[Response],
) -> RequestOutcome {
    let mut outcome = RequestOutcome {
        request_id: Some(id),
        prompt,
        output: Vec::new(),
        num_responses: responses.len(),
        finish_reason: None,
        error: None,
    };

    for response in responses {
        match &response.payload {
            ResponsePayload::Result(result) => {
                outcome.output.extend_from_slice(&result.output_token_ids);
                if result.is_final {
                    outcome.finish_reason = result.finish_reason;
                }
            }
            ResponsePayload::Error(e) => outcome.error = Some(e.to_string()),
        }
    }

    if !responses.last().is_some_and(Response::is_final) {
        outcome.error = Some("timed out waiting for the final response".to_string());
    }
    outcome
}

/// Aggregate iteration stats
pub fn summarize_iterations<'a>(stats: impl IntoIterator<Item = &'a IterationStats>) -> RunSummary {
    let mut summary = RunSummary::default();
    let mut total_latency = 0.0;

    for s in stats {
        summary.iterations += 1;
        total_latency += s.iter_latency_ms;
        summary.max_num_active_requests =
            summary.max_num_active_requests.max(s.max_num_active_requests);
    }
    if summary.iterations > 0 {
        summary.mean_iter_latency_ms = total_latency / summary.iterations as f64;
    }
    summary
}

fn print_pretty(outcomes: &[RequestOutcome], summary: &RunSummary) {
    for outcome in outcomes {
        let id = outcome
            .request_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        match &outcome.error {
            Some(error) => print_warning(&format!(
                "request {} [{}]: {}",
                id,
                format_token_list(&outcome.prompt),
                error
            )),
            None => println!(
                "{} [{}] -> [{}] ({:?}, {} responses)",
                format!("request {}", id).bold(),
                format_token_list(&outcome.prompt),
                format_token_list(&outcome.output).cyan(),
                outcome.finish_reason.unwrap_or(FinishReason::Length),
                outcome.num_responses
            ),
        }
    }

    print_info(&format!(
        "{} requests ({} failed) on {} in {:.1} ms, {} iterations, mean {:.3} ms, peak {} active",
        summary.requests,
        summary.failed,
        summary.backend,
        summary.elapsed_ms,
        summary.iterations,
        summary.mean_iter_latency_ms,
        summary.max_num_active_requests
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ferrum_types::{FerrumError, GenerationResult, TokenUsage};

    fn tokens(ids: &[u32]) -> Vec<TokenId> {
        ids.iter().copied().map(TokenId).collect()
    }

    #[test]
    fn test_summarize_streamed_request() {
        let id = RequestId(3);
        let responses = vec![
            Response::result(
                id,
                GenerationResult::partial(tokens(&[1]), TokenUsage::new(2, 1)),
            ),
            Response::result(
                id,
                GenerationResult::complete(
                    tokens(&[2, 3]),
                    FinishReason::EndId,
                    TokenUsage::new(2, 3),
                ),
            ),
        ];

        let outcome = summarize_request(id, tokens(&[9, 9]), &responses);
        assert_eq!(outcome.output, tokens(&[1, 2, 3]));
        assert_eq!(outcome.finish_reason, Some(FinishReason::EndId));
        assert_eq!(outcome.num_responses, 2);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_summarize_error_and_timeout() {
        let id = RequestId(1);
        let cancelled = vec![Response::error(id, FerrumError::cancelled("stop"))];
        let outcome = summarize_request(id, tokens(&[1]), &cancelled);
        assert!(outcome.error.unwrap().contains("stop"));

        let partial = vec![Response::result(
            id,
            GenerationResult::partial(tokens(&[4]), TokenUsage::new(1, 1)),
        )];
        let outcome = summarize_request(id, tokens(&[1]), &partial);
        assert!(outcome.error.unwrap().contains("timed out"));
    }

    #[test]
    fn test_summarize_iterations() {
        let stat = |iter: u64, latency: f64, max_active: usize| IterationStats {
            timestamp: Utc::now(),
            iter,
            iter_latency_ms: latency,
            num_active_requests: 0,
            max_num_active_requests: max_active,
            num_queued_requests: 0,
            num_new_active_requests: 0,
            num_completed_requests: 0,
            backend: Default::default(),
        };
        let stats = vec![stat(0, 1.0, 2), stat(1, 3.0, 4)];

        let summary = summarize_iterations(&stats);
        assert_eq!(summary.iterations, 2);
        assert_eq!(summary.mean_iter_latency_ms, 2.0);
        assert_eq!(summary.max_num_active_requests, 4);

        assert_eq!(summarize_iterations(&[]).iterations, 0);
    }
}
