//! Deterministic CPU backend
//!
//! Generates one token per scheduled request per iteration by replaying the
//! prompt: greedy requests echo it cyclically, sampled ones draw prompt
//! tokens with a seeded RNG. A token that would complete one of the
//! request's bad words is skipped for the next prompt token; when every
//! prompt token is banned the request ends with `StopWords`. Useful for
//! wiring tests and the CLI without a real model.

use ferrum_interfaces::{
    BackendCapabilities, BackendFactory, BackendStep, EngineSource, ExecutionBackend,
};
use ferrum_types::{
    BackendIterationStats, ExecutorConfig, ExecutorRequest, FerrumError, FinishReason,
    GenerationResult, InflightBatchingStats, KvCacheStats, ModelType, RequestId, RequestStage,
    RequestStats, Response, Result, TokenId, TokenUsage,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// File name of the model configuration inside a model directory
pub const MODEL_CONFIG_FILE: &str = "config.json";

/// Seed used when a sampled request does not carry one
const DEFAULT_SEED: u64 = 42;

/// Echo model configuration (`config.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoModelConfig {
    /// Token ids must be below this
    pub vocab_size: u32,
    /// Requests generating concurrently; the rest queue
    pub max_active_requests: usize,
    /// KV cache block size reported in stats
    pub tokens_per_block: usize,
    /// KV cache blocks reported in stats
    pub max_num_blocks: usize,
    /// Requests whose prompt contains this token fail with a backend error
    pub fail_on_token: Option<TokenId>,
    /// Artificial latency per iteration
    pub step_delay_ms: u64,
    /// Total requests accepted over the backend's lifetime
    pub request_budget: Option<usize>,
}

impl Default for EchoModelConfig {
    fn default() -> Self {
        Self {
            vocab_size: 32000,
            max_active_requests: 8,
            tokens_per_block: 16,
            max_num_blocks: 1024,
            fail_on_token: None,
            step_delay_ms: 0,
            request_budget: None,
        }
    }
}

impl EchoModelConfig {
    /// Load from a `config.json` file, or from a directory containing one
    pub fn from_model_path(path: &Path) -> Result<Self> {
        let file = if path.is_dir() {
            path.join(MODEL_CONFIG_FILE)
        } else {
            path.to_path_buf()
        };
        if !file.is_file() {
            return Err(FerrumError::initialization(format!(
                "Model config not found: {}",
                file.display()
            )));
        }

        let content = std::fs::read_to_string(&file)?;
        serde_json::from_str(&content).map_err(|e| {
            FerrumError::initialization(format!("Malformed {}: {}", file.display(), e))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(FerrumError::initialization("vocab_size must be positive"));
        }
        if self.max_active_requests == 0 {
            return Err(FerrumError::initialization(
                "max_active_requests must be positive",
            ));
        }
        if self.tokens_per_block == 0 {
            return Err(FerrumError::initialization("tokens_per_block must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct EchoSequence {
    request: ExecutorRequest,
    generated: Vec<TokenId>,
    /// Tokens already delivered in partial responses
    emitted: usize,
    rng: StdRng,
    scheduled: bool,
    /// Every candidate token would complete a bad word
    blocked: bool,
}

impl EchoSequence {
    fn new(request: ExecutorRequest) -> Self {
        let seed = request.sampling_params.seed.unwrap_or(DEFAULT_SEED);
        Self {
            request,
            generated: Vec::new(),
            emitted: 0,
            rng: StdRng::seed_from_u64(seed),
            scheduled: false,
            blocked: false,
        }
    }

    fn next_token(&mut self) -> Option<TokenId> {
        let len = self.request.input_token_ids.len();
        let start = if self.request.sampling_params.is_greedy() {
            self.generated.len() % len
        } else {
            self.rng.gen_range(0..len)
        };
        (0..len)
            .map(|offset| self.request.input_token_ids[(start + offset) % len])
            .find(|token| !self.completes_bad_word(*token))
    }

    fn completes_bad_word(&self, token: TokenId) -> bool {
        self.request.bad_words.iter().any(|word| match word.split_last() {
            Some((last, prefix)) => *last == token && self.generated.ends_with(prefix),
            None => false,
        })
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        if self.blocked {
            return Some(FinishReason::StopWords);
        }
        let last = self.generated.last().copied();
        if last.is_some() && last == self.request.end_id {
            return Some(FinishReason::EndId);
        }
        if self
            .request
            .stop_words
            .iter()
            .any(|word| self.generated.ends_with(word))
        {
            return Some(FinishReason::StopWords);
        }
        if self.generated.len() >= self.request.max_new_tokens {
            return Some(FinishReason::Length);
        }
        None
    }

    fn usage(&self) -> TokenUsage {
        TokenUsage::new(self.request.input_token_ids.len(), self.generated.len())
    }

    fn num_tokens(&self) -> usize {
        self.request.input_token_ids.len() + self.generated.len()
    }
}

/// Echo backend, see the module docs
#[derive(Debug)]
pub struct EchoBackend {
    config: EchoModelConfig,
    waiting: VecDeque<RequestId>,
    sequences: BTreeMap<RequestId, EchoSequence>,
    num_submitted: usize,
}

impl EchoBackend {
    pub fn new(config: EchoModelConfig) -> Self {
        info!(
            "Creating echo backend (max_active_requests={}, vocab_size={})",
            config.max_active_requests, config.vocab_size
        );
        Self {
            config,
            waiting: VecDeque::new(),
            sequences: BTreeMap::new(),
            num_submitted: 0,
        }
    }

    pub fn config(&self) -> &EchoModelConfig {
        &self.config
    }

    fn budget_exhausted(&self) -> bool {
        self.config
            .request_budget
            .is_some_and(|budget| self.num_submitted >= budget)
    }

    fn admit_waiting(&mut self) -> usize {
        let mut num_active = self.sequences.values().filter(|s| s.scheduled).count();
        let mut admitted = 0;
        while num_active < self.config.max_active_requests {
            let Some(request_id) = self.waiting.pop_front() else {
                break;
            };
            if let Some(sequence) = self.sequences.get_mut(&request_id) {
                sequence.scheduled = true;
                num_active += 1;
                admitted += 1;
            }
        }
        admitted
    }

    fn kv_cache_stats(&self) -> KvCacheStats {
        let block = self.config.tokens_per_block;
        let used: usize = self
            .sequences
            .values()
            .filter(|s| s.scheduled)
            .map(|s| s.num_tokens().div_ceil(block))
            .sum();
        let used = used.min(self.config.max_num_blocks);
        KvCacheStats {
            max_num_blocks: self.config.max_num_blocks,
            free_num_blocks: self.config.max_num_blocks - used,
            used_num_blocks: used,
            tokens_per_block: block,
        }
    }
}

impl ExecutionBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    fn submit(&mut self, request_id: RequestId, request: &ExecutorRequest) -> Result<()> {
        if self.budget_exhausted() {
            return Err(FerrumError::resource_exhausted("echo request budget used up"));
        }
        if request.input_token_ids.is_empty() {
            return Err(FerrumError::invalid_request("echo backend needs a non-empty prompt"));
        }
        if let Some(token) = request
            .input_token_ids
            .iter()
            .find(|t| t.get() >= self.config.vocab_size)
        {
            return Err(FerrumError::invalid_request(format!(
                "token {} outside vocabulary of {}",
                token, self.config.vocab_size
            )));
        }

        self.sequences
            .insert(request_id, EchoSequence::new(request.clone()));
        self.waiting.push_back(request_id);
        self.num_submitted += 1;
        Ok(())
    }

    fn poll(&mut self) -> Result<BackendStep> {
        if self.config.step_delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.config.step_delay_ms));
        }

        self.admit_waiting();

        let kv_cache_stats = self.kv_cache_stats();
        let mut responses = Vec::new();
        let mut request_stats = Vec::new();
        let mut finished = Vec::new();
        let mut batching = InflightBatchingStats::default();

        for (request_id, sequence) in self.sequences.iter_mut().filter(|(_, s)| s.scheduled) {
            let request_id = *request_id;
            batching.num_scheduled_requests += 1;
            if sequence.generated.is_empty() {
                batching.num_context_requests += 1;
            } else {
                batching.num_gen_requests += 1;
            }

            let poisoned = self.config.fail_on_token.is_some_and(|bad| {
                sequence.generated.is_empty() && sequence.request.input_token_ids.contains(&bad)
            });
            if poisoned {
                debug!("Request {} hit the configured failure token", request_id);
                responses.push(Response::error(
                    request_id,
                    FerrumError::backend("prompt contains the configured failure token"),
                ));
                finished.push(request_id);
                request_stats.push(stats_for(
                    request_id,
                    sequence,
                    RequestStage::GenerationComplete,
                ));
                continue;
            }

            match sequence.next_token() {
                Some(token) => sequence.generated.push(token),
                None => sequence.blocked = true,
            }

            match sequence.finish_reason() {
                Some(reason) => {
                    let output = if sequence.request.streaming {
                        sequence.generated[sequence.emitted..].to_vec()
                    } else {
                        sequence.generated.clone()
                    };
                    responses.push(Response::result(
                        request_id,
                        GenerationResult::complete(output, reason, sequence.usage()),
                    ));
                    finished.push(request_id);
                    request_stats.push(stats_for(
                        request_id,
                        sequence,
                        RequestStage::GenerationComplete,
                    ));
                }
                None => {
                    if sequence.request.streaming {
                        let output = sequence.generated[sequence.emitted..].to_vec();
                        sequence.emitted = sequence.generated.len();
                        responses.push(Response::result(
                            request_id,
                            GenerationResult::partial(output, sequence.usage()),
                        ));
                    }
                    request_stats.push(stats_for(
                        request_id,
                        sequence,
                        RequestStage::GenerationInProgress,
                    ));
                }
            }
        }

        for request_id in &self.waiting {
            if let Some(sequence) = self.sequences.get(request_id) {
                request_stats.push(stats_for(*request_id, sequence, RequestStage::Queued));
            }
        }

        for request_id in finished {
            self.sequences.remove(&request_id);
        }

        Ok(BackendStep {
            responses,
            num_queued_requests: self.waiting.len(),
            iteration_stats: BackendIterationStats {
                gpu_mem_usage: None,
                cpu_mem_usage: None,
                kv_cache_stats: Some(kv_cache_stats),
                inflight_batching_stats: Some(batching),
            },
            request_stats,
        })
    }

    fn cancel(&mut self, request_id: RequestId) -> bool {
        if self.sequences.remove(&request_id).is_none() {
            return false;
        }
        self.waiting.retain(|id| *id != request_id);
        true
    }

    fn num_active_requests(&self) -> usize {
        self.sequences.len()
    }

    fn can_accept_requests(&self) -> bool {
        !self.budget_exhausted()
    }

    fn release(&mut self) -> Result<()> {
        info!(
            "Releasing echo backend ({} requests dropped)",
            self.sequences.len()
        );
        self.sequences.clear();
        self.waiting.clear();
        Ok(())
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_request_stats: true,
            ..BackendCapabilities::default()
        }
    }
}

fn stats_for(request_id: RequestId, sequence: &EchoSequence, stage: RequestStage) -> RequestStats {
    RequestStats {
        id: request_id,
        stage,
        context_prefill_position: if sequence.generated.is_empty() {
            0
        } else {
            sequence.request.input_token_ids.len()
        },
        num_generated_tokens: sequence.generated.len(),
        scheduled: sequence.scheduled,
        paused: false,
    }
}

/// Builds [`EchoBackend`]s from a model path or an engine buffer
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoBackendFactory;

impl BackendFactory for EchoBackendFactory {
    fn name(&self) -> &str {
        "echo"
    }

    fn create(
        &self,
        source: &EngineSource,
        model_type: ModelType,
        _config: &ExecutorConfig,
    ) -> Result<Box<dyn ExecutionBackend>> {
        let model_config = match source {
            EngineSource::ModelPath(path) => EchoModelConfig::from_model_path(path)?,
            EngineSource::Buffer {
                engine,
                model_config,
            } => {
                if engine.is_empty() {
                    return Err(FerrumError::initialization("Engine buffer is empty"));
                }
                serde_json::from_value(model_config.clone()).map_err(|e| {
                    FerrumError::initialization(format!("Malformed model config: {}", e))
                })?
            }
        };
        model_config.validate()?;

        debug!("Echo backend for {} model: {:?}", model_type, model_config);
        Ok(Box::new(EchoBackend::new(model_config)))
    }

    fn supported_model_types(&self) -> &[ModelType] {
        &[ModelType::DecoderOnly, ModelType::EncoderDecoder]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrum_types::SamplingParams;

    fn output_tokens(responses: &[Response]) -> Vec<u32> {
        responses
            .iter()
            .filter_map(Response::generation)
            .flat_map(|g| g.output_token_ids.iter().map(|t| t.get()))
            .collect()
    }

    fn run_to_completion(backend: &mut EchoBackend) -> Vec<Response> {
        let mut all = Vec::new();
        for _ in 0..100 {
            if backend.num_active_requests() == 0 {
                break;
            }
            all.extend(backend.poll().unwrap().responses);
        }
        all
    }

    #[test]
    fn test_greedy_echoes_prompt_cyclically() {
        let mut backend = EchoBackend::new(EchoModelConfig::default());
        let request = ExecutorRequest::from_tokens(&[1, 2, 3], 5)
            .with_sampling_params(SamplingParams::greedy());
        backend.submit(RequestId(1), &request).unwrap();

        let responses = run_to_completion(&mut backend);
        assert_eq!(responses.len(), 1);
        assert_eq!(output_tokens(&responses), vec![1, 2, 3, 1, 2]);

        let result = responses[0].generation().unwrap();
        assert!(result.is_final);
        assert_eq!(result.finish_reason, Some(FinishReason::Length));
        assert_eq!(result.usage, TokenUsage::new(3, 5));
    }

    #[test]
    fn test_streaming_emits_partials_then_final() {
        let mut backend = EchoBackend::new(EchoModelConfig::default());
        let request = ExecutorRequest::from_tokens(&[4, 5], 3)
            .with_sampling_params(SamplingParams::greedy())
            .with_streaming(true);
        backend.submit(RequestId(1), &request).unwrap();

        let responses = run_to_completion(&mut backend);
        assert_eq!(responses.len(), 3);
        assert!(!responses[0].is_final());
        assert!(!responses[1].is_final());
        assert!(responses[2].is_final());
        assert_eq!(output_tokens(&responses), vec![4, 5, 4]);
    }

    #[test]
    fn test_end_id_stops_early() {
        let mut backend = EchoBackend::new(EchoModelConfig::default());
        let request = ExecutorRequest::from_tokens(&[7, 8, 9], 10)
            .with_sampling_params(SamplingParams::greedy())
            .with_end_id(TokenId(8));
        backend.submit(RequestId(1), &request).unwrap();

        let responses = run_to_completion(&mut backend);
        let result = responses[0].generation().unwrap();
        assert_eq!(result.finish_reason, Some(FinishReason::EndId));
        assert_eq!(output_tokens(&responses), vec![7, 8]);
    }

    #[test]
    fn test_sampling_is_seeded() {
        let request = ExecutorRequest::from_tokens(&[10, 20, 30, 40], 8).with_sampling_params(
            SamplingParams {
                seed: Some(7),
                ..SamplingParams::default()
            },
        );

        let mut first = EchoBackend::new(EchoModelConfig::default());
        first.submit(RequestId(1), &request).unwrap();
        let mut second = EchoBackend::new(EchoModelConfig::default());
        second.submit(RequestId(1), &request).unwrap();

        let a = output_tokens(&run_to_completion(&mut first));
        let b = output_tokens(&run_to_completion(&mut second));
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!(a.iter().all(|t| [10, 20, 30, 40].contains(t)));
    }

    #[test]
    fn test_capacity_queues_extra_requests() {
        let mut backend = EchoBackend::new(EchoModelConfig {
            max_active_requests: 1,
            ..EchoModelConfig::default()
        });
        let request = ExecutorRequest::from_tokens(&[1], 2);
        backend.submit(RequestId(1), &request).unwrap();
        backend.submit(RequestId(2), &request).unwrap();

        let step = backend.poll().unwrap();
        assert_eq!(step.num_queued_requests, 1);
        let queued = step
            .request_stats
            .iter()
            .find(|s| s.id == RequestId(2))
            .unwrap();
        assert_eq!(queued.stage, RequestStage::Queued);

        let batching = step.iteration_stats.inflight_batching_stats.unwrap();
        assert_eq!(batching.num_scheduled_requests, 1);
        assert_eq!(batching.num_context_requests, 1);
    }

    #[test]
    fn test_fail_on_token_reports_backend_error() {
        let mut backend = EchoBackend::new(EchoModelConfig {
            fail_on_token: Some(TokenId(13)),
            ..EchoModelConfig::default()
        });
        backend
            .submit(RequestId(1), &ExecutorRequest::from_tokens(&[1, 13], 4))
            .unwrap();

        let responses = run_to_completion(&mut backend);
        assert_eq!(responses.len(), 1);
        assert!(matches!(
            responses[0].error_ref(),
            Some(FerrumError::Backend { .. })
        ));
    }

    #[test]
    fn test_cancel_and_budget() {
        let mut backend = EchoBackend::new(EchoModelConfig {
            request_budget: Some(1),
            ..EchoModelConfig::default()
        });
        let request = ExecutorRequest::from_tokens(&[1], 4);
        backend.submit(RequestId(1), &request).unwrap();
        assert!(!backend.can_accept_requests());
        assert!(backend.submit(RequestId(2), &request).is_err());

        assert!(backend.cancel(RequestId(1)));
        assert!(!backend.cancel(RequestId(1)));
        assert_eq!(backend.num_active_requests(), 0);
    }

    #[test]
    fn test_rejects_out_of_vocab_tokens() {
        let mut backend = EchoBackend::new(EchoModelConfig {
            vocab_size: 100,
            ..EchoModelConfig::default()
        });
        let err = backend
            .submit(RequestId(1), &ExecutorRequest::from_tokens(&[100], 1))
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_rejects_empty_prompt() {
        let mut backend = EchoBackend::new(EchoModelConfig::default());
        let err = backend
            .submit(RequestId(1), &ExecutorRequest::from_tokens(&[], 1))
            .unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(backend.num_active_requests(), 0);
        assert!(backend.poll().unwrap().responses.is_empty());
    }

    #[test]
    fn test_bad_words_are_skipped() {
        let mut backend = EchoBackend::new(EchoModelConfig::default());
        let request = ExecutorRequest::from_tokens(&[1, 2, 3], 6)
            .with_sampling_params(SamplingParams::greedy())
            .with_bad_word(vec![TokenId(1), TokenId(2)])
            .with_bad_word(vec![TokenId(3)]);
        backend.submit(RequestId(1), &request).unwrap();

        let tokens = output_tokens(&run_to_completion(&mut backend));
        assert_eq!(tokens.len(), 6);
        assert!(!tokens.contains(&3));
        assert!(!tokens.windows(2).any(|w| w == [1, 2]));
    }

    #[test]
    fn test_fully_banned_prompt_stops() {
        let mut backend = EchoBackend::new(EchoModelConfig::default());
        let request = ExecutorRequest::from_tokens(&[7, 8], 4)
            .with_sampling_params(SamplingParams::with_temperature(0.8))
            .with_bad_word(vec![TokenId(7)])
            .with_bad_word(vec![TokenId(8)]);
        backend.submit(RequestId(1), &request).unwrap();

        let responses = run_to_completion(&mut backend);
        assert_eq!(responses.len(), 1);
        let result = responses[0].generation().unwrap();
        assert!(result.output_token_ids.is_empty());
        assert_eq!(result.finish_reason, Some(FinishReason::StopWords));
    }

    #[test]
    fn test_factory_from_buffer() {
        let factory = EchoBackendFactory;
        let source = EngineSource::Buffer {
            engine: vec![1, 2, 3],
            model_config: serde_json::json!({ "max_active_requests": 2 }),
        };
        let backend = factory
            .create(&source, ModelType::DecoderOnly, &ExecutorConfig::default())
            .unwrap();
        assert_eq!(backend.name(), "echo");

        let empty = EngineSource::Buffer {
            engine: Vec::new(),
            model_config: serde_json::json!({}),
        };
        assert!(factory
            .create(&empty, ModelType::DecoderOnly, &ExecutorConfig::default())
            .is_err());
    }
}
