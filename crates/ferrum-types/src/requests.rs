//! Request and response types for the executor

use crate::{
    ExecutorConfig, FerrumError, FinishReason, Priority, RequestId, Result, SamplingParams,
    TokenId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One unit of inference work submitted to the executor
///
/// The executor assigns the [`RequestId`] on submission; the request itself
/// carries no id and is never mutated after it is handed over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorRequest {
    /// Prompt token ids
    pub input_token_ids: Vec<TokenId>,
    /// Maximum number of tokens to generate
    pub max_new_tokens: usize,
    /// Whether the backend should publish partial responses
    pub streaming: bool,
    /// Sampling parameters
    pub sampling_params: SamplingParams,
    /// Generation stops after this token
    pub end_id: Option<TokenId>,
    /// Padding token
    pub pad_id: Option<TokenId>,
    /// Token sequences that end generation
    pub stop_words: Vec<Vec<TokenId>>,
    /// Token sequences the backend must not produce
    pub bad_words: Vec<Vec<TokenId>>,
    /// Request priority
    pub priority: Priority,
    /// Client identifier
    pub client_id: Option<String>,
    /// Request creation timestamp
    pub created_at: DateTime<Utc>,
    /// Additional metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ExecutorRequest {
    /// Create a new request
    pub fn new(input_token_ids: impl Into<Vec<TokenId>>, max_new_tokens: usize) -> Self {
        Self {
            input_token_ids: input_token_ids.into(),
            max_new_tokens,
            streaming: false,
            sampling_params: SamplingParams::default(),
            end_id: None,
            pad_id: None,
            stop_words: Vec::new(),
            bad_words: Vec::new(),
            priority: Priority::default(),
            client_id: None,
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Create a request from raw token values
    pub fn from_tokens(tokens: &[u32], max_new_tokens: usize) -> Self {
        Self::new(
            tokens.iter().copied().map(TokenId::new).collect::<Vec<_>>(),
            max_new_tokens,
        )
    }

    /// Set sampling parameters
    pub fn with_sampling_params(mut self, params: SamplingParams) -> Self {
        self.sampling_params = params;
        self
    }

    /// Enable streaming
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Set end token
    pub fn with_end_id(mut self, end_id: TokenId) -> Self {
        self.end_id = Some(end_id);
        self
    }

    /// Set pad token
    pub fn with_pad_id(mut self, pad_id: TokenId) -> Self {
        self.pad_id = Some(pad_id);
        self
    }

    /// Add a stop word sequence
    pub fn with_stop_word(mut self, stop_word: Vec<TokenId>) -> Self {
        self.stop_words.push(stop_word);
        self
    }

    /// Forbid the backend from producing this token sequence
    pub fn with_bad_word(mut self, bad_word: Vec<TokenId>) -> Self {
        self.bad_words.push(bad_word);
        self
    }

    /// Set priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set client ID
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Validate the request's own constraints
    pub fn validate(&self) -> Result<()> {
        if self.input_token_ids.is_empty() {
            return Err(FerrumError::invalid_request("input_token_ids must not be empty"));
        }
        if self.max_new_tokens == 0 {
            return Err(FerrumError::invalid_request("max_new_tokens must be positive"));
        }
        if self.stop_words.iter().any(|w| w.is_empty()) {
            return Err(FerrumError::invalid_request("stop words must not be empty"));
        }
        if self.bad_words.iter().any(|w| w.is_empty()) {
            return Err(FerrumError::invalid_request("bad words must not be empty"));
        }
        self.sampling_params.validate()
    }

    /// Validate the request against executor limits
    pub fn validate_for(&self, config: &ExecutorConfig) -> Result<()> {
        self.validate()?;

        if let Some(max_input_len) = config.max_input_len {
            if self.input_token_ids.len() > max_input_len {
                return Err(FerrumError::invalid_request(format!(
                    "input length {} exceeds max_input_len {}",
                    self.input_token_ids.len(),
                    max_input_len
                )));
            }
        }
        if self.sampling_params.beam_width > config.max_beam_width {
            return Err(FerrumError::invalid_request(format!(
                "beam_width {} exceeds max_beam_width {}",
                self.sampling_params.beam_width, config.max_beam_width
            )));
        }
        Ok(())
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Output of a (possibly partial) generation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// No further responses follow for this request
    pub is_final: bool,
    /// Tokens produced since the previous response for streaming requests,
    /// all generated tokens otherwise
    pub output_token_ids: Vec<TokenId>,
    /// Reason for completion, set on final results
    pub finish_reason: Option<FinishReason>,
    /// Per-token log probabilities, if the backend reports them
    pub log_probs: Option<Vec<f32>>,
    /// Token usage statistics
    pub usage: TokenUsage,
}

impl GenerationResult {
    /// Partial streaming output
    pub fn partial(output_token_ids: Vec<TokenId>, usage: TokenUsage) -> Self {
        Self {
            is_final: false,
            output_token_ids,
            finish_reason: None,
            log_probs: None,
            usage,
        }
    }

    /// Final output
    pub fn complete(
        output_token_ids: Vec<TokenId>,
        finish_reason: FinishReason,
        usage: TokenUsage,
    ) -> Self {
        Self {
            is_final: true,
            output_token_ids,
            finish_reason: Some(finish_reason),
            log_probs: None,
            usage,
        }
    }
}

/// Result-or-error carried by a response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponsePayload {
    /// Successful (possibly partial) output
    Result(GenerationResult),
    /// Terminal error for the request (backend failure, cancellation)
    Error(FerrumError),
}

/// Response associated with one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Request ID this response corresponds to
    pub request_id: RequestId,
    /// Result or error
    pub payload: ResponsePayload,
    /// Response creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Response {
    /// Create a result response
    pub fn result(request_id: RequestId, result: GenerationResult) -> Self {
        Self {
            request_id,
            payload: ResponsePayload::Result(result),
            created_at: Utc::now(),
        }
    }

    /// Create an error response
    pub fn error(request_id: RequestId, error: FerrumError) -> Self {
        Self {
            request_id,
            payload: ResponsePayload::Error(error),
            created_at: Utc::now(),
        }
    }

    /// Whether this response ends the request
    pub fn is_final(&self) -> bool {
        match &self.payload {
            ResponsePayload::Result(result) => result.is_final,
            ResponsePayload::Error(_) => true,
        }
    }

    /// Whether this response carries an error
    pub fn has_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::Error(_))
    }

    /// Generation result, if any
    pub fn generation(&self) -> Option<&GenerationResult> {
        match &self.payload {
            ResponsePayload::Result(result) => Some(result),
            ResponsePayload::Error(_) => None,
        }
    }

    /// Error, if any
    pub fn error_ref(&self) -> Option<&FerrumError> {
        match &self.payload {
            ResponsePayload::Error(error) => Some(error),
            ResponsePayload::Result(_) => None,
        }
    }
}
