//! Sampling and generation parameters

use serde::{Deserialize, Serialize};

use crate::{FerrumError, Result};

/// Sampling parameters for generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Number of beams (1 = no beam search)
    pub beam_width: usize,
    /// Temperature for randomness (0.0 = deterministic, higher = more random)
    pub temperature: f32,
    /// Nucleus sampling probability threshold
    pub top_p: f32,
    /// Top-k sampling - consider only top k tokens
    pub top_k: Option<usize>,
    /// Repetition penalty to reduce repetitive text
    pub repetition_penalty: f32,
    /// Presence penalty for token diversity
    pub presence_penalty: f32,
    /// Frequency penalty based on token frequency
    pub frequency_penalty: f32,
    /// Length penalty applied to beam scores
    pub length_penalty: f32,
    /// Random seed for reproducible generation
    pub seed: Option<u64>,
    /// Minimum probability threshold for tokens
    pub min_p: Option<f32>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            beam_width: 1,
            temperature: 1.0,
            top_p: 1.0,
            top_k: None,
            repetition_penalty: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            length_penalty: 1.0,
            seed: None,
            min_p: None,
        }
    }
}

impl SamplingParams {
    /// Create greedy sampling parameters (deterministic)
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            top_p: 1.0,
            top_k: None,
            ..Default::default()
        }
    }

    /// Create default sampling parameters with temperature
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature,
            ..Default::default()
        }
    }

    /// Whether sampling is deterministic
    pub fn is_greedy(&self) -> bool {
        self.temperature == 0.0 || self.top_k == Some(1)
    }

    /// Validate sampling parameters
    pub fn validate(&self) -> Result<()> {
        if self.beam_width == 0 {
            return Err(FerrumError::invalid_request("beam_width must be at least 1"));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(FerrumError::invalid_request(
                "Temperature must be non-negative",
            ));
        }
        if self.top_p <= 0.0 || self.top_p > 1.0 {
            return Err(FerrumError::invalid_request("top_p must be in range (0, 1]"));
        }
        if let Some(top_k) = self.top_k {
            if top_k == 0 {
                return Err(FerrumError::invalid_request("top_k must be positive"));
            }
        }
        if self.repetition_penalty <= 0.0 {
            return Err(FerrumError::invalid_request(
                "Repetition penalty must be positive",
            ));
        }
        if let Some(min_p) = self.min_p {
            if min_p <= 0.0 || min_p > 1.0 {
                return Err(FerrumError::invalid_request("min_p must be in range (0, 1]"));
            }
        }
        Ok(())
    }
}

/// Request priority levels
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

/// Reason for completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    /// Hit `max_new_tokens`
    Length,
    /// Generated the request's end id
    EndId,
    /// Hit one of the request's stop words
    StopWords,
    /// Request was cancelled
    Cancelled,
    /// Error occurred during generation
    Error,
}
