//! Model-related types

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::FerrumError;

/// Model architecture family, used to pick how the backend runs a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// GPT-style decoder
    DecoderOnly,
    /// BERT-style encoder
    EncoderOnly,
    /// T5-style encoder-decoder
    EncoderDecoder,
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelType::DecoderOnly => write!(f, "decoder_only"),
            ModelType::EncoderOnly => write!(f, "encoder_only"),
            ModelType::EncoderDecoder => write!(f, "encoder_decoder"),
        }
    }
}

impl FromStr for ModelType {
    type Err = FerrumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "decoder_only" | "decoder" => Ok(ModelType::DecoderOnly),
            "encoder_only" | "encoder" => Ok(ModelType::EncoderOnly),
            "encoder_decoder" => Ok(ModelType::EncoderDecoder),
            other => Err(FerrumError::config(format!("Unknown model type: {}", other))),
        }
    }
}
