//! YAML schema for declarative fine-tuning configuration
//!
//! A training run is described by one YAML file deserialized into
//! [`TrainSpec`], optionally adjusted by CLI overrides, then validated once
//! before any model or dataset loading happens.

use crate::lora::LoraConfig;
use crate::{Error, Result};
use candle_core::DType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete fine-tuning specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainSpec {
    /// Base model reference
    pub model: ModelRef,

    /// Dataset configuration
    pub data: DataConfig,

    /// Quantization of the frozen base weights
    #[serde(default)]
    pub quant: QuantSpec,

    /// Adapter configuration
    #[serde(default)]
    pub lora: LoraConfig,

    /// Training hyperparameters
    #[serde(default)]
    pub training: TrainingParams,
}

/// Base model reference resolved through the model registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRef {
    /// Hub repo id (`org/name`) or local model directory
    pub id: String,

    /// Hub revision
    #[serde(default = "default_revision")]
    pub revision: String,

    /// Compute device preference
    #[serde(default)]
    pub device: DevicePref,
}

fn default_revision() -> String {
    "main".to_string()
}

/// Compute device preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePref {
    /// CUDA if available, CPU otherwise
    #[default]
    Auto,
    /// CPU only
    Cpu,
    /// CUDA, failing if unavailable
    Cuda,
}

/// Dataset configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory containing `train_dataset.json` and `test_dataset.json`
    pub dataset_dir: PathBuf,

    /// Maximum tokenized sequence length
    #[serde(default = "default_max_seq_length")]
    pub max_seq_length: usize,
}

fn default_max_seq_length() -> usize {
    512
}

/// Named floating-point type for compute and storage selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtypeName {
    /// 32-bit float
    F32,
    /// 16-bit float
    F16,
    /// bfloat16
    Bf16,
}

impl DtypeName {
    /// Corresponding candle dtype
    #[must_use]
    pub fn to_dtype(self) -> DType {
        match self {
            Self::F32 => DType::F32,
            Self::F16 => DType::F16,
            Self::Bf16 => DType::BF16,
        }
    }
}

/// Quantization encoding for frozen base weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantType {
    /// Non-uniform 4-bit float encoding
    Nf4,
    /// Uniform 4-bit integer encoding
    Int4,
    /// 8-bit integer encoding
    Int8,
}

/// Quantized-loading configuration for the base model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantSpec {
    /// Store projection weights in 4-bit blocks
    #[serde(default = "default_true")]
    pub load_in_4bit: bool,

    /// Quantize the block scales as well
    #[serde(default = "default_true")]
    pub double_quant: bool,

    /// Weight encoding
    #[serde(default = "default_quant_type")]
    pub quant_type: QuantType,

    /// Dtype used for matmuls and activations
    #[serde(default = "default_compute_dtype")]
    pub compute_dtype: DtypeName,

    /// Dtype for weights kept dense (embeddings, norms, LM head)
    #[serde(default = "default_compute_dtype")]
    pub storage_dtype: DtypeName,
}

fn default_true() -> bool {
    true
}

fn default_quant_type() -> QuantType {
    QuantType::Nf4
}

fn default_compute_dtype() -> DtypeName {
    DtypeName::Bf16
}

impl Default for QuantSpec {
    fn default() -> Self {
        Self {
            load_in_4bit: true,
            double_quant: true,
            quant_type: QuantType::Nf4,
            compute_dtype: DtypeName::Bf16,
            storage_dtype: DtypeName::Bf16,
        }
    }
}

/// Training hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    /// Directory for checkpoints and the final adapter
    pub output_dir: PathBuf,

    /// Number of passes over the training split
    pub epochs: usize,

    /// Sequences per optimizer step
    pub batch_size: usize,

    /// AdamW learning rate
    pub learning_rate: f64,

    /// Trade activation memory for recomputation; disables the KV cache
    pub gradient_checkpointing: bool,

    /// Resume from a previously written checkpoint directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_from_checkpoint: Option<PathBuf>,

    /// Global random seed
    pub seed: u64,

    /// Log loss every N optimizer steps
    pub logging_steps: usize,

    /// Write a checkpoint every N optimizer steps
    pub save_steps: usize,

    /// Number of random training samples printed after templating
    pub sample_log_count: usize,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./output"),
            epochs: 3,
            batch_size: 4,
            learning_rate: 2e-4,
            gradient_checkpointing: false,
            resume_from_checkpoint: None,
            seed: 42,
            logging_steps: 10,
            save_steps: 500,
            sample_log_count: 2,
        }
    }
}

impl TrainSpec {
    /// Validate field combinations that cannot be expressed in the schema.
    ///
    /// # Errors
    /// Returns [`Error::Config`] on the first invalid combination found.
    pub fn validate(&self) -> Result<()> {
        if self.model.id.is_empty() {
            return Err(Error::Config("model.id must not be empty".to_string()));
        }
        if self.data.max_seq_length < 2 {
            return Err(Error::Config(
                "data.max_seq_length must be at least 2 (one input, one target token)"
                    .to_string(),
            ));
        }
        if self.training.batch_size == 0 {
            return Err(Error::Config("training.batch_size must be positive".to_string()));
        }
        if self.training.epochs == 0 {
            return Err(Error::Config("training.epochs must be positive".to_string()));
        }
        if self.quant.double_quant && self.quant.quant_type != QuantType::Nf4 {
            return Err(Error::Config(
                "quant.double_quant requires quant.quant_type = nf4".to_string(),
            ));
        }
        if !self.quant.load_in_4bit
            && matches!(self.quant.quant_type, QuantType::Nf4 | QuantType::Int4)
        {
            return Err(Error::Config(
                "quant.quant_type is 4-bit but quant.load_in_4bit is false".to_string(),
            ));
        }
        self.lora.validate()?;
        Ok(())
    }

    /// Whether the KV cache is usable during training.
    ///
    /// Caching and gradient checkpointing are mutually exclusive: enabling
    /// checkpointing turns the cache off, and this derived flag is the only
    /// place the decision is made.
    #[must_use]
    pub fn use_kv_cache(&self) -> bool {
        !self.training.gradient_checkpointing
    }
}

/// Load and validate a [`TrainSpec`] from a YAML file.
///
/// # Errors
/// Returns an IO error for a missing file, a YAML error for bad syntax, and
/// a configuration error for invalid field combinations.
pub fn load_config(path: &Path) -> Result<TrainSpec> {
    let content = std::fs::read_to_string(path)?;
    let spec: TrainSpec = serde_yaml::from_str(&content)?;
    spec.validate()?;
    Ok(spec)
}
