//! Quantization planning
//!
//! Maps the declarative [`QuantSpec`](crate::config::QuantSpec) onto candle's
//! block-quantized storage formats. NF4-style non-uniform 4-bit encoding maps
//! to the k-quant family, whose super-blocks carry quantized scales (the
//! double-quantization analog); uniform 4-bit and 8-bit map to the classic
//! block formats. Planning happens before any weight loads so an unsupported
//! combination fails up front.

use crate::config::{QuantSpec, QuantType};
use crate::{Error, Result};
use candle_core::quantized::GgmlDType;
use candle_core::DType;

/// Resolved quantization plan for base weight loading
#[derive(Debug, Clone, Copy)]
pub struct QuantPlan {
    /// Block format for projection weights; dense storage when `None`
    pub weight_format: Option<GgmlDType>,
    /// Dtype for matmuls and activations
    pub compute_dtype: DType,
    /// Dtype for weights kept dense (embeddings, norms, LM head)
    pub storage_dtype: DType,
}

impl QuantPlan {
    /// Resolve a plan from the declarative spec.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for combinations the storage formats cannot
    /// express. There is no silent fallback to full precision.
    pub fn resolve(spec: &QuantSpec) -> Result<Self> {
        let weight_format = if spec.load_in_4bit {
            match spec.quant_type {
                QuantType::Nf4 => Some(GgmlDType::Q4K),
                QuantType::Int4 => Some(GgmlDType::Q4_0),
                QuantType::Int8 => {
                    return Err(Error::Config(
                        "quant.load_in_4bit with quant_type = int8 is contradictory".to_string(),
                    ))
                }
            }
        } else {
            match spec.quant_type {
                QuantType::Int8 => Some(GgmlDType::Q8_0),
                QuantType::Nf4 | QuantType::Int4 => None,
            }
        };

        Ok(Self {
            weight_format,
            compute_dtype: spec.compute_dtype.to_dtype(),
            storage_dtype: spec.storage_dtype.to_dtype(),
        })
    }

    /// Plan with no weight quantization, for inference over a dense
    /// fine-tuned checkpoint.
    #[must_use]
    pub fn dense(dtype: DType) -> Self {
        Self {
            weight_format: None,
            compute_dtype: dtype,
            storage_dtype: dtype,
        }
    }

    /// Whether `tensor_name` with the given row length can be stored in the
    /// planned block format.
    #[must_use]
    pub fn accepts(&self, tensor_name: &str, row_len: usize) -> bool {
        match self.weight_format {
            Some(format) => is_quantizable(tensor_name) && row_len % format.block_size() == 0,
            None => false,
        }
    }
}

/// Whether a tensor is eligible for block quantization.
///
/// Only the 2-D projection weights inside the transformer stack qualify;
/// embeddings, norms, and the LM head stay dense.
#[must_use]
pub fn is_quantizable(name: &str) -> bool {
    name.starts_with("model.layers.")
        && name.ends_with(".weight")
        && crate::lora::ALL_LINEAR_MODULES
            .iter()
            .any(|module| name.contains(module))
}
