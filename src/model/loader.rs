//! Base model resolution and weight loading
//!
//! Model identifiers resolve to a local directory when one exists, otherwise
//! through the hf-hub registry. Weights load from safetensors (single file or
//! sharded index) into [`BaseWeights`]: frozen storage that keeps projection
//! weights block-quantized per the [`QuantPlan`] and everything else dense.

use super::quant::QuantPlan;
use crate::{Error, Result};
use candle_core::quantized::QTensor;
use candle_core::{DType, Device, Tensor};
use candle_transformers::models::llama::{LlamaConfig, LlamaEosToks};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

/// Resolved file locations for a base model
#[derive(Debug, Clone)]
pub struct ModelFiles {
    /// Architecture configuration (`config.json`)
    pub config: PathBuf,
    /// Tokenizer definition, if present alongside the model
    pub tokenizer: Option<PathBuf>,
    /// Safetensors weight files (one, or all shards)
    pub weights: Vec<PathBuf>,
}

/// Resolve a model identifier to its files.
///
/// A path that exists on disk is used directly; anything else is treated as
/// a hub repo id and fetched at the given revision.
///
/// # Errors
/// Returns [`Error::Model`] for an incomplete local directory and
/// [`Error::Hub`] when registry resolution fails.
pub fn resolve_model_files(id: &str, revision: &str) -> Result<ModelFiles> {
    let local = Path::new(id);
    if local.exists() {
        return resolve_local(local);
    }

    let api = Api::new().map_err(|e| hub_error(id, "api", e))?;
    let repo = api.repo(Repo::with_revision(
        id.to_string(),
        RepoType::Model,
        revision.to_string(),
    ));

    let config = repo
        .get("config.json")
        .map_err(|e| hub_error(id, "config.json", e))?;
    let tokenizer = repo.get("tokenizer.json").ok();

    let weights = match repo.get("model.safetensors") {
        Ok(single) => vec![single],
        Err(_) => {
            let index = repo
                .get("model.safetensors.index.json")
                .map_err(|e| hub_error(id, "model.safetensors", e))?;
            shard_names(&index)?
                .into_iter()
                .map(|name| repo.get(&name).map_err(|e| hub_error(id, &name, e)))
                .collect::<Result<Vec<_>>>()?
        }
    };

    Ok(ModelFiles {
        config,
        tokenizer,
        weights,
    })
}

fn resolve_local(dir: &Path) -> Result<ModelFiles> {
    let config = dir.join("config.json");
    if !config.exists() {
        return Err(Error::Model(format!(
            "no config.json in model directory {}",
            dir.display()
        )));
    }

    let tokenizer_path = dir.join("tokenizer.json");
    let tokenizer = tokenizer_path.exists().then_some(tokenizer_path);

    let single = dir.join("model.safetensors");
    let index = dir.join("model.safetensors.index.json");
    let weights = if single.exists() {
        vec![single]
    } else if index.exists() {
        shard_names(&index)?
            .into_iter()
            .map(|name| dir.join(name))
            .collect()
    } else {
        return Err(Error::Model(format!(
            "no model.safetensors or shard index in {}",
            dir.display()
        )));
    };

    Ok(ModelFiles {
        config,
        tokenizer,
        weights,
    })
}

/// Unique shard file names listed by a `model.safetensors.index.json`.
fn shard_names(index_path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(index_path)?;
    let index: serde_json::Value = serde_json::from_str(&content)?;
    let weight_map = index
        .get("weight_map")
        .and_then(|m| m.as_object())
        .ok_or_else(|| Error::Model("shard index has no weight_map".to_string()))?;
    let names: BTreeSet<String> = weight_map
        .values()
        .filter_map(|v| v.as_str().map(ToString::to_string))
        .collect();
    Ok(names.into_iter().collect())
}

fn hub_error(repo: &str, file: &str, e: impl std::fmt::Display) -> Error {
    Error::Hub {
        repo: repo.to_string(),
        file: file.to_string(),
        message: e.to_string(),
    }
}

/// Parse the architecture configuration from `config.json`.
///
/// # Errors
/// Returns [`Error::Model`] when the file cannot be read or parsed.
pub fn load_llama_config(path: &Path) -> Result<LlamaConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Model(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Model(format!("failed to parse {}: {e}", path.display())))
}

/// Load a tokenizer from a `tokenizer.json` file.
///
/// # Errors
/// Returns [`Error::Tokenizer`] when the file cannot be loaded.
pub fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    Tokenizer::from_file(path).map_err(Error::tokenizer)
}

/// EOS token id and text, for padding and template rendering.
///
/// The id comes from the architecture config when declared, otherwise from
/// the tokenizer's conventional `</s>` entry. The text is the decoded token.
#[must_use]
pub fn eos_token(eos: Option<&LlamaEosToks>, tokenizer: &Tokenizer) -> (u32, String) {
    let id = match eos {
        Some(LlamaEosToks::Single(id)) => Some(*id),
        Some(LlamaEosToks::Multiple(ids)) => ids.first().copied(),
        None => None,
    };
    let id = id.or_else(|| tokenizer.token_to_id("</s>")).unwrap_or(0);
    let text = tokenizer
        .decode(&[id], false)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "</s>".to_string());
    (id, text)
}

/// Architecture dimensions needed for adapter sizing
#[derive(Debug, Clone, Copy)]
pub struct ModelInfo {
    /// Hidden size / embedding dimension
    pub hidden_size: usize,
    /// Number of transformer layers
    pub num_layers: usize,
    /// Number of attention heads
    pub num_attention_heads: usize,
    /// Number of key-value heads (grouped-query attention)
    pub num_kv_heads: usize,
    /// MLP hidden dimension
    pub intermediate_size: usize,
}

impl ModelInfo {
    /// Extract dimensions from a parsed `config.json`.
    #[must_use]
    pub fn from_llama_config(config: &LlamaConfig) -> Self {
        Self {
            hidden_size: config.hidden_size,
            num_layers: config.num_hidden_layers,
            num_attention_heads: config.num_attention_heads,
            num_kv_heads: config
                .num_key_value_heads
                .unwrap_or(config.num_attention_heads),
            intermediate_size: config.intermediate_size,
        }
    }

    /// (input, output) dimensions of a target projection.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for a module name this architecture does
    /// not have.
    pub fn target_dims(&self, module: &str) -> Result<(usize, usize)> {
        let kv_dim = self.hidden_size * self.num_kv_heads / self.num_attention_heads;
        match module {
            "q_proj" | "o_proj" => Ok((self.hidden_size, self.hidden_size)),
            "k_proj" | "v_proj" => Ok((self.hidden_size, kv_dim)),
            "gate_proj" | "up_proj" => Ok((self.hidden_size, self.intermediate_size)),
            "down_proj" => Ok((self.intermediate_size, self.hidden_size)),
            other => Err(Error::Config(format!(
                "unknown target module '{other}'"
            ))),
        }
    }

    /// Full weight-tensor key of a target module in a given layer.
    #[must_use]
    pub fn weight_key(layer: usize, module: &str) -> String {
        let group = match module {
            "q_proj" | "k_proj" | "v_proj" | "o_proj" => "self_attn",
            _ => "mlp",
        };
        format!("model.layers.{layer}.{group}.{module}.weight")
    }
}

/// Frozen base weight storage
///
/// Projection weights are held block-quantized when the plan asks for it;
/// everything else is dense in the storage dtype. Nothing here is ever
/// registered with an optimizer.
#[derive(Debug)]
pub struct BaseWeights {
    tensors: HashMap<String, BaseTensor>,
}

#[derive(Debug)]
enum BaseTensor {
    Dense(Tensor),
    Quantized(QTensor),
}

impl BaseWeights {
    /// Load weights from safetensors files, quantizing per the plan.
    ///
    /// # Errors
    /// Fails when a projection weight cannot be stored in the planned block
    /// format (row length not divisible by the block size); there is no
    /// silent dense fallback.
    pub fn load(files: &[PathBuf], plan: &QuantPlan, device: &Device) -> Result<Self> {
        let mut raw = HashMap::new();
        for file in files {
            let tensors = candle_core::safetensors::load(file, device)?;
            raw.extend(tensors);
        }
        Self::from_tensors(raw, plan)
    }

    /// Build storage from already-loaded tensors, quantizing per the plan.
    ///
    /// # Errors
    /// Same contract as [`BaseWeights::load`].
    pub fn from_tensors(raw: HashMap<String, Tensor>, plan: &QuantPlan) -> Result<Self> {
        let mut tensors = HashMap::with_capacity(raw.len());
        for (name, tensor) in raw {
            let row_len = tensor.dims().last().copied().unwrap_or(0);
            let stored = if let Some(format) = plan.weight_format {
                if super::quant::is_quantizable(&name) {
                    if row_len % format.block_size() != 0 {
                        return Err(Error::Config(format!(
                            "cannot quantize {name}: row length {row_len} is not a multiple of \
                             the {format:?} block size {}",
                            format.block_size()
                        )));
                    }
                    let quantized = QTensor::quantize(&tensor.to_dtype(DType::F32)?, format)?;
                    BaseTensor::Quantized(quantized)
                } else {
                    BaseTensor::Dense(tensor.to_dtype(plan.storage_dtype)?)
                }
            } else {
                BaseTensor::Dense(tensor.to_dtype(plan.storage_dtype)?)
            };
            tensors.insert(name, stored);
        }
        Ok(Self { tensors })
    }

    /// Materialize every weight as a dense tensor in the compute dtype.
    ///
    /// Quantized weights dequantize on the fly; the stored copy stays
    /// quantized.
    ///
    /// # Errors
    /// Propagates tensor conversion failures.
    pub fn dense_tensors(
        &self,
        compute_dtype: DType,
        device: &Device,
    ) -> Result<HashMap<String, Tensor>> {
        let mut out = HashMap::with_capacity(self.tensors.len());
        for (name, stored) in &self.tensors {
            let dense = match stored {
                BaseTensor::Dense(t) => t.to_dtype(compute_dtype)?,
                BaseTensor::Quantized(q) => q.dequantize(device)?.to_dtype(compute_dtype)?,
            };
            out.insert(name.clone(), dense);
        }
        Ok(out)
    }

    /// Number of tensors held quantized
    #[must_use]
    pub fn quantized_count(&self) -> usize {
        self.tensors
            .values()
            .filter(|t| matches!(t, BaseTensor::Quantized(_)))
            .count()
    }

    /// Total parameter count across all stored tensors
    #[must_use]
    pub fn total_parameters(&self) -> usize {
        self.tensors
            .values()
            .map(|t| match t {
                BaseTensor::Dense(t) => t.elem_count(),
                BaseTensor::Quantized(q) => q.shape().elem_count(),
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DtypeName, QuantSpec, QuantType};

    fn tiny_info() -> ModelInfo {
        ModelInfo {
            hidden_size: 8,
            num_layers: 2,
            num_attention_heads: 2,
            num_kv_heads: 1,
            intermediate_size: 16,
        }
    }

    #[test]
    fn target_dims_follow_architecture() {
        let info = tiny_info();
        assert_eq!(info.target_dims("q_proj").unwrap(), (8, 8));
        assert_eq!(info.target_dims("k_proj").unwrap(), (8, 4));
        assert_eq!(info.target_dims("up_proj").unwrap(), (8, 16));
        assert_eq!(info.target_dims("down_proj").unwrap(), (16, 8));
        assert!(info.target_dims("lm_head").is_err());
    }

    #[test]
    fn weight_keys_follow_layer_layout() {
        assert_eq!(
            ModelInfo::weight_key(0, "q_proj"),
            "model.layers.0.self_attn.q_proj.weight"
        );
        assert_eq!(
            ModelInfo::weight_key(3, "gate_proj"),
            "model.layers.3.mlp.gate_proj.weight"
        );
    }

    #[test]
    fn quantized_storage_round_trips_within_tolerance() {
        let device = Device::Cpu;
        let plan = QuantPlan::resolve(&QuantSpec {
            load_in_4bit: true,
            double_quant: true,
            quant_type: QuantType::Nf4,
            compute_dtype: DtypeName::F32,
            storage_dtype: DtypeName::F32,
        })
        .expect("plan");

        let values: Vec<f32> = (0..4 * 256).map(|i| ((i % 17) as f32 - 8.0) / 8.0).collect();
        let weight = Tensor::from_vec(values.clone(), (4, 256), &device).expect("tensor");
        let mut raw = HashMap::new();
        raw.insert(
            "model.layers.0.self_attn.q_proj.weight".to_string(),
            weight,
        );

        let base = BaseWeights::from_tensors(raw, &plan).expect("quantize");
        assert_eq!(base.quantized_count(), 1);
        assert_eq!(base.total_parameters(), 4 * 256);

        let dense = base
            .dense_tensors(DType::F32, &device)
            .expect("dequantize");
        let restored = dense["model.layers.0.self_attn.q_proj.weight"]
            .flatten_all()
            .expect("flatten")
            .to_vec1::<f32>()
            .expect("vec");
        let mean_err: f32 = values
            .iter()
            .zip(restored.iter())
            .map(|(a, b)| (a - b).abs())
            .sum::<f32>()
            / values.len() as f32;
        assert!(mean_err < 0.1, "mean quantization error {mean_err}");
    }

    #[test]
    fn unaligned_projection_is_a_fatal_error() {
        let device = Device::Cpu;
        let plan = QuantPlan::resolve(&QuantSpec::default()).expect("plan");
        let weight = Tensor::zeros((4, 100), DType::F32, &device).expect("tensor");
        let mut raw = HashMap::new();
        raw.insert("model.layers.0.self_attn.q_proj.weight".to_string(), weight);
        let err = BaseWeights::from_tensors(raw, &plan).expect_err("unaligned row");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn non_projections_stay_dense() {
        let device = Device::Cpu;
        let plan = QuantPlan::resolve(&QuantSpec::default()).expect("plan");
        let mut raw = HashMap::new();
        raw.insert(
            "model.embed_tokens.weight".to_string(),
            Tensor::zeros((16, 8), DType::F32, &device).expect("tensor"),
        );
        let base = BaseWeights::from_tensors(raw, &plan).expect("dense path");
        assert_eq!(base.quantized_count(), 0);
    }

    #[test]
    fn shard_index_lists_unique_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index_path = dir.path().join("model.safetensors.index.json");
        std::fs::write(
            &index_path,
            r#"{"weight_map": {"a.weight": "model-00001.safetensors",
                               "b.weight": "model-00002.safetensors",
                               "c.weight": "model-00001.safetensors"}}"#,
        )
        .expect("write");
        let names = shard_names(&index_path).expect("parse");
        assert_eq!(
            names,
            vec![
                "model-00001.safetensors".to_string(),
                "model-00002.safetensors".to_string()
            ]
        );
    }
}
