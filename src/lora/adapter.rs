//! Adapter attachment, application, and persistence
//!
//! A [`LoraAdapter`] owns the trainable A/B matrices for every targeted
//! projection. The matrices live in a `VarMap`, which is the only parameter
//! collection ever handed to the optimizer; base weights stay frozen by
//! construction. B is zero-initialized, so a freshly attached adapter leaves
//! the base model's function unchanged.

use super::config::LoraConfig;
use crate::model::ModelInfo;
use crate::{Error, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Init, VarMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Adapter weights file name inside an output directory
pub const ADAPTER_WEIGHTS_FILE: &str = "adapter_model.safetensors";
/// Adapter configuration file name inside an output directory
pub const ADAPTER_CONFIG_FILE: &str = "adapter_config.json";

/// Metadata persisted next to the adapter weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterMetadata {
    /// Base model the adapter was trained against
    pub base_model_id: String,
    /// Adapter hyperparameters
    pub lora: LoraConfig,
}

#[derive(Debug)]
struct LoraModule {
    /// Key of the base weight tensor this module adapts
    weight_key: String,
    /// A matrix `[rank, in]`
    a: Tensor,
    /// B matrix `[out, rank]`, zero-initialized
    b: Tensor,
}

/// Trainable low-rank adapter set for one model
pub struct LoraAdapter {
    varmap: VarMap,
    modules: Vec<LoraModule>,
    config: LoraConfig,
}

impl std::fmt::Debug for LoraAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoraAdapter")
            .field("modules", &self.modules)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LoraAdapter {
    /// Attach adapters for every targeted module across all layers.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for a target module the architecture does
    /// not have.
    pub fn attach(config: &LoraConfig, info: &ModelInfo, device: &Device) -> Result<Self> {
        config.validate()?;
        let varmap = VarMap::new();
        let mut modules = Vec::new();

        for layer in 0..info.num_layers {
            for module in config.target_modules.resolve() {
                let (in_features, out_features) = info.target_dims(module)?;
                let weight_key = ModelInfo::weight_key(layer, module);
                let prefix = weight_key
                    .strip_suffix(".weight")
                    .unwrap_or(&weight_key)
                    .to_string();

                let a = varmap.get(
                    (config.rank, in_features),
                    &format!("{prefix}.lora_a"),
                    Init::Randn {
                        mean: 0.0,
                        stdev: 0.02,
                    },
                    DType::F32,
                    device,
                )?;
                let b = varmap.get(
                    (out_features, config.rank),
                    &format!("{prefix}.lora_b"),
                    Init::Const(0.0),
                    DType::F32,
                    device,
                )?;

                modules.push(LoraModule { weight_key, a, b });
            }
        }

        Ok(Self {
            varmap,
            modules,
            config: config.clone(),
        })
    }

    /// Adapter hyperparameters
    #[must_use]
    pub fn config(&self) -> &LoraConfig {
        &self.config
    }

    /// Trainable variables, for the optimizer
    #[must_use]
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// Number of trainable adapter parameters
    #[must_use]
    pub fn num_trainable_parameters(&self) -> usize {
        self.varmap.all_vars().iter().map(|v| v.elem_count()).sum()
    }

    /// Trainable share of the combined parameter count, in percent
    #[must_use]
    pub fn trainable_percent(&self, base_parameters: usize) -> f64 {
        let trainable = self.num_trainable_parameters();
        100.0 * trainable as f64 / (base_parameters + trainable) as f64
    }

    /// Number of adapted modules
    #[must_use]
    pub fn num_modules(&self) -> usize {
        self.modules.len()
    }

    /// Scaled low-rank delta for one module: `(alpha / rank) * B @ A`.
    ///
    /// During training the adapter path applies dropout to A's columns,
    /// matching dropout on the module input.
    fn delta(&self, module: &LoraModule, training: bool) -> Result<Tensor> {
        let a = if training && self.config.dropout > 0.0 {
            candle_nn::ops::dropout(&module.a, self.config.dropout)?
        } else {
            module.a.clone()
        };
        let delta = module.b.matmul(&a)?;
        Ok(delta.affine(self.config.scaling(), 0.0)?)
    }

    /// Add every adapter delta onto its base weight in `tensors`.
    ///
    /// The deltas keep their autograd graph, so gradients flow back to the
    /// A/B variables through the assembled model.
    ///
    /// # Errors
    /// Returns [`Error::Model`] when a targeted weight is missing from the
    /// base tensor map.
    pub fn apply_to(
        &self,
        tensors: &mut HashMap<String, Tensor>,
        training: bool,
    ) -> Result<()> {
        for module in &self.modules {
            let base = tensors.get(&module.weight_key).ok_or_else(|| {
                Error::Model(format!(
                    "adapter target {} not present in base weights",
                    module.weight_key
                ))
            })?;
            let delta = self.delta(module, training)?.to_dtype(base.dtype())?;
            let adapted = base.add(&delta)?;
            tensors.insert(module.weight_key.clone(), adapted);
        }
        Ok(())
    }

    /// Persist adapter weights and metadata into `dir`.
    ///
    /// # Errors
    /// Propagates filesystem and serialization failures.
    pub fn save(&self, dir: &Path, base_model_id: &str) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        self.varmap.save(dir.join(ADAPTER_WEIGHTS_FILE))?;
        let metadata = AdapterMetadata {
            base_model_id: base_model_id.to_string(),
            lora: self.config.clone(),
        };
        let json = serde_json::to_string_pretty(&metadata)?;
        std::fs::write(dir.join(ADAPTER_CONFIG_FILE), json)?;
        Ok(())
    }

    /// Load previously saved adapter weights into this adapter's variables.
    ///
    /// Shapes and names must match the attached configuration.
    ///
    /// # Errors
    /// Returns [`Error::Model`] when the weights file is missing.
    pub fn load_weights(&mut self, dir: &Path) -> Result<()> {
        let path = dir.join(ADAPTER_WEIGHTS_FILE);
        if !path.exists() {
            return Err(Error::Model(format!(
                "no {ADAPTER_WEIGHTS_FILE} in {}",
                dir.display()
            )));
        }
        self.varmap.load(path)?;
        Ok(())
    }
}

/// Read adapter metadata from a saved adapter directory.
///
/// # Errors
/// Propagates filesystem and deserialization failures.
pub fn load_metadata(dir: &Path) -> Result<AdapterMetadata> {
    let content = std::fs::read_to_string(dir.join(ADAPTER_CONFIG_FILE))?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lora::TargetModules;

    fn tiny_info() -> ModelInfo {
        ModelInfo {
            hidden_size: 8,
            num_layers: 2,
            num_attention_heads: 2,
            num_kv_heads: 2,
            intermediate_size: 16,
        }
    }

    fn qv_config() -> LoraConfig {
        LoraConfig {
            rank: 4,
            alpha: 8.0,
            dropout: 0.0,
            target_modules: TargetModules::List(vec![
                "q_proj".to_string(),
                "v_proj".to_string(),
            ]),
            ..LoraConfig::default()
        }
    }

    #[test]
    fn attaches_one_module_per_layer_target() {
        let adapter =
            LoraAdapter::attach(&qv_config(), &tiny_info(), &Device::Cpu).expect("attach");
        // 2 layers x 2 targets
        assert_eq!(adapter.num_modules(), 4);
    }

    #[test]
    fn trainable_parameter_count_is_deterministic() {
        let a = LoraAdapter::attach(&qv_config(), &tiny_info(), &Device::Cpu).expect("attach");
        let b = LoraAdapter::attach(&qv_config(), &tiny_info(), &Device::Cpu).expect("attach");
        assert_eq!(
            a.num_trainable_parameters(),
            b.num_trainable_parameters()
        );
        // Per module: A [4, 8] + B [8, 4] = 64 params, 4 modules.
        assert_eq!(a.num_trainable_parameters(), 4 * 64);
    }

    #[test]
    fn fresh_adapter_contributes_zero_delta() {
        let device = Device::Cpu;
        let adapter = LoraAdapter::attach(&qv_config(), &tiny_info(), &device).expect("attach");

        let mut tensors = HashMap::new();
        for layer in 0..2 {
            for module in ["q_proj", "v_proj"] {
                tensors.insert(
                    ModelInfo::weight_key(layer, module),
                    Tensor::ones((8, 8), DType::F32, &device).expect("tensor"),
                );
            }
        }
        let original = tensors.clone();

        adapter.apply_to(&mut tensors, false).expect("apply");

        for (key, adapted) in &tensors {
            let base = original[key].to_vec2::<f32>().expect("vec");
            let after = adapted.to_vec2::<f32>().expect("vec");
            assert_eq!(base, after, "B is zero-initialized, delta must be zero");
        }
    }

    #[test]
    fn missing_target_weight_is_an_error() {
        let adapter =
            LoraAdapter::attach(&qv_config(), &tiny_info(), &Device::Cpu).expect("attach");
        let mut tensors = HashMap::new();
        let err = adapter.apply_to(&mut tensors, false).expect_err("no base");
        assert!(matches!(err, Error::Model(_)));
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let device = Device::Cpu;
        let adapter = LoraAdapter::attach(&qv_config(), &tiny_info(), &device).expect("attach");
        adapter.save(dir.path(), "org/base-model").expect("save");

        let metadata = load_metadata(dir.path()).expect("metadata");
        assert_eq!(metadata.base_model_id, "org/base-model");
        assert_eq!(metadata.lora.rank, 4);

        let mut restored =
            LoraAdapter::attach(&qv_config(), &tiny_info(), &device).expect("attach");
        restored.load_weights(dir.path()).expect("load");
        assert_eq!(
            restored.num_trainable_parameters(),
            adapter.num_trainable_parameters()
        );
    }

    #[test]
    fn unknown_module_name_fails_attach() {
        let config = LoraConfig {
            target_modules: TargetModules::List(vec!["mystery_proj".to_string()]),
            ..qv_config()
        };
        let err = LoraAdapter::attach(&config, &tiny_info(), &Device::Cpu).expect_err("unknown");
        assert!(matches!(err, Error::Config(_)));
    }
}
