//! Adapted causal LM assembly
//!
//! Combines frozen base storage with the trainable adapter into the external
//! Llama architecture. Assembly materializes effective weights (dequantized
//! base plus scaled low-rank delta) and hands them to `candle_transformers`;
//! the deltas keep their autograd graph, so a backward pass through the
//! assembled model reaches exactly the adapter variables.

use super::loader::BaseWeights;
use crate::lora::LoraAdapter;
use crate::Result;
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaConfig, LlamaEosToks};

/// Frozen base weights plus trainable adapter, ready to assemble
pub struct AdaptedModel {
    base: BaseWeights,
    adapter: LoraAdapter,
    config: Config,
    device: Device,
    compute_dtype: DType,
    use_kv_cache: bool,
}

impl AdaptedModel {
    /// Wire base storage and adapter together.
    ///
    /// `use_kv_cache` is decided by the caller from the gradient-checkpointing
    /// flag; the two are mutually exclusive and every cache constructed here
    /// inherits the decision.
    pub fn new(
        base: BaseWeights,
        adapter: LoraAdapter,
        llama_config: &LlamaConfig,
        device: Device,
        compute_dtype: DType,
        use_kv_cache: bool,
    ) -> Self {
        Self {
            base,
            adapter,
            config: llama_config.clone().into_config(false),
            device,
            compute_dtype,
            use_kv_cache,
        }
    }

    /// Assemble the architecture over the current effective weights.
    ///
    /// Training assembly routes the adapter path through dropout; both modes
    /// dequantize the frozen base on the fly.
    ///
    /// # Errors
    /// Propagates tensor and architecture construction failures.
    pub fn assemble(&self, training: bool) -> Result<Llama> {
        let mut tensors = self.base.dense_tensors(self.compute_dtype, &self.device)?;
        self.adapter.apply_to(&mut tensors, training)?;
        let vb = VarBuilder::from_tensors(tensors, self.compute_dtype, &self.device);
        Ok(Llama::load(vb, &self.config)?)
    }

    /// Fresh attention cache honoring the cache/checkpointing decision.
    ///
    /// # Errors
    /// Propagates cache allocation failures.
    pub fn fresh_cache(&self) -> Result<Cache> {
        Ok(Cache::new(
            self.use_kv_cache,
            self.compute_dtype,
            &self.config,
            &self.device,
        )?)
    }

    /// Trainable adapter
    #[must_use]
    pub fn adapter(&self) -> &LoraAdapter {
        &self.adapter
    }

    /// Trainable adapter, mutable (checkpoint restore)
    pub fn adapter_mut(&mut self) -> &mut LoraAdapter {
        &mut self.adapter
    }

    /// Frozen base storage
    #[must_use]
    pub fn base(&self) -> &BaseWeights {
        &self.base
    }

    /// Compute device
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Whether forwards may rely on the KV cache
    #[must_use]
    pub fn use_kv_cache(&self) -> bool {
        self.use_kv_cache
    }

    /// Vocabulary size of the assembled architecture
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    /// End-of-sequence token ids declared by the architecture config
    #[must_use]
    pub fn eos_tokens(&self) -> Option<LlamaEosToks> {
        self.config.eos_token_id.clone()
    }
}
