//! Generation backend
//!
//! The REPL drives a [`ChatBackend`]; the production implementation wraps a
//! dense fine-tuned Llama checkpoint (optionally with a saved adapter merged
//! on top) behind the candle generation loop.

use crate::chat::ChatTemplate;
use crate::config::DevicePref;
use crate::lora::{self, LoraAdapter};
use crate::model::{
    eos_token, load_llama_config, load_tokenizer, resolve_model_files, select_device,
    BaseWeights, ModelInfo, QuantPlan,
};
use crate::{Error, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaEosToks};
use std::path::Path;
use tokenizers::Tokenizer;

/// Bounds and sampling settings for one generation call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    /// Hard cap on total tokens (prompt plus continuation)
    pub max_length: usize,
    /// Number of output sequences; only 1 is supported
    pub num_return_sequences: usize,
    /// Sampling temperature; greedy decoding when `None`
    pub temperature: Option<f64>,
    /// Nucleus sampling cutoff
    pub top_p: Option<f64>,
    /// Sampling seed
    pub seed: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_length: 150,
            num_return_sequences: 1,
            temperature: None,
            top_p: None,
            seed: 299_792_458,
        }
    }
}

/// Something that can turn a rendered prompt into a full decoded transcript
pub trait ChatBackend {
    /// Generate a continuation for `prompt` and return the decoded
    /// transcript (prompt included), bounded by `config.max_length`.
    ///
    /// # Errors
    /// Returns generation failures and unsupported configurations.
    fn generate(&mut self, prompt: &str, config: &GenerationConfig) -> Result<String>;
}

/// Candle-backed generation over a fine-tuned checkpoint
pub struct LlamaChatBackend {
    llama: Llama,
    config: Config,
    tokenizer: Tokenizer,
    template: ChatTemplate,
    device: Device,
    dtype: DType,
}

impl LlamaChatBackend {
    /// Load a fine-tuned model directory for interactive inference.
    ///
    /// The tokenizer comes from the model directory unless `tokenizer_source`
    /// points elsewhere (a file path or a hub repo id). A saved adapter
    /// directory, when given, is merged onto the base weights before the
    /// architecture is built.
    ///
    /// # Errors
    /// Fails on unresolvable files, tokenizer errors, or architecture
    /// construction failures.
    pub fn load(
        model_dir: &Path,
        tokenizer_source: Option<&str>,
        adapter_dir: Option<&Path>,
        force_cpu: bool,
    ) -> Result<Self> {
        let device = select_device(if force_cpu {
            DevicePref::Cpu
        } else {
            DevicePref::Auto
        })?;
        let dtype = if device.is_cuda() { DType::BF16 } else { DType::F32 };

        let model_id = model_dir.to_string_lossy();
        let files = resolve_model_files(&model_id, "main")?;
        let llama_config = load_llama_config(&files.config)?;

        let tokenizer = match (tokenizer_source, &files.tokenizer) {
            (Some(source), _) => load_tokenizer_from_source(source)?,
            (None, Some(path)) => load_tokenizer(path)?,
            (None, None) => {
                return Err(Error::Tokenizer(format!(
                    "no tokenizer.json in {model_id}; pass --tokenizer"
                )))
            }
        };

        let mut tensors = {
            let plan = QuantPlan::dense(dtype);
            let base = BaseWeights::load(&files.weights, &plan, &device)?;
            base.dense_tensors(dtype, &device)?
        };

        if let Some(dir) = adapter_dir {
            let metadata = lora::load_metadata(dir)?;
            let info = ModelInfo::from_llama_config(&llama_config);
            let mut adapter = LoraAdapter::attach(&metadata.lora, &info, &device)?;
            adapter.load_weights(dir)?;
            adapter.apply_to(&mut tensors, false)?;
        }

        let config = llama_config.into_config(false);
        let vb = VarBuilder::from_tensors(tensors, dtype, &device);
        let llama = Llama::load(vb, &config)?;

        let (_, eos_text) = eos_token(config.eos_token_id.as_ref(), &tokenizer);
        Ok(Self {
            llama,
            config,
            tokenizer,
            template: ChatTemplate::new(eos_text),
            device,
            dtype,
        })
    }

    /// Chat template matching the loaded tokenizer's end-of-turn token
    #[must_use]
    pub fn template(&self) -> &ChatTemplate {
        &self.template
    }

    fn is_eos(&self, token: u32) -> bool {
        match &self.config.eos_token_id {
            Some(LlamaEosToks::Single(id)) => token == *id,
            Some(LlamaEosToks::Multiple(ids)) => ids.contains(&token),
            None => false,
        }
    }
}

fn load_tokenizer_from_source(source: &str) -> Result<Tokenizer> {
    let path = Path::new(source);
    if path.exists() {
        let file = if path.is_dir() {
            path.join("tokenizer.json")
        } else {
            path.to_path_buf()
        };
        return load_tokenizer(&file);
    }

    let api = hf_hub::api::sync::Api::new().map_err(|e| Error::Hub {
        repo: source.to_string(),
        file: "api".to_string(),
        message: e.to_string(),
    })?;
    let file = api
        .model(source.to_string())
        .get("tokenizer.json")
        .map_err(|e| Error::Hub {
            repo: source.to_string(),
            file: "tokenizer.json".to_string(),
            message: e.to_string(),
        })?;
    load_tokenizer(&file)
}

impl ChatBackend for LlamaChatBackend {
    fn generate(&mut self, prompt: &str, config: &GenerationConfig) -> Result<String> {
        if config.num_return_sequences != 1 {
            return Err(Error::Config(format!(
                "num_return_sequences must be 1, got {}",
                config.num_return_sequences
            )));
        }

        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(Error::tokenizer)?;
        let mut tokens: Vec<u32> = encoding.get_ids().to_vec();

        let sampling = match config.temperature {
            None => Sampling::ArgMax,
            Some(t) if t <= 0.0 => Sampling::ArgMax,
            Some(temperature) => match config.top_p {
                Some(p) => Sampling::TopP { p, temperature },
                None => Sampling::All { temperature },
            },
        };
        let mut logits_processor = LogitsProcessor::from_sampling(config.seed, sampling);

        let mut cache = Cache::new(true, self.dtype, &self.config, &self.device)?;
        let mut index_pos = 0;
        let mut generated = 0usize;

        while tokens.len() < config.max_length {
            let (context_size, context_index) = if generated > 0 {
                (1, index_pos)
            } else {
                (tokens.len(), 0)
            };
            let ctxt = &tokens[tokens.len() - context_size..];
            let input = Tensor::new(ctxt, &self.device)?.unsqueeze(0)?;
            let logits = self.llama.forward(&input, context_index, &mut cache)?;
            let logits = logits.squeeze(0)?;
            index_pos += ctxt.len();

            let next_token = logits_processor.sample(&logits)?;
            generated += 1;
            tokens.push(next_token);
            if self.is_eos(next_token) {
                break;
            }
        }

        self.tokenizer
            .decode(&tokens, true)
            .map_err(Error::tokenizer)
    }
}
