//! Base model loading: device selection, quantized weight storage, and
//! assembly of the adapted causal LM

pub(crate) mod adapted;
mod device;
mod loader;
mod quant;

pub use adapted::AdaptedModel;
pub use device::select_device;
pub use loader::{
    eos_token, load_llama_config, load_tokenizer, resolve_model_files, BaseWeights, ModelFiles,
    ModelInfo,
};
pub use quant::{is_quantizable, QuantPlan};
