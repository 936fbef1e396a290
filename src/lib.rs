//! Afinar: supervised fine-tuning and chat inference for causal LMs
//!
//! Two pipelines behind one CLI:
//!
//! - `afinar train config.yaml` loads a chat dataset, templates it into flat
//!   text, loads a quantized base model, attaches LoRA adapters, and runs a
//!   supervised fine-tuning loop.
//! - `afinar chat ./model-dir` runs an interactive question/answer loop
//!   against a fine-tuned checkpoint.
//!
//! The tensor math, autograd, quantized storage formats, and tokenizer
//! internals are delegated to candle and the `tokenizers` crate; this crate
//! supplies the configuration surface and orchestration around them.

pub mod chat;
pub mod cli;
pub mod config;
pub mod data;
pub mod infer;
pub mod lora;
pub mod model;
pub mod train;

mod error;

pub use error::{Error, Result};
