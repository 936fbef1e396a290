//! SFT trainer: construct → train → save
//!
//! Owns the adapted model, tokenized datasets, and optimizer for one run.
//! Each optimizer step assembles the model over the current effective
//! weights, scores every next-token position of the batch, and updates the
//! adapter variables only.
//!
//! Position scoring has two strategies, selected by the single KV-cache
//! decision made at load time:
//!
//! - cache on: the sequence is fed one token at a time against the growing
//!   cache, one forward per position;
//! - cache off (gradient checkpointing): every position re-runs the forward
//!   over its full prefix, trading recomputation for activation memory.

use crate::config::TrainingParams;
use crate::data::DatasetSplits;
use crate::model::AdaptedModel;
use crate::train::save::{save_model, AdapterStore};
use crate::train::is_coordinator;
use crate::{Error, Result};
use candle_core::{Tensor, D};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use candle_transformers::models::llama::Llama;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Trainer state file name inside checkpoint and output directories
pub const TRAINER_STATE_FILE: &str = "trainer_state.json";

/// Text-to-ids encoding seam
///
/// The production encoder is a Hugging Face tokenizer; tests substitute a
/// trivial one.
pub trait TokenEncoder {
    /// Encode text into token ids, without special tokens.
    ///
    /// # Errors
    /// Returns [`Error::Tokenizer`] on encoding failure.
    fn encode_ids(&self, text: &str) -> Result<Vec<u32>>;
}

impl TokenEncoder for tokenizers::Tokenizer {
    fn encode_ids(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self.encode(text, false).map_err(Error::tokenizer)?;
        Ok(encoding.get_ids().to_vec())
    }
}

/// Persistent trainer progress, written next to checkpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainerState {
    /// Optimizer steps taken
    pub global_step: usize,
    /// Completed epochs
    pub epoch: usize,
    /// Most recent training loss
    pub train_loss: Option<f32>,
}

impl TrainerState {
    /// Write state as JSON into `dir`.
    ///
    /// # Errors
    /// Propagates filesystem and serialization failures.
    pub fn write(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(TRAINER_STATE_FILE), json)?;
        Ok(())
    }

    /// Read state from `dir` if present.
    ///
    /// # Errors
    /// Propagates filesystem and deserialization failures.
    pub fn read(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(TRAINER_STATE_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

/// Outcome of a completed training run
#[derive(Debug, Clone)]
pub struct TrainSummary {
    /// Total optimizer steps taken
    pub steps: usize,
    /// Final training loss
    pub train_loss: f32,
    /// Evaluation loss after each epoch
    pub eval_losses: Vec<f32>,
}

/// Supervised fine-tuning run over templated chat text
pub struct SftTrainer {
    model: AdaptedModel,
    train_ids: Vec<Vec<u32>>,
    eval_ids: Vec<Vec<u32>>,
    optimizer: AdamW,
    params: TrainingParams,
    pad_id: u32,
    base_model_id: String,
    state: TrainerState,
    quiet: bool,
}

impl SftTrainer {
    /// Construct a trainer: tokenize both splits and build the optimizer
    /// over the adapter variables.
    ///
    /// # Errors
    /// Fails on encoding errors or optimizer construction failure.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: AdaptedModel,
        encoder: &impl TokenEncoder,
        splits: &DatasetSplits,
        params: TrainingParams,
        max_seq_length: usize,
        pad_id: u32,
        base_model_id: String,
        quiet: bool,
    ) -> Result<Self> {
        let encode_split = |records: &[crate::data::TemplatedRecord]| -> Result<Vec<Vec<u32>>> {
            records
                .iter()
                .map(|r| {
                    let mut ids = encoder.encode_ids(&r.text)?;
                    ids.truncate(max_seq_length);
                    Ok(ids)
                })
                .collect()
        };
        let train_ids = encode_split(&splits.train)?;
        let eval_ids = encode_split(&splits.test)?;

        let optimizer = AdamW::new(
            model.adapter().trainable_vars(),
            ParamsAdamW {
                lr: params.learning_rate,
                ..ParamsAdamW::default()
            },
        )?;

        Ok(Self {
            model,
            train_ids,
            eval_ids,
            optimizer,
            params,
            pad_id,
            base_model_id,
            state: TrainerState::default(),
            quiet,
        })
    }

    /// Adapted model under training
    #[must_use]
    pub fn model(&self) -> &AdaptedModel {
        &self.model
    }

    /// Trainer progress
    #[must_use]
    pub fn state(&self) -> &TrainerState {
        &self.state
    }

    /// Restore adapter weights and trainer state from a checkpoint directory.
    ///
    /// # Errors
    /// Fails when the checkpoint is missing or unreadable.
    pub fn resume_from(&mut self, checkpoint: &Path) -> Result<()> {
        self.model.adapter_mut().load_weights(checkpoint)?;
        if let Some(state) = TrainerState::read(checkpoint)? {
            self.state = state;
        }
        self.log(format!(
            "Resumed from {} at step {}",
            checkpoint.display(),
            self.state.global_step
        ));
        Ok(())
    }

    /// Run the training loop.
    ///
    /// # Errors
    /// Propagates forward/backward failures; out-of-memory surfaces as a
    /// fatal resource error from the framework with no retry.
    pub fn train(&mut self) -> Result<TrainSummary> {
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut last_loss = 0.0f32;
        let mut eval_losses = Vec::new();

        for epoch in self.state.epoch..self.params.epochs {
            let mut order: Vec<usize> = (0..self.train_ids.len()).collect();
            order.shuffle(&mut rng);

            for chunk in order.chunks(self.params.batch_size) {
                let batch: Vec<Vec<u32>> =
                    chunk.iter().map(|&i| self.train_ids[i].clone()).collect();
                let refs: Vec<&[u32]> = batch.iter().map(Vec::as_slice).collect();
                let Some(loss) = self.step(&refs)? else {
                    continue;
                };
                last_loss = loss;
                self.state.global_step += 1;
                self.state.train_loss = Some(loss);

                if self.state.global_step % self.params.logging_steps == 0 {
                    self.log(format!(
                        "step {:>6}  epoch {}  loss {loss:.4}",
                        self.state.global_step, epoch
                    ));
                }
                if self.state.global_step % self.params.save_steps == 0 {
                    self.save_checkpoint()?;
                }
            }

            self.state.epoch = epoch + 1;
            let eval_loss = self.evaluate()?;
            eval_losses.push(eval_loss);
            self.log(format!("epoch {epoch} done  eval loss {eval_loss:.4}"));
        }

        Ok(TrainSummary {
            steps: self.state.global_step,
            train_loss: last_loss,
            eval_losses,
        })
    }

    /// One optimizer step over a batch of token sequences.
    ///
    /// Returns `None` when the batch has no scoreable position (every
    /// sequence shorter than two tokens).
    ///
    /// # Errors
    /// Propagates forward/backward failures.
    pub fn step(&mut self, batch: &[&[u32]]) -> Result<Option<f32>> {
        let Some(loss) = self.batch_loss(batch, true)? else {
            return Ok(None);
        };
        self.optimizer.backward_step(&loss)?;
        Ok(Some(loss.to_scalar::<f32>()?))
    }

    /// Evaluation loss over the held-out split.
    ///
    /// # Errors
    /// Propagates forward failures.
    pub fn evaluate(&self) -> Result<f32> {
        let mut total = 0.0f64;
        let mut batches = 0usize;
        for chunk in self.eval_ids.chunks(self.params.batch_size) {
            let batch: Vec<&[u32]> = chunk.iter().map(Vec::as_slice).collect();
            if let Some(loss) = self.batch_loss(&batch, false)? {
                total += f64::from(loss.to_scalar::<f32>()?);
                batches += 1;
            }
        }
        if batches == 0 {
            return Ok(0.0);
        }
        Ok((total / batches as f64) as f32)
    }

    /// Mean next-token cross-entropy over all real positions of a batch.
    fn batch_loss(&self, batch: &[&[u32]], training: bool) -> Result<Option<Tensor>> {
        let lengths: Vec<usize> = batch.iter().map(|ids| ids.len()).collect();
        let width = lengths.iter().copied().max().unwrap_or(0);
        if width < 2 {
            return Ok(None);
        }

        let rows = batch.len();
        let mut flat = Vec::with_capacity(rows * width);
        for ids in batch {
            flat.extend_from_slice(ids);
            flat.resize(flat.len() + (width - ids.len()), self.pad_id);
        }
        let input = Tensor::from_vec(flat.clone(), (rows, width), self.model.device())?;

        let llama = self.model.assemble(training)?;
        let logits = if self.model.use_kv_cache() {
            self.score_cached(&llama, &input, width)?
        } else {
            self.score_recompute(&llama, &input, width)?
        };

        // Keep positions whose target token is real, not padding.
        let mut keep = Vec::new();
        let mut targets = Vec::new();
        for (row, len) in lengths.iter().enumerate() {
            for col in 0..width - 1 {
                if col + 1 < *len {
                    keep.push((row * (width - 1) + col) as u32);
                    targets.push(flat[row * width + col + 1]);
                }
            }
        }
        if keep.is_empty() {
            return Ok(None);
        }

        let kept = keep.len();
        let vocab = logits.dim(D::Minus1)?;
        let logits_flat = logits.reshape((rows * (width - 1), vocab))?;
        let keep_idx = Tensor::from_vec(keep, kept, self.model.device())?;
        let kept_logits = logits_flat.index_select(&keep_idx, 0)?;
        let target_t = Tensor::from_vec(targets, kept, self.model.device())?;
        let loss = candle_nn::loss::cross_entropy(&kept_logits, &target_t)?;
        Ok(Some(loss))
    }

    /// Score every position with the KV cache: one single-token forward per
    /// position against the growing cache.
    fn score_cached(&self, llama: &Llama, input: &Tensor, width: usize) -> Result<Tensor> {
        let mut cache = self.model.fresh_cache()?;
        let mut cols = Vec::with_capacity(width - 1);
        for pos in 0..width - 1 {
            let chunk = input.narrow(1, pos, 1)?;
            let logits = llama.forward(&chunk, pos, &mut cache)?;
            cols.push(logits);
        }
        Ok(Tensor::stack(&cols, 1)?)
    }

    /// Score every position by re-running the forward over its full prefix.
    /// No activations survive between positions; this is the recompute side
    /// of the cache/checkpointing exclusivity.
    fn score_recompute(&self, llama: &Llama, input: &Tensor, width: usize) -> Result<Tensor> {
        let mut cols = Vec::with_capacity(width - 1);
        for pos in 0..width - 1 {
            let mut cache = self.model.fresh_cache()?;
            let prefix = input.narrow(1, 0, pos + 1)?;
            let logits = llama.forward(&prefix, 0, &mut cache)?;
            cols.push(logits);
        }
        Ok(Tensor::stack(&cols, 1)?)
    }

    /// Write a checkpoint under `output_dir/checkpoint-<step>/`.
    ///
    /// # Errors
    /// Propagates persistence failures.
    pub fn save_checkpoint(&self) -> Result<()> {
        let dir = self
            .params
            .output_dir
            .join(format!("checkpoint-{}", self.state.global_step));
        self.model.adapter().save(&dir, &self.base_model_id)?;
        self.state.write(&dir)?;
        self.log(format!("checkpoint written to {}", dir.display()));
        Ok(())
    }

    /// Persist the final model into the output directory.
    ///
    /// Goes through the parameter-store seam so sharded storage would be
    /// gathered before anything hits disk.
    ///
    /// # Errors
    /// Propagates persistence failures.
    pub fn save_model(&self) -> Result<PathBuf> {
        let mut store = AdapterStore::new(self.model.adapter(), &self.state, &self.base_model_id);
        save_model(&mut store, &self.params.output_dir)?;
        Ok(self.params.output_dir.clone())
    }

    fn log(&self, message: String) {
        if !self.quiet && is_coordinator() {
            println!("{message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TemplatedRecord;
    use crate::model::adapted::tests::tiny_adapted_model;

    /// Byte-level encoder folded into the tiny model's vocabulary.
    struct ByteEncoder {
        vocab: u32,
    }

    impl TokenEncoder for ByteEncoder {
        fn encode_ids(&self, text: &str) -> Result<Vec<u32>> {
            Ok(text.bytes().map(|b| u32::from(b) % self.vocab).collect())
        }
    }

    fn splits() -> DatasetSplits {
        let record = |text: &str| TemplatedRecord {
            text: text.to_string(),
        };
        DatasetSplits {
            train: vec![record("Human: hello"), record("Assistant: world")],
            test: vec![record("Human: eval")],
        }
    }

    fn trainer(use_kv_cache: bool) -> SftTrainer {
        let model = tiny_adapted_model(use_kv_cache);
        let params = TrainingParams {
            output_dir: std::env::temp_dir().join("afinar-trainer-test"),
            epochs: 1,
            batch_size: 2,
            learning_rate: 1e-3,
            ..TrainingParams::default()
        };
        SftTrainer::new(
            model,
            &ByteEncoder { vocab: 32 },
            &splits(),
            params,
            16,
            1,
            "org/tiny".to_string(),
            true,
        )
        .expect("trainer")
    }

    #[test]
    fn step_returns_finite_loss_and_advances_state() {
        let mut t = trainer(true);
        let ids: Vec<u32> = (0..8).collect();
        let loss = t.step(&[&ids]).expect("step").expect("scoreable batch");
        assert!(loss.is_finite());
        assert!(loss > 0.0);
    }

    #[test]
    fn single_token_batch_is_skipped() {
        let mut t = trainer(true);
        let result = t.step(&[&[7u32]]).expect("step");
        assert!(result.is_none());
    }

    #[test]
    fn recompute_strategy_scores_too() {
        let mut t = trainer(false);
        let ids: Vec<u32> = (0..6).collect();
        let loss = t.step(&[&ids]).expect("step").expect("scoreable batch");
        assert!(loss.is_finite());
    }

    #[test]
    fn step_updates_adapter_parameters() {
        let mut t = trainer(true);
        let before: Vec<f32> = t
            .model()
            .adapter()
            .trainable_vars()
            .iter()
            .map(|v| {
                v.as_tensor()
                    .abs()
                    .unwrap()
                    .sum_all()
                    .unwrap()
                    .to_scalar::<f32>()
                    .unwrap()
            })
            .collect();

        let ids: Vec<u32> = (0..8).collect();
        t.step(&[&ids]).expect("step").expect("loss");

        let after: Vec<f32> = t
            .model()
            .adapter()
            .trainable_vars()
            .iter()
            .map(|v| {
                v.as_tensor()
                    .abs()
                    .unwrap()
                    .sum_all()
                    .unwrap()
                    .to_scalar::<f32>()
                    .unwrap()
            })
            .collect();

        assert_ne!(before, after, "adapter variables must receive updates");
    }

    #[test]
    fn evaluate_returns_loss_for_test_split() {
        let t = trainer(true);
        let loss = t.evaluate().expect("evaluate");
        assert!(loss >= 0.0);
    }

    #[test]
    fn trainer_state_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = TrainerState {
            global_step: 42,
            epoch: 2,
            train_loss: Some(1.25),
        };
        state.write(dir.path()).expect("write");
        let restored = TrainerState::read(dir.path())
            .expect("read")
            .expect("present");
        assert_eq!(restored.global_step, 42);
        assert_eq!(restored.epoch, 2);
    }

    #[test]
    fn missing_state_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(TrainerState::read(dir.path()).expect("read").is_none());
    }
}
