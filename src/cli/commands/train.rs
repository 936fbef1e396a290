//! Train command implementation
//!
//! The full fine-tuning pipeline: dataset templating, quantized base
//! loading, adapter attachment, training, and final persistence.

use crate::chat::ChatTemplate;
use crate::cli::LogLevel;
use crate::config::{apply_overrides, load_config, TrainArgs, TrainSpec};
use crate::data::{load_splits, sample_texts};
use crate::lora::LoraAdapter;
use crate::model::{
    eos_token, load_llama_config, load_tokenizer, resolve_model_files, select_device,
    AdaptedModel, BaseWeights, ModelInfo, QuantPlan,
};
use crate::train::{is_coordinator, SftTrainer};
use crate::Error;

pub fn run_train(args: TrainArgs, level: LogLevel) -> Result<(), String> {
    level.log(
        LogLevel::Normal,
        &format!("Afinar: training from {}", args.config.display()),
    );

    let mut spec = load_config(&args.config).map_err(|e| format!("Config error: {e}"))?;
    apply_overrides(&mut spec, &args);
    spec.validate().map_err(|e| format!("Config error: {e}"))?;

    if args.dry_run {
        level.log(LogLevel::Normal, "Dry run - config validated successfully");
        print_spec(&spec, level);
        return Ok(());
    }

    train_pipeline(&spec, level).map_err(|e| format!("Training error: {e}"))?;
    level.log(LogLevel::Normal, "Training complete!");
    Ok(())
}

fn print_spec(spec: &TrainSpec, level: LogLevel) {
    level.log(LogLevel::Verbose, &format!("  Model: {}", spec.model.id));
    level.log(
        LogLevel::Verbose,
        &format!("  Dataset dir: {}", spec.data.dataset_dir.display()),
    );
    level.log(
        LogLevel::Verbose,
        &format!(
            "  LoRA: rank={} alpha={} dropout={}",
            spec.lora.rank, spec.lora.alpha, spec.lora.dropout
        ),
    );
    level.log(
        LogLevel::Verbose,
        &format!(
            "  Training: epochs={} batch_size={} lr={}",
            spec.training.epochs, spec.training.batch_size, spec.training.learning_rate
        ),
    );
}

fn train_pipeline(spec: &TrainSpec, level: LogLevel) -> crate::Result<()> {
    let device = select_device(spec.model.device)?;

    // Model & tokenizer come first: the chat template's end-of-turn token
    // is the tokenizer's EOS, and padding reuses it.
    let files = resolve_model_files(&spec.model.id, &spec.model.revision)?;
    let llama_config = load_llama_config(&files.config)?;
    let tokenizer_path = files.tokenizer.as_ref().ok_or_else(|| {
        Error::Tokenizer(format!("no tokenizer.json found for {}", spec.model.id))
    })?;
    let tokenizer = load_tokenizer(tokenizer_path)?;
    let (pad_id, eos_text) = eos_token(llama_config.eos_token_id.as_ref(), &tokenizer);
    let template = ChatTemplate::new(eos_text);

    // Datasets: template both splits, then show a few training samples.
    let splits = load_splits(&spec.data.dataset_dir, &template)?;
    level.log(
        LogLevel::Normal,
        &format!(
            "Loaded {} train / {} test records",
            splits.train.len(),
            splits.test.len()
        ),
    );
    if is_coordinator() {
        for text in sample_texts(
            &splits.train,
            spec.training.sample_log_count,
            spec.training.seed,
        ) {
            level.log(LogLevel::Normal, text);
        }
    }

    // Quantized base weights.
    let plan = QuantPlan::resolve(&spec.quant)?;
    let base = BaseWeights::load(&files.weights, &plan, &device)?;
    level.log(
        LogLevel::Verbose,
        &format!(
            "Loaded {} base parameters ({} tensors quantized)",
            base.total_parameters(),
            base.quantized_count()
        ),
    );

    // Adapter attachment; only these parameters will train.
    let info = ModelInfo::from_llama_config(&llama_config);
    let adapter = LoraAdapter::attach(&spec.lora, &info, &device)?;
    if is_coordinator() {
        level.log(
            LogLevel::Normal,
            &format!(
                "trainable params: {} || trainable%: {:.4}",
                adapter.num_trainable_parameters(),
                adapter.trainable_percent(base.total_parameters())
            ),
        );
    }

    let model = AdaptedModel::new(
        base,
        adapter,
        &llama_config,
        device,
        plan.compute_dtype,
        spec.use_kv_cache(),
    );

    let resume = spec.training.resume_from_checkpoint.clone();
    let mut trainer = SftTrainer::new(
        model,
        &tokenizer,
        &splits,
        spec.training.clone(),
        spec.data.max_seq_length,
        pad_id,
        spec.model.id.clone(),
        level == LogLevel::Quiet,
    )?;

    if let Some(checkpoint) = resume {
        trainer.resume_from(&checkpoint)?;
    }

    let summary = trainer.train()?;
    level.log(
        LogLevel::Normal,
        &format!(
            "Finished {} steps, final loss {:.4}",
            summary.steps, summary.train_loss
        ),
    );

    let saved_to = trainer.save_model()?;
    level.log(
        LogLevel::Normal,
        &format!("Model saved to {}", saved_to.display()),
    );
    Ok(())
}
