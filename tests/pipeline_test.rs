//! End-to-end pipeline tests over the public API: dataset templating into
//! the REPL, and configuration loading with overrides.

use afinar::chat::{ChatTemplate, Message, ResponseExtract};
use afinar::config::{apply_overrides, load_config, parse_args, Command};
use afinar::data::{load_splits, TEST_FILE, TRAIN_FILE};
use afinar::infer::{run_repl, ChatBackend, GenerationConfig};
use afinar::Result;
use std::path::PathBuf;

fn write_dataset(dir: &std::path::Path) {
    let records = serde_json::json!([
        {
            "messages": [
                {"role": "system", "content": "You are a medical assistant."},
                {"role": "user", "content": "What is diabetes?"},
                {"role": "assistant", "content": "A chronic metabolic condition."}
            ]
        },
        {
            "messages": [
                {"role": "user", "content": "What causes fever?"},
                {"role": "assistant", "content": "Usually infection."}
            ]
        }
    ]);
    for name in [TRAIN_FILE, TEST_FILE] {
        std::fs::write(dir.join(name), records.to_string()).expect("write dataset");
    }
}

#[test]
fn dataset_directory_templates_into_flat_text() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_dataset(dir.path());

    let template = ChatTemplate::new("</s>");
    let splits = load_splits(dir.path(), &template).expect("splits");

    assert_eq!(splits.train.len(), 2);
    assert_eq!(splits.test.len(), 2);
    for record in &splits.train {
        assert!(!record.text.is_empty());
        assert!(record.text.contains("Assistant: "));
    }
    assert!(splits.train[0].text.starts_with("You are a medical assistant."));
}

#[test]
fn missing_split_fails_before_training_could_start() {
    let dir = tempfile::tempdir().expect("tempdir");
    // Only the train split is present.
    std::fs::write(
        dir.path().join(TRAIN_FILE),
        r#"[{"messages": [{"role": "user", "content": "hi"}]}]"#,
    )
    .expect("write");

    let err = load_splits(dir.path(), &ChatTemplate::default()).expect_err("missing test split");
    assert!(err.to_string().contains(TEST_FILE));
}

/// Backend that completes prompts the way a fine-tuned model would: the
/// rendered prompt followed by an answer and the end-of-turn token.
struct TemplatedBackend {
    answer: &'static str,
    calls: usize,
}

impl ChatBackend for TemplatedBackend {
    fn generate(&mut self, prompt: &str, config: &GenerationConfig) -> Result<String> {
        assert_eq!(config.num_return_sequences, 1);
        self.calls += 1;
        Ok(format!("{prompt}{}</s>", self.answer))
    }
}

#[test]
fn repl_round_trips_a_question_through_the_template() {
    let template = ChatTemplate::new("</s>");
    let mut backend = TemplatedBackend {
        answer: "A chronic metabolic condition.",
        calls: 0,
    };
    let config = GenerationConfig::default();

    let mut input = "What is diabetes?\n\n".as_bytes();
    let mut output = Vec::new();
    let outcome = run_repl(&mut input, &mut output, &mut backend, &template, &config)
        .expect("repl run");

    assert_eq!(outcome.exchanges, 1);
    assert_eq!(backend.calls, 1);
    let printed = String::from_utf8(output).expect("utf8");
    assert!(printed.contains("A chronic metabolic condition."));
    // The rendered prompt itself must not leak into the printed answer.
    assert!(!printed.contains("Human:"));
}

#[test]
fn template_extraction_is_typed_not_indexed() {
    let template = ChatTemplate::new("</s>");
    let prompt = template.render(&[Message::user("q")], true);

    match template.extract_response(&format!("{prompt}answer</s>")) {
        ResponseExtract::Found(answer) => assert_eq!(answer, "answer"),
        ResponseExtract::MarkerMissing(_) => panic!("marker is present"),
    }
    assert!(matches!(
        template.extract_response("bare completion"),
        ResponseExtract::MarkerMissing(_)
    ));
}

#[test]
fn config_file_loads_and_cli_overrides_apply() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("config.yaml");
    std::fs::write(
        &config_path,
        r"
model:
  id: org/base-model
data:
  dataset_dir: ./data
  max_seq_length: 256
training:
  output_dir: ./out
  epochs: 3
",
    )
    .expect("write config");

    let mut spec = load_config(&config_path).expect("load");
    assert_eq!(spec.data.max_seq_length, 256);

    let cli = parse_args([
        "afinar",
        "train",
        config_path.to_str().expect("utf8 path"),
        "--epochs",
        "1",
        "--output-dir",
        "./elsewhere",
        "--gradient-checkpointing",
    ])
    .expect("parse");
    let Command::Train(args) = cli.command else {
        panic!("expected train command");
    };
    apply_overrides(&mut spec, &args);

    assert_eq!(spec.training.epochs, 1);
    assert_eq!(spec.training.output_dir, PathBuf::from("./elsewhere"));
    assert!(spec.training.gradient_checkpointing);
    assert!(!spec.use_kv_cache());
}
