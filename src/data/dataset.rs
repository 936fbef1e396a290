//! Dataset loading and chat templating
//!
//! Datasets are JSON arrays of records carrying a `messages` field (ordered
//! role/content turns). Templating maps each record to a `text` field with
//! the rendered transcript and drops `messages`. The transform is pure and
//! is applied identically to the train and test splits before any
//! tokenization.

use crate::chat::{ChatTemplate, Message};
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Training split file name expected under the dataset directory
pub const TRAIN_FILE: &str = "train_dataset.json";
/// Test split file name expected under the dataset directory
pub const TEST_FILE: &str = "test_dataset.json";

/// A record after templating: the rendered transcript, nothing else
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatedRecord {
    /// Rendered chat transcript
    pub text: String,
}

/// Templated train and test splits
#[derive(Debug, Clone)]
pub struct DatasetSplits {
    /// Training records
    pub train: Vec<TemplatedRecord>,
    /// Held-out records used for evaluation loss
    pub test: Vec<TemplatedRecord>,
}

/// Load raw dataset records from a JSON array file.
///
/// # Errors
/// Returns [`Error::DatasetNotFound`] if the file does not exist, and a JSON
/// error if the file is not an array of objects.
pub fn load_records(path: &Path) -> Result<Vec<Value>> {
    if !path.exists() {
        return Err(Error::DatasetNotFound {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    let records: Vec<Value> = serde_json::from_str(&content)?;
    Ok(records)
}

/// Template raw records into flat-text records.
///
/// Each record must carry a non-empty `messages` list; the rendered
/// transcript replaces it as the `text` field. A record without `messages`
/// is a malformed-input error, not a skip: templated output fed back in
/// fails the same way.
///
/// # Errors
/// Returns [`Error::MalformedRecord`] naming the offending record index.
pub fn template_records(
    records: &[Value],
    template: &ChatTemplate,
    path: &Path,
) -> Result<Vec<TemplatedRecord>> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let messages = record
                .get("messages")
                .ok_or_else(|| malformed(path, index, "missing `messages` field"))?;
            let messages: Vec<Message> = serde_json::from_value(messages.clone())
                .map_err(|e| malformed(path, index, &format!("invalid `messages`: {e}")))?;
            if messages.is_empty() {
                return Err(malformed(path, index, "empty `messages` list"));
            }
            Ok(TemplatedRecord {
                text: template.render(&messages, false),
            })
        })
        .collect()
}

fn malformed(path: &Path, index: usize, reason: &str) -> Error {
    Error::MalformedRecord {
        path: path.to_path_buf(),
        index,
        reason: reason.to_string(),
    }
}

/// Load and template both splits from a dataset directory.
///
/// # Errors
/// Fails before any training starts if either file is missing or malformed.
pub fn load_splits(dataset_dir: &Path, template: &ChatTemplate) -> Result<DatasetSplits> {
    let train_path: PathBuf = dataset_dir.join(TRAIN_FILE);
    let test_path: PathBuf = dataset_dir.join(TEST_FILE);

    let train_raw = load_records(&train_path)?;
    let test_raw = load_records(&test_path)?;

    Ok(DatasetSplits {
        train: template_records(&train_raw, template, &train_path)?,
        test: template_records(&test_raw, template, &test_path)?,
    })
}

/// Pick `count` random record texts for inspection logging.
///
/// Selection is seeded so a fixed seed reproduces the same sample.
#[must_use]
pub fn sample_texts(records: &[TemplatedRecord], count: usize, seed: u64) -> Vec<&str> {
    let mut rng = StdRng::seed_from_u64(seed);
    records
        .choose_multiple(&mut rng, count.min(records.len()))
        .map(|r| r.text.as_str())
        .collect()
}
