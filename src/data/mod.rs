//! Chat dataset loading and templating

mod dataset;

pub use dataset::{
    load_records, load_splits, sample_texts, template_records, DatasetSplits, TemplatedRecord,
    TEST_FILE, TRAIN_FILE,
};
