//! Configuration: CLI surface and YAML training schema

mod cli;
mod schema;

pub use cli::{apply_overrides, parse_args, ChatArgs, Cli, Command, InfoArgs, TrainArgs, ValidateArgs};
pub use schema::{
    load_config, DataConfig, DevicePref, DtypeName, ModelRef, QuantSpec, QuantType, TrainSpec,
    TrainingParams,
};
