//! Supervised fine-tuning orchestration

mod save;
mod trainer;

pub use save::{save_model, AdapterStore, ParamStore};
pub use trainer::{SftTrainer, TokenEncoder, TrainSummary, TrainerState, TRAINER_STATE_FILE};

/// Whether this process is the coordinating process of the launch.
///
/// Multi-process launchers export a rank for each worker; a process without
/// one is a single-process run and coordinates itself. Progress and
/// trainable-parameter reporting are restricted to the coordinator so
/// multi-process runs do not interleave duplicate output.
#[must_use]
pub fn is_coordinator() -> bool {
    for var in ["RANK", "LOCAL_RANK"] {
        if let Ok(value) = std::env::var(var) {
            if let Ok(rank) = value.trim().parse::<u64>() {
                return rank == 0;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unranked_process_coordinates_itself() {
        // Test environments do not set launcher rank variables.
        if std::env::var("RANK").is_err() && std::env::var("LOCAL_RANK").is_err() {
            assert!(is_coordinator());
        }
    }
}
