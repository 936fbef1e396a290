//! Model persistence with the sharded-state ordering constraint
//!
//! Saving goes through [`save_model`] so the ordering rule lives in one
//! place: sharded parameter storage must be gathered into a full state
//! dictionary before anything is persisted. Callers cannot forget the
//! gather because they never call `persist` directly.

use crate::lora::LoraAdapter;
use crate::train::TrainerState;
use crate::Result;
use std::path::Path;

/// Parameter storage about to be persisted
pub trait ParamStore {
    /// Whether parameters are currently sharded across processes/devices
    fn is_sharded(&self) -> bool;

    /// Reconstitute a full (non-sharded) state dictionary.
    ///
    /// # Errors
    /// Implementations fail when gathering is impossible.
    fn gather_full(&mut self) -> Result<()>;

    /// Write the full state to `dir`.
    ///
    /// # Errors
    /// Propagates persistence failures.
    fn persist(&self, dir: &Path) -> Result<()>;
}

/// Persist a parameter store, gathering sharded state first.
///
/// # Errors
/// Propagates gather and persistence failures.
pub fn save_model(store: &mut dyn ParamStore, dir: &Path) -> Result<()> {
    if store.is_sharded() {
        store.gather_full()?;
    }
    store.persist(dir)
}

/// Adapter-backed store: full in-process storage
///
/// Adapter variables live in one process-local `VarMap`, so the store is
/// never sharded; distributed launchers shard nothing that this crate owns.
pub struct AdapterStore<'a> {
    adapter: &'a LoraAdapter,
    state: &'a TrainerState,
    base_model_id: &'a str,
}

impl<'a> AdapterStore<'a> {
    /// Store over the given adapter and trainer state
    pub fn new(adapter: &'a LoraAdapter, state: &'a TrainerState, base_model_id: &'a str) -> Self {
        Self {
            adapter,
            state,
            base_model_id,
        }
    }
}

impl ParamStore for AdapterStore<'_> {
    fn is_sharded(&self) -> bool {
        false
    }

    fn gather_full(&mut self) -> Result<()> {
        Ok(())
    }

    fn persist(&self, dir: &Path) -> Result<()> {
        self.adapter.save(dir, self.base_model_id)?;
        self.state.write(dir)?;
        Ok(())
    }
}
