//! Compute device selection
//!
//! The device is chosen once at startup and fixed for the process lifetime.

use crate::config::DevicePref;
use crate::{Error, Result};
use candle_core::Device;

/// Select the compute device for the given preference.
///
/// `Auto` prefers CUDA and falls back to CPU. `Cuda` is a hard requirement:
/// an unavailable accelerator is a fatal configuration error, never a silent
/// fallback.
///
/// # Errors
/// Returns [`Error::Config`] when CUDA is required but not available.
pub fn select_device(pref: DevicePref) -> Result<Device> {
    match pref {
        DevicePref::Cpu => Ok(Device::Cpu),
        DevicePref::Cuda => {
            if !candle_core::utils::cuda_is_available() {
                return Err(Error::Config(
                    "device = cuda requested but no CUDA device is available".to_string(),
                ));
            }
            Ok(Device::new_cuda(0)?)
        }
        DevicePref::Auto => Ok(Device::cuda_if_available(0)?),
    }
}
