use std::fmt;
use std::str::FromStr;

use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::Device;

use crate::{Error, Result};

#[cfg(all(feature = "metal", feature = "cuda"))]
compile_error!("feature \"metal\" and feature \"cuda\" cannot be enabled at the same time");

/// Where the model and the materialized embeddings should live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// First available accelerator, falling back to the CPU.
    #[default]
    Auto,
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl FromStr for DevicePreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, ordinal) = match s.split_once(':') {
            Some((kind, ordinal)) => {
                let ordinal = ordinal
                    .parse::<usize>()
                    .map_err(|_| Error::Device(format!("invalid device ordinal in `{s}`")))?;
                (kind, ordinal)
            }
            None => (s, 0),
        };

        match kind.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(ordinal)),
            "metal" => Ok(Self::Metal(ordinal)),
            _ => Err(Error::Device(format!("unknown device `{s}`"))),
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePreference::Auto => write!(f, "auto"),
            DevicePreference::Cpu => write!(f, "cpu"),
            DevicePreference::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
            DevicePreference::Metal(ordinal) => write!(f, "metal:{ordinal}"),
        }
    }
}

/// Resolve a [`DevicePreference`] into a candle [`Device`].
///
/// `Auto` never fails: it probes CUDA, then Metal, and settles on the CPU. An explicitly
/// requested accelerator that cannot be opened is an error.
pub fn resolve_device(preference: DevicePreference) -> Result<Device> {
    let device = match preference {
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda(ordinal) => Device::new_cuda(ordinal)
            .map_err(|e| Error::Device(format!("cuda:{ordinal} unavailable: {e}")))?,
        DevicePreference::Metal(ordinal) => Device::new_metal(ordinal)
            .map_err(|e| Error::Device(format!("metal:{ordinal} unavailable: {e}")))?,
        DevicePreference::Auto => {
            if cuda_is_available() {
                match Device::new_cuda(0) {
                    Ok(device) => device,
                    Err(e) => {
                        tracing::warn!("CUDA reported available but failed to open: {e}");
                        Device::Cpu
                    }
                }
            } else if metal_is_available() {
                match Device::new_metal(0) {
                    Ok(device) => device,
                    Err(e) => {
                        tracing::warn!("Metal reported available but failed to open: {e}");
                        Device::Cpu
                    }
                }
            } else {
                Device::Cpu
            }
        }
    };

    print_device_info(&device);
    Ok(device)
}

pub fn print_device_info(device: &Device) {
    match device {
        Device::Cpu => tracing::info!("Using CPU"),
        Device::Cuda(_) => tracing::info!("Using CUDA ({:?})", device.location()),
        Device::Metal(_) => tracing::info!("Using Metal ({:?})", device.location()),
    }
}
