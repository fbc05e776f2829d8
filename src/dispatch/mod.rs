//! Host capability detection for kernel generation.
//!
//! Provides a process-wide `DeviceProfile` that records the ISA features and
//! the vector width classes generated kernels may target.

pub mod device_profile;
pub mod hw_info;

pub use device_profile::{DeviceProfile, VectorWidth};
pub use hw_info::IsaFeatures;

use std::sync::OnceLock;

static PROFILE: OnceLock<DeviceProfile> = OnceLock::new();

/// Get the global device profile (detected once, cached for process lifetime).
pub fn device_profile() -> &'static DeviceProfile {
    PROFILE.get_or_init(DeviceProfile::detect)
}
