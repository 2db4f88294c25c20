//! Device selection

use candle_core::Device;

/// Pick the accelerator if one is usable, CPU otherwise.
///
/// `force_cpu` skips the accelerator checks entirely.
pub fn select_device(force_cpu: bool) -> Device {
    if force_cpu {
        tracing::info!("💻 Using CPU device (forced)");
        return Device::Cpu;
    }

    if let Ok(device) = Device::new_cuda(0) {
        tracing::info!("🎮 Using CUDA device");
        return device;
    }

    #[cfg(target_os = "macos")]
    if let Ok(device) = Device::new_metal(0) {
        tracing::info!("🎮 Using Metal device");
        return device;
    }

    tracing::info!("💻 Using CPU device");
    Device::Cpu
}

pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}
