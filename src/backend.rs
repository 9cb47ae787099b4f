//! Backend selection for training and inference.
//!
//! This module provides type aliases for the backend and device based on
//! compile-time feature flags. By default, the NdArray backend is used for
//! CPU execution; GPU execution is opt-in.
//!
//! # Feature Flags
//!
//! - `backend-ndarray` (default): Use NdArray backend for CPU-only execution
//! - `backend-wgpu`: Use WGPU backend for GPU acceleration via Vulkan/Metal/DirectX
//!
//! # Example
//!
//! ```rust,no_run
//! use harfnet::backend::{Backend, default_device};
//! use harfnet::config::RuntimeConfig;
//!
//! let device = default_device(&RuntimeConfig::default());
//! // let model = build::<Backend>(&config, &device, dir);
//! ```

use crate::config::RuntimeConfig;

#[cfg(feature = "backend-wgpu")]
pub use burn_wgpu::Wgpu as InnerBackend;

#[cfg(feature = "backend-ndarray")]
pub use burn_ndarray::NdArray as InnerBackend;

/// The backend type to use for training, with autodiff support.
pub type Backend = burn::backend::Autodiff<InnerBackend>;

/// The device type corresponding to the selected backend.
#[cfg(feature = "backend-wgpu")]
pub type Device = burn_wgpu::WgpuDevice;

#[cfg(feature = "backend-ndarray")]
pub type Device = burn_ndarray::NdArrayDevice;

/// Get the default device for the selected backend.
///
/// The GPU knobs are honoured only when the `backend-wgpu` feature is
/// compiled in; on the CPU backend a request for GPU execution is logged
/// and ignored.
pub fn default_device(config: &RuntimeConfig) -> Device {
    #[cfg(feature = "backend-wgpu")]
    if config.enable_gpu {
        tracing::info!(
            gpu_memory_limit_mb = config.gpu_memory_limit_mb,
            "Using WGPU backend with GPU enabled"
        );
    } else {
        tracing::info!("Using WGPU backend (GPU not requested)");
    }

    #[cfg(feature = "backend-ndarray")]
    if config.enable_gpu {
        tracing::warn!("ENABLE_GPU is set but the CPU backend is compiled in; ignoring");
    } else {
        tracing::info!("Using NdArray (CPU) backend");
    }

    let device = Device::default();
    tracing::info!("Device initialized: {:?}", device);
    device
}
