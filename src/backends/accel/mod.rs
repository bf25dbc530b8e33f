//! Accelerator dispatch
//!
//! # Architecture
//!
//! - `device`: the [`Device`] contract, kernel identifiers and the
//!   [`KernelParams`] descriptor uploaded with every dispatch
//! - `kernels`: the kernel bodies, written against flat word buffers
//! - `host`: [`HostDevice`], a CPU emulation of a device queue
//! - `engine`: [`AcceleratorEngine`], the upload/dispatch/read-back protocol
//! - `shaders` / `wgpu_device` (feature `gpu`): the WGSL kernels and
//!   [`WgpuDevice`]
//!
//! Five [`KernelVariant`]s compute the same product:
//!
//! | Variant | B upload | Kernels |
//! |---|---|---|
//! | Naive | B | `gf2_naive` |
//! | Transposed | Bᵀ | `gf2_transposed` |
//! | Tiled | B | `gf2_tiled` (16×16 workgroup staging) |
//! | Vectorized | Bᵀ | `gf2_vectorized` |
//! | M4r | B | `m4r_build`, fence, `m4r_multiply` |

mod device;
mod engine;
mod host;
pub mod kernels;

#[cfg(feature = "gpu")]
pub mod shaders;
#[cfg(feature = "gpu")]
mod wgpu_device;

pub use device::{
    Device, GridShape, GroupShape, KernelId, KernelParams, KernelVariant, MAX_GROUP_INVOCATIONS,
    TILE, WORD_BYTES,
};
pub use engine::AcceleratorEngine;
pub use host::{HostBuffer, HostDevice, HostDeviceConfig, HostPipeline};

#[cfg(feature = "gpu")]
pub use wgpu_device::{WgpuBuffer, WgpuDevice, WgpuPipeline};
