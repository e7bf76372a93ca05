// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: instance and device bring-up, resource upload, a textured
//! indexed draw and swapchain recreation.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod chain;
pub mod commands;
mod context;
pub mod device;
mod error;
pub mod frame;
mod instance;
pub mod memory;
pub mod pipeline;
mod shaders;
pub mod swapchain;
mod sync;
pub mod texture;
mod upload;

pub use context::VulkanContext;
pub use error::GpuError;
pub use frame::MAX_FRAMES_IN_FLIGHT;
pub use shaders::{spirv_words, BuiltinShaders, ShaderCache};
