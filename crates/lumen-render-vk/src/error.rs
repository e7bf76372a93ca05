// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// Fatal conditions raised by the Vulkan backend. Everything else travels as
/// `anyhow::Error` with call-site context.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("allocation failed: {what} ({size} bytes)")]
    AllocationFailed {
        what: &'static str,
        size: vk::DeviceSize,
        #[source]
        source: Option<vk::Result>,
    },
    #[error("no physical device offers graphics, present and transfer queues with swapchain support")]
    NoSuitableDevice,
    #[error("validation layer {0} requested but not available")]
    MissingValidationLayer(String),
    #[error("none of the depth formats {0:?} supports optimal-tiling depth attachments")]
    NoDepthFormat(Vec<vk::Format>),
    #[error("format {0:?} is not supported here")]
    UnsupportedFormat(vk::Format),
}

impl GpuError {
    pub fn allocation(what: &'static str, size: vk::DeviceSize, source: vk::Result) -> Self {
        GpuError::AllocationFailed {
            what,
            size,
            source: Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn allocation_failure_keeps_vk_result() {
        let err = GpuError::allocation("vertex buffer", 256, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert_eq!(err.to_string(), "allocation failed: vertex buffer (256 bytes)");
        let source = err.source().map(|s| s.to_string());
        assert_eq!(
            source,
            Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY.to_string())
        );
    }
}
