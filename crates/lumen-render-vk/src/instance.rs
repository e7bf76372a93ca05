// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_void, CStr, CString};

use anyhow::{Context, Result};
use ash::{ext::debug_utils, vk, Entry, Instance};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, trace, warn, Level};

use crate::GpuError;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Severity to tracing level; the most severe bit wins.
pub fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    if severity.contains(S::ERROR) {
        Level::ERROR
    } else if severity.contains(S::WARNING) {
        Level::WARN
    } else if severity.contains(S::INFO) {
        Level::DEBUG
    } else {
        Level::TRACE
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    let message = if data.is_null() || unsafe { (*data).p_message.is_null() } {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy()
    };
    match severity_level(severity) {
        Level::ERROR => error!("vk[{kind:?}] {message}"),
        Level::WARN => warn!("vk[{kind:?}] {message}"),
        Level::DEBUG => debug!("vk[{kind:?}] {message}"),
        _ => trace!("vk[{kind:?}] {message}"),
    }
    vk::FALSE
}

fn messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    }
}

unsafe fn ensure_validation_layer(entry: &Entry) -> Result<()> {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }
        .context("enumerate_instance_layer_properties")?;
    let found = layers
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER));
    if !found {
        return Err(GpuError::MissingValidationLayer(
            VALIDATION_LAYER.to_string_lossy().into_owned(),
        )
        .into());
    }
    info!("validation layer {:?} available", VALIDATION_LAYER);
    Ok(())
}

/// Vulkan 1.2 instance with the window-system extensions for `display`, plus
/// the debug utils extension and validation layer when `validation` is set.
pub unsafe fn create_instance(
    entry: &Entry,
    display: RawDisplayHandle,
    app_name: &str,
    validation: bool,
) -> Result<Instance> {
    if validation {
        unsafe { ensure_validation_layer(entry)? };
    }

    let app_name = CString::new(app_name).context("application name contains NUL")?;
    let engine_name = c"lumen";
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app_name.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: engine_name.as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_2,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display)
        .context("enumerate_required_extensions")?
        .to_vec();
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
    }
    for &ext in &extensions {
        debug!("instance extension {:?}", unsafe { CStr::from_ptr(ext) });
    }
    if let Ok(available) = unsafe { entry.enumerate_instance_extension_properties(None) } {
        debug!("{} instance extensions available", available.len());
    }

    let layers = [VALIDATION_LAYER.as_ptr()];
    let chained = messenger_info();
    let mut create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        ..Default::default()
    };
    if validation {
        create_info.enabled_layer_count = layers.len() as u32;
        create_info.pp_enabled_layer_names = layers.as_ptr();
        create_info.p_next = &chained as *const _ as *const c_void;
    }

    let instance = unsafe { entry.create_instance(&create_info, None) }
        .context("create_instance")?;
    info!(
        "Vulkan instance ready ({} extensions, validation {})",
        extensions.len(),
        if validation { "on" } else { "off" }
    );
    Ok(instance)
}

/// Debug messenger plus the loader that destroys it. Must be dropped before
/// the instance.
pub struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub unsafe fn new(entry: &Entry, instance: &Instance) -> Result<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let messenger = unsafe { loader.create_debug_utils_messenger(&messenger_info(), None) }
            .context("create_debug_utils_messenger")?;
        Ok(Self { loader, messenger })
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;

    #[test]
    fn severity_maps_to_tracing_levels() {
        assert_eq!(severity_level(S::ERROR), Level::ERROR);
        assert_eq!(severity_level(S::WARNING), Level::WARN);
        assert_eq!(severity_level(S::INFO), Level::DEBUG);
        assert_eq!(severity_level(S::VERBOSE), Level::TRACE);
        assert_eq!(severity_level(S::WARNING | S::ERROR), Level::ERROR);
    }

    #[test]
    fn messenger_listens_at_every_severity() {
        let info = messenger_info();
        assert_eq!(
            info.message_severity,
            S::VERBOSE | S::INFO | S::WARNING | S::ERROR
        );
        assert!(info.pfn_user_callback.is_some());
    }
}
