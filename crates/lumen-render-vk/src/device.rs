// SPDX-License-Identifier: CEPL-1.0
//! Physical device rating and logical device creation.
use anyhow::{Context, Result};
use ash::{
    khr::{surface, swapchain},
    vk, Device, Instance,
};
use tracing::{debug, info, warn};

use crate::GpuError;

const DISCRETE_BONUS: f32 = 1000.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some() && self.transfer.is_some()
    }

    pub fn resolve(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
            transfer: self.transfer?,
        })
    }
}

/// Resolved queue family for each role. Roles may share a family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub transfer: u32,
}

impl QueueFamilies {
    /// Distinct families in role order.
    pub fn unique(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(3);
        for family in [self.graphics, self.present, self.transfer] {
            if !out.contains(&family) {
                out.push(family);
            }
        }
        out
    }
}

/// First graphics family, first presenting family and first family that can
/// transfer without graphics. Stops once all three are known. Without a
/// dedicated transfer family the graphics family doubles as one.
pub fn find_queue_families(
    families: &[vk::QueueFlags],
    present: impl Fn(u32) -> bool,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();
    for (i, flags) in families.iter().enumerate() {
        let i = i as u32;
        let graphics = flags.contains(vk::QueueFlags::GRAPHICS);
        if indices.graphics.is_none() && graphics {
            indices.graphics = Some(i);
        }
        if indices.present.is_none() && present(i) {
            indices.present = Some(i);
        }
        if indices.transfer.is_none() && flags.contains(vk::QueueFlags::TRANSFER) && !graphics {
            indices.transfer = Some(i);
        }
        if indices.is_complete() {
            return indices;
        }
    }
    if indices.transfer.is_none() {
        indices.transfer = indices.graphics;
    }
    indices
}

/// Everything the rating looks at, gathered up front so the choice itself
/// needs no device.
#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_flags: Vec<vk::QueueFlags>,
    pub present_support: Vec<bool>,
    pub has_required_extensions: bool,
    pub surface_format_count: usize,
    pub present_mode_count: usize,
}

impl DeviceCandidate {
    pub fn queue_families(&self) -> QueueFamilyIndices {
        find_queue_families(&self.queue_flags, |i| {
            self.present_support
                .get(i as usize)
                .copied()
                .unwrap_or(false)
        })
    }
}

/// 0 for an unusable device, otherwise 1 plus a bonus for discrete GPUs.
pub fn rate_device(candidate: &DeviceCandidate) -> f32 {
    if !candidate.queue_families().is_complete()
        || !candidate.has_required_extensions
        || candidate.surface_format_count == 0
        || candidate.present_mode_count == 0
    {
        return 0.0;
    }
    let mut rating = 1.0;
    if candidate.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        rating += DISCRETE_BONUS;
    }
    rating
}

/// Index of the highest rated usable candidate; ties keep the earlier one.
pub fn pick_best(candidates: &[DeviceCandidate]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let rating = rate_device(candidate);
        debug!("device '{}' rated {rating}", candidate.name);
        if rating > best.map_or(0.0, |(_, r)| r) {
            best = Some((i, rating));
        }
    }
    best.map(|(i, _)| i)
}

unsafe fn describe_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Result<DeviceCandidate> {
    let props = unsafe { instance.get_physical_device_properties(phys) };
    let name = props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unnamed>".to_owned());

    let queue_flags: Vec<vk::QueueFlags> =
        unsafe { instance.get_physical_device_queue_family_properties(phys) }
            .iter()
            .map(|q| q.queue_flags)
            .collect();
    let present_support = (0..queue_flags.len() as u32)
        .map(|i| unsafe {
            surface_loader
                .get_physical_device_surface_support(phys, i, surface)
                .unwrap_or(false)
        })
        .collect();

    let extensions = unsafe { instance.enumerate_device_extension_properties(phys) }
        .context("enumerate_device_extension_properties")?;
    let has_required_extensions = extensions
        .iter()
        .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == swapchain::NAME));

    let (surface_format_count, present_mode_count) = if has_required_extensions {
        let formats = unsafe { surface_loader.get_physical_device_surface_formats(phys, surface) }
            .context("get_physical_device_surface_formats")?;
        let modes =
            unsafe { surface_loader.get_physical_device_surface_present_modes(phys, surface) }
                .context("get_physical_device_surface_present_modes")?;
        (formats.len(), modes.len())
    } else {
        warn!("device '{name}' lacks {:?}", swapchain::NAME);
        (0, 0)
    };

    Ok(DeviceCandidate {
        name,
        device_type: props.device_type,
        queue_flags,
        present_support,
        has_required_extensions,
        surface_format_count,
        present_mode_count,
    })
}

#[derive(Clone, Debug)]
pub struct SelectedDevice {
    pub physical: vk::PhysicalDevice,
    pub name: String,
    pub families: QueueFamilies,
    /// Maximum sampler anisotropy when the feature is available.
    pub max_anisotropy: Option<f32>,
}

pub unsafe fn select_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<SelectedDevice> {
    let devices =
        unsafe { instance.enumerate_physical_devices() }.context("enumerate_physical_devices")?;
    let mut candidates = Vec::with_capacity(devices.len());
    for &phys in &devices {
        candidates.push(unsafe { describe_device(instance, surface_loader, surface, phys)? });
    }

    let best = pick_best(&candidates).ok_or(GpuError::NoSuitableDevice)?;
    let candidate = &candidates[best];
    let families = candidate
        .queue_families()
        .resolve()
        .ok_or(GpuError::NoSuitableDevice)?;

    let physical = devices[best];
    let features = unsafe { instance.get_physical_device_features(physical) };
    let max_anisotropy = (features.sampler_anisotropy == vk::TRUE).then(|| {
        unsafe { instance.get_physical_device_properties(physical) }
            .limits
            .max_sampler_anisotropy
    });

    info!(
        "picked '{}' ({:?}), queues: graphics {} present {} transfer {}",
        candidate.name,
        candidate.device_type,
        families.graphics,
        families.present,
        families.transfer
    );
    Ok(SelectedDevice {
        physical,
        name: candidate.name.clone(),
        families,
        max_anisotropy,
    })
}

#[derive(Clone, Copy, Debug)]
pub struct Queues {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
    pub transfer: vk::Queue,
}

pub unsafe fn create_logical_device(
    instance: &Instance,
    selected: &SelectedDevice,
) -> Result<(Device, Queues)> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = selected
        .families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let features = vk::PhysicalDeviceFeatures {
        sampler_anisotropy: if selected.max_anisotropy.is_some() {
            vk::TRUE
        } else {
            vk::FALSE
        },
        ..Default::default()
    };

    let device_exts = [swapchain::NAME.as_ptr()];
    let create_info = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };

    let device = unsafe { instance.create_device(selected.physical, &create_info, None) }
        .context("create_device")?;
    let families = selected.families;
    let queues = unsafe {
        Queues {
            graphics: device.get_device_queue(families.graphics, 0),
            present: device.get_device_queue(families.present, 0),
            transfer: device.get_device_queue(families.transfer, 0),
        }
    };
    Ok((device, queues))
}
