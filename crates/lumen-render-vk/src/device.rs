// SPDX-License-Identifier: CEPL-1.0
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use ash::khr::swapchain;
use ash::vk;
use lumen_render::DeviceCapabilities;
use tracing::{debug, info};

use crate::error::{ResourceKind, VkError, VkResultExt};
use crate::instance::Instance;
use crate::surface::Surface;

/// A hardware queue and the family it was taken from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Queue {
    raw: vk::Queue,
    family: u32,
}

impl Queue {
    pub fn raw(&self) -> vk::Queue {
        self.raw
    }

    pub fn family(&self) -> u32 {
        self.family
    }
}

/// Family lookup result before requirements are checked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
}

/// Families of the selected device, one per role. Roles may share a family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueFamilies {
    /// Distinct families in ascending order; one queue is created per entry.
    pub fn unique(&self) -> Vec<u32> {
        [
            Some(self.graphics),
            Some(self.present),
            self.compute,
            self.transfer,
        ]
        .into_iter()
        .flatten()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
    }
}

/// Present goes to the graphics family when that family can present, which
/// keeps the swapchain in exclusive sharing mode on most hardware.
pub fn resolve_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> QueueFamilyIndices {
    let first = |flag: vk::QueueFlags| {
        families
            .iter()
            .position(|f| f.queue_count > 0 && f.queue_flags.contains(flag))
            .map(|i| i as u32)
    };

    let graphics = first(vk::QueueFlags::GRAPHICS);
    let present = match graphics {
        Some(g) if supports_present(g) => Some(g),
        _ => (0..families.len() as u32).find(|&i| supports_present(i)),
    };
    let compute = first(vk::QueueFlags::COMPUTE);
    // graphics and compute families accept transfer work without advertising it
    let transfer = first(vk::QueueFlags::TRANSFER).or(graphics).or(compute);

    QueueFamilyIndices {
        graphics,
        present,
        compute,
        transfer,
    }
}

#[derive(Clone, Copy, Debug)]
struct DeviceSupport {
    indices: QueueFamilyIndices,
    swapchain: bool,
    anisotropy: bool,
}

impl DeviceSupport {
    fn check(&self, required: DeviceCapabilities) -> Result<QueueFamilies, Vec<&'static str>> {
        let mut missing = Vec::new();
        let graphics = self.indices.graphics;
        let present = if required.contains(DeviceCapabilities::PRESENT) {
            self.indices.present
        } else {
            graphics
        };

        if graphics.is_none() {
            missing.push("graphics queue");
        }
        if present.is_none() {
            missing.push("present queue");
        }
        if !self.swapchain {
            missing.push("VK_KHR_swapchain");
        }
        if required.contains(DeviceCapabilities::COMPUTE) && self.indices.compute.is_none() {
            missing.push("compute queue");
        }
        if required.contains(DeviceCapabilities::TRANSFER) && self.indices.transfer.is_none() {
            missing.push("transfer queue");
        }
        if required.contains(DeviceCapabilities::SAMPLER_ANISOTROPY) && !self.anisotropy {
            missing.push("sampler anisotropy");
        }

        match (graphics, present) {
            (Some(graphics), Some(present)) if missing.is_empty() => Ok(QueueFamilies {
                graphics,
                present,
                compute: self.indices.compute,
                transfer: self.indices.transfer,
            }),
            _ => Err(missing),
        }
    }
}

fn select_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

pub struct Device {
    instance: Arc<Instance>,
    physical: vk::PhysicalDevice,
    raw: ash::Device,
    name: String,
    properties: vk::PhysicalDeviceProperties,
    families: QueueFamilies,
    graphics: Queue,
    present: Queue,
    compute: Option<Queue>,
    transfer: Option<Queue>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.raw.handle())
            .field("name", &self.name)
            .field("families", &self.families)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Picks the first physical device that satisfies `required` and can
    /// present to `surface`, then creates one queue per distinct family.
    pub fn new(
        instance: &Arc<Instance>,
        surface: &Surface,
        required: DeviceCapabilities,
    ) -> Result<Arc<Self>, VkError> {
        let vki = instance.raw();
        // SAFETY: plain query on a live instance
        let physicals = unsafe { vki.enumerate_physical_devices() }?;

        let mut rejected = Vec::new();
        let mut chosen = None;
        for phys in physicals {
            // SAFETY: phys was enumerated from this instance (same below)
            let properties = unsafe { vki.get_physical_device_properties(phys) };
            let name = properties
                .device_name_as_c_str()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_owned());

            let queue_props = unsafe { vki.get_physical_device_queue_family_properties(phys) };
            let indices = resolve_queue_families(&queue_props, |family| {
                surface.supports_present(phys, family).unwrap_or(false)
            });
            let extensions = unsafe { vki.enumerate_device_extension_properties(phys) }?;
            let features = unsafe { vki.get_physical_device_features(phys) };
            let support = DeviceSupport {
                indices,
                swapchain: extensions
                    .iter()
                    .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == swapchain::NAME)),
                anisotropy: features.sampler_anisotropy == vk::TRUE,
            };

            match support.check(required) {
                Ok(families) => {
                    chosen = Some((phys, properties, name, families));
                    break;
                }
                Err(missing) => {
                    debug!("vk: skipping '{name}': missing {}", missing.join(", "));
                    rejected.push(format!("{name}: missing {}", missing.join(", ")));
                }
            }
        }

        let Some((physical, properties, name, families)) = chosen else {
            let reason = if rejected.is_empty() {
                "no Vulkan devices present".to_owned()
            } else {
                rejected.join("; ")
            };
            return Err(VkError::NoSuitableDevice(reason));
        };

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
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
            sampler_anisotropy: if required.contains(DeviceCapabilities::SAMPLER_ANISOTROPY) {
                vk::TRUE
            } else {
                vk::FALSE
            },
            ..Default::default()
        };
        let extensions = [swapchain::NAME.as_ptr()];

        let create_info = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };
        // SAFETY: every pointer in create_info outlives this call
        let raw = unsafe { vki.create_device(physical, &create_info, None) }
            .creating(ResourceKind::Device)?;

        let queue = |family: u32| Queue {
            // SAFETY: one queue (index 0) was requested for every family in use
            raw: unsafe { raw.get_device_queue(family, 0) },
            family,
        };
        let graphics = queue(families.graphics);
        let present = queue(families.present);
        let compute = families.compute.map(queue);
        let transfer = families.transfer.map(queue);

        info!(
            "vk: device '{name}' (graphics={}, present={}, compute={:?}, transfer={:?}, queues={})",
            families.graphics,
            families.present,
            families.compute,
            families.transfer,
            queue_infos.len()
        );

        Ok(Arc::new(Self {
            instance: Arc::clone(instance),
            physical,
            raw,
            name,
            properties,
            families,
            graphics,
            present,
            compute,
            transfer,
        }))
    }

    pub fn raw(&self) -> &ash::Device {
        &self.raw
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn physical(&self) -> vk::PhysicalDevice {
        self.physical
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn families(&self) -> QueueFamilies {
        self.families
    }

    pub fn graphics_queue(&self) -> Queue {
        self.graphics
    }

    pub fn present_queue(&self) -> Queue {
        self.present
    }

    pub fn compute_queue(&self) -> Option<Queue> {
        self.compute
    }

    pub fn transfer_queue(&self) -> Option<Queue> {
        self.transfer
    }

    pub fn wait_idle(&self) -> Result<(), VkError> {
        // SAFETY: the device is alive for &self
        Ok(unsafe { self.raw.device_wait_idle() }?)
    }

    pub fn find_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Result<u32, VkError> {
        // SAFETY: physical belongs to our instance
        let props = unsafe {
            self.instance
                .raw()
                .get_physical_device_memory_properties(self.physical)
        };
        select_memory_type(&props, type_bits, required).ok_or(VkError::NoMemoryType(required))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        debug!("vk: dropping device {:?}", self.raw.handle());
        // SAFETY: every child object holds an Arc to us and has been dropped
        unsafe { self.raw.destroy_device(None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn present_prefers_the_graphics_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let idx = resolve_queue_families(&families, |_| true);
        assert_eq!(idx.graphics, Some(1));
        assert_eq!(idx.present, Some(1));
        assert_eq!(idx.compute, Some(1));
        assert_eq!(idx.transfer, Some(0));
    }

    #[test]
    fn present_falls_back_to_any_capable_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let idx = resolve_queue_families(&families, |i| i == 1);
        assert_eq!(idx.graphics, Some(0));
        assert_eq!(idx.present, Some(1));
        // no family advertises TRANSFER
        assert_eq!(idx.transfer, Some(0));
    }

    #[test]
    fn empty_families_are_ignored() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        assert_eq!(
            resolve_queue_families(&families, |_| true).graphics,
            Some(1)
        );
    }

    #[test]
    fn shared_family_gets_a_single_queue() {
        let families = QueueFamilies {
            graphics: 0,
            present: 0,
            compute: Some(0),
            transfer: Some(2),
        };
        assert_eq!(families.unique(), vec![0, 2]);
    }

    #[test]
    fn unsuitable_device_lists_what_is_missing() {
        let support = DeviceSupport {
            indices: QueueFamilyIndices {
                graphics: Some(0),
                present: None,
                compute: None,
                transfer: Some(0),
            },
            swapchain: true,
            anisotropy: false,
        };
        let required = DeviceCapabilities::default()
            | DeviceCapabilities::COMPUTE
            | DeviceCapabilities::SAMPLER_ANISOTROPY;
        assert_eq!(
            support.check(required).unwrap_err(),
            vec!["present queue", "compute queue", "sampler anisotropy"]
        );
    }

    #[test]
    fn suitable_device_resolves_families() {
        let support = DeviceSupport {
            indices: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(1),
                compute: Some(0),
                transfer: Some(2),
            },
            swapchain: true,
            anisotropy: true,
        };
        let families = support.check(DeviceCapabilities::all()).unwrap();
        assert_eq!(
            families,
            QueueFamilies {
                graphics: 0,
                present: 1,
                compute: Some(0),
                transfer: Some(2),
            }
        );
    }

    #[test]
    fn memory_type_must_match_bits_and_flags() {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        props.memory_types[0].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        props.memory_types[1].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        props.memory_types[2].property_flags =
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE;

        let local = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        assert_eq!(select_memory_type(&props, 0b111, local), Some(1));
        assert_eq!(select_memory_type(&props, 0b101, local), Some(2));
        assert_eq!(select_memory_type(&props, 0b001, local), None);
    }
}
