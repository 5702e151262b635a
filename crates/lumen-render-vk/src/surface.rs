// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::error::{ResourceKind, VkError, VkResultExt};
use crate::instance::Instance;

/// A presentable window surface. Owned by the swapchain built on it.
pub struct Surface {
    instance: Arc<Instance>,
    raw: vk::SurfaceKHR,
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface").field("raw", &self.raw).finish()
    }
}

impl Surface {
    pub fn new(
        instance: &Arc<Instance>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Self, VkError> {
        // SAFETY: the handles come from a live window that outlives the
        // renderer; the instance was created with its required extensions.
        let raw = unsafe {
            ash_window::create_surface(instance.entry(), instance.raw(), display, window, None)
        }
        .creating(ResourceKind::Surface)?;
        Ok(Self {
            instance: Arc::clone(instance),
            raw,
        })
    }

    pub fn raw(&self) -> vk::SurfaceKHR {
        self.raw
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn supports_present(
        &self,
        phys: vk::PhysicalDevice,
        family: u32,
    ) -> Result<bool, VkError> {
        // SAFETY: phys was enumerated from the same instance
        Ok(unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_support(phys, family, self.raw)
        }?)
    }

    pub fn capabilities(
        &self,
        phys: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR, VkError> {
        // SAFETY: see supports_present
        Ok(unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_capabilities(phys, self.raw)
        }?)
    }

    pub fn formats(&self, phys: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>, VkError> {
        // SAFETY: see supports_present
        Ok(unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_formats(phys, self.raw)
        }?)
    }

    pub fn present_modes(
        &self,
        phys: vk::PhysicalDevice,
    ) -> Result<Vec<vk::PresentModeKHR>, VkError> {
        // SAFETY: see supports_present
        Ok(unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_present_modes(phys, self.raw)
        }?)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the swapchain owning this surface has already been destroyed
        unsafe {
            self.instance
                .surface_loader()
                .destroy_surface(self.raw, None)
        };
    }
}
