// SPDX-License-Identifier: CEPL-1.0
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use crate::device::Device;
use crate::error::{ResourceKind, VkError, VkResultExt};

/// Driver pipeline cache, optionally persisted in a directory under a
/// name unique to the device and driver.
pub struct PipelineCache {
    device: Arc<Device>,
    raw: vk::PipelineCache,
    path: Option<PathBuf>,
}

/// `vk_pipeline_cache_<vendor>_<device>_<driver>_<uuid>.bin`
pub fn cache_file_name(props: &vk::PhysicalDeviceProperties) -> String {
    let mut uuid = String::with_capacity(props.pipeline_cache_uuid.len() * 2);
    for b in props.pipeline_cache_uuid {
        let _ = write!(uuid, "{b:02x}");
    }
    format!(
        "vk_pipeline_cache_{:04x}_{:04x}_{:08x}_{}.bin",
        props.vendor_id, props.device_id, props.driver_version, uuid
    )
}

impl PipelineCache {
    /// Seeds the cache from `dir` when a matching file exists. Without a
    /// directory the cache lives in memory only.
    pub fn load(device: &Arc<Device>, dir: Option<&Path>) -> Result<Self, VkError> {
        let path = dir.map(|d| d.join(cache_file_name(device.properties())));
        let data = path.as_deref().and_then(|p| std::fs::read(p).ok());

        let raw = match data.as_deref() {
            Some(bytes) => match create(device, bytes) {
                Ok(raw) => {
                    debug!("vk: pipeline cache seeded with {} bytes", bytes.len());
                    raw
                }
                Err(e) => {
                    warn!("vk: discarding unusable pipeline cache: {e}");
                    create(device, &[])?
                }
            },
            None => create(device, &[])?,
        };

        Ok(Self {
            device: Arc::clone(device),
            raw,
            path,
        })
    }

    pub fn raw(&self) -> vk::PipelineCache {
        self.raw
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        // SAFETY: the cache belongs to this device
        let bytes = match unsafe { self.device.raw().get_pipeline_cache_data(self.raw) } {
            Ok(bytes) => bytes,
            Err(e) => {
                // Some drivers refuse an empty cache.
                debug!("vk: pipeline cache not saved: {e}");
                return Ok(());
            }
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &bytes)
    }
}

fn create(device: &Device, initial: &[u8]) -> Result<vk::PipelineCache, VkError> {
    let ci = vk::PipelineCacheCreateInfo {
        s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
        initial_data_size: initial.len(),
        p_initial_data: initial.as_ptr().cast(),
        ..Default::default()
    };
    // SAFETY: initial outlives the call
    unsafe { device.raw().create_pipeline_cache(&ci, None) }.creating(ResourceKind::PipelineCache)
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        if let Some(path) = &self.path {
            if let Err(e) = self.save(path) {
                warn!("vk: failed to save pipeline cache {}: {e}", path.display());
            }
        }
        // SAFETY: pipelines created through the cache do not reference it
        unsafe { self.device.raw().destroy_pipeline_cache(self.raw, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_name_encodes_device_identity() {
        let mut props = vk::PhysicalDeviceProperties {
            vendor_id: 0x10de,
            device_id: 0x2684,
            driver_version: 0x0123_4567,
            ..Default::default()
        };
        props.pipeline_cache_uuid[0] = 0xab;
        props.pipeline_cache_uuid[15] = 0x01;
        assert_eq!(
            cache_file_name(&props),
            "vk_pipeline_cache_10de_2684_01234567_ab000000000000000000000000000001.bin"
        );
    }

    #[test]
    fn different_drivers_get_different_files() {
        let a = vk::PhysicalDeviceProperties {
            driver_version: 1,
            ..Default::default()
        };
        let b = vk::PhysicalDeviceProperties {
            driver_version: 2,
            ..Default::default()
        };
        assert_ne!(cache_file_name(&a), cache_file_name(&b));
    }
}
