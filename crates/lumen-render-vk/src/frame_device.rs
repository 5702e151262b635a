// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;
use std::time::Duration;

use ash::khr::swapchain;
use ash::vk;
use lumen_render::{AcquireOutcome, FrameDevice, FrameSlot, PresentOutcome, WaitStatus};

use crate::command::CommandPool;
use crate::device::{Device, Queue};
use crate::error::{ResourceKind, VkError, VkResultExt};
use crate::swapchain::{acquire, present};

/// [`FrameDevice`] over a device and one swapchain generation. Replace it
/// whenever the swapchain is recreated.
pub struct VkFrameDevice {
    device: Arc<Device>,
    loader: swapchain::Device,
    chain: vk::SwapchainKHR,
    graphics: Queue,
    present: Queue,
}

impl VkFrameDevice {
    pub(crate) fn new(
        device: Arc<Device>,
        loader: swapchain::Device,
        chain: vk::SwapchainKHR,
        present: Queue,
    ) -> Self {
        let graphics = device.graphics_queue();
        Self {
            device,
            loader,
            chain,
            graphics,
            present,
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

impl FrameDevice for VkFrameDevice {
    type Error = VkError;
    type CommandBuffer = vk::CommandBuffer;
    type Semaphore = vk::Semaphore;
    type Fence = vk::Fence;

    fn wait_for_fence(
        &mut self,
        fence: vk::Fence,
        timeout: Duration,
    ) -> Result<WaitStatus, VkError> {
        // SAFETY: the fence belongs to this device
        match unsafe {
            self.device
                .raw()
                .wait_for_fences(&[fence], true, timeout_ns(timeout))
        } {
            Ok(()) => Ok(WaitStatus::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(WaitStatus::TimedOut),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(VkError::DeviceLost),
            Err(e) => Err(VkError::Sync(e)),
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<(), VkError> {
        // SAFETY: the fence is not part of any pending submission
        match unsafe { self.device.raw().reset_fences(&[fence]) } {
            Ok(()) => Ok(()),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(VkError::DeviceLost),
            Err(e) => Err(VkError::Sync(e)),
        }
    }

    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> Result<AcquireOutcome, VkError> {
        acquire(&self.loader, self.chain, signal, u64::MAX)
    }

    fn submit(
        &mut self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(), VkError> {
        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &command_buffer,
            signal_semaphore_count: 1,
            p_signal_semaphores: &signal,
            ..Default::default()
        };
        // SAFETY: pointers in `submit` outlive the call; the command buffer
        // is fully recorded and not pending
        unsafe {
            self.device
                .raw()
                .queue_submit(self.graphics.raw(), std::slice::from_ref(&submit), fence)
        }?;
        Ok(())
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<PresentOutcome, VkError> {
        present(&self.loader, self.present, self.chain, image_index, wait)
    }

    fn is_device_lost(error: &VkError) -> bool {
        error.is_device_lost()
    }
}

/// Owns every semaphore and fence it creates; destroys them on drop.
pub struct SyncObjects {
    device: Arc<Device>,
    semaphores: Vec<vk::Semaphore>,
    fences: Vec<vk::Fence>,
}

// Unsignaled: a slot's fence is only waited on after a submit.
fn fence_create_info() -> vk::FenceCreateInfo<'static> {
    vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::empty(),
        ..Default::default()
    }
}

impl SyncObjects {
    pub fn new(device: &Arc<Device>) -> Self {
        Self {
            device: Arc::clone(device),
            semaphores: Vec::new(),
            fences: Vec::new(),
        }
    }

    pub fn create_semaphore(&mut self) -> Result<vk::Semaphore, VkError> {
        let ci = vk::SemaphoreCreateInfo::default();
        // SAFETY: plain creation call
        let sem = unsafe { self.device.raw().create_semaphore(&ci, None) }
            .creating(ResourceKind::Semaphore)?;
        self.semaphores.push(sem);
        Ok(sem)
    }

    pub fn create_fence(&mut self) -> Result<vk::Fence, VkError> {
        // SAFETY: plain creation call
        let fence = unsafe { self.device.raw().create_fence(&fence_create_info(), None) }
            .creating(ResourceKind::Fence)?;
        self.fences.push(fence);
        Ok(fence)
    }

    pub fn semaphores(&self) -> &[vk::Semaphore] {
        &self.semaphores
    }

    pub fn fences(&self) -> &[vk::Fence] {
        &self.fences
    }
}

impl Drop for SyncObjects {
    fn drop(&mut self) {
        let d = self.device.raw();
        // SAFETY: the renderer waits every submitted fence before dropping
        unsafe {
            for &f in &self.fences {
                d.destroy_fence(f, None);
            }
            for &s in &self.semaphores {
                d.destroy_semaphore(s, None);
            }
        }
    }
}

/// `count` slots, each with its own command buffer, two semaphores and a
/// fence.
pub fn create_frame_slots(
    device: &Arc<Device>,
    pool: &CommandPool,
    count: usize,
) -> Result<(SyncObjects, Vec<FrameSlot<VkFrameDevice>>), VkError> {
    let command_buffers = pool.allocate(count as u32)?;
    let mut objects = SyncObjects::new(device);
    let mut slots = Vec::with_capacity(count);
    for cmd in command_buffers {
        let image_available = objects.create_semaphore()?;
        let render_finished = objects.create_semaphore()?;
        let in_flight = objects.create_fence()?;
        slots.push(FrameSlot::new(
            cmd,
            image_available,
            render_finished,
            in_flight,
        ));
    }
    Ok((objects, slots))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_start_unsignaled() {
        let ci = fence_create_info();
        assert_eq!(ci.s_type, vk::StructureType::FENCE_CREATE_INFO);
        assert!(!ci.flags.contains(vk::FenceCreateFlags::SIGNALED));
    }

    #[test]
    fn sync_objects_expose_creation_calls() {
        let _: fn(&mut SyncObjects) -> Result<vk::Semaphore, VkError> =
            SyncObjects::create_semaphore;
        let _: fn(&mut SyncObjects) -> Result<vk::Fence, VkError> = SyncObjects::create_fence;
    }

    #[test]
    fn fence_timeout_saturates() {
        assert_eq!(timeout_ns(Duration::from_millis(5)), 5_000_000);
        assert_eq!(timeout_ns(Duration::MAX), u64::MAX);
    }
}
