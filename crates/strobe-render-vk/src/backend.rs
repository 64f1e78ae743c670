// SPDX-License-Identifier: CEPL-1.0
use ash::khr::swapchain;
use ash::vk;
use tracing::trace;

use crate::error::{FrameResult, VkResultExt};

/// One queue submission of a recorded frame.
///
/// Binary semaphores only; `wait` gates the first write to the swapchain image,
/// `signal` gates presentation, `fence` tells the host the slot is reusable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSubmission {
    pub command_buffer: vk::CommandBuffer,
    pub wait: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags2,
    pub signal: vk::Semaphore,
    pub signal_stage: vk::PipelineStageFlags2,
    pub fence: vk::Fence,
}

/// Device, queue and swapchain calls the per-frame protocol is built from.
///
/// `AshBackend` forwards to Vulkan; tests plug in a recording double.
pub trait FrameBackend {
    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> FrameResult<()>;
    fn reset_fence(&mut self, fence: vk::Fence) -> FrameResult<()>;
    fn reset_command_buffer(&mut self, cmd: vk::CommandBuffer) -> FrameResult<()>;

    /// Returns the image index; `signal` fires once the presentation engine
    /// has actually released the image.
    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> FrameResult<u32>;

    fn begin_command_buffer(&mut self, cmd: vk::CommandBuffer) -> FrameResult<()>;
    fn pipeline_barrier(&mut self, cmd: vk::CommandBuffer, barrier: &vk::ImageMemoryBarrier2<'_>);
    fn clear_color_image(
        &mut self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: [f32; 4],
    );
    fn end_command_buffer(&mut self, cmd: vk::CommandBuffer) -> FrameResult<()>;

    fn submit(&mut self, submission: &FrameSubmission) -> FrameResult<()>;
    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> FrameResult<()>;
}

/// Release of the handles a slot or swapchain owns.
///
/// Callers guarantee the device is idle and that each handle reaches here
/// once; `&self` so a creation path can clean up while something else still
/// borrows the backend.
pub trait Teardown {
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn destroy_fence(&self, fence: vk::Fence);
    /// Frees the pool's command buffers with it.
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn destroy_image_view(&self, view: vk::ImageView);
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
}

/// The real thing: synchronization2 calls on a single graphics queue.
pub struct AshBackend {
    device: ash::Device,
    swapchain_loader: swapchain::Device,
    queue: vk::Queue,
}

impl AshBackend {
    pub fn new(device: ash::Device, swapchain_loader: swapchain::Device, queue: vk::Queue) -> Self {
        Self {
            device,
            swapchain_loader,
            queue,
        }
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }
}

// SAFETY (whole impl): every handle reaching these calls was created from
// `self.device` and is kept alive by its owner until after device idle.
impl FrameBackend for AshBackend {
    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> FrameResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) }.op("vkWaitForFences")
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> FrameResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }.op("vkResetFences")
    }

    fn reset_command_buffer(&mut self, cmd: vk::CommandBuffer) -> FrameResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .op("vkResetCommandBuffer")
    }

    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> FrameResult<u32> {
        let (index, suboptimal) = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout_ns, signal, vk::Fence::null())
        }
        .op("vkAcquireNextImageKHR")?;
        if suboptimal {
            trace!(index, "acquired suboptimal swapchain image");
        }
        Ok(index)
    }

    fn begin_command_buffer(&mut self, cmd: vk::CommandBuffer) -> FrameResult<()> {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe { self.device.begin_command_buffer(cmd, &begin) }.op("vkBeginCommandBuffer")
    }

    fn pipeline_barrier(&mut self, cmd: vk::CommandBuffer, barrier: &vk::ImageMemoryBarrier2<'_>) {
        let dep = vk::DependencyInfo {
            s_type: vk::StructureType::DEPENDENCY_INFO,
            image_memory_barrier_count: 1,
            p_image_memory_barriers: barrier,
            ..Default::default()
        };
        unsafe { self.device.cmd_pipeline_barrier2(cmd, &dep) };
    }

    fn clear_color_image(
        &mut self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: [f32; 4],
    ) {
        let value = vk::ClearColorValue { float32: color };
        let range = crate::layout::full_range(vk::ImageAspectFlags::COLOR);
        unsafe {
            self.device
                .cmd_clear_color_image(cmd, image, layout, &value, std::slice::from_ref(&range))
        };
    }

    fn end_command_buffer(&mut self, cmd: vk::CommandBuffer) -> FrameResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }.op("vkEndCommandBuffer")
    }

    fn submit(&mut self, s: &FrameSubmission) -> FrameResult<()> {
        let cmd_info = vk::CommandBufferSubmitInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_SUBMIT_INFO,
            command_buffer: s.command_buffer,
            device_mask: 0,
            ..Default::default()
        };
        let wait_info = vk::SemaphoreSubmitInfo {
            s_type: vk::StructureType::SEMAPHORE_SUBMIT_INFO,
            semaphore: s.wait,
            stage_mask: s.wait_stage,
            ..Default::default()
        };
        let signal_info = vk::SemaphoreSubmitInfo {
            s_type: vk::StructureType::SEMAPHORE_SUBMIT_INFO,
            semaphore: s.signal,
            stage_mask: s.signal_stage,
            ..Default::default()
        };
        let submit = vk::SubmitInfo2 {
            s_type: vk::StructureType::SUBMIT_INFO_2,
            wait_semaphore_info_count: 1,
            p_wait_semaphore_infos: &wait_info,
            command_buffer_info_count: 1,
            p_command_buffer_infos: &cmd_info,
            signal_semaphore_info_count: 1,
            p_signal_semaphore_infos: &signal_info,
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit2(self.queue, std::slice::from_ref(&submit), s.fence)
        }
        .op("vkQueueSubmit2")
    }

    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> FrameResult<()> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        let suboptimal = unsafe { self.swapchain_loader.queue_present(self.queue, &present) }
            .op("vkQueuePresentKHR")?;
        if suboptimal {
            trace!(image_index, "presented to a suboptimal swapchain");
        }
        Ok(())
    }
}

// SAFETY (whole impl): the `Teardown` contract; device idle, single release.
impl Teardown for AshBackend {
    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }
}
