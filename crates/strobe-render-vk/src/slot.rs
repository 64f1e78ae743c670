// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::backend::{FrameBackend, FrameSubmission, Teardown};
use crate::error::{FrameError, FrameResult, VkResultExt};

/// Where a slot is in its reuse cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// No GPU work references the slot; the fence is signaled.
    Idle,
    /// Fence reset, command buffer open for this frame.
    Recording,
    /// Handed to the queue; the fence signals on completion.
    Submitted,
}

/// Resources one in-flight frame uses exclusively.
///
/// The fence is the lock: the host only touches the command buffer after
/// the fence says the slot's previous submission finished.
pub struct FrameSlot {
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    acquire_signal: vk::Semaphore,
    render_signal: vk::Semaphore,
    completion_fence: vk::Fence,
    state: SlotState,
    submissions: u64,
}

impl FrameSlot {
    /// Pool + primary buffer on `queue_family`, signaled fence, two binary
    /// semaphores. Anything created before a failure is released through
    /// `teardown` again.
    pub fn create<T: Teardown + ?Sized>(
        device: &ash::Device,
        queue_family: u32,
        teardown: &T,
    ) -> FrameResult<Self> {
        let mut slot = Self::from_handles(
            vk::CommandPool::null(),
            vk::CommandBuffer::null(),
            vk::Semaphore::null(),
            vk::Semaphore::null(),
            vk::Fence::null(),
        );
        match slot.create_handles(device, queue_family) {
            Ok(()) => {
                debug!("frame slot created (pool {:?})", slot.command_pool);
                Ok(slot)
            }
            Err(e) => {
                slot.destroy(teardown);
                Err(e)
            }
        }
    }

    fn create_handles(&mut self, device: &ash::Device, queue_family: u32) -> FrameResult<()> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        // Pre-signaled so the very first wait on this slot returns at once.
        let fence_info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        let sem_info = vk::SemaphoreCreateInfo::default();

        // SAFETY: `device` is a live logical device; every create info
        // outlives its call.
        unsafe {
            self.command_pool = device
                .create_command_pool(&pool_info, None)
                .op("vkCreateCommandPool")?;
            let alloc_info = vk::CommandBufferAllocateInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
                command_pool: self.command_pool,
                level: vk::CommandBufferLevel::PRIMARY,
                command_buffer_count: 1,
                ..Default::default()
            };
            self.command_buffer = device
                .allocate_command_buffers(&alloc_info)
                .op("vkAllocateCommandBuffers")?[0];
            self.completion_fence = device
                .create_fence(&fence_info, None)
                .op("vkCreateFence")?;
            self.acquire_signal = device
                .create_semaphore(&sem_info, None)
                .op("vkCreateSemaphore")?;
            self.render_signal = device
                .create_semaphore(&sem_info, None)
                .op("vkCreateSemaphore")?;
        }
        Ok(())
    }

    /// Wraps existing handles. The fence must have been created signaled.
    pub(crate) fn from_handles(
        command_pool: vk::CommandPool,
        command_buffer: vk::CommandBuffer,
        acquire_signal: vk::Semaphore,
        render_signal: vk::Semaphore,
        completion_fence: vk::Fence,
    ) -> Self {
        Self {
            command_pool,
            command_buffer,
            acquire_signal,
            render_signal,
            completion_fence,
            state: SlotState::Idle,
            submissions: 0,
        }
    }

    /// Step 1: block until the GPU is done with this slot's last submission.
    pub fn wait_available<B: FrameBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        timeout_ns: u64,
        slot_index: usize,
    ) -> FrameResult<()> {
        match backend.wait_for_fence(self.completion_fence, timeout_ns) {
            Ok(()) => {}
            Err(FrameError::Vk {
                result: vk::Result::TIMEOUT,
                ..
            }) => {
                return Err(FrameError::FenceTimeout {
                    slot: slot_index,
                    timeout_ns,
                })
            }
            Err(e) => return Err(e),
        }
        self.state = SlotState::Idle;
        Ok(())
    }

    /// Step 2: unsignal the fence and recycle the command buffer.
    pub fn reset<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> FrameResult<()> {
        debug_assert_eq!(self.state, SlotState::Idle, "reset before the fence wait");
        backend.reset_fence(self.completion_fence)?;
        backend.reset_command_buffer(self.command_buffer)?;
        self.state = SlotState::Recording;
        Ok(())
    }

    /// The submission for whatever was recorded since `reset`.
    pub fn submission(&self) -> FrameSubmission {
        FrameSubmission {
            command_buffer: self.command_buffer,
            wait: self.acquire_signal,
            wait_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            signal: self.render_signal,
            signal_stage: vk::PipelineStageFlags2::ALL_GRAPHICS,
            fence: self.completion_fence,
        }
    }

    /// The queue now owns the slot until the fence signals.
    pub fn mark_submitted(&mut self) {
        debug_assert_eq!(self.state, SlotState::Recording, "submit without recording");
        self.state = SlotState::Submitted;
        self.submissions += 1;
    }

    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    #[inline]
    pub fn acquire_signal(&self) -> vk::Semaphore {
        self.acquire_signal
    }

    #[inline]
    pub fn render_signal(&self) -> vk::Semaphore {
        self.render_signal
    }

    #[inline]
    pub fn completion_fence(&self) -> vk::Fence {
        self.completion_fence
    }

    #[inline]
    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    /// Reverse creation order. The device must be idle; each handle is
    /// released once and nulled so a second call does nothing. Handles that
    /// were never created (a failed `create`) are skipped.
    pub fn destroy<T: Teardown + ?Sized>(&mut self, gpu: &T) {
        if self.render_signal != vk::Semaphore::null() {
            gpu.destroy_semaphore(self.render_signal);
        }
        if self.acquire_signal != vk::Semaphore::null() {
            gpu.destroy_semaphore(self.acquire_signal);
        }
        if self.completion_fence != vk::Fence::null() {
            gpu.destroy_fence(self.completion_fence);
        }
        if self.command_pool != vk::CommandPool::null() {
            gpu.destroy_command_pool(self.command_pool);
        }
        self.render_signal = vk::Semaphore::null();
        self.acquire_signal = vk::Semaphore::null();
        self.completion_fence = vk::Fence::null();
        self.command_buffer = vk::CommandBuffer::null();
        self.command_pool = vk::CommandPool::null();
        debug!("frame slot destroyed");
    }
}
