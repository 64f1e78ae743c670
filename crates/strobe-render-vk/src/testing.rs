// SPDX-License-Identifier: CEPL-1.0
//! A `FrameBackend` that records every call and models just enough of the
//! GPU to catch protocol mistakes: fences, binary semaphores, per-image
//! layouts and which swapchain images the host currently holds.
//!
//! Submitted work "completes" the moment the host waits on its fence.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use ash::vk::{self, Handle};

use crate::backend::{FrameBackend, FrameSubmission, Teardown};
use crate::error::{FrameError, FrameResult};
use crate::slot::FrameSlot;
use crate::surface::{PresentationSurface, SwapchainPlan, IMAGE_USAGE, PRESENT_MODE, SURFACE_FORMAT};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Call {
    WaitFence(vk::Fence),
    /// A pending submission retired during the preceding wait.
    Completed(vk::Fence),
    ResetFence(vk::Fence),
    ResetCommandBuffer(vk::CommandBuffer),
    Acquire {
        image_index: u32,
        signal: vk::Semaphore,
    },
    Begin(vk::CommandBuffer),
    Barrier {
        image: vk::Image,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },
    Clear {
        image: vk::Image,
        color: [f32; 4],
    },
    End(vk::CommandBuffer),
    Submit(FrameSubmission),
    Present {
        image_index: u32,
        wait: vk::Semaphore,
        layout: vk::ImageLayout,
    },
}

/// One handle handed to `Teardown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destroyed {
    Semaphore(vk::Semaphore),
    Fence(vk::Fence),
    CommandPool(vk::CommandPool),
    ImageView(vk::ImageView),
    Swapchain(vk::SwapchainKHR),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fence {
    Signaled,
    Unsignaled,
    /// Armed by a submit, signals when waited on.
    Pending,
}

pub struct RecordingBackend {
    calls: Vec<Call>,
    fences: HashMap<vk::Fence, Fence>,
    in_flight: HashMap<vk::CommandBuffer, vk::Fence>,
    signaled: HashSet<vk::Semaphore>,
    recording: Option<vk::CommandBuffer>,

    images: Vec<vk::Image>,
    layouts: Vec<vk::ImageLayout>,
    held: HashSet<u32>,
    next_image: u32,
    acquires: u64,
    out_of_date_at: Option<u64>,

    next_handle: u64,
    destroyed: RefCell<Vec<Destroyed>>,
}

impl RecordingBackend {
    pub fn new(image_count: u32) -> Self {
        let images: Vec<vk::Image> = (0..image_count)
            .map(|i| vk::Image::from_raw(0x1_0000 + u64::from(i)))
            .collect();
        Self {
            calls: Vec::new(),
            fences: HashMap::new(),
            in_flight: HashMap::new(),
            signaled: HashSet::new(),
            recording: None,
            layouts: vec![vk::ImageLayout::UNDEFINED; images.len()],
            images,
            held: HashSet::new(),
            next_image: 0,
            acquires: 0,
            out_of_date_at: None,
            next_handle: 0x100,
            destroyed: RefCell::new(Vec::new()),
        }
    }

    /// The `n`th acquisition (zero based) reports an out-of-date surface.
    pub fn out_of_date_at(mut self, n: u64) -> Self {
        self.out_of_date_at = Some(n);
        self
    }

    pub fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// A fence as `vkCreateFence(SIGNALED)` would hand it out.
    pub fn signaled_fence(&mut self) -> vk::Fence {
        let fence = vk::Fence::from_raw(self.handle());
        self.fences.insert(fence, Fence::Signaled);
        fence
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.fences.get(&fence) == Some(&Fence::Signaled)
    }

    /// Release order as seen through `Teardown`.
    pub fn destroyed(&self) -> Vec<Destroyed> {
        self.destroyed.borrow().clone()
    }

    /// Retires every pending submission, like `vkDeviceWaitIdle`.
    pub fn wait_idle(&mut self) {
        for state in self.fences.values_mut() {
            if *state == Fence::Pending {
                *state = Fence::Signaled;
            }
        }
        self.in_flight.clear();
    }

    fn release(&self, handle: Destroyed) {
        let mut log = self.destroyed.borrow_mut();
        assert!(!log.contains(&handle), "{handle:?} destroyed twice");
        log.push(handle);
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn layout(&self, image_index: u32) -> vk::ImageLayout {
        self.layouts[image_index as usize]
    }

    pub fn submits(&self) -> Vec<FrameSubmission> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Submit(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    fn image_slot(&self, image: vk::Image) -> usize {
        self.images
            .iter()
            .position(|&i| i == image)
            .unwrap_or_else(|| panic!("unknown image {image:?}"))
    }

    fn fence_state(&self, fence: vk::Fence) -> Fence {
        *self
            .fences
            .get(&fence)
            .unwrap_or_else(|| panic!("unknown fence {fence:?}"))
    }
}

impl FrameBackend for RecordingBackend {
    fn wait_for_fence(&mut self, fence: vk::Fence, _timeout_ns: u64) -> FrameResult<()> {
        self.calls.push(Call::WaitFence(fence));
        match self.fence_state(fence) {
            Fence::Signaled => Ok(()),
            Fence::Pending => {
                self.fences.insert(fence, Fence::Signaled);
                self.in_flight.retain(|_, f| *f != fence);
                self.calls.push(Call::Completed(fence));
                Ok(())
            }
            Fence::Unsignaled => Err(FrameError::Vk {
                op: "vkWaitForFences",
                result: vk::Result::TIMEOUT,
            }),
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> FrameResult<()> {
        assert_ne!(
            self.fence_state(fence),
            Fence::Pending,
            "reset of a fence the GPU still owns"
        );
        self.fences.insert(fence, Fence::Unsignaled);
        self.calls.push(Call::ResetFence(fence));
        Ok(())
    }

    fn reset_command_buffer(&mut self, cmd: vk::CommandBuffer) -> FrameResult<()> {
        assert!(
            !self.in_flight.contains_key(&cmd),
            "reset of a command buffer still executing"
        );
        self.calls.push(Call::ResetCommandBuffer(cmd));
        Ok(())
    }

    fn acquire_next_image(
        &mut self,
        _swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> FrameResult<u32> {
        let n = self.acquires;
        self.acquires += 1;
        if self.out_of_date_at == Some(n) {
            return Err(FrameError::SurfaceOutOfDate {
                op: "vkAcquireNextImageKHR",
            });
        }
        assert!(
            self.signaled.insert(signal),
            "acquire would signal a semaphore that is already signaled"
        );
        let image_index = self.next_image;
        self.next_image = (self.next_image + 1) % self.images.len() as u32;
        assert!(self.held.insert(image_index), "image {image_index} acquired twice");
        self.calls.push(Call::Acquire { image_index, signal });
        Ok(image_index)
    }

    fn begin_command_buffer(&mut self, cmd: vk::CommandBuffer) -> FrameResult<()> {
        assert!(self.recording.is_none(), "begin while another buffer records");
        self.recording = Some(cmd);
        self.calls.push(Call::Begin(cmd));
        Ok(())
    }

    fn pipeline_barrier(&mut self, cmd: vk::CommandBuffer, barrier: &vk::ImageMemoryBarrier2<'_>) {
        assert_eq!(self.recording, Some(cmd), "barrier outside recording");
        let i = self.image_slot(barrier.image);
        if barrier.old_layout != vk::ImageLayout::UNDEFINED {
            assert_eq!(self.layouts[i], barrier.old_layout, "barrier from the wrong layout");
        }
        self.layouts[i] = barrier.new_layout;
        self.calls.push(Call::Barrier {
            image: barrier.image,
            from: barrier.old_layout,
            to: barrier.new_layout,
        });
    }

    fn clear_color_image(
        &mut self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: [f32; 4],
    ) {
        assert_eq!(self.recording, Some(cmd), "clear outside recording");
        let i = self.image_slot(image);
        assert_eq!(layout, vk::ImageLayout::GENERAL);
        assert_eq!(self.layouts[i], layout, "clear in a layout the image is not in");
        self.calls.push(Call::Clear { image, color });
    }

    fn end_command_buffer(&mut self, cmd: vk::CommandBuffer) -> FrameResult<()> {
        assert_eq!(self.recording.take(), Some(cmd), "end without begin");
        self.calls.push(Call::End(cmd));
        Ok(())
    }

    fn submit(&mut self, s: &FrameSubmission) -> FrameResult<()> {
        assert!(self.recording.is_none(), "submit while recording");
        assert_eq!(
            self.fence_state(s.fence),
            Fence::Unsignaled,
            "submit with a fence that was not reset"
        );
        assert!(self.signaled.remove(&s.wait), "submit waits on an unsignaled semaphore");
        assert!(self.signaled.insert(s.signal), "submit re-signals a signaled semaphore");
        self.fences.insert(s.fence, Fence::Pending);
        self.in_flight.insert(s.command_buffer, s.fence);
        self.calls.push(Call::Submit(*s));
        Ok(())
    }

    fn present(
        &mut self,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> FrameResult<()> {
        assert!(self.signaled.remove(&wait), "present waits on an unsignaled semaphore");
        assert!(self.held.remove(&image_index), "present of an image never acquired");
        self.calls.push(Call::Present {
            image_index,
            wait,
            layout: self.layout(image_index),
        });
        Ok(())
    }
}

impl Teardown for RecordingBackend {
    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.release(Destroyed::Semaphore(semaphore));
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        if let Some(state) = self.fences.get(&fence) {
            assert_ne!(*state, Fence::Pending, "destroy of a fence still in flight");
        }
        self.release(Destroyed::Fence(fence));
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        assert!(
            self.in_flight.is_empty(),
            "command pool destroyed while buffers execute"
        );
        self.release(Destroyed::CommandPool(pool));
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.release(Destroyed::ImageView(view));
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        assert!(self.held.is_empty(), "swapchain destroyed with an image acquired");
        self.release(Destroyed::Swapchain(swapchain));
    }
}

/// A slot wired to fresh fake handles, fence pre-signaled.
pub fn fake_slot(gpu: &mut RecordingBackend, index: usize) -> FrameSlot {
    let base = 0x10_0000 * (index as u64 + 1);
    FrameSlot::from_handles(
        vk::CommandPool::from_raw(base + 1),
        vk::CommandBuffer::from_raw(base + 2),
        vk::Semaphore::from_raw(base + 3),
        vk::Semaphore::from_raw(base + 4),
        gpu.signaled_fence(),
    )
}

/// A 1700x900 FIFO swapchain over the backend's images.
pub fn fake_surface(gpu: &mut RecordingBackend) -> PresentationSurface {
    let images = gpu.images().to_vec();
    let views = images
        .iter()
        .map(|_| vk::ImageView::from_raw(gpu.handle()))
        .collect();
    let plan = SwapchainPlan {
        format: SURFACE_FORMAT,
        present_mode: PRESENT_MODE,
        extent: vk::Extent2D {
            width: 1700,
            height: 900,
        },
        image_count: images.len() as u32,
        usage: IMAGE_USAGE,
        pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
    };
    PresentationSurface::from_parts(vk::SwapchainKHR::from_raw(0xCAFE), images, views, plan)
}
