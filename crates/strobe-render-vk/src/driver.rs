// SPDX-License-Identifier: CEPL-1.0
//! The per-frame cycle.
//!
//! One host thread drives everything. Per frame, in this order:
//! wait for the slot's fence, reset it, acquire an image, record, submit,
//! present, advance the counter. An error at any step returns at once; the
//! steps after it do not run and the counter stays put.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ash::vk;
use strobe_render::RenderSettings;
use tracing::{debug, trace};

use crate::backend::{FrameBackend, Teardown};
use crate::error::FrameResult;
use crate::layout::transition_image;
use crate::ring::FrameRing;
use crate::slot::FrameSlot;
use crate::surface::PresentationSurface;

/// Background colour that pulses with the frame counter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearPattern {
    color: [f32; 3],
    period_frames: f32,
}

impl ClearPattern {
    pub fn new(color: [f32; 3], period_frames: f32) -> Self {
        Self {
            color,
            period_frames: period_frames.max(1.0),
        }
    }

    /// `color * |sin(frame / period)|`, opaque.
    pub fn color_for(&self, frame: u64) -> [f32; 4] {
        let flash = (frame as f32 / self.period_frames).sin().abs();
        let [r, g, b] = self.color;
        [r * flash, g * flash, b * flash, 1.0]
    }
}

impl Default for ClearPattern {
    fn default() -> Self {
        Self::from(&RenderSettings::default())
    }
}

impl From<&RenderSettings> for ClearPattern {
    fn from(s: &RenderSettings) -> Self {
        Self::new(s.flash_color, s.flash_period_frames)
    }
}

/// What one successful cycle did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    pub slot: usize,
    pub image_index: u32,
}

/// Cooperative shutdown flag, checked once per cycle before any GPU work.
///
/// Clones share the flag, so a window loop, a signal handler or another
/// thread can end a `FrameDriver::run` or a per-event render loop.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct FrameDriver<B: FrameBackend> {
    backend: B,
    surface: PresentationSurface,
    ring: FrameRing<FrameSlot>,
    frame_number: u64,
    fence_timeout_ns: u64,
    pattern: ClearPattern,
}

impl<B: FrameBackend> FrameDriver<B> {
    /// `fence_timeout_ns = u64::MAX` waits forever.
    pub fn new(
        backend: B,
        surface: PresentationSurface,
        ring: FrameRing<FrameSlot>,
        fence_timeout_ns: u64,
        pattern: ClearPattern,
    ) -> Self {
        Self {
            backend,
            surface,
            ring,
            frame_number: 0,
            fence_timeout_ns,
            pattern,
        }
    }

    pub fn draw_frame(&mut self) -> FrameResult<FrameReport> {
        let frame = self.frame_number;
        let slot_index = self.ring.index_for(frame);
        let slot = self.ring.slot_for_mut(frame);
        let gpu = &mut self.backend;

        slot.wait_available(gpu, self.fence_timeout_ns, slot_index)?;
        slot.reset(gpu)?;

        let image_index = self.surface.acquire_next(gpu, slot.acquire_signal())?;
        let image = self.surface.image(image_index);

        // Contents are overwritten, so the old layout can always be dropped.
        let cmd = slot.command_buffer();
        gpu.begin_command_buffer(cmd)?;
        transition_image(
            gpu,
            cmd,
            image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
        );
        gpu.clear_color_image(
            cmd,
            image,
            vk::ImageLayout::GENERAL,
            self.pattern.color_for(frame),
        );
        transition_image(
            gpu,
            cmd,
            image,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        gpu.end_command_buffer(cmd)?;

        gpu.submit(&slot.submission())?;
        slot.mark_submitted();

        self.surface.present(gpu, image_index, slot.render_signal())?;

        self.frame_number += 1;
        trace!(frame, slot = slot_index, image_index, "frame presented");
        Ok(FrameReport {
            frame,
            slot: slot_index,
            image_index,
        })
    }

    /// Headless entry point: draws back to back until `stop` is raised and
    /// returns how many frames this call drew. Windowed callers pace frames
    /// from their event loop with `draw_frame` and check the same signal.
    pub fn run(&mut self, stop: &StopSignal) -> FrameResult<u64> {
        let start = self.frame_number;
        while !stop.is_stopped() {
            self.draw_frame()?;
        }
        debug!("frame loop stopped at frame {}", self.frame_number);
        Ok(self.frame_number - start)
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn slots(&self) -> &FrameRing<FrameSlot> {
        &self.ring
    }

    pub fn surface(&self) -> &PresentationSurface {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut PresentationSurface {
        &mut self.surface
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: FrameBackend + Teardown> FrameDriver<B> {
    /// Slots newest first, then the surface. Device must be idle; safe to
    /// call twice.
    pub fn destroy(&mut self) {
        for slot in self.ring.iter_mut().rev() {
            slot.destroy(&self.backend);
        }
        self.surface.destroy(&self.backend);
    }
}
