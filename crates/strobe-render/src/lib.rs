// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

/// Knobs a backend reads once at construction.
#[derive(Clone, Debug)]
pub struct RenderSettings {
    /// Colour the clear pulses towards; alpha is always 1.
    pub flash_color: [f32; 3],
    /// Frames per radian of the pulse (`|sin(frame / period)|`).
    pub flash_period_frames: f32,
    /// `None` waits forever on a slot's fence.
    pub fence_timeout: Option<Duration>,
    pub validation: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            flash_color: [0.0, 0.0, 1.0],
            flash_period_frames: 120.0,
            fence_timeout: None,
            validation: false,
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Record, submit and present one frame.
    fn render(&mut self) -> Result<()>;

    /// Frames fully handed to the presentation engine so far.
    fn frame_number(&self) -> u64;
}
