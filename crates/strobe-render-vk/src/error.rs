// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// Everything that can go wrong while bootstrapping or driving frames.
///
/// None of these are recovered from inside this crate; they bubble up to the
/// caller, which decides the process policy.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Instance/device/surface negotiation failed before the frame loop.
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("surface creation failed: {0}")]
    SurfaceCreation(String),

    /// The swapchain no longer matches the window.
    #[error("surface out of date during {op}")]
    SurfaceOutOfDate { op: &'static str },

    #[error("fence of frame slot {slot} not signaled within {timeout_ns}ns")]
    FenceTimeout { slot: usize, timeout_ns: u64 },

    #[error("{op} failed: {result}")]
    Vk {
        op: &'static str,
        result: vk::Result,
    },
}

pub type FrameResult<T> = std::result::Result<T, FrameError>;

/// Tags a raw Vulkan result with the call that produced it.
pub trait VkResultExt<T> {
    fn op(self, op: &'static str) -> FrameResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn op(self, op: &'static str) -> FrameResult<T> {
        self.map_err(|result| match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => FrameError::SurfaceOutOfDate { op },
            result => FrameError::Vk { op, result },
        })
    }
}
