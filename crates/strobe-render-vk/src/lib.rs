// SPDX-License-Identifier: CEPL-1.0
//! Frame lifecycle and GPU synchronization for a single Vulkan queue.
//!
//! [`FrameDriver`] runs the per-frame cycle over a [`FrameRing`] of
//! [`FrameSlot`]s and a [`PresentationSurface`]; [`VkRenderer`] wires it to a
//! real device through [`VkContext`] and [`AshBackend`].
#![deny(unsafe_op_in_unsafe_fn)]

pub mod backend;
pub mod context;
pub mod driver;
pub mod error;
pub mod layout;
pub mod ring;
pub mod slot;
pub mod surface;

#[cfg(test)]
pub(crate) mod testing;

use anyhow::{Context, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use strobe_render::{RenderSettings, RenderSize, Renderer};
use tracing::{info, warn};

pub use backend::{AshBackend, FrameBackend, FrameSubmission, Teardown};
pub use context::VkContext;
pub use driver::{ClearPattern, FrameDriver, FrameReport, StopSignal};
pub use error::{FrameError, FrameResult};
pub use ring::{FrameRing, FRAME_OVERLAP};
pub use slot::{FrameSlot, SlotState};
pub use surface::PresentationSurface;

/// Timeout handed to `vkWaitForFences`. `None` and zero both mean no limit.
pub fn fence_timeout_ns(settings: &RenderSettings) -> u64 {
    settings
        .fence_timeout
        .filter(|d| !d.is_zero())
        .map_or(u64::MAX, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

pub struct VkRenderer {
    driver: FrameDriver<AshBackend>,
    // Dropped after `driver`'s resources are released in `Drop`.
    ctx: VkContext,
}

impl VkRenderer {
    pub fn driver(&self) -> &FrameDriver<AshBackend> {
        &self.driver
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let ctx = VkContext::new(window, display, settings.validation)
            .context("Vulkan bootstrap")?;

        // Built first so partial failures below release through it.
        let backend = AshBackend::new(
            ctx.device().clone(),
            ctx.swapchain_loader().clone(),
            ctx.queue(),
        );

        let mut surface = PresentationSurface::create(&ctx, &backend, size.width, size.height)
            .context("presentation surface")?;

        let ring = FrameRing::try_new(
            |_| FrameSlot::create(ctx.device(), ctx.queue_family(), &backend),
            |mut slot| slot.destroy(&backend),
        );
        let ring = match ring {
            Ok(r) => r,
            Err(e) => {
                surface.destroy(&backend);
                return Err(e).context("frame slots");
            }
        };
        let driver = FrameDriver::new(
            backend,
            surface,
            ring,
            fence_timeout_ns(settings),
            ClearPattern::from(settings),
        );

        info!(
            "renderer ready: {} frames in flight, {} swapchain images",
            FRAME_OVERLAP,
            driver.surface().image_count()
        );
        Ok(Self { driver, ctx })
    }

    fn render(&mut self) -> Result<()> {
        let frame = self.driver.frame_number();
        self.driver
            .draw_frame()
            .with_context(|| format!("frame {frame}"))?;
        Ok(())
    }

    fn frame_number(&self) -> u64 {
        self.driver.frame_number()
    }
}

// STRICT TEARDOWN ORDER:
// - Wait for the queue to drain
// - Frame slots, newest first
// - Swapchain views, then the swapchain
// - The context drops last: device, surface, debug messenger, instance
impl Drop for VkRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            warn!("device not idle at teardown: {e}");
        }
        self.driver.destroy();
        info!("renderer shut down after {} frames", self.driver.frame_number());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn no_timeout_means_wait_forever() {
        assert_eq!(fence_timeout_ns(&RenderSettings::default()), u64::MAX);
    }

    #[test]
    fn timeout_converts_to_nanoseconds() {
        let s = RenderSettings {
            fence_timeout: Some(Duration::from_millis(250)),
            ..Default::default()
        };
        assert_eq!(fence_timeout_ns(&s), 250_000_000);
    }

    #[test]
    fn zero_timeout_means_wait_forever() {
        let s = RenderSettings {
            fence_timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        assert_eq!(fence_timeout_ns(&s), u64::MAX);
    }

    #[test]
    fn absurd_timeout_saturates() {
        let s = RenderSettings {
            fence_timeout: Some(Duration::MAX),
            ..Default::default()
        };
        assert_eq!(fence_timeout_ns(&s), u64::MAX);
    }
}
