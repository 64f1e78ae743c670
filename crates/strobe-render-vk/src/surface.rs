// SPDX-License-Identifier: CEPL-1.0
use ash::khr::swapchain;
use ash::vk;
use strobe_render::RenderSize;
use tracing::{debug, info};

use crate::backend::{FrameBackend, Teardown};
use crate::context::VkContext;
use crate::error::{FrameError, FrameResult, VkResultExt};

/// Image format every swapchain uses; no negotiation on the hot path.
pub const SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Vertical sync; the only mode every implementation must expose.
pub const PRESENT_MODE: vk::PresentModeKHR = vk::PresentModeKHR::FIFO;

/// Clears go through the transfer path, rendering through attachments.
pub const IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw() | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// Host waits for the presentation engine as long as it takes.
pub const ACQUIRE_TIMEOUT_NS: u64 = u64::MAX;

/// Everything needed to fill a `VkSwapchainCreateInfoKHR`.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainPlan {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub usage: vk::ImageUsageFlags,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Images the presentation engine needs to run `mode` without stalling.
pub fn required_image_count(mode: vk::PresentModeKHR) -> u32 {
    match mode {
        vk::PresentModeKHR::MAILBOX => 3,
        vk::PresentModeKHR::IMMEDIATE => 1,
        _ => 2,
    }
}

/// `current_extent` wins unless the surface lets the swapchain pick.
pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// Checks the fixed format/mode/usage against what the surface offers.
pub fn plan_swapchain(
    caps: &vk::SurfaceCapabilitiesKHR,
    formats: &[vk::SurfaceFormatKHR],
    modes: &[vk::PresentModeKHR],
    want: RenderSize,
) -> FrameResult<SwapchainPlan> {
    let has_format = formats.iter().any(|f| {
        f.format == SURFACE_FORMAT.format && f.color_space == SURFACE_FORMAT.color_space
    });
    if !has_format {
        return Err(FrameError::SurfaceCreation(format!(
            "surface does not offer {:?}/{:?}",
            SURFACE_FORMAT.format, SURFACE_FORMAT.color_space
        )));
    }
    if !modes.contains(&PRESENT_MODE) {
        return Err(FrameError::SurfaceCreation(format!(
            "surface does not offer present mode {PRESENT_MODE:?}"
        )));
    }
    if !caps.supported_usage_flags.contains(IMAGE_USAGE) {
        return Err(FrameError::SurfaceCreation(format!(
            "swapchain images cannot be used as {IMAGE_USAGE:?}"
        )));
    }

    let extent = extent_from_caps(caps, want);
    if extent.width == 0 || extent.height == 0 {
        return Err(FrameError::SurfaceCreation(format!(
            "zero-sized extent {}x{}",
            extent.width, extent.height
        )));
    }

    let mut image_count = required_image_count(PRESENT_MODE).max(caps.min_image_count);
    if caps.max_image_count != 0 {
        image_count = image_count.min(caps.max_image_count);
    }

    let pre_transform = if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    };

    Ok(SwapchainPlan {
        format: SURFACE_FORMAT,
        present_mode: PRESENT_MODE,
        extent,
        image_count,
        usage: IMAGE_USAGE,
        pre_transform,
    })
}

/// The swapchain, its images and one colour view per image.
///
/// Immutable once built. To rebuild, `destroy` and `create` again.
pub struct PresentationSurface {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    plan: SwapchainPlan,
}

impl PresentationSurface {
    /// Views or images failing after the swapchain exists release the
    /// swapchain and every view made so far through `teardown`.
    pub fn create<T: Teardown + ?Sized>(
        ctx: &VkContext,
        teardown: &T,
        width: u32,
        height: u32,
    ) -> FrameResult<Self> {
        let want = RenderSize { width, height };
        let surf = ctx.surface_loader();
        // SAFETY: physical device and surface belong to the live instance in `ctx`.
        let (caps, formats, modes) = unsafe {
            (
                surf.get_physical_device_surface_capabilities(ctx.phys(), ctx.surface())
                    .op("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                surf.get_physical_device_surface_formats(ctx.phys(), ctx.surface())
                    .op("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
                surf.get_physical_device_surface_present_modes(ctx.phys(), ctx.surface())
                    .op("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
            )
        };
        let plan = plan_swapchain(&caps, &formats, &modes, want)?;

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface(),
            min_image_count: plan.image_count,
            image_format: plan.format.format,
            image_color_space: plan.format.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: plan.usage,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: plan.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            ..Default::default()
        };

        let loader = ctx.swapchain_loader();
        let swapchain = unsafe { loader.create_swapchain(&info, None) }
            .map_err(|e| FrameError::SurfaceCreation(format!("vkCreateSwapchainKHR: {e}")))?;

        let mut surface = Self::from_parts(swapchain, Vec::new(), Vec::new(), plan);
        if let Err(e) = surface.create_images(ctx.device(), loader) {
            surface.destroy(teardown);
            return Err(e);
        }

        info!(
            "swapchain ready: {}x{} {:?} {:?}, {} images (asked for {})",
            plan.extent.width,
            plan.extent.height,
            plan.format.format,
            plan.present_mode,
            surface.images.len(),
            plan.image_count
        );
        Ok(surface)
    }

    fn create_images(&mut self, device: &ash::Device, loader: &swapchain::Device) -> FrameResult<()> {
        self.images = unsafe { loader.get_swapchain_images(self.swapchain) }
            .op("vkGetSwapchainImagesKHR")?;
        if self.images.is_empty() {
            return Err(FrameError::SurfaceCreation("swapchain has no images".into()));
        }

        self.views.reserve(self.images.len());
        for &image in &self.images {
            let info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: self.plan.format.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view = unsafe { device.create_image_view(&info, None) }.op("vkCreateImageView")?;
            self.views.push(view);
        }
        Ok(())
    }

    pub(crate) fn from_parts(
        swapchain: vk::SwapchainKHR,
        images: Vec<vk::Image>,
        views: Vec<vk::ImageView>,
        plan: SwapchainPlan,
    ) -> Self {
        Self {
            swapchain,
            images,
            views,
            plan,
        }
    }

    /// Index of the next image to render into. `signal` fires once the
    /// presentation engine has let go of it, which may be after this returns.
    pub fn acquire_next<B: FrameBackend + ?Sized>(
        &self,
        backend: &mut B,
        signal: vk::Semaphore,
    ) -> FrameResult<u32> {
        backend.acquire_next_image(self.swapchain, ACQUIRE_TIMEOUT_NS, signal)
    }

    pub fn present<B: FrameBackend + ?Sized>(
        &self,
        backend: &mut B,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> FrameResult<()> {
        backend.present(self.swapchain, image_index, wait)
    }

    #[inline]
    pub fn image(&self, index: u32) -> vk::Image {
        self.images[index as usize]
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn format(&self) -> vk::Format {
        self.plan.format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.plan.extent
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.plan.present_mode
    }

    pub fn is_destroyed(&self) -> bool {
        self.swapchain == vk::SwapchainKHR::null()
    }

    /// Views newest first, then the swapchain. Call with the device idle and
    /// before the device goes away; later calls are no-ops.
    pub fn destroy<T: Teardown + ?Sized>(&mut self, gpu: &T) {
        if self.is_destroyed() {
            return;
        }
        for view in self.views.drain(..).rev() {
            gpu.destroy_image_view(view);
        }
        gpu.destroy_swapchain(self.swapchain);
        self.images.clear();
        self.swapchain = vk::SwapchainKHR::null();
        debug!("swapchain destroyed");
    }
}
