// SPDX-License-Identifier: CEPL-1.0
//! Image layout transitions.
//!
//! Every barrier here uses the widest possible hazard scope: all prior
//! commands must finish writing before any later command reads or writes.
//! That is correct for any pair of layouts and slow on purpose; narrow the
//! stage/access masks per use once there is more than one pass to care about.

use ash::vk;

use crate::backend::FrameBackend;

/// Aspect implied by the layout an image is moving into.
pub fn aspect_for(layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    if layout == vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Every mip level and array layer of `aspect`.
pub fn full_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}

/// Barrier declaring `from -> to` for the whole image.
pub fn image_barrier(
    image: vk::Image,
    from: vk::ImageLayout,
    to: vk::ImageLayout,
) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2 {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
        src_stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
        src_access_mask: vk::AccessFlags2::MEMORY_WRITE,
        dst_stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
        dst_access_mask: vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ,
        old_layout: from,
        new_layout: to,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: full_range(aspect_for(to)),
        ..Default::default()
    }
}

/// Record a `from -> to` transition of `image` into `cmd`.
///
/// Recording only; nothing blocks on the host. The caller guarantees `from`
/// is the image's current layout or `UNDEFINED`.
pub fn transition_image<B: FrameBackend + ?Sized>(
    backend: &mut B,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    from: vk::ImageLayout,
    to: vk::ImageLayout,
) {
    backend.pipeline_barrier(cmd, &image_barrier(image, from, to));
}
