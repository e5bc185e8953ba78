//! Image layout state machine.
//!
//! Every image remembers the layout its last recorded access left it in.
//! Accessing it in a different way first requires a transition, which is a
//! single `VkImageMemoryBarrier2` whose source scope is derived from the
//! current layout and whose destination scope is derived from the target.

use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    Preinitialized,
    ColorAttachment,
    ShaderReadOnly,
    TransferSource,
    TransferDestination,
    PresentSource,
}

impl ImageLayout {
    pub fn to_vk(self) -> vk::ImageLayout {
        match self {
            ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
            ImageLayout::Preinitialized => vk::ImageLayout::PREINITIALIZED,
            ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageLayout::TransferSource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ImageLayout::TransferDestination => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageLayout::PresentSource => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    /// Stages and accesses that must complete before the image leaves this layout.
    fn source_scope(self) -> AccessScope {
        match self {
            ImageLayout::Undefined | ImageLayout::Preinitialized | ImageLayout::PresentSource => {
                AccessScope::NONE
            }
            other => other.access_scope(),
        }
    }

    /// Stages and accesses that wait for the image to enter this layout.
    fn destination_scope(self) -> AccessScope {
        match self {
            ImageLayout::PresentSource => AccessScope::NONE,
            ImageLayout::Undefined | ImageLayout::Preinitialized => {
                panic!("an image cannot be transitioned into {self:?}")
            }
            other => other.access_scope(),
        }
    }

    fn access_scope(self) -> AccessScope {
        match self {
            ImageLayout::ColorAttachment => AccessScope {
                stages: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                access: vk::AccessFlags2::COLOR_ATTACHMENT_READ
                    | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            },
            ImageLayout::ShaderReadOnly => AccessScope {
                stages: vk::PipelineStageFlags2::FRAGMENT_SHADER,
                access: vk::AccessFlags2::SHADER_SAMPLED_READ,
            },
            ImageLayout::TransferSource => AccessScope {
                stages: vk::PipelineStageFlags2::COPY,
                access: vk::AccessFlags2::TRANSFER_READ,
            },
            ImageLayout::TransferDestination => AccessScope {
                stages: vk::PipelineStageFlags2::COPY | vk::PipelineStageFlags2::CLEAR,
                access: vk::AccessFlags2::TRANSFER_WRITE,
            },
            ImageLayout::Undefined | ImageLayout::Preinitialized | ImageLayout::PresentSource => {
                AccessScope::NONE
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessScope {
    pub stages: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

impl AccessScope {
    pub const NONE: AccessScope = AccessScope {
        stages: vk::PipelineStageFlags2::NONE,
        access: vk::AccessFlags2::NONE,
    };
}

pub(crate) const COLOR_SUBRESOURCE_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Builds the barrier that moves `image` from `current` to `target`.
///
/// Returns `None` when the image already is in `target`.
///
/// # Panics
///
/// If `target` is `Undefined` or `Preinitialized`; nothing in the backend
/// ever asks for those.
pub fn plan_transition(
    image: vk::Image,
    current: ImageLayout,
    target: ImageLayout,
) -> Option<vk::ImageMemoryBarrier2> {
    if current == target {
        return None;
    }

    let src = current.source_scope();
    let dst = target.destination_scope();

    Some(
        vk::ImageMemoryBarrier2::builder()
            .src_stage_mask(src.stages)
            .src_access_mask(src.access)
            .dst_stage_mask(dst.stages)
            .dst_access_mask(dst.access)
            .old_layout(current.to_vk())
            .new_layout(target.to_vk())
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(COLOR_SUBRESOURCE_RANGE)
            .build(),
    )
}

/// Records the transition into `command_buffer` and updates `layout`.
///
/// The caller must have an open command batch.
pub fn record_transition(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    layout: &mut ImageLayout,
    target: ImageLayout,
) {
    let Some(barrier) = plan_transition(image, *layout, target) else {
        return;
    };

    let barriers = [barrier];
    let dependency_info = vk::DependencyInfo::builder().image_memory_barriers(&barriers);
    unsafe { device.cmd_pipeline_barrier2(command_buffer, &dependency_info) };

    *layout = target;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const IMAGE: vk::Image = vk::Image::null();

    #[rstest]
    #[case(ImageLayout::Undefined)]
    #[case(ImageLayout::Preinitialized)]
    #[case(ImageLayout::ColorAttachment)]
    #[case(ImageLayout::ShaderReadOnly)]
    #[case(ImageLayout::TransferSource)]
    #[case(ImageLayout::TransferDestination)]
    #[case(ImageLayout::PresentSource)]
    fn transition_to_current_layout_is_a_no_op(#[case] layout: ImageLayout) {
        assert!(plan_transition(IMAGE, layout, layout).is_none());
    }

    #[rstest]
    #[case(ImageLayout::Undefined)]
    #[case(ImageLayout::Preinitialized)]
    #[case(ImageLayout::PresentSource)]
    fn leaving_unused_layouts_waits_on_nothing(#[case] from: ImageLayout) {
        let barrier = plan_transition(IMAGE, from, ImageLayout::ColorAttachment).unwrap();
        assert_eq!(barrier.src_stage_mask, vk::PipelineStageFlags2::NONE);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::NONE);
        assert_eq!(barrier.dst_stage_mask, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(barrier.old_layout, from.to_vk());
        assert_eq!(barrier.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn transfer_destination_to_shader_read() {
        let barrier =
            plan_transition(IMAGE, ImageLayout::TransferDestination, ImageLayout::ShaderReadOnly)
                .unwrap();
        assert_eq!(
            barrier.src_stage_mask,
            vk::PipelineStageFlags2::COPY | vk::PipelineStageFlags2::CLEAR
        );
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(barrier.dst_stage_mask, vk::PipelineStageFlags2::FRAGMENT_SHADER);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::SHADER_SAMPLED_READ);
    }

    #[test]
    fn color_attachment_to_present_source() {
        let barrier =
            plan_transition(IMAGE, ImageLayout::ColorAttachment, ImageLayout::PresentSource)
                .unwrap();
        assert_eq!(
            barrier.src_access_mask,
            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
        );
        assert_eq!(barrier.dst_stage_mask, vk::PipelineStageFlags2::NONE);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::NONE);
        assert_eq!(barrier.subresource_range.aspect_mask, vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn transfer_source_to_transfer_destination() {
        let barrier =
            plan_transition(IMAGE, ImageLayout::TransferSource, ImageLayout::TransferDestination)
                .unwrap();
        assert_eq!(barrier.src_stage_mask, vk::PipelineStageFlags2::COPY);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::TRANSFER_READ);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
    }

    #[test]
    #[should_panic(expected = "cannot be transitioned into Undefined")]
    fn transition_into_undefined_panics() {
        plan_transition(IMAGE, ImageLayout::ShaderReadOnly, ImageLayout::Undefined);
    }

    #[test]
    #[should_panic(expected = "cannot be transitioned into Preinitialized")]
    fn transition_into_preinitialized_panics() {
        plan_transition(IMAGE, ImageLayout::ColorAttachment, ImageLayout::Preinitialized);
    }
}
