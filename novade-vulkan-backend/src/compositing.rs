//! Draw and copy recording.
//!
//! Every operation is split into a pure planning step, which clips the
//! caller's region and decides what to record, and a recording step that
//! turns the plan into commands. An empty plan means there is nothing to do.

use ash::{vk, Device};

use crate::arena::ImageHandle;
use crate::image::Image;
use crate::layout::{record_transition, ImageLayout, COLOR_SUBRESOURCE_RANGE};
use crate::pipeline::{
    FillColor, GraphicsPipeline, Origin, RectConstants, TargetSize, COLOR_OFFSET, ORIGIN_OFFSET,
    RECT_OFFSET, TARGET_SIZE_OFFSET,
};
use crate::region::{Rect, Region};

/// A premultiplied RGBA colour, each channel in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub alpha: f32,
}

impl Color {
    pub const TRANSPARENT: Color = Color { red: 0.0, green: 0.0, blue: 0.0, alpha: 0.0 };

    pub const fn new(red: f32, green: f32, blue: f32, alpha: f32) -> Self {
        Self { red, green, blue, alpha }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.red, self.green, self.blue, self.alpha]
    }
}

/// What to draw in a blit.
#[derive(Debug, Clone)]
pub struct BlitArgs {
    pub source: ImageHandle,
    /// Destination pixels that may be touched.
    pub target_mask: Region,
}

/// Clipped geometry of a draw into a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DrawPlan {
    /// Bounding box of `region`; the render area.
    pub extents: Rect,
    pub region: Region,
}

/// Clips `mask` to a `target` sized image. `None` when nothing is left.
pub(crate) fn plan_draw(target: vk::Extent2D, mask: &Region) -> Option<DrawPlan> {
    let region = mask.intersect_rect(&Rect::from_size(target.width, target.height));
    let extents = region.extents()?;
    Some(DrawPlan { extents, region })
}

/// One `VkImageCopy` per rectangle of `region` (source coordinates) that
/// lands inside both images once shifted by `origin`.
pub(crate) fn plan_copy(
    origin: (i32, i32),
    source: vk::Extent2D,
    dest: vk::Extent2D,
    region: &Region,
) -> Vec<vk::ImageCopy> {
    let (dx, dy) = origin;
    let dest_in_source =
        Rect::from_size(dest.width, dest.height).translate(dx.saturating_neg(), dy.saturating_neg());
    region
        .intersect_rect(&dest_in_source)
        .intersect_rect(&Rect::from_size(source.width, source.height))
        .rects()
        .iter()
        .map(|rect| vk::ImageCopy {
            src_subresource: color_layers(),
            src_offset: vk::Offset3D { x: rect.x1, y: rect.y1, z: 0 },
            dst_subresource: color_layers(),
            dst_offset: vk::Offset3D { x: rect.x1 + dx, y: rect.y1 + dy, z: 0 },
            extent: vk::Extent3D { width: rect.width(), height: rect.height(), depth: 1 },
        })
        .collect()
}

fn color_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn to_rect2d(rect: &Rect) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: rect.x1, y: rect.y1 },
        extent: vk::Extent2D { width: rect.width(), height: rect.height() },
    }
}

fn rect_constants(rect: &Rect) -> RectConstants {
    RectConstants { x1: rect.x1, y1: rect.y1, x2: rect.x2, y2: rect.y2 }
}

/// Begins rendering into `dest` over the plan's extents and sets the dynamic
/// state every pipeline here shares.
fn begin_draw(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    pipeline: &GraphicsPipeline,
    dest: &Image,
    plan: &DrawPlan,
) {
    let color_attachments = [vk::RenderingAttachmentInfo::builder()
        .image_view(dest.view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::LOAD)
        .store_op(vk::AttachmentStoreOp::STORE)
        .build()];
    let rendering_info = vk::RenderingInfo::builder()
        .render_area(to_rect2d(&plan.extents))
        .layer_count(1)
        .color_attachments(&color_attachments);

    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: dest.width as f32,
        height: dest.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let target_size = TargetSize { width: dest.width, height: dest.height };

    unsafe {
        device.cmd_begin_rendering(command_buffer, &rendering_info);
        device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline.handle);
        device.cmd_set_viewport(command_buffer, 0, &[viewport]);
        device.cmd_set_scissor(command_buffer, 0, &[to_rect2d(&plan.extents)]);
        device.cmd_push_constants(
            command_buffer,
            pipeline.layout,
            vk::ShaderStageFlags::VERTEX,
            TARGET_SIZE_OFFSET,
            bytemuck::bytes_of(&target_size),
        );
    }
}

/// Draws one quad per rectangle of the plan and ends rendering.
fn draw_rects(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    pipeline: &GraphicsPipeline,
    plan: &DrawPlan,
) {
    unsafe {
        for rect in plan.region.rects() {
            device.cmd_push_constants(
                command_buffer,
                pipeline.layout,
                vk::ShaderStageFlags::VERTEX,
                RECT_OFFSET,
                bytemuck::bytes_of(&rect_constants(rect)),
            );
            device.cmd_draw(command_buffer, 4, 1, 0, 0);
        }
        device.cmd_end_rendering(command_buffer);
    }
}

/// Records a textured draw of `source` into `dest`.
pub(crate) fn record_blit(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    pipeline: &GraphicsPipeline,
    origin: (i32, i32),
    dest: &mut Image,
    source: &mut Image,
    plan: &DrawPlan,
) {
    let Some(descriptor_set) = source.descriptor_set else {
        panic!("blit source cannot be sampled");
    };

    record_transition(device, command_buffer, source.raw, &mut source.layout, ImageLayout::ShaderReadOnly);
    record_transition(device, command_buffer, dest.raw, &mut dest.layout, ImageLayout::ColorAttachment);

    begin_draw(device, command_buffer, pipeline, dest, plan);
    let origin = Origin { x: origin.0, y: origin.1 };
    unsafe {
        device.cmd_bind_descriptor_sets(
            command_buffer,
            vk::PipelineBindPoint::GRAPHICS,
            pipeline.layout,
            0,
            &[descriptor_set],
            &[],
        );
        device.cmd_push_constants(
            command_buffer,
            pipeline.layout,
            vk::ShaderStageFlags::VERTEX,
            ORIGIN_OFFSET,
            bytemuck::bytes_of(&origin),
        );
    }
    draw_rects(device, command_buffer, pipeline, plan);
}

/// Records a solid-colour fill of the plan's region.
pub(crate) fn record_fill(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    pipeline: &GraphicsPipeline,
    dest: &mut Image,
    color: Color,
    plan: &DrawPlan,
) {
    record_transition(device, command_buffer, dest.raw, &mut dest.layout, ImageLayout::ColorAttachment);

    begin_draw(device, command_buffer, pipeline, dest, plan);
    let fill_color = FillColor { rgba: color.to_array() };
    unsafe {
        device.cmd_push_constants(
            command_buffer,
            pipeline.layout,
            vk::ShaderStageFlags::FRAGMENT,
            COLOR_OFFSET,
            bytemuck::bytes_of(&fill_color),
        );
    }
    draw_rects(device, command_buffer, pipeline, plan);
}

pub(crate) fn record_copy(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    dest: &mut Image,
    source: &mut Image,
    regions: &[vk::ImageCopy],
) {
    record_transition(device, command_buffer, source.raw, &mut source.layout, ImageLayout::TransferSource);
    record_transition(device, command_buffer, dest.raw, &mut dest.layout, ImageLayout::TransferDestination);
    unsafe {
        device.cmd_copy_image(
            command_buffer,
            source.raw,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dest.raw,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            regions,
        );
    }
}

pub(crate) fn record_clear(device: &Device, command_buffer: vk::CommandBuffer, image: &mut Image, color: Color) {
    record_transition(device, command_buffer, image.raw, &mut image.layout, ImageLayout::TransferDestination);
    let clear_value = vk::ClearColorValue { float32: color.to_array() };
    unsafe {
        device.cmd_clear_color_image(
            command_buffer,
            image.raw,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &clear_value,
            &[COLOR_SUBRESOURCE_RANGE],
        );
    }
}
