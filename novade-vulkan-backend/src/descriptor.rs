//! The shared sampler and the descriptor sets that bind sampled images to the
//! blit pipeline.

use std::sync::Arc;

use ash::{vk, Device};

use crate::error::{Result, VkResultExt};

/// One combined-image-sampler binding per sampled image, all using the same
/// nearest-filtering sampler.
pub struct SamplerBindings {
    device: Arc<Device>,
    pub set_layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sampler: vk::Sampler,
}

impl SamplerBindings {
    pub fn new(device: Arc<Device>, capacity: u32) -> Result<Self> {
        let binding = vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT);
        let layout_info =
            vk::DescriptorSetLayoutCreateInfo::builder().bindings(std::slice::from_ref(&binding));
        let set_layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .vk_context("vkCreateDescriptorSetLayout")?;

        let pool_sizes = [vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(capacity)
            .build()];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(capacity)
            .pool_sizes(&pool_sizes);
        let pool = match unsafe { device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(result) => {
                unsafe { device.destroy_descriptor_set_layout(set_layout, None) };
                return Err(result).vk_context("vkCreateDescriptorPool");
            }
        };

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .min_lod(0.0)
            .max_lod(0.0);
        let sampler = match unsafe { device.create_sampler(&sampler_info, None) } {
            Ok(sampler) => sampler,
            Err(result) => {
                unsafe {
                    device.destroy_descriptor_pool(pool, None);
                    device.destroy_descriptor_set_layout(set_layout, None);
                }
                return Err(result).vk_context("vkCreateSampler");
            }
        };

        tracing::debug!(capacity, "Created sampler descriptor pool");
        Ok(Self { device, set_layout, pool, sampler })
    }

    /// Allocates a set pointing at `view`, expected in shader-read-only layout
    /// whenever it is sampled.
    pub fn allocate(&self, view: vk::ImageView) -> Result<vk::DescriptorSet> {
        let layouts = [self.set_layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let set = unsafe { self.device.allocate_descriptor_sets(&allocate_info) }
            .vk_context("vkAllocateDescriptorSets")?[0];

        let image_info = [vk::DescriptorImageInfo::builder()
            .sampler(self.sampler)
            .image_view(view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .build()];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);
        unsafe { self.device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
        Ok(set)
    }

    pub fn free(&self, set: vk::DescriptorSet) -> Result<()> {
        unsafe { self.device.free_descriptor_sets(self.pool, &[set]) }
            .vk_context("vkFreeDescriptorSets")
    }
}

impl Drop for SamplerBindings {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}
