//! Device memory helpers shared by every image and staging-buffer path.

use ash::vk;

use crate::error::{BackendError, Result, VkResultExt};

/// Returns the first memory type whose bit is set in `type_bits` and whose
/// properties contain `required`.
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..properties.memory_type_count).find(|&index| {
        type_bits & (1 << index) != 0
            && properties.memory_types[index as usize]
                .property_flags
                .contains(required)
    })
}

/// Rounds `size` up to the next multiple of `alignment`.
///
/// An alignment of zero leaves the size unchanged.
pub fn align_up(size: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment == 0 {
        return size;
    }
    size.div_ceil(alignment) * alignment
}

/// Allocates and binds device-local memory for an image the driver will fully own.
pub(crate) fn allocate_image_memory(
    device: &ash::Device,
    properties: &vk::PhysicalDeviceMemoryProperties,
    image: vk::Image,
) -> Result<vk::DeviceMemory> {
    let requirements = unsafe { device.get_image_memory_requirements(image) };
    let memory_type_index = find_memory_type(
        properties,
        requirements.memory_type_bits,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .ok_or(BackendError::NoSuitableMemoryType("image"))?;

    let allocate_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);
    let memory = unsafe { device.allocate_memory(&allocate_info, None) }.vk_context("vkAllocateMemory")?;

    if let Err(result) = unsafe { device.bind_image_memory(image, memory, 0) } {
        unsafe { device.free_memory(memory, None) };
        return Err(BackendError::Vk { call: "vkBindImageMemory", result });
    }
    Ok(memory)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in properties.memory_types.iter_mut().zip(flags) {
            slot.property_flags = *flags;
        }
        properties
    }

    #[test]
    fn picks_first_type_matching_bits_and_flags() {
        let props = properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(1)
        );
        assert_eq!(
            find_memory_type(&props, 0b101, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(2)
        );
    }

    #[test]
    fn intersected_type_bits_can_leave_nothing() {
        let props = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        let image_bits = 0b01;
        let handle_bits = 0b10;
        assert_eq!(
            find_memory_type(&props, image_bits & handle_bits, vk::MemoryPropertyFlags::empty()),
            None
        );
    }

    #[test]
    fn align_up_rounds_to_alignment() {
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(100 * 100 * 4, 4096), 40960);
        assert_eq!(align_up(17, 0), 17);
    }
}
