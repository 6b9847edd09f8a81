//! The native feature set the compute layer relies on.
//!
//! Devices handed to [`Context::new`](crate::context::Context::new) must
//! have been created with every feature in [`DeviceFeatures`] enabled.
//! [`DeviceFeatures::enable`] fills in the feature structs for device
//! creation; [`DeviceFeatures::query`] and [`DeviceFeatures::missing`]
//! check an existing physical device.

use ash::vk;

/// One flag per required feature, named after the Vulkan field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceFeatures {
    // Vulkan 1.0
    pub shader_int64: bool,
    pub shader_int16: bool,
    pub texture_compression_bc: bool,
    pub shader_storage_image_read_without_format: bool,
    pub shader_storage_image_write_without_format: bool,
    pub shader_sampled_image_array_dynamic_indexing: bool,
    pub shader_storage_image_array_dynamic_indexing: bool,

    // Vulkan 1.1
    pub storage_buffer16_bit_access: bool,

    // Vulkan 1.2
    pub storage_buffer8_bit_access: bool,
    pub shader_int8: bool,
    pub descriptor_indexing: bool,
    pub shader_sampled_image_array_non_uniform_indexing: bool,
    pub shader_storage_image_array_non_uniform_indexing: bool,
    pub descriptor_binding_sampled_image_update_after_bind: bool,
    pub descriptor_binding_storage_image_update_after_bind: bool,
    pub descriptor_binding_update_unused_while_pending: bool,
    pub descriptor_binding_partially_bound: bool,
    pub runtime_descriptor_array: bool,
    pub scalar_block_layout: bool,
    pub timeline_semaphore: bool,
    pub buffer_device_address: bool,

    // Vulkan 1.3
    pub synchronization2: bool,
    pub dynamic_rendering: bool,
}

const FEATURE_COUNT: usize = 23;

impl DeviceFeatures {
    /// Every feature set.
    pub const REQUIRED: DeviceFeatures = DeviceFeatures {
        shader_int64: true,
        shader_int16: true,
        texture_compression_bc: true,
        shader_storage_image_read_without_format: true,
        shader_storage_image_write_without_format: true,
        shader_sampled_image_array_dynamic_indexing: true,
        shader_storage_image_array_dynamic_indexing: true,
        storage_buffer16_bit_access: true,
        storage_buffer8_bit_access: true,
        shader_int8: true,
        descriptor_indexing: true,
        shader_sampled_image_array_non_uniform_indexing: true,
        shader_storage_image_array_non_uniform_indexing: true,
        descriptor_binding_sampled_image_update_after_bind: true,
        descriptor_binding_storage_image_update_after_bind: true,
        descriptor_binding_update_unused_while_pending: true,
        descriptor_binding_partially_bound: true,
        runtime_descriptor_array: true,
        scalar_block_layout: true,
        timeline_semaphore: true,
        buffer_device_address: true,
        synchronization2: true,
        dynamic_rendering: true,
    };

    pub fn from_vk(
        core: &vk::PhysicalDeviceFeatures,
        v11: &vk::PhysicalDeviceVulkan11Features<'_>,
        v12: &vk::PhysicalDeviceVulkan12Features<'_>,
        v13: &vk::PhysicalDeviceVulkan13Features<'_>,
    ) -> Self {
        let on = |b: vk::Bool32| b == vk::TRUE;
        Self {
            shader_int64: on(core.shader_int64),
            shader_int16: on(core.shader_int16),
            texture_compression_bc: on(core.texture_compression_bc),
            shader_storage_image_read_without_format: on(
                core.shader_storage_image_read_without_format,
            ),
            shader_storage_image_write_without_format: on(
                core.shader_storage_image_write_without_format,
            ),
            shader_sampled_image_array_dynamic_indexing: on(
                core.shader_sampled_image_array_dynamic_indexing,
            ),
            shader_storage_image_array_dynamic_indexing: on(
                core.shader_storage_image_array_dynamic_indexing,
            ),
            storage_buffer16_bit_access: on(v11.storage_buffer16_bit_access),
            storage_buffer8_bit_access: on(v12.storage_buffer8_bit_access),
            shader_int8: on(v12.shader_int8),
            descriptor_indexing: on(v12.descriptor_indexing),
            shader_sampled_image_array_non_uniform_indexing: on(
                v12.shader_sampled_image_array_non_uniform_indexing,
            ),
            shader_storage_image_array_non_uniform_indexing: on(
                v12.shader_storage_image_array_non_uniform_indexing,
            ),
            descriptor_binding_sampled_image_update_after_bind: on(
                v12.descriptor_binding_sampled_image_update_after_bind,
            ),
            descriptor_binding_storage_image_update_after_bind: on(
                v12.descriptor_binding_storage_image_update_after_bind,
            ),
            descriptor_binding_update_unused_while_pending: on(
                v12.descriptor_binding_update_unused_while_pending,
            ),
            descriptor_binding_partially_bound: on(
                v12.descriptor_binding_partially_bound,
            ),
            runtime_descriptor_array: on(v12.runtime_descriptor_array),
            scalar_block_layout: on(v12.scalar_block_layout),
            timeline_semaphore: on(v12.timeline_semaphore),
            buffer_device_address: on(v12.buffer_device_address),
            synchronization2: on(v13.synchronization2),
            dynamic_rendering: on(v13.dynamic_rendering),
        }
    }

    /// Features supported by `physical_device`.
    ///
    /// # Safety
    /// `physical_device` must have been enumerated from `instance`, and the
    /// instance must have been created for API version 1.3 or later.
    pub unsafe fn query(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> Self {
        let mut v11 = vk::PhysicalDeviceVulkan11Features::default();
        let mut v12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut v13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut v11)
            .push_next(&mut v12)
            .push_next(&mut v13);
        // SAFETY: Caller guarantees provenance; the output chain lives for
        // the duration of the call.
        unsafe {
            instance
                .get_physical_device_features2(physical_device, &mut features2)
        };
        let core = features2.features;
        Self::from_vk(&core, &v11, &v12, &v13)
    }

    /// Every feature with its Vulkan field name, in declaration order.
    pub fn entries(&self) -> [(&'static str, bool); FEATURE_COUNT] {
        [
            ("shaderInt64", self.shader_int64),
            ("shaderInt16", self.shader_int16),
            ("textureCompressionBC", self.texture_compression_bc),
            (
                "shaderStorageImageReadWithoutFormat",
                self.shader_storage_image_read_without_format,
            ),
            (
                "shaderStorageImageWriteWithoutFormat",
                self.shader_storage_image_write_without_format,
            ),
            (
                "shaderSampledImageArrayDynamicIndexing",
                self.shader_sampled_image_array_dynamic_indexing,
            ),
            (
                "shaderStorageImageArrayDynamicIndexing",
                self.shader_storage_image_array_dynamic_indexing,
            ),
            ("storageBuffer16BitAccess", self.storage_buffer16_bit_access),
            ("storageBuffer8BitAccess", self.storage_buffer8_bit_access),
            ("shaderInt8", self.shader_int8),
            ("descriptorIndexing", self.descriptor_indexing),
            (
                "shaderSampledImageArrayNonUniformIndexing",
                self.shader_sampled_image_array_non_uniform_indexing,
            ),
            (
                "shaderStorageImageArrayNonUniformIndexing",
                self.shader_storage_image_array_non_uniform_indexing,
            ),
            (
                "descriptorBindingSampledImageUpdateAfterBind",
                self.descriptor_binding_sampled_image_update_after_bind,
            ),
            (
                "descriptorBindingStorageImageUpdateAfterBind",
                self.descriptor_binding_storage_image_update_after_bind,
            ),
            (
                "descriptorBindingUpdateUnusedWhilePending",
                self.descriptor_binding_update_unused_while_pending,
            ),
            (
                "descriptorBindingPartiallyBound",
                self.descriptor_binding_partially_bound,
            ),
            ("runtimeDescriptorArray", self.runtime_descriptor_array),
            ("scalarBlockLayout", self.scalar_block_layout),
            ("timelineSemaphore", self.timeline_semaphore),
            ("bufferDeviceAddress", self.buffer_device_address),
            ("synchronization2", self.synchronization2),
            ("dynamicRendering", self.dynamic_rendering),
        ]
    }

    /// Names of required features this set lacks.
    pub fn missing(&self) -> Vec<&'static str> {
        self.entries()
            .into_iter()
            .filter_map(|(name, present)| (!present).then_some(name))
            .collect()
    }

    /// Turn on every required feature in the structs passed to device
    /// creation. Other fields are left untouched.
    pub fn enable(
        core: &mut vk::PhysicalDeviceFeatures,
        v11: &mut vk::PhysicalDeviceVulkan11Features<'_>,
        v12: &mut vk::PhysicalDeviceVulkan12Features<'_>,
        v13: &mut vk::PhysicalDeviceVulkan13Features<'_>,
    ) {
        core.shader_int64 = vk::TRUE;
        core.shader_int16 = vk::TRUE;
        core.texture_compression_bc = vk::TRUE;
        core.shader_storage_image_read_without_format = vk::TRUE;
        core.shader_storage_image_write_without_format = vk::TRUE;
        core.shader_sampled_image_array_dynamic_indexing = vk::TRUE;
        core.shader_storage_image_array_dynamic_indexing = vk::TRUE;

        v11.storage_buffer16_bit_access = vk::TRUE;

        v12.storage_buffer8_bit_access = vk::TRUE;
        v12.shader_int8 = vk::TRUE;
        v12.descriptor_indexing = vk::TRUE;
        v12.shader_sampled_image_array_non_uniform_indexing = vk::TRUE;
        v12.shader_storage_image_array_non_uniform_indexing = vk::TRUE;
        v12.descriptor_binding_sampled_image_update_after_bind = vk::TRUE;
        v12.descriptor_binding_storage_image_update_after_bind = vk::TRUE;
        v12.descriptor_binding_update_unused_while_pending = vk::TRUE;
        v12.descriptor_binding_partially_bound = vk::TRUE;
        v12.runtime_descriptor_array = vk::TRUE;
        v12.scalar_block_layout = vk::TRUE;
        v12.timeline_semaphore = vk::TRUE;
        v12.buffer_device_address = vk::TRUE;

        v13.synchronization2 = vk::TRUE;
        v13.dynamic_rendering = vk::TRUE;
    }
}
