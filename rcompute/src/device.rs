//! Device wrapper ([`Device`]).
//!
//! `Device` wraps a `VkDevice` that was created outside this crate and
//! centralises the per-device state the compute layer needs: a
//! `gpu-allocator` allocator (behind a `Mutex`), the physical device
//! properties, and an optional debug-utils loader for object naming.
//!
//! The wrapped device is never destroyed here. Its owner (the caller, or
//! an [`OwnedDevice`](crate::instance::OwnedDevice) kept alive by the
//! context) is responsible for that.
//!
//! All raw Vulkan operations on the device handle are surfaced as
//! `unsafe fn` methods (`create_raw_*`, `destroy_raw_*`, `cmd_*`).
//! Higher-level wrappers in sibling modules call these rather than
//! accessing `ash::Device` directly.

use std::ffi::{CStr, CString};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::vk;
use gpu_allocator::{
    AllocationError, MemoryLocation,
    vulkan::{
        Allocation, AllocationCreateDesc, AllocationScheme, Allocator,
        AllocatorCreateDesc,
    },
};
use thiserror::Error;

/// Describes how an allocation will be accessed by CPU and GPU.
///
/// Passed to [`Device::allocate_memory`] to select the best-matching
/// Vulkan memory type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemoryUsage {
    /// GPU-only storage. Highest bandwidth; not CPU-mappable.
    GpuOnly,
    /// Persistently mapped, host-coherent memory that the GPU reads and
    /// writes through device addresses. Device-local types are preferred
    /// (resizable BAR and unified memory).
    HostMapped,
}

#[derive(Debug, Error)]
pub enum NameObjectError {
    #[error("Invalid Vulkan object name (contains interior NUL): {0}")]
    InvalidName(std::ffi::NulError),

    #[error("Vulkan error setting object name: {0}")]
    Vulkan(vk::Result),
}

/// A logical Vulkan device and its associated per-device state.
pub struct Device {
    allocator: Option<Mutex<Allocator>>,
    instance: ash::Instance,
    handle: ash::Device,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    debug_utils_device: Option<ash::ext::debug_utils::Device>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.handle.handle())
            .field("physical_device", &self.physical_device)
            .finish_non_exhaustive()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        tracing::debug!("Dropping device wrapper {:?}", self.handle.handle());
        // The allocator frees its memory blocks on drop, which must happen
        // while the device is alive. The device itself is owned elsewhere.
        self.allocator = None;
    }
}

impl Device {
    /// Wrap an externally created device.
    ///
    /// `debug_names` requests object naming through `VK_EXT_debug_utils`;
    /// it is disabled with a warning when the instance did not enable the
    /// extension.
    ///
    /// # Safety
    /// `device` must have been created from `physical_device`, which must
    /// have been enumerated from `instance`. Both must outlive the returned
    /// value. The device must have been created with the
    /// `bufferDeviceAddress` feature enabled.
    pub unsafe fn from_raw(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
        debug_names: bool,
    ) -> Result<Self, AllocationError> {
        // SAFETY: Caller guarantees physical_device came from instance.
        let properties =
            unsafe { instance.get_physical_device_properties(physical_device) };
        // SAFETY: Caller guarantees physical_device came from instance.
        let memory_properties = unsafe {
            instance.get_physical_device_memory_properties(physical_device)
        };

        let debug_utils_device = if debug_names {
            // SAFETY: device is a valid handle created from instance and
            // the name is a NUL-terminated literal.
            let probe = unsafe {
                (instance.fp_v1_0().get_device_proc_addr)(
                    device.handle(),
                    c"vkSetDebugUtilsObjectNameEXT".as_ptr(),
                )
            };
            if probe.is_some() {
                Some(ash::ext::debug_utils::Device::new(instance, device))
            } else {
                tracing::warn!(
                    "Debug names requested but VK_EXT_debug_utils is not \
                     enabled on the instance"
                );
                None
            }
        } else {
            None
        };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;

        Ok(Self {
            allocator: Some(Mutex::new(allocator)),
            instance: instance.clone(),
            handle: device.clone(),
            physical_device,
            properties,
            memory_properties,
            debug_utils_device,
        })
    }

    pub fn ash_device(&self) -> &ash::Device {
        &self.handle
    }

    pub fn ash_instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn raw_device(&self) -> vk::Device {
        self.handle.handle()
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Descriptor-indexing limits of the physical device.
    pub fn descriptor_indexing_properties(
        &self,
    ) -> vk::PhysicalDeviceDescriptorIndexingProperties<'static> {
        let mut indexing =
            vk::PhysicalDeviceDescriptorIndexingProperties::default();
        let mut props2 =
            vk::PhysicalDeviceProperties2::default().push_next(&mut indexing);
        // SAFETY: physical_device came from instance; props2 is a valid
        // output chain for the duration of the call.
        unsafe {
            self.instance.get_physical_device_properties2(
                self.physical_device,
                &mut props2,
            )
        };
        indexing.p_next = std::ptr::null_mut();
        indexing
    }

    /// Optimal-tiling features the device supports for `format`.
    pub fn optimal_tiling_features(
        &self,
        format: vk::Format,
    ) -> vk::FormatFeatureFlags {
        // SAFETY: physical_device came from instance.
        unsafe {
            self.instance.get_physical_device_format_properties(
                self.physical_device,
                format,
            )
        }
        .optimal_tiling_features
    }

    /// Score a memory type for a given usage; returns `None` if the
    /// type is incompatible.  Higher scores are more preferred.
    fn score_memory_type(
        flags: vk::MemoryPropertyFlags,
        usage: MemoryUsage,
    ) -> Option<u32> {
        use vk::MemoryPropertyFlags as F;
        let device_local = flags.contains(F::DEVICE_LOCAL);
        let host_visible = flags.contains(F::HOST_VISIBLE);
        let host_coherent = flags.contains(F::HOST_COHERENT);
        match usage {
            MemoryUsage::GpuOnly => {
                // Prefer pure VRAM; penalise HOST_VISIBLE (unified).
                device_local.then_some(if host_visible { 1 } else { 2 })
            }
            MemoryUsage::HostMapped => (host_visible && host_coherent)
                .then_some(if device_local { 2 } else { 1 }),
        }
    }

    fn allocator(&self) -> Result<MutexGuard<'_, Allocator>, AllocationError> {
        self.allocator
            .as_ref()
            .map(|a| a.lock().unwrap_or_else(PoisonError::into_inner))
            .ok_or_else(|| {
                AllocationError::Internal("allocator already torn down".into())
            })
    }

    /// Allocate device memory for the given requirements.
    ///
    /// Narrows `requirements.memory_type_bits` to the best-scoring type
    /// for `usage` before handing the request to the allocator. If no
    /// type scores, the allocator picks from the unmodified mask.
    pub fn allocate_memory(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        usage: MemoryUsage,
        linear: bool,
    ) -> Result<Allocation, AllocationError> {
        let requirements =
            match select_memory_type(&self.memory_properties, requirements, usage)
            {
                Some(idx) => vk::MemoryRequirements {
                    memory_type_bits: 1 << idx,
                    ..requirements
                },
                None => requirements,
            };
        let location = match usage {
            MemoryUsage::GpuOnly => MemoryLocation::GpuOnly,
            MemoryUsage::HostMapped => MemoryLocation::CpuToGpu,
        };
        self.allocator()?.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
    }

    pub fn free_memory(
        &self,
        allocation: Allocation,
    ) -> Result<(), AllocationError> {
        self.allocator()?.free(allocation)
    }

    /// Wait until all submitted work on this device has completed.
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        let _span = tracing::debug_span!("device_wait_idle").entered();
        // SAFETY: `self.handle` is a valid logical device for the lifetime of
        // `self`, and this call has no additional pointer preconditions.
        unsafe { self.handle.device_wait_idle() }
    }
}

/// Select the best memory type index for `requirements` and `usage`.
/// Among types with equal score the lowest index wins.
fn select_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    requirements: vk::MemoryRequirements,
    usage: MemoryUsage,
) -> Option<u32> {
    memory_properties.memory_types
        [..memory_properties.memory_type_count as usize]
        .iter()
        .enumerate()
        .filter(|(i, _)| requirements.memory_type_bits & (1 << i) != 0)
        .filter_map(|(i, ty)| {
            Device::score_memory_type(ty.property_flags, usage)
                .map(|s| (i as u32, s))
        })
        .max_by(|(i1, s1), (i2, s2)| s1.cmp(s2).then(i2.cmp(i1)))
        .map(|(i, _)| i)
}

// Debug naming functionality
impl Device {
    /// Set a Vulkan debug name for an object owned by this device.
    ///
    /// A no-op when naming is disabled or `name` is `None`.
    ///
    /// # Safety
    /// `object` must be a valid Vulkan handle created from this device (or a
    /// child object associated with this device) and must remain valid for the
    /// duration of the call.
    pub unsafe fn set_object_name<H>(
        &self,
        object: H,
        name: Option<&CStr>,
    ) -> Result<(), NameObjectError>
    where
        H: vk::Handle,
    {
        let Some(debug_utils) = self.debug_utils_device.as_ref() else {
            return Ok(());
        };

        let Some(name) = name else {
            return Ok(());
        };

        let object_name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(object)
            .object_name(name);

        // SAFETY: Caller guarantees object provenance and validity.
        unsafe { debug_utils.set_debug_utils_object_name(&object_name_info) }
            .map_err(NameObjectError::Vulkan)
    }

    /// Convenience helper to set a name from UTF-8 text.
    ///
    /// # Safety
    /// Same contract as [`set_object_name`](Self::set_object_name).
    pub unsafe fn set_object_name_str<H>(
        &self,
        object: H,
        name: Option<&str>,
    ) -> Result<(), NameObjectError>
    where
        H: vk::Handle,
    {
        if self.debug_utils_device.is_none() {
            return Ok(());
        }
        let name = name
            .map(CString::new)
            .transpose()
            .map_err(NameObjectError::InvalidName)?;

        // SAFETY: This method shares the same safety contract as
        // set_object_name.
        unsafe { self.set_object_name(object, name.as_deref()) }
    }
}

// Buffer and memory functionality
impl Device {
    /// # Safety
    /// `create_info` must be valid and reference only objects derived from
    /// this device. All referenced pointers must remain valid for the
    /// duration of the call.
    pub unsafe fn create_raw_buffer(
        &self,
        create_info: &vk::BufferCreateInfo<'_>,
    ) -> Result<vk::Buffer, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_buffer(create_info, None) }
    }

    /// # Safety
    /// `buffer` must be a valid handle created from this device and not yet
    /// destroyed. No in-flight GPU work may still reference `buffer`.
    pub unsafe fn destroy_raw_buffer(&self, buffer: vk::Buffer) {
        // SAFETY: Caller guarantees buffer provenance and drop ordering.
        unsafe { self.handle.destroy_buffer(buffer, None) };
    }

    /// # Safety
    /// `buffer` must be a valid handle created from this device.
    pub unsafe fn get_raw_buffer_memory_requirements(
        &self,
        buffer: vk::Buffer,
    ) -> vk::MemoryRequirements {
        // SAFETY: Caller guarantees buffer validity.
        unsafe { self.handle.get_buffer_memory_requirements(buffer) }
    }

    /// # Safety
    /// `buffer` and `memory` must both be valid handles created from this
    /// device. `offset` must satisfy alignment/size requirements from
    /// `vkGetBufferMemoryRequirements`.
    pub unsafe fn bind_raw_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees handle validity and offset constraints.
        unsafe { self.handle.bind_buffer_memory(buffer, memory, offset) }
    }

    /// # Safety
    /// `buffer` must be a valid buffer created with `SHADER_DEVICE_ADDRESS`
    /// usage and bound to memory.
    pub unsafe fn get_raw_buffer_device_address(
        &self,
        buffer: vk::Buffer,
    ) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
        // SAFETY: Caller guarantees buffer usage and binding state.
        unsafe { self.handle.get_buffer_device_address(&info) }
    }
}

// Image and sampler functionality
impl Device {
    /// # Safety
    /// `create_info` must be valid. All referenced pointers must remain
    /// valid for the duration of the call.
    pub unsafe fn create_raw_image(
        &self,
        create_info: &vk::ImageCreateInfo<'_>,
    ) -> Result<vk::Image, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_image(create_info, None) }
    }

    /// # Safety
    /// `image` must be a valid handle created from this device. All views
    /// of it must be destroyed first and no in-flight GPU work may still
    /// reference it.
    pub unsafe fn destroy_raw_image(&self, image: vk::Image) {
        // SAFETY: Caller guarantees image provenance and drop ordering.
        unsafe { self.handle.destroy_image(image, None) };
    }

    /// # Safety
    /// `image` must be a valid handle created from this device.
    pub unsafe fn get_raw_image_memory_requirements(
        &self,
        image: vk::Image,
    ) -> vk::MemoryRequirements {
        // SAFETY: Caller guarantees image validity.
        unsafe { self.handle.get_image_memory_requirements(image) }
    }

    /// # Safety
    /// `image` and `memory` must both be valid handles created from this
    /// device. `offset` must satisfy the image's memory requirements.
    pub unsafe fn bind_raw_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees handle validity and offset constraints.
        unsafe { self.handle.bind_image_memory(image, memory, offset) }
    }

    /// # Safety
    /// `create_info` must reference valid Vulkan objects derived from this
    /// device. Any referenced pointers must remain valid for the duration of
    /// the call.
    pub unsafe fn create_raw_image_view(
        &self,
        create_info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView, vk::Result> {
        // SAFETY: Caller guarantees create_info validity and provenance.
        unsafe { self.handle.create_image_view(create_info, None) }
    }

    /// # Safety
    /// `image_view` must be a valid handle derived from this device, and no
    /// in-flight GPU work may still reference it.
    pub unsafe fn destroy_raw_image_view(&self, image_view: vk::ImageView) {
        // SAFETY: Caller guarantees image_view provenance and drop ordering.
        unsafe { self.handle.destroy_image_view(image_view, None) };
    }

    /// # Safety
    /// `create_info` must be a valid sampler create info.
    pub unsafe fn create_raw_sampler(
        &self,
        create_info: &vk::SamplerCreateInfo<'_>,
    ) -> Result<vk::Sampler, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_sampler(create_info, None) }
    }

    /// # Safety
    /// `sampler` must be a valid handle created from this device, and no
    /// in-flight GPU work may still reference it.
    pub unsafe fn destroy_raw_sampler(&self, sampler: vk::Sampler) {
        // SAFETY: Caller guarantees sampler provenance and drop ordering.
        unsafe { self.handle.destroy_sampler(sampler, None) };
    }
}

// Shader module and pipeline functionality
impl Device {
    /// # Safety
    /// `create_info` must contain valid SPIR-V code. All referenced pointers
    /// must remain valid for the duration of the call.
    pub unsafe fn create_raw_shader_module(
        &self,
        create_info: &vk::ShaderModuleCreateInfo<'_>,
    ) -> Result<vk::ShaderModule, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_shader_module(create_info, None) }
    }

    /// # Safety
    /// `shader_module` must be a valid handle created from this device and
    /// not yet destroyed.
    pub unsafe fn destroy_raw_shader_module(
        &self,
        shader_module: vk::ShaderModule,
    ) {
        // SAFETY: Caller guarantees shader_module provenance.
        unsafe { self.handle.destroy_shader_module(shader_module, None) };
    }

    /// # Safety
    /// `create_info` must be a valid pipeline layout create info. All
    /// referenced descriptor set layouts must be valid handles created from
    /// this device.
    pub unsafe fn create_raw_pipeline_layout(
        &self,
        create_info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> Result<vk::PipelineLayout, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_pipeline_layout(create_info, None) }
    }

    /// # Safety
    /// `layout` must be a valid handle created from this device and not yet
    /// destroyed. No pipeline still using this layout may be in use.
    pub unsafe fn destroy_raw_pipeline_layout(
        &self,
        layout: vk::PipelineLayout,
    ) {
        // SAFETY: Caller guarantees layout provenance and drop ordering.
        unsafe { self.handle.destroy_pipeline_layout(layout, None) };
    }

    /// Create a single compute pipeline.
    ///
    /// On failure ash may return successfully created handles alongside
    /// the error; these are destroyed so callers never receive a mix of
    /// valid and invalid handles.
    ///
    /// # Safety
    /// `create_info` must reference a valid shader stage and pipeline
    /// layout, both derived from this device. All referenced pointers must
    /// remain valid for the duration of the call.
    pub unsafe fn create_raw_compute_pipeline(
        &self,
        create_info: &vk::ComputePipelineCreateInfo<'_>,
    ) -> Result<vk::Pipeline, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe {
            self.handle.create_compute_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(create_info),
                None,
            )
        }
        .map_err(|(partial, result)| {
            for p in partial {
                if p != vk::Pipeline::null() {
                    // SAFETY: p was just created by this device.
                    unsafe { self.handle.destroy_pipeline(p, None) };
                }
            }
            result
        })
        .and_then(|pipelines| {
            pipelines
                .into_iter()
                .next()
                .ok_or(vk::Result::ERROR_UNKNOWN)
        })
    }

    /// # Safety
    /// `pipeline` must be a valid handle created from this device and not yet
    /// destroyed. No in-flight GPU work may still reference the pipeline.
    pub unsafe fn destroy_raw_pipeline(&self, pipeline: vk::Pipeline) {
        // SAFETY: Caller guarantees pipeline provenance and drop ordering.
        unsafe { self.handle.destroy_pipeline(pipeline, None) };
    }
}

// Command pool functionality
impl Device {
    /// # Safety
    /// `create_info` must have a valid `queue_family_index` for this device.
    pub unsafe fn create_raw_command_pool(
        &self,
        create_info: &vk::CommandPoolCreateInfo<'_>,
    ) -> Result<vk::CommandPool, vk::Result> {
        // SAFETY: Caller guarantees create_info validity and queue
        // family provenance.
        unsafe { self.handle.create_command_pool(create_info, None) }
    }

    /// # Safety
    /// `pool` must be a valid handle created from this device and not yet
    /// destroyed. No command buffer allocated from it may be pending.
    pub unsafe fn destroy_raw_command_pool(&self, pool: vk::CommandPool) {
        // SAFETY: Caller guarantees pool provenance and drop ordering.
        unsafe { self.handle.destroy_command_pool(pool, None) };
    }

    /// # Safety
    /// `allocate_info.command_pool` must be a valid pool created from this
    /// device. `command_buffer_count` must be non-zero.
    pub unsafe fn allocate_raw_command_buffers(
        &self,
        allocate_info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> Result<Vec<vk::CommandBuffer>, vk::Result> {
        // SAFETY: Caller guarantees allocate_info validity and pool provenance.
        unsafe { self.handle.allocate_command_buffers(allocate_info) }
    }

    /// # Safety
    /// `command_buffer` must be in the initial state and must not be
    /// pending execution.
    pub unsafe fn begin_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::CommandBufferBeginInfo<'_>,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees command_buffer state and
        // begin_info validity.
        unsafe { self.handle.begin_command_buffer(command_buffer, begin_info) }
    }

    /// # Safety
    /// `command_buffer` must be in the recording state.
    pub unsafe fn end_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees command_buffer is in the recording state.
        unsafe { self.handle.end_command_buffer(command_buffer) }
    }

    /// # Safety
    /// `command_buffer` must not be pending execution on the GPU. The pool it
    /// was allocated from must have been created with
    /// `RESET_COMMAND_BUFFER`.
    pub unsafe fn reset_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferResetFlags,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees command_buffer is not pending
        // and pool flag is set.
        unsafe { self.handle.reset_command_buffer(command_buffer, flags) }
    }
}

// Semaphore functionality
impl Device {
    /// Create a timeline semaphore starting at `initial_value`.
    ///
    /// # Safety
    /// The device must have been created with the `timelineSemaphore`
    /// feature enabled.
    pub unsafe fn create_raw_timeline_semaphore(
        &self,
        initial_value: u64,
    ) -> Result<vk::Semaphore, vk::Result> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info =
            vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        // SAFETY: create_info is fully initialised and the type chain lives
        // for the duration of the call.
        unsafe { self.handle.create_semaphore(&create_info, None) }
    }

    /// # Safety
    /// `semaphore` must be a valid handle created from this device, and no
    /// pending queue operation may still reference it.
    pub unsafe fn destroy_raw_semaphore(&self, semaphore: vk::Semaphore) {
        // SAFETY: Caller guarantees semaphore provenance and drop ordering.
        unsafe { self.handle.destroy_semaphore(semaphore, None) };
    }

    /// Block until `semaphore` reaches `value` or `timeout` nanoseconds
    /// elapse.
    ///
    /// # Safety
    /// `semaphore` must be a valid timeline semaphore created from this
    /// device.
    pub unsafe fn wait_raw_semaphore(
        &self,
        semaphore: vk::Semaphore,
        value: u64,
        timeout: u64,
    ) -> Result<(), vk::Result> {
        let semaphores = [semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        // SAFETY: Caller guarantees semaphore validity; the arrays outlive
        // the call.
        unsafe { self.handle.wait_semaphores(&wait_info, timeout) }
    }

    /// # Safety
    /// `semaphore` must be a valid timeline semaphore created from this
    /// device and `value` must be greater than its current value.
    pub unsafe fn signal_raw_semaphore(
        &self,
        semaphore: vk::Semaphore,
        value: u64,
    ) -> Result<(), vk::Result> {
        let signal_info = vk::SemaphoreSignalInfo::default()
            .semaphore(semaphore)
            .value(value);
        // SAFETY: Caller guarantees semaphore validity and monotonicity.
        unsafe { self.handle.signal_semaphore(&signal_info) }
    }

    /// # Safety
    /// `semaphore` must be a valid timeline semaphore created from this
    /// device.
    pub unsafe fn get_raw_semaphore_counter_value(
        &self,
        semaphore: vk::Semaphore,
    ) -> Result<u64, vk::Result> {
        // SAFETY: Caller guarantees semaphore validity.
        unsafe { self.handle.get_semaphore_counter_value(semaphore) }
    }
}

// Queue submit functionality
impl Device {
    /// Submit work to `queue` using the synchronization2 API.
    ///
    /// # Safety
    /// All handles in `submits` must be valid and derived from this device,
    /// and `queue` must be a queue of this device. Command buffers must be
    /// in the executable state. The caller must externally synchronize
    /// access to `queue`.
    pub unsafe fn queue_submit2(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo2<'_>],
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees all handle validity and
        // synchronization state.
        unsafe { self.handle.queue_submit2(queue, submits, vk::Fence::null()) }
    }
}

// Descriptor set functionality
impl Device {
    /// # Safety
    /// `create_info` must be valid and reference only objects
    /// derived from this device.
    pub unsafe fn create_raw_descriptor_set_layout(
        &self,
        create_info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> Result<vk::DescriptorSetLayout, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_descriptor_set_layout(create_info, None) }
    }

    /// # Safety
    /// `layout` must be a valid handle created from this device
    /// and not yet destroyed.
    pub unsafe fn destroy_raw_descriptor_set_layout(
        &self,
        layout: vk::DescriptorSetLayout,
    ) {
        // SAFETY: Caller guarantees layout provenance and ordering.
        unsafe { self.handle.destroy_descriptor_set_layout(layout, None) };
    }

    /// # Safety
    /// `create_info` must be valid and reference only objects
    /// derived from this device.
    pub unsafe fn create_raw_descriptor_pool(
        &self,
        create_info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> Result<vk::DescriptorPool, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_descriptor_pool(create_info, None) }
    }

    /// # Safety
    /// `pool` must be a valid handle created from this device and
    /// not yet destroyed. All descriptor sets allocated from it
    /// must not be referenced by any pending GPU work.
    pub unsafe fn destroy_raw_descriptor_pool(&self, pool: vk::DescriptorPool) {
        // SAFETY: Caller guarantees pool provenance and ordering.
        unsafe { self.handle.destroy_descriptor_pool(pool, None) };
    }

    /// # Safety
    /// `alloc_info.descriptor_pool` must be a valid pool created
    /// from this device with sufficient capacity.
    pub unsafe fn allocate_raw_descriptor_sets(
        &self,
        alloc_info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> Result<Vec<vk::DescriptorSet>, vk::Result> {
        // SAFETY: Caller guarantees alloc_info validity.
        unsafe { self.handle.allocate_descriptor_sets(alloc_info) }
    }

    /// # Safety
    /// All handles in `descriptor_writes` must be valid and derived from
    /// this device. Written bindings must be update-after-bind or not in
    /// use by pending work.
    pub unsafe fn update_raw_descriptor_sets(
        &self,
        descriptor_writes: &[vk::WriteDescriptorSet<'_>],
    ) {
        // SAFETY: Caller guarantees write validity.
        unsafe { self.handle.update_descriptor_sets(descriptor_writes, &[]) }
    }
}

// Recording commands
impl Device {
    /// # Safety
    /// `command_buffer` must be a valid handle in the recording state, derived
    /// from this device. All handles in `dependency_info` must be valid.
    pub unsafe fn cmd_pipeline_barrier2(
        &self,
        command_buffer: vk::CommandBuffer,
        dependency_info: &vk::DependencyInfo<'_>,
    ) {
        // SAFETY: Caller guarantees command_buffer and
        // dependency_info validity.
        unsafe {
            self.handle
                .cmd_pipeline_barrier2(command_buffer, dependency_info)
        }
    }

    /// # Safety
    /// `command_buffer` must be in the recording state. `pipeline` must be a
    /// valid compute pipeline created from this device.
    pub unsafe fn cmd_bind_compute_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        pipeline: vk::Pipeline,
    ) {
        // SAFETY: Caller guarantees command_buffer state and pipeline validity.
        unsafe {
            self.handle.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                pipeline,
            )
        }
    }

    /// # Safety
    /// `command_buffer` must be in the recording state; `layout` and
    /// `descriptor_sets` must be valid and compatible.
    pub unsafe fn cmd_bind_compute_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        // SAFETY: Caller guarantees command buffer state, layout
        // compatibility, and descriptor set validity.
        unsafe {
            self.handle.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                layout,
                0,
                descriptor_sets,
                &[],
            )
        }
    }

    /// # Safety
    /// `command_buffer` must be in the recording state. `offset` and
    /// `constants.len()` must lie inside a push constant range of `layout`
    /// declared for `stages`.
    pub unsafe fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        constants: &[u8],
    ) {
        // SAFETY: Caller guarantees range validity.
        unsafe {
            self.handle.cmd_push_constants(
                command_buffer,
                layout,
                stages,
                offset,
                constants,
            )
        }
    }

    /// # Safety
    /// `command_buffer` must be in the recording state with a compute
    /// pipeline bound.
    pub unsafe fn cmd_dispatch(
        &self,
        command_buffer: vk::CommandBuffer,
        x: u32,
        y: u32,
        z: u32,
    ) {
        // SAFETY: Caller guarantees command_buffer state.
        unsafe { self.handle.cmd_dispatch(command_buffer, x, y, z) }
    }

    /// # Safety
    /// `command_buffer` must be in the recording state. Both buffers must
    /// be valid and each region must lie inside them.
    pub unsafe fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        // SAFETY: Caller guarantees handle validity and region bounds.
        unsafe { self.handle.cmd_copy_buffer(command_buffer, src, dst, regions) }
    }

    /// # Safety
    /// `command_buffer` must be in the recording state. `image` must be in
    /// `layout` when the command executes and every region must be in
    /// bounds for both resources.
    pub unsafe fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        // SAFETY: Caller guarantees handle validity and region bounds.
        unsafe {
            self.handle.cmd_copy_buffer_to_image(
                command_buffer,
                src,
                image,
                layout,
                regions,
            )
        }
    }

    /// # Safety
    /// Same contract as
    /// [`cmd_copy_buffer_to_image`](Self::cmd_copy_buffer_to_image) with
    /// the direction reversed.
    pub unsafe fn cmd_copy_image_to_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        // SAFETY: Caller guarantees handle validity and region bounds.
        unsafe {
            self.handle.cmd_copy_image_to_buffer(
                command_buffer,
                image,
                layout,
                dst,
                regions,
            )
        }
    }
}
