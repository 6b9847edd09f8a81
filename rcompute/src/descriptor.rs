//! The bindless descriptor set.
//!
//! A single descriptor set holds every image view and sampler the context
//! knows about, as three large update-after-bind arrays:
//!
//! | binding | type            | index type            |
//! |---------|-----------------|-----------------------|
//! | 0       | storage image   | [`StorageImageIndex`] |
//! | 1       | sampled image   | [`SampledImageIndex`] |
//! | 2       | sampler         | [`SamplerIndex`]      |
//!
//! Resources take a slot from a [`SlotAllocator`] when they are created and
//! write their descriptor immediately. Shaders reach them by index, usually
//! carried in the argument blob of a dispatch. All images are assumed to
//! be in `GENERAL` layout.

use std::cell::RefCell;
use std::collections::BTreeSet;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use crate::device::Device;

pub const STORAGE_IMAGE_BINDING: u32 = 0;
pub const SAMPLED_IMAGE_BINDING: u32 = 1;
pub const SAMPLER_BINDING: u32 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("All {capacity} {kind} descriptor slots are in use")]
    Exhausted { kind: &'static str, capacity: u32 },

    #[error("Descriptor slot {0} is not allocated")]
    NotAllocated(u32),
}

#[derive(Debug, Error)]
pub enum CreateDescriptorsError {
    #[error("Vulkan error creating bindless set layout: {0}")]
    CreateLayout(vk::Result),

    #[error("Vulkan error creating bindless descriptor pool: {0}")]
    CreatePool(vk::Result),

    #[error("Vulkan error allocating bindless descriptor set: {0}")]
    AllocateSet(vk::Result),
}

// ---------------------------------------------------------------------------
// Typed indices
// ---------------------------------------------------------------------------

macro_rules! descriptor_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            pub const fn index(self) -> u32 {
                self.0
            }
        }
    };
}

descriptor_index!(
    /// Slot of an image view in the sampled-image array (binding 1).
    SampledImageIndex
);
descriptor_index!(
    /// Slot of an image view in the storage-image array (binding 0).
    StorageImageIndex
);
descriptor_index!(
    /// Slot of a sampler in the sampler array (binding 2).
    SamplerIndex
);

// ---------------------------------------------------------------------------
// SlotAllocator
// ---------------------------------------------------------------------------

/// Fixed-capacity index allocator that always hands out the lowest free
/// index.
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    kind: &'static str,
    capacity: u32,
    /// Every index below `next` that is not in `freed` is live.
    next: u32,
    freed: BTreeSet<u32>,
}

impl SlotAllocator {
    pub fn new(kind: &'static str, capacity: u32) -> Self {
        Self {
            kind,
            capacity,
            next: 0,
            freed: BTreeSet::new(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn live(&self) -> u32 {
        self.next - self.freed.len() as u32
    }

    pub fn allocate(&mut self) -> Result<u32, DescriptorError> {
        if let Some(index) = self.freed.pop_first() {
            return Ok(index);
        }
        if self.next < self.capacity {
            self.next += 1;
            return Ok(self.next - 1);
        }
        Err(DescriptorError::Exhausted {
            kind: self.kind,
            capacity: self.capacity,
        })
    }

    pub fn free(&mut self, index: u32) -> Result<(), DescriptorError> {
        if index >= self.next || !self.freed.insert(index) {
            return Err(DescriptorError::NotAllocated(index));
        }
        // Keep `freed` small when the tail is released.
        while self.next > 0 && self.freed.remove(&(self.next - 1)) {
            self.next -= 1;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Capacities
// ---------------------------------------------------------------------------

/// Number of slots in each bindless array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorCapacities {
    pub sampled_images: u32,
    pub storage_images: u32,
    pub samplers: u32,
}

impl Default for DescriptorCapacities {
    fn default() -> Self {
        Self {
            sampled_images: 1_000_000,
            storage_images: 65_536,
            samplers: 4_096,
        }
    }
}

/// The device limits that bound [`DescriptorCapacities`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorLimits {
    pub sampled_images: u32,
    pub storage_images: u32,
    pub samplers: u32,
    /// Sampled plus storage images visible to one shader stage.
    pub per_stage_resources: u32,
}

impl DescriptorLimits {
    pub fn from_vk(
        props: &vk::PhysicalDeviceDescriptorIndexingProperties<'_>,
    ) -> Self {
        Self {
            sampled_images: props
                .max_descriptor_set_update_after_bind_sampled_images
                .min(props.max_per_stage_descriptor_update_after_bind_sampled_images),
            storage_images: props
                .max_descriptor_set_update_after_bind_storage_images
                .min(props.max_per_stage_descriptor_update_after_bind_storage_images),
            samplers: props
                .max_descriptor_set_update_after_bind_samplers
                .min(props.max_per_stage_descriptor_update_after_bind_samplers),
            per_stage_resources: props.max_per_stage_update_after_bind_resources,
        }
    }
}

impl DescriptorCapacities {
    /// Clamp every capacity to `limits`. Every capacity stays at least 1.
    ///
    /// When the image arrays together exceed the per-stage resource limit,
    /// storage images are held to half of it and sampled images get the
    /// rest.
    pub fn clamp_to(self, limits: &DescriptorLimits) -> Self {
        let mut storage_images = self.storage_images.min(limits.storage_images);
        let mut sampled_images = self.sampled_images.min(limits.sampled_images);
        let samplers = self.samplers.min(limits.samplers);

        let resources = limits.per_stage_resources;
        if sampled_images as u64 + storage_images as u64 > resources as u64 {
            storage_images = storage_images.min(resources / 2);
            sampled_images = sampled_images.min(resources - storage_images);
        }

        Self {
            sampled_images: sampled_images.max(1),
            storage_images: storage_images.max(1),
            samplers: samplers.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// BindlessDescriptors
// ---------------------------------------------------------------------------

/// The set layout, pool, set and slot allocators of the bindless set.
///
/// Native objects are destroyed by [`destroy`](Self::destroy), which the
/// owning context calls during teardown.
pub(crate) struct BindlessDescriptors {
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
    capacities: DescriptorCapacities,
    storage_images: RefCell<SlotAllocator>,
    sampled_images: RefCell<SlotAllocator>,
    samplers: RefCell<SlotAllocator>,
}

impl std::fmt::Debug for BindlessDescriptors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindlessDescriptors")
            .field("layout", &self.layout)
            .field("set", &self.set)
            .field("capacities", &self.capacities)
            .finish_non_exhaustive()
    }
}

/// The single set out of a one-set allocation. A driver that reports
/// success without a set is treated as out of pool memory.
fn first_set(sets: Vec<vk::DescriptorSet>) -> Result<vk::DescriptorSet, vk::Result> {
    sets.into_iter()
        .next()
        .ok_or(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
}

impl BindlessDescriptors {
    pub(crate) fn new(
        device: &Device,
        capacities: DescriptorCapacities,
    ) -> Result<Self, CreateDescriptorsError> {
        let binding_flags = vk::DescriptorBindingFlags::PARTIALLY_BOUND
            | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
            | vk::DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING;
        let per_binding_flags = [binding_flags; 3];
        let bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(STORAGE_IMAGE_BINDING)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(capacities.storage_images)
                .stage_flags(vk::ShaderStageFlags::COMPUTE),
            vk::DescriptorSetLayoutBinding::default()
                .binding(SAMPLED_IMAGE_BINDING)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(capacities.sampled_images)
                .stage_flags(vk::ShaderStageFlags::COMPUTE),
            vk::DescriptorSetLayoutBinding::default()
                .binding(SAMPLER_BINDING)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .descriptor_count(capacities.samplers)
                .stage_flags(vk::ShaderStageFlags::COMPUTE),
        ];
        let mut binding_flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
                .binding_flags(&per_binding_flags);
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .bindings(&bindings)
            .push_next(&mut binding_flags_info);

        // SAFETY: layout_info and its chained binding flags are valid for
        // the duration of the call.
        let layout = unsafe { device.create_raw_descriptor_set_layout(&layout_info) }
            .map_err(CreateDescriptorsError::CreateLayout)?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: capacities.storage_images,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: capacities.sampled_images,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: capacities.samplers,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .max_sets(1)
            .pool_sizes(&pool_sizes);

        // SAFETY: pool_info is fully initialised.
        let pool = match unsafe { device.create_raw_descriptor_pool(&pool_info) } {
            Ok(pool) => pool,
            Err(e) => {
                // SAFETY: layout was created above and nothing uses it yet.
                unsafe { device.destroy_raw_descriptor_set_layout(layout) };
                return Err(CreateDescriptorsError::CreatePool(e));
            }
        };

        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        // SAFETY: pool has room for exactly this set.
        let set = match unsafe { device.allocate_raw_descriptor_sets(&alloc_info) }
            .and_then(first_set)
        {
            Ok(set) => set,
            Err(e) => {
                // SAFETY: pool and layout were created above and hold no
                // sets in use.
                unsafe {
                    device.destroy_raw_descriptor_pool(pool);
                    device.destroy_raw_descriptor_set_layout(layout);
                }
                return Err(CreateDescriptorsError::AllocateSet(e));
            }
        };

        // SAFETY: all three handles were created from this device above.
        let named = unsafe {
            device
                .set_object_name(layout, Some(c"bindless layout"))
                .and_then(|()| device.set_object_name(pool, Some(c"bindless pool")))
                .and_then(|()| device.set_object_name(set, Some(c"bindless set")))
        };
        if let Err(e) = named {
            tracing::warn!("Failed to name bindless descriptor objects: {e}");
        }

        tracing::debug!(
            "Created bindless set {:?} with {} sampled / {} storage / {} sampler slots",
            set,
            capacities.sampled_images,
            capacities.storage_images,
            capacities.samplers
        );

        Ok(Self {
            layout,
            pool,
            set,
            capacities,
            storage_images: RefCell::new(SlotAllocator::new(
                "storage image",
                capacities.storage_images,
            )),
            sampled_images: RefCell::new(SlotAllocator::new(
                "sampled image",
                capacities.sampled_images,
            )),
            samplers: RefCell::new(SlotAllocator::new(
                "sampler",
                capacities.samplers,
            )),
        })
    }

    /// # Safety
    /// No pending GPU work may reference the set and this must be the last
    /// use of `self`.
    pub(crate) unsafe fn destroy(&self, device: &Device) {
        tracing::debug!("Dropping bindless descriptor set {:?}", self.set);
        // SAFETY: Caller guarantees the set is idle; the pool frees it.
        unsafe {
            device.destroy_raw_descriptor_pool(self.pool);
            device.destroy_raw_descriptor_set_layout(self.layout);
        }
    }

    pub(crate) fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub(crate) fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    pub(crate) fn capacities(&self) -> DescriptorCapacities {
        self.capacities
    }

    fn write_image(
        &self,
        device: &Device,
        binding: u32,
        ty: vk::DescriptorType,
        index: u32,
        view: vk::ImageView,
    ) {
        let image_info = [vk::DescriptorImageInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::GENERAL)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(binding)
            .dst_array_element(index)
            .descriptor_type(ty)
            .image_info(&image_info);
        // SAFETY: the binding is update-after-bind and update-unused-while-
        // pending, and `index` was just taken from the slot allocator so
        // no recorded work can be using it.
        unsafe { device.update_raw_descriptor_sets(&[write]) };
    }

    pub(crate) fn write_sampled_image(
        &self,
        device: &Device,
        view: vk::ImageView,
    ) -> Result<SampledImageIndex, DescriptorError> {
        let index = self.sampled_images.borrow_mut().allocate()?;
        self.write_image(
            device,
            SAMPLED_IMAGE_BINDING,
            vk::DescriptorType::SAMPLED_IMAGE,
            index,
            view,
        );
        Ok(SampledImageIndex(index))
    }

    pub(crate) fn write_storage_image(
        &self,
        device: &Device,
        view: vk::ImageView,
    ) -> Result<StorageImageIndex, DescriptorError> {
        let index = self.storage_images.borrow_mut().allocate()?;
        self.write_image(
            device,
            STORAGE_IMAGE_BINDING,
            vk::DescriptorType::STORAGE_IMAGE,
            index,
            view,
        );
        Ok(StorageImageIndex(index))
    }

    pub(crate) fn write_sampler(
        &self,
        device: &Device,
        sampler: vk::Sampler,
    ) -> Result<SamplerIndex, DescriptorError> {
        let index = self.samplers.borrow_mut().allocate()?;
        let image_info = [vk::DescriptorImageInfo::default().sampler(sampler)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(SAMPLER_BINDING)
            .dst_array_element(index)
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .image_info(&image_info);
        // SAFETY: same contract as write_image.
        unsafe { device.update_raw_descriptor_sets(&[write]) };
        Ok(SamplerIndex(index))
    }

    pub(crate) fn release_sampled_image(
        &self,
        index: SampledImageIndex,
    ) -> Result<(), DescriptorError> {
        self.sampled_images.borrow_mut().free(index.0)
    }

    pub(crate) fn release_storage_image(
        &self,
        index: StorageImageIndex,
    ) -> Result<(), DescriptorError> {
        self.storage_images.borrow_mut().free(index.0)
    }

    pub(crate) fn release_sampler(
        &self,
        index: SamplerIndex,
    ) -> Result<(), DescriptorError> {
        self.samplers.borrow_mut().free(index.0)
    }
}
