//! The device context ([`Context`]).
//!
//! A `Context` adopts an externally created device and owns everything the
//! compute layer builds on top of it: the memory allocator, one timeline
//! semaphore and one command pool per [`QueueRole`], the bindless
//! descriptor set and the pipeline layout every compute pipeline shares.
//!
//! Only one context may be live per process. It is created behind an
//! `Rc` and every child object (images, pipelines, command buffers, ...)
//! holds a clone, so the context is torn down only after its children.
//! The context is neither `Send` nor `Sync`.

use std::any::Any;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk;
use gpu_allocator::AllocationError;
use thiserror::Error;

use crate::descriptor::{
    BindlessDescriptors, CreateDescriptorsError, DescriptorCapacities,
    DescriptorLimits,
};
use crate::device::Device;
use crate::features::DeviceFeatures;
use crate::memory::{AddressSpace, HostBuffer};
use crate::queue::{
    QueueDiscoveryError, QueueFamilies, QueueHandles, QueueRole,
    resolve_queue_families, role_capabilities,
};

/// Size of the push-constant block: one [`DeviceAddress`](crate::memory::DeviceAddress).
pub const PUSH_CONSTANT_SIZE: u32 = 8;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("A context is already live in this process")]
    AlreadyInitialized,

    #[error("Device supports Vulkan {major}.{minor}; 1.3 is required")]
    UnsupportedApiVersion { major: u32, minor: u32 },

    #[error("Device lacks required features: {}", .0.join(", "))]
    MissingFeatures(Vec<&'static str>),

    #[error(transparent)]
    QueueDiscovery(#[from] QueueDiscoveryError),

    #[error("GPU allocator error: {0}")]
    Allocator(#[from] AllocationError),

    #[error(transparent)]
    Descriptors(#[from] CreateDescriptorsError),

    #[error("Vulkan error creating pipeline layout: {0}")]
    CreatePipelineLayout(vk::Result),

    #[error("Vulkan error creating {role:?} timeline semaphore: {result}")]
    CreateTimeline { role: QueueRole, result: vk::Result },

    #[error("Vulkan error creating {role:?} command pool: {result}")]
    CreateCommandPool { role: QueueRole, result: vk::Result },
}

/// Tunables for [`Context::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    /// Requested sizes of the bindless arrays. Clamped to device limits.
    pub descriptor_capacities: DescriptorCapacities,
    /// Label native objects through `VK_EXT_debug_utils` when the instance
    /// has it enabled.
    pub debug_names: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            descriptor_capacities: DescriptorCapacities::default(),
            debug_names: cfg!(debug_assertions),
        }
    }
}

/// Everything [`Context::new`] needs from the code that created the device.
///
/// The device must have been created for API 1.3 with every feature in
/// [`DeviceFeatures::REQUIRED`] enabled and at least one queue per family
/// in `queue_families`.
pub struct ContextDesc {
    pub instance: ash::Instance,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queues: QueueHandles,
    /// Resolved from the physical device when `None`.
    pub queue_families: Option<QueueFamilies>,
    pub config: ContextConfig,
    /// Dropped after every native object the context created, so it can
    /// keep the device and instance alive.
    pub owner: Option<Rc<dyn Any>>,
}

impl std::fmt::Debug for ContextDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextDesc")
            .field("device", &self.device.handle())
            .field("physical_device", &self.physical_device)
            .field("queues", &self.queues)
            .field("queue_families", &self.queue_families)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Single-live guard
// ---------------------------------------------------------------------------

static CONTEXT_LIVE: AtomicBool = AtomicBool::new(false);

struct LiveGuard(());

impl LiveGuard {
    fn acquire() -> Result<Self, ContextError> {
        CONTEXT_LIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| LiveGuard(()))
            .map_err(|_| ContextError::AlreadyInitialized)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        CONTEXT_LIVE.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Per-role state
// ---------------------------------------------------------------------------

/// A queue role's timeline and the last value submitted against it.
pub(crate) struct Timeline {
    pub(crate) semaphore: vk::Semaphore,
    pub(crate) last_signaled: Cell<u64>,
}

impl Timeline {
    fn null() -> Self {
        Self {
            semaphore: vk::Semaphore::null(),
            last_signaled: Cell::new(0),
        }
    }
}

/// A role's command pool with its recycled and pending buffers.
pub(crate) struct CommandPoolState {
    pub(crate) pool: vk::CommandPool,
    /// Buffers whose work has finished, ready for reuse.
    pub(crate) free: RefCell<Vec<vk::CommandBuffer>>,
    /// Submitted buffers and the timeline value that retires them, in
    /// submission order.
    pub(crate) in_flight: RefCell<VecDeque<(u64, vk::CommandBuffer)>>,
}

impl CommandPoolState {
    fn null() -> Self {
        Self {
            pool: vk::CommandPool::null(),
            free: RefCell::new(Vec::new()),
            in_flight: RefCell::new(VecDeque::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

pub struct Context {
    device: Device,
    families: QueueFamilies,
    /// Capabilities of each role's family, indexed by [`QueueRole::index`].
    role_flags: [vk::QueueFlags; 3],
    queues: QueueHandles,
    timelines: [Timeline; 3],
    pools: [CommandPoolState; 3],
    descriptors: BindlessDescriptors,
    pipeline_layout: vk::PipelineLayout,
    mappings: RefCell<AddressSpace<HostBuffer>>,
    _not_send: PhantomData<*const ()>,
    _guard: LiveGuard,
    owner: Option<Rc<dyn Any>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("device", &self.device)
            .field("families", &self.families)
            .field("descriptors", &self.descriptors)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Adopt the device described by `desc`.
    ///
    /// Fails with [`ContextError::AlreadyInitialized`] while another context
    /// is live, and with [`ContextError::MissingFeatures`] before creating
    /// anything when the device lacks a required feature.
    pub fn new(desc: ContextDesc) -> Result<Rc<Context>, ContextError> {
        let guard = LiveGuard::acquire()?;
        let ContextDesc {
            instance,
            device,
            physical_device,
            queues,
            queue_families,
            config,
            owner,
        } = desc;

        // SAFETY: the caller created physical_device from instance.
        let api_version = unsafe {
            instance.get_physical_device_properties(physical_device)
        }
        .api_version;
        if api_version < vk::API_VERSION_1_3 {
            return Err(ContextError::UnsupportedApiVersion {
                major: vk::api_version_major(api_version),
                minor: vk::api_version_minor(api_version),
            });
        }

        // SAFETY: as above; the device reports at least 1.3.
        let features =
            unsafe { DeviceFeatures::query(&instance, physical_device) };
        let missing = features.missing();
        if !missing.is_empty() {
            return Err(ContextError::MissingFeatures(missing));
        }

        // SAFETY: as above.
        let family_props = unsafe {
            instance.get_physical_device_queue_family_properties(physical_device)
        };
        let families = match queue_families {
            Some(families) => families,
            None => resolve_queue_families(&family_props)?,
        };
        let role_flags = role_capabilities(&families, &family_props);

        // SAFETY: the caller guarantees provenance and that the device was
        // created with bufferDeviceAddress.
        let device = unsafe {
            Device::from_raw(
                &instance,
                &device,
                physical_device,
                config.debug_names,
            )
        }?;

        let requested = config.descriptor_capacities;
        let limits =
            DescriptorLimits::from_vk(&device.descriptor_indexing_properties());
        let capacities = requested.clamp_to(&limits);
        if capacities != requested {
            tracing::warn!(
                "Clamped descriptor capacities from {:?} to {:?}",
                requested,
                capacities
            );
        }

        let descriptors = BindlessDescriptors::new(&device, capacities)?;

        let set_layouts = [descriptors.layout()];
        let push_constants = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(PUSH_CONSTANT_SIZE)];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constants);
        // SAFETY: layout_info references the set layout created above.
        let pipeline_layout =
            match unsafe { device.create_raw_pipeline_layout(&layout_info) } {
                Ok(layout) => layout,
                Err(e) => {
                    // SAFETY: nothing else references the descriptor objects.
                    unsafe { descriptors.destroy(&device) };
                    return Err(ContextError::CreatePipelineLayout(e));
                }
            };

        // From here on Drop unwinds whatever has been created.
        let mut ctx = Context {
            device,
            families,
            role_flags,
            queues,
            timelines: std::array::from_fn(|_| Timeline::null()),
            pools: std::array::from_fn(|_| CommandPoolState::null()),
            descriptors,
            pipeline_layout,
            mappings: RefCell::new(AddressSpace::new()),
            _not_send: PhantomData,
            _guard: guard,
            owner,
        };
        ctx.name_object(pipeline_layout, "shared pipeline layout");

        for role in QueueRole::ALL {
            // SAFETY: the device was created with timelineSemaphore.
            let semaphore =
                unsafe { ctx.device.create_raw_timeline_semaphore(0) }.map_err(
                    |result| ContextError::CreateTimeline { role, result },
                )?;
            ctx.timelines[role.index()].semaphore = semaphore;
            ctx.name_object(semaphore, &format!("{} timeline", role.name()));

            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(ctx.families.get(role))
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            // SAFETY: the family index belongs to this device.
            let pool = unsafe { ctx.device.create_raw_command_pool(&pool_info) }
                .map_err(|result| ContextError::CreateCommandPool {
                    role,
                    result,
                })?;
            ctx.pools[role.index()].pool = pool;
            ctx.name_object(pool, &format!("{} command pool", role.name()));
        }

        tracing::info!(
            "Created context on device {:?} (graphics family {}, compute \
             family {}, transfer family {})",
            ctx.device.raw_device(),
            families.graphics,
            families.compute,
            families.transfer
        );

        Ok(Rc::new(ctx))
    }

    /// Whether a context is currently live in this process.
    pub fn is_initialized() -> bool {
        CONTEXT_LIVE.load(Ordering::Acquire)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn queue_families(&self) -> &QueueFamilies {
        &self.families
    }

    /// Whether the family behind `role` supports every operation in
    /// `flags`.
    pub fn role_supports(&self, role: QueueRole, flags: vk::QueueFlags) -> bool {
        self.role_flags[role.index()].contains(flags)
    }

    pub fn queues(&self) -> &QueueHandles {
        &self.queues
    }

    pub fn descriptor_capacities(&self) -> DescriptorCapacities {
        self.descriptors.capacities()
    }

    pub fn raw_pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub(crate) fn descriptors(&self) -> &BindlessDescriptors {
        &self.descriptors
    }

    pub(crate) fn timeline(&self, role: QueueRole) -> &Timeline {
        &self.timelines[role.index()]
    }

    pub(crate) fn pool(&self, role: QueueRole) -> &CommandPoolState {
        &self.pools[role.index()]
    }

    pub(crate) fn mappings(&self) -> Ref<'_, AddressSpace<HostBuffer>> {
        self.mappings.borrow()
    }

    pub(crate) fn mappings_mut(&self) -> RefMut<'_, AddressSpace<HostBuffer>> {
        self.mappings.borrow_mut()
    }

    /// Label `object` for debuggers, logging a warning on failure.
    pub(crate) fn name_object<H>(&self, object: H, name: &str)
    where
        H: vk::Handle + Copy + std::fmt::Debug,
    {
        // SAFETY: every caller passes a live handle created from this
        // context's device.
        let result = unsafe { self.device.set_object_name_str(object, Some(name)) };
        if let Err(e) = result {
            tracing::warn!("Failed to name {:?}: {e}", object);
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        tracing::debug!("Dropping context {:?}", self.device.raw_device());
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Failed waiting for device idle at teardown: {e}");
        }

        let leaked: Vec<_> = self.mappings.get_mut().drain().collect();
        for mapping in leaked {
            tracing::warn!(
                "Releasing leaked host allocation of {} bytes at {:#x}",
                mapping.len(),
                mapping.host_begin()
            );
            self.release_host_buffer(mapping.into_backing());
        }

        for state in &mut self.pools {
            // The device is idle, so every in-flight buffer is retired.
            state.in_flight.get_mut().clear();
            state.free.get_mut().clear();
            if state.pool != vk::CommandPool::null() {
                // SAFETY: the device is idle; destroying the pool frees
                // every buffer allocated from it.
                unsafe { self.device.destroy_raw_command_pool(state.pool) };
            }
        }

        for timeline in &self.timelines {
            if timeline.semaphore != vk::Semaphore::null() {
                // SAFETY: the device is idle, so no queue operation still
                // references the semaphore.
                unsafe { self.device.destroy_raw_semaphore(timeline.semaphore) };
            }
        }

        // SAFETY: every pipeline built on the layout holds an Rc to this
        // context and has therefore been dropped already. The device is
        // idle, so the descriptor set is no longer in use.
        unsafe {
            self.device.destroy_raw_pipeline_layout(self.pipeline_layout);
            self.descriptors.destroy(&self.device);
        }
        // Field drops follow: the allocator (inside `device`), the live
        // guard, then the owner keep-alive.
    }
}
