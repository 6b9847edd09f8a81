//! Unified host/device address space.
//!
//! Every allocation made through [`Context::alloc`] is a persistently
//! mapped, host-coherent buffer with a GPU virtual address. Host code gets
//! a plain pointer; shaders get the [`DeviceAddress`] of the same bytes.
//! [`AddressSpace`] is the table that translates between the two.
//!
//! Host ranges and device ranges are each pairwise disjoint, and a pointer
//! anywhere inside an allocation translates to the device address at the
//! same offset.

use std::collections::BTreeMap;
use std::ptr::NonNull;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use gpu_allocator::{AllocationError, vulkan::Allocation};
use thiserror::Error;

use crate::context::Context;
use crate::device::MemoryUsage;

/// A GPU virtual address.
///
/// `Pod`, so it can be embedded directly in argument blobs that shaders
/// read through `PhysicalStorageBuffer` pointers.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Pod,
    Zeroable,
)]
#[repr(transparent)]
pub struct DeviceAddress(pub u64);

impl DeviceAddress {
    pub const NULL: DeviceAddress = DeviceAddress(0);

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The address `bytes` past `self`.
    pub const fn offset(self, bytes: u64) -> DeviceAddress {
        DeviceAddress(self.0 + bytes)
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Allocation size must be non-zero")]
    ZeroSize,

    #[error("Pointer {0:#x} is not the base of a live allocation")]
    UnknownAllocation(usize),

    #[error("Pointer {0:#x} does not lie inside any allocation")]
    NotMapped(usize),

    #[error(
        "Device range {addr:#x}+{len} is not covered by a single allocation"
    )]
    UnmappedDeviceAddress { addr: u64, len: u64 },

    #[error(
        "Access of {len} bytes at {ptr:#x} overruns its allocation \
         ({available} bytes available)"
    )]
    OutOfBounds {
        ptr: usize,
        len: usize,
        available: usize,
    },

    #[error("Allocated memory is not host mapped")]
    NotHostMapped,

    #[error("Allocation overlaps an existing mapping")]
    Overlap,

    #[error("Vulkan error creating host buffer: {0}")]
    CreateBuffer(vk::Result),

    #[error("GPU allocator error: {0}")]
    Allocation(#[from] AllocationError),

    #[error("Vulkan error binding buffer memory: {0}")]
    BindMemory(vk::Result),
}

/// One live allocation: a host range, its device base, and whatever owns
/// the native resources behind it.
#[derive(Debug)]
pub struct Mapping<B> {
    host_begin: usize,
    len: usize,
    device_base: DeviceAddress,
    backing: B,
}

impl<B> Mapping<B> {
    pub fn new(
        host_begin: usize,
        len: usize,
        device_base: DeviceAddress,
        backing: B,
    ) -> Self {
        Self {
            host_begin,
            len,
            device_base,
            backing,
        }
    }

    pub fn host_begin(&self) -> usize {
        self.host_begin
    }

    pub fn host_end(&self) -> usize {
        self.host_begin + self.len
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn device_base(&self) -> DeviceAddress {
        self.device_base
    }

    pub fn backing(&self) -> &B {
        &self.backing
    }

    pub fn into_backing(self) -> B {
        self.backing
    }

    fn device_end(&self) -> u64 {
        self.device_base.0 + self.len as u64
    }
}

/// Ordered mapping table keyed by host range start, with a secondary index
/// keyed by device base.
#[derive(Debug)]
pub struct AddressSpace<B> {
    by_host: BTreeMap<usize, Mapping<B>>,
    by_device: BTreeMap<u64, usize>,
}

impl<B> Default for AddressSpace<B> {
    fn default() -> Self {
        Self {
            by_host: BTreeMap::new(),
            by_device: BTreeMap::new(),
        }
    }
}

impl<B> AddressSpace<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }

    /// Register a mapping. Empty mappings and mappings whose host or device
    /// range intersects a live one are handed back untouched.
    pub fn insert(&mut self, mapping: Mapping<B>) -> Result<(), Mapping<B>> {
        if mapping.is_empty() || self.overlaps(&mapping) {
            return Err(mapping);
        }
        self.by_device
            .insert(mapping.device_base.0, mapping.host_begin);
        self.by_host.insert(mapping.host_begin, mapping);
        Ok(())
    }

    fn overlaps(&self, mapping: &Mapping<B>) -> bool {
        // Entries are disjoint, so only the entry with the greatest start
        // below the candidate's end can intersect it.
        let host_hit = self
            .by_host
            .range(..mapping.host_end())
            .next_back()
            .is_some_and(|(_, m)| m.host_end() > mapping.host_begin);
        let device_hit = self
            .by_device
            .range(..mapping.device_end())
            .next_back()
            .and_then(|(_, host)| self.by_host.get(host))
            .is_some_and(|m| m.device_end() > mapping.device_base.0);
        host_hit || device_hit
    }

    /// Remove the mapping whose host range starts exactly at `host_begin`.
    pub fn remove(
        &mut self,
        host_begin: usize,
    ) -> Result<Mapping<B>, MemoryError> {
        let mapping = self
            .by_host
            .remove(&host_begin)
            .ok_or(MemoryError::UnknownAllocation(host_begin))?;
        self.by_device.remove(&mapping.device_base.0);
        Ok(mapping)
    }

    /// The mapping whose host range contains `ptr`.
    pub fn find_host(&self, ptr: usize) -> Option<&Mapping<B>> {
        self.by_host
            .range(..=ptr)
            .next_back()
            .map(|(_, m)| m)
            .filter(|m| ptr < m.host_end())
    }

    pub fn host_to_device(&self, ptr: usize) -> Result<DeviceAddress, MemoryError> {
        self.find_host(ptr)
            .map(|m| m.device_base.offset((ptr - m.host_begin) as u64))
            .ok_or(MemoryError::NotMapped(ptr))
    }

    /// The mapping covering `[addr, addr + len)` on the device side and the
    /// byte offset of `addr` inside it.
    pub fn resolve_device(
        &self,
        addr: DeviceAddress,
        len: u64,
    ) -> Result<(&Mapping<B>, u64), MemoryError> {
        let unmapped = MemoryError::UnmappedDeviceAddress { addr: addr.0, len };
        let mapping = self
            .by_device
            .range(..=addr.0)
            .next_back()
            .and_then(|(_, host)| self.by_host.get(host))
            .ok_or(unmapped)?;
        let offset = addr.0 - mapping.device_base.0;
        match offset.checked_add(len) {
            Some(end) if end <= mapping.len as u64 => Ok((mapping, offset)),
            _ => Err(MemoryError::UnmappedDeviceAddress { addr: addr.0, len }),
        }
    }

    /// Remove every mapping, in host address order.
    pub fn drain(&mut self) -> impl Iterator<Item = Mapping<B>> {
        self.by_device.clear();
        std::mem::take(&mut self.by_host).into_values()
    }
}

/// Native resources behind one host allocation.
#[derive(Debug)]
pub(crate) struct HostBuffer {
    pub(crate) buffer: vk::Buffer,
    pub(crate) allocation: Allocation,
}

const HOST_BUFFER_USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::from_raw(
    vk::BufferUsageFlags::TRANSFER_SRC.as_raw()
        | vk::BufferUsageFlags::TRANSFER_DST.as_raw()
        | vk::BufferUsageFlags::UNIFORM_BUFFER.as_raw()
        | vk::BufferUsageFlags::STORAGE_BUFFER.as_raw()
        | vk::BufferUsageFlags::INDEX_BUFFER.as_raw()
        | vk::BufferUsageFlags::VERTEX_BUFFER.as_raw()
        | vk::BufferUsageFlags::INDIRECT_BUFFER.as_raw()
        | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS.as_raw(),
);

impl Context {
    /// Allocate `size` bytes of persistently mapped memory visible to both
    /// host and GPU.
    ///
    /// The returned pointer stays valid until [`free`](Self::free). Its
    /// device address is available through
    /// [`host_to_device`](Self::host_to_device).
    pub fn alloc(&self, size: usize) -> Result<NonNull<u8>, MemoryError> {
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        let device = self.device();
        let families = self.queue_families().unique();
        let create_info = vk::BufferCreateInfo::default()
            .size(size as vk::DeviceSize)
            .usage(HOST_BUFFER_USAGE)
            .sharing_mode(self.queue_families().sharing_mode())
            .queue_family_indices(&families);

        // SAFETY: create_info is fully initialised; families outlives it.
        let buffer = unsafe { device.create_raw_buffer(&create_info) }
            .map_err(MemoryError::CreateBuffer)?;

        // SAFETY: buffer is a valid buffer created from device.
        let name_result =
            unsafe { device.set_object_name_str(buffer, Some("host memory")) };
        if let Err(e) = name_result {
            tracing::warn!("Failed to name buffer {:?}: {e}", buffer);
        }

        // SAFETY: buffer is a valid buffer created from this device.
        let reqs = unsafe { device.get_raw_buffer_memory_requirements(buffer) };
        let allocation = device
            .allocate_memory("host memory", reqs, MemoryUsage::HostMapped, true)
            .map_err(|e| {
                // SAFETY: buffer was created from this device and is not
                // bound to memory yet.
                unsafe { device.destroy_raw_buffer(buffer) };
                MemoryError::Allocation(e)
            })?;

        let backing = HostBuffer { buffer, allocation };

        // SAFETY: buffer and allocation memory are valid and belong to this
        // device.
        let bind_result = unsafe {
            device.bind_raw_buffer_memory(
                buffer,
                backing.allocation.memory(),
                backing.allocation.offset(),
            )
        };
        if let Err(e) = bind_result {
            self.release_host_buffer(backing);
            return Err(MemoryError::BindMemory(e));
        }

        let Some(host) = backing.allocation.mapped_ptr() else {
            self.release_host_buffer(backing);
            return Err(MemoryError::NotHostMapped);
        };
        let host = host.cast::<u8>();

        // SAFETY: buffer was created with SHADER_DEVICE_ADDRESS usage and is
        // bound to memory.
        let device_base = DeviceAddress(unsafe {
            device.get_raw_buffer_device_address(buffer)
        });

        let mapping =
            Mapping::new(host.as_ptr() as usize, size, device_base, backing);
        if let Err(rejected) = self.mappings_mut().insert(mapping) {
            self.release_host_buffer(rejected.into_backing());
            return Err(MemoryError::Overlap);
        }

        tracing::trace!(
            "Allocated {size} bytes at {:p} (device {:#x})",
            host,
            device_base.0
        );
        Ok(host)
    }

    /// Release an allocation returned by [`alloc`](Self::alloc).
    ///
    /// `ptr` must be the allocation's base pointer; interior pointers,
    /// foreign pointers and double frees are rejected with
    /// [`MemoryError::UnknownAllocation`]. The GPU must no longer be using
    /// the memory.
    pub fn free(&self, ptr: NonNull<u8>) -> Result<(), MemoryError> {
        let mapping = self.mappings_mut().remove(ptr.as_ptr() as usize)?;
        self.release_host_buffer(mapping.into_backing());
        Ok(())
    }

    /// Number of allocations from [`alloc`](Self::alloc) not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.mappings().len()
    }

    /// Translate a host pointer anywhere inside a live allocation to the
    /// device address of the same byte.
    pub fn host_to_device(
        &self,
        ptr: *const u8,
    ) -> Result<DeviceAddress, MemoryError> {
        self.mappings().host_to_device(ptr as usize)
    }

    /// Buffer and byte offset behind `[addr, addr + len)`, for copies.
    pub(crate) fn resolve_device_address(
        &self,
        addr: DeviceAddress,
        len: u64,
    ) -> Result<(vk::Buffer, u64), MemoryError> {
        let mappings = self.mappings();
        let (mapping, offset) = mappings.resolve_device(addr, len)?;
        Ok((mapping.backing().buffer, offset))
    }

    fn checked_host_range(
        &self,
        ptr: NonNull<u8>,
        len: usize,
    ) -> Result<(), MemoryError> {
        let addr = ptr.as_ptr() as usize;
        let mappings = self.mappings();
        let mapping = mappings
            .find_host(addr)
            .ok_or(MemoryError::NotMapped(addr))?;
        let available = mapping.host_end() - addr;
        if len > available {
            return Err(MemoryError::OutOfBounds {
                ptr: addr,
                len,
                available,
            });
        }
        Ok(())
    }

    /// Copy `data` into mapped memory starting at `ptr`.
    ///
    /// Unlike writing through the raw pointer, the destination range is
    /// checked against the allocation it falls in.
    pub fn write_pod<T: Pod>(
        &self,
        ptr: NonNull<u8>,
        data: &[T],
    ) -> Result<(), MemoryError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.checked_host_range(ptr, bytes.len())?;
        // SAFETY: the destination range lies inside a live host-coherent
        // mapping and cannot overlap `data`, which is borrowed immutably.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                ptr.as_ptr(),
                bytes.len(),
            )
        };
        Ok(())
    }

    /// Copy mapped memory starting at `ptr` into `out`.
    pub fn read_pod<T: Pod>(
        &self,
        ptr: NonNull<u8>,
        out: &mut [T],
    ) -> Result<(), MemoryError> {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(out);
        self.checked_host_range(ptr, bytes.len())?;
        // SAFETY: the source range lies inside a live host-coherent mapping
        // and `out` is an exclusive borrow, so they cannot overlap.
        unsafe {
            std::ptr::copy_nonoverlapping(
                ptr.as_ptr().cast_const(),
                bytes.as_mut_ptr(),
                bytes.len(),
            )
        };
        Ok(())
    }

    pub(crate) fn release_host_buffer(&self, backing: HostBuffer) {
        let device = self.device();
        // SAFETY: the buffer was created from this device and its mapping
        // has been removed, so nothing on the host side references it.
        unsafe { device.destroy_raw_buffer(backing.buffer) };
        if let Err(e) = device.free_memory(backing.allocation) {
            tracing::error!("Failed to free host allocation: {e}");
        }
    }
}
