//! GPU images: [`Image`] and its shared allocation.
//!
//! An [`Image`] is one view over a device-local `VkImage`. The image and
//! its memory live in a reference-counted [`ImageStorage`]; every view
//! created with [`Image::create_view`] holds a clone, and the memory is
//! released with the last view.
//!
//! Each view takes a sampled-image slot in the bindless set, and a
//! storage-image slot too when its format and swizzle allow storage
//! access. Images are always used in `GENERAL` layout; record
//! [`CommandBuffer::init_discard_image`](crate::command::CommandBuffer::init_discard_image)
//! once before first use.

use std::rc::Rc;

use ash::vk;
use gpu_allocator::{AllocationError, vulkan::Allocation};
use thiserror::Error;

use crate::context::Context;
use crate::descriptor::{DescriptorError, SampledImageIndex, StorageImageIndex};
use crate::device::MemoryUsage;
use crate::format::Format;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreateImageError {
    #[error("Images cannot use Format::Undefined")]
    UndefinedFormat,

    #[error("Image extent must be non-zero in every dimension, got {0:?}")]
    ZeroExtent(vk::Extent3D),

    #[error("{ty:?} images cannot have extent {extent:?}")]
    InvalidExtent { ty: ImageType, extent: vk::Extent3D },

    #[error("{ty:?} images cannot have {layers} array layers")]
    InvalidLayerCount { ty: ImageType, layers: u32 },

    #[error("Cube images must be square, got {width}x{height}")]
    NonSquareCube { width: u32, height: u32 },

    #[error("Requested {requested} mip levels, the extent allows 1 to {max}")]
    InvalidMipLevels { requested: u32, max: u32 },

    #[error("The device cannot sample images of format {0:?}")]
    UnsupportedFormat(Format),

    #[error("A {view:?} view cannot be created over a {image:?} image")]
    IncompatibleViewType { image: ImageType, view: ImageType },

    #[error("A {view:?} view cannot reinterpret a {image:?} image")]
    IncompatibleViewFormat { image: Format, view: Format },

    #[error(
        "View range (mips {base_mip}+{mip_count}, layers {base_layer}+{layer_count}) \
         lies outside the image"
    )]
    InvalidViewRange {
        base_mip: u32,
        mip_count: u32,
        base_layer: u32,
        layer_count: u32,
    },

    #[error("Vulkan error creating image: {0}")]
    CreateImage(vk::Result),

    #[error("GPU allocator error allocating memory: {0}")]
    AllocateMemory(AllocationError),

    #[error("Vulkan error binding image memory: {0}")]
    BindMemory(vk::Result),

    #[error("Vulkan error creating image view: {0}")]
    CreateView(vk::Result),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

// ---------------------------------------------------------------------------
// ImageType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageType {
    D1,
    D2,
    D3,
    Cube,
    D1Array,
    D2Array,
    CubeArray,
}

impl ImageType {
    pub fn view_type(self) -> vk::ImageViewType {
        match self {
            ImageType::D1 => vk::ImageViewType::TYPE_1D,
            ImageType::D2 => vk::ImageViewType::TYPE_2D,
            ImageType::D3 => vk::ImageViewType::TYPE_3D,
            ImageType::Cube => vk::ImageViewType::CUBE,
            ImageType::D1Array => vk::ImageViewType::TYPE_1D_ARRAY,
            ImageType::D2Array => vk::ImageViewType::TYPE_2D_ARRAY,
            ImageType::CubeArray => vk::ImageViewType::CUBE_ARRAY,
        }
    }

    pub fn image_type(self) -> vk::ImageType {
        match self {
            ImageType::D1 | ImageType::D1Array => vk::ImageType::TYPE_1D,
            ImageType::D2
            | ImageType::D2Array
            | ImageType::Cube
            | ImageType::CubeArray => vk::ImageType::TYPE_2D,
            ImageType::D3 => vk::ImageType::TYPE_3D,
        }
    }

    pub fn is_cube(self) -> bool {
        matches!(self, ImageType::Cube | ImageType::CubeArray)
    }

    pub fn create_flags(self) -> vk::ImageCreateFlags {
        let mut flags = vk::ImageCreateFlags::MUTABLE_FORMAT;
        if self.is_cube() {
            flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }
        flags
    }

    /// Whether a view of type `view` can be created over an image created
    /// as this type.
    pub fn accepts_view(self, view: ImageType) -> bool {
        use ImageType::*;
        match self {
            D1 | D1Array => matches!(view, D1 | D1Array),
            D2 | D2Array => matches!(view, D2 | D2Array),
            Cube | CubeArray => matches!(view, D2 | D2Array | Cube | CubeArray),
            D3 => view == D3,
        }
    }

    /// Whether `extent` has the shape this type needs: height and depth 1
    /// for 1D types and depth 1 for 2D and cube types.
    pub fn accepts_extent(self, extent: vk::Extent3D) -> bool {
        match self.image_type() {
            vk::ImageType::TYPE_1D => extent.height == 1 && extent.depth == 1,
            vk::ImageType::TYPE_2D => extent.depth == 1,
            _ => true,
        }
    }

    /// Whether a view of this type can cover `layers` array layers.
    pub fn accepts_layer_count(self, layers: u32) -> bool {
        match self {
            ImageType::D1 | ImageType::D2 | ImageType::D3 => layers == 1,
            ImageType::D1Array | ImageType::D2Array => layers >= 1,
            ImageType::Cube => layers == 6,
            ImageType::CubeArray => layers >= 6 && layers % 6 == 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Descriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ImageDesc<'a> {
    pub ty: ImageType,
    pub format: Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub name: Option<&'a str>,
}

impl<'a> ImageDesc<'a> {
    /// A single-mip, single-layer 2D image.
    pub fn d2(format: Format, width: u32, height: u32) -> Self {
        Self {
            ty: ImageType::D2,
            format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            name: None,
        }
    }

    pub fn with_name(self, name: &'a str) -> Self {
        Self {
            name: Some(name),
            ..self
        }
    }

    /// Check the description against itself and the format's
    /// optimal-tiling features.
    pub fn validate(
        &self,
        supported: vk::FormatFeatureFlags,
    ) -> Result<(), CreateImageError> {
        if self.format == Format::Undefined {
            return Err(CreateImageError::UndefinedFormat);
        }
        let extent = self.extent;
        if extent.width == 0 || extent.height == 0 || extent.depth == 0 {
            return Err(CreateImageError::ZeroExtent(extent));
        }
        if !self.ty.accepts_extent(extent) {
            return Err(CreateImageError::InvalidExtent { ty: self.ty, extent });
        }
        if !self.ty.accepts_layer_count(self.array_layers) {
            return Err(CreateImageError::InvalidLayerCount {
                ty: self.ty,
                layers: self.array_layers,
            });
        }
        if self.ty.is_cube() && extent.width != extent.height {
            return Err(CreateImageError::NonSquareCube {
                width: extent.width,
                height: extent.height,
            });
        }
        let max = max_mip_levels(extent);
        if self.mip_levels == 0 || self.mip_levels > max {
            return Err(CreateImageError::InvalidMipLevels {
                requested: self.mip_levels,
                max,
            });
        }
        if !supported.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE) {
            return Err(CreateImageError::UnsupportedFormat(self.format));
        }
        Ok(())
    }
}

/// Length of the full mip chain of `extent`: `floor(log2(max side)) + 1`.
pub fn max_mip_levels(extent: vk::Extent3D) -> u32 {
    let largest = extent.width.max(extent.height).max(extent.depth);
    u32::BITS - largest.leading_zeros()
}

/// A reinterpretation of a sub-range of an existing image.
#[derive(Debug, Clone, Copy)]
pub struct ImageViewDesc {
    pub ty: ImageType,
    pub format: Format,
    pub components: vk::ComponentMapping,
    pub base_mip_level: u32,
    pub mip_level_count: u32,
    pub base_array_layer: u32,
    pub array_layer_count: u32,
}

impl ImageViewDesc {
    /// Check that this view fits an image of type `ty` and format `format`
    /// with `mip_levels` mips and `array_layers` layers.
    fn validate(
        &self,
        ty: ImageType,
        format: Format,
        mip_levels: u32,
        array_layers: u32,
    ) -> Result<(), CreateImageError> {
        if self.format == Format::Undefined {
            return Err(CreateImageError::UndefinedFormat);
        }
        let mips_end = self.base_mip_level.checked_add(self.mip_level_count);
        let layers_end =
            self.base_array_layer.checked_add(self.array_layer_count);
        match (mips_end, layers_end) {
            (Some(m), Some(l))
                if self.mip_level_count > 0
                    && m <= mip_levels
                    && l <= array_layers => {}
            _ => {
                return Err(CreateImageError::InvalidViewRange {
                    base_mip: self.base_mip_level,
                    mip_count: self.mip_level_count,
                    base_layer: self.base_array_layer,
                    layer_count: self.array_layer_count,
                });
            }
        }
        if !ty.accepts_view(self.ty) {
            return Err(CreateImageError::IncompatibleViewType {
                image: ty,
                view: self.ty,
            });
        }
        if !self.ty.accepts_layer_count(self.array_layer_count) {
            return Err(CreateImageError::InvalidLayerCount {
                ty: self.ty,
                layers: self.array_layer_count,
            });
        }
        if !format.view_compatible(self.format) {
            return Err(CreateImageError::IncompatibleViewFormat {
                image: format,
                view: self.format,
            });
        }
        Ok(())
    }
}

fn is_identity_swizzle(components: &vk::ComponentMapping) -> bool {
    use vk::ComponentSwizzle as S;
    let ok = |actual: S, own: S| actual == S::IDENTITY || actual == own;
    ok(components.r, S::R)
        && ok(components.g, S::G)
        && ok(components.b, S::B)
        && ok(components.a, S::A)
}

/// Storage eligibility of a view, before asking the device whether the
/// view format supports storage access.
fn storage_candidate(
    image_usage: vk::ImageUsageFlags,
    view: &ImageViewDesc,
) -> bool {
    image_usage.contains(vk::ImageUsageFlags::STORAGE)
        && view.format.is_color()
        && !view.format.is_srgb()
        && is_identity_swizzle(&view.components)
}

// ---------------------------------------------------------------------------
// ImageStorage: shared image and memory
// ---------------------------------------------------------------------------

/// The `VkImage` and its memory, shared by every view over it.
pub struct ImageStorage {
    ctx: Rc<Context>,
    handle: vk::Image,
    allocation: Option<Allocation>,
    ty: ImageType,
    format: Format,
    extent: vk::Extent3D,
    mip_levels: u32,
    array_layers: u32,
    usage: vk::ImageUsageFlags,
}

impl std::fmt::Debug for ImageStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageStorage")
            .field("handle", &self.handle)
            .field("format", &self.format)
            .field("extent", &self.extent)
            .finish_non_exhaustive()
    }
}

impl Drop for ImageStorage {
    fn drop(&mut self) {
        tracing::debug!("Dropping image {:?}", self.handle);
        let device = self.ctx.device();
        // SAFETY: every view over this image held an Rc to self and has
        // been dropped. Callers must not drop images in use by the GPU.
        unsafe { device.destroy_raw_image(self.handle) };
        if let Some(allocation) = self.allocation.take()
            && let Err(e) = device.free_memory(allocation)
        {
            tracing::error!("Failed to free image memory: {e}");
        }
    }
}

impl ImageStorage {
    fn new(
        ctx: &Rc<Context>,
        desc: &ImageDesc<'_>,
    ) -> Result<Self, CreateImageError> {
        let device = ctx.device();
        let format = desc.format.to_vk();
        let supported = device.optimal_tiling_features(format);
        desc.validate(supported)?;
        let extent = desc.extent;
        let usage = desc.format.image_usage(supported);
        let families = ctx.queue_families().unique();

        let create_info = vk::ImageCreateInfo::default()
            .flags(desc.ty.create_flags())
            .image_type(desc.ty.image_type())
            .format(format)
            .extent(extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(ctx.queue_families().sharing_mode())
            .queue_family_indices(&families)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        // SAFETY: create_info is fully initialised; families outlives it.
        let handle = unsafe { device.create_raw_image(&create_info) }
            .map_err(CreateImageError::CreateImage)?;

        if let Some(name) = desc.name {
            ctx.name_object(handle, name);
        }

        // SAFETY: handle is a valid image created from this device.
        let reqs = unsafe { device.get_raw_image_memory_requirements(handle) };
        let allocation = device
            .allocate_memory(
                desc.name.unwrap_or("image"),
                reqs,
                MemoryUsage::GpuOnly,
                false,
            )
            .map_err(|e| {
                // SAFETY: handle was created from this device and is not
                // bound to memory yet.
                unsafe { device.destroy_raw_image(handle) };
                CreateImageError::AllocateMemory(e)
            })?;

        // SAFETY: handle and allocation memory are valid and belong to this
        // device.
        let bind_result = unsafe {
            device.bind_raw_image_memory(
                handle,
                allocation.memory(),
                allocation.offset(),
            )
        };
        if let Err(e) = bind_result {
            if let Err(free_err) = device.free_memory(allocation) {
                tracing::error!("Failed to free image memory: {free_err}");
            }
            // SAFETY: handle is valid and owned by this scope.
            unsafe { device.destroy_raw_image(handle) };
            return Err(CreateImageError::BindMemory(e));
        }

        Ok(Self {
            ctx: Rc::clone(ctx),
            handle,
            allocation: Some(allocation),
            ty: desc.ty,
            format: desc.format,
            extent,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
            usage,
        })
    }

    pub fn raw_image(&self) -> vk::Image {
        self.handle
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    /// Every mip and layer, every aspect of the format.
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.format.aspect_flags(),
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.array_layers,
        }
    }
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

/// One view over a shared [`ImageStorage`], with its bindless slots.
pub struct Image {
    storage: Rc<ImageStorage>,
    view: vk::ImageView,
    desc: ImageViewDesc,
    sampled: SampledImageIndex,
    storage_index: Option<StorageImageIndex>,
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("image", &self.storage.handle)
            .field("view", &self.view)
            .field("format", &self.desc.format)
            .field("sampled", &self.sampled)
            .field("storage", &self.storage_index)
            .finish_non_exhaustive()
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        tracing::debug!("Dropping image view {:?}", self.view);
        let ctx = &self.storage.ctx;
        let descriptors = ctx.descriptors();
        if let Err(e) = descriptors.release_sampled_image(self.sampled) {
            tracing::error!("Failed to release sampled image slot: {e}");
        }
        if let Some(index) = self.storage_index
            && let Err(e) = descriptors.release_storage_image(index)
        {
            tracing::error!("Failed to release storage image slot: {e}");
        }
        // SAFETY: the view was created from this device and its slots have
        // been released. Callers must not drop images in use by the GPU.
        unsafe { ctx.device().destroy_raw_image_view(self.view) };
        // `storage` drops after this, releasing the image with the last view.
    }
}

impl Image {
    /// Create an image, its memory and a view over the whole of it.
    pub fn new(
        ctx: &Rc<Context>,
        desc: &ImageDesc<'_>,
    ) -> Result<Self, CreateImageError> {
        let storage = Rc::new(ImageStorage::new(ctx, desc)?);
        let view = ImageViewDesc {
            ty: desc.ty,
            format: desc.format,
            components: vk::ComponentMapping::default(),
            base_mip_level: 0,
            mip_level_count: storage.mip_levels,
            base_array_layer: 0,
            array_layer_count: storage.array_layers,
        };
        Self::with_view(storage, &view)
    }

    /// Another view over this image's memory.
    pub fn create_view(
        &self,
        desc: &ImageViewDesc,
    ) -> Result<Image, CreateImageError> {
        Self::with_view(Rc::clone(&self.storage), desc)
    }

    fn with_view(
        storage: Rc<ImageStorage>,
        desc: &ImageViewDesc,
    ) -> Result<Self, CreateImageError> {
        desc.validate(
            storage.ty,
            storage.format,
            storage.mip_levels,
            storage.array_layers,
        )?;

        let ctx = Rc::clone(&storage.ctx);
        let device = ctx.device();
        let aspect_mask = if desc.format.is_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let create_info = vk::ImageViewCreateInfo::default()
            .image(storage.handle)
            .view_type(desc.ty.view_type())
            .format(desc.format.to_vk())
            .components(desc.components)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: desc.base_mip_level,
                level_count: desc.mip_level_count,
                base_array_layer: desc.base_array_layer,
                layer_count: desc.array_layer_count,
            });

        // SAFETY: create_info references the live image in `storage`.
        let view = unsafe { device.create_raw_image_view(&create_info) }
            .map_err(CreateImageError::CreateView)?;

        let descriptors = ctx.descriptors();
        let sampled = match descriptors.write_sampled_image(device, view) {
            Ok(index) => index,
            Err(e) => {
                // SAFETY: the view was created above and is not referenced.
                unsafe { device.destroy_raw_image_view(view) };
                return Err(e.into());
            }
        };

        let storage_capable = storage_candidate(storage.usage, desc)
            && device
                .optimal_tiling_features(desc.format.to_vk())
                .contains(vk::FormatFeatureFlags::STORAGE_IMAGE);
        let storage_index = if storage_capable {
            match descriptors.write_storage_image(device, view) {
                Ok(index) => Some(index),
                Err(e) => {
                    if let Err(release) = descriptors.release_sampled_image(sampled)
                    {
                        tracing::error!(
                            "Failed to release sampled image slot: {release}"
                        );
                    }
                    // SAFETY: as above.
                    unsafe { device.destroy_raw_image_view(view) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        Ok(Self {
            storage,
            view,
            desc: *desc,
            sampled,
            storage_index,
        })
    }

    pub fn sampled_descriptor(&self) -> SampledImageIndex {
        self.sampled
    }

    /// `None` when the view is not usable as a storage image.
    pub fn storage_descriptor(&self) -> Option<StorageImageIndex> {
        self.storage_index
    }

    pub fn storage(&self) -> &Rc<ImageStorage> {
        &self.storage
    }

    pub fn context(&self) -> &Rc<Context> {
        &self.storage.ctx
    }

    pub fn raw_image(&self) -> vk::Image {
        self.storage.handle
    }

    pub fn raw_view(&self) -> vk::ImageView {
        self.view
    }

    pub fn ty(&self) -> ImageType {
        self.desc.ty
    }

    /// Format of this view.
    pub fn format(&self) -> Format {
        self.desc.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.storage.extent
    }

    pub fn view_desc(&self) -> &ImageViewDesc {
        &self.desc
    }
}

// ---------------------------------------------------------------------------
// ImageCopy
// ---------------------------------------------------------------------------

/// One region of a buffer/image copy.
///
/// `buffer_row_length` and `buffer_image_height` are in texels; zero means
/// tightly packed, as in Vulkan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageCopy {
    pub buffer_row_length: u32,
    pub buffer_image_height: u32,
    pub mip_level: u32,
    pub base_layer: u32,
    pub layer_count: u32,
    pub offset: vk::Offset3D,
    pub extent: vk::Extent3D,
}

impl ImageCopy {
    /// Mip 0 of every layer, tightly packed.
    pub fn whole(image: &Image) -> Self {
        Self {
            buffer_row_length: 0,
            buffer_image_height: 0,
            mip_level: 0,
            base_layer: 0,
            layer_count: image.storage.array_layers,
            offset: vk::Offset3D::default(),
            extent: image.storage.extent,
        }
    }

    /// Bytes of buffer memory the region touches for `format`.
    pub fn buffer_len(&self, format: Format) -> u64 {
        let (bw, bh) = format.block_extent();
        let row_texels = if self.buffer_row_length == 0 {
            self.extent.width
        } else {
            self.buffer_row_length
        };
        let image_rows = if self.buffer_image_height == 0 {
            self.extent.height
        } else {
            self.buffer_image_height
        };
        let slices = self.extent.depth as u64 * self.layer_count as u64;
        if slices == 0 || self.extent.width == 0 || self.extent.height == 0 {
            return 0;
        }

        let block_bytes = format.bytes_per_block() as u64;
        let row_pitch = row_texels.div_ceil(bw) as u64 * block_bytes;
        let slice_pitch = image_rows.div_ceil(bh) as u64 * row_pitch;
        let rows = self.extent.height.div_ceil(bh) as u64;
        let last_row = self.extent.width.div_ceil(bw) as u64 * block_bytes;

        (slices - 1) * slice_pitch + (rows - 1) * row_pitch + last_row
    }

    pub(crate) fn to_vk(
        self,
        buffer_offset: u64,
        format: Format,
    ) -> vk::BufferImageCopy {
        let aspect_mask = if format.is_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        vk::BufferImageCopy {
            buffer_offset,
            buffer_row_length: self.buffer_row_length,
            buffer_image_height: self.buffer_image_height,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask,
                mip_level: self.mip_level,
                base_array_layer: self.base_layer,
                layer_count: self.layer_count,
            },
            image_offset: self.offset,
            image_extent: self.extent,
        }
    }
}
