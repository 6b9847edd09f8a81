//! Logical pixel formats ([`Format`]).
//!
//! `Format` is the closed set of formats images can be created with. The
//! mapping to `vk::Format` is total in both directions over this set, and
//! classification helpers decide aspect flags and which usages a format
//! may carry.

use ash::vk;

macro_rules! formats {
    ($($name:ident => $vk:ident,)*) => {
        /// A pixel format supported by [`Image`](crate::image::Image).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Format {
            $($name,)*
        }

        impl Format {
            /// Every logical format, in declaration order.
            pub const ALL: &'static [Format] = &[$(Format::$name,)*];

            pub const fn to_vk(self) -> vk::Format {
                match self {
                    $(Format::$name => vk::Format::$vk,)*
                }
            }

            /// Inverse of [`to_vk`](Self::to_vk). Returns `None` for native
            /// formats outside the logical set.
            pub fn from_vk(format: vk::Format) -> Option<Format> {
                match format {
                    $(vk::Format::$vk => Some(Format::$name),)*
                    _ => None,
                }
            }
        }
    };
}

formats! {
    Undefined => UNDEFINED,

    R8Unorm => R8_UNORM,
    R8Snorm => R8_SNORM,
    R16Unorm => R16_UNORM,
    R16Snorm => R16_SNORM,
    R8G8Unorm => R8G8_UNORM,
    R8G8Snorm => R8G8_SNORM,
    R16G16Unorm => R16G16_UNORM,
    R16G16Snorm => R16G16_SNORM,
    R4G4B4A4Unorm => R4G4B4A4_UNORM_PACK16,
    R5G5B5A1Unorm => R5G5B5A1_UNORM_PACK16,
    R8G8B8A8Unorm => R8G8B8A8_UNORM,
    B8G8R8A8Unorm => B8G8R8A8_UNORM,
    R8G8B8A8Snorm => R8G8B8A8_SNORM,
    A2R10G10B10Unorm => A2R10G10B10_UNORM_PACK32,
    A2B10G10R10Unorm => A2B10G10R10_UNORM_PACK32,
    A2R10G10B10Uint => A2R10G10B10_UINT_PACK32,
    R16G16B16A16Unorm => R16G16B16A16_UNORM,
    R16G16B16A16Snorm => R16G16B16A16_SNORM,
    R8G8B8A8Srgb => R8G8B8A8_SRGB,
    B8G8R8A8Srgb => B8G8R8A8_SRGB,

    R16Float => R16_SFLOAT,
    R16G16Float => R16G16_SFLOAT,
    R16G16B16A16Float => R16G16B16A16_SFLOAT,
    R32Float => R32_SFLOAT,
    R32G32Float => R32G32_SFLOAT,
    R32G32B32A32Float => R32G32B32A32_SFLOAT,
    B10G11R11Ufloat => B10G11R11_UFLOAT_PACK32,
    E5B9G9R9Ufloat => E5B9G9R9_UFLOAT_PACK32,

    R8Sint => R8_SINT,
    R8Uint => R8_UINT,
    R16Sint => R16_SINT,
    R16Uint => R16_UINT,
    R32Sint => R32_SINT,
    R32Uint => R32_UINT,
    R8G8Sint => R8G8_SINT,
    R8G8Uint => R8G8_UINT,
    R16G16Sint => R16G16_SINT,
    R16G16Uint => R16G16_UINT,
    R32G32Sint => R32G32_SINT,
    R32G32Uint => R32G32_UINT,
    R8G8B8A8Sint => R8G8B8A8_SINT,
    R8G8B8A8Uint => R8G8B8A8_UINT,
    R16G16B16A16Sint => R16G16B16A16_SINT,
    R16G16B16A16Uint => R16G16B16A16_UINT,
    R32G32B32A32Sint => R32G32B32A32_SINT,
    R32G32B32A32Uint => R32G32B32A32_UINT,

    D32Float => D32_SFLOAT,
    X8D24Unorm => X8_D24_UNORM_PACK32,
    D16Unorm => D16_UNORM,
    D32FloatS8Uint => D32_SFLOAT_S8_UINT,
    D24UnormS8Uint => D24_UNORM_S8_UINT,

    Bc1RgbUnorm => BC1_RGB_UNORM_BLOCK,
    Bc1RgbSrgb => BC1_RGB_SRGB_BLOCK,
    Bc1RgbaUnorm => BC1_RGBA_UNORM_BLOCK,
    Bc1RgbaSrgb => BC1_RGBA_SRGB_BLOCK,
    Bc2RgbaUnorm => BC2_UNORM_BLOCK,
    Bc2RgbaSrgb => BC2_SRGB_BLOCK,
    Bc3RgbaUnorm => BC3_UNORM_BLOCK,
    Bc3RgbaSrgb => BC3_SRGB_BLOCK,
    Bc4RUnorm => BC4_UNORM_BLOCK,
    Bc4RSnorm => BC4_SNORM_BLOCK,
    Bc5RgUnorm => BC5_UNORM_BLOCK,
    Bc5RgSnorm => BC5_SNORM_BLOCK,
    Bc6hRgbUfloat => BC6H_UFLOAT_BLOCK,
    Bc6hRgbSfloat => BC6H_SFLOAT_BLOCK,
    Bc7RgbaUnorm => BC7_UNORM_BLOCK,
    Bc7RgbaSrgb => BC7_SRGB_BLOCK,
}

impl Format {
    pub const fn is_depth(self) -> bool {
        matches!(
            self,
            Format::D16Unorm
                | Format::D24UnormS8Uint
                | Format::X8D24Unorm
                | Format::D32Float
                | Format::D32FloatS8Uint
        )
    }

    pub const fn is_stencil(self) -> bool {
        matches!(self, Format::D24UnormS8Uint | Format::D32FloatS8Uint)
    }

    pub const fn is_color(self) -> bool {
        !self.is_depth() && !self.is_stencil()
    }

    pub const fn is_srgb(self) -> bool {
        matches!(
            self,
            Format::R8G8B8A8Srgb
                | Format::B8G8R8A8Srgb
                | Format::Bc1RgbSrgb
                | Format::Bc1RgbaSrgb
                | Format::Bc2RgbaSrgb
                | Format::Bc3RgbaSrgb
                | Format::Bc7RgbaSrgb
        )
    }

    pub fn aspect_flags(self) -> vk::ImageAspectFlags {
        let mut flags = vk::ImageAspectFlags::empty();
        if self.is_depth() {
            flags |= vk::ImageAspectFlags::DEPTH;
        }
        if self.is_stencil() {
            flags |= vk::ImageAspectFlags::STENCIL;
        }
        if self.is_color() {
            flags |= vk::ImageAspectFlags::COLOR;
        }
        flags
    }

    pub const fn is_block_compressed(self) -> bool {
        matches!(
            self,
            Format::Bc1RgbUnorm
                | Format::Bc1RgbSrgb
                | Format::Bc1RgbaUnorm
                | Format::Bc1RgbaSrgb
                | Format::Bc2RgbaUnorm
                | Format::Bc2RgbaSrgb
                | Format::Bc3RgbaUnorm
                | Format::Bc3RgbaSrgb
                | Format::Bc4RUnorm
                | Format::Bc4RSnorm
                | Format::Bc5RgUnorm
                | Format::Bc5RgSnorm
                | Format::Bc6hRgbUfloat
                | Format::Bc6hRgbSfloat
                | Format::Bc7RgbaUnorm
                | Format::Bc7RgbaSrgb
        )
    }

    /// Texel dimensions of one block: 4x4 for BC formats, 1x1 otherwise.
    pub const fn block_extent(self) -> (u32, u32) {
        if self.is_block_compressed() { (4, 4) } else { (1, 1) }
    }

    /// Bytes one block occupies in a buffer copy.
    ///
    /// For depth formats this is the size of the depth aspect alone, which
    /// is what buffer/image copies transfer.
    pub const fn bytes_per_block(self) -> u32 {
        use Format::*;
        match self {
            Undefined => 0,

            R8Unorm | R8Snorm | R8Sint | R8Uint => 1,

            R16Unorm | R16Snorm | R8G8Unorm | R8G8Snorm | R4G4B4A4Unorm
            | R5G5B5A1Unorm | R16Float | R16Sint | R16Uint | R8G8Sint
            | R8G8Uint | D16Unorm => 2,

            R16G16Unorm | R16G16Snorm | R8G8B8A8Unorm | B8G8R8A8Unorm
            | R8G8B8A8Snorm | A2R10G10B10Unorm | A2B10G10R10Unorm
            | A2R10G10B10Uint | R8G8B8A8Srgb | B8G8R8A8Srgb | R16G16Float
            | R32Float | B10G11R11Ufloat | E5B9G9R9Ufloat | R32Sint
            | R32Uint | R16G16Sint | R16G16Uint | R8G8B8A8Sint
            | R8G8B8A8Uint | D32Float | X8D24Unorm | D32FloatS8Uint
            | D24UnormS8Uint => 4,

            R16G16B16A16Unorm | R16G16B16A16Snorm | R16G16B16A16Float
            | R32G32Float | R32G32Sint | R32G32Uint | R16G16B16A16Sint
            | R16G16B16A16Uint => 8,

            R32G32B32A32Float | R32G32B32A32Sint | R32G32B32A32Uint => 16,

            Bc1RgbUnorm | Bc1RgbSrgb | Bc1RgbaUnorm | Bc1RgbaSrgb
            | Bc4RUnorm | Bc4RSnorm => 8,

            Bc2RgbaUnorm | Bc2RgbaSrgb | Bc3RgbaUnorm | Bc3RgbaSrgb
            | Bc5RgUnorm | Bc5RgSnorm | Bc6hRgbUfloat | Bc6hRgbSfloat
            | Bc7RgbaUnorm | Bc7RgbaSrgb => 16,
        }
    }

    /// The non-sRGB format with the same layout. Other formats map to
    /// themselves.
    pub const fn linear(self) -> Format {
        match self {
            Format::R8G8B8A8Srgb => Format::R8G8B8A8Unorm,
            Format::B8G8R8A8Srgb => Format::B8G8R8A8Unorm,
            Format::Bc1RgbSrgb => Format::Bc1RgbUnorm,
            Format::Bc1RgbaSrgb => Format::Bc1RgbaUnorm,
            Format::Bc2RgbaSrgb => Format::Bc2RgbaUnorm,
            Format::Bc3RgbaSrgb => Format::Bc3RgbaUnorm,
            Format::Bc7RgbaSrgb => Format::Bc7RgbaUnorm,
            other => other,
        }
    }

    /// Whether a view of format `view` may reinterpret an image created
    /// with this format.
    ///
    /// Uncompressed color formats are interchangeable when their texels
    /// have the same size. Compressed formats only pair with their sRGB
    /// or linear twin, and depth/stencil formats only with themselves.
    pub fn view_compatible(self, view: Format) -> bool {
        if self == view {
            return true;
        }
        if !self.is_color() || !view.is_color() {
            return false;
        }
        match (self.is_block_compressed(), view.is_block_compressed()) {
            (false, false) => self.bytes_per_block() == view.bytes_per_block(),
            (true, true) => self.linear() == view.linear(),
            _ => false,
        }
    }

    /// Usage flags an image of this format is created with.
    ///
    /// `supported` is the format's optimal-tiling feature set as reported
    /// by the device; attachment and storage usages are only requested
    /// when the device can honour them. Storage is never requested for
    /// sRGB formats.
    pub fn image_usage(
        self,
        supported: vk::FormatFeatureFlags,
    ) -> vk::ImageUsageFlags {
        use vk::FormatFeatureFlags as F;
        use vk::ImageUsageFlags as U;

        let mut usage = U::TRANSFER_SRC | U::TRANSFER_DST | U::SAMPLED;
        if self.is_depth() || self.is_stencil() {
            if supported.contains(F::DEPTH_STENCIL_ATTACHMENT) {
                usage |= U::DEPTH_STENCIL_ATTACHMENT;
            }
        } else {
            if supported.contains(F::COLOR_ATTACHMENT) {
                usage |= U::COLOR_ATTACHMENT;
            }
            if !self.is_srgb() && supported.contains(F::STORAGE_IMAGE) {
                usage |= U::STORAGE;
            }
        }
        usage
    }
}
