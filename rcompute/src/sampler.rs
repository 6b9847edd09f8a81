//! Bindless samplers ([`Sampler`]).
//!
//! A sampler encodes filtering and addressing state independently of any
//! image. Each one occupies a slot in the sampler array of the bindless
//! set; shaders combine it with a sampled image by index.

use std::rc::Rc;

use ash::vk;
use thiserror::Error;

use crate::context::Context;
use crate::descriptor::{DescriptorError, SamplerIndex};

#[derive(Debug, Error)]
pub enum CreateSamplerError {
    #[error("Vulkan error creating sampler: {0}")]
    Vulkan(vk::Result),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    /// Applied to U, V and W.
    pub address_mode: vk::SamplerAddressMode,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            max_lod: vk::LOD_CLAMP_NONE,
        }
    }
}

impl SamplerDesc {
    /// Point sampling with clamped coordinates.
    pub fn nearest() -> Self {
        Self {
            mag_filter: vk::Filter::NEAREST,
            min_filter: vk::Filter::NEAREST,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            ..Self::default()
        }
    }
}

/// An owned `VkSampler` and its bindless slot.
pub struct Sampler {
    ctx: Rc<Context>,
    handle: vk::Sampler,
    index: SamplerIndex,
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("handle", &self.handle)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl Sampler {
    pub fn new(
        ctx: &Rc<Context>,
        desc: &SamplerDesc,
    ) -> Result<Self, CreateSamplerError> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .anisotropy_enable(false)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(desc.max_lod);

        let device = ctx.device();
        // SAFETY: create_info is fully initialised with no borrowed data.
        let handle = unsafe { device.create_raw_sampler(&create_info) }
            .map_err(CreateSamplerError::Vulkan)?;

        let index = match ctx.descriptors().write_sampler(device, handle) {
            Ok(index) => index,
            Err(e) => {
                // SAFETY: handle was created above and is not referenced.
                unsafe { device.destroy_raw_sampler(handle) };
                return Err(e.into());
            }
        };

        Ok(Self {
            ctx: Rc::clone(ctx),
            handle,
            index,
        })
    }

    pub fn descriptor(&self) -> SamplerIndex {
        self.index
    }

    pub fn raw_sampler(&self) -> vk::Sampler {
        self.handle
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        tracing::debug!("Dropping sampler {:?}", self.handle);
        if let Err(e) = self.ctx.descriptors().release_sampler(self.index) {
            tracing::error!("Failed to release sampler slot: {e}");
        }
        // SAFETY: handle was created from this context's device and is
        // owned by this wrapper. No GPU work may still reference it.
        unsafe { self.ctx.device().destroy_raw_sampler(self.handle) };
    }
}
