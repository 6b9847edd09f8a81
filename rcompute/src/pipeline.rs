//! Compute pipelines ([`ComputePipeline`]).
//!
//! Every pipeline is built against the context's shared layout: the
//! bindless descriptor set plus an 8-byte push constant holding the device
//! address of the dispatch's argument blob. Shaders therefore declare a
//! single `main` entry point and read all their inputs through that
//! address and the bindless arrays.

use std::borrow::Cow;
use std::rc::Rc;

use ash::vk;
use thiserror::Error;

use crate::context::Context;

#[derive(Debug, Error)]
pub enum CreatePipelineError {
    #[error("SPIR-V byte slice length ({0}) is not a multiple of 4")]
    InvalidLength(usize),

    #[error("Vulkan error creating shader module: {0}")]
    ShaderModule(vk::Result),

    #[error("Vulkan error creating compute pipeline: {0}")]
    Pipeline(vk::Result),
}

/// Reinterpret SPIR-V bytes as little-endian words.
///
/// Aligned input on little-endian targets is borrowed; anything else is
/// copied.
pub fn spirv_words(bytes: &[u8]) -> Result<Cow<'_, [u32]>, CreatePipelineError> {
    if !bytes.len().is_multiple_of(4) {
        return Err(CreatePipelineError::InvalidLength(bytes.len()));
    }
    if cfg!(target_endian = "little")
        && let Ok(words) = bytemuck::try_cast_slice::<u8, u32>(bytes)
    {
        return Ok(Cow::Borrowed(words));
    }
    Ok(Cow::Owned(
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    ))
}

/// An owned compute `VkPipeline` using the shared layout.
pub struct ComputePipeline {
    ctx: Rc<Context>,
    handle: vk::Pipeline,
}

impl std::fmt::Debug for ComputePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePipeline")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl ComputePipeline {
    /// Build a pipeline from a SPIR-V module whose entry point is `main`.
    pub fn new(
        ctx: &Rc<Context>,
        code: &[u8],
        name: Option<&str>,
    ) -> Result<Self, CreatePipelineError> {
        let words = spirv_words(code)?;
        let device = ctx.device();

        let module_info = vk::ShaderModuleCreateInfo::default().code(&words);
        // SAFETY: module_info holds the caller's SPIR-V words, which outlive
        // the call.
        let module = unsafe { device.create_raw_shader_module(&module_info) }
            .map_err(CreatePipelineError::ShaderModule)?;

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(c"main");
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(ctx.raw_pipeline_layout());

        // SAFETY: the stage references the module created above and the
        // layout belongs to the context.
        let result = unsafe { device.create_raw_compute_pipeline(&create_info) };

        // The module is only needed during pipeline creation.
        // SAFETY: module was created above and nothing else references it.
        unsafe { device.destroy_raw_shader_module(module) };

        let handle = result.map_err(CreatePipelineError::Pipeline)?;
        if let Some(name) = name {
            ctx.name_object(handle, name);
        }
        tracing::debug!("Created compute pipeline {:?}", handle);

        Ok(Self {
            ctx: Rc::clone(ctx),
            handle,
        })
    }

    pub fn raw_pipeline(&self) -> vk::Pipeline {
        self.handle
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        tracing::debug!("Dropping compute pipeline {:?}", self.handle);
        // SAFETY: handle was created from this context's device. Callers must
        // not drop pipelines referenced by in-flight work.
        unsafe { self.ctx.device().destroy_raw_pipeline(self.handle) };
    }
}
