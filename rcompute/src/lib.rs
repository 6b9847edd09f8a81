//! Bindless compute layer over Vulkan 1.3, built on [`ash`].
//!
//! > **Personal project.** This crate is not intended for general use
//! > and makes no API stability guarantees.
//!
//! A single [`Context`] adopts a device and owns everything shared: one
//! bindless descriptor set, one pipeline layout whose only push constant
//! is an 8-byte [`DeviceAddress`], one timeline and command pool per
//! [`QueueRole`], and the table of host-mapped allocations. Shaders get
//! their arguments by dereferencing that address and index images and
//! samplers through the bindless arrays.
//!
//! # Object hierarchy
//!
//! ```text
//! Instance (optional bootstrap)
//! └── OwnedDevice ──► ContextDesc
//!                     └── Context (one live at a time)
//!                         ├── alloc / free (host-mapped, device-addressable)
//!                         ├── Image ──► ImageStorage
//!                         ├── Sampler
//!                         ├── ComputePipeline
//!                         ├── TimelineSemaphore
//!                         └── CommandBuffer ──submit──► SubmitToken
//! ```
//!
//! Each wrapper holds the context via `Rc`, so the context outlives every
//! object created from it. The context is `!Send`; all calls happen on the
//! thread that created it.
//!
//! # Naming conventions
//!
//! | prefix  | meaning                                   |
//! |---------|-------------------------------------------|
//! | `raw_*` | accepts or returns a raw `ash::vk` handle |
//! | `ash_*` | returns the `ash` wrapper object          |

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub mod command;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod features;
pub mod format;
pub mod image;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod queue;
pub mod sampler;
pub mod sync;

pub use ash;

pub use command::{Access, CommandBuffer, PipelineStage};
pub use context::{Context, ContextConfig, ContextDesc, ContextError};
pub use descriptor::{
    DescriptorCapacities, SampledImageIndex, SamplerIndex, StorageImageIndex,
};
pub use format::Format;
pub use image::{Image, ImageCopy, ImageDesc, ImageType, ImageViewDesc};
pub use instance::{Instance, OwnedDevice, VulkanLogLevel};
pub use memory::DeviceAddress;
pub use pipeline::ComputePipeline;
pub use queue::QueueRole;
pub use sampler::{Sampler, SamplerDesc};
pub use sync::{SubmitToken, TimelineSemaphore};
