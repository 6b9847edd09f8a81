//! Command recording and submission ([`CommandBuffer`]).
//!
//! A [`CommandBuffer`] is taken from its queue role's pool already
//! recording. It records barriers, copies and dispatches, and is consumed by
//! [`submit`](CommandBuffer::submit), which signals the next value of the
//! role's timeline and returns the [`SubmitToken`] naming it. The native
//! buffer then waits in the pool until the timeline passes that value and
//! is reused by a later [`CommandBuffer::new`].
//!
//! Images are assumed to stay in `GENERAL` layout; the only layout change
//! the API offers is [`init_discard_image`](CommandBuffer::init_discard_image).

use std::collections::VecDeque;
use std::rc::Rc;

use ash::vk;
use bitflags::bitflags;
use thiserror::Error;

use crate::context::Context;
use crate::image::{Image, ImageCopy};
use crate::memory::{DeviceAddress, MemoryError};
use crate::pipeline::ComputePipeline;
use crate::queue::QueueRole;
use crate::sync::SubmitToken;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Vulkan error querying the {0:?} timeline: {1}")]
    QueryTimeline(QueueRole, vk::Result),

    #[error("Vulkan error allocating command buffer: {0}")]
    Allocate(vk::Result),

    #[error("Vulkan error resetting command buffer: {0}")]
    Reset(vk::Result),

    #[error("Vulkan error beginning command buffer: {0}")]
    Begin(vk::Result),

    #[error("The {0:?} queue family does not support compute dispatches")]
    WrongQueueRole(QueueRole),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Cannot wait on token {token:?}: its queue has only submitted up to {last}")]
    UnsubmittedToken { token: SubmitToken, last: u64 },

    #[error("Vulkan error ending command buffer: {0}")]
    End(vk::Result),

    #[error("Queue submit failed: {0}")]
    Submit(vk::Result),
}

// ---------------------------------------------------------------------------
// Stages and access
// ---------------------------------------------------------------------------

bitflags! {
    /// Pipeline stages a barrier waits on or blocks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStage: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const DRAW_INDIRECT = 1 << 1;
        const COMPUTE = 1 << 2;
        const TRANSFER = 1 << 3;
        const HOST = 1 << 4;
        const BOTTOM_OF_PIPE = 1 << 5;
        /// Every stage.
        const ALL = 1 << 31;
    }
}

bitflags! {
    /// Memory access types made available or visible by a barrier.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        const INDIRECT_READ = 1 << 0;
        const UNIFORM_READ = 1 << 1;
        const SHADER_READ = 1 << 2;
        const SHADER_WRITE = 1 << 3;
        const TRANSFER_READ = 1 << 4;
        const TRANSFER_WRITE = 1 << 5;
        const HOST_READ = 1 << 6;
        const HOST_WRITE = 1 << 7;
        /// Every read and write.
        const ALL = 1 << 31;
    }
}

impl PipelineStage {
    pub fn to_vk(self) -> vk::PipelineStageFlags2 {
        use vk::PipelineStageFlags2 as S;
        if self.contains(PipelineStage::ALL) {
            return S::ALL_COMMANDS;
        }
        let table = [
            (PipelineStage::TOP_OF_PIPE, S::TOP_OF_PIPE),
            (PipelineStage::DRAW_INDIRECT, S::DRAW_INDIRECT),
            (PipelineStage::COMPUTE, S::COMPUTE_SHADER),
            (PipelineStage::TRANSFER, S::ALL_TRANSFER),
            (PipelineStage::HOST, S::HOST),
            (PipelineStage::BOTTOM_OF_PIPE, S::BOTTOM_OF_PIPE),
        ];
        table
            .into_iter()
            .filter(|(ours, _)| self.contains(*ours))
            .fold(S::NONE, |acc, (_, native)| acc | native)
    }
}

impl Access {
    pub fn to_vk(self) -> vk::AccessFlags2 {
        use vk::AccessFlags2 as A;
        if self.contains(Access::ALL) {
            return A::MEMORY_READ | A::MEMORY_WRITE;
        }
        let table = [
            (Access::INDIRECT_READ, A::INDIRECT_COMMAND_READ),
            (Access::UNIFORM_READ, A::UNIFORM_READ),
            (Access::SHADER_READ, A::SHADER_READ),
            (Access::SHADER_WRITE, A::SHADER_WRITE),
            (Access::TRANSFER_READ, A::TRANSFER_READ),
            (Access::TRANSFER_WRITE, A::TRANSFER_WRITE),
            (Access::HOST_READ, A::HOST_READ),
            (Access::HOST_WRITE, A::HOST_WRITE),
        ];
        table
            .into_iter()
            .filter(|(ours, _)| self.contains(*ours))
            .fold(A::NONE, |acc, (_, native)| acc | native)
    }
}

// ---------------------------------------------------------------------------
// Recycling
// ---------------------------------------------------------------------------

/// Move every in-flight entry whose timeline value is at most `completed`
/// to `free`. Entries are in submission order, so this stops at the first
/// unfinished one.
pub(crate) fn retire<T>(
    in_flight: &mut VecDeque<(u64, T)>,
    free: &mut Vec<T>,
    completed: u64,
) {
    while in_flight
        .front()
        .is_some_and(|(value, _)| *value <= completed)
    {
        if let Some((_, item)) = in_flight.pop_front() {
            free.push(item);
        }
    }
}

// ---------------------------------------------------------------------------
// CommandBuffer
// ---------------------------------------------------------------------------

/// Lifecycle of a native command buffer. `Retired` is reached inside the
/// pool once the timeline passes the buffer's submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    Recording,
    Ended,
    Submitted,
    Retired,
}

pub struct CommandBuffer {
    ctx: Rc<Context>,
    role: QueueRole,
    handle: vk::CommandBuffer,
    state: CommandBufferState,
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("role", &self.role)
            .field("handle", &self.handle)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl CommandBuffer {
    /// Take a buffer from `role`'s pool and begin recording.
    pub fn new(
        ctx: &Rc<Context>,
        role: QueueRole,
    ) -> Result<Self, CommandError> {
        ctx.retire_completed(role)
            .map_err(|e| CommandError::QueryTimeline(role, e))?;

        let device = ctx.device();
        let pool = ctx.pool(role);
        let recycled = pool.free.borrow_mut().pop();
        let handle = match recycled {
            Some(handle) => handle,
            None => {
                let allocate_info = vk::CommandBufferAllocateInfo::default()
                    .command_pool(pool.pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1);
                // SAFETY: allocate_info references the role's pool. The
                // context is single-threaded so the pool is externally
                // synchronised.
                let buffers =
                    unsafe { device.allocate_raw_command_buffers(&allocate_info) }
                        .map_err(CommandError::Allocate)?;
                buffers
                    .into_iter()
                    .next()
                    .ok_or(CommandError::Allocate(vk::Result::ERROR_UNKNOWN))?
            }
        };

        // SAFETY: the handle is either fresh or retired, so not pending.
        let reset = unsafe {
            device.reset_raw_command_buffer(
                handle,
                vk::CommandBufferResetFlags::empty(),
            )
        };
        if let Err(e) = reset {
            pool.free.borrow_mut().push(handle);
            return Err(CommandError::Reset(e));
        }

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        // SAFETY: the buffer was reset above.
        if let Err(e) =
            unsafe { device.begin_raw_command_buffer(handle, &begin_info) }
        {
            pool.free.borrow_mut().push(handle);
            return Err(CommandError::Begin(e));
        }

        Ok(Self {
            ctx: Rc::clone(ctx),
            role,
            handle,
            state: CommandBufferState::Recording,
        })
    }

    pub fn role(&self) -> QueueRole {
        self.role
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    pub fn raw_command_buffer(&self) -> vk::CommandBuffer {
        self.handle
    }

    /// Record one global memory barrier.
    pub fn barrier(
        &mut self,
        src_stage: PipelineStage,
        src_access: Access,
        dst_stage: PipelineStage,
        dst_access: Access,
    ) {
        let barriers = [vk::MemoryBarrier2::default()
            .src_stage_mask(src_stage.to_vk())
            .src_access_mask(src_access.to_vk())
            .dst_stage_mask(dst_stage.to_vk())
            .dst_access_mask(dst_access.to_vk())];
        let dependency_info =
            vk::DependencyInfo::default().memory_barriers(&barriers);
        // SAFETY: the buffer is recording and the dependency info holds no
        // handles.
        unsafe {
            self.ctx
                .device()
                .cmd_pipeline_barrier2(self.handle, &dependency_info)
        };
    }

    /// Dispatch `x * y * z` workgroups of `pipeline`, passing `args` as the
    /// push constant.
    ///
    /// `args` is typically the device address of an argument blob from
    /// [`Context::alloc`]. Nothing checks that it matches what the shader
    /// expects. Fails without recording anything when this buffer's role
    /// maps to a family without compute support.
    pub fn dispatch(
        &mut self,
        pipeline: &ComputePipeline,
        x: u32,
        y: u32,
        z: u32,
        args: DeviceAddress,
    ) -> Result<(), CommandError> {
        if !self.ctx.role_supports(self.role, vk::QueueFlags::COMPUTE) {
            return Err(CommandError::WrongQueueRole(self.role));
        }
        let device = self.ctx.device();
        let layout = self.ctx.raw_pipeline_layout();
        let sets = [self.ctx.descriptors().set()];
        // SAFETY: the buffer is recording, the pipeline was built against
        // the context's layout, and the push range covers 8 bytes at 0.
        unsafe {
            device.cmd_bind_compute_pipeline(self.handle, pipeline.raw_pipeline());
            device.cmd_bind_compute_descriptor_sets(self.handle, layout, &sets);
            device.cmd_push_constants(
                self.handle,
                layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&args),
            );
            device.cmd_dispatch(self.handle, x, y, z);
        }
        Ok(())
    }

    /// Move every subresource of `image` from an undefined layout to
    /// `GENERAL`, discarding its contents.
    pub fn init_discard_image(&mut self, image: &Image) {
        let barriers = [vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::NONE)
            .src_access_mask(vk::AccessFlags2::NONE)
            .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .dst_access_mask(
                vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
            )
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::GENERAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image.raw_image())
            .subresource_range(image.storage().full_range())];
        let dependency_info =
            vk::DependencyInfo::default().image_memory_barriers(&barriers);
        // SAFETY: the buffer is recording and the image is alive for the
        // duration of the call.
        unsafe {
            self.ctx
                .device()
                .cmd_pipeline_barrier2(self.handle, &dependency_info)
        };
    }

    /// Copy from host memory at `src` into `image`.
    pub fn copy_buffer_to_image(
        &mut self,
        src: DeviceAddress,
        image: &Image,
        region: &ImageCopy,
    ) -> Result<(), CommandError> {
        let format = image.storage().format();
        let (buffer, offset) = self
            .ctx
            .resolve_device_address(src, region.buffer_len(format))?;
        let regions = [region.to_vk(offset, format)];
        // SAFETY: the buffer range was bounds-checked against the
        // allocation; the image is in GENERAL layout by contract.
        unsafe {
            self.ctx.device().cmd_copy_buffer_to_image(
                self.handle,
                buffer,
                image.raw_image(),
                vk::ImageLayout::GENERAL,
                &regions,
            )
        };
        Ok(())
    }

    /// Copy from `image` into host memory at `dst`.
    pub fn copy_image_to_buffer(
        &mut self,
        image: &Image,
        dst: DeviceAddress,
        region: &ImageCopy,
    ) -> Result<(), CommandError> {
        let format = image.storage().format();
        let (buffer, offset) = self
            .ctx
            .resolve_device_address(dst, region.buffer_len(format))?;
        let regions = [region.to_vk(offset, format)];
        // SAFETY: as in copy_buffer_to_image.
        unsafe {
            self.ctx.device().cmd_copy_image_to_buffer(
                self.handle,
                image.raw_image(),
                vk::ImageLayout::GENERAL,
                buffer,
                &regions,
            )
        };
        Ok(())
    }

    /// Copy `size` bytes between two host allocations.
    pub fn copy_buffer(
        &mut self,
        src: DeviceAddress,
        dst: DeviceAddress,
        size: u64,
    ) -> Result<(), CommandError> {
        let (src_buffer, src_offset) =
            self.ctx.resolve_device_address(src, size)?;
        let (dst_buffer, dst_offset) =
            self.ctx.resolve_device_address(dst, size)?;
        let regions = [vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        }];
        // SAFETY: both ranges were bounds-checked against their allocations.
        unsafe {
            self.ctx.device().cmd_copy_buffer(
                self.handle,
                src_buffer,
                dst_buffer,
                &regions,
            )
        };
        Ok(())
    }

    /// End recording and submit on this buffer's queue role.
    ///
    /// The submission waits for every token in `waits` and signals one new
    /// value on the role's timeline, returned as the token. The timeline's
    /// counter only advances when the submission succeeds.
    pub fn submit(
        mut self,
        waits: &[SubmitToken],
    ) -> Result<SubmitToken, SubmitError> {
        let ctx = Rc::clone(&self.ctx);
        for &token in waits {
            let last = ctx.timeline(token.role).last_signaled.get();
            if token.value > last {
                return Err(SubmitError::UnsubmittedToken { token, last });
            }
        }

        let device = ctx.device();
        // SAFETY: the buffer is recording.
        unsafe { device.end_raw_command_buffer(self.handle) }
            .map_err(SubmitError::End)?;
        self.state = CommandBufferState::Ended;

        let timeline = ctx.timeline(self.role);
        let value = timeline.last_signaled.get() + 1;
        let wait_infos: Vec<vk::SemaphoreSubmitInfo<'_>> = waits
            .iter()
            .map(|token| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(ctx.timeline(token.role).semaphore)
                    .value(token.value)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .collect();
        let signal_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(timeline.semaphore)
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let command_buffer_infos =
            [vk::CommandBufferSubmitInfo::default().command_buffer(self.handle)];
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .command_buffer_infos(&command_buffer_infos)
            .signal_semaphore_infos(&signal_infos);

        let _span = tracing::trace_span!(
            "queue_submit",
            role = self.role.name(),
            value
        )
        .entered();
        // SAFETY: the buffer is executable, every semaphore is a timeline
        // owned by the context, and the context is single-threaded so the
        // queue is externally synchronised.
        unsafe { device.queue_submit2(ctx.queues().get(self.role), &[submit]) }
            .map_err(SubmitError::Submit)?;

        timeline.last_signaled.set(value);
        ctx.pool(self.role)
            .in_flight
            .borrow_mut()
            .push_back((value, self.handle));
        self.state = CommandBufferState::Submitted;

        Ok(SubmitToken {
            role: self.role,
            value,
        })
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        match self.state {
            CommandBufferState::Recording | CommandBufferState::Ended => {
                tracing::debug!(
                    "Returning unsubmitted command buffer {:?}",
                    self.handle
                );
                // SAFETY: the buffer was never submitted, so it is not
                // pending.
                let reset = unsafe {
                    self.ctx.device().reset_raw_command_buffer(
                        self.handle,
                        vk::CommandBufferResetFlags::empty(),
                    )
                };
                if let Err(e) = reset {
                    tracing::error!("Failed to reset command buffer: {e}");
                }
                // A buffer that failed to reset is reset again on reuse.
                self.ctx.pool(self.role).free.borrow_mut().push(self.handle);
            }
            // The pool owns submitted buffers until they retire.
            CommandBufferState::Submitted | CommandBufferState::Retired => {}
        }
    }
}
