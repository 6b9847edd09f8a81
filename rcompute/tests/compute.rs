//! End-to-end dispatch, memory and synchronisation tests on a real device.

mod common;

use std::ptr::NonNull;
use std::rc::Rc;

use ash::vk;
use rcompute::command::{CommandBufferState, CommandError};
use rcompute::memory::MemoryError;
use rcompute::sync::{SemaphoreError, WaitError};
use rcompute::{
    Access, CommandBuffer, ComputePipeline, Context, ContextConfig,
    ContextError, Instance, PipelineStage, QueueRole, SubmitToken,
    TimelineSemaphore, VulkanLogLevel,
};

fn upload(ctx: &Context, values: &[f32]) -> NonNull<u8> {
    let ptr = ctx.alloc(size_of_val(values)).unwrap();
    ctx.write_pod(ptr, values).unwrap();
    ptr
}

fn download<const N: usize>(ctx: &Context, ptr: NonNull<u8>) -> [f32; N] {
    let mut out = [0.0f32; N];
    ctx.read_pod(ptr, &mut out).unwrap();
    out
}

fn make_visible_to_host(cmd: &mut CommandBuffer) {
    cmd.barrier(
        PipelineStage::COMPUTE | PipelineStage::TRANSFER,
        Access::SHADER_WRITE | Access::TRANSFER_WRITE,
        PipelineStage::HOST,
        Access::HOST_READ,
    );
}

#[test]
fn doubles_four_floats_through_device_address() {
    let Some(gpu) = common::gpu() else { return };
    let ctx = &gpu.ctx;
    let pipeline =
        ComputePipeline::new(ctx, &common::doubling_kernel(), Some("double"))
            .unwrap();

    let data = upload(ctx, &[1.0, 2.0, 3.0, 4.0]);
    let addr = ctx.host_to_device(data.as_ptr()).unwrap();

    let mut cmd = CommandBuffer::new(ctx, QueueRole::Compute).unwrap();
    assert_eq!(cmd.state(), CommandBufferState::Recording);
    cmd.dispatch(&pipeline, 4, 1, 1, addr).unwrap();
    make_visible_to_host(&mut cmd);
    let token = cmd.submit(&[]).unwrap();
    assert_eq!(token.role, QueueRole::Compute);

    ctx.wait(token).unwrap();
    assert!(ctx.is_complete(token).unwrap());
    assert_eq!(download::<4>(ctx, data), [2.0, 4.0, 6.0, 8.0]);

    ctx.free(data).unwrap();
}

#[test]
fn same_queue_work_runs_in_submission_order() {
    let Some(gpu) = common::gpu() else { return };
    let ctx = &gpu.ctx;
    let pipeline =
        ComputePipeline::new(ctx, &common::doubling_kernel(), None).unwrap();

    let data = upload(ctx, &[1.0, -1.0, 0.5, 3.0]);
    let addr = ctx.host_to_device(data.as_ptr()).unwrap();

    let mut first = CommandBuffer::new(ctx, QueueRole::Compute).unwrap();
    first.dispatch(&pipeline, 4, 1, 1, addr).unwrap();
    let first = first.submit(&[]).unwrap();

    let mut second = CommandBuffer::new(ctx, QueueRole::Compute).unwrap();
    second.barrier(
        PipelineStage::COMPUTE,
        Access::SHADER_WRITE,
        PipelineStage::COMPUTE,
        Access::SHADER_READ | Access::SHADER_WRITE,
    );
    second.dispatch(&pipeline, 4, 1, 1, addr).unwrap();
    make_visible_to_host(&mut second);
    let second = second.submit(&[]).unwrap();
    assert!(first < second);

    // Waiting on the later token covers the earlier one.
    ctx.wait(second).unwrap();
    assert!(ctx.is_complete(first).unwrap());
    assert_eq!(download::<4>(ctx, data), [4.0, -4.0, 2.0, 12.0]);

    ctx.free(data).unwrap();
}

#[test]
fn compute_waits_for_transfer_token() {
    let Some(gpu) = common::gpu() else { return };
    let ctx = &gpu.ctx;
    let pipeline =
        ComputePipeline::new(ctx, &common::doubling_kernel(), None).unwrap();

    let src = upload(ctx, &[5.0, 6.0, 7.0, 8.0]);
    let dst = upload(ctx, &[0.0; 4]);
    let src_addr = ctx.host_to_device(src.as_ptr()).unwrap();
    let dst_addr = ctx.host_to_device(dst.as_ptr()).unwrap();

    let mut copy = CommandBuffer::new(ctx, QueueRole::Transfer).unwrap();
    copy.copy_buffer(src_addr, dst_addr, 16).unwrap();
    let copied = copy.submit(&[]).unwrap();

    let mut double = CommandBuffer::new(ctx, QueueRole::Compute).unwrap();
    double.dispatch(&pipeline, 4, 1, 1, dst_addr).unwrap();
    make_visible_to_host(&mut double);
    let doubled = double.submit(&[copied]).unwrap();

    ctx.wait(doubled).unwrap();
    assert_eq!(download::<4>(ctx, dst), [10.0, 12.0, 14.0, 16.0]);
    assert_eq!(download::<4>(ctx, src), [5.0, 6.0, 7.0, 8.0]);

    ctx.free(src).unwrap();
    ctx.free(dst).unwrap();
}

#[test]
fn dispatch_needs_a_compute_capable_family() {
    let Some(gpu) = common::gpu() else { return };
    let ctx = &gpu.ctx;
    assert!(ctx.role_supports(QueueRole::Compute, vk::QueueFlags::COMPUTE));
    assert!(ctx.role_supports(QueueRole::Graphics, vk::QueueFlags::COMPUTE));

    let pipeline =
        ComputePipeline::new(ctx, &common::doubling_kernel(), None).unwrap();
    let data = upload(ctx, &[1.0; 4]);
    let addr = ctx.host_to_device(data.as_ptr()).unwrap();

    let mut cmd = CommandBuffer::new(ctx, QueueRole::Transfer).unwrap();
    let result = cmd.dispatch(&pipeline, 4, 1, 1, addr);
    if ctx.role_supports(QueueRole::Transfer, vk::QueueFlags::COMPUTE) {
        // The transfer role aliases a compute-capable family.
        result.unwrap();
        make_visible_to_host(&mut cmd);
        ctx.wait(cmd.submit(&[]).unwrap()).unwrap();
        assert_eq!(download::<4>(ctx, data), [2.0; 4]);
    } else {
        assert!(matches!(
            result,
            Err(CommandError::WrongQueueRole(QueueRole::Transfer))
        ));
        // Nothing was recorded, so the buffer still submits cleanly.
        ctx.wait(cmd.submit(&[]).unwrap()).unwrap();
        assert_eq!(download::<4>(ctx, data), [1.0; 4]);
    }

    ctx.free(data).unwrap();
}

#[test]
fn copies_are_bounds_checked() {
    let Some(gpu) = common::gpu() else { return };
    let ctx = &gpu.ctx;
    let src = ctx.alloc(16).unwrap();
    let dst = ctx.alloc(8).unwrap();
    let src_addr = ctx.host_to_device(src.as_ptr()).unwrap();
    let dst_addr = ctx.host_to_device(dst.as_ptr()).unwrap();

    let mut cmd = CommandBuffer::new(ctx, QueueRole::Transfer).unwrap();
    assert!(cmd.copy_buffer(src_addr, dst_addr, 16).is_err());
    assert!(cmd.copy_buffer(src_addr, dst_addr, 8).is_ok());
    // Dropping an unsubmitted buffer recycles it.
    drop(cmd);

    ctx.free(src).unwrap();
    ctx.free(dst).unwrap();
}

#[test]
fn tokens_that_were_never_submitted_are_rejected() {
    let Some(gpu) = common::gpu() else { return };
    let ctx = &gpu.ctx;
    let future = SubmitToken {
        role: QueueRole::Graphics,
        value: 1_000,
    };
    assert!(matches!(
        ctx.wait(future),
        Err(WaitError::NotSubmitted { .. })
    ));

    let cmd = CommandBuffer::new(ctx, QueueRole::Compute).unwrap();
    assert!(cmd.submit(&[future]).is_err());
}

#[test]
fn host_pointers_translate_at_the_same_offset() {
    let Some(gpu) = common::gpu() else { return };
    let ctx = &gpu.ctx;
    let a = ctx.alloc(64).unwrap();
    let b = ctx.alloc(64).unwrap();

    let base = ctx.host_to_device(a.as_ptr()).unwrap();
    // SAFETY: 40 is inside the 64-byte allocation.
    let interior = unsafe { a.as_ptr().add(40) };
    assert_eq!(ctx.host_to_device(interior).unwrap(), base.offset(40));

    let other = ctx.host_to_device(b.as_ptr()).unwrap();
    assert!(other.raw() >= base.raw() + 64 || other.raw() + 64 <= base.raw());

    ctx.free(a).unwrap();
    ctx.free(b).unwrap();
}

#[test]
fn foreign_interior_and_double_frees_are_detected() {
    let Some(gpu) = common::gpu() else { return };
    let ctx = &gpu.ctx;

    let mut local = [0u8; 16];
    let foreign = NonNull::from(&mut local).cast::<u8>();
    assert!(matches!(
        ctx.free(foreign),
        Err(MemoryError::UnknownAllocation(_))
    ));
    assert!(matches!(
        ctx.host_to_device(foreign.as_ptr()),
        Err(MemoryError::NotMapped(_))
    ));

    let ptr = ctx.alloc(32).unwrap();
    // SAFETY: 8 is inside the 32-byte allocation.
    let interior = unsafe { NonNull::new_unchecked(ptr.as_ptr().add(8)) };
    assert!(matches!(
        ctx.free(interior),
        Err(MemoryError::UnknownAllocation(_))
    ));
    assert!(matches!(
        ctx.write_pod(interior, &[0u32; 7]),
        Err(MemoryError::OutOfBounds { .. })
    ));

    ctx.free(ptr).unwrap();
    assert!(matches!(
        ctx.free(ptr),
        Err(MemoryError::UnknownAllocation(_))
    ));
    assert!(matches!(ctx.alloc(0), Err(MemoryError::ZeroSize)));
}

#[test]
fn host_timeline_semaphore_only_moves_forward() {
    let Some(gpu) = common::gpu() else { return };
    let semaphore =
        TimelineSemaphore::new(&gpu.ctx, 3, Some("host timeline")).unwrap();
    assert_eq!(semaphore.value().unwrap(), 3);

    semaphore.signal(7).unwrap();
    semaphore.wait(7).unwrap();
    assert_eq!(semaphore.value().unwrap(), 7);
    assert!(matches!(
        semaphore.signal(7),
        Err(SemaphoreError::NotIncreasing {
            current: 7,
            requested: 7
        })
    ));
}

#[test]
fn only_one_context_is_live() {
    common::init_tracing();
    let _lock = common::lock();
    let Some(ctx) = common::context(ContextConfig::default()) else {
        return;
    };
    assert!(Context::is_initialized());

    // SAFETY: loads the system Vulkan loader.
    let instance = Rc::new(
        unsafe { Instance::new("rcompute-tests-second", None::<VulkanLogLevel>) }
            .unwrap(),
    );
    let device = instance.create_compute_device().unwrap();
    assert!(matches!(
        Context::new(device.context_desc(ContextConfig::default())),
        Err(ContextError::AlreadyInitialized)
    ));

    drop(ctx);
    assert!(!Context::is_initialized());
}

#[test]
fn teardown_releases_unfreed_allocations() {
    common::init_tracing();
    let _lock = common::lock();
    let Some(ctx) = common::context(ContextConfig::default()) else {
        return;
    };

    let kept = upload(&ctx, &[1.0, 2.0, 3.0]);
    let _leaked = ctx.alloc(1 << 20).unwrap();
    let _also_leaked = ctx.alloc(64).unwrap();
    ctx.free(kept).unwrap();
    assert_eq!(ctx.live_allocations(), 2);

    drop(ctx);
    assert!(!Context::is_initialized());

    // The device and its allocator are gone; a fresh context starts clean.
    let ctx = common::context(ContextConfig::default()).unwrap();
    assert_eq!(ctx.live_allocations(), 0);
    let ptr = ctx.alloc(64).unwrap();
    assert_eq!(ctx.live_allocations(), 1);
    ctx.free(ptr).unwrap();
    assert_eq!(ctx.live_allocations(), 0);
}
