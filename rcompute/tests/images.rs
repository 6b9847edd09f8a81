//! Image, view and sampler tests on a real device.

mod common;

use ash::vk;
use rcompute::descriptor::DescriptorError;
use rcompute::image::CreateImageError;
use rcompute::sampler::CreateSamplerError;
use rcompute::{
    Access, CommandBuffer, ComputePipeline, ContextConfig,
    DescriptorCapacities, Format, Image, ImageCopy, ImageDesc, ImageType,
    ImageViewDesc, PipelineStage, QueueRole, Sampler, SamplerDesc,
};

use common::SampleArgs;

#[test]
fn samples_rgba8_image_into_floats() {
    let Some(gpu) = common::gpu() else { return };
    let ctx = &gpu.ctx;

    let image = Image::new(
        ctx,
        &ImageDesc::d2(Format::R8G8B8A8Unorm, 2, 2).with_name("sampled 2x2"),
    )
    .unwrap();
    let sampler = Sampler::new(ctx, &SamplerDesc::nearest()).unwrap();
    let pipeline =
        ComputePipeline::new(ctx, &common::sampling_kernel(), Some("sample"))
            .unwrap();

    let reds = [0u8, 127, 255, 64];
    let pixels: Vec<[u8; 4]> = reds.iter().map(|&r| [r, 10, 20, 255]).collect();
    let copy = ImageCopy::whole(&image);
    assert_eq!(copy.buffer_len(Format::R8G8B8A8Unorm), 16);

    let staging = ctx.alloc(16).unwrap();
    ctx.write_pod(staging, &pixels).unwrap();
    let output = ctx.alloc(16).unwrap();
    ctx.write_pod(output, &[-1.0f32; 4]).unwrap();
    let args = ctx.alloc(size_of::<SampleArgs>()).unwrap();
    ctx.write_pod(
        args,
        &[SampleArgs {
            out: ctx.host_to_device(output.as_ptr()).unwrap(),
            image: image.sampled_descriptor().index(),
            sampler: sampler.descriptor().index(),
        }],
    )
    .unwrap();

    let mut cmd = CommandBuffer::new(ctx, QueueRole::Compute).unwrap();
    cmd.init_discard_image(&image);
    cmd.copy_buffer_to_image(
        ctx.host_to_device(staging.as_ptr()).unwrap(),
        &image,
        &copy,
    )
    .unwrap();
    cmd.barrier(
        PipelineStage::TRANSFER,
        Access::TRANSFER_WRITE,
        PipelineStage::COMPUTE,
        Access::SHADER_READ,
    );
    cmd.dispatch(
        &pipeline,
        4,
        1,
        1,
        ctx.host_to_device(args.as_ptr()).unwrap(),
    )
    .unwrap();
    cmd.barrier(
        PipelineStage::COMPUTE,
        Access::SHADER_WRITE,
        PipelineStage::HOST,
        Access::HOST_READ,
    );
    let token = cmd.submit(&[]).unwrap();
    ctx.wait(token).unwrap();

    let mut sampled = [0.0f32; 4];
    ctx.read_pod(output, &mut sampled).unwrap();
    for (value, red) in sampled.iter().zip(reds) {
        let expected = red as f32 / 255.0;
        assert!(
            (value - expected).abs() < 1e-2,
            "sampled {value}, expected {expected}"
        );
    }
    assert!((sampled[1] - 0.498).abs() < 1e-2);

    for ptr in [staging, output, args] {
        ctx.free(ptr).unwrap();
    }
}

#[test]
fn image_contents_copy_back_to_host() {
    let Some(gpu) = common::gpu() else { return };
    let ctx = &gpu.ctx;
    let image =
        Image::new(ctx, &ImageDesc::d2(Format::R32Float, 4, 2)).unwrap();
    let copy = ImageCopy::whole(&image);
    let len = copy.buffer_len(Format::R32Float) as usize;
    assert_eq!(len, 32);

    let values: Vec<f32> = (0..8).map(|i| i as f32 * 1.5).collect();
    let upload = ctx.alloc(len).unwrap();
    ctx.write_pod(upload, &values).unwrap();
    let readback = ctx.alloc(len).unwrap();

    let mut cmd = CommandBuffer::new(ctx, QueueRole::Transfer).unwrap();
    cmd.init_discard_image(&image);
    cmd.copy_buffer_to_image(
        ctx.host_to_device(upload.as_ptr()).unwrap(),
        &image,
        &copy,
    )
    .unwrap();
    cmd.barrier(
        PipelineStage::TRANSFER,
        Access::TRANSFER_WRITE,
        PipelineStage::TRANSFER,
        Access::TRANSFER_READ,
    );
    cmd.copy_image_to_buffer(
        &image,
        ctx.host_to_device(readback.as_ptr()).unwrap(),
        &copy,
    )
    .unwrap();
    cmd.barrier(
        PipelineStage::TRANSFER,
        Access::TRANSFER_WRITE,
        PipelineStage::HOST,
        Access::HOST_READ,
    );
    ctx.wait(cmd.submit(&[]).unwrap()).unwrap();

    let mut out = vec![0.0f32; 8];
    ctx.read_pod(readback, &mut out).unwrap();
    assert_eq!(out, values);

    // A region larger than the destination allocation is refused.
    let small = ctx.alloc(8).unwrap();
    let mut cmd = CommandBuffer::new(ctx, QueueRole::Transfer).unwrap();
    assert!(
        cmd.copy_image_to_buffer(
            &image,
            ctx.host_to_device(small.as_ptr()).unwrap(),
            &copy
        )
        .is_err()
    );
    drop(cmd);

    for ptr in [upload, readback, small] {
        ctx.free(ptr).unwrap();
    }
}

#[test]
fn srgb_images_have_no_storage_descriptor() {
    let Some(gpu) = common::gpu() else { return };
    let ctx = &gpu.ctx;

    let srgb =
        Image::new(ctx, &ImageDesc::d2(Format::R8G8B8A8Srgb, 8, 8)).unwrap();
    assert!(srgb.storage_descriptor().is_none());

    let unorm =
        Image::new(ctx, &ImageDesc::d2(Format::R8G8B8A8Unorm, 8, 8)).unwrap();
    let storage = unorm.storage_descriptor();
    assert!(storage.is_some());
    assert_ne!(srgb.sampled_descriptor(), unorm.sampled_descriptor());

    // A swizzled view shares the memory but is not storage-eligible.
    let swizzled = unorm
        .create_view(&ImageViewDesc {
            components: vk::ComponentMapping {
                r: vk::ComponentSwizzle::B,
                g: vk::ComponentSwizzle::G,
                b: vk::ComponentSwizzle::R,
                a: vk::ComponentSwizzle::A,
            },
            ..*unorm.view_desc()
        })
        .unwrap();
    assert!(swizzled.storage_descriptor().is_none());
    assert_eq!(swizzled.raw_image(), unorm.raw_image());

    // The memory outlives the view it was created with.
    let raw_image = unorm.raw_image();
    drop(unorm);
    assert_eq!(swizzled.raw_image(), raw_image);
    assert_eq!(std::rc::Rc::strong_count(swizzled.storage()), 1);
}

#[test]
fn block_compressed_images_are_sample_only() {
    let Some(gpu) = common::gpu() else { return };
    let ctx = &gpu.ctx;

    let bc7 = Image::new(
        ctx,
        &ImageDesc {
            mip_levels: 3,
            ..ImageDesc::d2(Format::Bc7RgbaUnorm, 16, 16)
        },
    )
    .unwrap();
    assert!(bc7.storage_descriptor().is_none());
    assert!(
        bc7.storage()
            .usage()
            .contains(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST)
    );

    let srgb = bc7
        .create_view(&ImageViewDesc {
            format: Format::Bc7RgbaSrgb,
            ..*bc7.view_desc()
        })
        .unwrap();
    assert_ne!(srgb.sampled_descriptor(), bc7.sampled_descriptor());
}

#[test]
fn released_slots_are_reused() {
    let Some(gpu) = common::gpu() else { return };
    let ctx = &gpu.ctx;

    let first = Sampler::new(ctx, &SamplerDesc::default()).unwrap();
    let second = Sampler::new(ctx, &SamplerDesc::nearest()).unwrap();
    assert_ne!(first.descriptor(), second.descriptor());

    let freed = first.descriptor();
    drop(first);
    let third = Sampler::new(ctx, &SamplerDesc::default()).unwrap();
    assert_eq!(third.descriptor(), freed);
    assert_ne!(third.descriptor(), second.descriptor());
}

#[test]
fn invalid_image_descriptions_are_rejected() {
    let Some(gpu) = common::gpu() else { return };
    let ctx = &gpu.ctx;

    assert!(matches!(
        Image::new(ctx, &ImageDesc::d2(Format::Undefined, 4, 4)),
        Err(CreateImageError::UndefinedFormat)
    ));
    assert!(matches!(
        Image::new(ctx, &ImageDesc::d2(Format::R8G8B8A8Unorm, 0, 4)),
        Err(CreateImageError::ZeroExtent(_))
    ));
    assert!(matches!(
        Image::new(
            ctx,
            &ImageDesc {
                ty: ImageType::Cube,
                array_layers: 4,
                ..ImageDesc::d2(Format::R8G8B8A8Unorm, 4, 4)
            }
        ),
        Err(CreateImageError::InvalidLayerCount { .. })
    ));

    assert!(matches!(
        Image::new(
            ctx,
            &ImageDesc {
                mip_levels: 0,
                ..ImageDesc::d2(Format::R8G8B8A8Unorm, 4, 4)
            }
        ),
        Err(CreateImageError::InvalidMipLevels { requested: 0, max: 3 })
    ));
    assert!(matches!(
        Image::new(
            ctx,
            &ImageDesc {
                mip_levels: 4,
                ..ImageDesc::d2(Format::R8G8B8A8Unorm, 4, 4)
            }
        ),
        Err(CreateImageError::InvalidMipLevels { requested: 4, max: 3 })
    ));
    assert!(matches!(
        Image::new(
            ctx,
            &ImageDesc {
                ty: ImageType::Cube,
                array_layers: 6,
                ..ImageDesc::d2(Format::R8G8B8A8Unorm, 8, 4)
            }
        ),
        Err(CreateImageError::NonSquareCube { width: 8, height: 4 })
    ));

    let image =
        Image::new(ctx, &ImageDesc::d2(Format::R8G8B8A8Unorm, 4, 4)).unwrap();
    assert!(matches!(
        image.create_view(&ImageViewDesc {
            base_mip_level: 1,
            ..*image.view_desc()
        }),
        Err(CreateImageError::InvalidViewRange { .. })
    ));
    assert!(matches!(
        image.create_view(&ImageViewDesc {
            ty: ImageType::D3,
            ..*image.view_desc()
        }),
        Err(CreateImageError::IncompatibleViewType {
            image: ImageType::D2,
            view: ImageType::D3
        })
    ));
    assert!(matches!(
        image.create_view(&ImageViewDesc {
            ty: ImageType::Cube,
            array_layer_count: 6,
            ..*image.view_desc()
        }),
        Err(CreateImageError::InvalidViewRange { .. })
    ));
    assert!(matches!(
        image.create_view(&ImageViewDesc {
            format: Format::R32G32Float,
            ..*image.view_desc()
        }),
        Err(CreateImageError::IncompatibleViewFormat { .. })
    ));
}

#[test]
fn srgb_view_reinterprets_unorm_image() {
    let Some(gpu) = common::gpu() else { return };
    let ctx = &gpu.ctx;

    let unorm =
        Image::new(ctx, &ImageDesc::d2(Format::R8G8B8A8Unorm, 4, 4)).unwrap();
    let srgb = unorm
        .create_view(&ImageViewDesc {
            format: Format::R8G8B8A8Srgb,
            ..*unorm.view_desc()
        })
        .unwrap();

    assert_eq!(srgb.format(), Format::R8G8B8A8Srgb);
    assert_eq!(srgb.storage().format(), Format::R8G8B8A8Unorm);
    assert_eq!(srgb.raw_image(), unorm.raw_image());
    assert_ne!(srgb.raw_view(), unorm.raw_view());
    assert_ne!(srgb.sampled_descriptor(), unorm.sampled_descriptor());
    assert!(unorm.storage_descriptor().is_some());
    assert!(srgb.storage_descriptor().is_none());
    assert_eq!(std::rc::Rc::strong_count(unorm.storage()), 2);
}

#[test]
fn sub_range_views_cover_one_mip_and_layer() {
    let Some(gpu) = common::gpu() else { return };
    let ctx = &gpu.ctx;

    let array = Image::new(
        ctx,
        &ImageDesc {
            ty: ImageType::D2Array,
            mip_levels: 4,
            array_layers: 3,
            ..ImageDesc::d2(Format::R8G8B8A8Unorm, 8, 8).with_name("mipped array")
        },
    )
    .unwrap();
    let whole = *array.view_desc();
    assert_eq!(whole.mip_level_count, 4);
    assert_eq!(whole.array_layer_count, 3);
    assert_eq!(array.storage().full_range().level_count, 4);

    let slice = array
        .create_view(&ImageViewDesc {
            ty: ImageType::D2,
            base_mip_level: 2,
            mip_level_count: 1,
            base_array_layer: 1,
            array_layer_count: 1,
            ..whole
        })
        .unwrap();
    let desc = slice.view_desc();
    assert_eq!(slice.ty(), ImageType::D2);
    assert_eq!((desc.base_mip_level, desc.mip_level_count), (2, 1));
    assert_eq!((desc.base_array_layer, desc.array_layer_count), (1, 1));
    assert_eq!(slice.format().aspect_flags(), vk::ImageAspectFlags::COLOR);

    // The single-mip view is still storage-eligible and gets its own slots.
    let storage = slice.storage_descriptor().unwrap();
    assert_ne!(Some(storage), array.storage_descriptor());
    assert_ne!(slice.sampled_descriptor(), array.sampled_descriptor());

    // Layers past the end of the image are refused.
    assert!(matches!(
        array.create_view(&ImageViewDesc {
            base_array_layer: 2,
            array_layer_count: 2,
            ..whole
        }),
        Err(CreateImageError::InvalidViewRange { .. })
    ));
}

#[test]
fn small_descriptor_arrays_run_out() {
    common::init_tracing();
    let _lock = common::lock();
    let Some(ctx) = common::context(ContextConfig {
        descriptor_capacities: DescriptorCapacities {
            sampled_images: 2,
            storage_images: 1,
            samplers: 1,
        },
        ..ContextConfig::default()
    }) else {
        return;
    };
    let ctx = &ctx;

    let sampler = Sampler::new(ctx, &SamplerDesc::default()).unwrap();
    assert!(matches!(
        Sampler::new(ctx, &SamplerDesc::nearest()),
        Err(CreateSamplerError::Descriptor(DescriptorError::Exhausted {
            kind: "sampler",
            capacity: 1
        }))
    ));
    drop(sampler);
    let sampler = Sampler::new(ctx, &SamplerDesc::nearest()).unwrap();

    // Takes one sampled and the only storage slot.
    let first =
        Image::new(ctx, &ImageDesc::d2(Format::R8G8B8A8Unorm, 4, 4)).unwrap();
    assert!(first.storage_descriptor().is_some());
    assert!(matches!(
        Image::new(ctx, &ImageDesc::d2(Format::R8G8B8A8Unorm, 4, 4)),
        Err(CreateImageError::Descriptor(DescriptorError::Exhausted {
            kind: "storage image",
            capacity: 1
        }))
    ));

    // The failed image gave its sampled slot back, so an sRGB image, which
    // needs no storage slot, still fits.
    let second =
        Image::new(ctx, &ImageDesc::d2(Format::R8G8B8A8Srgb, 4, 4)).unwrap();
    assert!(matches!(
        Image::new(ctx, &ImageDesc::d2(Format::R8G8B8A8Srgb, 4, 4)),
        Err(CreateImageError::Descriptor(DescriptorError::Exhausted {
            kind: "sampled image",
            capacity: 2
        }))
    ));

    drop((first, second, sampler));
}
