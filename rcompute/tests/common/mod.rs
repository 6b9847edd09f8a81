//! Shared setup for the GPU integration tests.
//!
//! Each test grabs [`gpu`], which returns `None` (and logs why) on machines
//! without a Vulkan 1.3 loader or a capable device. Only one context may be
//! live, so tests serialize on a process-wide lock held for the lifetime
//! of the returned [`Gpu`].
//!
//! The compute kernels are assembled here word by word so the tests do not
//! depend on a shader compiler.

#![allow(dead_code)]

use std::rc::Rc;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rcompute::{Context, ContextConfig, Instance, VulkanLogLevel};

static GPU_LOCK: Mutex<()> = Mutex::new(());

pub struct Gpu {
    pub ctx: Rc<Context>,
    _lock: MutexGuard<'static, ()>,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Serialize with the other GPU tests without creating a context.
pub fn lock() -> MutexGuard<'static, ()> {
    GPU_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bootstrap a device and context, or `None` if this machine cannot.
pub fn gpu() -> Option<Gpu> {
    init_tracing();
    let lock = lock();
    let ctx = context(ContextConfig::default())?;
    Some(Gpu { ctx, _lock: lock })
}

/// Create a context without taking the lock. Callers hold [`lock`].
pub fn context(config: ContextConfig) -> Option<Rc<Context>> {
    // SAFETY: loads the system Vulkan loader.
    let instance = match unsafe {
        Instance::new("rcompute-tests", Some(VulkanLogLevel::Warning))
    } {
        Ok(instance) => Rc::new(instance),
        Err(e) => {
            tracing::warn!("Skipping GPU test, no Vulkan instance: {e}");
            return None;
        }
    };
    let device = match instance.create_compute_device() {
        Ok(device) => device,
        Err(e) => {
            tracing::warn!("Skipping GPU test, no capable device: {e}");
            return None;
        }
    };
    Some(
        Context::new(device.context_desc(config))
            .expect("context creation on a capable device"),
    )
}

// ---------------------------------------------------------------------------
// SPIR-V assembly
// ---------------------------------------------------------------------------

mod op {
    pub const EXTENSION: u16 = 10;
    pub const MEMORY_MODEL: u16 = 14;
    pub const ENTRY_POINT: u16 = 15;
    pub const EXECUTION_MODE: u16 = 16;
    pub const CAPABILITY: u16 = 17;
    pub const TYPE_VOID: u16 = 19;
    pub const TYPE_INT: u16 = 21;
    pub const TYPE_FLOAT: u16 = 22;
    pub const TYPE_VECTOR: u16 = 23;
    pub const TYPE_IMAGE: u16 = 25;
    pub const TYPE_SAMPLER: u16 = 26;
    pub const TYPE_SAMPLED_IMAGE: u16 = 27;
    pub const TYPE_RUNTIME_ARRAY: u16 = 29;
    pub const TYPE_STRUCT: u16 = 30;
    pub const TYPE_POINTER: u16 = 32;
    pub const TYPE_FUNCTION: u16 = 33;
    pub const CONSTANT: u16 = 43;
    pub const FUNCTION: u16 = 54;
    pub const FUNCTION_END: u16 = 56;
    pub const VARIABLE: u16 = 59;
    pub const LOAD: u16 = 61;
    pub const STORE: u16 = 62;
    pub const ACCESS_CHAIN: u16 = 65;
    pub const DECORATE: u16 = 71;
    pub const MEMBER_DECORATE: u16 = 72;
    pub const COMPOSITE_CONSTRUCT: u16 = 80;
    pub const COMPOSITE_EXTRACT: u16 = 81;
    pub const SAMPLED_IMAGE: u16 = 86;
    pub const IMAGE_SAMPLE_EXPLICIT_LOD: u16 = 88;
    pub const CONVERT_U_TO_F: u16 = 112;
    pub const F_ADD: u16 = 129;
    pub const F_MUL: u16 = 133;
    pub const SHIFT_RIGHT_LOGICAL: u16 = 194;
    pub const BITWISE_AND: u16 = 199;
    pub const LABEL: u16 = 248;
    pub const RETURN: u16 = 253;
}

const CAP_SHADER: u32 = 1;
const CAP_RUNTIME_DESCRIPTOR_ARRAY: u32 = 5302;
const CAP_PHYSICAL_STORAGE_BUFFER: u32 = 5347;
const ADDRESSING_PHYSICAL_STORAGE_BUFFER_64: u32 = 5348;
const MEMORY_MODEL_GLSL450: u32 = 1;
const EXECUTION_MODEL_GL_COMPUTE: u32 = 5;
const EXECUTION_MODE_LOCAL_SIZE: u32 = 17;

const DECORATION_BLOCK: u32 = 2;
const DECORATION_ARRAY_STRIDE: u32 = 6;
const DECORATION_BUILT_IN: u32 = 11;
const DECORATION_BINDING: u32 = 33;
const DECORATION_DESCRIPTOR_SET: u32 = 34;
const DECORATION_OFFSET: u32 = 35;
const BUILT_IN_WORKGROUP_ID: u32 = 26;

const STORAGE_UNIFORM_CONSTANT: u32 = 0;
const STORAGE_INPUT: u32 = 1;
const STORAGE_PUSH_CONSTANT: u32 = 9;
const STORAGE_PHYSICAL_STORAGE_BUFFER: u32 = 5349;

const MEMORY_ALIGNED: u32 = 0x2;
const IMAGE_OPERAND_LOD: u32 = 0x2;
const DIM_2D: u32 = 1;

/// Minimal SPIR-V 1.5 module writer.
///
/// Ids are handed out by [`id`](Self::id) before use, so instructions can
/// be emitted in the order the module layout requires while referring to
/// ids defined later.
struct Assembler {
    words: Vec<u32>,
    bound: u32,
}

impl Assembler {
    fn new() -> Self {
        Self {
            words: Vec::new(),
            bound: 1,
        }
    }

    fn id(&mut self) -> u32 {
        let id = self.bound;
        self.bound += 1;
        id
    }

    fn op(&mut self, opcode: u16, operands: &[u32]) {
        let count = (operands.len() + 1) as u32;
        self.words.push((count << 16) | opcode as u32);
        self.words.extend_from_slice(operands);
    }

    fn op_with_str(&mut self, opcode: u16, before: &[u32], s: &str, after: &[u32]) {
        let mut operands = before.to_vec();
        operands.extend(string_words(s));
        operands.extend_from_slice(after);
        self.op(opcode, &operands);
    }

    fn finish(self) -> Vec<u8> {
        let header = [0x0723_0203, 0x0001_0500, 0, self.bound, 0];
        header
            .iter()
            .chain(&self.words)
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }
}

fn string_words(s: &str) -> Vec<u32> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// `main` doubles `data[gl_WorkGroupID.x]` in place, where `data` is the
/// float array at the pushed device address. Local size is 1.
pub fn doubling_kernel() -> Vec<u8> {
    let mut a = Assembler::new();
    let void = a.id();
    let fn_ty = a.id();
    let uint = a.id();
    let int = a.id();
    let float = a.id();
    let v3uint = a.id();
    let ptr_in_v3uint = a.id();
    let ptr_in_uint = a.id();
    let rt_float = a.id();
    let data = a.id();
    let ptr_psb_data = a.id();
    let pc_block = a.id();
    let ptr_pc_block = a.id();
    let ptr_pc_ptr = a.id();
    let ptr_psb_float = a.id();
    let int_0 = a.id();
    let float_2 = a.id();
    let workgroup_id = a.id();
    let pc = a.id();
    let main = a.id();
    let label = a.id();
    let idx_ptr = a.id();
    let idx = a.id();
    let data_ptr_ptr = a.id();
    let data_ptr = a.id();
    let elem = a.id();
    let value = a.id();
    let doubled = a.id();

    a.op(op::CAPABILITY, &[CAP_SHADER]);
    a.op(op::CAPABILITY, &[CAP_PHYSICAL_STORAGE_BUFFER]);
    a.op(
        op::MEMORY_MODEL,
        &[ADDRESSING_PHYSICAL_STORAGE_BUFFER_64, MEMORY_MODEL_GLSL450],
    );
    a.op_with_str(
        op::ENTRY_POINT,
        &[EXECUTION_MODEL_GL_COMPUTE, main],
        "main",
        &[workgroup_id, pc],
    );
    a.op(op::EXECUTION_MODE, &[main, EXECUTION_MODE_LOCAL_SIZE, 1, 1, 1]);

    a.op(
        op::DECORATE,
        &[workgroup_id, DECORATION_BUILT_IN, BUILT_IN_WORKGROUP_ID],
    );
    a.op(op::DECORATE, &[rt_float, DECORATION_ARRAY_STRIDE, 4]);
    a.op(op::MEMBER_DECORATE, &[data, 0, DECORATION_OFFSET, 0]);
    a.op(op::DECORATE, &[data, DECORATION_BLOCK]);
    a.op(op::MEMBER_DECORATE, &[pc_block, 0, DECORATION_OFFSET, 0]);
    a.op(op::DECORATE, &[pc_block, DECORATION_BLOCK]);

    a.op(op::TYPE_VOID, &[void]);
    a.op(op::TYPE_FUNCTION, &[fn_ty, void]);
    a.op(op::TYPE_INT, &[uint, 32, 0]);
    a.op(op::TYPE_INT, &[int, 32, 1]);
    a.op(op::TYPE_FLOAT, &[float, 32]);
    a.op(op::TYPE_VECTOR, &[v3uint, uint, 3]);
    a.op(op::TYPE_POINTER, &[ptr_in_v3uint, STORAGE_INPUT, v3uint]);
    a.op(op::TYPE_POINTER, &[ptr_in_uint, STORAGE_INPUT, uint]);
    a.op(op::TYPE_RUNTIME_ARRAY, &[rt_float, float]);
    a.op(op::TYPE_STRUCT, &[data, rt_float]);
    a.op(
        op::TYPE_POINTER,
        &[ptr_psb_data, STORAGE_PHYSICAL_STORAGE_BUFFER, data],
    );
    a.op(op::TYPE_STRUCT, &[pc_block, ptr_psb_data]);
    a.op(op::TYPE_POINTER, &[ptr_pc_block, STORAGE_PUSH_CONSTANT, pc_block]);
    a.op(op::TYPE_POINTER, &[ptr_pc_ptr, STORAGE_PUSH_CONSTANT, ptr_psb_data]);
    a.op(
        op::TYPE_POINTER,
        &[ptr_psb_float, STORAGE_PHYSICAL_STORAGE_BUFFER, float],
    );
    a.op(op::CONSTANT, &[int, int_0, 0]);
    a.op(op::CONSTANT, &[float, float_2, 2.0f32.to_bits()]);
    a.op(op::VARIABLE, &[ptr_in_v3uint, workgroup_id, STORAGE_INPUT]);
    a.op(op::VARIABLE, &[ptr_pc_block, pc, STORAGE_PUSH_CONSTANT]);

    a.op(op::FUNCTION, &[void, main, 0, fn_ty]);
    a.op(op::LABEL, &[label]);
    a.op(op::ACCESS_CHAIN, &[ptr_in_uint, idx_ptr, workgroup_id, int_0]);
    a.op(op::LOAD, &[uint, idx, idx_ptr]);
    a.op(op::ACCESS_CHAIN, &[ptr_pc_ptr, data_ptr_ptr, pc, int_0]);
    a.op(op::LOAD, &[ptr_psb_data, data_ptr, data_ptr_ptr]);
    a.op(op::ACCESS_CHAIN, &[ptr_psb_float, elem, data_ptr, int_0, idx]);
    a.op(op::LOAD, &[float, value, elem, MEMORY_ALIGNED, 4]);
    a.op(op::F_MUL, &[float, doubled, value, float_2]);
    a.op(op::STORE, &[elem, doubled, MEMORY_ALIGNED, 4]);
    a.op(op::RETURN, &[]);
    a.op(op::FUNCTION_END, &[]);

    a.finish()
}

/// Argument blob read by [`sampling_kernel`].
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct SampleArgs {
    pub out: rcompute::DeviceAddress,
    pub image: u32,
    pub sampler: u32,
}

/// `main` samples texel `(i & 1, i >> 1)` of a 2×2 image at its centre,
/// with `i = gl_WorkGroupID.x`, and writes the red channel to `out[i]`.
/// The pushed address points at a [`SampleArgs`].
pub fn sampling_kernel() -> Vec<u8> {
    let mut a = Assembler::new();
    let void = a.id();
    let fn_ty = a.id();
    let uint = a.id();
    let int = a.id();
    let float = a.id();
    let v2float = a.id();
    let v4float = a.id();
    let v3uint = a.id();
    let ptr_in_v3uint = a.id();
    let ptr_in_uint = a.id();
    let image_ty = a.id();
    let sampler_ty = a.id();
    let sampled_image_ty = a.id();
    let rt_image = a.id();
    let rt_sampler = a.id();
    let ptr_uc_rt_image = a.id();
    let ptr_uc_rt_sampler = a.id();
    let ptr_uc_image = a.id();
    let ptr_uc_sampler = a.id();
    let rt_float = a.id();
    let out_block = a.id();
    let ptr_psb_out = a.id();
    let args_block = a.id();
    let ptr_psb_args = a.id();
    let ptr_psb_ptr_out = a.id();
    let ptr_psb_uint = a.id();
    let ptr_psb_float = a.id();
    let pc_block = a.id();
    let ptr_pc_block = a.id();
    let ptr_pc_args = a.id();
    let int_0 = a.id();
    let int_1 = a.id();
    let int_2 = a.id();
    let uint_1 = a.id();
    let float_0 = a.id();
    let float_half = a.id();
    let workgroup_id = a.id();
    let pc = a.id();
    let images = a.id();
    let samplers = a.id();
    let main = a.id();
    let label = a.id();
    let idx_ptr = a.id();
    let idx = a.id();
    let args_ptr_ptr = a.id();
    let args_ptr = a.id();
    let out_ptr_ptr = a.id();
    let out_ptr = a.id();
    let image_index_ptr = a.id();
    let image_index = a.id();
    let sampler_index_ptr = a.id();
    let sampler_index = a.id();
    let image_ptr = a.id();
    let image = a.id();
    let sampler_ptr = a.id();
    let sampler = a.id();
    let combined = a.id();
    let x = a.id();
    let y = a.id();
    let xf = a.id();
    let yf = a.id();
    let x_centre = a.id();
    let y_centre = a.id();
    let u = a.id();
    let v = a.id();
    let uv = a.id();
    let texel = a.id();
    let red = a.id();
    let dst = a.id();

    a.op(op::CAPABILITY, &[CAP_SHADER]);
    a.op(op::CAPABILITY, &[CAP_PHYSICAL_STORAGE_BUFFER]);
    a.op(op::CAPABILITY, &[CAP_RUNTIME_DESCRIPTOR_ARRAY]);
    a.op_with_str(op::EXTENSION, &[], "SPV_EXT_descriptor_indexing", &[]);
    a.op(
        op::MEMORY_MODEL,
        &[ADDRESSING_PHYSICAL_STORAGE_BUFFER_64, MEMORY_MODEL_GLSL450],
    );
    a.op_with_str(
        op::ENTRY_POINT,
        &[EXECUTION_MODEL_GL_COMPUTE, main],
        "main",
        &[workgroup_id, pc, images, samplers],
    );
    a.op(op::EXECUTION_MODE, &[main, EXECUTION_MODE_LOCAL_SIZE, 1, 1, 1]);

    a.op(
        op::DECORATE,
        &[workgroup_id, DECORATION_BUILT_IN, BUILT_IN_WORKGROUP_ID],
    );
    a.op(op::DECORATE, &[images, DECORATION_DESCRIPTOR_SET, 0]);
    a.op(
        op::DECORATE,
        &[images, DECORATION_BINDING, rcompute::descriptor::SAMPLED_IMAGE_BINDING],
    );
    a.op(op::DECORATE, &[samplers, DECORATION_DESCRIPTOR_SET, 0]);
    a.op(
        op::DECORATE,
        &[samplers, DECORATION_BINDING, rcompute::descriptor::SAMPLER_BINDING],
    );
    a.op(op::DECORATE, &[rt_float, DECORATION_ARRAY_STRIDE, 4]);
    a.op(op::MEMBER_DECORATE, &[out_block, 0, DECORATION_OFFSET, 0]);
    a.op(op::DECORATE, &[out_block, DECORATION_BLOCK]);
    a.op(op::MEMBER_DECORATE, &[args_block, 0, DECORATION_OFFSET, 0]);
    a.op(op::MEMBER_DECORATE, &[args_block, 1, DECORATION_OFFSET, 8]);
    a.op(op::MEMBER_DECORATE, &[args_block, 2, DECORATION_OFFSET, 12]);
    a.op(op::DECORATE, &[args_block, DECORATION_BLOCK]);
    a.op(op::MEMBER_DECORATE, &[pc_block, 0, DECORATION_OFFSET, 0]);
    a.op(op::DECORATE, &[pc_block, DECORATION_BLOCK]);

    a.op(op::TYPE_VOID, &[void]);
    a.op(op::TYPE_FUNCTION, &[fn_ty, void]);
    a.op(op::TYPE_INT, &[uint, 32, 0]);
    a.op(op::TYPE_INT, &[int, 32, 1]);
    a.op(op::TYPE_FLOAT, &[float, 32]);
    a.op(op::TYPE_VECTOR, &[v2float, float, 2]);
    a.op(op::TYPE_VECTOR, &[v4float, float, 4]);
    a.op(op::TYPE_VECTOR, &[v3uint, uint, 3]);
    a.op(op::TYPE_POINTER, &[ptr_in_v3uint, STORAGE_INPUT, v3uint]);
    a.op(op::TYPE_POINTER, &[ptr_in_uint, STORAGE_INPUT, uint]);
    a.op(op::TYPE_IMAGE, &[image_ty, float, DIM_2D, 0, 0, 0, 1, 0]);
    a.op(op::TYPE_SAMPLER, &[sampler_ty]);
    a.op(op::TYPE_SAMPLED_IMAGE, &[sampled_image_ty, image_ty]);
    a.op(op::TYPE_RUNTIME_ARRAY, &[rt_image, image_ty]);
    a.op(op::TYPE_RUNTIME_ARRAY, &[rt_sampler, sampler_ty]);
    a.op(
        op::TYPE_POINTER,
        &[ptr_uc_rt_image, STORAGE_UNIFORM_CONSTANT, rt_image],
    );
    a.op(
        op::TYPE_POINTER,
        &[ptr_uc_rt_sampler, STORAGE_UNIFORM_CONSTANT, rt_sampler],
    );
    a.op(op::TYPE_POINTER, &[ptr_uc_image, STORAGE_UNIFORM_CONSTANT, image_ty]);
    a.op(
        op::TYPE_POINTER,
        &[ptr_uc_sampler, STORAGE_UNIFORM_CONSTANT, sampler_ty],
    );
    a.op(op::TYPE_RUNTIME_ARRAY, &[rt_float, float]);
    a.op(op::TYPE_STRUCT, &[out_block, rt_float]);
    a.op(
        op::TYPE_POINTER,
        &[ptr_psb_out, STORAGE_PHYSICAL_STORAGE_BUFFER, out_block],
    );
    a.op(op::TYPE_STRUCT, &[args_block, ptr_psb_out, uint, uint]);
    a.op(
        op::TYPE_POINTER,
        &[ptr_psb_args, STORAGE_PHYSICAL_STORAGE_BUFFER, args_block],
    );
    a.op(
        op::TYPE_POINTER,
        &[ptr_psb_ptr_out, STORAGE_PHYSICAL_STORAGE_BUFFER, ptr_psb_out],
    );
    a.op(
        op::TYPE_POINTER,
        &[ptr_psb_uint, STORAGE_PHYSICAL_STORAGE_BUFFER, uint],
    );
    a.op(
        op::TYPE_POINTER,
        &[ptr_psb_float, STORAGE_PHYSICAL_STORAGE_BUFFER, float],
    );
    a.op(op::TYPE_STRUCT, &[pc_block, ptr_psb_args]);
    a.op(op::TYPE_POINTER, &[ptr_pc_block, STORAGE_PUSH_CONSTANT, pc_block]);
    a.op(op::TYPE_POINTER, &[ptr_pc_args, STORAGE_PUSH_CONSTANT, ptr_psb_args]);
    a.op(op::CONSTANT, &[int, int_0, 0]);
    a.op(op::CONSTANT, &[int, int_1, 1]);
    a.op(op::CONSTANT, &[int, int_2, 2]);
    a.op(op::CONSTANT, &[uint, uint_1, 1]);
    a.op(op::CONSTANT, &[float, float_0, 0.0f32.to_bits()]);
    a.op(op::CONSTANT, &[float, float_half, 0.5f32.to_bits()]);
    a.op(op::VARIABLE, &[ptr_in_v3uint, workgroup_id, STORAGE_INPUT]);
    a.op(op::VARIABLE, &[ptr_pc_block, pc, STORAGE_PUSH_CONSTANT]);
    a.op(op::VARIABLE, &[ptr_uc_rt_image, images, STORAGE_UNIFORM_CONSTANT]);
    a.op(
        op::VARIABLE,
        &[ptr_uc_rt_sampler, samplers, STORAGE_UNIFORM_CONSTANT],
    );

    a.op(op::FUNCTION, &[void, main, 0, fn_ty]);
    a.op(op::LABEL, &[label]);
    a.op(op::ACCESS_CHAIN, &[ptr_in_uint, idx_ptr, workgroup_id, int_0]);
    a.op(op::LOAD, &[uint, idx, idx_ptr]);
    a.op(op::ACCESS_CHAIN, &[ptr_pc_args, args_ptr_ptr, pc, int_0]);
    a.op(op::LOAD, &[ptr_psb_args, args_ptr, args_ptr_ptr]);
    a.op(
        op::ACCESS_CHAIN,
        &[ptr_psb_ptr_out, out_ptr_ptr, args_ptr, int_0],
    );
    a.op(op::LOAD, &[ptr_psb_out, out_ptr, out_ptr_ptr, MEMORY_ALIGNED, 8]);
    a.op(
        op::ACCESS_CHAIN,
        &[ptr_psb_uint, image_index_ptr, args_ptr, int_1],
    );
    a.op(op::LOAD, &[uint, image_index, image_index_ptr, MEMORY_ALIGNED, 4]);
    a.op(
        op::ACCESS_CHAIN,
        &[ptr_psb_uint, sampler_index_ptr, args_ptr, int_2],
    );
    a.op(
        op::LOAD,
        &[uint, sampler_index, sampler_index_ptr, MEMORY_ALIGNED, 4],
    );
    a.op(op::ACCESS_CHAIN, &[ptr_uc_image, image_ptr, images, image_index]);
    a.op(op::LOAD, &[image_ty, image, image_ptr]);
    a.op(
        op::ACCESS_CHAIN,
        &[ptr_uc_sampler, sampler_ptr, samplers, sampler_index],
    );
    a.op(op::LOAD, &[sampler_ty, sampler, sampler_ptr]);
    a.op(op::SAMPLED_IMAGE, &[sampled_image_ty, combined, image, sampler]);
    a.op(op::BITWISE_AND, &[uint, x, idx, uint_1]);
    a.op(op::SHIFT_RIGHT_LOGICAL, &[uint, y, idx, uint_1]);
    a.op(op::CONVERT_U_TO_F, &[float, xf, x]);
    a.op(op::CONVERT_U_TO_F, &[float, yf, y]);
    a.op(op::F_ADD, &[float, x_centre, xf, float_half]);
    a.op(op::F_ADD, &[float, y_centre, yf, float_half]);
    // Normalised coordinates of a 2-texel-wide image.
    a.op(op::F_MUL, &[float, u, x_centre, float_half]);
    a.op(op::F_MUL, &[float, v, y_centre, float_half]);
    a.op(op::COMPOSITE_CONSTRUCT, &[v2float, uv, u, v]);
    a.op(
        op::IMAGE_SAMPLE_EXPLICIT_LOD,
        &[v4float, texel, combined, uv, IMAGE_OPERAND_LOD, float_0],
    );
    a.op(op::COMPOSITE_EXTRACT, &[float, red, texel, 0]);
    a.op(op::ACCESS_CHAIN, &[ptr_psb_float, dst, out_ptr, int_0, idx]);
    a.op(op::STORE, &[dst, red, MEMORY_ALIGNED, 4]);
    a.op(op::RETURN, &[]);
    a.op(op::FUNCTION_END, &[]);

    a.finish()
}

#[test]
fn kernels_have_valid_headers() {
    for module in [doubling_kernel(), sampling_kernel()] {
        let words = rcompute::pipeline::spirv_words(&module).unwrap();
        assert_eq!(words[0], 0x0723_0203);
        assert!(words[3] > 1, "id bound must cover every id");
    }
}
