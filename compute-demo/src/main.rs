#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

//! Runs one compute shader over a list of floats.
//!
//! The shader receives the device address of the float array as its push
//! constant and is dispatched with one workgroup per value.
//! `shaders/double.comp` is an example; compile it with
//! `glslc --target-env=vulkan1.3 shaders/double.comp -o double.spv`.

use std::{
    fs::{self, File},
    path::PathBuf,
    rc::Rc,
};

use clap::Parser;
use eyre::{WrapErr, bail};
use rcompute::{
    Access, CommandBuffer, ComputePipeline, ContextConfig, Instance,
    Context, PipelineStage, QueueRole, VulkanLogLevel,
};
use tracing_subscriber::{
    Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Verbosity of the demo's own log output, most verbose first.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, clap::ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    #[default]
    Error,
    Off,
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliVulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl From<CliVulkanLogLevel> for VulkanLogLevel {
    fn from(value: CliVulkanLogLevel) -> Self {
        match value {
            CliVulkanLogLevel::Verbose => VulkanLogLevel::Verbose,
            CliVulkanLogLevel::Info => VulkanLogLevel::Info,
            CliVulkanLogLevel::Warning => VulkanLogLevel::Warning,
            CliVulkanLogLevel::Error => VulkanLogLevel::Error,
        }
    }
}

#[derive(clap::Parser, Debug)]
#[command(about = "Run a compute shader over a list of floats")]
struct CliArgs {
    #[arg(short, long, value_enum, default_value_t)]
    log_level: LogLevel,
    /// Enable validation and forward its messages at this severity.
    #[arg(short = 'g', long)]
    validation: Option<CliVulkanLogLevel>,
    /// SPIR-V module with a `main` entry point.
    #[arg(short, long)]
    shader: PathBuf,
    /// Input values, one workgroup each.
    #[arg(short, long, num_args = 1.., allow_negative_numbers = true, value_delimiter = ',', default_value = "1,2,3,4")]
    values: Vec<f32>,
}

/// Where the full log goes: the runtime directory when the platform has
/// one, otherwise the data directory, otherwise the working directory.
fn log_file_path() -> eyre::Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "rcompute", "compute-demo");
    let dir = match dirs.as_ref() {
        Some(dirs) => dirs.runtime_dir().unwrap_or(dirs.data_dir()).to_owned(),
        None => std::env::current_dir()?,
    };
    fs::create_dir_all(&dir)?;
    Ok(dir.join("compute-demo.log"))
}

/// Terminal output filtered at `level`; the log file keeps everything.
fn init_logging(level: LogLevel) -> eyre::Result<()> {
    if level == LogLevel::Off {
        return Ok(());
    }

    let path = log_file_path()?;
    let file = File::create(&path)
        .wrap_err_with(|| format!("creating {}", path.display()))?;
    let file_log = tracing_subscriber::fmt::layer()
        .with_writer(file)
        .with_ansi(false);
    let stderr_log = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(LevelFilter::from(level));

    tracing_subscriber::registry()
        .with(stderr_log.and_then(file_log))
        .init();
    tracing::info!("Logging to {}", path.display());
    Ok(())
}

fn run(ctx: &Rc<Context>, code: &[u8], values: &[f32]) -> eyre::Result<Vec<f32>> {
    let pipeline = ComputePipeline::new(ctx, code, Some("demo kernel"))?;

    let data = ctx.alloc(size_of_val(values))?;
    let result = (|| -> eyre::Result<Vec<f32>> {
        ctx.write_pod(data, values)?;
        let addr = ctx.host_to_device(data.as_ptr())?;
        tracing::info!("Dispatching {} workgroups at {:#x}", values.len(), addr.raw());

        let mut cmd = CommandBuffer::new(ctx, QueueRole::Compute)?;
        cmd.dispatch(&pipeline, values.len() as u32, 1, 1, addr)?;
        cmd.barrier(
            PipelineStage::COMPUTE,
            Access::SHADER_WRITE,
            PipelineStage::HOST,
            Access::HOST_READ,
        );
        let token = cmd.submit(&[])?;
        ctx.wait(token)?;

        let mut out = vec![0.0f32; values.len()];
        ctx.read_pod(data, &mut out)?;
        Ok(out)
    })();
    ctx.free(data)?;
    result
}

fn main() -> eyre::Result<()> {
    let cli_args = CliArgs::parse();
    init_logging(cli_args.log_level)?;

    if cli_args.values.is_empty() {
        bail!("--values needs at least one value");
    }
    let code = fs::read(&cli_args.shader)
        .wrap_err_with(|| format!("reading {}", cli_args.shader.display()))?;

    // SAFETY: this is the only place the process loads the Vulkan loader.
    let instance = Rc::new(unsafe {
        Instance::new("compute-demo", cli_args.validation.map(VulkanLogLevel::from))
    }?);
    let device = instance.create_compute_device()?;
    let ctx = Context::new(device.context_desc(ContextConfig::default()))?;

    let out = run(&ctx, &code, &cli_args.values)?;
    for (input, output) in cli_args.values.iter().zip(&out) {
        println!("{input} -> {output}");
    }
    Ok(())
}
