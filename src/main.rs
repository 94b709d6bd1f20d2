use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use matcap::compositor::RenderContext;
use matcap::export::ExportPipeline;
use matcap::project::{self, REGISTRY};
use matcap::settings::Settings;
use matcap::viewport::PreviewMode;
use matcap::{create_backend, logging};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("MATCAP_GIT_HASH"), ")");

#[derive(Debug, Parser)]
#[command(name = "matcap")]
#[command(about = "Layered matcap renderer")]
#[command(version = VERSION)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace). MATCAP_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render a project to a PNG or JPEG matcap.
    Render(RenderArgs),
    /// Load a project and report its layers.
    Check { project: PathBuf },
    /// List the registered layer types.
    Layers,
}

#[derive(Debug, clap::Args)]
struct RenderArgs {
    project: PathBuf,
    #[arg(short = 'o', long = "output")]
    output: PathBuf,
    /// Square output size in pixels.
    #[arg(long)]
    size: Option<u32>,
    /// Edge dilation radius in pixels.
    #[arg(long)]
    padding: Option<u32>,
    /// single or comparison.
    #[arg(long)]
    preview: Option<PreviewMode>,
    /// Normal map applied to every layer.
    #[arg(long = "normal-map")]
    normal_map: Option<PathBuf>,
    #[arg(long = "normal-strength", default_value_t = 1.0)]
    normal_strength: f32,
    #[arg(long = "normal-scale", default_value_t = 1.0)]
    normal_scale: f32,
    /// Use the CPU rasterizer instead of the GPU.
    #[arg(long)]
    software: bool,
    /// YAML settings file.
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Override a layer value: `index.param=value` (repeatable).
    #[arg(long = "set", value_name = "INDEX.PARAM=VALUE")]
    assignments: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Render(args) => run_render(&args),
        Commands::Check { project } => run_check(&project),
        Commands::Layers => run_layers(),
    }
}

fn run_check(project_path: &Path) -> Result<()> {
    let stack = project::load_stack(project_path)?;
    println!("OK: {} ({} layers)", project_path.display(), stack.len());
    for (index, layer) in stack.iter().enumerate() {
        let common = layer.common();
        println!(
            "  [{index}] {} ({}) {} opacity={:.2}{}",
            layer.name(),
            layer.type_tag(),
            common.blend_mode(),
            common.opacity(),
            if common.enabled() { "" } else { " disabled" }
        );
    }
    Ok(())
}

fn run_layers() -> Result<()> {
    for entry in REGISTRY {
        let layer = (entry.create)();
        let params = layer
            .params_value()
            .as_object()
            .map(|object| object.keys().cloned().collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        println!(
            "{:<22} {:<18} {:<12} {}",
            entry.type_tag,
            layer.name(),
            layer.common().blend_mode(),
            params
        );
    }
    Ok(())
}

fn run_render(args: &RenderArgs) -> Result<()> {
    let settings = Settings::load_or_default(args.settings.as_deref())?;
    let mut options = settings.export_options();
    if let Some(size) = args.size {
        options.resolution = size;
    }
    if let Some(padding) = args.padding {
        options.padding = padding;
    }
    if let Some(mode) = args.preview {
        options.preview_mode = Some(mode);
    }
    anyhow::ensure!(options.resolution > 0, "--size must be > 0");

    let mut stack = project::load_stack(&args.project)?;
    for assignment in &args.assignments {
        project::apply_assignment(&mut stack, assignment)?;
    }

    let mut backend = create_backend(args.software);
    tracing::info!(backend = backend.name(), layers = stack.len(), "rendering project");
    let failures = stack.initialize_all(backend.as_mut());
    if failures > 0 {
        tracing::warn!(failures, "some layers failed to initialize and will be skipped");
    }

    let mut ctx = RenderContext {
        normal_strength: args.normal_strength,
        normal_scale: args.normal_scale,
        ..RenderContext::default()
    };
    if let Some(path) = &args.normal_map {
        let texture = backend
            .load_texture(path)
            .with_context(|| format!("failed to load normal map {}", path.display()))?;
        ctx.normal_map = Some(texture);
        ctx.use_normal_map = true;
    }

    let output = settings.resolve_output(&args.output);
    let result = ExportPipeline::new(options).export_to_file(backend.as_mut(), &mut stack, &ctx, &output);

    stack.clear(backend.as_mut());
    if let Some(texture) = ctx.normal_map {
        backend.release_texture(texture);
    }
    result?;

    println!("Wrote {}", output.display());
    Ok(())
}
