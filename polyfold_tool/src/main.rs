use std::{
    io,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre as ey;
use ey::eyre::Context;
use polyfold_content::{generator::ExternalGenerator, Pipeline, PipelineConfig, PipelineMode, PipelineReport};
use polyfold_shared::{
    log::{self, info, warn},
    Verbosity,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CommandLineArguments {
    #[clap(subcommand)]
    command: Command,

    /// YAML file with the pipeline configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log the intermediate results of every stage
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Turns a generated mesh into a game-ready GLB file
    Process {
        /// OBJ or PLY file
        #[arg(short, long)]
        input: PathBuf,

        /// GLB file that will be written
        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long, value_enum)]
        mode: Mode,
    },
    /// Runs the image-to-mesh generator and processes its output
    Generate {
        /// Image the mesh is generated from
        #[arg(long)]
        image: PathBuf,

        /// Directory for the generated files and the resulting `asset_<mode>.glb`
        #[arg(short, long)]
        output_dir: PathBuf,

        #[arg(short, long, value_enum)]
        mode: Mode,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Mode {
    /// Decimated prop with vertex colors
    Static,
    /// Remeshed character with baked textures
    Animatable,
}

impl From<Mode> for PipelineMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Static => PipelineMode::Static,
            Mode::Animatable => PipelineMode::Animatable,
        }
    }
}

fn setup_logging(verbose: bool) -> ey::Result<()> {
    let level = if verbose {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Info
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                polyfold_shared::chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(io::stdout())
        .apply()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    Ok(())
}

fn load_config(path: Option<&Path>, verbose: bool) -> ey::Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::from_yaml_file(path).wrap_err_with(|| format!("Failed to read {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if verbose {
        Ok(config.with_verbosity(Verbosity::Verbose))
    } else {
        Ok(config)
    }
}

fn log_report(report: &PipelineReport) {
    info!(
        "{} asset: {} -> {} polygons ({} vertices)",
        report.mode, report.input_polygons, report.output_polygons, report.output_vertices
    );
    if let Some(remesh_path) = report.remesh_path {
        info!("Remesh finished via {remesh_path:?}");
    }
    for warning in &report.warnings {
        warn!("{warning}");
    }
}

fn main() -> ey::Result<()> {
    ey::install()?;
    let command_line_arguments = CommandLineArguments::parse();
    setup_logging(command_line_arguments.verbose)?;
    let config = load_config(command_line_arguments.config.as_deref(), command_line_arguments.verbose)?;

    match command_line_arguments.command {
        Command::Process { input, output, mode } => {
            let pipeline = Pipeline::new(config);
            let report = pipeline
                .run(&input, &output, mode.into())
                .wrap_err_with(|| format!("Failed to process {}", input.display()))?;
            log_report(&report);
        }
        Command::Generate { image, output_dir, mode } => {
            let mode = PipelineMode::from(mode);
            let generator = ExternalGenerator::new(config.generator.clone());
            let mesh = generator
                .generate(&image, &output_dir, mode)
                .wrap_err("Failed to generate a mesh")?;

            let output = output_dir.join(format!("asset_{mode}.glb"));
            let pipeline = Pipeline::new(config);
            let report = pipeline
                .run(&mesh, &output, mode)
                .wrap_err_with(|| format!("Failed to process {}", mesh.display()))?;
            log_report(&report);
            info!("Asset written to {}", output.display());
        }
    }
    Ok(())
}
