//! kiln CLI: build service images and run containers from them

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use kiln::{
    ContainerRunner, ImageBuilder, ImageRecipe, KilnConfig, ResourceLimits, RunOptions,
};

#[derive(Parser)]
#[command(name = "kiln", about = "Deterministic service-image builder and runner")]
struct Cli {
    /// Configuration file (JSON); defaults are used when absent
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an image from a recipe and a build context
    Build {
        /// Recipe file
        #[arg(long, default_value = "kiln.json")]
        recipe: PathBuf,
        /// Directory holding the manifest and entry script
        #[arg(long, default_value = ".")]
        context: PathBuf,
        /// Tag for the committed image (defaults to "<name>:latest")
        #[arg(long)]
        tag: Option<String>,
    },
    /// Start a container and wait for it; exits with the container's code
    Run {
        /// Image tag or id
        image: String,
        /// Apply cgroup limits: small, medium or large
        #[arg(long)]
        limits: Option<String>,
        /// Disable the syscall denylist
        #[arg(long)]
        no_seccomp: bool,
    },
    /// List tagged images
    Images,
    /// Remove a tag (and its image, once untagged)
    Rm {
        /// Image tag
        tag: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    kiln::logging::init_logging("kiln");

    let cli = Cli::parse();
    let config = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "could not load configuration");
            return ExitCode::FAILURE;
        }
    };

    match run_command(cli.command, &config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<KilnConfig, kiln::BuildError> {
    match path {
        Some(p) => KilnConfig::load(p),
        None => Ok(KilnConfig::default()),
    }
}

async fn run_command(
    command: Commands,
    config: &KilnConfig,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {
        Commands::Build { recipe, context, tag } => {
            let recipe = ImageRecipe::load(&recipe)?;
            let builder = ImageBuilder::new(config)?;
            let image = builder.build(&recipe, &context, tag.as_deref()).await?;
            println!("{}  {}", image.tag, image.id);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            image,
            limits,
            no_seccomp,
        } => {
            let options = RunOptions {
                limits: limits.as_deref().map(parse_limits).transpose()?,
                seccomp: !no_seccomp,
            };
            let runner = ContainerRunner::new(config)?;
            // The entry process's exit code is the container's exit code,
            // passed through uninterpreted.
            let code = runner.run(&image, &options)?;
            Ok(ExitCode::from(code.clamp(0, 255) as u8))
        }
        Commands::Images => {
            let builder = ImageBuilder::new(config)?;
            for (tag, id) in builder.store().list()? {
                println!("{}  {}", tag, id);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Rm { tag } => {
            let builder = ImageBuilder::new(config)?;
            builder.store().remove(&tag)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn parse_limits(name: &str) -> Result<ResourceLimits, Box<dyn std::error::Error>> {
    match name {
        "small" => Ok(ResourceLimits::small()),
        "medium" => Ok(ResourceLimits::medium()),
        "large" => Ok(ResourceLimits::large()),
        other => Err(format!("unknown limits preset '{}'", other).into()),
    }
}
