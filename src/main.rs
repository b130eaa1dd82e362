//! CLI entry point for miya

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use miya::{Context, Environment, EnvironmentConfig, FileSystemLoader, Loader};

#[derive(Parser)]
#[command(name = "miya")]
#[command(version)]
#[command(about = "Render Jinja2-style templates from the command line", long_about = None)]
struct Cli {
    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a template with a JSON, YAML or TOML context
    #[command(alias = "r")]
    Render {
        /// Template name, relative to the template directories
        name: String,

        /// Template directory (repeatable, first match wins)
        #[arg(short = 't', long = "templates", default_value = ".")]
        dirs: Vec<PathBuf>,

        /// Context file (.json, .yaml/.yml or .toml)
        #[arg(short, long)]
        context: Option<PathBuf>,

        /// Environment config file (.yaml/.yml or .toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Fail on undefined variables
        #[arg(long)]
        strict: bool,

        /// Escape HTML in every template
        #[arg(long)]
        autoescape: bool,

        /// Write the output here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compile a template and report syntax errors
    Check {
        name: String,

        #[arg(short = 't', long = "templates", default_value = ".")]
        dirs: Vec<PathBuf>,
    },

    /// List templates found in the template directories
    List {
        #[arg(short = 't', long = "templates", default_value = ".")]
        dirs: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug { "miya=debug,info" } else { "miya=info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Render {
            name,
            dirs,
            context,
            config,
            strict,
            autoescape,
            output,
        } => {
            let mut env_config = match &config {
                Some(path) => EnvironmentConfig::load(path)
                    .with_context(|| format!("Failed to load config {:?}", path))?,
                None => EnvironmentConfig::default(),
            };
            if strict {
                env_config.strict_undefined = true;
            }
            if autoescape {
                env_config.autoescape = true.into();
            }

            let env = Environment::with_config(env_config).with_loader(FileSystemLoader::with_paths(&dirs));
            let ctx = match &context {
                Some(path) => load_context(path)?,
                None => Context::new(),
            };

            tracing::debug!("Rendering {} from {:?}", name, dirs);
            let rendered = env
                .render_template(&name, &ctx)
                .with_context(|| format!("Failed to render {}", name))?;

            match output {
                Some(path) => {
                    fs::write(&path, rendered)
                        .with_context(|| format!("Failed to write {:?}", path))?;
                    tracing::info!("Wrote {:?}", path);
                }
                None => print!("{}", rendered),
            }
        }

        Commands::Check { name, dirs } => {
            let env = Environment::new().with_loader(FileSystemLoader::with_paths(&dirs));
            let template = env
                .get_template(&name)
                .with_context(|| format!("Template {} does not compile", name))?;
            println!(
                "{}: ok ({} top-level nodes, {} macros)",
                template.name(),
                template.ast().nodes.len(),
                template.macros().len()
            );
        }

        Commands::List { dirs } => {
            let loader = FileSystemLoader::with_paths(&dirs);
            let names = loader.list().context("Failed to list templates")?;
            for name in &names {
                println!("{}", name);
            }
            tracing::info!("{} templates", names.len());
        }
    }

    Ok(())
}

/// Read a context file; the format follows the extension, JSON by default
fn load_context(path: &Path) -> Result<Context> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read context {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("json")
        .to_ascii_lowercase();

    let data: serde_json::Value = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML in {:?}", path))?,
        "toml" => toml::from_str(&content).with_context(|| format!("Invalid TOML in {:?}", path))?,
        _ => serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {:?}", path))?,
    };
    Context::from_json(&data).with_context(|| format!("Context {:?} must be a mapping", path))
}
