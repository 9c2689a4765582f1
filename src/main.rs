//! persistent-etc-files - keep /etc credential files on a shared file system
//!
//! Synthesizes the deployment template, renders the bootstrap user data,
//! checks templates, and runs the bootstrap on the instance itself.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use persistent_etc_files::checks::check_template;
use persistent_etc_files::config::ConfigLoader;
use persistent_etc_files::datasources::Ec2Metadata;
use persistent_etc_files::synth::deployment_order;
use persistent_etc_files::userdata::{self, BootContext, BootScript, Encoding, Section};
use persistent_etc_files::{RunOptions, Stack, StackConfig, Template, boot_instance};

#[derive(Parser)]
#[command(name = "persistent-etc-files")]
#[command(author, version, about = "Keep /etc credential files on a shared EFS file system", long_about = None)]
struct Cli {
    /// Enable verbose output (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

#[derive(Clone, Copy, ValueEnum)]
enum EncodingArg {
    Plain,
    Base64,
    GzipBase64,
}

impl From<EncodingArg> for Encoding {
    fn from(arg: EncodingArg) -> Self {
        match arg {
            EncodingArg::Plain => Encoding::Plain,
            EncodingArg::Base64 => Encoding::Base64,
            EncodingArg::GzipBase64 => Encoding::GzipBase64,
        }
    }
}

#[derive(clap::Args)]
struct ConfigArgs {
    /// Stack configuration file (YAML or JSON)
    #[arg(short, long, env = "PERSISTENT_ETC_CONFIG")]
    config: Option<PathBuf>,

    /// Override the stack name
    #[arg(long)]
    stack_name: Option<String>,

    /// Override the number of availability zones
    #[arg(long)]
    max_azs: Option<usize>,
}

impl ConfigArgs {
    async fn load(&self) -> Result<StackConfig> {
        ConfigLoader::new()
            .with_optional_file(self.config.clone())
            .with_stack_name(self.stack_name.clone())
            .with_max_azs(self.max_azs)
            .load()
            .await
            .context("failed to load stack configuration")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize the deployment template
    Synth {
        #[command(flatten)]
        config: ConfigArgs,

        #[arg(short, long, value_enum, default_value = "json")]
        format: Format,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Render the bootstrap script for a concrete file system
    UserData {
        #[command(flatten)]
        config: ConfigArgs,

        #[arg(long)]
        file_system_id: String,

        #[arg(long, env = "AWS_REGION")]
        region: String,

        #[arg(long, value_enum, default_value = "plain")]
        encoding: EncodingArg,
    },
    /// Run the acceptance checks against a synthesized or saved template
    Validate {
        #[command(flatten)]
        config: ConfigArgs,

        /// Check this template file instead of synthesizing one
        #[arg(long, conflicts_with = "config")]
        template: Option<PathBuf>,
    },
    /// Print the resources in deployment order
    Plan {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Run the bootstrap script on this instance
    Boot {
        #[command(flatten)]
        config: ConfigArgs,

        #[arg(long)]
        file_system_id: String,

        /// Region (read from instance metadata when absent)
        #[arg(long)]
        region: Option<String>,

        /// Only run these sections (repeatable)
        #[arg(long = "section")]
        sections: Vec<Section>,

        /// Print the commands without running them
        #[arg(long)]
        dry_run: bool,

        /// Stop at the first failing step
        #[arg(long)]
        fail_fast: bool,
    },
}

fn init_logging(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to set tracing subscriber: {}", e))
}

async fn emit(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            tokio::fs::write(path, content)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}

async fn load_template(path: &Path) -> Result<Template> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    Template::parse_for_path(path, &content)
        .with_context(|| format!("failed to parse {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Commands::Synth {
            config,
            format,
            output,
        } => {
            let template = Stack::new(config.load().await?)?.synth()?;
            let rendered = match format {
                Format::Json => template.to_json()?,
                Format::Yaml => template.to_yaml()?,
            };
            emit(&rendered, output.as_deref()).await?;
        }
        Commands::UserData {
            config,
            file_system_id,
            region,
            encoding,
        } => {
            let config = config.load().await?;
            let script = BootScript::from_config(&config.bootstrap)?
                .render(&BootContext::new(file_system_id, region))?;
            println!("{}", userdata::encode(&script.text(), encoding.into())?);
        }
        Commands::Validate { config, template } => {
            let template = match template {
                Some(path) => load_template(&path).await?,
                None => Stack::new(config.load().await?)?.synth()?,
            };
            let report = check_template(&template);
            for result in &report.results {
                println!("{}", result);
            }
            if !report.is_success() {
                bail!("{} check(s) failed", report.failures().count());
            }
        }
        Commands::Plan { config } => {
            let template = Stack::new(config.load().await?)?.synth()?;
            for (i, id) in deployment_order(&template)?.iter().enumerate() {
                let resource_type = template
                    .resource(id)
                    .map(|r| r.resource_type.as_str())
                    .unwrap_or_default();
                println!("{:>3}. {:<48} {}", i + 1, id, resource_type);
            }
        }
        Commands::Boot {
            config,
            file_system_id,
            region,
            sections,
            dry_run,
            fail_fast,
        } => {
            let config = config.load().await?;
            let metadata = Ec2Metadata::new()?;
            let options = RunOptions {
                fail_fast,
                sections,
                dry_run,
            };
            let report = boot_instance(
                &config.bootstrap,
                &file_system_id,
                region.or(config.region.clone()),
                &metadata,
                options,
            )
            .await
            .context("bootstrap failed")?;

            let failed = report.failures().count();
            if failed > 0 {
                info!(
                    "{} of {} step(s) failed; the script continues past failures",
                    failed,
                    report.outcomes.len()
                );
            }
        }
    }

    Ok(())
}
