//! Schema Registry CLI
//!
//! Operator access to the registry backing store configured in registry.toml.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _};
use clap::{Parser, Subcommand};
use familiar_schema_registry::{
    CompatibilityMode, RegistryConfig, SchemaFormat, SchemaId, SchemaReference, SchemaRegistry, SchemaRequest,
    VersionSelector, WriteMode, WriteOptions,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-registry")]
#[command(about = "Register, inspect and configure schemas")]
struct Cli {
    /// Config file (defaults to registry.toml and the XDG config dir)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Context to operate in (subjects may also carry `:.ctx:` inline)
    #[arg(short = 'C', long, global = true)]
    context: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a schema under a subject
    Register {
        subject: String,
        /// File holding the schema definition
        file: PathBuf,
        /// AVRO, PROTOBUF or JSON
        #[arg(short = 't', long = "type", default_value = "AVRO")]
        schema_type: String,
        /// Reference as name=subject@version (repeatable)
        #[arg(short, long = "reference")]
        references: Vec<String>,
        /// Explicit schema ID (IMPORT mode)
        #[arg(long)]
        id: Option<u32>,
        /// Explicit version (IMPORT mode)
        #[arg(long)]
        version: Option<u32>,
        /// Write through READONLY_OVERRIDE
        #[arg(long = "override")]
        allow_override: bool,
    },

    /// Check a schema against registered versions without registering it
    Check {
        subject: String,
        file: PathBuf,
        #[arg(short = 't', long = "type", default_value = "AVRO")]
        schema_type: String,
        #[arg(short, long = "reference")]
        references: Vec<String>,
        /// latest, a version number, or all
        #[arg(short, long, default_value = "latest")]
        version: String,
    },

    /// Show a schema by ID
    GetId { id: u32 },

    /// Show a version of a subject
    GetVersion {
        subject: String,
        #[arg(default_value = "latest")]
        version: String,
        #[arg(long)]
        deleted: bool,
    },

    /// List subjects
    Subjects {
        #[arg(long)]
        deleted: bool,
    },

    /// List versions of a subject
    Versions {
        subject: String,
        #[arg(long)]
        deleted: bool,
    },

    /// Soft-delete a subject, or permanently delete a soft-deleted one
    DeleteSubject {
        subject: String,
        #[arg(long)]
        permanent: bool,
        #[arg(long = "override")]
        allow_override: bool,
    },

    /// Soft-delete a version, or permanently delete a soft-deleted one
    DeleteVersion {
        subject: String,
        version: String,
        #[arg(long)]
        permanent: bool,
        #[arg(long = "override")]
        allow_override: bool,
    },

    /// Compatibility level
    Config {
        #[command(subcommand)]
        action: SettingAction,
    },

    /// Write mode
    Mode {
        #[command(subcommand)]
        action: SettingAction,
    },

    /// List contexts
    Contexts,
}

#[derive(Subcommand)]
enum SettingAction {
    /// Show the effective value and which tier it came from
    Get {
        #[arg(short, long)]
        subject: Option<String>,
    },
    Set {
        value: String,
        #[arg(short, long)]
        subject: Option<String>,
        /// Allow switching to IMPORT while subjects exist
        #[arg(long)]
        force: bool,
    },
    /// Remove an override
    Delete {
        #[arg(short, long)]
        subject: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RegistryConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    let registry = SchemaRegistry::from_config(&config)?;
    let ctx = cli.context.as_deref();

    match cli.command {
        Commands::Register {
            subject,
            file,
            schema_type,
            references,
            id,
            version,
            allow_override,
        } => {
            let mut request = schema_request(ctx, subject, &file, &schema_type, &references)?.with_options(WriteOptions {
                allow_override,
                deadline: None,
            });
            if let Some(id) = id {
                request = request.with_import(SchemaId(id), version);
            } else if version.is_some() {
                return Err(anyhow!("--version requires --id"));
            }
            let registered = registry.register(&request)?;
            println!("✅ {} version {} (id {})", registered.qualified_subject(), registered.version, registered.id);
        }

        Commands::Check {
            subject,
            file,
            schema_type,
            references,
            version,
        } => {
            let request = schema_request(ctx, subject, &file, &schema_type, &references)?;
            let selector: VersionSelector = version.parse()?;
            let report = registry.check_compatibility(&request, selector)?;
            if report.is_compatible {
                println!("✅ compatible ({})", report.mode);
            } else {
                println!("❌ incompatible ({})", report.mode);
                for message in report.messages() {
                    println!("   └─ {}", message);
                }
                std::process::exit(1);
            }
        }

        Commands::GetId { id } => {
            let record = registry.get_by_id(ctx, SchemaId(id))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::GetVersion {
            subject,
            version,
            deleted,
        } => {
            let schema = registry.get_version(ctx, &subject, version.parse()?, deleted)?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }

        Commands::Subjects { deleted } => {
            for subject in registry.subjects(ctx, deleted)? {
                println!("{}", subject);
            }
        }

        Commands::Versions { subject, deleted } => {
            let versions = registry.versions(ctx, &subject, deleted)?;
            println!("{}", serde_json::to_string(&versions)?);
        }

        Commands::DeleteSubject {
            subject,
            permanent,
            allow_override,
        } => {
            let options = WriteOptions {
                allow_override,
                deadline: None,
            };
            let versions = registry.delete_subject(ctx, &subject, permanent, &options)?;
            println!("🗑️  deleted versions {:?} of {}", versions, subject);
        }

        Commands::DeleteVersion {
            subject,
            version,
            permanent,
            allow_override,
        } => {
            let options = WriteOptions {
                allow_override,
                deadline: None,
            };
            let deleted = registry.delete_version(ctx, &subject, version.parse()?, permanent, &options)?;
            println!("🗑️  deleted version {} of {}", deleted, subject);
        }

        Commands::Config { action } => match action {
            SettingAction::Get { subject } => {
                let resolved = registry.config(ctx, subject.as_deref())?;
                println!("{} (from {:?})", resolved.value, resolved.source);
            }
            SettingAction::Set { value, subject, .. } => {
                let level: CompatibilityMode = value.parse()?;
                registry.set_config(ctx, subject.as_deref(), level)?;
                println!("✅ compatibility level set to {}", level);
            }
            SettingAction::Delete { subject } => match registry.delete_config(ctx, subject.as_deref())? {
                Some(level) => println!("🗑️  removed {}", level),
                None => println!("no override was set"),
            },
        },

        Commands::Mode { action } => match action {
            SettingAction::Get { subject } => {
                let resolved = registry.mode(ctx, subject.as_deref())?;
                println!("{} (from {:?})", resolved.value, resolved.source);
            }
            SettingAction::Set { value, subject, force } => {
                let mode: WriteMode = value.parse()?;
                registry.set_mode(ctx, subject.as_deref(), mode, force)?;
                println!("✅ mode set to {}", mode);
            }
            SettingAction::Delete { subject } => match registry.delete_mode(ctx, subject.as_deref())? {
                Some(mode) => println!("🗑️  removed {}", mode),
                None => println!("no override was set"),
            },
        },

        Commands::Contexts => {
            for context in registry.contexts()? {
                println!("{}", context);
            }
        }
    }

    Ok(())
}

fn schema_request(
    context: Option<&str>,
    subject: String,
    file: &Path,
    schema_type: &str,
    references: &[String],
) -> anyhow::Result<SchemaRequest> {
    let schema = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let format = SchemaFormat::from_tag(schema_type)?;
    let references = references
        .iter()
        .map(|raw| parse_reference(raw))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let mut request = SchemaRequest::new(subject, format, schema).with_references(references);
    if let Some(context) = context {
        request = request.in_context(context);
    }
    Ok(request)
}

/// `name=subject@version`
fn parse_reference(raw: &str) -> anyhow::Result<SchemaReference> {
    let (name, target) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("reference '{}' is not name=subject@version", raw))?;
    let (subject, version) = target
        .rsplit_once('@')
        .ok_or_else(|| anyhow!("reference '{}' is missing @version", raw))?;
    let version = version
        .parse::<u32>()
        .with_context(|| format!("reference '{}' has an invalid version", raw))?;
    Ok(SchemaReference::new(name, subject, version))
}
