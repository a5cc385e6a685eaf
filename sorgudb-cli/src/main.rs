//! `SorguDB` CLI tool for key management and operations.

#![warn(clippy::pedantic, clippy::nursery)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use sorgudb::config::SchemaConfig;
use sorgudb::engine::EncryptionEngine;
use sorgudb::entities::financial_schema;
use sorgudb::header::EncryptedValue;
use sorgudb::key_manager::KeyManager;
use sorgudb::key_provider::KeyProvider;
use sorgudb::schema::SchemaRegistry;
use sorgudb_key_file::{FileKeyProvider, FileKeyVault};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sorgudb")]
#[command(version, about = "SorguDB key management CLI", long_about = None)]
struct Cli {
    /// Enable debug logging (overrides RUST_LOG)
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a key directory with a fresh master key
    Init {
        /// Key directory
        #[arg(short, long, default_value = "./keys")]
        keys: PathBuf,
    },
    /// Create a first data key for every encrypted field that has none
    Provision {
        /// Key directory
        #[arg(short, long, default_value = "./keys")]
        keys: PathBuf,
        /// Schema file (JSON); defaults to the built-in financial schema
        #[arg(short, long)]
        schema: Option<PathBuf>,
    },
    /// Rotate the data key of one field
    Rotate {
        /// Key directory
        #[arg(short, long, default_value = "./keys")]
        keys: PathBuf,
        /// Schema file (JSON); defaults to the built-in financial schema
        #[arg(short, long)]
        schema: Option<PathBuf>,
        /// Collection name
        #[arg(long)]
        collection: String,
        /// Field name
        #[arg(long)]
        field: String,
    },
    /// Create a new master key; new data keys are wrapped under it
    RotateMaster {
        /// Key directory
        #[arg(short, long, default_value = "./keys")]
        keys: PathBuf,
    },
    /// List master key ids and data key ids per field (never key material)
    Keys {
        /// Key directory
        #[arg(short, long, default_value = "./keys")]
        keys: PathBuf,
        /// Schema file (JSON); defaults to the built-in financial schema
        #[arg(short, long)]
        schema: Option<PathBuf>,
    },
    /// Print a schema as JSON
    Schema {
        /// Schema file (JSON); defaults to the built-in financial schema
        #[arg(short, long)]
        schema: Option<PathBuf>,
    },
    /// Decode the header of a base64 encrypted value
    Inspect {
        /// Encrypted value, base64 encoded
        value: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { keys } => {
            let provider = FileKeyProvider::init(&keys)
                .with_context(|| format!("cannot initialize {}", keys.display()))?;
            FileKeyVault::new(&keys)?;
            let kek_id = provider.current_kek_id()?;
            println!("Initialized {} with master key {kek_id}", keys.display());
        }
        Commands::Provision { keys, schema } => {
            let engine = open_engine(&keys, schema.as_deref())?;
            let provisioned = engine.provision_keys()?;
            if provisioned.is_empty() {
                println!("Every encrypted field already has a key");
            }
            for key_id in provisioned {
                println!("Provisioned {key_id}");
            }
        }
        Commands::Rotate {
            keys,
            schema,
            collection,
            field,
        } => {
            let engine = open_engine(&keys, schema.as_deref())?;
            let key_id = engine
                .rotate_field(&collection, &field)
                .with_context(|| format!("cannot rotate {collection}.{field}"))?;
            println!("Rotated {collection}.{field}, active key is now {key_id}");
        }
        Commands::RotateMaster { keys } => {
            let provider = FileKeyProvider::new(&keys)?;
            let kek_id = provider.create_kek()?;
            println!("Created master key {kek_id}");
            println!("Existing data keys stay wrapped under their master key");
        }
        Commands::Keys { keys, schema } => {
            let provider = FileKeyProvider::new(&keys)?;
            let current = provider.current_kek_id()?;
            println!("Master keys:");
            for kek_id in provider.list_keks()? {
                let marker = if kek_id == current { " (current)" } else { "" };
                println!("  {kek_id}{marker}");
            }

            let engine = open_engine(&keys, schema.as_deref())?;
            println!("Data keys:");
            for field in engine.registry().encrypted_fields() {
                let history = engine.key_manager().key_history(field.field_ref())?;
                let versions: Vec<String> = history
                    .iter()
                    .map(|key_id| format!("v{}", key_id.version()))
                    .collect();
                let listed = if versions.is_empty() {
                    "none".to_string()
                } else {
                    versions.join(", ")
                };
                let strategy = field.strategy();
                println!("  {} [{strategy}]: {listed}", field.field_ref());
            }
        }
        Commands::Schema { schema } => {
            let registry = load_registry(schema.as_deref())?;
            println!("{}", SchemaConfig::from(&registry).to_json()?);
        }
        Commands::Inspect { value } => {
            let bytes = STANDARD
                .decode(value.trim())
                .context("value is not valid base64")?;
            let value = EncryptedValue::from_bytes(&bytes)?;
            println!("strategy:   {}", value.strategy().name());
            println!("key id:     {}", value.key_id());
            println!("token:      {} bytes", value.token().len());
            println!("ciphertext: {} bytes", value.ciphertext().len());
        }
    }

    Ok(())
}

fn load_registry(schema: Option<&Path>) -> Result<SchemaRegistry> {
    let registry = match schema {
        Some(path) => {
            debug!(path = %path.display(), "loading schema file");
            SchemaConfig::load(path)
                .with_context(|| format!("cannot load schema {}", path.display()))?
                .to_registry()?
        }
        None => financial_schema()?,
    };
    Ok(registry)
}

fn open_engine(keys: &Path, schema: Option<&Path>) -> Result<EncryptionEngine> {
    let provider = FileKeyProvider::new(keys)
        .with_context(|| format!("cannot open {}", keys.display()))?;
    let vault = FileKeyVault::new(keys)?;
    let manager = KeyManager::new(Arc::new(provider), Arc::new(vault));
    Ok(EncryptionEngine::new(load_registry(schema)?, manager))
}
