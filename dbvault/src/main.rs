//! Command-line manager for the dbvault credential vault.
//!
//! Registers databases, manages their encrypted credentials, exports
//! re-keyed subsets, and checks connectivity through the registry.
//!
//! # Security Guarantees
//! - Passwords are read without echo and stored only as ciphertext
//! - Credentials are never printed or logged
//! - Connection URLs are redacted in logs

use clap::{Args, Parser, Subcommand};
use dbvault_core::{
    ConfigStore, ConnectOptions, ConnectorSet, DatabaseRegistry, Flavor, Result, SubsetSelection,
    TerminalPrompt, VaultConfig, config::{BASE_DIR_ENV, KEY_PATH_ENV}, init_logging,
};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "dbvault")]
#[command(about = "Encrypted database credential vault")]
#[command(version)]
#[command(long_about = "
dbvault - Encrypted database credential vault

Keeps connection details and credentials for many databases in one local
vault. Credentials are encrypted with AES-GCM under a key stored in its own
owner-only file.

SUPPORTED FLAVORS:
- postgres, sqlite (built in)
- mysql [if compiled with --features mysql]
- oracle, mssql, teradata, snowflake (registration only)

EXAMPLES:
  dbvault add-database
  dbvault list --flavor oracle
  dbvault create-subset --flavor oracle:db1,db2 --flavor mysql --name analysts
  dbvault test postgres sales
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Vault directory
    #[arg(
        long,
        env = BASE_DIR_ENV,
        global = true,
        help = "Vault directory (default: ~/.dbvault)"
    )]
    pub vault_dir: Option<PathBuf>,

    /// Key file
    #[arg(
        long,
        env = KEY_PATH_ENV,
        global = true,
        help = "Key file (default: configkey inside the vault directory)"
    )]
    pub key_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Register a database interactively
    AddDatabase,
    /// Remove a database and its stored credentials
    RemoveDatabase(TargetArgs),
    /// Replace the stored credentials of a database
    ResetCredentials(TargetArgs),
    /// Export selected databases under a fresh key
    CreateSubset(SubsetArgs),
    /// List registered databases and subsets
    List(ListArgs),
    /// Connect to a registered database and list its tables
    Test(TestArgs),
}

#[derive(Args)]
pub struct TargetArgs {
    /// Database flavor; asked for when omitted
    #[arg(long, requires = "name")]
    pub flavor: Option<String>,

    /// Database name; asked for when omitted
    #[arg(long, requires = "flavor")]
    pub name: Option<String>,
}

#[derive(Args)]
pub struct SubsetArgs {
    /// Flavor to include, optionally restricted to databases
    #[arg(
        long = "flavor",
        required = true,
        value_name = "FLAVOR[:NAME,NAME]",
        help = "Flavor to export, e.g. `oracle` or `oracle:db1,db2` (repeatable)"
    )]
    pub flavors: Vec<String>,

    /// Subset name
    #[arg(long, help = "Subset name (default: next number)")]
    pub name: Option<String>,
}

#[derive(Args)]
pub struct ListArgs {
    /// Only list this flavor
    #[arg(long)]
    pub flavor: Option<String>,
}

#[derive(Args)]
pub struct TestArgs {
    /// Database flavor
    pub flavor: String,

    /// Registered database name
    pub name: String,

    /// Schema to inspect instead of the configured one
    #[arg(long)]
    pub schema: Option<String>,

    /// Connect without discovering tables
    #[arg(long)]
    pub connect_only: bool,
}

#[derive(Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all output except errors")]
    pub quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet)?;

    let config = vault_config(&cli)?;
    let store = ConfigStore::open(&config)?;
    let mut prompt = TerminalPrompt::new();

    match &cli.command {
        Command::AddDatabase => match store.add_host_interactive(&mut prompt)? {
            Some((flavor, name)) => println!("Added {} database {}", flavor, name),
            None => println!("Nothing changed"),
        },
        Command::RemoveDatabase(args) => {
            let (flavor, name) = match target(args)? {
                Some((flavor, name)) => {
                    store.remove_host(flavor, &name)?;
                    (flavor, name)
                }
                None => store.remove_host_interactive(&mut prompt)?,
            };
            println!("Removed {} database {}", flavor, name);
        }
        Command::ResetCredentials(args) => {
            let (flavor, name) = match target(args)? {
                Some((flavor, name)) => {
                    store.reset_credentials(flavor, &name, &mut prompt)?;
                    (flavor, name)
                }
                None => store.reset_credentials_interactive(&mut prompt)?,
            };
            println!("Credentials reset for {} database {}", flavor, name);
        }
        Command::CreateSubset(args) => {
            let mut selection = SubsetSelection::new();
            for spec in &args.flavors {
                selection = selection.add_spec(spec)?;
            }
            let dir = store.create_subset(&selection, args.name.as_deref())?;
            println!("Subset written to {}", dir.display());
        }
        Command::List(args) => list(&store, args.flavor.as_deref())?,
        Command::Test(args) => test_database(store, args).await?,
    }

    Ok(())
}

fn vault_config(cli: &Cli) -> Result<VaultConfig> {
    let config = match &cli.vault_dir {
        Some(dir) => VaultConfig::new(dir),
        None => VaultConfig::from_env()?,
    };
    Ok(match &cli.key_file {
        Some(key) => config.with_key_path(key),
        None => config,
    })
}

fn target(args: &TargetArgs) -> Result<Option<(Flavor, String)>> {
    match (&args.flavor, &args.name) {
        (Some(flavor), Some(name)) => Ok(Some((flavor.parse()?, name.clone()))),
        _ => Ok(None),
    }
}

/// Prints flavors, databases, and schemas, then the exported subsets.
fn list(store: &ConfigStore, flavor: Option<&str>) -> Result<()> {
    let only = flavor.map(str::parse::<Flavor>).transpose()?;
    let hosts = store.get_hosts();

    if hosts.values().all(|entries| entries.is_empty()) {
        println!("No databases registered");
    }

    for (flavor, entries) in &hosts {
        if only.is_some_and(|only| only.as_str() != flavor.as_str()) || entries.is_empty() {
            continue;
        }
        println!("{}", flavor);
        for (name, record) in entries {
            match &record.schema {
                Some(schema) => println!("  {} (schema {})", name, schema),
                None => println!("  {}", name),
            }
        }
    }

    let subsets = store.list_subsets()?;
    if only.is_none() && !subsets.is_empty() {
        println!("subsets: {}", subsets.join(", "));
    }
    Ok(())
}

/// Connects through the registry, reports the table count, then closes.
async fn test_database(store: ConfigStore, args: &TestArgs) -> Result<()> {
    info!("Testing {} database '{}'", args.flavor, args.name);

    let mut registry = DatabaseRegistry::open(
        &args.flavor,
        store,
        ConnectorSet::default(),
        Box::new(TerminalPrompt::new()),
    )?;

    let options = ConnectOptions {
        connect_only: args.connect_only,
        schema: args.schema.clone(),
    };
    let result = registry
        .connect(&args.name, options)
        .await
        .map(|db| (db.tables().len(), db.schema().map(str::to_string)));

    registry.close_all().await;

    let (tables, schema) = result.map_err(|e| {
        error!("Connection test failed: {}", e);
        e
    })?;

    info!("✓ Connection test successful");
    if args.connect_only {
        println!("Connected to {} database {}", args.flavor, args.name);
    } else {
        println!(
            "Connected to {} database {}: {} tables and views in schema {}",
            args.flavor,
            args.name,
            tables,
            schema.as_deref().unwrap_or("(default)")
        );
    }
    Ok(())
}
