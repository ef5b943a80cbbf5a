mod commands;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::*;
use omnidb_adapters::{AdapterConfig, AdapterFactory};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const CONNECTION_ENV: &str = "OMNIDB_CONNECTION";

#[derive(Parser)]
#[command(name = "omnidb")]
#[command(
    about = "Uniform CRUD and schema operations over PostgreSQL, Supabase, Firestore and MongoDB"
)]
struct Cli {
    /// YAML configuration file (defaults come from the environment)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Connection string; falls back to OMNIDB_CONNECTION
    #[arg(long, short = 'c', global = true)]
    connection: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the backend kind of the connection string
    Kind,

    /// Check that the backend is reachable
    Test,

    /// List supported backend kinds
    Types,

    /// Show example connection strings
    Examples,

    /// Connect and print adapter cache statistics
    Stats,

    /// Print the schema of every table or collection
    Schema,

    /// Read records
    Read {
        table: String,

        /// Equality filter as a JSON object
        #[arg(long)]
        filter: Option<String>,

        #[arg(long)]
        limit: Option<i64>,
    },

    /// Insert one record (JSON object) or many (JSON array)
    Insert {
        table: String,
        data: String,
    },

    /// Update the record with the given id
    Update {
        table: String,
        id: String,

        /// Fields to change as a JSON object
        updates: String,

        #[arg(long)]
        id_column: Option<String>,
    },

    /// Delete the record with the given id
    Delete {
        table: String,
        id: String,

        #[arg(long)]
        id_column: Option<String>,
    },

    /// Create a table from a JSON array of column definitions
    CreateTable {
        table: String,
        columns: String,

        /// JSON array of foreign key definitions
        #[arg(long)]
        foreign_keys: Option<String>,
    },

    DropTable {
        table: String,
    },

    /// Add a column from a JSON column definition
    AddColumn {
        table: String,
        column: String,
    },

    DropColumn {
        table: String,
        column: String,
    },

    /// Add a foreign key from a JSON definition
    AddForeignKey {
        table: String,
        foreign_key: String,
    },

    DropForeignKey {
        table: String,
        constraint_name: String,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<AdapterConfig> {
    let config = match path {
        Some(path) => AdapterConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AdapterConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn connection(cli: &Cli) -> Result<String> {
    cli.connection
        .clone()
        .or_else(|| std::env::var(CONNECTION_ENV).ok())
        .with_context(|| {
            format!(
                "no connection string: pass --connection or set {}",
                CONNECTION_ENV
            )
        })
}

async fn run(cli: &Cli, factory: &AdapterFactory) -> Result<bool> {
    match &cli.command {
        Commands::Types => info::types(factory)?,
        Commands::Examples => info::examples(factory)?,
        Commands::Kind => info::kind(factory, &connection(cli)?)?,
        Commands::Test => return info::test(factory, &connection(cli)?).await,
        Commands::Stats => info::stats(factory, &connection(cli)?).await?,
        Commands::Schema => schema::show(factory, &connection(cli)?).await?,
        Commands::Read { table, filter, limit } => {
            data::read(factory, &connection(cli)?, table, filter.as_deref(), *limit).await?;
        }
        Commands::Insert { table, data: payload } => {
            data::insert(factory, &connection(cli)?, table, payload).await?;
        }
        Commands::Update { table, id, updates, id_column } => {
            data::update(factory, &connection(cli)?, table, id, updates, id_column.as_deref())
                .await?;
        }
        Commands::Delete { table, id, id_column } => {
            data::delete(factory, &connection(cli)?, table, id, id_column.as_deref()).await?;
        }
        Commands::CreateTable { table, columns, foreign_keys } => {
            let foreign_keys = foreign_keys.as_deref();
            schema::create_table(factory, &connection(cli)?, table, columns, foreign_keys).await?;
        }
        Commands::DropTable { table } => {
            schema::drop_table(factory, &connection(cli)?, table).await?;
        }
        Commands::AddColumn { table, column } => {
            schema::add_column(factory, &connection(cli)?, table, column).await?;
        }
        Commands::DropColumn { table, column } => {
            schema::drop_column(factory, &connection(cli)?, table, column).await?;
        }
        Commands::AddForeignKey { table, foreign_key } => {
            schema::add_foreign_key(factory, &connection(cli)?, table, foreign_key).await?;
        }
        Commands::DropForeignKey { table, constraint_name } => {
            schema::drop_foreign_key(factory, &connection(cli)?, table, constraint_name).await?;
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_ref())?;
    let factory = AdapterFactory::from_config(config);

    let outcome = run(&cli, &factory).await;
    factory.disconnect_all().await;

    Ok(if outcome? {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
