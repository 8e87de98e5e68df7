use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "scopeql", version, about = "Tenant-safe analytics SQL rewriter")]
struct Cli {
    /// Query configuration file (YAML)
    #[arg(long, short, env = "SCOPEQL_CONFIG", default_value = "scopeql.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rewrite a query into its tenant-scoped form.
    Rewrite {
        /// SQL to rewrite. Read from stdin when omitted or "-".
        sql: Option<String>,

        /// Print a JSON report (SQL, tables, injected predicates) instead of plain SQL
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Evaluate now() as this RFC 3339 instant instead of the current time
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },

    /// Print the values a query scopes a column to, as a JSON array.
    Extract {
        /// Column to inspect, e.g. key_space_id
        #[arg(long)]
        column: String,

        /// SQL to inspect. Read from stdin when omitted or "-".
        sql: Option<String>,
    },

    /// Validate the configuration file.
    Check,
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout only carries SQL or JSON.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Rewrite { sql, json, now } => {
            let config = commands::load_config(&cli.config)?;
            let sql = read_sql(sql)?;
            let output = commands::rewrite::run(&config, &sql, now, json)?;
            println!("{}", output);
        }
        Command::Extract { column, sql } => {
            let config = commands::load_config(&cli.config)?;
            let sql = read_sql(sql)?;
            let values = commands::extract::run(&config, &sql, &column)?;
            println!("{}", serde_json::to_string(&values)?);
        }
        Command::Check => {
            let report = commands::check::run(&cli.config)?;
            report.print_summary(&cli.config);
            if report.has_errors() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn read_sql(sql: Option<String>) -> anyhow::Result<String> {
    match sql {
        Some(sql) if sql != "-" => Ok(sql),
        _ => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read SQL from stdin")?;
            Ok(buffer)
        }
    }
}
