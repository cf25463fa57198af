//! relq: compile and run combinator queries from the command line.
//!
//! Queries are read as JSON (the serde form of `relq::ast::Query`) from a
//! file or stdin; the schema comes from `relq.toml`.
//!
//! # Usage
//!
//! ```bash
//! # Show the SQL and parameters
//! relq translate query.json
//!
//! # Run against a database
//! relq run query.json --database-url sqlite://chinook.db
//!
//! # List the configured entities
//! relq tables
//! ```

use std::fs;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use tracing_subscriber::EnvFilter;

use relq::prelude::*;
use relq::transpiler::format_select;

#[derive(Parser)]
#[command(name = "relq")]
#[command(version)]
#[command(about = "Compile combinator queries to SQLite SQL", long_about = None)]
#[command(after_help = "EXAMPLES:
    relq translate query.json
    relq run query.json --database-url sqlite://chinook.db --format json
    cat query.json | relq run - --config ./relq.toml")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database connection URL
    #[arg(long, env = "RELQ_DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SQL and parameters of a query
    Translate {
        /// Query file, or '-' for stdin
        query: String,
        /// Print the SQL of a view definition (literals inlined)
        #[arg(long)]
        view: bool,
    },
    /// Execute a query and print its result
    Run {
        /// Query file, or '-' for stdin
        query: String,
    },
    /// List the configured entities
    Tables,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "relq=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dispatch(&cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn dispatch(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    match &cli.command {
        Commands::Translate { query, view } => translate(&config, query, *view, cli.format),
        Commands::Run { query } => run(&config, query, cli),
        Commands::Tables => {
            show_tables(&config);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => match Config::default_path() {
            Some(path) if path.exists() => path,
            _ => {
                tracing::debug!("no configuration file, using defaults");
                return Ok(Config::default());
            }
        },
    };
    tracing::debug!(path = %path.display(), "loading configuration");
    Config::load(&path).with_context(|| format!("reading {}", path.display()))
}

fn read_query(source: &str) -> Result<Query> {
    let json = if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        fs::read_to_string(source).with_context(|| format!("reading {}", source))?
    };
    Ok(Query::from_json(&json)?)
}

fn translate(config: &Config, source: &str, view: bool, format: OutputFormat) -> Result<()> {
    let catalog = config.catalog()?;
    let query = read_query(source)?;

    if view {
        let sql = relq::translate::compile_view_definition(&catalog, &query)?;
        match format {
            OutputFormat::Json => println!("{}", serde_json::json!({ "sql": sql })),
            OutputFormat::Table => println!("{}", sql.white()),
        }
        return Ok(());
    }

    let translation = Translator::new(&catalog)
        .with_options(config.options)
        .translate(&query)?;
    match format {
        OutputFormat::Json => {
            let params: Vec<_> = translation.params.iter().map(SqlValue::to_literal).collect();
            let out = serde_json::json!({
                "sql": translation.sql,
                "params": params,
                "aggregator": translation.projection.aggregator.map(|a| format!("{:?}", a)),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Table => {
            println!("{}", "Generated SQL:".green().bold());
            println!("{}", translation.sql.white());
            if !translation.params.is_empty() {
                println!();
                println!("{}", "Parameters:".cyan());
                for (i, p) in translation.params.iter().enumerate() {
                    println!("  ?{} = {}", i + 1, p.to_literal().yellow());
                }
            }
            if let Ok(inlined) = format_select(&translation.projection.select, None) {
                if inlined != translation.sql {
                    println!();
                    println!("{}", "Inlined:".dimmed());
                    println!("{}", inlined.dimmed());
                }
            }
        }
    }
    Ok(())
}

fn run(config: &Config, source: &str, cli: &Cli) -> Result<()> {
    let Some(url) = cli.database_url.as_ref().or(config.database_url.as_ref()) else {
        bail!("no database URL; use --database-url, RELQ_DATABASE_URL or database_url in relq.toml");
    };
    let query = read_query(source)?;
    let executor = SqliteExecutor::connect(url).with_context(|| format!("connecting to {}", url))?;
    let session = Session::new(executor, config.catalog()?).with_options(config.options);

    let result = session.fetch(&query)?;
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result.to_json())?),
        OutputFormat::Table => print_table(&result),
    }
    Ok(())
}

fn print_table(result: &Value) {
    let rows: Vec<&Value> = match result {
        Value::List(rows) => rows.iter().collect(),
        single => vec![single],
    };
    if rows.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    let columns: Vec<String> = match rows[0] {
        Value::Record(r) => r.fields.iter().map(|(n, _)| n.clone()).collect(),
        Value::Group { .. } => vec!["key".into(), "elements".into()],
        _ => vec!["value".into()],
    };
    let cells: Vec<Vec<String>> = rows.iter().map(|row| row_cells(row, columns.len())).collect();

    let mut widths: Vec<usize> = columns.iter().map(String::len).collect();
    for row in &cells {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let header: Vec<String> = columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!("{:width$}", c, width = w))
        .collect();
    println!("{}", header.join(" │ ").white().bold());
    let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
    println!("{}", sep.join("─┼─").dimmed());
    for row in &cells {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:width$}", c, width = w))
            .collect();
        println!("{}", line.join(" │ "));
    }

    println!();
    println!("{} row(s) returned", rows.len().to_string().cyan());
}

fn row_cells(row: &Value, width: usize) -> Vec<String> {
    let mut cells: Vec<String> = match row {
        Value::Record(r) => r.fields.iter().map(|(_, v)| cell(v)).collect(),
        Value::Group { key, elements } => vec![cell(key), format!("{} element(s)", elements.len())],
        other => vec![cell(other)],
    };
    cells.resize(width, String::new());
    cells
}

fn cell(value: &Value) -> String {
    match value.to_json() {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

fn show_tables(config: &Config) {
    if config.tables.is_empty() {
        println!("{}", "(no tables configured)".dimmed());
        return;
    }
    for table in &config.tables {
        println!(
            "{} {} {}",
            table.entity.cyan().bold(),
            "→".dimmed(),
            table.stored_name().white()
        );
        for column in &table.columns {
            let mut line = format!("  {:20} {}", column.name, column.column_type());
            if column.ignored {
                line.push_str(" (ignored)");
            }
            println!("{}", line);
        }
    }
}
