//! pg-schema-migrate CLI - schema-driven PostgreSQL to PostgreSQL migration.

use clap::{Parser, Subcommand};
use pg_schema_migrate::error::DbSide;
use pg_schema_migrate::{
    Config, HealthCheckResult, MigrateError, MigrationReport, Orchestrator, TablePlan,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "pg-schema-migrate")]
#[command(about = "Schema-driven PostgreSQL to PostgreSQL table migration")]
#[command(version)]
struct Cli {
    /// YAML file describing the connections and the table list
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Source connection string (overrides the config file)
    #[arg(long, env = "SOURCE_DB_URL", hide_env_values = true)]
    source_url: Option<String>,

    /// Target connection string (overrides the config file)
    #[arg(long, env = "TARGET_DB_URL", hide_env_values = true)]
    target_url: Option<String>,

    /// Print the report, plan or health result as JSON
    #[arg(long)]
    output_json: bool,

    /// Log line format (text, json)
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Minimum log level (debug, info, warn, error)
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate the configured tables
    Run {
        /// Schema to read legacy tables from
        #[arg(long)]
        source_schema: Option<String>,

        /// Schema to write migrated tables into
        #[arg(long)]
        target_schema: Option<String>,

        /// Tables migrated at once within a rank
        #[arg(long)]
        workers: Option<usize>,

        /// Only migrate these tables (comma separated)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Dry run: show the plan without changing the target
        #[arg(long)]
        dry_run: bool,
    },

    /// Show what a run would do without changing the target
    Plan {
        /// Only plan these tables (comma separated)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
    },

    /// Check that both databases accept connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let (schemas, workers, tables) = match &cli.command {
        Commands::Run {
            source_schema,
            target_schema,
            workers,
            tables,
            ..
        } => (
            (source_schema.clone(), target_schema.clone()),
            *workers,
            tables.clone(),
        ),
        Commands::Plan { tables } => ((None, None), None, tables.clone()),
        Commands::HealthCheck => ((None, None), None, Vec::new()),
    };

    let config = Config::load_with(&cli.config, |config| {
        if let Some(url) = cli.source_url.clone() {
            config.source.url = Some(url);
        }
        if let Some(url) = cli.target_url.clone() {
            config.target.url = Some(url);
        }
        if let Some(schema) = schemas.0 {
            config.source.schema = schema;
        }
        if let Some(schema) = schemas.1 {
            config.target.schema = schema;
        }
        if let Some(w) = workers {
            config.migration.workers = w;
        }
        if !tables.is_empty() {
            config.retain_tables(&tables);
        }
    })?;
    info!(config = %cli.config.display(), tables = config.tables.len(), "configuration loaded");

    match cli.command {
        Commands::Run { dry_run: true, .. } | Commands::Plan { .. } => {
            let plans = Orchestrator::new(config).await?.plan().await?;
            print_plan(&plans, cli.output_json)?;
        }

        Commands::Run { .. } => {
            let cancel_token = setup_signal_handler();
            let report = Orchestrator::new(config).await?.run(cancel_token).await?;
            print_report(&report, cli.output_json)?;
            if let Some(e) = report.to_error() {
                return Err(e);
            }
        }

        Commands::HealthCheck => {
            let result = Orchestrator::check_health(&config).await;
            print_health(&result, cli.output_json)?;
            if !result.healthy {
                let side = if result.source.connected {
                    DbSide::Target
                } else {
                    DbSide::Source
                };
                return Err(MigrateError::connection(side, "health check failed"));
            }
        }
    }

    Ok(())
}

fn print_report(report: &MigrationReport, json: bool) -> Result<(), MigrateError> {
    if json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    println!("\nMigration {}", report.status);
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", report.duration_seconds);
    println!(
        "  Tables: {} done, {} skipped, {} failed (of {})",
        report.tables_done, report.tables_skipped, report.tables_failed, report.tables_total
    );
    println!(
        "  Rows: {} attempted, {} inserted, {} failed",
        report.rows_attempted, report.rows_inserted, report.rows_failed
    );
    if report.keys_rewritten > 0 {
        println!("  Duplicate keys rewritten: {}", report.keys_rewritten);
    }
    for table in &report.tables {
        let detail = match (&table.skip_reason, &table.fatal_error) {
            (Some(reason), _) => format!(" ({})", reason),
            (None, Some(err)) => format!(" ({})", err),
            (None, None) => String::new(),
        };
        println!(
            "    {:<40} {:<8} {:>10} inserted {:>8} failed{}",
            table.table, table.status, table.rows_inserted, table.rows_failed, detail
        );
        if let Some(ref err) = table.resume_error {
            println!("      Trigger restore failed: {}", err);
        }
    }
    let failed = report.failed_tables();
    if !failed.is_empty() {
        println!("  Failed tables: {:?}", failed);
    }
    Ok(())
}

fn print_plan(plans: &[TablePlan], json: bool) -> Result<(), MigrateError> {
    if json {
        println!("{}", serde_json::to_string_pretty(plans)?);
        return Ok(());
    }

    println!("Migration plan:");
    for plan in plans {
        println!(
            "\n  {} -> {} (mode: {:?}, rank: {})",
            plan.table, plan.target_table, plan.mode, plan.rank
        );
        if let Some(reason) = plan.skip_reason {
            println!("    Skipped: {}", reason);
            continue;
        }
        println!("    Columns: {}", plan.columns.moved.join(", "));
        if !plan.columns.excluded.is_empty() {
            println!("    Excluded: {}", plan.columns.excluded.join(", "));
        }
        if !plan.columns.source_only.is_empty() {
            println!("    Not in target: {}", plan.columns.source_only.join(", "));
        }
        if !plan.columns.target_only.is_empty() {
            println!("    Left to defaults: {}", plan.columns.target_only.join(", "));
        }
        if let Some(ref key) = plan.natural_key {
            println!("    Natural key: {}", key);
        }
        if let Some(ref ddl) = plan.ddl {
            println!("    DDL:\n{}", ddl);
        }
    }
    Ok(())
}

fn print_health(result: &HealthCheckResult, json: bool) -> Result<(), MigrateError> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("Connectivity:");
    for (name, side) in [("Source", &result.source), ("Target", &result.target)] {
        println!(
            "  {}: {} ({}ms)",
            name,
            if side.connected { "OK" } else { "FAILED" },
            side.latency_ms
        );
        if let Some(ref err) = side.error {
            println!("    {}", err);
        }
    }
    println!(
        "\n  Overall: {}",
        if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
    );
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("unknown verbosity '{}'", other)),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format '{}'", other)),
    }

    Ok(())
}

/// Cancel the returned token on SIGINT or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Finishing the current row and stopping...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("Failed to set up {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Cancel the returned token on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                eprintln!("\nReceived Ctrl-C. Finishing the current row and stopping...");
                token.cancel();
            }
            Err(e) => warn!("Failed to set up Ctrl-C handler: {}", e),
        }
    });

    cancel_token
}
