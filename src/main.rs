use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cloudscan::config::Config;
use cloudscan::engine::{EngineSettings, Qualifier, RegionSettings};
use cloudscan::provider::{FixtureProvider, HttpProvider, Provider};
use cloudscan::resource::{get_registry, TableRegistry};
use cloudscan::{Engine, QueryRequest, VERSION};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Query cloud resources across regions as JSON rows
#[derive(Parser, Debug)]
#[command(name = "cloudscan", version, about, long_about = None)]
struct Args {
    /// Serve API responses from a fixture file instead of the network
    #[arg(long, conflicts_with = "endpoint")]
    fixture: Option<PathBuf>,

    /// Endpoint template, e.g. https://{service}.{region}.amazonaws.com
    #[arg(long)]
    endpoint: Option<String>,

    /// Document listing the account's regions
    #[arg(long, requires = "endpoint")]
    regions_url: Option<String>,

    /// Document listing the regions each service is offered in
    #[arg(long, requires = "endpoint")]
    endpoints_url: Option<String>,

    /// Region pattern to query (repeatable, supports * and ?)
    #[arg(short, long = "region")]
    regions: Vec<String>,

    /// Region that selects the partition
    #[arg(long)]
    client_region: Option<String>,

    /// Error code ignored for every table (repeatable)
    #[arg(long = "ignore-error")]
    ignore_errors: Vec<String>,

    /// Concurrent hydrate calls
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Keep other regions running when one fails
    #[arg(long)]
    no_fail_fast: bool,

    /// Extra table definitions (JSON or YAML)
    #[arg(long)]
    tables: Vec<PathBuf>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query a table
    Query {
        table: String,
        /// Qualifier such as `name=alerts`, `size>=10`, `id=["a","b"]` (repeatable)
        #[arg(short, long = "where")]
        qualifiers: Vec<String>,
        /// Comma-separated columns to return
        #[arg(short, long, value_delimiter = ',')]
        columns: Vec<String>,
        /// Maximum number of rows
        #[arg(short, long)]
        limit: Option<u64>,
        /// Print per-region reports to stderr
        #[arg(long)]
        report: bool,
    },
    /// List available tables
    Tables,
    /// Show the regions a query would enumerate
    Scopes {
        table: String,
        #[arg(short, long = "where")]
        qualifiers: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cloudscan {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("cloudscan").join("cloudscan.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".cloudscan").join("cloudscan.log");
    }
    PathBuf::from("cloudscan.log")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    let config = Config::load();
    let registry = load_registry(&args.tables)?;

    if let Command::Tables = &args.command {
        let mut stdout = std::io::stdout().lock();
        for name in registry.names() {
            if let Some(table) = registry.get(name) {
                writeln!(stdout, "{}\t{}", name, table.def.description)?;
            }
        }
        return Ok(());
    }

    let provider = build_provider(&args, &config)?;
    let settings = EngineSettings {
        regions: RegionSettings::new(
            config.effective_regions(&args.regions),
            config.effective_client_region(args.client_region.as_deref()),
        ),
        ignore_error_codes: config
            .ignore_error_codes
            .iter()
            .chain(args.ignore_errors.iter())
            .cloned()
            .collect(),
        max_concurrency: config.effective_max_concurrency(args.max_concurrency),
        fail_fast: !args.no_fail_fast,
        ..Default::default()
    };
    tracing::info!("Using settings: {:?}", settings);

    let engine = Engine::new(provider, registry, settings);

    match args.command {
        Command::Query {
            table,
            qualifiers,
            columns,
            limit,
            report,
        } => {
            let request = QueryRequest {
                table,
                qualifiers: parse_qualifiers(&qualifiers)?,
                columns,
                limit,
            };
            run_query(&engine, request, report).await
        },
        Command::Scopes { table, qualifiers } => {
            let scopes = engine.scopes(&table, &parse_qualifiers(&qualifiers)?).await?;
            let mut stdout = std::io::stdout().lock();
            for scope in scopes {
                writeln!(stdout, "{}\t{}", scope.name(), scope.endpoint_region())?;
            }
            Ok(())
        },
        Command::Tables => Ok(()),
    }
}

fn load_registry(extra: &[PathBuf]) -> Result<TableRegistry> {
    let mut registry = get_registry().clone();
    for path in extra {
        registry.load_file(path)?;
    }
    Ok(registry)
}

fn build_provider(args: &Args, config: &Config) -> Result<Arc<dyn Provider>> {
    if let Some(path) = &args.fixture {
        let provider = FixtureProvider::load(path)?;
        return Ok(Arc::new(provider));
    }

    let Some(endpoint) = config.effective_endpoint(args.endpoint.as_deref()) else {
        anyhow::bail!("No data source configured. Use --fixture FILE or --endpoint TEMPLATE");
    };

    let mut provider = HttpProvider::new(endpoint)?;
    if let Some(url) = &args.regions_url {
        provider = provider.with_regions_url(url);
    }
    if let Some(url) = &args.endpoints_url {
        provider = provider.with_endpoints_url(url);
    }
    Ok(Arc::new(provider))
}

fn parse_qualifiers(exprs: &[String]) -> Result<Vec<Qualifier>> {
    exprs
        .iter()
        .map(|e| Qualifier::parse(e).with_context(|| format!("Bad --where {}", e)))
        .collect()
}

async fn run_query(engine: &Engine, request: QueryRequest, report: bool) -> Result<()> {
    let mut stream = engine.execute(request).await?;
    let mut stdout = std::io::stdout().lock();

    while let Some(row) = stream.next().await {
        for failure in &row.errors {
            eprintln!(
                "warning: [{}] {} failed: {}: {}",
                row.scope, failure.hydrate, failure.code, failure.message
            );
        }
        writeln!(stdout, "{}", serde_json::to_string(&row.columns)?)?;
    }
    stdout.flush()?;

    let reports = stream.finish().await?;
    if report {
        for scope in &reports {
            eprintln!("{}", serde_json::to_string(scope)?);
        }
    }
    Ok(())
}
