use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use cloudaudit::config::{Config, APP_DIR};
use cloudaudit::gcp::{format_gcp_error, GcpCredentials, GcpProvider};
use cloudaudit::provider::{Credentials, Provider};
use cloudaudit::report::{OutputFormat, RulesReport, ScanReport};
use cloudaudit::resource::{get_all_service_names, ServiceConfiguration};
use cloudaudit::rules::{
    read_definitions, FsIpRangeReader, RuleMaterializer, RuleTemplate, Severity,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Version injected at compile time via CLOUDAUDIT_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("CLOUDAUDIT_VERSION") {
    Some(v) => v,
    None => "dev",
};

/// Audit a GCP project for security misconfigurations
#[derive(Parser, Debug)]
#[command(name = "cloudaudit", version, about, long_about = None)]
struct Args {
    /// GCP project to audit
    #[arg(short, long)]
    project: Option<String>,

    /// Service to scan (repeatable; default: every registered service)
    #[arg(short, long = "service")]
    services: Vec<String>,

    /// Region to scan (repeatable; default: every available region)
    #[arg(short, long = "region")]
    regions: Vec<String>,

    /// Partition: "gcp" or a universe domain
    #[arg(long)]
    partition: Option<String>,

    /// Number of concurrent region listers
    #[arg(long)]
    feeder_workers: Option<usize>,

    /// Number of concurrent resource parsers
    #[arg(long)]
    consumer_workers: Option<usize>,

    /// Deadline for each API list call, in seconds
    #[arg(long)]
    call_timeout: Option<u64>,

    /// Bearer token to use instead of Application Default Credentials
    #[arg(long)]
    access_token: Option<String>,

    /// Rule catalog directory; enables rule materialization
    #[arg(long)]
    rules_dir: Option<PathBuf>,

    /// JSON list of rule templates (default: every catalog rule, no arguments)
    #[arg(long, requires = "rules_dir")]
    ruleset: Option<PathBuf>,

    /// IP range file substituted for ip-ranges-from-args (repeatable)
    #[arg(long = "ip-ranges")]
    ip_ranges: Vec<String>,

    /// Directory that local IP range files resolve against (default: current directory)
    #[arg(long, requires = "rules_dir")]
    ip_ranges_dir: Option<PathBuf>,

    /// Write the report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,
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

    tracing::info!("cloudaudit {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(dir) = Config::app_dir() {
        return dir.join("cloudaudit.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(format!(".{}", APP_DIR)).join("cloudaudit.log");
    }
    PathBuf::from("cloudaudit.log")
}

/// CLI flags override the stored configuration
fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(project) = &args.project {
        config.project_id = Some(project.clone());
    }
    if let Some(partition) = &args.partition {
        config.partition = partition.clone();
    }
    if !args.services.is_empty() {
        config.services = args.services.clone();
    }
    if !args.regions.is_empty() {
        config.regions = args.regions.clone();
    }
    if let Some(n) = args.feeder_workers {
        config.feeder_workers = n;
    }
    if let Some(n) = args.consumer_workers {
        config.consumer_workers = n;
    }
    if args.call_timeout.is_some() {
        config.call_timeout_secs = args.call_timeout;
    }
    if !args.ip_ranges.is_empty() {
        config.ip_ranges = args.ip_ranges.clone();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    let mut config = Config::load();
    apply_overrides(&mut config, &args);

    let Some(project) = config.effective_project() else {
        bail!("No GCP project configured. Set GOOGLE_CLOUD_PROJECT or use --project flag");
    };
    tracing::info!("Auditing project {} ({})", project, config.partition);

    let gcp_credentials = match &args.access_token {
        Some(token) => GcpCredentials::from_token(token),
        None => GcpCredentials::new().await?,
    };
    let provider: Arc<dyn Provider> = Arc::new(
        GcpProvider::new(gcp_credentials, &config.partition)?.with_project(&project),
    );
    let credentials = Credentials::for_account(&project);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, stopping scan");
                cancel.cancel();
            }
        });
    }

    let services: Vec<String> = if config.services.is_empty() {
        get_all_service_names().into_iter().map(str::to_string).collect()
    } else {
        config.services.clone()
    };

    let mut report = ScanReport::new(&project, &config.partition);

    for name in &services {
        let mut service = ServiceConfiguration::from_registry(name)?;
        let options = config.fetch_options(cancel.clone());
        let outcome = service
            .fetch(
                provider.clone(),
                &credentials,
                &config.regions,
                &config.partition,
                None,
                options,
            )
            .await;

        if cancel.is_cancelled() {
            bail!("Scan interrupted");
        }

        match outcome {
            Ok(()) => {
                service.finalize();
                eprintln!("{}: {}", name, summarize(service.counts()));
                report.add_service(name, service.report());
            }
            Err(e) => {
                tracing::error!("Failed to fetch {}: {:#}", name, e);
                eprintln!("{}: {}", name, format_gcp_error(&e));
                report.add_error(name, format_gcp_error(&e));
            }
        }
    }

    if let Some(dir) = &args.rules_dir {
        let reader = FsIpRangeReader::new(dir).with_working_dir(match &args.ip_ranges_dir {
            Some(ip_dir) => ip_dir.clone(),
            None => std::env::current_dir().context("Failed to resolve current directory")?,
        });
        report.rules = Some(materialize_rules(
            dir,
            args.ruleset.as_deref(),
            &config.ip_ranges,
            reader,
        )?);
    }

    report.finish();
    match &args.output {
        Some(path) => {
            report.write_to(path, args.format)?;
            eprintln!("Report written to {}", path.display());
        }
        None => println!("{}", report.render(args.format)?),
    }

    Ok(())
}

fn summarize(counts: &std::collections::BTreeMap<String, usize>) -> String {
    counts
        .iter()
        .map(|(name, count)| format!("{} {}", count, name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn materialize_rules(
    dir: &Path,
    ruleset: Option<&Path>,
    ip_ranges: &[String],
    reader: FsIpRangeReader,
) -> Result<RulesReport> {
    let definitions = read_definitions(dir)?;

    let templates: Vec<RuleTemplate> = match ruleset {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read ruleset {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse ruleset {}", path.display()))?
        }
        None => {
            let mut identities: Vec<&String> = definitions.keys().collect();
            identities.sort();
            identities
                .into_iter()
                .map(|identity| RuleTemplate::new(identity, "findings", Severity::Warning, &[]))
                .collect()
        }
    };

    let materializer = RuleMaterializer::new(Arc::new(reader));
    let catalog = materializer.materialize_catalog(&templates, &definitions, &[], ip_ranges);
    eprintln!(
        "rules: {} materialized, {} failed",
        catalog.rules.len(),
        catalog.failures.len()
    );
    Ok(catalog.into())
}
