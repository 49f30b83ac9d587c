use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use oecd_econ_data::app::{App, DatasetTarget, DeriveTarget, FetchOptions, TracingSink};
use oecd_econ_data::client::{OecdClient, OecdHttpClient};
use oecd_econ_data::config::{LatestAnchor, Settings, SettingsLoader};
use oecd_econ_data::domain::{FilterPreset, StatusFilter};
use oecd_econ_data::error::EconError;
use oecd_econ_data::fetcher::PeriodSelection;
use oecd_econ_data::output::{self, OutputMode};
use oecd_econ_data::query::PeriodRange;
use oecd_econ_data::store::EconomicStore;

#[derive(Parser)]
#[command(name = "econ-data")]
#[command(about = "Fetch OECD economic time series into SQLite and derive metrics from them")]
#[command(version)]
struct Cli {
    /// SQLite database path (overrides the config file)
    #[arg(long, global = true)]
    db: Option<Utf8PathBuf>,

    /// JSON settings file (default: ./econ-data.json if present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List configured datasets")]
    List,
    #[command(about = "Create the database schema and indexes")]
    InitDb,
    #[command(about = "Fetch a period range or the latest N periods")]
    Fetch(FetchArgs),
    #[command(about = "Fetch a long history in multi-year windows")]
    Backfill(BackfillArgs),
    #[command(about = "Compute derived metrics from stored data")]
    Derive(DeriveArgs),
    #[command(about = "List stored metrics")]
    Metrics,
    #[command(about = "List stored countries")]
    Countries(CountriesArgs),
    #[command(about = "Show database statistics")]
    Stats,
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long)]
    dry_run: bool,

    /// Keep provisional (P) observations as well
    #[arg(long)]
    include_provisional: bool,

    /// Keep observations of every status
    #[arg(long)]
    no_filter_status: bool,

    /// Named status and coverage settings
    #[arg(long, value_enum, conflicts_with_all = ["include_provisional", "no_filter_status"])]
    preset: Option<FilterPreset>,

    /// Drop periods reported by fewer countries (overrides the preset's threshold)
    #[arg(long)]
    min_countries: Option<usize>,
}

impl FilterArgs {
    fn options(&self, batch_size: Option<usize>) -> FetchOptions {
        let filter = match self.preset {
            Some(preset) => preset.status_filter(),
            None => StatusFilter::from_flags(!self.no_filter_status, self.include_provisional),
        };
        FetchOptions {
            dry_run: self.dry_run,
            filter,
            batch_size,
            min_countries: self
                .min_countries
                .or(self.preset.map(|preset| preset.min_countries())),
        }
    }
}

#[derive(Args)]
struct FetchArgs {
    dataset: Option<String>,

    #[arg(long, conflicts_with = "dataset")]
    all: bool,

    #[arg(long)]
    start: Option<String>,

    #[arg(long)]
    end: Option<String>,

    #[arg(long, conflicts_with_all = ["start", "end"])]
    latest: Option<usize>,

    /// Where a --latest window ends (overrides the config file)
    #[arg(long, value_enum, requires = "latest")]
    latest_anchor: Option<LatestAnchor>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Args)]
struct BackfillArgs {
    dataset: Option<String>,

    #[arg(long, conflicts_with = "dataset")]
    all: bool,

    #[arg(long)]
    start: String,

    #[arg(long)]
    end: String,

    #[arg(long, default_value_t = 5)]
    batch_years: u32,

    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Args)]
#[command(args_conflicts_with_subcommands = true)]
struct DeriveArgs {
    #[command(subcommand)]
    command: Option<DeriveCommand>,

    name: Option<String>,

    #[arg(long, conflicts_with = "name")]
    all: bool,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum DeriveCommand {
    #[command(about = "Rebase any stored metric to 100 at its first period")]
    Rebase {
        #[arg(long)]
        source: String,

        #[arg(long)]
        target: Option<String>,

        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Args)]
struct CountriesArgs {
    #[arg(long)]
    metric: Option<String>,
}

fn main() -> ExitCode {
    let outcome = run();
    if let Err(report) = &outcome {
        eprintln!("{report:?}");
    }
    ExitCode::from(exit_code(&outcome))
}

/// 0 only when every batch of every dataset succeeded.
fn exit_code(outcome: &miette::Result<bool>) -> u8 {
    match outcome {
        Ok(true) => 0,
        Ok(false) | Err(_) => 1,
    }
}

/// `Ok(false)` means the command could not run cleanly: bad usage, or at
/// least one batch failed.
fn run() -> miette::Result<bool> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version go to stdout and are not failures.
            let _ = err.print();
            return Ok(!err.use_stderr());
        }
    };
    let mut settings = SettingsLoader::resolve(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        settings.database_path = db;
    }
    let mode = OutputMode::from_json_flag(cli.json);
    let store = EconomicStore::open(&settings.database_path)?;
    info!(database = %settings.database_path, "store.open");

    match cli.command {
        Commands::Fetch(args) => {
            if let Some(anchor) = args.latest_anchor {
                settings.latest_anchor = anchor;
            }
            let client = OecdHttpClient::new(settings.timeout, settings.retry)?;
            let mut app = App::new(store, &settings, client);
            let target = dataset_target(args.dataset, args.all)?;
            let period = PeriodSelection::from_args(
                args.start.as_deref(),
                args.end.as_deref(),
                args.latest,
            )?;
            let options = args.filter.options(args.batch_size);
            let report = app.fetch(&target, period, &options, &TracingSink)?;
            mode.emit(&report, output::render_fetch_report)
                .into_diagnostic()?;
            Ok(report.is_success())
        }
        Commands::Backfill(args) => {
            let client = OecdHttpClient::new(settings.timeout, settings.retry)?;
            let mut app = App::new(store, &settings, client);
            let target = dataset_target(args.dataset, args.all)?;
            let range = PeriodRange::parse(&args.start, &args.end)?;
            let options = args.filter.options(None);
            let report = app.backfill(&target, range, args.batch_years, &options, &TracingSink)?;
            mode.emit(&report, output::render_backfill_report)
                .into_diagnostic()?;
            Ok(report.is_success())
        }
        Commands::Derive(args) => {
            let (target, dry_run) = match args.command {
                Some(DeriveCommand::Rebase {
                    source,
                    target,
                    dry_run,
                }) => (DeriveTarget::Rebase { source, target }, dry_run),
                None => match (args.name, args.all) {
                    (Some(name), false) => (DeriveTarget::Named(name), args.dry_run),
                    (None, true) => (DeriveTarget::All, args.dry_run),
                    _ => {
                        return Err(EconError::Argument(
                            "give a derived metric name, --all, or `rebase --source M`"
                                .to_string(),
                        )
                        .into());
                    }
                },
            };
            let mut app = offline_app(store, &settings);
            let report = app.derive(&target, dry_run, &TracingSink)?;
            mode.emit(&report, output::render_derive_report)
                .into_diagnostic()?;
            Ok(true)
        }
        Commands::List => {
            let app = offline_app(store, &settings);
            mode.emit(&app.list_configs(), output::render_list)
                .into_diagnostic()?;
            Ok(true)
        }
        Commands::InitDb => {
            let app = offline_app(store, &settings);
            let result = app.init_db(&TracingSink)?;
            mode.emit(&result, output::render_init_db).into_diagnostic()?;
            Ok(true)
        }
        Commands::Metrics => {
            let app = offline_app(store, &settings);
            mode.emit(&app.metrics()?, output::render_metrics)
                .into_diagnostic()?;
            Ok(true)
        }
        Commands::Countries(args) => {
            let app = offline_app(store, &settings);
            mode.emit(&app.countries(args.metric.as_deref())?, output::render_countries)
                .into_diagnostic()?;
            Ok(true)
        }
        Commands::Stats => {
            let app = offline_app(store, &settings);
            mode.emit(&app.stats()?, output::render_stats)
                .into_diagnostic()?;
            Ok(true)
        }
    }
}

fn dataset_target(dataset: Option<String>, all: bool) -> Result<DatasetTarget, EconError> {
    match (dataset, all) {
        (Some(name), false) => Ok(DatasetTarget::Named(name)),
        (None, true) => Ok(DatasetTarget::All),
        _ => Err(EconError::Argument(
            "give a dataset name or --all".to_string(),
        )),
    }
}

fn offline_app(store: EconomicStore, settings: &Settings) -> App<NopClient> {
    App::new(store, settings, NopClient)
}

/// Stands in for the HTTP client on commands that never touch the network.
struct NopClient;

impl OecdClient for NopClient {
    fn fetch_csv(&self, _url: &str) -> Result<String, EconError> {
        Err(EconError::Http("OECD client not configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_failure_exits_with_one() {
        assert_eq!(exit_code(&Ok(true)), 0);
        assert_eq!(exit_code(&Ok(false)), 1);
        for err in [
            EconError::Argument("x".to_string()),
            EconError::Configuration("x".to_string()),
            EconError::fetch(Some(503), "x"),
        ] {
            assert_eq!(exit_code(&Err(err.into())), 1);
        }
    }

    #[test]
    fn preset_sets_filter_and_threshold() {
        let cli = Cli::parse_from([
            "econ-data", "fetch", "gdp_per_capita", "--latest", "4", "--preset", "strict",
        ]);
        let Commands::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        let options = args.filter.options(None);
        assert_eq!(options.min_countries, Some(35));
        assert_eq!(options.filter, FilterPreset::Strict.status_filter());

        let cli = Cli::parse_from([
            "econ-data", "fetch", "gdp_per_capita", "--latest", "4", "--preset", "gdp",
            "--min-countries", "10",
        ]);
        let Commands::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        assert_eq!(args.filter.options(None).min_countries, Some(10));
    }
}
