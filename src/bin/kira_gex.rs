use std::io;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use kira_expression_cache::cache::{CacheContext, ErrorPolicy, LoaderOptions};
use kira_expression_cache::config::ConfigLoader;
use kira_expression_cache::connector::{ArchiveConnector, SqliteConnector};
use kira_expression_cache::domain::{SampleType, Xref};
use kira_expression_cache::error::GexError;
use kira_expression_cache::import::import_txt;
use kira_expression_cache::mapping::{DisconnectedMapper, TsvIdMapper};
use kira_expression_cache::output::{
    JsonOutput, LogProgress, LookupEntry, LookupResult, SampleListing, write_tsv,
};
use kira_expression_cache::progress::{ProgressKeeper, ProgressSink};
use kira_expression_cache::resolver::IdMapper;
use kira_expression_cache::store::ExpressionStore;

#[derive(Parser)]
#[command(name = "kira-gex")]
#[command(about = "Expression data store and cross-reference cache")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Import a delimited text file into a new expression store")]
    Import(ImportArgs),
    #[command(about = "List the samples of an expression store")]
    Samples(SamplesArgs),
    #[command(about = "Resolve identifiers and print their expression data")]
    Lookup(LookupArgs),
    #[command(about = "Write every reporter of a store as tab-separated text")]
    Export(StoreArgs),
}

#[derive(Args)]
struct ImportArgs {
    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct StoreArgs {
    store: Utf8PathBuf,
}

#[derive(Args)]
struct SamplesArgs {
    store: Utf8PathBuf,

    #[arg(long = "type")]
    data_type: Option<SampleType>,
}

#[derive(Args)]
struct LookupArgs {
    store: Utf8PathBuf,

    #[arg(required = true)]
    xrefs: Vec<String>,

    #[arg(long)]
    mapping: Option<Utf8PathBuf>,

    #[arg(long)]
    continue_on_error: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(gex) = report.downcast_ref::<GexError>() {
            return ExitCode::from(map_exit_code(gex));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GexError) -> u8 {
    match error {
        GexError::MissingConfig | GexError::ConfigRead(_) => 2,
        GexError::Schema(_) | GexError::StoreQuery(_) | GexError::Archive(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Import(args) => run_import(args),
        Commands::Samples(args) => run_samples(args),
        Commands::Lookup(args) => run_lookup(args),
        Commands::Export(args) => run_export(args),
    }
}

fn run_import(args: ImportArgs) -> miette::Result<()> {
    let resolved = ConfigLoader::resolve(args.config.as_deref())?;
    let report = if resolved.archive {
        import_txt(&resolved, ArchiveConnector, &LogProgress)?
    } else {
        import_txt(&resolved, SqliteConnector, &LogProgress)?
    };
    JsonOutput::print_import(&report).into_diagnostic()?;
    Ok(())
}

fn run_samples(args: SamplesArgs) -> miette::Result<()> {
    let store = open_store(&args.store)?;
    let samples = store.samples()?;
    let listing = SampleListing::new(
        samples,
        args.data_type,
        store
            .used_datasources()?
            .codes()
            .map(ToString::to_string)
            .collect(),
        store.row_count()?,
    );
    JsonOutput::print_samples(&listing).into_diagnostic()?;
    Ok(())
}

fn run_lookup(args: LookupArgs) -> miette::Result<()> {
    let xrefs = args
        .xrefs
        .iter()
        .map(|value| value.parse::<Xref>())
        .collect::<Result<Vec<_>, GexError>>()?;
    let keeper = ProgressKeeper::default();

    // The store stays on the worker thread; this thread only watches progress.
    let result = thread::scope(|scope| {
        let worker = scope.spawn(|| lookup(&args, &xrefs, &keeper));
        while !worker.is_finished() {
            thread::sleep(Duration::from_millis(200));
            debug!(
                progress = keeper.progress(),
                total = keeper.total_work(),
                "lookup running"
            );
        }
        worker.join()
    })
    .map_err(|_| miette::Report::msg("lookup worker panicked"))??;

    JsonOutput::print_lookup(&result).into_diagnostic()?;
    Ok(())
}

fn lookup(
    args: &LookupArgs,
    xrefs: &[Xref],
    sink: &dyn ProgressSink,
) -> Result<LookupResult, GexError> {
    let store = open_store(&args.store)?;
    let mapper: Box<dyn IdMapper> = match &args.mapping {
        Some(path) => Box::new(TsvIdMapper::load(path)?),
        None => Box::new(DisconnectedMapper),
    };
    let options = LoaderOptions {
        on_error: if args.continue_on_error {
            ErrorPolicy::Continue
        } else {
            ErrorPolicy::Abort
        },
    };
    let mut context = CacheContext::with_options(&store, options);
    let report = context.cache_data(xrefs, sink, mapper.as_ref())?;

    let mut entries = Vec::new();
    for xref in xrefs {
        if let Some(reporters) = context.cached_data(xref) {
            entries.push(LookupEntry {
                xref: xref.to_string(),
                reporters: reporters.to_vec(),
                summary: context.averaged(xref)?,
            });
        }
    }
    Ok(LookupResult { report, entries })
}

fn run_export(args: StoreArgs) -> miette::Result<()> {
    let store = open_store(&args.store)?;
    let samples = store.samples()?;
    let mut scan = store.scan()?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let written = write_tsv(&mut out, samples, scan.groups()?).into_diagnostic()?;
    debug!(reporters = written, "export finished");
    Ok(())
}

fn open_store(path: &Utf8Path) -> Result<ExpressionStore, GexError> {
    let is_archive = path.extension() == Some("zip") || path.as_std_path().is_dir();
    if is_archive {
        ExpressionStore::open(path.to_owned(), ArchiveConnector)
    } else {
        ExpressionStore::open(path.to_owned(), SqliteConnector)
    }
}
