use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_variant_mapper::app::{App, Job};
use kira_variant_mapper::client::AnnotationHttpClient;
use kira_variant_mapper::config::ConfigLoader;
use kira_variant_mapper::error::KiraError;
use kira_variant_mapper::output::JsonOutput;
use kira_variant_mapper::store::SnapshotStore;

#[derive(Parser)]
#[command(name = "kira-vm")]
#[command(about = "Maps SNP ids to locations, cytogenetic bands and nearby genes")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Map a job of variant ids and print the report as JSON")]
    Map(MapArgs),
}

#[derive(Args)]
struct MapArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    job: PathBuf,

    #[arg(long)]
    job_id: Option<String>,

    #[arg(long, help = "Save the annotation snapshot under the cache directory")]
    snapshot: bool,

    #[arg(long, help = "Re-map from a saved snapshot instead of fetching")]
    reuse_snapshot: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::MissingConfig
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::InvalidConfig(_)
        | KiraError::InvalidJob(_)
        | KiraError::InvalidVariantId(_)
        | KiraError::SnapshotNotFound(_) => 2,
        KiraError::DeadlineExceeded { .. } => 3,
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
        Commands::Map(args) => run_map(args),
    }
}

fn run_map(args: MapArgs) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let job = Job::load(&args.job)?;
    let job_id = args
        .job_id
        .unwrap_or_else(|| chrono::Utc::now().format("%Y%m%dT%H%M%S").to_string());

    let client = AnnotationHttpClient::new(&config)?;
    let store = SnapshotStore::from_config(&config);
    let mut app = App::new(client, config)?;
    if args.snapshot || args.reuse_snapshot {
        app = app.with_store(store);
    }

    let report = if args.reuse_snapshot {
        app.rerun_job(&job_id, &job)?
    } else {
        app.run_job(&job_id, &job)?
    };
    JsonOutput::print_report(&report).into_diagnostic()?;
    Ok(())
}
