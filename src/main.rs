#![warn(unused_qualifications)]

pub mod args;
pub mod config;
pub mod files;

use std::path::{
    Path,
    PathBuf,
};

use clap::{
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Context,
    Error,
    bail,
};
use dotenvy::dotenv;
use fdfd_solver::{
    CavitySimulation,
    GridGeometry,
    Simulation1D,
    SimulationConfig,
    constants::OMEGA_1550,
    simulation::LineConfig,
};
use maxwell_dataset::{
    DatasetBuilder,
    DatasetStore,
    FailurePolicy,
};
use tracing_subscriber::EnvFilter;

use crate::{
    args::{
        ExportOperatorsArgs,
        GenerateArgs,
        Scenario,
        StoreArgs,
    },
    config::{
        AppConfig,
        ConfigFormat,
    },
    files::AppFiles,
};

fn main() -> Result<(), Error> {
    let _ = dotenv();
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let args = Args::parse();
    match args.command {
        Command::Generate(generate) => {
            let (files, config) = load_config(args.config.as_deref())?;
            run_generate(&files, config, generate)?;
        }
        Command::Info { store, batch } => {
            let (files, config) = load_config(args.config.as_deref())?;
            run_info(&files, &config, store, batch)?;
        }
        Command::ExportOperators(export) => run_export_operators(export)?,
        Command::DumpDefaultConfig { output, format } => {
            let Some(format) = ConfigFormat::from_name(&format)
            else {
                bail!("Invalid format: {format}");
            };
            let config = format.to_string_pretty(&AppConfig::default())?;
            if let Some(output) = &output {
                std::fs::write(output, &config)?;
            }
            else {
                println!("{config}");
            }
        }
    }

    Ok(())
}

#[derive(Debug, Parser)]
struct Args {
    /// Config file (TOML or JSON). Defaults to the user's config file, which is
    /// created if it doesn't exist.
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a batch of solved random devices.
    Generate(GenerateArgs),
    /// List the batches of a store.
    Info {
        #[clap(flatten)]
        store: StoreArgs,

        /// Only show this batch.
        batch: Option<String>,
    },
    /// Write the operators of a closed scenario as JSON triplets.
    ExportOperators(ExportOperatorsArgs),
    DumpDefaultConfig {
        #[clap(short, long)]
        output: Option<PathBuf>,
        #[clap(short, long, default_value = "toml")]
        format: String,
    },
}

fn load_config(path: Option<&Path>) -> Result<(AppFiles, AppConfig), Error> {
    let files = AppFiles::open()?;
    let config = match path {
        Some(path) => config::read_config(path)?,
        None => files.read_config_or_create()?,
    };
    Ok((files, config))
}

fn run_generate(files: &AppFiles, config: AppConfig, args: GenerateArgs) -> Result<(), Error> {
    let store_dir = files.store_dir(&config, args.store.store.as_deref());
    let batch_name = args.batch.unwrap_or(config.batch);
    let threads = args.threads.or(config.threads);

    let mut dataset = config.dataset;
    if let Some(records) = args.records {
        dataset.records = records;
    }
    if let Some(seed) = args.seed {
        dataset.seed = seed;
    }
    if let Some(kind) = args.generator {
        dataset.generator.kind = kind;
    }
    if let Some(polarization) = args.polarization {
        dataset.simulation.polarization = polarization;
    }
    if let Some(proximity) = args.proximity {
        dataset.proximity = proximity;
    }
    if args.resume {
        dataset.resume = true;
    }
    if args.skip_failures {
        dataset.failure_policy = FailurePolicy::Skip;
    }

    let store = DatasetStore::open(&store_dir)
        .with_context(|| format!("Could not open store: {}", store_dir.display()))?;
    let builder = DatasetBuilder::new(dataset)?;
    let mut batch = store.require_batch(&batch_name, &builder.schema())?;

    #[cfg(feature = "rayon")]
    let report = {
        let threading = match threads {
            Some(threads) => maxwell_dataset::MultiThreaded::from_num_threads(threads)?,
            None => maxwell_dataset::MultiThreaded::from_default_thread_pool(),
        };
        builder.with_threading(threading).build(&mut batch)?
    };

    #[cfg(not(feature = "rayon"))]
    let report = {
        if threads.is_some_and(|threads| threads > 1) {
            tracing::warn!("Built without multi-threading, ignoring thread count");
        }
        builder.build(&mut batch)?
    };

    println!(
        "{}: {} written, {} kept, {} failed ({}/{} valid)",
        batch.path().display(),
        report.written,
        report.skipped,
        report.failed,
        batch.valid_count(),
        batch.len()
    );

    Ok(())
}

fn run_info(
    files: &AppFiles,
    config: &AppConfig,
    store: StoreArgs,
    batch: Option<String>,
) -> Result<(), Error> {
    let store_dir = files.store_dir(config, store.store.as_deref());
    let store = DatasetStore::open(&store_dir)?;

    let names = match batch {
        Some(batch) => vec![batch],
        None => store.batches()?,
    };

    println!("{}", store_dir.display());
    for name in names {
        let batch = store.open_batch(&name)?;
        let schema = batch.schema();
        println!(
            "  {name}: {}/{} valid, {}x{} {}, {}",
            batch.valid_count(),
            schema.records,
            schema.shape[0],
            schema.shape[1],
            schema.polarization,
            humansize::format_size(schema.memory_required(), humansize::BINARY)
        );
    }

    Ok(())
}

fn run_export_operators(args: ExportOperatorsArgs) -> Result<(), Error> {
    let simulation_config = SimulationConfig::default()
        .with_omega(OMEGA_1550)
        .with_polarization(args.polarization);

    let operators = match args.scenario {
        Scenario::Cavity => {
            let geometry = GridGeometry::symmetric(args.device_size.unwrap_or(32), 0, 4);
            CavitySimulation::new(geometry, simulation_config)?.operators()?
        }
        Scenario::Line => {
            let line = LineConfig {
                device_length: args.device_size.unwrap_or(64),
                ..Default::default()
            };
            Simulation1D::new(line, simulation_config)?.operators()?
        }
    };

    tracing::info!(
        size = operators.size(),
        shape = ?operators.shape,
        polarization = %operators.polarization,
        "Exporting operators"
    );

    let json = serde_json::to_string(&operators.to_triplets())?;
    if let Some(output) = &args.output {
        std::fs::write(output, &json)
            .with_context(|| format!("Could not write operators: {}", output.display()))?;
    }
    else {
        println!("{json}");
    }

    Ok(())
}
