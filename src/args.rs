use std::path::PathBuf;

use fdfd_solver::{
    Polarization,
    ProximityTransform,
};
use maxwell_dataset::GeneratorKind;

#[derive(Clone, Debug, clap::Args)]
pub struct StoreArgs {
    /// Dataset store directory. Defaults to the configured store.
    #[clap(short, long)]
    pub store: Option<PathBuf>,
}

#[derive(Clone, Debug, clap::Args)]
pub struct GenerateArgs {
    #[clap(flatten)]
    pub store: StoreArgs,

    /// Batch name. Defaults to the configured batch.
    #[clap(short, long)]
    pub batch: Option<String>,

    #[clap(short = 'n', long)]
    pub records: Option<usize>,

    #[clap(long)]
    pub seed: Option<u64>,

    /// uniform, rectangle or ellipse
    #[clap(short, long)]
    pub generator: Option<GeneratorKind>,

    /// Ez or Hz
    #[clap(short, long)]
    pub polarization: Option<Polarization>,

    /// linear, squared, inv_linear or inv_squared
    #[clap(long)]
    pub proximity: Option<ProximityTransform>,

    /// Keep records that are already in the batch.
    #[clap(long)]
    pub resume: bool,

    /// Skip records that fail to solve instead of aborting.
    #[clap(long)]
    pub skip_failures: bool,

    /// Number of worker threads.
    #[clap(short = 'j', long)]
    pub threads: Option<usize>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    #[default]
    Cavity,
    Line,
}

#[derive(Clone, Debug, clap::Args)]
pub struct ExportOperatorsArgs {
    #[clap(long, value_enum, default_value_t)]
    pub scenario: Scenario,

    /// Ez or Hz
    #[clap(short, long, default_value_t)]
    pub polarization: Polarization,

    /// Device size in cells. Defaults to 32 for cavities and 64 for lines.
    #[clap(long)]
    pub device_size: Option<usize>,

    /// Output file (JSON). Prints to stdout if omitted.
    #[clap(short, long)]
    pub output: Option<PathBuf>,
}
