use std::sync::{
    Arc,
    atomic::{
        AtomicBool,
        AtomicUsize,
        Ordering,
    },
};

use fdfd_solver::{
    ConfigurationError,
    GridGeometry,
    OpenSimulation,
    ProximityTransform,
    SimulationConfig,
    constants::DEFAULT_DEVICE_SIZE,
    proximity::proximity_map,
};
use parking_lot::Mutex;
use rand::{
    SeedableRng,
    rngs::StdRng,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    generator::{
        GeneratorConfig,
        PermittivityGenerator,
    },
    store::{
        Batch,
        Record,
        Schema,
        StoreError,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to build record {index}")]
    Record {
        index: usize,
        #[source]
        source: fdfd_solver::Error,
    },

    #[error("Cancelled after writing {written} records")]
    Cancelled { written: usize },
}

/// What to do when a single record can't be solved.
///
/// Store errors always abort the build.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Abort,
    /// Log the failure and leave the slot invalid.
    Skip,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Number of records in the batch.
    #[serde(default = "default_records")]
    pub records: usize,

    /// Base seed. Record `i` is generated from its own RNG seeded from this
    /// and `i`.
    #[serde(default)]
    pub seed: u64,

    #[serde(default = "default_device_size")]
    pub device_size: usize,

    #[serde(default = "default_padding")]
    pub npml: usize,

    #[serde(default = "default_padding")]
    pub buffer: usize,

    #[serde(default)]
    pub proximity: ProximityTransform,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Keep records that are already valid instead of recomputing them.
    #[serde(default)]
    pub resume: bool,

    #[serde(default)]
    pub simulation: SimulationConfig,

    #[serde(default)]
    pub generator: GeneratorConfig,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            records: default_records(),
            seed: 0,
            device_size: default_device_size(),
            npml: default_padding(),
            buffer: default_padding(),
            proximity: Default::default(),
            failure_policy: Default::default(),
            resume: false,
            simulation: Default::default(),
            generator: Default::default(),
        }
    }
}

fn default_records() -> usize {
    1000
}

fn default_device_size() -> usize {
    DEFAULT_DEVICE_SIZE
}

fn default_padding() -> usize {
    16
}

impl BuilderConfig {
    pub fn geometry(&self) -> GridGeometry {
        GridGeometry::symmetric(self.device_size, self.npml, self.buffer)
    }

    pub fn schema(&self) -> Schema {
        Schema::new(
            self.records,
            self.geometry().device_shape(),
            self.simulation.polarization,
        )
    }
}

/// Defines how records are distributed over threads.
pub trait RecordForEach: Send + Sync + 'static {
    fn for_each<F>(&self, indices: &[usize], f: F)
    where
        F: Fn(usize) + Send + Sync;
}

/// Use single-threading
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleThreaded;

impl RecordForEach for SingleThreaded {
    fn for_each<F>(&self, indices: &[usize], f: F)
    where
        F: Fn(usize) + Send + Sync,
    {
        indices.iter().for_each(|index| f(*index))
    }
}

/// Use multi-threading
#[cfg(feature = "rayon")]
#[derive(Clone, Debug)]
pub struct MultiThreaded {
    thread_pool: Option<Arc<rayon::ThreadPool>>,
}

#[cfg(feature = "rayon")]
impl RecordForEach for MultiThreaded {
    fn for_each<F>(&self, indices: &[usize], f: F)
    where
        F: Fn(usize) + Send + Sync,
    {
        use rayon::iter::{
            IntoParallelRefIterator as _,
            ParallelIterator as _,
        };

        let f = || indices.par_iter().for_each(|index| f(*index));

        if let Some(thread_pool) = &self.thread_pool {
            thread_pool.install(f);
        }
        else {
            f();
        }
    }
}

#[cfg(feature = "rayon")]
impl MultiThreaded {
    /// Use default number of threads (see [`rayon::current_num_threads`])
    pub fn from_default_thread_pool() -> Self {
        Self { thread_pool: None }
    }

    pub fn from_num_threads(num_threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        Ok(Self::from_thread_pool(
            rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build()?,
        ))
    }

    pub fn from_thread_pool(thread_pool: rayon::ThreadPool) -> Self {
        Self {
            thread_pool: Some(Arc::new(thread_pool)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub written: usize,
    /// Records that were already valid and kept (resume).
    pub skipped: usize,
    /// Records that failed under [`FailurePolicy::Skip`].
    pub failed: usize,
}

/// Fills a batch with solved random instances.
///
/// Every record is a pure function of the configuration and its index, so
/// the output doesn't depend on the threading or on which records were
/// resumed.
#[derive(derive_more::Debug)]
pub struct DatasetBuilder<T = SingleThreaded> {
    config: BuilderConfig,
    simulation: OpenSimulation,
    #[debug(skip)]
    generator: Box<dyn PermittivityGenerator>,
    threading: T,
    cancel: Arc<AtomicBool>,
}

impl DatasetBuilder {
    pub fn new(config: BuilderConfig) -> Result<Self, BuildError> {
        let geometry = config.geometry();
        if config.buffer < 2 {
            return Err(ConfigurationError::EmptySourceRegion {
                buffer: config.buffer,
            }
            .into());
        }

        let simulation = OpenSimulation::new(geometry, config.simulation)?;
        let generator = config.generator.build(config.device_size)?;

        Ok(Self {
            config,
            simulation,
            generator,
            threading: SingleThreaded,
            cancel: Default::default(),
        })
    }
}

impl<T: RecordForEach> DatasetBuilder<T> {
    pub fn with_threading<U: RecordForEach>(self, threading: U) -> DatasetBuilder<U> {
        DatasetBuilder {
            config: self.config,
            simulation: self.simulation,
            generator: self.generator,
            threading,
            cancel: self.cancel,
        }
    }

    /// Replaces the generator built from the configuration.
    pub fn with_generator(
        mut self,
        generator: Box<dyn PermittivityGenerator>,
    ) -> Result<Self, BuildError> {
        if generator.size() != self.config.device_size {
            return Err(ConfigurationError::InvalidParameter {
                name: "generator",
                reason: format!(
                    "generates blocks of size {}, but the device has size {}",
                    generator.size(),
                    self.config.device_size
                ),
            }
            .into());
        }
        self.generator = generator;
        Ok(self)
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn simulation(&self) -> &OpenSimulation {
        &self.simulation
    }

    /// Setting this flag stops the build before the next record.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn schema(&self) -> Schema {
        self.config.schema()
    }

    /// Generates and solves record `index`.
    pub fn build_record(&self, index: usize) -> Result<Record, fdfd_solver::Error> {
        let mut rng = record_rng(self.config.seed, index);

        let permittivity = self.generator.generate(&mut rng);
        let solution = self
            .simulation
            .solve_with_random_source(&permittivity, &mut rng)?;
        let proximity = proximity_map(
            permittivity.shape(),
            &solution.source,
            self.config.proximity,
        );

        Ok(Record {
            permittivity,
            proximity,
            fields: solution.fields,
            vacuum_fields: solution.vacuum_fields,
        })
    }

    /// Builds all records of `batch`.
    pub fn build(&self, batch: &mut Batch) -> Result<BuildReport, BuildError> {
        let schema = self.schema();
        if *batch.schema() != schema {
            return Err(StoreError::SchemaMismatch {
                name: batch.name().to_owned(),
                expected: Box::new(schema),
                found: Box::new(batch.schema().clone()),
            }
            .into());
        }

        let pending = (0..schema.records)
            .filter(|index| !(self.config.resume && batch.is_valid(*index)))
            .collect::<Vec<_>>();
        let skipped = schema.records - pending.len();

        tracing::info!(
            batch = %batch.name(),
            records = schema.records,
            pending = pending.len(),
            shape = ?self.simulation.geometry().shape(),
            polarization = %schema.polarization,
            size = %humansize::format_size(schema.memory_required(), humansize::BINARY),
            "Building batch"
        );

        let progress_interval = (pending.len() / 10).max(1);
        let batch = Mutex::new(batch);
        let written = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let first_error = Mutex::new(None::<(usize, BuildError)>);

        let fail = |index: usize, error: BuildError| {
            abort.store(true, Ordering::Relaxed);
            let mut first_error = first_error.lock();
            if first_error.as_ref().is_none_or(|(first, _)| index < *first) {
                *first_error = Some((index, error));
            }
        };

        self.threading.for_each(&pending, |index| {
            if self.cancel.load(Ordering::Relaxed) || abort.load(Ordering::Relaxed) {
                return;
            }

            match self.build_record(index) {
                Ok(record) => {
                    if let Err(error) = batch.lock().write_record(index, &record) {
                        fail(index, error.into());
                        return;
                    }
                    let written = written.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::debug!(index, "Record written");
                    if written % progress_interval == 0 {
                        tracing::info!(written, pending = pending.len(), "Progress");
                    }
                }
                Err(error) => {
                    match self.config.failure_policy {
                        FailurePolicy::Abort => {
                            fail(
                                index,
                                BuildError::Record {
                                    index,
                                    source: error,
                                },
                            )
                        }
                        FailurePolicy::Skip => {
                            tracing::warn!(index, %error, "Skipping record");
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
        });

        if let Some((_, error)) = first_error.into_inner() {
            return Err(error);
        }

        let report = BuildReport {
            written: written.into_inner(),
            skipped,
            failed: failed.into_inner(),
        };

        if report.written + report.failed < pending.len() {
            tracing::warn!(written = report.written, "Build cancelled");
            return Err(BuildError::Cancelled {
                written: report.written,
            });
        }

        tracing::info!(?report, "Batch done");
        Ok(report)
    }
}

fn record_rng(seed: u64, index: usize) -> StdRng {
    // golden ratio increment, as in splitmix64
    StdRng::seed_from_u64(seed ^ (index as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use fdfd_solver::{
        ConfigurationError,
        Lattice,
        Polarization,
        ProximityTransform,
    };
    use nalgebra::Vector2;
    use rand::RngCore;

    use crate::{
        builder::{
            BuildError,
            BuildReport,
            BuilderConfig,
            DatasetBuilder,
            FailurePolicy,
        },
        generator::PermittivityGenerator,
        store::{
            Schema,
            StoreError,
            tests::temp_store,
        },
    };

    fn small_config() -> BuilderConfig {
        BuilderConfig {
            records: 4,
            seed: 42,
            device_size: 8,
            npml: 4,
            buffer: 4,
            ..Default::default()
        }
    }

    /// Claims the right size but generates a single cell.
    struct Broken;

    impl PermittivityGenerator for Broken {
        fn size(&self) -> usize {
            8
        }

        fn generate(&self, _rng: &mut dyn RngCore) -> Lattice<f64> {
            Lattice::from_value(Vector2::new(1, 1), 1.0)
        }
    }

    #[test]
    fn it_builds_a_batch() {
        let (path, store) = temp_store("build");
        let builder = DatasetBuilder::new(small_config()).unwrap();
        let mut batch = store.require_batch("b", &builder.schema()).unwrap();

        let report = builder.build(&mut batch).unwrap();
        assert_eq!(
            report,
            BuildReport {
                written: 4,
                skipped: 0,
                failed: 0
            }
        );
        assert_eq!(batch.valid_count(), 4);

        let record = batch.read_record(2).unwrap().unwrap();
        assert_eq!(record.permittivity.shape(), Vector2::new(8, 8));
        assert_eq!(record.fields.polarization(), Polarization::Ez);
        assert_ne!(record.fields, record.vacuum_fields);

        // the source lies inside the device window, so the inverse square
        // proximity peaks at exactly 1
        let peak = record
            .proximity
            .as_slice()
            .iter()
            .copied()
            .fold(f64::MIN, f64::max);
        assert_eq!(peak, 1.0);

        std::fs::remove_dir_all(path).unwrap();
    }

    #[test]
    fn it_builds_records_deterministically() {
        let builder = DatasetBuilder::new(small_config()).unwrap();
        let a = builder.build_record(1).unwrap();
        let b = builder.build_record(1).unwrap();
        assert_eq!(a, b);

        let other = builder.build_record(2).unwrap();
        assert_ne!(a.permittivity, other.permittivity);
    }

    #[test]
    fn it_uses_the_configured_proximity_transform() {
        let config = BuilderConfig {
            proximity: ProximityTransform::Squared,
            ..small_config()
        };
        let builder = DatasetBuilder::new(config).unwrap();
        let record = builder.build_record(0).unwrap();
        let minimum = record
            .proximity
            .as_slice()
            .iter()
            .copied()
            .fold(f64::MAX, f64::min);
        assert_eq!(minimum, 0.0);
    }

    #[test]
    fn it_resumes_valid_records() {
        let (path, store) = temp_store("resume");
        let builder = DatasetBuilder::new(small_config()).unwrap();
        let mut batch = store.require_batch("b", &builder.schema()).unwrap();
        builder.build(&mut batch).unwrap();
        let before = batch.read_record(3).unwrap().unwrap();

        let builder = DatasetBuilder::new(BuilderConfig {
            resume: true,
            ..small_config()
        })
        .unwrap();
        let report = builder.build(&mut batch).unwrap();
        assert_eq!(
            report,
            BuildReport {
                written: 0,
                skipped: 4,
                failed: 0
            }
        );
        assert_eq!(batch.read_record(3).unwrap().unwrap(), before);

        std::fs::remove_dir_all(path).unwrap();
    }

    #[test]
    fn it_skips_failed_records() {
        let (path, store) = temp_store("skip");
        let builder = DatasetBuilder::new(BuilderConfig {
            failure_policy: FailurePolicy::Skip,
            ..small_config()
        })
        .unwrap()
        .with_generator(Box::new(Broken))
        .unwrap();
        let mut batch = store.require_batch("b", &builder.schema()).unwrap();

        let report = builder.build(&mut batch).unwrap();
        assert_eq!(report.failed, 4);
        assert_eq!(report.written, 0);
        assert_eq!(batch.valid_count(), 0);

        std::fs::remove_dir_all(path).unwrap();
    }

    #[test]
    fn it_aborts_on_failed_records() {
        let (path, store) = temp_store("abort");
        let builder = DatasetBuilder::new(small_config())
            .unwrap()
            .with_generator(Box::new(Broken))
            .unwrap();
        let mut batch = store.require_batch("b", &builder.schema()).unwrap();

        match builder.build(&mut batch) {
            Err(BuildError::Record {
                index,
                source: fdfd_solver::Error::Configuration(ConfigurationError::ShapeMismatch { .. }),
            }) => assert_eq!(index, 0),
            other => panic!("unexpected result: {other:?}"),
        }

        std::fs::remove_dir_all(path).unwrap();
    }

    #[test]
    fn it_stops_when_cancelled() {
        let (path, store) = temp_store("cancel");
        let builder = DatasetBuilder::new(small_config()).unwrap();
        let mut batch = store.require_batch("b", &builder.schema()).unwrap();

        builder.cancel_flag().store(true, Ordering::Relaxed);
        assert!(matches!(
            builder.build(&mut batch),
            Err(BuildError::Cancelled { written: 0 })
        ));
        assert_eq!(batch.valid_count(), 0);

        std::fs::remove_dir_all(path).unwrap();
    }

    #[test]
    fn it_rejects_mismatched_batches() {
        let (path, store) = temp_store("builder-mismatch");
        let builder = DatasetBuilder::new(small_config()).unwrap();
        let mut batch = store
            .require_batch("b", &Schema::new(4, Vector2::new(8, 8), Polarization::Hz))
            .unwrap();

        assert!(matches!(
            builder.build(&mut batch),
            Err(BuildError::Store(StoreError::SchemaMismatch { .. }))
        ));

        std::fs::remove_dir_all(path).unwrap();
    }

    #[test]
    fn it_validates_the_configuration() {
        let result = DatasetBuilder::new(BuilderConfig {
            buffer: 1,
            ..small_config()
        });
        assert!(matches!(
            result,
            Err(BuildError::Configuration(ConfigurationError::EmptySourceRegion { buffer: 1 }))
        ));

        let result = DatasetBuilder::new(small_config()).unwrap().with_generator(Box::new(
            crate::generator::UniformFill::new(16),
        ));
        assert!(result.is_err());
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn it_does_not_depend_on_threading() {
        use crate::builder::MultiThreaded;

        let (path, store) = temp_store("threading");
        let single = DatasetBuilder::new(small_config()).unwrap();
        let multi = DatasetBuilder::new(small_config())
            .unwrap()
            .with_threading(MultiThreaded::from_num_threads(3).unwrap());

        let mut a = store.require_batch("single", &single.schema()).unwrap();
        let mut b = store.require_batch("multi", &multi.schema()).unwrap();
        single.build(&mut a).unwrap();
        multi.build(&mut b).unwrap();

        for index in 0..4 {
            assert_eq!(
                a.read_record(index).unwrap().unwrap(),
                b.read_record(index).unwrap().unwrap()
            );
        }

        std::fs::remove_dir_all(path).unwrap();
    }
}
