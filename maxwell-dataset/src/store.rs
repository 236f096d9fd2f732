//! On-disk dataset batches.
//!
//! A store is a directory with one sub-directory per batch. A batch holds a
//! `schema.json`, one pre-sized binary file per column and a `valid.bin`
//! with one flag byte per record. Column files are flat little-endian `f64`
//! arrays (complex values as `[re, im]` pairs), `records` slots of
//! `shape.x * shape.y` values each, in the lattice flattening order.
//!
//! A record only counts as present once its flag is set, and the flag is
//! only set after all of its columns have been synced to disk. Readers never
//! see partially written records.

use std::{
    fs::{
        File,
        OpenOptions,
    },
    io::{
        Read,
        Seek,
        SeekFrom,
        Write,
    },
    path::{
        Path,
        PathBuf,
    },
};

use fdfd_solver::{
    Complex64,
    FieldComponent,
    Fields,
    Lattice,
    Polarization,
};
use nalgebra::Vector2;
use serde::{
    Deserialize,
    Serialize,
};

pub const SCHEMA_FILE: &str = "schema.json";
pub const VALID_FILE: &str = "valid.bin";

pub const PERMITTIVITY_COLUMN: &str = "epsilons";
pub const PROXIMITY_COLUMN: &str = "proximities";
pub const VACUUM_SUFFIX: &str = "_vac";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Invalid schema file")]
    Json(#[from] serde_json::Error),

    #[error("Invalid batch name: {name:?}")]
    InvalidBatchName { name: String },

    #[error("No such batch: {name}")]
    NoSuchBatch { name: String },

    #[error("Batch {name} already exists with a different schema")]
    SchemaMismatch {
        name: String,
        expected: Box<Schema>,
        found: Box<Schema>,
    },

    #[error("Corrupt column {column}: {reason}")]
    CorruptColumn { column: String, reason: String },

    #[error("Record index {index} out of range (batch has {records} records)")]
    IndexOutOfRange { index: usize, records: usize },

    #[error("Record shape mismatch: expected {expected:?}, got {got:?}")]
    RecordShapeMismatch {
        expected: Vector2<usize>,
        got: Vector2<usize>,
    },

    #[error("Record polarization mismatch: expected {expected}, got {got}")]
    PolarizationMismatch {
        expected: Polarization,
        got: Polarization,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Float64,
    Complex128,
}

impl DataType {
    /// Number of `f64` words per element.
    pub fn words(&self) -> usize {
        match self {
            DataType::Float64 => 1,
            DataType::Complex128 => 2,
        }
    }

    pub fn element_size(&self) -> usize {
        self.words() * size_of::<f64>()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    fn file_name(&self) -> String {
        format!("{}.bin", self.name)
    }
}

/// Layout of a batch. Two batches with equal schemas are interchangeable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub records: usize,
    pub shape: [usize; 2],
    pub polarization: Polarization,
    pub columns: Vec<Column>,
}

impl Schema {
    /// The record layout written by the dataset builder.
    ///
    /// Columns are the permittivity, the proximity map, the three field
    /// components and the three vacuum field components.
    pub fn new(records: usize, shape: Vector2<usize>, polarization: Polarization) -> Self {
        let components = FieldComponent::for_polarization(polarization);

        let mut columns = vec![
            Column::new(PERMITTIVITY_COLUMN, DataType::Float64),
            Column::new(PROXIMITY_COLUMN, DataType::Float64),
        ];
        columns.extend(
            components
                .iter()
                .map(|component| Column::new(component.to_string(), DataType::Complex128)),
        );
        columns.extend(components.iter().map(|component| {
            Column::new(format!("{component}{VACUUM_SUFFIX}"), DataType::Complex128)
        }));

        Self {
            records,
            shape: shape.into(),
            polarization,
            columns,
        }
    }

    pub fn shape(&self) -> Vector2<usize> {
        Vector2::from(self.shape)
    }

    /// Number of cells per record.
    pub fn cells(&self) -> usize {
        self.shape.iter().product()
    }

    /// Bytes one record occupies in `column`.
    fn slot_size(&self, column: &Column) -> usize {
        self.cells() * column.data_type.element_size()
    }

    /// Bytes per record, summed over all columns.
    pub fn record_size(&self) -> usize {
        self.columns
            .iter()
            .map(|column| self.slot_size(column))
            .sum::<usize>()
            + 1
    }

    /// Total size of the batch on disk.
    pub fn memory_required(&self) -> usize {
        self.records * self.record_size()
    }
}

/// One dataset record.
///
/// All lattices have the device-window shape.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub permittivity: Lattice<f64>,
    pub proximity: Lattice<f64>,
    pub fields: Fields,
    pub vacuum_fields: Fields,
}

impl Record {
    fn check(&self, schema: &Schema) -> Result<(), StoreError> {
        let expected = schema.shape();
        for got in [
            self.permittivity.shape(),
            self.proximity.shape(),
            self.fields.shape(),
            self.vacuum_fields.shape(),
        ] {
            if got != expected {
                return Err(StoreError::RecordShapeMismatch { expected, got });
            }
        }

        for got in [self.fields.polarization(), self.vacuum_fields.polarization()] {
            if got != schema.polarization {
                return Err(StoreError::PolarizationMismatch {
                    expected: schema.polarization,
                    got,
                });
            }
        }

        Ok(())
    }

    /// Encoded column data, in schema order.
    fn encode(&self) -> Vec<Vec<u64>> {
        let mut words = vec![
            encode_real(self.permittivity.as_slice()),
            encode_real(self.proximity.as_slice()),
        ];
        for fields in [&self.fields, &self.vacuum_fields] {
            words.extend(
                fields
                    .components()
                    .iter()
                    .map(|(_, lattice)| encode_complex(lattice.as_slice())),
            );
        }
        words
    }
}

fn encode_real(values: &[f64]) -> Vec<u64> {
    values.iter().map(|value| value.to_bits().to_le()).collect()
}

fn encode_complex(values: &[Complex64]) -> Vec<u64> {
    values
        .iter()
        .flat_map(|value| [value.re.to_bits().to_le(), value.im.to_bits().to_le()])
        .collect()
}

fn decode(words: Vec<u64>) -> Vec<f64> {
    words
        .into_iter()
        .map(|word| f64::from_bits(u64::from_le(word)))
        .collect()
}

/// A directory of batches.
#[derive(Clone, Debug)]
pub struct DatasetStore {
    root: PathBuf,
}

impl DatasetStore {
    /// Opens the store at `root`, creating the directory if necessary.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of all batches, sorted.
    pub fn batches(&self) -> Result<Vec<String>, StoreError> {
        let mut names = vec![];
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path().join(SCHEMA_FILE).is_file()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn batch_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        if valid {
            Ok(self.root.join(name))
        }
        else {
            Err(StoreError::InvalidBatchName {
                name: name.to_owned(),
            })
        }
    }

    /// Opens batch `name`, creating it with `schema` if it doesn't exist.
    ///
    /// Existing data is never truncated. If the batch exists with a
    /// different schema this fails with [`StoreError::SchemaMismatch`].
    pub fn require_batch(&self, name: &str, schema: &Schema) -> Result<Batch, StoreError> {
        let path = self.batch_path(name)?;

        if path.join(SCHEMA_FILE).is_file() {
            let batch = Batch::open(name, path)?;
            if batch.schema != *schema {
                return Err(StoreError::SchemaMismatch {
                    name: name.to_owned(),
                    expected: Box::new(schema.clone()),
                    found: Box::new(batch.schema),
                });
            }
            return Ok(batch);
        }

        tracing::info!(
            path = %path.display(),
            records = schema.records,
            size = %humansize::format_size(schema.memory_required(), humansize::BINARY),
            "Creating batch"
        );

        std::fs::create_dir_all(&path)?;
        for column in &schema.columns {
            create_sized(&path.join(column.file_name()), schema.records * schema.slot_size(column))?;
        }
        create_sized(&path.join(VALID_FILE), schema.records)?;

        // the schema goes last, so an interrupted creation isn't picked up as a batch
        let file = File::create(path.join(SCHEMA_FILE))?;
        serde_json::to_writer_pretty(&file, schema)?;
        file.sync_all()?;

        Batch::open(name, path)
    }

    /// Opens an existing batch.
    pub fn open_batch(&self, name: &str) -> Result<Batch, StoreError> {
        let path = self.batch_path(name)?;
        if !path.join(SCHEMA_FILE).is_file() {
            return Err(StoreError::NoSuchBatch {
                name: name.to_owned(),
            });
        }
        Batch::open(name, path)
    }
}

fn create_sized(path: &Path, size: usize) -> Result<(), StoreError> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.set_len(size as u64)?;
    Ok(())
}

/// An open batch.
///
/// Valid flags are cached in memory; all other data is read from disk on
/// demand.
#[derive(derive_more::Debug)]
pub struct Batch {
    name: String,
    path: PathBuf,
    schema: Schema,
    #[debug(skip)]
    columns: Vec<File>,
    #[debug(skip)]
    valid_file: File,
    #[debug(skip)]
    valid: Vec<bool>,
}

impl Batch {
    fn open(name: &str, path: PathBuf) -> Result<Self, StoreError> {
        let schema: Schema = serde_json::from_reader(File::open(path.join(SCHEMA_FILE))?)?;

        let open = |file_name: &str, column: &str, expected: usize| -> Result<File, StoreError> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path.join(file_name))
                .map_err(|error| {
                    StoreError::CorruptColumn {
                        column: column.to_owned(),
                        reason: error.to_string(),
                    }
                })?;
            let size = file.metadata()?.len();
            if size != expected as u64 {
                return Err(StoreError::CorruptColumn {
                    column: column.to_owned(),
                    reason: format!("expected {expected} bytes, found {size}"),
                });
            }
            Ok(file)
        };

        let columns = schema
            .columns
            .iter()
            .map(|column| {
                open(
                    &column.file_name(),
                    &column.name,
                    schema.records * schema.slot_size(column),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut valid_file = open(VALID_FILE, "valid", schema.records)?;
        let mut flags = Vec::with_capacity(schema.records);
        valid_file.read_to_end(&mut flags)?;
        let valid = flags.into_iter().map(|flag| flag == 1).collect();

        Ok(Self {
            name: name.to_owned(),
            path,
            schema,
            columns,
            valid_file,
            valid,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of record slots.
    pub fn len(&self) -> usize {
        self.schema.records
    }

    pub fn is_empty(&self) -> bool {
        self.schema.records == 0
    }

    pub fn is_valid(&self, index: usize) -> bool {
        self.valid.get(index).copied().unwrap_or_default()
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|valid| **valid).count()
    }

    fn check_index(&self, index: usize) -> Result<(), StoreError> {
        if index < self.schema.records {
            Ok(())
        }
        else {
            Err(StoreError::IndexOutOfRange {
                index,
                records: self.schema.records,
            })
        }
    }

    fn set_valid(&mut self, index: usize, valid: bool) -> Result<(), StoreError> {
        self.valid_file.seek(SeekFrom::Start(index as u64))?;
        self.valid_file.write_all(&[valid as u8])?;
        self.valid_file.sync_data()?;
        self.valid[index] = valid;
        Ok(())
    }

    /// Writes `record` into slot `index`, replacing whatever was there.
    pub fn write_record(&mut self, index: usize, record: &Record) -> Result<(), StoreError> {
        self.check_index(index)?;
        record.check(&self.schema)?;

        let data = record.encode();

        self.set_valid(index, false)?;

        for ((file, column), words) in self.columns.iter_mut().zip(&self.schema.columns).zip(&data) {
            let slot_size = self.schema.slot_size(column);
            file.seek(SeekFrom::Start((index * slot_size) as u64))?;
            file.write_all(bytemuck::cast_slice(words))?;
        }
        for file in &self.columns {
            file.sync_data()?;
        }

        self.set_valid(index, true)?;

        tracing::trace!(batch = %self.name, index, "Wrote record");
        Ok(())
    }

    /// Reads the record in slot `index`. Returns `None` if the slot was never
    /// completely written.
    pub fn read_record(&mut self, index: usize) -> Result<Option<Record>, StoreError> {
        self.check_index(index)?;
        if !self.valid[index] {
            return Ok(None);
        }

        let shape = self.schema.shape();
        let mut real = vec![];
        let mut complex = vec![];

        for (file, column) in self.columns.iter_mut().zip(&self.schema.columns) {
            let slot_size = self.schema.slot_size(column);
            let mut words = vec![0u64; self.schema.cells() * column.data_type.words()];
            file.seek(SeekFrom::Start((index * slot_size) as u64))?;
            file.read_exact(bytemuck::cast_slice_mut(&mut words))?;

            let values = decode(words);
            let corrupt = |error: fdfd_solver::ConfigurationError| {
                StoreError::CorruptColumn {
                    column: column.name.clone(),
                    reason: error.to_string(),
                }
            };

            match column.data_type {
                DataType::Float64 => real.push(Lattice::from_vec(shape, values).map_err(corrupt)?),
                DataType::Complex128 => {
                    let values = values
                        .chunks_exact(2)
                        .map(|pair| Complex64::new(pair[0], pair[1]))
                        .collect();
                    complex.push(Lattice::from_vec(shape, values).map_err(corrupt)?);
                }
            }
        }

        let corrupt = || {
            StoreError::CorruptColumn {
                column: "schema".to_owned(),
                reason: "unexpected column layout".to_owned(),
            }
        };
        let [permittivity, proximity]: [Lattice<f64>; 2] =
            real.try_into().map_err(|_| corrupt())?;
        let [a, b, c, d, e, f]: [Lattice<Complex64>; 6] =
            complex.try_into().map_err(|_| corrupt())?;

        Ok(Some(Record {
            permittivity,
            proximity,
            fields: Fields::from_components(self.schema.polarization, [a, b, c]),
            vacuum_fields: Fields::from_components(self.schema.polarization, [d, e, f]),
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        io::{
            Read,
            Seek,
            SeekFrom,
            Write,
        },
        path::PathBuf,
    };

    use fdfd_solver::{
        Complex64,
        Fields,
        Lattice,
        Polarization,
    };
    use nalgebra::Vector2;

    use crate::store::{
        DatasetStore,
        Record,
        Schema,
        StoreError,
        VALID_FILE,
    };

    /// A fresh store in a unique temporary directory.
    pub(crate) fn temp_store(name: &str) -> (PathBuf, DatasetStore) {
        let path = std::env::temp_dir().join(format!(
            "maxwell-dataset-{}-{name}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&path);
        let store = DatasetStore::open(&path).unwrap();
        (path, store)
    }

    fn test_record(shape: Vector2<usize>, seed: f64) -> Record {
        let complex = |offset: f64| {
            Lattice::from_fn(shape, |point| {
                Complex64::new(point.x as f64 + offset + seed, -(point.y as f64) * seed)
            })
        };
        Record {
            permittivity: Lattice::from_fn(shape, |point| 1.0 + point.x as f64 * 0.5 + seed),
            proximity: Lattice::from_fn(shape, |point| 1.0 / (1.0 + point.y as f64)),
            fields: Fields::from_components(Polarization::Ez, [complex(0.0), complex(1.0), complex(2.0)]),
            vacuum_fields: Fields::from_components(
                Polarization::Ez,
                [complex(3.0), complex(4.0), complex(5.0)],
            ),
        }
    }

    #[test]
    fn it_names_columns_after_field_components() {
        let schema = Schema::new(1, Vector2::new(2, 2), Polarization::Hz);
        let names = schema
            .columns
            .iter()
            .map(|column| column.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            ["epsilons", "proximities", "Ex", "Ey", "Hz", "Ex_vac", "Ey_vac", "Hz_vac"]
        );
        // 2 real + 6 complex columns, 4 cells, plus the flag
        assert_eq!(schema.record_size(), 4 * (2 * 8 + 6 * 16) + 1);
    }

    #[test]
    fn it_round_trips_records() {
        let (path, store) = temp_store("round-trip");
        let shape = Vector2::new(4, 3);
        let schema = Schema::new(3, shape, Polarization::Ez);

        let mut batch = store.require_batch("train", &schema).unwrap();
        assert_eq!(batch.valid_count(), 0);

        let record = test_record(shape, 0.25);
        batch.write_record(1, &record).unwrap();

        assert!(batch.read_record(0).unwrap().is_none());
        assert_eq!(batch.read_record(1).unwrap().unwrap(), record);

        let mut reopened = store.open_batch("train").unwrap();
        assert_eq!(reopened.valid_count(), 1);
        assert_eq!(reopened.read_record(1).unwrap().unwrap(), record);
        assert_eq!(store.batches().unwrap(), ["train"]);

        std::fs::remove_dir_all(path).unwrap();
    }

    #[test]
    fn it_writes_little_endian_columns() {
        let (path, store) = temp_store("little-endian");
        let shape = Vector2::new(2, 2);
        let mut batch = store
            .require_batch("b", &Schema::new(2, shape, Polarization::Ez))
            .unwrap();

        let record = test_record(shape, 0.5);
        batch.write_record(1, &record).unwrap();

        let bytes = std::fs::read(path.join("b").join("epsilons.bin")).unwrap();
        assert_eq!(bytes.len(), 2 * 4 * 8);
        let first = f64::from_le_bytes(bytes[32..40].try_into().unwrap());
        assert_eq!(first, record.permittivity.as_slice()[0]);

        let bytes = std::fs::read(path.join("b").join("Ez.bin")).unwrap();
        let re = f64::from_le_bytes(bytes[64..72].try_into().unwrap());
        let im = f64::from_le_bytes(bytes[72..80].try_into().unwrap());
        let ez = record.fields.principal().as_slice()[0];
        assert_eq!((re, im), (ez.re, ez.im));

        std::fs::remove_dir_all(path).unwrap();
    }

    #[test]
    fn it_requires_batches_idempotently() {
        let (path, store) = temp_store("idempotent");
        let shape = Vector2::new(3, 3);
        let schema = Schema::new(2, shape, Polarization::Ez);

        let mut batch = store.require_batch("b", &schema).unwrap();
        batch.write_record(0, &test_record(shape, 1.0)).unwrap();
        drop(batch);

        let mut batch = store.require_batch("b", &schema).unwrap();
        assert_eq!(batch.valid_count(), 1);
        assert_eq!(batch.read_record(0).unwrap().unwrap(), test_record(shape, 1.0));

        std::fs::remove_dir_all(path).unwrap();
    }

    #[test]
    fn it_rejects_a_different_schema() {
        let (path, store) = temp_store("mismatch");
        store
            .require_batch("b", &Schema::new(2, Vector2::new(3, 3), Polarization::Ez))
            .unwrap();

        let result = store.require_batch("b", &Schema::new(4, Vector2::new(3, 3), Polarization::Ez));
        assert!(matches!(result, Err(StoreError::SchemaMismatch { .. })));

        let result = store.require_batch("b", &Schema::new(2, Vector2::new(3, 3), Polarization::Hz));
        assert!(matches!(result, Err(StoreError::SchemaMismatch { .. })));

        std::fs::remove_dir_all(path).unwrap();
    }

    #[test]
    fn it_hides_records_without_valid_flag() {
        let (path, store) = temp_store("half-written");
        let shape = Vector2::new(2, 3);
        let mut batch = store
            .require_batch("b", &Schema::new(2, shape, Polarization::Ez))
            .unwrap();
        batch.write_record(0, &test_record(shape, 2.0)).unwrap();
        batch.write_record(1, &test_record(shape, 3.0)).unwrap();
        drop(batch);

        // as if the process died between writing the columns and the flag
        let mut valid = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.join("b").join(VALID_FILE))
            .unwrap();
        valid.seek(SeekFrom::Start(1)).unwrap();
        valid.write_all(&[0]).unwrap();
        let mut flags = vec![];
        valid.seek(SeekFrom::Start(0)).unwrap();
        valid.read_to_end(&mut flags).unwrap();
        assert_eq!(flags, [1, 0]);

        let mut batch = store.open_batch("b").unwrap();
        assert!(batch.is_valid(0));
        assert!(!batch.is_valid(1));
        assert!(batch.read_record(1).unwrap().is_none());

        std::fs::remove_dir_all(path).unwrap();
    }

    #[test]
    fn it_detects_truncated_columns() {
        let (path, store) = temp_store("truncated");
        store
            .require_batch("b", &Schema::new(2, Vector2::new(2, 2), Polarization::Ez))
            .unwrap();

        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(path.join("b").join("Hy.bin"))
            .unwrap();
        file.set_len(10).unwrap();

        match store.open_batch("b") {
            Err(StoreError::CorruptColumn { column, .. }) => assert_eq!(column, "Hy"),
            other => panic!("unexpected result: {other:?}"),
        }

        std::fs::remove_dir_all(path).unwrap();
    }

    #[test]
    fn it_validates_records() {
        let (path, store) = temp_store("validate");
        let shape = Vector2::new(2, 2);
        let mut batch = store
            .require_batch("b", &Schema::new(1, shape, Polarization::Hz))
            .unwrap();

        assert!(matches!(
            batch.write_record(1, &test_record(shape, 0.0)),
            Err(StoreError::IndexOutOfRange { index: 1, records: 1 })
        ));
        assert!(matches!(
            batch.write_record(0, &test_record(Vector2::new(2, 3), 0.0)),
            Err(StoreError::RecordShapeMismatch { .. })
        ));
        assert!(matches!(
            batch.write_record(0, &test_record(shape, 0.0)),
            Err(StoreError::PolarizationMismatch { .. })
        ));
        assert_eq!(batch.valid_count(), 0);

        std::fs::remove_dir_all(path).unwrap();
    }

    #[test]
    fn it_rejects_bad_batch_names() {
        let (path, store) = temp_store("names");
        assert!(matches!(
            store.open_batch("../x"),
            Err(StoreError::InvalidBatchName { .. })
        ));
        assert!(matches!(
            store.open_batch("missing"),
            Err(StoreError::NoSuchBatch { .. })
        ));
        std::fs::remove_dir_all(path).unwrap();
    }
}
