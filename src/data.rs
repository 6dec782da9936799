//! Event records, Parquet table input, and weight-table output.
//!
//! The input is a flat row-oriented table carrying, per simulated
//! event, an event/run identifier pair and a type code plus truth-level
//! four-momentum (MeV) for each named particle role: `{role}_id`,
//! `{role}_true_pe`, `{role}_true_px`, `{role}_true_py`,
//! `{role}_true_pz`. The output is a six-column table committed exactly
//! once after the full input has been consumed.

use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::array::{
    Array, ArrayRef, Float32Array, Float64Array, Int32Array, Int64Array, UInt32Array, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use indexmap::IndexMap;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::ArrowWriter;
use std::sync::Arc;

use crate::utils::vectors::Vec4;
use crate::{FfwError, FfwResult};

/// A particle: a type code (standard particle-numbering convention)
/// plus a four-momentum in MeV.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Particle {
    /// The particle-type code
    pub pid: i32,
    /// The truth-level four-momentum
    pub p4: Vec4,
}

impl Particle {
    /// Create a particle from its type code and four-momentum.
    pub const fn new(pid: i32, p4: Vec4) -> Self {
        Self { pid, p4 }
    }
}

/// One flat truth-level record: identifiers plus every particle of the
/// decay topology, keyed by role name in registration order.
#[derive(Clone, Debug)]
pub struct EventRecord {
    /// The stored event identifier
    pub event_number: u64,
    /// The stored run identifier
    pub run_number: u32,
    particles: IndexMap<String, Particle>,
}

impl EventRecord {
    /// Create an empty record with the given identifiers.
    pub fn new(event_number: u64, run_number: u32) -> Self {
        Self {
            event_number,
            run_number,
            particles: IndexMap::new(),
        }
    }

    /// Add or replace the particle filling a role.
    pub fn insert<S: Into<String>>(&mut self, role: S, particle: Particle) {
        self.particles.insert(role.into(), particle);
    }

    /// The particle filling a role, if present.
    pub fn particle(&self, role: &str) -> Option<&Particle> {
        self.particles.get(role)
    }

    /// The four-momentum of the particle filling a role, if present.
    pub fn p4(&self, role: &str) -> Option<Vec4> {
        self.particles.get(role).map(|p| p.p4)
    }

    /// The number of roles filled.
    pub fn n_particles(&self) -> usize {
        self.particles.len()
    }
}

/// One decoded table row.
///
/// A row missing any particle field decodes to `Incomplete` so the
/// pipeline can skip it whole; a record is never partially processed.
#[derive(Clone, Debug)]
pub enum RecordRow {
    /// All required fields present
    Complete(EventRecord),
    /// At least one required field was null
    Incomplete,
}

/// The name of the type-code column for a role.
fn id_column(role: &str) -> String {
    format!("{role}_id")
}

/// The name of a four-momentum component column for a role.
fn momentum_column(role: &str, component: &str) -> String {
    format!("{role}_true_p{component}")
}

const EVENT_NUMBER: &str = "eventNumber";
const RUN_NUMBER: &str = "runNumber";
const P4_COMPONENTS: [&str; 4] = ["e", "x", "y", "z"];

fn canonicalize_input_path(file_path: &str) -> FfwResult<PathBuf> {
    Ok(Path::new(&*shellexpand::full(file_path)?).canonicalize()?)
}

fn expand_output_path(file_path: &str) -> FfwResult<PathBuf> {
    Ok(PathBuf::from(&*shellexpand::full(file_path)?))
}

/// A float column that tolerates both common storage widths.
enum FloatColumn {
    F32(Float32Array),
    F64(Float64Array),
}

impl FloatColumn {
    fn bind(name: &str, array: &ArrayRef) -> FfwResult<Self> {
        if let Some(a) = array.as_any().downcast_ref::<Float64Array>() {
            return Ok(Self::F64(a.clone()));
        }
        if let Some(a) = array.as_any().downcast_ref::<Float32Array>() {
            return Ok(Self::F32(a.clone()));
        }
        Err(FfwError::ColumnType {
            name: name.to_string(),
            datatype: array.data_type().to_string(),
        })
    }

    fn value(&self, row: usize) -> f64 {
        match self {
            Self::F32(a) => a.value(row) as f64,
            Self::F64(a) => a.value(row),
        }
    }

    fn is_null(&self, row: usize) -> bool {
        match self {
            Self::F32(a) => a.is_null(row),
            Self::F64(a) => a.is_null(row),
        }
    }
}

/// A signed integer column (particle-type codes).
enum IntColumn {
    I32(Int32Array),
    I64(Int64Array),
}

impl IntColumn {
    fn bind(name: &str, array: &ArrayRef) -> FfwResult<Self> {
        if let Some(a) = array.as_any().downcast_ref::<Int32Array>() {
            return Ok(Self::I32(a.clone()));
        }
        if let Some(a) = array.as_any().downcast_ref::<Int64Array>() {
            return Ok(Self::I64(a.clone()));
        }
        Err(FfwError::ColumnType {
            name: name.to_string(),
            datatype: array.data_type().to_string(),
        })
    }

    fn value(&self, row: usize) -> i64 {
        match self {
            Self::I32(a) => a.value(row) as i64,
            Self::I64(a) => a.value(row),
        }
    }

    fn is_null(&self, row: usize) -> bool {
        match self {
            Self::I32(a) => a.is_null(row),
            Self::I64(a) => a.is_null(row),
        }
    }
}

/// An identifier column (event and run numbers).
enum IdColumn {
    U32(UInt32Array),
    U64(UInt64Array),
    I32(Int32Array),
    I64(Int64Array),
}

impl IdColumn {
    fn bind(name: &str, array: &ArrayRef) -> FfwResult<Self> {
        if let Some(a) = array.as_any().downcast_ref::<UInt64Array>() {
            return Ok(Self::U64(a.clone()));
        }
        if let Some(a) = array.as_any().downcast_ref::<UInt32Array>() {
            return Ok(Self::U32(a.clone()));
        }
        if let Some(a) = array.as_any().downcast_ref::<Int64Array>() {
            return Ok(Self::I64(a.clone()));
        }
        if let Some(a) = array.as_any().downcast_ref::<Int32Array>() {
            return Ok(Self::I32(a.clone()));
        }
        Err(FfwError::ColumnType {
            name: name.to_string(),
            datatype: array.data_type().to_string(),
        })
    }

    fn value(&self, name: &str, row: usize) -> FfwResult<u64> {
        let raw: i128 = match self {
            Self::U32(a) => a.value(row) as i128,
            Self::U64(a) => a.value(row) as i128,
            Self::I32(a) => a.value(row) as i128,
            Self::I64(a) => a.value(row) as i128,
        };
        u64::try_from(raw).map_err(|_| {
            FfwError::Custom(format!(
                "Column \"{name}\" holds a negative identifier ({raw})"
            ))
        })
    }

    fn is_null(&self, row: usize) -> bool {
        match self {
            Self::U32(a) => a.is_null(row),
            Self::U64(a) => a.is_null(row),
            Self::I32(a) => a.is_null(row),
            Self::I64(a) => a.is_null(row),
        }
    }
}

struct ParticleColumns {
    id: IntColumn,
    pe: FloatColumn,
    px: FloatColumn,
    py: FloatColumn,
    pz: FloatColumn,
}

impl ParticleColumns {
    fn is_null(&self, row: usize) -> bool {
        self.id.is_null(row)
            || self.pe.is_null(row)
            || self.px.is_null(row)
            || self.py.is_null(row)
            || self.pz.is_null(row)
    }

    fn particle(&self, row: usize) -> Particle {
        Particle::new(
            self.id.value(row) as i32,
            Vec4::new(
                self.px.value(row),
                self.py.value(row),
                self.pz.value(row),
                self.pe.value(row),
            ),
        )
    }
}

struct BatchColumns {
    n_rows: usize,
    event_number: IdColumn,
    run_number: IdColumn,
    particles: Vec<ParticleColumns>,
}

impl BatchColumns {
    fn bind(batch: &RecordBatch, roles: &[String]) -> FfwResult<Self> {
        let column = |name: &str| -> FfwResult<&ArrayRef> {
            batch
                .column_by_name(name)
                .ok_or_else(|| FfwError::MissingColumn {
                    name: name.to_string(),
                })
        };
        let mut particles = Vec::with_capacity(roles.len());
        for role in roles {
            let id_name = id_column(role);
            let pe_name = momentum_column(role, "e");
            let px_name = momentum_column(role, "x");
            let py_name = momentum_column(role, "y");
            let pz_name = momentum_column(role, "z");
            particles.push(ParticleColumns {
                id: IntColumn::bind(&id_name, column(&id_name)?)?,
                pe: FloatColumn::bind(&pe_name, column(&pe_name)?)?,
                px: FloatColumn::bind(&px_name, column(&px_name)?)?,
                py: FloatColumn::bind(&py_name, column(&py_name)?)?,
                pz: FloatColumn::bind(&pz_name, column(&pz_name)?)?,
            });
        }
        Ok(Self {
            n_rows: batch.num_rows(),
            event_number: IdColumn::bind(EVENT_NUMBER, column(EVENT_NUMBER)?)?,
            run_number: IdColumn::bind(RUN_NUMBER, column(RUN_NUMBER)?)?,
            particles,
        })
    }

    fn decode(&self, row: usize, roles: &[String]) -> FfwResult<RecordRow> {
        if self.event_number.is_null(row) || self.run_number.is_null(row) {
            return Ok(RecordRow::Incomplete);
        }
        if self.particles.iter().any(|p| p.is_null(row)) {
            return Ok(RecordRow::Incomplete);
        }
        let mut record = EventRecord::new(
            self.event_number.value(EVENT_NUMBER, row)?,
            self.run_number.value(RUN_NUMBER, row)? as u32,
        );
        for (role, columns) in roles.iter().zip(&self.particles) {
            record.insert(role.clone(), columns.particle(row));
        }
        Ok(RecordRow::Complete(record))
    }
}

/// A lazy, forward-only stream of [`RecordRow`]s from a Parquet table.
///
/// The schema is validated when the table is opened: a missing required
/// column is a fatal [`FfwError::MissingColumn`]. Rows are decoded one
/// batch at a time in storage order; the reader cannot be restarted.
pub struct RecordReader {
    reader: ParquetRecordBatchReader,
    roles: Vec<String>,
    batch: Option<BatchColumns>,
    row: usize,
}

impl RecordReader {
    /// Open a table and verify that every required column exists.
    pub fn open<S: AsRef<str>>(file_path: &str, roles: &[S]) -> FfwResult<Self> {
        let roles: Vec<String> = roles.iter().map(|r| r.as_ref().to_string()).collect();
        let path = canonicalize_input_path(file_path)?;
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let schema = builder.schema().clone();
        let mut required = vec![EVENT_NUMBER.to_string(), RUN_NUMBER.to_string()];
        for role in &roles {
            required.push(id_column(role));
            for component in P4_COMPONENTS {
                required.push(momentum_column(role, component));
            }
        }
        for name in required {
            if schema.index_of(&name).is_err() {
                return Err(FfwError::MissingColumn { name });
            }
        }
        let reader = builder.build()?;
        Ok(Self {
            reader,
            roles,
            batch: None,
            row: 0,
        })
    }

    /// The role names this reader decodes, in registration order.
    pub fn roles(&self) -> &[String] {
        &self.roles
    }
}

impl Iterator for RecordReader {
    type Item = FfwResult<RecordRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(batch) = self.batch.as_ref() {
                if self.row < batch.n_rows {
                    let row = self.row;
                    self.row += 1;
                    return Some(batch.decode(row, &self.roles));
                }
            }
            match self.reader.next()? {
                Ok(batch) => match BatchColumns::bind(&batch, &self.roles) {
                    Ok(columns) => {
                        self.batch = Some(columns);
                        self.row = 0;
                    }
                    Err(err) => return Some(Err(err)),
                },
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}

/// One output row: identifiers, the form-factor weight, and the derived
/// observables.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WeightRow {
    /// The event identifier, copied from the input record
    pub event_number: u64,
    /// The run identifier, copied from the input record
    pub run_number: u32,
    /// The form-factor weight for the target scheme
    pub w_ff: f64,
    /// Momentum-transfer squared in GeV²
    pub q2_true: f64,
    /// Invisible-system mass squared in GeV²
    pub mm2_true: f64,
    /// Charged-lepton rest-frame energy in GeV
    pub el_true: f64,
}

/// The accumulated output table.
///
/// Rows are kept in input order and committed to persistent storage
/// exactly once, after the full input has been consumed. The output
/// file is created fresh, never appended to.
#[derive(Clone, Debug, Default)]
pub struct WeightTable {
    rows: Vec<WeightRow>,
}

impl WeightTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one row.
    pub fn push(&mut self, row: WeightRow) {
        self.rows.push(row);
    }

    /// The accumulated rows, in input order.
    pub fn rows(&self) -> &[WeightRow] {
        &self.rows
    }

    /// The number of accumulated rows.
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Create the output file and commit the table in a single write.
    pub fn write_parquet(&self, file_path: &str) -> FfwResult<()> {
        WeightSink::create(file_path)?.commit(self)
    }
}

/// A pre-opened output target.
///
/// Creating the sink claims the output path immediately, so an
/// unwritable destination fails before a single input row has been
/// consumed. The accumulated table is committed through the
/// already-open handle afterwards, consuming the sink.
pub struct WeightSink {
    file: File,
}

impl WeightSink {
    /// Create the output file, truncating any previous content.
    pub fn create(file_path: &str) -> FfwResult<Self> {
        let path = expand_output_path(file_path)?;
        Ok(Self {
            file: File::create(&path)?,
        })
    }

    /// Commit a table through this sink in a single write.
    pub fn commit(self, table: &WeightTable) -> FfwResult<()> {
        let schema = Arc::new(Schema::new(vec![
            Field::new(EVENT_NUMBER, DataType::UInt64, false),
            Field::new(RUN_NUMBER, DataType::UInt32, false),
            Field::new("w_ff", DataType::Float64, false),
            Field::new("q2_true", DataType::Float64, false),
            Field::new("mm2_true", DataType::Float64, false),
            Field::new("el_true", DataType::Float64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(UInt64Array::from_iter_values(
                    table.rows.iter().map(|r| r.event_number),
                )),
                Arc::new(UInt32Array::from_iter_values(
                    table.rows.iter().map(|r| r.run_number),
                )),
                Arc::new(Float64Array::from_iter_values(
                    table.rows.iter().map(|r| r.w_ff),
                )),
                Arc::new(Float64Array::from_iter_values(
                    table.rows.iter().map(|r| r.q2_true),
                )),
                Arc::new(Float64Array::from_iter_values(
                    table.rows.iter().map(|r| r.mm2_true),
                )),
                Arc::new(Float64Array::from_iter_values(
                    table.rows.iter().map(|r| r.el_true),
                )),
            ],
        )?;
        let mut writer = ArrowWriter::try_new(self.file, schema, None)?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;

    use super::*;
    use crate::topology::TopologySpec;

    fn make_temp_dir() -> PathBuf {
        let dir = env::temp_dir().join(format!("ffweight_test_{}", fastrand::u64(..)));
        fs::create_dir(&dir).expect("temp dir should be created");
        dir
    }

    /// Write a minimal two-role input table. Row values are spread so
    /// each (row, role, component) is distinguishable; `null_row`
    /// blanks one momentum component in that row.
    fn write_input(path: &Path, roles: &[&str], n_rows: usize, null_row: Option<usize>) {
        let mut fields = vec![
            Field::new(EVENT_NUMBER, DataType::UInt64, false),
            Field::new(RUN_NUMBER, DataType::UInt32, false),
        ];
        for role in roles {
            fields.push(Field::new(id_column(role), DataType::Int32, true));
            for component in P4_COMPONENTS {
                fields.push(Field::new(
                    momentum_column(role, component),
                    DataType::Float64,
                    true,
                ));
            }
        }
        let schema = Arc::new(Schema::new(fields));
        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(UInt64Array::from_iter_values((0..n_rows).map(|i| i as u64))),
            Arc::new(UInt32Array::from_iter_values((0..n_rows).map(|_| 1_u32))),
        ];
        for (role_index, _) in roles.iter().enumerate() {
            columns.push(Arc::new(Int32Array::from_iter_values(
                (0..n_rows).map(|i| (100 * (role_index + 1) + i) as i32),
            )));
            for (component_index, _) in P4_COMPONENTS.iter().enumerate() {
                let values: Vec<Option<f64>> = (0..n_rows)
                    .map(|i| {
                        if component_index == 1 && Some(i) == null_row {
                            None
                        } else {
                            Some((i * 10 + role_index + component_index) as f64)
                        }
                    })
                    .collect();
                columns.push(Arc::new(Float64Array::from(values)));
            }
        }
        let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();
        let file = File::create(path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_reader_preserves_order_and_values() {
        let dir = make_temp_dir();
        let path = dir.join("input.parquet");
        write_input(&path, &["b", "mu"], 3, None);
        let reader = RecordReader::open(path.to_str().unwrap(), &["b", "mu"]).unwrap();
        let rows: Vec<RecordRow> = reader.map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        for (i, row) in rows.iter().enumerate() {
            match row {
                RecordRow::Complete(record) => {
                    assert_eq!(record.event_number, i as u64);
                    assert_eq!(record.run_number, 1);
                    assert_eq!(record.n_particles(), 2);
                    let b = record.particle("b").unwrap();
                    assert_eq!(b.pid, (100 + i) as i32);
                    assert_eq!(b.p4.e, (i * 10) as f64);
                }
                RecordRow::Incomplete => panic!("row {i} should be complete"),
            }
        }
    }

    #[test]
    fn test_reader_skips_null_rows_whole() {
        let dir = make_temp_dir();
        let path = dir.join("input.parquet");
        write_input(&path, &["b", "mu"], 3, Some(1));
        let reader = RecordReader::open(path.to_str().unwrap(), &["b", "mu"]).unwrap();
        let rows: Vec<RecordRow> = reader.map(|r| r.unwrap()).collect();
        assert!(matches!(rows[0], RecordRow::Complete(_)));
        assert!(matches!(rows[1], RecordRow::Incomplete));
        assert!(matches!(rows[2], RecordRow::Complete(_)));
    }

    #[test]
    fn test_missing_column_is_fatal_at_open() {
        let dir = make_temp_dir();
        let path = dir.join("input.parquet");
        write_input(&path, &["b"], 2, None);
        let result = RecordReader::open(path.to_str().unwrap(), &["b", "mu"]);
        match result {
            Err(FfwError::MissingColumn { name }) => assert_eq!(name, "mu_id"),
            Err(other) => panic!("expected MissingColumn, got {other:?}"),
            Ok(_) => panic!("expected MissingColumn, but the table opened"),
        }
    }

    #[test]
    fn test_semitauonic_roles_have_expected_columns() {
        let spec = TopologySpec::semitauonic();
        let roles = spec.roles();
        assert_eq!(roles.len(), 11);
        assert_eq!(id_column(roles[0]), "b_id");
        assert_eq!(momentum_column(roles[0], "e"), "b_true_pe");
    }

    #[test]
    fn test_weight_table_roundtrip() {
        let dir = make_temp_dir();
        let path = dir.join("output.parquet");
        let mut table = WeightTable::new();
        table.push(WeightRow {
            event_number: 7,
            run_number: 2,
            w_ff: 1.25,
            q2_true: 8.0,
            mm2_true: 0.5,
            el_true: 1.5,
        });
        table.write_parquet(path.to_str().unwrap()).unwrap();

        let file = File::open(&path).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let batches: Vec<RecordBatch> = reader.map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 1);
        let events = batch
            .column_by_name(EVENT_NUMBER)
            .unwrap()
            .as_any()
            .downcast_ref::<UInt64Array>()
            .unwrap();
        assert_eq!(events.value(0), 7);
        let weights = batch
            .column_by_name("w_ff")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(weights.value(0), 1.25);
    }

    #[test]
    fn test_negative_identifier_is_rejected() {
        let dir = make_temp_dir();
        let path = dir.join("input.parquet");
        // Signed identifier storage with a negative entry.
        let mut fields = vec![
            Field::new(EVENT_NUMBER, DataType::Int64, false),
            Field::new(RUN_NUMBER, DataType::UInt32, false),
        ];
        fields.push(Field::new(id_column("b"), DataType::Int32, true));
        for component in P4_COMPONENTS {
            fields.push(Field::new(
                momentum_column("b", component),
                DataType::Float64,
                true,
            ));
        }
        let schema = Arc::new(Schema::new(fields));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(vec![-1_i64])),
            Arc::new(UInt32Array::from_iter_values([1_u32])),
            Arc::new(Int32Array::from(vec![Some(511)])),
            Arc::new(Float64Array::from(vec![Some(5279.0)])),
            Arc::new(Float64Array::from(vec![Some(0.0)])),
            Arc::new(Float64Array::from(vec![Some(0.0)])),
            Arc::new(Float64Array::from(vec![Some(0.0)])),
        ];
        let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();
        let file = File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let mut reader = RecordReader::open(path.to_str().unwrap(), &["b"]).unwrap();
        let first = reader.next().unwrap_or_else(|| panic!("one row expected"));
        assert!(matches!(first, Err(FfwError::Custom(_))));
    }

    #[test]
    fn test_sink_claims_output_path_up_front() {
        let dir = make_temp_dir();
        let unwritable = dir.join("no_such_dir").join("output.parquet");
        assert!(matches!(
            WeightSink::create(unwritable.to_str().unwrap()),
            Err(FfwError::IOError(_))
        ));

        let path = dir.join("output.parquet");
        let sink = WeightSink::create(path.to_str().unwrap()).unwrap();
        assert!(path.exists());
        sink.commit(&WeightTable::new()).unwrap();
    }
}
