//! # ffweight
//!
//! Per-event form-factor reweighting for simulated semitauonic decay
//! samples. Truth-level kinematic records are streamed from a
//! row-oriented table, the fixed decay topology is rebuilt per event,
//! and an external amplitude evaluator supplies the ratio of
//! amplitude-squared probabilities between a target and an input
//! form-factor scheme. Derived observables (momentum-transfer squared,
//! missing-mass squared, lepton rest-frame energy) and the weight are
//! committed as a new table once the full input has been consumed.
#![warn(clippy::perf, clippy::style)]

use thiserror::Error;

/// Decay-graph description and per-event decay-tree construction.
pub mod topology;
/// Event records, table input, and weight-table output.
pub mod data;
/// External amplitude-evaluator interfaces and the shipped template
/// implementation.
pub mod evaluator;
/// Derived kinematic observables.
pub mod kinematics;
/// The per-event reweighting pipeline.
pub mod reweight;
/// Vector types and small helpers.
pub mod utils;

pub use crate::data::{
    EventRecord, Particle, RecordReader, RecordRow, WeightRow, WeightSink, WeightTable,
};
pub use crate::evaluator::{
    ChannelSignature, EvaluatorConfig, EventContext, Evaluator, ProcessId, SchemeDef,
    TemplateEvaluator, Units,
};
pub use crate::reweight::{ReweightConfig, Reweighter, RoleBindings, RunSummary};
pub use crate::topology::{DecayTree, TopologySpec, VertexSpec};
pub use crate::utils::vectors::{Vec3, Vec4};

/// A shorthand for a `Result` using the [`FfwError`] type.
pub type FfwResult<T> = Result<T, FfwError>;

/// The error type used by all fallible methods in this crate.
#[derive(Error, Debug)]
pub enum FfwError {
    /// An alias for [`std::io::Error`].
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    /// An alias for [`parquet::errors::ParquetError`].
    #[error("Parquet Error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),
    /// An alias for [`arrow::error::ArrowError`].
    #[error("Arrow Error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),
    /// An alias for [`shellexpand::LookupError`].
    #[error("Failed to expand path: {0}")]
    LookupError(#[from] shellexpand::LookupError<std::env::VarError>),
    /// A required column is absent from the input table schema. Fatal:
    /// detected when the table is opened, before any event is read.
    #[error("Input table is missing required column \"{name}\"")]
    MissingColumn {
        /// Name of the absent column
        name: String,
    },
    /// A required column exists but holds an unsupported Arrow type.
    #[error("Column \"{name}\" has unsupported type {datatype}")]
    ColumnType {
        /// Name of the offending column
        name: String,
        /// The stored Arrow datatype
        datatype: String,
    },
    /// A decay-graph description failed validation, or a record could
    /// not be mapped onto one.
    #[error("Invalid decay topology: {0}")]
    TopologyError(String),
    /// An error raised by the amplitude evaluator.
    #[error("Evaluator error: {0}")]
    EvaluatorError(String),
    /// A custom fallback error for conditions too infrequent to warrant
    /// their own category.
    #[error("{0}")]
    Custom(String),
}
