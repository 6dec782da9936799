/// Three- and four-vector types used throughout the crate.
pub mod vectors;
