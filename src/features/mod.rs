//! Feature extraction and encoding
//!
//! Converts match records into fixed-width model inputs.

pub mod encoding;

pub use encoding::{EncodedColumn, EncoderState, FeatureEncoder, FeatureVector};
