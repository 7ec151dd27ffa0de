//! Error types, re-exported from bb-error

pub use bb_error::{BrewError, Result};
