//! Core types, errors, and planning primitives for the Beacon ETL engine.

pub mod batch;
pub mod error;
pub mod field;
pub mod ident;

pub use batch::*;
pub use error::{Error, Result};
pub use field::*;
