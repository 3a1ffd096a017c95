//! Types library for the live grid
//!
//! Core type definitions shared by the view engine, the loopback bus and the
//! synthetic publisher.
//!
//! # Modules
//! - `value`: Scalar cell values (null, bool, decimal number, text)
//! - `row`: Rows and their stable identity (`RowKey`)
//! - `errors`: Error taxonomy

pub mod value;
pub mod row;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::value::*;
    pub use crate::row::*;
    pub use crate::errors::*;
}
