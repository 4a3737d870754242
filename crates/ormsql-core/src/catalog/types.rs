//! Core type definitions for the catalog.

use serde::{Deserialize, Serialize};

/// Column data types known to the compiler.
///
/// Only the distinction between spatial and non-spatial types affects the
/// generated SQL; the rest is carried for collaborators such as hydrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    /// Boolean value.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit floating point.
    Float32,
    /// 64-bit floating point.
    Float64,
    /// Fixed-precision decimal.
    Decimal {
        /// Total number of digits.
        precision: u8,
        /// Number of digits after decimal point.
        scale: u8,
    },
    /// UTF-8 string.
    String,
    /// Binary data.
    Bytes,
    /// Timestamp.
    Timestamp,
    /// UUID (128-bit identifier).
    Uuid,
    /// JSON document.
    Json,
    /// Spatial geometry.
    Geometry,
    /// Spatial geography.
    Geography,
    /// Spatial point.
    Point,
}

impl ScalarType {
    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarType::Int32
                | ScalarType::Int64
                | ScalarType::Float32
                | ScalarType::Float64
                | ScalarType::Decimal { .. }
        )
    }

    /// Check if this type is spatial and needs a text projection when selected.
    pub fn is_spatial(&self) -> bool {
        matches!(
            self,
            ScalarType::Geometry | ScalarType::Geography | ScalarType::Point
        )
    }
}
