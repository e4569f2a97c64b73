// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Field type and field definition model.

use serde::Serialize;

/// Wire-level type of a single telegram field.
///
/// Covers the TRDP primitive set used by dataset definitions: booleans,
/// signed/unsigned 8/16/32-bit integers, IEEE-754 floats, and fixed-size
/// text/byte runs. 64-bit integers and nested aggregates are not part of
/// the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FieldType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
    String,
    Bytes,
}

impl FieldType {
    /// Scalar width in bytes (None for `String`/`Bytes`, which carry an
    /// explicit size on the field definition).
    pub fn scalar_width(&self) -> Option<usize> {
        match self {
            Self::Bool | Self::I8 | Self::U8 => Some(1),
            Self::I16 | Self::U16 => Some(2),
            Self::I32 | Self::U32 | Self::F32 => Some(4),
            Self::F64 => Some(8),
            Self::String | Self::Bytes => None,
        }
    }

    /// Parse a configuration type name, tolerating the alias spellings
    /// found in TRDP XML dialects (case-insensitive).
    ///
    /// Anything unrecognized maps to [`FieldType::Bytes`] so that unknown
    /// vendor types still occupy their declared bytes on the wire.
    pub fn parse(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase();
        match upper.as_str() {
            "BOOL" | "BIT" => Self::Bool,
            _ if upper.starts_with("BITSET") => Self::Bool,
            "INT8" | "SINT8" | "I8" => Self::I8,
            "UINT8" | "U8" | "BYTE" | "CHAR8" | "CHAR" => Self::U8,
            "INT16" | "SINT16" | "I16" => Self::I16,
            "UINT16" | "U16" => Self::U16,
            "INT32" | "SINT32" | "I32" => Self::I32,
            "UINT32" | "U32" => Self::U32,
            "FLOAT" | "FLOAT32" | "REAL32" => Self::F32,
            "DOUBLE" | "FLOAT64" | "REAL64" => Self::F64,
            "STRING" | "STRING8" | "STR" => Self::String,
            _ => Self::Bytes,
        }
    }
}

/// One field of a dataset: a typed slot at a fixed byte offset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name, unique within its dataset.
    pub name: String,
    /// Wire type.
    #[serde(rename = "type")]
    pub ty: FieldType,
    /// Byte offset from the start of the dataset buffer.
    pub offset: usize,
    /// Explicit byte size; only meaningful for `String`/`Bytes`.
    pub size: usize,
    /// Sub-byte offset as declared in the configuration. Recorded but not
    /// applied by the codec; packed fields keep their whole-byte layout.
    pub bit_offset: usize,
    /// Number of contiguous scalar elements (>= 1).
    pub array_length: usize,
}

impl FieldDef {
    /// Create a scalar field at `offset`.
    pub fn new(name: impl Into<String>, ty: FieldType, offset: usize) -> Self {
        Self {
            name: name.into(),
            ty,
            offset,
            size: 0,
            bit_offset: 0,
            array_length: 1,
        }
    }

    /// Create a `String`/`Bytes` field occupying `size` bytes at `offset`.
    pub fn sized(name: impl Into<String>, ty: FieldType, offset: usize, size: usize) -> Self {
        Self {
            name: name.into(),
            ty,
            offset,
            size,
            bit_offset: 0,
            array_length: 1,
        }
    }

    /// Set the array length (builder style).
    pub fn with_array_length(mut self, len: usize) -> Self {
        self.array_length = len.max(1);
        self
    }

    /// Total byte width of the field on the wire.
    ///
    /// Scalars occupy `scalar_width x array_length`; `String`/`Bytes`
    /// occupy their declared `size` (array length does not multiply them).
    pub fn width(&self) -> usize {
        match self.ty.scalar_width() {
            Some(w) => w * self.array_length.max(1),
            None => self.size,
        }
    }
}
