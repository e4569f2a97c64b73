// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dataset definitions.

use serde::Serialize;

use crate::model::field::FieldDef;

/// A named, ordered record layout shared by one or more telegrams.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetDef {
    /// Dataset name, unique within the registry.
    pub name: String,
    /// Declared byte size from the configuration (0 = derive from fields).
    pub size: usize,
    /// Ordered field sequence.
    pub fields: Vec<FieldDef>,
}

impl DatasetDef {
    /// Create an empty dataset with a declared size of zero.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            fields: Vec::new(),
        }
    }

    /// Look up a field by name.
    pub fn find_field(&self, field_name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == field_name)
    }

    /// Effective wire size of the dataset.
    ///
    /// A non-zero declared size wins; otherwise the size is the largest
    /// `offset + width` over all fields (string/bytes fields with size 0
    /// contribute at least one byte).
    pub fn effective_size(&self) -> usize {
        if self.size > 0 {
            return self.size;
        }

        let mut max_end = 0;
        for field in &self.fields {
            let width = field.width().max(1);
            max_end = max_end.max(field.offset + width);
        }
        max_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::field::FieldType;

    #[test]
    fn test_declared_size_wins() {
        let mut ds = DatasetDef::new("d");
        ds.size = 64;
        ds.fields.push(FieldDef::new("a", FieldType::U32, 0));
        assert_eq!(ds.effective_size(), 64);
    }

    #[test]
    fn test_derived_size() {
        let mut ds = DatasetDef::new("d");
        ds.fields.push(FieldDef::new("a", FieldType::U16, 0));
        ds.fields.push(FieldDef::new("b", FieldType::U32, 2));
        ds.fields.push(FieldDef::sized("c", FieldType::String, 6, 4));
        assert_eq!(ds.effective_size(), 10);
    }

    #[test]
    fn test_zero_sized_bytes_field_counts_one() {
        let mut ds = DatasetDef::new("d");
        ds.fields.push(FieldDef::sized("raw", FieldType::Bytes, 3, 0));
        assert_eq!(ds.effective_size(), 4);
    }

    #[test]
    fn test_find_field() {
        let mut ds = DatasetDef::new("d");
        ds.fields.push(FieldDef::new("speed", FieldType::F32, 0));
        assert!(ds.find_field("speed").is_some());
        assert!(ds.find_field("missing").is_none());
    }
}
