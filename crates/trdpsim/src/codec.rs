// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-offset binary codec for dataset buffers.
//!
//! Projects typed field values to and from flat byte buffers at the
//! offsets declared by the dataset definition. All multi-byte scalars are
//! little-endian. The codec is deliberately infallible: telegrams seen on
//! the wire may be truncated or padded, and a best-effort typed view is
//! more useful than a hard failure, so malformed fields are skipped on
//! encode and decode to [`FieldValue::Unset`] on decode.

use std::collections::BTreeMap;

use crate::model::{DatasetDef, FieldDef, FieldType, FieldValue};

// ============================================================================
// Encoding
// ============================================================================

/// Encode a field-value mapping into a zeroed buffer of the dataset's
/// effective size.
///
/// A field is skipped when its value is absent, unset, mismatched against
/// the declared type, or when `offset + width` exceeds the buffer. For
/// scalar arrays only the first element is written; the remaining element
/// slots keep their zero fill.
pub fn encode_fields(dataset: &DatasetDef, fields: &BTreeMap<String, FieldValue>) -> Vec<u8> {
    let mut buffer = vec![0u8; dataset.effective_size()];

    for field in &dataset.fields {
        let value = match fields.get(&field.name) {
            Some(v) if !v.is_unset() => v,
            _ => continue,
        };
        let width = field.width();
        if field.offset + width > buffer.len() {
            continue;
        }
        encode_single(field, value, &mut buffer[field.offset..field.offset + width]);
    }

    buffer
}

/// Encode one value into `dest` (already bounds-checked by the caller).
///
/// A tag that does not match the field type leaves `dest` untouched.
fn encode_single(field: &FieldDef, value: &FieldValue, dest: &mut [u8]) {
    match (field.ty, value) {
        (FieldType::Bool, FieldValue::Bool(v)) => dest[0] = u8::from(*v),
        (FieldType::I8, FieldValue::I8(v)) => dest[0] = *v as u8,
        (FieldType::U8, FieldValue::U8(v)) => dest[0] = *v,
        (FieldType::I16, FieldValue::I16(v)) => {
            dest[..2].copy_from_slice(&v.to_le_bytes());
        }
        (FieldType::U16, FieldValue::U16(v)) => {
            dest[..2].copy_from_slice(&v.to_le_bytes());
        }
        (FieldType::I32, FieldValue::I32(v)) => {
            dest[..4].copy_from_slice(&v.to_le_bytes());
        }
        (FieldType::U32, FieldValue::U32(v)) => {
            dest[..4].copy_from_slice(&v.to_le_bytes());
        }
        (FieldType::F32, FieldValue::F32(v)) => {
            dest[..4].copy_from_slice(&v.to_le_bytes());
        }
        (FieldType::F64, FieldValue::F64(v)) => {
            dest[..8].copy_from_slice(&v.to_le_bytes());
        }
        (FieldType::String, FieldValue::String(v)) => {
            dest.fill(0);
            let len = v.len().min(dest.len());
            dest[..len].copy_from_slice(&v.as_bytes()[..len]);
        }
        (FieldType::Bytes, FieldValue::Bytes(v)) => {
            let len = v.len().min(dest.len());
            dest[..len].copy_from_slice(&v[..len]);
            dest[len..].fill(0);
        }
        // Tag mismatch: treated as unset, bytes stay as they were.
        _ => {}
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode a payload into a fresh field-value mapping.
///
/// Every dataset field gets an entry; fields whose byte range does not
/// fit the payload decode to [`FieldValue::Unset`].
pub fn decode_fields(dataset: &DatasetDef, payload: &[u8]) -> BTreeMap<String, FieldValue> {
    let mut fields = BTreeMap::new();
    for field in &dataset.fields {
        let value = if field.offset <= payload.len() {
            decode_single(field, &payload[field.offset..])
        } else {
            FieldValue::Unset
        };
        fields.insert(field.name.clone(), value);
    }
    fields
}

/// Decode one value from the bytes starting at the field's offset.
///
/// `remaining` must cover the full field width or the result is unset.
/// Scalar arrays decode their first element. String/bytes fields with a
/// declared size of zero consume all remaining bytes.
fn decode_single(field: &FieldDef, remaining: &[u8]) -> FieldValue {
    if remaining.len() < field.width() {
        return FieldValue::Unset;
    }

    match field.ty {
        FieldType::Bool => FieldValue::Bool(remaining[0] != 0),
        FieldType::I8 => FieldValue::I8(remaining[0] as i8),
        FieldType::U8 => FieldValue::U8(remaining[0]),
        FieldType::I16 => FieldValue::I16(i16::from_le_bytes([remaining[0], remaining[1]])),
        FieldType::U16 => FieldValue::U16(u16::from_le_bytes([remaining[0], remaining[1]])),
        FieldType::I32 => FieldValue::I32(i32::from_le_bytes([
            remaining[0],
            remaining[1],
            remaining[2],
            remaining[3],
        ])),
        FieldType::U32 => FieldValue::U32(u32::from_le_bytes([
            remaining[0],
            remaining[1],
            remaining[2],
            remaining[3],
        ])),
        FieldType::F32 => FieldValue::F32(f32::from_le_bytes([
            remaining[0],
            remaining[1],
            remaining[2],
            remaining[3],
        ])),
        FieldType::F64 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&remaining[..8]);
            FieldValue::F64(f64::from_le_bytes(raw))
        }
        FieldType::String => {
            let len = if field.size > 0 {
                field.size.min(remaining.len())
            } else {
                remaining.len()
            };
            // Raw slice is the value; trailing NULs are kept.
            FieldValue::String(String::from_utf8_lossy(&remaining[..len]).into_owned())
        }
        FieldType::Bytes => {
            let len = if field.size > 0 {
                field.size.min(remaining.len())
            } else {
                remaining.len()
            };
            FieldValue::Bytes(remaining[..len].to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldDef;

    /// `[u16 a @ 0, u32 b @ 2, string(4) c @ 6]`, 10 bytes total.
    fn dataset_d1() -> DatasetDef {
        let mut ds = DatasetDef::new("D1");
        ds.fields.push(FieldDef::new("a", FieldType::U16, 0));
        ds.fields.push(FieldDef::new("b", FieldType::U32, 2));
        ds.fields.push(FieldDef::sized("c", FieldType::String, 6, 4));
        ds
    }

    #[test]
    fn test_encode_known_layout() {
        let ds = dataset_d1();
        let mut fields = BTreeMap::new();
        fields.insert("a".to_string(), FieldValue::U16(0x0102));
        fields.insert("b".to_string(), FieldValue::U32(0xDEAD_BEEF));
        fields.insert("c".to_string(), FieldValue::from("OK"));

        let buffer = encode_fields(&ds, &fields);
        assert_eq!(
            buffer,
            vec![0x02, 0x01, 0xEF, 0xBE, 0xAD, 0xDE, 0x4F, 0x4B, 0x00, 0x00]
        );
    }

    #[test]
    fn test_decode_known_layout() {
        let ds = dataset_d1();
        let payload = vec![0xFF, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x48, 0x49, 0x00, 0x00];
        let fields = decode_fields(&ds, &payload);

        assert_eq!(fields.get("a"), Some(&FieldValue::U16(0xFFFF)));
        assert_eq!(fields.get("b"), Some(&FieldValue::U32(1)));
        assert_eq!(fields.get("c"), Some(&FieldValue::String("HI\0\0".to_string())));
    }

    #[test]
    fn test_roundtrip_all_scalar_types() {
        let mut ds = DatasetDef::new("all");
        ds.fields.push(FieldDef::new("flag", FieldType::Bool, 0));
        ds.fields.push(FieldDef::new("i8", FieldType::I8, 1));
        ds.fields.push(FieldDef::new("u8", FieldType::U8, 2));
        ds.fields.push(FieldDef::new("i16", FieldType::I16, 3));
        ds.fields.push(FieldDef::new("u16", FieldType::U16, 5));
        ds.fields.push(FieldDef::new("i32", FieldType::I32, 7));
        ds.fields.push(FieldDef::new("u32", FieldType::U32, 11));
        ds.fields.push(FieldDef::new("f32", FieldType::F32, 15));
        ds.fields.push(FieldDef::new("f64", FieldType::F64, 19));
        ds.fields.push(FieldDef::sized("raw", FieldType::Bytes, 27, 3));

        let mut fields = BTreeMap::new();
        fields.insert("flag".to_string(), FieldValue::Bool(true));
        fields.insert("i8".to_string(), FieldValue::I8(-5));
        fields.insert("u8".to_string(), FieldValue::U8(200));
        fields.insert("i16".to_string(), FieldValue::I16(-300));
        fields.insert("u16".to_string(), FieldValue::U16(40_000));
        fields.insert("i32".to_string(), FieldValue::I32(-70_000));
        fields.insert("u32".to_string(), FieldValue::U32(3_000_000_000));
        fields.insert("f32".to_string(), FieldValue::F32(1.5));
        fields.insert("f64".to_string(), FieldValue::F64(-2.25));
        fields.insert("raw".to_string(), FieldValue::Bytes(vec![9, 8, 7]));

        let buffer = encode_fields(&ds, &fields);
        let decoded = decode_fields(&ds, &buffer);
        assert_eq!(decoded, fields);
    }

    #[test]
    fn test_roundtrip_normalizes_string_and_bytes() {
        let mut ds = DatasetDef::new("pad");
        ds.fields.push(FieldDef::sized("s", FieldType::String, 0, 6));
        ds.fields.push(FieldDef::sized("b", FieldType::Bytes, 6, 4));

        let mut fields = BTreeMap::new();
        fields.insert("s".to_string(), FieldValue::from("ab"));
        fields.insert("b".to_string(), FieldValue::Bytes(vec![1, 2]));

        let decoded = decode_fields(&ds, &encode_fields(&ds, &fields));
        // NUL-padded to the declared size on the way back.
        assert_eq!(
            decoded.get("s"),
            Some(&FieldValue::String("ab\0\0\0\0".to_string()))
        );
        assert_eq!(decoded.get("b"), Some(&FieldValue::Bytes(vec![1, 2, 0, 0])));
    }

    #[test]
    fn test_decode_zero_buffer() {
        let ds = dataset_d1();
        let fields = decode_fields(&ds, &vec![0u8; ds.effective_size()]);
        assert_eq!(fields.get("a"), Some(&FieldValue::U16(0)));
        assert_eq!(fields.get("b"), Some(&FieldValue::U32(0)));
        assert_eq!(
            fields.get("c"),
            Some(&FieldValue::String("\0\0\0\0".to_string()))
        );
    }

    #[test]
    fn test_decode_truncated_payload() {
        let ds = dataset_d1();
        // Only field `a` fits.
        let fields = decode_fields(&ds, &[0x34, 0x12, 0x01]);
        assert_eq!(fields.get("a"), Some(&FieldValue::U16(0x1234)));
        assert_eq!(fields.get("b"), Some(&FieldValue::Unset));
        assert_eq!(fields.get("c"), Some(&FieldValue::Unset));
    }

    #[test]
    fn test_encode_skips_mismatched_tag() {
        let ds = dataset_d1();
        let mut fields = BTreeMap::new();
        // Wrong tag for `a`: bytes stay zero.
        fields.insert("a".to_string(), FieldValue::U32(0xFFFF_FFFF));
        fields.insert("b".to_string(), FieldValue::U32(7));
        let buffer = encode_fields(&ds, &fields);
        assert_eq!(&buffer[..2], &[0, 0]);
        assert_eq!(&buffer[2..6], &7u32.to_le_bytes());
    }

    #[test]
    fn test_encode_skips_out_of_range_field() {
        let mut ds = DatasetDef::new("tight");
        ds.size = 2;
        ds.fields.push(FieldDef::new("fits", FieldType::U16, 0));
        ds.fields.push(FieldDef::new("overflows", FieldType::U32, 1));

        let mut fields = BTreeMap::new();
        fields.insert("fits".to_string(), FieldValue::U16(1));
        fields.insert("overflows".to_string(), FieldValue::U32(2));
        let buffer = encode_fields(&ds, &fields);
        assert_eq!(buffer, vec![1, 0]);
    }

    #[test]
    fn test_scalar_array_first_element_roundtrip() {
        let mut ds = DatasetDef::new("arr");
        ds.fields
            .push(FieldDef::new("xs", FieldType::U16, 0).with_array_length(3));
        assert_eq!(ds.effective_size(), 6);

        let mut fields = BTreeMap::new();
        fields.insert("xs".to_string(), FieldValue::U16(0xAABB));
        let buffer = encode_fields(&ds, &fields);
        // First element written, remaining slots stay zero.
        assert_eq!(buffer, vec![0xBB, 0xAA, 0, 0, 0, 0]);

        let decoded = decode_fields(&ds, &buffer);
        assert_eq!(decoded.get("xs"), Some(&FieldValue::U16(0xAABB)));
        // A payload shorter than the full array width is unset.
        let short = decode_fields(&ds, &buffer[..4]);
        assert_eq!(short.get("xs"), Some(&FieldValue::Unset));
    }

    #[test]
    fn test_unset_leaves_zeroes() {
        let ds = dataset_d1();
        let mut fields = BTreeMap::new();
        fields.insert("a".to_string(), FieldValue::Unset);
        let buffer = encode_fields(&ds, &fields);
        assert!(buffer.iter().all(|b| *b == 0));
    }
}
