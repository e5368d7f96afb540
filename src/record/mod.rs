//! Record layout and typed values.
//!
//! A `RecordLayout` is an ordered list of columns; column 0 is the key
//! and is never part of the stored record bytes (the key lives in the
//! tree's key slot, the tree is the map). `record_size` is the sum of
//! the widths of every column after the first.

use crate::error::{Result, StorageError};
use crate::types::{DataType, ValueKind, COLUMN_NAME_SIZE, MAX_RECORD_LAYOUT};

/// One column: a bounded name plus its fixed-width type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    name: String,
    data_type: DataType,
}

impl ColumnLayout {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.len() > COLUMN_NAME_SIZE {
            return Err(StorageError::layout_overflow(format!(
                "column name {:?} exceeds {} bytes",
                name, COLUMN_NAME_SIZE
            )));
        }
        Ok(Self { name, data_type })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

/// Ordered column list. Column 0 is the key column; `record_size`
/// covers only columns `1..`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    columns: Vec<ColumnLayout>,
}

impl RecordLayout {
    /// Build a layout from a key column followed by the record's value
    /// columns. Fails if the combined column count exceeds
    /// `MAX_RECORD_LAYOUT`.
    pub fn new(key: ColumnLayout, values: Vec<ColumnLayout>) -> Result<Self> {
        let mut columns = Vec::with_capacity(values.len() + 1);
        columns.push(key);
        columns.extend(values);
        if columns.len() > MAX_RECORD_LAYOUT {
            return Err(StorageError::layout_overflow(format!(
                "record layout has {} columns, max is {}",
                columns.len(),
                MAX_RECORD_LAYOUT
            )));
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[ColumnLayout] {
        &self.columns
    }

    pub fn key_column(&self) -> &ColumnLayout {
        &self.columns[0]
    }

    pub fn key_type(&self) -> DataType {
        self.columns[0].data_type
    }

    pub fn key_size(&self) -> usize {
        self.key_type().width()
    }

    /// Sum of the widths of every column after the key.
    pub fn record_size(&self) -> usize {
        self.columns[1..].iter().map(|c| c.data_type.width()).sum()
    }

    pub fn value_columns(&self) -> &[ColumnLayout] {
        &self.columns[1..]
    }

    /// Byte offset of value column `i` (0-based among value columns)
    /// within the record bytes.
    fn value_offset(&self, i: usize) -> usize {
        self.columns[1..1 + i]
            .iter()
            .map(|c| c.data_type.width())
            .sum()
    }

    /// Slice out value column `i`'s bytes from a record buffer.
    pub fn value_bytes<'a>(&self, record: &'a [u8], i: usize) -> &'a [u8] {
        let off = self.value_offset(i);
        let width = self.columns[1 + i].data_type.width();
        &record[off..off + width]
    }

    pub fn column_index_by_name(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Decode every value column of a record into owned `Value`s, for
    /// the row-emission callback.
    pub fn decode_record(&self, record: &[u8]) -> Result<Vec<Value>> {
        if record.len() != self.record_size() {
            return Err(StorageError::fault(format!(
                "record is {} bytes, layout expects {}",
                record.len(),
                self.record_size()
            )));
        }
        (0..self.value_columns().len())
            .map(|i| Value::decode(self.value_bytes(record, i), self.columns[1 + i].data_type))
            .collect()
    }

    pub fn decode_key(&self, key: &[u8]) -> Result<Value> {
        Value::decode(key, self.key_type())
    }
}

/// A decoded column value, used for the row-emission callback and for
/// building/searching index keys from typed inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(Vec<u8>),
}

impl Value {
    fn decode(bytes: &[u8], data_type: DataType) -> Result<Self> {
        if bytes.len() != data_type.width() {
            return Err(StorageError::fault(format!(
                "value is {} bytes, type expects {}",
                bytes.len(),
                data_type.width()
            )));
        }
        match data_type.kind() {
            ValueKind::Int => {
                let mut padded = [0u8; 8];
                let signed_fill = if bytes.last().map_or(false, |b| b & 0x80 != 0) {
                    0xFFu8
                } else {
                    0u8
                };
                padded.fill(signed_fill);
                padded[..bytes.len()].copy_from_slice(bytes);
                Ok(Value::Int(i64::from_le_bytes(padded)))
            }
            ValueKind::Str => Ok(Value::Str(bytes.to_vec())),
        }
    }

    /// Encode this value into exactly `data_type.width()` bytes.
    pub fn encode(&self, data_type: DataType) -> Result<Vec<u8>> {
        match (self, data_type.kind()) {
            (Value::Int(v), ValueKind::Int) => {
                let width = data_type.width();
                let full = v.to_le_bytes();
                match width {
                    1 => Ok(vec![full[0]]),
                    2 => Ok(full[..2].to_vec()),
                    4 => Ok(full[..4].to_vec()),
                    8 => Ok(full.to_vec()),
                    other => Err(StorageError::fault(format!(
                        "unsupported integer width {}",
                        other
                    ))),
                }
            }
            (Value::Str(s), ValueKind::Str) => {
                let width = data_type.width();
                if s.len() > width {
                    return Err(StorageError::layout_overflow(format!(
                        "string value of {} bytes exceeds column width {}",
                        s.len(),
                        width
                    )));
                }
                let mut buf = vec![0u8; width];
                buf[..s.len()].copy_from_slice(s);
                Ok(buf)
            }
            _ => Err(StorageError::fault(
                "value kind does not match column type",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn sample_layout() -> RecordLayout {
        RecordLayout::new(
            ColumnLayout::new("id", DataType::TYPE_4).unwrap(),
            vec![
                ColumnLayout::new("name", DataType::TYPE_16).unwrap(),
                ColumnLayout::new("age", DataType::TYPE_4).unwrap(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn record_size_excludes_key() {
        let layout = sample_layout();
        assert_eq!(layout.key_size(), 4);
        assert_eq!(layout.record_size(), 20);
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let layout = sample_layout();
        let name = Value::Str(b"alice".to_vec())
            .encode(layout.value_columns()[0].data_type())
            .unwrap();
        let age = Value::Int(30).encode(layout.value_columns()[1].data_type()).unwrap();
        let mut record = Vec::new();
        record.extend_from_slice(&name);
        record.extend_from_slice(&age);

        let decoded = layout.decode_record(&record).unwrap();
        assert_eq!(decoded[1], Value::Int(30));
        match &decoded[0] {
            Value::Str(s) => assert!(s.starts_with(b"alice")),
            _ => panic!("expected string"),
        }
    }

    #[test]
    fn negative_integers_decode_correctly() {
        let ty = DataType::TYPE_4;
        let bytes = Value::Int(-5).encode(ty).unwrap();
        assert_eq!(Value::decode(&bytes, ty).unwrap(), Value::Int(-5));
    }

    #[test]
    fn too_many_columns_is_rejected() {
        let key = ColumnLayout::new("id", DataType::TYPE_4).unwrap();
        let values: Vec<_> = (0..32)
            .map(|i| ColumnLayout::new(format!("c{}", i), DataType::TYPE_1).unwrap())
            .collect();
        assert!(RecordLayout::new(key, values).is_err());
    }

    #[test]
    fn string_value_wider_than_column_is_rejected() {
        let ty = DataType::TYPE_16;
        let too_long = Value::Str(vec![b'x'; 17]);
        assert!(too_long.encode(ty).is_err());
    }
}
