//! Typed constant pools shared by the bytecode module formats
//!
//! A pool is immutable once parsed and may be shared by readers. Entries
//! are encoded as a tag byte followed by a typed payload.

use serde::{Deserialize, Serialize};

use crate::common::errors::StructuralError;
use crate::common::types::Literal;
use crate::lifters::reader::ByteReader;

/// Typed constant-pool entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PoolEntry {
    Null,
    Undefined,
    Bool(bool),
    Int(i32),
    Number(f64),
    Str(String),
    /// Reference to another function definition in the same module
    FunctionRef(u32),
}

impl PoolEntry {
    /// The IR literal for a scalar entry; function references map to
    /// `undefined` placeholders at lift time
    pub fn literal(&self) -> Literal {
        match self {
            PoolEntry::Null => Literal::Null,
            PoolEntry::Undefined => Literal::Undefined,
            PoolEntry::Bool(b) => Literal::Bool(*b),
            PoolEntry::Int(v) => Literal::Number(*v as f64),
            PoolEntry::Number(n) => Literal::Number(*n),
            PoolEntry::Str(s) => Literal::Str(s.clone()),
            PoolEntry::FunctionRef(_) => Literal::Undefined,
        }
    }

    /// Decode one tagged entry
    pub fn parse(reader: &mut ByteReader<'_>) -> Result<Self, StructuralError> {
        let offset = reader.offset();
        let tag = reader.read_u8()?;
        let entry = match tag {
            0 => PoolEntry::Null,
            1 => PoolEntry::Undefined,
            2 => PoolEntry::Bool(false),
            3 => PoolEntry::Bool(true),
            4 => PoolEntry::Int(reader.read_varint_i32()?),
            5 => PoolEntry::Number(reader.read_f64_le()?),
            6 => PoolEntry::Str(reader.read_string()?),
            7 => PoolEntry::FunctionRef(reader.read_varint_u32()?),
            tag => return Err(StructuralError::UnknownConstantTag { tag, offset }),
        };
        Ok(entry)
    }
}

/// Immutable constant pool indexed by entry number
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstantPool {
    entries: Vec<PoolEntry>,
}

impl ConstantPool {
    pub fn new(entries: Vec<PoolEntry>) -> Self {
        Self { entries }
    }

    /// Parse `count` tagged entries
    pub fn parse(reader: &mut ByteReader<'_>, count: usize) -> Result<Self, StructuralError> {
        let mut entries = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            entries.push(PoolEntry::parse(reader)?);
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&PoolEntry, StructuralError> {
        self.entries
            .get(index)
            .ok_or(StructuralError::ConstantIndexOutOfRange {
                index,
                len: self.entries.len(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_literals() {
        assert_eq!(PoolEntry::Int(7).literal(), Literal::Number(7.0));
        assert_eq!(PoolEntry::Null.literal(), Literal::Null);
        assert_eq!(
            PoolEntry::Str("abc".into()).literal(),
            Literal::Str("abc".into())
        );
    }

    #[test]
    fn test_out_of_range_index() {
        let pool = ConstantPool::new(vec![PoolEntry::Null]);
        assert!(pool.get(0).is_ok());
        assert!(matches!(
            pool.get(3),
            Err(StructuralError::ConstantIndexOutOfRange { index: 3, len: 1 })
        ));
    }
}
