//! Stack-engine module container parsing
//!
//! Layout: header { magic "qjs\0", version u32 LE, flags u32 LE, atom
//! count u32 LE, function count u32 LE }, atom table of varint-prefixed
//! UTF-8 strings, then function definitions. Every integer inside a
//! function definition is a 7-bit continuation varint; constant-pool
//! entries are a tag byte followed by a typed payload. A debug line table
//! is present when bit 0 of the function flags is set.

use serde::{Deserialize, Serialize};

use crate::common::config::LifterConfig;
use crate::common::errors::StructuralError;
use crate::common::types::{Warning, WarningKind};
use crate::lifters::pool::ConstantPool;
use crate::lifters::reader::ByteReader;

/// Module magic
pub const QJS_MAGIC: [u8; 4] = *b"qjs\0";

/// Highest container version this parser understands
pub const QJS_SUPPORTED_VERSION: u32 = 1;

/// Function flag bit gating the debug block
pub const QJS_FLAG_HAS_DEBUG: u32 = 0x1;

/// A parsed stack-engine module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QjsModule {
    pub version: u32,
    pub flags: u32,
    /// Interned identifier table
    pub atoms: Vec<String>,
    pub functions: Vec<QjsFunction>,
}

impl QjsModule {
    /// Atom by index, with a readable fallback for bad references
    pub fn atom(&self, index: usize) -> String {
        self.atoms
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("atom_{}", index))
    }
}

/// One function definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QjsFunction {
    pub flags: u32,
    pub name_atom: u32,
    pub param_count: u32,
    pub local_count: u32,
    pub defined_arg_count: u32,
    /// Engine-declared maximum operand stack depth
    pub stack_size: u32,
    pub closure_var_count: u32,
    pub constant_pool: ConstantPool,
    pub bytecode: Vec<u8>,
    pub debug: Option<DebugInfo>,
}

/// Optional debug line table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugInfo {
    /// (bytecode offset, source line) pairs
    pub lines: Vec<(u32, u32)>,
}

impl DebugInfo {
    /// Source line for a bytecode offset, when recorded
    pub fn line_for(&self, offset: u32) -> Option<u32> {
        self.lines
            .iter()
            .take_while(|(pc, _)| *pc <= offset)
            .last()
            .map(|(_, line)| *line)
    }
}

/// Stack-engine module parser
pub struct QjsModuleParser {
    strict_versions: bool,
}

impl QjsModuleParser {
    pub fn new(config: &LifterConfig) -> Self {
        Self {
            strict_versions: config.strict_versions,
        }
    }

    /// Parse a module; version drift is a warning unless strict
    pub fn parse(&self, data: &[u8]) -> Result<(QjsModule, Vec<Warning>), StructuralError> {
        let mut warnings = Vec::new();
        let mut reader = ByteReader::new(data);

        let magic = reader.read_bytes(4)?;
        if magic != QJS_MAGIC {
            let mut actual = [0u8; 4];
            actual.copy_from_slice(magic);
            return Err(StructuralError::InvalidMagic {
                expected: QJS_MAGIC,
                actual,
            });
        }

        let version = reader.read_u32_le()?;
        if version > QJS_SUPPORTED_VERSION {
            if self.strict_versions {
                return Err(StructuralError::UnsupportedVersion { version });
            }
            warnings.push(Warning::new(
                WarningKind::MalformedModule,
                format!(
                    "module version {} is newer than supported {}; decoding best-effort",
                    version, QJS_SUPPORTED_VERSION
                ),
            ));
        }

        let flags = reader.read_u32_le()?;
        let atom_count = reader.read_u32_le()? as usize;
        let function_count = reader.read_u32_le()? as usize;

        let mut atoms = Vec::with_capacity(atom_count.min(1 << 16));
        for _ in 0..atom_count {
            atoms.push(reader.read_string()?);
        }

        let mut functions = Vec::with_capacity(function_count.min(1 << 12));
        for _ in 0..function_count {
            functions.push(self.parse_function(&mut reader)?);
        }

        Ok((
            QjsModule {
                version,
                flags,
                atoms,
                functions,
            },
            warnings,
        ))
    }

    fn parse_function(&self, reader: &mut ByteReader<'_>) -> Result<QjsFunction, StructuralError> {
        let flags = reader.read_u32_le()?;
        let name_atom = reader.read_varint_u32()?;
        let param_count = reader.read_varint_u32()?;
        let local_count = reader.read_varint_u32()?;
        let defined_arg_count = reader.read_varint_u32()?;
        let stack_size = reader.read_varint_u32()?;
        let closure_var_count = reader.read_varint_u32()?;

        let pool_count = reader.read_varint_u32()? as usize;
        let constant_pool = ConstantPool::parse(reader, pool_count)?;

        let bytecode_size = reader.read_varint_u32()? as usize;
        let bytecode = reader.read_bytes(bytecode_size)?.to_vec();

        let debug = if flags & QJS_FLAG_HAS_DEBUG != 0 {
            let count = reader.read_varint_u32()? as usize;
            let mut lines = Vec::with_capacity(count.min(1 << 16));
            for _ in 0..count {
                let pc = reader.read_varint_u32()?;
                let line = reader.read_varint_u32()?;
                lines.push((pc, line));
            }
            Some(DebugInfo { lines })
        } else {
            None
        };

        Ok(QjsFunction {
            flags,
            name_atom,
            param_count,
            local_count,
            defined_arg_count,
            stack_size,
            closure_var_count,
            constant_pool,
            bytecode,
            debug,
        })
    }
}
