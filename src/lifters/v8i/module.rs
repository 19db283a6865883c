//! Register-engine module container parsing
//!
//! Layout: header { magic "VIRS", version u16 LE, flags u16 LE }, a typed
//! constant table, then per-function records { register count, parameter
//! count, stack-size hint, scope descriptor, opcode stream }, all counts
//! varint-encoded. A malformed tail yields a minimal module plus a warning
//! instead of failing.

use serde::{Deserialize, Serialize};

use crate::common::config::LifterConfig;
use crate::common::errors::StructuralError;
use crate::common::types::{Warning, WarningKind};
use crate::lifters::pool::ConstantPool;
use crate::lifters::reader::ByteReader;

/// Module magic, stored little-endian
pub const VIRS_MAGIC: [u8; 4] = *b"VIRS";

/// Highest container version this parser understands
pub const VIRS_SUPPORTED_VERSION: u16 = 1;

/// A parsed register-engine module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirsModule {
    pub version: u16,
    pub flags: u16,
    /// Module-wide constant table, shared by all functions
    pub constants: ConstantPool,
    pub functions: Vec<VirsFunction>,
}

/// One function record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirsFunction {
    pub register_count: u32,
    pub param_count: u32,
    pub stack_size_hint: u32,
    /// Opaque scope descriptor; preserved but not interpreted
    pub scope_descriptor: Vec<u8>,
    pub bytecode: Vec<u8>,
}

/// Register-engine module parser
pub struct VirsModuleParser {
    strict_versions: bool,
}

impl VirsModuleParser {
    pub fn new(config: &LifterConfig) -> Self {
        Self {
            strict_versions: config.strict_versions,
        }
    }

    /// Parse a module, tolerating malformed tails
    pub fn parse(&self, data: &[u8]) -> Result<(VirsModule, Vec<Warning>), StructuralError> {
        let mut warnings = Vec::new();
        let mut reader = ByteReader::new(data);

        let magic = reader.read_bytes(4)?;
        if magic != VIRS_MAGIC {
            let mut actual = [0u8; 4];
            actual.copy_from_slice(magic);
            return Err(StructuralError::InvalidMagic {
                expected: VIRS_MAGIC,
                actual,
            });
        }

        let version = reader.read_u16_le()?;
        if version > VIRS_SUPPORTED_VERSION {
            if self.strict_versions {
                return Err(StructuralError::UnsupportedVersion {
                    version: version as u32,
                });
            }
            warnings.push(Warning::new(
                WarningKind::MalformedModule,
                format!(
                    "module version {} is newer than supported {}; decoding best-effort",
                    version, VIRS_SUPPORTED_VERSION
                ),
            ));
        }
        let flags = reader.read_u16_le()?;

        let constant_count = reader.read_varint_u32()? as usize;
        let constants = ConstantPool::parse(&mut reader, constant_count)?;

        let function_count = reader.read_varint_u32()? as usize;
        let mut functions = Vec::with_capacity(function_count.min(1 << 12));
        for index in 0..function_count {
            match Self::parse_function(&mut reader) {
                Ok(function) => functions.push(function),
                Err(error) => {
                    // Tolerate a malformed tail: keep what parsed
                    warnings.push(Warning::new(
                        WarningKind::MalformedModule,
                        format!(
                            "function record {} malformed ({}); emitting {} of {} functions",
                            index,
                            error,
                            functions.len(),
                            function_count
                        ),
                    ));
                    break;
                }
            }
        }

        Ok((
            VirsModule {
                version,
                flags,
                constants,
                functions,
            },
            warnings,
        ))
    }

    fn parse_function(reader: &mut ByteReader<'_>) -> Result<VirsFunction, StructuralError> {
        let register_count = reader.read_varint_u32()?;
        let param_count = reader.read_varint_u32()?;
        let stack_size_hint = reader.read_varint_u32()?;
        let scope_len = reader.read_varint_u32()? as usize;
        let scope_descriptor = reader.read_bytes(scope_len)?.to_vec();
        let bytecode_len = reader.read_varint_u32()? as usize;
        let bytecode = reader.read_bytes(bytecode_len)?.to_vec();
        Ok(VirsFunction {
            register_count,
            param_count,
            stack_size_hint,
            scope_descriptor,
            bytecode,
        })
    }
}
