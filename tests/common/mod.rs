//! Shared builders for integration tests
//!
//! Sample bytecode modules are assembled byte-by-byte with the same
//! encoding the parsers consume, so the tests exercise the real wire
//! format rather than pre-parsed structures.
#![allow(dead_code)]

use unweave::lifters::reader::{write_string, write_varint_i32, write_varint_u32};

/// Install a tracing subscriber honouring `RUST_LOG`; safe to call from
/// every test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Builder for stack-engine module fixtures
pub struct SampleQjsModule {
    pub atoms: Vec<String>,
    pub functions: Vec<SampleQjsFunction>,
}

pub struct SampleQjsFunction {
    pub name_atom: u32,
    pub param_count: u32,
    pub pool: Vec<SamplePoolEntry>,
    pub bytecode: Vec<u8>,
}

#[derive(Clone)]
pub enum SamplePoolEntry {
    Int(i32),
    Number(f64),
    Str(String),
}

impl SampleQjsModule {
    /// `main` with the given pool and bytecode
    pub fn single(pool: Vec<SamplePoolEntry>, bytecode: Vec<u8>) -> Self {
        Self {
            atoms: vec!["main".to_string()],
            functions: vec![SampleQjsFunction {
                name_atom: 0,
                param_count: 0,
                pool,
                bytecode,
            }],
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"qjs\0");
        out.extend_from_slice(&1u32.to_le_bytes()); // version
        out.extend_from_slice(&0u32.to_le_bytes()); // flags
        out.extend_from_slice(&(self.atoms.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.functions.len() as u32).to_le_bytes());
        for atom in &self.atoms {
            write_string(&mut out, atom);
        }
        for function in &self.functions {
            out.extend_from_slice(&0u32.to_le_bytes()); // flags, no debug
            write_varint_u32(&mut out, function.name_atom);
            write_varint_u32(&mut out, function.param_count);
            write_varint_u32(&mut out, 0); // locals
            write_varint_u32(&mut out, function.param_count); // defined args
            write_varint_u32(&mut out, 8); // stack size
            write_varint_u32(&mut out, 0); // closure vars
            write_varint_u32(&mut out, function.pool.len() as u32);
            for entry in &function.pool {
                match entry {
                    SamplePoolEntry::Int(v) => {
                        out.push(4);
                        write_varint_i32(&mut out, *v);
                    }
                    SamplePoolEntry::Number(n) => {
                        out.push(5);
                        out.extend_from_slice(&n.to_le_bytes());
                    }
                    SamplePoolEntry::Str(s) => {
                        out.push(6);
                        write_string(&mut out, s);
                    }
                }
            }
            write_varint_u32(&mut out, function.bytecode.len() as u32);
            out.extend_from_slice(&function.bytecode);
        }
        out
    }
}

/// Builder for register-engine module fixtures
pub struct SampleVirsModule {
    pub constants: Vec<SamplePoolEntry>,
    pub functions: Vec<SampleVirsFunction>,
}

pub struct SampleVirsFunction {
    pub register_count: u32,
    pub param_count: u32,
    pub bytecode: Vec<u8>,
}

impl SampleVirsModule {
    pub fn single(constants: Vec<SamplePoolEntry>, bytecode: Vec<u8>) -> Self {
        Self {
            constants,
            functions: vec![SampleVirsFunction {
                register_count: 8,
                param_count: 0,
                bytecode,
            }],
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"VIRS");
        out.extend_from_slice(&1u16.to_le_bytes()); // version
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        write_varint_u32(&mut out, self.constants.len() as u32);
        for entry in &self.constants {
            match entry {
                SamplePoolEntry::Int(v) => {
                    out.push(4);
                    write_varint_i32(&mut out, *v);
                }
                SamplePoolEntry::Number(n) => {
                    out.push(5);
                    out.extend_from_slice(&n.to_le_bytes());
                }
                SamplePoolEntry::Str(s) => {
                    out.push(6);
                    write_string(&mut out, s);
                }
            }
        }
        write_varint_u32(&mut out, self.functions.len() as u32);
        for function in &self.functions {
            write_varint_u32(&mut out, function.register_count);
            write_varint_u32(&mut out, function.param_count);
            write_varint_u32(&mut out, 4); // stack hint
            write_varint_u32(&mut out, 0); // scope descriptor
            write_varint_u32(&mut out, function.bytecode.len() as u32);
            out.extend_from_slice(&function.bytecode);
        }
        out
    }
}

/// Strip node identifiers and spans from a serialised program so two
/// programs can be compared structurally
pub fn structural_json<T: serde::Serialize>(value: &T) -> serde_json::Value {
    let mut json = serde_json::to_value(value).expect("serializable");
    scrub(&mut json);
    json
}

fn scrub(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.remove("id");
            map.remove("span");
            for entry in map.values_mut() {
                scrub(entry);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                scrub(item);
            }
        }
        _ => {}
    }
}
