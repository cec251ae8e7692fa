//! Encoding of a [`ClassFile`] to bytes and back.
//!
//! The bytes are what the class path holds and what a [`crate::vm::ClassFileTransformer`] receives and returns.

use anyhow::{anyhow, Context, Result};
use crate::tree::class::ClassFile;

pub fn read_class(bytes: &[u8]) -> Result<ClassFile> {
	serde_json::from_slice(bytes)
		.with_context(|| anyhow!("failed to read class from {} bytes", bytes.len()))
}

pub fn write_class(class: &ClassFile) -> Result<Vec<u8>> {
	serde_json::to_vec(class)
		.with_context(|| anyhow!("failed to write class {}", class.name))
}
