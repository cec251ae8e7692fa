use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// An attribute not otherwise understood by this crate: a name and opaque bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
	pub name: String,
	pub bytes: Vec<u8>,
}

impl Attribute {
	pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Attribute {
		Attribute { name: name.into(), bytes }
	}

	/// Creates an attribute holding a single big endian `u32`.
	pub fn from_u32(name: impl Into<String>, value: u32) -> Attribute {
		Attribute::new(name, value.to_be_bytes().to_vec())
	}

	/// Reads the attribute as a single big endian `u32`.
	pub fn as_u32(&self) -> Result<u32> {
		let bytes: [u8; 4] = self.bytes.as_slice().try_into()
			.map_err(|_| anyhow!("attribute {:?} has {} bytes, expected 4", self.name, self.bytes.len()))?;
		Ok(u32::from_be_bytes(bytes))
	}
}

pub(crate) fn find<'a>(attributes: &'a [Attribute], name: &str) -> Option<&'a Attribute> {
	attributes.iter().find(|a| a.name == name)
}

/// Replaces the attribute with the same name, or appends it if there's none.
pub(crate) fn set(attributes: &mut Vec<Attribute>, attribute: Attribute) {
	if let Some(existing) = attributes.iter_mut().find(|a| a.name == attribute.name) {
		*existing = attribute;
	} else {
		attributes.push(attribute);
	}
}

pub(crate) fn remove(attributes: &mut Vec<Attribute>, name: &str) -> Option<Attribute> {
	let index = attributes.iter().position(|a| a.name == name)?;
	Some(attributes.remove(index))
}
