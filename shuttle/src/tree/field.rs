use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use crate::macros::{make_access_flags, make_name};
use crate::tree::attribute::{self, Attribute};
use crate::tree::class::ClassName;
use crate::tree::descriptor::Type;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
	pub access: FieldAccess,
	pub name: FieldName,
	pub descriptor: FieldDescriptor,

	#[serde(default)]
	pub attributes: Vec<Attribute>,
}

impl Field {
	pub fn new(access: FieldAccess, name: FieldName, descriptor: FieldDescriptor) -> Field {
		Field {
			access,
			name,
			descriptor,
			attributes: Vec::new(),
		}
	}

	pub fn attribute(&self, name: &str) -> Option<&Attribute> {
		attribute::find(&self.attributes, name)
	}
}

make_access_flags!(
	pub FieldAccess {
		is_public    = 0x0001 => "public",
		is_private   = 0x0002 => "private",
		is_protected = 0x0004 => "protected",
		is_static    = 0x0008 => "static",
		is_final     = 0x0010 => "final",
		is_volatile  = 0x0040 => "volatile",
		is_transient = 0x0080 => "transient",
		is_synthetic = 0x1000 => "synthetic",
		is_enum      = 0x4000 => "enum",
	}
);

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct FieldRef {
	pub class: ClassName,
	pub name: FieldName,
	pub desc: FieldDescriptor,
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct FieldNameAndDesc {
	pub name: FieldName,
	pub desc: FieldDescriptor,
}

make_name!(
	pub FieldName;
);

impl FieldName {
	fn check_valid(inner: &str) -> Result<()> {
		if super::names::is_simple(inner) {
			Ok(())
		} else {
			bail!("invalid field name: must be non-empty and not contain any of `.`, `;`, `[` and `/`")
		}
	}
}

make_name!(
	/// A field descriptor like `I` or `Ljava/lang/String;`.
	pub FieldDescriptor;
);

impl FieldDescriptor {
	fn check_valid(inner: &str) -> Result<()> {
		crate::tree::descriptor::parse_field_descriptor(inner).map(|_| ())
	}

	/// Creates a field descriptor of the class name given.
	///
	/// This is equivalent to something like `"L" + class_name + ";"`, except for array classes, which already are
	/// descriptors.
	pub fn from_class(class_name: &ClassName) -> FieldDescriptor {
		if class_name.is_array() {
			FieldDescriptor(class_name.as_str().to_owned())
		} else {
			FieldDescriptor(format!("L{class_name};"))
		}
	}

	pub fn from_type(t: &Type) -> FieldDescriptor {
		FieldDescriptor(t.to_string())
	}

	pub fn parse(&self) -> Result<Type> {
		crate::tree::descriptor::parse_field_descriptor(&self.0)
	}
}
