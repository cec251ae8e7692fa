pub mod code;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use crate::macros::{make_access_flags, make_name};
use crate::tree::attribute::{self, Attribute};
use crate::tree::class::ClassName;
use crate::tree::descriptor::ParsedMethodDescriptor;
use crate::tree::method::code::Code;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
	pub access: MethodAccess,
	pub name: MethodName,
	pub descriptor: MethodDescriptor,

	#[serde(default)]
	pub code: Option<Code>,
	/// The checked exceptions this method declares to throw.
	#[serde(default)]
	pub exceptions: Vec<ClassName>,

	#[serde(default)]
	pub attributes: Vec<Attribute>,
}

impl Method {
	pub fn new(access: MethodAccess, name: MethodName, descriptor: MethodDescriptor) -> Method {
		Method {
			access,
			name,
			descriptor,

			code: None,
			exceptions: Vec::new(),

			attributes: Vec::new(),
		}
	}

	pub fn with_code(mut self, code: Code) -> Method {
		self.code = Some(code);
		self
	}

	pub fn attribute(&self, name: &str) -> Option<&Attribute> {
		attribute::find(&self.attributes, name)
	}

	pub fn set_attribute(&mut self, attribute: Attribute) {
		attribute::set(&mut self.attributes, attribute)
	}

	pub fn remove_attribute(&mut self, name: &str) -> Option<Attribute> {
		attribute::remove(&mut self.attributes, name)
	}

	/// Returns how many local variable slots the parameters occupy, including `this` for instance methods.
	pub fn parameter_slots(&self) -> Result<u16> {
		let parameters = self.descriptor.parse()?.parameters.len();
		let this = if self.access.is_static { 0 } else { 1 };
		u16::try_from(parameters + this).map_err(Into::into)
	}
}

make_access_flags!(
	pub MethodAccess {
		is_public       = 0x0001 => "public",
		is_private      = 0x0002 => "private",
		is_protected    = 0x0004 => "protected",
		is_static       = 0x0008 => "static",
		is_final        = 0x0010 => "final",
		is_synchronized = 0x0020 => "synchronized",
		is_bridge       = 0x0040 => "bridge",
		is_varargs      = 0x0080 => "varargs",
		is_native       = 0x0100 => "native",
		is_abstract     = 0x0400 => "abstract",
		is_strict       = 0x0800 => "strict",
		is_synthetic    = 0x1000 => "synthetic",
	}
);

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct MethodRef {
	pub class: ClassName,
	pub name: MethodName,
	pub desc: MethodDescriptor,
}

impl MethodRef {
	pub fn new(class: ClassName, name: MethodName, desc: MethodDescriptor) -> MethodRef {
		MethodRef { class, name, desc }
	}
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct MethodNameAndDesc {
	pub name: MethodName,
	pub desc: MethodDescriptor,
}

make_name!(
	pub MethodName;
);

impl MethodName {
	fn check_valid(inner: &str) -> Result<()> {
		if super::names::is_method(inner) {
			Ok(())
		} else {
			bail!("invalid method name: must be `<init>`, `<clinit>` or non-empty and not contain any of `.`, `;`, `[`, `/`, `<` and `>`")
		}
	}

	pub fn init() -> MethodName {
		MethodName::new_unchecked("<init>")
	}

	pub fn clinit() -> MethodName {
		MethodName::new_unchecked("<clinit>")
	}

	pub fn is_init(&self) -> bool {
		self.0 == "<init>"
	}

	pub fn is_clinit(&self) -> bool {
		self.0 == "<clinit>"
	}
}

make_name!(
	/// A method descriptor like `(ILjava/lang/String;)V`.
	pub MethodDescriptor;
);

impl MethodDescriptor {
	fn check_valid(inner: &str) -> Result<()> {
		crate::tree::descriptor::parse_method_descriptor(inner).map(|_| ())
	}

	pub fn parse(&self) -> Result<ParsedMethodDescriptor> {
		crate::tree::descriptor::parse_method_descriptor(&self.0)
	}

	pub fn from_parsed(parsed: &ParsedMethodDescriptor) -> MethodDescriptor {
		MethodDescriptor(parsed.write())
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use anyhow::Result;
	use crate::tree::descriptor::Type;
	use crate::tree::method::{Method, MethodAccess, MethodDescriptor, MethodName};

	#[test]
	fn parameter_slots() -> Result<()> {
		let descriptor = MethodDescriptor::try_from("(IJLjava/lang/String;)V")?;

		let method = Method::new(MethodAccess::default(), MethodName::try_from("m")?, descriptor.clone());
		assert_eq!(method.parameter_slots()?, 4);

		let method = Method::new(MethodAccess { is_static: true, ..MethodAccess::default() }, MethodName::try_from("m")?, descriptor);
		assert_eq!(method.parameter_slots()?, 3);
		Ok(())
	}

	#[test]
	fn descriptor_parse() -> Result<()> {
		let parsed = MethodDescriptor::try_from("(I)Z")?.parse()?;
		assert_eq!(parsed.parameters, vec![Type::I]);
		assert_eq!(parsed.return_type, Some(Type::Z));
		assert_eq!(MethodDescriptor::from_parsed(&parsed), "(I)Z");

		assert!(MethodDescriptor::try_from("(I").is_err());
		Ok(())
	}

	#[test]
	fn special_names() {
		assert!(MethodName::init().is_init());
		assert!(MethodName::clinit().is_clinit());
		assert!(MethodName::try_from("<foo>").is_err());
	}
}
