use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use crate::macros::{make_access_flags, make_name};
use crate::tree::attribute::{self, Attribute};
use crate::tree::field::{Field, FieldName};
use crate::tree::method::{Method, MethodDescriptor, MethodName};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassFile {
	pub access: ClassAccess,
	pub name: ClassName,
	pub super_class: Option<ClassName>,
	#[serde(default)]
	pub interfaces: Vec<ClassName>,

	#[serde(default)]
	pub fields: Vec<Field>,
	#[serde(default)]
	pub methods: Vec<Method>,

	#[serde(default)]
	pub attributes: Vec<Attribute>,
}

impl ClassFile {
	pub fn new(access: ClassAccess, name: ClassName, super_class: Option<ClassName>, interfaces: Vec<ClassName>) -> ClassFile {
		ClassFile {
			access,
			name,
			super_class,
			interfaces,

			fields: Vec::new(),
			methods: Vec::new(),

			attributes: Vec::new(),
		}
	}

	pub fn method(&self, name: &MethodName, descriptor: &MethodDescriptor) -> Option<&Method> {
		self.methods.iter().find(|m| &m.name == name && &m.descriptor == descriptor)
	}

	pub fn method_mut(&mut self, name: &MethodName, descriptor: &MethodDescriptor) -> Option<&mut Method> {
		self.methods.iter_mut().find(|m| &m.name == name && &m.descriptor == descriptor)
	}

	pub fn has_method(&self, name: &MethodName, descriptor: &MethodDescriptor) -> bool {
		self.method(name, descriptor).is_some()
	}

	/// Adds a method, failing if a method with the same name and descriptor already exists.
	pub fn add_method(&mut self, method: Method) -> Result<()> {
		if self.has_method(&method.name, &method.descriptor) {
			bail!("class {} already has a method {}{}", self.name, method.name, method.descriptor);
		}
		self.methods.push(method);
		Ok(())
	}

	pub fn field(&self, name: &FieldName) -> Option<&Field> {
		self.fields.iter().find(|f| &f.name == name)
	}

	/// Adds a field, failing if a field with the same name already exists.
	pub fn add_field(&mut self, field: Field) -> Result<()> {
		if self.field(&field.name).is_some() {
			bail!("class {} already has a field {}", self.name, field.name);
		}
		self.fields.push(field);
		Ok(())
	}

	pub fn add_interface(&mut self, interface: ClassName) -> bool {
		if self.interfaces.contains(&interface) {
			false
		} else {
			self.interfaces.push(interface);
			true
		}
	}

	pub fn attribute(&self, name: &str) -> Option<&Attribute> {
		attribute::find(&self.attributes, name)
	}

	pub fn set_attribute(&mut self, attribute: Attribute) {
		attribute::set(&mut self.attributes, attribute)
	}
}

make_access_flags!(
	pub ClassAccess {
		is_public     = 0x0001 => "public",
		is_final      = 0x0010 => "final",
		is_super      = 0x0020 => "super",
		is_interface  = 0x0200 => "interface",
		is_abstract   = 0x0400 => "abstract",
		is_synthetic  = 0x1000 => "synthetic",
		is_annotation = 0x2000 => "annotation",
		is_enum       = 0x4000 => "enum",
		is_module     = 0x8000 => "module",
	}
);

make_name!(
	/// A class name in its internal form, like `java/lang/Object`.
	///
	/// Use [`ClassName::java_name`] to get the name as written in java source code.
	pub ClassName;
);

impl ClassName {
	fn check_valid(inner: &str) -> Result<()> {
		if super::names::is_class(inner) {
			Ok(())
		} else {
			bail!("invalid class name: must be a `/` separated list of non-empty names not containing `.`, `;` and `[`, or an array descriptor")
		}
	}

	pub fn java_lang_object() -> ClassName {
		ClassName::new_unchecked("java/lang/Object")
	}

	pub fn java_lang_class() -> ClassName {
		ClassName::new_unchecked("java/lang/Class")
	}

	pub fn java_lang_string() -> ClassName {
		ClassName::new_unchecked("java/lang/String")
	}

	/// Converts a name as written in java source code, like `java.lang.Object`, into the internal form.
	pub fn from_java_name(java_name: &str) -> Result<ClassName> {
		ClassName::try_from(java_name.replace('.', "/"))
	}

	/// Returns the name as written in java source code, so `java.lang.Object` for `java/lang/Object`.
	pub fn java_name(&self) -> String {
		self.0.replace('/', ".")
	}

	/// Returns the package part of the name, in internal form (`java/lang` for `java/lang/Object`).
	pub fn package(&self) -> &str {
		self.0.rsplit_once('/').map_or("", |(package, _)| package)
	}

	pub fn simple_name(&self) -> &str {
		self.0.rsplit_once('/').map_or(&self.0, |(_, simple)| simple)
	}

	pub fn is_array(&self) -> bool {
		self.0.starts_with('[')
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use anyhow::Result;
	use crate::tree::class::{ClassAccess, ClassName};

	#[test]
	fn java_names() -> Result<()> {
		let name = ClassName::try_from("org/example/Foo$Bar")?;
		assert_eq!(name.java_name(), "org.example.Foo$Bar");
		assert_eq!(name.package(), "org/example");
		assert_eq!(name.simple_name(), "Foo$Bar");
		assert_eq!(ClassName::from_java_name("org.example.Foo$Bar")?, name);

		assert_eq!(ClassName::try_from("Foo")?.package(), "");
		assert!(ClassName::try_from("org.example.Foo").is_err());
		Ok(())
	}

	#[test]
	fn access_round_trip() {
		let access = ClassAccess { is_public: true, is_super: true, ..ClassAccess::default() };
		assert_eq!(u16::from(access), 0x0021);
		assert_eq!(ClassAccess::from(0x0021), access);
		assert!(ClassAccess::from(0x0200).is_interface);
	}
}
