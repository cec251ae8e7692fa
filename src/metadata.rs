//! What patterns match against: classes with their resolved super types, methods and fields described by
//! java source names.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use anyhow::Result;
use log::trace;
use shuttle::tree::class::{ClassFile, ClassName};
use shuttle::tree::field::{Field, FieldAccess, FieldDescriptor, FieldName};
use shuttle::tree::method::{Method, MethodAccess, MethodDescriptor, MethodName};
use shuttle::vm::ClassLoaderContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMetaData {
	name: ClassName,
	java_name: String,
	is_interface: bool,
	super_class: Option<Arc<ClassMetaData>>,
	interfaces: Vec<Arc<ClassMetaData>>,
}

impl ClassMetaData {
	/// Metadata of a class whose super types are unknown.
	pub fn unresolved(name: &ClassName) -> ClassMetaData {
		ClassMetaData {
			name: name.clone(),
			java_name: name.java_name(),
			is_interface: false,
			super_class: None,
			interfaces: Vec::new(),
		}
	}

	pub fn name(&self) -> &ClassName {
		&self.name
	}

	/// The name as written in java source code, like `java.lang.Object`.
	pub fn java_name(&self) -> &str {
		&self.java_name
	}

	pub fn is_interface(&self) -> bool {
		self.is_interface
	}

	pub fn super_class(&self) -> Option<&Arc<ClassMetaData>> {
		self.super_class.as_ref()
	}

	pub fn interfaces(&self) -> &[Arc<ClassMetaData>] {
		&self.interfaces
	}

	/// Calls `f` with this class and every class and interface it extends or implements, until `f` returns `true`.
	pub fn any_supertype(&self, f: &mut impl FnMut(&ClassMetaData) -> bool) -> bool {
		f(self) ||
			self.super_class.as_ref().is_some_and(|s| s.any_supertype(f)) ||
			self.interfaces.iter().any(|i| i.any_supertype(f))
	}

	pub fn is_subtype_of(&self, java_name: &str) -> bool {
		self.any_supertype(&mut |c| c.java_name == java_name)
	}
}

/// Resolves [`ClassMetaData`] from the classes a class loader sees, remembering what it resolved.
pub struct MetaDataResolver<'a> {
	context: &'a dyn ClassLoaderContext,
	resolved: HashMap<ClassName, Arc<ClassMetaData>>,
}

impl<'a> MetaDataResolver<'a> {
	pub fn new(context: &'a dyn ClassLoaderContext) -> MetaDataResolver<'a> {
		MetaDataResolver { context, resolved: HashMap::new() }
	}

	pub fn context(&self) -> &'a dyn ClassLoaderContext {
		self.context
	}

	pub fn resolve(&mut self, name: &ClassName) -> Arc<ClassMetaData> {
		if let Some(resolved) = self.resolved.get(name) {
			return resolved.clone();
		}
		let metadata = match self.context.find_class_file(name) {
			Some(class) => self.build(&class, 0),
			None => {
				trace!("class {name} not visible to class loader {}, its super types are unknown", self.context.id());
				ClassMetaData::unresolved(name)
			},
		};
		let metadata = Arc::new(metadata);
		self.resolved.insert(name.clone(), metadata.clone());
		metadata
	}

	/// Resolves the metadata of a class given as a class file, which may differ from what the class loader sees.
	pub fn resolve_class_file(&mut self, class: &ClassFile) -> Arc<ClassMetaData> {
		Arc::new(self.build(class, 0))
	}

	fn build(&mut self, class: &ClassFile, depth: usize) -> ClassMetaData {
		// a cyclic hierarchy is malformed, but shouldn't hang us
		const MAX_DEPTH: usize = 64;

		let mut metadata = ClassMetaData::unresolved(&class.name);
		metadata.is_interface = class.access.is_interface;
		if depth >= MAX_DEPTH {
			return metadata;
		}
		metadata.super_class = class.super_class.as_ref().map(|s| self.resolve_at(s, depth + 1));
		metadata.interfaces = class.interfaces.iter().map(|i| self.resolve_at(i, depth + 1)).collect();
		metadata
	}

	fn resolve_at(&mut self, name: &ClassName, depth: usize) -> Arc<ClassMetaData> {
		if let Some(resolved) = self.resolved.get(name) {
			return resolved.clone();
		}
		let metadata = match self.context.find_class_file(name) {
			Some(class) => self.build(&class, depth),
			None => ClassMetaData::unresolved(name),
		};
		let metadata = Arc::new(metadata);
		self.resolved.insert(name.clone(), metadata.clone());
		metadata
	}

	/// Finds a method in the class or its super classes, returning the class declaring it too.
	pub fn find_method(&self, class: &ClassName, name: &MethodName, descriptor: &MethodDescriptor) -> Option<(ClassName, Method)> {
		let mut current = Some(class.clone());
		let mut depth = 0;
		while let Some(class_name) = current {
			let class = self.context.find_class_file(&class_name)?;
			if let Some(method) = class.method(name, descriptor) {
				return Some((class_name, method.clone()));
			}
			current = class.super_class;
			depth += 1;
			if depth > 64 {
				return None;
			}
		}
		None
	}

	pub fn find_field(&self, class: &ClassName, name: &FieldName) -> Option<(ClassName, Field)> {
		let mut current = Some(class.clone());
		let mut depth = 0;
		while let Some(class_name) = current {
			let class = self.context.find_class_file(&class_name)?;
			if let Some(field) = class.field(name) {
				return Some((class_name, field.clone()));
			}
			current = class.super_class;
			depth += 1;
			if depth > 64 {
				return None;
			}
		}
		None
	}
}

/// A method or constructor, described the way patterns see it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodMetaData {
	name: MethodName,
	descriptor: MethodDescriptor,
	parameter_types: Vec<String>,
	return_type: String,
	modifiers: MethodAccess,
	exceptions: Vec<ClassName>,
}

impl MethodMetaData {
	pub fn new(name: MethodName, descriptor: MethodDescriptor, modifiers: MethodAccess, exceptions: Vec<ClassName>) -> Result<MethodMetaData> {
		let parsed = descriptor.parse()?;
		Ok(MethodMetaData {
			parameter_types: parsed.parameter_java_names(),
			return_type: parsed.return_java_name(),
			name,
			descriptor,
			modifiers,
			exceptions,
		})
	}

	pub fn from_method(method: &Method) -> Result<MethodMetaData> {
		MethodMetaData::new(method.name.clone(), method.descriptor.clone(), method.access, method.exceptions.clone())
	}

	pub fn name(&self) -> &MethodName {
		&self.name
	}

	pub fn descriptor(&self) -> &MethodDescriptor {
		&self.descriptor
	}

	/// The java source names of the parameter types, like `int` or `java.lang.String[]`.
	pub fn parameter_types(&self) -> &[String] {
		&self.parameter_types
	}

	/// The java source name of the return type, `void` if there's none.
	pub fn return_type(&self) -> &str {
		&self.return_type
	}

	pub fn modifiers(&self) -> MethodAccess {
		self.modifiers
	}

	pub fn exceptions(&self) -> &[ClassName] {
		&self.exceptions
	}

	pub fn is_constructor(&self) -> bool {
		self.name.is_init()
	}

	pub fn is_static(&self) -> bool {
		self.modifiers.is_static
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldMetaData {
	name: FieldName,
	descriptor: FieldDescriptor,
	type_name: String,
	modifiers: FieldAccess,
}

impl FieldMetaData {
	pub fn new(name: FieldName, descriptor: FieldDescriptor, modifiers: FieldAccess) -> Result<FieldMetaData> {
		let type_name = descriptor.parse()?.java_name();
		Ok(FieldMetaData { name, descriptor, type_name, modifiers })
	}

	pub fn from_field(field: &Field) -> Result<FieldMetaData> {
		FieldMetaData::new(field.name.clone(), field.descriptor.clone(), field.access)
	}

	pub fn name(&self) -> &FieldName {
		&self.name
	}

	pub fn descriptor(&self) -> &FieldDescriptor {
		&self.descriptor
	}

	/// The java source name of the type of the field.
	pub fn type_name(&self) -> &str {
		&self.type_name
	}

	pub fn modifiers(&self) -> FieldAccess {
		self.modifiers
	}

	pub fn is_static(&self) -> bool {
		self.modifiers.is_static
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberMetaData {
	Method(MethodMetaData),
	Field(FieldMetaData),
}

impl MemberMetaData {
	pub fn name(&self) -> &str {
		match self {
			MemberMetaData::Method(m) => m.name.as_str(),
			MemberMetaData::Field(f) => f.name.as_str(),
		}
	}

	pub fn as_method(&self) -> Option<&MethodMetaData> {
		match self {
			MemberMetaData::Method(m) => Some(m),
			MemberMetaData::Field(_) => None,
		}
	}

	pub fn as_field(&self) -> Option<&FieldMetaData> {
		match self {
			MemberMetaData::Field(f) => Some(f),
			MemberMetaData::Method(_) => None,
		}
	}

	/// A string identifying the member within its class, like `m(I)V` or `count:I`.
	pub fn key(&self) -> String {
		match self {
			MemberMetaData::Method(m) => format!("{}{}", m.name, m.descriptor),
			MemberMetaData::Field(f) => format!("{}:{}", f.name, f.descriptor),
		}
	}
}

impl Display for MemberMetaData {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			MemberMetaData::Method(m) => write!(f, "{} {}({})", m.return_type, m.name, m.parameter_types.join(",")),
			MemberMetaData::Field(field) => write!(f, "{} {}", field.type_name, field.name),
		}
	}
}
