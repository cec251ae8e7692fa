//! Field and method descriptors, parsed into [`Type`]s.

use std::fmt::{Display, Formatter};
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use crate::tree::class::ClassName;

/// The type of a value, as given by a field descriptor.
///
/// ```
/// use shuttle::tree::descriptor::Type;
///
/// let ints = Type::array(2, Type::I);
/// assert_eq!(ints.java_name(), "int[][]");
/// assert_eq!(ints.to_string(), "[[I");
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Type {
	/// `byte`
	B,
	/// `char`
	C,
	/// `double`
	D,
	/// `float`
	F,
	/// `int`
	I,
	/// `long`
	J,
	/// `short`
	S,
	/// `boolean`
	Z,
	Object(ClassName),
	/// The dimension and the element type, which is never an array itself.
	Array(u8, Box<Type>),
}

impl Type {
	/// Creates an array type, flattening arrays of arrays.
	pub fn array(dimension: u8, element: Type) -> Type {
		match element {
			Type::Array(inner, element) => Type::Array(dimension.saturating_add(inner), element),
			element => Type::Array(dimension, Box::new(element)),
		}
	}

	pub fn is_primitive(&self) -> bool {
		!matches!(self, Type::Object(_) | Type::Array(..))
	}

	fn primitive_name(&self) -> Option<&'static str> {
		Some(match self {
			Type::B => "byte",
			Type::C => "char",
			Type::D => "double",
			Type::F => "float",
			Type::I => "int",
			Type::J => "long",
			Type::S => "short",
			Type::Z => "boolean",
			Type::Object(_) | Type::Array(..) => return None,
		})
	}

	/// The name of the type as written in java source code, like `int`, `java.lang.String` or `long[][]`.
	pub fn java_name(&self) -> String {
		match self {
			Type::Object(class) => class.java_name(),
			Type::Array(dimension, element) => element.java_name() + &"[]".repeat(usize::from(*dimension)),
			primitive => primitive.primitive_name().unwrap_or_default().to_owned(),
		}
	}

	/// The class an object of this type has at runtime, for `checkcast` and `Class.forName`.
	pub fn class_name(&self) -> Option<ClassName> {
		match self {
			Type::Object(class) => Some(class.clone()),
			Type::Array(..) => Some(ClassName::new_unchecked(self.to_string())),
			_ => None,
		}
	}
}

/// Writes the field descriptor of the type.
impl Display for Type {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Type::B => f.write_str("B"),
			Type::C => f.write_str("C"),
			Type::D => f.write_str("D"),
			Type::F => f.write_str("F"),
			Type::I => f.write_str("I"),
			Type::J => f.write_str("J"),
			Type::S => f.write_str("S"),
			Type::Z => f.write_str("Z"),
			Type::Object(class) => write!(f, "L{};", class.as_str()),
			Type::Array(dimension, element) => write!(f, "{}{element}", "[".repeat(usize::from(*dimension))),
		}
	}
}

/// Reads types from the front of a descriptor.
struct Reader<'a> {
	rest: &'a str,
}

impl Reader<'_> {
	fn eat(&mut self, c: char) -> bool {
		match self.rest.strip_prefix(c) {
			Some(rest) => {
				self.rest = rest;
				true
			},
			None => false,
		}
	}

	fn finish(&self) -> Result<()> {
		if !self.rest.is_empty() {
			bail!("unexpected {:?} at the end", self.rest);
		}
		Ok(())
	}

	fn read_type(&mut self) -> Result<Type> {
		let mut dimension: u8 = 0;
		while self.eat('[') {
			dimension = dimension.checked_add(1).ok_or_else(|| anyhow!("more than 255 array dimensions"))?;
		}

		let mut chars = self.rest.chars();
		let element = match chars.next() {
			Some('B') => Type::B,
			Some('C') => Type::C,
			Some('D') => Type::D,
			Some('F') => Type::F,
			Some('I') => Type::I,
			Some('J') => Type::J,
			Some('S') => Type::S,
			Some('Z') => Type::Z,
			Some('L') => {
				let Some((name, rest)) = chars.as_str().split_once(';') else {
					bail!("missing `;` after class name");
				};
				let class = ClassName::try_from(name)?;
				if class.is_array() {
					bail!("class name {name:?} in `L...;` must not be an array");
				}
				self.rest = rest;
				return Ok(if dimension == 0 { Type::Object(class) } else { Type::Array(dimension, Box::new(Type::Object(class))) });
			},
			Some(c) => bail!("unexpected {c:?}"),
			None => bail!("descriptor ends early"),
		};
		self.rest = chars.as_str();
		Ok(if dimension == 0 { element } else { Type::Array(dimension, Box::new(element)) })
	}
}

pub(crate) fn parse_field_descriptor(s: &str) -> Result<Type> {
	let mut reader = Reader { rest: s };
	let parsed = reader.read_type()?;
	reader.finish()?;
	Ok(parsed)
}

/// The parameter and return types of a method descriptor.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ParsedMethodDescriptor {
	pub parameters: Vec<Type>,
	/// `None` for `void`.
	pub return_type: Option<Type>,
}

impl ParsedMethodDescriptor {
	pub fn write(&self) -> String {
		let parameters: String = self.parameters.iter().map(Type::to_string).collect();
		let return_type = self.return_type.as_ref().map_or_else(|| "V".to_owned(), Type::to_string);
		format!("({parameters}){return_type}")
	}

	pub fn parameter_java_names(&self) -> Vec<String> {
		self.parameters.iter().map(Type::java_name).collect()
	}

	/// `void` for no return value.
	pub fn return_java_name(&self) -> String {
		self.return_type.as_ref().map_or_else(|| "void".to_owned(), Type::java_name)
	}
}

pub(crate) fn parse_method_descriptor(s: &str) -> Result<ParsedMethodDescriptor> {
	let mut reader = Reader { rest: s };
	if !reader.eat('(') {
		bail!("method descriptor {s:?} doesn't start with `(`");
	}
	let mut parameters = Vec::new();
	while !reader.eat(')') {
		let parameter = reader.read_type()
			.with_context(|| anyhow!("in parameter {} of method descriptor {s:?}", parameters.len()))?;
		parameters.push(parameter);
	}
	let return_type = if reader.eat('V') {
		None
	} else {
		Some(reader.read_type().with_context(|| anyhow!("in the return type of method descriptor {s:?}"))?)
	};
	reader.finish().with_context(|| anyhow!("in method descriptor {s:?}"))?;
	Ok(ParsedMethodDescriptor { parameters, return_type })
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use anyhow::Result;
	use crate::tree::class::ClassName;
	use crate::tree::descriptor::{parse_field_descriptor, parse_method_descriptor, Type};

	fn string() -> Type {
		Type::Object(ClassName::java_lang_string())
	}

	#[test]
	fn fields() -> Result<()> {
		assert_eq!(parse_field_descriptor("J")?, Type::J);
		assert_eq!(parse_field_descriptor("Ljava/lang/String;")?, string());
		assert_eq!(parse_field_descriptor("[[Z")?, Type::array(2, Type::Z));
		assert_eq!(parse_field_descriptor("[Ljava/lang/String;")?, Type::array(1, string()));
		assert_eq!(Type::array(1, Type::array(2, Type::I)), Type::array(3, Type::I));

		for invalid in ["", "V", "[V", "()V", "L;", "Ljava/lang/String", "L[I;", "II"] {
			assert!(parse_field_descriptor(invalid).is_err(), "{invalid:?} should be invalid");
		}
		Ok(())
	}

	#[test]
	fn methods() -> Result<()> {
		let parsed = parse_method_descriptor("(J[ILjava/lang/String;)Ljava/lang/Object;")?;
		assert_eq!(parsed.parameters, vec![Type::J, Type::array(1, Type::I), string()]);
		assert_eq!(parsed.return_type, Some(Type::Object(ClassName::java_lang_object())));
		assert_eq!(parsed.write(), "(J[ILjava/lang/String;)Ljava/lang/Object;");
		assert_eq!(parsed.parameter_java_names(), vec!["long", "int[]", "java.lang.String"]);
		assert_eq!(parsed.return_java_name(), "java.lang.Object");

		let parsed = parse_method_descriptor("()V")?;
		assert_eq!(parsed.write(), "()V");
		assert_eq!(parsed.return_java_name(), "void");

		for invalid in ["", "(", "(I", "(V)I", "()", "(I)[V", "V()", "(I)VV"] {
			assert!(parse_method_descriptor(invalid).is_err(), "{invalid:?} should be invalid");
		}
		Ok(())
	}

	#[test]
	fn runtime_classes() {
		assert_eq!(Type::Z.class_name(), None);
		assert_eq!(string().class_name(), Some(ClassName::java_lang_string()));
		assert_eq!(Type::array(2, Type::D).class_name().map(ClassName::into_inner), Some("[[D".to_owned()));
	}
}
