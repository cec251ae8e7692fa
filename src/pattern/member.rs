use std::fmt::{Debug, Formatter};
use anyhow::{bail, Context, Result};
use regex::Regex;
use crate::metadata::{ClassMetaData, FieldMetaData, MethodMetaData};
use crate::pattern::class::{ClassPattern, TypePattern, WILDCARD};

/// A pattern for the simple name of a method or field.
#[derive(Clone)]
pub struct NamePattern {
	source: String,
	regex: Option<Regex>,
}

impl NamePattern {
	pub fn compile(source: &str) -> Result<NamePattern> {
		if source.is_empty() {
			bail!("member name pattern is empty");
		}
		if source == "*" {
			return Ok(NamePattern { source: source.to_owned(), regex: None });
		}
		let mut regex = String::from("^");
		for c in source.chars() {
			match c {
				'*' => regex.push_str(WILDCARD),
				'$' => regex.push_str(r"\$"),
				c if c.is_ascii_alphanumeric() || c == '_' => regex.push(c),
				c => bail!("unexpected character {c:?} in member name pattern {source:?}"),
			}
		}
		regex.push('$');
		Ok(NamePattern { source: source.to_owned(), regex: Some(Regex::new(&regex)?) })
	}

	/// Never matches the special names `<init>` and `<clinit>`.
	pub fn matches(&self, name: &str) -> bool {
		!name.starts_with('<') && self.regex.as_ref().map_or(true, |regex| regex.is_match(name))
	}
}

impl Debug for NamePattern {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "NamePattern({:?})", self.source)
	}
}

#[derive(Debug, Clone)]
pub enum ParameterPattern {
	/// `*`, exactly one parameter of any type.
	Single,
	/// `..`, any number of parameters from here on.
	Rest,
	Type(TypePattern),
}

impl ParameterPattern {
	fn compile_list(source: &str) -> Result<Vec<ParameterPattern>> {
		let source = source.trim();
		if source.is_empty() {
			return Ok(Vec::new());
		}
		source.split(',')
			.map(str::trim)
			.map(|p| match p {
				"" => bail!("empty parameter pattern"),
				"*" => Ok(ParameterPattern::Single),
				".." => Ok(ParameterPattern::Rest),
				p => Ok(ParameterPattern::Type(TypePattern::compile(p)?)),
			})
			.collect()
	}
}

fn matches_parameters(patterns: &[ParameterPattern], types: &[String]) -> bool {
	if types.is_empty() {
		return patterns.first().map_or(true, |first| matches!(first, ParameterPattern::Rest));
	}
	if patterns.len() > types.len() {
		return false;
	}
	for (pattern, t) in patterns.iter().zip(types) {
		match pattern {
			ParameterPattern::Rest => return true,
			ParameterPattern::Single => {},
			ParameterPattern::Type(pattern) => if !pattern.matches(t) {
				return false;
			},
		}
	}
	patterns.len() == types.len()
}

/// The parts of a member pattern like `void test..*.get*(int, ..)`.
struct Parts<'a> {
	/// The text before the first space, the return or field type.
	type_part: Option<&'a str>,
	class_part: Option<&'a str>,
	name: &'a str,
	parameters: Option<&'a str>,
}

impl<'a> Parts<'a> {
	fn split(source: &'a str) -> Result<Parts<'a>> {
		let source = source.trim();
		let (head, parameters) = match source.find('(') {
			Some(open) => {
				let Some(close) = source.rfind(')') else {
					bail!("missing `)`");
				};
				if close < open {
					bail!("`)` before `(`");
				}
				if !source[close + 1..].trim().is_empty() {
					bail!("unexpected text after `)`");
				}
				(source[..open].trim(), Some(&source[open + 1..close]))
			},
			None => (source, None),
		};
		let (type_part, qualified) = match head.split_once(' ') {
			Some((type_part, qualified)) => (Some(type_part.trim()), qualified.trim()),
			None => (None, head),
		};
		let (class_part, name) = match qualified.rsplit_once('.') {
			Some((class_part, name)) => (Some(class_part), name),
			None => (None, qualified),
		};
		if name.is_empty() {
			bail!("missing member name");
		}
		Ok(Parts { type_part, class_part, name, parameters })
	}

	/// Compiles the class part, or the class given instead if the pattern has none.
	fn class(&self, class: Option<&str>) -> Result<ClassPattern> {
		match (self.class_part, class) {
			(Some(_), Some(_)) => bail!("the declaring class is given twice"),
			(Some(c), None) | (None, Some(c)) => ClassPattern::compile(c),
			(None, None) => ClassPattern::compile("*"),
		}
	}
}

/// A pattern for methods, like `int test.C.get*(..)`.
#[derive(Debug, Clone)]
pub struct MethodPattern {
	class: ClassPattern,
	return_type: TypePattern,
	name: NamePattern,
	parameters: Vec<ParameterPattern>,
}

impl MethodPattern {
	pub(super) fn compile_in(source: &str, class: Option<&str>) -> Result<MethodPattern> {
		let parts = Parts::split(source)?;
		let Some(parameters) = parts.parameters else {
			bail!("missing parameter list");
		};
		let Some(return_type) = parts.type_part else {
			bail!("missing return type");
		};
		Ok(MethodPattern {
			class: parts.class(class)?,
			return_type: TypePattern::compile(return_type).context("in the return type")?,
			name: NamePattern::compile(parts.name)?,
			parameters: ParameterPattern::compile_list(parameters).context("in the parameters")?,
		})
	}

	pub fn matches_class(&self, class: &ClassMetaData) -> bool {
		self.class.matches(class)
	}

	pub fn matches(&self, class: &ClassMetaData, method: &MethodMetaData) -> bool {
		self.name.matches(method.name().as_str()) &&
			self.return_type.matches(method.return_type()) &&
			matches_parameters(&self.parameters, method.parameter_types()) &&
			self.class.matches(class)
	}
}

/// A pattern for constructors, like `test.C.new(int)`. A return type may be given, but is ignored.
#[derive(Debug, Clone)]
pub struct ConstructorPattern {
	class: ClassPattern,
	parameters: Vec<ParameterPattern>,
}

impl ConstructorPattern {
	pub(super) fn compile_in(source: &str, class: Option<&str>) -> Result<ConstructorPattern> {
		let parts = Parts::split(source)?;
		if parts.name != "new" {
			bail!("constructor patterns must use the name `new`, got {:?}", parts.name);
		}
		let Some(parameters) = parts.parameters else {
			bail!("missing parameter list");
		};
		Ok(ConstructorPattern {
			class: parts.class(class)?,
			parameters: ParameterPattern::compile_list(parameters).context("in the parameters")?,
		})
	}

	pub fn matches_class(&self, class: &ClassMetaData) -> bool {
		self.class.matches(class)
	}

	pub fn matches(&self, class: &ClassMetaData, method: &MethodMetaData) -> bool {
		method.is_constructor() &&
			matches_parameters(&self.parameters, method.parameter_types()) &&
			self.class.matches(class)
	}
}

/// A method or a constructor pattern, depending on whether the member name is `new`.
#[derive(Debug, Clone)]
pub enum MemberPattern {
	Method(MethodPattern),
	Constructor(ConstructorPattern),
}

impl MemberPattern {
	pub(super) fn compile_in(source: &str, class: Option<&str>) -> Result<MemberPattern> {
		if Parts::split(source)?.name == "new" {
			Ok(MemberPattern::Constructor(ConstructorPattern::compile_in(source, class)?))
		} else {
			Ok(MemberPattern::Method(MethodPattern::compile_in(source, class)?))
		}
	}

	pub fn matches_class(&self, class: &ClassMetaData) -> bool {
		match self {
			MemberPattern::Method(m) => m.matches_class(class),
			MemberPattern::Constructor(c) => c.matches_class(class),
		}
	}

	pub fn matches(&self, class: &ClassMetaData, method: &MethodMetaData) -> bool {
		match self {
			MemberPattern::Method(m) => m.matches(class, method),
			MemberPattern::Constructor(c) => c.matches(class, method),
		}
	}
}

/// A pattern for fields, like `int test.C.count`.
#[derive(Debug, Clone)]
pub struct FieldPattern {
	class: ClassPattern,
	field_type: TypePattern,
	name: NamePattern,
}

impl FieldPattern {
	pub(super) fn compile_in(source: &str, class: Option<&str>) -> Result<FieldPattern> {
		let parts = Parts::split(source)?;
		if parts.parameters.is_some() {
			bail!("field patterns have no parameter list");
		}
		let Some(field_type) = parts.type_part else {
			bail!("missing field type");
		};
		Ok(FieldPattern {
			class: parts.class(class)?,
			field_type: TypePattern::compile(field_type).context("in the field type")?,
			name: NamePattern::compile(parts.name)?,
		})
	}

	pub fn matches_class(&self, class: &ClassMetaData) -> bool {
		self.class.matches(class)
	}

	pub fn matches(&self, class: &ClassMetaData, field: &FieldMetaData) -> bool {
		self.name.matches(field.name().as_str()) &&
			self.field_type.matches(field.type_name()) &&
			self.class.matches(class)
	}
}

#[cfg(test)]
mod testing {
	use anyhow::Result;
	use crate::pattern::member::{matches_parameters, ParameterPattern, Parts};

	fn params(pattern: &str, types: &[&str]) -> Result<bool> {
		let patterns = ParameterPattern::compile_list(pattern)?;
		let types: Vec<String> = types.iter().map(|t| t.to_string()).collect();
		Ok(matches_parameters(&patterns, &types))
	}

	#[test]
	fn parameter_lists() -> Result<()> {
		assert!(params("..", &[])?);
		assert!(params("..", &["int"])?);
		assert!(params("..", &["int", "java.lang.String"])?);

		assert!(params("*", &["int"])?);
		assert!(!params("*", &[])?);
		assert!(!params("*", &["int", "int"])?);

		assert!(params("*, int", &["java.lang.String", "int"])?);
		assert!(!params("*, int", &["java.lang.String", "long"])?);

		assert!(params("int, ..", &["int", "long", "long"])?);
		// more patterns than parameters never match, even if the last one is `..`
		assert!(!params("int, ..", &["int"])?);

		assert!(params("String[]", &["java.lang.String[]"])?);
		assert!(params("", &[])?);
		assert!(!params("", &["int"])?);
		Ok(())
	}

	#[test]
	fn splitting() -> Result<()> {
		let parts = Parts::split("void test.C.m(int)")?;
		assert_eq!(parts.type_part, Some("void"));
		assert_eq!(parts.class_part, Some("test.C"));
		assert_eq!(parts.name, "m");
		assert_eq!(parts.parameters, Some("int"));

		let parts = Parts::split("int count")?;
		assert_eq!(parts.type_part, Some("int"));
		assert_eq!(parts.class_part, None);
		assert_eq!(parts.name, "count");
		assert_eq!(parts.parameters, None);

		assert!(Parts::split("void m(int").is_err());
		assert!(Parts::split("void m(int) x").is_err());
		assert!(Parts::split("void test.C.(int)").is_err());
		Ok(())
	}
}
