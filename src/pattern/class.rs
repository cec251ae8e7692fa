use std::fmt::{Debug, Display, Formatter};
use anyhow::{bail, Result};
use regex::Regex;
use crate::metadata::ClassMetaData;

/// What a `*` stands for: any part of a single name.
pub(super) const WILDCARD: &str = "[A-Za-z0-9_$]*";
/// What a `..` between two names stands for: any number of packages, including none.
const PACKAGES: &str = r"\.(?:[A-Za-z0-9_$]+\.)*";

const JAVA_LANG: [&str; 27] = [
	"Object", "String", "Class", "Integer", "Long", "Short", "Byte", "Character", "Boolean", "Float", "Double",
	"Number", "Void", "Throwable", "Exception", "RuntimeException", "Error", "Thread", "Runnable", "StringBuffer",
	"StringBuilder", "Math", "System", "Iterable", "Comparable", "CharSequence", "ClassLoader",
];
const JAVA_UTIL: [&str; 19] = [
	"List", "Map", "Set", "Collection", "Iterator", "ArrayList", "LinkedList", "HashMap", "HashSet", "TreeMap",
	"TreeSet", "Vector", "Hashtable", "Enumeration", "Properties", "Stack", "SortedMap", "SortedSet", "Date",
];

/// Expands the simple names of well known `java.lang` and `java.util` types to their full names, keeping any array
/// suffix.
pub fn expand_abbreviation(name: &str) -> String {
	let base = name.trim_end_matches("[]");
	let suffix = &name[base.len()..];
	if JAVA_LANG.contains(&base) {
		format!("java.lang.{base}{suffix}")
	} else if JAVA_UTIL.contains(&base) {
		format!("java.util.{base}{suffix}")
	} else {
		name.to_owned()
	}
}

/// Translates a wildcard type pattern into an anchored regular expression.
fn translate(pattern: &str) -> Result<String> {
	let mut regex = String::from("^");
	let mut chars = pattern.chars().peekable();
	while let Some(c) = chars.next() {
		match c {
			'*' => regex.push_str(WILDCARD),
			'.' if chars.peek() == Some(&'.') => {
				chars.next();
				if regex.len() == 1 {
					bail!("`..` must follow a package name");
				}
				regex.push_str(PACKAGES);
			},
			'.' => regex.push_str(r"\."),
			'$' => regex.push_str(r"\$"),
			'[' => {
				if chars.next() != Some(']') {
					bail!("`[` must be followed by `]`");
				}
				regex.push_str(r"\[\]");
			},
			c if c.is_ascii_alphanumeric() || c == '_' => regex.push(c),
			c => bail!("unexpected character {c:?}"),
		}
	}
	regex.push('$');
	Ok(regex)
}

/// A pattern for a type name as written in java source code, like `java.util.*`, `com..Foo` or `int[]`.
#[derive(Clone)]
pub struct TypePattern {
	source: String,
	/// `None` if the pattern matches every type.
	regex: Option<Regex>,
}

impl TypePattern {
	pub fn compile(source: &str) -> Result<TypePattern> {
		let source = source.trim();
		if source.is_empty() {
			bail!("type pattern is empty");
		}
		if source == "*" || source == ".." {
			return Ok(TypePattern { source: source.to_owned(), regex: None });
		}
		let expanded = expand_abbreviation(source);
		let regex = Regex::new(&translate(&expanded)?)?;
		Ok(TypePattern { source: source.to_owned(), regex: Some(regex) })
	}

	pub fn source(&self) -> &str {
		&self.source
	}

	pub fn matches_all(&self) -> bool {
		self.regex.is_none()
	}

	pub fn matches(&self, java_name: &str) -> bool {
		self.regex.as_ref().map_or(true, |regex| regex.is_match(java_name))
	}
}

impl PartialEq for TypePattern {
	fn eq(&self, other: &Self) -> bool {
		self.source == other.source
	}
}

impl Eq for TypePattern {}

impl Debug for TypePattern {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "TypePattern({:?})", self.source)
	}
}

impl Display for TypePattern {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.source)
	}
}

/// A pattern for classes. A trailing `+` makes it match every subtype of the matching classes as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassPattern {
	types: TypePattern,
	hierarchical: bool,
}

impl ClassPattern {
	pub fn compile(source: &str) -> Result<ClassPattern> {
		let source = source.trim();
		let (source, hierarchical) = match source.strip_suffix('+') {
			Some(stripped) => (stripped, true),
			None => (source, false),
		};
		let types = TypePattern::compile(source)?;
		Ok(ClassPattern { types, hierarchical })
	}

	pub fn is_hierarchical(&self) -> bool {
		self.hierarchical
	}

	pub fn matches_all(&self) -> bool {
		self.types.matches_all()
	}

	pub fn matches(&self, class: &ClassMetaData) -> bool {
		if self.hierarchical {
			class.any_supertype(&mut |c| self.types.matches(c.java_name()))
		} else {
			self.types.matches(class.java_name())
		}
	}

	/// Matches only the given name, ignoring the hierarchy.
	pub fn matches_name(&self, java_name: &str) -> bool {
		self.types.matches(java_name)
	}
}

impl Display for ClassPattern {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}{}", self.types, if self.hierarchical { "+" } else { "" })
	}
}
