//! Compiling and matching the patterns pointcuts are made of.
//!
//! Patterns use java source names: `void test.C.m(int, String)`, `int test.C.count`,
//! `test.Caller->test.C#void m(..)`. A `*` matches any part of a single name, `..` matches any number of packages or
//! parameters, a trailing `+` on a class matches all its subtypes. Well known types of `java.lang` and `java.util`
//! may be given by their simple name.

pub mod caller_side;
pub mod class;
pub mod member;

use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use anyhow::Result;
use crate::definition::PointcutKind;
use crate::metadata::{ClassMetaData, MemberMetaData};
use crate::pattern::caller_side::{CallerSidePattern, ThrowsPattern};
use crate::pattern::class::ClassPattern;
use crate::pattern::member::{ConstructorPattern, FieldPattern, MemberPattern, MethodPattern};

/// A compiled pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
	Class(ClassPattern),
	Method(MethodPattern),
	Constructor(ConstructorPattern),
	Field(FieldPattern),
	CallerSide(CallerSidePattern),
	Throws(ThrowsPattern),
}

impl Pattern {
	pub fn compile_class(source: &str) -> Result<Pattern> {
		Ok(Pattern::Class(ClassPattern::compile(source)?))
	}

	pub fn compile_method(source: &str) -> Result<Pattern> {
		Ok(Pattern::Method(MethodPattern::compile_in(source, None)?))
	}

	pub fn compile_constructor(source: &str) -> Result<Pattern> {
		Ok(Pattern::Constructor(ConstructorPattern::compile_in(source, None)?))
	}

	pub fn compile_field(source: &str) -> Result<Pattern> {
		Ok(Pattern::Field(FieldPattern::compile_in(source, None)?))
	}

	pub fn compile_caller_side(source: &str) -> Result<Pattern> {
		Ok(Pattern::CallerSide(CallerSidePattern::compile(source)?))
	}

	pub fn compile_throws(source: &str) -> Result<Pattern> {
		Ok(Pattern::Throws(ThrowsPattern::compile(source)?))
	}

	/// Compiles a method or constructor pattern, depending on the member name being `new`.
	fn compile_execution(source: &str) -> Result<Pattern> {
		Ok(match MemberPattern::compile_in(source, None)? {
			MemberPattern::Method(m) => Pattern::Method(m),
			MemberPattern::Constructor(c) => Pattern::Constructor(c),
		})
	}

	/// Checks if the pattern can match anything in the given class.
	///
	/// For call site patterns, the class is the one containing the call.
	pub fn could_match(&self, class: &ClassMetaData) -> bool {
		match self {
			Pattern::Class(c) => c.matches(class),
			Pattern::Method(m) => m.matches_class(class),
			Pattern::Constructor(c) => c.matches_class(class),
			Pattern::Field(f) => f.matches_class(class),
			Pattern::CallerSide(c) => c.matches_caller(class),
			Pattern::Throws(t) => t.matches_class(class),
		}
	}

	pub fn matches(&self, target: &MatchTarget<'_>) -> bool {
		match (self, target) {
			(Pattern::Class(pattern), MatchTarget::Class(class)) => pattern.matches(class),
			(Pattern::Method(pattern), MatchTarget::Member { class, member: MemberMetaData::Method(method) }) => {
				pattern.matches(class, method)
			},
			(Pattern::Constructor(pattern), MatchTarget::Member { class, member: MemberMetaData::Method(method) }) => {
				pattern.matches(class, method)
			},
			(Pattern::Field(pattern), MatchTarget::Member { class, member: MemberMetaData::Field(field) }) => {
				pattern.matches(class, field)
			},
			(Pattern::CallerSide(pattern), MatchTarget::Call { caller, class, member: MemberMetaData::Method(method) }) => {
				pattern.matches(caller, class, method)
			},
			(Pattern::Throws(pattern), MatchTarget::Throws { class, member: MemberMetaData::Method(method), exception }) => {
				pattern.matches(class, method, *exception)
			},
			_ => false,
		}
	}
}

/// What a pattern is matched against.
#[derive(Debug, Clone, Copy)]
pub enum MatchTarget<'a> {
	Class(&'a ClassMetaData),
	/// The execution of a method or constructor, or the access of a field.
	Member {
		class: &'a ClassMetaData,
		member: &'a MemberMetaData,
	},
	Call {
		caller: &'a ClassMetaData,
		class: &'a ClassMetaData,
		member: &'a MemberMetaData,
	},
	/// The exception is `None` before it's known, at weaving time.
	Throws {
		class: &'a ClassMetaData,
		member: &'a MemberMetaData,
		exception: Option<&'a ClassMetaData>,
	},
}

impl<'a> MatchTarget<'a> {
	/// Turns an execution target into the matching throws target.
	pub fn with_exception(self, exception: Option<&'a ClassMetaData>) -> MatchTarget<'a> {
		match self {
			MatchTarget::Member { class, member } | MatchTarget::Throws { class, member, .. } => {
				MatchTarget::Throws { class, member, exception }
			},
			other => other,
		}
	}
}

/// A compiled pattern together with the kind and source it was compiled from.
///
/// Two tuples are equal if they were compiled from the same source for the same kind.
#[derive(Debug, Clone)]
pub struct PointcutPatternTuple {
	kind: PointcutKind,
	source: String,
	pattern: Pattern,
}

impl PointcutPatternTuple {
	pub fn parse(kind: PointcutKind, source: &str) -> Result<PointcutPatternTuple> {
		let pattern = match kind {
			PointcutKind::Execution => Pattern::compile_execution(source)?,
			PointcutKind::Get | PointcutKind::Set => Pattern::compile_field(source)?,
			PointcutKind::Throws => Pattern::compile_throws(source)?,
			PointcutKind::Call | PointcutKind::Cflow => Pattern::compile_caller_side(source)?,
			PointcutKind::Class => Pattern::compile_class(source)?,
		};
		Ok(PointcutPatternTuple { kind, source: source.trim().to_owned(), pattern })
	}

	pub fn kind(&self) -> PointcutKind {
		self.kind
	}

	pub fn source(&self) -> &str {
		&self.source
	}

	pub fn pattern(&self) -> &Pattern {
		&self.pattern
	}

	pub fn matches(&self, target: &MatchTarget<'_>) -> bool {
		self.pattern.matches(target)
	}
}

impl PartialEq for PointcutPatternTuple {
	fn eq(&self, other: &Self) -> bool {
		self.kind == other.kind && self.source == other.source
	}
}

impl Eq for PointcutPatternTuple {}

impl Hash for PointcutPatternTuple {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.kind.hash(state);
		self.source.hash(state);
	}
}

impl Display for PointcutPatternTuple {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}({})", self.kind, self.source)
	}
}
