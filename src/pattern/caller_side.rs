use anyhow::{bail, Context, Result};
use crate::metadata::{ClassMetaData, MethodMetaData};
use crate::pattern::class::ClassPattern;
use crate::pattern::member::MemberPattern;

/// A pattern for call sites: `caller->callee class#member` or `caller->member with its class`.
///
/// The caller part may be left out, it then matches every caller.
#[derive(Debug, Clone)]
pub struct CallerSidePattern {
	caller: ClassPattern,
	callee: MemberPattern,
}

impl CallerSidePattern {
	pub(super) fn compile(source: &str) -> Result<CallerSidePattern> {
		let (caller, callee) = match source.split_once("->") {
			Some((caller, callee)) => (caller.trim(), callee.trim()),
			None => ("*", source.trim()),
		};
		if caller.is_empty() {
			bail!("caller class pattern is empty");
		}
		let caller = ClassPattern::compile(caller).context("in the caller class")?;
		let callee = match callee.split_once('#') {
			Some((class, member)) => MemberPattern::compile_in(member, Some(class.trim()))?,
			None => MemberPattern::compile_in(callee, None)?,
		};
		Ok(CallerSidePattern { caller, callee })
	}

	pub fn matches_caller(&self, caller: &ClassMetaData) -> bool {
		self.caller.matches(caller)
	}

	pub fn matches(&self, caller: &ClassMetaData, callee_class: &ClassMetaData, callee: &MethodMetaData) -> bool {
		self.caller.matches(caller) && self.callee.matches(callee_class, callee)
	}
}

/// A pattern for exceptions leaving a method: `method pattern#exception class pattern`.
#[derive(Debug, Clone)]
pub struct ThrowsPattern {
	method: MemberPattern,
	exception: ClassPattern,
}

impl ThrowsPattern {
	pub(super) fn compile(source: &str) -> Result<ThrowsPattern> {
		let Some((method, exception)) = source.rsplit_once('#') else {
			bail!("missing `#` before the exception class pattern");
		};
		Ok(ThrowsPattern {
			method: MemberPattern::compile_in(method, None)?,
			exception: ClassPattern::compile(exception).context("in the exception class")?,
		})
	}

	pub fn matches_class(&self, class: &ClassMetaData) -> bool {
		self.method.matches_class(class)
	}

	/// Matches the method, and the exception if one is given.
	pub fn matches(&self, class: &ClassMetaData, method: &MethodMetaData, exception: Option<&ClassMetaData>) -> bool {
		self.method.matches(class, method) && exception.map_or(true, |e| self.exception.matches(e))
	}
}
