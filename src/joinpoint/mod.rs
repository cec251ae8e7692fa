//! Join points: the places in a program advice runs at.

mod join_point;

pub use join_point::JoinPoint;
pub(crate) use join_point::{ChainLink, Original};

use std::sync::Arc;
use crate::definition::PointcutKind;
use crate::error::DispatchError;
use crate::metadata::{ClassMetaData, MemberMetaData, MethodMetaData};
use crate::pattern::MatchTarget;

/// The kinds of join points, with the tags woven code passes to the dispatcher.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum JoinPointKind {
	MethodExecution = 1,
	MethodCall = 2,
	ConstructorExecution = 3,
	ConstructorCall = 4,
	FieldGet = 5,
	FieldSet = 6,
}

impl JoinPointKind {
	pub fn tag(self) -> i32 {
		self as i32
	}

	pub fn is_call(self) -> bool {
		matches!(self, JoinPointKind::MethodCall | JoinPointKind::ConstructorCall)
	}

	pub fn is_execution(self) -> bool {
		matches!(self, JoinPointKind::MethodExecution | JoinPointKind::ConstructorExecution)
	}

	/// The kind of the named pointcuts that pick out join points of this kind.
	pub fn pointcut_kind(self) -> PointcutKind {
		match self {
			JoinPointKind::MethodExecution | JoinPointKind::ConstructorExecution => PointcutKind::Execution,
			JoinPointKind::MethodCall | JoinPointKind::ConstructorCall => PointcutKind::Call,
			JoinPointKind::FieldGet => PointcutKind::Get,
			JoinPointKind::FieldSet => PointcutKind::Set,
		}
	}
}

impl TryFrom<i32> for JoinPointKind {
	type Error = DispatchError;

	fn try_from(value: i32) -> Result<Self, Self::Error> {
		match value {
			1 => Ok(JoinPointKind::MethodExecution),
			2 => Ok(JoinPointKind::MethodCall),
			3 => Ok(JoinPointKind::ConstructorExecution),
			4 => Ok(JoinPointKind::ConstructorCall),
			5 => Ok(JoinPointKind::FieldGet),
			6 => Ok(JoinPointKind::FieldSet),
			other => Err(DispatchError::UnknownKind(other)),
		}
	}
}

/// The `hashCode` of a `java.lang.String` with the given contents.
pub fn java_hash_code(s: &str) -> i32 {
	s.encode_utf16().fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c)))
}

/// Identifies a member within a class by its name and the java names of its parameter types.
///
/// The same member gets the same hash in every weaving pass.
pub fn join_point_hash(name: &str, parameter_types: &[impl AsRef<str>]) -> i32 {
	let mut hash = 17i32;
	hash = hash.wrapping_mul(37).wrapping_add(java_hash_code(name));
	for parameter_type in parameter_types {
		hash = hash.wrapping_mul(37).wrapping_add(java_hash_code(parameter_type.as_ref()));
	}
	hash
}

pub fn method_hash(method: &MethodMetaData) -> i32 {
	join_point_hash(method.name().as_str(), method.parameter_types())
}

/// Hashes a field by its name and the java name of its type.
pub fn field_hash(name: &str, type_name: &str) -> i32 {
	join_point_hash(name, &[type_name])
}

pub fn member_hash(member: &MemberMetaData) -> i32 {
	match member {
		MemberMetaData::Method(m) => method_hash(m),
		MemberMetaData::Field(f) => field_hash(f.name().as_str(), f.type_name()),
	}
}

/// The static part of a join point: where it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPointInfo {
	pub kind: JoinPointKind,
	/// The class containing the call or field access, for join points at call sites.
	pub caller: Option<Arc<ClassMetaData>>,
	/// The class declaring the member.
	pub class: Arc<ClassMetaData>,
	pub member: MemberMetaData,
}

impl JoinPointInfo {
	pub fn match_target(&self) -> MatchTarget<'_> {
		match (&self.caller, self.kind.is_call()) {
			(Some(caller), true) => MatchTarget::Call { caller, class: &self.class, member: &self.member },
			_ => MatchTarget::Member { class: &self.class, member: &self.member },
		}
	}

	/// The signature, like `void test.C.m(int)`.
	pub fn signature(&self) -> String {
		match &self.member {
			MemberMetaData::Method(m) if m.is_constructor() => {
				format!("{}.new({})", self.class.java_name(), m.parameter_types().join(","))
			},
			MemberMetaData::Method(m) => {
				format!("{} {}.{}({})", m.return_type(), self.class.java_name(), m.name(), m.parameter_types().join(","))
			},
			MemberMetaData::Field(f) => format!("{} {}.{}", f.type_name(), self.class.java_name(), f.name()),
		}
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use crate::definition::PointcutKind;
	use crate::joinpoint::{field_hash, java_hash_code, join_point_hash, JoinPointKind};

	#[test]
	fn string_hash_codes() {
		assert_eq!(java_hash_code(""), 0);
		assert_eq!(java_hash_code("a"), 97);
		assert_eq!(java_hash_code("hello"), 99162322);
		// overflows
		assert_eq!(java_hash_code("java.lang.String"), 1195259493);
	}

	#[test]
	fn join_point_hashes() {
		let no_params: [&str; 0] = [];
		assert_eq!(join_point_hash("m", &no_params), 17 * 37 + 109);
		assert_eq!(join_point_hash("m", &["int"]), (17 * 37 + 109) * 37 + 104431);
		assert_ne!(join_point_hash("m", &["int", "long"]), join_point_hash("m", &["long", "int"]));
		assert_eq!(field_hash("count", "int"), join_point_hash("count", &["int"]));
	}

	#[test]
	fn kinds() {
		assert_eq!(JoinPointKind::try_from(4), Ok(JoinPointKind::ConstructorCall));
		assert!(JoinPointKind::try_from(7).is_err());
		assert_eq!(JoinPointKind::FieldSet.tag(), 6);
		assert_eq!(JoinPointKind::FieldSet.pointcut_kind(), PointcutKind::Set);
		assert_eq!(JoinPointKind::ConstructorCall.pointcut_kind(), PointcutKind::Call);
	}
}
