//! The attributes woven classes carry, so later weaving passes and the runtime can find what was done to them.
//!
//! - `weft.JoinPointIndex` on the class: the index the next join point of the class gets, as a big endian `u32`.
//! - `weft.Prefixed` on a renamed method: the index of its join point and the name it had before.
//! - `weft.Wrapper` on a method calling the join point manager: a byte telling if the body is the empty one, the
//!   index of the join point and the uuid of the system.
//! - `weft.MixinProxy` on a method delegating to a mixin: the uuid of the system.

use anyhow::{anyhow, bail, Result};
use shuttle::tree::attribute::Attribute;
use shuttle::tree::class::ClassFile;
use shuttle::tree::method::{Method, MethodName};

pub const JOIN_POINT_INDEX: &str = "weft.JoinPointIndex";
pub const PREFIXED: &str = "weft.Prefixed";
pub const WRAPPER: &str = "weft.Wrapper";
pub const MIXIN_PROXY: &str = "weft.MixinProxy";

/// Hands out the next join point index of the class, remembering it in the class.
pub fn next_join_point_index(class: &mut ClassFile) -> Result<u32> {
	let index = match class.attribute(JOIN_POINT_INDEX) {
		Some(attribute) => attribute.as_u32()?,
		None => 0,
	};
	let next = index.checked_add(1)
		.ok_or_else(|| anyhow!("class {} ran out of join point indices", class.name))?;
	class.set_attribute(Attribute::from_u32(JOIN_POINT_INDEX, next));
	Ok(index)
}

fn split_index<'a>(attribute: &'a Attribute, name: &str) -> Result<(u32, &'a [u8])> {
	match attribute.bytes.as_slice() {
		[a, b, c, d, rest @ ..] => Ok((u32::from_be_bytes([*a, *b, *c, *d]), rest)),
		bytes => bail!("attribute {name} has only {} bytes", bytes.len()),
	}
}

/// What a `weft.Prefixed` attribute says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixedMarker {
	pub index: u32,
	/// The name of the method before it was renamed, `<init>` for constructor bodies.
	pub original: MethodName,
}

impl PrefixedMarker {
	pub fn read(method: &Method) -> Result<Option<PrefixedMarker>> {
		method.attribute(PREFIXED)
			.map(|attribute| {
				let (index, name) = split_index(attribute, PREFIXED)?;
				let name = String::from_utf8(name.to_vec())
					.map_err(|e| anyhow!("attribute {PREFIXED} has an invalid name: {e}"))?;
				Ok(PrefixedMarker { index, original: MethodName::try_from(name)? })
			})
			.transpose()
	}

	pub fn write(&self, method: &mut Method) {
		let mut bytes = self.index.to_be_bytes().to_vec();
		bytes.extend_from_slice(self.original.as_str().as_bytes());
		method.set_attribute(Attribute::new(PREFIXED, bytes));
	}
}

/// Finds the renamed method of a join point among the methods of a class, ignoring malformed markers.
pub fn find_prefixed(methods: &[Method], index: u32) -> Option<(&Method, PrefixedMarker)> {
	methods.iter().find_map(|method| match PrefixedMarker::read(method) {
		Ok(Some(marker)) if marker.index == index => Some((method, marker)),
		_ => None,
	})
}

/// What a `weft.Wrapper` attribute says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperMarker {
	/// Whether the body calls the renamed method directly instead of dispatching.
	pub empty: bool,
	pub index: u32,
	pub uuid: String,
}

impl WrapperMarker {
	pub fn read(method: &Method) -> Result<Option<WrapperMarker>> {
		method.attribute(WRAPPER).map(WrapperMarker::parse).transpose()
	}

	fn parse(attribute: &Attribute) -> Result<WrapperMarker> {
		let Some((empty, rest)) = attribute.bytes.split_first() else {
			bail!("attribute {WRAPPER} is empty");
		};
		let empty = match empty {
			0 => false,
			1 => true,
			other => bail!("attribute {WRAPPER} has an invalid flag {other}"),
		};
		let (index, uuid) = match rest {
			[a, b, c, d, uuid @ ..] => (u32::from_be_bytes([*a, *b, *c, *d]), uuid),
			_ => bail!("attribute {WRAPPER} has only {} bytes", attribute.bytes.len()),
		};
		let uuid = String::from_utf8(uuid.to_vec())
			.map_err(|e| anyhow!("attribute {WRAPPER} has an invalid uuid: {e}"))?;
		Ok(WrapperMarker { empty, index, uuid })
	}

	pub fn write(&self, method: &mut Method) {
		let mut bytes = Vec::with_capacity(5 + self.uuid.len());
		bytes.push(u8::from(self.empty));
		bytes.extend_from_slice(&self.index.to_be_bytes());
		bytes.extend_from_slice(self.uuid.as_bytes());
		method.set_attribute(Attribute::new(WRAPPER, bytes));
	}

	/// Checks if the method wraps the join point of the system, ignoring malformed markers.
	pub fn wraps(method: &Method, uuid: &str, index: u32) -> bool {
		matches!(WrapperMarker::read(method), Ok(Some(marker)) if marker.uuid == uuid && marker.index == index)
	}
}

pub fn is_mixin_proxy(method: &Method) -> bool {
	method.attribute(MIXIN_PROXY).is_some()
}

pub fn mark_mixin_proxy(method: &mut Method, uuid: &str) {
	method.set_attribute(Attribute::new(MIXIN_PROXY, uuid.as_bytes().to_vec()));
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use anyhow::Result;
	use shuttle::tree::class::{ClassAccess, ClassFile, ClassName};
	use shuttle::tree::method::{Method, MethodAccess, MethodDescriptor, MethodName};
	use crate::transform::attributes::{find_prefixed, next_join_point_index, PrefixedMarker, WrapperMarker};

	#[test]
	fn indices_continue() -> Result<()> {
		let mut class = ClassFile::new(ClassAccess::default(), ClassName::try_from("test/C")?, None, Vec::new());
		assert_eq!(next_join_point_index(&mut class)?, 0);
		assert_eq!(next_join_point_index(&mut class)?, 1);

		// a later pass sees the class as it was left
		let mut again = class.clone();
		assert_eq!(next_join_point_index(&mut again)?, 2);
		Ok(())
	}

	#[test]
	fn wrapper_marker() -> Result<()> {
		let mut method = Method::new(MethodAccess::default(), MethodName::try_from("m")?, MethodDescriptor::try_from("()V")?);
		assert_eq!(WrapperMarker::read(&method)?, None);

		let marker = WrapperMarker { empty: true, index: 258, uuid: "sys".to_owned() };
		marker.write(&mut method);
		assert_eq!(method.attribute("weft.Wrapper").map(|a| a.bytes.clone()), Some(vec![1, 0, 0, 1, 2, b's', b'y', b's']));
		assert_eq!(WrapperMarker::read(&method)?, Some(marker));
		assert!(WrapperMarker::wraps(&method, "sys", 258));
		assert!(!WrapperMarker::wraps(&method, "sys", 2));
		assert!(!WrapperMarker::wraps(&method, "other", 258));
		Ok(())
	}

	#[test]
	fn prefixed_marker() -> Result<()> {
		let mut method = Method::new(MethodAccess::default(), MethodName::try_from("__weft$init$1$test_C")?, MethodDescriptor::try_from("(I)V")?);
		assert_eq!(PrefixedMarker::read(&method)?, None);

		let marker = PrefixedMarker { index: 3, original: MethodName::init() };
		marker.write(&mut method);
		assert_eq!(PrefixedMarker::read(&method)?, Some(marker.clone()));

		let methods = [method];
		assert_eq!(find_prefixed(&methods, 3).map(|(_, found)| found), Some(marker));
		assert!(find_prefixed(&methods, 4).is_none());
		Ok(())
	}
}
