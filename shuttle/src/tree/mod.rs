//! The in-memory model of a class: [`class::ClassFile`] with its [`method::Method`]s, [`field::Field`]s
//! and [`attribute::Attribute`]s, plus the instruction list of [`method::code::Code`].
//!
//! Every part of this model can be mutated freely. Encoding it to bytes and back is done by [`crate::codec`].

pub mod class;
pub mod field;
pub mod method;
pub mod attribute;
pub mod descriptor;

/// Name checks shared by the name newtypes.
mod names {
	/// Characters no name part may contain.
	const RESERVED: [char; 4] = ['.', ';', '[', '/'];

	/// A simple name: a field name or one part of a class name.
	pub(super) fn is_simple(name: &str) -> bool {
		!name.is_empty() && !name.contains(RESERVED)
	}

	/// `<init>`, `<clinit>`, or a simple name without angle brackets.
	pub(super) fn is_method(name: &str) -> bool {
		matches!(name, "<init>" | "<clinit>") || (is_simple(name) && !name.contains(['<', '>']))
	}

	/// An internal class name like `java/lang/Object`, or an array class like `[I` or `[[Ljava/lang/String;`.
	pub(super) fn is_class(name: &str) -> bool {
		let element = name.trim_start_matches('[');
		if element.len() == name.len() {
			return name.split('/').all(is_simple);
		}
		match element.strip_prefix('L').and_then(|e| e.strip_suffix(';')) {
			Some(class) => !class.starts_with('[') && is_class(class),
			None => element.len() == 1 && "BCDFIJSZ".contains(element),
		}
	}

}
