//! Names of the members weaving adds. All of them start with [`PREFIX`], which is how weaving recognizes its own
//! members.

use anyhow::Result;
use shuttle::tree::class::{ClassFile, ClassName};
use shuttle::tree::field::FieldName;
use shuttle::tree::method::MethodName;

pub const PREFIX: &str = "__weft$";
const DELIMITER: char = '$';

/// The static field holding the class object of the class itself.
pub fn class_field() -> FieldName {
	FieldName::new_unchecked(format!("{PREFIX}clazz"))
}

fn sanitize(s: &str) -> String {
	s.chars()
		.map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
		.collect()
}

/// The static field holding the join point manager of the system with the uuid.
pub fn manager_field(uuid: &str) -> FieldName {
	FieldName::new_unchecked(format!("{PREFIX}jpm{DELIMITER}{}", sanitize(uuid)))
}

/// The static field caching the class object of another class, for call sites calling into it.
pub fn class_cache_field(callee: &ClassName) -> FieldName {
	FieldName::new_unchecked(format!("{PREFIX}clazz{DELIMITER}{}", sanitize(callee.as_str())))
}

fn base_name(name: &MethodName) -> &str {
	if name.is_init() { "init" } else { name.as_str() }
}

/// The next free sequence number for renaming a method of that name.
pub fn next_sequence(class: &ClassFile, name: &MethodName) -> usize {
	let start = format!("{PREFIX}{}{DELIMITER}", base_name(name));
	1 + class.methods.iter().filter(|m| m.name.as_str().starts_with(&start)).count()
}

/// The name a method gets when its body moves out of the way of the wrapper: the original name, a sequence number and
/// the class declaring it, like `__weft$m$1$test_C`.
pub fn prefixed_name(class: &ClassFile, name: &MethodName) -> Result<MethodName> {
	let sequence = next_sequence(class, name);
	let owner = class.name.java_name().replace('.', "_");
	MethodName::try_from(format!("{PREFIX}{}{DELIMITER}{sequence}{DELIMITER}{owner}", base_name(name)))
}

pub fn is_weft_member(name: &str) -> bool {
	name.starts_with(PREFIX)
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use anyhow::Result;
	use shuttle::tree::class::{ClassAccess, ClassFile, ClassName};
	use shuttle::tree::method::{Method, MethodAccess, MethodDescriptor, MethodName};
	use crate::transform::naming::{class_cache_field, is_weft_member, manager_field, prefixed_name};

	#[test]
	fn prefixed_names() -> Result<()> {
		let mut class = ClassFile::new(ClassAccess::default(), ClassName::try_from("test/inner/C")?, None, Vec::new());
		let m = MethodName::try_from("m")?;
		let first = prefixed_name(&class, &m)?;
		assert_eq!(first.as_str(), "__weft$m$1$test_inner_C");

		class.add_method(Method::new(MethodAccess::default(), first, MethodDescriptor::try_from("()V")?))?;
		assert_eq!(prefixed_name(&class, &m)?.as_str(), "__weft$m$2$test_inner_C");
		// the sequence is per name
		assert_eq!(prefixed_name(&class, &MethodName::init())?.as_str(), "__weft$init$1$test_inner_C");
		Ok(())
	}

	#[test]
	fn fields() -> Result<()> {
		assert_eq!(manager_field("my-system.1").as_str(), "__weft$jpm$my_system_1");
		assert_eq!(class_cache_field(&ClassName::try_from("test/D")?).as_str(), "__weft$clazz$test_D");
		assert!(is_weft_member("__weft$clazz"));
		assert!(!is_weft_member("clazz"));
		Ok(())
	}
}
