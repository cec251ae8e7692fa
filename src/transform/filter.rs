//! Deciding which classes a system weaves.

use anyhow::Result;
use shuttle::tree::class::ClassFile;
use crate::definition::{SystemDefinition, WeaverOptions};
use crate::metadata::ClassMetaData;
use crate::system::AspectSystem;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Scope {
	Skip,
	/// Woven if anything matches.
	Weave,
	/// Gets the fields and initializer of woven classes even if nothing matches.
	Prepare,
}

fn in_package(java_name: &str, packages: &[String]) -> bool {
	packages.iter().any(|package| java_name.starts_with(package.as_str()))
}

pub(crate) fn scope(
	options: &WeaverOptions,
	definition: &SystemDefinition,
	system: &AspectSystem,
	class: &ClassFile,
	class_meta: &ClassMetaData,
) -> Result<Scope> {
	if class.access.is_interface {
		return Ok(Scope::Skip);
	}
	let java_name = class_meta.java_name();
	if in_package(java_name, &options.exclude_packages) || in_package(java_name, &definition.exclude_packages) {
		return Ok(Scope::Skip);
	}
	if !definition.include_packages.is_empty() && !in_package(java_name, &definition.include_packages) {
		return Ok(Scope::Skip);
	}
	if in_package(java_name, &definition.prepare_packages) {
		return Ok(Scope::Prepare);
	}
	Ok(if system.could_match_class(class_meta)? { Scope::Weave } else { Scope::Skip })
}

#[cfg(test)]
mod testing {
	use super::in_package;

	#[test]
	fn packages() {
		let packages = vec!["test.".to_owned(), "com.example".to_owned()];
		assert!(in_package("test.C", &packages));
		assert!(in_package("com.example.inner.D", &packages));
		assert!(!in_package("testing.C", &packages));
		assert!(!in_package("C", &[]));
	}
}
