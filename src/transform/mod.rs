//! Weaving of class files.
//!
//! A class passes through the stages in order, once per system it's woven for. Each stage reports how many join
//! points or members it wove. A class nothing got woven into is returned as it was, unless it's in a package to
//! prepare.

pub mod attributes;
mod call;
mod codegen;
mod execution;
mod field;
mod filter;
mod introduction;
pub mod naming;
mod prepare;

pub use codegen::ExecutionJoinPoint;

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use anyhow::Result;
use log::{debug, trace, warn};
use shuttle::codec;
use shuttle::tree::class::{ClassFile, ClassName};
use shuttle::vm::{ClassFileTransformer, ClassLoaderContext};
use crate::error::{DefinitionError, TransformationError};
use crate::metadata::{ClassMetaData, MetaDataResolver};
use crate::system::{AspectSystem, SystemRegistry};
use crate::transform::filter::Scope;

/// What the stages share while weaving a class for one system.
pub(crate) struct Weaving<'a> {
	pub(crate) system: &'a AspectSystem,
	pub(crate) uuid: &'a str,
	pub(crate) resolver: MetaDataResolver<'a>,
	/// The class as it was before this pass.
	pub(crate) class_meta: Arc<ClassMetaData>,
}

impl Weaving<'_> {
	/// The metadata of another class, or of the woven one.
	pub(crate) fn resolve(&mut self, name: &ClassName) -> Arc<ClassMetaData> {
		if name == self.class_meta.name() {
			self.class_meta.clone()
		} else {
			self.resolver.resolve(name)
		}
	}
}

pub(crate) trait Stage {
	fn name(&self) -> &'static str;

	/// Returns how many things got woven.
	fn apply(&self, class: &mut ClassFile, weaving: &mut Weaving<'_>) -> Result<usize>;
}

/// Runs after filtering. Preparing alone doesn't count as weaving the class.
const PREPARE: &dyn Stage = &prepare::Prepare;

const STAGES: [&dyn Stage; 4] = [
	&introduction::Introduction,
	&execution::Execution,
	&call::Call,
	&field::Field,
];

/// Counts of a weaving pass, per stage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WeavingStats {
	pub prepared: usize,
	pub introduced: usize,
	pub executions: usize,
	pub calls: usize,
	pub fields: usize,
}

impl WeavingStats {
	pub fn woven(&self) -> usize {
		self.introduced + self.executions + self.calls + self.fields
	}

	fn record(&mut self, stage: &str, count: usize) {
		match stage {
			"introduction" => self.introduced += count,
			"execution" => self.executions += count,
			"call" => self.calls += count,
			"field" => self.fields += count,
			_ => self.prepared += count,
		}
	}
}

/// Weaves classes for a list of systems. Installed into a runtime as a class file transformer.
pub struct WeavingPipeline {
	registry: Arc<SystemRegistry>,
	uuids: Vec<String>,
}

impl Debug for WeavingPipeline {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WeavingPipeline").field("uuids", &self.uuids).finish_non_exhaustive()
	}
}

impl WeavingPipeline {
	pub fn new(registry: Arc<SystemRegistry>, uuids: Vec<String>) -> WeavingPipeline {
		WeavingPipeline { registry, uuids }
	}

	pub fn uuids(&self) -> &[String] {
		&self.uuids
	}

	/// Weaves a class, returning `None` if nothing changed.
	pub fn weave(&self, name: &ClassName, bytes: &[u8], context: &dyn ClassLoaderContext) -> Result<Option<(Vec<u8>, WeavingStats)>> {
		let mut class = codec::read_class(bytes)?;
		let mut total = WeavingStats::default();
		let mut changed = false;

		for uuid in &self.uuids {
			let system = self.registry.get_system(uuid);
			system.initialize()?;
			let definition = system.definition()
				.ok_or_else(|| DefinitionError::SystemNotDefined(uuid.clone()))?;

			let mut resolver = MetaDataResolver::new(context);
			let class_meta = resolver.resolve_class_file(&class);
			let scope = filter::scope(self.registry.options(), definition, &system, &class, &class_meta)?;
			trace!("system {uuid:?}: class {name} is {scope:?}");
			if scope == Scope::Skip {
				continue;
			}

			let snapshot = class.clone();
			let mut weaving = Weaving { system: &system, uuid, resolver, class_meta };
			let mut stats = WeavingStats::default();
			for stage in std::iter::once(PREPARE).chain(STAGES) {
				let count = stage.apply(&mut class, &mut weaving)
					.map_err(|e| TransformationError::StageFailed {
						stage: stage.name(),
						class: name.to_string(),
						reason: format!("{e:#}"),
					})?;
				stats.record(stage.name(), count);
			}

			if stats.woven() == 0 && scope != Scope::Prepare {
				class = snapshot;
				continue;
			}
			debug!("system {uuid:?}: wove {name}: {stats:?}");
			changed |= stats.woven() > 0 || stats.prepared > 0;
			total.prepared += stats.prepared;
			total.introduced += stats.introduced;
			total.executions += stats.executions;
			total.calls += stats.calls;
			total.fields += stats.fields;
		}

		if !changed {
			return Ok(None);
		}
		Ok(Some((codec::write_class(&class)?, total)))
	}
}

impl ClassFileTransformer for WeavingPipeline {
	/// Weaves the class, or gives back the bytes as they were if weaving fails.
	fn pre_process(&self, name: &ClassName, bytes: &[u8], context: &dyn ClassLoaderContext) -> Vec<u8> {
		match self.weave(name, bytes, context) {
			Ok(Some((woven, _))) => woven,
			Ok(None) => bytes.to_vec(),
			Err(e) => {
				warn!("failed to weave class {name}, leaving it unchanged: {e:?}");
				bytes.to_vec()
			},
		}
	}
}
