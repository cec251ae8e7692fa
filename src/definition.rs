//! The definitions of systems, as supplied by a [`DefinitionLoader`].
//!
//! Definitions are plain data and can be read from JSON:
//! ```
//! # use weft::definition::{DeploymentModel, PointcutKind, SystemDefinition};
//! let definition: SystemDefinition = serde_json::from_str(r#"{
//!     "uuid": "app",
//!     "aspects": [{
//!         "name": "logging",
//!         "class": "LoggingAspect",
//!         "deployment_model": "perInstance",
//!         "pointcuts": [{ "name": "services", "kind": "method", "pattern": "* test..*Service.*(..)" }],
//!         "bind_advice": [{ "expression": "services", "advices": ["log"] }]
//!     }]
//! }"#)?;
//! assert_eq!(definition.aspects[0].deployment_model, DeploymentModel::PerInstance);
//! assert_eq!(definition.aspects[0].pointcuts[0].kind, PointcutKind::Execution);
//! # anyhow::Ok(())
//! ```

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use crate::error::DefinitionError;

/// The kinds of pointcuts, named like in definition files.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointcutKind {
	/// The execution of methods and constructors.
	#[serde(rename = "method", alias = "execution")]
	Execution,
	#[serde(rename = "getField", alias = "get")]
	Get,
	#[serde(rename = "setField", alias = "set")]
	Set,
	#[serde(rename = "throws")]
	Throws,
	/// Call sites of methods and constructors.
	#[serde(rename = "callerSide", alias = "callerside", alias = "call")]
	Call,
	/// Call sites, for use in `cflow(...)`.
	#[serde(rename = "cflow")]
	Cflow,
	/// Classes, for introductions.
	#[serde(rename = "class")]
	Class,
}

impl Display for PointcutKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			PointcutKind::Execution => "method",
			PointcutKind::Get => "getField",
			PointcutKind::Set => "setField",
			PointcutKind::Throws => "throws",
			PointcutKind::Call => "callerSide",
			PointcutKind::Cflow => "cflow",
			PointcutKind::Class => "class",
		})
	}
}

/// How many instances of an aspect or mixin there are.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeploymentModel {
	/// One instance for everything.
	#[default]
	PerJvm,
	/// One instance per class containing the join point.
	PerClass,
	/// One instance per object the join point is executed on, or per class for static join points.
	PerInstance,
	/// One instance per thread.
	PerThread,
}

impl FromStr for DeploymentModel {
	type Err = DefinitionError;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"perJVM" => Ok(DeploymentModel::PerJvm),
			"perClass" => Ok(DeploymentModel::PerClass),
			"perInstance" => Ok(DeploymentModel::PerInstance),
			"perThread" => Ok(DeploymentModel::PerThread),
			other => Err(DefinitionError::UnknownDeploymentModel(other.to_owned())),
		}
	}
}

impl TryFrom<String> for DeploymentModel {
	type Error = DefinitionError;

	fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
		value.parse()
	}
}

impl From<DeploymentModel> for String {
	fn from(value: DeploymentModel) -> Self {
		value.to_string()
	}
}

impl Display for DeploymentModel {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			DeploymentModel::PerJvm => "perJVM",
			DeploymentModel::PerClass => "perClass",
			DeploymentModel::PerInstance => "perInstance",
			DeploymentModel::PerThread => "perThread",
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointcutDefinition {
	pub name: String,
	pub kind: PointcutKind,
	pub pattern: String,
}

/// Binds the advices of an aspect to the join points an expression matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindAdviceRule {
	pub expression: String,
	pub advices: Vec<String>,
}

/// Applies introductions to the classes an expression of class pointcuts matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindIntroductionRule {
	pub expression: String,
	pub introductions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectDefinition {
	pub name: String,
	/// The name of the [`crate::aspect::AspectClass`] in the aspect library.
	pub class: String,
	#[serde(default)]
	pub deployment_model: DeploymentModel,
	#[serde(default)]
	pub pointcuts: Vec<PointcutDefinition>,
	#[serde(default)]
	pub bind_advice: Vec<BindAdviceRule>,
	#[serde(default)]
	pub bind_introduction: Vec<BindIntroductionRule>,
}

impl AspectDefinition {
	pub fn new(name: impl Into<String>, class: impl Into<String>) -> AspectDefinition {
		AspectDefinition {
			name: name.into(),
			class: class.into(),
			deployment_model: DeploymentModel::default(),
			pointcuts: Vec::new(),
			bind_advice: Vec::new(),
			bind_introduction: Vec::new(),
		}
	}

	pub fn deployment_model(mut self, model: DeploymentModel) -> AspectDefinition {
		self.deployment_model = model;
		self
	}

	pub fn pointcut(mut self, name: impl Into<String>, kind: PointcutKind, pattern: impl Into<String>) -> AspectDefinition {
		self.pointcuts.push(PointcutDefinition { name: name.into(), kind, pattern: pattern.into() });
		self
	}

	pub fn bind_advice(mut self, expression: impl Into<String>, advices: &[&str]) -> AspectDefinition {
		self.bind_advice.push(BindAdviceRule {
			expression: expression.into(),
			advices: advices.iter().map(|a| a.to_string()).collect(),
		});
		self
	}

	pub fn bind_introduction(mut self, expression: impl Into<String>, introductions: &[&str]) -> AspectDefinition {
		self.bind_introduction.push(BindIntroductionRule {
			expression: expression.into(),
			introductions: introductions.iter().map(|i| i.to_string()).collect(),
		});
		self
	}
}

/// Adds an interface to classes, optionally with an implementation by a mixin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntroductionDefinition {
	pub name: String,
	/// The java name of the interface, like `test.Named`.
	pub interface: String,
	/// The name of the [`crate::aspect::MixinClass`] in the aspect library.
	#[serde(default)]
	pub implementation: Option<String>,
	#[serde(default)]
	pub deployment_model: DeploymentModel,
}

impl IntroductionDefinition {
	pub fn new(name: impl Into<String>, interface: impl Into<String>) -> IntroductionDefinition {
		IntroductionDefinition {
			name: name.into(),
			interface: interface.into(),
			implementation: None,
			deployment_model: DeploymentModel::default(),
		}
	}

	pub fn implementation(mut self, mixin: impl Into<String>, model: DeploymentModel) -> IntroductionDefinition {
		self.implementation = Some(mixin.into());
		self.deployment_model = model;
		self
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemDefinition {
	pub uuid: String,
	/// Package prefixes (like `com.example`) of the classes to weave. Empty means all.
	#[serde(default)]
	pub include_packages: Vec<String>,
	#[serde(default)]
	pub exclude_packages: Vec<String>,
	/// Package prefixes of classes prepared for weaving even if nothing matches them yet.
	#[serde(default)]
	pub prepare_packages: Vec<String>,
	#[serde(default)]
	pub aspects: Vec<AspectDefinition>,
	#[serde(default)]
	pub introductions: Vec<IntroductionDefinition>,
}

impl SystemDefinition {
	pub fn new(uuid: impl Into<String>) -> SystemDefinition {
		SystemDefinition {
			uuid: uuid.into(),
			include_packages: Vec::new(),
			exclude_packages: Vec::new(),
			prepare_packages: Vec::new(),
			aspects: Vec::new(),
			introductions: Vec::new(),
		}
	}

	pub fn aspect(mut self, aspect: AspectDefinition) -> SystemDefinition {
		self.aspects.push(aspect);
		self
	}

	pub fn introduction(mut self, introduction: IntroductionDefinition) -> SystemDefinition {
		self.introductions.push(introduction);
		self
	}

	pub fn include(mut self, package: impl Into<String>) -> SystemDefinition {
		self.include_packages.push(package.into());
		self
	}

	pub fn exclude(mut self, package: impl Into<String>) -> SystemDefinition {
		self.exclude_packages.push(package.into());
		self
	}

	pub fn prepare(mut self, package: impl Into<String>) -> SystemDefinition {
		self.prepare_packages.push(package.into());
		self
	}
}

/// Options of the weaver that aren't part of any system definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaverOptions {
	/// How many pointcut lookups each system remembers, per kind of lookup.
	pub cache_capacity: usize,
	/// Package prefixes never woven, in addition to the ones of the system definitions.
	pub exclude_packages: Vec<String>,
}

impl Default for WeaverOptions {
	fn default() -> Self {
		WeaverOptions {
			cache_capacity: 4096,
			exclude_packages: ["java.", "javax.", "sun.", "weft.runtime."].map(String::from).to_vec(),
		}
	}
}

/// Supplies the definition of a system. The definition is read once per system.
pub trait DefinitionLoader: Send + Sync {
	/// Returns `None` if there's no system with that uuid.
	fn load(&self, uuid: &str) -> Result<Option<SystemDefinition>>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryDefinitionLoader {
	definitions: IndexMap<String, SystemDefinition>,
}

impl InMemoryDefinitionLoader {
	pub fn new(definitions: impl IntoIterator<Item=SystemDefinition>) -> InMemoryDefinitionLoader {
		InMemoryDefinitionLoader {
			definitions: definitions.into_iter().map(|d| (d.uuid.clone(), d)).collect(),
		}
	}

	/// Reads either a single definition or a list of definitions.
	pub fn from_json(json: &str) -> Result<InMemoryDefinitionLoader> {
		#[derive(Deserialize)]
		#[serde(untagged)]
		enum OneOrMany {
			One(SystemDefinition),
			Many(Vec<SystemDefinition>),
		}

		let definitions = match serde_json::from_str(json).context("failed to parse system definitions")? {
			OneOrMany::One(definition) => vec![definition],
			OneOrMany::Many(definitions) => definitions,
		};
		Ok(InMemoryDefinitionLoader::new(definitions))
	}
}

impl DefinitionLoader for InMemoryDefinitionLoader {
	fn load(&self, uuid: &str) -> Result<Option<SystemDefinition>> {
		Ok(self.definitions.get(uuid).cloned())
	}
}

/// Reads the definitions from a JSON file each time a system is loaded.
#[derive(Debug, Clone)]
pub struct JsonDefinitionLoader {
	path: PathBuf,
}

impl JsonDefinitionLoader {
	pub fn new(path: impl Into<PathBuf>) -> JsonDefinitionLoader {
		JsonDefinitionLoader { path: path.into() }
	}
}

impl DefinitionLoader for JsonDefinitionLoader {
	fn load(&self, uuid: &str) -> Result<Option<SystemDefinition>> {
		let json = std::fs::read_to_string(&self.path)
			.with_context(|| anyhow!("failed to read system definitions from {:?}", self.path))?;
		InMemoryDefinitionLoader::from_json(&json)
			.with_context(|| anyhow!("in file {:?}", self.path))?
			.load(uuid)
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use anyhow::Result;
	use crate::definition::{DefinitionLoader, DeploymentModel, InMemoryDefinitionLoader, WeaverOptions};
	use crate::error::DefinitionError;

	#[test]
	fn deployment_models() -> Result<()> {
		assert_eq!("perThread".parse::<DeploymentModel>()?, DeploymentModel::PerThread);
		assert_eq!(DeploymentModel::PerJvm.to_string(), "perJVM");
		assert_eq!("perVM".parse::<DeploymentModel>(), Err(DefinitionError::UnknownDeploymentModel("perVM".to_owned())));

		assert!(serde_json::from_str::<DeploymentModel>("\"perSession\"").is_err());
		Ok(())
	}

	#[test]
	fn many_definitions() -> Result<()> {
		let loader = InMemoryDefinitionLoader::from_json(r#"[
			{ "uuid": "a", "include_packages": ["test"] },
			{ "uuid": "b" }
		]"#)?;
		assert_eq!(loader.load("a")?.map(|d| d.include_packages), Some(vec!["test".to_owned()]));
		assert!(loader.load("b")?.is_some());
		assert!(loader.load("c")?.is_none());
		Ok(())
	}

	#[test]
	fn options() -> Result<()> {
		let options: WeaverOptions = serde_json::from_str(r#"{ "cache_capacity": 16 }"#)?;
		assert_eq!(options.cache_capacity, 16);
		assert_eq!(options.exclude_packages, WeaverOptions::default().exclude_packages);
		Ok(())
	}
}
