use std::sync::Arc;
use anyhow::Result;
use indexmap::IndexMap;
use log::{debug, warn};
use crate::cflow::CflowTracker;
use crate::definition::{DeploymentModel, PointcutKind};
use crate::error::DefinitionError;
use crate::expression::{Expression, Tri};
use crate::joinpoint::JoinPointInfo;
use crate::metadata::{ClassMetaData, MemberMetaData};
use crate::pattern::{MatchTarget, PointcutPatternTuple};

/// Identifies an advice or introduced method by the index of its aspect (or mixin), starting at `1`, and the index
/// of the method within it, starting at `0`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct IndexTuple {
	pub aspect: usize,
	pub method: usize,
}

/// A pointcut expression of an aspect, with the advices and introductions bound to it.
#[derive(Debug, Clone)]
pub struct Pointcut {
	kind: PointcutKind,
	expression: String,
	parsed: Expression,
	/// The named pointcuts referenced outside of `cflow(...)`.
	patterns: IndexMap<String, PointcutPatternTuple>,
	/// The named pointcuts referenced in `cflow(...)`.
	cflows: IndexMap<String, PointcutPatternTuple>,
	advices: Vec<IndexTuple>,
	introductions: Vec<usize>,
}

impl Pointcut {
	pub fn kind(&self) -> PointcutKind {
		self.kind
	}

	pub fn expression(&self) -> &str {
		&self.expression
	}

	pub fn advices(&self) -> &[IndexTuple] {
		&self.advices
	}

	/// The indices of the mixins introduced to the classes this pointcut matches.
	pub fn introductions(&self) -> &[usize] {
		&self.introductions
	}

	/// The named pointcuts the expression uses outside of `cflow(...)`.
	pub fn patterns(&self) -> impl Iterator<Item=&PointcutPatternTuple> {
		self.patterns.values()
	}

	pub fn cflows(&self) -> impl Iterator<Item=&PointcutPatternTuple> {
		self.cflows.values()
	}

	pub fn has_cflow(&self) -> bool {
		!self.cflows.is_empty()
	}

	fn leaf(&self, name: &str, target: &MatchTarget<'_>) -> bool {
		self.patterns.get(name).is_some_and(|tuple| tuple.matches(target))
	}

	/// Matches as far as possible before running, with `cflow(...)` unknown.
	pub fn match_static(&self, target: &MatchTarget<'_>) -> Tri {
		self.parsed.match_static(&mut |name| self.leaf(name, target))
	}

	pub fn match_runtime(&self, target: &MatchTarget<'_>, tracker: &CflowTracker) -> bool {
		self.parsed.match_runtime(
			&mut |name| self.leaf(name, target),
			&mut |name| self.cflows.get(name).is_some_and(|tuple| tracker.is_in_flow_of(tuple)),
		)
	}

	/// Checks if an exception thrown at a join point is one this throws pointcut is for.
	pub fn matches_exception(&self, info: &JoinPointInfo, exception: &ClassMetaData) -> bool {
		let target = MatchTarget::Throws { class: &info.class, member: &info.member, exception: Some(exception) };
		self.parsed.match_static(&mut |name| self.leaf(name, &target)).could_match()
	}
}

/// The pointcuts of an aspect, compiled from its definition.
#[derive(Debug, Clone)]
pub struct AspectMetaData {
	name: String,
	class_name: String,
	deployment_model: DeploymentModel,
	/// The named pointcut definitions, by name.
	named: IndexMap<String, PointcutPatternTuple>,
	/// The pointcut expressions, by their source.
	pointcuts: IndexMap<String, Arc<Pointcut>>,
	/// Which cflow patterns gate the pointcuts using a pattern.
	cflow: IndexMap<PointcutPatternTuple, Vec<PointcutPatternTuple>>,
}

impl AspectMetaData {
	pub fn new(name: impl Into<String>, class_name: impl Into<String>, deployment_model: DeploymentModel) -> AspectMetaData {
		AspectMetaData {
			name: name.into(),
			class_name: class_name.into(),
			deployment_model,
			named: IndexMap::new(),
			pointcuts: IndexMap::new(),
			cflow: IndexMap::new(),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn class_name(&self) -> &str {
		&self.class_name
	}

	pub fn deployment_model(&self) -> DeploymentModel {
		self.deployment_model
	}

	/// Compiles a named pointcut definition. Expressions refer to these by name.
	pub fn add_named_pointcut(&mut self, name: &str, kind: PointcutKind, pattern: &str) -> Result<()> {
		let tuple = PointcutPatternTuple::parse(kind, pattern)
			.map_err(|e| DefinitionError::MalformedPattern {
				pattern: pattern.to_owned(),
				pointcut: name.to_owned(),
				aspect: self.name.clone(),
				reason: format!("{e:#}"),
			})?;
		if let Some(old) = self.named.insert(name.to_owned(), tuple) {
			warn!("pointcut {name:?} of aspect {:?} is defined twice, replacing {old}", self.name);
		}
		Ok(())
	}

	fn malformed(&self, expression: &str, reason: impl Into<String>) -> DefinitionError {
		DefinitionError::MalformedExpression {
			expression: expression.to_owned(),
			aspect: self.name.clone(),
			reason: reason.into(),
		}
	}

	/// Registers a pointcut expression, returning the existing pointcut if the same expression was registered before.
	pub fn add_pointcut(&mut self, expression: &str) -> Result<Arc<Pointcut>> {
		let expression = expression.trim();
		if let Some(existing) = self.pointcuts.get(expression) {
			return Ok(existing.clone());
		}

		let parsed = Expression::parse(expression)
			.map_err(|e| self.malformed(expression, format!("{e:#}")))?;

		let mut kind: Option<PointcutKind> = None;
		let mut patterns = IndexMap::new();
		for name in parsed.pattern_references() {
			let tuple = self.named.get(name)
				.ok_or_else(|| DefinitionError::UnknownPointcut { pointcut: name.to_owned(), aspect: self.name.clone() })?;
			// cflow pointcuts used outside of cflow(...) match call sites
			let tuple_kind = match tuple.kind() {
				PointcutKind::Cflow => PointcutKind::Call,
				other => other,
			};
			match kind {
				None => kind = Some(tuple_kind),
				Some(first) if first != tuple_kind => {
					return Err(DefinitionError::MixedPointcutKinds {
						expression: expression.to_owned(),
						aspect: self.name.clone(),
						first: first.to_string(),
						second: tuple_kind.to_string(),
					}.into());
				},
				Some(_) => {},
			}
			patterns.insert(name.to_owned(), tuple.clone());
		}
		let Some(kind) = kind else {
			return Err(self.malformed(expression, "the expression references no pointcut outside of cflow(...)").into());
		};

		let mut cflows = IndexMap::new();
		for name in parsed.cflow_references() {
			let tuple = self.named.get(name)
				.ok_or_else(|| DefinitionError::UnknownPointcut { pointcut: name.to_owned(), aspect: self.name.clone() })?;
			if !matches!(tuple.kind(), PointcutKind::Cflow | PointcutKind::Call) {
				return Err(self.malformed(expression, format!("cflow({name}) must reference a cflow or call pointcut, not a {} pointcut", tuple.kind())).into());
			}
			cflows.insert(name.to_owned(), tuple.clone());
		}

		for tuple in patterns.values() {
			let gates = self.cflow.entry(tuple.clone()).or_default();
			for cflow in cflows.values() {
				if !gates.contains(cflow) {
					gates.push(cflow.clone());
				}
			}
		}

		debug!("aspect {:?} got a {kind} pointcut {expression:?}", self.name);
		let pointcut = Arc::new(Pointcut {
			kind,
			expression: expression.to_owned(),
			parsed,
			patterns,
			cflows,
			advices: Vec::new(),
			introductions: Vec::new(),
		});
		self.pointcuts.insert(expression.to_owned(), pointcut.clone());
		Ok(pointcut)
	}

	/// Binds an advice to the pointcut of an expression, registering it if needed.
	pub fn add_advice(&mut self, expression: &str, advice: IndexTuple) -> Result<()> {
		self.add_pointcut(expression)?;
		if let Some(pointcut) = self.pointcuts.get_mut(expression.trim()) {
			let pointcut = Arc::make_mut(pointcut);
			if !pointcut.advices.contains(&advice) {
				pointcut.advices.push(advice);
			}
		}
		Ok(())
	}

	/// Binds a mixin to the pointcut of an expression of class pointcuts.
	pub fn add_introduction(&mut self, expression: &str, mixin: usize) -> Result<()> {
		let pointcut = self.add_pointcut(expression)?;
		if pointcut.kind != PointcutKind::Class {
			return Err(self.malformed(expression, format!("introductions need class pointcuts, not {} pointcuts", pointcut.kind)).into());
		}
		if let Some(pointcut) = self.pointcuts.get_mut(expression.trim()) {
			let pointcut = Arc::make_mut(pointcut);
			if !pointcut.introductions.contains(&mixin) {
				pointcut.introductions.push(mixin);
			}
		}
		Ok(())
	}

	pub fn pointcuts(&self, kind: PointcutKind) -> impl Iterator<Item=&Arc<Pointcut>> {
		self.pointcuts.values().filter(move |p| p.kind == kind)
	}

	fn matching(&self, kind: PointcutKind, target: MatchTarget<'_>) -> Vec<Arc<Pointcut>> {
		self.pointcuts(kind)
			.filter(|p| p.match_static(&target).could_match())
			.cloned()
			.collect()
	}

	pub fn get_execution_pointcuts(&self, class: &ClassMetaData, member: &MemberMetaData) -> Vec<Arc<Pointcut>> {
		self.matching(PointcutKind::Execution, MatchTarget::Member { class, member })
	}

	pub fn get_get_pointcuts(&self, class: &ClassMetaData, member: &MemberMetaData) -> Vec<Arc<Pointcut>> {
		self.matching(PointcutKind::Get, MatchTarget::Member { class, member })
	}

	pub fn get_set_pointcuts(&self, class: &ClassMetaData, member: &MemberMetaData) -> Vec<Arc<Pointcut>> {
		self.matching(PointcutKind::Set, MatchTarget::Member { class, member })
	}

	/// The throws pointcuts that could match the method, whatever exception it throws.
	pub fn get_throws_pointcuts(&self, class: &ClassMetaData, member: &MemberMetaData) -> Vec<Arc<Pointcut>> {
		self.matching(PointcutKind::Throws, MatchTarget::Throws { class, member, exception: None })
	}

	pub fn get_call_pointcuts(&self, caller: &ClassMetaData, class: &ClassMetaData, member: &MemberMetaData) -> Vec<Arc<Pointcut>> {
		self.matching(PointcutKind::Call, MatchTarget::Call { caller, class, member })
	}

	pub fn get_class_pointcuts(&self, class: &ClassMetaData) -> Vec<Arc<Pointcut>> {
		self.matching(PointcutKind::Class, MatchTarget::Class(class))
	}

	/// The cflow patterns gating the pointcuts that use the given pattern. Compares the tuples, doesn't match.
	pub fn get_cflow_patterns(&self, tuple: &PointcutPatternTuple) -> &[PointcutPatternTuple] {
		self.cflow.get(tuple).map(Vec::as_slice).unwrap_or(&[])
	}

	/// The cflow patterns referenced by any expression of this aspect.
	pub fn cflow_sources(&self) -> impl Iterator<Item=&PointcutPatternTuple> {
		self.pointcuts.values().flat_map(|p| p.cflows.values())
	}

	/// Checks if any pointcut could match something in the class. For call site pointcuts, that's the calling class.
	pub fn could_match_class(&self, class: &ClassMetaData) -> bool {
		self.pointcuts.values()
			.flat_map(|p| p.patterns.values().chain(p.cflows.values()))
			.any(|tuple| tuple.pattern().could_match(class))
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use anyhow::Result;
	use shuttle::tree::class::ClassName;
	use shuttle::tree::method::{MethodAccess, MethodDescriptor, MethodName};
	use crate::aspect::metadata::{AspectMetaData, IndexTuple};
	use crate::definition::{DeploymentModel, PointcutKind};
	use crate::error::DefinitionError;
	use crate::metadata::{ClassMetaData, MemberMetaData, MethodMetaData};

	fn aspect() -> Result<AspectMetaData> {
		let mut aspect = AspectMetaData::new("logging", "Logging", DeploymentModel::PerJvm);
		aspect.add_named_pointcut("m", PointcutKind::Execution, "void test.C.m()")?;
		aspect.add_named_pointcut("all", PointcutKind::Execution, "* test.*.*(..)")?;
		aspect.add_named_pointcut("calls", PointcutKind::Call, "test.Caller->void test.C.m()")?;
		aspect.add_named_pointcut("count", PointcutKind::Get, "int test.C.count")?;
		Ok(aspect)
	}

	fn method(name: &str, descriptor: &str) -> Result<MemberMetaData> {
		let method = MethodMetaData::new(MethodName::try_from(name)?, MethodDescriptor::try_from(descriptor)?, MethodAccess::default(), Vec::new())?;
		Ok(MemberMetaData::Method(method))
	}

	#[test]
	fn idempotent_registration() -> Result<()> {
		let mut aspect = aspect()?;
		let class = ClassMetaData::unresolved(&ClassName::try_from("test/C")?);
		let member = method("m", "()V")?;

		aspect.add_pointcut("m")?;
		assert_eq!(aspect.get_execution_pointcuts(&class, &member).len(), 1);
		aspect.add_pointcut("m")?;
		aspect.add_pointcut(" m ")?;
		assert_eq!(aspect.get_execution_pointcuts(&class, &member).len(), 1);

		aspect.add_advice("m", IndexTuple { aspect: 1, method: 0 })?;
		aspect.add_advice("m", IndexTuple { aspect: 1, method: 0 })?;
		let pointcuts = aspect.get_execution_pointcuts(&class, &member);
		assert_eq!(pointcuts.len(), 1);
		assert_eq!(pointcuts[0].advices(), [IndexTuple { aspect: 1, method: 0 }]);

		aspect.add_pointcut("all && !m")?;
		assert_eq!(aspect.get_execution_pointcuts(&class, &member).len(), 1);
		assert_eq!(aspect.get_execution_pointcuts(&class, &method("other", "(I)V")?).len(), 1);
		Ok(())
	}

	#[test]
	fn cflow_gates() -> Result<()> {
		let mut aspect = aspect()?;
		aspect.add_pointcut("all && cflow(calls)")?;

		let all = aspect.named.get("all").cloned();
		let calls = aspect.named.get("calls").cloned();
		let (Some(all), Some(calls)) = (all, calls) else {
			anyhow::bail!("named pointcuts missing");
		};
		assert_eq!(aspect.get_cflow_patterns(&all), [calls]);
		assert_eq!(aspect.cflow_sources().count(), 1);
		Ok(())
	}

	#[test]
	fn definition_errors() -> Result<()> {
		let mut aspect = aspect()?;

		let error = aspect.add_named_pointcut("broken", PointcutKind::Execution, "void m(").unwrap_err();
		assert!(matches!(
			error.downcast_ref::<DefinitionError>(),
			Some(DefinitionError::MalformedPattern { pointcut, .. }) if pointcut == "broken"
		));

		let error = aspect.add_pointcut("m && count").unwrap_err();
		assert!(matches!(error.downcast_ref::<DefinitionError>(), Some(DefinitionError::MixedPointcutKinds { .. })));

		let error = aspect.add_pointcut("missing").unwrap_err();
		assert!(matches!(error.downcast_ref::<DefinitionError>(), Some(DefinitionError::UnknownPointcut { .. })));

		let error = aspect.add_pointcut("cflow(calls)").unwrap_err();
		assert!(matches!(error.downcast_ref::<DefinitionError>(), Some(DefinitionError::MalformedExpression { .. })));

		let error = aspect.add_pointcut("m && cflow(count)").unwrap_err();
		assert!(matches!(error.downcast_ref::<DefinitionError>(), Some(DefinitionError::MalformedExpression { .. })));
		Ok(())
	}
}
