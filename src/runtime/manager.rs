use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use anyhow::{anyhow, Context, Result};
use log::{debug, trace};
use parking_lot::RwLock;
use shuttle::tree::class::{ClassFile, ClassName};
use shuttle::tree::method::{Method, MethodDescriptor};
use shuttle::vm::error::{VmError, VmResult};
use shuttle::vm::value::Value;
use shuttle::vm::Runtime;
use crate::aspect::container::DeploymentContext;
use crate::definition::PointcutKind;
use crate::error::DispatchError;
use crate::joinpoint::{field_hash, method_hash, ChainLink, JoinPoint, JoinPointInfo, JoinPointKind, Original};
use crate::metadata::{FieldMetaData, MemberMetaData, MetaDataResolver, MethodMetaData};
use crate::system::{AspectSystem, MatchedPointcut};
use crate::transform::attributes::{find_prefixed, WrapperMarker};
use crate::transform::naming::is_weft_member;

/// Everything about a join point that doesn't change between dispatches.
struct Plan {
	hash: i32,
	info: Arc<JoinPointInfo>,
	original: Original,
	/// The checked exceptions the join point may throw.
	declared: Vec<ClassName>,
	pointcuts: Vec<MatchedPointcut>,
	/// Whether some cflow pointcut needs to know when the thread is in this join point.
	cflow_source: bool,
}

/// Dispatches the join points of one woven class to the advice of one system.
///
/// Woven code finds its manager through a static field set up by the static initializer of the class. Join points
/// are identified by the hash of their member and an index unique within the class.
pub struct JoinPointManager {
	system: Arc<AspectSystem>,
	class: ClassName,
	plans: RwLock<HashMap<(JoinPointKind, u32), Arc<Plan>>>,
}

impl Debug for JoinPointManager {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("JoinPointManager")
			.field("system", &self.system.uuid())
			.field("class", &self.class)
			.finish_non_exhaustive()
	}
}

fn unknown(class: &ClassName, hash: i32, index: u32) -> anyhow::Error {
	DispatchError::UnknownJoinPoint { class: class.to_string(), hash, index }.into()
}

impl JoinPointManager {
	pub(crate) fn new(system: Arc<AspectSystem>, class: ClassName) -> JoinPointManager {
		JoinPointManager { system, class, plans: RwLock::new(HashMap::new()) }
	}

	pub fn system(&self) -> &Arc<AspectSystem> {
		&self.system
	}

	/// The class containing the join points.
	pub fn class(&self) -> &ClassName {
		&self.class
	}

	fn cached(&self, kind: JoinPointKind, hash: i32, index: u32) -> Result<Option<Arc<Plan>>> {
		match self.plans.read().get(&(kind, index)) {
			Some(plan) if plan.hash != hash => Err(unknown(&self.class, hash, index)),
			Some(plan) => Ok(Some(plan.clone())),
			None => Ok(None),
		}
	}

	fn plan(&self, kind: JoinPointKind, hash: i32, index: u32, build: impl FnOnce() -> Result<Plan>) -> Result<Arc<Plan>> {
		if let Some(plan) = self.cached(kind, hash, index)? {
			return Ok(plan);
		}

		let plan = Arc::new(build()?);
		if plan.hash != hash {
			return Err(unknown(&self.class, hash, index));
		}
		debug!(
			"join point {} {index} of class {} has {} matching pointcuts",
			kind.tag(), self.class, plan.pointcuts.len(),
		);
		Ok(self.plans.write().entry((kind, index)).or_insert(plan).clone())
	}

	/// Runs the execution of a method or constructor through its advice.
	///
	/// `this` is `None` for static methods.
	pub fn proceed_with_execution(
		&self,
		runtime: &Runtime,
		hash: i32,
		index: u32,
		args: Vec<Value>,
		this: Option<Value>,
		kind: JoinPointKind,
	) -> VmResult<Value> {
		if !kind.is_execution() {
			return Err(anyhow::Error::from(DispatchError::UnknownKind(kind.tag())).into());
		}
		let class = runtime.load_class(&self.class)?;
		let plan = self.plan(kind, hash, index, || self.execution_plan(runtime, class.file(), kind, hash, index))?;
		self.run(runtime, &plan, args, this.clone(), this)
	}

	fn execution_plan(&self, runtime: &Runtime, class: &ClassFile, kind: JoinPointKind, hash: i32, index: u32) -> Result<Plan> {
		let uuid = self.system.uuid();
		if !class.methods.iter().any(|m| WrapperMarker::wraps(m, uuid, index)) {
			return Err(unknown(&self.class, hash, index));
		}
		let (prefixed, marker) = find_prefixed(&class.methods, index)
			.ok_or_else(|| unknown(&self.class, hash, index))?;
		if marker.original.is_init() != (kind == JoinPointKind::ConstructorExecution) {
			return Err(unknown(&self.class, hash, index));
		}
		// the method with the original signature may wrap this join point for another system
		let declared = class.method(&marker.original, &prefixed.descriptor)
			.ok_or_else(|| unknown(&self.class, hash, index))?;

		let method = MethodMetaData::new(marker.original.clone(), prefixed.descriptor.clone(), declared.access, declared.exceptions.clone())?;
		let member_hash = method_hash(&method);
		let mut resolver = MetaDataResolver::new(runtime);
		let class_meta = resolver.resolve(&self.class);
		let member = MemberMetaData::Method(method);

		let mut pointcuts = self.system.execution_pointcuts(&class_meta, &member)?.to_vec();
		pointcuts.extend(self.system.throws_pointcuts(&class_meta, &member)?.iter().cloned());

		let info = Arc::new(JoinPointInfo { kind, caller: None, class: class_meta, member });
		trace!("{} is gated by {} cflow patterns", info.signature(), self.system.cflow_pointcuts(kind.pointcut_kind(), &info.match_target())?.len());
		Ok(Plan {
			hash: member_hash,
			original: Original::Prefixed {
				class: self.class.clone(),
				name: prefixed.name.clone(),
				descriptor: prefixed.descriptor.clone(),
				is_static: prefixed.access.is_static,
			},
			declared: declared.exceptions.clone(),
			info,
			pointcuts,
			cflow_source: false,
		})
	}

	/// Runs a call from this class to a method or constructor of `callee` through its advice.
	///
	/// `target` is the receiver of instance method calls, `this` the object making the call.
	#[allow(clippy::too_many_arguments)]
	pub fn proceed_with_call(
		&self,
		runtime: &Runtime,
		hash: i32,
		index: u32,
		args: Vec<Value>,
		target: Option<Value>,
		this: Option<Value>,
		callee: &ClassName,
		kind: JoinPointKind,
	) -> VmResult<Value> {
		if !kind.is_call() {
			return Err(anyhow::Error::from(DispatchError::UnknownKind(kind.tag())).into());
		}
		let plan = match self.cached(kind, hash, index)? {
			Some(plan) => plan,
			None => {
				let found = self.find_callee(runtime, callee, kind, hash)?;
				self.plan(kind, hash, index, || {
					let (declaring, method) = found.ok_or_else(|| unknown(&self.class, hash, index))?;
					self.call_plan(runtime, callee, declaring, &method, kind)
				})?
			},
		};
		self.run(runtime, &plan, args, target, this)
	}

	/// Finds the method with the hash in the callee or the classes and interfaces it extends.
	fn find_callee(&self, runtime: &Runtime, callee: &ClassName, kind: JoinPointKind, hash: i32) -> VmResult<Option<(ClassName, Method)>> {
		let constructor = kind == JoinPointKind::ConstructorCall;
		let mut queue = vec![callee.clone()];
		let mut seen = Vec::new();
		while let Some(name) = queue.pop() {
			if seen.contains(&name) {
				continue;
			}
			let class = runtime.load_class(&name)?;
			let file = class.file();
			let found = file.methods.iter()
				.filter(|m| !is_weft_member(m.name.as_str()) && m.name.is_init() == constructor)
				.find(|m| MethodMetaData::from_method(m).is_ok_and(|meta| method_hash(&meta) == hash));
			if let Some(method) = found {
				return Ok(Some((name, method.clone())));
			}
			if !constructor {
				queue.extend(file.interfaces.iter().rev().cloned());
				queue.extend(file.super_class.iter().cloned());
			}
			seen.push(name);
		}
		Ok(None)
	}

	fn call_plan(&self, runtime: &Runtime, callee: &ClassName, declaring: ClassName, method: &Method, kind: JoinPointKind) -> Result<Plan> {
		let meta = MethodMetaData::from_method(method)
			.with_context(|| anyhow!("failed to describe the callee {declaring}.{}{}", method.name, method.descriptor))?;
		let hash = method_hash(&meta);
		let mut resolver = MetaDataResolver::new(runtime);
		let caller = resolver.resolve(&self.class);
		let class_meta = resolver.resolve(callee);
		let member = MemberMetaData::Method(meta);

		let pointcuts = self.system.call_pointcuts(&caller, &class_meta, &member)?.to_vec();
		let cflow_source = self.system.is_cflow_source(&caller, &class_meta, &member)?;
		let original = original_call(callee, declaring, method, kind);

		Ok(Plan {
			hash,
			info: Arc::new(JoinPointInfo { kind, caller: Some(caller), class: class_meta, member }),
			original,
			declared: method.exceptions.clone(),
			pointcuts,
			cflow_source,
		})
	}

	/// Runs a read of a field of `class` from this class through its advice.
	pub fn proceed_with_get(
		&self,
		runtime: &Runtime,
		hash: i32,
		index: u32,
		target: Option<Value>,
		this: Option<Value>,
		class: &ClassName,
	) -> VmResult<Value> {
		let plan = self.field_plan(runtime, JoinPointKind::FieldGet, hash, index, class)?;
		self.run(runtime, &plan, Vec::new(), target, this)
	}

	/// Runs a write of a field of `class` from this class through its advice. The value is boxed.
	#[allow(clippy::too_many_arguments)]
	pub fn proceed_with_set(
		&self,
		runtime: &Runtime,
		hash: i32,
		index: u32,
		value: Value,
		target: Option<Value>,
		this: Option<Value>,
		class: &ClassName,
	) -> VmResult<()> {
		let plan = self.field_plan(runtime, JoinPointKind::FieldSet, hash, index, class)?;
		self.run(runtime, &plan, vec![value], target, this)?;
		Ok(())
	}

	fn field_plan(&self, runtime: &Runtime, kind: JoinPointKind, hash: i32, index: u32, class: &ClassName) -> VmResult<Arc<Plan>> {
		if let Some(plan) = self.cached(kind, hash, index)? {
			return Ok(plan);
		}
		// the field may be declared by a super class
		let mut found = None;
		let mut current = Some(class.clone());
		while let Some(name) = current {
			let loaded = runtime.load_class(&name)?;
			let field = loaded.file().fields.iter()
				.filter(|f| !is_weft_member(f.name.as_str()))
				.find(|f| FieldMetaData::from_field(f).is_ok_and(|meta| field_hash(meta.name().as_str(), meta.type_name()) == hash));
			if let Some(field) = field {
				found = Some((name, field.clone()));
				break;
			}
			current = loaded.file().super_class.clone();
		}

		Ok(self.plan(kind, hash, index, || {
			let (declaring, field) = found.ok_or_else(|| unknown(&self.class, hash, index))?;
			let meta = FieldMetaData::from_field(&field)?;
			let member_hash = field_hash(meta.name().as_str(), meta.type_name());
			let mut resolver = MetaDataResolver::new(runtime);
			let caller = resolver.resolve(&self.class);
			let class_meta = resolver.resolve(class);
			let member = MemberMetaData::Field(meta);

			let pointcuts = match kind {
				JoinPointKind::FieldSet => self.system.set_pointcuts(&class_meta, &member)?,
				_ => self.system.get_pointcuts(&class_meta, &member)?,
			};
			let is_static = field.access.is_static;
			let original = match kind {
				JoinPointKind::FieldSet => Original::SetField { class: declaring, name: field.name.clone(), is_static },
				_ => Original::GetField { class: declaring, name: field.name.clone(), is_static },
			};
			Ok(Plan {
				hash: member_hash,
				info: Arc::new(JoinPointInfo { kind, caller: Some(caller), class: class_meta, member }),
				original,
				declared: Vec::new(),
				pointcuts: pointcuts.to_vec(),
				cflow_source: false,
			})
		})?)
	}

	/// Builds the advice chain for one dispatch: the advice of every pointcut that matches right now.
	fn chain(&self, plan: &Plan, context: &DeploymentContext) -> Result<Vec<ChainLink>> {
		let target = plan.info.match_target();
		let mut chain = Vec::new();
		for matched in &plan.pointcuts {
			let pointcut = &matched.pointcut;
			if pointcut.has_cflow() {
				let target = match pointcut.kind() {
					PointcutKind::Throws => target.with_exception(None),
					_ => target,
				};
				if !pointcut.match_runtime(&target, self.system.cflow()) {
					continue;
				}
			}
			for advice in pointcut.advices() {
				let aspect = self.system.get_aspect(advice.aspect)?;
				let body = aspect.advice(advice.method)
					.ok_or_else(|| anyhow!("aspect {:?} has no advice {}", aspect.name(), advice.method))?
					.body.clone();
				chain.push(ChainLink {
					aspect: Arc::from(aspect.name()),
					body,
					instance: aspect.container().instance(context),
					pointcut: pointcut.clone(),
				});
			}
		}
		Ok(chain)
	}

	fn run(&self, runtime: &Runtime, plan: &Plan, args: Vec<Value>, target: Option<Value>, this: Option<Value>) -> VmResult<Value> {
		let context = DeploymentContext::current(self.class.clone(), this.as_ref().and_then(Value::object_id));
		let _guard = plan.cflow_source.then(|| self.system.cflow().scoped(plan.info.clone()));

		let chain = self.chain(plan, &context)?;
		trace!("running {} advice at {}", chain.len(), plan.info.signature());
		let mut join_point = JoinPoint::new(runtime, &plan.info, &chain, &plan.original, args, target, this);
		match join_point.proceed() {
			Err(VmError::Thrown(exception)) => Err(undeclared(runtime, &plan.declared, exception)),
			other => other,
		}
	}

	/// Runs a method of an introduced mixin, on the instance for the object `this`.
	pub fn invoke_mixin(&self, runtime: &Runtime, mixin: usize, method: usize, args: Vec<Value>, this: Value) -> VmResult<Value> {
		let found = self.system.get_mixin(mixin)?;
		let (Some(class), Some(container)) = (found.class(), found.container()) else {
			return Err(anyhow!("introduction {:?} has no implementation", found.name()).into());
		};
		let introduced = class.methods().get(method)
			.ok_or_else(|| anyhow!("mixin {:?} has no method {method}", class.name()))?;
		trace!("invoking {}{} of mixin {:?}", introduced.name, introduced.descriptor, class.name());

		let context = DeploymentContext::current(self.class.clone(), this.object_id());
		let instance = container.instance(&context);
		(introduced.body)(&*instance, runtime, &this, args)
	}
}

fn original_call(callee: &ClassName, declaring: ClassName, method: &Method, kind: JoinPointKind) -> Original {
	let descriptor = method.descriptor.clone();
	if kind == JoinPointKind::ConstructorCall {
		Original::Constructor { class: callee.clone(), descriptor }
	} else if method.access.is_static {
		Original::Static { class: declaring, name: method.name.clone(), descriptor }
	} else {
		Original::Virtual { name: method.name.clone(), descriptor }
	}
}

/// Checked exceptions the join point doesn't declare are wrapped, so callers only see what they expect.
fn undeclared(runtime: &Runtime, declared: &[ClassName], exception: Value) -> VmError {
	let checked = || -> VmResult<bool> {
		if !runtime.is_instance(&exception, &ClassName::new_unchecked("java/lang/Exception"))? ||
			runtime.is_instance(&exception, &ClassName::new_unchecked("java/lang/RuntimeException"))? {
			return Ok(false);
		}
		for class in declared {
			if runtime.is_instance(&exception, class)? {
				return Ok(false);
			}
		}
		Ok(true)
	};
	match checked() {
		Ok(false) => VmError::Thrown(exception),
		Ok(true) => {
			trace!("wrapping undeclared exception {exception:?}");
			let descriptor = MethodDescriptor::new_unchecked("(Ljava/lang/Throwable;)V");
			let class = ClassName::new_unchecked("java/lang/reflect/UndeclaredThrowableException");
			match runtime.new_object(&class, &descriptor, vec![exception]) {
				Ok(wrapped) => VmError::Thrown(wrapped),
				Err(e) => e,
			}
		},
		Err(e) => e,
	}
}
