use std::sync::Arc;
use log::trace;
use shuttle::tree::class::ClassName;
use shuttle::tree::field::FieldName;
use shuttle::tree::method::{MethodDescriptor, MethodName};
use shuttle::vm::error::{VmError, VmResult};
use shuttle::vm::value::Value;
use shuttle::vm::Runtime;
use crate::aspect::{AdviceBody, AspectInstance};
use crate::aspect::metadata::Pointcut;
use crate::joinpoint::{JoinPointInfo, JoinPointKind};
use crate::metadata::MetaDataResolver;

/// The operation advice wraps, run at the end of the chain.
#[derive(Debug, Clone)]
pub(crate) enum Original {
	/// The renamed body of a method, or of a constructor after its `super(...)` call.
	Prefixed {
		class: ClassName,
		name: MethodName,
		descriptor: MethodDescriptor,
		is_static: bool,
	},
	Virtual {
		name: MethodName,
		descriptor: MethodDescriptor,
	},
	Static {
		class: ClassName,
		name: MethodName,
		descriptor: MethodDescriptor,
	},
	Constructor {
		class: ClassName,
		descriptor: MethodDescriptor,
	},
	GetField {
		class: ClassName,
		name: FieldName,
		is_static: bool,
	},
	SetField {
		class: ClassName,
		name: FieldName,
		is_static: bool,
	},
}

/// An advice together with the aspect instance to run it on.
pub(crate) struct ChainLink {
	pub(crate) aspect: Arc<str>,
	pub(crate) body: AdviceBody,
	pub(crate) instance: AspectInstance,
	pub(crate) pointcut: Arc<Pointcut>,
}

impl ChainLink {
	fn invoke(&self, join_point: &mut JoinPoint<'_>) -> VmResult<Value> {
		trace!("running advice of aspect {} at {}", self.aspect, join_point.signature());
		let instance = &*self.instance;
		match &self.body {
			AdviceBody::Around(body) => body(instance, join_point),
			AdviceBody::Before(body) => {
				body(instance, join_point)?;
				join_point.proceed()
			},
			AdviceBody::After(body) => {
				let result = join_point.proceed()?;
				body(instance, join_point, &result)?;
				Ok(result)
			},
			AdviceBody::Throws(body) => match join_point.proceed() {
				Err(VmError::Thrown(exception)) => {
					if self.matches_exception(join_point, &exception) {
						body(instance, join_point, &exception)?;
					}
					Err(VmError::Thrown(exception))
				},
				other => other,
			},
		}
	}

	fn matches_exception(&self, join_point: &JoinPoint<'_>, exception: &Value) -> bool {
		let Some(class) = join_point.runtime.class_of(exception) else {
			return false;
		};
		let exception = MetaDataResolver::new(join_point.runtime).resolve(&class);
		self.pointcut.matches_exception(join_point.info, &exception)
	}
}

/// A join point being run, handed to advice.
///
/// Advice calls [`JoinPoint::proceed`] to run the next advice, or the original operation if there's no more.
pub struct JoinPoint<'a> {
	runtime: &'a Runtime,
	info: &'a JoinPointInfo,
	chain: &'a [ChainLink],
	original: &'a Original,
	position: usize,
	args: Vec<Value>,
	target: Option<Value>,
	this: Option<Value>,
}

impl<'a> JoinPoint<'a> {
	pub(crate) fn new(
		runtime: &'a Runtime,
		info: &'a JoinPointInfo,
		chain: &'a [ChainLink],
		original: &'a Original,
		args: Vec<Value>,
		target: Option<Value>,
		this: Option<Value>,
	) -> JoinPoint<'a> {
		JoinPoint { runtime, info, chain, original, position: 0, args, target, this }
	}

	/// Runs the rest of the chain. May be called any number of times, or not at all.
	pub fn proceed(&mut self) -> VmResult<Value> {
		let chain = self.chain;
		match chain.get(self.position) {
			Some(link) => {
				let saved = self.position;
				self.position += 1;
				let result = link.invoke(self);
				self.position = saved;
				result
			},
			None => self.invoke_original(),
		}
	}

	fn invoke_original(&self) -> VmResult<Value> {
		let runtime = self.runtime;
		let args = self.args.clone();
		match self.original {
			Original::Prefixed { class, name, descriptor, is_static: true } => {
				runtime.invoke_static(class, name, descriptor, args)
			},
			Original::Prefixed { class, name, descriptor, is_static: false } => {
				runtime.invoke_special(class, name, descriptor, self.target_or_null(), args)
			},
			Original::Virtual { name, descriptor } => {
				runtime.invoke_virtual(self.target_or_null(), name, descriptor, args)
			},
			Original::Static { class, name, descriptor } => runtime.invoke_static(class, name, descriptor, args),
			Original::Constructor { class, descriptor } => runtime.new_object(class, descriptor, args),
			Original::GetField { class, name, is_static: true } => runtime.get_static(class, name),
			Original::GetField { name, is_static: false, .. } => runtime.get_field(&self.target_or_null(), name),
			Original::SetField { class, name, is_static } => {
				let value = self.args.first().cloned().unwrap_or(Value::Null);
				if *is_static {
					runtime.put_static(class, name, value)?;
				} else {
					runtime.put_field(&self.target_or_null(), name, value)?;
				}
				Ok(Value::Null)
			},
		}
	}

	fn target_or_null(&self) -> Value {
		self.target.clone().unwrap_or(Value::Null)
	}

	pub fn runtime(&self) -> &'a Runtime {
		self.runtime
	}

	pub fn info(&self) -> &'a JoinPointInfo {
		self.info
	}

	pub fn kind(&self) -> JoinPointKind {
		self.info.kind
	}

	/// The arguments, or the value to be written for a field write.
	pub fn args(&self) -> &[Value] {
		&self.args
	}

	/// Replaces an argument for the rest of the chain. Returns `false` if there's no argument at that index.
	pub fn set_arg(&mut self, index: usize, value: Value) -> bool {
		match self.args.get_mut(index) {
			Some(slot) => {
				*slot = value;
				true
			},
			None => false,
		}
	}

	/// The object the method runs on, or the field belongs to. `None` for static members and constructor calls.
	pub fn target(&self) -> Option<&Value> {
		self.target.as_ref()
	}

	/// The object containing the call site or field access, if it's in a non static method.
	pub fn this(&self) -> Option<&Value> {
		self.this.as_ref()
	}

	pub fn signature(&self) -> String {
		self.info.signature()
	}
}
