//! The runtime side of weaving: the `weft/runtime/JoinPointManager` class woven code calls into, and its native
//! methods dispatching to the advice.

mod manager;

pub use manager::JoinPointManager;

use std::sync::{Arc, Weak};
use anyhow::{anyhow, Result};
use log::debug;
use shuttle::tree::class::{ClassAccess, ClassFile, ClassName};
use shuttle::tree::method::{Method, MethodAccess, MethodDescriptor, MethodName, MethodRef};
use shuttle::vm::error::VmResult;
use shuttle::vm::lifecycle::LifecycleListener;
use shuttle::vm::value::Value;
use shuttle::vm::Runtime;
use crate::error::DispatchError;
use crate::joinpoint::JoinPointKind;
use crate::system::SystemRegistry;
use crate::transform::WeavingPipeline;

pub(crate) const MANAGER_CLASS: &str = "weft/runtime/JoinPointManager";

/// A native method of the join point manager class.
#[derive(Debug, Copy, Clone)]
pub(crate) struct NativeSignature {
	pub(crate) name: &'static str,
	pub(crate) descriptor: &'static str,
	pub(crate) is_static: bool,
}

impl NativeSignature {
	pub(crate) fn method_ref(&self) -> MethodRef {
		MethodRef::new(manager_class(), MethodName::new_unchecked(self.name), MethodDescriptor::new_unchecked(self.descriptor))
	}

	fn method(&self) -> Method {
		let access = MethodAccess { is_public: true, is_native: true, is_static: self.is_static, ..MethodAccess::default() };
		Method::new(access, MethodName::new_unchecked(self.name), MethodDescriptor::new_unchecked(self.descriptor))
	}
}

pub(crate) const GET_MANAGER: NativeSignature = NativeSignature {
	name: "getJoinPointManager",
	descriptor: "(Ljava/lang/Class;Ljava/lang/String;)Lweft/runtime/JoinPointManager;",
	is_static: true,
};

/// `(hash, index, args, this, kind)`
pub(crate) const PROCEED_EXECUTION: NativeSignature = NativeSignature {
	name: "proceedWithExecutionJoinPoint",
	descriptor: "(II[Ljava/lang/Object;Ljava/lang/Object;I)Ljava/lang/Object;",
	is_static: false,
};

/// `(hash, index, args, target, this, callee class, kind)`
pub(crate) const PROCEED_CALL: NativeSignature = NativeSignature {
	name: "proceedWithCallJoinPoint",
	descriptor: "(II[Ljava/lang/Object;Ljava/lang/Object;Ljava/lang/Object;Ljava/lang/Class;I)Ljava/lang/Object;",
	is_static: false,
};

/// `(hash, index, target, this, declaring class)`
pub(crate) const PROCEED_GET: NativeSignature = NativeSignature {
	name: "proceedWithGetJoinPoint",
	descriptor: "(IILjava/lang/Object;Ljava/lang/Object;Ljava/lang/Class;)Ljava/lang/Object;",
	is_static: false,
};

/// `(hash, index, value, target, this, declaring class)`
pub(crate) const PROCEED_SET: NativeSignature = NativeSignature {
	name: "proceedWithSetJoinPoint",
	descriptor: "(IILjava/lang/Object;Ljava/lang/Object;Ljava/lang/Object;Ljava/lang/Class;)V",
	is_static: false,
};

/// `(mixin index, method index, args, this)`
pub(crate) const INVOKE_MIXIN: NativeSignature = NativeSignature {
	name: "invokeMixin",
	descriptor: "(II[Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;",
	is_static: false,
};

const NATIVES: [NativeSignature; 6] = [GET_MANAGER, PROCEED_EXECUTION, PROCEED_CALL, PROCEED_GET, PROCEED_SET, INVOKE_MIXIN];

pub(crate) fn manager_class() -> ClassName {
	ClassName::new_unchecked(MANAGER_CLASS)
}

fn manager_class_file() -> Result<ClassFile> {
	let access = ClassAccess { is_public: true, is_final: true, is_super: true, ..ClassAccess::default() };
	let mut class = ClassFile::new(access, manager_class(), Some(ClassName::java_lang_object()), Vec::new());
	for native in NATIVES {
		class.add_method(native.method())?;
	}
	Ok(class)
}

fn malformed(message: impl Into<String>) -> anyhow::Error {
	DispatchError::MalformedArguments(message.into()).into()
}

struct Args(Vec<Value>);

impl Args {
	fn get(&self, index: usize) -> Result<&Value> {
		self.0.get(index).ok_or_else(|| malformed(format!("missing argument {index}")))
	}

	fn int(&self, index: usize) -> Result<i32> {
		self.get(index)?.as_int().ok_or_else(|| malformed(format!("argument {index} is not an int")))
	}

	fn index(&self, index: usize) -> Result<u32> {
		u32::try_from(self.int(index)?).map_err(|_| malformed(format!("argument {index} is a negative index")))
	}

	fn kind(&self, index: usize) -> Result<JoinPointKind> {
		Ok(JoinPointKind::try_from(self.int(index)?)?)
	}

	/// The elements of an `Object[]`, with `null` being no elements.
	fn array(&self, index: usize) -> Result<Vec<Value>> {
		match self.get(index)? {
			Value::Null => Ok(Vec::new()),
			Value::Array(array) => Ok(array.to_vec()),
			other => Err(malformed(format!("argument {index} is not an array but {other:?}"))),
		}
	}

	fn optional(&self, index: usize) -> Result<Option<Value>> {
		let value = self.get(index)?;
		Ok((!value.is_null()).then(|| value.clone()))
	}

	fn class(&self, index: usize) -> Result<ClassName> {
		self.get(index)?.as_class().cloned().ok_or_else(|| malformed(format!("argument {index} is not a class")))
	}
}

fn receiver(receiver: Option<Value>) -> Result<Arc<JoinPointManager>> {
	receiver.as_ref()
		.and_then(Value::downcast_host::<JoinPointManager>)
		.ok_or_else(|| malformed("receiver is not a join point manager"))
}

/// Adds the join point manager class to the runtime and registers its native methods, dispatching into the systems
/// of the registry. The registry also gets to know when objects and threads go away.
pub fn install_natives(runtime: &Runtime, registry: &Arc<SystemRegistry>) -> Result<()> {
	runtime.add_class(&manager_class_file()?)?;

	let systems = registry.clone();
	runtime.register_native(GET_MANAGER.method_ref(), move |_: &Runtime, _: Option<Value>, args: Vec<Value>| -> VmResult<Value> {
		let args = Args(args);
		let class = args.class(0)?;
		let uuid = args.get(1)?.as_str().ok_or_else(|| malformed("system uuid is not a string"))?;
		let manager = systems.join_point_manager(uuid, &class);
		Ok(Value::host(manager_class(), manager))
	});

	runtime.register_native(PROCEED_EXECUTION.method_ref(), |runtime: &Runtime, manager: Option<Value>, args: Vec<Value>| -> VmResult<Value> {
		let manager = receiver(manager)?;
		let args = Args(args);
		manager.proceed_with_execution(runtime, args.int(0)?, args.index(1)?, args.array(2)?, args.optional(3)?, args.kind(4)?)
	});

	runtime.register_native(PROCEED_CALL.method_ref(), |runtime: &Runtime, manager: Option<Value>, args: Vec<Value>| -> VmResult<Value> {
		let manager = receiver(manager)?;
		let args = Args(args);
		manager.proceed_with_call(
			runtime,
			args.int(0)?,
			args.index(1)?,
			args.array(2)?,
			args.optional(3)?,
			args.optional(4)?,
			&args.class(5)?,
			args.kind(6)?,
		)
	});

	runtime.register_native(PROCEED_GET.method_ref(), |runtime: &Runtime, manager: Option<Value>, args: Vec<Value>| -> VmResult<Value> {
		let manager = receiver(manager)?;
		let args = Args(args);
		manager.proceed_with_get(runtime, args.int(0)?, args.index(1)?, args.optional(2)?, args.optional(3)?, &args.class(4)?)
	});

	runtime.register_native(PROCEED_SET.method_ref(), |runtime: &Runtime, manager: Option<Value>, args: Vec<Value>| -> VmResult<Value> {
		let manager = receiver(manager)?;
		let args = Args(args);
		let value = args.get(2)?.clone();
		manager.proceed_with_set(runtime, args.int(0)?, args.index(1)?, value, args.optional(3)?, args.optional(4)?, &args.class(5)?)?;
		Ok(Value::Null)
	});

	runtime.register_native(INVOKE_MIXIN.method_ref(), |runtime: &Runtime, manager: Option<Value>, args: Vec<Value>| -> VmResult<Value> {
		let manager = receiver(manager)?;
		let args = Args(args);
		let this = args.get(3)?.clone();
		manager.invoke_mixin(runtime, args.index(0)? as usize, args.index(1)? as usize, args.array(2)?, this)
	});

	let listener: Weak<dyn LifecycleListener> = Arc::downgrade(registry) as Weak<dyn LifecycleListener>;
	runtime.add_lifecycle_listener(listener);
	debug!("installed the join point manager natives into runtime {}", shuttle::vm::ClassLoaderContext::id(runtime));
	Ok(())
}

/// Sets a runtime up for load time weaving: installs the natives and weaves every class loaded afterwards for the
/// given systems.
pub fn install(runtime: &Runtime, registry: &Arc<SystemRegistry>, uuids: &[&str]) -> Result<Arc<WeavingPipeline>> {
	if uuids.is_empty() {
		return Err(anyhow!("no system to weave for"));
	}
	install_natives(runtime, registry)?;
	let pipeline = Arc::new(WeavingPipeline::new(registry.clone(), uuids.iter().map(|uuid| uuid.to_string()).collect()));
	runtime.add_transformer(pipeline.clone());
	Ok(pipeline)
}
