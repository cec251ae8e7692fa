//! A small interpreter for the [`crate::tree`] model.
//!
//! Classes are loaded lazily from the class path of a [`Runtime`], passing through every registered
//! [`ClassFileTransformer`] first. Each class is initialized (its `<clinit>` run) at most once, on first active use.

pub mod error;
pub mod lifecycle;
pub mod native;
pub mod value;
mod bootstrap;
mod interpreter;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{JoinHandle, ThreadId};
use anyhow::{anyhow, bail, Context};
use indexmap::IndexMap;
use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex, RwLock};
use crate::codec;
use crate::tree::class::{ClassFile, ClassName};
use crate::tree::field::{FieldDescriptor, FieldName};
use crate::tree::method::code::Label;
use crate::tree::method::{Method, MethodDescriptor, MethodName, MethodRef};
use crate::vm::error::{VmError, VmResult};
use crate::vm::lifecycle::{LifecycleListener, Listeners};
use crate::vm::native::NativeMethod;
use crate::vm::value::{Array, Object, Value};

/// Gives access to the untransformed classes a class loader can see.
pub trait ClassLoaderContext {
	/// An id unique for each class loader, usable as a cache key.
	fn id(&self) -> u64;

	fn find_class_file(&self, name: &ClassName) -> Option<ClassFile>;
}

/// A hook invoked once per class definition, before the class is parsed.
///
/// Implementations must return the input bytes if they don't want to (or can't) change the class.
pub trait ClassFileTransformer: Send + Sync {
	fn pre_process(&self, name: &ClassName, bytes: &[u8], context: &dyn ClassLoaderContext) -> Vec<u8>;
}

/// A class after loading.
pub struct RuntimeClass {
	file: ClassFile,
	methods: Vec<Arc<PreparedMethod>>,
	statics: Mutex<IndexMap<FieldName, Value>>,
}

impl RuntimeClass {
	fn new(file: ClassFile) -> anyhow::Result<RuntimeClass> {
		let methods = file.methods.iter()
			.map(|method| PreparedMethod::new(&file.name, method.clone()).map(Arc::new))
			.collect::<anyhow::Result<_>>()?;

		let mut statics = IndexMap::new();
		for field in file.fields.iter().filter(|f| f.access.is_static) {
			statics.insert(field.name.clone(), Value::default_for(&field.descriptor.parse()?));
		}

		Ok(RuntimeClass { file, methods, statics: Mutex::new(statics) })
	}

	/// The class as it was defined, after all transformations.
	pub fn file(&self) -> &ClassFile {
		&self.file
	}

	fn method(&self, name: &MethodName, descriptor: &MethodDescriptor) -> Option<&Arc<PreparedMethod>> {
		self.methods.iter().find(|m| &m.method.name == name && &m.method.descriptor == descriptor)
	}
}

pub(crate) struct PreparedMethod {
	pub(crate) class: ClassName,
	pub(crate) method: Method,
	pub(crate) labels: HashMap<Label, usize>,
	pub(crate) parameter_count: usize,
}

impl PreparedMethod {
	fn new(class: &ClassName, method: Method) -> anyhow::Result<PreparedMethod> {
		let mut labels = HashMap::new();
		if let Some(code) = &method.code {
			for (index, entry) in code.instructions.iter().enumerate() {
				if let Some(label) = entry.label {
					if labels.insert(label, index).is_some() {
						bail!("label {label:?} used twice in {class}.{}{}", method.name, method.descriptor);
					}
				}
			}
			for entry in &code.instructions {
				if let Some(target) = entry.instruction.jump_target() {
					if !labels.contains_key(&target) {
						bail!("jump to unknown label {target:?} in {class}.{}{}", method.name, method.descriptor);
					}
				}
			}
		}
		let parameter_count = method.descriptor.parse()?.parameters.len();
		Ok(PreparedMethod { class: class.clone(), method, labels, parameter_count })
	}
}

impl std::fmt::Display for PreparedMethod {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}.{}{}", self.class, self.method.name, self.method.descriptor)
	}
}

#[derive(Debug, Clone)]
enum InitState {
	InProgress(ThreadId),
	Done,
	Failed,
}

struct Inner {
	id: u64,
	class_path: RwLock<IndexMap<ClassName, Arc<[u8]>>>,
	transformers: RwLock<Vec<Arc<dyn ClassFileTransformer>>>,
	classes: RwLock<HashMap<ClassName, Arc<RuntimeClass>>>,
	natives: RwLock<HashMap<MethodRef, Arc<dyn NativeMethod>>>,
	init: Mutex<HashMap<ClassName, InitState>>,
	init_changed: Condvar,
	listeners: Arc<Listeners>,
}

/// A handle to a runtime. Cloning gives another handle to the same runtime.
#[derive(Clone)]
pub struct Runtime {
	inner: Arc<Inner>,
}

impl Runtime {
	/// Creates a runtime with the built-in `java/lang` classes on its class path.
	pub fn new() -> anyhow::Result<Runtime> {
		static NEXT_ID: AtomicU64 = AtomicU64::new(1);

		let runtime = Runtime {
			inner: Arc::new(Inner {
				id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
				class_path: RwLock::new(IndexMap::new()),
				transformers: RwLock::new(Vec::new()),
				classes: RwLock::new(HashMap::new()),
				natives: RwLock::new(HashMap::new()),
				init: Mutex::new(HashMap::new()),
				init_changed: Condvar::new(),
				listeners: Arc::new(Listeners::default()),
			}),
		};

		for class in bootstrap::classes()? {
			runtime.add_class(&class)?;
		}
		bootstrap::install_natives(&runtime)?;

		Ok(runtime)
	}

	/// Puts a class on the class path. It's loaded (and transformed) on first use.
	pub fn add_class(&self, class: &ClassFile) -> anyhow::Result<()> {
		let bytes = codec::write_class(class)?;
		self.add_class_bytes(class.name.clone(), bytes);
		Ok(())
	}

	pub fn add_class_bytes(&self, name: ClassName, bytes: Vec<u8>) {
		if self.inner.classes.read().contains_key(&name) {
			warn!("class {name} is already loaded, the new definition is only seen by class loader queries");
		}
		self.inner.class_path.write().insert(name, Arc::from(bytes));
	}

	pub fn add_transformer(&self, transformer: Arc<dyn ClassFileTransformer>) {
		self.inner.transformers.write().push(transformer);
	}

	/// Registers the body of a method marked `native`.
	pub fn register_native(&self, method: MethodRef, body: impl NativeMethod + 'static) {
		self.inner.natives.write().insert(method, Arc::new(body));
	}

	pub fn add_lifecycle_listener(&self, listener: Weak<dyn LifecycleListener>) {
		self.inner.listeners.add(listener);
	}

	/// Tells the lifecycle listeners that a thread won't run code in this runtime anymore.
	pub fn notify_thread_exit(&self, id: ThreadId) {
		self.inner.listeners.thread_exited(id);
	}

	/// Spawns a thread running `f`, notifying the lifecycle listeners once it's done.
	pub fn spawn<F, T>(&self, f: F) -> JoinHandle<T>
	where
		F: FnOnce(Runtime) -> T + Send + 'static,
		T: Send + 'static,
	{
		let runtime = self.clone();
		std::thread::spawn(move || {
			let result = f(runtime.clone());
			runtime.notify_thread_exit(std::thread::current().id());
			result
		})
	}

	/// Loads a class, passing it through all transformers. Doesn't initialize it.
	pub fn load_class(&self, name: &ClassName) -> VmResult<Arc<RuntimeClass>> {
		if let Some(class) = self.inner.classes.read().get(name) {
			return Ok(class.clone());
		}

		let bytes = self.inner.class_path.read().get(name).cloned()
			.ok_or_else(|| anyhow!("class {name} not found on the class path"))?;

		let transformers = self.inner.transformers.read().clone();
		let mut bytes = bytes.to_vec();
		for transformer in &transformers {
			bytes = transformer.pre_process(name, &bytes, self);
		}

		let file = codec::read_class(&bytes)
			.with_context(|| anyhow!("failed to define class {name}"))?;
		if &file.name != name {
			return Err(anyhow!("class path entry {name} defines class {}", file.name).into());
		}
		let class = Arc::new(RuntimeClass::new(file).with_context(|| anyhow!("failed to prepare class {name}"))?);

		let mut classes = self.inner.classes.write();
		let class = classes.entry(name.clone()).or_insert(class).clone();
		trace!("loaded class {name}");
		Ok(class)
	}

	/// Runs the static initializer of the class and its super classes, if not already done.
	///
	/// A thread that is already initializing the class sees it as initialized. Other threads wait.
	pub fn ensure_initialized(&self, name: &ClassName) -> VmResult<()> {
		let me = std::thread::current().id();
		{
			let mut states = self.inner.init.lock();
			loop {
				match states.get(name) {
					Some(InitState::Done) => return Ok(()),
					Some(InitState::InProgress(thread)) if *thread == me => return Ok(()),
					Some(InitState::InProgress(_)) => self.inner.init_changed.wait(&mut states),
					Some(InitState::Failed) => {
						return Err(anyhow!("initialization of class {name} failed earlier").into());
					},
					None => {
						states.insert(name.clone(), InitState::InProgress(me));
						break;
					},
				}
			}
		}

		let result = self.run_initializer(name);

		let mut states = self.inner.init.lock();
		states.insert(name.clone(), if result.is_ok() { InitState::Done } else { InitState::Failed });
		self.inner.init_changed.notify_all();
		result
	}

	fn run_initializer(&self, name: &ClassName) -> VmResult<()> {
		let class = self.load_class(name)?;
		if let Some(super_class) = &class.file.super_class {
			self.ensure_initialized(super_class)?;
		}
		if let Some(clinit) = class.method(&MethodName::clinit(), &MethodDescriptor::new_unchecked("()V")) {
			debug!("initializing class {name}");
			self.run(clinit, None, Vec::new())?;
		}
		Ok(())
	}

	/// Finds a method in the class or its super classes.
	pub(crate) fn resolve_method(&self, class: &ClassName, name: &MethodName, descriptor: &MethodDescriptor) -> VmResult<Arc<PreparedMethod>> {
		let mut current = Some(class.clone());
		while let Some(class_name) = current {
			let runtime_class = self.load_class(&class_name)?;
			if let Some(method) = runtime_class.method(name, descriptor) {
				return Ok(method.clone());
			}
			current = runtime_class.file.super_class.clone();
		}
		Err(anyhow!("no method {name}{descriptor} in {class} or its super classes").into())
	}

	fn resolve_static_owner(&self, class: &ClassName, name: &FieldName) -> VmResult<Arc<RuntimeClass>> {
		let mut current = Some(class.clone());
		while let Some(class_name) = current {
			let runtime_class = self.load_class(&class_name)?;
			if runtime_class.statics.lock().contains_key(name) {
				return Ok(runtime_class);
			}
			current = runtime_class.file.super_class.clone();
		}
		Err(anyhow!("no static field {name} in {class} or its super classes").into())
	}

	pub(crate) fn run(&self, method: &PreparedMethod, receiver: Option<Value>, args: Vec<Value>) -> VmResult<Value> {
		if args.len() != method.parameter_count {
			return Err(anyhow!("{method} takes {} arguments, got {}", method.parameter_count, args.len()).into());
		}
		if method.method.access.is_static == receiver.is_some() {
			return Err(anyhow!("{method} invoked {} a receiver", if receiver.is_some() { "with" } else { "without" }).into());
		}

		if method.method.access.is_native {
			let key = MethodRef::new(method.class.clone(), method.method.name.clone(), method.method.descriptor.clone());
			let native = self.inner.natives.read().get(&key).cloned()
				.ok_or_else(|| anyhow!("no native body registered for {method}"))?;
			return native.invoke(self, receiver, args);
		}
		if method.method.access.is_abstract {
			return Err(anyhow!("invoked abstract method {method}").into());
		}

		interpreter::execute(self, method, receiver, args)
	}

	pub fn invoke_static(&self, class: &ClassName, name: &MethodName, descriptor: &MethodDescriptor, args: Vec<Value>) -> VmResult<Value> {
		self.ensure_initialized(class)?;
		let method = self.resolve_method(class, name, descriptor)?;
		self.run(&method, None, args)
	}

	/// Invokes a method selected by the runtime class of the receiver.
	pub fn invoke_virtual(&self, receiver: Value, name: &MethodName, descriptor: &MethodDescriptor, args: Vec<Value>) -> VmResult<Value> {
		let Some(class) = self.class_of(&receiver) else {
			return Err(self.throw("java/lang/NullPointerException", Some(&format!("cannot invoke {name}{descriptor} on null"))));
		};
		let method = self.resolve_method(&class, name, descriptor)?;
		self.run(&method, Some(receiver), args)
	}

	/// Invokes exactly the method found starting from `class`, no matter the runtime class of the receiver.
	pub fn invoke_special(&self, class: &ClassName, name: &MethodName, descriptor: &MethodDescriptor, receiver: Value, args: Vec<Value>) -> VmResult<Value> {
		if receiver.is_null() {
			return Err(self.throw("java/lang/NullPointerException", Some(&format!("cannot invoke {class}.{name}{descriptor} on null"))));
		}
		let method = self.resolve_method(class, name, descriptor)?;
		self.run(&method, Some(receiver), args)
	}

	/// Creates an object with all fields set to their default values, without running a constructor.
	pub fn allocate(&self, class: &ClassName) -> VmResult<Value> {
		self.ensure_initialized(class)?;

		let mut chain = Vec::new();
		let mut current = Some(class.clone());
		while let Some(class_name) = current {
			let runtime_class = self.load_class(&class_name)?;
			current = runtime_class.file.super_class.clone();
			chain.push(runtime_class);
		}
		if chain.first().is_some_and(|c| c.file.access.is_interface || c.file.access.is_abstract) {
			return Err(anyhow!("cannot instantiate abstract class or interface {class}").into());
		}

		let mut fields = IndexMap::new();
		for runtime_class in chain.iter().rev() {
			for field in runtime_class.file.fields.iter().filter(|f| !f.access.is_static) {
				let value = Value::default_for(&field.descriptor.parse()?);
				fields.insert(field.name.clone(), value);
			}
		}

		let object = Object::new(class.clone(), fields, Arc::downgrade(&self.inner.listeners));
		Ok(Value::Object(Arc::new(object)))
	}

	/// Allocates an object and runs the constructor with the given descriptor on it.
	pub fn new_object(&self, class: &ClassName, descriptor: &MethodDescriptor, args: Vec<Value>) -> VmResult<Value> {
		let object = self.allocate(class)?;
		self.invoke_special(class, &MethodName::init(), descriptor, object.clone(), args)?;
		Ok(object)
	}

	pub fn new_array(&self, component: &ClassName, elements: Vec<Value>) -> Value {
		Value::Array(Arc::new(Array::new(component, elements)))
	}

	/// Creates a throwable of the given class, with the message if given.
	pub fn new_throwable(&self, class: &str, message: Option<&str>) -> VmResult<Value> {
		let class = ClassName::try_from(class)?;
		match message {
			Some(message) => self.new_object(&class, &MethodDescriptor::new_unchecked("(Ljava/lang/String;)V"), vec![Value::from(message)]),
			None => self.new_object(&class, &MethodDescriptor::new_unchecked("()V"), Vec::new()),
		}
	}

	/// Creates an error that throws a new throwable of the given class.
	pub fn throw(&self, class: &str, message: Option<&str>) -> VmError {
		match self.new_throwable(class, message) {
			Ok(throwable) => VmError::Thrown(throwable),
			Err(e) => e,
		}
	}

	pub fn get_static(&self, class: &ClassName, name: &FieldName) -> VmResult<Value> {
		self.ensure_initialized(class)?;
		let owner = self.resolve_static_owner(class, name)?;
		let value = owner.statics.lock().get(name).cloned();
		value.ok_or_else(|| anyhow!("no static field {name} in {class}").into())
	}

	pub fn put_static(&self, class: &ClassName, name: &FieldName, value: Value) -> VmResult<()> {
		self.ensure_initialized(class)?;
		let owner = self.resolve_static_owner(class, name)?;
		if let Some(slot) = owner.statics.lock().get_mut(name) {
			*slot = value;
		}
		Ok(())
	}

	pub fn get_field(&self, object: &Value, name: &FieldName) -> VmResult<Value> {
		match object {
			Value::Object(o) => o.get(name)
				.ok_or_else(|| anyhow!("object of class {} has no field {name}", o.class()).into()),
			Value::Null => Err(self.throw("java/lang/NullPointerException", Some(&format!("cannot read field {name} of null")))),
			other => Err(anyhow!("cannot read field {name} of {other:?}").into()),
		}
	}

	pub fn put_field(&self, object: &Value, name: &FieldName, value: Value) -> VmResult<()> {
		match object {
			Value::Object(o) => if o.set(name, value) {
				Ok(())
			} else {
				Err(anyhow!("object of class {} has no field {name}", o.class()).into())
			},
			Value::Null => Err(self.throw("java/lang/NullPointerException", Some(&format!("cannot write field {name} of null")))),
			other => Err(anyhow!("cannot write field {name} of {other:?}").into()),
		}
	}

	/// The runtime class of a value, `None` for `null`.
	pub fn class_of(&self, value: &Value) -> Option<ClassName> {
		let name = match value {
			Value::Null => return None,
			Value::Int(_) => "java/lang/Integer",
			Value::Long(_) => "java/lang/Long",
			Value::Float(_) => "java/lang/Float",
			Value::Double(_) => "java/lang/Double",
			Value::Str(_) => "java/lang/String",
			Value::Class(_) => "java/lang/Class",
			Value::Object(o) => return Some(o.class().clone()),
			Value::Array(a) => return Some(a.class().clone()),
			Value::Host(h) => return Some(h.class.clone()),
		};
		Some(ClassName::new_unchecked(name))
	}

	/// Checks if `class` is `super_class`, or extends or implements it.
	pub fn is_subclass_of(&self, class: &ClassName, super_class: &ClassName) -> VmResult<bool> {
		if class == super_class || super_class == &ClassName::java_lang_object() {
			return Ok(true);
		}
		if class.is_array() {
			return Ok(false);
		}
		let runtime_class = self.load_class(class)?;
		for interface in &runtime_class.file.interfaces {
			if self.is_subclass_of(interface, super_class)? {
				return Ok(true);
			}
		}
		match &runtime_class.file.super_class {
			Some(parent) => self.is_subclass_of(parent, super_class),
			None => Ok(false),
		}
	}

	pub fn is_instance(&self, value: &Value, class: &ClassName) -> VmResult<bool> {
		if value.is_primitive() && bootstrap::is_wrapper(class) {
			// boxed primitives don't remember their exact wrapper class
			return Ok(true);
		}
		match self.class_of(value) {
			Some(value_class) => self.is_subclass_of(&value_class, class),
			None => Ok(false),
		}
	}

	/// Reads the message of a throwable, if it has one.
	pub fn throwable_message(&self, throwable: &Value) -> Option<String> {
		let value = self.get_field(throwable, &FieldName::new_unchecked("message")).ok()?;
		value.as_str().map(str::to_owned)
	}

	pub fn field_descriptor_of(&self, class: &ClassName, name: &FieldName) -> VmResult<FieldDescriptor> {
		let mut current = Some(class.clone());
		while let Some(class_name) = current {
			let runtime_class = self.load_class(&class_name)?;
			if let Some(field) = runtime_class.file.field(name) {
				return Ok(field.descriptor.clone());
			}
			current = runtime_class.file.super_class.clone();
		}
		Err(anyhow!("no field {name} in {class} or its super classes").into())
	}
}

impl ClassLoaderContext for Runtime {
	fn id(&self) -> u64 {
		self.inner.id
	}

	fn find_class_file(&self, name: &ClassName) -> Option<ClassFile> {
		let bytes = self.inner.class_path.read().get(name).cloned()?;
		match codec::read_class(&bytes) {
			Ok(class) => Some(class),
			Err(e) => {
				warn!("class path entry {name} is unreadable: {e:#}");
				None
			},
		}
	}
}
