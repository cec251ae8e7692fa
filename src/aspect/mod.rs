//! Aspects and mixins as the host provides them: named classes of advice and introduced methods, with a factory for
//! their instances.

pub mod container;
pub mod metadata;

use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;
use anyhow::Result;
use indexmap::IndexMap;
use shuttle::tree::class::ClassName;
use shuttle::tree::method::{MethodDescriptor, MethodName};
use shuttle::vm::error::VmResult;
use shuttle::vm::value::Value;
use shuttle::vm::Runtime;
use crate::error::DispatchError;
use crate::joinpoint::JoinPoint;

/// An instance of an aspect or mixin.
pub type AspectInstance = Arc<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn() -> AspectInstance + Send + Sync>;
type Instance<'i> = &'i (dyn Any + Send + Sync);

pub type AroundBody = Arc<dyn Fn(Instance<'_>, &mut JoinPoint<'_>) -> VmResult<Value> + Send + Sync>;
pub type BeforeBody = Arc<dyn Fn(Instance<'_>, &JoinPoint<'_>) -> VmResult<()> + Send + Sync>;
/// Gets the result of the join point, or the exception it threw for throws advice.
pub type AfterBody = Arc<dyn Fn(Instance<'_>, &JoinPoint<'_>, &Value) -> VmResult<()> + Send + Sync>;

#[derive(Clone)]
pub enum AdviceBody {
	/// Runs instead of the join point, calling [`JoinPoint::proceed`] to run it.
	Around(AroundBody),
	Before(BeforeBody),
	/// Runs after the join point returned normally.
	After(AfterBody),
	/// Runs if the join point threw an exception matching the pointcut. The exception is thrown on afterwards.
	Throws(AfterBody),
}

impl Debug for AdviceBody {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			AdviceBody::Around(_) => "Around",
			AdviceBody::Before(_) => "Before",
			AdviceBody::After(_) => "After",
			AdviceBody::Throws(_) => "Throws",
		})
	}
}

#[derive(Debug, Clone)]
pub struct Advice {
	pub name: String,
	pub body: AdviceBody,
}

fn downcast<'i, T: Any>(instance: Instance<'i>, class: &str) -> VmResult<&'i T> {
	instance.downcast_ref::<T>()
		.ok_or_else(|| anyhow::Error::from(DispatchError::AspectTypeMismatch { aspect: class.to_owned() }).into())
}

/// A class of advice methods, instantiated per deployment scope.
pub struct AspectClass {
	name: String,
	factory: Factory,
	advices: Vec<Advice>,
}

impl AspectClass {
	/// Starts building an aspect class whose instances are of type `T`.
	pub fn builder<T: Any + Send + Sync>(name: impl Into<String>, factory: impl Fn() -> T + Send + Sync + 'static) -> AspectClassBuilder<T> {
		AspectClassBuilder {
			name: name.into(),
			factory: Arc::new(move || Arc::new(factory()) as AspectInstance),
			advices: Vec::new(),
			instance: PhantomData,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn advices(&self) -> &[Advice] {
		&self.advices
	}

	pub fn advice_index(&self, name: &str) -> Option<usize> {
		self.advices.iter().position(|a| a.name == name)
	}

	pub fn advice(&self, index: usize) -> Option<&Advice> {
		self.advices.get(index)
	}

	pub(crate) fn factory(&self) -> Factory {
		self.factory.clone()
	}
}

impl Debug for AspectClass {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AspectClass")
			.field("name", &self.name)
			.field("advices", &self.advices)
			.finish_non_exhaustive()
	}
}

pub struct AspectClassBuilder<T> {
	name: String,
	factory: Factory,
	advices: Vec<Advice>,
	instance: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> AspectClassBuilder<T> {
	pub fn around(mut self, name: impl Into<String>, body: impl Fn(&T, &mut JoinPoint<'_>) -> VmResult<Value> + Send + Sync + 'static) -> Self {
		let class = self.name.clone();
		self.advices.push(Advice {
			name: name.into(),
			body: AdviceBody::Around(Arc::new(move |instance: Instance<'_>, join_point: &mut JoinPoint<'_>| {
				body(downcast(instance, &class)?, join_point)
			})),
		});
		self
	}

	pub fn before(mut self, name: impl Into<String>, body: impl Fn(&T, &JoinPoint<'_>) -> VmResult<()> + Send + Sync + 'static) -> Self {
		let class = self.name.clone();
		self.advices.push(Advice {
			name: name.into(),
			body: AdviceBody::Before(Arc::new(move |instance: Instance<'_>, join_point: &JoinPoint<'_>| {
				body(downcast(instance, &class)?, join_point)
			})),
		});
		self
	}

	pub fn after(mut self, name: impl Into<String>, body: impl Fn(&T, &JoinPoint<'_>, &Value) -> VmResult<()> + Send + Sync + 'static) -> Self {
		let class = self.name.clone();
		self.advices.push(Advice {
			name: name.into(),
			body: AdviceBody::After(Arc::new(move |instance: Instance<'_>, join_point: &JoinPoint<'_>, result: &Value| {
				body(downcast(instance, &class)?, join_point, result)
			})),
		});
		self
	}

	pub fn throws(mut self, name: impl Into<String>, body: impl Fn(&T, &JoinPoint<'_>, &Value) -> VmResult<()> + Send + Sync + 'static) -> Self {
		let class = self.name.clone();
		self.advices.push(Advice {
			name: name.into(),
			body: AdviceBody::Throws(Arc::new(move |instance: Instance<'_>, join_point: &JoinPoint<'_>, exception: &Value| {
				body(downcast(instance, &class)?, join_point, exception)
			})),
		});
		self
	}

	pub fn build(self) -> AspectClass {
		AspectClass {
			name: self.name,
			factory: self.factory,
			advices: self.advices,
		}
	}
}

/// The body of an introduced method. Gets the mixin instance, the object the method was called on and the arguments.
pub type MixinBody = Arc<dyn Fn(Instance<'_>, &Runtime, &Value, Vec<Value>) -> VmResult<Value> + Send + Sync>;

#[derive(Clone)]
pub struct MixinMethod {
	pub name: MethodName,
	pub descriptor: MethodDescriptor,
	pub body: MixinBody,
}

impl Debug for MixinMethod {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "MixinMethod({}{})", self.name, self.descriptor)
	}
}

/// The implementation of an introduced interface.
pub struct MixinClass {
	name: String,
	factory: Factory,
	methods: Vec<MixinMethod>,
}

impl MixinClass {
	pub fn builder<T: Any + Send + Sync>(name: impl Into<String>, factory: impl Fn() -> T + Send + Sync + 'static) -> MixinClassBuilder<T> {
		MixinClassBuilder {
			name: name.into(),
			factory: Arc::new(move || Arc::new(factory()) as AspectInstance),
			methods: Vec::new(),
			instance: PhantomData,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn methods(&self) -> &[MixinMethod] {
		&self.methods
	}

	pub(crate) fn factory(&self) -> Factory {
		self.factory.clone()
	}
}

impl Debug for MixinClass {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MixinClass")
			.field("name", &self.name)
			.field("methods", &self.methods)
			.finish_non_exhaustive()
	}
}

pub struct MixinClassBuilder<T> {
	name: String,
	factory: Factory,
	methods: Vec<(String, String, MixinBody)>,
	instance: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> MixinClassBuilder<T> {
	pub fn method(
		mut self,
		name: impl Into<String>,
		descriptor: impl Into<String>,
		body: impl Fn(&T, &Runtime, &Value, Vec<Value>) -> VmResult<Value> + Send + Sync + 'static,
	) -> Self {
		let class = self.name.clone();
		let body: MixinBody = Arc::new(move |instance: Instance<'_>, runtime: &Runtime, this: &Value, args: Vec<Value>| {
			body(downcast(instance, &class)?, runtime, this, args)
		});
		self.methods.push((name.into(), descriptor.into(), body));
		self
	}

	/// Checks the method names and descriptors.
	pub fn build(self) -> Result<MixinClass> {
		let methods = self.methods.into_iter()
			.map(|(name, descriptor, body)| Ok(MixinMethod {
				name: MethodName::try_from(name)?,
				descriptor: MethodDescriptor::try_from(descriptor)?,
				body,
			}))
			.collect::<Result<_>>()?;
		Ok(MixinClass { name: self.name, factory: self.factory, methods })
	}
}

/// The aspect and mixin classes the host provides, by name.
#[derive(Debug, Default)]
pub struct AspectLibrary {
	aspects: IndexMap<String, Arc<AspectClass>>,
	mixins: IndexMap<String, Arc<MixinClass>>,
}

impl AspectLibrary {
	pub fn new() -> AspectLibrary {
		AspectLibrary::default()
	}

	pub fn with_aspect(mut self, class: AspectClass) -> AspectLibrary {
		self.add_aspect(class);
		self
	}

	pub fn with_mixin(mut self, class: MixinClass) -> AspectLibrary {
		self.add_mixin(class);
		self
	}

	/// Adds an aspect class, replacing any with the same name.
	pub fn add_aspect(&mut self, class: AspectClass) {
		self.aspects.insert(class.name.clone(), Arc::new(class));
	}

	pub fn add_mixin(&mut self, class: MixinClass) {
		self.mixins.insert(class.name.clone(), Arc::new(class));
	}

	pub fn aspect(&self, name: &str) -> Option<&Arc<AspectClass>> {
		self.aspects.get(name)
	}

	pub fn mixin(&self, name: &str) -> Option<&Arc<MixinClass>> {
		self.mixins.get(name)
	}
}

/// The interface an introduction adds to a class, as a class name.
pub(crate) fn interface_name(java_name: &str) -> Result<ClassName> {
	ClassName::from_java_name(java_name)
}
