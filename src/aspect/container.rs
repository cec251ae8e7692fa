use std::collections::HashMap;
use std::hash::Hash;
use std::sync::OnceLock;
use std::thread::ThreadId;
use log::trace;
use parking_lot::RwLock;
use shuttle::tree::class::ClassName;
use shuttle::vm::value::ObjectId;
use crate::aspect::AspectInstance;
use crate::definition::DeploymentModel;

/// Where a join point runs, for picking the instance of an aspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentContext {
	/// The class containing the join point.
	pub class: ClassName,
	/// The object the join point runs on, `None` in static code.
	pub instance: Option<ObjectId>,
	pub thread: ThreadId,
}

impl DeploymentContext {
	/// A context on the current thread.
	pub fn current(class: ClassName, instance: Option<ObjectId>) -> DeploymentContext {
		DeploymentContext { class, instance, thread: std::thread::current().id() }
	}
}

struct InstanceMap<K> {
	map: RwLock<HashMap<K, AspectInstance>>,
}

impl<K: Hash + Eq + Clone> InstanceMap<K> {
	fn new() -> InstanceMap<K> {
		InstanceMap { map: RwLock::new(HashMap::new()) }
	}

	fn get_or_create(&self, key: &K, factory: impl FnOnce() -> AspectInstance) -> AspectInstance {
		if let Some(instance) = self.map.read().get(key) {
			return instance.clone();
		}
		// checked again, another thread may have created it in between
		self.map.write().entry(key.clone()).or_insert_with(factory).clone()
	}

	/// Returns the removed instance, so it's dropped after the lock is released.
	fn evict(&self, key: &K) -> Option<AspectInstance> {
		self.map.write().remove(key)
	}

	fn len(&self) -> usize {
		self.map.read().len()
	}
}

/// Creates and holds the instances of one aspect or mixin, according to its deployment model.
pub struct AspectContainer {
	name: String,
	model: DeploymentModel,
	factory: super::Factory,
	per_jvm: OnceLock<AspectInstance>,
	per_class: InstanceMap<ClassName>,
	per_instance: InstanceMap<ObjectId>,
	per_thread: InstanceMap<ThreadId>,
}

impl AspectContainer {
	pub(crate) fn new(name: impl Into<String>, model: DeploymentModel, factory: super::Factory) -> AspectContainer {
		AspectContainer {
			name: name.into(),
			model,
			factory,
			per_jvm: OnceLock::new(),
			per_class: InstanceMap::new(),
			per_instance: InstanceMap::new(),
			per_thread: InstanceMap::new(),
		}
	}

	pub fn deployment_model(&self) -> DeploymentModel {
		self.model
	}

	fn create(&self) -> AspectInstance {
		trace!("creating a {} instance of {}", self.model, self.name);
		(self.factory)()
	}

	/// Gets the instance for the context, creating it on first use.
	pub fn instance(&self, context: &DeploymentContext) -> AspectInstance {
		match (self.model, context.instance) {
			(DeploymentModel::PerJvm, _) => self.per_jvm.get_or_init(|| self.create()).clone(),
			(DeploymentModel::PerInstance, Some(id)) => self.per_instance.get_or_create(&id, || self.create()),
			// static code has no instance
			(DeploymentModel::PerClass | DeploymentModel::PerInstance, _) => {
				self.per_class.get_or_create(&context.class, || self.create())
			},
			(DeploymentModel::PerThread, _) => self.per_thread.get_or_create(&context.thread, || self.create()),
		}
	}

	pub fn evict_instance(&self, id: ObjectId) {
		if let Some(instance) = self.per_instance.evict(&id) {
			trace!("dropping the instance of {} for object {}", self.name, id.get());
			drop(instance);
		}
	}

	pub fn evict_thread(&self, id: ThreadId) {
		if let Some(instance) = self.per_thread.evict(&id) {
			trace!("dropping the instance of {} for thread {id:?}", self.name);
			drop(instance);
		}
	}

	/// How many instances exist per class, per object and per thread.
	pub fn live_instances(&self) -> (usize, usize, usize) {
		(self.per_class.len(), self.per_instance.len(), self.per_thread.len())
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;
	use anyhow::Result;
	use shuttle::tree::class::ClassName;
	use shuttle::vm::Runtime;
	use shuttle::vm::value::Value;
	use crate::aspect::container::{AspectContainer, DeploymentContext};
	use crate::aspect::AspectInstance;
	use crate::definition::DeploymentModel;

	fn counting(model: DeploymentModel) -> (AspectContainer, Arc<AtomicUsize>) {
		let created = Arc::new(AtomicUsize::new(0));
		let counter = created.clone();
		let factory = Arc::new(move || {
			let n = counter.fetch_add(1, Ordering::SeqCst);
			Arc::new(n) as AspectInstance
		});
		(AspectContainer::new("counting", model, factory), created)
	}

	#[test]
	fn per_instance() -> Result<()> {
		let runtime = Runtime::new()?;
		let a = runtime.allocate(&ClassName::java_lang_object())?;
		let b = runtime.allocate(&ClassName::java_lang_object())?;
		let class = ClassName::try_from("test/C")?;

		let (container, created) = counting(DeploymentModel::PerInstance);
		let first = container.instance(&DeploymentContext::current(class.clone(), a.object_id()));
		let again = container.instance(&DeploymentContext::current(class.clone(), a.object_id()));
		let other = container.instance(&DeploymentContext::current(class.clone(), b.object_id()));
		assert!(Arc::ptr_eq(&first, &again));
		assert!(!Arc::ptr_eq(&first, &other));
		assert_eq!(created.load(Ordering::SeqCst), 2);

		// static code falls back to one instance per class
		let statics = container.instance(&DeploymentContext::current(class.clone(), None));
		assert!(Arc::ptr_eq(&statics, &container.instance(&DeploymentContext::current(class, None))));
		assert_eq!(container.live_instances(), (1, 2, 0));

		if let Some(id) = a.object_id() {
			container.evict_instance(id);
		}
		assert_eq!(container.live_instances(), (1, 1, 0));
		drop::<Value>(b);
		Ok(())
	}

	#[test]
	fn per_jvm_and_per_thread() -> Result<()> {
		let class = ClassName::try_from("test/C")?;

		let (container, created) = counting(DeploymentModel::PerJvm);
		let first = container.instance(&DeploymentContext::current(class.clone(), None));
		let second = container.instance(&DeploymentContext::current(ClassName::try_from("test/D")?, None));
		assert!(Arc::ptr_eq(&first, &second));
		assert_eq!(created.load(Ordering::SeqCst), 1);

		let (container, created) = counting(DeploymentModel::PerThread);
		let container = Arc::new(container);
		let here = container.instance(&DeploymentContext::current(class.clone(), None));
		let there = {
			let container = container.clone();
			let class = class.clone();
			std::thread::spawn(move || container.instance(&DeploymentContext::current(class, None)))
				.join()
				.map_err(|_| anyhow::anyhow!("thread panicked"))?
		};
		assert!(!Arc::ptr_eq(&here, &there));
		assert_eq!(created.load(Ordering::SeqCst), 2);
		assert!(Arc::ptr_eq(&here, &container.instance(&DeploymentContext::current(class, None))));
		Ok(())
	}
}
