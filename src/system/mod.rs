//! Systems of aspects: everything one system definition sets up, with its aspects numbered in registration order.
//!
//! The numbers never change while a system lives, since woven code refers to aspects and their advice by them.

mod cache;

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;
use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use log::{debug, info, trace};
use parking_lot::{Mutex, RwLock};
use shuttle::tree::class::ClassName;
use shuttle::vm::lifecycle::LifecycleListener;
use shuttle::vm::value::ObjectId;
use crate::aspect::container::AspectContainer;
use crate::aspect::metadata::{AspectMetaData, IndexTuple, Pointcut};
use crate::aspect::{interface_name, Advice, AspectClass, AspectLibrary, MixinClass, MixinMethod};
use crate::cflow::CflowTracker;
use crate::definition::{AspectDefinition, DefinitionLoader, IntroductionDefinition, PointcutKind, SystemDefinition, WeaverOptions};
use crate::error::DefinitionError;
use crate::metadata::{ClassMetaData, MemberMetaData};
use crate::pattern::{MatchTarget, PointcutPatternTuple};
use crate::runtime::JoinPointManager;
use crate::system::cache::{ResolutionCache, ResolutionKey};

/// An aspect registered in a system.
pub struct Aspect {
	index: usize,
	metadata: AspectMetaData,
	class: Arc<AspectClass>,
	container: AspectContainer,
}

impl Aspect {
	/// The index of the aspect, starting at `1`.
	pub fn index(&self) -> usize {
		self.index
	}

	pub fn name(&self) -> &str {
		self.metadata.name()
	}

	pub fn metadata(&self) -> &AspectMetaData {
		&self.metadata
	}

	pub fn class(&self) -> &Arc<AspectClass> {
		&self.class
	}

	pub fn container(&self) -> &AspectContainer {
		&self.container
	}

	pub fn advice(&self, index: usize) -> Option<&Advice> {
		self.class.advice(index)
	}
}

impl Debug for Aspect {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Aspect")
			.field("index", &self.index)
			.field("name", &self.metadata.name())
			.field("class", &self.class.name())
			.finish_non_exhaustive()
	}
}

/// An introduction registered in a system: an interface, and maybe a mixin implementing it.
pub struct Mixin {
	index: usize,
	name: String,
	interface: ClassName,
	class: Option<Arc<MixinClass>>,
	container: Option<AspectContainer>,
}

impl Mixin {
	/// The index of the mixin, starting at `1`.
	pub fn index(&self) -> usize {
		self.index
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn interface(&self) -> &ClassName {
		&self.interface
	}

	/// The implementation, `None` if the introduction only adds the interface.
	pub fn class(&self) -> Option<&Arc<MixinClass>> {
		self.class.as_ref()
	}

	pub fn container(&self) -> Option<&AspectContainer> {
		self.container.as_ref()
	}

	pub fn methods(&self) -> &[MixinMethod] {
		self.class.as_ref().map_or(&[], |class| class.methods())
	}
}

impl Debug for Mixin {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Mixin")
			.field("index", &self.index)
			.field("name", &self.name)
			.field("interface", &self.interface)
			.finish_non_exhaustive()
	}
}

/// A pointcut that matched, with the index of its aspect.
#[derive(Debug, Clone)]
pub struct MatchedPointcut {
	pub aspect: usize,
	pub pointcut: Arc<Pointcut>,
}

/// The aspects and mixins of a system. Replaced as a whole, never changed in place.
#[derive(Clone, Default)]
struct Tables {
	aspects: Vec<Arc<Aspect>>,
	aspect_names: IndexMap<String, usize>,
	mixins: Vec<Arc<Mixin>>,
	mixin_names: IndexMap<String, usize>,
}

impl Tables {
	fn push_aspect(&mut self, aspect: Aspect) {
		self.aspect_names.insert(aspect.name().to_owned(), aspect.index);
		self.aspects.push(Arc::new(aspect));
	}

	fn push_mixin(&mut self, mixin: Mixin) {
		self.mixin_names.insert(mixin.name.clone(), mixin.index);
		self.mixins.push(Arc::new(mixin));
	}

	fn aspect(&self, index: usize) -> Option<&Arc<Aspect>> {
		index.checked_sub(1).and_then(|i| self.aspects.get(i))
	}

	fn mixin(&self, index: usize) -> Option<&Arc<Mixin>> {
		index.checked_sub(1).and_then(|i| self.mixins.get(i))
	}
}

/// The aspects of one system definition, found by the uuid of the definition.
pub struct AspectSystem {
	uuid: String,
	loader: Arc<dyn DefinitionLoader>,
	library: Arc<AspectLibrary>,
	init_lock: Mutex<()>,
	initialized: AtomicBool,
	definition: OnceLock<SystemDefinition>,
	tables: RwLock<Arc<Tables>>,
	pointcuts: ResolutionCache<Arc<[MatchedPointcut]>>,
	cflow_patterns: ResolutionCache<Arc<[PointcutPatternTuple]>>,
	cflow_sources: ResolutionCache<bool>,
	cflow: CflowTracker,
}

impl Debug for AspectSystem {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AspectSystem")
			.field("uuid", &self.uuid)
			.field("initialized", &self.initialized.load(Ordering::Acquire))
			.finish_non_exhaustive()
	}
}

impl AspectSystem {
	fn new(uuid: &str, loader: Arc<dyn DefinitionLoader>, library: Arc<AspectLibrary>, options: &WeaverOptions) -> AspectSystem {
		AspectSystem {
			uuid: uuid.to_owned(),
			loader,
			library,
			init_lock: Mutex::new(()),
			initialized: AtomicBool::new(false),
			definition: OnceLock::new(),
			tables: RwLock::new(Arc::new(Tables::default())),
			pointcuts: ResolutionCache::new(options.cache_capacity),
			cflow_patterns: ResolutionCache::new(options.cache_capacity),
			cflow_sources: ResolutionCache::new(options.cache_capacity),
			cflow: CflowTracker::new(),
		}
	}

	pub fn uuid(&self) -> &str {
		&self.uuid
	}

	/// The definition the system was initialized from, `None` before initialization.
	pub fn definition(&self) -> Option<&SystemDefinition> {
		self.definition.get()
	}

	pub fn is_initialized(&self) -> bool {
		self.initialized.load(Ordering::Acquire)
	}

	/// Loads the definition and registers its introductions and aspects, in the order they're defined.
	///
	/// Does nothing if the system is already initialized. If this fails, nothing is registered and the next call
	/// tries again.
	pub fn initialize(&self) -> Result<()> {
		if self.is_initialized() {
			return Ok(());
		}
		let _guard = self.init_lock.lock();
		if self.is_initialized() {
			return Ok(());
		}

		let definition = self.loader.load(&self.uuid)
			.with_context(|| anyhow!("failed to load the definition of system {:?}", self.uuid))?
			.ok_or_else(|| DefinitionError::SystemNotDefined(self.uuid.clone()))?;

		let mut tables = Tables::clone(&self.tables.read());
		for introduction in &definition.introductions {
			let mixin = self.build_mixin(&tables, introduction)?;
			tables.push_mixin(mixin);
		}
		for aspect in &definition.aspects {
			let class = self.library.aspect(&aspect.class)
				.ok_or_else(|| DefinitionError::UnknownAspectClass { aspect: aspect.name.clone(), class: aspect.class.clone() })?
				.clone();
			let built = self.build_aspect(&tables, class, aspect)?;
			tables.push_aspect(built);
		}

		info!("initialized system {:?} with {} aspects and {} mixins", self.uuid, tables.aspects.len(), tables.mixins.len());
		*self.tables.write() = Arc::new(tables);
		// only ever set here, under the lock
		let _ = self.definition.set(definition);
		self.initialized.store(true, Ordering::Release);
		Ok(())
	}

	fn build_mixin(&self, tables: &Tables, definition: &IntroductionDefinition) -> Result<Mixin> {
		if tables.mixin_names.contains_key(&definition.name) {
			return Err(DefinitionError::DuplicateIntroduction(definition.name.clone()).into());
		}
		let interface = interface_name(&definition.interface)
			.with_context(|| anyhow!("invalid interface of introduction {:?}", definition.name))?;
		let class = definition.implementation.as_ref()
			.map(|mixin| {
				self.library.mixin(mixin).cloned()
					.ok_or_else(|| DefinitionError::UnknownMixinClass { introduction: definition.name.clone(), mixin: mixin.clone() })
			})
			.transpose()?;
		let container = class.as_ref()
			.map(|class| AspectContainer::new(&definition.name, definition.deployment_model, class.factory()));

		let index = tables.mixins.len() + 1;
		debug!("system {:?}: mixin {} is {:?}", self.uuid, index, definition.name);
		Ok(Mixin { index, name: definition.name.clone(), interface, class, container })
	}

	fn build_aspect(&self, tables: &Tables, class: Arc<AspectClass>, definition: &AspectDefinition) -> Result<Aspect> {
		if tables.aspect_names.contains_key(&definition.name) {
			return Err(DefinitionError::DuplicateAspect(definition.name.clone()).into());
		}
		let index = tables.aspects.len() + 1;

		let mut metadata = AspectMetaData::new(&definition.name, &definition.class, definition.deployment_model);
		for pointcut in &definition.pointcuts {
			metadata.add_named_pointcut(&pointcut.name, pointcut.kind, &pointcut.pattern)?;
		}
		for rule in &definition.bind_advice {
			metadata.add_pointcut(&rule.expression)?;
			for advice in &rule.advices {
				let method = class.advice_index(advice)
					.ok_or_else(|| DefinitionError::UnknownAdvice {
						advice: advice.clone(),
						aspect: definition.name.clone(),
						class: class.name().to_owned(),
					})?;
				metadata.add_advice(&rule.expression, IndexTuple { aspect: index, method })?;
			}
		}
		for rule in &definition.bind_introduction {
			for introduction in &rule.introductions {
				let mixin = tables.mixin_names.get(introduction)
					.ok_or_else(|| DefinitionError::UnknownIntroduction {
						introduction: introduction.clone(),
						aspect: definition.name.clone(),
					})?;
				metadata.add_introduction(&rule.expression, *mixin)?;
			}
		}

		debug!("system {:?}: aspect {} is {:?}", self.uuid, index, definition.name);
		let container = AspectContainer::new(&definition.name, definition.deployment_model, class.factory());
		Ok(Aspect { index, metadata, class, container })
	}

	/// Registers another aspect after the ones of the definition, returning its index.
	///
	/// Classes woven before only see the new aspect at join points that were woven for another aspect already.
	pub fn register(&self, class: Arc<AspectClass>, definition: &AspectDefinition) -> Result<usize> {
		self.initialize()?;
		let _guard = self.init_lock.lock();

		let mut tables = Tables::clone(&self.tables.read());
		let aspect = self.build_aspect(&tables, class, definition)?;
		let index = aspect.index;
		tables.push_aspect(aspect);
		*self.tables.write() = Arc::new(tables);

		self.clear_caches();
		info!("registered aspect {:?} as {index} in system {:?}", definition.name, self.uuid);
		Ok(index)
	}

	fn tables(&self) -> Arc<Tables> {
		self.tables.read().clone()
	}

	fn initialized_tables(&self) -> Result<Arc<Tables>> {
		self.initialize()?;
		Ok(self.tables())
	}

	/// Gets an aspect by its index, initializing the system if it's not there.
	pub fn get_aspect(&self, index: usize) -> Result<Arc<Aspect>> {
		if let Some(aspect) = self.tables().aspect(index) {
			return Ok(aspect.clone());
		}
		self.initialized_tables()?.aspect(index).cloned()
			.ok_or_else(|| DefinitionError::AspectNotFound(index.to_string(), self.uuid.clone()).into())
	}

	pub fn get_aspect_by_name(&self, name: &str) -> Result<Arc<Aspect>> {
		let find = |tables: &Tables| tables.aspect_names.get(name).and_then(|i| tables.aspect(*i)).cloned();
		if let Some(aspect) = find(&self.tables()) {
			return Ok(aspect);
		}
		find(&*self.initialized_tables()?)
			.ok_or_else(|| DefinitionError::AspectNotFound(format!("{name:?}"), self.uuid.clone()).into())
	}

	/// Finds the index tuple of an advice by the names of the aspect and the advice.
	pub fn advice_index(&self, aspect: &str, advice: &str) -> Result<IndexTuple> {
		let found = self.get_aspect_by_name(aspect)?;
		let method = found.class.advice_index(advice)
			.ok_or_else(|| DefinitionError::UnknownAdvice {
				advice: advice.to_owned(),
				aspect: aspect.to_owned(),
				class: found.class.name().to_owned(),
			})?;
		Ok(IndexTuple { aspect: found.index, method })
	}

	pub fn get_mixin(&self, index: usize) -> Result<Arc<Mixin>> {
		if let Some(mixin) = self.tables().mixin(index) {
			return Ok(mixin.clone());
		}
		self.initialized_tables()?.mixin(index).cloned()
			.ok_or_else(|| DefinitionError::MixinNotFound(index.to_string(), self.uuid.clone()).into())
	}

	pub fn aspects(&self) -> Result<Vec<Arc<Aspect>>> {
		Ok(self.initialized_tables()?.aspects.clone())
	}

	pub fn cflow(&self) -> &CflowTracker {
		&self.cflow
	}

	fn key(kind: PointcutKind, caller: Option<&ClassMetaData>, class: &ClassMetaData, member: &MemberMetaData) -> ResolutionKey {
		ResolutionKey {
			kind,
			caller: caller.map(|c| c.name().clone()),
			class: class.name().clone(),
			member: member.key(),
		}
	}

	fn matching(
		&self,
		key: ResolutionKey,
		find: impl Fn(&AspectMetaData) -> Vec<Arc<Pointcut>>,
	) -> Result<Arc<[MatchedPointcut]>> {
		let tables = self.initialized_tables()?;
		Ok(self.pointcuts.get_or_compute(key, |key| {
			let matched: Vec<MatchedPointcut> = tables.aspects.iter()
				.flat_map(|aspect| {
					find(&aspect.metadata).into_iter()
						.map(|pointcut| MatchedPointcut { aspect: aspect.index, pointcut })
				})
				.collect();
			trace!("{} {} pointcuts could match {}.{}", matched.len(), key.kind, key.class, key.member);
			matched.into()
		}))
	}

	/// The pointcuts of all aspects that could match the execution of the method or constructor, in aspect order.
	pub fn execution_pointcuts(&self, class: &ClassMetaData, member: &MemberMetaData) -> Result<Arc<[MatchedPointcut]>> {
		let key = Self::key(PointcutKind::Execution, None, class, member);
		self.matching(key, |aspect| aspect.get_execution_pointcuts(class, member))
	}

	pub fn throws_pointcuts(&self, class: &ClassMetaData, member: &MemberMetaData) -> Result<Arc<[MatchedPointcut]>> {
		let key = Self::key(PointcutKind::Throws, None, class, member);
		self.matching(key, |aspect| aspect.get_throws_pointcuts(class, member))
	}

	pub fn get_pointcuts(&self, class: &ClassMetaData, member: &MemberMetaData) -> Result<Arc<[MatchedPointcut]>> {
		let key = Self::key(PointcutKind::Get, None, class, member);
		self.matching(key, |aspect| aspect.get_get_pointcuts(class, member))
	}

	pub fn set_pointcuts(&self, class: &ClassMetaData, member: &MemberMetaData) -> Result<Arc<[MatchedPointcut]>> {
		let key = Self::key(PointcutKind::Set, None, class, member);
		self.matching(key, |aspect| aspect.get_set_pointcuts(class, member))
	}

	/// The pointcuts that could match a call from the `caller` class to the member.
	pub fn call_pointcuts(&self, caller: &ClassMetaData, class: &ClassMetaData, member: &MemberMetaData) -> Result<Arc<[MatchedPointcut]>> {
		let key = Self::key(PointcutKind::Call, Some(caller), class, member);
		self.matching(key, |aspect| aspect.get_call_pointcuts(caller, class, member))
	}

	/// The cflow patterns gating the pointcuts that could match the join point.
	///
	/// Found by the named pointcuts of `kind` the matching pointcuts consist of, compared as they are. Reads and
	/// writes of the same field have separate gates.
	pub fn cflow_pointcuts(&self, kind: PointcutKind, target: &MatchTarget<'_>) -> Result<Arc<[PointcutPatternTuple]>> {
		let (caller, class, member) = match *target {
			MatchTarget::Member { class, member } => (None, class, member),
			MatchTarget::Call { caller, class, member } => (Some(caller), class, member),
			MatchTarget::Throws { class, member, .. } => (None, class, member),
			MatchTarget::Class(_) => return Ok(Arc::from([])),
		};
		let tables = self.initialized_tables()?;
		let key = Self::key(PointcutKind::Cflow, caller, class, member);
		let key = ResolutionKey { member: format!("{kind}:{}", key.member), ..key };
		Ok(self.cflow_patterns.get_or_compute(key, |_| {
			let mut gates: Vec<PointcutPatternTuple> = Vec::new();
			for aspect in &tables.aspects {
				for pointcut in aspect.metadata.pointcuts(kind) {
					for tuple in pointcut.patterns().filter(|tuple| tuple.matches(target)) {
						for gate in aspect.metadata.get_cflow_patterns(tuple) {
							if !gates.contains(gate) {
								gates.push(gate.clone());
							}
						}
					}
				}
			}
			gates.into()
		}))
	}

	/// Checks if a call from the `caller` class to the member is one some pointcut needs to know being in the control
	/// flow of.
	pub fn is_cflow_source(&self, caller: &ClassMetaData, class: &ClassMetaData, member: &MemberMetaData) -> Result<bool> {
		let tables = self.initialized_tables()?;
		let key = Self::key(PointcutKind::Cflow, Some(caller), class, member);
		Ok(self.cflow_sources.get_or_compute(key, |_| {
			let target = MatchTarget::Call { caller, class, member };
			tables.aspects.iter()
				.flat_map(|aspect| aspect.metadata.cflow_sources())
				.any(|tuple| tuple.matches(&target))
		}))
	}

	/// Checks if any aspect has a pointcut that could match something in the class.
	pub fn could_match_class(&self, class: &ClassMetaData) -> Result<bool> {
		let tables = self.initialized_tables()?;
		Ok(tables.aspects.iter().any(|aspect| aspect.metadata.could_match_class(class)))
	}

	/// Checks if a class pointcut of any aspect matches the class.
	pub fn has_class_pointcuts(&self, class: &ClassMetaData) -> Result<bool> {
		let tables = self.initialized_tables()?;
		Ok(tables.aspects.iter().any(|aspect| !aspect.metadata.get_class_pointcuts(class).is_empty()))
	}

	/// The mixins introduced to the class, each once, in the order of the aspects binding them.
	pub fn introductions(&self, class: &ClassMetaData) -> Result<Vec<Arc<Mixin>>> {
		let tables = self.initialized_tables()?;
		let mut mixins: Vec<Arc<Mixin>> = Vec::new();
		for aspect in &tables.aspects {
			for pointcut in aspect.metadata.get_class_pointcuts(class) {
				for index in pointcut.introductions() {
					let mixin = tables.mixin(*index)
						.ok_or_else(|| DefinitionError::MixinNotFound(index.to_string(), self.uuid.clone()))?;
					if !mixins.iter().any(|m| m.index == mixin.index) {
						mixins.push(mixin.clone());
					}
				}
			}
		}
		Ok(mixins)
	}

	fn clear_caches(&self) {
		self.pointcuts.clear();
		self.cflow_patterns.clear();
		self.cflow_sources.clear();
	}

	/// Forgets all lookups about the class, for when it's reloaded.
	pub fn invalidate_class(&self, class: &ClassName) {
		debug!("system {:?}: invalidating lookups of class {class}", self.uuid);
		self.pointcuts.invalidate_class(class);
		self.cflow_patterns.invalidate_class(class);
		self.cflow_sources.invalidate_class(class);
	}

	fn for_each_container(&self, f: impl Fn(&AspectContainer)) {
		let tables = self.tables();
		for aspect in &tables.aspects {
			f(&aspect.container);
		}
		for container in tables.mixins.iter().filter_map(|m| m.container.as_ref()) {
			f(container);
		}
	}

	/// Drops the aspect and mixin instances of an object that's gone.
	pub fn evict_instance(&self, id: ObjectId) {
		self.for_each_container(|container| container.evict_instance(id));
	}

	pub fn evict_thread(&self, id: ThreadId) {
		self.for_each_container(|container| container.evict_thread(id));
	}
}

/// All systems of a process, by uuid.
///
/// Each system is created once, on first use. Hosts create one registry and hand it to the weaver and the runtime.
pub struct SystemRegistry {
	loader: Arc<dyn DefinitionLoader>,
	library: Arc<AspectLibrary>,
	options: WeaverOptions,
	systems: RwLock<HashMap<String, Arc<AspectSystem>>>,
	managers: RwLock<HashMap<(String, ClassName), Arc<JoinPointManager>>>,
	created: AtomicUsize,
}

impl SystemRegistry {
	pub fn new(loader: Arc<dyn DefinitionLoader>, library: Arc<AspectLibrary>, options: WeaverOptions) -> Arc<SystemRegistry> {
		Arc::new(SystemRegistry {
			loader,
			library,
			options,
			systems: RwLock::new(HashMap::new()),
			managers: RwLock::new(HashMap::new()),
			created: AtomicUsize::new(0),
		})
	}

	pub fn options(&self) -> &WeaverOptions {
		&self.options
	}

	/// Gets the system with the uuid, creating it if it doesn't exist yet. The system isn't initialized by this.
	pub fn get_system(&self, uuid: &str) -> Arc<AspectSystem> {
		if let Some(system) = self.systems.read().get(uuid) {
			return system.clone();
		}
		let mut systems = self.systems.write();
		systems.entry(uuid.to_owned())
			.or_insert_with(|| {
				self.created.fetch_add(1, Ordering::Relaxed);
				debug!("creating system {uuid:?}");
				Arc::new(AspectSystem::new(uuid, self.loader.clone(), self.library.clone(), &self.options))
			})
			.clone()
	}

	/// How many systems were created so far.
	pub fn created_count(&self) -> usize {
		self.created.load(Ordering::Relaxed)
	}

	/// Gets the join point manager for classes woven for the system, creating it on first use.
	pub fn join_point_manager(&self, uuid: &str, class: &ClassName) -> Arc<JoinPointManager> {
		let key = (uuid.to_owned(), class.clone());
		if let Some(manager) = self.managers.read().get(&key) {
			return manager.clone();
		}
		let system = self.get_system(uuid);
		self.managers.write()
			.entry(key)
			.or_insert_with(|| Arc::new(JoinPointManager::new(system, class.clone())))
			.clone()
	}

	fn systems(&self) -> Vec<Arc<AspectSystem>> {
		self.systems.read().values().cloned().collect()
	}

	/// Forgets everything derived from the class, in all systems.
	pub fn invalidate_class(&self, class: &ClassName) {
		for system in self.systems() {
			system.invalidate_class(class);
		}
		self.managers.write().retain(|(_, c), _| c != class);
	}
}

impl LifecycleListener for SystemRegistry {
	fn object_dropped(&self, id: ObjectId) {
		for system in self.systems() {
			system.evict_instance(id);
		}
	}

	fn thread_exited(&self, id: ThreadId) {
		for system in self.systems() {
			system.evict_thread(id);
		}
	}
}
