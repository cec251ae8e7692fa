use std::hash::Hash;
use indexmap::IndexMap;
use log::trace;
use parking_lot::RwLock;
use shuttle::tree::class::ClassName;
use crate::definition::PointcutKind;

/// What a pointcut lookup is keyed by: the kind of lookup, the calling class for call sites, the class and the member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ResolutionKey {
	pub(crate) kind: PointcutKind,
	pub(crate) caller: Option<ClassName>,
	pub(crate) class: ClassName,
	pub(crate) member: String,
}

impl ResolutionKey {
	fn involves(&self, class: &ClassName) -> bool {
		&self.class == class || self.caller.as_ref() == Some(class)
	}
}

/// Remembers the results of lookups, forgetting the oldest once it holds more than its capacity.
///
/// Values must be computable again from the key alone: two threads computing the same entry just both store it.
pub(crate) struct ResolutionCache<V> {
	capacity: usize,
	entries: RwLock<IndexMap<ResolutionKey, V>>,
}

impl<V: Clone> ResolutionCache<V> {
	pub(crate) fn new(capacity: usize) -> ResolutionCache<V> {
		ResolutionCache { capacity, entries: RwLock::new(IndexMap::new()) }
	}

	pub(crate) fn get_or_compute(&self, key: ResolutionKey, compute: impl FnOnce(&ResolutionKey) -> V) -> V {
		if let Some(value) = self.entries.read().get(&key) {
			return value.clone();
		}
		let value = compute(&key);
		if self.capacity == 0 {
			return value;
		}

		let mut entries = self.entries.write();
		entries.insert(key, value.clone());
		while entries.len() > self.capacity {
			entries.shift_remove_index(0);
		}
		value
	}

	/// Drops every entry about the class, as the declaring class or as the caller.
	pub(crate) fn invalidate_class(&self, class: &ClassName) {
		let mut entries = self.entries.write();
		let before = entries.len();
		entries.retain(|key, _| !key.involves(class));
		trace!("dropped {} cached lookups for class {class}", before - entries.len());
	}

	pub(crate) fn clear(&self) {
		self.entries.write().clear();
	}

	pub(crate) fn len(&self) -> usize {
		self.entries.read().len()
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use anyhow::Result;
	use shuttle::tree::class::ClassName;
	use crate::definition::PointcutKind;
	use crate::system::cache::{ResolutionCache, ResolutionKey};

	fn key(class: &str, member: &str) -> Result<ResolutionKey> {
		Ok(ResolutionKey {
			kind: PointcutKind::Execution,
			caller: None,
			class: ClassName::try_from(class)?,
			member: member.to_owned(),
		})
	}

	#[test]
	fn bounded() -> Result<()> {
		let cache = ResolutionCache::new(2);
		let mut computed = 0;
		for member in ["a()V", "b()V", "c()V"] {
			cache.get_or_compute(key("test/C", member)?, |_| { computed += 1; computed });
		}
		assert_eq!(cache.len(), 2);
		// the oldest entry was dropped, so it's computed again
		assert_eq!(cache.get_or_compute(key("test/C", "a()V")?, |_| 10), 10);
		assert_eq!(cache.get_or_compute(key("test/C", "c()V")?, |_| 20), 3);
		Ok(())
	}

	#[test]
	fn invalidation() -> Result<()> {
		let cache = ResolutionCache::new(16);
		cache.get_or_compute(key("test/C", "a()V")?, |_| 1);
		cache.get_or_compute(key("test/D", "a()V")?, |_| 2);
		let mut call = key("test/D", "b()V")?;
		call.kind = PointcutKind::Call;
		call.caller = Some(ClassName::try_from("test/C")?);
		cache.get_or_compute(call, |_| 3);

		cache.invalidate_class(&ClassName::try_from("test/C")?);
		assert_eq!(cache.len(), 1);
		assert_eq!(cache.get_or_compute(key("test/D", "a()V")?, |_| 4), 2);
		Ok(())
	}
}
