//! Tracking which call sites the current thread is in the control flow of.
//!
//! Every thread has its own markers. A marker is counted, so recursion into the same call site needs as many exits
//! as it had entries.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use log::trace;
use crate::joinpoint::JoinPointInfo;
use crate::pattern::PointcutPatternTuple;

/// Identifies a join point in the markers: kind, caller, declaring class and member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MarkerKey {
	kind: i32,
	caller: Option<String>,
	class: String,
	member: String,
}

impl MarkerKey {
	fn of(info: &JoinPointInfo) -> MarkerKey {
		MarkerKey {
			kind: info.kind.tag(),
			caller: info.caller.as_ref().map(|c| c.name().as_str().to_owned()),
			class: info.class.name().as_str().to_owned(),
			member: info.member.key(),
		}
	}
}

type Markers = HashMap<MarkerKey, (Arc<JoinPointInfo>, usize)>;

thread_local! {
	/// The markers of every tracker, by tracker id.
	static MARKERS: RefCell<HashMap<u64, Markers>> = RefCell::new(HashMap::new());
}

/// The control flow markers of one system.
#[derive(Debug)]
pub struct CflowTracker {
	id: u64,
}

impl Default for CflowTracker {
	fn default() -> Self {
		CflowTracker::new()
	}
}

impl CflowTracker {
	pub fn new() -> CflowTracker {
		static NEXT_ID: AtomicU64 = AtomicU64::new(1);
		CflowTracker { id: NEXT_ID.fetch_add(1, Ordering::Relaxed) }
	}

	/// Marks the current thread as being in the control flow of the join point.
	pub fn enter(&self, info: Arc<JoinPointInfo>) {
		trace!("entering the control flow of {}", info.signature());
		MARKERS.with_borrow_mut(|markers| {
			let entry = markers.entry(self.id).or_default()
				.entry(MarkerKey::of(&info))
				.or_insert((info, 0));
			entry.1 += 1;
		});
	}

	/// Undoes one [`CflowTracker::enter`]. Exiting a join point that wasn't entered does nothing.
	pub fn exit(&self, info: &JoinPointInfo) {
		MARKERS.with_borrow_mut(|markers| {
			let Some(own) = markers.get_mut(&self.id) else {
				return;
			};
			let key = MarkerKey::of(info);
			if let Some((_, count)) = own.get_mut(&key) {
				*count -= 1;
				if *count == 0 {
					own.remove(&key);
				}
			}
			if own.is_empty() {
				markers.remove(&self.id);
			}
		});
	}

	/// Enters the join point until the returned guard is dropped.
	pub fn scoped(&self, info: Arc<JoinPointInfo>) -> CflowGuard<'_> {
		self.enter(info.clone());
		CflowGuard { tracker: self, info }
	}

	/// Checks if the current thread is in the control flow of a join point the cflow pattern matches.
	pub fn is_in_flow_of(&self, tuple: &PointcutPatternTuple) -> bool {
		MARKERS.with_borrow(|markers| {
			markers.get(&self.id).is_some_and(|own| {
				own.values().any(|(info, _)| tuple.matches(&info.match_target()))
			})
		})
	}

	/// How many join points the current thread is in the control flow of, counting recursion.
	pub fn depth(&self) -> usize {
		MARKERS.with_borrow(|markers| {
			markers.get(&self.id).map_or(0, |own| own.values().map(|(_, count)| count).sum())
		})
	}
}

/// Forgets the markers the current thread still has. Other threads drop theirs when they end.
impl Drop for CflowTracker {
	fn drop(&mut self) {
		// the thread local may already be gone when a tracker is dropped during thread teardown
		let _ = MARKERS.try_with(|markers| markers.borrow_mut().remove(&self.id));
	}
}

/// Exits the control flow of a join point when dropped, also on unwinding.
pub struct CflowGuard<'a> {
	tracker: &'a CflowTracker,
	info: Arc<JoinPointInfo>,
}

impl Drop for CflowGuard<'_> {
	fn drop(&mut self) {
		self.tracker.exit(&self.info);
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use std::sync::Arc;
	use anyhow::Result;
	use shuttle::tree::class::ClassName;
	use shuttle::tree::method::{MethodAccess, MethodDescriptor, MethodName};
	use crate::cflow::{CflowTracker, MARKERS};
	use crate::definition::PointcutKind;
	use crate::joinpoint::{JoinPointInfo, JoinPointKind};
	use crate::metadata::{ClassMetaData, MemberMetaData, MethodMetaData};
	use crate::pattern::PointcutPatternTuple;

	fn call_of_m() -> Result<Arc<JoinPointInfo>> {
		let method = MethodMetaData::new(MethodName::try_from("m")?, MethodDescriptor::try_from("()V")?, MethodAccess::default(), Vec::new())?;
		Ok(Arc::new(JoinPointInfo {
			kind: JoinPointKind::MethodCall,
			caller: Some(Arc::new(ClassMetaData::unresolved(&ClassName::try_from("test/Caller")?))),
			class: Arc::new(ClassMetaData::unresolved(&ClassName::try_from("test/C")?)),
			member: MemberMetaData::Method(method),
		}))
	}

	#[test]
	fn counts_recursion() -> Result<()> {
		let tracker = CflowTracker::new();
		let tuple = PointcutPatternTuple::parse(PointcutKind::Cflow, "test.Caller->void test.C.m()")?;
		let info = call_of_m()?;

		assert!(!tracker.is_in_flow_of(&tuple));
		tracker.enter(info.clone());
		tracker.enter(info.clone());
		assert_eq!(tracker.depth(), 2);
		tracker.exit(&info);
		assert!(tracker.is_in_flow_of(&tuple));
		tracker.exit(&info);
		assert!(!tracker.is_in_flow_of(&tuple));

		// unbalanced exits are ignored
		tracker.exit(&info);
		assert_eq!(tracker.depth(), 0);
		Ok(())
	}

	#[test]
	fn other_threads_are_not_in_flow() -> Result<()> {
		let tracker = CflowTracker::new();
		let tuple = PointcutPatternTuple::parse(PointcutKind::Cflow, "test.Caller->void test.C.m()")?;

		let guard = tracker.scoped(call_of_m()?);
		assert!(tracker.is_in_flow_of(&tuple));
		let elsewhere = std::thread::scope(|scope| {
			scope.spawn(|| (tracker.is_in_flow_of(&tuple), tracker.depth())).join()
		}).map_err(|_| anyhow::anyhow!("thread panicked"))?;
		assert_eq!(elsewhere, (false, 0));

		drop(guard);
		assert!(!tracker.is_in_flow_of(&tuple));
		Ok(())
	}

	#[test]
	fn dropped_trackers_leave_no_markers() -> Result<()> {
		let tracker = CflowTracker::new();
		let id = tracker.id;
		// entered without ever exiting
		tracker.enter(call_of_m()?);
		assert!(MARKERS.with_borrow(|markers| markers.contains_key(&id)));

		drop(tracker);
		assert!(!MARKERS.with_borrow(|markers| markers.contains_key(&id)));
		Ok(())
	}

	#[test]
	fn trackers_are_separate() -> Result<()> {
		let a = CflowTracker::new();
		let b = CflowTracker::new();
		let tuple = PointcutPatternTuple::parse(PointcutKind::Cflow, "*->void test.C.m()")?;

		let _guard = a.scoped(call_of_m()?);
		assert!(a.is_in_flow_of(&tuple));
		assert!(!b.is_in_flow_of(&tuple));
		Ok(())
	}
}
