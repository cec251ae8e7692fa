use std::sync::Weak;
use std::thread::ThreadId;
use log::trace;
use parking_lot::RwLock;
use crate::vm::value::ObjectId;

/// Receives notifications about objects and threads going away.
///
/// Listeners are held weakly by the runtime, so they stop receiving notifications once dropped.
pub trait LifecycleListener: Send + Sync {
	fn object_dropped(&self, _id: ObjectId) {}

	fn thread_exited(&self, _id: ThreadId) {}
}

#[derive(Default)]
pub(crate) struct Listeners {
	list: RwLock<Vec<Weak<dyn LifecycleListener>>>,
}

impl Listeners {
	pub(crate) fn add(&self, listener: Weak<dyn LifecycleListener>) {
		let mut list = self.list.write();
		list.retain(|l| l.strong_count() > 0);
		list.push(listener);
	}

	fn live(&self) -> Vec<std::sync::Arc<dyn LifecycleListener>> {
		self.list.read().iter().filter_map(Weak::upgrade).collect()
	}

	pub(crate) fn object_dropped(&self, id: ObjectId) {
		for listener in self.live() {
			listener.object_dropped(id);
		}
	}

	pub(crate) fn thread_exited(&self, id: ThreadId) {
		trace!("thread {id:?} exited");
		for listener in self.live() {
			listener.thread_exited(id);
		}
	}
}
