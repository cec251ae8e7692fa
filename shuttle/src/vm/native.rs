use crate::vm::error::VmResult;
use crate::vm::value::Value;
use crate::vm::Runtime;

/// The body of a method marked `native`, provided by the host.
///
/// The receiver is `None` for static methods. For methods returning `void` the returned value is ignored.
pub trait NativeMethod: Send + Sync {
	fn invoke(&self, runtime: &Runtime, receiver: Option<Value>, args: Vec<Value>) -> VmResult<Value>;
}

impl<F> NativeMethod for F
where
	F: Fn(&Runtime, Option<Value>, Vec<Value>) -> VmResult<Value> + Send + Sync,
{
	fn invoke(&self, runtime: &Runtime, receiver: Option<Value>, args: Vec<Value>) -> VmResult<Value> {
		self(runtime, receiver, args)
	}
}
