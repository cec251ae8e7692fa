use thiserror::Error;
use crate::vm::value::Value;

/// The ways executing code can end other than by returning.
#[derive(Debug, Error)]
pub enum VmError {
	/// A throwable was thrown and not caught. Code in the runtime can observe these.
	#[error("uncaught throwable {0:?}")]
	Thrown(Value),
	/// Something went wrong that code in the runtime can't observe, like a missing class or malformed code.
	#[error(transparent)]
	Internal(#[from] anyhow::Error),
}

impl VmError {
	pub fn thrown(&self) -> Option<&Value> {
		match self {
			VmError::Thrown(value) => Some(value),
			VmError::Internal(_) => None,
		}
	}
}

pub type VmResult<T> = std::result::Result<T, VmError>;
