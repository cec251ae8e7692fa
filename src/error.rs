//! The typed root causes of failures.
//!
//! Public functions return [`anyhow::Result`]; the errors here are at the root of the chain and can be found with
//! [`anyhow::Error::downcast_ref`].

use thiserror::Error;

/// A configuration problem: something in a definition doesn't resolve or is malformed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DefinitionError {
	#[error("malformed pattern {pattern:?} in pointcut {pointcut:?} of aspect {aspect:?}: {reason}")]
	MalformedPattern {
		pattern: String,
		pointcut: String,
		aspect: String,
		reason: String,
	},
	#[error("malformed pointcut expression {expression:?} in aspect {aspect:?}: {reason}")]
	MalformedExpression {
		expression: String,
		aspect: String,
		reason: String,
	},
	#[error("pointcut expression {expression:?} in aspect {aspect:?} mixes pointcuts of kinds {first} and {second}")]
	MixedPointcutKinds {
		expression: String,
		aspect: String,
		first: String,
		second: String,
	},
	#[error("pointcut {pointcut:?} referenced in aspect {aspect:?} is not defined")]
	UnknownPointcut {
		pointcut: String,
		aspect: String,
	},
	#[error("advice {advice:?} referenced in aspect {aspect:?} is not declared by its class {class:?}")]
	UnknownAdvice {
		advice: String,
		aspect: String,
		class: String,
	},
	#[error("aspect {aspect:?} uses the class {class:?} which isn't in the aspect library")]
	UnknownAspectClass {
		aspect: String,
		class: String,
	},
	#[error("introduction {introduction:?} referenced in aspect {aspect:?} is not defined")]
	UnknownIntroduction {
		introduction: String,
		aspect: String,
	},
	#[error("introduction {introduction:?} uses the mixin {mixin:?} which isn't in the aspect library")]
	UnknownMixinClass {
		introduction: String,
		mixin: String,
	},
	#[error("aspect name {0:?} is used twice")]
	DuplicateAspect(String),
	#[error("introduction name {0:?} is used twice")]
	DuplicateIntroduction(String),
	#[error("unknown deployment model {0:?}, expected one of perJVM, perClass, perInstance, perThread")]
	UnknownDeploymentModel(String),
	#[error("no aspect {0} in system {1:?}")]
	AspectNotFound(String, String),
	#[error("no mixin {0} in system {1:?}")]
	MixinNotFound(String, String),
	#[error("no definition for system {0:?}")]
	SystemNotDefined(String),
}

/// A class could not be woven. The class is then defined unwoven.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformationError {
	#[error("stage {stage} failed for class {class}: {reason}")]
	StageFailed {
		stage: &'static str,
		class: String,
		reason: String,
	},
	#[error("class {class} already has a member {member}")]
	DuplicateMember {
		class: String,
		member: String,
	},
	#[error("cannot split constructor {class}.<init>{descriptor}: {reason}")]
	UnsplittableConstructor {
		class: String,
		descriptor: String,
		reason: String,
	},
}

/// Something about a dispatch from woven code doesn't line up with the class it came from.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
	#[error("no join point with hash {hash} and index {index} in class {class}")]
	UnknownJoinPoint {
		class: String,
		hash: i32,
		index: u32,
	},
	#[error("unknown join point kind {0}")]
	UnknownKind(i32),
	#[error("advice of aspect {aspect:?} expects an instance of a different type")]
	AspectTypeMismatch {
		aspect: String,
	},
	#[error("malformed arguments from woven code: {0}")]
	MalformedArguments(String),
}
