//! Aspect oriented programming for classes running on the [`shuttle`] interpreter.
//!
//! Systems of aspects are described by [`definition::SystemDefinition`]s, naming pointcuts over the members of classes
//! and binding advice and introductions to expressions over them. The implementations of aspects and mixins are
//! registered in an [`aspect::AspectLibrary`]. Classes get woven when they are loaded: the [`transform`] module
//! rewrites them to call into the [`runtime`], which runs the advice matching each join point.
//!
//! ```no_run
//! use std::sync::Arc;
//! use weft::aspect::AspectLibrary;
//! use weft::definition::{InMemoryDefinitionLoader, WeaverOptions};
//! use weft::system::SystemRegistry;
//! use shuttle::vm::Runtime;
//!
//! # fn main() -> anyhow::Result<()> {
//! let loader = InMemoryDefinitionLoader::from_json(&std::fs::read_to_string("system.json")?)?;
//! let registry = SystemRegistry::new(Arc::new(loader), Arc::new(AspectLibrary::new()), WeaverOptions::default());
//!
//! let runtime = Runtime::new()?;
//! weft::runtime::install(&runtime, &registry, &["my-system"])?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod metadata;

pub mod pattern;
pub mod expression;
pub mod definition;

pub mod aspect;
pub mod cflow;
pub mod joinpoint;
pub mod system;

pub mod runtime;
pub mod transform;
