//! A model of classes as mutable data, an encoding of them to bytes and a small multi-threaded interpreter
//! that loads classes through transformation hooks.
//!
//! ```
//! use shuttle::tree::class::{ClassAccess, ClassFile, ClassName};
//! use shuttle::tree::method::code::{Code, Instruction, Loadable};
//! use shuttle::tree::method::{Method, MethodAccess, MethodDescriptor, MethodName};
//! use shuttle::vm::Runtime;
//! use shuttle::vm::value::Value;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut class = ClassFile::new(ClassAccess::default(), ClassName::try_from("demo/Answer")?, Some(ClassName::java_lang_object()), Vec::new());
//! class.add_method(
//!     Method::new(MethodAccess { is_static: true, ..MethodAccess::default() }, MethodName::try_from("get")?, MethodDescriptor::try_from("()I")?)
//!         .with_code(Code::from_instructions(0, [Instruction::Ldc(Loadable::Integer(42)), Instruction::ValueReturn]))
//! )?;
//!
//! let runtime = Runtime::new()?;
//! runtime.add_class(&class)?;
//! let answer = runtime.invoke_static(&class.name, &MethodName::try_from("get")?, &MethodDescriptor::try_from("()I")?, Vec::new())?;
//! assert_eq!(answer, Value::Int(42));
//! # Ok(())
//! # }
//! ```

mod macros;
pub mod codec;
pub mod tree;
pub mod vm;
