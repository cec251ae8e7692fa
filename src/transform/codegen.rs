//! Building blocks of the code weaving generates.
//!
//! Every value takes one local variable slot, so parameters are found at consecutive slots after `this`.

use std::collections::{HashMap, HashSet};
use std::mem;
use anyhow::Result;
use shuttle::tree::class::ClassName;
use shuttle::tree::descriptor::Type;
use shuttle::tree::field::{FieldDescriptor, FieldRef};
use shuttle::tree::method::code::{Code, Instruction, InstructionListEntry, Label, Loadable, LvIndex};
use shuttle::tree::method::{Method, MethodDescriptor, MethodName, MethodRef};
use crate::error::TransformationError;
use crate::joinpoint::JoinPointKind;
use crate::runtime::{manager_class, PROCEED_EXECUTION};
use crate::transform::naming::{class_cache_field, class_field, manager_field};

/// Collects instructions, putting labels on the next instruction pushed.
#[derive(Debug, Default)]
pub(crate) struct Emitter {
	entries: Vec<InstructionListEntry>,
	label: Option<Label>,
}

impl Emitter {
	pub(crate) fn label(&mut self, label: Label) {
		if let Some(pending) = self.label.replace(label) {
			self.entries.push(InstructionListEntry { label: Some(pending), instruction: Instruction::Nop });
		}
	}

	pub(crate) fn push(&mut self, instruction: Instruction) {
		self.entries.push(InstructionListEntry { label: self.label.take(), instruction });
	}

	pub(crate) fn finish(mut self) -> Vec<InstructionListEntry> {
		if let Some(label) = self.label.take() {
			self.entries.push(InstructionListEntry { label: Some(label), instruction: Instruction::Nop });
		}
		self.entries
	}
}

pub(crate) fn int(value: i32) -> Instruction {
	Instruction::Ldc(Loadable::Integer(value))
}

pub(crate) fn index(index: u32) -> Result<Instruction> {
	Ok(int(i32::try_from(index)?))
}

fn java_lang_class() -> FieldDescriptor {
	FieldDescriptor::from_class(&ClassName::java_lang_class())
}

pub(crate) fn manager_field_ref(class: &ClassName, uuid: &str) -> FieldRef {
	FieldRef { class: class.clone(), name: manager_field(uuid), desc: FieldDescriptor::from_class(&manager_class()) }
}

pub(crate) fn class_field_ref(class: &ClassName) -> FieldRef {
	FieldRef { class: class.clone(), name: class_field(), desc: java_lang_class() }
}

pub(crate) fn class_cache_field_ref(class: &ClassName, callee: &ClassName) -> FieldRef {
	FieldRef { class: class.clone(), name: class_cache_field(callee), desc: java_lang_class() }
}

fn for_name() -> MethodRef {
	MethodRef::new(
		ClassName::java_lang_class(),
		MethodName::new_unchecked("forName"),
		MethodDescriptor::new_unchecked("(Ljava/lang/String;)Ljava/lang/Class;"),
	)
}

/// Checks if the instruction at the position is a `Class.forName` call weaving generated to fill a class cache field.
pub(crate) fn is_generated_for_name(instructions: &[InstructionListEntry], position: usize) -> bool {
	let at = |offset: usize| instructions.get(position + offset).map(|entry| &entry.instruction);
	matches!(at(0), Some(Instruction::InvokeStatic(method)) if method == &for_name()) &&
		matches!(at(1), Some(Instruction::Dup)) &&
		matches!(at(2), Some(Instruction::PutStatic(field)) if crate::transform::naming::is_weft_member(field.name.as_str()))
}

/// The parameters of a method with the slots they're in, starting at `first`.
pub(crate) fn parameters(descriptor: &MethodDescriptor, first: u16) -> Result<(Vec<(LvIndex, Type)>, Option<Type>)> {
	let parsed = descriptor.parse()?;
	let mut slot = first;
	let mut parameters = Vec::with_capacity(parsed.parameters.len());
	for t in parsed.parameters {
		parameters.push((LvIndex::new(slot), t));
		slot += 1;
	}
	Ok((parameters, parsed.return_type))
}

/// Pushes an `Object[]` with the values of the locals.
pub(crate) fn push_args_array(e: &mut Emitter, locals: &[(LvIndex, Type)]) -> Result<()> {
	e.push(int(i32::try_from(locals.len())?));
	e.push(Instruction::ANewArray(ClassName::java_lang_object()));
	for (i, (local, t)) in locals.iter().enumerate() {
		e.push(Instruction::Dup);
		e.push(int(i32::try_from(i)?));
		e.push(Instruction::Load(*local));
		if t.is_primitive() {
			e.push(Instruction::Box(t.clone()));
		}
		e.push(Instruction::AAStore);
	}
	Ok(())
}

/// Turns the object a dispatch returned into a value of the type. A `null` for a primitive is its zero value.
pub(crate) fn convert_result(e: &mut Emitter, code: &mut Code, t: Option<&Type>) {
	match t {
		None => e.push(Instruction::Pop),
		Some(t) if t.is_primitive() => {
			let unbox = code.new_label();
			let done = code.new_label();
			e.push(Instruction::Dup);
			e.push(Instruction::IfNonNull(unbox));
			e.push(Instruction::Pop);
			if let Some(zero) = Loadable::default_for(t) {
				e.push(Instruction::Ldc(zero));
			}
			e.push(Instruction::Goto(done));
			e.label(unbox);
			e.push(Instruction::Unbox(t.clone()));
			e.label(done);
		},
		Some(t) => {
			if let Some(class) = t.class_name().filter(|c| c != &ClassName::java_lang_object()) {
				e.push(Instruction::CheckCast(class));
			}
		},
	}
}

pub(crate) fn push_return(e: &mut Emitter, t: Option<&Type>) {
	e.push(if t.is_some() { Instruction::ValueReturn } else { Instruction::Return });
}

/// Pushes the class object of `callee` as seen from code in `class`.
///
/// Other classes are looked up once with `Class.forName` and cached in a field of `class`.
pub(crate) fn push_class_ref(e: &mut Emitter, code: &mut Code, class: &ClassName, callee: &ClassName) {
	if callee == class {
		e.push(Instruction::GetStatic(class_field_ref(class)));
		return;
	}
	let field = class_cache_field_ref(class, callee);
	let done = code.new_label();
	e.push(Instruction::GetStatic(field.clone()));
	e.push(Instruction::Dup);
	e.push(Instruction::IfNonNull(done));
	e.push(Instruction::Pop);
	e.push(Instruction::Ldc(Loadable::String(callee.java_name())));
	e.push(Instruction::InvokeStatic(for_name()));
	e.push(Instruction::Dup);
	e.push(Instruction::PutStatic(field));
	e.label(done);
}

pub(crate) fn push_this(e: &mut Emitter, is_static: bool) {
	e.push(if is_static { Instruction::AConstNull } else { Instruction::Load(LvIndex::new(0)) });
}

/// What to do with an instruction when rewriting code.
pub(crate) enum Replacement<S> {
	/// Replace it with a `nop`, keeping its label.
	Drop,
	With(S),
}

/// Rewrites code, replacing the instructions at the positions given. Labels stay on the first instruction of a
/// replacement.
pub(crate) fn rewrite<S>(
	code: &mut Code,
	mut replacements: HashMap<usize, Replacement<S>>,
	mut emit: impl FnMut(&mut Code, &mut Emitter, S) -> Result<()>,
) -> Result<()> {
	// labels handed out from now on come after all existing ones
	code.new_label();
	let instructions = mem::take(&mut code.instructions);
	let mut e = Emitter::default();
	for (position, entry) in instructions.into_iter().enumerate() {
		if let Some(label) = entry.label {
			e.label(label);
		}
		match replacements.remove(&position) {
			None => e.push(entry.instruction),
			Some(Replacement::Drop) => e.push(Instruction::Nop),
			Some(Replacement::With(site)) => emit(code, &mut e, site)?,
		}
	}
	code.instructions = e.finish();
	Ok(())
}

/// An execution join point: a method or constructor whose body moved to a prefixed method, with a wrapper in its
/// place.
#[derive(Debug, Clone)]
pub struct ExecutionJoinPoint {
	pub class: ClassName,
	pub name: MethodName,
	pub descriptor: MethodDescriptor,
	pub is_static: bool,
	/// The name of the method holding the original body.
	pub prefixed: MethodName,
	pub index: u32,
	pub hash: i32,
}

impl ExecutionJoinPoint {
	pub fn kind(&self) -> JoinPointKind {
		if self.name.is_init() {
			JoinPointKind::ConstructorExecution
		} else {
			JoinPointKind::MethodExecution
		}
	}

	fn prefixed_ref(&self) -> MethodRef {
		MethodRef::new(self.class.clone(), self.prefixed.clone(), self.descriptor.clone())
	}

	/// The body of the wrapper, dispatching to the join point manager of the system.
	///
	/// For constructors, `head` is the code up to and including the `super(...)` or `this(...)` call, which stays in
	/// the wrapper.
	pub fn wrapper(&self, uuid: &str, head: Vec<InstructionListEntry>, max_locals: u16) -> Result<Code> {
		self.build(uuid, head, max_locals, false)
	}

	/// The body of a wrapper whose join point isn't advised anymore: it just calls the prefixed method. The method
	/// keeps its shape, so it can be made to dispatch again later.
	pub fn empty_wrapper(&self, uuid: &str, head: Vec<InstructionListEntry>, max_locals: u16) -> Result<Code> {
		self.build(uuid, head, max_locals, true)
	}

	pub(crate) fn build(&self, uuid: &str, head: Vec<InstructionListEntry>, max_locals: u16, empty: bool) -> Result<Code> {
		let first = if self.is_static { 0 } else { 1 };
		let (parameters, return_type) = parameters(&self.descriptor, first)?;

		let mut code = Code::new(max_locals.max(first + u16::try_from(parameters.len())?));
		code.instructions = head;
		let mut e = Emitter::default();
		if empty {
			if !self.is_static {
				e.push(Instruction::Load(LvIndex::new(0)));
			}
			for (local, _) in &parameters {
				e.push(Instruction::Load(*local));
			}
			e.push(if self.is_static {
				Instruction::InvokeStatic(self.prefixed_ref())
			} else {
				Instruction::InvokeSpecial(self.prefixed_ref())
			});
		} else {
			e.push(Instruction::GetStatic(manager_field_ref(&self.class, uuid)));
			e.push(int(self.hash));
			e.push(index(self.index)?);
			push_args_array(&mut e, &parameters)?;
			push_this(&mut e, self.is_static);
			e.push(int(self.kind().tag()));
			e.push(Instruction::InvokeVirtual(PROCEED_EXECUTION.method_ref()));
			convert_result(&mut e, &mut code, return_type.as_ref());
		}
		push_return(&mut e, return_type.as_ref());
		code.instructions.extend(e.finish());
		Ok(code)
	}
}

/// Splits a constructor after its `super(...)` or `this(...)` call.
///
/// Fails if the two parts can't run separately: when jumps cross the call, or the second part reads locals the first
/// part stored.
pub(crate) fn split_constructor(class: &ClassName, method: &Method) -> Result<(Vec<InstructionListEntry>, Vec<InstructionListEntry>)> {
	let fail = |reason: &str| -> anyhow::Error {
		TransformationError::UnsplittableConstructor {
			class: class.to_string(),
			descriptor: method.descriptor.to_string(),
			reason: reason.to_owned(),
		}.into()
	};
	let code = method.code.as_ref().ok_or_else(|| fail("it has no code"))?;

	let mut pending_news = 0usize;
	let split = code.instructions.iter()
		.position(|entry| match &entry.instruction {
			Instruction::New(_) => {
				pending_news += 1;
				false
			},
			Instruction::InvokeSpecial(method) if method.name.is_init() => {
				if pending_news == 0 {
					true
				} else {
					pending_news -= 1;
					false
				}
			},
			_ => false,
		})
		.ok_or_else(|| fail("there is no super(...) or this(...) call"))?;
	let (head, tail) = code.instructions.split_at(split + 1);

	let labels = |entries: &[InstructionListEntry]| -> HashSet<Label> {
		entries.iter().filter_map(|entry| entry.label).collect()
	};
	let jumps_into = |from: &[InstructionListEntry], to: &HashSet<Label>| {
		from.iter().filter_map(|entry| entry.instruction.jump_target()).any(|label| to.contains(&label))
	};
	if jumps_into(head, &labels(tail)) || jumps_into(tail, &labels(head)) {
		return Err(fail("jumps cross the super(...) call"));
	}

	let stored: HashSet<LvIndex> = head.iter()
		.filter_map(|entry| match entry.instruction {
			Instruction::Store(local) => Some(local),
			_ => None,
		})
		.collect();
	let reads_stored = tail.iter().any(|entry| match entry.instruction {
		Instruction::Load(local) | Instruction::IInc(local, _) => stored.contains(&local),
		_ => false,
	});
	if reads_stored {
		return Err(fail("locals stored before the super(...) call are used after it"));
	}

	Ok((head.to_vec(), tail.to_vec()))
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use anyhow::Result;
	use shuttle::tree::class::ClassName;
	use shuttle::tree::method::code::{Code, Instruction, LvIndex};
	use shuttle::tree::method::{Method, MethodAccess, MethodDescriptor, MethodName, MethodRef};
	use crate::error::TransformationError;
	use crate::transform::codegen::{split_constructor, ExecutionJoinPoint};

	fn constructor(instructions: Vec<Instruction>) -> Result<Method> {
		Ok(Method::new(MethodAccess::default(), MethodName::init(), MethodDescriptor::try_from("(I)V")?)
			.with_code(Code::from_instructions(2, instructions)))
	}

	fn init(class: &str, descriptor: &str) -> Result<Instruction> {
		Ok(Instruction::InvokeSpecial(MethodRef::new(ClassName::try_from(class)?, MethodName::init(), MethodDescriptor::try_from(descriptor)?)))
	}

	#[test]
	fn split_after_super() -> Result<()> {
		let class = ClassName::try_from("test/C")?;
		let method = constructor(vec![
			Instruction::Load(LvIndex::new(0)),
			// an argument to super(...) that is constructed itself
			Instruction::New(ClassName::try_from("test/Arg")?),
			Instruction::Dup,
			init("test/Arg", "()V")?,
			init("test/Base", "(Ltest/Arg;)V")?,
			Instruction::Load(LvIndex::new(1)),
			Instruction::Pop,
			Instruction::Return,
		])?;

		let (head, tail) = split_constructor(&class, &method)?;
		assert_eq!(head.len(), 5);
		assert_eq!(tail.len(), 3);
		Ok(())
	}

	#[test]
	fn unsplittable() -> Result<()> {
		let class = ClassName::try_from("test/C")?;
		let method = constructor(vec![
			Instruction::Load(LvIndex::new(1)),
			Instruction::Store(LvIndex::new(2)),
			Instruction::Load(LvIndex::new(0)),
			init("java/lang/Object", "()V")?,
			Instruction::Load(LvIndex::new(2)),
			Instruction::Pop,
			Instruction::Return,
		])?;
		let error = split_constructor(&class, &method).err();
		assert!(matches!(
			error.as_ref().and_then(|e| e.downcast_ref::<TransformationError>()),
			Some(TransformationError::UnsplittableConstructor { .. })
		));

		let no_super = constructor(vec![Instruction::Return])?;
		assert!(split_constructor(&class, &no_super).is_err());
		Ok(())
	}

	#[test]
	fn wrappers() -> Result<()> {
		let join_point = ExecutionJoinPoint {
			class: ClassName::try_from("test/C")?,
			name: MethodName::try_from("m")?,
			descriptor: MethodDescriptor::try_from("(IJ)I")?,
			is_static: false,
			prefixed: MethodName::try_from("__weft$m$1$test_C")?,
			index: 0,
			hash: 42,
		};

		let empty = join_point.empty_wrapper("sys", Vec::new(), 3)?;
		let instructions: Vec<_> = empty.instructions.iter().map(|entry| entry.instruction.clone()).collect();
		assert_eq!(instructions, vec![
			Instruction::Load(LvIndex::new(0)),
			Instruction::Load(LvIndex::new(1)),
			Instruction::Load(LvIndex::new(2)),
			Instruction::InvokeSpecial(MethodRef::new(join_point.class.clone(), join_point.prefixed.clone(), join_point.descriptor.clone())),
			Instruction::ValueReturn,
		]);

		let dispatching = join_point.wrapper("sys", Vec::new(), 3)?;
		assert_eq!(dispatching.max_locals, 3);
		// the zero value is used when the dispatch returns null
		let unboxing = dispatching.instructions.iter()
			.find(|e| e.instruction == Instruction::Unbox(shuttle::tree::descriptor::Type::I))
			.and_then(|e| e.label)
			.ok_or_else(|| anyhow::anyhow!("no unbox"))?;
		assert!(dispatching.instructions.iter().any(|entry| entry.instruction == Instruction::IfNonNull(unboxing)));
		assert_eq!(dispatching.instructions.last().map(|e| &e.instruction), Some(&Instruction::ValueReturn));
		Ok(())
	}
}
