use anyhow::Result;
use log::trace;
use shuttle::tree::class::ClassFile;
use shuttle::tree::field::{Field, FieldAccess, FieldDescriptor};
use shuttle::tree::method::code::{Code, Instruction, InstructionListEntry, Loadable};
use shuttle::tree::method::{Method, MethodAccess, MethodDescriptor, MethodName};
use crate::runtime::{manager_class, GET_MANAGER};
use crate::transform::codegen::{class_field_ref, manager_field_ref};
use crate::transform::{Stage, Weaving};

/// Adds the static fields woven code needs, initialized first thing in `<clinit>`: the class object of the class and
/// the join point manager of the system.
pub(crate) struct Prepare;

fn synthetic_static() -> FieldAccess {
	FieldAccess { is_private: true, is_static: true, is_synthetic: true, ..FieldAccess::default() }
}

impl Stage for Prepare {
	fn name(&self) -> &'static str {
		"prepare"
	}

	fn apply(&self, class: &mut ClassFile, weaving: &mut Weaving<'_>) -> Result<usize> {
		let mut prologue = Vec::new();
		let mut added = 0;

		let clazz = class_field_ref(&class.name);
		if class.field(&clazz.name).is_none() {
			class.add_field(Field::new(synthetic_static(), clazz.name.clone(), clazz.desc.clone()))?;
			prologue.push(Instruction::Ldc(Loadable::Class(class.name.clone())));
			prologue.push(Instruction::PutStatic(clazz));
			added += 1;
		}

		let manager = manager_field_ref(&class.name, weaving.uuid);
		if class.field(&manager.name).is_none() {
			class.add_field(Field::new(synthetic_static(), manager.name.clone(), FieldDescriptor::from_class(&manager_class())))?;
			prologue.push(Instruction::Ldc(Loadable::Class(class.name.clone())));
			prologue.push(Instruction::Ldc(Loadable::String(weaving.uuid.to_owned())));
			prologue.push(Instruction::InvokeStatic(GET_MANAGER.method_ref()));
			prologue.push(Instruction::PutStatic(manager));
			added += 1;
		}

		if prologue.is_empty() {
			return Ok(0);
		}

		let descriptor = MethodDescriptor::new_unchecked("()V");
		if !class.has_method(&MethodName::clinit(), &descriptor) {
			let access = MethodAccess { is_static: true, ..MethodAccess::default() };
			class.add_method(Method::new(access, MethodName::clinit(), descriptor.clone())
				.with_code(Code::from_instructions(0, [Instruction::Return])))?;
		}
		if let Some(code) = class.method_mut(&MethodName::clinit(), &descriptor).and_then(|m| m.code.as_mut()) {
			let prologue = prologue.into_iter()
				.map(|instruction| InstructionListEntry { label: None, instruction });
			code.instructions.splice(0..0, prologue);
		}
		trace!("prepared class {} for system {:?}", class.name, weaving.uuid);
		Ok(added)
	}
}
