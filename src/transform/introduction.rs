use anyhow::Result;
use log::{debug, warn};
use shuttle::tree::class::ClassFile;
use shuttle::tree::method::code::{Code, Instruction, LvIndex};
use shuttle::tree::method::{Method, MethodAccess};
use crate::error::TransformationError;
use crate::runtime::INVOKE_MIXIN;
use crate::system::Mixin;
use crate::transform::attributes::{is_mixin_proxy, mark_mixin_proxy};
use crate::transform::codegen::{convert_result, index, manager_field_ref, parameters, push_args_array, push_return, Emitter};
use crate::transform::{Stage, Weaving};

/// Makes the class implement the interfaces of the mixins introduced to it, with public methods delegating to the mixin
/// instances.
pub(crate) struct Introduction;

impl Stage for Introduction {
	fn name(&self) -> &'static str {
		"introduction"
	}

	fn apply(&self, class: &mut ClassFile, weaving: &mut Weaving<'_>) -> Result<usize> {
		if !weaving.system.has_class_pointcuts(&weaving.class_meta)? {
			return Ok(0);
		}
		let mut count = 0;
		for mixin in weaving.system.introductions(&weaving.class_meta)? {
			if class.add_interface(mixin.interface().clone()) {
				debug!("introduced {} to {}", mixin.interface(), class.name);
				count += 1;
			}
			count += add_proxies(class, &mixin, weaving.uuid)?;
		}
		Ok(count)
	}
}

fn add_proxies(class: &mut ClassFile, mixin: &Mixin, uuid: &str) -> Result<usize> {
	let mut count = 0;
	for (method_index, method) in mixin.methods().iter().enumerate() {
		if let Some(existing) = class.method(&method.name, &method.descriptor) {
			if !is_mixin_proxy(existing) {
				let error = TransformationError::DuplicateMember {
					class: class.name.to_string(),
					member: format!("{}{}", method.name, method.descriptor),
				};
				warn!("not introducing method of mixin {}: {error}", mixin.name());
			}
			continue;
		}

		let (parameters, return_type) = parameters(&method.descriptor, 1)?;
		let mut code = Code::new(1 + u16::try_from(parameters.len())?);
		let mut e = Emitter::default();
		e.push(Instruction::GetStatic(manager_field_ref(&class.name, uuid)));
		e.push(index(u32::try_from(mixin.index())?)?);
		e.push(index(u32::try_from(method_index)?)?);
		push_args_array(&mut e, &parameters)?;
		e.push(Instruction::Load(LvIndex::new(0)));
		e.push(Instruction::InvokeVirtual(INVOKE_MIXIN.method_ref()));
		convert_result(&mut e, &mut code, return_type.as_ref());
		push_return(&mut e, return_type.as_ref());
		code.instructions = e.finish();

		let access = MethodAccess { is_public: true, ..MethodAccess::default() };
		let mut proxy = Method::new(access, method.name.clone(), method.descriptor.clone()).with_code(code);
		mark_mixin_proxy(&mut proxy, uuid);
		class.add_method(proxy)?;
		count += 1;
	}
	Ok(count)
}
