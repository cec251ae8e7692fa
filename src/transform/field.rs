use std::collections::{BTreeSet, HashMap};
use anyhow::Result;
use log::trace;
use shuttle::tree::class::{ClassFile, ClassName};
use shuttle::tree::field::{Field as ClassField, FieldAccess, FieldRef};
use shuttle::tree::method::code::{Code, Instruction, InstructionListEntry};
use crate::joinpoint::field_hash;
use crate::metadata::{FieldMetaData, MemberMetaData};
use crate::runtime::{MANAGER_CLASS, PROCEED_GET, PROCEED_SET};
use crate::transform::attributes::{is_mixin_proxy, next_join_point_index};
use crate::transform::codegen::{
	class_cache_field_ref, convert_result, index, int, manager_field_ref, push_class_ref, push_this, rewrite, Emitter,
	Replacement,
};
use crate::transform::naming::is_weft_member;
use crate::transform::{Stage, Weaving};

/// Replaces reads and writes of advised fields with calls to the join point manager.
pub(crate) struct Field;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Access {
	Get,
	Set,
}

#[derive(Debug)]
struct FieldSite {
	position: usize,
	field: FieldRef,
	access: Access,
	is_static: bool,
}

struct Woven {
	site: FieldSite,
	hash: i32,
	index: u32,
}

fn field_sites(instructions: &[InstructionListEntry]) -> Vec<FieldSite> {
	instructions.iter()
		.enumerate()
		.filter_map(|(position, entry)| {
			let (field, access, is_static) = match &entry.instruction {
				Instruction::GetField(field) => (field, Access::Get, false),
				Instruction::GetStatic(field) => (field, Access::Get, true),
				Instruction::PutField(field) => (field, Access::Set, false),
				Instruction::PutStatic(field) => (field, Access::Set, true),
				_ => return None,
			};
			if field.class.as_str() == MANAGER_CLASS || is_weft_member(field.name.as_str()) {
				return None;
			}
			Some(FieldSite { position, field: field.clone(), access, is_static })
		})
		.collect()
}

impl Stage for Field {
	fn name(&self) -> &'static str {
		"field"
	}

	fn apply(&self, class: &mut ClassFile, weaving: &mut Weaving<'_>) -> Result<usize> {
		let mut count = 0;
		let mut owners = BTreeSet::new();

		for method_index in 0..class.methods.len() {
			let method = &class.methods[method_index];
			if is_mixin_proxy(method) {
				continue;
			}
			let Some(code) = &method.code else { continue };
			let in_static = method.access.is_static;

			let mut advised = Vec::new();
			for site in field_sites(&code.instructions) {
				let meta = match weaving.resolver.find_field(&site.field.class, &site.field.name) {
					Some((_, found)) => FieldMetaData::from_field(&found)?,
					None => {
						let access = FieldAccess { is_static: site.is_static, ..FieldAccess::default() };
						FieldMetaData::new(site.field.name.clone(), site.field.desc.clone(), access)?
					},
				};
				let hash = field_hash(meta.name().as_str(), meta.type_name());
				let owner = weaving.resolve(&site.field.class);
				let member = MemberMetaData::Field(meta);
				let pointcuts = match site.access {
					Access::Get => weaving.system.get_pointcuts(&owner, &member)?,
					Access::Set => weaving.system.set_pointcuts(&owner, &member)?,
				};
				if pointcuts.iter().any(|matched| !matched.pointcut.advices().is_empty()) {
					advised.push((site, hash));
				}
			}
			if advised.is_empty() {
				continue;
			}

			let mut replacements = HashMap::new();
			for (site, hash) in advised {
				owners.insert(site.field.class.clone());
				let index = next_join_point_index(class)?;
				replacements.insert(site.position, Replacement::With(Woven { site, hash, index }));
				count += 1;
			}

			let class_name = class.name.clone();
			let uuid = weaving.uuid;
			let Some(code) = class.methods[method_index].code.as_mut() else { continue };
			rewrite(code, replacements, |code, e, woven| {
				trace!("weaving {:?} of {}.{} in {class_name}", woven.site.access, woven.site.field.class, woven.site.field.name);
				emit_access(code, e, &class_name, uuid, in_static, woven)
			})?;
		}

		for owner in owners {
			let field = class_cache_field_ref(&class.name, &owner);
			if owner != class.name && class.field(&field.name).is_none() {
				let access = FieldAccess { is_private: true, is_static: true, is_synthetic: true, ..FieldAccess::default() };
				class.add_field(ClassField::new(access, field.name, field.desc))?;
			}
		}
		Ok(count)
	}
}

fn emit_access(code: &mut Code, e: &mut Emitter, class: &ClassName, uuid: &str, in_static: bool, woven: Woven) -> Result<()> {
	let Woven { site, hash, index: join_point_index } = woven;
	let field_type = site.field.desc.parse()?;

	let value = (site.access == Access::Set).then(|| code.new_local());
	if let Some(value) = value {
		e.push(Instruction::Store(value));
	}
	let target = (!site.is_static).then(|| code.new_local());
	if let Some(target) = target {
		e.push(Instruction::Store(target));
	}

	e.push(Instruction::GetStatic(manager_field_ref(class, uuid)));
	e.push(int(hash));
	e.push(index(join_point_index)?);
	if let Some(value) = value {
		e.push(Instruction::Load(value));
		if field_type.is_primitive() {
			e.push(Instruction::Box(field_type.clone()));
		}
	}
	e.push(match target {
		Some(target) => Instruction::Load(target),
		None => Instruction::AConstNull,
	});
	push_this(e, in_static);
	push_class_ref(e, code, class, &site.field.class);

	match site.access {
		Access::Get => {
			e.push(Instruction::InvokeVirtual(PROCEED_GET.method_ref()));
			convert_result(e, code, Some(&field_type));
		},
		Access::Set => e.push(Instruction::InvokeVirtual(PROCEED_SET.method_ref())),
	}
	Ok(())
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use anyhow::Result;
	use shuttle::tree::class::ClassName;
	use shuttle::tree::field::{FieldDescriptor, FieldName, FieldRef};
	use shuttle::tree::method::code::{Code, Instruction, LvIndex};
	use super::{field_sites, Access};

	#[test]
	fn finds_field_sites() -> Result<()> {
		let class = ClassName::try_from("test/C")?;
		let field = |name: &str| -> Result<FieldRef> {
			Ok(FieldRef { class: class.clone(), name: FieldName::try_from(name)?, desc: FieldDescriptor::try_from("I")? })
		};
		let code = Code::from_instructions(1, [
			Instruction::Load(LvIndex::new(0)),
			Instruction::GetField(field("count")?),
			Instruction::GetStatic(field("__weft$jpm$sys")?),
			Instruction::PutStatic(field("total")?),
			Instruction::Return,
		]);

		let sites: Vec<_> = field_sites(&code.instructions).into_iter()
			.map(|site| (site.position, site.access, site.is_static))
			.collect();
		assert_eq!(sites, vec![(1, Access::Get, false), (3, Access::Set, true)]);
		Ok(())
	}
}
