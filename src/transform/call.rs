use std::collections::{BTreeSet, HashMap};
use anyhow::Result;
use log::trace;
use shuttle::tree::class::{ClassFile, ClassName};
use shuttle::tree::field::{Field, FieldAccess};
use shuttle::tree::method::code::{Code, Instruction, InstructionListEntry};
use shuttle::tree::method::{MethodAccess, MethodRef};
use crate::joinpoint::{method_hash, JoinPointKind};
use crate::metadata::{MemberMetaData, MethodMetaData};
use crate::runtime::{MANAGER_CLASS, PROCEED_CALL};
use crate::transform::attributes::{is_mixin_proxy, next_join_point_index};
use crate::transform::codegen::{
	class_cache_field_ref, convert_result, index, int, is_generated_for_name, manager_field_ref, parameters,
	push_args_array, push_class_ref, push_this, rewrite, Emitter, Replacement,
};
use crate::transform::naming::is_weft_member;
use crate::transform::{Stage, Weaving};

/// Replaces calls to advised methods and constructors with calls to the join point manager.
pub(crate) struct Call;

/// An invocation to weave.
#[derive(Debug)]
struct CallSite {
	position: usize,
	method: MethodRef,
	kind: JoinPointKind,
	is_static: bool,
	/// The positions of the `new` and `dup` of a constructor call.
	allocation: Option<(usize, usize)>,
}

/// A call site with everything needed to replace it.
struct Woven {
	site: CallSite,
	hash: i32,
	index: u32,
}

fn instruction_at(instructions: &[InstructionListEntry], position: usize) -> Option<&Instruction> {
	instructions.get(position).map(|entry| &entry.instruction)
}

/// Finds the invocations in the code that could be call join points.
fn call_sites(instructions: &[InstructionListEntry]) -> Vec<CallSite> {
	let mut sites = Vec::new();
	// a `new` waiting for its constructor call, with its `dup` if it's used like `new C(...)`
	let mut allocations: Vec<(ClassName, Option<(usize, usize)>)> = Vec::new();

	for (position, entry) in instructions.iter().enumerate() {
		let site = match &entry.instruction {
			Instruction::New(class) => {
				let dup = matches!(instruction_at(instructions, position + 1), Some(Instruction::Dup));
				allocations.push((class.clone(), dup.then_some((position, position + 1))));
				continue;
			},
			Instruction::InvokeSpecial(method) if method.name.is_init() => {
				// no pending allocation means this is the super(...) or this(...) call
				let Some((class, allocation)) = allocations.pop() else { continue };
				if class != method.class || allocation.is_none() {
					continue;
				}
				CallSite { position, method: method.clone(), kind: JoinPointKind::ConstructorCall, is_static: false, allocation }
			},
			Instruction::InvokeVirtual(method) | Instruction::InvokeInterface(method) => {
				CallSite { position, method: method.clone(), kind: JoinPointKind::MethodCall, is_static: false, allocation: None }
			},
			Instruction::InvokeStatic(method) => {
				if is_generated_for_name(instructions, position) {
					continue;
				}
				CallSite { position, method: method.clone(), kind: JoinPointKind::MethodCall, is_static: true, allocation: None }
			},
			_ => continue,
		};
		if site.method.class.as_str() == MANAGER_CLASS || site.method.class.is_array() || is_weft_member(site.method.name.as_str()) {
			continue;
		}
		sites.push(site);
	}
	sites
}

impl Stage for Call {
	fn name(&self) -> &'static str {
		"call"
	}

	fn apply(&self, class: &mut ClassFile, weaving: &mut Weaving<'_>) -> Result<usize> {
		let mut count = 0;
		let mut callees = BTreeSet::new();

		for method_index in 0..class.methods.len() {
			let method = &class.methods[method_index];
			if is_mixin_proxy(method) {
				continue;
			}
			let Some(code) = &method.code else { continue };
			let caller_is_static = method.access.is_static;

			let mut advised = Vec::new();
			for site in call_sites(&code.instructions) {
				let callee = &site.method;
				let meta = match weaving.resolver.find_method(&callee.class, &callee.name, &callee.desc) {
					Some((_, found)) => MethodMetaData::from_method(&found)?,
					None => MethodMetaData::new(callee.name.clone(), callee.desc.clone(), MethodAccess { is_static: site.is_static, ..MethodAccess::default() }, Vec::new())?,
				};
				let hash = method_hash(&meta);
				let callee_meta = weaving.resolve(&callee.class);
				let member = MemberMetaData::Method(meta);
				let pointcuts = weaving.system.call_pointcuts(&weaving.class_meta, &callee_meta, &member)?;
				let is_advised = pointcuts.iter().any(|matched| !matched.pointcut.advices().is_empty()) ||
					weaving.system.is_cflow_source(&weaving.class_meta, &callee_meta, &member)?;
				if is_advised {
					advised.push((site, hash));
				}
			}
			if advised.is_empty() {
				continue;
			}

			let mut replacements = HashMap::new();
			let mut woven = Vec::with_capacity(advised.len());
			for (site, hash) in advised {
				if let Some((new, dup)) = site.allocation {
					replacements.insert(new, Replacement::Drop);
					replacements.insert(dup, Replacement::Drop);
				}
				callees.insert(site.method.class.clone());
				woven.push(Woven { site, hash, index: next_join_point_index(class)? });
			}
			count += woven.len();
			for site in woven {
				replacements.insert(site.site.position, Replacement::With(site));
			}

			let class_name = class.name.clone();
			let uuid = weaving.uuid;
			let Some(code) = class.methods[method_index].code.as_mut() else { continue };
			rewrite(code, replacements, |code, e, woven| {
				trace!("weaving call to {}.{}{} in {class_name}", woven.site.method.class, woven.site.method.name, woven.site.method.desc);
				emit_call(code, e, &class_name, uuid, caller_is_static, woven)
			})?;
		}

		for callee in callees {
			let field = class_cache_field_ref(&class.name, &callee);
			if callee != class.name && class.field(&field.name).is_none() {
				let access = FieldAccess { is_private: true, is_static: true, is_synthetic: true, ..FieldAccess::default() };
				class.add_field(Field::new(access, field.name, field.desc))?;
			}
		}
		Ok(count)
	}
}

fn emit_call(code: &mut Code, e: &mut Emitter, class: &ClassName, uuid: &str, caller_is_static: bool, woven: Woven) -> Result<()> {
	let Woven { site, hash, index: join_point_index } = woven;
	let (parameters, return_type) = parameters(&site.method.desc, 0)?;

	// the arguments are on the stack, with the last one on top
	let temporaries: Vec<_> = parameters.into_iter()
		.map(|(_, t)| (code.new_local(), t))
		.collect();
	for (local, _) in temporaries.iter().rev() {
		e.push(Instruction::Store(*local));
	}
	let receiver = (site.kind == JoinPointKind::MethodCall && !site.is_static).then(|| code.new_local());
	if let Some(receiver) = receiver {
		e.push(Instruction::Store(receiver));
	}

	e.push(Instruction::GetStatic(manager_field_ref(class, uuid)));
	e.push(int(hash));
	e.push(index(join_point_index)?);
	push_args_array(e, &temporaries)?;
	e.push(match receiver {
		Some(receiver) => Instruction::Load(receiver),
		None => Instruction::AConstNull,
	});
	push_this(e, caller_is_static);
	push_class_ref(e, code, class, &site.method.class);
	e.push(int(site.kind.tag()));
	e.push(Instruction::InvokeVirtual(PROCEED_CALL.method_ref()));

	if site.kind == JoinPointKind::ConstructorCall {
		e.push(Instruction::CheckCast(site.method.class));
	} else {
		convert_result(e, code, return_type.as_ref());
	}
	Ok(())
}
