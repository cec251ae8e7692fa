use std::collections::HashMap;
use anyhow::{anyhow, Result};
use log::debug;
use shuttle::tree::class::{ClassFile, ClassName};
use shuttle::tree::method::code::Code;
use shuttle::tree::method::{Method, MethodAccess, MethodDescriptor, MethodName};
use crate::joinpoint::method_hash;
use crate::metadata::{MemberMetaData, MethodMetaData};
use crate::transform::attributes::{is_mixin_proxy, next_join_point_index, PrefixedMarker, WrapperMarker};
use crate::transform::codegen::{split_constructor, ExecutionJoinPoint};
use crate::transform::naming::{is_weft_member, prefixed_name};
use crate::transform::{Stage, Weaving};

/// Moves the bodies of advised methods and constructors into prefixed methods, putting wrappers dispatching to the
/// join point manager in their place.
///
/// Wrappers from an earlier pass are switched between dispatching and calling the prefixed method directly, as the
/// join point gains or loses advice.
pub(crate) struct Execution;

/// A join point woven by an earlier pass for the same system.
struct Woven {
	marker: WrapperMarker,
	/// The current name of the wrapper, which differs from the join point name if another system wove it since.
	wrapper: MethodName,
	prefixed: MethodName,
	is_static: bool,
}

fn woven_join_points(class: &ClassFile, uuid: &str) -> Result<HashMap<(MethodName, MethodDescriptor), Woven>> {
	let mut woven = HashMap::new();
	for method in &class.methods {
		let Some(marker) = WrapperMarker::read(method)? else { continue };
		if marker.uuid != uuid {
			continue;
		}
		let prefixed = class.methods.iter()
			.filter(|m| m.descriptor == method.descriptor)
			.find_map(|m| match PrefixedMarker::read(m) {
				Ok(Some(prefixed)) if prefixed.index == marker.index => Some((m, prefixed)),
				_ => None,
			});
		let Some((prefixed, prefixed_marker)) = prefixed else {
			return Err(anyhow!("wrapper {}{} has lost the method it wraps", method.name, method.descriptor));
		};
		woven.insert((prefixed_marker.original, method.descriptor.clone()), Woven {
			marker,
			wrapper: method.name.clone(),
			prefixed: prefixed.name.clone(),
			is_static: prefixed.access.is_static,
		});
	}
	Ok(woven)
}

fn is_candidate(method: &Method) -> bool {
	!is_weft_member(method.name.as_str()) &&
		!method.access.is_native &&
		!method.access.is_abstract &&
		!method.name.is_clinit() &&
		method.code.is_some() &&
		!is_mixin_proxy(method)
}

fn is_advised(weaving: &Weaving<'_>, member: &MemberMetaData) -> Result<bool> {
	let execution = weaving.system.execution_pointcuts(&weaving.class_meta, member)?;
	let throws = weaving.system.throws_pointcuts(&weaving.class_meta, member)?;
	Ok(execution.iter().chain(throws.iter()).any(|matched| !matched.pointcut.advices().is_empty()))
}

impl Stage for Execution {
	fn name(&self) -> &'static str {
		"execution"
	}

	fn apply(&self, class: &mut ClassFile, weaving: &mut Weaving<'_>) -> Result<usize> {
		let woven = woven_join_points(class, weaving.uuid)?;
		let candidates: Vec<(MethodName, MethodDescriptor)> = class.methods.iter()
			.filter(|m| is_candidate(m))
			.map(|m| (m.name.clone(), m.descriptor.clone()))
			.collect();

		let mut count = 0;
		for (name, descriptor) in candidates {
			let Some(method) = class.method(&name, &descriptor) else { continue };
			let meta = MethodMetaData::from_method(method)?;
			let hash = method_hash(&meta);
			let advised = is_advised(weaving, &MemberMetaData::Method(meta))?;

			match woven.get(&(name.clone(), descriptor.clone())) {
				Some(existing) => {
					if existing.marker.empty == advised {
						toggle(class, weaving.uuid, name, descriptor, existing, hash, advised)?;
						count += 1;
					}
				},
				None if advised => {
					weave(class, weaving.uuid, name, descriptor, hash)?;
					count += 1;
				},
				None => {},
			}
		}
		Ok(count)
	}
}

fn weave(class: &mut ClassFile, uuid: &str, name: MethodName, descriptor: MethodDescriptor, hash: i32) -> Result<()> {
	let index = next_join_point_index(class)?;
	let prefixed = prefixed_name(class, &name)?;
	let position = class.methods.iter()
		.position(|m| m.name == name && m.descriptor == descriptor)
		.ok_or_else(|| anyhow!("method {name}{descriptor} vanished while weaving"))?;
	let original = class.methods.remove(position);
	let is_static = original.access.is_static;

	let join_point = ExecutionJoinPoint {
		class: class.name.clone(),
		name,
		descriptor,
		is_static,
		prefixed: prefixed.clone(),
		index,
		hash,
	};
	let body_access = MethodAccess { is_private: true, is_synthetic: true, is_static, ..MethodAccess::default() };
	let mut body = Method::new(body_access, prefixed, join_point.descriptor.clone());
	body.exceptions = original.exceptions.clone();
	body.attributes = original.attributes.clone();

	let wrapper_code = if join_point.name.is_init() {
		let (head, tail) = split_constructor(&class.name, &original)?;
		let max_locals = original.code.as_ref().map_or(0, |code| code.max_locals);
		let mut tail_code = Code::new(max_locals);
		tail_code.instructions = tail;
		body.code = Some(tail_code);
		join_point.wrapper(uuid, head, max_locals)?
	} else {
		body.code = original.code.clone();
		join_point.wrapper(uuid, Vec::new(), original.parameter_slots()?)?
	};
	PrefixedMarker { index, original: join_point.name.clone() }.write(&mut body);

	let mut wrapper = Method::new(original.access, join_point.name.clone(), join_point.descriptor.clone()).with_code(wrapper_code);
	wrapper.exceptions = original.exceptions;
	WrapperMarker { empty: false, index, uuid: uuid.to_owned() }.write(&mut wrapper);

	debug!("wove {:?} {}.{}{} as join point {index}", join_point.kind(), class.name, join_point.name, join_point.descriptor);
	class.methods.insert(position, wrapper);
	class.methods.push(body);
	Ok(())
}

fn toggle(
	class: &mut ClassFile,
	uuid: &str,
	name: MethodName,
	descriptor: MethodDescriptor,
	existing: &Woven,
	hash: i32,
	advised: bool,
) -> Result<()> {
	let class_name: ClassName = class.name.clone();
	let wrapper = class.method_mut(&existing.wrapper, &descriptor)
		.ok_or_else(|| anyhow!("wrapper {}{descriptor} vanished while weaving", existing.wrapper))?;

	let (head, max_locals) = if wrapper.name.is_init() {
		let (head, _) = split_constructor(&class_name, wrapper)?;
		(head, wrapper.code.as_ref().map_or(0, |code| code.max_locals))
	} else {
		(Vec::new(), wrapper.parameter_slots()?)
	};

	let join_point = ExecutionJoinPoint {
		class: class_name,
		name,
		descriptor,
		is_static: existing.is_static,
		prefixed: existing.prefixed.clone(),
		index: existing.marker.index,
		hash,
	};
	let code = if advised {
		join_point.wrapper(uuid, head, max_locals)?
	} else {
		join_point.empty_wrapper(uuid, head, max_locals)?
	};
	wrapper.code = Some(code);
	WrapperMarker { empty: !advised, ..existing.marker.clone() }.write(wrapper);

	debug!(
		"{} join point {} of {}",
		if advised { "reactivated" } else { "emptied" },
		existing.marker.index,
		join_point.class,
	);
	Ok(())
}
