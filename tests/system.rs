use pretty_assertions::assert_eq;
use std::sync::Arc;
use anyhow::Result;
use shuttle::tree::class::ClassName;
use shuttle::tree::field::{FieldAccess, FieldDescriptor, FieldName};
use shuttle::tree::method::{MethodAccess, MethodDescriptor, MethodName};
use weft::aspect::metadata::IndexTuple;
use weft::aspect::{AspectClass, AspectLibrary};
use weft::definition::{AspectDefinition, InMemoryDefinitionLoader, PointcutKind, SystemDefinition, WeaverOptions};
use weft::error::DefinitionError;
use weft::metadata::{ClassMetaData, FieldMetaData, MemberMetaData, MethodMetaData};
use weft::pattern::MatchTarget;
use weft::system::SystemRegistry;

struct Noop;

fn noop(name: &str) -> AspectClass {
	AspectClass::builder(name, || Noop)
		.before("first", |_, _| Ok(()))
		.before("second", |_, _| Ok(()))
		.build()
}

fn registry(definition: SystemDefinition) -> Arc<SystemRegistry> {
	let library = AspectLibrary::new()
		.with_aspect(noop("Noop"))
		.with_aspect(noop("Other"));
	SystemRegistry::new(Arc::new(InMemoryDefinitionLoader::new([definition])), Arc::new(library), WeaverOptions::default())
}

fn definition() -> SystemDefinition {
	SystemDefinition::new("sys")
		.aspect(AspectDefinition::new("a", "Noop")
			.pointcut("m", PointcutKind::Execution, "void test.C.m()")
			.bind_advice("m", &["second"]))
		.aspect(AspectDefinition::new("b", "Other")
			.pointcut("m", PointcutKind::Execution, "* test.C.*(..)")
			.pointcut("outer", PointcutKind::Call, "test.Main->void test.Main.outer()")
			.bind_advice("m && cflow(outer)", &["first"]))
}

fn method(name: &str, descriptor: &str) -> Result<MemberMetaData> {
	let method = MethodMetaData::new(MethodName::try_from(name)?, MethodDescriptor::try_from(descriptor)?, MethodAccess::default(), Vec::new())?;
	Ok(MemberMetaData::Method(method))
}

#[test]
fn systems_are_created_once() -> Result<()> {
	let registry = registry(definition());

	let handles: Vec<_> = (0..8)
		.map(|_| {
			let registry = registry.clone();
			std::thread::spawn(move || registry.get_system("sys"))
		})
		.collect();
	let mut systems = Vec::new();
	for handle in handles {
		systems.push(handle.join().map_err(|_| anyhow::anyhow!("thread panicked"))?);
	}

	assert_eq!(registry.created_count(), 1);
	assert!(systems.iter().all(|system| Arc::ptr_eq(system, &systems[0])));
	assert!(!systems[0].is_initialized());
	Ok(())
}

#[test]
fn aspects_are_indexed_in_definition_order() -> Result<()> {
	let registry = registry(definition());
	let system = registry.get_system("sys");

	// looking an aspect up initializes the system
	assert_eq!(system.get_aspect(1)?.name(), "a");
	assert!(system.is_initialized());
	assert_eq!(system.get_aspect(2)?.name(), "b");
	assert_eq!(system.get_aspect_by_name("b")?.index(), 2);

	assert_eq!(system.advice_index("a", "second")?, IndexTuple { aspect: 1, method: 1 });
	assert_eq!(system.advice_index("b", "first")?, IndexTuple { aspect: 2, method: 0 });

	let error = system.get_aspect(3).unwrap_err();
	assert!(matches!(error.downcast_ref::<DefinitionError>(), Some(DefinitionError::AspectNotFound(..))));
	let error = system.advice_index("a", "third").unwrap_err();
	assert!(matches!(error.downcast_ref::<DefinitionError>(), Some(DefinitionError::UnknownAdvice { .. })));
	Ok(())
}

#[test]
fn undefined_system() -> Result<()> {
	let registry = registry(definition());
	let system = registry.get_system("missing");

	let error = system.initialize().unwrap_err();
	assert!(matches!(error.downcast_ref::<DefinitionError>(), Some(DefinitionError::SystemNotDefined(uuid)) if uuid == "missing"));
	assert!(!system.is_initialized());
	Ok(())
}

#[test]
fn unknown_aspect_class() -> Result<()> {
	let registry = registry(SystemDefinition::new("sys").aspect(AspectDefinition::new("a", "Missing")));

	let error = registry.get_system("sys").initialize().unwrap_err();
	assert!(matches!(error.downcast_ref::<DefinitionError>(), Some(DefinitionError::UnknownAspectClass { .. })));
	Ok(())
}

#[test]
fn pointcuts_of_all_aspects() -> Result<()> {
	let registry = registry(definition());
	let system = registry.get_system("sys");
	let class = ClassMetaData::unresolved(&ClassName::try_from("test/C")?);

	let matched = system.execution_pointcuts(&class, &method("m", "()V")?)?;
	let aspects: Vec<_> = matched.iter().map(|m| m.aspect).collect();
	assert_eq!(aspects, vec![1, 2]);

	let matched = system.execution_pointcuts(&class, &method("other", "(I)I")?)?;
	let aspects: Vec<_> = matched.iter().map(|m| m.aspect).collect();
	assert_eq!(aspects, vec![2]);

	let main = ClassMetaData::unresolved(&ClassName::try_from("test/Main")?);
	assert!(system.is_cflow_source(&main, &main, &method("outer", "()V")?)?);
	assert!(!system.is_cflow_source(&class, &main, &method("outer", "()V")?)?);

	let member = method("m", "()V")?;
	let gates = system.cflow_pointcuts(PointcutKind::Execution, &MatchTarget::Member { class: &class, member: &member })?;
	let sources: Vec<_> = gates.iter().map(|gate| gate.source().to_owned()).collect();
	assert_eq!(sources, vec!["test.Main->void test.Main.outer()".to_owned()]);

	assert!(system.could_match_class(&class)?);
	assert!(!system.could_match_class(&ClassMetaData::unresolved(&ClassName::try_from("other/D")?))?);
	Ok(())
}

#[test]
fn field_writes_have_their_own_gates() -> Result<()> {
	let definition = SystemDefinition::new("sys")
		.aspect(AspectDefinition::new("a", "Noop")
			.pointcut("read", PointcutKind::Get, "int test.C.count")
			.pointcut("write", PointcutKind::Set, "int test.C.count")
			.pointcut("outer", PointcutKind::Call, "test.Main->void test.Main.outer()")
			.pointcut("inner", PointcutKind::Call, "test.Main->void test.Main.inner()")
			.bind_advice("read && cflow(inner)", &["first"])
			.bind_advice("write && cflow(outer)", &["second"]));
	let registry = registry(definition);
	let system = registry.get_system("sys");
	let class = ClassMetaData::unresolved(&ClassName::try_from("test/C")?);
	let count = FieldMetaData::new(FieldName::try_from("count")?, FieldDescriptor::try_from("I")?, FieldAccess::default())?;
	let member = MemberMetaData::Field(count);
	let target = MatchTarget::Member { class: &class, member: &member };

	let sources = |kind| -> Result<Vec<String>> {
		Ok(system.cflow_pointcuts(kind, &target)?.iter().map(|gate| gate.source().to_owned()).collect())
	};
	assert_eq!(sources(PointcutKind::Set)?, vec!["test.Main->void test.Main.outer()".to_owned()]);
	assert_eq!(sources(PointcutKind::Get)?, vec!["test.Main->void test.Main.inner()".to_owned()]);
	assert_eq!(sources(PointcutKind::Execution)?, Vec::<String>::new());
	Ok(())
}

#[test]
fn registering_after_initialization() -> Result<()> {
	let registry = registry(definition());
	let system = registry.get_system("sys");
	let class = ClassMetaData::unresolved(&ClassName::try_from("test/C")?);
	let member = method("m", "()V")?;
	assert_eq!(system.execution_pointcuts(&class, &member)?.len(), 2);

	let late = AspectDefinition::new("late", "Late")
		.pointcut("m", PointcutKind::Execution, "void test.C.m()")
		.bind_advice("m", &["first"]);
	let index = system.register(Arc::new(noop("Late")), &late)?;
	assert_eq!(index, 3);
	assert_eq!(system.aspects()?.len(), 3);
	// the cached lookups were dropped
	assert_eq!(system.execution_pointcuts(&class, &member)?.len(), 3);

	let error = system.register(Arc::new(noop("Late")), &late).unwrap_err();
	assert!(matches!(error.downcast_ref::<DefinitionError>(), Some(DefinitionError::DuplicateAspect(name)) if name == "late"));
	Ok(())
}
