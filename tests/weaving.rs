use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use anyhow::Result;
use pretty_assertions::assert_eq;
use shuttle::codec;
use shuttle::tree::class::{ClassAccess, ClassFile, ClassName};
use shuttle::tree::field::{Field, FieldAccess, FieldDescriptor, FieldName, FieldRef};
use shuttle::tree::method::code::{Code, Instruction, Loadable, LvIndex};
use shuttle::tree::method::{Method, MethodAccess, MethodDescriptor, MethodName, MethodRef};
use shuttle::vm::error::{VmError, VmResult};
use shuttle::vm::value::Value;
use shuttle::vm::{ClassFileTransformer, Runtime};
use weft::aspect::{AspectClass, AspectLibrary, MixinClass};
use weft::definition::{AspectDefinition, DeploymentModel, InMemoryDefinitionLoader, IntroductionDefinition, PointcutKind, SystemDefinition, WeaverOptions};
use weft::joinpoint::JoinPoint;
use weft::metadata::ClassMetaData;
use weft::system::SystemRegistry;
use weft::transform::attributes::WrapperMarker;
use weft::transform::WeavingPipeline;

fn class(name: &str) -> Result<ClassFile> {
	Ok(ClassFile::new(ClassAccess { is_public: true, ..ClassAccess::default() }, ClassName::try_from(name)?, Some(ClassName::java_lang_object()), Vec::new()))
}

fn method(is_static: bool, name: &str, descriptor: &str, max_locals: u16, instructions: Vec<Instruction>) -> Result<Method> {
	let access = MethodAccess { is_public: true, is_static, ..MethodAccess::default() };
	Ok(Method::new(access, MethodName::try_from(name)?, MethodDescriptor::try_from(descriptor)?)
		.with_code(Code::from_instructions(max_locals, instructions)))
}

fn method_ref(class: &str, name: &str, descriptor: &str) -> Result<MethodRef> {
	Ok(MethodRef::new(ClassName::try_from(class)?, MethodName::try_from(name)?, MethodDescriptor::try_from(descriptor)?))
}

fn count_field() -> Result<FieldRef> {
	Ok(FieldRef { class: ClassName::try_from("test/C")?, name: FieldName::try_from("count")?, desc: FieldDescriptor::try_from("I")? })
}

fn constructor(super_class: &str) -> Result<Method> {
	method(false, "<init>", "()V", 1, vec![
		Instruction::Load(LvIndex::new(0)),
		Instruction::InvokeSpecial(method_ref(super_class, "<init>", "()V")?),
		Instruction::Return,
	])
}

/// ```java
/// public class C {
///     public int count;
///     public C() { super(); }
///     public int m() { return 42; }
///     public static int twice(int x) { return x + x; }
///     public void inc() { this.count = this.count + 1; }
///     public static void fail() { throw new IllegalStateException(); }
/// }
/// ```
fn test_c() -> Result<ClassFile> {
	let mut c = class("test/C")?;
	c.add_field(Field::new(FieldAccess { is_public: true, ..FieldAccess::default() }, FieldName::try_from("count")?, FieldDescriptor::try_from("I")?))?;
	c.add_method(constructor("java/lang/Object")?)?;
	c.add_method(method(false, "m", "()I", 1, vec![
		Instruction::Ldc(Loadable::Integer(42)),
		Instruction::ValueReturn,
	])?)?;
	c.add_method(method(true, "twice", "(I)I", 1, vec![
		Instruction::Load(LvIndex::new(0)),
		Instruction::Load(LvIndex::new(0)),
		Instruction::IAdd,
		Instruction::ValueReturn,
	])?)?;
	c.add_method(method(false, "inc", "()V", 1, vec![
		Instruction::Load(LvIndex::new(0)),
		Instruction::Load(LvIndex::new(0)),
		Instruction::GetField(count_field()?),
		Instruction::Ldc(Loadable::Integer(1)),
		Instruction::IAdd,
		Instruction::PutField(count_field()?),
		Instruction::Return,
	])?)?;
	c.add_method(method(true, "fail", "()V", 0, vec![
		Instruction::New(ClassName::try_from("java/lang/IllegalStateException")?),
		Instruction::Dup,
		Instruction::InvokeSpecial(method_ref("java/lang/IllegalStateException", "<init>", "()V")?),
		Instruction::AThrow,
	])?)?;
	Ok(c)
}

/// ```java
/// public class Main {
///     public static int direct() { return new C().m(); }
///     public static int outer() { return new C().m(); }
///     public static int indirect() { return outer(); }
///     public static int bump() { C c = new C(); c.inc(); c.inc(); return c.count; }
/// }
/// ```
fn test_main() -> Result<ClassFile> {
	let new_c_m = || -> Result<Vec<Instruction>> {
		Ok(vec![
			Instruction::New(ClassName::try_from("test/C")?),
			Instruction::Dup,
			Instruction::InvokeSpecial(method_ref("test/C", "<init>", "()V")?),
			Instruction::InvokeVirtual(method_ref("test/C", "m", "()I")?),
			Instruction::ValueReturn,
		])
	};
	let mut main = class("test/Main")?;
	main.add_method(constructor("java/lang/Object")?)?;
	main.add_method(method(true, "direct", "()I", 0, new_c_m()?)?)?;
	main.add_method(method(true, "outer", "()I", 0, new_c_m()?)?)?;
	main.add_method(method(true, "indirect", "()I", 0, vec![
		Instruction::InvokeStatic(method_ref("test/Main", "outer", "()I")?),
		Instruction::ValueReturn,
	])?)?;
	main.add_method(method(true, "bump", "()I", 1, vec![
		Instruction::New(ClassName::try_from("test/C")?),
		Instruction::Dup,
		Instruction::InvokeSpecial(method_ref("test/C", "<init>", "()V")?),
		Instruction::Store(LvIndex::new(0)),
		Instruction::Load(LvIndex::new(0)),
		Instruction::InvokeVirtual(method_ref("test/C", "inc", "()V")?),
		Instruction::Load(LvIndex::new(0)),
		Instruction::InvokeVirtual(method_ref("test/C", "inc", "()V")?),
		Instruction::Load(LvIndex::new(0)),
		Instruction::GetField(count_field()?),
		Instruction::ValueReturn,
	])?)?;
	Ok(main)
}

struct Counter {
	hits: Arc<AtomicUsize>,
}

fn counter(name: &str, hits: &Arc<AtomicUsize>) -> AspectClass {
	let hits = hits.clone();
	AspectClass::builder(name, move || Counter { hits: hits.clone() })
		.before("count", |counter: &Counter, _: &JoinPoint<'_>| -> VmResult<()> {
			counter.hits.fetch_add(1, Ordering::SeqCst);
			Ok(())
		})
		.around("double", |_: &Counter, join_point: &mut JoinPoint<'_>| -> VmResult<Value> {
			Ok(match join_point.proceed()? {
				Value::Int(i) => Value::Int(i * 2),
				other => other,
			})
		})
		.throws("caught", |counter: &Counter, _: &JoinPoint<'_>, _: &Value| -> VmResult<()> {
			counter.hits.fetch_add(1, Ordering::SeqCst);
			Ok(())
		})
		.build()
}

fn registry(definitions: Vec<SystemDefinition>, library: AspectLibrary) -> Arc<SystemRegistry> {
	SystemRegistry::new(Arc::new(InMemoryDefinitionLoader::new(definitions)), Arc::new(library), WeaverOptions::default())
}

/// A runtime weaving for the systems, with the test classes on its class path.
fn runtime(registry: &Arc<SystemRegistry>, uuids: &[&str]) -> Result<Runtime> {
	let runtime = Runtime::new()?;
	runtime.add_class(&test_c()?)?;
	runtime.add_class(&test_main()?)?;
	weft::runtime::install(&runtime, registry, uuids)?;
	Ok(runtime)
}

fn invoke(runtime: &Runtime, class: &str, name: &str, descriptor: &str, args: Vec<Value>) -> VmResult<Value> {
	runtime.invoke_static(&ClassName::try_from(class)?, &MethodName::try_from(name)?, &MethodDescriptor::try_from(descriptor)?, args)
}

fn counting(pointcut_kind: PointcutKind, pattern: &str, advice: &str) -> SystemDefinition {
	SystemDefinition::new("sys")
		.include("test.")
		.aspect(AspectDefinition::new("counting", "Counter")
			.pointcut("advised", pointcut_kind, pattern)
			.bind_advice("advised", &[advice]))
}

#[test]
fn execution_advice() -> Result<()> {
	let hits = Arc::new(AtomicUsize::new(0));
	let registry = registry(
		vec![counting(PointcutKind::Execution, "int test.C.m()", "count")],
		AspectLibrary::new().with_aspect(counter("Counter", &hits)),
	);
	let runtime = runtime(&registry, &["sys"])?;

	assert_eq!(invoke(&runtime, "test/Main", "direct", "()I", Vec::new())?, Value::Int(42));
	assert_eq!(hits.load(Ordering::SeqCst), 1);
	assert_eq!(invoke(&runtime, "test/Main", "direct", "()I", Vec::new())?, Value::Int(42));
	assert_eq!(hits.load(Ordering::SeqCst), 2);
	Ok(())
}

#[test]
fn around_advice_sees_arguments_and_result() -> Result<()> {
	let hits = Arc::new(AtomicUsize::new(0));
	let registry = registry(
		vec![counting(PointcutKind::Execution, "int test.C.twice(int)", "double")],
		AspectLibrary::new().with_aspect(counter("Counter", &hits)),
	);
	let runtime = runtime(&registry, &["sys"])?;

	assert_eq!(invoke(&runtime, "test/C", "twice", "(I)I", vec![Value::Int(5)])?, Value::Int(20));
	Ok(())
}

#[test]
fn constructor_execution() -> Result<()> {
	let hits = Arc::new(AtomicUsize::new(0));
	let registry = registry(
		vec![counting(PointcutKind::Execution, "test.C.new()", "count")],
		AspectLibrary::new().with_aspect(counter("Counter", &hits)),
	);
	let runtime = runtime(&registry, &["sys"])?;

	assert_eq!(invoke(&runtime, "test/Main", "direct", "()I", Vec::new())?, Value::Int(42));
	assert_eq!(hits.load(Ordering::SeqCst), 1);
	Ok(())
}

#[test]
fn call_advice() -> Result<()> {
	let hits = Arc::new(AtomicUsize::new(0));
	let definition = SystemDefinition::new("sys")
		.include("test.")
		.aspect(AspectDefinition::new("counting", "Counter")
			.pointcut("callM", PointcutKind::Call, "test.Main->int test.C.m()")
			.pointcut("newC", PointcutKind::Call, "test.Main->test.C.new()")
			.bind_advice("callM || newC", &["count"]));
	let registry = registry(vec![definition], AspectLibrary::new().with_aspect(counter("Counter", &hits)));
	let runtime = runtime(&registry, &["sys"])?;

	assert_eq!(invoke(&runtime, "test/Main", "direct", "()I", Vec::new())?, Value::Int(42));
	assert_eq!(hits.load(Ordering::SeqCst), 2);
	Ok(())
}

#[test]
fn field_advice() -> Result<()> {
	let hits = Arc::new(AtomicUsize::new(0));
	let definition = SystemDefinition::new("sys")
		.include("test.")
		.aspect(AspectDefinition::new("counting", "Counter")
			.pointcut("read", PointcutKind::Get, "int test.C.count")
			.pointcut("write", PointcutKind::Set, "int test.C.count")
			.bind_advice("read", &["count"])
			.bind_advice("write", &["count"]));
	let registry = registry(vec![definition], AspectLibrary::new().with_aspect(counter("Counter", &hits)));

	// the read and the write in test.C.inc
	let pipeline = WeavingPipeline::new(registry.clone(), vec!["sys".to_owned()]);
	let woven = pipeline.weave(&ClassName::try_from("test/C")?, &codec::write_class(&test_c()?)?, &Runtime::new()?)?;
	assert_eq!(woven.map(|(_, stats)| stats.fields), Some(2));

	let runtime = runtime(&registry, &["sys"])?;

	// only the accesses inside test.C are woven, since nothing matches test.Main
	assert_eq!(invoke(&runtime, "test/Main", "bump", "()I", Vec::new())?, Value::Int(2));
	assert_eq!(hits.load(Ordering::SeqCst), 4);
	Ok(())
}

#[test]
fn throws_advice() -> Result<()> {
	let hits = Arc::new(AtomicUsize::new(0));
	let registry = registry(
		vec![counting(PointcutKind::Throws, "void test.C.fail()#java.lang.IllegalStateException", "caught")],
		AspectLibrary::new().with_aspect(counter("Counter", &hits)),
	);
	let runtime = runtime(&registry, &["sys"])?;

	let exception = match invoke(&runtime, "test/C", "fail", "()V", Vec::new()) {
		Err(VmError::Thrown(exception)) => exception,
		other => anyhow::bail!("expected an exception, got {other:?}"),
	};
	assert_eq!(runtime.class_of(&exception), Some(ClassName::try_from("java/lang/IllegalStateException")?));
	assert_eq!(hits.load(Ordering::SeqCst), 1);
	Ok(())
}

#[test]
fn cflow_gates_advice() -> Result<()> {
	let hits = Arc::new(AtomicUsize::new(0));
	let definition = SystemDefinition::new("sys")
		.include("test.")
		.aspect(AspectDefinition::new("counting", "Counter")
			.pointcut("m", PointcutKind::Execution, "int test.C.m()")
			.pointcut("outer", PointcutKind::Call, "test.Main->int test.Main.outer()")
			.bind_advice("m && cflow(outer)", &["count"]));
	let registry = registry(vec![definition], AspectLibrary::new().with_aspect(counter("Counter", &hits)));
	let runtime = runtime(&registry, &["sys"])?;

	assert_eq!(invoke(&runtime, "test/Main", "direct", "()I", Vec::new())?, Value::Int(42));
	assert_eq!(hits.load(Ordering::SeqCst), 0);
	assert_eq!(invoke(&runtime, "test/Main", "indirect", "()I", Vec::new())?, Value::Int(42));
	assert_eq!(hits.load(Ordering::SeqCst), 1);
	// the flow is left again
	assert_eq!(invoke(&runtime, "test/Main", "direct", "()I", Vec::new())?, Value::Int(42));
	assert_eq!(hits.load(Ordering::SeqCst), 1);
	Ok(())
}

#[test]
fn two_systems() -> Result<()> {
	let first = Arc::new(AtomicUsize::new(0));
	let second = Arc::new(AtomicUsize::new(0));
	let definition = |uuid: &str, class: &str| SystemDefinition::new(uuid)
		.aspect(AspectDefinition::new("counting", class)
			.pointcut("m", PointcutKind::Execution, "int test.C.m()")
			.bind_advice("m", &["count"]));
	let registry = registry(
		vec![definition("first", "First"), definition("second", "Second")],
		AspectLibrary::new()
			.with_aspect(counter("First", &first))
			.with_aspect(counter("Second", &second)),
	);
	let runtime = runtime(&registry, &["first", "second"])?;

	assert_eq!(invoke(&runtime, "test/Main", "direct", "()I", Vec::new())?, Value::Int(42));
	assert_eq!(first.load(Ordering::SeqCst), 1);
	assert_eq!(second.load(Ordering::SeqCst), 1);
	Ok(())
}

#[test]
fn weaving_twice_changes_nothing() -> Result<()> {
	let hits = Arc::new(AtomicUsize::new(0));
	let registry = registry(
		vec![counting(PointcutKind::Execution, "int test.C.m()", "count")],
		AspectLibrary::new().with_aspect(counter("Counter", &hits)),
	);
	let context = Runtime::new()?;
	let pipeline = WeavingPipeline::new(registry.clone(), vec!["sys".to_owned()]);
	let name = ClassName::try_from("test/C")?;

	let bytes = codec::write_class(&test_c()?)?;
	let Some((woven, stats)) = pipeline.weave(&name, &bytes, &context)? else {
		anyhow::bail!("nothing woven");
	};
	assert_eq!(stats.executions, 1);
	assert_eq!(pipeline.weave(&name, &woven, &context)?, None);
	assert_eq!(pipeline.pre_process(&name, &woven, &context), woven);

	// a runtime weaving on its own as well
	let runtime = runtime(&registry, &["sys"])?;
	runtime.add_class_bytes(name.clone(), woven);
	assert_eq!(invoke(&runtime, "test/Main", "direct", "()I", Vec::new())?, Value::Int(42));
	assert_eq!(hits.load(Ordering::SeqCst), 1);
	Ok(())
}

#[test]
fn wrappers_follow_the_advice() -> Result<()> {
	let hits = Arc::new(AtomicUsize::new(0));
	let library = || AspectLibrary::new().with_aspect(counter("Counter", &hits));
	let name = ClassName::try_from("test/C")?;
	let m = (MethodName::try_from("m")?, MethodDescriptor::try_from("()I")?);

	let advised = registry(vec![counting(PointcutKind::Execution, "int test.C.m()", "count")], library());
	let context = Runtime::new()?;
	let Some((woven, _)) = WeavingPipeline::new(advised, vec!["sys".to_owned()]).weave(&name, &codec::write_class(&test_c()?)?, &context)? else {
		anyhow::bail!("nothing woven");
	};

	// still matching the class, but not m anymore
	let unadvised = registry(vec![counting(PointcutKind::Execution, "int test.C.twice(int)", "count")], library());
	let pipeline = WeavingPipeline::new(unadvised.clone(), vec!["sys".to_owned()]);
	let Some((emptied, _)) = pipeline.weave(&name, &woven, &context)? else {
		anyhow::bail!("wrapper not emptied");
	};
	let class = codec::read_class(&emptied)?;
	let wrapper = class.method(&m.0, &m.1).ok_or_else(|| anyhow::anyhow!("no wrapper"))?;
	assert_eq!(WrapperMarker::read(wrapper)?.map(|marker| marker.empty), Some(true));

	let runtime = Runtime::new()?;
	weft::runtime::install_natives(&runtime, &unadvised)?;
	runtime.add_class_bytes(name.clone(), emptied.clone());
	runtime.add_class(&test_main()?)?;
	assert_eq!(invoke(&runtime, "test/Main", "direct", "()I", Vec::new())?, Value::Int(42));
	assert_eq!(hits.load(Ordering::SeqCst), 0);

	// and back
	let advised = registry(vec![counting(PointcutKind::Execution, "int test.C.m()", "count")], library());
	let Some((restored, _)) = WeavingPipeline::new(advised, vec!["sys".to_owned()]).weave(&name, &emptied, &context)? else {
		anyhow::bail!("wrapper not restored");
	};
	let class = codec::read_class(&restored)?;
	let wrapper = class.method(&m.0, &m.1).ok_or_else(|| anyhow::anyhow!("no wrapper"))?;
	assert_eq!(WrapperMarker::read(wrapper)?.map(|marker| marker.empty), Some(false));
	Ok(())
}

#[test]
fn introductions() -> Result<()> {
	let hits = Arc::new(AtomicUsize::new(0));
	let definition = SystemDefinition::new("sys")
		.introduction(IntroductionDefinition::new("named", "test.Named").implementation("NamedImpl", DeploymentModel::PerInstance))
		.aspect(AspectDefinition::new("naming", "Counter")
			.pointcut("c", PointcutKind::Class, "test.C")
			.bind_introduction("c", &["named"]));
	let mixin = MixinClass::builder("NamedImpl", || ())
		.method("name", "()Ljava/lang/String;", |_: &(), _: &Runtime, _: &Value, _: Vec<Value>| -> VmResult<Value> {
			Ok(Value::Str(Arc::from("mixed")))
		})
		.build()?;
	let registry = registry(vec![definition], AspectLibrary::new().with_aspect(counter("Counter", &hits)).with_mixin(mixin));
	let system = registry.get_system("sys");
	assert!(system.has_class_pointcuts(&ClassMetaData::unresolved(&ClassName::try_from("test/C")?))?);
	assert!(!system.has_class_pointcuts(&ClassMetaData::unresolved(&ClassName::try_from("test/Main")?))?);
	let runtime = runtime(&registry, &["sys"])?;

	let mut named = ClassFile::new(
		ClassAccess { is_public: true, is_interface: true, is_abstract: true, ..ClassAccess::default() },
		ClassName::try_from("test/Named")?,
		Some(ClassName::java_lang_object()),
		Vec::new(),
	);
	named.add_method(Method::new(
		MethodAccess { is_public: true, is_abstract: true, ..MethodAccess::default() },
		MethodName::try_from("name")?,
		MethodDescriptor::try_from("()Ljava/lang/String;")?,
	))?;
	runtime.add_class(&named)?;

	let c = ClassName::try_from("test/C")?;
	let loaded = runtime.load_class(&c)?;
	assert!(loaded.file().interfaces.contains(&ClassName::try_from("test/Named")?));
	assert!(runtime.load_class(&ClassName::try_from("test/Main")?)?.file().interfaces.is_empty());

	let object = runtime.new_object(&c, &MethodDescriptor::try_from("()V")?, Vec::new())?;
	let name = runtime.invoke_virtual(object, &MethodName::try_from("name")?, &MethodDescriptor::try_from("()Ljava/lang/String;")?, Vec::new())?;
	assert_eq!(name, Value::Str(Arc::from("mixed")));
	Ok(())
}

#[test]
fn prepared_classes() -> Result<()> {
	let registry = registry(vec![SystemDefinition::new("sys").prepare("test.")], AspectLibrary::new());
	let context = Runtime::new()?;
	let pipeline = WeavingPipeline::new(registry, vec!["sys".to_owned()]);

	let Some((prepared, stats)) = pipeline.weave(&ClassName::try_from("test/Main")?, &codec::write_class(&test_main()?)?, &context)? else {
		anyhow::bail!("class not prepared");
	};
	assert_eq!(stats.woven(), 0);
	let class = codec::read_class(&prepared)?;
	assert!(class.field(&FieldName::try_from("__weft$jpm$sys")?).is_some());
	assert!(class.has_method(&MethodName::clinit(), &MethodDescriptor::try_from("()V")?));
	Ok(())
}

#[test]
fn failed_weaving_leaves_class_unchanged() -> Result<()> {
	let hits = Arc::new(AtomicUsize::new(0));
	let registry = registry(
		vec![counting(PointcutKind::Execution, "test.Odd.new(int)", "count")],
		AspectLibrary::new().with_aspect(counter("Counter", &hits)),
	);

	// public Odd(int x) { int y = x; super(); this.x = y; }, which java wouldn't allow
	let mut odd = class("test/Odd")?;
	let x = FieldRef { class: odd.name.clone(), name: FieldName::try_from("x")?, desc: FieldDescriptor::try_from("I")? };
	odd.add_field(Field::new(FieldAccess::default(), x.name.clone(), x.desc.clone()))?;
	odd.add_method(method(false, "<init>", "(I)V", 3, vec![
		Instruction::Load(LvIndex::new(1)),
		Instruction::Store(LvIndex::new(2)),
		Instruction::Load(LvIndex::new(0)),
		Instruction::InvokeSpecial(method_ref("java/lang/Object", "<init>", "()V")?),
		Instruction::Load(LvIndex::new(0)),
		Instruction::Load(LvIndex::new(2)),
		Instruction::PutField(x),
		Instruction::Return,
	])?)?;

	let runtime = runtime(&registry, &["sys"])?;
	let bytes = codec::write_class(&odd)?;
	let pipeline = WeavingPipeline::new(registry.clone(), vec!["sys".to_owned()]);
	assert!(pipeline.weave(&odd.name, &bytes, &runtime).is_err());
	assert_eq!(pipeline.pre_process(&odd.name, &bytes, &runtime), bytes);

	runtime.add_class(&odd)?;
	let object = runtime.new_object(&odd.name, &MethodDescriptor::try_from("(I)V")?, vec![Value::Int(7)])?;
	assert_eq!(runtime.get_field(&object, &FieldName::try_from("x")?)?, Value::Int(7));
	assert_eq!(hits.load(Ordering::SeqCst), 0);
	Ok(())
}
