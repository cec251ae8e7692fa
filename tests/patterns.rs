use pretty_assertions::assert_eq;
use anyhow::Result;
use shuttle::tree::class::ClassName;
use shuttle::tree::field::{FieldAccess, FieldDescriptor, FieldName};
use shuttle::tree::method::{MethodAccess, MethodDescriptor, MethodName};
use weft::definition::PointcutKind;
use weft::metadata::{ClassMetaData, FieldMetaData, MemberMetaData, MethodMetaData};
use weft::pattern::{MatchTarget, Pattern, PointcutPatternTuple};

fn class(name: &str) -> Result<ClassMetaData> {
	Ok(ClassMetaData::unresolved(&ClassName::try_from(name)?))
}

fn method(name: &str, descriptor: &str) -> Result<MemberMetaData> {
	let method = MethodMetaData::new(MethodName::try_from(name)?, MethodDescriptor::try_from(descriptor)?, MethodAccess::default(), Vec::new())?;
	Ok(MemberMetaData::Method(method))
}

fn field(name: &str, descriptor: &str) -> Result<MemberMetaData> {
	let field = FieldMetaData::new(FieldName::try_from(name)?, FieldDescriptor::try_from(descriptor)?, FieldAccess::default())?;
	Ok(MemberMetaData::Field(field))
}

fn matches(pattern: &Pattern, class: &ClassMetaData, member: &MemberMetaData) -> bool {
	pattern.matches(&MatchTarget::Member { class, member })
}

#[test]
fn methods() -> Result<()> {
	let c = class("test/C")?;
	let d = class("test/sub/D")?;

	let pattern = Pattern::compile_method("int test.C.m()")?;
	assert!(matches(&pattern, &c, &method("m", "()I")?));
	assert!(!matches(&pattern, &c, &method("m", "()V")?));
	assert!(!matches(&pattern, &c, &method("m", "(I)I")?));
	assert!(!matches(&pattern, &d, &method("m", "()I")?));

	let pattern = Pattern::compile_method("* test..*.get*(..)")?;
	assert!(matches(&pattern, &c, &method("getName", "()Ljava/lang/String;")?));
	assert!(matches(&pattern, &d, &method("getAt", "(IJ)V")?));
	assert!(!matches(&pattern, &d, &method("setAt", "(IJ)V")?));

	let pattern = Pattern::compile_method("void test.C.m(String, *)")?;
	assert!(matches(&pattern, &c, &method("m", "(Ljava/lang/String;[I)V")?));
	assert!(!matches(&pattern, &c, &method("m", "(Ljava/lang/String;)V")?));

	// a method pattern doesn't match fields, nor constructors
	assert!(!matches(&pattern, &c, &field("m", "I")?));
	assert!(!matches(&Pattern::compile_method("* test.C.*(..)")?, &c, &method("<init>", "()V")?));
	Ok(())
}

#[test]
fn constructors_and_fields() -> Result<()> {
	let c = class("test/C")?;

	let pattern = Pattern::compile_constructor("test.C.new(..)")?;
	assert!(matches(&pattern, &c, &method("<init>", "()V")?));
	assert!(matches(&pattern, &c, &method("<init>", "(I)V")?));
	assert!(!matches(&pattern, &c, &method("m", "()V")?));

	let pattern = Pattern::compile_field("int test.C.count")?;
	assert!(matches(&pattern, &c, &field("count", "I")?));
	assert!(!matches(&pattern, &c, &field("count", "J")?));
	assert!(!matches(&pattern, &c, &method("count", "()I")?));

	let pattern = Pattern::compile_field("* test.*.*")?;
	assert!(matches(&pattern, &c, &field("names", "[Ljava/lang/String;")?));
	Ok(())
}

#[test]
fn call_sites() -> Result<()> {
	let main = class("test/Main")?;
	let other = class("other/Main")?;
	let c = class("test/C")?;
	let m = method("m", "()I")?;

	let pattern = Pattern::compile_caller_side("test.*->int test.C.m()")?;
	assert!(pattern.matches(&MatchTarget::Call { caller: &main, class: &c, member: &m }));
	assert!(!pattern.matches(&MatchTarget::Call { caller: &other, class: &c, member: &m }));
	// the call target is the callee, execution targets never match
	assert!(!pattern.matches(&MatchTarget::Member { class: &c, member: &m }));

	assert!(pattern.could_match(&main));
	assert!(!pattern.could_match(&other));

	let pattern = Pattern::compile_caller_side("test.C#int m()")?;
	assert!(pattern.matches(&MatchTarget::Call { caller: &other, class: &c, member: &m }));
	Ok(())
}

#[test]
fn throws() -> Result<()> {
	let c = class("test/C")?;
	let fail = method("fail", "()V")?;
	let illegal = class("java/lang/IllegalStateException")?;
	let io = class("java/io/IOException")?;

	let pattern = Pattern::compile_throws("void test.C.fail()#java.lang.*Exception")?;
	let target = MatchTarget::Member { class: &c, member: &fail };
	// before the exception is known, only the method is matched
	assert!(pattern.matches(&target.with_exception(None)));
	assert!(pattern.matches(&target.with_exception(Some(&illegal))));
	assert!(!pattern.matches(&target.with_exception(Some(&io))));
	assert!(!pattern.matches(&target));
	Ok(())
}

#[test]
fn tuples() -> Result<()> {
	let first = PointcutPatternTuple::parse(PointcutKind::Execution, " int test.C.m() ")?;
	let second = PointcutPatternTuple::parse(PointcutKind::Execution, "int test.C.m()")?;
	let call = PointcutPatternTuple::parse(PointcutKind::Call, "int test.C.m()")?;
	assert_eq!(first, second);
	assert_ne!(first, call);
	assert_eq!(first.source(), "int test.C.m()");

	// execution tuples pick constructor patterns by the name
	let constructor = PointcutPatternTuple::parse(PointcutKind::Execution, "test.C.new()")?;
	assert!(matches!(constructor.pattern(), Pattern::Constructor(_)));

	assert!(PointcutPatternTuple::parse(PointcutKind::Get, "int test.C.count(").is_err());
	assert!(PointcutPatternTuple::parse(PointcutKind::Throws, "void test.C.fail()").is_err());
	Ok(())
}
