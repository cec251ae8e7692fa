use anyhow::Result;
use crate::tree::class::{ClassAccess, ClassFile, ClassName};
use crate::tree::field::{Field, FieldAccess, FieldDescriptor, FieldName, FieldRef};
use crate::tree::method::code::{Code, Instruction, LvIndex};
use crate::tree::method::{Method, MethodAccess, MethodDescriptor, MethodName, MethodRef};
use crate::vm::error::{VmError, VmResult};
use crate::vm::value::Value;
use crate::vm::Runtime;

const WRAPPERS: [&str; 9] = [
	"java/lang/Number",
	"java/lang/Boolean",
	"java/lang/Character",
	"java/lang/Byte",
	"java/lang/Short",
	"java/lang/Integer",
	"java/lang/Long",
	"java/lang/Float",
	"java/lang/Double",
];

/// `(name, super class)` of the throwables every runtime knows.
const THROWABLES: [(&str, &str); 12] = [
	("java/lang/Exception", "java/lang/Throwable"),
	("java/lang/Error", "java/lang/Throwable"),
	("java/lang/RuntimeException", "java/lang/Exception"),
	("java/lang/ClassNotFoundException", "java/lang/Exception"),
	("java/lang/NullPointerException", "java/lang/RuntimeException"),
	("java/lang/ClassCastException", "java/lang/RuntimeException"),
	("java/lang/IllegalStateException", "java/lang/RuntimeException"),
	("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
	("java/lang/UnsupportedOperationException", "java/lang/RuntimeException"),
	("java/lang/ArrayIndexOutOfBoundsException", "java/lang/RuntimeException"),
	("java/lang/NegativeArraySizeException", "java/lang/RuntimeException"),
	("java/lang/reflect/UndeclaredThrowableException", "java/lang/RuntimeException"),
];

pub(super) fn is_wrapper(class: &ClassName) -> bool {
	WRAPPERS.contains(&class.as_str())
}

fn public() -> ClassAccess {
	ClassAccess { is_public: true, is_super: true, ..ClassAccess::default() }
}

fn name(s: &str) -> Result<ClassName> {
	ClassName::try_from(s)
}

fn method(access: MethodAccess, name: &str, descriptor: &str, code: Option<Code>) -> Result<Method> {
	let mut method = Method::new(access, MethodName::try_from(name)?, MethodDescriptor::try_from(descriptor)?);
	method.code = code;
	Ok(method)
}

fn public_method() -> MethodAccess {
	MethodAccess { is_public: true, ..MethodAccess::default() }
}

fn native_method(is_static: bool) -> MethodAccess {
	MethodAccess { is_public: true, is_native: true, is_static, ..MethodAccess::default() }
}

/// A constructor passing all of its arguments on to the constructor with the same descriptor of `super_class`.
fn delegating_constructor(super_class: &ClassName, descriptor: &str) -> Result<Method> {
	let descriptor = MethodDescriptor::try_from(descriptor)?;
	let count = descriptor.parse()?.parameters.len() as u16;

	let mut instructions: Vec<Instruction> = (0..=count).map(|i| Instruction::Load(LvIndex::new(i))).collect();
	instructions.push(Instruction::InvokeSpecial(MethodRef::new(super_class.clone(), MethodName::init(), descriptor.clone())));
	instructions.push(Instruction::Return);

	Ok(Method::new(public_method(), MethodName::init(), descriptor)
		.with_code(Code::from_instructions(count + 1, instructions)))
}

fn object() -> Result<ClassFile> {
	let mut class = ClassFile::new(public(), ClassName::java_lang_object(), None, Vec::new());
	class.add_method(method(public_method(), "<init>", "()V", Some(Code::from_instructions(1, [Instruction::Return])))?)?;
	Ok(class)
}

fn throwable() -> Result<ClassFile> {
	let this = name("java/lang/Throwable")?;
	let object = ClassName::java_lang_object();
	let message = FieldRef {
		class: this.clone(),
		name: FieldName::try_from("message")?,
		desc: FieldDescriptor::try_from("Ljava/lang/String;")?,
	};
	let cause = FieldRef {
		class: this.clone(),
		name: FieldName::try_from("cause")?,
		desc: FieldDescriptor::try_from("Ljava/lang/Throwable;")?,
	};

	let mut class = ClassFile::new(public(), this.clone(), Some(object.clone()), Vec::new());
	for field in [&message, &cause] {
		class.add_field(Field::new(FieldAccess { is_private: true, ..FieldAccess::default() }, field.name.clone(), field.desc.clone()))?;
	}

	let object_init = Instruction::InvokeSpecial(MethodRef::new(object, MethodName::init(), MethodDescriptor::try_from("()V")?));
	let constructors = [
		("()V", vec![]),
		("(Ljava/lang/String;)V", vec![(1, &message)]),
		("(Ljava/lang/Throwable;)V", vec![(1, &cause)]),
		("(Ljava/lang/String;Ljava/lang/Throwable;)V", vec![(1, &message), (2, &cause)]),
	];
	for (descriptor, stores) in constructors {
		let mut instructions = vec![Instruction::Load(LvIndex::new(0)), object_init.clone()];
		for (index, field) in stores {
			instructions.push(Instruction::Load(LvIndex::new(0)));
			instructions.push(Instruction::Load(LvIndex::new(index)));
			instructions.push(Instruction::PutField(field.clone()));
		}
		instructions.push(Instruction::Return);
		class.add_method(method(public_method(), "<init>", descriptor, Some(Code::from_instructions(3, instructions)))?)?;
	}

	for (getter, field) in [("getMessage", &message), ("getCause", &cause)] {
		let code = Code::from_instructions(1, [
			Instruction::Load(LvIndex::new(0)),
			Instruction::GetField(field.clone()),
			Instruction::ValueReturn,
		]);
		class.add_method(method(public_method(), getter, &format!("(){}", field.desc), Some(code))?)?;
	}
	Ok(class)
}

fn throwable_subclass(this: &str, super_class: &str) -> Result<ClassFile> {
	let this = name(this)?;
	let super_class = name(super_class)?;
	let mut class = ClassFile::new(public(), this, Some(super_class.clone()), Vec::new());
	for descriptor in ["()V", "(Ljava/lang/String;)V", "(Ljava/lang/Throwable;)V", "(Ljava/lang/String;Ljava/lang/Throwable;)V"] {
		class.add_method(delegating_constructor(&super_class, descriptor)?)?;
	}
	Ok(class)
}

fn class() -> Result<ClassFile> {
	let mut class = ClassFile::new(
		ClassAccess { is_final: true, ..public() },
		ClassName::java_lang_class(),
		Some(ClassName::java_lang_object()),
		Vec::new(),
	);
	class.add_method(method(native_method(true), "forName", "(Ljava/lang/String;)Ljava/lang/Class;", None)?)?;
	class.add_method(method(native_method(false), "getName", "()Ljava/lang/String;", None)?)?;
	Ok(class)
}

pub(super) fn classes() -> Result<Vec<ClassFile>> {
	let mut classes = vec![
		object()?,
		class()?,
		ClassFile::new(ClassAccess { is_final: true, ..public() }, ClassName::java_lang_string(), Some(ClassName::java_lang_object()), Vec::new()),
		throwable()?,
	];
	for wrapper in WRAPPERS {
		let super_class = if wrapper == "java/lang/Number" { "java/lang/Object" } else { "java/lang/Number" };
		classes.push(ClassFile::new(public(), name(wrapper)?, Some(name(super_class)?), Vec::new()));
	}
	for (this, super_class) in THROWABLES {
		classes.push(throwable_subclass(this, super_class)?);
	}
	Ok(classes)
}

pub(super) fn install_natives(runtime: &Runtime) -> Result<()> {
	let class = ClassName::java_lang_class();

	runtime.register_native(
		MethodRef::new(class.clone(), MethodName::try_from("forName")?, MethodDescriptor::try_from("(Ljava/lang/String;)Ljava/lang/Class;")?),
		|runtime: &Runtime, _: Option<Value>, args: Vec<Value>| -> VmResult<Value> {
			let Some(java_name) = args.first().and_then(Value::as_str) else {
				return Err(runtime.throw("java/lang/NullPointerException", Some("class name is null")));
			};
			let class_name = match ClassName::from_java_name(java_name) {
				Ok(class_name) => class_name,
				Err(_) => return Err(runtime.throw("java/lang/ClassNotFoundException", Some(java_name))),
			};
			match runtime.load_class(&class_name) {
				Ok(_) => {},
				Err(VmError::Internal(_)) => return Err(runtime.throw("java/lang/ClassNotFoundException", Some(java_name))),
				Err(e) => return Err(e),
			}
			runtime.ensure_initialized(&class_name)?;
			Ok(Value::Class(class_name))
		},
	);

	runtime.register_native(
		MethodRef::new(class, MethodName::try_from("getName")?, MethodDescriptor::try_from("()Ljava/lang/String;")?),
		|_: &Runtime, receiver: Option<Value>, _: Vec<Value>| -> VmResult<Value> {
			let name = receiver.as_ref().and_then(Value::as_class)
				.ok_or_else(|| anyhow::anyhow!("Class.getName invoked on something else than a class"))?;
			Ok(Value::from(name.java_name()))
		},
	);

	Ok(())
}
