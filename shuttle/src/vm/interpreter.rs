use anyhow::anyhow;
use crate::tree::descriptor::Type;
use crate::tree::method::code::{Instruction, Label, LvIndex};
use crate::vm::error::{VmError, VmResult};
use crate::vm::value::Value;
use crate::vm::{PreparedMethod, Runtime};

struct Frame<'a> {
	method: &'a PreparedMethod,
	locals: Vec<Value>,
	stack: Vec<Value>,
}

impl<'a> Frame<'a> {
	fn new(method: &'a PreparedMethod, max_locals: u16, receiver: Option<Value>, args: Vec<Value>) -> Frame<'a> {
		let mut locals: Vec<Value> = receiver.into_iter().chain(args).collect();
		if locals.len() < max_locals as usize {
			locals.resize(max_locals as usize, Value::Null);
		}
		Frame { method, locals, stack: Vec::new() }
	}

	fn push(&mut self, value: Value) {
		self.stack.push(value);
	}

	fn pop(&mut self) -> VmResult<Value> {
		self.stack.pop()
			.ok_or_else(|| anyhow!("operand stack underflow in {}", self.method).into())
	}

	fn pop_int(&mut self) -> VmResult<i32> {
		match self.pop()? {
			Value::Int(i) => Ok(i),
			other => Err(anyhow!("expected an int on the operand stack in {}, got {other:?}", self.method).into()),
		}
	}

	fn peek(&self) -> VmResult<&Value> {
		self.stack.last()
			.ok_or_else(|| anyhow!("operand stack underflow in {}", self.method).into())
	}

	/// Pops `count` values, returning them in the order they were pushed.
	fn pop_n(&mut self, count: usize) -> VmResult<Vec<Value>> {
		if self.stack.len() < count {
			return Err(anyhow!("operand stack underflow in {}", self.method).into());
		}
		Ok(self.stack.split_off(self.stack.len() - count))
	}

	fn load(&self, index: LvIndex) -> VmResult<Value> {
		self.locals.get(index.index as usize).cloned()
			.ok_or_else(|| anyhow!("local variable {} out of range in {}", index.index, self.method).into())
	}

	fn store(&mut self, index: LvIndex, value: Value) {
		let index = index.index as usize;
		if index >= self.locals.len() {
			self.locals.resize(index + 1, Value::Null);
		}
		self.locals[index] = value;
	}

	fn jump(&self, label: Label) -> VmResult<usize> {
		self.method.labels.get(&label).copied()
			.ok_or_else(|| anyhow!("jump to unknown label {label:?} in {}", self.method).into())
	}
}

fn unbox(runtime: &Runtime, value: Value, t: &Type) -> VmResult<Value> {
	let matches = match (&value, t) {
		(Value::Null, _) => return Err(runtime.throw("java/lang/NullPointerException", Some(&format!("cannot unbox null to {}", t.java_name())))),
		(Value::Int(_), Type::B | Type::C | Type::I | Type::S | Type::Z) => true,
		(Value::Long(_), Type::J) => true,
		(Value::Float(_), Type::F) => true,
		(Value::Double(_), Type::D) => true,
		(_, Type::Object(_) | Type::Array(..)) => {
			return Err(anyhow!("cannot unbox to the reference type {}", t.java_name()).into());
		},
		_ => false,
	};
	if matches {
		Ok(value)
	} else {
		Err(runtime.throw("java/lang/ClassCastException", Some(&format!("{value:?} cannot be unboxed to {}", t.java_name()))))
	}
}

fn array_index(runtime: &Runtime, index: i32, length: usize) -> VmResult<usize> {
	usize::try_from(index).ok()
		.filter(|i| *i < length)
		.ok_or_else(|| runtime.throw("java/lang/ArrayIndexOutOfBoundsException", Some(&format!("index {index} out of bounds for length {length}"))))
}

pub(super) fn execute(runtime: &Runtime, method: &PreparedMethod, receiver: Option<Value>, args: Vec<Value>) -> VmResult<Value> {
	let code = method.method.code.as_ref()
		.ok_or_else(|| anyhow!("method {method} has no code"))?;

	let mut frame = Frame::new(method, code.max_locals, receiver, args);
	let mut pc = 0;

	loop {
		let entry = code.instructions.get(pc)
			.ok_or_else(|| anyhow!("execution of {method} ran past the last instruction"))?;
		pc += 1;

		match &entry.instruction {
			Instruction::Nop => {},
			Instruction::AConstNull => frame.push(Value::Null),
			Instruction::Ldc(loadable) => frame.push(Value::from_loadable(loadable)),
			Instruction::Load(index) => {
				let value = frame.load(*index)?;
				frame.push(value);
			},
			Instruction::Store(index) => {
				let value = frame.pop()?;
				frame.store(*index, value);
			},
			Instruction::Pop => {
				frame.pop()?;
			},
			Instruction::Dup => {
				let value = frame.peek()?.clone();
				frame.push(value);
			},
			Instruction::Swap => {
				let a = frame.pop()?;
				let b = frame.pop()?;
				frame.push(a);
				frame.push(b);
			},
			Instruction::IAdd => {
				let b = frame.pop_int()?;
				let a = frame.pop_int()?;
				frame.push(Value::Int(a.wrapping_add(b)));
			},
			Instruction::ISub => {
				let b = frame.pop_int()?;
				let a = frame.pop_int()?;
				frame.push(Value::Int(a.wrapping_sub(b)));
			},
			Instruction::IMul => {
				let b = frame.pop_int()?;
				let a = frame.pop_int()?;
				frame.push(Value::Int(a.wrapping_mul(b)));
			},
			Instruction::IInc(index, delta) => {
				let value = frame.load(*index)?.as_int()
					.ok_or_else(|| anyhow!("iinc on a non-int local in {method}"))?;
				frame.store(*index, Value::Int(value.wrapping_add(i32::from(*delta))));
			},
			Instruction::ANewArray(component) => {
				let count = frame.pop_int()?;
				let Ok(count) = usize::try_from(count) else {
					return Err(runtime.throw("java/lang/NegativeArraySizeException", Some(&count.to_string())));
				};
				frame.push(runtime.new_array(component, vec![Value::Null; count]));
			},
			Instruction::ArrayLength => {
				let array = frame.pop()?;
				match array {
					Value::Array(array) => frame.push(Value::Int(i32::try_from(array.len()).map_err(anyhow::Error::from)?)),
					Value::Null => return Err(runtime.throw("java/lang/NullPointerException", Some("cannot read the array length of null"))),
					other => return Err(anyhow!("arraylength on {other:?} in {method}").into()),
				}
			},
			Instruction::AALoad => {
				let index = frame.pop_int()?;
				match frame.pop()? {
					Value::Array(array) => {
						let index = array_index(runtime, index, array.len())?;
						frame.push(array.get(index).unwrap_or(Value::Null));
					},
					Value::Null => return Err(runtime.throw("java/lang/NullPointerException", Some("cannot load from a null array"))),
					other => return Err(anyhow!("aaload on {other:?} in {method}").into()),
				}
			},
			Instruction::AAStore => {
				let value = frame.pop()?;
				let index = frame.pop_int()?;
				match frame.pop()? {
					Value::Array(array) => {
						let index = array_index(runtime, index, array.len())?;
						array.set(index, value);
					},
					Value::Null => return Err(runtime.throw("java/lang/NullPointerException", Some("cannot store to a null array"))),
					other => return Err(anyhow!("aastore on {other:?} in {method}").into()),
				}
			},
			Instruction::IfNull(label) => {
				if frame.pop()?.is_null() {
					pc = frame.jump(*label)?;
				}
			},
			Instruction::IfNonNull(label) => {
				if !frame.pop()?.is_null() {
					pc = frame.jump(*label)?;
				}
			},
			Instruction::IfEq(label) => {
				if frame.pop_int()? == 0 {
					pc = frame.jump(*label)?;
				}
			},
			Instruction::IfNe(label) => {
				if frame.pop_int()? != 0 {
					pc = frame.jump(*label)?;
				}
			},
			Instruction::Goto(label) => {
				pc = frame.jump(*label)?;
			},
			Instruction::GetStatic(field) => {
				let value = runtime.get_static(&field.class, &field.name)?;
				frame.push(value);
			},
			Instruction::PutStatic(field) => {
				let value = frame.pop()?;
				runtime.put_static(&field.class, &field.name, value)?;
			},
			Instruction::GetField(field) => {
				let object = frame.pop()?;
				let value = runtime.get_field(&object, &field.name)?;
				frame.push(value);
			},
			Instruction::PutField(field) => {
				let value = frame.pop()?;
				let object = frame.pop()?;
				runtime.put_field(&object, &field.name, value)?;
			},
			Instruction::InvokeStatic(method_ref) => {
				let parsed = method_ref.desc.parse()?;
				let args = frame.pop_n(parsed.parameters.len())?;
				let result = runtime.invoke_static(&method_ref.class, &method_ref.name, &method_ref.desc, args)?;
				if parsed.return_type.is_some() {
					frame.push(result);
				}
			},
			Instruction::InvokeVirtual(method_ref) | Instruction::InvokeInterface(method_ref) => {
				let parsed = method_ref.desc.parse()?;
				let args = frame.pop_n(parsed.parameters.len())?;
				let receiver = frame.pop()?;
				let result = runtime.invoke_virtual(receiver, &method_ref.name, &method_ref.desc, args)?;
				if parsed.return_type.is_some() {
					frame.push(result);
				}
			},
			Instruction::InvokeSpecial(method_ref) => {
				let parsed = method_ref.desc.parse()?;
				let args = frame.pop_n(parsed.parameters.len())?;
				let receiver = frame.pop()?;
				let result = runtime.invoke_special(&method_ref.class, &method_ref.name, &method_ref.desc, receiver, args)?;
				if parsed.return_type.is_some() {
					frame.push(result);
				}
			},
			Instruction::New(class) => {
				let object = runtime.allocate(class)?;
				frame.push(object);
			},
			Instruction::CheckCast(class) => {
				let value = frame.peek()?;
				if !value.is_null() && !runtime.is_instance(value, class)? {
					let message = format!("{value:?} cannot be cast to {}", class.java_name());
					return Err(runtime.throw("java/lang/ClassCastException", Some(&message)));
				}
			},
			Instruction::InstanceOf(class) => {
				let value = frame.pop()?;
				let is_instance = runtime.is_instance(&value, class)?;
				frame.push(Value::from(is_instance));
			},
			Instruction::Box(t) => {
				if !t.is_primitive() {
					return Err(anyhow!("cannot box the reference type {} in {method}", t.java_name()).into());
				}
			},
			Instruction::Unbox(t) => {
				let value = frame.pop()?;
				let value = unbox(runtime, value, t)?;
				frame.push(value);
			},
			Instruction::Return => return Ok(Value::Null),
			Instruction::ValueReturn => return frame.pop(),
			Instruction::AThrow => {
				let throwable = frame.pop()?;
				if throwable.is_null() {
					return Err(runtime.throw("java/lang/NullPointerException", Some("cannot throw null")));
				}
				return Err(VmError::Thrown(throwable));
			},
		}
	}
}
