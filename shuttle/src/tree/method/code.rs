use serde::{Deserialize, Serialize};
use crate::tree::class::ClassName;
use crate::tree::descriptor::Type;
use crate::tree::field::FieldRef;
use crate::tree::method::MethodRef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionListEntry {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub label: Option<Label>,
	pub instruction: Instruction,
}

impl From<Instruction> for InstructionListEntry {
	fn from(instruction: Instruction) -> Self {
		InstructionListEntry { label: None, instruction }
	}
}

/// Represents the code of a method.
///
/// Every value occupies exactly one local variable slot, `long` and `double` included.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
	pub max_locals: u16,
	pub instructions: Vec<InstructionListEntry>,

	/// The id the next label created with [`Code::new_label`] gets.
	#[serde(default)]
	pub(crate) next_label: u16,
}

impl Code {
	pub fn new(max_locals: u16) -> Code {
		Code { max_locals, instructions: Vec::new(), next_label: 0 }
	}

	/// Creates code from a list of instructions, none of them labelled.
	pub fn from_instructions(max_locals: u16, instructions: impl IntoIterator<Item=Instruction>) -> Code {
		let mut code = Code::new(max_locals);
		code.instructions.extend(instructions.into_iter().map(InstructionListEntry::from));
		code
	}

	/// Creates a new label, unique within this code.
	pub fn new_label(&mut self) -> Label {
		let used = self.instructions.iter()
			.filter_map(|entry| entry.label)
			.map(|label| label.id + 1)
			.max()
			.unwrap_or(0);
		let id = self.next_label.max(used);
		self.next_label = id + 1;
		Label { id }
	}

	pub fn push(&mut self, instruction: Instruction) {
		self.instructions.push(instruction.into());
	}

	/// Appends an instruction and puts the label on it.
	pub fn push_labelled(&mut self, label: Label, instruction: Instruction) {
		self.instructions.push(InstructionListEntry { label: Some(label), instruction });
	}

	/// Allocates a new local variable slot after all currently used ones.
	pub fn new_local(&mut self) -> LvIndex {
		let index = LvIndex { index: self.max_locals };
		self.max_locals += 1;
		index
	}
}

/// Represents an index of a local variable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LvIndex {
	pub index: u16,
}

impl LvIndex {
	pub fn new(index: u16) -> LvIndex {
		LvIndex { index }
	}
}

/// Represents a position in the instruction list using a method-local id.
///
/// The id does not correspond to the position. Labels are attached to [`InstructionListEntry`]s and jumps refer to them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
	pub(crate) id: u16,
}

/// Represents an instruction.
///
/// Values are untyped on the stack, so there's only one kind of load, store and value return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
	Nop,
	AConstNull,
	Ldc(Loadable),
	Load(LvIndex),
	Store(LvIndex),
	Pop,
	Dup,
	Swap,
	IAdd,
	ISub,
	IMul,
	IInc(LvIndex, i16),
	/// Pops a count and pushes a new array of that length filled with `null`.
	ANewArray(ClassName),
	ArrayLength,
	AALoad,
	AAStore,
	IfNull(Label),
	IfNonNull(Label),
	IfEq(Label),
	IfNe(Label),
	Goto(Label),
	GetStatic(FieldRef),
	PutStatic(FieldRef),
	GetField(FieldRef),
	PutField(FieldRef),
	InvokeVirtual(MethodRef),
	InvokeSpecial(MethodRef),
	InvokeStatic(MethodRef),
	InvokeInterface(MethodRef),
	New(ClassName),
	CheckCast(ClassName),
	InstanceOf(ClassName),
	/// Converts a primitive of the given type into its boxed form.
	Box(Type),
	/// Converts a boxed value into the primitive of the given type. Throws on `null`.
	Unbox(Type),
	Return,
	ValueReturn,
	AThrow,
}

impl Instruction {
	/// Returns the label this instruction may jump to.
	pub fn jump_target(&self) -> Option<Label> {
		match self {
			Instruction::IfNull(label) |
			Instruction::IfNonNull(label) |
			Instruction::IfEq(label) |
			Instruction::IfNe(label) |
			Instruction::Goto(label) => Some(*label),
			_ => None,
		}
	}

	pub fn method_ref(&self) -> Option<&MethodRef> {
		match self {
			Instruction::InvokeVirtual(method_ref) |
			Instruction::InvokeSpecial(method_ref) |
			Instruction::InvokeStatic(method_ref) |
			Instruction::InvokeInterface(method_ref) => Some(method_ref),
			_ => None,
		}
	}

	pub fn field_ref(&self) -> Option<&FieldRef> {
		match self {
			Instruction::GetStatic(field_ref) |
			Instruction::PutStatic(field_ref) |
			Instruction::GetField(field_ref) |
			Instruction::PutField(field_ref) => Some(field_ref),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Loadable {
	Integer(i32),
	Long(i64),
	Float(f32),
	Double(f64),
	String(String),
	Class(ClassName),
}

impl Loadable {
	/// The zero value of a primitive type, `None` for reference types.
	pub fn default_for(t: &Type) -> Option<Loadable> {
		match t {
			Type::B | Type::C | Type::I | Type::S | Type::Z => Some(Loadable::Integer(0)),
			Type::J => Some(Loadable::Long(0)),
			Type::F => Some(Loadable::Float(0.0)),
			Type::D => Some(Loadable::Double(0.0)),
			Type::Object(_) | Type::Array(..) => None,
		}
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use crate::tree::method::code::{Code, Instruction, LvIndex};

	#[test]
	fn labels_are_unique() {
		let mut code = Code::new(1);
		let a = code.new_label();
		code.push_labelled(a, Instruction::Nop);
		let b = code.new_label();
		assert_ne!(a, b);

		// labels already present in the instructions are never handed out again
		let mut copy = Code::from_instructions(1, []);
		copy.instructions = code.instructions.clone();
		assert_ne!(copy.new_label(), a);
	}

	#[test]
	fn locals() {
		let mut code = Code::new(2);
		assert_eq!(code.new_local(), LvIndex::new(2));
		assert_eq!(code.new_local(), LvIndex::new(3));
		assert_eq!(code.max_locals, 4);
	}
}
