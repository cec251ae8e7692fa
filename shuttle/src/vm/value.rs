use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use indexmap::IndexMap;
use parking_lot::Mutex;
use crate::tree::class::ClassName;
use crate::tree::descriptor::Type;
use crate::tree::field::FieldName;
use crate::tree::method::code::Loadable;
use crate::vm::lifecycle::Listeners;

/// The identity of an object or array, unique for the whole process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
	fn next() -> ObjectId {
		static NEXT: AtomicU64 = AtomicU64::new(1);
		ObjectId(NEXT.fetch_add(1, Ordering::Relaxed))
	}

	pub fn get(self) -> u64 {
		self.0
	}
}

pub type ObjectRef = Arc<Object>;
pub type ArrayRef = Arc<Array>;

/// A value on the operand stack, in a local variable, a field or an array.
///
/// `boolean`, `byte`, `char`, `short` and `int` are all represented by [`Value::Int`]. Boxed primitives are the
/// primitive values themselves.
#[derive(Clone)]
pub enum Value {
	Null,
	Int(i32),
	Long(i64),
	Float(f32),
	Double(f64),
	Str(Arc<str>),
	Class(ClassName),
	Object(ObjectRef),
	Array(ArrayRef),
	/// A value owned by the host, opaque to code running in the runtime.
	Host(HostRef),
}

#[derive(Clone)]
pub struct HostRef {
	pub class: ClassName,
	pub value: Arc<dyn Any + Send + Sync>,
}

impl Value {
	pub fn host<T: Any + Send + Sync>(class: ClassName, value: Arc<T>) -> Value {
		Value::Host(HostRef { class, value })
	}

	pub fn from_loadable(loadable: &Loadable) -> Value {
		match loadable {
			Loadable::Integer(i) => Value::Int(*i),
			Loadable::Long(l) => Value::Long(*l),
			Loadable::Float(f) => Value::Float(*f),
			Loadable::Double(d) => Value::Double(*d),
			Loadable::String(s) => Value::Str(Arc::from(s.as_str())),
			Loadable::Class(c) => Value::Class(c.clone()),
		}
	}

	/// The value a field or array element of the given type starts out with.
	pub fn default_for(t: &Type) -> Value {
		Loadable::default_for(t).map_or(Value::Null, |l| Value::from_loadable(&l))
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	/// Returns `true` for the values representing a primitive or a boxed primitive.
	pub fn is_primitive(&self) -> bool {
		matches!(self, Value::Int(_) | Value::Long(_) | Value::Float(_) | Value::Double(_))
	}

	pub fn as_int(&self) -> Option<i32> {
		match self {
			Value::Int(i) => Some(*i),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::Str(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_class(&self) -> Option<&ClassName> {
		match self {
			Value::Class(c) => Some(c),
			_ => None,
		}
	}

	pub fn as_object(&self) -> Option<&ObjectRef> {
		match self {
			Value::Object(o) => Some(o),
			_ => None,
		}
	}

	pub fn as_array(&self) -> Option<&ArrayRef> {
		match self {
			Value::Array(a) => Some(a),
			_ => None,
		}
	}

	/// Returns the host value if it is one of type `T`.
	pub fn downcast_host<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
		match self {
			Value::Host(host) => host.value.clone().downcast::<T>().ok(),
			_ => None,
		}
	}

	/// The identity of objects and arrays.
	pub fn object_id(&self) -> Option<ObjectId> {
		match self {
			Value::Object(o) => Some(o.id),
			Value::Array(a) => Some(a.id),
			_ => None,
		}
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Value::Null, Value::Null) => true,
			(Value::Int(a), Value::Int(b)) => a == b,
			(Value::Long(a), Value::Long(b)) => a == b,
			(Value::Float(a), Value::Float(b)) => a == b,
			(Value::Double(a), Value::Double(b)) => a == b,
			(Value::Str(a), Value::Str(b)) => a == b,
			(Value::Class(a), Value::Class(b)) => a == b,
			(Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
			(Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
			(Value::Host(a), Value::Host(b)) => std::ptr::eq(
				Arc::as_ptr(&a.value) as *const (),
				Arc::as_ptr(&b.value) as *const (),
			),
			_ => false,
		}
	}
}

impl Debug for Value {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Value::Null => f.write_str("null"),
			Value::Int(i) => write!(f, "{i}"),
			Value::Long(l) => write!(f, "{l}L"),
			Value::Float(x) => write!(f, "{x}F"),
			Value::Double(x) => write!(f, "{x}D"),
			Value::Str(s) => write!(f, "{s:?}"),
			Value::Class(c) => write!(f, "class {c}"),
			Value::Object(o) => write!(f, "{}@{}", o.class, o.id.0),
			Value::Array(a) => write!(f, "{}@{}", a.class, a.id.0),
			Value::Host(h) => write!(f, "host {}", h.class),
		}
	}
}

impl From<i32> for Value {
	fn from(value: i32) -> Self {
		Value::Int(value)
	}
}

impl From<bool> for Value {
	fn from(value: bool) -> Self {
		Value::Int(i32::from(value))
	}
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Value::Long(value)
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Value::Str(Arc::from(value))
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Value::Str(Arc::from(value))
	}
}

/// An instance of a class.
///
/// Dropping the last reference notifies the [`crate::vm::lifecycle::LifecycleListener`]s of the runtime.
pub struct Object {
	id: ObjectId,
	class: ClassName,
	fields: Mutex<IndexMap<FieldName, Value>>,
	listeners: Weak<Listeners>,
}

impl Object {
	pub(crate) fn new(class: ClassName, fields: IndexMap<FieldName, Value>, listeners: Weak<Listeners>) -> Object {
		Object {
			id: ObjectId::next(),
			class,
			fields: Mutex::new(fields),
			listeners,
		}
	}

	pub fn id(&self) -> ObjectId {
		self.id
	}

	pub fn class(&self) -> &ClassName {
		&self.class
	}

	pub fn get(&self, name: &FieldName) -> Option<Value> {
		self.fields.lock().get(name).cloned()
	}

	/// Sets a field, returning `false` if the object has no such field.
	pub fn set(&self, name: &FieldName, value: Value) -> bool {
		match self.fields.lock().get_mut(name) {
			Some(slot) => {
				*slot = value;
				true
			},
			None => false,
		}
	}
}

impl Drop for Object {
	fn drop(&mut self) {
		if let Some(listeners) = self.listeners.upgrade() {
			listeners.object_dropped(self.id);
		}
	}
}

pub struct Array {
	id: ObjectId,
	/// The class name of the array itself, like `[Ljava/lang/Object;`.
	class: ClassName,
	elements: Mutex<Vec<Value>>,
}

impl Array {
	pub fn new(component: &ClassName, elements: Vec<Value>) -> Array {
		let class = if component.is_array() {
			format!("[{component}")
		} else {
			format!("[L{component};")
		};
		Array {
			id: ObjectId::next(),
			class: ClassName::new_unchecked(class),
			elements: Mutex::new(elements),
		}
	}

	pub fn id(&self) -> ObjectId {
		self.id
	}

	pub fn class(&self) -> &ClassName {
		&self.class
	}

	pub fn len(&self) -> usize {
		self.elements.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.elements.lock().is_empty()
	}

	pub fn get(&self, index: usize) -> Option<Value> {
		self.elements.lock().get(index).cloned()
	}

	pub fn set(&self, index: usize, value: Value) -> bool {
		match self.elements.lock().get_mut(index) {
			Some(slot) => {
				*slot = value;
				true
			},
			None => false,
		}
	}

	pub fn to_vec(&self) -> Vec<Value> {
		self.elements.lock().clone()
	}
}

#[cfg(test)]
mod testing {
	use std::sync::{Arc, Weak};
	use indexmap::IndexMap;
	use pretty_assertions::assert_eq;
	use crate::tree::class::ClassName;
	use crate::tree::descriptor::Type;
	use crate::vm::value::{Array, Object, Value};

	#[test]
	fn reference_equality() {
		let class = ClassName::new_unchecked("test/A");
		let a = Value::Object(Arc::new(Object::new(class.clone(), IndexMap::new(), Weak::new())));
		let b = Value::Object(Arc::new(Object::new(class, IndexMap::new(), Weak::new())));
		assert_eq!(a, a.clone());
		assert_ne!(a, b);
		assert_ne!(a.object_id(), b.object_id());

		assert_eq!(Value::from("x"), Value::from("x".to_owned()));
	}

	#[test]
	fn defaults() {
		assert_eq!(Value::default_for(&Type::Z), Value::Int(0));
		assert_eq!(Value::default_for(&Type::J), Value::Long(0));
		assert_eq!(Value::default_for(&Type::Object(ClassName::java_lang_string())), Value::Null);
	}

	#[test]
	fn array_class_names() {
		let array = Array::new(&ClassName::java_lang_object(), vec![Value::Null; 2]);
		assert_eq!(array.class().as_str(), "[Ljava/lang/Object;");
		assert_eq!(array.len(), 2);
		assert!(array.set(1, Value::Int(3)));
		assert!(!array.set(2, Value::Int(3)));
		assert_eq!(array.to_vec(), vec![Value::Null, Value::Int(3)]);
	}
}
