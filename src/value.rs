use crate::error::{RuntimeError, RuntimeResult};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Runtime representation of module exports, globals and mock objects.
///
/// Containers have reference semantics: cloning a `Value` shares the
/// underlying storage. A pre-registered exports object handed out during a
/// require cycle therefore observes writes made after the handout, and
/// identity (`ref_eq`) is meaningful across registry lookups.
#[derive(Clone)]
pub enum Value {
    /// Absent value
    Undefined,

    /// Null value
    Null,

    /// Boolean value
    Bool(bool),

    /// Numeric value
    Number(f64),

    /// String value
    Str(String),

    /// Array value, shared
    Array(Rc<RefCell<Vec<Value>>>),

    /// Object value, shared
    Object(Rc<RefCell<HashMap<String, Value>>>),

    /// Callable host function
    Function(NativeFunction),
}

/// Host function handle stored inside a [`Value`]
#[derive(Clone)]
pub struct NativeFunction(Rc<dyn Fn(&[Value]) -> RuntimeResult<Value>>);

impl NativeFunction {
    pub fn new(f: impl Fn(&[Value]) -> RuntimeResult<Value> + 'static) -> Self {
        NativeFunction(Rc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> RuntimeResult<Value> {
        (self.0)(args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({:p})", Rc::as_ptr(&self.0))
    }
}

impl Value {
    /// Create a fresh empty object
    pub fn object() -> Value {
        Value::Object(Rc::new(RefCell::new(HashMap::new())))
    }

    /// Create a fresh array from the given items
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn number(n: f64) -> Value {
        Value::Number(n)
    }

    pub fn function(f: impl Fn(&[Value]) -> RuntimeResult<Value> + 'static) -> Value {
        Value::Function(NativeFunction::new(f))
    }

    /// Read an object member; `Undefined` members and non-objects yield None.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(map) => map.borrow().get(key).cloned(),
            _ => None,
        }
    }

    /// Write an object member. Returns false when the receiver is not an
    /// object.
    pub fn set(&self, key: impl Into<String>, value: Value) -> bool {
        match self {
            Value::Object(map) => {
                map.borrow_mut().insert(key.into(), value);
                true
            }
            _ => false,
        }
    }

    /// Keys of an object value, empty for anything else.
    pub fn keys(&self) -> Vec<String> {
        match self {
            Value::Object(map) => map.borrow().keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Invoke a function value.
    pub fn call(&self, args: &[Value]) -> RuntimeResult<Value> {
        match self {
            Value::Function(f) => f.call(args),
            other => Err(RuntimeError::Harness(format!(
                "value of type '{}' is not callable",
                other.type_name()
            ))),
        }
    }

    /// Identity comparison: shared storage (or the same primitive) only.
    pub fn ref_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    /// Check if value is truthy
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Function(_) => true,
        }
    }

    /// Get type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    /// Convert parsed JSON into a runtime value.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                let object = Value::object();
                for (key, value) in map {
                    object.set(key.clone(), Value::from_json(value));
                }
                object
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Object(a), Value::Object(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Object(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::Function(_) => write!(f, "<function>"),
        }
    }
}
