//! Object model
//!
//! A deliberately small object system: property maps with a prototype chain,
//! plus specialized kinds for bytecode functions, native functions and regex
//! objects. Objects are shared by reference counting; the engine is strictly
//! single-threaded.

use std::cell::RefCell;
use std::rc::Rc;

use ferret_vm_bytecode::{Atom, BlockId};
use rustc_hash::FxHashMap;

use crate::context::Context;
use crate::error::RuntimeError;
use crate::value::Value;

/// Shared reference to an object
pub type ObjectRef = Rc<RefCell<JsObject>>;

/// One level of heap-allocated variable storage, shared between a function
/// frame and the closures it creates
pub type HeapEnv = Rc<RefCell<Vec<Value>>>;

/// Host function signature
pub type NativeFunction =
    fn(&mut Context, &Value, &[Value]) -> Result<Value, RuntimeError>;

/// Payload of a bytecode-backed function object
#[derive(Debug, Clone)]
pub struct FunctionData {
    /// The function's code block
    pub block: BlockId,
    /// Captured environment chain, innermost first
    pub envs: Vec<HeapEnv>,
}

/// What kind of object this is
#[derive(Debug, Default)]
pub enum ObjectKind {
    /// Plain object
    #[default]
    Ordinary,
    /// Function compiled from source
    Function(FunctionData),
    /// Host-provided function
    Native(NativeFunction),
    /// Regular expression literal: body and option strings
    Regex {
        /// Pattern body
        body: Atom,
        /// Pattern flags
        option: Atom,
    },
}

/// A JavaScript object
#[derive(Debug, Default)]
pub struct JsObject {
    /// Own properties
    pub properties: FxHashMap<Atom, Value>,
    /// Prototype link
    pub prototype: Option<ObjectRef>,
    /// Specialized payload
    pub kind: ObjectKind,
    /// Function name, for diagnostics (`Atom::EMPTY` when anonymous)
    pub name: Atom,
}

impl JsObject {
    /// Create a plain object with the given prototype
    pub fn ordinary(prototype: Option<ObjectRef>) -> ObjectRef {
        Rc::new(RefCell::new(JsObject {
            prototype,
            ..Default::default()
        }))
    }

    /// Create a bytecode-backed function object
    pub fn function(name: Atom, data: FunctionData) -> ObjectRef {
        Rc::new(RefCell::new(JsObject {
            kind: ObjectKind::Function(data),
            name,
            ..Default::default()
        }))
    }

    /// Create a host function object
    pub fn native(name: Atom, func: NativeFunction) -> ObjectRef {
        Rc::new(RefCell::new(JsObject {
            kind: ObjectKind::Native(func),
            name,
            ..Default::default()
        }))
    }

    /// Create a regex object
    pub fn regex(body: Atom, option: Atom) -> ObjectRef {
        Rc::new(RefCell::new(JsObject {
            kind: ObjectKind::Regex { body, option },
            ..Default::default()
        }))
    }

    /// Is this object callable?
    #[inline]
    pub fn is_callable(&self) -> bool {
        matches!(self.kind, ObjectKind::Function(_) | ObjectKind::Native(_))
    }

    /// Function name for diagnostics
    #[inline]
    pub fn function_name(&self) -> Atom {
        self.name
    }

    /// Own-property read
    #[inline]
    pub fn get_own(&self, name: Atom) -> Option<Value> {
        self.properties.get(&name).cloned()
    }

    /// Own-property write
    #[inline]
    pub fn set(&mut self, name: Atom, value: Value) {
        self.properties.insert(name, value);
    }

    /// Own-property delete; true when the property existed
    #[inline]
    pub fn delete(&mut self, name: Atom) -> bool {
        self.properties.remove(&name).is_some()
    }

    /// Does this object (not its prototypes) have the property?
    #[inline]
    pub fn has_own(&self, name: Atom) -> bool {
        self.properties.contains_key(&name)
    }
}

/// Property read through the prototype chain
pub fn get_property(object: &ObjectRef, name: Atom) -> Option<Value> {
    let mut current = object.clone();
    loop {
        if let Some(value) = current.borrow().get_own(name) {
            return Some(value);
        }
        let next = current.borrow().prototype.clone();
        match next {
            Some(proto) => current = proto,
            None => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prototype_chain_lookup() {
        let proto = JsObject::ordinary(None);
        proto.borrow_mut().set(Atom(1), Value::Int32(7));
        let object = JsObject::ordinary(Some(proto));
        assert!(object.borrow().get_own(Atom(1)).is_none());
        let found = get_property(&object, Atom(1)).unwrap();
        assert!(found.strict_equals(&Value::Int32(7)));
    }

    #[test]
    fn test_callable_kinds() {
        fn nop(
            _: &mut Context,
            _: &Value,
            _: &[Value],
        ) -> Result<Value, RuntimeError> {
            Ok(Value::Undefined)
        }
        assert!(JsObject::native(Atom(0), nop).borrow().is_callable());
        assert!(!JsObject::ordinary(None).borrow().is_callable());
    }
}
