//! Lexical scopes and variable bindings
//!
//! Bindings carry their own validity state: moving a resource out of a
//! variable invalidates the binding, not the value.

use std::cell::RefCell;
use std::rc::Rc;

use ore_syntax::ast::VariableKind;

use crate::types::StaticType;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Valid,
    Moved,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub kind: VariableKind,
    pub state: BindingState,
    /// Whether the binding owns a resource and must be emptied before its
    /// scope ends
    pub owning: bool,
    pub ty: Option<StaticType>,
}

impl Binding {
    pub fn constant(value: Value) -> Self {
        Self {
            value,
            kind: VariableKind::Let,
            state: BindingState::Valid,
            owning: false,
            ty: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Scope {
    parent: Option<Rc<Scope>>,
    bindings: RefCell<Vec<(String, Binding)>>,
}

impl Scope {
    pub fn root() -> Rc<Scope> {
        Rc::new(Scope::default())
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            parent: Some(parent.clone()),
            bindings: RefCell::new(Vec::new()),
        })
    }

    /// Declare a binding, shadowing any binding of the same name
    pub fn declare<S: Into<String>>(&self, name: S, binding: Binding) {
        self.bindings.borrow_mut().push((name.into(), binding));
    }

    pub fn lookup(&self, name: &str) -> Option<Binding> {
        let found = self
            .bindings
            .borrow()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b.clone());
        match found {
            Some(binding) => Some(binding),
            None => self.parent.as_ref().and_then(|parent| parent.lookup(name)),
        }
    }

    /// Apply `f` to the innermost binding named `name`
    pub fn update<R>(&self, name: &str, f: impl FnOnce(&mut Binding) -> R) -> Option<R> {
        {
            let mut bindings = self.bindings.borrow_mut();
            if let Some((_, binding)) = bindings.iter_mut().rev().find(|(n, _)| n == name) {
                return Some(f(binding));
            }
        }
        self.parent.as_ref().and_then(|parent| parent.update(name, f))
    }

    /// Owning bindings of this scope that still hold their value
    pub fn owned(&self) -> Vec<(String, Value)> {
        self.bindings
            .borrow()
            .iter()
            .filter(|(_, b)| b.owning && b.state == BindingState::Valid)
            .map(|(name, b)| (name.clone(), b.value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadowing_and_updates() {
        let root = Scope::root();
        root.declare("x", Binding::constant(Value::int(1)));
        let inner = Scope::child(&root);
        inner.declare("x", Binding::constant(Value::int(2)));
        assert!(inner.lookup("x").unwrap().value.key_eq(&Value::int(2)));

        inner.update("x", |b| b.state = BindingState::Moved);
        assert_eq!(inner.lookup("x").unwrap().state, BindingState::Moved);
        assert_eq!(root.lookup("x").unwrap().state, BindingState::Valid);
        assert!(inner.lookup("y").is_none());
    }

    #[test]
    fn test_owned_bindings() {
        let scope = Scope::root();
        let mut binding = Binding::constant(Value::int(1));
        binding.owning = true;
        scope.declare("r", binding);
        assert_eq!(scope.owned().len(), 1);
        scope.update("r", |b| b.state = BindingState::Moved);
        assert!(scope.owned().is_empty());
    }
}
