use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::ast::{Node, Primitive};
use crate::builtinops::Arity;

/// Shared handle to an environment frame
///
/// Closures and child frames hold their parent by reference count. A frame that binds a
/// closure created in that same frame (a `def` or `let` of a `fn` inside a body, or any
/// global function) forms a cycle and is never freed, along with its ancestors' counts.
/// Calls that create no such local closures release their frames on return.
pub type Env = Rc<Environment>;

/// One lexical frame: mutable bindings plus an optional parent
#[derive(Default)]
pub struct Environment {
    name: String,
    bindings: RefCell<HashMap<String, Node>>,
    parent: Option<Env>,
}

impl Environment {
    /// Create an empty root frame
    pub fn new_global() -> Env {
        Rc::new(Environment {
            name: "global".to_owned(),
            ..Environment::default()
        })
    }

    /// Create an empty frame whose lookups fall through to `parent`
    pub fn with_parent(name: impl Into<String>, parent: &Env) -> Env {
        Rc::new(Environment {
            name: name.into(),
            bindings: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    /// Diagnostic name of this frame (the function it was created for, `let`, `global`)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Env> {
        self.parent.as_ref()
    }

    /// Resolve `name` in this frame or the nearest ancestor that binds it
    pub fn get(&self, name: &str) -> Result<Node, Error> {
        let mut frame = self;
        loop {
            if let Some(value) = frame.bindings.borrow().get(name) {
                return Ok(value.clone());
            }
            match &frame.parent {
                Some(parent) => frame = parent.as_ref(),
                None => return Err(Error::UnboundSymbol(name.to_owned())),
            }
        }
    }

    /// Introduce or overwrite a binding in this frame only
    pub fn set(&self, name: impl Into<String>, value: Node) {
        self.bindings.borrow_mut().insert(name.into(), value);
    }

    /// Overwrite the binding in the nearest frame that already defines `name`
    pub fn update(&self, name: &str, value: Node) -> Result<(), Error> {
        let mut frame = self;
        loop {
            if let Some(slot) = frame.bindings.borrow_mut().get_mut(name) {
                *slot = value;
                return Ok(());
            }
            match &frame.parent {
                Some(parent) => frame = parent.as_ref(),
                None => return Err(Error::UnboundSymbol(name.to_owned())),
            }
        }
    }

    /// Register a host function as a primitive in this frame.
    ///
    /// The evaluator checks `arity` before every call, so `func` always receives an
    /// accepted number of evaluated arguments.
    ///
    /// # Example
    /// ```
    /// use bouncelisp::ast::Node;
    /// use bouncelisp::builtinops::Arity;
    /// use bouncelisp::evaluator::Environment;
    ///
    /// let env = Environment::new_global();
    /// env.register_primitive("answer", Arity::Exact(0), |_env, _head, _args| {
    ///     Ok(Node::Number(42))
    /// });
    /// assert!(env.get("answer").is_ok());
    /// ```
    pub fn register_primitive<F>(&self, name: &str, arity: Arity, func: F)
    where
        F: Fn(&Env, &Node, Vec<Node>) -> Result<Node, Error> + 'static,
    {
        self.set(
            name,
            Node::Primitive(Rc::new(Primitive {
                name: name.to_owned(),
                arity,
                func: Rc::new(func),
            })),
        );
    }

    /// Get all bindings visible from this frame
    /// Returns a Vec of (name, value) pairs sorted by name, inner frames shadowing outer ones
    pub fn get_all_bindings(&self) -> Vec<(String, Node)> {
        let mut visible = HashMap::new();
        let mut frame = Some(self);
        while let Some(current) = frame {
            for (name, value) in current.bindings.borrow().iter() {
                visible
                    .entry(name.clone())
                    .or_insert_with(|| value.clone());
            }
            frame = current.parent.as_deref();
        }

        let mut result: Vec<_> = visible.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.bindings.borrow().keys().cloned().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("name", &self.name)
            .field("bindings", &names)
            .field("parent", &self.parent.as_ref().map(|p| p.name.clone()))
            .finish()
    }
}
