//! This module defines the [`Node`] type, the single representation used for both code
//! and runtime data. The variant set is closed: numbers, symbols, strings, characters,
//! booleans, lists, nil, user functions (including macros) and host primitives.
//! Ergonomic helpers such as [`val`], [`sym`], [`nil`] and [`list`] build trees in code and
//! tests. Every node is immutable once built; lists share their elements through `Rc` and
//! are never modified in place.

use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::builtinops::Arity;
use crate::evaluator::Env;

/// Type alias for number values in the interpreter
pub type NumberType = i64;

/// Parameter name that binds all remaining arguments as one list
pub const REST_MARKER: &str = "&rest";

/// Allowed non-alphanumeric characters in symbol names
#[cfg_attr(not(any(feature = "reader", test)), expect(dead_code))]
pub(crate) const SYMBOL_SPECIAL_CHARS: &str = "+-*/<>=!?_$&%.:";

/// Check if a string is a valid symbol name
/// Valid: non-empty, no leading digit, no "-digit" prefix, alphanumeric + SYMBOL_SPECIAL_CHARS
#[cfg_attr(not(any(feature = "reader", test)), expect(dead_code))]
pub(crate) fn is_valid_symbol(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        None => false,
        Some(first_char) => {
            if first_char.is_ascii_digit() {
                return false;
            }
            if first_char == '-' && chars.next().is_some_and(|c| c.is_ascii_digit()) {
                return false;
            }
            name.chars()
                .all(|c| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c))
        }
    }
}

/// Host function behind a [`Primitive`]
///
/// Receives the current environment, the call-site head node (for diagnostics) and the
/// fully evaluated arguments.
pub type PrimitiveFn = dyn Fn(&Env, &Node, Vec<Node>) -> Result<Node, Error>;

/// A user-defined function or macro created by `fn` / `macro`
pub struct Function {
    pub name: String,
    /// Parameter names, possibly containing [`REST_MARKER`] followed by at most one name
    pub params: Vec<String>,
    pub body: Node,
    /// The defining (lexical) environment
    pub parent: Env,
    pub is_macro: bool,
}

impl Function {
    /// Build a function after checking that the parameters are symbols and that the
    /// rest marker, if present, is followed by at most one name.
    pub fn new(
        name: impl Into<String>,
        params: &[Node],
        body: Node,
        parent: Env,
        is_macro: bool,
    ) -> Result<Self, Error> {
        let form = if is_macro { "macro" } else { "fn" };
        let mut names = Vec::with_capacity(params.len());
        for param in params {
            match param {
                Node::Symbol(name) => names.push(name.clone()),
                other => return Err(Error::NotASymbol(other.to_string())),
            }
        }
        if let Some(marker) = names.iter().position(|p| p == REST_MARKER) {
            if names.len() > marker + 2 {
                return Err(Error::MalformedForm {
                    form,
                    reason: format!("at most one parameter may follow {REST_MARKER}"),
                });
            }
            if names.get(marker + 1).is_some_and(|p| p == REST_MARKER) {
                return Err(Error::MalformedForm {
                    form,
                    reason: format!("{REST_MARKER} cannot name the rest parameter"),
                });
            }
        }
        Ok(Function {
            name: name.into(),
            params: names,
            body,
            parent,
            is_macro,
        })
    }

    /// The number of arguments this function accepts
    pub fn arity(&self) -> Arity {
        match self.params.iter().position(|p| p == REST_MARKER) {
            Some(fixed) => Arity::AtLeast(fixed),
            None => Arity::Exact(self.params.len()),
        }
    }

    /// Copy of this function under another diagnostic name, sharing body and environment
    pub(crate) fn renamed(&self, name: &str) -> Function {
        Function {
            name: name.to_owned(),
            params: self.params.clone(),
            body: self.body.clone(),
            parent: Rc::clone(&self.parent),
            is_macro: self.is_macro,
        }
    }
}

/// A host-supplied callable with a declared arity
pub struct Primitive {
    pub name: String,
    pub arity: Arity,
    pub func: Rc<PrimitiveFn>,
}

/// Core node type of the interpreter
///
/// To build a tree, use the helpers:
/// - `val(42)` for values, `sym("name")` for symbols, `nil()` for the nil sentinel
/// - `val([1, 2, 3])` for homogeneous lists
/// - `list(vec![sym("op"), val(42)])` for mixed lists
#[derive(Clone)]
pub enum Node {
    /// Numbers (integers only)
    Number(NumberType),
    /// Symbols (identifiers)
    Symbol(String),
    /// String literals
    String(String),
    /// Character literals
    Char(char),
    /// Boolean literals
    Bool(bool),
    /// Lists, used both as code and as runtime data
    List(Rc<[Node]>),
    /// The "no value" sentinel, distinct from the empty list
    Nil,
    /// User-defined functions and macros
    Function(Rc<Function>),
    /// Host primitives
    Primitive(Rc<Primitive>),
}

impl Node {
    /// Build a list node from owned elements
    pub fn list(elements: Vec<Node>) -> Node {
        Node::List(elements.into())
    }

    /// Everything except `nil` and `#f` counts as true
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Node::Nil | Node::Bool(false))
    }

    /// Short description of the variant, used in type errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Number(_) => "number",
            Node::Symbol(_) => "symbol",
            Node::String(_) => "string",
            Node::Char(_) => "char",
            Node::Bool(_) => "boolean",
            Node::List(_) => "list",
            Node::Nil => "nil",
            Node::Function(f) if f.is_macro => "macro",
            Node::Function(_) => "function",
            Node::Primitive(_) => "primitive",
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Number(n) => write!(f, "Number({n})"),
            Node::Symbol(s) => write!(f, "Symbol({s})"),
            Node::String(s) => write!(f, "String({s:?})"),
            Node::Char(c) => write!(f, "Char({c:?})"),
            Node::Bool(b) => write!(f, "Bool({b})"),
            Node::List(items) => {
                write!(f, "List(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item:?}")?;
                }
                write!(f, ")")
            }
            Node::Nil => write!(f, "Nil"),
            Node::Function(func) => write!(
                f,
                "{}({}, params={:?}, body={:?})",
                if func.is_macro { "Macro" } else { "Function" },
                func.name,
                func.params,
                func.body
            ),
            Node::Primitive(p) => write!(f, "Primitive({})", p.name),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Number(n) => write!(f, "{n}"),
            Node::Symbol(s) => write!(f, "{s}"),
            Node::String(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Node::Char(c) => match c {
                ' ' => write!(f, "#\\space"),
                '\n' => write!(f, "#\\newline"),
                '\t' => write!(f, "#\\tab"),
                c => write!(f, "#\\{c}"),
            },
            Node::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Node::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Node::Nil => write!(f, "nil"),
            Node::Function(func) if func.is_macro => write!(f, "#<macro:{}>", func.name),
            Node::Function(func) => write!(f, "#<function:{}>", func.name),
            Node::Primitive(p) => write!(f, "#<primitive:{}>", p.name),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Number(a), Node::Number(b)) => a == b,
            (Node::Symbol(a), Node::Symbol(b)) => a == b,
            (Node::String(a), Node::String(b)) => a == b,
            (Node::Char(a), Node::Char(b)) => a == b,
            (Node::Bool(a), Node::Bool(b)) => a == b,
            (Node::List(a), Node::List(b)) => a == b,
            (Node::Nil, Node::Nil) => true,
            // Functions have identity, not structure
            (Node::Function(a), Node::Function(b)) => Rc::ptr_eq(a, b),
            (Node::Primitive(a), Node::Primitive(b)) => a.name == b.name,
            _ => false,
        }
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::String(s.to_owned())
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::String(s)
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::Bool(b)
    }
}

impl From<char> for Node {
    fn from(c: char) -> Self {
        Node::Char(c)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Node {
            fn from(n: $int_type) -> Self {
                Node::Number(NumberType::from(n))
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(NumberType);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Node>> From<Vec<T>> for Node {
    fn from(v: Vec<T>) -> Self {
        Node::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Node>, const N: usize> From<[T; N]> for Node {
    fn from(arr: [T; N]) -> Self {
        Node::List(arr.into_iter().map(Into::into).collect())
    }
}

/// Helper for creating symbols
pub fn sym<S: AsRef<str>>(name: S) -> Node {
    Node::Symbol(name.as_ref().to_owned())
}

/// Helper for creating nodes from any convertible Rust value
pub fn val<T: Into<Node>>(value: T) -> Node {
    value.into()
}

/// Helper for the nil sentinel
pub fn nil() -> Node {
    Node::Nil
}

/// Helper for mixed lists
pub fn list(elements: Vec<Node>) -> Node {
    Node::list(elements)
}
