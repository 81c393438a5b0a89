//! Built-in primitive registry.
//!
//! Primitives are host functions that always receive fully evaluated arguments. Each one
//! declares an inclusive [`Arity`] that the evaluator checks before the call, so the
//! implementations below only validate argument *types*.
//!
//! ```text
//! (+ 1 2 3)            ; arithmetic, overflow is an error
//! (< 1 2 3)            ; chained comparison
//! (cons 1 (list 2 3))  ; list construction
//! (println "x =" 42)   ; output to the configured sink
//! ```
//!
//! ## Error Handling
//!
//! - **Type Safety**: operations reject incorrect types (e.g. `(+ 1 "a")` is a `TypeError`)
//! - **Overflow Detection**: arithmetic reports overflow and division by zero
//! - **Arity Checking**: enforced by the evaluator from the declared [`Arity`]
//!
//! ## Adding New Operations
//!
//! 1. Implement `fn(Vec<Node>) -> Result<Node, Error>`
//! 2. Add it to `BUILTIN_OPS` with its identifier and arity
//! 3. Add tests covering edge cases and error conditions
//!
//! Primitives that need state (such as the output sink) are registered as closures in
//! [`install_builtins`].

use std::cell::RefCell;
use std::fmt;
use std::io::Write;
use std::rc::Rc;

use crate::Error;
use crate::ast::{Node, NumberType};
use crate::evaluator::Env;

/// Accepted argument counts of a callable, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly n arguments
    Exact(usize),
    /// At least n arguments
    AtLeast(usize),
    /// Between min and max arguments (inclusive)
    Range(usize, usize),
    /// Any number of arguments
    Any,
}

impl Arity {
    pub fn min(self) -> usize {
        match self {
            Arity::Exact(n) | Arity::AtLeast(n) | Arity::Range(n, _) => n,
            Arity::Any => 0,
        }
    }

    /// Upper bound, `None` when unbounded
    pub fn max(self) -> Option<usize> {
        match self {
            Arity::Exact(n) | Arity::Range(_, n) => Some(n),
            Arity::AtLeast(_) | Arity::Any => None,
        }
    }

    pub fn accepts(self, count: usize) -> bool {
        count >= self.min() && self.max().is_none_or(|max| count <= max)
    }

    /// Check a call of `callee` with `count` arguments
    pub(crate) fn validate(self, callee: &str, count: usize) -> Result<(), Error> {
        if self.accepts(count) {
            Ok(())
        } else {
            Err(Error::arity(callee, self, count))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(min, max) => write!(f, "between {min} and {max}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// Destination for the output primitives
pub type OutputSink = Rc<RefCell<dyn Write>>;

/// Definition of a stateless built-in primitive
#[derive(Debug, Clone, Copy)]
pub struct BuiltinOp {
    /// The identifier the primitive is bound to in the global environment
    pub id: &'static str,
    /// Declared argument counts, checked before the call
    pub arity: Arity,
    func: fn(Vec<Node>) -> Result<Node, Error>,
}

//
// Builtin Function Implementations
//

fn number(op: &str, node: &Node) -> Result<NumberType, Error> {
    match node {
        Node::Number(n) => Ok(*n),
        other => Err(Error::TypeError(format!(
            "'{op}' expects numbers, got {} {other}",
            other.type_name()
        ))),
    }
}

fn numbers(op: &str, args: &[Node]) -> Result<Vec<NumberType>, Error> {
    args.iter().map(|arg| number(op, arg)).collect()
}

fn overflow(what: &str) -> Error {
    Error::EvalError(format!("Integer overflow in {what}"))
}

/// Elements of a list argument; `nil` reads as the empty list
fn elements<'a>(op: &str, node: &'a Node) -> Result<&'a [Node], Error> {
    match node {
        Node::List(items) => Ok(items),
        Node::Nil => Ok(&[]),
        other => Err(Error::TypeError(format!(
            "'{op}' expects a list, got {} {other}",
            other.type_name()
        ))),
    }
}

/// Text form used by `str` and the output primitives: strings and chars unquoted
fn display_raw(node: &Node) -> String {
    match node {
        Node::String(s) => s.clone(),
        Node::Char(c) => c.to_string(),
        other => other.to_string(),
    }
}

// Macro to generate chained numeric comparisons
macro_rules! numeric_comparison {
    ($name:ident, $op:tt, $op_str:expr) => {
        fn $name(args: Vec<Node>) -> Result<Node, Error> {
            let nums = numbers($op_str, &args)?;
            Ok(Node::Bool(nums.windows(2).all(|pair| pair[0] $op pair[1])))
        }
    };
}

numeric_comparison!(builtin_num_eq, ==, "=");
numeric_comparison!(builtin_lt, <, "<");
numeric_comparison!(builtin_gt, >, ">");
numeric_comparison!(builtin_le, <=, "<=");
numeric_comparison!(builtin_ge, >=, ">=");

fn builtin_add(args: Vec<Node>) -> Result<Node, Error> {
    let mut sum: NumberType = 0;
    for n in numbers("+", &args)? {
        sum = sum.checked_add(n).ok_or_else(|| overflow("addition"))?;
    }
    Ok(Node::Number(sum))
}

fn builtin_sub(args: Vec<Node>) -> Result<Node, Error> {
    let nums = numbers("-", &args)?;
    let Some((&first, rest)) = nums.split_first() else {
        return Err(Error::arity("-", Arity::AtLeast(1), 0));
    };
    if rest.is_empty() {
        return first
            .checked_neg()
            .map(Node::Number)
            .ok_or_else(|| overflow("negation"));
    }
    let mut result = first;
    for &n in rest {
        result = result.checked_sub(n).ok_or_else(|| overflow("subtraction"))?;
    }
    Ok(Node::Number(result))
}

fn builtin_mul(args: Vec<Node>) -> Result<Node, Error> {
    let mut product: NumberType = 1;
    for n in numbers("*", &args)? {
        product = product
            .checked_mul(n)
            .ok_or_else(|| overflow("multiplication"))?;
    }
    Ok(Node::Number(product))
}

fn builtin_div(args: Vec<Node>) -> Result<Node, Error> {
    let nums = numbers("/", &args)?;
    let Some((&first, rest)) = nums.split_first() else {
        return Err(Error::arity("/", Arity::AtLeast(2), 0));
    };
    let mut quotient = first;
    for &n in rest {
        if n == 0 {
            return Err(Error::EvalError("Division by zero".into()));
        }
        quotient = quotient.checked_div(n).ok_or_else(|| overflow("division"))?;
    }
    Ok(Node::Number(quotient))
}

fn builtin_mod(args: Vec<Node>) -> Result<Node, Error> {
    let (a, b) = match numbers("mod", &args)?.as_slice() {
        [a, b] => (*a, *b),
        _ => return Err(Error::arity("mod", Arity::Exact(2), args.len())),
    };
    if b == 0 {
        return Err(Error::EvalError("Division by zero".into()));
    }
    a.checked_rem_euclid(b)
        .map(Node::Number)
        .ok_or_else(|| overflow("modulo"))
}

fn builtin_equal(args: Vec<Node>) -> Result<Node, Error> {
    Ok(Node::Bool(args.windows(2).all(|pair| pair[0] == pair[1])))
}

fn builtin_not(args: Vec<Node>) -> Result<Node, Error> {
    Ok(Node::Bool(!args[0].is_truthy()))
}

fn builtin_list(args: Vec<Node>) -> Result<Node, Error> {
    Ok(Node::list(args))
}

fn builtin_first(args: Vec<Node>) -> Result<Node, Error> {
    let items = elements("first", &args[0])?;
    Ok(items.first().cloned().unwrap_or(Node::Nil))
}

fn builtin_rest(args: Vec<Node>) -> Result<Node, Error> {
    let items = elements("rest", &args[0])?;
    Ok(Node::list(items.iter().skip(1).cloned().collect()))
}

fn builtin_cons(args: Vec<Node>) -> Result<Node, Error> {
    let tail = elements("cons", &args[1])?;
    let mut items = Vec::with_capacity(tail.len() + 1);
    items.push(args[0].clone());
    items.extend_from_slice(tail);
    Ok(Node::list(items))
}

fn builtin_empty(args: Vec<Node>) -> Result<Node, Error> {
    Ok(Node::Bool(elements("empty?", &args[0])?.is_empty()))
}

fn builtin_count(args: Vec<Node>) -> Result<Node, Error> {
    let count = match &args[0] {
        Node::String(s) => s.chars().count(),
        other => elements("count", other)?.len(),
    };
    NumberType::try_from(count)
        .map(Node::Number)
        .map_err(|_| overflow("count"))
}

fn builtin_is_nil(args: Vec<Node>) -> Result<Node, Error> {
    Ok(Node::Bool(matches!(args[0], Node::Nil)))
}

fn builtin_is_list(args: Vec<Node>) -> Result<Node, Error> {
    Ok(Node::Bool(matches!(args[0], Node::List(_))))
}

fn builtin_is_symbol(args: Vec<Node>) -> Result<Node, Error> {
    Ok(Node::Bool(matches!(args[0], Node::Symbol(_))))
}

fn builtin_is_number(args: Vec<Node>) -> Result<Node, Error> {
    Ok(Node::Bool(matches!(args[0], Node::Number(_))))
}

fn builtin_is_string(args: Vec<Node>) -> Result<Node, Error> {
    Ok(Node::Bool(matches!(args[0], Node::String(_))))
}

fn builtin_str(args: Vec<Node>) -> Result<Node, Error> {
    Ok(Node::String(args.iter().map(display_raw).collect()))
}

fn builtin_error(args: Vec<Node>) -> Result<Node, Error> {
    let message = if args.is_empty() {
        "Error".to_owned()
    } else {
        args.iter().map(display_raw).collect::<Vec<_>>().join(" ")
    };
    Err(Error::EvalError(message))
}

fn write_output(sink: &OutputSink, args: &[Node], newline: bool) -> Result<Node, Error> {
    let text = args.iter().map(display_raw).collect::<Vec<_>>().join(" ");
    let mut out = sink.borrow_mut();
    write!(out, "{text}")?;
    if newline {
        writeln!(out)?;
    }
    out.flush()?;
    Ok(Node::Nil)
}

/// Registry of all stateless built-in primitives.
static BUILTIN_OPS: &[BuiltinOp] = &[
    // Arithmetic operations
    BuiltinOp {
        id: "+",
        arity: Arity::Any,
        func: builtin_add,
    },
    BuiltinOp {
        id: "-",
        arity: Arity::AtLeast(1),
        func: builtin_sub,
    },
    BuiltinOp {
        id: "*",
        arity: Arity::Any,
        func: builtin_mul,
    },
    BuiltinOp {
        id: "/",
        arity: Arity::AtLeast(2),
        func: builtin_div,
    },
    BuiltinOp {
        id: "mod",
        arity: Arity::Exact(2),
        func: builtin_mod,
    },
    // Comparison operations
    BuiltinOp {
        id: "=",
        arity: Arity::AtLeast(2),
        func: builtin_num_eq,
    },
    BuiltinOp {
        id: "<",
        arity: Arity::AtLeast(2),
        func: builtin_lt,
    },
    BuiltinOp {
        id: ">",
        arity: Arity::AtLeast(2),
        func: builtin_gt,
    },
    BuiltinOp {
        id: "<=",
        arity: Arity::AtLeast(2),
        func: builtin_le,
    },
    BuiltinOp {
        id: ">=",
        arity: Arity::AtLeast(2),
        func: builtin_ge,
    },
    BuiltinOp {
        id: "equal?",
        arity: Arity::Exact(2),
        func: builtin_equal,
    },
    BuiltinOp {
        id: "not",
        arity: Arity::Exact(1),
        func: builtin_not,
    },
    // List operations
    BuiltinOp {
        id: "list",
        arity: Arity::Any,
        func: builtin_list,
    },
    BuiltinOp {
        id: "first",
        arity: Arity::Exact(1),
        func: builtin_first,
    },
    BuiltinOp {
        id: "rest",
        arity: Arity::Exact(1),
        func: builtin_rest,
    },
    BuiltinOp {
        id: "cons",
        arity: Arity::Exact(2),
        func: builtin_cons,
    },
    BuiltinOp {
        id: "empty?",
        arity: Arity::Exact(1),
        func: builtin_empty,
    },
    BuiltinOp {
        id: "count",
        arity: Arity::Exact(1),
        func: builtin_count,
    },
    // Predicates
    BuiltinOp {
        id: "nil?",
        arity: Arity::Exact(1),
        func: builtin_is_nil,
    },
    BuiltinOp {
        id: "list?",
        arity: Arity::Exact(1),
        func: builtin_is_list,
    },
    BuiltinOp {
        id: "symbol?",
        arity: Arity::Exact(1),
        func: builtin_is_symbol,
    },
    BuiltinOp {
        id: "number?",
        arity: Arity::Exact(1),
        func: builtin_is_number,
    },
    BuiltinOp {
        id: "string?",
        arity: Arity::Exact(1),
        func: builtin_is_string,
    },
    // Strings and errors
    BuiltinOp {
        id: "str",
        arity: Arity::Any,
        func: builtin_str,
    },
    BuiltinOp {
        id: "error",
        arity: Arity::Any,
        func: builtin_error,
    },
];

/// Get all stateless builtin primitives
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS
}

/// Bind every builtin primitive in `env`, with `print`/`println` writing to `sink`
pub fn install_builtins(env: &Env, sink: OutputSink) {
    for op in get_builtin_ops() {
        let func = op.func;
        env.register_primitive(op.id, op.arity, move |_env, _head, args| func(args));
    }

    let print_sink = Rc::clone(&sink);
    env.register_primitive("print", Arity::Any, move |_env, _head, args| {
        write_output(&print_sink, &args, false)
    });
    env.register_primitive("println", Arity::Any, move |_env, _head, args| {
        write_output(&sink, &args, true)
    });
}
