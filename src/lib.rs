//! bouncelisp - trampolined evaluator core for a small Lisp
//!
//! This crate turns an already-parsed expression tree into a value. It interprets special
//! forms, function application and macro expansion while keeping deeply recursive programs
//! (including self-tail-recursive ones) off the host call stack.
//!
//! ```text
//! (def count-down (fn (n) (if (= n 0) 'done (count-down (- n 1)))))
//! (count-down 1000000)   ; => done, in constant host stack
//!
//! (def unless (macro (c body) (list 'if c nil body)))
//! (unless #f "ran")      ; => "ran"
//! ```
//!
//! ## Evaluation model
//!
//! Evaluation is continuation-passing through an explicit trampoline: every step either
//! responds with a final [`ast::Node`] or bounces a thunk describing the next step. Tail
//! positions (the taken branch of `if`, the matched `cond` clause, `let`/`begin` bodies,
//! function bodies and macro expansions) bounce; operators and operands are forced to
//! completion by a nested trampoline whose depth is bounded by [`MAX_EVAL_DEPTH`].
//!
//! ## Truthiness
//!
//! Only `nil` and `#f` are false. `0`, `""` and `()` are all true.
//!
//! ## Modules
//!
//! - `ast`: the closed [`ast::Node`] model
//! - `evaluator`: environments, the trampoline, special forms and application
//! - `builtinops`: arity declarations and the builtin primitive registry
//! - `reader`: S-expression reading from text (feature `reader`)

use std::fmt;

use crate::builtinops::Arity;

/// Maximum reader nesting depth
/// Deeper input is rejected with [`ParseErrorKind::TooDeeplyNested`]
pub const MAX_PARSE_DEPTH: usize = 64;

/// Maximum number of nested synchronous evaluations (operators, operands, predicates)
/// Tail positions do not count against this limit
pub const MAX_EVAL_DEPTH: usize = 512;

/// Categorizes the different kinds of reading errors.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed literals)
    InvalidSyntax,
    /// Input ended before the expression was complete (unterminated string, unclosed parens)
    Incomplete,
    /// Expression nesting exceeded the configured maximum depth
    TooDeeplyNested,
    /// Extra input found after a complete expression
    TrailingContent,
}

/// A structured error describing a reading failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a ParseError with context extracted from input at a given byte offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        // Offsets are bytes but the window is cut in chars
        let error_char = input
            .char_indices()
            .take_while(|&(index, _)| index < error_offset)
            .count();
        let context_start = error_char.saturating_sub(20);
        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.chars().count() < input.chars().count() {
            display_context.push_str("[...]");
        }
        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        let found = input
            .get(error_offset..)
            .and_then(|rest| rest.split_whitespace().next())
            .map(|token| token.chars().take(20).collect());

        Self::new(kind, message, Some(display_context), found)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(found) = &self.found {
            write!(f, "\nFound: {found}")?;
        }
        if let Some(context) = &self.context {
            write!(f, "\nContext: {context}")?;
        }
        Ok(())
    }
}

/// Error types for the reader and evaluator
///
/// Every evaluation failure aborts the whole evaluation in progress and surfaces
/// from the public entry point unchanged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("ParseError: {0}")]
    ParseError(ParseError),
    #[error("Unbound symbol: {0}")]
    UnboundSymbol(String),
    #[error("ArityError: '{callee}' expects {expected} argument(s), but was given {got}")]
    ArityMismatch {
        callee: String,
        expected: Arity,
        got: usize,
    },
    #[error("First item in list not a function: {0}")]
    NotCallable(String),
    #[error("Empty list cannot be evaluated")]
    EmptyList,
    #[error("Unknown form to evaluate: {0}")]
    UnknownForm(String),
    #[error("No matching cond clause: {0}")]
    NoMatchingClause(String),
    #[error("Not a symbol: {0}")]
    NotASymbol(String),
    #[error("Not a list: {0}")]
    NotAList(String),
    #[error("Malformed '{form}': {reason}")]
    MalformedForm { form: &'static str, reason: String },
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("EvaluationError: {0}")]
    EvalError(String),
    #[error("Evaluation depth limit exceeded (max: {0})")]
    DepthExceeded(usize),
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    pub(crate) fn arity(callee: impl Into<String>, expected: Arity, got: usize) -> Self {
        Error::ArityMismatch {
            callee: callee.into(),
            expected,
            got,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

pub mod ast;
pub mod builtinops;
pub mod evaluator;

#[cfg(feature = "reader")]
pub mod reader;
