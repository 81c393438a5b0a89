//! Special forms: syntax the evaluator handles itself, with unevaluated operands.

use std::rc::Rc;

use tracing::debug;

use super::trampoline::{Packet, bounce, respond};
use super::{Env, Environment, Evaluator, Expansion};
use crate::Error;
use crate::ast::{Function, Node};
use crate::builtinops::Arity;

/// Name given to functions created by `fn`/`macro` until `def` binds them
const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpecialForm {
    Quote,
    If,
    Cond,
    Def,
    Update,
    Fn,
    Macro,
    Let,
    Begin,
    Apply,
    Eval,
    Macroexpand1,
}

impl SpecialForm {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        let form = match name {
            "quote" => SpecialForm::Quote,
            "if" => SpecialForm::If,
            "cond" => SpecialForm::Cond,
            "def" => SpecialForm::Def,
            "update!" => SpecialForm::Update,
            "fn" => SpecialForm::Fn,
            "macro" => SpecialForm::Macro,
            "let" => SpecialForm::Let,
            "begin" => SpecialForm::Begin,
            "apply" => SpecialForm::Apply,
            "eval" => SpecialForm::Eval,
            "macroexpand1" => SpecialForm::Macroexpand1,
            _ => return None,
        };
        Some(form)
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            SpecialForm::Quote => "quote",
            SpecialForm::If => "if",
            SpecialForm::Cond => "cond",
            SpecialForm::Def => "def",
            SpecialForm::Update => "update!",
            SpecialForm::Fn => "fn",
            SpecialForm::Macro => "macro",
            SpecialForm::Let => "let",
            SpecialForm::Begin => "begin",
            SpecialForm::Apply => "apply",
            SpecialForm::Eval => "eval",
            SpecialForm::Macroexpand1 => "macroexpand1",
        }
    }

    /// Number of operands the form takes, not counting the form name
    fn arity(self) -> Arity {
        match self {
            SpecialForm::Quote | SpecialForm::Eval | SpecialForm::Macroexpand1 => Arity::Exact(1),
            SpecialForm::Def
            | SpecialForm::Update
            | SpecialForm::Fn
            | SpecialForm::Macro
            | SpecialForm::Let
            | SpecialForm::Apply => Arity::Exact(2),
            SpecialForm::If => Arity::Exact(3),
            SpecialForm::Cond => Arity::Any,
            SpecialForm::Begin => Arity::AtLeast(1),
        }
    }
}

fn symbol_name(node: &Node) -> Result<&str, Error> {
    match node {
        Node::Symbol(name) => Ok(name),
        other => Err(Error::NotASymbol(other.to_string())),
    }
}

fn list_items(node: &Node) -> Result<&[Node], Error> {
    match node {
        Node::List(items) => Ok(items),
        other => Err(Error::NotAList(other.to_string())),
    }
}

impl Evaluator {
    /// Dispatch a special form; `items` is the whole form including its name
    pub(super) fn eval_special(
        &self,
        form: SpecialForm,
        env: Env,
        items: &Rc<[Node]>,
    ) -> Result<Packet<'_>, Error> {
        let args = &items[1..];
        form.arity().validate(form.name(), args.len())?;

        match form {
            SpecialForm::Quote => respond(args[0].clone()),
            SpecialForm::If => self.eval_if(env, args),
            SpecialForm::Cond => self.eval_cond(env, items),
            SpecialForm::Def => self.eval_def(&env, args),
            SpecialForm::Update => self.eval_update(&env, args),
            SpecialForm::Fn => make_function(env, args, false),
            SpecialForm::Macro => make_function(env, args, true),
            SpecialForm::Let => self.eval_let(&env, args),
            SpecialForm::Begin => self.eval_begin(env, args),
            SpecialForm::Apply => self.eval_apply(env, args),
            SpecialForm::Eval => {
                let form = self.force(&env, &args[0])?;
                respond(self.force(&env, &form)?)
            }
            SpecialForm::Macroexpand1 => self.macroexpand1(env, &args[0]),
        }
    }

    fn eval_if(&self, env: Env, args: &[Node]) -> Result<Packet<'_>, Error> {
        let predicate = self.force(&env, &args[0])?;
        let branch = if predicate.is_truthy() {
            args[1].clone()
        } else {
            args[2].clone()
        };
        bounce(move || self.eval_node(env, branch))
    }

    fn eval_cond(&self, env: Env, items: &Rc<[Node]>) -> Result<Packet<'_>, Error> {
        let clauses = &items[1..];
        if clauses.len() % 2 != 0 {
            return Err(Error::MalformedForm {
                form: "cond",
                reason: "expects predicate/result pairs".into(),
            });
        }

        for clause in clauses.chunks_exact(2) {
            if self.force(&env, &clause[0])?.is_truthy() {
                let result = clause[1].clone();
                return bounce(move || self.eval_node(env, result));
            }
        }
        Err(Error::NoMatchingClause(Node::List(Rc::clone(items)).to_string()))
    }

    fn eval_def(&self, env: &Env, args: &[Node]) -> Result<Packet<'_>, Error> {
        let name = symbol_name(&args[0])?;
        let value = match self.force(env, &args[1])? {
            Node::Function(function) if function.name == ANONYMOUS => {
                Node::Function(Rc::new(function.renamed(name)))
            }
            other => other,
        };
        debug!(name, env = env.name(), "def");
        env.set(name, value);
        respond(Node::Nil)
    }

    fn eval_update(&self, env: &Env, args: &[Node]) -> Result<Packet<'_>, Error> {
        let name = symbol_name(&args[0])?;
        let value = self.force(env, &args[1])?;
        env.update(name, value)?;
        respond(Node::Nil)
    }

    /// Bindings are flat name/value pairs, each visible to the ones after it
    fn eval_let(&self, env: &Env, args: &[Node]) -> Result<Packet<'_>, Error> {
        let bindings = list_items(&args[0])?;
        if bindings.len() % 2 != 0 {
            return Err(Error::MalformedForm {
                form: "let",
                reason: "bindings must come in name/value pairs".into(),
            });
        }

        let frame = Environment::with_parent("let", env);
        for pair in bindings.chunks_exact(2) {
            let name = symbol_name(&pair[0])?;
            let value = self.force(&frame, &pair[1])?;
            frame.set(name, value);
        }
        let body = args[1].clone();
        bounce(move || self.eval_node(frame, body))
    }

    fn eval_begin(&self, env: Env, args: &[Node]) -> Result<Packet<'_>, Error> {
        let Some((last, init)) = args.split_last() else {
            return Err(Error::arity("begin", Arity::AtLeast(1), 0));
        };
        for node in init {
            self.force(&env, node)?;
        }
        let last = last.clone();
        bounce(move || self.eval_node(env, last))
    }

    /// `(apply f xs)` evaluates as `(f x1 x2 ...)`, so the list elements are
    /// evaluated again as operands
    fn eval_apply(&self, env: Env, args: &[Node]) -> Result<Packet<'_>, Error> {
        let target = self.force(&env, &args[1])?;
        let elements = list_items(&target)?;

        let mut call = Vec::with_capacity(elements.len() + 1);
        call.push(args[0].clone());
        call.extend(elements.iter().cloned());
        let call: Rc<[Node]> = call.into();

        let result = self.run(Box::new(move || self.eval_list(env, call)))?;
        respond(result)
    }

    /// Expand a macro call one step without evaluating the expansion
    fn macroexpand1(&self, env: Env, form: &Node) -> Result<Packet<'_>, Error> {
        let Node::List(call) = form else {
            return respond(form.clone());
        };
        let Some(head) = call.first() else {
            return respond(form.clone());
        };
        if matches!(head, Node::Symbol(name) if SpecialForm::from_name(name).is_some()) {
            return respond(form.clone());
        }

        match self.force(&env, head)? {
            Node::Function(function) if function.is_macro => {
                self.apply_function(env, function, Rc::clone(call), Expansion::Return)
            }
            _ => respond(form.clone()),
        }
    }
}

fn make_function<'a>(env: Env, args: &[Node], is_macro: bool) -> Result<Packet<'a>, Error> {
    let params = list_items(&args[0])?;
    let function = Function::new(ANONYMOUS, params, args[1].clone(), env, is_macro)?;
    respond(Node::Function(Rc::new(function)))
}
