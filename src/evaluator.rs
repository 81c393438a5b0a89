use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::ast::{Function, Node, REST_MARKER};
use crate::builtinops::{OutputSink, install_builtins};
use crate::{Error, MAX_EVAL_DEPTH};

mod environment;
mod special_forms;
mod trampoline;

pub use environment::{Env, Environment};

use special_forms::SpecialForm;
use trampoline::{Packet, Thunk, bounce, respond, trampoline};

#[cfg(not(target_arch = "wasm32"))]
/// Remaining stack below which a nested evaluation grows the stack first
const RED_ZONE: usize = 100 * 1024;

#[cfg(not(target_arch = "wasm32"))]
/// Stack segment allocated per growth
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// Run `f` with at least [`RED_ZONE`] bytes of stack available
#[inline]
#[cfg(not(target_arch = "wasm32"))]
fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}

/// Evaluation limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalConfig {
    /// Maximum number of nested synchronous evaluations
    pub max_depth: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            max_depth: MAX_EVAL_DEPTH,
        }
    }
}

/// What to do with a macro's expansion once the macro body has produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expansion {
    /// Evaluate the expansion in the caller's environment
    Evaluate,
    /// Hand the expansion back unevaluated (`macroexpand1`)
    Return,
}

/// Trampolined evaluator
///
/// Holds the configuration and the current nesting depth of synchronous evaluations.
/// One evaluator may be reused for any number of top-level evaluations.
#[derive(Debug, Default)]
pub struct Evaluator {
    config: EvalConfig,
    depth: Cell<usize>,
}

/// Evaluate a node (public API)
pub fn eval(node: &Node, env: &Env) -> Result<Node, Error> {
    Evaluator::default().eval(node, env)
}

/// Evaluate a node with explicit limits
pub fn eval_with_config(node: &Node, env: &Env, config: &EvalConfig) -> Result<Node, Error> {
    Evaluator::new(*config).eval(node, env)
}

/// Create a global environment with the builtin primitives, printing to stdout
pub fn create_global_env() -> Env {
    create_global_env_with_output(Rc::new(RefCell::new(std::io::stdout())))
}

/// Create a global environment with the builtin primitives, printing to `sink`
pub fn create_global_env_with_output(sink: OutputSink) -> Env {
    let env = Environment::new_global();
    install_builtins(&env, sink);
    env
}

impl Evaluator {
    pub fn new(config: EvalConfig) -> Self {
        Evaluator {
            config,
            depth: Cell::new(0),
        }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Evaluate `node` in `env` to a final value
    ///
    /// This is the single place evaluation failures leave the evaluator.
    pub fn eval(&self, node: &Node, env: &Env) -> Result<Node, Error> {
        debug!(form = %node, env = env.name(), "evaluating");
        self.force(env, node)
    }

    /// Evaluate to completion outside tail position
    fn force(&self, env: &Env, node: &Node) -> Result<Node, Error> {
        match self.eval_node(Rc::clone(env), node.clone())? {
            Packet::Respond(value) => Ok(value),
            Packet::Bounce(thunk) => self.run(thunk),
        }
    }

    /// Run a nested trampoline, counting it against the depth limit
    ///
    /// Each level grows the host stack on demand, so the limit is reported as
    /// [`Error::DepthExceeded`] rather than a stack overflow.
    fn run<'a>(&'a self, start: Thunk<'a>) -> Result<Node, Error> {
        let depth = self.depth.get();
        if depth >= self.config.max_depth {
            warn!(max_depth = self.config.max_depth, "evaluation depth limit exceeded");
            return Err(Error::DepthExceeded(self.config.max_depth));
        }
        self.depth.set(depth + 1);
        let result = ensure_sufficient_stack(|| trampoline(start));
        self.depth.set(depth);
        result
    }

    fn eval_each(&self, env: &Env, nodes: &[Node]) -> Result<Vec<Node>, Error> {
        nodes.iter().map(|node| self.force(env, node)).collect()
    }

    fn eval_node(&self, env: Env, node: Node) -> Result<Packet<'_>, Error> {
        match node {
            Node::Number(_) | Node::String(_) | Node::Char(_) | Node::Bool(_) => respond(node),
            Node::Symbol(name) => respond(env.get(&name)?),
            Node::Nil => respond(Node::Nil),
            Node::List(items) => bounce(move || self.eval_list(env, items)),
            Node::Function(_) | Node::Primitive(_) => Err(Error::UnknownForm(node.to_string())),
        }
    }

    fn eval_list(&self, env: Env, items: Rc<[Node]>) -> Result<Packet<'_>, Error> {
        let Some((head, args)) = items.split_first() else {
            return Err(Error::EmptyList);
        };

        if let Node::Symbol(name) = head {
            if let Some(form) = SpecialForm::from_name(name) {
                return self.eval_special(form, env, &items);
            }
        }

        match self.force(&env, head)? {
            Node::Primitive(primitive) => {
                primitive.arity.validate(&primitive.name, args.len())?;
                let evaluated = self.eval_each(&env, args)?;
                respond((primitive.func)(&env, head, evaluated)?)
            }
            Node::Function(function) => {
                bounce(move || self.apply_function(env, function, items, Expansion::Evaluate))
            }
            other => Err(Error::NotCallable(other.to_string())),
        }
    }

    /// Apply a user function or macro to the arguments of `call`
    ///
    /// The callee's frame hangs off its defining environment; ordinary arguments are
    /// evaluated in the caller's environment, macro arguments are passed as written.
    fn apply_function(
        &self,
        dynamic: Env,
        function: Rc<Function>,
        call: Rc<[Node]>,
        expansion: Expansion,
    ) -> Result<Packet<'_>, Error> {
        let unevaluated = &call[1..];
        function
            .arity()
            .validate(&function.name, unevaluated.len())?;
        trace!(
            function = %function.name,
            argc = unevaluated.len(),
            is_macro = function.is_macro,
            "applying"
        );

        let lexical = Environment::with_parent(function.name.as_str(), &function.parent);
        let args = if function.is_macro {
            unevaluated.to_vec()
        } else {
            self.eval_each(&dynamic, unevaluated)?
        };
        bind_parameters(&lexical, &function.params, args);

        if !function.is_macro {
            let body = function.body.clone();
            return bounce(move || self.eval_node(lexical, body));
        }

        let expanded = self.force(&lexical, &function.body)?;
        trace!(function = %function.name, expansion = %expanded, "macro expanded");
        match expansion {
            // Runs in the caller's environment, not the macro's
            Expansion::Evaluate => bounce(move || self.eval_node(dynamic, expanded)),
            Expansion::Return => respond(expanded),
        }
    }
}

/// Bind prepared arguments to parameter names; arity has already been checked
fn bind_parameters(frame: &Env, params: &[String], args: Vec<Node>) {
    let marker = params.iter().position(|p| p == REST_MARKER);
    let fixed = &params[..marker.unwrap_or(params.len())];

    let mut args = args.into_iter();
    for (param, arg) in fixed.iter().zip(args.by_ref()) {
        frame.set(param.as_str(), arg);
    }
    if let Some(rest_name) = marker.and_then(|m| params.get(m + 1)) {
        frame.set(rest_name.as_str(), Node::list(args.collect()));
    }
}


#[cfg(all(test, feature = "reader"))]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{list, nil, sym, val};
    use crate::builtinops::Arity;
    use crate::reader::{parse, parse_program};

    /// Test result variants for comprehensive testing
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Node),            // Evaluation should succeed with this value
        SpecificError(&'static str), // Evaluation should fail with error containing this string
        Error,                       // Evaluation should fail (any error)
    }
    use TestResult::{Error, EvalResult, SpecificError};

    /// Test environment containing test cases that share state
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    fn success<T: Into<Node>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    /// Macro for setup expressions that return nil (like def)
    macro_rules! test_setup {
        ($expr:expr) => {
            ($expr, EvalResult(Node::Nil))
        };
    }

    fn test_env() -> Env {
        create_global_env_with_output(Rc::new(RefCell::new(Vec::new())))
    }

    /// Run tests in isolated environments with shared state
    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let env = test_env();
            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(input, expected, &env, &test_id);
            }
        }
    }

    /// Execute a single test case with detailed error reporting
    fn execute_test_case(input: &str, expected: &TestResult, env: &Env, test_id: &str) {
        let expr = match parse(input) {
            Ok(expr) => expr,
            Err(parse_err) => {
                panic!("{test_id}: unexpected parse error for '{input}': {parse_err:?}");
            }
        };

        match (eval(&expr, env), expected) {
            (Ok(actual), EvalResult(expected_val)) => {
                assert_eq!(actual, *expected_val, "{test_id}: '{input}'");
            }
            (Err(_), Error) => {}
            (Err(e), SpecificError(expected_text)) => {
                let error_msg = format!("{e}");
                assert!(
                    error_msg.contains(expected_text),
                    "{test_id}: error should contain '{expected_text}', got: {error_msg}"
                );
            }
            (Ok(actual), Error) => {
                panic!("{test_id}: expected error for '{input}', got {actual:?}");
            }
            (Ok(actual), SpecificError(expected_text)) => {
                panic!("{test_id}: expected error containing '{expected_text}', got {actual:?}");
            }
            (Err(err), EvalResult(expected_val)) => {
                panic!("{test_id}: '{input}' expected {expected_val:?}, got error {err:?}");
            }
        }
    }

    /// Each case in its own fresh environment
    fn run_comprehensive_tests(test_cases: Vec<(&str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let env = test_env();
            execute_test_case(input, expected, &env, &format!("#{}", i + 1));
        }
    }

    fn eval_str(input: &str, env: &Env) -> Result<Node, crate::Error> {
        let mut result = Node::Nil;
        for form in parse_program(input)? {
            result = eval(&form, env)?;
        }
        Ok(result)
    }

    #[test]
    fn test_comprehensive_special_forms_data_driven() {
        let test_cases = vec![
            // === SELF-EVALUATING FORMS ===
            ("42", success(42)),
            ("-7", success(-7)),
            ("\"hello\"", success("hello")),
            ("#\\a", success('a')),
            ("#t", success(true)),
            ("nil", EvalResult(nil())),
            // === QUOTE ===
            ("'x", EvalResult(sym("x"))),
            ("(quote (if a b))", EvalResult(list(vec![sym("if"), sym("a"), sym("b")]))),
            ("(quote ())", EvalResult(list(vec![]))),
            ("(quote)", SpecificError("'quote' expects exactly 1")),
            ("(quote a b)", SpecificError("ArityError")),
            // === IF ===
            ("(if #t 1 2)", success(1)),
            ("(if #f 1 2)", success(2)),
            ("(if nil 1 2)", success(2)),
            ("(if 0 1 2)", success(1)),
            ("(if '() 1 2)", success(1)),
            ("(if \"\" 1 2)", success(1)),
            ("(if #f (undefined) 2)", success(2)),
            ("(if #t 1)", SpecificError("'if' expects exactly 3")),
            // === COND ===
            ("(cond #f 1 #t 2)", success(2)),
            ("(cond (= 1 1) 'one #t 'other)", EvalResult(sym("one"))),
            ("(cond nil 1 #f 2)", SpecificError("No matching cond clause")),
            ("(cond)", SpecificError("No matching cond clause")),
            ("(cond #t)", SpecificError("Malformed 'cond'")),
            // === FN / MACRO ===
            ("((fn (x) (* x x)) 7)", success(49)),
            ("((fn () 5))", success(5)),
            ("((fn (a &rest b) b) 1 2 3)", success([2, 3])),
            ("((fn (a &rest b) b) 1)", EvalResult(list(vec![]))),
            ("((fn (a &rest b) a))", SpecificError("ArityError")),
            ("((fn (a b) a) 1)", SpecificError("ArityError")),
            ("((fn (a b) a) 1 2 3)", SpecificError("ArityError")),
            ("(fn (1) 1)", SpecificError("Not a symbol")),
            ("(fn x 1)", SpecificError("Not a list")),
            ("((macro (x) x) (+ 1 2))", success(3)),
            // === LET ===
            ("(let (a 1 b a) b)", success(1)),
            ("(let (a b b 1) a)", SpecificError("Unbound symbol: b")),
            ("(let (a 1 a (+ a 1)) a)", success(2)),
            ("(let () 5)", success(5)),
            ("(let (a) a)", SpecificError("Malformed 'let'")),
            ("(let (1 2) 3)", SpecificError("Not a symbol")),
            ("(let x 1)", SpecificError("Not a list")),
            // === BEGIN ===
            ("(begin 1 2 3)", success(3)),
            ("(begin)", SpecificError("'begin' expects at least 1")),
            // === APPLY ===
            ("(apply + '(1 2 3))", success(6)),
            ("(apply (fn (&rest xs) xs) (list 1 2))", success([1, 2])),
            ("(apply + 5)", SpecificError("Not a list: 5")),
            ("(apply + nil)", SpecificError("Not a list")),
            // === EVAL ===
            ("(eval '(+ 1 2))", success(3)),
            ("(eval (list '* 2 3))", success(6)),
            ("(eval ''x)", EvalResult(sym("x"))),
            // === APPLICATION ERRORS ===
            ("()", SpecificError("Empty list")),
            ("(1 2 3)", SpecificError("First item in list not a function: 1")),
            ("(\"f\")", SpecificError("not a function")),
            ("(undefined-fn 1)", SpecificError("Unbound symbol: undefined-fn")),
            ("(+ 1 2 3)", success(6)),
            ("(- 1)", success(-1)),
            ("(not)", SpecificError("'not' expects exactly 1")),
            ("(+ 1 \"a\")", SpecificError("Type error")),
            ("(error \"boom\" 1)", SpecificError("boom 1")),
        ];

        run_comprehensive_tests(test_cases);
    }

    #[test]
    fn test_definitions_and_updates_in_shared_environment() {
        let environments = vec![
            TestEnvironment(vec![
                test_setup!("(def x 1)"),
                ("x", success(1)),
                test_setup!("(def x 2)"),
                ("x", success(2)),
                test_setup!("(update! x (+ x 1))"),
                ("x", success(3)),
                ("(update! y 1)", SpecificError("Unbound symbol: y")),
                ("(def 1 2)", SpecificError("Not a symbol")),
                ("(update! \"x\" 2)", SpecificError("Not a symbol")),
            ]),
            TestEnvironment(vec![
                // def inside a function body binds in the call frame only
                test_setup!("(def x 'outer)"),
                test_setup!("(def shadow (fn () (begin (def x 'inner) x)))"),
                ("(shadow)", EvalResult(sym("inner"))),
                ("x", EvalResult(sym("outer"))),
                // update! reaches the outer binding
                test_setup!("(def poke (fn () (update! x 'poked)))"),
                ("(poke)", EvalResult(nil())),
                ("x", EvalResult(sym("poked"))),
            ]),
            TestEnvironment(vec![
                test_setup!("(def square (fn (n) (* n n)))"),
                ("(square 5)", success(25)),
                ("(square)", SpecificError("'square' expects exactly 1")),
            ]),
        ];

        run_tests_in_environment(environments);
    }

    #[test]
    fn test_def_names_anonymous_functions() {
        let env = test_env();
        eval_str("(def square (fn (n) (* n n)))", &env).unwrap();
        assert_eq!(eval_str("square", &env).unwrap().to_string(), "#<function:square>");

        eval_str("(def alias square)", &env).unwrap();
        assert_eq!(eval_str("alias", &env).unwrap().to_string(), "#<function:square>");

        eval_str("(def m (macro (x) x))", &env).unwrap();
        assert_eq!(eval_str("m", &env).unwrap().to_string(), "#<macro:m>");
    }

    #[test]
    fn test_lexical_scoping_ignores_call_site_bindings() {
        let env = test_env();
        let result = eval_str(
            "(def x 'definition)
             (def get-x (fn () x))
             (def call-with-x (fn (x) (get-x)))
             (call-with-x 'call-site)",
            &env,
        )
        .unwrap();
        assert_eq!(result, sym("definition"));

        let result = eval_str(
            "(def make-adder (fn (n) (fn (m) (+ n m))))
             (def add5 (make-adder 5))
             (let (n 100) (add5 1))",
            &env,
        )
        .unwrap();
        assert_eq!(result, val(6));
    }

    #[test]
    fn test_closures_share_mutable_frames() {
        let env = test_env();
        let result = eval_str(
            "(def make-counter
               (fn ()
                 (let (count 0)
                   (list (fn () (begin (update! count (+ count 1)) count))
                         (fn () count)))))
             (def pair (make-counter))
             (def bump (first pair))
             (def peek (first (rest pair)))
             (bump)
             (bump)
             (peek)",
            &env,
        )
        .unwrap();
        assert_eq!(result, val(2));
    }

    #[test]
    fn test_macro_expansion_and_non_hygiene() {
        let env = test_env();
        let result = eval_str(
            "(def unless (macro (c body) (list 'if c nil body)))
             (unless #f 'ran)",
            &env,
        )
        .unwrap();
        assert_eq!(result, sym("ran"));

        // Expansion runs in the caller's environment and sees its `x`
        let result = eval_str(
            "(def with-x (macro (body) (list 'let (list 'x 10) body)))
             (def x 1)
             (with-x (+ x 1))",
            &env,
        )
        .unwrap();
        assert_eq!(result, val(11));

        // A macro's free reference resolves at the call site, not the definition site
        let result = eval_str(
            "(def get-y (macro () 'y))
             (def y 'global)
             (let (y 'local) (get-y))",
            &env,
        )
        .unwrap();
        assert_eq!(result, sym("local"));
    }

    #[test]
    fn test_variadic_macro() {
        let env = test_env();
        let result = eval_str(
            "(def do-all (macro (&rest forms) (cons 'begin forms)))
             (do-all (def a 1) (def b 2) (+ a b))",
            &env,
        )
        .unwrap();
        assert_eq!(result, val(3));
    }

    #[test]
    fn test_macroexpand1_single_step() {
        let env = test_env();
        eval_str(
            "(def unless (macro (c body) (list 'if c nil body)))
             (def twice-unless (macro (c body) (list 'unless c (list 'unless c body))))",
            &env,
        )
        .unwrap();

        assert_eq!(
            eval_str("(macroexpand1 (unless #f 42))", &env).unwrap(),
            parse("(if #f nil 42)").unwrap()
        );
        // Only the outermost call is expanded
        assert_eq!(
            eval_str("(macroexpand1 (twice-unless c x))", &env).unwrap(),
            parse("(unless c (unless c x))").unwrap()
        );
        // Non-macro forms come back unchanged
        for form in ["(+ 1 2)", "(if a b c)", "x", "42"] {
            assert_eq!(
                eval_str(&format!("(macroexpand1 {form})"), &env).unwrap(),
                parse(form).unwrap(),
                "{form}"
            );
        }
    }

    #[test]
    fn test_apply_matches_direct_call() {
        let env = test_env();
        eval_str("(def f (fn (a b c) (list c b a)))", &env).unwrap();
        assert_eq!(
            eval_str("(apply f (quote (1 2 3)))", &env).unwrap(),
            eval_str("(f 1 2 3)", &env).unwrap()
        );
        assert!(matches!(
            eval_str("(apply f '(1 2))", &env),
            Err(crate::Error::ArityMismatch { got: 2, .. })
        ));
    }

    #[test]
    fn test_arity_of_primitive_range() {
        let env = test_env();
        env.register_primitive("clamp", Arity::Range(1, 2), |_env, _head, args| {
            Ok(args[0].clone())
        });
        assert_eq!(eval_str("(clamp 1)", &env).unwrap(), val(1));
        assert_eq!(
            eval_str("(clamp 1 2 3)", &env),
            Err(crate::Error::ArityMismatch {
                callee: "clamp".into(),
                expected: Arity::Range(1, 2),
                got: 3,
            })
        );
    }

    #[test]
    fn test_recursion_through_tail_positions() {
        let env = test_env();
        let result = eval_str(
            "(def sum-to
               (fn (n acc)
                 (let (next (- n 1))
                   (begin
                     (cond (= n 0) acc
                           #t (if #t (sum-to next (+ acc n)) nil))))))
             (sum-to 10000 0)",
            &env,
        )
        .unwrap();
        assert_eq!(result, val(50005000));
    }

    #[test]
    fn test_non_tail_recursion_within_depth() {
        let env = test_env();
        let result = eval_str(
            "(def fact (fn (n) (if (= n 0) 1 (* n (fact (- n 1))))))
             (fact 20)",
            &env,
        )
        .unwrap();
        assert_eq!(result, val(2432902008176640000_i64));

        let deep = Evaluator::new(EvalConfig { max_depth: 30 });
        let form = parse("(fact 50)").unwrap();
        assert!(matches!(
            deep.eval(&form, &env),
            Err(crate::Error::DepthExceeded(30))
        ));
    }
}
