use bouncelisp::ast::Node;
use bouncelisp::evaluator::{self, Env, Evaluator};
use bouncelisp::reader::parse_program;
use bouncelisp::{Error, ParseErrorKind};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

fn run_repl() {
    println!("bouncelisp: a small trampolined Lisp");
    println!("Enter expressions like: (def sq (fn (x) (* x x))) (sq 12)");
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("Could not initialize REPL: {err}");
            process::exit(1);
        }
    };
    let env = evaluator::create_global_env();
    let evaluator = Evaluator::default();

    // Lines accumulate here until they read as complete forms
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { "lisp> " } else { "  ... " };
        match rl.readline(prompt) {
            Ok(line) => {
                if pending.is_empty() {
                    let command = line.trim();
                    if command.is_empty() {
                        continue;
                    }
                    match command {
                        ":help" => {
                            print_help();
                            continue;
                        }
                        ":env" => {
                            print_environment(&env);
                            continue;
                        }
                        ":quit" | ":exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                }

                pending.push_str(&line);
                pending.push('\n');

                let forms = match parse_program(&pending) {
                    Ok(forms) => forms,
                    Err(Error::ParseError(err)) if err.kind == ParseErrorKind::Incomplete => {
                        continue;
                    }
                    Err(err) => {
                        println!("Error: {err}");
                        pending.clear();
                        continue;
                    }
                };
                let _ = rl.add_history_entry(pending.trim_end());
                pending.clear();

                for form in forms {
                    match evaluator.eval(&form, &env) {
                        // nil results (def, update!, println) are not echoed
                        Ok(Node::Nil) => {}
                        Ok(value) => println!("{value}"),
                        Err(e) => {
                            println!("Error: {e}");
                            break;
                        }
                    }
                }
            }

            Err(ReadlineError::Interrupted) => {
                if !pending.is_empty() {
                    pending.clear();
                    continue;
                }
                println!("Goodbye!");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_help() {
    println!("Commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Discard a partial entry");
    println!("  Ctrl+D     - Exit the interpreter");
    println!();
    println!("Special forms:");
    println!("  quote if cond def update! fn macro let begin apply eval macroexpand1");
    println!();
    println!("Values:");
    println!("  Numbers: 42, -5   Strings: \"hi\"   Characters: #\\a #\\space");
    println!("  Booleans: #t #f   Nil: nil   Lists: '(1 2 3)");
    println!("  Only nil and #f are false");
    println!();
    println!("Examples:");
    println!("  (def fact (fn (n) (if (= n 0) 1 (* n (fact (- n 1))))))");
    println!("  (def unless (macro (c body) (list 'if c nil body)))");
    println!("  ((fn (a &rest more) more) 1 2 3)");
    println!();
}

fn print_environment(env: &Env) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    let (primitives, user_defined): (Vec<_>, Vec<_>) = bindings
        .into_iter()
        .partition(|(_, value)| matches!(value, Node::Primitive(_)));

    if !primitives.is_empty() {
        println!("Primitives ({}):", primitives.len());
        // Print in columns for readability
        let mut col = 0;
        for (name, _) in primitives {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
