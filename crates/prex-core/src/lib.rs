//! # prex-core
//!
//! Embeddable predicate expression language: a host supplies an expression
//! string and an environment of named values, and gets back a single value
//! or a diagnostic.
//!
//! ## Module Roles
//!
//! | Module | Responsibility | Public Entry Points |
//! |---|---|---|
//! | `lexer` | Byte-oriented token stream | [`Lexer`] |
//! | `parser` | Pratt expression parser | [`Parser`] |
//! | `value` | Runtime value model + host conversion | [`Value`] |
//! | `env` | Per-evaluation bindings | [`Environment`] |
//! | `compiler` | Tree -> bytecode | [`Compiler`] |
//! | `program` | Opcodes, encoding, disassembler | [`Program`], [`Opcode`] |
//! | `vm` | Stack-based interpreter | [`Vm`] |
//!
//! ## Execution Contract
//!
//! 1. Parse and compile once ([`compile`]).
//! 2. Evaluate many times against different environments ([`run`]).
//!
//! A compiled [`Program`] is immutable; different threads may evaluate it
//! concurrently as long as each uses its own [`Vm`].
//!
//! ## Hello World
//!
//! ```
//! use prex_core::{eval, Environment};
//! use serde_json::json;
//!
//! let env = Environment::from_json(&json!({
//!     "user": {"email": "Test@Email.com", "roles": ["admin", "beta"]},
//! }))
//! .expect("env");
//!
//! let out = eval(
//!     r#"lower(user.email) ew "@email.com" or "beta" in user.roles"#,
//!     &env,
//! )
//! .expect("eval");
//! assert_eq!(out, json!(true));
//! ```
//!
//! ## Host Callables
//!
//! ```
//! use prex_core::{eval, Environment, Value};
//! use serde_json::json;
//!
//! let mut env = Environment::new();
//! env.set_fn("reverse", |args| {
//!     let s = args.first().and_then(Value::as_str).unwrap_or_default();
//!     Ok(Value::from(s.chars().rev().collect::<String>()))
//! });
//!
//! let out = eval(r#"reverse("abc")"#, &env).expect("eval");
//! assert_eq!(out, json!("cba"));
//! ```

pub mod ast;
mod builtin;
pub mod compiler;
pub mod env;
pub mod lexer;
pub mod parser;
pub mod program;
pub mod token;
pub mod value;
pub mod vm;

pub use ast::Node;
pub use compiler::{CompileError, Compiler};
pub use env::Environment;
pub use lexer::Lexer;
pub use parser::{ParseError, Parser};
pub use program::{Opcode, Program};
pub use token::{Token, TokenKind};
pub use value::{ConvertError, NativeFn, Value};
pub use vm::{RuntimeError, Vm};

/// Any failure from the compile/run pipeline or the host boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
}

/// Parse and compile an expression.
pub fn compile(input: &str) -> Result<Program, Error> {
    let node = Parser::new(input).parse()?;
    let program = Compiler::new().compile(&node)?;
    Ok(program)
}

/// Evaluate a compiled program against an environment, converting the result
/// back to a host value.
pub fn run(program: &Program, env: &Environment) -> Result<serde_json::Value, Error> {
    let out = Vm::new(program, env).run()?;
    let value = serde_json::Value::try_from(&out)?;
    Ok(value)
}

/// Compile and evaluate in one step.
pub fn eval(input: &str, env: &Environment) -> Result<serde_json::Value, Error> {
    let program = compile(input)?;
    run(&program, env)
}
