//! Stack-based virtual machine. A single dispatch loop walks the instruction
//! stream against a bounded operand stack; the environment is read-only for
//! the whole run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::builtin;
use crate::env::Environment;
use crate::program::{read_u16, Opcode, Program};
use crate::value::{coerce, Value};

pub(crate) const STACK_SIZE: usize = 2048;

/// Evaluation failure. Host callables return the same type, so it carries a
/// plain message rather than a closed set of causes.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub struct Vm<'a> {
    program: &'a Program,
    env: &'a Environment,
    stack: Vec<Value>,
    sp: usize,
}

impl<'a> Vm<'a> {
    pub fn new(program: &'a Program, env: &'a Environment) -> Self {
        Self {
            program,
            env,
            stack: vec![Value::Null; STACK_SIZE],
            sp: 0,
        }
    }

    pub fn run(&mut self) -> Result<Value, RuntimeError> {
        let program = self.program;
        let ins = program.instructions.as_slice();
        let mut ip = 0;

        while ip < ins.len() {
            let op = Opcode::from_byte(ins[ip])
                .ok_or_else(|| RuntimeError::new(format!("invalid opcode: {}", ins[ip])))?;
            ip += 1;

            match op {
                Opcode::Constant => {
                    let idx = read_u16(ins, ip) as usize;
                    ip += 2;
                    let value = program.constants.get(idx).cloned().ok_or_else(|| {
                        RuntimeError::new(format!("constant index out of range: {idx}"))
                    })?;
                    self.push(value)?;
                }

                Opcode::Array => {
                    let len = read_u16(ins, ip) as usize;
                    ip += 2;
                    self.exec_array(len)?;
                }

                Opcode::True => self.push(Value::Bool(true))?,
                Opcode::False => self.push(Value::Bool(false))?,
                Opcode::Null => self.push(Value::Null)?,

                Opcode::Add
                | Opcode::Subtract
                | Opcode::Multiply
                | Opcode::Divide
                | Opcode::Modulus => self.exec_binary_op(op)?,

                Opcode::Equal | Opcode::NotEqual => self.exec_equality(op)?,

                Opcode::Less
                | Opcode::LessOrEqual
                | Opcode::Greater
                | Opcode::GreaterOrEqual
                | Opcode::And
                | Opcode::Or
                | Opcode::StartsWith
                | Opcode::EndsWith => self.exec_comparison(op)?,

                Opcode::In => self.exec_in()?,
                Opcode::Not => self.exec_not()?,
                Opcode::Minus => self.exec_minus()?,
                Opcode::Index => self.exec_index()?,

                Opcode::Global => {
                    let idx = ins[ip] as usize;
                    ip += 1;
                    let name = program.identifiers.get(idx).ok_or_else(|| {
                        RuntimeError::new(format!("identifier index out of range: {idx}"))
                    })?;
                    self.exec_identifier(name)?;
                }

                Opcode::Member => {
                    let idx = ins[ip] as usize;
                    ip += 1;
                    let name = program.identifiers.get(idx).ok_or_else(|| {
                        RuntimeError::new(format!("identifier index out of range: {idx}"))
                    })?;
                    self.exec_member(name)?;
                }

                Opcode::Call => {
                    let nargs = ins[ip] as usize;
                    ip += 1;
                    self.exec_call(nargs)?;
                }

                Opcode::JumpIfFalse | Opcode::JumpIfTrue => {
                    let target = read_u16(ins, ip) as usize;
                    ip += 2;

                    // Non-consuming: the branch decision reads the left
                    // operand and leaves it in place as the result when the
                    // jump fires.
                    let cond = match self.peek()? {
                        Value::Bool(b) => *b,
                        other => {
                            return Err(RuntimeError::new(format!(
                                "logical operand must be a boolean, got {}",
                                other.type_name()
                            )));
                        }
                    };

                    if (op == Opcode::JumpIfFalse && !cond) || (op == Opcode::JumpIfTrue && cond) {
                        ip = target;
                    }
                }
            }
        }

        if self.sp != 1 {
            return Err(RuntimeError::new(format!(
                "program left {} values on the stack",
                self.sp
            )));
        }
        Ok(self.stack[self.sp - 1].clone())
    }

    fn exec_array(&mut self, len: usize) -> Result<(), RuntimeError> {
        let mut elements = vec![Value::Null; len];
        for slot in elements.iter_mut().rev() {
            *slot = self.pop()?;
        }
        self.push(Value::Array(Arc::new(elements)))
    }

    fn exec_binary_op(&mut self, op: Opcode) -> Result<(), RuntimeError> {
        let right = self.pop()?;
        let left = self.pop()?;
        let (left, right) = coerce(left, right);

        let result = match (&left, &right) {
            (Value::Int(l), Value::Int(r)) => binary_int_op(op, *l, *r)?,
            (Value::Float(l), Value::Float(r)) => binary_float_op(op, *l, *r)?,
            (Value::Str(l), Value::Str(r)) => binary_string_op(op, l, r)?,
            _ => {
                return Err(RuntimeError::new(format!(
                    "unsupported types for binary operation: {}, {}",
                    left.type_name(),
                    right.type_name()
                )));
            }
        };

        self.push(result)
    }

    fn exec_equality(&mut self, op: Opcode) -> Result<(), RuntimeError> {
        let right = self.pop()?;
        let left = self.pop()?;
        let (left, right) = coerce(left, right);

        let equal = left == right;
        self.push(Value::Bool(if op == Opcode::Equal { equal } else { !equal }))
    }

    fn exec_comparison(&mut self, op: Opcode) -> Result<(), RuntimeError> {
        let right = self.pop()?;
        let left = self.pop()?;
        let (left, right) = coerce(left, right);

        let result = match (&left, &right) {
            (Value::Int(l), Value::Int(r)) => ordered_comparison(op, l, r)?,
            (Value::Float(l), Value::Float(r)) => ordered_comparison(op, l, r)?,
            (Value::Bool(l), Value::Bool(r)) => bool_comparison(op, *l, *r)?,
            (Value::Str(l), Value::Str(r)) => string_comparison(op, l, r)?,
            _ => {
                return Err(RuntimeError::new(format!(
                    "unsupported types for comparison: {}, {}",
                    left.type_name(),
                    right.type_name()
                )));
            }
        };

        self.push(Value::Bool(result))
    }

    fn exec_in(&mut self) -> Result<(), RuntimeError> {
        let right = self.pop()?;
        let left = self.pop()?;

        let result = match (&left, &right) {
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Str(l), Value::Str(r)) => r.contains(l.as_ref()),
            (_, Value::Array(items)) => items.iter().any(|item| item == &left),
            _ => {
                return Err(RuntimeError::new(format!(
                    "unsupported types for in operation: {} in {}",
                    left.type_name(),
                    right.type_name()
                )));
            }
        };

        self.push(Value::Bool(result))
    }

    /// `!` maps true to false, false to true, and everything else to false.
    fn exec_not(&mut self) -> Result<(), RuntimeError> {
        let value = self.pop()?;
        let result = matches!(value, Value::Bool(false));
        self.push(Value::Bool(result))
    }

    fn exec_minus(&mut self) -> Result<(), RuntimeError> {
        let value = self.pop()?;
        let negated = match value {
            Value::Null => Value::Null,
            Value::Int(n) => Value::Int(n.wrapping_neg()),
            Value::Float(f) => Value::Float(-f),
            other => {
                return Err(RuntimeError::new(format!(
                    "unsupported type for negation: {}",
                    other.type_name()
                )));
            }
        };
        self.push(negated)
    }

    fn exec_index(&mut self) -> Result<(), RuntimeError> {
        let index = self.pop()?;
        let left = self.pop()?;

        match (&left, &index) {
            (Value::Array(items), Value::Int(i)) => {
                let element = usize::try_from(*i)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .ok_or_else(|| RuntimeError::new(format!("index out of range: {i}")))?;
                self.push(element)
            }
            _ => Err(RuntimeError::new(format!(
                "index operator not supported: {}[{}]",
                left.type_name(),
                index.type_name()
            ))),
        }
    }

    /// Environment bindings shadow built-ins; unknown names evaluate to null.
    fn exec_identifier(&mut self, name: &str) -> Result<(), RuntimeError> {
        if let Some(value) = self.env.get(name) {
            let value = value.clone();
            return self.push(value);
        }
        if let Some(value) = builtin::lookup(name) {
            return self.push(value);
        }
        self.push(Value::Null)
    }

    fn exec_member(&mut self, name: &str) -> Result<(), RuntimeError> {
        let left = self.pop()?;

        match &left {
            Value::Map(map) => {
                let value = map.get(name).cloned().unwrap_or(Value::Null);
                self.push(value)
            }
            Value::Null => self.push(Value::Null),
            other => Err(RuntimeError::new(format!(
                "member access not supported: {}",
                other.type_name()
            ))),
        }
    }

    fn exec_call(&mut self, nargs: usize) -> Result<(), RuntimeError> {
        let mut args = vec![Value::Null; nargs];
        for slot in args.iter_mut().rev() {
            *slot = self.pop()?;
        }

        let callee = self.pop()?;
        match &callee {
            Value::Func(f) => {
                let result = f(&args)?;
                self.push(result)
            }
            other => Err(RuntimeError::new(format!(
                "not a function: {}",
                other.type_name()
            ))),
        }
    }

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.sp >= STACK_SIZE {
            return Err(RuntimeError::new("stack overflow"));
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        if self.sp == 0 {
            return Err(RuntimeError::new("stack underflow"));
        }
        self.sp -= 1;
        Ok(self.stack[self.sp].clone())
    }

    fn peek(&self) -> Result<&Value, RuntimeError> {
        if self.sp == 0 {
            return Err(RuntimeError::new("stack underflow"));
        }
        Ok(&self.stack[self.sp - 1])
    }
}

fn binary_int_op(op: Opcode, l: i64, r: i64) -> Result<Value, RuntimeError> {
    Ok(match op {
        Opcode::Add => Value::Int(l.wrapping_add(r)),
        Opcode::Subtract => Value::Int(l.wrapping_sub(r)),
        Opcode::Multiply => Value::Int(l.wrapping_mul(r)),
        Opcode::Divide => {
            if r == 0 {
                return Err(RuntimeError::new("division by zero"));
            }
            // Exact quotients stay integers; everything else widens.
            if l.wrapping_rem(r) == 0 {
                Value::Int(l.wrapping_div(r))
            } else {
                Value::Float(l as f64 / r as f64)
            }
        }
        Opcode::Modulus => {
            if r == 0 {
                return Err(RuntimeError::new("modulus by zero"));
            }
            Value::Int(l.wrapping_rem(r))
        }
        _ => {
            return Err(RuntimeError::new(format!(
                "unknown integer operator: {}",
                op.name()
            )));
        }
    })
}

fn binary_float_op(op: Opcode, l: f64, r: f64) -> Result<Value, RuntimeError> {
    let v = match op {
        Opcode::Add => l + r,
        Opcode::Subtract => l - r,
        Opcode::Multiply => l * r,
        Opcode::Divide => l / r,
        _ => {
            return Err(RuntimeError::new(format!(
                "unknown float operator: {}",
                op.name()
            )));
        }
    };
    Ok(Value::Float(v))
}

fn binary_string_op(op: Opcode, l: &str, r: &str) -> Result<Value, RuntimeError> {
    if op != Opcode::Add {
        return Err(RuntimeError::new(format!(
            "unknown string operator: {}",
            op.name()
        )));
    }
    Ok(Value::Str(Arc::from(format!("{l}{r}").as_str())))
}

fn ordered_comparison<T: PartialOrd>(op: Opcode, l: &T, r: &T) -> Result<bool, RuntimeError> {
    Ok(match op {
        Opcode::Less => l < r,
        Opcode::LessOrEqual => l <= r,
        Opcode::Greater => l > r,
        Opcode::GreaterOrEqual => l >= r,
        _ => {
            return Err(RuntimeError::new(format!(
                "unknown numeric comparison operator: {}",
                op.name()
            )));
        }
    })
}

fn bool_comparison(op: Opcode, l: bool, r: bool) -> Result<bool, RuntimeError> {
    Ok(match op {
        Opcode::And => l && r,
        Opcode::Or => l || r,
        _ => {
            return Err(RuntimeError::new(format!(
                "unknown boolean comparison operator: {}",
                op.name()
            )));
        }
    })
}

fn string_comparison(op: Opcode, l: &str, r: &str) -> Result<bool, RuntimeError> {
    Ok(match op {
        Opcode::StartsWith => l.starts_with(r),
        Opcode::EndsWith => l.ends_with(r),
        _ => {
            return Err(RuntimeError::new(format!(
                "unknown string comparison operator: {}",
                op.name()
            )));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::parser::Parser;

    fn run(input: &str) -> Result<Value, RuntimeError> {
        run_with(input, &Environment::new())
    }

    fn run_with(input: &str, env: &Environment) -> Result<Value, RuntimeError> {
        let node = Parser::new(input).parse().expect("parse");
        let program = Compiler::new().compile(&node).expect("compile");
        Vm::new(&program, env).run()
    }

    #[test]
    fn integer_arithmetic() {
        let cases = [
            ("1 + 2", Value::Int(3)),
            ("5 - 7", Value::Int(-2)),
            ("3 * 4", Value::Int(12)),
            ("10 / 5", Value::Int(2)),
            ("3 / 2", Value::Float(1.5)),
            ("10 % 3", Value::Int(1)),
            ("1 + 2 * 3", Value::Int(7)),
            ("-5 + 10", Value::Int(5)),
        ];

        for (input, expected) in cases {
            assert_eq!(run(input).expect(input), expected, "input: {input}");
        }
    }

    #[test]
    fn float_arithmetic() {
        let cases = [
            ("1.5 + 2.5", Value::Float(4.0)),
            ("2.2 / 1.1", Value::Float(2.0)),
            ("1 + 0.5", Value::Float(1.5)),
            ("2.0 * 3", Value::Float(6.0)),
            ("-1.5", Value::Float(-1.5)),
        ];

        for (input, expected) in cases {
            assert_eq!(run(input).expect(input), expected, "input: {input}");
        }
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(run(r#""abc" + "def""#).expect("run"), Value::from("abcdef"));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(run("1 / 0").is_err());
        assert!(run("1 % 0").is_err());
    }

    #[test]
    fn float_modulus_is_an_error() {
        assert!(run("1.5 % 2.0").is_err());
    }

    #[test]
    fn comparisons() {
        let cases = [
            ("1 lt 2", true),
            ("2 le 2", true),
            ("3 gt 2", true),
            ("1 ge 2", false),
            ("1.5 < 2", true),
            ("2 >= 2.0", true),
            ("1 eq 1", true),
            ("1 == 1.0", true),
            ("1 ne 2", true),
            (r#""a" eq "a""#, true),
            (r#""a" != "b""#, true),
            ("[1, 2] eq [1, 2]", true),
            ("[1, 2] eq [2, 1]", false),
            ("true eq true", true),
            ("null eq null", true),
        ];

        for (input, expected) in cases {
            assert_eq!(
                run(input).expect(input),
                Value::Bool(expected),
                "input: {input}"
            );
        }
    }

    #[test]
    fn ordering_strings_is_an_error() {
        assert!(run(r#""a" lt "b""#).is_err());
        assert!(run(r#"1 lt "a""#).is_err());
    }

    #[test]
    fn logic_and_short_circuit() {
        let cases = [
            ("true and true", true),
            ("true and false", false),
            ("false and true", false),
            ("true or false", true),
            ("false or false", false),
            ("false || true", true),
            ("true && true", true),
        ];

        for (input, expected) in cases {
            assert_eq!(
                run(input).expect(input),
                Value::Bool(expected),
                "input: {input}"
            );
        }
    }

    #[test]
    fn short_circuit_skips_errors_on_the_right() {
        // The right side would fail with a type error if evaluated.
        assert_eq!(
            run(r#"false and 1 lt "a""#).expect("run"),
            Value::Bool(false),
        );
        assert_eq!(
            run(r#"true or 1 lt "a""#).expect("run"),
            Value::Bool(true),
        );
    }

    #[test]
    fn non_boolean_logical_operand_is_an_error() {
        assert!(run("1 and true").is_err());
        assert!(run("null and true").is_err());
    }

    #[test]
    fn null_coercion() {
        let cases = [
            ("null + 1", Value::Int(1)),
            ("1 + null", Value::Int(1)),
            ("null + 1.5", Value::Float(1.5)),
            (r#"null + "x""#, Value::from("x")),
            ("null lt 1", Value::Bool(true)),
            ("null eq 0", Value::Bool(true)),
            (r#"null eq """#, Value::Bool(true)),
            // Null on the right of a logical operator coerces at the
            // combinator; on the left the short-circuit jump rejects it.
            ("true and null", Value::Bool(false)),
            ("false or null", Value::Bool(false)),
        ];

        for (input, expected) in cases {
            assert_eq!(run(input).expect(input), expected, "input: {input}");
        }
    }

    #[test]
    fn null_in_anything_is_false() {
        assert_eq!(run("null in [1, 2]").expect("run"), Value::Bool(false));
        assert_eq!(run(r#"null in "abc""#).expect("run"), Value::Bool(false));
        assert_eq!(run(r#""a" in null"#).expect("run"), Value::Bool(false));
    }

    #[test]
    fn in_operator() {
        let cases = [
            (r#""bc" in "abcd""#, true),
            (r#""x" in "abcd""#, false),
            ("2 in [1, 2, 3]", true),
            ("4 in [1, 2, 3]", false),
            ("2.0 in [1, 2, 3]", true),
            (r#""b" in ["a", "b"]"#, true),
        ];

        for (input, expected) in cases {
            assert_eq!(
                run(input).expect(input),
                Value::Bool(expected),
                "input: {input}"
            );
        }

        assert!(run("1 in 2").is_err());
    }

    #[test]
    fn starts_and_ends_with() {
        let cases = [
            (r#""abc" sw "a""#, true),
            (r#""abc" sw "b""#, false),
            (r#""abc" ew "c""#, true),
            (r#""abc" ew "b""#, false),
        ];

        for (input, expected) in cases {
            assert_eq!(
                run(input).expect(input),
                Value::Bool(expected),
                "input: {input}"
            );
        }

        assert!(run("1 sw 2").is_err());
    }

    #[test]
    fn bang_is_false_for_non_booleans() {
        assert_eq!(run("!true").expect("run"), Value::Bool(false));
        assert_eq!(run("!false").expect("run"), Value::Bool(true));
        assert_eq!(run("!5").expect("run"), Value::Bool(false));
        assert_eq!(run("!!5").expect("run"), Value::Bool(true));
        assert_eq!(run("not null").expect("run"), Value::Bool(false));
    }

    #[test]
    fn negation() {
        assert_eq!(run("-(1 + 2)").expect("run"), Value::Int(-3));
        assert_eq!(run("-null").expect("run"), Value::Null);
        assert!(run(r#"-"a""#).is_err());
    }

    #[test]
    fn array_literals_and_indexing() {
        assert_eq!(
            run("[1, 2, 3]").expect("run"),
            Value::from(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        );
        assert_eq!(run("[1, 2, 3][1]").expect("run"), Value::Int(2));
        assert_eq!(run("[[1], [2]][1][0]").expect("run"), Value::Int(2));
        assert_eq!(run("[]").expect("run"), Value::from(Vec::<Value>::new()));
    }

    #[test]
    fn index_errors() {
        assert!(run("[1][1]").is_err());
        assert!(run("[1][-1]").is_err());
        assert!(run(r#""abc"[0]"#).is_err());
        assert!(run("[1][0.5]").is_err());
    }

    #[test]
    fn unbound_identifiers_evaluate_to_null() {
        assert_eq!(run("missing").expect("run"), Value::Null);
        assert_eq!(run("missing eq null").expect("run"), Value::Bool(true));
    }

    #[test]
    fn environment_lookup_and_member_access() {
        let env = Environment::from_json(&serde_json::json!({
            "user": {"name": "ada", "age": 36},
            "limit": 10,
        }))
        .expect("env");

        assert_eq!(run_with("limit", &env).expect("run"), Value::Int(10));
        assert_eq!(
            run_with("user.name", &env).expect("run"),
            Value::from("ada"),
        );
        assert_eq!(
            run_with("user.missing", &env).expect("run"),
            Value::Null,
        );
        assert_eq!(
            run_with("user.missing.deeper", &env).expect("run"),
            Value::Null,
        );
        assert!(run_with("limit.anything", &env).is_err());
    }

    #[test]
    fn member_access_on_null_yields_null() {
        assert_eq!(run("missing.name").expect("run"), Value::Null);
    }

    #[test]
    fn builtin_calls() {
        assert_eq!(run(r#"len("abc")"#).expect("run"), Value::Int(3));
        assert_eq!(run("len([1, 2])").expect("run"), Value::Int(2));
        assert_eq!(run("len(null)").expect("run"), Value::Int(0));
        assert_eq!(run(r#"lower("AbC")"#).expect("run"), Value::from("abc"));
        assert_eq!(run(r#"upper("AbC")"#).expect("run"), Value::from("ABC"));
        assert_eq!(run("lower(null)").expect("run"), Value::Null);

        assert!(run("len(1)").is_err());
        assert!(run("len()").is_err());
        assert!(run("lower(1)").is_err());
    }

    #[test]
    fn environment_shadows_builtins() {
        let mut env = Environment::new();
        env.set("len", 42i64);
        assert_eq!(run_with("len", &env).expect("run"), Value::Int(42));
    }

    #[test]
    fn host_functions_are_callable() {
        let mut env = Environment::new();
        env.set_fn("reverse", |args| {
            let s = args.first().and_then(Value::as_str).unwrap_or_default();
            Ok(Value::from(s.chars().rev().collect::<String>()))
        });

        assert_eq!(
            run_with(r#"reverse("abc")"#, &env).expect("run"),
            Value::from("cba"),
        );
    }

    #[test]
    fn host_function_errors_propagate() {
        let mut env = Environment::new();
        env.set_fn("boom", |_| Err(RuntimeError::new("boom")));

        let err = run_with("boom()", &env).expect_err("expected error");
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn calling_a_non_function_is_an_error() {
        let mut env = Environment::new();
        env.set("x", 1i64);
        assert!(run_with("x(1)", &env).is_err());
    }

    #[test]
    fn binary_type_errors() {
        assert!(run(r#"1 + "a""#).is_err());
        assert!(run("true + true").is_err());
        assert!(run(r#""a" - "b""#).is_err());
        assert!(run("[1] + [2]").is_err());
    }

    #[test]
    fn exactly_one_value_remains_after_a_run() {
        let node = Parser::new("(1 + 2) * [3, 4][0]").parse().expect("parse");
        let program = Compiler::new().compile(&node).expect("compile");
        let env = Environment::new();
        let mut vm = Vm::new(&program, &env);

        vm.run().expect("run");
        assert_eq!(vm.sp, 1);
    }
}
