//! Single-pass bytecode compiler. Walks the expression tree, appending
//! literals to the constant pool, interning identifier names, and emitting
//! short-circuit jumps for the logical operators.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ast::Node;
use crate::program::{make, Opcode, Program};
use crate::value::Value;

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

const JUMP_PLACEHOLDER: usize = 0xFFFF;

#[derive(Default)]
pub struct Compiler {
    instructions: Vec<u8>,
    constants: Vec<Value>,
    identifiers: Vec<String>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(mut self, node: &Node) -> Result<Program, CompileError> {
        self.compile_node(node)?;

        Ok(Program {
            instructions: self.instructions,
            constants: self.constants,
            identifiers: self.identifiers,
        })
    }

    fn compile_node(&mut self, node: &Node) -> Result<(), CompileError> {
        match node {
            Node::Boolean(true) => {
                self.emit(Opcode::True, 0);
            }
            Node::Boolean(false) => {
                self.emit(Opcode::False, 0);
            }
            Node::Null => {
                self.emit(Opcode::Null, 0);
            }
            Node::Integer(value) => {
                let idx = self.add_constant(Value::Int(*value));
                self.emit(Opcode::Constant, idx);
            }
            Node::Float(value) => {
                let idx = self.add_constant(Value::Float(*value));
                self.emit(Opcode::Constant, idx);
            }
            Node::Str(value) => {
                let idx = self.add_constant(Value::Str(Arc::from(value.as_str())));
                self.emit(Opcode::Constant, idx);
            }
            Node::Array(elements) => {
                for element in elements {
                    self.compile_node(element)?;
                }
                self.emit(Opcode::Array, elements.len());
            }
            Node::Identifier(name) => {
                let idx = self.add_identifier(name);
                self.emit(Opcode::Global, idx);
            }
            Node::Index { left, index } => {
                self.compile_node(left)?;
                self.compile_node(index)?;
                self.emit(Opcode::Index, 0);
            }
            Node::Member { left, member } => {
                self.compile_node(left)?;

                let Node::Identifier(name) = member.as_ref() else {
                    return Err(CompileError::new(format!(
                        "member must be an identifier: {member}"
                    )));
                };

                let idx = self.add_identifier(name);
                self.emit(Opcode::Member, idx);
            }
            Node::Call {
                function,
                arguments,
            } => {
                self.compile_node(function)?;
                for argument in arguments {
                    self.compile_node(argument)?;
                }
                self.emit(Opcode::Call, arguments.len());
            }
            Node::Prefix { operator, right } => {
                self.compile_node(right)?;
                match operator.as_str() {
                    "not" | "!" => {
                        self.emit(Opcode::Not, 0);
                    }
                    "-" => {
                        self.emit(Opcode::Minus, 0);
                    }
                    _ => {
                        return Err(CompileError::new(format!(
                            "unknown prefix operator: {operator}"
                        )));
                    }
                }
            }
            Node::Infix {
                left,
                operator,
                right,
            } => self.compile_infix(left, operator, right)?,
        }

        Ok(())
    }

    fn compile_infix(
        &mut self,
        left: &Node,
        operator: &str,
        right: &Node,
    ) -> Result<(), CompileError> {
        // The logical operators compile to a non-consuming jump over the
        // right operand plus an ordinary combinator opcode for the
        // fall-through path.
        match operator {
            "and" | "&&" => {
                self.compile_node(left)?;
                let jump = self.emit(Opcode::JumpIfFalse, JUMP_PLACEHOLDER);
                self.compile_node(right)?;
                self.emit(Opcode::And, 0);
                self.patch_jump(jump);
                return Ok(());
            }
            "or" | "||" => {
                self.compile_node(left)?;
                let jump = self.emit(Opcode::JumpIfTrue, JUMP_PLACEHOLDER);
                self.compile_node(right)?;
                self.emit(Opcode::Or, 0);
                self.patch_jump(jump);
                return Ok(());
            }
            _ => {}
        }

        let op = match operator {
            "+" => Opcode::Add,
            "-" => Opcode::Subtract,
            "*" => Opcode::Multiply,
            "/" => Opcode::Divide,
            "%" => Opcode::Modulus,
            "eq" | "==" => Opcode::Equal,
            "ne" | "!=" => Opcode::NotEqual,
            "lt" | "<" => Opcode::Less,
            "le" | "<=" => Opcode::LessOrEqual,
            "gt" | ">" => Opcode::Greater,
            "ge" | ">=" => Opcode::GreaterOrEqual,
            "sw" => Opcode::StartsWith,
            "ew" => Opcode::EndsWith,
            "in" => Opcode::In,
            _ => {
                return Err(CompileError::new(format!(
                    "unknown infix operator: {operator}"
                )));
            }
        };

        self.compile_node(left)?;
        self.compile_node(right)?;
        self.emit(op, 0);
        Ok(())
    }

    fn emit(&mut self, op: Opcode, operand: usize) -> usize {
        let pos = self.instructions.len();
        self.instructions.extend(make(op, operand));
        pos
    }

    /// Rewrite a placeholder jump operand with the current stream length.
    fn patch_jump(&mut self, pos: usize) {
        let target = (self.instructions.len() as u16).to_be_bytes();
        self.instructions[pos + 1] = target[0];
        self.instructions[pos + 2] = target[1];
    }

    fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// Linear-search interning; repeat names reuse the existing slot.
    fn add_identifier(&mut self, name: &str) -> usize {
        if let Some(idx) = self.identifiers.iter().position(|n| n == name) {
            return idx;
        }
        self.identifiers.push(name.to_string());
        self.identifiers.len() - 1
    }
}
