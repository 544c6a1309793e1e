use std::fmt;

use crate::value::format_float;

/// A single parsed expression. The parser produces exactly one `Node` per
/// input; everything else hangs off it.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Identifier(String),
    Integer(i64),
    Float(f64),
    Str(String),
    Boolean(bool),
    Null,
    Array(Vec<Node>),
    Index {
        left: Box<Node>,
        index: Box<Node>,
    },
    Member {
        left: Box<Node>,
        member: Box<Node>,
    },
    Prefix {
        operator: String,
        right: Box<Node>,
    },
    Infix {
        left: Box<Node>,
        operator: String,
        right: Box<Node>,
    },
    Call {
        function: Box<Node>,
        arguments: Vec<Node>,
    },
}

/// Renders the fully parenthesized form: `(L op R)`, `(opR)` / `(op R)`,
/// `(L.M)`, `(L[I])` and `F(a, b)`.
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Identifier(name) => f.write_str(name),
            Node::Integer(value) => write!(f, "{value}"),
            Node::Float(value) => f.write_str(&format_float(*value)),
            Node::Str(value) => f.write_str(value),
            Node::Boolean(value) => write!(f, "{value}"),
            Node::Null => f.write_str("null"),
            Node::Array(elements) => {
                f.write_str("[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{element}")?;
                }
                f.write_str("]")
            }
            Node::Index { left, index } => write!(f, "({left}[{index}])"),
            Node::Member { left, member } => write!(f, "({left}.{member})"),
            Node::Prefix { operator, right } => {
                if operator.len() == 1 {
                    write!(f, "({operator}{right})")
                } else {
                    write!(f, "({operator} {right})")
                }
            }
            Node::Infix {
                left,
                operator,
                right,
            } => write!(f, "({left} {operator} {right})"),
            Node::Call {
                function,
                arguments,
            } => {
                write!(f, "{function}(")?;
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{argument}")?;
                }
                f.write_str(")")
            }
        }
    }
}
