use std::collections::BTreeMap;

use crate::value::{ConvertError, Value};
use crate::vm::RuntimeError;

/// Per-evaluation bindings from identifier name to value, supplied by the
/// host. The VM reads but never mutates it, and bindings shadow the built-in
/// callables of the same name.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: BTreeMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an environment from a JSON object. The whole tree is validated
    /// up front so conversion failures surface before evaluation begins.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ConvertError> {
        match Value::try_from(value)? {
            Value::Map(map) => Ok(Self {
                vars: (*map).clone(),
            }),
            other => Err(ConvertError::new(format!(
                "environment must be a map, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Bind a host callable.
    pub fn set_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        self.vars.insert(name.into(), Value::func(f));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_accepts_nested_objects() {
        let env = Environment::from_json(&json!({
            "user": {"email": "a@b.com", "roles": ["admin"]},
            "limit": 10,
        }))
        .expect("env");

        assert!(matches!(env.get("user"), Some(Value::Map(_))));
        assert_eq!(env.get("limit"), Some(&Value::Int(10)));
        assert_eq!(env.get("absent"), None);
    }

    #[test]
    fn from_json_rejects_non_objects() {
        assert!(Environment::from_json(&json!([1, 2, 3])).is_err());
        assert!(Environment::from_json(&json!("text")).is_err());
    }

    #[test]
    fn set_fn_binds_a_callable() {
        let mut env = Environment::new();
        env.set_fn("double", |args| {
            let n = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(Value::Int(n * 2))
        });

        let Some(Value::Func(f)) = env.get("double") else {
            panic!("expected func binding");
        };
        assert_eq!(f(&[Value::Int(21)]).expect("call"), Value::Int(42));
    }
}
