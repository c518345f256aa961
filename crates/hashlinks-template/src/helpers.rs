use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::eval::{display, is_truthy};

/// A named helper. Receives evaluated arguments (undefined as `null`) and
/// returns a value or an error message.
pub type HelperFn = dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync;

/// Set of helpers available to templates.
#[derive(Clone)]
pub struct HelperRegistry {
    helpers: HashMap<String, Arc<HelperFn>>,
}

impl HelperRegistry {
    /// A registry with no helpers at all.
    pub fn empty() -> Self {
        Self {
            helpers: HashMap::new(),
        }
    }

    /// A registry preloaded with the built-in helpers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("uppercase", |args| {
            Ok(Value::String(display(args.first()).to_uppercase()))
        });
        registry.register("lowercase", |args| {
            Ok(Value::String(display(args.first()).to_lowercase()))
        });
        registry.register("json", |args| {
            let value = args.first().unwrap_or(&Value::Null);
            serde_json::to_string(value)
                .map(Value::String)
                .map_err(|e| e.to_string())
        });
        registry.register("eq", |args| Ok(Value::Bool(loose_eq(arg(args, 0), arg(args, 1)))));
        registry.register("ne", |args| Ok(Value::Bool(!loose_eq(arg(args, 0), arg(args, 1)))));
        registry.register("not", |args| Ok(Value::Bool(!is_truthy(args.first()))));
        registry.register("default", |args| {
            let value = arg(args, 0);
            let empty = matches!(value, Value::Null) || value.as_str() == Some("");
            Ok(if empty { arg(args, 1).clone() } else { value.clone() })
        });
        registry.register("length", |args| {
            let len = match arg(args, 0) {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(m) => m.len(),
                _ => 0,
            };
            Ok(Value::from(len))
        });
        registry.register("concat", |args| {
            Ok(Value::String(args.iter().map(|a| display(Some(a))).collect()))
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, helper: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.helpers.insert(name.into(), Arc::new(helper));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<HelperFn>> {
        self.helpers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.helpers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.helpers.is_empty()
    }
}

impl Default for HelperRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for HelperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.helpers.keys().collect();
        names.sort();
        f.debug_struct("HelperRegistry").field("helpers", &names).finish()
    }
}

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&Value::Null)
}

/// Equality that treats `1` and `1.0` as the same number.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: &[Value]) -> Value {
        let registry = HelperRegistry::with_builtins();
        (registry.get(name).unwrap())(args).unwrap()
    }

    #[test]
    fn string_helpers() {
        assert_eq!(call("uppercase", &[json!("abc")]), json!("ABC"));
        assert_eq!(call("lowercase", &[json!("ABC")]), json!("abc"));
        assert_eq!(call("concat", &[json!("a"), json!(1), json!(null)]), json!("a1"));
        assert_eq!(call("json", &[json!({"a": [1, 2]})]), json!(r#"{"a":[1,2]}"#));
    }

    #[test]
    fn comparison_helpers() {
        assert_eq!(call("eq", &[json!(1), json!(1.0)]), json!(true));
        assert_eq!(call("eq", &[json!("a"), json!("b")]), json!(false));
        assert_eq!(call("ne", &[json!("a"), json!("b")]), json!(true));
        assert_eq!(call("not", &[json!(0)]), json!(true));
        assert_eq!(call("not", &[json!("x")]), json!(false));
    }

    #[test]
    fn default_and_length() {
        assert_eq!(call("default", &[json!(null), json!("fallback")]), json!("fallback"));
        assert_eq!(call("default", &[json!(""), json!("fallback")]), json!("fallback"));
        assert_eq!(call("default", &[json!(0), json!("fallback")]), json!(0));
        assert_eq!(call("length", &[json!([1, 2, 3])]), json!(3));
        assert_eq!(call("length", &[json!("héllo")]), json!(5));
        assert_eq!(call("length", &[json!(null)]), json!(0));
    }

    #[test]
    fn custom_helpers_can_be_registered() {
        let mut registry = HelperRegistry::empty();
        assert!(registry.is_empty());
        registry.register("double", |args| {
            args.first()
                .and_then(Value::as_f64)
                .map(|n| json!(n * 2.0))
                .ok_or_else(|| "expected a number".to_string())
        });
        let double = registry.get("double").unwrap();
        assert_eq!(double(&[json!(2)]).unwrap(), json!(4.0));
        assert_eq!(double(&[json!("x")]).unwrap_err(), "expected a number");
    }
}
