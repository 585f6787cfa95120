//! JEXL evaluator for branch conditions.
//!
//! Conditions see the session data twice: every field at top level
//! (`age >= 18`) and the whole map under `data` (`data.age >= 18`, useful
//! when a step id collides with a JEXL keyword). Data is always passed as
//! context, never interpolated into the expression string.

use colloquy_types::session::SessionData;
use serde_json::{json, Value};

/// Errors that can occur during condition evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),
}

/// JEXL evaluator with the string helpers chain authors use most.
pub struct ConditionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("number", |args: &[Value]| {
                let n = match args.first() {
                    Some(Value::Number(n)) => n.as_f64(),
                    Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                Ok(n.map_or(Value::Null, |n| json!(n)))
            })
            .with_transform("contains", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.contains(search)))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate `expression` against `data`, coercing the result with
    /// JavaScript-like truthiness.
    pub fn evaluate(&self, expression: &str, data: &SessionData) -> Result<bool, ExpressionError> {
        let context = Self::context(data);
        let result = self
            .evaluator
            .eval_in_context(expression, &context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))?;
        Ok(Self::value_to_bool(&result))
    }

    fn context(data: &SessionData) -> Value {
        let mut ctx = data.clone();
        ctx.insert("data".to_string(), Value::Object(data.clone()));
        Value::Object(ctx)
    }

    fn value_to_bool(value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(value: Value) -> SessionData {
        match value {
            Value::Object(map) => map,
            _ => panic!("test data must be an object"),
        }
    }

    #[test]
    fn test_numeric_comparison() {
        let eval = ConditionEvaluator::new();
        let d = data(json!({"ask_age": 21}));
        assert!(eval.evaluate("ask_age >= 18", &d).unwrap());
        assert!(!eval.evaluate("ask_age < 18", &d).unwrap());
    }

    #[test]
    fn test_data_namespace() {
        let eval = ConditionEvaluator::new();
        let d = data(json!({"plan": "pro"}));
        assert!(eval.evaluate("data.plan == 'pro'", &d).unwrap());
        assert!(eval.evaluate("plan == 'pro'", &d).unwrap());
    }

    #[test]
    fn test_transforms() {
        let eval = ConditionEvaluator::new();
        let d = data(json!({"answer": "  YES ", "age": "42"}));
        assert!(eval.evaluate("answer|trim|lower == 'yes'", &d).unwrap());
        assert!(eval.evaluate("age|number > 40", &d).unwrap());
    }

    #[test]
    fn test_truthiness_coercion() {
        let eval = ConditionEvaluator::new();
        let d = data(json!({"name": "Bob", "blank": ""}));
        assert!(eval.evaluate("name", &d).unwrap());
        assert!(!eval.evaluate("blank", &d).unwrap());
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let eval = ConditionEvaluator::new();
        let result = eval.evaluate("age >=", &SessionData::new());
        assert!(result.is_err());
    }
}
