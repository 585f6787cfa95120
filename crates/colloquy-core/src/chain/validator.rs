//! Input validators for Question steps.
//!
//! A `Validator` is a named, pure predicate over the raw input plus the error
//! message shown when it rejects. Validators are immutable and cheap to clone,
//! so one instance can be shared by any number of chains.
//!
//! Built-in rules come from [`ValidatorSpec`] (the serializable form used in
//! chain files); anything else is a closure passed to [`Validator::new`].

use std::fmt;
use std::sync::Arc;

use colloquy_types::chain::{ValidatorRule, ValidatorSpec};
use regex::Regex;
use thiserror::Error;

const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";
const PHONE_PATTERN: &str = r"^\+?[1-9]\d{0,15}$";

/// Errors raised while compiling a validator.
#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("invalid regex pattern '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("invalid bounds: min {min} is greater than max {max}")]
    InvalidBounds { min: f64, max: f64 },
}

type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A named predicate plus the message surfaced when it fails.
#[derive(Clone)]
pub struct Validator {
    name: String,
    message: String,
    predicate: Predicate,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("name", &self.name)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

impl Validator {
    /// Create a validator from an arbitrary predicate.
    pub fn new<F>(name: impl Into<String>, message: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            message: message.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Replace the error message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Run the predicate against `input`.
    pub fn check(&self, input: &str) -> Result<(), &str> {
        if (self.predicate)(input) {
            Ok(())
        } else {
            Err(&self.message)
        }
    }

    // -----------------------------------------------------------------------
    // Built-in rules
    // -----------------------------------------------------------------------

    pub fn not_empty() -> Self {
        Self::new("not_empty", "This field cannot be empty", |input| {
            !input.trim().is_empty()
        })
    }

    pub fn min_length(min: usize) -> Self {
        Self::new(
            format!("min_length_{min}"),
            format!("Minimum length: {min} characters"),
            move |input| input.chars().count() >= min,
        )
    }

    pub fn max_length(max: usize) -> Self {
        Self::new(
            format!("max_length_{max}"),
            format!("Maximum length: {max} characters"),
            move |input| input.chars().count() <= max,
        )
    }

    pub fn integer() -> Self {
        Self::new("integer", "Please enter a whole number", |input| {
            input.trim().parse::<i64>().is_ok()
        })
    }

    /// Numeric value within the inclusive bounds. Either bound may be open.
    pub fn numeric_range(min: Option<f64>, max: Option<f64>) -> Result<Self, ValidatorError> {
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(ValidatorError::InvalidBounds { min: lo, max: hi });
            }
        }
        let message = match (min, max) {
            (Some(lo), Some(hi)) => format!("Enter a number between {lo} and {hi}"),
            (Some(lo), None) => format!("Enter a number of at least {lo}"),
            (None, Some(hi)) => format!("Enter a number of at most {hi}"),
            (None, None) => "Please enter a number".to_string(),
        };
        Ok(Self::new("numeric_range", message, move |input| {
            match input.trim().parse::<f64>() {
                Ok(n) if n.is_finite() => {
                    min.is_none_or(|lo| n >= lo) && max.is_none_or(|hi| n <= hi)
                }
                _ => false,
            }
        }))
    }

    /// Input must contain a match of `pattern` somewhere.
    pub fn regex(pattern: &str) -> Result<Self, ValidatorError> {
        let re = compile(pattern)?;
        Ok(Self::new(
            "regex",
            format!("Input does not match the pattern: {pattern}"),
            move |input| re.is_match(input),
        ))
    }

    pub fn one_of(values: Vec<String>, case_sensitive: bool) -> Self {
        let message = format!("Choose one of: {}", values.join(", "));
        let values: Vec<String> = if case_sensitive {
            values
        } else {
            values.into_iter().map(|v| v.to_lowercase()).collect()
        };
        Self::new("one_of", message, move |input| {
            let input = input.trim();
            if case_sensitive {
                values.iter().any(|v| v == input)
            } else {
                let lowered = input.to_lowercase();
                values.iter().any(|v| *v == lowered)
            }
        })
    }

    pub fn contains_any(words: Vec<String>, case_sensitive: bool) -> Self {
        let message = format!("The answer must contain one of: {}", words.join(", "));
        let words: Vec<String> = if case_sensitive {
            words
        } else {
            words.into_iter().map(|w| w.to_lowercase()).collect()
        };
        Self::new("contains_any", message, move |input| {
            if case_sensitive {
                words.iter().any(|w| input.contains(w.as_str()))
            } else {
                let lowered = input.to_lowercase();
                words.iter().any(|w| lowered.contains(w.as_str()))
            }
        })
    }

    pub fn email() -> Result<Self, ValidatorError> {
        let re = compile(EMAIL_PATTERN)?;
        Ok(Self::new(
            "email",
            "Please enter a valid email address",
            move |input| re.is_match(input.trim()),
        ))
    }

    /// Phone number; spaces and dashes are ignored.
    pub fn phone() -> Result<Self, ValidatorError> {
        let re = compile(PHONE_PATTERN)?;
        Ok(Self::new(
            "phone",
            "Please enter a valid phone number",
            move |input| {
                let normalized: String = input
                    .trim()
                    .chars()
                    .filter(|c| *c != ' ' && *c != '-')
                    .collect();
                re.is_match(&normalized)
            },
        ))
    }

    /// Compile a serializable spec into a validator.
    pub fn from_spec(spec: &ValidatorSpec) -> Result<Self, ValidatorError> {
        let validator = match &spec.rule {
            ValidatorRule::NotEmpty => Self::not_empty(),
            ValidatorRule::MinLength { min } => Self::min_length(*min),
            ValidatorRule::MaxLength { max } => Self::max_length(*max),
            ValidatorRule::Integer => Self::integer(),
            ValidatorRule::NumericRange { min, max } => Self::numeric_range(*min, *max)?,
            ValidatorRule::Regex { pattern } => Self::regex(pattern)?,
            ValidatorRule::OneOf {
                values,
                case_sensitive,
            } => Self::one_of(values.clone(), *case_sensitive),
            ValidatorRule::ContainsAny {
                words,
                case_sensitive,
            } => Self::contains_any(words.clone(), *case_sensitive),
            ValidatorRule::Email => Self::email()?,
            ValidatorRule::Phone => Self::phone()?,
        };
        Ok(match &spec.message {
            Some(message) => validator.with_message(fill_parameters(message, &spec.rule)),
            None => validator,
        })
    }
}

/// Substitute `{min}`, `{max}`, `{pattern}` and `{values}` in a custom
/// message with the rule's own parameters. Other braces are left alone.
fn fill_parameters(message: &str, rule: &ValidatorRule) -> String {
    let params: Vec<(&str, String)> = match rule {
        ValidatorRule::MinLength { min } => vec![("min", min.to_string())],
        ValidatorRule::MaxLength { max } => vec![("max", max.to_string())],
        ValidatorRule::NumericRange { min, max } => {
            let mut params = Vec::new();
            if let Some(lo) = min {
                params.push(("min", lo.to_string()));
            }
            if let Some(hi) = max {
                params.push(("max", hi.to_string()));
            }
            params
        }
        ValidatorRule::Regex { pattern } => vec![("pattern", pattern.clone())],
        ValidatorRule::OneOf { values, .. } => vec![("values", values.join(", "))],
        ValidatorRule::ContainsAny { words, .. } => vec![("values", words.join(", "))],
        _ => Vec::new(),
    };
    params
        .into_iter()
        .fold(message.to_string(), |acc, (name, value)| {
            acc.replace(&format!("{{{name}}}"), &value)
        })
}

fn compile(pattern: &str) -> Result<Regex, ValidatorError> {
    Regex::new(pattern).map_err(|e| ValidatorError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Apply validators in order; the first failure short-circuits.
pub fn run_validators<'a>(validators: &'a [Validator], input: &str) -> Result<(), &'a Validator> {
    for validator in validators {
        if validator.check(input).is_err() {
            return Err(validator);
        }
    }
    Ok(())
}

/// Whether a spec list implies a numeric answer.
pub fn specs_are_numeric(specs: &[ValidatorSpec]) -> bool {
    specs.iter().any(|s| {
        matches!(
            s.rule,
            ValidatorRule::Integer | ValidatorRule::NumericRange { .. }
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_empty_rejects_whitespace() {
        let v = Validator::not_empty();
        assert!(v.check("").is_err());
        assert!(v.check("   ").is_err());
        assert!(v.check("Alice").is_ok());
    }

    #[test]
    fn test_length_counts_chars_not_bytes() {
        let v = Validator::max_length(3);
        assert!(v.check("äöü").is_ok());
        assert!(v.check("äöüß").is_err());
        assert!(Validator::min_length(2).check("a").is_err());
    }

    #[test]
    fn test_numeric_range_bounds_inclusive() {
        let v = Validator::numeric_range(Some(14.0), Some(99.0)).unwrap();
        assert!(v.check("14").is_ok());
        assert!(v.check("99").is_ok());
        assert!(v.check(" 42 ").is_ok());
        assert!(v.check("13").is_err());
        assert!(v.check("abc").is_err());
        assert!(v.check("NaN").is_err());
        assert_eq!(v.message(), "Enter a number between 14 and 99");
    }

    #[test]
    fn test_numeric_range_rejects_inverted_bounds() {
        let err = Validator::numeric_range(Some(10.0), Some(1.0)).unwrap_err();
        assert!(err.to_string().contains("greater than"), "got: {err}");
    }

    #[test]
    fn test_regex_searches_anywhere() {
        let v = Validator::regex(r"\d{3}").unwrap();
        assert!(v.check("abc123def").is_ok());
        assert!(v.check("abc").is_err());
    }

    #[test]
    fn test_invalid_regex_is_an_error() {
        let err = Validator::regex("(unclosed").unwrap_err();
        assert!(matches!(err, ValidatorError::InvalidRegex { .. }));
    }

    #[test]
    fn test_one_of_case_insensitive_by_default() {
        let v = Validator::one_of(vec!["Yes".into(), "No".into()], false);
        assert!(v.check("yes").is_ok());
        assert!(v.check("maybe").is_err());

        let strict = Validator::one_of(vec!["Yes".into()], true);
        assert!(strict.check("yes").is_err());
    }

    #[test]
    fn test_contains_any() {
        let v = Validator::contains_any(vec!["rust".into(), "go".into()], false);
        assert!(v.check("I like Rust a lot").is_ok());
        assert!(v.check("python").is_err());
    }

    #[test]
    fn test_email_and_phone() {
        let email = Validator::email().unwrap();
        assert!(email.check("alice@example.com").is_ok());
        assert!(email.check("alice@example").is_err());

        let phone = Validator::phone().unwrap();
        assert!(phone.check("+7 912-345-67-89").is_ok());
        assert!(phone.check("0123").is_err());
        assert!(phone.check("call me").is_err());
    }

    #[test]
    fn test_from_spec_overrides_message() {
        let spec = ValidatorSpec {
            rule: ValidatorRule::Integer,
            message: Some("Digits only, please".to_string()),
        };
        let v = Validator::from_spec(&spec).unwrap();
        assert_eq!(v.check("x"), Err("Digits only, please"));
    }

    #[test]
    fn test_from_spec_fills_rule_parameters_into_message() {
        let spec = ValidatorSpec {
            rule: ValidatorRule::NumericRange {
                min: Some(1.0),
                max: Some(120.0),
            },
            message: Some("Age must be {min}-{max}, not {ask_age}".to_string()),
        };
        let v = Validator::from_spec(&spec).unwrap();
        assert_eq!(v.message(), "Age must be 1-120, not {ask_age}");
    }

    #[test]
    fn test_run_validators_short_circuits_on_first_failure() {
        let validators = vec![
            Validator::not_empty(),
            Validator::new("never", "second validator ran", |_| false),
        ];
        let failed = run_validators(&validators, "").unwrap_err();
        assert_eq!(failed.name(), "not_empty");

        let failed = run_validators(&validators, "x").unwrap_err();
        assert_eq!(failed.name(), "never");
    }

    #[test]
    fn test_specs_are_numeric() {
        assert!(specs_are_numeric(&[ValidatorRule::Integer.into()]));
        assert!(!specs_are_numeric(&[ValidatorRule::NotEmpty.into()]));
    }
}
