//! Condition Evaluator
//!
//! Pure functions over a [`ContextView`]: resolve a dotted field path, coerce both operands
//! according to the condition's [`FieldType`], apply one operator. Nothing here returns an
//! error at evaluation time; malformed conditions evaluate to `false` and are logged.

use crate::error::ConfigError;
use crate::runtime::context::ContextView;
use crate::workflow::{Condition, ConditionGroup, FieldType, Logic};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static email pattern"));

/// Every supported comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    RegexMatch,
    In,
    NotIn,
    Exists,
    NotExists,
    IsTrue,
    IsFalse,
    IsNumber,
    IsEmail,
}

impl Operator {
    pub const ALL: [Operator; 19] = [
        Operator::Equals,
        Operator::NotEquals,
        Operator::GreaterThan,
        Operator::GreaterThanOrEqual,
        Operator::LessThan,
        Operator::LessThanOrEqual,
        Operator::Contains,
        Operator::NotContains,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::RegexMatch,
        Operator::In,
        Operator::NotIn,
        Operator::Exists,
        Operator::NotExists,
        Operator::IsTrue,
        Operator::IsFalse,
        Operator::IsNumber,
        Operator::IsEmail,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::GreaterThan => "greater_than",
            Operator::GreaterThanOrEqual => "greater_than_or_equal",
            Operator::LessThan => "less_than",
            Operator::LessThanOrEqual => "less_than_or_equal",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::RegexMatch => "regex_match",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Exists => "exists",
            Operator::NotExists => "not_exists",
            Operator::IsTrue => "is_true",
            Operator::IsFalse => "is_false",
            Operator::IsNumber => "is_number",
            Operator::IsEmail => "is_email",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Operator::Equals => "Equal to",
            Operator::NotEquals => "Not equal to",
            Operator::GreaterThan => "Greater than",
            Operator::GreaterThanOrEqual => "Greater than or equal to",
            Operator::LessThan => "Less than",
            Operator::LessThanOrEqual => "Less than or equal to",
            Operator::Contains => "Contains text (case-insensitive)",
            Operator::NotContains => "Does not contain text (case-insensitive)",
            Operator::StartsWith => "Starts with (case-insensitive)",
            Operator::EndsWith => "Ends with (case-insensitive)",
            Operator::RegexMatch => "Matches regular expression (case-insensitive)",
            Operator::In => "Is one of a list or comma-separated values",
            Operator::NotIn => "Is not one of a list or comma-separated values",
            Operator::Exists => "Has a non-empty value",
            Operator::NotExists => "Is missing, null or empty",
            Operator::IsTrue => "Is true",
            Operator::IsFalse => "Is false",
            Operator::IsNumber => "Is a number",
            Operator::IsEmail => "Is a valid email address",
        }
    }

    /// Unary operators ignore the condition's `value`.
    pub fn is_unary(&self) -> bool {
        matches!(
            self,
            Operator::Exists
                | Operator::NotExists
                | Operator::IsTrue
                | Operator::IsFalse
                | Operator::IsNumber
                | Operator::IsEmail
        )
    }
}

/// Catalogue entry served to editors
#[derive(Debug, Clone, serde::Serialize)]
pub struct OperatorInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub unary: bool,
}

pub fn available_operators() -> Vec<OperatorInfo> {
    Operator::ALL
        .iter()
        .map(|op| OperatorInfo {
            name: op.name(),
            description: op.description(),
            unary: op.is_unary(),
        })
        .collect()
}

/// Combine a condition list with AND/OR. An empty list passes.
pub fn evaluate_conditions(conditions: &[Condition], logic: Logic, view: &ContextView<'_>) -> bool {
    if conditions.is_empty() {
        return true;
    }

    let result = match logic {
        Logic::And => conditions.iter().all(|c| evaluate_condition(c, view)),
        Logic::Or => conditions.iter().any(|c| evaluate_condition(c, view)),
    };

    tracing::debug!(count = conditions.len(), ?logic, result, "Evaluated condition list");
    result
}

pub fn evaluate_group(group: &ConditionGroup, view: &ContextView<'_>) -> bool {
    evaluate_conditions(&group.conditions, group.logic, view)
}

/// Evaluate one condition against the context.
pub fn evaluate_condition(condition: &Condition, view: &ContextView<'_>) -> bool {
    if condition.field.trim().is_empty() || condition.operator.trim().is_empty() {
        tracing::warn!(?condition, "Incomplete condition, evaluating to false");
        return false;
    }

    let Some(operator) = Operator::parse(condition.operator.trim()) else {
        tracing::warn!(operator = %condition.operator, "Unknown condition operator, evaluating to false");
        return false;
    };

    let field_value = extract_field_value(&condition.field, view);

    if operator.is_unary() {
        return apply_unary(operator, &field_value);
    }

    let (left, right) = coerce_pair(&field_value, &condition.value, condition.field_type);
    apply_binary(operator, &left, &right)
}

/// Resolve a dotted path; absent segments yield `null`.
pub fn extract_field_value(path: &str, view: &ContextView<'_>) -> Value {
    view.field_value(path)
}

/// Check that a condition can be evaluated at all.
pub fn validate_condition(condition: &Condition) -> Result<(), ConfigError> {
    if condition.field.trim().is_empty() {
        return Err(ConfigError::IncompleteCondition("field is required".into()));
    }
    if condition.operator.trim().is_empty() {
        return Err(ConfigError::IncompleteCondition("operator is required".into()));
    }
    let operator = Operator::parse(condition.operator.trim()).ok_or_else(|| {
        ConfigError::IncompleteCondition(format!("unknown operator '{}'", condition.operator))
    })?;
    if !operator.is_unary() && condition.value.is_null() {
        return Err(ConfigError::IncompleteCondition(format!(
            "operator '{}' requires a value",
            operator.name()
        )));
    }
    Ok(())
}

pub fn validate_group(group: &ConditionGroup) -> Result<(), ConfigError> {
    group.conditions.iter().try_for_each(validate_condition)
}

/// An operand after coercion
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Number(f64),
    Bool(bool),
    Text(String),
    List(Vec<Value>),
    Raw(Value),
}

fn coerce_pair(field: &Value, expected: &Value, field_type: FieldType) -> (Operand, Operand) {
    match field_type {
        FieldType::Auto => match (to_number(field), to_number(expected)) {
            (Some(a), Some(b)) => (Operand::Number(a), Operand::Number(b)),
            _ => match (boolish(field), boolish(expected)) {
                (Some(a), Some(b)) => (Operand::Bool(a), Operand::Bool(b)),
                _ => (Operand::Raw(field.clone()), Operand::Raw(expected.clone())),
            },
        },
        FieldType::Number => (
            Operand::Number(to_number(field).unwrap_or(f64::NAN)),
            Operand::Number(to_number(expected).unwrap_or(f64::NAN)),
        ),
        FieldType::Boolean => (
            Operand::Bool(boolish(field) == Some(true)),
            Operand::Bool(boolish(expected) == Some(true)),
        ),
        FieldType::String => (Operand::Text(text_of(field)), Operand::Text(text_of(expected))),
        FieldType::Array => (Operand::List(as_list(field)), Operand::List(as_list(expected))),
    }
}

fn apply_binary(operator: Operator, left: &Operand, right: &Operand) -> bool {
    match operator {
        Operator::Equals => operands_equal(left, right),
        Operator::NotEquals => !operands_equal(left, right),
        Operator::GreaterThan => compare_numbers(left, right, |a, b| a > b),
        Operator::GreaterThanOrEqual => compare_numbers(left, right, |a, b| a >= b),
        Operator::LessThan => compare_numbers(left, right, |a, b| a < b),
        Operator::LessThanOrEqual => compare_numbers(left, right, |a, b| a <= b),
        Operator::Contains => lowered(left).contains(&lowered(right)),
        Operator::NotContains => !lowered(left).contains(&lowered(right)),
        Operator::StartsWith => lowered(left).starts_with(&lowered(right)),
        Operator::EndsWith => lowered(left).ends_with(&lowered(right)),
        Operator::RegexMatch => regex_matches(&operand_text(left), &operand_text(right)),
        Operator::In => membership(left, right),
        Operator::NotIn => !membership(left, right),
        _ => false,
    }
}

fn apply_unary(operator: Operator, value: &Value) -> bool {
    match operator {
        Operator::Exists => !is_empty(value),
        Operator::NotExists => is_empty(value),
        Operator::IsTrue => literal_bool(value) == Some(true),
        Operator::IsFalse => literal_bool(value) == Some(false),
        Operator::IsNumber => match value {
            Value::Number(_) => true,
            Value::String(s) => parse_number(s).is_some(),
            _ => false,
        },
        Operator::IsEmail => value.as_str().is_some_and(|s| EMAIL_PATTERN.is_match(s.trim())),
        _ => false,
    }
}

fn operands_equal(left: &Operand, right: &Operand) -> bool {
    match (left, right) {
        (Operand::Number(a), Operand::Number(b)) => a == b,
        (Operand::Bool(a), Operand::Bool(b)) => a == b,
        (Operand::Text(a), Operand::Text(b)) => a == b,
        (Operand::List(a), Operand::List(b)) => a == b,
        (Operand::Raw(a), Operand::Raw(b)) => a == b,
        _ => false,
    }
}

fn compare_numbers(left: &Operand, right: &Operand, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (operand_number(left), operand_number(right)) {
        (Some(a), Some(b)) if !a.is_nan() && !b.is_nan() => cmp(a, b),
        _ => false,
    }
}

fn operand_number(operand: &Operand) -> Option<f64> {
    match operand {
        Operand::Number(n) => Some(*n),
        Operand::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Operand::Text(s) => parse_number(s),
        Operand::Raw(v) => to_number(v),
        Operand::List(_) => None,
    }
}

fn operand_text(operand: &Operand) -> String {
    match operand {
        Operand::Number(n) => format_number(*n),
        Operand::Bool(b) => b.to_string(),
        Operand::Text(s) => s.clone(),
        Operand::List(items) => items.iter().map(text_of).collect::<Vec<_>>().join(","),
        Operand::Raw(v) => text_of(v),
    }
}

fn lowered(operand: &Operand) -> String {
    operand_text(operand).to_lowercase()
}

fn regex_matches(text: &str, pattern: &str) -> bool {
    match Regex::new(&format!("(?i){}", pattern)) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "Invalid regex in condition");
            false
        }
    }
}

fn membership(left: &Operand, right: &Operand) -> bool {
    let needle = operand_text(left);
    let haystack: Vec<String> = match right {
        Operand::List(items) => items.iter().map(text_of).collect(),
        Operand::Raw(Value::Array(items)) => items.iter().map(text_of).collect(),
        other => operand_text(other).split(',').map(|s| s.trim().to_string()).collect(),
    };
    haystack.iter().any(|candidate| *candidate == needle)
}

/// Numeric view of a JSON value, `None` when it does not read as a finite number.
fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn boolish(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(x) if x == 1.0 => Some(true),
            Some(x) if x == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Only a boolean or the text "true"/"false" (any case) counts; everything else is neither.
fn literal_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Text form used for string coercion; `null` becomes the empty string.
pub(crate) fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use std::collections::HashMap;

    struct Fixture {
        trigger: Value,
        variables: Map<String, Value>,
        results: HashMap<String, Value>,
    }

    impl Fixture {
        fn new(trigger: Value) -> Self {
            Self {
                trigger,
                variables: Map::new(),
                results: HashMap::new(),
            }
        }

        fn view(&self) -> ContextView<'_> {
            ContextView {
                trigger: &self.trigger,
                variables: &self.variables,
                node_results: &self.results,
                current: None,
            }
        }
    }

    fn cond(field: &str, operator: &str, value: Value) -> Condition {
        Condition {
            field: field.into(),
            operator: operator.into(),
            value,
            field_type: FieldType::Auto,
        }
    }

    #[test]
    fn auto_mode_compares_numeric_strings_as_numbers() {
        let fx = Fixture::new(json!({ "n": "5" }));
        assert!(evaluate_condition(&cond("trigger.n", "greater_than", json!("3")), &fx.view()));
        assert!(evaluate_condition(&cond("trigger.n", "equals", json!(5)), &fx.view()));
        assert!(!evaluate_condition(&cond("trigger.n", "less_than", json!("3")), &fx.view()));
    }

    #[test]
    fn string_mode_equality_is_case_sensitive() {
        let fx = Fixture::new(json!({ "name": "abc" }));
        let mut condition = cond("trigger.name", "equals", json!("ABC"));
        condition.field_type = FieldType::String;

        assert!(!evaluate_condition(&condition, &fx.view()));
        condition.value = json!("abc");
        assert!(evaluate_condition(&condition, &fx.view()));
    }

    #[test]
    fn auto_mode_treats_boolish_words_as_booleans() {
        let fx = Fixture::new(json!({ "flag": "Yes" }));
        assert!(evaluate_condition(&cond("trigger.flag", "equals", json!(true)), &fx.view()));
        assert!(evaluate_condition(&cond("trigger.flag", "not_equals", json!("off")), &fx.view()));
    }

    #[test]
    fn text_operators_ignore_case() {
        let fx = Fixture::new(json!({ "subject": "Invoice #42 Overdue" }));
        let view = fx.view();
        assert!(evaluate_condition(&cond("trigger.subject", "contains", json!("overdue")), &view));
        assert!(evaluate_condition(&cond("trigger.subject", "starts_with", json!("INVOICE")), &view));
        assert!(evaluate_condition(&cond("trigger.subject", "ends_with", json!("due")), &view));
        assert!(evaluate_condition(&cond("trigger.subject", "not_contains", json!("paid")), &view));
        assert!(evaluate_condition(&cond("trigger.subject", "regex_match", json!(r"invoice #\d+")), &view));
        assert!(!evaluate_condition(&cond("trigger.subject", "regex_match", json!("(unclosed")), &view));
    }

    #[test]
    fn membership_accepts_arrays_and_comma_lists() {
        let fx = Fixture::new(json!({ "country": "de" }));
        let view = fx.view();
        assert!(evaluate_condition(&cond("trigger.country", "in", json!(["fr", "de"])), &view));
        assert!(evaluate_condition(&cond("trigger.country", "in", json!("fr, de ,it")), &view));
        assert!(evaluate_condition(&cond("trigger.country", "not_in", json!("us,ca")), &view));
    }

    #[test]
    fn unary_operators_ignore_value() {
        let fx = Fixture::new(json!({ "email": "ops@example.com", "blank": "", "count": "12", "on": "true" }));
        let view = fx.view();
        assert!(evaluate_condition(&cond("trigger.email", "exists", Value::Null), &view));
        assert!(evaluate_condition(&cond("trigger.blank", "not_exists", Value::Null), &view));
        assert!(evaluate_condition(&cond("trigger.missing", "not_exists", json!("ignored")), &view));
        assert!(evaluate_condition(&cond("trigger.email", "is_email", Value::Null), &view));
        assert!(evaluate_condition(&cond("trigger.count", "is_number", Value::Null), &view));
        assert!(!evaluate_condition(&cond("trigger.email", "is_number", Value::Null), &view));
        assert!(evaluate_condition(&cond("trigger.on", "is_true", Value::Null), &view));
        assert!(!evaluate_condition(&cond("trigger.missing", "is_false", Value::Null), &view));
        assert!(!evaluate_condition(&cond("trigger.missing", "is_true", Value::Null), &view));
    }

    #[test]
    fn is_true_and_is_false_only_accept_literal_booleans() {
        let fx = Fixture::new(json!({
            "flag": true, "off": false, "upper": "TRUE", "lower": "false",
            "yes": "yes", "on": "on", "one": 1, "one_text": "1", "zero": 0
        }));
        let view = fx.view();
        assert!(evaluate_condition(&cond("trigger.flag", "is_true", Value::Null), &view));
        assert!(evaluate_condition(&cond("trigger.upper", "is_true", Value::Null), &view));
        assert!(evaluate_condition(&cond("trigger.off", "is_false", Value::Null), &view));
        assert!(evaluate_condition(&cond("trigger.lower", "is_false", Value::Null), &view));
        for field in ["trigger.yes", "trigger.on", "trigger.one", "trigger.one_text"] {
            assert!(!evaluate_condition(&cond(field, "is_true", Value::Null), &view), "{field}");
        }
        assert!(!evaluate_condition(&cond("trigger.zero", "is_false", Value::Null), &view));
    }

    #[test]
    fn unknown_operator_is_false_not_an_error() {
        let fx = Fixture::new(json!({ "x": 1 }));
        assert!(!evaluate_condition(&cond("trigger.x", "roughly", json!(1)), &fx.view()));
        assert!(!evaluate_condition(&cond("", "equals", json!(1)), &fx.view()));
    }

    #[test]
    fn logic_combinators_follow_all_and_any() {
        let fx = Fixture::new(json!({ "a": 1, "b": 2 }));
        let view = fx.view();
        let pass = cond("trigger.a", "equals", json!(1));
        let fail = cond("trigger.b", "equals", json!(3));

        assert!(evaluate_conditions(&[], Logic::And, &view));
        assert!(evaluate_conditions(&[], Logic::Or, &view));
        assert!(evaluate_conditions(&[pass.clone(), pass.clone()], Logic::And, &view));
        assert!(!evaluate_conditions(&[pass.clone(), fail.clone()], Logic::And, &view));
        assert!(evaluate_conditions(&[fail.clone(), pass], Logic::Or, &view));
        assert!(!evaluate_conditions(&[fail.clone(), fail], Logic::Or, &view));
    }

    #[test]
    fn explicit_number_type_rejects_non_numeric() {
        let fx = Fixture::new(json!({ "v": "n/a" }));
        let mut condition = cond("trigger.v", "greater_than", json!(0));
        condition.field_type = FieldType::Number;
        assert!(!evaluate_condition(&condition, &fx.view()));
        condition.operator = "less_than_or_equal".into();
        assert!(!evaluate_condition(&condition, &fx.view()));
    }

    #[test]
    fn node_results_are_addressable() {
        let mut fx = Fixture::new(json!({}));
        fx.results
            .insert("score".into(), json!({ "success": true, "data": { "value": 91 } }));
        let condition = cond("nodes.score.value", "greater_than_or_equal", json!(90));
        assert!(evaluate_condition(&condition, &fx.view()));
    }

    #[test]
    fn validation_reports_incomplete_conditions() {
        assert!(validate_condition(&cond("trigger.a", "equals", json!(1))).is_ok());
        assert!(validate_condition(&cond("trigger.a", "exists", Value::Null)).is_ok());
        assert!(matches!(
            validate_condition(&cond("trigger.a", "equals", Value::Null)),
            Err(ConfigError::IncompleteCondition(_))
        ));
        assert!(validate_condition(&cond("trigger.a", "nearly", json!(1))).is_err());
        assert!(validate_condition(&cond("", "equals", json!(1))).is_err());

        let operators = available_operators();
        assert_eq!(operators.len(), Operator::ALL.len());
        assert!(operators.iter().any(|op| op.name == "is_email" && op.unary));
    }
}
