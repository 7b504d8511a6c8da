//! Expression evaluation for decision nodes.
//!
//! Expressions are plain text with `{key}` placeholders, e.g.
//! `{Amount} > 1000` or `{Status} == "Open"`. Evaluation order:
//!
//! 1. placeholders are replaced by data values (strings quoted, missing keys
//!    become `null`);
//! 2. the first operator present among `==`, `!=`, `>`, `<` (in that order)
//!    splits the text; `==`/`!=` compare quote-stripped strings, `>`/`<`
//!    compare numbers and fall through when either side is not a number;
//! 3. otherwise the whole text is read as a boolean literal;
//! 4. anything else evaluates to `true`. A malformed expression (an
//!    unterminated placeholder) evaluates to `false`.

use thiserror::Error;
use wfcore::{DataMap, Value};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("unterminated placeholder at byte {0}")]
    UnterminatedPlaceholder(usize),
}

/// Evaluate `expression` against `data`.
pub fn evaluate(expression: &str, data: &DataMap) -> bool {
    match try_evaluate(expression, data) {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(expression, error = %e, "condition evaluation failed");
            false
        }
    }
}

fn try_evaluate(expression: &str, data: &DataMap) -> Result<bool, EvalError> {
    let text = substitute_placeholders(expression, data)?;

    if let Some((left, right)) = text.split_once("==") {
        return Ok(strip_quotes(left) == strip_quotes(right));
    }
    if let Some((left, right)) = text.split_once("!=") {
        return Ok(strip_quotes(left) != strip_quotes(right));
    }
    if let Some((left, right)) = text.split_once('>') {
        if let (Some(l), Some(r)) = (parse_number(left), parse_number(right)) {
            return Ok(l > r);
        }
    }
    if let Some((left, right)) = text.split_once('<') {
        if let Some((l, r)) = parse_number(left).zip(parse_number(right)) {
            return Ok(l < r);
        }
    }
    if let Some(b) = parse_bool(&text) {
        return Ok(b);
    }

    Ok(true)
}

/// Replace `{key}` with the expression literal of the matching value.
pub fn substitute_placeholders(expression: &str, data: &DataMap) -> Result<String, EvalError> {
    replace_placeholders(expression, |key| {
        Some(
            data.get(key)
                .map(Value::to_expression_literal)
                .unwrap_or_else(|| "null".to_string()),
        )
    })
}

/// Render `{key}` placeholders for display text. Unknown keys are left as-is,
/// and so is a trailing unterminated brace.
pub fn render_template(template: &str, data: &DataMap) -> String {
    replace_placeholders(template, |key| data.get(key).map(Value::to_string))
        .unwrap_or_else(|_| template.to_string())
}

fn replace_placeholders<F>(text: &str, mut lookup: F) -> Result<String, EvalError>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut offset = 0;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or(EvalError::UnterminatedPlaceholder(offset + open))?;
        let key = &after[..close];
        match lookup(key) {
            Some(value) => out.push_str(&value),
            None => {
                out.push('{');
                out.push_str(key);
                out.push('}');
            }
        }
        let consumed = open + 1 + close + 1;
        offset += consumed;
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    Ok(out)
}

fn strip_quotes(operand: &str) -> &str {
    operand.trim().trim_matches(|c| c == '"' || c == '\'')
}

fn parse_number(operand: &str) -> Option<f64> {
    operand.trim().parse::<f64>().ok()
}

fn parse_bool(text: &str) -> Option<bool> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("true") {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, Value)]) -> DataMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn numeric_comparison() {
        let d = data(&[("Amount", Value::Number(500.0))]);
        assert!(!evaluate("{Amount} > 1000", &d));
        assert!(evaluate("{Amount} < 1000", &d));
        assert!(evaluate("{Amount}>499.5", &d));
    }

    #[test]
    fn string_equality_strips_quotes() {
        let d = data(&[("Status", Value::from("Open"))]);
        assert!(evaluate("{Status} == \"Open\"", &d));
        assert!(evaluate("{Status} == 'Open'", &d));
        assert!(evaluate("{Status} != Closed", &d));
        assert!(!evaluate("{Status} != \"Open\"", &d));
    }

    #[test]
    fn missing_key_becomes_null() {
        assert_eq!(
            substitute_placeholders("{Nope} == null", &DataMap::new()).unwrap(),
            "null == null"
        );
        assert!(evaluate("{Nope} == null", &DataMap::new()));
    }

    #[test]
    fn equality_wins_over_relational_operators() {
        // `==` is checked first, so the `>` inside the operand is never used.
        let d = data(&[("A", Value::from("x>y"))]);
        assert!(evaluate("{A} == \"x>y\"", &d));
    }

    #[test]
    fn non_numeric_relational_falls_through() {
        // `>` skipped, no `<`, not a boolean: unparseable, so true.
        let d = data(&[("Amount", Value::from("500"))]);
        assert!(evaluate("{Amount} > 1000", &d));
        // `>=` leaves "= 5" on the right, which is not a number either.
        assert!(evaluate("3 >= 5", &DataMap::new()));
    }

    #[test]
    fn greater_than_falls_through_to_less_than() {
        // Split on '>' gives "a" and "1 < 2": not numbers. Split on '<' gives
        // "a > 1" and "2": also not numbers. Falls through to the default.
        assert!(evaluate("a > 1 < 2", &DataMap::new()));
    }

    #[test]
    fn boolean_literals() {
        let d = data(&[("Flag", Value::Bool(false))]);
        assert!(!evaluate("{Flag}", &d));
        assert!(evaluate("TRUE", &d));
        assert!(!evaluate(" false ", &d));
    }

    #[test]
    fn unparseable_is_true_but_malformed_is_false() {
        assert!(evaluate("whatever this is", &DataMap::new()));
        assert!(evaluate("", &DataMap::new()));
        assert!(!evaluate("{Amount > 1000", &DataMap::new()));
    }

    #[test]
    fn render_template_uses_display_form() {
        let d = data(&[("Name", Value::from("Ann")), ("Amount", Value::Number(12.0))]);
        assert_eq!(
            render_template("Hi {Name}, {Amount} due ({Unknown})", &d),
            "Hi Ann, 12 due ({Unknown})"
        );
        assert_eq!(render_template("broken {Name", &d), "broken {Name");
    }
}
