//! Path queries and boolean conditions over JSON values.
//!
//! Paths: `$`, `$.a.b`, `$.arr[0]`, `$.arr[*].field`. A path that does not
//! start with `$` is a literal and evaluates to itself.
//!
//! Conditions combine comparisons (`>`, `<`, `>=`, `<=`, `==`, `!=`) with
//! `&&`, `||` and `!`, evaluated left to right. `exists($.p)`,
//! `contains($.p, "x")` and a trailing `.length` are supported. A comparison
//! whose left side does not resolve is false.

#[cfg(test)]
#[path = "expression_tests.rs"]
mod tests;

use serde_json::{Number, Value};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
enum Index {
    At(usize),
    Wildcard,
}

#[derive(Debug, Clone)]
struct Segment<'a> {
    key: &'a str,
    indices: Vec<Index>,
}

/// Resolve `path` against `data`. `None` means undefined.
pub fn evaluate_json_path(path: &str, data: &Value) -> Option<Value> {
    let Some(rest) = path.strip_prefix('$') else {
        return Some(Value::String(path.to_string()));
    };
    if rest.is_empty() {
        return Some(data.clone());
    }

    let rest = match rest.strip_prefix('.') {
        Some(stripped) => stripped,
        None if rest.starts_with('[') => rest,
        None => return None,
    };

    let segments = rest
        .split('.')
        .map(parse_segment)
        .collect::<Option<Vec<_>>>()?;
    resolve(data, &segments)
}

fn parse_segment(raw: &str) -> Option<Segment<'_>> {
    let (key, mut brackets) = match raw.find('[') {
        Some(pos) => (&raw[..pos], &raw[pos..]),
        None => (raw, ""),
    };
    if key.is_empty() && brackets.is_empty() {
        return None;
    }

    let mut indices = Vec::new();
    while !brackets.is_empty() {
        let inner = brackets.strip_prefix('[')?;
        let close = inner.find(']')?;
        let token = inner[..close].trim();
        indices.push(if token == "*" {
            Index::Wildcard
        } else {
            Index::At(token.parse().ok()?)
        });
        brackets = &inner[close + 1..];
    }

    Some(Segment { key, indices })
}

fn resolve(current: &Value, segments: &[Segment<'_>]) -> Option<Value> {
    let Some((segment, rest)) = segments.split_first() else {
        return Some(current.clone());
    };

    let mut value = if segment.key.is_empty() {
        current
    } else {
        current.as_object()?.get(segment.key)?
    };

    for (pos, index) in segment.indices.iter().enumerate() {
        match index {
            Index::At(n) => value = value.as_array()?.get(*n)?,
            Index::Wildcard => {
                let items = value.as_array()?;
                let mut remaining = Vec::with_capacity(rest.len() + 1);
                remaining.push(Segment {
                    key: "",
                    indices: segment.indices[pos + 1..].to_vec(),
                });
                remaining.extend(rest.iter().cloned());
                let mapped = items
                    .iter()
                    .map(|item| resolve(item, &remaining).unwrap_or(Value::Null))
                    .collect();
                return Some(Value::Array(mapped));
            }
        }
    }

    resolve(value, rest)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Logical {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Ge,
    Le,
    Eq,
    Ne,
    Gt,
    Lt,
}

const COMPARISONS: [(&str, Comparison); 6] = [
    (">=", Comparison::Ge),
    ("<=", Comparison::Le),
    ("==", Comparison::Eq),
    ("!=", Comparison::Ne),
    (">", Comparison::Gt),
    ("<", Comparison::Lt),
];

/// Evaluate a boolean condition against `data`. Never panics; malformed or
/// unresolvable conditions are false.
pub fn evaluate_condition(expr: &str, data: &Value) -> bool {
    let (operands, operators) = split_logical(expr);
    let Some((first, rest)) = operands.split_first() else {
        return false;
    };

    let mut result = evaluate_unary(first, data);
    for (operator, operand) in operators.iter().zip(rest) {
        result = match operator {
            Logical::And => result && evaluate_unary(operand, data),
            Logical::Or => result || evaluate_unary(operand, data),
        };
    }
    result
}

/// Check quoting and parenthesis balance of a condition.
pub fn check_condition_syntax(expr: &str) -> Result<(), String> {
    if expr.trim().is_empty() {
        return Err("condition is empty".to_string());
    }
    let mut scanner = Scanner::default();
    for c in expr.chars() {
        scanner.advance(c);
        if scanner.depth < 0 {
            return Err(format!("unbalanced ')' in '{}'", expr));
        }
    }
    if scanner.quote.is_some() {
        return Err(format!("unterminated string literal in '{}'", expr));
    }
    if scanner.depth != 0 {
        return Err(format!("unbalanced '(' in '{}'", expr));
    }
    Ok(())
}

/// Tracks string literals and parenthesis depth while scanning.
#[derive(Default)]
struct Scanner {
    quote: Option<char>,
    escaped: bool,
    depth: i32,
}

impl Scanner {
    fn advance(&mut self, c: char) {
        if let Some(q) = self.quote {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == q {
                self.quote = None;
            }
            return;
        }
        match c {
            '"' | '\'' => self.quote = Some(c),
            '(' => self.depth += 1,
            ')' => self.depth -= 1,
            _ => {}
        }
    }

    fn at_top_level(&self) -> bool {
        self.quote.is_none() && self.depth == 0
    }
}

fn split_logical(expr: &str) -> (Vec<&str>, Vec<Logical>) {
    let mut operands = Vec::new();
    let mut operators = Vec::new();
    let mut scanner = Scanner::default();
    let mut start = 0;
    let mut skip_next = false;

    for (i, c) in expr.char_indices() {
        if skip_next {
            skip_next = false;
            continue;
        }
        if scanner.at_top_level() {
            let rest = &expr[i..];
            let operator = if rest.starts_with("&&") {
                Some(Logical::And)
            } else if rest.starts_with("||") {
                Some(Logical::Or)
            } else {
                None
            };
            if let Some(operator) = operator {
                operands.push(expr[start..i].trim());
                operators.push(operator);
                start = i + 2;
                skip_next = true;
                continue;
            }
        }
        scanner.advance(c);
    }
    operands.push(expr[start..].trim());

    (operands, operators)
}

fn evaluate_unary(operand: &str, data: &Value) -> bool {
    let operand = operand.trim();
    if let Some(negated) = operand.strip_prefix('!') {
        if !negated.starts_with('=') {
            return !evaluate_unary(negated, data);
        }
    }
    if let Some(inner) = strip_enclosing_parens(operand) {
        return evaluate_condition(inner, data);
    }
    evaluate_atom(operand, data)
}

fn strip_enclosing_parens(s: &str) -> Option<&str> {
    let inner = s.strip_prefix('(')?.strip_suffix(')')?;
    let mut scanner = Scanner::default();
    for c in inner.chars() {
        scanner.advance(c);
        if scanner.depth < 0 {
            return None;
        }
    }
    Some(inner)
}

fn evaluate_atom(atom: &str, data: &Value) -> bool {
    if let Some(arg) = call_argument(atom, "exists") {
        return arg.trim_start().starts_with('$') && resolve_operand(arg, data).is_some();
    }

    if let Some(args) = call_argument(atom, "contains") {
        let parts = split_arguments(args);
        if parts.len() != 2 {
            debug!("contains() expects two arguments: {}", atom);
            return false;
        }
        return match (resolve_operand(parts[0], data), resolve_operand(parts[1], data)) {
            (Some(haystack), Some(needle)) => contains(&haystack, &needle),
            _ => false,
        };
    }

    if let Some((lhs, comparison, rhs)) = split_comparison(atom) {
        return compare(
            resolve_operand(lhs, data),
            comparison,
            resolve_operand(rhs, data),
        );
    }

    if is_path_or_literal(atom) {
        return resolve_operand(atom, data).is_some_and(|v| truthy(&v));
    }

    debug!("Unrecognized condition atom '{}' evaluates to false", atom);
    false
}

fn call_argument<'a>(atom: &'a str, name: &str) -> Option<&'a str> {
    atom.strip_prefix(name)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}

fn split_arguments(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut scanner = Scanner::default();
    let mut start = 0;
    for (i, c) in args.char_indices() {
        if c == ',' && scanner.at_top_level() {
            parts.push(args[start..i].trim());
            start = i + 1;
            continue;
        }
        scanner.advance(c);
    }
    parts.push(args[start..].trim());
    parts
}

fn split_comparison(atom: &str) -> Option<(&str, Comparison, &str)> {
    let mut scanner = Scanner::default();
    for (i, c) in atom.char_indices() {
        if scanner.at_top_level() {
            let rest = &atom[i..];
            if let Some((token, comparison)) =
                COMPARISONS.iter().find(|(token, _)| rest.starts_with(token))
            {
                return Some((atom[..i].trim(), *comparison, atom[i + token.len()..].trim()));
            }
        }
        scanner.advance(c);
    }
    None
}

fn is_path_or_literal(s: &str) -> bool {
    s.starts_with('$')
        || quoted(s).is_some()
        || matches!(s, "true" | "false" | "null")
        || s.parse::<f64>().is_ok()
}

fn quoted(s: &str) -> Option<&str> {
    if s.len() < 2 {
        return None;
    }
    let first = s.chars().next()?;
    if (first == '"' || first == '\'') && s.ends_with(first) {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

fn resolve_operand(raw: &str, data: &Value) -> Option<Value> {
    let raw = raw.trim();

    if raw.starts_with('$') {
        if let Some(target) = raw.strip_suffix(".length") {
            if let Some(length) = evaluate_json_path(target, data).and_then(|v| length_of(&v)) {
                return Some(length);
            }
        }
        return evaluate_json_path(raw, data);
    }

    if let Some(text) = quoted(raw) {
        return Some(Value::String(text.to_string()));
    }

    match raw {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" => return Some(Value::Null),
        _ => {}
    }

    if let Ok(int) = raw.parse::<i64>() {
        return Some(Value::Number(int.into()));
    }
    if let Ok(float) = raw.parse::<f64>() {
        return Number::from_f64(float).map(Value::Number);
    }

    // Bare words compare as strings (`status == active`).
    Some(Value::String(raw.to_string()))
}

fn length_of(value: &Value) -> Option<Value> {
    match value {
        Value::Array(items) => Some(Value::from(items.len())),
        Value::String(text) => Some(Value::from(text.chars().count())),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse().ok(),
        _ => None,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_))
        | (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_)) => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        _ => left == right,
    }
}

fn compare(left: Option<Value>, comparison: Comparison, right: Option<Value>) -> bool {
    let (Some(left), Some(right)) = (left, right) else {
        return false;
    };

    let ordering = || match (as_number(&left), as_number(&right)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (&left, &right) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        },
    };

    match comparison {
        Comparison::Eq => loose_eq(&left, &right),
        Comparison::Ne => !loose_eq(&left, &right),
        Comparison::Gt => ordering().is_some_and(|o| o.is_gt()),
        Comparison::Lt => ordering().is_some_and(|o| o.is_lt()),
        Comparison::Ge => ordering().is_some_and(|o| o.is_ge()),
        Comparison::Le => ordering().is_some_and(|o| o.is_le()),
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(text) => match needle {
            Value::String(sub) => text.contains(sub.as_str()),
            Value::Number(n) => text.contains(&n.to_string()),
            _ => false,
        },
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        _ => false,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
