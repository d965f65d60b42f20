//! Evaluator plugins: turn a rendered template into an [`Evaluated`] value.

use std::collections::BTreeMap;
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;
use std::sync::Arc;

use date_types::Evaluated;
use serde_yaml::Value;

use crate::error::EvaluationError;

/// A pure, deterministic conversion of a rendered template.
pub type Evaluator = Arc<dyn Fn(&str) -> Result<Evaluated, EvaluationError> + Send + Sync>;

/// Evaluators by the name a language specification refers to them with.
#[derive(Clone)]
pub struct EvaluatorRegistry {
    evaluators: BTreeMap<String, Evaluator>,
}

impl EvaluatorRegistry {
    /// A registry without any evaluators.
    pub fn empty() -> Self {
        Self {
            evaluators: BTreeMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: &str, evaluator: F) -> &mut Self
    where
        F: Fn(&str) -> Result<Evaluated, EvaluationError> + Send + Sync + 'static,
    {
        self.evaluators.insert(name.to_string(), Arc::new(evaluator));
        self
    }

    pub fn get(&self, name: &str) -> Option<Evaluator> {
        self.evaluators.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.evaluators.keys().map(String::as_str)
    }
}

/// `numeral`, `dict` and `text`.
impl Default for EvaluatorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register("numeral", numeral_value)
            .register("dict", dict_value)
            .register("text", text_value);
        registry
    }
}

impl fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

// ── numeral ──────────────────────────────────────────────────────────────

/// Integer arithmetic: `+`, `-`, `*` and parentheses, `*` binding tighter.
///
/// `"3*100+20+5"` → `325`.
pub fn numeral_value(expression: &str) -> Result<Evaluated, EvaluationError> {
    let mut arithmetic = Arithmetic {
        expression,
        chars: expression.char_indices().peekable(),
    };
    let value = arithmetic.sum()?;
    match arithmetic.peek() {
        None => Ok(Evaluated::Number(value)),
        Some((offset, c)) => Err(arithmetic.error(format!("unexpected `{c}` at byte {offset}"))),
    }
}

struct Arithmetic<'e> {
    expression: &'e str,
    chars: Peekable<CharIndices<'e>>,
}

impl Arithmetic<'_> {
    fn error(&self, reason: impl Into<String>) -> EvaluationError {
        EvaluationError::new(self.expression, reason)
    }

    /// Next non-whitespace character, not consumed.
    fn peek(&mut self) -> Option<(usize, char)> {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        self.chars.peek().copied()
    }

    fn sum(&mut self) -> Result<i64, EvaluationError> {
        let mut total = self.product()?;
        loop {
            let op = match self.peek() {
                Some((_, op @ ('+' | '-'))) => op,
                _ => return Ok(total),
            };
            self.chars.next();
            let rhs = self.product()?;
            total = if op == '+' {
                total.checked_add(rhs)
            } else {
                total.checked_sub(rhs)
            }
            .ok_or_else(|| self.error("overflow"))?;
        }
    }

    fn product(&mut self) -> Result<i64, EvaluationError> {
        let mut total = self.factor()?;
        while let Some((_, '*')) = self.peek() {
            self.chars.next();
            let rhs = self.factor()?;
            total = total
                .checked_mul(rhs)
                .ok_or_else(|| self.error("overflow"))?;
        }
        Ok(total)
    }

    fn factor(&mut self) -> Result<i64, EvaluationError> {
        match self.peek() {
            Some((_, '(')) => {
                self.chars.next();
                let inner = self.sum()?;
                match self.peek() {
                    Some((_, ')')) => {
                        self.chars.next();
                        Ok(inner)
                    }
                    _ => Err(self.error("missing `)`")),
                }
            }
            Some((_, '-')) => {
                self.chars.next();
                let inner = self.factor()?;
                inner.checked_neg().ok_or_else(|| self.error("overflow"))
            }
            Some((start, c)) if c.is_ascii_digit() => {
                let mut end = start;
                while let Some((offset, c)) = self.chars.next_if(|(_, c)| c.is_ascii_digit()) {
                    end = offset + c.len_utf8();
                }
                self.expression[start..end]
                    .parse()
                    .map_err(|_| self.error("number out of range"))
            }
            Some((offset, c)) => Err(self.error(format!("unexpected `{c}` at byte {offset}"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

// ── dict ─────────────────────────────────────────────────────────────────

/// A flow mapping such as `"{day: 5, month: 3}"` as a record.
pub fn dict_value(expression: &str) -> Result<Evaluated, EvaluationError> {
    let value: Value = serde_yaml::from_str(expression)
        .map_err(|e| EvaluationError::new(expression, e.to_string()))?;
    match value {
        Value::Mapping(_) => record_field(expression, value),
        _ => Err(EvaluationError::new(expression, "not a mapping")),
    }
}

fn record_field(expression: &str, value: Value) -> Result<Evaluated, EvaluationError> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(n) => Ok(Evaluated::Number(n)),
            None => Ok(Evaluated::Text(n.to_string())),
        },
        Value::String(s) => Ok(Evaluated::Text(s)),
        Value::Bool(b) => Ok(Evaluated::Text(b.to_string())),
        Value::Mapping(mapping) => {
            let mut fields = BTreeMap::new();
            for (key, value) in mapping {
                let key = match key {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return Err(EvaluationError::new(expression, "unsupported key")),
                };
                if key.starts_with('#') {
                    return Err(EvaluationError::new(
                        expression,
                        "keys starting with `#` are reserved",
                    ));
                }
                fields.insert(key, record_field(expression, value)?);
            }
            Ok(Evaluated::Record(fields))
        }
        Value::Tagged(tagged) => record_field(expression, tagged.value),
        Value::Null => Err(EvaluationError::new(expression, "missing value")),
        Value::Sequence(_) => Err(EvaluationError::new(expression, "lists are not supported")),
    }
}

// ── text ─────────────────────────────────────────────────────────────────

pub fn text_value(expression: &str) -> Result<Evaluated, EvaluationError> {
    Ok(Evaluated::Text(expression.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn number(expression: &str) -> Option<i64> {
        numeral_value(expression).ok().and_then(|v| v.as_number())
    }

    #[test]
    fn test_numeral_precedence() {
        assert_eq!(number("1+20"), Some(21));
        assert_eq!(number("3*100+20+5"), Some(325));
        assert_eq!(number("2 * (10 + 5) - 1"), Some(29));
        assert_eq!(number("-4+10"), Some(6));
        assert_eq!(number("1000*1+800"), Some(1800));
    }

    #[test]
    fn test_numeral_rejects_garbage() {
        for bad in ["", "five", "1+", "(2", "2)", "1 2", "9223372036854775807*2"] {
            assert!(numeral_value(bad).is_err(), "{bad:?} should fail");
        }
        let error = numeral_value("{day}+1").unwrap_err();
        assert_eq!(error.expression, "{day}+1");
    }

    #[test]
    fn test_dict_record() {
        let value = dict_value("{day: 5, month: 3, type: died}").unwrap();
        assert_eq!(value.field("day"), Some(&Evaluated::Number(5)));
        assert_eq!(value.field("month"), Some(&Evaluated::Number(3)));
        assert_eq!(value.field("type"), Some(&Evaluated::Text("died".to_string())));
        assert_eq!(value.to_string(), "{day: 5, month: 3, type: died}");
    }

    #[test]
    fn test_dict_nested_and_invalid() {
        let value = dict_value("{date: {day: 1}, year: 1825}").unwrap();
        assert_eq!(
            value.field("date").and_then(|d| d.field("day")),
            Some(&Evaluated::Number(1))
        );
        assert!(dict_value("{day: [1, 2]}").is_err());
        assert!(dict_value("{day: }").is_err());
        assert!(dict_value("5").is_err());
        assert!(dict_value("{day: 5").is_err());
    }

    #[test]
    fn test_dict_reads_back_substituted_text() {
        for note in ["died, buried", "at: home", "{x}", "plain"] {
            let record = format!("{{note: {}, day: 1}}", Evaluated::Text(note.to_string()));
            let value = dict_value(&record).unwrap();
            assert_eq!(
                value.field("note"),
                Some(&Evaluated::Text(note.to_string())),
                "{record}"
            );
        }
        assert!(dict_value("{\"#error\": x}").is_err());
    }

    #[test]
    fn test_registry() {
        let registry = EvaluatorRegistry::default();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["dict", "numeral", "text"]);
        let text = registry.get("text").unwrap();
        assert_eq!(text("hic").unwrap(), Evaluated::Text("hic".to_string()));
        assert!(registry.get("roman").is_none());

        let mut registry = EvaluatorRegistry::empty();
        registry.register("double", |e: &str| {
            numeral_value(e).map(|v| Evaluated::Number(v.as_number().unwrap_or_default() * 2))
        });
        assert_eq!(registry.get("double").unwrap()("4").unwrap(), Evaluated::Number(8));
    }
}
