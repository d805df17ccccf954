//! The engine's dynamic value model as seen by extension calls.
//!
//! Coercions here mirror what the engine applies everywhere else, so a native
//! capability observes the same implicit conversions as a built-in.

/// One dynamically-typed engine value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Numeric view as an integer. Reals truncate toward zero; text must be a
    /// complete integer literal. Null and blobs never coerce.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Real(r) if r.is_finite() => Some(*r as i64),
            Value::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    /// Numeric view as a real. Integers widen exactly (within f64 range);
    /// text must be a complete numeric literal.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_widens_to_real_exactly() {
        assert_eq!(Value::Integer(21).as_real(), Some(21.0));
    }

    #[test]
    fn real_truncates_to_integer() {
        assert_eq!(Value::Real(3.9).as_integer(), Some(3));
        assert_eq!(Value::Real(-3.9).as_integer(), Some(-3));
        assert_eq!(Value::Real(f64::NAN).as_integer(), None);
    }

    #[test]
    fn text_parses_complete_literals_only() {
        assert_eq!(Value::Text(" 42 ".into()).as_integer(), Some(42));
        assert_eq!(Value::Text("42abc".into()).as_integer(), None);
        assert_eq!(Value::Text("2.5".into()).as_real(), Some(2.5));
    }

    #[test]
    fn null_and_blob_never_coerce() {
        assert_eq!(Value::Null.as_integer(), None);
        assert_eq!(Value::Blob(vec![1]).as_real(), None);
    }
}
