use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A metric or parameter value as it appears on the wire.
///
/// The platform publishes metric predictions as JSON scalars. Booleans are
/// coerced to integers when handed to the engine; arrays, objects and null
/// are not valid parameter values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricScalar {
	Bool(bool),
	Integer(i64),
	Float(f64),
	Text(String),
}

/// Raised when a context carries a value kind the engine cannot accept.
#[derive(Debug, Error)]
#[error("unsupported value kind for '{name}': {value}")]
pub struct UnsupportedValue {
	pub name: String,
	pub value: serde_json::Value,
}

impl MetricScalar {
	/// Converts a raw JSON value into an engine-compatible scalar.
	///
	/// Integers (signed and unsigned), booleans, floats and strings are
	/// accepted; everything else is an [`UnsupportedValue`].
	pub fn from_json(name: &str, value: &serde_json::Value) -> Result<Self, UnsupportedValue> {
		use serde_json::Value;

		match value {
			Value::Bool(flag) => Ok(Self::Bool(*flag)),
			Value::Number(number) => {
				if let Some(integer) = number.as_i64() {
					Ok(Self::Integer(integer))
				} else if let Some(unsigned) = number.as_u64() {
					// Beyond i64::MAX; keep the magnitude as a float.
					Ok(Self::Float(unsigned as f64))
				} else {
					Ok(Self::Float(number.as_f64().unwrap_or(f64::NAN)))
				}
			}
			Value::String(text) => Ok(Self::Text(text.clone())),
			other => Err(UnsupportedValue {
				name: name.to_string(),
				value: other.clone(),
			}),
		}
	}

	/// Numeric view of the scalar, with booleans coerced to 0/1.
	///
	/// Returns `None` for text values.
	pub fn as_number(&self) -> Option<f64> {
		match self {
			Self::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
			Self::Integer(integer) => Some(*integer as f64),
			Self::Float(float) => Some(*float),
			Self::Text(_) => None,
		}
	}
}

impl std::fmt::Display for MetricScalar {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Bool(flag) => write!(f, "{}", flag),
			Self::Integer(integer) => write!(f, "{}", integer),
			Self::Float(float) => write!(f, "{}", float),
			Self::Text(text) => write!(f, "{}", text),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn scalars_convert_from_json() {
		assert_eq!(
			MetricScalar::from_json("m", &json!(5)).unwrap(),
			MetricScalar::Integer(5)
		);
		assert_eq!(
			MetricScalar::from_json("m", &json!(2.5)).unwrap(),
			MetricScalar::Float(2.5)
		);
		assert_eq!(
			MetricScalar::from_json("m", &json!(true)).unwrap(),
			MetricScalar::Bool(true)
		);
		assert_eq!(
			MetricScalar::from_json("m", &json!("edge")).unwrap(),
			MetricScalar::Text("edge".into())
		);
	}

	#[test]
	fn compound_values_are_rejected() {
		assert!(MetricScalar::from_json("m", &json!([1, 2])).is_err());
		assert!(MetricScalar::from_json("m", &json!({"a": 1})).is_err());
		assert!(MetricScalar::from_json("m", &serde_json::Value::Null).is_err());
	}

	#[test]
	fn booleans_coerce_to_integers() {
		assert_eq!(MetricScalar::Bool(true).as_number(), Some(1.0));
		assert_eq!(MetricScalar::Bool(false).as_number(), Some(0.0));
		assert_eq!(MetricScalar::Text("x".into()).as_number(), None);
	}
}
