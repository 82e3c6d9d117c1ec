//! Typed parameters.
//!
//! Config files carry every value as text. Each declared parameter has a
//! [`ParamType`] whose parser turns that text into a [`ParamValue`]; the
//! value's `Display` form is what gets written back, so text → value → text
//! is stable.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Declared type of a node parameter or run detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamType {
  Int,
  Float,
  Str,
  /// Path to an existing regular file.
  File,
  /// Path to an existing directory.
  Directory,
}

impl ParamType {
  /// Parse a raw config value.
  pub fn parse(&self, raw: &str) -> Result<ParamValue, ParseError> {
    match self {
      ParamType::Int => raw
        .trim()
        .parse::<i64>()
        .map(ParamValue::Int)
        .map_err(|e| ParseError::new(format!("'{}' is not an integer: {}", raw, e))),

      ParamType::Float => {
        let value = raw
          .trim()
          .parse::<f64>()
          .map_err(|e| ParseError::new(format!("'{}' is not a number: {}", raw, e)))?;
        if value.is_nan() {
          return Err(ParseError::new("NaN is not a valid value"));
        }
        Ok(ParamValue::Float(value))
      }

      ParamType::Str => Ok(ParamValue::Str(raw.to_string())),

      ParamType::File => {
        if Path::new(raw).is_file() {
          Ok(ParamValue::File(raw.to_string()))
        } else {
          Err(ParseError::new(format!("'{}' is not an existing file", raw)))
        }
      }

      ParamType::Directory => {
        if Path::new(raw).is_dir() {
          Ok(ParamValue::Directory(raw.to_string()))
        } else {
          Err(ParseError::new(format!("'{}' is not an existing directory", raw)))
        }
      }
    }
  }
}

impl fmt::Display for ParamType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ParamType::Int => "Int",
      ParamType::Float => "Float",
      ParamType::Str => "Str",
      ParamType::File => "File",
      ParamType::Directory => "Directory",
    };
    f.write_str(name)
  }
}

/// A parsed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ParamValue {
  Int(i64),
  Float(f64),
  Str(String),
  File(String),
  Directory(String),
}

impl ParamValue {
  pub fn param_type(&self) -> ParamType {
    match self {
      ParamValue::Int(_) => ParamType::Int,
      ParamValue::Float(_) => ParamType::Float,
      ParamValue::Str(_) => ParamType::Str,
      ParamValue::File(_) => ParamType::File,
      ParamValue::Directory(_) => ParamType::Directory,
    }
  }

  pub fn as_int(&self) -> Option<i64> {
    match self {
      ParamValue::Int(v) => Some(*v),
      _ => None,
    }
  }

  pub fn as_float(&self) -> Option<f64> {
    match self {
      ParamValue::Float(v) => Some(*v),
      _ => None,
    }
  }

  /// Text payload of `Str`, `File`, and `Directory` values.
  pub fn as_str(&self) -> Option<&str> {
    match self {
      ParamValue::Str(v) | ParamValue::File(v) | ParamValue::Directory(v) => Some(v),
      _ => None,
    }
  }
}

impl fmt::Display for ParamValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ParamValue::Int(v) => write!(f, "{}", v),
      ParamValue::Float(v) => write!(f, "{}", v),
      ParamValue::Str(v) | ParamValue::File(v) | ParamValue::Directory(v) => f.write_str(v),
    }
  }
}

/// Parameter name → value.
pub type ParamMap = BTreeMap<String, ParamValue>;

/// A fully validated, typed configuration for one run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunValues {
  pub run_key: String,
  /// Run details, keyed by detail name (without `run_key`).
  pub details: ParamMap,
  /// Node parameters, keyed by node name then parameter name.
  pub nodes: BTreeMap<String, ParamMap>,
}

impl RunValues {
  /// Parameters of a single node.
  pub fn node(&self, name: &str) -> Option<&ParamMap> {
    self.nodes.get(name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_int() {
    assert_eq!(ParamType::Int.parse("1").unwrap(), ParamValue::Int(1));
    assert_eq!(ParamType::Int.parse("-1").unwrap(), ParamValue::Int(-1));
    assert_eq!(ParamType::Int.parse(" 4 ").unwrap(), ParamValue::Int(4));
    assert_eq!(
      ParamType::Int.parse("385038345").unwrap(),
      ParamValue::Int(385038345)
    );
    assert!(ParamType::Int.parse("395.98").is_err());
    assert!(ParamType::Int.parse("test").is_err());
    assert!(ParamType::Int.parse("").is_err());
  }

  #[test]
  fn test_parse_float() {
    assert_eq!(
      ParamType::Float.parse("1.305329").unwrap(),
      ParamValue::Float(1.305329)
    );
    assert_eq!(
      ParamType::Float.parse(".40285").unwrap(),
      ParamValue::Float(0.40285)
    );
    assert_eq!(
      ParamType::Float.parse("39127").unwrap(),
      ParamValue::Float(39127.0)
    );
    assert_eq!(
      ParamType::Float.parse("inf").unwrap(),
      ParamValue::Float(f64::INFINITY)
    );
    assert!(ParamType::Float.parse("NaN").is_err());
    assert!(ParamType::Float.parse("test").is_err());
  }

  #[test]
  fn test_parse_str_keeps_text() {
    assert_eq!(
      ParamType::Str.parse(" test string ").unwrap(),
      ParamValue::Str(" test string ".to_string())
    );
  }

  #[test]
  fn test_parse_file_and_directory() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("reads.fq");
    std::fs::write(&file, "@r1").unwrap();
    let file = file.to_str().unwrap();
    let dir_path = dir.path().to_str().unwrap();

    assert_eq!(
      ParamType::File.parse(file).unwrap(),
      ParamValue::File(file.to_string())
    );
    assert!(ParamType::File.parse(dir_path).is_err());
    assert!(ParamType::File.parse("/not/a/real/file.fq").is_err());

    assert_eq!(
      ParamType::Directory.parse(dir_path).unwrap(),
      ParamValue::Directory(dir_path.to_string())
    );
    assert!(ParamType::Directory.parse(file).is_err());
    assert!(ParamType::Directory.parse("/not/a/real/directory/").is_err());
  }

  #[test]
  fn test_display_parses_back() {
    let values = [
      ParamValue::Int(-7),
      ParamValue::Float(0.1),
      ParamValue::Float(f64::INFINITY),
      ParamValue::Float(3.0),
      ParamValue::Str("foo bar".to_string()),
    ];
    for value in values {
      let text = value.to_string();
      assert_eq!(value.param_type().parse(&text).unwrap(), value);
    }
  }
}
