//! Cairn Config
//!
//! This crate contains the textual per-run configuration format for cairn.
//! A run config is a TOML document with one `[details]` section and one
//! section per pipeline node:
//!
//! ```toml
//! [details]
//! run_key = "trial"
//! threads = "4"
//!
//! [filter]
//! lca_dist = "4"
//! min_hits = "3"
//! ```
//!
//! Values are kept as raw text here. Checking the document against a
//! pipeline and converting values to their declared types is the
//! orchestrator's job; this crate only guarantees the section/key shape.

use std::collections::HashSet;

use indexmap::IndexMap;

/// Raw key → text value pairs of one section, in document order.
pub type Section = IndexMap<String, String>;

/// Error type for reading config documents.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  /// The document is not valid TOML.
  #[error("invalid config syntax: {0}")]
  Syntax(#[from] toml::de::Error),

  /// A `[section]` header appears more than once.
  #[error("duplicate section [{0}]")]
  DuplicateSection(String),

  /// A key appears more than once within one section.
  #[error("duplicate key '{key}' in section [{section}]")]
  DuplicateKey { section: String, key: String },

  /// A top-level entry is not a section.
  #[error("top-level key '{0}' must be a [section]")]
  NotASection(String),

  /// A value is a nested table, array, or datetime.
  #[error("value of '{section}.{key}' must be a string or number")]
  UnsupportedValue { section: String, key: String },
}

/// A parsed run config.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunConfig {
  sections: IndexMap<String, Section>,
}

impl RunConfig {
  pub fn new() -> Self {
    Self::default()
  }

  /// Parse a TOML document.
  ///
  /// String values are taken verbatim. Integer, float, and boolean literals
  /// are accepted and converted to their text form.
  ///
  /// Repeated sections and keys are rejected by TOML itself. When the parse
  /// fails the document is scanned for them so they can be reported on their
  /// own.
  pub fn parse(text: &str) -> Result<Self, ConfigError> {
    let table: toml::Table = match text.parse() {
      Ok(table) => table,
      Err(e) => return Err(find_duplicate(text).unwrap_or(ConfigError::Syntax(e))),
    };
    let mut sections = IndexMap::new();

    for (name, value) in table {
      let toml::Value::Table(entries) = value else {
        return Err(ConfigError::NotASection(name));
      };

      let mut section = Section::new();
      for (key, value) in entries {
        let raw = match value {
          toml::Value::String(s) => s,
          toml::Value::Integer(i) => i.to_string(),
          // Debug keeps the decimal point, so `4.0` can't pass for an integer.
          toml::Value::Float(f) => format!("{:?}", f),
          toml::Value::Boolean(b) => b.to_string(),
          _ => {
            return Err(ConfigError::UnsupportedValue {
              section: name,
              key,
            });
          }
        };
        section.insert(key, raw);
      }
      sections.insert(name, section);
    }

    Ok(Self { sections })
  }

  /// Render as a TOML document. Every value is written as a string.
  pub fn to_toml_string(&self) -> String {
    let mut table = toml::Table::new();
    for (name, section) in &self.sections {
      let entries: toml::Table = section
        .iter()
        .map(|(k, v)| (k.clone(), toml::Value::String(v.clone())))
        .collect();
      table.insert(name.clone(), toml::Value::Table(entries));
    }
    table.to_string()
  }

  /// Sections in document order.
  pub fn sections(&self) -> impl Iterator<Item = (&str, &Section)> {
    self.sections.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn section(&self, name: &str) -> Option<&Section> {
    self.sections.get(name)
  }

  /// Get or create a section, appending new sections at the end.
  pub fn section_mut(&mut self, name: &str) -> &mut Section {
    self.sections.entry(name.to_string()).or_default()
  }

  /// Set one raw value.
  pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
    self.section_mut(section).insert(key.to_string(), value.into());
  }

  pub fn get(&self, section: &str, key: &str) -> Option<&str> {
    self
      .sections
      .get(section)
      .and_then(|s| s.get(key))
      .map(String::as_str)
  }
}

/// Strip surrounding quotes from a bare or quoted TOML key.
fn unquote(key: &str) -> &str {
  let key = key.trim();
  key
    .strip_prefix('"')
    .and_then(|k| k.strip_suffix('"'))
    .or_else(|| key.strip_prefix('\'').and_then(|k| k.strip_suffix('\'')))
    .unwrap_or(key)
}

/// Line scan for the first repeated `[section]` header or key.
fn find_duplicate(text: &str) -> Option<ConfigError> {
  let mut sections: HashSet<&str> = HashSet::new();
  let mut keys: HashSet<&str> = HashSet::new();
  let mut current = "";

  for line in text.lines().map(str::trim) {
    if line.is_empty() || line.starts_with('#') || line.starts_with("[[") {
      continue;
    }
    if let Some(rest) = line.strip_prefix('[') {
      let name = unquote(rest.split(']').next().unwrap_or(rest));
      if !sections.insert(name) {
        return Some(ConfigError::DuplicateSection(name.to_string()));
      }
      current = name;
      keys.clear();
    } else if let Some((key, _)) = line.split_once('=') {
      let key = unquote(key);
      if !keys.insert(key) {
        return Some(ConfigError::DuplicateKey {
          section: current.to_string(),
          key: key.to_string(),
        });
      }
    }
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_sections_in_order() {
    let config = RunConfig::parse(
      r#"
[details]
run_key = "trial"

[filter]
lca_dist = "4"
min_hits = "3"
"#,
    )
    .unwrap();

    let names: Vec<&str> = config.sections().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["details", "filter"]);
    assert_eq!(config.get("details", "run_key"), Some("trial"));
    assert_eq!(config.get("filter", "min_hits"), Some("3"));
    assert_eq!(config.get("filter", "missing"), None);
  }

  #[test]
  fn test_parse_accepts_literals() {
    let config = RunConfig::parse(
      r#"
[align]
threads = 8
identity = 0.97
ceiling = inf
paired = true
"#,
    )
    .unwrap();

    assert_eq!(config.get("align", "threads"), Some("8"));
    assert_eq!(config.get("align", "identity"), Some("0.97"));
    assert_eq!(config.get("align", "ceiling"), Some("inf"));
    assert_eq!(config.get("align", "paired"), Some("true"));
  }

  #[test]
  fn test_duplicate_section() {
    let result = RunConfig::parse("[filter]\na = \"1\"\n[details]\n[ \"filter\" ]\nb = \"2\"\n");
    assert!(matches!(result, Err(ConfigError::DuplicateSection(ref s)) if s == "filter"));
  }

  #[test]
  fn test_duplicate_key() {
    let result = RunConfig::parse("[details]\na = \"1\"\n[filter]\na = \"1\"\n\"a\" = \"2\"\n");
    assert!(matches!(
      result,
      Err(ConfigError::DuplicateKey { ref section, ref key }) if section == "filter" && key == "a"
    ));
  }

  #[test]
  fn test_malformed_document_is_syntax_error() {
    let result = RunConfig::parse("[filter\na = \"1\"\n");
    assert!(matches!(result, Err(ConfigError::Syntax(_))));
  }

  #[test]
  fn test_float_literal_keeps_decimal_point() {
    let config = RunConfig::parse("[filter]\nlca_dist = 4.0\n").unwrap();
    assert_eq!(config.get("filter", "lca_dist"), Some("4.0"));
  }

  #[test]
  fn test_top_level_value_rejected() {
    let result = RunConfig::parse("run_key = \"trial\"\n");
    assert!(matches!(result, Err(ConfigError::NotASection(ref k)) if k == "run_key"));
  }

  #[test]
  fn test_nested_value_rejected() {
    let result = RunConfig::parse("[filter]\nlevels = [1, 2]\n");
    assert!(matches!(result, Err(ConfigError::UnsupportedValue { .. })));
  }

  #[test]
  fn test_render_then_parse() {
    let mut config = RunConfig::new();
    config.set("details", "run_key", "trial");
    config.set("details", "note", "has \"quotes\" and = signs");
    config.set("filter", "lca_dist", "4");
    config.section_mut("empty");

    let text = config.to_toml_string();
    let parsed = RunConfig::parse(&text).unwrap();

    assert_eq!(parsed, config);
  }
}
