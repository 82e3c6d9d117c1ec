//! Run config validation.
//!
//! A run config must have a `[details]` section plus exactly one section per
//! node, and each section must hold exactly its declared keys. Values are
//! converted with the declared type's parser; nothing is defaulted here.
//! Defaults only exist to pre-fill freshly written configs.

use std::collections::BTreeMap;

use cairn_config::{RunConfig, Section};
use cairn_pipeline::{DETAILS_SECTION, ParamDecl, ParamMap, PipelineSpec, RUN_KEY, RunValues};

use crate::error::{OrchestratorError, ShapeError};

/// Reject run keys that can't name `<run_key>.toml` and `<run_key>/`.
pub fn check_run_key(run_key: &str) -> Result<(), OrchestratorError> {
  let valid = !run_key.is_empty()
    && !run_key.starts_with('.')
    && run_key
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
  if valid {
    Ok(())
  } else {
    Err(OrchestratorError::InvalidRunKey(run_key.to_string()))
  }
}

fn check_keys<'a>(
  section_name: &str,
  section: &Section,
  expected: impl Iterator<Item = &'a str> + Clone,
) -> Result<(), ShapeError> {
  for key in expected.clone() {
    if !section.contains_key(key) {
      return Err(ShapeError::MissingParameter {
        section: section_name.to_string(),
        key: key.to_string(),
      });
    }
  }
  for key in section.keys() {
    if !expected.clone().any(|k| k == key.as_str()) {
      return Err(ShapeError::UnexpectedParameter {
        section: section_name.to_string(),
        key: key.clone(),
      });
    }
  }
  Ok(())
}

fn parse_section(
  section_name: &str,
  section: &Section,
  decls: &[ParamDecl],
) -> Result<ParamMap, OrchestratorError> {
  let mut values = ParamMap::new();
  for decl in decls {
    let raw = section
      .get(&decl.name)
      .ok_or_else(|| ShapeError::MissingParameter {
        section: section_name.to_string(),
        key: decl.name.clone(),
      })?;
    let value = decl
      .param_type
      .parse(raw)
      .map_err(|e| OrchestratorError::FieldType {
        section: section_name.to_string(),
        field: decl.name.clone(),
        expected: decl.param_type.to_string(),
        value: raw.clone(),
        reason: e.to_string(),
      })?;
    values.insert(decl.name.clone(), value);
  }
  Ok(values)
}

/// Check a parsed config against the pipeline and convert it to typed values.
///
/// When `expected_run_key` is given, `details.run_key` must equal it.
pub fn validate(
  spec: &PipelineSpec,
  config: &RunConfig,
  expected_run_key: Option<&str>,
) -> Result<RunValues, OrchestratorError> {
  if config.section(DETAILS_SECTION).is_none() {
    return Err(ShapeError::MissingSection(DETAILS_SECTION.to_string()).into());
  }
  for node in spec.nodes() {
    if config.section(node.name()).is_none() {
      return Err(ShapeError::MissingSection(node.name().to_string()).into());
    }
  }
  for (name, _) in config.sections() {
    if name != DETAILS_SECTION && spec.node(name).is_none() {
      return Err(ShapeError::UnexpectedSection(name.to_string()).into());
    }
  }

  let details_section = config.section(DETAILS_SECTION).cloned().unwrap_or_default();
  let detail_keys = std::iter::once(RUN_KEY).chain(spec.details().iter().map(|d| d.name.as_str()));
  check_keys(DETAILS_SECTION, &details_section, detail_keys)?;

  let run_key = details_section
    .get(RUN_KEY)
    .cloned()
    .unwrap_or_default();
  check_run_key(&run_key)?;
  if let Some(expected) = expected_run_key
    && expected != run_key
  {
    return Err(
      ShapeError::RunKeyMismatch {
        expected: expected.to_string(),
        found: run_key,
      }
      .into(),
    );
  }
  let details = parse_section(DETAILS_SECTION, &details_section, spec.details())?;

  let mut nodes = BTreeMap::new();
  for node in spec.nodes() {
    let section = config.section(node.name()).cloned().unwrap_or_default();
    check_keys(
      node.name(),
      &section,
      node.parameters().iter().map(|p| p.name.as_str()),
    )?;
    let params = parse_section(node.name(), &section, node.parameters())?;
    nodes.insert(node.name().to_string(), params);
  }

  Ok(RunValues {
    run_key,
    details,
    nodes,
  })
}

fn default_text(decl: &ParamDecl) -> String {
  decl
    .default
    .as_ref()
    .map(ToString::to_string)
    .unwrap_or_default()
}

/// A fresh config for `run_key` with every declared default filled in.
/// Keys without a default are left empty.
pub fn template(spec: &PipelineSpec, run_key: &str) -> RunConfig {
  let mut config = RunConfig::new();
  config.set(DETAILS_SECTION, RUN_KEY, run_key);
  for detail in spec.details() {
    config.set(DETAILS_SECTION, &detail.name, default_text(detail));
  }
  for node in spec.nodes() {
    config.section_mut(node.name());
    for param in node.parameters() {
      config.set(node.name(), &param.name, default_text(param));
    }
  }
  config
}

/// Write typed values back out, in pipeline declaration order.
pub fn render(spec: &PipelineSpec, values: &RunValues) -> RunConfig {
  let mut config = RunConfig::new();
  config.set(DETAILS_SECTION, RUN_KEY, values.run_key.as_str());
  for detail in spec.details() {
    if let Some(value) = values.details.get(&detail.name) {
      config.set(DETAILS_SECTION, &detail.name, value.to_string());
    }
  }
  for node in spec.nodes() {
    config.section_mut(node.name());
    let Some(params) = values.node(node.name()) else {
      continue;
    };
    for param in node.parameters() {
      if let Some(value) = params.get(&param.name) {
        config.set(node.name(), &param.name, value.to_string());
      }
    }
  }
  config
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use cairn_pipeline::{
    ArtifactKind, Node, ParamType, ParamValue, PipelineBuilder, Step, StepContext,
  };

  use super::*;

  struct Noop;

  #[async_trait::async_trait]
  impl Step for Noop {
    async fn run(&self, _ctx: StepContext) -> anyhow::Result<()> {
      Ok(())
    }
  }

  fn spec() -> PipelineSpec {
    let mut builder = PipelineBuilder::new();
    builder
      .detail_default("threads", ParamType::Int, ParamValue::Int(4))
      .unwrap();
    builder
      .add_node(
        Node::builder("align", Arc::new(Noop))
          .param_default("identity", ParamType::Float, ParamValue::Float(0.97))
          .output("hits", ArtifactKind::new("hits"))
          .build()
          .unwrap(),
      )
      .unwrap();
    builder
      .add_node(
        Node::builder("filter", Arc::new(Noop))
          .param("lca_dist", ParamType::Int)
          .param("min_hits", ParamType::Int)
          .input("hits", ArtifactKind::new("hits"))
          .bind("hits", "hits")
          .output("filtered", ArtifactKind::new("hits"))
          .build()
          .unwrap(),
      )
      .unwrap();
    builder.build().unwrap()
  }

  fn config(text: &str) -> RunConfig {
    RunConfig::parse(text).unwrap()
  }

  const VALID: &str = r#"
[details]
run_key = "trial"
threads = "8"

[align]
identity = "0.9"

[filter]
lca_dist = "4"
min_hits = "3"
"#;

  #[test]
  fn test_valid_config() {
    let values = validate(&spec(), &config(VALID), Some("trial")).unwrap();

    assert_eq!(values.run_key, "trial");
    assert_eq!(values.details["threads"], ParamValue::Int(8));
    assert_eq!(values.nodes["align"]["identity"], ParamValue::Float(0.9));
    assert_eq!(values.nodes["filter"]["min_hits"], ParamValue::Int(3));
  }

  #[test]
  fn test_missing_parameter_is_never_defaulted() {
    let text = VALID.replace("min_hits = \"3\"\n", "");
    let err = validate(&spec(), &config(&text), None).unwrap_err();

    assert!(matches!(
      err,
      OrchestratorError::ConfigShape(ShapeError::MissingParameter { ref section, ref key })
        if section == "filter" && key == "min_hits"
    ));
    assert!(err.to_string().contains("missing parameter min_hits"));
  }

  #[test]
  fn test_unexpected_parameter() {
    let text = VALID.replace("lca_dist = \"4\"", "lca_dist = \"4\"\nmax_hits = \"9\"");
    let err = validate(&spec(), &config(&text), None).unwrap_err();
    assert!(matches!(
      err,
      OrchestratorError::ConfigShape(ShapeError::UnexpectedParameter { ref key, .. })
        if key == "max_hits"
    ));
  }

  #[test]
  fn test_missing_and_unexpected_sections() {
    let text = VALID.replace("[align]\nidentity = \"0.9\"\n", "");
    let err = validate(&spec(), &config(&text), None).unwrap_err();
    assert!(matches!(
      err,
      OrchestratorError::ConfigShape(ShapeError::MissingSection(ref s)) if s == "align"
    ));

    let text = format!("{}\n[summary]\ntitle = \"x\"\n", VALID);
    let err = validate(&spec(), &config(&text), None).unwrap_err();
    assert!(matches!(
      err,
      OrchestratorError::ConfigShape(ShapeError::UnexpectedSection(ref s)) if s == "summary"
    ));
  }

  #[test]
  fn test_field_type_names_field_and_type() {
    let text = VALID.replace("lca_dist = \"4\"", "lca_dist = \"four\"");
    let err = validate(&spec(), &config(&text), None).unwrap_err();

    match err {
      OrchestratorError::FieldType {
        section,
        field,
        expected,
        value,
        ..
      } => {
        assert_eq!(section, "filter");
        assert_eq!(field, "lca_dist");
        assert_eq!(expected, "Int");
        assert_eq!(value, "four");
      }
      other => panic!("unexpected error: {}", other),
    }
  }

  #[test]
  fn test_run_key_must_match_file() {
    let err = validate(&spec(), &config(VALID), Some("other")).unwrap_err();
    assert!(matches!(
      err,
      OrchestratorError::ConfigShape(ShapeError::RunKeyMismatch { .. })
    ));
  }

  #[test]
  fn test_run_key_rules() {
    assert!(check_run_key("trial-2.b_c").is_ok());
    assert!(check_run_key("").is_err());
    assert!(check_run_key(".hidden").is_err());
    assert!(check_run_key("a/b").is_err());
    assert!(check_run_key("with space").is_err());
  }

  #[test]
  fn test_template_prefills_defaults() {
    let config = template(&spec(), "trial");

    assert_eq!(config.get("details", "run_key"), Some("trial"));
    assert_eq!(config.get("details", "threads"), Some("4"));
    assert_eq!(config.get("align", "identity"), Some("0.97"));
    assert_eq!(config.get("filter", "lca_dist"), Some(""));

    // Blank keys have to be filled in before the config validates.
    assert!(matches!(
      validate(&spec(), &config, Some("trial")),
      Err(OrchestratorError::FieldType { .. })
    ));
  }

  #[test]
  fn test_render_validates_to_same_values() {
    let spec = spec();
    let values = validate(&spec, &config(VALID), None).unwrap();
    let rendered = render(&spec, &values);

    assert_eq!(validate(&spec, &rendered, Some("trial")).unwrap(), values);
  }
}
