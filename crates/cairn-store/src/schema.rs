//! Run-table schema derived from a pipeline's shape.
//!
//! The run table has one column per run detail and one per (node,
//! parameter) pair. A single UNIQUE constraint spans all of them, so two
//! runs with the same values can never both exist.

use cairn_pipeline::{DETAILS_SECTION, ParamType, ParamValue, PipelineSpec, RunValues};

use crate::Error;

/// Where a column's value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSource {
  Detail(String),
  Node { node: String, param: String },
}

/// One parameter column of the run table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
  /// Unquoted column name, `<section>.<key>`.
  pub name: String,
  pub source: ColumnSource,
  pub param_type: ParamType,
}

impl Column {
  /// Quoted for use in SQL.
  pub fn ident(&self) -> String {
    format!("\"{}\"", self.name)
  }

  pub fn belongs_to(&self, node: &str) -> bool {
    matches!(&self.source, ColumnSource::Node { node: n, .. } if n == node)
  }

  /// Look up this column's value in a run's values.
  pub fn value_in<'a>(&self, values: &'a RunValues) -> Result<&'a ParamValue, Error> {
    let value = match &self.source {
      ColumnSource::Detail(name) => values.details.get(name),
      ColumnSource::Node { node, param } => values.nodes.get(node).and_then(|p| p.get(param)),
    }
    .ok_or_else(|| Error::MissingValue(self.name.clone()))?;

    if value.param_type() != self.param_type {
      return Err(Error::InvalidValue {
        column: self.name.clone(),
        expected: self.param_type.to_string(),
        found: value.param_type().to_string(),
      });
    }
    Ok(value)
  }
}

pub(crate) fn sql_type(param_type: ParamType) -> &'static str {
  match param_type {
    ParamType::Int => "INTEGER",
    ParamType::Float => "REAL",
    ParamType::Str | ParamType::File | ParamType::Directory => "TEXT",
  }
}

/// Typed column set of the run table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSchema {
  columns: Vec<Column>,
}

impl RunSchema {
  /// Details first, then node parameters in pipeline order.
  pub fn from_spec(spec: &PipelineSpec) -> Self {
    let mut columns = Vec::new();

    for detail in spec.details() {
      columns.push(Column {
        name: format!("{}.{}", DETAILS_SECTION, detail.name),
        source: ColumnSource::Detail(detail.name.clone()),
        param_type: detail.param_type,
      });
    }

    for node in spec.nodes() {
      for param in node.parameters() {
        columns.push(Column {
          name: format!("{}.{}", node.name(), param.name),
          source: ColumnSource::Node {
            node: node.name().to_string(),
            param: param.name.clone(),
          },
          param_type: param.param_type,
        });
      }
    }

    Self { columns }
  }

  pub fn columns(&self) -> &[Column] {
    &self.columns
  }

  pub fn detail_columns(&self) -> impl Iterator<Item = &Column> {
    self
      .columns
      .iter()
      .filter(|c| matches!(c.source, ColumnSource::Detail(_)))
  }

  pub fn node_columns<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Column> {
    self.columns.iter().filter(move |c| c.belongs_to(node))
  }

  /// Every column's value for a run, in column order.
  pub fn values<'a>(&self, values: &'a RunValues) -> Result<Vec<&'a ParamValue>, Error> {
    self.columns.iter().map(|c| c.value_in(values)).collect()
  }

  /// DDL for the run, artifact, and artifact_run tables.
  pub fn create_statements(&self) -> Vec<String> {
    let mut run_cols = vec![
      "id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL".to_string(),
      "run_key TEXT UNIQUE NOT NULL".to_string(),
    ];
    for column in &self.columns {
      run_cols.push(format!(
        "{} {} NOT NULL",
        column.ident(),
        sql_type(column.param_type)
      ));
    }
    if !self.columns.is_empty() {
      let idents: Vec<String> = self.columns.iter().map(Column::ident).collect();
      run_cols.push(format!("UNIQUE({})", idents.join(", ")));
    }

    vec![
      format!("CREATE TABLE run (\n  {}\n)", run_cols.join(",\n  ")),
      r#"CREATE TABLE artifact (
  id           INTEGER  PRIMARY KEY  AUTOINCREMENT  NOT NULL,
  name         TEXT     NOT NULL,
  producer     TEXT     NOT NULL,
  path         TEXT     NOT NULL,
  final_output BOOLEAN  NOT NULL
)"#
        .to_string(),
      r#"CREATE TABLE artifact_run (
  artifact_id  INTEGER  NOT NULL  REFERENCES artifact(id),
  run_id       INTEGER  NOT NULL  REFERENCES run(id),
  PRIMARY KEY (artifact_id, run_id)
)"#
        .to_string(),
      "CREATE INDEX artifact_run_by_run ON artifact_run (run_id)".to_string(),
    ]
  }
}

/// `"a" = ? AND "b" = ?`, or a tautology when there are no columns.
pub(crate) fn equality_clause<'a>(columns: impl IntoIterator<Item = &'a Column>, alias: &str) -> String {
  let terms: Vec<String> = columns
    .into_iter()
    .map(|c| format!("{}.{} = ?", alias, c.ident()))
    .collect();
  if terms.is_empty() {
    "1 = 1".to_string()
  } else {
    terms.join(" AND ")
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use async_trait::async_trait;
  use cairn_pipeline::{ArtifactKind, Node, PipelineBuilder, Step, StepContext};

  use super::*;

  struct Noop;

  #[async_trait]
  impl Step for Noop {
    async fn run(&self, _ctx: StepContext) -> anyhow::Result<()> {
      Ok(())
    }
  }

  fn spec() -> PipelineSpec {
    let mut builder = PipelineBuilder::new();
    builder.detail("threads", ParamType::Int).unwrap();
    builder
      .add_node(
        Node::builder("align", Arc::new(Noop))
          .param("identity", ParamType::Float)
          .param("index", ParamType::Str)
          .output("hits", ArtifactKind::new("hits"))
          .build()
          .unwrap(),
      )
      .unwrap();
    builder
      .add_node(
        Node::builder("filter", Arc::new(Noop))
          .param("lca_dist", ParamType::Int)
          .input("hits", ArtifactKind::new("hits"))
          .bind("hits", "hits")
          .output("filtered", ArtifactKind::new("hits"))
          .build()
          .unwrap(),
      )
      .unwrap();
    builder.build().unwrap()
  }

  #[test]
  fn test_columns_follow_pipeline_order() {
    let schema = RunSchema::from_spec(&spec());
    let names: Vec<&str> = schema.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
      names,
      vec![
        "details.threads",
        "align.identity",
        "align.index",
        "filter.lca_dist"
      ]
    );
    assert_eq!(schema.node_columns("align").count(), 2);
    assert_eq!(schema.detail_columns().count(), 1);
  }

  #[test]
  fn test_unique_constraint_spans_all_parameters() {
    let schema = RunSchema::from_spec(&spec());
    let ddl = &schema.create_statements()[0];
    assert!(ddl.contains("run_key TEXT UNIQUE NOT NULL"));
    assert!(ddl.contains("\"align.identity\" REAL NOT NULL"));
    assert!(ddl.contains(
      "UNIQUE(\"details.threads\", \"align.identity\", \"align.index\", \"filter.lca_dist\")"
    ));
  }

  #[test]
  fn test_values_are_type_checked() {
    let schema = RunSchema::from_spec(&spec());
    let mut values = RunValues {
      run_key: "trial".to_string(),
      ..Default::default()
    };
    values
      .details
      .insert("threads".to_string(), ParamValue::Str("four".to_string()));

    assert!(matches!(
      schema.values(&values),
      Err(Error::InvalidValue { .. })
    ));

    values
      .details
      .insert("threads".to_string(), ParamValue::Int(4));
    assert!(matches!(
      schema.values(&values),
      Err(Error::MissingValue(ref c)) if c == "align.identity"
    ));
  }

  #[test]
  fn test_equality_clause() {
    let schema = RunSchema::from_spec(&spec());
    assert_eq!(
      equality_clause(schema.node_columns("filter"), "r"),
      "r.\"filter.lca_dist\" = ?"
    );
    assert_eq!(equality_clause(schema.node_columns("nope"), "r"), "1 = 1");
  }
}
