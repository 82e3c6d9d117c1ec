//! Integration tests for the SQLite store.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cairn_pipeline::{
  ArtifactKind, Node, ParamMap, ParamType, ParamValue, PipelineBuilder, PipelineSpec, RunValues,
  Step, StepContext,
};
use cairn_store::{Declaration, Error, SqliteStore, Store};
use tempfile::TempDir;

struct Noop;

#[async_trait]
impl Step for Noop {
  async fn run(&self, _ctx: StepContext) -> anyhow::Result<()> {
    Ok(())
  }
}

/// trim -> reads -> align -> hits -> report -> summary
fn pipeline() -> Arc<PipelineSpec> {
  let mut builder = PipelineBuilder::new();
  builder.detail("threads", ParamType::Int).unwrap();
  builder
    .add_node(
      Node::builder("trim", Arc::new(Noop))
        .param("quality", ParamType::Int)
        .output("reads", ArtifactKind::new("fastq"))
        .build()
        .unwrap(),
    )
    .unwrap();
  builder
    .add_node(
      Node::builder("align", Arc::new(Noop))
        .param("identity", ParamType::Float)
        .input("reads", ArtifactKind::new("fastq"))
        .bind("reads", "reads")
        .output("hits", ArtifactKind::new("hits"))
        .build()
        .unwrap(),
    )
    .unwrap();
  builder
    .add_node(
      Node::builder("report", Arc::new(Noop))
        .param("title", ParamType::Str)
        .input("hits", ArtifactKind::new("hits"))
        .bind("hits", "hits")
        .output("summary", ArtifactKind::final_output("summary"))
        .build()
        .unwrap(),
    )
    .unwrap();
  Arc::new(builder.build().unwrap())
}

fn values(run_key: &str, threads: i64, quality: i64, identity: f64, title: &str) -> RunValues {
  let mut nodes = BTreeMap::new();
  nodes.insert(
    "trim".to_string(),
    ParamMap::from([("quality".to_string(), ParamValue::Int(quality))]),
  );
  nodes.insert(
    "align".to_string(),
    ParamMap::from([("identity".to_string(), ParamValue::Float(identity))]),
  );
  nodes.insert(
    "report".to_string(),
    ParamMap::from([("title".to_string(), ParamValue::Str(title.to_string()))]),
  );
  RunValues {
    run_key: run_key.to_string(),
    details: ParamMap::from([("threads".to_string(), ParamValue::Int(threads))]),
    nodes,
  }
}

async fn open(dir: &TempDir) -> SqliteStore {
  let artifacts = dir.path().join("artifacts");
  std::fs::create_dir_all(&artifacts).unwrap();
  SqliteStore::open(&dir.path().join("store.db"), artifacts, pipeline())
    .await
    .unwrap()
}

fn declaration_of(declared: &[cairn_store::DeclaredArtifact], variable: &str) -> Declaration {
  declared
    .iter()
    .find(|d| d.variable == variable)
    .map(|d| d.declaration)
    .unwrap()
}

#[tokio::test]
async fn test_identical_parameters_collapse_onto_existing_run() {
  let dir = TempDir::new().unwrap();
  let store = open(&dir).await;

  let first = store
    .create_run(&values("foo", 4, 20, 0.97, "a"))
    .await
    .unwrap();
  assert_eq!(first.existing_run_key, None);

  let second = store
    .create_run(&values("bar", 4, 20, 0.97, "a"))
    .await
    .unwrap();
  assert_eq!(second.run_id, first.run_id);
  assert_eq!(second.existing_run_key.as_deref(), Some("foo"));

  let runs = store.list_runs().await.unwrap();
  assert_eq!(runs, vec![(first.run_id, "foo".to_string())]);
  assert!(matches!(
    store.resolve_run_key("bar").await,
    Err(Error::NotFound(_))
  ));
}

#[tokio::test]
async fn test_run_key_collision() {
  let dir = TempDir::new().unwrap();
  let store = open(&dir).await;

  store
    .create_run(&values("foo", 4, 20, 0.97, "a"))
    .await
    .unwrap();
  let result = store.create_run(&values("foo", 4, 30, 0.97, "a")).await;

  assert!(matches!(result, Err(Error::RunKeyCollision(ref k)) if k == "foo"));
  assert_eq!(store.list_runs().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_value_is_rejected() {
  let dir = TempDir::new().unwrap();
  let store = open(&dir).await;

  let mut incomplete = values("foo", 4, 20, 0.97, "a");
  incomplete.nodes.remove("align");

  let result = store.create_run(&incomplete).await;
  assert!(matches!(result, Err(Error::MissingValue(ref c)) if c == "align.identity"));
}

#[tokio::test]
async fn test_artifacts_shared_when_ancestors_match() {
  let dir = TempDir::new().unwrap();
  let store = open(&dir).await;

  let a = values("a", 4, 20, 0.97, "first");
  let run_a = store.create_run(&a).await.unwrap().run_id;
  let declared_a = store.declare_artifacts(&a, run_a).await.unwrap();
  assert_eq!(declared_a.len(), 3);
  assert!(
    declared_a
      .iter()
      .all(|d| d.declaration == Declaration::Created && d.path.is_dir())
  );

  // Only the last node differs.
  let b = values("b", 4, 20, 0.97, "second");
  let run_b = store.create_run(&b).await.unwrap().run_id;
  let declared_b = store.declare_artifacts(&b, run_b).await.unwrap();
  assert_eq!(declaration_of(&declared_b, "reads"), Declaration::Reused);
  assert_eq!(declaration_of(&declared_b, "hits"), Declaration::Reused);
  assert_eq!(declaration_of(&declared_b, "summary"), Declaration::Created);

  let paths_a = store.artifact_paths(run_a).await.unwrap();
  let paths_b = store.artifact_paths(run_b).await.unwrap();
  assert_eq!(paths_a["reads"], paths_b["reads"]);
  assert_eq!(paths_a["hits"], paths_b["hits"]);
  assert_ne!(paths_a["summary"], paths_b["summary"]);

  // The first node differs, so nothing downstream can be shared.
  let c = values("c", 4, 30, 0.97, "first");
  let run_c = store.create_run(&c).await.unwrap().run_id;
  let declared_c = store.declare_artifacts(&c, run_c).await.unwrap();
  assert!(
    declared_c
      .iter()
      .all(|d| d.declaration == Declaration::Created)
  );
}

#[tokio::test]
async fn test_details_do_not_split_artifacts() {
  let dir = TempDir::new().unwrap();
  let store = open(&dir).await;

  let a = values("a", 4, 20, 0.97, "first");
  let run_a = store.create_run(&a).await.unwrap().run_id;
  store.declare_artifacts(&a, run_a).await.unwrap();

  let b = values("b", 16, 20, 0.97, "first");
  let created = store.create_run(&b).await.unwrap();
  assert_ne!(created.run_id, run_a);
  assert_eq!(created.existing_run_key, None);

  let declared = store.declare_artifacts(&b, created.run_id).await.unwrap();
  assert!(
    declared
      .iter()
      .all(|d| d.declaration == Declaration::Reused)
  );
}

#[tokio::test]
async fn test_declare_twice_keeps_instances() {
  let dir = TempDir::new().unwrap();
  let store = open(&dir).await;

  let a = values("a", 4, 20, 0.97, "first");
  let run_a = store.create_run(&a).await.unwrap().run_id;
  let first = store.declare_artifacts(&a, run_a).await.unwrap();
  let second = store.declare_artifacts(&a, run_a).await.unwrap();

  assert!(
    second
      .iter()
      .all(|d| d.declaration == Declaration::Existing)
  );
  let first_paths: Vec<_> = first.iter().map(|d| &d.path).collect();
  let second_paths: Vec<_> = second.iter().map(|d| &d.path).collect();
  assert_eq!(first_paths, second_paths);
}

#[tokio::test]
async fn test_declare_for_unknown_run() {
  let dir = TempDir::new().unwrap();
  let store = open(&dir).await;

  let result = store
    .declare_artifacts(&values("a", 4, 20, 0.97, "first"), 42)
    .await;
  assert!(matches!(result, Err(Error::NotFound(_))));

  let leftovers = std::fs::read_dir(dir.path().join("artifacts"))
    .unwrap()
    .count();
  assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_parameters_and_details_read_back() {
  let dir = TempDir::new().unwrap();
  let store = open(&dir).await;

  let a = values("a", 4, 20, f64::INFINITY, "first");
  let run_a = store.create_run(&a).await.unwrap().run_id;

  assert_eq!(store.parameters_for(run_a, "trim").await.unwrap(), a.nodes["trim"]);
  assert_eq!(
    store.parameters_for(run_a, "align").await.unwrap(),
    a.nodes["align"]
  );

  let details = store.details_for(run_a).await.unwrap();
  assert_eq!(details["run_key"], ParamValue::Str("a".to_string()));
  assert_eq!(details["threads"], ParamValue::Int(4));

  assert_eq!(store.resolve_run_key("a").await.unwrap(), run_a);

  assert!(matches!(
    store.parameters_for(run_a, "nope").await,
    Err(Error::NotFound(_))
  ));
  assert!(matches!(
    store.parameters_for(run_a + 1, "trim").await,
    Err(Error::NotFound(_))
  ));
  assert!(matches!(
    store.details_for(run_a + 1).await,
    Err(Error::NotFound(_))
  ));
  // Declared nothing yet.
  assert!(matches!(
    store.artifact_paths(run_a).await,
    Err(Error::NotFound(_))
  ));
}

#[tokio::test]
async fn test_artifact_records_carry_final_output() {
  let dir = TempDir::new().unwrap();
  let store = open(&dir).await;

  let a = values("a", 4, 20, 0.97, "first");
  let run_a = store.create_run(&a).await.unwrap().run_id;
  store.declare_artifacts(&a, run_a).await.unwrap();

  let records = store.artifacts_for(run_a).await.unwrap();
  let summary = records.iter().find(|r| r.name == "summary").unwrap();
  assert!(summary.final_output);
  assert_eq!(summary.producer, "report");
  assert!(
    records
      .iter()
      .filter(|r| r.name != "summary")
      .all(|r| !r.final_output)
  );
}

#[tokio::test]
async fn test_remove_run_collects_unreferenced_artifacts() {
  let dir = TempDir::new().unwrap();
  let store = open(&dir).await;

  let a = values("a", 4, 20, 0.97, "first");
  let run_a = store.create_run(&a).await.unwrap().run_id;
  store.declare_artifacts(&a, run_a).await.unwrap();

  let b = values("b", 4, 20, 0.97, "second");
  let run_b = store.create_run(&b).await.unwrap().run_id;
  store.declare_artifacts(&b, run_b).await.unwrap();
  let paths_b = store.artifact_paths(run_b).await.unwrap();

  let orphaned = store.remove_run(run_b).await.unwrap();
  assert_eq!(orphaned, vec![paths_b["summary"].clone()]);
  assert!(matches!(
    store.resolve_run_key("b").await,
    Err(Error::NotFound(_))
  ));

  let orphaned = store.remove_run(run_a).await.unwrap();
  assert_eq!(orphaned.len(), 3);
  assert!(store.list_runs().await.unwrap().is_empty());

  assert!(matches!(
    store.remove_run(run_a).await,
    Err(Error::NotFound(_))
  ));
}

#[tokio::test]
async fn test_store_survives_reopen() {
  let dir = TempDir::new().unwrap();
  let a = values("a", 4, 20, 0.97, "first");

  let run_a = {
    let store = open(&dir).await;
    let run_a = store.create_run(&a).await.unwrap().run_id;
    store.declare_artifacts(&a, run_a).await.unwrap();
    store.close().await;
    run_a
  };

  let store = open(&dir).await;
  assert_eq!(store.resolve_run_key("a").await.unwrap(), run_a);
  let paths = store.artifact_paths(run_a).await.unwrap();
  assert!(paths.values().all(|p| Path::new(p).is_dir()));
}
