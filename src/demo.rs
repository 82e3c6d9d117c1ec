//! Built-in word count pipeline.
//!
//! ```text
//! ingest -> text -> tokenize -> words -> count -> counts (final)
//!                \-> stats -> summary (final)
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use cairn_pipeline::{
  ArtifactKind, Node, ParamType, ParamValue, PipelineBuilder, PipelineSpec, Step, StepContext,
};

fn text_kind() -> ArtifactKind {
  ArtifactKind::new("text")
}

fn words_kind() -> ArtifactKind {
  ArtifactKind::new("words")
}

fn int_param(ctx: &StepContext, name: &str) -> Result<i64> {
  ctx
    .parameters
    .get(name)
    .and_then(ParamValue::as_int)
    .with_context(|| format!("missing integer parameter '{}'", name))
}

async fn read_input(ctx: &StepContext, formal: &str, file: &str) -> Result<String> {
  let artifact = ctx
    .inputs
    .get(formal)
    .with_context(|| format!("missing input '{}'", formal))?;
  let path = artifact.data_dir().join(file);
  tokio::fs::read_to_string(&path)
    .await
    .with_context(|| format!("failed to read {}", path.display()))
}

async fn write_output(ctx: &StepContext, file: &str, contents: String) -> Result<()> {
  let Some(artifact) = ctx.outputs.first() else {
    bail!("step has no output");
  };
  let path = artifact.data_dir().join(file);
  tokio::fs::write(&path, contents)
    .await
    .with_context(|| format!("failed to write {}", path.display()))
}

/// Copies the source file into the pipeline.
struct Ingest;

#[async_trait]
impl Step for Ingest {
  async fn run(&self, ctx: StepContext) -> Result<()> {
    let source = ctx
      .parameters
      .get("source")
      .and_then(ParamValue::as_str)
      .context("missing parameter 'source'")?;
    let text = tokio::fs::read_to_string(source)
      .await
      .with_context(|| format!("failed to read {}", source))?;
    write_output(&ctx, "text.txt", text).await
  }
}

/// Lowercased words of at least `min_length` characters, one per line.
struct Tokenize;

#[async_trait]
impl Step for Tokenize {
  async fn run(&self, ctx: StepContext) -> Result<()> {
    let min_length = usize::try_from(int_param(&ctx, "min_length")?).unwrap_or(0);
    let text = read_input(&ctx, "text", "text.txt").await?;

    let words: Vec<String> = text
      .split(|c: char| !c.is_alphanumeric())
      .filter(|w| w.chars().count() >= min_length.max(1))
      .map(str::to_lowercase)
      .collect();
    write_output(&ctx, "words.txt", words.join("\n")).await
  }
}

/// The `top` most frequent words as `word<TAB>count`.
struct Count;

#[async_trait]
impl Step for Count {
  async fn run(&self, ctx: StepContext) -> Result<()> {
    let top = usize::try_from(int_param(&ctx, "top")?).unwrap_or(0);
    let words = read_input(&ctx, "words", "words.txt").await?;

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for word in words.lines().filter(|w| !w.is_empty()) {
      *counts.entry(word).or_default() += 1;
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    let table: String = ranked
      .into_iter()
      .take(top)
      .map(|(word, n)| format!("{}\t{}\n", word, n))
      .collect();
    write_output(&ctx, "counts.tsv", table).await
  }
}

/// Line, word, and byte totals of the ingested text.
struct Stats;

#[async_trait]
impl Step for Stats {
  async fn run(&self, ctx: StepContext) -> Result<()> {
    let text = read_input(&ctx, "text", "text.txt").await?;
    let author = ctx
      .details
      .get("author")
      .map(ToString::to_string)
      .unwrap_or_default();
    let run_key = ctx
      .details
      .get("run_key")
      .map(ToString::to_string)
      .unwrap_or_default();

    let summary = format!(
      "run: {}\nauthor: {}\nlines: {}\nwords: {}\nbytes: {}\n",
      run_key,
      author,
      text.lines().count(),
      text.split_whitespace().count(),
      text.len()
    );
    write_output(&ctx, "summary.txt", summary).await
  }
}

/// Build the word count pipeline.
pub fn pipeline() -> Result<PipelineSpec> {
  let mut builder = PipelineBuilder::new();
  builder.detail_default(
    "author",
    ParamType::Str,
    ParamValue::Str("anonymous".to_string()),
  )?;

  builder.add_node(
    Node::builder("ingest", Arc::new(Ingest))
      .param("source", ParamType::File)
      .output("text", text_kind())
      .build()?,
  )?;
  builder.add_node(
    Node::builder("tokenize", Arc::new(Tokenize))
      .param_default("min_length", ParamType::Int, ParamValue::Int(3))
      .input("text", text_kind())
      .bind("text", "text")
      .output("words", words_kind())
      .build()?,
  )?;
  builder.add_node(
    Node::builder("count", Arc::new(Count))
      .param_default("top", ParamType::Int, ParamValue::Int(10))
      .input("words", words_kind())
      .bind("words", "words")
      .output("counts", ArtifactKind::final_output("word_counts"))
      .build()?,
  )?;
  builder.add_node(
    Node::builder("stats", Arc::new(Stats))
      .input("text", text_kind())
      .bind("text", "text")
      .output("summary", ArtifactKind::final_output("summary"))
      .build()?,
  )?;

  Ok(builder.build()?)
}
