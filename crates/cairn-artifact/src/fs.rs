use std::path::Path;

use tokio::fs;

use crate::SENTINEL;

/// Recursively copy an artifact directory's contents into `dest`.
///
/// The completion marker is left behind: exported copies are plain
/// directories, not artifacts.
pub async fn copy_dir_contents(src: &Path, dest: &Path) -> Result<(), std::io::Error> {
  fs::create_dir_all(dest).await?;

  let mut entries = fs::read_dir(src).await?;
  while let Some(entry) = entries.next_entry().await? {
    if entry.file_name() == SENTINEL {
      continue;
    }

    let src_path = entry.path();
    let dest_path = dest.join(entry.file_name());

    if entry.file_type().await?.is_dir() {
      Box::pin(copy_dir_contents(&src_path, &dest_path)).await?;
    } else {
      fs::copy(&src_path, &dest_path).await?;
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_copy_skips_sentinel() {
    let src = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join(SENTINEL), "{}").unwrap();
    std::fs::write(src.path().join("report.txt"), "hits: 3").unwrap();
    std::fs::create_dir(src.path().join("nested")).unwrap();
    std::fs::write(src.path().join("nested").join("taxa.tsv"), "1\t2").unwrap();

    let target = dest.path().join("out");
    copy_dir_contents(src.path(), &target).await.unwrap();

    assert!(!target.join(SENTINEL).exists());
    assert_eq!(
      std::fs::read_to_string(target.join("report.txt")).unwrap(),
      "hits: 3"
    );
    assert_eq!(
      std::fs::read_to_string(target.join("nested").join("taxa.tsv")).unwrap(),
      "1\t2"
    );
  }
}
