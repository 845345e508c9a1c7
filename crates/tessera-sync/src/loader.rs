//! Snapshot and update-log loading.
//!
//! Each chunk has a directory `<root>/<x>_<y>/` holding one `*.jsonl` file
//! per category (`belt.jsonl`, `resource.jsonl`, ...) and an append-only
//! updates log. Category files are read in sorted filename order and every
//! line becomes an upsert; the log is replayed after them in file order.
//! Both feed the same apply path as live events, so a chunk loaded from
//! files ends up identical to one built from the equivalent event stream.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tessera_store::WorldStore;
use tessera_types::{Category, ChunkCoord, LogRecord, Operation, SnapshotRecord};

use crate::config::SnapshotConfig;
use crate::error::LoaderError;

/// Outcome of one chunk load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Records applied from category files.
    pub initial: u64,
    /// Records replayed from the updates log.
    pub replayed: u64,
    /// Malformed lines skipped.
    pub skipped: u64,
    /// Records the store rejected.
    pub failed: u64,
    /// Rows removed by the purge that preceded the load.
    pub purged: u64,
}

/// Operations read from a chunk directory, not yet applied.
#[derive(Debug, Clone, Default)]
pub struct ChunkFiles {
    /// Upserts from category files, in file then line order.
    pub initial: Vec<Operation>,
    /// Operations from the updates log, in line order.
    pub updates: Vec<Operation>,
    /// Malformed lines and files skipped.
    pub skipped: u64,
}

/// Reads chunk directories and applies them to a store.
#[derive(Debug, Clone)]
pub struct SnapshotLoader {
    root: PathBuf,
    updates_file: String,
}

impl SnapshotLoader {
    /// Create a loader rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, updates_file: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            updates_file: updates_file.into(),
        }
    }

    /// Create a loader from the `snapshots` config section.
    pub fn from_config(config: &SnapshotConfig) -> Self {
        Self::new(config.root.clone(), config.updates_file.clone())
    }

    /// Snapshot root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding `chunk`'s files.
    pub fn chunk_dir(&self, chunk: ChunkCoord) -> PathBuf {
        self.root.join(chunk.dir_name())
    }

    /// Read every record for `chunk` without touching the store.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::MissingSnapshot`] when the chunk directory does
    /// not exist and [`LoaderError::Io`] when a file cannot be read.
    pub async fn read_chunk(&self, chunk: ChunkCoord) -> Result<ChunkFiles, LoaderError> {
        let dir = self.chunk_dir(chunk);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LoaderError::MissingSnapshot { chunk, path: dir });
            }
            Err(source) => return Err(LoaderError::Io { path: dir, source }),
        };

        let mut category_files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| LoaderError::Io {
                path: dir.clone(),
                source,
            })?
        {
            let path = entry.path();
            let is_jsonl = path.extension().is_some_and(|ext| ext == "jsonl");
            let is_log = entry.file_name().to_str() == Some(self.updates_file.as_str());
            if is_jsonl && !is_log {
                category_files.push(path);
            }
        }
        category_files.sort();

        let mut files = ChunkFiles::default();
        for path in category_files {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            let category = match stem.parse::<Category>() {
                Ok(category) => category,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping snapshot file with unknown category");
                    files.skipped = files.skipped.saturating_add(1);
                    continue;
                }
            };
            let contents = read_file(&path).await?;
            for (line_no, line) in non_empty_lines(&contents) {
                match serde_json::from_str::<SnapshotRecord>(line) {
                    Ok(record) => files.initial.push(record.into_operation(category, chunk)),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), line = line_no, error = %e, "Skipping malformed snapshot line");
                        files.skipped = files.skipped.saturating_add(1);
                    }
                }
            }
        }

        let log_path = dir.join(&self.updates_file);
        if tokio::fs::try_exists(&log_path)
            .await
            .map_err(|source| LoaderError::Io {
                path: log_path.clone(),
                source,
            })?
        {
            let contents = read_file(&log_path).await?;
            for (line_no, line) in non_empty_lines(&contents) {
                match serde_json::from_str::<LogRecord>(line) {
                    Ok(record) => files.updates.push(record.into_operation(chunk)),
                    Err(e) => {
                        tracing::warn!(path = %log_path.display(), line = line_no, error = %e, "Skipping malformed update log line");
                        files.skipped = files.skipped.saturating_add(1);
                    }
                }
            }
        }

        Ok(files)
    }

    /// Replace `chunk`'s rows in `store` with the contents of its files.
    ///
    /// The chunk's existing row families are purged first, then the initial
    /// records are applied and the updates log replayed. Records the store
    /// rejects are logged and counted; they do not abort the load.
    ///
    /// Must only be called by the holder of the engine write lock.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError`] when the files cannot be read or the purge
    /// fails. The store is untouched if reading fails.
    pub async fn load_chunk(
        &self,
        store: &WorldStore,
        chunk: ChunkCoord,
    ) -> Result<LoadReport, LoaderError> {
        let files = self.read_chunk(chunk).await?;
        let purged = store.purge_chunk(chunk).await?;

        let mut report = LoadReport {
            skipped: files.skipped,
            purged,
            ..LoadReport::default()
        };
        for op in &files.initial {
            if apply_logged(store, op).await {
                report.initial = report.initial.saturating_add(1);
            } else {
                report.failed = report.failed.saturating_add(1);
            }
        }
        for op in &files.updates {
            if apply_logged(store, op).await {
                report.replayed = report.replayed.saturating_add(1);
            } else {
                report.failed = report.failed.saturating_add(1);
            }
        }

        tracing::info!(
            %chunk,
            initial = report.initial,
            replayed = report.replayed,
            skipped = report.skipped,
            failed = report.failed,
            purged = report.purged,
            "Chunk loaded from snapshot"
        );
        Ok(report)
    }
}

async fn read_file(path: &Path) -> Result<String, LoaderError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| LoaderError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Non-blank lines with their 1-based line numbers.
fn non_empty_lines(contents: &str) -> impl Iterator<Item = (usize, &str)> {
    contents
        .lines()
        .enumerate()
        .map(|(i, line)| (i.saturating_add(1), line.trim()))
        .filter(|(_, line)| !line.is_empty())
}

async fn apply_logged(store: &WorldStore, op: &Operation) -> bool {
    match store.apply(op).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(key = %op.key, kind = ?op.kind, error = %e, "Skipping snapshot record the store rejected");
            false
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::fs;

    use super::*;

    fn write_chunk(root: &Path, chunk: ChunkCoord, files: &[(&str, &str)]) {
        let dir = root.join(chunk.dir_name());
        fs::create_dir_all(&dir).unwrap();
        for (name, contents) in files {
            fs::write(dir.join(name), contents).unwrap();
        }
    }

    #[tokio::test]
    async fn reads_category_files_then_log() {
        let tmp = tempfile::tempdir().unwrap();
        let chunk = ChunkCoord::new(-1, 2);
        write_chunk(
            tmp.path(),
            chunk,
            &[
                (
                    "resource.jsonl",
                    "{\"key\":\"r1\",\"name\":\"iron-ore\",\"position\":{\"x\":-3.5,\"y\":70.5},\"amount\":500}\n\n",
                ),
                (
                    "belt.jsonl",
                    "{\"key\":\"b1\",\"name\":\"transport-belt\",\"position\":{\"x\":-2.5,\"y\":70.5},\"direction\":2}\nnot json\n",
                ),
                ("updates.jsonl", "{\"op\":\"remove\",\"key\":\"b1\"}\n"),
                ("notes.txt", "ignored"),
                ("mystery.jsonl", "{\"key\":\"m1\"}\n"),
            ],
        );

        let loader = SnapshotLoader::new(tmp.path(), "updates.jsonl");
        let files = loader.read_chunk(chunk).await.unwrap();

        // belt.jsonl sorts before resource.jsonl
        let keys: Vec<_> = files.initial.iter().map(|op| op.key.as_str()).collect();
        assert_eq!(keys, ["b1", "r1"]);
        assert_eq!(files.initial[0].category, Some(Category::Belt));
        assert!(files.initial.iter().all(|op| op.chunk == Some(chunk)));
        assert_eq!(files.updates.len(), 1);
        // one malformed line plus one unknown-category file
        assert_eq!(files.skipped, 2);
    }

    #[tokio::test]
    async fn missing_directory_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = SnapshotLoader::new(tmp.path(), "updates.jsonl");
        let err = loader.read_chunk(ChunkCoord::new(7, 7)).await.unwrap_err();
        assert!(matches!(err, LoaderError::MissingSnapshot { chunk, .. } if chunk == ChunkCoord::new(7, 7)));
    }

    #[tokio::test]
    async fn load_replaces_chunk_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let chunk = ChunkCoord::new(0, 0);
        write_chunk(
            tmp.path(),
            chunk,
            &[(
                "belt.jsonl",
                "{\"key\":\"b1\",\"position\":{\"x\":1.5,\"y\":1.5}}\n{\"key\":\"b2\",\"position\":{\"x\":2.5,\"y\":1.5}}\n",
            )],
        );
        let store = WorldStore::in_memory().await.unwrap();
        let stray = Operation::upsert("stray", Category::Belt, serde_json::Map::new())
            .with_chunk(chunk);
        store.apply(&stray).await.unwrap();

        let loader = SnapshotLoader::new(tmp.path(), "updates.jsonl");
        let report = loader.load_chunk(&store, chunk).await.unwrap();
        assert_eq!(report.initial, 2);
        assert_eq!(report.purged, 1);
        assert!(store.get_entity("stray").await.unwrap().is_none());
        assert_eq!(store.entity_count().await.unwrap(), 2);

        // Loading again converges to the same rows.
        let again = loader.load_chunk(&store, chunk).await.unwrap();
        assert_eq!(again.purged, 2);
        assert_eq!(store.entity_count().await.unwrap(), 2);
    }
}
