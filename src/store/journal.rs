//! Append-only JSON journal with a meta index
//!
//! Each record is one pretty-printed JSON file named
//! `{prefix}-{id:08}.json`; a sibling `{prefix}-meta.json` tracks the
//! highest id and total count. Writes go through a temp file, fsync and
//! rename so a crash never leaves a half-written record, and the meta
//! file is updated the same way after the record lands.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::records::MetaIndex;

pub struct Journal {
    dir: PathBuf,
    prefix: String,
    // Guards the meta index and serializes appends so ids stay gapless.
    meta: Mutex<MetaIndex>,
}

impl Journal {
    /// Open (or create) a journal in `dir` for the given record prefix.
    /// The meta index is read back from disk; if it is missing or
    /// unreadable the directory is rescanned and the highest record id
    /// found wins.
    pub async fn open(dir: impl AsRef<Path>, prefix: &str) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|e| {
            Error::PersistenceFailed {
                record: prefix.to_string(),
                reason: format!("cannot create journal directory: {}", e),
            }
        })?;

        let journal = Self {
            dir,
            prefix: prefix.to_string(),
            meta: Mutex::new(MetaIndex::default()),
        };

        let recovered = journal.recover_meta().await?;
        *journal.meta.lock().await = recovered;
        debug!(
            "Journal '{}' opened: last_id={} total={}",
            prefix, recovered.last_id, recovered.total_count
        );
        Ok(journal)
    }

    fn record_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{}-{:08}.json", self.prefix, id))
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join(format!("{}-meta.json", self.prefix))
    }

    async fn recover_meta(&self) -> Result<MetaIndex> {
        let from_file = match fs::read_to_string(self.meta_path()).await {
            Ok(data) => serde_json::from_str::<MetaIndex>(&data).ok(),
            Err(_) => None,
        };

        // Cross-check against the directory: record files are the source
        // of truth when the meta file lags or is gone.
        let mut scanned = MetaIndex::default();
        let mut entries = fs::read_dir(&self.dir).await.map_err(Error::from)?;
        let file_prefix = format!("{}-", self.prefix);
        while let Some(entry) = entries.next_entry().await.map_err(Error::from)? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(rest) = name.strip_prefix(&file_prefix) else {
                continue;
            };
            let Some(stem) = rest.strip_suffix(".json") else {
                continue;
            };
            if let Ok(id) = stem.parse::<u64>() {
                scanned.total_count += 1;
                scanned.last_id = scanned.last_id.max(id);
            }
        }

        let meta = match from_file {
            Some(meta) if meta.last_id >= scanned.last_id => meta,
            Some(meta) => {
                warn!(
                    "Journal '{}' meta behind directory ({} < {}), rescanned",
                    self.prefix, meta.last_id, scanned.last_id
                );
                scanned
            }
            None => scanned,
        };
        Ok(meta)
    }

    /// The id the next append will receive.
    pub async fn next_id(&self) -> u64 {
        self.meta.lock().await.last_id + 1
    }

    pub async fn meta(&self) -> MetaIndex {
        *self.meta.lock().await
    }

    /// Append a record, allocating the next id. Returns the id used.
    pub async fn append<T: Serialize>(&self, record: &T) -> Result<u64> {
        let mut meta = self.meta.lock().await;
        let id = meta.last_id + 1;
        self.write_record(id, record).await?;
        meta.last_id = id;
        meta.total_count += 1;
        self.write_meta(&meta).await?;
        Ok(id)
    }

    /// Append a record whose id was reserved earlier via [`next_id`].
    /// The id must be exactly one past the current last id, so a caller
    /// that reserved but failed to write leaves the sequence intact for
    /// the next reservation.
    pub async fn append_with_id<T: Serialize>(&self, id: u64, record: &T) -> Result<()> {
        let mut meta = self.meta.lock().await;
        if id != meta.last_id + 1 {
            return Err(Error::PersistenceFailed {
                record: format!("{}-{:08}", self.prefix, id),
                reason: format!("id {} out of sequence (last is {})", id, meta.last_id),
            });
        }
        self.write_record(id, record).await?;
        meta.last_id = id;
        meta.total_count += 1;
        self.write_meta(&meta).await?;
        Ok(())
    }

    async fn write_record<T: Serialize>(&self, id: u64, record: &T) -> Result<()> {
        let path = self.record_path(id);
        let data = serde_json::to_vec_pretty(record)?;
        self.atomic_write(&path, &data).await
    }

    async fn write_meta(&self, meta: &MetaIndex) -> Result<()> {
        let data = serde_json::to_vec_pretty(meta)?;
        self.atomic_write(&self.meta_path(), &data).await
    }

    // Temp file in the same directory, fsync, then rename over the target.
    async fn atomic_write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let io_err = |e: std::io::Error| Error::PersistenceFailed {
            record: path.display().to_string(),
            reason: e.to_string(),
        };

        let mut file = fs::File::create(&tmp).await.map_err(io_err)?;
        file.write_all(data).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);
        fs::rename(&tmp, path).await.map_err(io_err)?;
        Ok(())
    }

    /// Read one record by id.
    pub async fn read<T: DeserializeOwned>(&self, id: u64) -> Result<T> {
        let path = self.record_path(id);
        let data = fs::read_to_string(&path)
            .await
            .map_err(|_| Error::RecordNotFound(format!("{}-{:08}", self.prefix, id)))?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Read one page, newest first. Page 1 starts at the last id and
    /// walks downward. Each page covers a fixed id range; an id whose
    /// file is missing shrinks the page rather than pulling in records
    /// that belong to the next one.
    pub async fn page<T: DeserializeOwned>(&self, page: usize, size: usize) -> Result<Vec<T>> {
        if page == 0 || size == 0 {
            return Ok(Vec::new());
        }
        let last_id = self.meta.lock().await.last_id;
        let skip = (page - 1) * size;

        let start = last_id.saturating_sub(skip as u64);
        if start == 0 {
            return Ok(Vec::new());
        }
        let floor = start.saturating_sub(size as u64 - 1).max(1);

        let mut out = Vec::with_capacity(size);
        for id in (floor..=start).rev() {
            if let Ok(record) = self.read::<T>(id).await {
                out.push(record);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Note {
        id: u64,
        body: String,
    }

    fn note(id: u64) -> Note {
        Note {
            id,
            body: format!("note {}", id),
        }
    }

    #[tokio::test]
    async fn test_appends_are_sequential_and_zero_padded() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path(), "cycle").await.unwrap();

        for i in 1..=3u64 {
            let id = journal.append(&note(i)).await.unwrap();
            assert_eq!(id, i);
        }

        let meta = journal.meta().await;
        assert_eq!(meta.last_id, 3);
        assert_eq!(meta.total_count, 3);

        assert!(dir.path().join("cycle-00000001.json").exists());
        assert!(dir.path().join("cycle-00000003.json").exists());
        assert!(dir.path().join("cycle-meta.json").exists());
    }

    #[tokio::test]
    async fn test_page_walks_newest_first() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path(), "cycle").await.unwrap();
        for i in 1..=7u64 {
            journal.append(&note(i)).await.unwrap();
        }

        let first: Vec<Note> = journal.page(1, 3).await.unwrap();
        assert_eq!(
            first.iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![7, 6, 5]
        );

        let third: Vec<Note> = journal.page(3, 3).await.unwrap();
        assert_eq!(third.iter().map(|n| n.id).collect::<Vec<_>>(), vec![1]);

        let beyond: Vec<Note> = journal.page(4, 3).await.unwrap();
        assert!(beyond.is_empty());
    }

    #[tokio::test]
    async fn test_page_skips_missing_records() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path(), "cycle").await.unwrap();
        for i in 1..=4u64 {
            journal.append(&note(i)).await.unwrap();
        }
        std::fs::remove_file(dir.path().join("cycle-00000003.json")).unwrap();

        let records: Vec<Note> = journal.page(1, 4).await.unwrap();
        assert_eq!(
            records.iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![4, 2, 1]
        );
    }

    #[tokio::test]
    async fn test_missing_record_shrinks_its_page_without_shifting_the_next() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path(), "cycle").await.unwrap();
        for i in 1..=10u64 {
            journal.append(&note(i)).await.unwrap();
        }
        std::fs::remove_file(dir.path().join("cycle-00000010.json")).unwrap();

        // Page 1 covers ids 10..8 and comes back short.
        let first: Vec<Note> = journal.page(1, 3).await.unwrap();
        assert_eq!(first.iter().map(|n| n.id).collect::<Vec<_>>(), vec![9, 8]);

        // Page 2 still starts at id 7; no record appears twice.
        let second: Vec<Note> = journal.page(2, 3).await.unwrap();
        assert_eq!(
            second.iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![7, 6, 5]
        );
    }

    #[tokio::test]
    async fn test_meta_recovered_from_directory_scan() {
        let dir = TempDir::new().unwrap();
        {
            let journal = Journal::open(dir.path(), "exec").await.unwrap();
            for i in 1..=5u64 {
                journal.append(&note(i)).await.unwrap();
            }
        }
        // Lose the index; the reopened journal rebuilds it from files.
        std::fs::remove_file(dir.path().join("exec-meta.json")).unwrap();

        let journal = Journal::open(dir.path(), "exec").await.unwrap();
        let meta = journal.meta().await;
        assert_eq!(meta.last_id, 5);
        assert_eq!(meta.total_count, 5);
        assert_eq!(journal.next_id().await, 6);
    }

    #[tokio::test]
    async fn test_out_of_sequence_id_rejected() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path(), "cycle").await.unwrap();
        journal.append(&note(1)).await.unwrap();

        let err = journal.append_with_id(5, &note(5)).await.unwrap_err();
        assert!(matches!(err, Error::PersistenceFailed { .. }));
        // The failed attempt did not disturb the sequence.
        assert_eq!(journal.next_id().await, 2);
    }

    #[tokio::test]
    async fn test_reserved_id_can_be_reused_after_failed_write() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path(), "cycle").await.unwrap();
        journal.append(&note(1)).await.unwrap();

        // A reservation that was never written leaves no gap.
        let reserved = journal.next_id().await;
        assert_eq!(reserved, 2);
        journal.append_with_id(reserved, &note(2)).await.unwrap();
        assert_eq!(journal.meta().await.last_id, 2);
    }

    #[tokio::test]
    async fn test_prefixes_are_independent() {
        let dir = TempDir::new().unwrap();
        let cycles = Journal::open(dir.path(), "cycle").await.unwrap();
        let execs = Journal::open(dir.path(), "execution").await.unwrap();

        cycles.append(&note(1)).await.unwrap();
        cycles.append(&note(2)).await.unwrap();
        execs.append(&note(1)).await.unwrap();

        assert_eq!(cycles.meta().await.last_id, 2);
        assert_eq!(execs.meta().await.last_id, 1);
    }

    #[tokio::test]
    async fn test_read_missing_record() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path(), "cycle").await.unwrap();
        let err = journal.read::<Note>(42).await.unwrap_err();
        assert!(matches!(err, Error::RecordNotFound(_)));
    }
}
