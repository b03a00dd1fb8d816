use std::collections::{
    HashMap,
    HashSet,
};
use std::fs::{
    self,
    File,
};
use std::io::{
    self,
    Read,
    Write,
};
use std::path::{
    Path,
    PathBuf,
};
use std::sync::Arc;

use chrono::{
    DateTime,
    Utc,
};
use log::{
    debug,
    info,
    warn,
};
use parking_lot::{
    Mutex,
    RwLock,
};
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest,
    Sha256,
};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::clock::{
    Clock,
    SystemClock,
};
use crate::error::{
    Error,
    Result,
};

const INDEX_FILE: &str = "files.json";
const BLOB_DIR: &str = "blobs";
const CHUNK_SIZE: usize = 65535;

/// One file in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub tag: String,
    /// Name the file was uploaded with.
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub size: u64,
    /// Hex SHA-256 of the stored bytes.
    pub digest: String,
    /// Blob handle inside the store's blob directory. Never leaves the server.
    pub(crate) blob: String,
}

/// Reject tags that cannot be addressed as a single path segment.
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.trim().is_empty() {
        return Err(Error::Validation(String::from("tag must not be empty")));
    }
    if tag.contains('/') {
        return Err(Error::Validation(format!("tag {:?} must not contain '/'", tag)));
    }
    if tag == "." || tag == ".." {
        return Err(Error::Validation(format!("tag {:?} is reserved", tag)));
    }
    Ok(())
}

/// Tag used for an upload that did not name one: the last path component of
/// the declared file name.
pub fn derive_tag(name: &str) -> Result<String> {
    let base = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        return Err(Error::Validation(format!("cannot derive a tag from file name {:?}", name)));
    }
    Ok(base.to_string())
}

/// Remove every file in `blob_dir` that no record points to: blobs persisted
/// just before a crash and temp files of uploads that never finished.
fn sweep_blobs(blob_dir: &Path, index: &HashMap<String, FileRecord>) -> Result<usize> {
    let referenced: HashSet<&str> = index.values().map(|r| r.blob.as_str()).collect();
    let mut count = 0;
    for entry in fs::read_dir(blob_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if referenced.contains(name.to_string_lossy().as_ref()) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(_) => {
                debug!("removed stray blob {:?}", name);
                count += 1;
            },
            Err(e) => {
                warn!("cannot remove stray blob {:?}: {}", name, e);
            },
        };
    }
    Ok(count)
}

/// Tag-keyed file registry backed by a directory.
///
/// Layout under the data directory:
///
/// * `files.json` - the index, rewritten as a whole on each mutation.
/// * `blobs/<uuid>` - one file per record.
///
/// Index writers are serialised by `writer`; readers only take the `index`
/// read lock and never see a record whose blob has been released.
pub struct Store {
    dir: PathBuf,
    blob_dir: PathBuf,
    index: RwLock<HashMap<String, FileRecord>>,
    writer: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl Store {

    pub fn open(dir: &Path) -> Result<Store> {
        Store::open_with_clock(dir, Arc::new(SystemClock))
    }

    /// Open or create the store in `dir`, stamping records with `clock`.
    pub fn open_with_clock(dir: &Path, clock: Arc<dyn Clock>) -> Result<Store> {
        let blob_dir = dir.join(BLOB_DIR);
        fs::create_dir_all(&blob_dir)?;

        let mut index = HashMap::new();
        let index_path = dir.join(INDEX_FILE);
        match File::open(&index_path) {
            Ok(f) => {
                let records: Vec<FileRecord> = serde_json::from_reader(io::BufReader::new(f))?;
                for r in records {
                    if !blob_dir.join(&r.blob).is_file() {
                        warn!("dropping record {:?}, blob {} is missing", r.tag, r.blob);
                        continue;
                    }
                    index.insert(r.tag.clone(), r);
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no index at {:?}, starting empty", index_path);
            },
            Err(e) => {
                return Err(Error::Storage(e));
            },
        };
        let swept = sweep_blobs(&blob_dir, &index)?;
        info!("opened store {:?} with {} records, {} stray blobs removed", dir, index.len(), swept);

        Ok(Store {
            dir: dir.to_path_buf(),
            blob_dir,
            index: RwLock::new(index),
            writer: Mutex::new(()),
            clock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store the bytes of `f` under `tag`, replacing any record the tag had.
    ///
    /// # Arguments
    ///
    /// * `tag` - Registry key.
    /// * `name` - Declared file name, returned on download.
    /// * `f` - Content to store, read in chunks.
    /// * `expected_size` - Length announced by the uploader, if any.
    ///
    /// Nothing is indexed unless the whole stream was written. The previous
    /// blob of a replaced tag is released only after the new index is in
    /// place.
    pub fn put(&self, tag: &str, name: &str, mut f: impl Read, expected_size: Option<u64>) -> Result<FileRecord> {
        validate_tag(tag)?;

        let mut tmp = NamedTempFile::new_in(&self.blob_dir)?;
        debug!("writing {:?} to tempfile {:?} expected size {:?}", tag, tmp.path(), expected_size);
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut h = Sha256::new();
        let mut total_size: u64 = 0;
        loop {
            let c = match f.read(&mut buf[..]) {
                Ok(0) => {
                    break;
                },
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    continue;
                },
                Err(e) => {
                    warn!("cannot read upload body for {:?}: {}", tag, e);
                    return Err(Error::Storage(e));
                },
            };
            let data = &buf[..c];
            h.update(data);
            tmp.as_file_mut().write_all(data)?;
            total_size += c as u64;
        }

        if let Some(expected) = expected_size {
            if expected != total_size {
                return Err(Error::Storage(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("expected {} bytes, received {}", expected, total_size),
                )));
            }
        }
        tmp.as_file().sync_all()?;

        let digest = hex::encode(h.finalize());
        let blob = Uuid::new_v4().simple().to_string();
        let blob_path = self.blob_dir.join(&blob);
        if let Err(e) = tmp.persist(&blob_path) {
            return Err(Error::Storage(e.error));
        }
        debug!("stored {} bytes with digest {} as blob {}", total_size, digest, blob);

        let _w = self.writer.lock();
        let now = self.clock.now();
        let mut next = self.index.read().clone();
        let created_at = match next.get(tag) {
            Some(prev) if prev.created_at > now => prev.created_at,
            _ => now,
        };
        let record = FileRecord {
            tag: tag.to_string(),
            name: name.to_string(),
            created_at,
            size: total_size,
            digest,
            blob,
        };
        let prev = next.insert(tag.to_string(), record.clone());

        if let Err(e) = self.write_index(&next) {
            self.release_blob(&record.blob);
            return Err(e);
        }
        *self.index.write() = next;

        match prev {
            Some(v) => {
                info!("replaced {:?} ({} -> {})", tag, v.name, record.name);
                self.release_blob(&v.blob);
            },
            None => {
                info!("added {:?} ({})", tag, record.name);
            },
        };
        Ok(record)
    }

    pub fn get(&self, tag: &str) -> Result<FileRecord> {
        match self.index.read().get(tag) {
            Some(v) => Ok(v.clone()),
            None => Err(Error::NotFound(tag.to_string())),
        }
    }

    /// Look up `tag` and open its blob for reading.
    ///
    /// The blob is opened while the index is read-locked, so a concurrent
    /// replace cannot release it in between.
    pub fn open_blob(&self, tag: &str) -> Result<(FileRecord, File)> {
        let index = self.index.read();
        let record = match index.get(tag) {
            Some(v) => v.clone(),
            None => {
                return Err(Error::NotFound(tag.to_string()));
            },
        };
        let f = File::open(self.blob_dir.join(&record.blob))?;
        Ok((record, f))
    }

    pub fn delete(&self, tag: &str) -> Result<()> {
        let _w = self.writer.lock();
        let mut next = self.index.read().clone();
        let record = match next.remove(tag) {
            Some(v) => v,
            None => {
                return Err(Error::NotFound(tag.to_string()));
            },
        };
        self.write_index(&next)?;
        *self.index.write() = next;
        info!("deleted {:?}", tag);
        self.release_blob(&record.blob);
        Ok(())
    }

    /// Every current record, ordered by tag.
    pub fn list(&self) -> Vec<FileRecord> {
        let mut records: Vec<FileRecord> = self.index.read().values().cloned().collect();
        records.sort_by(|a, b| a.tag.cmp(&b.tag));
        records
    }

    /// Delete every record. Blobs that fail to release are logged and left behind.
    pub fn clear(&self) -> Result<()> {
        let _w = self.writer.lock();
        let empty = HashMap::new();
        self.write_index(&empty)?;
        let old = std::mem::replace(&mut *self.index.write(), empty);
        info!("cleared {} records", old.len());
        for r in old.values() {
            self.release_blob(&r.blob);
        }
        Ok(())
    }

    fn write_index(&self, index: &HashMap<String, FileRecord>) -> Result<()> {
        let mut records: Vec<&FileRecord> = index.values().collect();
        records.sort_by(|a, b| a.tag.cmp(&b.tag));

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), &records)?;
        tmp.as_file().sync_all()?;
        match tmp.persist(self.dir.join(INDEX_FILE)) {
            Ok(_) => Ok(()),
            Err(e) => Err(Error::Storage(e.error)),
        }
    }

    /// Remove a blob; one that is already gone counts as released.
    fn release_blob(&self, blob: &str) {
        let p = self.blob_dir.join(blob);
        match fs::remove_file(&p) {
            Ok(_) => {
                debug!("released blob {}", blob);
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("blob {} already gone", blob);
            },
            Err(e) => {
                warn!("cannot release blob {:?}: {}", p, e);
            },
        };
    }

    #[cfg(test)]
    pub(crate) fn blob_path(&self, record: &FileRecord) -> PathBuf {
        self.blob_dir.join(&record.blob)
    }
}
