use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::blob::{BlobManifest, ChunkRef};
use crate::chunker::Chunker;
use crate::lockfile::LockFile;

/// Store error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("blob {digest} is corrupt: {reason}")]
    Corrupt { digest: String, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Deduplicating blob store: sharded SQLite databases for chunks and a
/// central index database for blob manifests.
///
/// Chunks are keyed by their BLAKE3 hash and sharded across 256 databases
/// by the first hash byte. Blobs are keyed by the BLAKE3 digest of their
/// full content. Cross-process access is coordinated by an advisory lock
/// on `store.lock`; the mutexes serialize access within the process.
pub struct Store {
    base_path: PathBuf,
    lock: LockFile,
    index: Mutex<Connection>,
    chunk_dbs: Mutex<HashMap<u8, Connection>>,
}

impl Store {
    /// Open or create a store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;

        let chunks_path = path.join("chunks");
        fs::create_dir_all(&chunks_path)?;

        let lock = LockFile::open(&path.join("store.lock"))?;

        let index_path = path.join("index.db");
        let index = Connection::open(&index_path)?;

        index.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                id INTEGER PRIMARY KEY,
                digest TEXT UNIQUE NOT NULL,
                size INTEGER NOT NULL,
                chunk_count INTEGER NOT NULL,
                manifest BLOB NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        debug!(path = %path.display(), "opened store");

        Ok(Store {
            base_path: path.to_path_buf(),
            lock,
            index: Mutex::new(index),
            chunk_dbs: Mutex::new(HashMap::new()),
        })
    }

    /// Get the chunk database connection for a given hash prefix
    fn get_chunk_db(&self, prefix: u8) -> Result<()> {
        let mut dbs = self.chunk_dbs.lock().unwrap();
        if !dbs.contains_key(&prefix) {
            let db_path = self
                .base_path
                .join("chunks")
                .join(format!("{:02x}.db", prefix));
            let conn = Connection::open(&db_path)?;
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS chunks (
                    hash BLOB PRIMARY KEY,
                    data BLOB NOT NULL
                )
                "#,
                [],
            )?;
            dbs.insert(prefix, conn);
        }
        Ok(())
    }

    /// Store a chunk. Content-addressed, so overwriting is idempotent.
    pub fn store_chunk(&self, hash: &[u8; 32], data: &[u8]) -> Result<()> {
        let prefix = hash[0];
        self.get_chunk_db(prefix)?;

        let dbs = self.chunk_dbs.lock().unwrap();
        let conn = dbs.get(&prefix).unwrap();

        conn.execute(
            "INSERT OR REPLACE INTO chunks (hash, data) VALUES (?1, ?2)",
            params![hash.as_slice(), data],
        )?;

        Ok(())
    }

    /// Get a chunk by hash
    pub fn get_chunk(&self, hash: &[u8; 32]) -> Result<Option<Vec<u8>>> {
        let prefix = hash[0];
        self.get_chunk_db(prefix)?;

        let dbs = self.chunk_dbs.lock().unwrap();
        let conn = dbs.get(&prefix).unwrap();

        let result: Option<Vec<u8>> = conn
            .query_row(
                "SELECT data FROM chunks WHERE hash = ?1",
                params![hash.as_slice()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(result)
    }

    /// Check which chunks from a list exist in storage
    pub fn has_chunks(&self, hashes: &[[u8; 32]]) -> Result<Vec<[u8; 32]>> {
        let mut found = Vec::new();

        // Check each hash in order to maintain input order
        for hash in hashes {
            let prefix = hash[0];
            self.get_chunk_db(prefix)?;

            let dbs = self.chunk_dbs.lock().unwrap();
            let conn = dbs.get(&prefix).unwrap();

            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM chunks WHERE hash = ?1",
                    params![hash.as_slice()],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);

            if exists {
                found.push(*hash);
            }
        }

        Ok(found)
    }

    /// Chunk a stream and store it as a blob, returning the manifest.
    ///
    /// Chunks are written as they are produced; on a read error partway
    /// through, chunks already written stay valid (they are content-
    /// addressed) but no blob row is created.
    pub fn put_blob<R: Read>(&self, reader: R) -> Result<BlobManifest> {
        let _guard = self.lock.write()?;

        let mut hasher = blake3::Hasher::new();
        let mut refs: Vec<ChunkRef> = Vec::new();
        let mut size = 0u64;

        for chunk in Chunker::new(reader) {
            let chunk = chunk?;
            self.store_chunk(&chunk.hash, &chunk.data)?;
            hasher.update(&chunk.data);
            refs.push(ChunkRef {
                hash: chunk.hash,
                offset: chunk.offset,
                length: chunk.data.len() as u64,
            });
            size += chunk.data.len() as u64;
        }

        let manifest = BlobManifest {
            digest: *hasher.finalize().as_bytes(),
            size,
            chunks: refs,
        };

        let manifest_bytes = rmp_serde::to_vec(&manifest)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let index = self.index.lock().unwrap();
        index.execute(
            "INSERT OR REPLACE INTO blobs (digest, size, chunk_count, manifest) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                hex::encode(manifest.digest),
                manifest.size,
                manifest.chunks.len() as i64,
                manifest_bytes
            ],
        )?;

        info!(
            digest = %hex::encode(manifest.digest),
            size = manifest.size,
            chunks = manifest.chunks.len(),
            "stored blob"
        );

        Ok(manifest)
    }

    /// Get the manifest for a stored blob.
    pub fn get_manifest(&self, digest: &[u8; 32]) -> Result<Option<BlobManifest>> {
        let _guard = self.lock.read()?;

        let index = self.index.lock().unwrap();
        let result: Option<Vec<u8>> = index
            .query_row(
                "SELECT manifest FROM blobs WHERE digest = ?1",
                params![hex::encode(digest)],
                |row| row.get(0),
            )
            .optional()?;

        match result {
            Some(bytes) => {
                let manifest: BlobManifest = rmp_serde::from_slice(&bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(manifest))
            }
            None => Ok(None),
        }
    }

    /// Reassemble a blob from its chunks, verifying the content digest.
    pub fn get_blob(&self, digest: &[u8; 32]) -> Result<Option<Vec<u8>>> {
        let Some(manifest) = self.get_manifest(digest)? else {
            return Ok(None);
        };

        let _guard = self.lock.read()?;

        let mut data = Vec::with_capacity(manifest.size as usize);
        for chunk_ref in &manifest.chunks {
            let chunk = self.get_chunk(&chunk_ref.hash)?.ok_or_else(|| {
                StoreError::Corrupt {
                    digest: hex::encode(digest),
                    reason: format!("missing chunk {}", hex::encode(chunk_ref.hash)),
                }
            })?;
            if chunk.len() as u64 != chunk_ref.length {
                return Err(StoreError::Corrupt {
                    digest: hex::encode(digest),
                    reason: format!(
                        "chunk {} has length {}, expected {}",
                        hex::encode(chunk_ref.hash),
                        chunk.len(),
                        chunk_ref.length
                    ),
                });
            }
            data.extend_from_slice(&chunk);
        }

        if *blake3::hash(&data).as_bytes() != *digest {
            return Err(StoreError::Corrupt {
                digest: hex::encode(digest),
                reason: "content digest mismatch".to_string(),
            });
        }

        Ok(Some(data))
    }

    /// List stored blobs as (digest, size, chunk_count, created_at).
    pub fn list_blobs(&self) -> Result<Vec<(String, u64, u64, String)>> {
        let _guard = self.lock.read()?;

        let index = self.index.lock().unwrap();
        let mut stmt = index.prepare(
            "SELECT digest, size, chunk_count, created_at FROM blobs ORDER BY id",
        )?;
        let blobs: Vec<(String, u64, u64, String)> = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(blobs)
    }

    /// Delete a blob's manifest. Its chunks stay until the next `gc`, since
    /// other blobs may share them.
    pub fn delete_blob(&self, digest: &[u8; 32]) -> Result<bool> {
        let _guard = self.lock.write()?;

        let index = self.index.lock().unwrap();
        let n = index.execute(
            "DELETE FROM blobs WHERE digest = ?1",
            params![hex::encode(digest)],
        )?;
        Ok(n > 0)
    }

    /// Delete chunks referenced by no manifest. Returns the number removed.
    pub fn gc(&self) -> Result<usize> {
        let _guard = self.lock.write()?;

        // Collect every referenced chunk hash.
        let mut referenced: HashSet<[u8; 32]> = HashSet::new();
        {
            let index = self.index.lock().unwrap();
            let mut stmt = index.prepare("SELECT manifest FROM blobs")?;
            let manifests: Vec<Vec<u8>> = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for bytes in manifests {
                let manifest: BlobManifest = rmp_serde::from_slice(&bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                for chunk_ref in manifest.chunks {
                    referenced.insert(chunk_ref.hash);
                }
            }
        }

        // Sweep every shard database that exists on disk.
        let mut removed = 0;
        for entry in fs::read_dir(self.base_path.join("chunks"))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(prefix) = name
                .strip_suffix(".db")
                .and_then(|p| u8::from_str_radix(p, 16).ok())
            else {
                continue;
            };
            self.get_chunk_db(prefix)?;

            let dbs = self.chunk_dbs.lock().unwrap();
            let conn = dbs.get(&prefix).unwrap();

            let mut stmt = conn.prepare("SELECT hash FROM chunks")?;
            let hashes: Vec<Vec<u8>> = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            drop(stmt);

            for hash in hashes {
                let keep = hash
                    .as_slice()
                    .try_into()
                    .map(|h: [u8; 32]| referenced.contains(&h))
                    .unwrap_or(false);
                if !keep {
                    conn.execute("DELETE FROM chunks WHERE hash = ?1", params![hash])?;
                    removed += 1;
                }
            }
        }

        info!(removed, "garbage collected unreferenced chunks");

        Ok(removed)
    }
}
