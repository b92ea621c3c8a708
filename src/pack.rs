use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blob::BlobManifest;
use crate::chunker::Chunk;

pub const MAGIC: &[u8; 8] = b"LAYRPAK\0";
pub const VERSION: u8 = 1;

/// Header size: magic (8) + version (1) + index_offset (8) + index_size (8) = 25 bytes
const HEADER_SIZE: u64 = 25;

#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a pack file (bad magic)")]
    BadMagic,
    #[error("unsupported pack version {0}")]
    UnsupportedVersion(u8),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("pack is missing chunk {0}")]
    MissingChunk(String),
    #[error("content digest mismatch after unpack")]
    DigestMismatch,
}

pub type Result<T> = std::result::Result<T, PackError>;

/// Pack index stored at the end of the file.
#[derive(Serialize, Deserialize)]
pub struct PackIndex {
    pub manifest: BlobManifest,
    pub chunk_offsets: HashMap<[u8; 32], (u64, u64)>, // hash -> (offset, size)
}

/// Write a pack file holding the blob's chunks, deduplicated by hash.
pub fn write_pack(path: &Path, manifest: &BlobManifest, chunks: &[Chunk]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    // Write placeholder header
    writer.write_all(MAGIC)?;
    writer.write_all(&[VERSION])?;
    writer.write_all(&[0u8; 16])?; // placeholder for index_offset and index_size

    // Write chunks, tracking offsets (deduplicate by hash)
    let mut chunk_offsets: HashMap<[u8; 32], (u64, u64)> = HashMap::new();
    let mut offset = HEADER_SIZE;

    for chunk in chunks {
        if chunk_offsets.contains_key(&chunk.hash) {
            continue; // Skip duplicate
        }

        writer.write_all(&chunk.data)?;
        chunk_offsets.insert(chunk.hash, (offset, chunk.data.len() as u64));
        offset += chunk.data.len() as u64;
    }

    // Write index
    let index = PackIndex {
        manifest: manifest.clone(),
        chunk_offsets,
    };
    let index_bytes =
        rmp_serde::to_vec(&index).map_err(|e| PackError::Serialization(e.to_string()))?;
    let index_offset = offset;
    let index_size = index_bytes.len() as u64;
    writer.write_all(&index_bytes)?;

    // Seek back and write actual header
    writer.flush()?;
    let mut file = writer.into_inner().map_err(|e| e.into_error())?;
    file.seek(SeekFrom::Start(9))?; // After magic + version
    file.write_all(&index_offset.to_le_bytes())?;
    file.write_all(&index_size.to_le_bytes())?;

    debug!(
        path = %path.display(),
        stored = index_offset - HEADER_SIZE,
        logical = index.manifest.size,
        "wrote pack"
    );

    Ok(())
}

/// Read just the index of a pack file.
pub fn read_index(path: &Path) -> Result<PackIndex> {
    let mut file = File::open(path)?;

    let mut magic = [0u8; 8];
    file.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(PackError::BadMagic);
    }

    let mut version = [0u8; 1];
    file.read_exact(&mut version)?;
    if version[0] != VERSION {
        return Err(PackError::UnsupportedVersion(version[0]));
    }

    let mut buf = [0u8; 8];
    file.read_exact(&mut buf)?;
    let index_offset = u64::from_le_bytes(buf);
    file.read_exact(&mut buf)?;
    let index_size = u64::from_le_bytes(buf);

    file.seek(SeekFrom::Start(index_offset))?;
    let mut index_bytes = vec![0u8; index_size as usize];
    file.read_exact(&mut index_bytes)?;

    rmp_serde::from_slice(&index_bytes).map_err(|e| PackError::Serialization(e.to_string()))
}

/// Reassemble the blob from a pack file into `output`, verifying its digest.
pub fn unpack(path: &Path, output: &Path) -> Result<BlobManifest> {
    let index = read_index(path)?;
    let mut file = File::open(path)?;

    let out = File::create(output)?;
    let mut writer = BufWriter::new(out);
    let mut hasher = blake3::Hasher::new();

    for chunk_ref in &index.manifest.chunks {
        let (offset, size) = *index
            .chunk_offsets
            .get(&chunk_ref.hash)
            .ok_or_else(|| PackError::MissingChunk(hex::encode(chunk_ref.hash)))?;

        file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; size as usize];
        file.read_exact(&mut data)?;

        hasher.update(&data);
        writer.write_all(&data)?;
    }
    writer.flush()?;

    if *hasher.finalize().as_bytes() != index.manifest.digest {
        return Err(PackError::DigestMismatch);
    }

    Ok(index.manifest)
}
