use serde::{Deserialize, Serialize};

use crate::chunker::Chunk;

/// Location of one chunk within a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub hash: [u8; 32],
    pub offset: u64,
    pub length: u64,
}

/// Recipe for reassembling a stored blob: its whole-content BLAKE3 digest,
/// total size, and the ordered chunk list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobManifest {
    pub digest: [u8; 32],
    pub size: u64,
    pub chunks: Vec<ChunkRef>,
}

impl BlobManifest {
    /// Build a manifest from chunks in stream order.
    pub fn from_chunks(chunks: &[Chunk]) -> Self {
        let mut hasher = blake3::Hasher::new();
        let mut refs = Vec::with_capacity(chunks.len());
        let mut size = 0u64;

        for chunk in chunks {
            hasher.update(&chunk.data);
            refs.push(ChunkRef {
                hash: chunk.hash,
                offset: chunk.offset,
                length: chunk.data.len() as u64,
            });
            size += chunk.data.len() as u64;
        }

        BlobManifest {
            digest: *hasher.finalize().as_bytes(),
            size,
            chunks: refs,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}
