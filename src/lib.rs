pub mod blob;
pub mod chunker;
pub mod lockfile;
pub mod pack;
pub mod rollsum;
pub mod store;

pub use blob::{BlobManifest, ChunkRef};
pub use chunker::{chunk_data, chunk_data_with, Chunk, Chunker, ChunkerParams};
pub use lockfile::{LockFile, LockGuard};
pub use rollsum::RollSum;
pub use store::Store;
