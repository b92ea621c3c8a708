use std::io::{self, ErrorKind, Read};

use crate::rollsum::{RollSum, DEFAULT_TARGET_BITS};

const READ_BUF_SIZE: usize = 64 * 1024;

/// A content-addressed chunk of data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset of this chunk in the source stream.
    pub offset: u64,
    pub hash: [u8; 32],
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Tuning knobs for boundary detection.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerParams {
    /// Number of trailing checksum bits that must match for a split;
    /// the average chunk size is `2^target_bits` bytes.
    pub target_bits: u32,
    /// Minimum chunk length. Split points closer than this to the start of
    /// the current chunk are ignored. Zero disables the floor.
    pub min_size: usize,
}

impl Default for ChunkerParams {
    fn default() -> Self {
        ChunkerParams {
            target_bits: DEFAULT_TARGET_BITS,
            min_size: 0,
        }
    }
}

/// Chunk an in-memory buffer with default parameters, yielding chunks with
/// BLAKE3 hashes.
pub fn chunk_data(data: &[u8]) -> impl Iterator<Item = Chunk> + '_ {
    chunk_data_with(data, ChunkerParams::default())
}

/// Chunk an in-memory buffer with explicit parameters.
pub fn chunk_data_with(data: &[u8], params: ChunkerParams) -> impl Iterator<Item = Chunk> + '_ {
    SliceChunks {
        data,
        pos: 0,
        sum: RollSum::new(),
        params,
    }
}

struct SliceChunks<'a> {
    data: &'a [u8],
    pos: usize,
    sum: RollSum,
    params: ChunkerParams,
}

impl Iterator for SliceChunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.pos >= self.data.len() {
            return None;
        }

        let start = self.pos;
        while self.pos < self.data.len() {
            self.sum.roll(self.data[self.pos]);
            self.pos += 1;
            let len = self.pos - start;
            if len >= self.params.min_size && self.sum.on_split(self.params.target_bits) {
                break;
            }
        }
        // Either a boundary was hit or the input ran out; the tail is a
        // chunk either way.
        let data = self.data[start..self.pos].to_vec();
        Some(Chunk {
            offset: start as u64,
            hash: *blake3::hash(&data).as_bytes(),
            data,
        })
    }
}

/// Streaming chunker over any `Read` source.
///
/// Yields chunks in stream order. A read error is yielded once and the
/// iterator fuses; bytes buffered before the error are discarded rather
/// than emitted as a truncated chunk. The rolling checksum is never reset
/// at chunk boundaries, so boundaries depend only on local content.
pub struct Chunker<R> {
    reader: R,
    params: ChunkerParams,
    sum: RollSum,
    buf: Vec<u8>,
    buf_pos: usize,
    buf_len: usize,
    pending: Vec<u8>,
    offset: u64,
    done: bool,
}

impl<R: Read> Chunker<R> {
    pub fn new(reader: R) -> Self {
        Self::with_params(reader, ChunkerParams::default())
    }

    pub fn with_params(reader: R, params: ChunkerParams) -> Self {
        Chunker {
            reader,
            params,
            sum: RollSum::new(),
            buf: vec![0; READ_BUF_SIZE],
            buf_pos: 0,
            buf_len: 0,
            pending: Vec::new(),
            offset: 0,
            done: false,
        }
    }

    /// Current rolling digest, for diagnostics after (or during) chunking.
    pub fn digest(&self) -> u32 {
        self.sum.digest()
    }

    fn emit(&mut self) -> Chunk {
        let data = std::mem::take(&mut self.pending);
        let chunk = Chunk {
            offset: self.offset,
            hash: *blake3::hash(&data).as_bytes(),
            data,
        };
        self.offset += chunk.data.len() as u64;
        chunk
    }
}

impl<R: Read> Iterator for Chunker<R> {
    type Item = io::Result<Chunk>;

    fn next(&mut self) -> Option<io::Result<Chunk>> {
        if self.done {
            return None;
        }
        loop {
            if self.buf_pos == self.buf_len {
                match self.reader.read(&mut self.buf) {
                    Ok(0) => {
                        self.done = true;
                        if self.pending.is_empty() {
                            return None;
                        }
                        return Some(Ok(self.emit()));
                    }
                    Ok(n) => {
                        self.buf_pos = 0;
                        self.buf_len = n;
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        self.done = true;
                        self.pending.clear();
                        return Some(Err(e));
                    }
                }
            }
            while self.buf_pos < self.buf_len {
                let byte = self.buf[self.buf_pos];
                self.buf_pos += 1;
                self.sum.roll(byte);
                self.pending.push(byte);
                if self.pending.len() >= self.params.min_size
                    && self.sum.on_split(self.params.target_bits)
                {
                    return Some(Ok(self.emit()));
                }
            }
        }
    }
}
