use std::collections::HashSet;
use std::io::{self, Cursor, Read};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use layerpack::chunker::{chunk_data, chunk_data_with, Chunk, Chunker, ChunkerParams};
use layerpack::rollsum::RollSum;

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}

fn assert_covers(chunks: &[Chunk], data: &[u8]) {
    let mut offset = 0u64;
    for chunk in chunks {
        assert_eq!(chunk.offset, offset);
        assert!(!chunk.is_empty());
        offset += chunk.len() as u64;
    }
    assert_eq!(offset, data.len() as u64);

    let reconstructed: Vec<u8> = chunks.iter().flat_map(|c| c.data.iter().copied()).collect();
    assert_eq!(reconstructed, data);
}

#[test]
fn test_chunk_empty_input() {
    let chunks: Vec<Chunk> = chunk_data(&[]).collect();
    assert!(chunks.is_empty());
}

#[test]
fn test_chunk_small_data() {
    let data = b"Hello, world!";
    let chunks: Vec<Chunk> = chunk_data(data).collect();

    // Small data should produce one chunk
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].offset, 0);
    assert_eq!(chunks[0].data, data);

    // Hash should be BLAKE3 of data
    let expected_hash = blake3::hash(data);
    assert_eq!(chunks[0].hash, *expected_hash.as_bytes());
}

#[test]
fn test_chunk_short_input_single_chunk() {
    // With an all-zero window the checksum never satisfies the split mask,
    // so a 100-byte zero input is exactly one chunk covering it all.
    let data = vec![0u8; 100];
    let chunks: Vec<Chunk> = chunk_data(&data).collect();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].len(), 100);

    let data = random_bytes(7, 100);
    let chunks: Vec<Chunk> = chunk_data(&data).collect();
    assert_covers(&chunks, &data);
}

#[test]
fn test_chunk_deterministic() {
    let data = random_bytes(11, 1 << 20);
    let chunks1: Vec<Chunk> = chunk_data(&data).collect();
    let chunks2: Vec<Chunk> = chunk_data(&data).collect();

    assert_eq!(chunks1.len(), chunks2.len());
    for (c1, c2) in chunks1.iter().zip(chunks2.iter()) {
        assert_eq!(c1.offset, c2.offset);
        assert_eq!(c1.hash, c2.hash);
    }
}

#[test]
fn test_chunk_million_random_bytes() {
    let total = 1_000_000usize;
    let data = random_bytes(13, total);
    let chunks: Vec<Chunk> = chunk_data(&data).collect();

    assert_covers(&chunks, &data);

    // With a 13-bit target the count should sit between total/2^14 and
    // total/2^12.
    assert!(chunks.len() >= total / 16384, "too few chunks: {}", chunks.len());
    assert!(chunks.len() <= total / 4096, "too many chunks: {}", chunks.len());
}

#[test]
fn test_mean_chunk_size_near_target() {
    let total = 4 << 20;
    let data = random_bytes(17, total);
    let chunks: Vec<Chunk> = chunk_data(&data).collect();

    let mean = total / chunks.len();
    assert!(
        (4096..16384).contains(&mean),
        "mean chunk size {} too far from 8192",
        mean
    );
}

#[test]
fn test_locality_of_single_byte_insert() {
    let data = random_bytes(19, 256 * 1024);
    let edit_pos = 128 * 1024;

    let mut edited = data.clone();
    edited.insert(edit_pos, 0xAB);

    let original: Vec<Chunk> = chunk_data(&data).collect();
    let modified: Vec<Chunk> = chunk_data(&edited).collect();

    // Chunks that end before the edit are untouched: boundaries depend only
    // on the trailing window, which the edit cannot reach.
    let prefix_len = original
        .iter()
        .take_while(|c| c.offset + c.len() as u64 <= edit_pos as u64)
        .count();
    for (a, b) in original[..prefix_len].iter().zip(&modified[..prefix_len]) {
        assert_eq!(a.offset, b.offset);
        assert_eq!(a.hash, b.hash);
    }

    // Past the edit, at most the chunk containing it and its neighbors may
    // differ; everything else reappears with a shifted offset.
    let modified_hashes: HashSet<[u8; 32]> = modified.iter().map(|c| c.hash).collect();
    let lost = original
        .iter()
        .filter(|c| !modified_hashes.contains(&c.hash))
        .count();
    assert!(lost <= 3, "{} chunks lost after a one-byte insert", lost);
}

#[test]
fn test_min_size_floor() {
    let data = random_bytes(23, 1 << 20);
    let params = ChunkerParams {
        target_bits: 13,
        min_size: 4096,
    };
    let chunks: Vec<Chunk> = chunk_data_with(&data, params).collect();

    assert_covers(&chunks, &data);
    for chunk in &chunks[..chunks.len() - 1] {
        assert!(chunk.len() >= 4096);
    }
}

#[test]
fn test_streaming_matches_slice_chunking() {
    let data = random_bytes(29, 300_000);

    let from_slice: Vec<Chunk> = chunk_data(&data).collect();
    let from_stream: Vec<Chunk> = Chunker::new(Cursor::new(&data))
        .collect::<io::Result<Vec<Chunk>>>()
        .unwrap();

    assert_eq!(from_slice, from_stream);
}

#[test]
fn test_streaming_final_digest() {
    let data = random_bytes(31, 10_000);

    let mut sum = RollSum::new();
    for &byte in &data {
        sum.roll(byte);
    }

    let mut chunker = Chunker::new(Cursor::new(&data));
    for chunk in &mut chunker {
        chunk.unwrap();
    }
    assert_eq!(chunker.digest(), sum.digest());
}

/// Reader that delivers its data and then fails instead of reporting EOF.
struct FailingReader {
    data: Cursor<Vec<u8>>,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.data.read(buf)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "stream broke"));
        }
        Ok(n)
    }
}

#[test]
fn test_streaming_read_error_aborts() {
    let data = random_bytes(37, 100_000);
    let reader = FailingReader {
        data: Cursor::new(data.clone()),
    };

    let mut emitted: Vec<Chunk> = Vec::new();
    let mut chunker = Chunker::new(reader);
    let mut saw_error = false;
    for result in &mut chunker {
        match result {
            Ok(chunk) => {
                assert!(!saw_error);
                emitted.push(chunk);
            }
            Err(e) => {
                assert_eq!(e.kind(), io::ErrorKind::Other);
                saw_error = true;
            }
        }
    }
    assert!(saw_error);
    // Fused after the error.
    assert!(chunker.next().is_none());

    // Every emitted chunk is a complete chunk of the full input; the
    // partial tail at the error point was dropped, not emitted.
    let reference: Vec<Chunk> = chunk_data(&data).collect();
    assert!(emitted.len() <= reference.len());
    assert_eq!(emitted[..], reference[..emitted.len()]);
}
