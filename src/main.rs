use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::PathBuf;

use layerpack::{chunk_data_with, pack, Chunk, ChunkerParams, Store};

#[derive(Parser)]
#[command(name = "layerpack")]
#[command(about = "Content-defined chunking and deduplicated blob storage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk a file and print boundary statistics
    Chunk {
        /// Input file
        file: PathBuf,
        /// Target chunk size in bits (average chunk is 2^bits bytes)
        #[arg(long, default_value = "13")]
        target_bits: u32,
        /// Minimum chunk size in bytes
        #[arg(long, default_value = "0")]
        min_size: usize,
        /// Print every chunk instead of just the summary
        #[arg(long)]
        verbose: bool,
    },
    /// Create a pack file from a file's chunks
    Pack {
        /// Source file
        file: PathBuf,
        /// Output pack file
        output: PathBuf,
    },
    /// Extract a pack file
    Unpack {
        /// Pack file
        pack: PathBuf,
        /// Output file
        output: PathBuf,
    },
    /// Manage the deduplicating blob store
    Store {
        #[command(subcommand)]
        action: StoreAction,
        /// Data directory for storage
        #[arg(long, default_value = "./data")]
        data: PathBuf,
    },
}

#[derive(Subcommand)]
enum StoreAction {
    /// Store a file as a blob
    Put {
        /// File to store
        file: PathBuf,
    },
    /// Retrieve a blob by digest
    Get {
        /// Blob digest (hex)
        digest: String,
        /// Output file
        output: PathBuf,
    },
    /// List stored blobs
    List,
    /// Delete a blob's manifest (chunks are removed by gc)
    Delete {
        /// Blob digest (hex)
        digest: String,
    },
    /// Garbage collect unreferenced chunks
    Gc,
}

fn parse_digest(s: &str) -> Result<[u8; 32], Box<dyn std::error::Error>> {
    let bytes = hex::decode(s)?;
    let digest: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| format!("digest must be 32 bytes, got {}", bytes.len()))?;
    Ok(digest)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Chunk {
            file,
            target_bits,
            min_size,
            verbose,
        } => {
            let data = std::fs::read(&file)?;
            let params = ChunkerParams {
                target_bits,
                min_size,
            };
            let chunks: Vec<Chunk> = chunk_data_with(&data, params).collect();

            if verbose {
                for chunk in &chunks {
                    println!(
                        "{:>12} {:>10} {}",
                        chunk.offset,
                        chunk.len(),
                        hex::encode(chunk.hash)
                    );
                }
            }

            let total: usize = chunks.iter().map(|c| c.len()).sum();
            println!("File: {}", file.display());
            println!("  Bytes: {}", total);
            println!("  Chunks: {}", chunks.len());
            if !chunks.is_empty() {
                let mean = total / chunks.len();
                let min = chunks.iter().map(|c| c.len()).min().unwrap_or(0);
                let max = chunks.iter().map(|c| c.len()).max().unwrap_or(0);
                println!("  Chunk size: mean {} min {} max {}", mean, min, max);
            }
        }
        Commands::Pack { file, output } => {
            let data = std::fs::read(&file)?;
            let chunks: Vec<Chunk> = layerpack::chunk_data(&data).collect();
            let manifest = layerpack::BlobManifest::from_chunks(&chunks);
            pack::write_pack(&output, &manifest, &chunks)?;
            println!("Created pack: {}", output.display());
            println!("  Digest: {}", hex::encode(manifest.digest));
            println!("  Chunks: {}", manifest.chunk_count());
        }
        Commands::Unpack {
            pack: pack_path,
            output,
        } => {
            let manifest = pack::unpack(&pack_path, &output)?;
            println!("Extracted to: {}", output.display());
            println!("  Digest: {}", hex::encode(manifest.digest));
            println!("  Bytes: {}", manifest.size);
        }
        Commands::Store { action, data } => {
            let store = Store::open(&data)?;

            match action {
                StoreAction::Put { file } => {
                    let input = File::open(&file)?;
                    let manifest = store.put_blob(input)?;
                    println!("{}", hex::encode(manifest.digest));
                }
                StoreAction::Get { digest, output } => {
                    let digest = parse_digest(&digest)?;
                    match store.get_blob(&digest)? {
                        Some(blob) => {
                            std::fs::write(&output, &blob)?;
                            println!("Wrote {} bytes to {}", blob.len(), output.display());
                        }
                        None => {
                            eprintln!("Blob not found");
                            std::process::exit(1);
                        }
                    }
                }
                StoreAction::List => {
                    let blobs = store.list_blobs()?;
                    if blobs.is_empty() {
                        println!("No blobs stored");
                    } else {
                        for (digest, size, chunk_count, created_at) in blobs {
                            println!("{}  {:>12}  {:>6}  {}", digest, size, chunk_count, created_at);
                        }
                    }
                }
                StoreAction::Delete { digest } => {
                    let digest = parse_digest(&digest)?;
                    if store.delete_blob(&digest)? {
                        println!("Deleted");
                    } else {
                        eprintln!("Blob not found");
                        std::process::exit(1);
                    }
                }
                StoreAction::Gc => {
                    let removed = store.gc()?;
                    println!("Removed {} unreferenced chunks", removed);
                }
            }
        }
    }

    Ok(())
}
