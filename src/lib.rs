//! # unspool — content-aware block-tree decomposer and `.uns` archive
//!
//! Two layers live in this crate:
//!
//! - The decomposition engine (`storage`, `streams`, `tree`, `parsers`,
//!   `transforms`, `deduper`, `analyzer`) walks an arbitrary input file
//!   and builds a typed tree of sub-blocks — deflate/zlib/gzip/zip
//!   streams, JPEG, bitmap images, tracker-module audio — so a
//!   downstream compressor can recompress each one on its own terms
//!   instead of fighting the host format's own framing.
//! - The `.uns` archive container (`superblock`, `container_block`,
//!   `codec`, `crypto`, `index`, `io_stream`, `archive`, `recovery`,
//!   `plugin`, `perf`) is this library's testable consumer: a CAS-style
//!   packer/unpacker built on top of the decomposer's output.
//!
//! Container format guarantees (frozen in v1):
//! - All numeric fields are little-endian; never negotiated
//! - Every block is self-describing: magic, version, codec UUID, sizes, BLAKE3
//! - Every block header carries a mandatory CRC32; corrupt headers abort reads
//! - Codec identity is a frozen 16-byte UUID; short IDs are in-process only
//! - The container superblock declares all required codecs; decoders fail
//!   immediately if any UUID is unavailable — no partial decode, no fallback
//! - The INDEX block is at the end; the full block list is reconstructible by
//!   scanning forward from `SUPERBLOCK_SIZE` without the INDEX
//! - The plugin C ABI (`plugin.rs`) is stable at `UNSPOOL_PLUGIN_ABI_VERSION=1`

pub mod error;
pub mod misc;
pub mod storage;
pub mod streams;
pub mod tree;
pub mod parsers;
pub mod transforms;
pub mod deduper;
pub mod analyzer;

pub mod superblock;
pub mod codec;
pub mod crypto;
pub mod container_block;
pub mod index;
pub mod recovery;
pub mod io_stream;
pub mod archive;
pub mod plugin;
pub mod perf;

// Flat re-exports for the most common types.
pub use error::{Error, Result};
pub use analyzer::{Analyzer, AnalyzerOptions};
pub use storage::{Manager, Pool};
pub use tree::{Tree, BlockIx, BlockType as TreeBlockType, BlockInfo};

pub use superblock::Superblock;
pub use codec::{CodecId, get_codec, get_codec_by_uuid, CodecError};
pub use container_block::{BlockHeader, BlockType, encode_block, decode_block,
                BLOCK_HEADER_SIZE, BLOCK_MAGIC};
pub use index::{FileIndex, FileIndexRecord, BlockRef};
pub use crypto::{derive_key, CryptoError};
pub use archive::{Archive, PackOptions, FileInfo};
pub use plugin::{UnspoolCodecPlugin, PluginCodec, UNSPOOL_PLUGIN_ABI_VERSION};
pub use recovery::{RecoveryReport, RecoveryQuality, BlockHealth, scan_file};
