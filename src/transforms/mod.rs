//! Reversible content transforms (C6): given a block's raw bytes,
//! produce a more-compressible representation plus enough metadata to
//! reconstruct the original bytes exactly on `undo`.
//!
//! Only one transform exists today — [`deflate::DeflateTransform`] —
//! grounded on `original_source/transforms/deflatetransform.{hpp,cpp}`.
//! Bitmap/JPEG/Mod blocks carry their [`crate::tree::BlockInfo`] for
//! bookkeeping but are not recompressed in place; they're exposed to
//! the downstream compressor as their own typed child stream.

pub mod deflate;

pub use deflate::DeflateTransform;
