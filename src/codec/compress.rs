//! Deflate wrapper for audio bodies

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::CodecError;

/// Compress `data` at `level` (1 = fastest, 9 = smallest)
pub fn deflate(data: &[u8], level: u32) -> Result<Vec<u8>, CodecError> {
    let mut encoder = DeflateEncoder::new(
        Vec::with_capacity(data.len() / 2),
        Compression::new(level.clamp(1, 9)),
    );
    encoder
        .write_all(data)
        .map_err(|e| CodecError::Compression(e.to_string()))?;
    encoder.finish().map_err(|e| CodecError::Compression(e.to_string()))
}

/// Compressed form of `data`, or `None` when it would not be smaller
pub fn deflate_if_smaller(data: &[u8], level: u32) -> Result<Option<Vec<u8>>, CodecError> {
    let compressed = deflate(data, level)?;
    Ok((compressed.len() < data.len()).then_some(compressed))
}

/// Decompress at most `limit` bytes; more output than that is an error
pub fn inflate(data: &[u8], limit: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(limit);
    DeflateDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Decompression(e.to_string()))?;

    if out.len() > limit {
        return Err(CodecError::Decompression(format!(
            "inflated body exceeds {limit} bytes"
        )));
    }
    Ok(out)
}
