//! Compact text encoding for persisted artifacts.
//!
//! `value -> JSON -> gzip -> base64` and back. The result is plain ASCII, so
//! it can sit in a text column or a single line of a file.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{self, Read, Write};

use crate::domain::error::StratbenchError;

pub fn compress_str(text: &str) -> Result<String, StratbenchError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes())?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

pub fn decompress_str(encoded: &str) -> Result<String, StratbenchError> {
    let compressed = STANDARD
        .decode(encoded.trim())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut text = String::new();
    GzDecoder::new(compressed.as_slice()).read_to_string(&mut text)?;
    Ok(text)
}

pub fn compress_json<T: Serialize>(value: &T) -> Result<String, StratbenchError> {
    let json = serde_json::to_string(value)?;
    compress_str(&json)
}

pub fn decompress_json<T: DeserializeOwned>(encoded: &str) -> Result<T, StratbenchError> {
    let json = decompress_str(encoded)?;
    Ok(serde_json::from_str(&json)?)
}
