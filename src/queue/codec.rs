//! Batch wire format: newline-delimited JSON, gzip-compressed.

use bytes::{BufMut, Bytes, BytesMut};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::io::{Read, Write};

use super::publisher::PublishError;

const MAX_DECOMPRESSED_SIZE: usize = 10 * 1024 * 1024;

/// Serialize `records` as NDJSON, then gzip the whole body.
pub fn encode_batch<T: Serialize>(records: &[T]) -> Result<Bytes, PublishError> {
    let mut body = BytesMut::new();
    for (idx, record) in records.iter().enumerate() {
        if idx > 0 {
            body.put_slice(b"\n");
        }
        let json = serde_json::to_vec(record).map_err(|e| PublishError::Serialize(e.to_string()))?;
        body.extend_from_slice(&json);
    }

    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
    encoder
        .write_all(&body)
        .map_err(|e| PublishError::Serialize(format!("gzip: {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| PublishError::Serialize(format!("gzip: {}", e)))?;
    Ok(Bytes::from(compressed))
}

/// Inverse of [`encode_batch`], for consumers and tests.
pub fn decode_batch(payload: &[u8]) -> Result<Vec<serde_json::Value>, PublishError> {
    let mut decoder = GzDecoder::new(payload).take(MAX_DECOMPRESSED_SIZE as u64 + 1);
    let mut text = String::new();
    decoder
        .read_to_string(&mut text)
        .map_err(|e| PublishError::Serialize(format!("gunzip: {}", e)))?;
    if text.len() > MAX_DECOMPRESSED_SIZE {
        return Err(PublishError::Serialize(
            "decompressed batch exceeds size limit".to_string(),
        ));
    }

    text.split('\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(|e| PublishError::Serialize(e.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn batch_is_gzip_ndjson() {
        let payload = encode_batch(&[json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]).unwrap();
        // gzip magic
        assert_eq!(&payload[..2], &[0x1f, 0x8b]);

        let mut text = String::new();
        GzDecoder::new(&payload[..]).read_to_string(&mut text).unwrap();
        assert_eq!(text.matches('\n').count(), 2);
        assert_eq!(decode_batch(&payload).unwrap()[2], json!({"n": 3}));
    }

    #[test]
    fn empty_batch_decodes_to_nothing() {
        let payload = encode_batch::<serde_json::Value>(&[]).unwrap();
        assert!(decode_batch(&payload).unwrap().is_empty());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_batch(b"definitely not gzip").is_err());
    }
}
