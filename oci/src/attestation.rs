//! Attestation layer encoding.
//!
//! Statements are small next to manifest content, so the gzip-compressed
//! JSON-lines stream is kept in memory rather than written to disk.

use std::io::{Cursor, Read};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tape_core::attest::{Statement, Statements};
use tape_core::error::{Result, Stage, TapeError};

use crate::digest::sha256_digest;
use crate::media_type::MediaType;

/// In-memory attestation layer.
///
/// The encoded bytes are fixed at construction; [`AttestationLayer::open`]
/// can be called any number of times and never re-runs the encoder.
#[derive(Debug, Clone)]
pub struct AttestationLayer {
    data: Arc<[u8]>,
    digest: String,
}

impl AttestationLayer {
    /// Fresh reader over the compressed bytes.
    pub fn open(&self) -> impl Read + Send + 'static {
        Cursor::new(Arc::clone(&self.data))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn media_type(&self) -> MediaType {
        MediaType::Attest
    }
}

/// Encode statements as a gzip JSON-lines layer, or `None` when there are
/// no statements.
pub fn build_attestations(statements: &[Statement]) -> Result<Option<AttestationLayer>> {
    if statements.is_empty() {
        return Ok(None);
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    Statements(statements)
        .encode(&mut encoder)
        .map_err(|e| TapeError::wrap(Stage::Attestations, "encoding statements failed", e))?;
    let data = encoder
        .finish()
        .map_err(|e| TapeError::wrap(Stage::Attestations, "compressing statements failed", e))?;

    let digest = sha256_digest(&data);
    tracing::debug!(
        statements = statements.len(),
        digest = %digest,
        size = data.len(),
        "Encoded attestation layer"
    );

    Ok(Some(AttestationLayer {
        data: data.into(),
        digest,
    }))
}

/// Decode a gzip JSON-lines attestation blob.
pub fn decode_attestations<R: Read>(reader: R) -> Result<Vec<Statement>> {
    Statements::decode(std::io::BufReader::new(GzDecoder::new(reader)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tape_core::attest::{Predicate, Subject};

    fn statement(n: usize) -> Statement {
        Statement {
            subject: vec![Subject::sha256(format!("file-{}.yaml", n), "ff")],
            predicate: Predicate::Other {
                predicate_type: "example.com/Test/v1".to_string(),
                body: serde_json::json!({ "n": n }),
            },
        }
    }

    #[test]
    fn test_empty_statements_produce_no_layer() {
        assert!(build_attestations(&[]).unwrap().is_none());
    }

    #[test]
    fn test_layer_can_be_opened_repeatedly() {
        let layer = build_attestations(&[statement(1), statement(2)])
            .unwrap()
            .unwrap();

        let mut first = Vec::new();
        layer.open().read_to_end(&mut first).unwrap();
        let mut second = Vec::new();
        layer.open().read_to_end(&mut second).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, layer.bytes());
        assert_eq!(layer.size(), first.len() as u64);
        assert_eq!(layer.digest(), sha256_digest(&first));
        assert_eq!(layer.media_type(), MediaType::Attest);
    }

    #[test]
    fn test_layer_decodes_to_json_lines() {
        let statements = vec![statement(1), statement(2)];
        let layer = build_attestations(&statements).unwrap().unwrap();

        let mut text = String::new();
        GzDecoder::new(layer.open()).read_to_string(&mut text).unwrap();
        assert_eq!(text.lines().count(), 2);

        assert_eq!(decode_attestations(layer.open()).unwrap(), statements);
    }
}
