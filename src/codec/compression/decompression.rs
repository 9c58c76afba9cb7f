use bytes::{Bytes, BytesMut};
use std::fmt;

use super::compressors::{self, IDENTITY};
use super::errors::DecompressionError;

const CONTENT_ENCODING_HEADER: &str = "content-encoding";

/// A streaming decoder for one body's `content-encoding`.
///
/// Re-decodes the full compressed prefix seen so far on every [`push`], and
/// emits only the bytes beyond what was already handed to the caller. This
/// keeps each underlying decoder (`flate2`'s `Read` adapters, `brotli`'s
/// buffer decompressor) stateless across calls, trading some repeated CPU
/// work for a decoder implementation that is trivially correct to reason
/// about — content bodies the decoding decorator attaches to are bounded by
/// `max_response_length`, so the cost is bounded too. See DESIGN.md.
///
/// [`push`]: ContentDecoder::push
pub struct ContentDecoder {
    encoding: String,
    decompressor: Box<dyn compressors::Decompressor>,
    compressed_so_far: BytesMut,
    decompressed_emitted: usize,
}

impl fmt::Debug for ContentDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentDecoder")
            .field("encoding", &self.encoding)
            .finish()
    }
}

impl ContentDecoder {
    /// Build a decoder for `encoding`, or `None` for `identity`/absent encoding.
    pub fn for_encoding(encoding: Option<&str>) -> Result<Option<Self>, DecompressionError> {
        let Some(encoding) = encoding else {
            return Ok(None);
        };
        if encoding == IDENTITY {
            return Ok(None);
        }
        let decompressor = compressors::get(encoding).ok_or_else(|| {
            DecompressionError::UnsupportedEncoding {
                requested: encoding.to_string(),
                known: compressors::known_names(),
            }
        })?;
        Ok(Some(ContentDecoder {
            encoding: encoding.to_string(),
            decompressor,
            compressed_so_far: BytesMut::new(),
            decompressed_emitted: 0,
        }))
    }

    /// Read the `content-encoding` header value, ignoring `identity`.
    pub fn header_encoding(headers: &http::HeaderMap) -> Option<String> {
        headers
            .get(CONTENT_ENCODING_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| *v != IDENTITY)
            .map(str::to_string)
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Feed one more chunk of compressed bytes, returning the newly
    /// available decompressed bytes (possibly empty; never a partial repeat
    /// of bytes already returned by an earlier call).
    pub fn push(&mut self, chunk: &[u8]) -> Result<Bytes, DecompressionError> {
        self.compressed_so_far.extend_from_slice(chunk);
        let mut out = BytesMut::new();
        self.decompressor
            .decompress(&self.compressed_so_far, &mut out)?;
        let total = out.len();
        let fresh = if self.decompressed_emitted >= total {
            BytesMut::new()
        } else {
            out.split_off(self.decompressed_emitted)
        };
        self.decompressed_emitted = total;
        Ok(fresh.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn deflate(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        let err = ContentDecoder::for_encoding(Some("zstd")).unwrap_err();
        match err {
            DecompressionError::UnsupportedEncoding { requested, .. } => {
                assert_eq!(requested, "zstd")
            }
            _ => panic!("expected UnsupportedEncoding"),
        }
    }

    #[test]
    fn identity_and_absent_encoding_need_no_decoder() {
        assert!(ContentDecoder::for_encoding(None).unwrap().is_none());
        assert!(ContentDecoder::for_encoding(Some("identity"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn deflate_round_trips_single_chunk() {
        let original = b"hello reactive pipeline world";
        let compressed = deflate(original);
        let mut decoder = ContentDecoder::for_encoding(Some("deflate"))
            .unwrap()
            .unwrap();
        let out = decoder.push(&compressed).unwrap();
        assert_eq!(&out[..], &original[..]);
    }

    #[test]
    fn deflate_round_trips_split_across_two_chunks() {
        let original = b"0123456789abcdef";
        let compressed = deflate(original);
        let (first, second) = compressed.split_at(compressed.len() / 2);

        let mut decoder = ContentDecoder::for_encoding(Some("deflate"))
            .unwrap()
            .unwrap();
        let mut out = Vec::new();
        out.extend_from_slice(&decoder.push(first).unwrap());
        out.extend_from_slice(&decoder.push(second).unwrap());
        assert_eq!(out, original);
    }
}
