//! Per-encoding decoders for the client-side decoding decorator (spec §4.D.6).

use std::io;

use bytes::{Buf, BytesMut};

pub(crate) const IDENTITY: &str = "identity";

/// Decodes a whole `content-encoding`d buffer.
///
/// Gzip and deflate decode via `flate2`'s `Read`-based decoders; brotli (no
/// incremental push API in the `brotli` crate) decodes whatever has been
/// buffered so far on every call, which is correct but re-walks the
/// already-decoded prefix for multi-chunk bodies — acceptable here since
/// content bodies subject to decoding are bounded by `max_response_length`.
pub(crate) trait Decompressor: Sync + Send {
    fn name(&self) -> &'static str;

    fn decompress(&self, in_buffer: &BytesMut, out_buffer: &mut BytesMut) -> io::Result<()>;
}

#[cfg(feature = "gzip")]
pub(crate) struct Gzip;

#[cfg(feature = "gzip")]
impl Decompressor for Gzip {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn decompress(&self, in_buffer: &BytesMut, out_buffer: &mut BytesMut) -> io::Result<()> {
        use flate2::read::GzDecoder;
        let mut decoder = GzDecoder::new(&in_buffer[..]);
        let mut writer = super::bufwriter::new(out_buffer);
        io::copy(&mut decoder, &mut writer)?;
        Ok(())
    }
}

#[cfg(feature = "deflate")]
pub(crate) struct Deflate;

#[cfg(feature = "deflate")]
impl Decompressor for Deflate {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn decompress(&self, in_buffer: &BytesMut, out_buffer: &mut BytesMut) -> io::Result<()> {
        use flate2::read::ZlibDecoder;
        let mut decoder = ZlibDecoder::new(&in_buffer[..]);
        let mut writer = super::bufwriter::new(out_buffer);
        io::copy(&mut decoder, &mut writer)?;
        Ok(())
    }
}

#[cfg(feature = "brotli")]
pub(crate) struct Brotli;

#[cfg(feature = "brotli")]
impl Decompressor for Brotli {
    fn name(&self) -> &'static str {
        "br"
    }

    fn decompress(&self, in_buffer: &BytesMut, out_buffer: &mut BytesMut) -> io::Result<()> {
        let mut reader = brotli::Decompressor::new(&in_buffer[..], 4096);
        let mut writer = super::bufwriter::new(out_buffer);
        io::copy(&mut reader, &mut writer)?;
        Ok(())
    }
}

pub(crate) fn get(name: &str) -> Option<Box<dyn Decompressor>> {
    match name {
        #[cfg(feature = "gzip")]
        "gzip" => Some(Box::new(Gzip)),
        #[cfg(feature = "deflate")]
        "deflate" => Some(Box::new(Deflate)),
        #[cfg(feature = "brotli")]
        "br" => Some(Box::new(Brotli)),
        _ => None,
    }
}

pub(crate) fn known_names() -> Vec<String> {
    let mut names = Vec::new();
    #[cfg(feature = "gzip")]
    names.push("gzip".to_string());
    #[cfg(feature = "deflate")]
    names.push("deflate".to_string());
    #[cfg(feature = "brotli")]
    names.push("br".to_string());
    names
}

/// Advances `in_buffer` past the bytes the decoder just consumed.
pub(crate) fn consume(in_buffer: &mut BytesMut, len: usize) {
    in_buffer.advance(len);
}
