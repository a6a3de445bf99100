use crate::error::Error;
use compression_codecs::{EncodeV2, gzip::GzipEncoder};
use compression_core::Level;
use compression_core::util::{PartialBuffer, WriteBuffer};
use std::io;

/// `Content-Encoding` value set on compressed responses.
pub const GZIP: &str = "gzip";

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

/// Returns `true` if an `Accept-Encoding` value admits gzip.
///
/// The header value is expected to be comma-separated encodings with optional
/// quality values (e.g., "gzip, br;q=1.0, zstd;q=0.8").
pub fn accepts_gzip(header: &str) -> bool {
    header.split(',').any(|part| {
        let (encoding, quality) = parse_encoding_with_quality(part.trim());
        quality > 0.0
            && (encoding.eq_ignore_ascii_case("gzip") || encoding.eq_ignore_ascii_case("x-gzip"))
    })
}

/// Parses an encoding entry like "gzip" or "br;q=0.8" into (encoding, quality).
fn parse_encoding_with_quality(s: &str) -> (&str, f32) {
    let mut parts = s.splitn(2, ';');
    let encoding = parts.next().unwrap_or("").trim();

    let quality = parts
        .next()
        .and_then(|q| {
            let q = q.trim();
            if q.starts_with("q=") || q.starts_with("Q=") {
                q[2..].trim().parse::<f32>().ok()
            } else {
                None
            }
        })
        .unwrap_or(1.0);

    (encoding, quality)
}

/// A gzip encoder plus the scratch buffer it writes into.
///
/// Output is handed to `emit` chunk by chunk. Encoder failures surface as
/// [`Error::Compress`]; failures returned by `emit` come back as
/// [`Error::Io`] untouched.
pub(crate) struct Compressor {
    encoder: GzipEncoder,
    output_buffer: Vec<u8>,
}

impl Compressor {
    pub(crate) fn new(level: Level) -> Self {
        Self {
            encoder: GzipEncoder::new(level.into()),
            output_buffer: vec![0u8; OUTPUT_BUFFER_SIZE],
        }
    }

    /// Feeds `input` through the encoder.
    pub(crate) fn encode<F>(&mut self, input: &[u8], mut emit: F) -> Result<(), Error>
    where
        F: FnMut(&[u8]) -> io::Result<()>,
    {
        let mut input_buf = PartialBuffer::new(input);

        // Keep encoding until all input is consumed
        while input_buf.written_len() < input.len() {
            let consumed = input_buf.written_len();
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());

            self.encoder
                .encode(&mut input_buf, &mut output)
                .map_err(Error::Compress)?;

            let written = output.written_len();
            if written > 0 {
                emit(&self.output_buffer[..written])?;
            } else if input_buf.written_len() == consumed {
                return Err(Error::Compress(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "gzip encoder made no progress",
                )));
            }
        }
        Ok(())
    }

    /// Emits everything encoded so far as a sync flush point.
    pub(crate) fn flush<F>(&mut self, mut emit: F) -> Result<(), Error>
    where
        F: FnMut(&[u8]) -> io::Result<()>,
    {
        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());
            let done = self.encoder.flush(&mut output).map_err(Error::Compress)?;
            let written = output.written_len();
            if written > 0 {
                emit(&self.output_buffer[..written])?;
            }
            if done {
                return Ok(());
            }
        }
    }

    /// Writes the remaining deflate blocks and the gzip footer.
    pub(crate) fn finish<F>(&mut self, mut emit: F) -> Result<(), Error>
    where
        F: FnMut(&[u8]) -> io::Result<()>,
    {
        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());
            let done = self.encoder.finish(&mut output).map_err(Error::Compress)?;
            let written = output.written_len();
            if written > 0 {
                emit(&self.output_buffer[..written])?;
            }
            if done {
                return Ok(());
            }
        }
    }
}
