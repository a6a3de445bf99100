use crate::codec::Compressor;
use crate::writer::ResponseWriter;
use compression_core::Level;
use std::io;

/// Terminal write path chosen for a response body.
pub(crate) enum BodyStream {
    /// Bytes are gzipped on their way to the sink.
    Compressing(CompressionStream),
    /// Bytes are forwarded verbatim.
    Passthrough,
}

impl BodyStream {
    pub(crate) fn write<W: ResponseWriter + ?Sized>(
        &mut self,
        sink: &mut W,
        data: &[u8],
    ) -> io::Result<()> {
        match self {
            BodyStream::Compressing(stream) => stream.write(sink, data),
            BodyStream::Passthrough => sink.write(data),
        }
    }

    pub(crate) fn flush<W: ResponseWriter + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        if let BodyStream::Compressing(stream) = self {
            stream.flush(sink)?;
        }
        sink.flush()
    }

    /// Ends the body, releasing the compressor if there is one.
    pub(crate) fn finish<W: ResponseWriter + ?Sized>(self, sink: &mut W) -> io::Result<()> {
        match self {
            BodyStream::Compressing(stream) => stream.finish(sink),
            BodyStream::Passthrough => Ok(()),
        }
    }
}

/// Owns the compressor for one response; dropping it releases the encoder.
pub(crate) struct CompressionStream {
    compressor: Compressor,
    written: usize,
}

impl CompressionStream {
    pub(crate) fn new(level: Level) -> Self {
        Self {
            compressor: Compressor::new(level),
            written: 0,
        }
    }

    fn write<W: ResponseWriter + ?Sized>(&mut self, sink: &mut W, data: &[u8]) -> io::Result<()> {
        self.compressor.encode(data, |chunk| sink.write(chunk))?;
        self.written += data.len();
        Ok(())
    }

    fn flush<W: ResponseWriter + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        self.compressor.flush(|chunk| sink.write(chunk))?;
        Ok(())
    }

    fn finish<W: ResponseWriter + ?Sized>(mut self, sink: &mut W) -> io::Result<()> {
        self.compressor.finish(|chunk| sink.write(chunk))?;
        tracing::trace!(bytes_in = self.written, "gzip stream finished");
        Ok(())
    }
}
