//! COPY sub-protocol.
//!
//! COPY IN streams a caller's reader to the server in fixed-size CopyData
//! chunks; COPY OUT hands each CopyData payload from the server to a
//! caller's writer. Both happen inside the normal dispatch loop.

use std::io::{ErrorKind, Read, Write};

use micropg_core::Result;

use crate::connection::Connection;
use crate::protocol::FrontendMessage;

/// Size of each CopyData chunk sent during COPY IN.
pub const COPY_CHUNK_SIZE: usize = 8 * 1024;

/// Caller-side endpoints of a COPY, if any.
#[derive(Default)]
pub(crate) struct CopyIo<'a> {
    source: Option<&'a mut dyn Read>,
    sink: Option<&'a mut dyn Write>,
    /// First error from the caller's sink; later payloads are discarded.
    sink_error: Option<std::io::Error>,
}

impl<'a> CopyIo<'a> {
    pub(crate) fn none() -> Self {
        Self::default()
    }

    pub(crate) fn from_source(source: &'a mut dyn Read) -> Self {
        Self {
            source: Some(source),
            ..Self::default()
        }
    }

    pub(crate) fn to_sink(sink: &'a mut dyn Write) -> Self {
        Self {
            sink: Some(sink),
            ..Self::default()
        }
    }

    /// Hand one COPY OUT payload to the sink.
    ///
    /// Without a sink, or once the sink has failed, the data is dropped; the
    /// server keeps sending until it is done either way.
    pub(crate) fn write_out(&mut self, data: &[u8]) {
        if self.sink_error.is_some() {
            return;
        }
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.write_all(data) {
                tracing::debug!(error = %e, "COPY OUT sink failed, discarding remaining data");
                self.sink_error = Some(e);
            }
        }
    }

    /// Flush the sink at CopyDone.
    pub(crate) fn finish_out(&mut self) {
        if self.sink_error.is_some() {
            return;
        }
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.flush() {
                self.sink_error = Some(e);
            }
        }
    }

    pub(crate) fn take_error(&mut self) -> Option<std::io::Error> {
        self.sink_error.take()
    }
}

impl<S: Read + Write> Connection<S> {
    /// Answer a CopyInResponse.
    ///
    /// Socket failures are returned as errors. A failure of the caller's
    /// source aborts the COPY with CopyFail and is handed back as `Ok(Some)`
    /// so the dispatch loop can still drain the server's reply.
    #[allow(clippy::result_large_err)]
    pub(crate) fn copy_in(&mut self, copy: &mut CopyIo<'_>) -> Result<Option<std::io::Error>> {
        let Some(source) = copy.source.as_mut() else {
            self.send(&FrontendMessage::CopyFail(
                "COPY FROM STDIN requires a data source".to_string(),
            ))?;
            return Ok(None);
        };

        let mut buf = vec![0u8; COPY_CHUNK_SIZE];
        let mut sent = 0usize;
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.send(&FrontendMessage::CopyFail(format!(
                        "client data source failed: {}",
                        e
                    )))?;
                    return Ok(Some(e));
                }
            };
            self.send(&FrontendMessage::CopyData(buf[..n].to_vec()))?;
            sent += n;
        }

        tracing::debug!(bytes = sent, "COPY IN data sent");
        self.send(&FrontendMessage::CopyDone)?;
        Ok(None)
    }
}
