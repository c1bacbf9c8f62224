//! Streaming output plumbing
//!
//! The generation loop produces raw token bytes; this module turns them into
//! the chunked event stream the consumer sees. One sink type serves both
//! request shapes, so a streamed generation is a re-chunking of exactly the
//! text the one-shot form would return.

use std::sync::mpsc::SyncSender;

use crate::protocol::StreamEvent;

/// Upper bound on the text carried by a single `Chunk` event, in bytes.
/// Chunk boundaries carry no meaning; consumers concatenate.
pub(crate) const MAX_CHUNK_BYTES: usize = 256;

/// Capacity of the event channel handed to the consumer. A full channel
/// suspends the worker until the consumer catches up.
pub(crate) const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Buffers raw token bytes and releases only complete UTF-8.
///
/// Token boundaries routinely split multi-byte code points; the incomplete
/// tail stays buffered until the next token completes it. Bytes that can
/// never form valid UTF-8 are skipped.
#[derive(Debug, Default)]
pub(crate) struct Utf8Accumulator {
    buf: Vec<u8>,
}

impl Utf8Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append token bytes and return any newly completed text
    pub fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.buf.extend_from_slice(bytes);
        self.drain_valid()
    }

    /// Return whatever valid text remains; an incomplete trailing sequence
    /// is dropped
    pub fn flush(&mut self) -> Option<String> {
        let out = self.drain_valid();
        if !self.buf.is_empty() {
            tracing::debug!(
                bytes = self.buf.len(),
                "dropping incomplete utf-8 tail at end of generation"
            );
            self.buf.clear();
        }
        out
    }

    fn drain_valid(&mut self) -> Option<String> {
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.buf) {
                Ok(text) => {
                    out.push_str(text);
                    self.buf.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&self.buf[..valid]) {
                        out.push_str(text);
                    }
                    match err.error_len() {
                        // invalid bytes mid-stream: skip them and keep scanning
                        Some(bad) => {
                            self.buf.drain(..valid + bad);
                        }
                        // incomplete tail: keep it for the next push
                        None => {
                            self.buf.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}

/// Coalesces decoded text into chunks of at most `max` bytes, splitting only
/// at character boundaries.
#[derive(Debug)]
pub(crate) struct ChunkBuffer {
    buf: String,
    max: usize,
}

impl ChunkBuffer {
    pub fn new(max: usize) -> Self {
        Self {
            buf: String::new(),
            max,
        }
    }

    /// Append text and return the chunks that became full
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buf.push_str(text);
        let mut chunks = Vec::new();
        while self.buf.len() >= self.max {
            let mut split = self.max;
            while !self.buf.is_char_boundary(split) {
                split -= 1;
            }
            if split == 0 {
                break;
            }
            chunks.push(self.buf[..split].to_string());
            self.buf.drain(..split);
        }
        chunks
    }

    /// Drain whatever is left as a final short chunk
    pub fn take_rest(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }
}

/// Destination for generated text: the one-shot form collects, the streaming
/// form emits `Chunk` events as the buffer fills.
pub(crate) enum OutputSink {
    Collect {
        text: String,
    },
    Stream {
        tx: SyncSender<StreamEvent>,
        chunker: ChunkBuffer,
        text: String,
        sent_bytes: usize,
    },
}

impl OutputSink {
    pub fn collect() -> Self {
        OutputSink::Collect {
            text: String::new(),
        }
    }

    pub fn stream(tx: SyncSender<StreamEvent>) -> Self {
        OutputSink::Stream {
            tx,
            chunker: ChunkBuffer::new(MAX_CHUNK_BYTES),
            text: String::new(),
            sent_bytes: 0,
        }
    }

    /// Feed newly decoded text. Returns `false` when the consumer is gone
    /// and generation should stop.
    pub fn push(&mut self, piece: &str) -> bool {
        match self {
            OutputSink::Collect { text } => {
                text.push_str(piece);
                true
            }
            OutputSink::Stream {
                tx,
                chunker,
                text,
                sent_bytes,
            } => {
                text.push_str(piece);
                for chunk in chunker.push(piece) {
                    let len = chunk.len();
                    if tx.send(StreamEvent::chunk(chunk)).is_err() {
                        tracing::debug!("stream consumer dropped, stopping emission");
                        return false;
                    }
                    *sent_bytes += len;
                }
                true
            }
        }
    }

    /// Flush any buffered tail and return the full text plus the number of
    /// bytes actually delivered as chunks.
    pub fn finish(self) -> (String, usize) {
        match self {
            OutputSink::Collect { text } => {
                let len = text.len();
                (text, len)
            }
            OutputSink::Stream {
                tx,
                mut chunker,
                text,
                mut sent_bytes,
            } => {
                if let Some(rest) = chunker.take_rest() {
                    let len = rest.len();
                    if tx.send(StreamEvent::chunk(rest)).is_ok() {
                        sent_bytes += len;
                    }
                }
                (text, sent_bytes)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_utf8_passthrough() {
        let mut acc = Utf8Accumulator::new();
        assert_eq!(acc.push(b"hello").as_deref(), Some("hello"));
        assert!(acc.flush().is_none());
    }

    #[test]
    fn test_utf8_split_codepoint() {
        // é is 0xC3 0xA9
        let mut acc = Utf8Accumulator::new();
        assert!(acc.push(&[0xC3]).is_none());
        assert_eq!(acc.push(&[0xA9, b'!']).as_deref(), Some("é!"));
    }

    #[test]
    fn test_utf8_invalid_bytes_skipped() {
        let mut acc = Utf8Accumulator::new();
        assert_eq!(acc.push(&[b'a', 0xFF, b'b']).as_deref(), Some("ab"));
    }

    #[test]
    fn test_utf8_flush_drops_incomplete_tail() {
        let mut acc = Utf8Accumulator::new();
        assert_eq!(acc.push(&[b'x', 0xE2, 0x82]).as_deref(), Some("x"));
        assert!(acc.flush().is_none());
        assert!(acc.push(b"y").as_deref() == Some("y"));
    }

    #[test]
    fn test_chunk_buffer_coalesces() {
        let mut chunker = ChunkBuffer::new(8);
        assert!(chunker.push("abc").is_empty());
        let chunks = chunker.push("defghij");
        assert_eq!(chunks, vec!["abcdefgh".to_string()]);
        assert_eq!(chunker.take_rest().as_deref(), Some("ij"));
        assert!(chunker.take_rest().is_none());
    }

    #[test]
    fn test_chunk_buffer_splits_on_char_boundary() {
        let mut chunker = ChunkBuffer::new(4);
        // "ééé" is six bytes; a split at 4 would land inside the second é
        let chunks = chunker.push("ééé");
        assert_eq!(chunks, vec!["éé".to_string()]);
        assert_eq!(chunker.take_rest().as_deref(), Some("é"));
    }

    #[test]
    fn test_chunk_buffer_long_input_yields_multiple_chunks() {
        let mut chunker = ChunkBuffer::new(4);
        let chunks = chunker.push("0123456789ab");
        assert_eq!(
            chunks,
            vec!["0123".to_string(), "4567".to_string(), "89ab".to_string()]
        );
    }

    #[test]
    fn test_collect_sink_accumulates() {
        let mut sink = OutputSink::collect();
        assert!(sink.push("one "));
        assert!(sink.push("two"));
        let (text, len) = sink.finish();
        assert_eq!(text, "one two");
        assert_eq!(len, 7);
    }

    #[test]
    fn test_stream_sink_chunks_and_counts() {
        let (tx, rx) = mpsc::sync_channel(16);
        let mut sink = OutputSink::stream(tx);
        let payload = "x".repeat(MAX_CHUNK_BYTES + 10);
        assert!(sink.push(&payload));
        let (text, sent) = sink.finish();
        assert_eq!(text, payload);
        assert_eq!(sent, payload.len());

        let mut received = String::new();
        while let Ok(StreamEvent::Chunk { text }) = rx.try_recv() {
            received.push_str(&text);
        }
        assert_eq!(received, payload);
    }

    #[test]
    fn test_stream_sink_reports_closed_consumer() {
        let (tx, rx) = mpsc::sync_channel(16);
        drop(rx);
        let mut sink = OutputSink::stream(tx);
        let payload = "y".repeat(MAX_CHUNK_BYTES * 2);
        assert!(!sink.push(&payload));
    }
}
