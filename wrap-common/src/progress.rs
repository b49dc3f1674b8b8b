//! Progress channel decoding
//!
//! A progress channel is an ordered byte stream of newline-terminated records.
//! Records carrying events have the form `data: <json>`; blank lines, SSE
//! comments (`:` prefix) and the other SSE fields are skipped. Records may be
//! split across any number of reads, so bytes are held in a carry-over buffer
//! until a full line terminator has arrived.
//!
//! The decoder is transport independent: [`ProgressDecoder`] is fed byte
//! slices, [`decode_stream`] adapts any stream of byte chunks into a lazy,
//! finite stream of [`ProgressEvent`]s that ends after the terminal event.

use futures::stream::{Stream, StreamExt};
use std::fmt::Display;
use tracing::{debug, trace, warn};

use crate::events::ProgressEvent;
use crate::{Error, Result};

/// Record prefix of event-carrying lines
pub const DATA_FIELD: &str = "data:";

/// SSE fields that carry no event payload
const IGNORED_FIELDS: [&str; 3] = ["event:", "id:", "retry:"];

/// Incremental line-framing decoder
#[derive(Debug, Default)]
pub struct ProgressDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a terminator
    scanned: usize,
    closed: bool,
    records: usize,
}

impl ProgressDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk, returning every event it completes in arrival order
    ///
    /// Once a terminal event has been decoded the channel is closed and further
    /// input is discarded.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<ProgressEvent>> {
        let mut events = Vec::new();
        if self.closed {
            if !chunk.is_empty() {
                trace!(bytes = chunk.len(), "Discarding bytes after terminal event");
            }
            return Ok(events);
        }

        self.buffer.extend_from_slice(chunk);

        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            self.scanned = 0;

            if let Some(event) = parse_record(&line[..line.len() - 1])? {
                self.records += 1;
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    self.closed = true;
                    if !self.buffer.is_empty() {
                        debug!(
                            bytes = self.buffer.len(),
                            "Discarding bytes after terminal event"
                        );
                    }
                    self.buffer.clear();
                    break;
                }
            }
        }
        self.scanned = self.buffer.len();

        Ok(events)
    }

    /// Whether a terminal event has been decoded
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of event records decoded so far
    pub fn records(&self) -> usize {
        self.records
    }

    /// End of input: the channel must have delivered its terminal event
    ///
    /// An unterminated trailing record is never ready and is dropped.
    pub fn finish(self) -> Result<()> {
        if !self.buffer.is_empty() {
            warn!(
                bytes = self.buffer.len(),
                "Progress channel ended inside an unterminated record"
            );
        }
        if self.closed {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "channel closed after {} record(s) without a terminal event",
                self.records
            )))
        }
    }
}

/// Parse one line (terminator removed) into an event, if it carries one
fn parse_record(line: &[u8]) -> Result<Option<ProgressEvent>> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.is_empty() || line.starts_with(b":") {
        return Ok(None);
    }

    let text = std::str::from_utf8(line)
        .map_err(|e| Error::Protocol(format!("record is not valid UTF-8: {}", e)))?;

    if let Some(payload) = text.strip_prefix(DATA_FIELD) {
        let payload = payload.strip_prefix(' ').unwrap_or(payload);
        let event: ProgressEvent = serde_json::from_str(payload).map_err(|e| {
            Error::Protocol(format!("malformed data record {:?}: {}", payload, e))
        })?;
        trace!(event_type = event.event_type(), "Decoded progress record");
        return Ok(Some(event));
    }

    if IGNORED_FIELDS.iter().any(|field| text.starts_with(field)) {
        return Ok(None);
    }

    Err(Error::Protocol(format!("unexpected record: {:?}", text)))
}

/// Decode a stream of byte chunks into progress events
///
/// Events are yielded as soon as their record is complete. The stream ends
/// after the terminal event; a transport failure, a malformed record, or input
/// that ends before the terminal event yields one `Err` and ends the stream.
pub fn decode_stream<S, B, E>(chunks: S) -> impl Stream<Item = Result<ProgressEvent>>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    async_stream::try_stream! {
        let mut chunks = Box::pin(chunks);
        let mut decoder = ProgressDecoder::new();

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| Error::Transport(e.to_string()))?;
            for event in decoder.push(chunk.as_ref())? {
                yield event;
            }
            if decoder.is_closed() {
                break;
            }
        }

        decoder.finish()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_split_across_reads_is_reassembled() {
        let mut decoder = ProgressDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"prog").unwrap().is_empty());
        assert!(decoder.push(b"ress\",\"current\":1,").unwrap().is_empty());
        let events = decoder.push(b"\"total\":2}\n").unwrap();
        assert_eq!(events, vec![ProgressEvent::progress(1, 2)]);
        assert!(!decoder.is_closed());
    }

    #[test]
    fn test_record_is_not_ready_without_terminator() {
        let mut decoder = ProgressDecoder::new();
        let events = decoder
            .push(b"data: {\"type\":\"progress\",\"current\":1,\"total\":2}")
            .unwrap();
        assert!(events.is_empty());
        assert!(decoder.finish().is_err());
    }

    #[test]
    fn test_comments_blank_lines_and_fields_are_skipped() {
        let mut decoder = ProgressDecoder::new();
        let input = b": heartbeat\n\nevent: message\nid: 7\r\ndata:{\"type\":\"progress\",\"current\":0,\"total\":1}\r\n\r\n";
        let events = decoder.push(input).unwrap();
        assert_eq!(events, vec![ProgressEvent::progress(0, 1)]);
    }

    #[test]
    fn test_malformed_json_fails_the_channel() {
        let mut decoder = ProgressDecoder::new();
        let err = decoder.push(b"data: {not json}\n").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_unknown_record_fails_the_channel() {
        let mut decoder = ProgressDecoder::new();
        assert!(matches!(
            decoder.push(b"garbage\n"),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_input_after_terminal_event_is_discarded() {
        let mut decoder = ProgressDecoder::new();
        let events = decoder
            .push(b"data: {\"type\":\"error\",\"error\":\"x\"}\ndata: {\"type\":\"progress\",\"current\":1,\"total\":1}\n")
            .unwrap();
        assert_eq!(events, vec![ProgressEvent::error("x")]);
        assert!(decoder.is_closed());
        assert!(decoder.push(b"data: nonsense\n").unwrap().is_empty());
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_multibyte_character_split_between_reads() {
        let record = "data: {\"type\":\"error\",\"error\":\"caf\u{e9}\"}\n".as_bytes();
        let split = record.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut decoder = ProgressDecoder::new();
        assert!(decoder.push(&record[..split]).unwrap().is_empty());
        let events = decoder.push(&record[split..]).unwrap();
        assert_eq!(events, vec![ProgressEvent::error("caf\u{e9}")]);
    }
}
