//! Frame assembly for the serial text stream.
//!
//! The radio coordinator writes JSON objects and heartbeat lines, but the serial driver
//! hands them over in chunks that have no relation to message boundaries. The
//! [`FrameAssembler`] stitches chunks back together:
//!
//! - a chunk that (after leading whitespace) starts with `{` starts a new frame, dropping
//!   whatever partial text was accumulated before it
//! - while a frame is open every chunk is appended; the chunk that closes the outermost
//!   brace closes the frame
//! - after every chunk the accumulated text is parsed; a complete object is emitted and the
//!   accumulator cleared, anything else simply waits for more input
//!
//! A `{` chunk arriving while the open frame expects a value (after `:`, `,` or `[`) is a
//! nested object and is appended instead of restarting. Inside an open string literal a `{`
//! chunk is appended too, unless it is a complete object on its own: a line cut mid-string
//! never closes its literal, and the next whole frame must still get through. A raw line
//! break also ends any open string literal.
//!
//! There is no size limit or timeout on the accumulator: a stream that never completes an
//! object keeps growing it until the next `{` chunk.
//!
//! Independently of framing, every chunk containing the heartbeat marker also yields a
//! [`FrameEvent::Heartbeat`].

use futures::{Stream, StreamExt};
use serde_json::Value;

/// Output of the assembler.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// A complete JSON object
    Packet(Value),
    /// Payload of a heartbeat line
    Heartbeat(String),
}

/// Incremental JSON frame assembler.
#[derive(Debug)]
pub struct FrameAssembler {
    heartbeat_marker: String,
    accumulator: String,
    capturing: bool,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl FrameAssembler {
    /// Create an assembler recognising heartbeat lines by `heartbeat_marker`.
    pub fn new(heartbeat_marker: impl Into<String>) -> Self {
        Self {
            heartbeat_marker: heartbeat_marker.into(),
            accumulator: String::new(),
            capturing: false,
            depth: 0,
            in_string: false,
            escaped: false,
        }
    }

    /// Feed one raw chunk and collect whatever it completes.
    pub fn push(&mut self, chunk: &str) -> Vec<FrameEvent> {
        let mut events = Vec::new();

        if !self.heartbeat_marker.is_empty() && chunk.contains(&self.heartbeat_marker) {
            events.push(FrameEvent::Heartbeat(heartbeat_payload(chunk)));
        }

        if self.starts_new_frame(chunk) {
            if !self.accumulator.is_empty() {
                tracing::debug!(
                    dropped = self.accumulator.len(),
                    "Discarding incomplete frame"
                );
            }
            self.reset();
            self.capturing = true;
        }

        if self.capturing {
            self.accumulator.push_str(chunk);
            self.scan(chunk);
            if self.depth == 0 {
                self.capturing = false;
            }
        }

        // An object cannot parse while a brace is still open.
        if self.depth == 0 && !self.accumulator.trim().is_empty() {
            match serde_json::from_str::<Value>(self.accumulator.trim()) {
                Ok(value) if value.is_object() => {
                    self.reset();
                    events.push(FrameEvent::Packet(value));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::trace!(error = %e, len = self.accumulator.len(), "Frame not complete yet");
                }
            }
        }

        events
    }

    /// Bytes currently held for an unfinished frame.
    pub fn pending_len(&self) -> usize {
        self.accumulator.len()
    }

    fn reset(&mut self) {
        self.accumulator.clear();
        self.capturing = false;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }

    fn starts_new_frame(&self, chunk: &str) -> bool {
        let trimmed = chunk.trim();
        if !trimmed.starts_with('{') {
            return false;
        }
        if !self.capturing {
            return true;
        }
        if self.in_string {
            return matches!(serde_json::from_str::<Value>(trimmed), Ok(Value::Object(_)));
        }
        !self.awaiting_value()
    }

    fn awaiting_value(&self) -> bool {
        matches!(
            self.accumulator.trim_end().chars().last(),
            Some(':') | Some(',') | Some('[')
        )
    }

    fn scan(&mut self, text: &str) {
        for ch in text.chars() {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if ch == '\\' {
                    self.escaped = true;
                } else if ch == '"' || ch == '\n' || ch == '\r' {
                    // raw line breaks cannot appear in a JSON string; the frame was cut
                    self.in_string = false;
                }
                continue;
            }
            match ch {
                '"' => self.in_string = true,
                '{' => self.depth += 1,
                '}' => self.depth = self.depth.saturating_sub(1),
                _ => {}
            }
        }
    }
}

/// Text after the first colon and the character following it.
fn heartbeat_payload(chunk: &str) -> String {
    chunk
        .find(':')
        .and_then(|idx| chunk.get(idx + 2..))
        .unwrap_or_default()
        .trim_end()
        .to_string()
}

/// Turn a chunk stream into a frame stream.
///
/// The result is lazy and lives as long as the chunk source; it cannot be restarted.
pub fn frames<S>(chunks: S, assembler: FrameAssembler) -> impl Stream<Item = FrameEvent>
where
    S: Stream<Item = String>,
{
    chunks
        .scan(assembler, |assembler, chunk| {
            futures::future::ready(Some(futures::stream::iter(assembler.push(&chunk))))
        })
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FRAME: &str = r#"{"address":"fd00::1","packet_number":42,"battery":2980,"note":"a {b} c","light":[1,{"x":2}],"nested":{"t":21.5}}"#;

    fn packets(events: Vec<FrameEvent>) -> Vec<Value> {
        events
            .into_iter()
            .filter_map(|e| match e {
                FrameEvent::Packet(v) => Some(v),
                FrameEvent::Heartbeat(_) => None,
            })
            .collect()
    }

    fn feed(chunks: &[&str]) -> Vec<Value> {
        let mut assembler = FrameAssembler::new("heartbeat");
        packets(chunks.iter().flat_map(|c| assembler.push(c)).collect())
    }

    fn char_boundaries(s: &str) -> Vec<usize> {
        (1..s.len()).filter(|i| s.is_char_boundary(*i)).collect()
    }

    #[test]
    fn test_single_chunk() {
        let out = feed(&[FRAME]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["packet_number"], json!(42));
    }

    #[test]
    fn test_every_two_way_split_yields_one_packet() {
        for i in char_boundaries(FRAME) {
            let out = feed(&[&FRAME[..i], &FRAME[i..]]);
            assert_eq!(out.len(), 1, "split at {i}: {:?}", (&FRAME[..i], &FRAME[i..]));
        }
    }

    #[test]
    fn test_every_three_way_split_yields_one_packet() {
        let cuts = char_boundaries(FRAME);
        for (n, &i) in cuts.iter().enumerate() {
            for &j in &cuts[n + 1..] {
                let out = feed(&[&FRAME[..i], &FRAME[i..j], &FRAME[j..]]);
                assert_eq!(out.len(), 1, "split at {i}/{j}");
            }
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let chunks: Vec<String> = FRAME.chars().map(String::from).collect();
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        assert_eq!(feed(&refs).len(), 1);
    }

    #[test]
    fn test_new_frame_discards_truncated_one() {
        let out = feed(&[r#"{"address":"fd00::1","pack"#, "\r\n", r#"{"address":"fd00::2","packet_number":3}"#]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["address"], json!("fd00::2"));
    }

    #[test]
    fn test_line_cut_inside_string_recovers_without_line_break() {
        let mut assembler = FrameAssembler::new("heartbeat");
        assert!(assembler.push(r#"{"address":"fd00::1","pack"#).is_empty());

        let mut recovered = 0;
        for seq in 0..10 {
            let line = format!(r#"{{"address":"fd00::2","packet_number":{seq},"battery":2900}}"#);
            recovered += packets(assembler.push(&line)).len();
        }
        assert_eq!(recovered, 10);
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn test_line_cut_after_colon_loses_one_frame_at_most() {
        let out = feed(&[
            r#"{"address":"fd00::1","note":"x:"#,
            r#"{"address":"fd00::2","packet_number":1}"#,
            r#"{"address":"fd00::2","packet_number":2}"#,
        ]);
        assert_eq!(out.len(), 2);

        let out = feed(&[
            r#"{"address":"#,
            r#"{"address":"fd00::2","packet_number":1}"#,
            r#"{"address":"fd00::2","packet_number":2}"#,
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["packet_number"], json!(2));
    }

    #[test]
    fn test_brace_inside_string_continues_frame() {
        let out = feed(&[r#"{"address":"fd00::1","note":"a "#, r#"{b} c","seq":1}"#]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["note"], json!("a {b} c"));
    }

    #[test]
    fn test_noise_outside_frame_is_ignored() {
        let mut assembler = FrameAssembler::new("heartbeat");
        assert!(assembler.push("garbage line\r\n").is_empty());
        assert_eq!(assembler.pending_len(), 0);
        let out = packets(assembler.push("{\"address\":\"a\",\"seq\":1}\r\n"));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_malformed_frame_keeps_accumulating() {
        let mut assembler = FrameAssembler::new("heartbeat");
        assert!(assembler.push("{\"address\": oops}").is_empty());
        assert!(assembler.pending_len() > 0);
        // the next frame start recovers
        assert_eq!(packets(assembler.push("{\"address\":\"b\",\"seq\":2}")).len(), 1);
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn test_heartbeat_payload() {
        let mut assembler = FrameAssembler::new("heartbeat");
        let events = assembler.push("heartbeat: coordinator ok\r\n");
        assert_eq!(events, vec![FrameEvent::Heartbeat("coordinator ok".to_string())]);
    }

    #[test]
    fn test_heartbeat_without_colon_has_empty_payload() {
        let mut assembler = FrameAssembler::new("heartbeat");
        assert_eq!(
            assembler.push("heartbeat"),
            vec![FrameEvent::Heartbeat(String::new())]
        );
    }

    #[tokio::test]
    async fn test_frames_stream() {
        let chunks = futures::stream::iter(vec![
            "heartbeat: 1".to_string(),
            "{\"address\":\"fd00::1\",".to_string(),
            "\"packet_number\":1}".to_string(),
            "{\"address\":\"fd00::1\",\"packet_number\":2}".to_string(),
        ]);
        let events: Vec<FrameEvent> = frames(chunks, FrameAssembler::new("heartbeat"))
            .collect()
            .await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], FrameEvent::Heartbeat("1".to_string()));
        assert!(matches!(&events[2], FrameEvent::Packet(v) if v["packet_number"] == json!(2)));
    }
}
