use std::collections::VecDeque;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::error::GatewayError;

use super::types::{UpstreamEvent, UpstreamFrame};

/// 单行上限；超出的行整行丢弃
pub(crate) const MAX_LINE_BYTES: usize = 1 << 20;

struct LineParser<S> {
    body: S,
    buf: Vec<u8>,
    // buf[..scanned] 已确认不含换行
    scanned: usize,
    discarding: bool,
    ready: VecDeque<UpstreamEvent>,
    finished: bool,
}

impl<S> LineParser<S> {
    fn drain_lines(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        let mut start = 0;
        while let Some(off) = buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + off;
            if self.discarding {
                self.discarding = false;
            } else {
                self.handle_line(&buf[start..end]);
            }
            start = end + 1;
            self.scanned = start;
        }
        if start > 0 {
            buf.drain(..start);
        }
        if buf.len() > MAX_LINE_BYTES {
            if !self.discarding {
                tracing::warn!(limit = MAX_LINE_BYTES, "Dropping oversized SSE line");
                self.discarding = true;
            }
            buf.clear();
        }
        self.scanned = buf.len();
        self.buf = buf;
    }

    fn handle_line(&mut self, line: &[u8]) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let Some(payload) = line.strip_prefix(b"data:") else {
            return;
        };
        let payload = payload.strip_prefix(b" ").unwrap_or(payload);
        if payload.is_empty() || payload == b"[DONE]" {
            return;
        }
        match serde_json::from_slice::<UpstreamFrame>(payload) {
            Ok(UpstreamFrame { data: Some(event) }) => self.ready.push_back(event),
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "Failed to parse SSE event"),
        }
    }
}

/// Decodes an upstream `text/event-stream` body into events, lazily.
///
/// Non-`data:` lines and malformed payloads are skipped. A transport error is
/// logged and ends the sequence after the events already decoded.
pub fn parse_sse_stream<S>(body: S) -> impl Stream<Item = UpstreamEvent> + Send
where
    S: Stream<Item = Result<Bytes, GatewayError>> + Send + Unpin,
{
    let parser = LineParser {
        body,
        buf: Vec::new(),
        scanned: 0,
        discarding: false,
        ready: VecDeque::new(),
        finished: false,
    };
    futures_util::stream::unfold(parser, |mut p| async move {
        loop {
            if let Some(event) = p.ready.pop_front() {
                return Some((event, p));
            }
            if p.finished {
                return None;
            }
            match p.body.next().await {
                Some(Ok(chunk)) => {
                    p.buf.extend_from_slice(&chunk);
                    p.drain_lines();
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Error reading upstream SSE stream");
                    p.finished = true;
                }
                None => {
                    // 末尾可能没有换行
                    let rest = std::mem::take(&mut p.buf);
                    if !rest.is_empty() && !p.discarding {
                        p.handle_line(&rest);
                    }
                    p.finished = true;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::zai::types::Phase;
    use futures_util::stream;

    fn body(chunks: Vec<Result<&'static str, GatewayError>>) -> impl Stream<Item = Result<Bytes, GatewayError>> + Send + Unpin {
        stream::iter(
            chunks
                .into_iter()
                .map(|c| c.map(|s| Bytes::from_static(s.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect(chunks: Vec<Result<&'static str, GatewayError>>) -> Vec<UpstreamEvent> {
        parse_sse_stream(body(chunks)).collect().await
    }

    #[tokio::test]
    async fn parses_frames_split_across_chunks() {
        let events = collect(vec![
            Ok("data: {\"data\":{\"phase\":\"answer\",\"delta_"),
            Ok("content\":\"Hel\"}}\r\n\r\ndata: {\"data\":{\"phase\":\"answer\",\"delta_content\":\"lo\"}}\n"),
            Ok("\ndata: {\"data\":{\"phase\":\"answer\",\"done\":true}}"),
        ])
        .await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].content(), "Hel");
        assert_eq!(events[1].content(), "lo");
        assert!(events[2].done);
        assert_eq!(events[2].phase, Phase::Answer);
    }

    #[tokio::test]
    async fn skips_comments_malformed_json_and_frames_without_data() {
        let events = collect(vec![Ok(concat!(
            ": keep-alive\n",
            "event: message\n",
            "data: {not json}\n",
            "data: {\"type\":\"ping\"}\n",
            "data: [DONE]\n",
            "data: {\"data\":{\"phase\":\"thinking\",\"delta_content\":\"ok\"}}\n",
        ))])
        .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].phase, Phase::Thinking);
    }

    #[tokio::test]
    async fn transport_error_ends_stream_after_emitted_events() {
        let events = collect(vec![
            Ok("data: {\"data\":{\"phase\":\"answer\",\"delta_content\":\"a\"}}\n"),
            Err(GatewayError::RequestConstruction("reset".into())),
            Ok("data: {\"data\":{\"phase\":\"answer\",\"delta_content\":\"b\"}}\n"),
        ])
        .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content(), "a");
    }

    #[tokio::test]
    async fn oversized_line_is_dropped_and_parsing_resumes() {
        let huge = format!("data: {{\"data\":{{\"delta_content\":\"{}\"}}}}", "x".repeat(MAX_LINE_BYTES));
        let mut chunks: Vec<Result<Bytes, GatewayError>> = huge
            .as_bytes()
            .chunks(64 * 1024)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        chunks.push(Ok(Bytes::from_static(
            b"\ndata: {\"data\":{\"phase\":\"answer\",\"delta_content\":\"after\"}}\n",
        )));

        let events: Vec<UpstreamEvent> = parse_sse_stream(stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content(), "after");
    }

    #[tokio::test]
    async fn long_line_below_limit_survives_many_chunks() {
        let text = "y".repeat(200_000);
        let line = format!("data: {{\"data\":{{\"phase\":\"answer\",\"delta_content\":\"{}\"}}}}\n", text);
        let chunks: Vec<Result<Bytes, GatewayError>> = line
            .as_bytes()
            .chunks(100)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let events: Vec<UpstreamEvent> = parse_sse_stream(stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content(), text);
    }
}
