use std::convert::Infallible;
use std::pin::pin;
use std::sync::Arc;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::providers::openai::types::{FINISH_REASON_STOP, completion_id};
use crate::providers::openai::{ChatRequest, ChatResponse, ResponseMessage, Usage};
use crate::providers::zai::{ByteStream, FormattedDelta, ResponsePhaseFormatter, parse_sse_stream};
use crate::server::AppState;

fn send_chunk(tx: &UnboundedSender<Event>, chunk: &ChatResponse) -> bool {
    match Event::default().json_data(chunk) {
        Ok(event) => tx.send(event).is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize stream chunk");
            true
        }
    }
}

/// Relays the upstream stream as OpenAI chunk frames.
///
/// Frame order: deltas, one finish frame, the usage frame when requested,
/// then `[DONE]`. The pump stops and drops the upstream body as soon as the
/// client goes away.
pub fn stream_completion(
    state: Arc<AppState>,
    request: ChatRequest,
    upstream: ByteStream,
) -> Response {
    let (tx, rx) = mpsc::unbounded_channel::<Event>();

    tokio::spawn(async move {
        let id = completion_id();
        let model = request.model.clone();
        let include_usage = request.include_usage();
        let mut formatter = ResponsePhaseFormatter::new(state.settings.model.think_mode);
        let mut events = pin!(parse_sse_stream(upstream));
        let mut emitted = String::new();

        loop {
            let event = tokio::select! {
                _ = tx.closed() => {
                    tracing::info!(completion_id = %id, "Client disconnected, closing upstream stream");
                    return;
                }
                next = events.next() => match next {
                    Some(event) => event,
                    None => break,
                },
            };

            if let Some(delta) = formatter.format(&event) {
                if include_usage
                    && let FormattedDelta::Content(text) | FormattedDelta::Reasoning(text) = &delta
                {
                    emitted.push_str(text);
                }
                let chunk = ChatResponse::chunk(&id, &model, delta.into_message(), None);
                if !send_chunk(&tx, &chunk) {
                    return;
                }
            }
            if event.done {
                break;
            }
        }

        let finish = ChatResponse::chunk(
            &id,
            &model,
            ResponseMessage::assistant(),
            Some(FINISH_REASON_STOP),
        );
        if !send_chunk(&tx, &finish) {
            return;
        }

        if include_usage {
            let usage = Usage::new(
                state.tokenizer.count(&request.prompt_text()),
                state.tokenizer.count(&emitted),
            );
            if !send_chunk(&tx, &ChatResponse::usage_chunk(&id, &model, usage)) {
                return;
            }
        }

        let _ = tx.send(Event::default().data("[DONE]"));
        tracing::debug!(completion_id = %id, "Stream completed");
    });

    let out = UnboundedReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Sse::new(out).keep_alive(KeepAlive::default()).into_response()
}

/// Drains the upstream stream into one `chat.completion` response.
pub async fn collect_completion(
    state: &AppState,
    request: &ChatRequest,
    upstream: ByteStream,
) -> ChatResponse {
    let mut formatter = ResponsePhaseFormatter::new(state.settings.model.think_mode);
    let mut events = pin!(parse_sse_stream(upstream));
    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_call = String::new();

    while let Some(event) = events.next().await {
        match formatter.format(&event) {
            Some(FormattedDelta::Content(text)) => content.push_str(&text),
            Some(FormattedDelta::Reasoning(text)) => reasoning.push_str(&text),
            Some(FormattedDelta::ToolCall(text)) => tool_call.push_str(&text),
            None => {}
        }
        if event.done {
            break;
        }
    }

    let completion_text = format!("{}{}", reasoning, content);
    let usage = Usage::new(
        state.tokenizer.count(&request.prompt_text()),
        state.tokenizer.count(&completion_text),
    );
    let message = ResponseMessage {
        content: Some(content),
        reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
        tool_call: (!tool_call.is_empty()).then_some(tool_call),
        ..ResponseMessage::assistant()
    };
    ChatResponse::completion(&completion_id(), &request.model, message, usage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, ThinkMode};
    use crate::error::{GatewayError, Result as AppResult};
    use crate::providers::openai::{Message, Role};
    use crate::providers::zai::ChatUpstream;
    use crate::tokenizer::TokenCounter;
    use async_trait::async_trait;
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::Poll;

    struct Unused;

    #[async_trait]
    impl ChatUpstream for Unused {
        async fn send(&self, _: &ChatRequest, _: &str) -> AppResult<ByteStream> {
            Err(GatewayError::RequestConstruction("unused".into()))
        }
    }

    /// 按字符计数，便于断言
    struct CharCounter;

    impl TokenCounter for CharCounter {
        fn count(&self, text: &str) -> usize {
            text.chars().count()
        }
    }

    fn state(mode: ThinkMode) -> AppState {
        let mut settings = Settings::default();
        settings.model.think_mode = mode;
        AppState::new(Arc::new(settings), Arc::new(Unused), Arc::new(CharCounter))
    }

    fn upstream(frames: &[&str]) -> ByteStream {
        let body: String = frames.iter().map(|f| format!("data: {}\n\n", f)).collect();
        Box::pin(futures_util::stream::iter(vec![Ok(Bytes::from(body))]))
    }

    fn request(stream: bool, include_usage: bool) -> ChatRequest {
        let mut req = ChatRequest::new("glm", vec![Message::text(Role::User, "hey you")]);
        req.stream = stream;
        if include_usage {
            req.stream_options = Some(crate::providers::openai::StreamOptions {
                include_usage: true,
            });
        }
        req
    }

    async fn frames(resp: Response) -> Vec<String> {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec())
            .unwrap()
            .lines()
            .filter_map(|l| l.strip_prefix("data: ").map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn collects_reasoning_and_content_separately() {
        let st = state(ThinkMode::Reasoning);
        let resp = collect_completion(
            &st,
            &request(false, false),
            upstream(&[
                r#"{"data":{"phase":"thinking","delta_content":"hmm"}}"#,
                r#"{"data":{"phase":"answer","delta_content":"Hello,"}}"#,
                r#"{"data":{"phase":"answer","delta_content":" world!"}}"#,
                r#"{"data":{"phase":"answer","done":true}}"#,
                r#"{"data":{"phase":"answer","delta_content":"ignored"}}"#,
            ]),
        )
        .await;
        let msg = resp.choices[0].message.as_ref().unwrap();
        assert_eq!(msg.content.as_deref(), Some("Hello, world!"));
        assert_eq!(msg.reasoning_content.as_deref(), Some("hmm"));
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("stop"));
        let usage = resp.usage.unwrap();
        assert_eq!(usage.prompt_tokens, "hey you".len());
        assert_eq!(usage.completion_tokens, "hmmHello, world!".len());
        assert_eq!(usage.total_tokens, usage.prompt_tokens + usage.completion_tokens);
        assert_eq!(resp.model, "glm");
    }

    #[tokio::test]
    async fn done_frame_content_is_kept() {
        let st = state(ThinkMode::Reasoning);
        let resp = collect_completion(
            &st,
            &request(false, false),
            upstream(&[r#"{"data":{"phase":"answer","delta_content":"last","done":true}}"#]),
        )
        .await;
        assert_eq!(
            resp.choices[0].message.as_ref().unwrap().content.as_deref(),
            Some("last")
        );
    }

    #[tokio::test]
    async fn stream_orders_finish_usage_and_done() {
        let st = Arc::new(state(ThinkMode::Reasoning));
        let resp = stream_completion(
            st,
            request(true, true),
            upstream(&[
                r#"{"data":{"phase":"thinking","delta_content":"r"}}"#,
                r#"{"data":{"phase":"answer","delta_content":"ab"}}"#,
            ]),
        );
        let frames = frames(resp).await;
        assert_eq!(frames.len(), 5);
        assert_eq!(frames.last().unwrap(), "[DONE]");

        let parsed: Vec<serde_json::Value> = frames[..4]
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect();
        assert_eq!(parsed[0]["choices"][0]["delta"]["reasoning_content"], "r");
        assert_eq!(parsed[1]["choices"][0]["delta"]["content"], "ab");
        assert_eq!(parsed[2]["choices"][0]["finish_reason"], "stop");
        assert_eq!(parsed[2]["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(parsed[3]["usage"]["completion_tokens"], 3);
        assert_eq!(parsed[3]["choices"], serde_json::json!([]));

        // 同一响应内 id 一致
        assert!(parsed.iter().all(|p| p["id"] == parsed[0]["id"]));
    }

    #[tokio::test]
    async fn stream_without_usage_has_no_usage_frame() {
        let st = Arc::new(state(ThinkMode::Think));
        let resp = stream_completion(
            st,
            request(true, false),
            upstream(&[r#"{"data":{"phase":"answer","delta_content":"x"}}"#]),
        );
        let frames = frames(resp).await;
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| !f.contains("\"usage\"")));
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn client_disconnect_releases_upstream() {
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = DropFlag(dropped.clone());
        let first = Bytes::from(
            "data: {\"data\":{\"phase\":\"answer\",\"delta_content\":\"hi\"}}\n\n",
        );
        // 第一帧之后上游永远挂起
        let upstream: ByteStream = Box::pin(
            futures_util::stream::iter(vec![Ok(first)]).chain(futures_util::stream::poll_fn(
                move |_| {
                    let _held = &guard;
                    Poll::<Option<Result<Bytes, GatewayError>>>::Pending
                },
            )),
        );

        let resp = stream_completion(
            Arc::new(state(ThinkMode::Reasoning)),
            request(true, false),
            upstream,
        );
        let mut body = resp.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        let data = frame.into_data().unwrap();
        assert!(String::from_utf8_lossy(&data).contains("\"hi\""));
        assert!(!dropped.load(Ordering::SeqCst));

        drop(body);
        for _ in 0..100 {
            if dropped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn tool_call_fragments_are_forwarded_raw() {
        let st = Arc::new(state(ThinkMode::Reasoning));
        let resp = stream_completion(
            st,
            request(true, false),
            upstream(&[
                r#"{"data":{"phase":"tool_call","delta_content":"{\"name\":\"x\""}}"#,
            ]),
        );
        let frames = frames(resp).await;
        let first: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(first["choices"][0]["delta"]["tool_call"], "{\"name\":\"x\"");
        assert!(first["choices"][0]["delta"].get("role").is_none());
    }
}
