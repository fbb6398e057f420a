//! Client-side consumer of the gateway's SSE chat contract: turns the byte
//! stream back into ordered text deltas and a final full-text signal, with
//! an explicit abort.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use curacall_common::{ChatMessage, Error, FrameBuffer, Result};

/// What the consumer surfaces per SSE block. `fallback` payloads arrive as
/// `Delta` too — the apology text renders exactly like model output. `Done`
/// carries the full accumulated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Delta(String),
    Done(String),
}

/// Thin handle over the gateway's streaming endpoints.
#[derive(Clone)]
pub struct ChatClient {
    base_url: String,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// `POST /api/ai/stream` — free-form prompt plus caller-side history.
    pub fn stream_prompt(
        &self,
        prompt: impl Into<String>,
        history: Vec<ChatMessage>,
        lang: Option<String>,
        model: Option<String>,
    ) -> ChatStream {
        let mut body = json!({
            "text": prompt.into(),
            "history": history,
        });
        if let Some(lang) = lang {
            body["lang"] = json!(lang);
        }
        if let Some(model) = model {
            body["model"] = json!(model);
        }
        self.open("/api/ai/stream", body)
    }

    /// `POST /api/chat/stream` — persisted conversation turn.
    pub fn stream_conversation(
        &self,
        conversation_id: impl Into<String>,
        messages: Vec<ChatMessage>,
        model: Option<String>,
    ) -> ChatStream {
        let mut body = json!({
            "conversationId": conversation_id.into(),
            "messages": messages,
        });
        if let Some(model) = model {
            body["model"] = json!(model);
        }
        self.open("/api/chat/stream", body)
    }

    fn open(&self, path: &str, body: Value) -> ChatStream {
        let url = format!("{}{}", self.base_url, path);
        let client = self.client.clone();

        let stream = async_stream::stream! {
            let res = match client.post(&url).json(&body).send().await {
                Ok(res) => res,
                Err(e) => {
                    yield Err(Error::Provider(format!("stream request failed: {e}")));
                    return;
                }
            };
            if !res.status().is_success() {
                let status = res.status();
                let text = res.text().await.unwrap_or_default();
                yield Err(Error::Provider(format!("HTTP {status}: {text}")));
                return;
            }

            let mut bytes = res.bytes_stream();
            let mut frames = FrameBuffer::new();
            let mut full = String::new();
            let mut closed = false;

            'read: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(Error::Provider(format!("stream read failed: {e}")));
                        return;
                    }
                };
                frames.push(&chunk);

                while let Some(frame) = frames.next_frame() {
                    // A bare data line is a token, mirroring the server's
                    // default event.
                    match frame.event.as_deref().unwrap_or("token") {
                        "token" | "fallback" => {
                            // Malformed payloads skip the block, never the
                            // stream.
                            if let Ok(payload) = serde_json::from_str::<Value>(&frame.data) {
                                if let Some(text) = payload["text"].as_str() {
                                    if !text.is_empty() {
                                        full.push_str(text);
                                        yield Ok(ChatEvent::Delta(text.to_string()));
                                    }
                                }
                            }
                        }
                        "done" => {
                            closed = true;
                            yield Ok(ChatEvent::Done(full.clone()));
                            break 'read;
                        }
                        _ => {}
                    }
                }
            }

            if !closed {
                yield Ok(ChatEvent::Done(full));
            }
        };

        ChatStream {
            inner: Some(Box::pin(stream)),
        }
    }
}

/// One in-flight stream. Dropping it — or calling [`ChatStream::abort`] —
/// cancels the underlying request; an aborted stream yields nothing more.
pub struct ChatStream {
    inner: Option<BoxStream<'static, Result<ChatEvent>>>,
}

impl ChatStream {
    pub fn abort(&mut self) {
        self.inner = None;
    }
}

impl Stream for ChatStream {
    type Item = Result<ChatEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut() {
            Some(inner) => inner.as_mut().poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }
}
