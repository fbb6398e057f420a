use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use curacall_common::{ChatMessage, Error, FrameBuffer, Result};

use crate::{ChatOptions, DeltaStream, ProviderHealth, StreamEvent};

/// Adapter for a locally hosted Ollama runtime. Speaks the `/api/chat`
/// NDJSON protocol: one JSON object per line, terminated by an object with
/// `"done": true`.
#[derive(Clone)]
pub struct OllamaProvider {
    base_url: String,
    default_model: String,
    client: Client,
}

#[derive(Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaChunkMessage>,
    /// Legacy `/api/generate`-style payloads carry the text here instead.
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct OllamaChunkMessage {
    #[serde(default)]
    content: String,
}

impl OllamaChunk {
    fn delta(&self) -> Option<&str> {
        let text = match (&self.message, &self.response) {
            (Some(msg), _) if !msg.content.is_empty() => msg.content.as_str(),
            (_, Some(resp)) if !resp.is_empty() => resp.as_str(),
            _ => return None,
        };
        Some(text)
    }
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    model: String,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            default_model: default_model.into(),
            client: Client::new(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Lightweight availability probe: the tags listing first, then
    /// `/api/show` for models the listing misses. Network failure means
    /// "not available", never an error.
    pub async fn ensure_model_available(&self, model: &str) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        if let Ok(res) = self.client.get(&url).send().await {
            if res.status().is_success() {
                if let Ok(tags) = res.json::<TagsResponse>().await {
                    let found = tags.models.iter().any(|m| {
                        m.name == model || m.model == model || m.name.starts_with(model)
                    });
                    if found {
                        return true;
                    }
                }
            }
        }

        let url = format!("{}/api/show", self.base_url);
        match self
            .client
            .post(&url)
            .json(&json!({ "name": model }))
            .send()
            .await
        {
            Ok(res) => res.status().is_success(),
            Err(_) => false,
        }
    }

    fn build_request_body(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
        stream: bool,
    ) -> Value {
        let mut body = json!({
            "model": model,
            "stream": stream,
            "messages": messages,
        });

        let mut opts = serde_json::Map::new();
        if let Some(temp) = options.temperature {
            opts.insert("temperature".to_string(), json!(temp));
        }
        if let Some(ctx) = options.context_window {
            opts.insert("num_ctx".to_string(), json!(ctx));
        }
        if let Some(predict) = options.max_tokens {
            opts.insert("num_predict".to_string(), json!(predict));
        }
        if let Some(top_p) = options.top_p {
            opts.insert("top_p".to_string(), json!(top_p));
        }
        if !options.stop.is_empty() {
            opts.insert("stop".to_string(), json!(options.stop));
        }
        if !opts.is_empty() {
            body["options"] = Value::Object(opts);
        }

        body
    }

    /// Opens a streaming chat call and exposes it as a delta sequence.
    /// Fails if the connection cannot be established or the status is not
    /// success; malformed NDJSON lines mid-stream are skipped, not fatal.
    pub async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> Result<DeltaStream> {
        let body = self.build_request_body(messages, model, options, true);
        let url = format!("{}/api/chat", self.base_url);

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("ollama request failed: {e}")))?;

        if !res.status().is_success() {
            return Err(Error::Provider(format!(
                "ollama error status {}",
                res.status()
            )));
        }

        let mut bytes = res.bytes_stream();
        let stream = async_stream::stream! {
            let mut frames = FrameBuffer::new();
            let mut finished = false;

            'read: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(Error::Provider(format!("ollama stream error: {e}")));
                        return;
                    }
                };
                frames.push(&chunk);

                while let Some(line) = frames.next_line() {
                    match serde_json::from_str::<OllamaChunk>(&line) {
                        Ok(parsed) => {
                            if let Some(delta) = parsed.delta() {
                                yield Ok(StreamEvent::Delta(delta.to_string()));
                            }
                            if parsed.done {
                                finished = true;
                                yield Ok(StreamEvent::Done);
                                break 'read;
                            }
                        }
                        // Ollama can interleave non-JSON noise; skip the line.
                        Err(_) => debug!("skipping malformed ndjson line"),
                    }
                }
            }

            if !finished {
                if let Some(rest) = frames.take_remainder() {
                    if let Ok(parsed) = serde_json::from_str::<OllamaChunk>(&rest) {
                        if let Some(delta) = parsed.delta() {
                            yield Ok(StreamEvent::Delta(delta.to_string()));
                        }
                    }
                }
                // Connection closed without an explicit done marker.
                yield Ok(StreamEvent::Done);
            }
        };

        Ok(Box::pin(stream))
    }

    /// One-shot non-streaming completion; the summarizer's entry point.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> Result<String> {
        let body = self.build_request_body(messages, model, options, false);
        let url = format!("{}/api/chat", self.base_url);

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("ollama request failed: {e}")))?;

        if !res.status().is_success() {
            return Err(Error::Provider(format!(
                "ollama error status {}",
                res.status()
            )));
        }

        let chunk: OllamaChunk = res
            .json()
            .await
            .map_err(|e| Error::Provider(format!("failed to parse ollama response: {e}")))?;

        Ok(chunk.delta().unwrap_or_default().to_string())
    }

    pub async fn health(&self, model: &str) -> ProviderHealth {
        let available = self.ensure_model_available(model).await;
        if !available {
            warn!(%model, "local model unavailable");
        }
        ProviderHealth {
            ok: available,
            status: None,
            model: model.to_string(),
            has_model: Some(available),
            message: None,
        }
    }
}
