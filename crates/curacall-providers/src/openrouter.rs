use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use curacall_common::{ChatMessage, Error, FrameBuffer, Result};

use crate::{ChatOptions, DeltaStream, ProviderHealth, StreamEvent};

/// Fixed backoff schedule applied to HTTP 429 responses: three attempts at
/// 0ms, 1s and 3s. Connect errors on a non-final attempt fall through to
/// the next delay too.
const RETRY_DELAYS_MS: [u64; 3] = [0, 1_000, 3_000];

const TITLE_HEADER: &str = "CuraCall";

/// Adapter for the OpenRouter chat completions API (OpenAI-style SSE:
/// `data: {json}` blocks terminated by a literal `[DONE]`).
#[derive(Clone)]
pub struct OpenRouterProvider {
    api_key: Option<String>,
    base_url: String,
    default_model: String,
    referer: String,
    client: Client,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<ChoiceContent>,
    #[serde(default)]
    message: Option<ChoiceContent>,
}

#[derive(Deserialize)]
struct ChoiceContent {
    #[serde(default)]
    content: Option<String>,
}

impl StreamChunk {
    fn delta(&self) -> Option<&str> {
        let choice = self.choices.first()?;
        choice
            .delta
            .as_ref()
            .and_then(|d| d.content.as_deref())
            .or_else(|| choice.message.as_ref().and_then(|m| m.content.as_deref()))
            .filter(|t| !t.is_empty())
    }
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    #[serde(default)]
    id: String,
}

impl OpenRouterProvider {
    pub fn new(
        api_key: Option<String>,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
        referer: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url.into(),
            default_model: default_model.into(),
            referer: referer.into(),
            client: Client::new(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Streams a completion. A missing API key is a configuration error
    /// surfaced before any request goes out; the caller treats it as
    /// "unavailable" rather than retrying.
    pub async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
        options: &ChatOptions,
    ) -> Result<DeltaStream> {
        let key = self
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("OPENROUTER_API_KEY is not set".to_string()))?;
        let model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model);

        let mut body = json!({
            "model": model,
            "stream": true,
            "messages": messages,
        });
        if let Some(temp) = options.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let res = self.send_with_backoff(&key, &body).await?;
        let first_token_deadline = options
            .first_token_timeout
            .map(|limit| Instant::now() + limit);

        let mut bytes = res.bytes_stream();
        let stream = async_stream::stream! {
            let mut frames = FrameBuffer::new();
            let started = Instant::now();
            let mut first_token_seen = false;
            let mut deadline_logged = false;
            let mut finished = false;

            'read: loop {
                // Waiting for the first token is bounded by an observable
                // deadline: passing it is logged but never aborts the
                // stream (slow-starting completions still finish).
                let chunk = match first_token_deadline {
                    Some(deadline) if !first_token_seen && !deadline_logged => {
                        match tokio::time::timeout_at(deadline.into(), bytes.next()).await {
                            Ok(chunk) => chunk,
                            Err(_) => {
                                warn!("no first token within {:?}", started.elapsed());
                                deadline_logged = true;
                                continue;
                            }
                        }
                    }
                    _ => bytes.next().await,
                };

                let chunk = match chunk {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        yield Err(Error::Provider(format!("openrouter stream error: {e}")));
                        return;
                    }
                    None => break,
                };
                frames.push(&chunk);

                while let Some(frame) = frames.next_frame() {
                    let payload = frame.data.trim();
                    if payload.is_empty() {
                        continue;
                    }
                    if payload == "[DONE]" {
                        finished = true;
                        yield Ok(StreamEvent::Done);
                        break 'read;
                    }
                    match serde_json::from_str::<StreamChunk>(payload) {
                        Ok(parsed) => {
                            if let Some(delta) = parsed.delta() {
                                if !first_token_seen {
                                    first_token_seen = true;
                                    info!("first token after {}ms", started.elapsed().as_millis());
                                }
                                yield Ok(StreamEvent::Delta(delta.to_string()));
                            }
                        }
                        Err(_) => debug!("skipping malformed sse payload"),
                    }
                }
            }

            if !finished {
                // Upstream closed without the [DONE] marker.
                yield Ok(StreamEvent::Done);
            }
        };

        Ok(Box::pin(stream))
    }

    async fn send_with_backoff(
        &self,
        key: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut last_err: Option<Error> = None;

        for (attempt, delay_ms) in RETRY_DELAYS_MS.iter().enumerate() {
            if *delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
            }
            let final_attempt = attempt + 1 == RETRY_DELAYS_MS.len();

            match self
                .client
                .post(&url)
                .bearer_auth(key)
                .header("HTTP-Referer", &self.referer)
                .header("X-Title", TITLE_HEADER)
                .json(body)
                .send()
                .await
            {
                Ok(res) if res.status() == StatusCode::TOO_MANY_REQUESTS && !final_attempt => {
                    warn!("openrouter rate limited, retrying (attempt {})", attempt + 1);
                    last_err = Some(Error::Provider("openrouter rate limited (429)".to_string()));
                }
                Ok(res) if !res.status().is_success() => {
                    return Err(Error::Provider(format!(
                        "openrouter error status {}",
                        res.status()
                    )));
                }
                Ok(res) => return Ok(res),
                Err(e) if !final_attempt => {
                    warn!("openrouter request failed, retrying: {e}");
                    last_err = Some(Error::Provider(format!("openrouter request failed: {e}")));
                }
                Err(e) => {
                    return Err(Error::Provider(format!("openrouter request failed: {e}")));
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::Provider("openrouter gave no response".to_string())))
    }

    /// Validates the key and the model's presence in the catalog without
    /// consuming a completion (`GET /models`).
    pub async fn health(&self, model: Option<&str>) -> ProviderHealth {
        let model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model)
            .to_string();

        let Some(key) = self.api_key.as_deref() else {
            return ProviderHealth {
                ok: false,
                status: None,
                model,
                has_model: None,
                message: Some("OPENROUTER_API_KEY is not set".to_string()),
            };
        };

        let url = format!("{}/models", self.base_url);
        match self
            .client
            .get(&url)
            .bearer_auth(key)
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", TITLE_HEADER)
            .send()
            .await
        {
            Ok(res) => {
                let status = res.status().as_u16();
                let ok = res.status().is_success();
                let has_model = if ok {
                    res.json::<ModelsResponse>()
                        .await
                        .map(|list| list.data.iter().any(|m| m.id == model))
                        .unwrap_or(false)
                } else {
                    false
                };
                ProviderHealth {
                    ok,
                    status: Some(status),
                    model,
                    has_model: Some(has_model),
                    message: None,
                }
            }
            Err(e) => ProviderHealth {
                ok: false,
                status: None,
                model,
                has_model: None,
                message: Some(e.to_string()),
            },
        }
    }
}
