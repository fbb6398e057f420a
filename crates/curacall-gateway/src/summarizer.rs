//! Background compression of old conversation turns into a single
//! system-role summary message.

use std::sync::{Arc, Mutex};

use curacall_common::{ChatMessage, ChatRole, Error, Result};
use curacall_db::ConversationStore;
use curacall_providers::{ChatOptions, OllamaProvider};
use tracing::{debug, info, warn};

/// Compression instruction sent ahead of the turns being summarized.
pub const SUMMARY_INSTRUCTION: &str = "Eres un compresor de contexto para una conversación larga. Resume de forma precisa, breve y neutra:
- Conserva hechos, nombres, fechas y decisiones.
- Omite saludos y relleno.
- Devuelve 5-10 viñetas claras.
- Idioma del resumen: español.";

#[derive(Debug, Clone, serde::Serialize)]
pub struct SummaryOutcome {
    pub ok: bool,
    pub summary: String,
}

/// Compresses every non-system message that falls outside the keep-window
/// into the conversation's single summary row. A second run over the same
/// state overwrites that row, it never appends another.
///
/// Errors here are the caller's to swallow: the fire-and-forget path logs
/// and moves on, the manual endpoint reports them.
pub async fn summarize_conversation(
    store: Arc<Mutex<ConversationStore>>,
    provider: OllamaProvider,
    conversation_id: &str,
    turns_to_keep: usize,
) -> Result<SummaryOutcome> {
    let rows = store
        .lock()
        .unwrap()
        .list_messages(conversation_id)?;

    let non_system: Vec<_> = rows.iter().filter(|m| m.role != "system").collect();
    let keep = turns_to_keep.max(1) * 2;
    if non_system.len() <= keep {
        debug!(%conversation_id, "nothing outside the keep-window to summarize");
        return Ok(SummaryOutcome {
            ok: true,
            summary: String::new(),
        });
    }
    let to_summarize = &non_system[..non_system.len() - keep];

    let model = provider.default_model().to_string();
    if !provider.ensure_model_available(&model).await {
        return Err(Error::Provider(
            "local model unavailable for summarization".to_string(),
        ));
    }

    let mut input = Vec::with_capacity(to_summarize.len() + 1);
    input.push(ChatMessage::system(SUMMARY_INSTRUCTION));
    input.extend(to_summarize.iter().map(|m| ChatMessage {
        role: ChatRole::parse(&m.role),
        content: m.content.clone(),
    }));

    let options = ChatOptions {
        temperature: Some(0.2),
        ..Default::default()
    };
    let summary = provider.complete(&input, &model, &options).await?;
    let trimmed = summary.trim();
    if trimmed.is_empty() {
        return Ok(SummaryOutcome {
            ok: false,
            summary: String::new(),
        });
    }

    store
        .lock()
        .unwrap()
        .upsert_summary(conversation_id, trimmed)?;
    info!(%conversation_id, "conversation summary updated");

    Ok(SummaryOutcome {
        ok: true,
        summary: trimmed.to_string(),
    })
}

/// Detached-task wrapper used after a turn completes. Failures never reach
/// the request path that spawned it; the prior summary (if any) stays put
/// and the next qualifying turn simply retries with a larger window.
pub fn spawn_summarize(
    store: Arc<Mutex<ConversationStore>>,
    provider: OllamaProvider,
    conversation_id: String,
    turns_to_keep: usize,
) {
    tokio::spawn(async move {
        if let Err(e) =
            summarize_conversation(store, provider, &conversation_id, turns_to_keep).await
        {
            warn!(%conversation_id, "summarization abandoned: {e}");
        }
    });
}
