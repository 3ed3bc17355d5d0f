//! Outbound notifications: one human-readable message per alert batch.

use async_trait::async_trait;

use crate::alerts::{AlertBatch, AlertEntry};
use crate::trend::TrendState;

// ---

/// Telegram rejects messages longer than this many characters.
pub const TELEGRAM_MAX_CHARS: usize = 4096;

/// Room kept free for the "more not shown" line while entries are added.
const OVERFLOW_LINE_RESERVE: usize = 48;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notify: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notify: API error from {service}: status={status}, body={body}")]
    Api {
        service: String,
        status: u16,
        body: String,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, batch: &AlertBatch) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    http: reqwest::Client,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    // ---
    pub fn new(http: reqwest::Client, token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        TelegramNotifier {
            http,
            token: token.into(),
            chat_id: chat_id.into(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, batch: &AlertBatch) -> Result<(), NotifyError> {
        // ---
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let text = format_batch_html(batch, TELEGRAM_MAX_CHARS);
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let response = self.http.post(&url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api {
                service: "telegram".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(scan_id = %batch.scan_id, entries = batch.len(), "Notification sent");
        Ok(())
    }
}

/// Render a batch as Telegram-flavoured HTML of at most `max_chars`
/// characters.
///
/// Entries are added whole, in batch order. Once the next one would not
/// fit, the rest are summarized by a plain-text count line, so the markup
/// of every included entry stays closed.
pub fn format_batch_html(batch: &AlertBatch, max_chars: usize) -> String {
    // ---
    let mut out = String::from("✈️ <b>FLIGHT PRICE REPORT</b> ✈️\n");
    let mut used = out.chars().count();

    for (i, entry) in batch.entries.iter().enumerate() {
        let block = format!("\n{}", format_entry_html(entry));
        let block_chars = block.chars().count();
        let last = i + 1 == batch.entries.len();
        let budget = if last {
            max_chars
        } else {
            max_chars.saturating_sub(OVERFLOW_LINE_RESERVE)
        };

        if used + block_chars > budget {
            let omitted = batch.entries.len() - i;
            tracing::warn!(
                scan_id = %batch.scan_id,
                shown = i,
                omitted,
                "Alert batch exceeds message size, summarizing the rest"
            );
            out.push_str(&format!("\n➕ {omitted} more alert(s) not shown\n"));
            break;
        }
        out.push_str(&block);
        used += block_chars;
    }
    out
}

fn format_entry_html(entry: &AlertEntry) -> String {
    // ---
    let obs = &entry.observation;
    let below_target = entry.fired_rule("price_ceiling");

    let icon = if below_target {
        "🚨🔥"
    } else if entry.trend.state == TrendState::Drop {
        "🟢"
    } else {
        "🔵"
    };

    let mut lines = vec![
        format!(
            "{icon} <b>{} → {} ({})</b>",
            escape_html(&obs.origin),
            escape_html(&obs.destination),
            obs.departure_date
        ),
        format!(
            "💰 <b>{:.2}</b> ({:.1}h, {} stop{})",
            obs.price_total,
            obs.duration_hours(),
            obs.stop_count,
            if obs.stop_count == 1 { "" } else { "s" }
        ),
        format!(
            "🏢 {} (flight {})",
            escape_html(&obs.carrier_code),
            escape_html(&obs.flight_number)
        ),
    ];

    if below_target {
        lines.push("🔥 Below target price!".to_string());
    } else if entry.trend.state == TrendState::Drop {
        lines.push(format!("🔥 {:.0} below average", entry.trend.delta.abs()));
    }
    lines.push(format!(
        "📊 score {:.1} · trend {} · {}",
        entry.score.composite,
        entry.trend.state,
        escape_html(&entry.fired.join(", "))
    ));
    if let Some(link) = &entry.deep_link {
        lines.push(format!("<a href='{}'>View offer</a>", escape_html(link)));
    }

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&#39;")
}
