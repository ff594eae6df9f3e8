//! Discovery run notifications via Discord webhook.
//!
//! Best-effort side channel: callers ignore the result, a failed
//! notification never affects the run.

use anyhow::Result;
use serde::Serialize;
use tracing::{error, info};

use crate::orchestrator::RunSummary;

const USERNAME: &str = "Prospect";

const COLOR_COMPLETE: u32 = 0x2E8B57;
const COLOR_PARTIAL: u32 = 0xE67E22;

#[derive(Serialize, Debug)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

impl EmbedField {
    fn inline(name: &str, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            inline: true,
        }
    }
}

#[derive(Serialize, Debug)]
struct Embed {
    title: String,
    description: String,
    color: u32,
    timestamp: String,
    fields: Vec<EmbedField>,
}

#[derive(Serialize, Debug)]
struct WebhookPayload {
    username: String,
    embeds: Vec<Embed>,
}

pub struct DiscordWebhook {
    url: String,
    client: reqwest::Client,
}

impl DiscordWebhook {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }

    pub async fn notify_run_started(
        &self,
        area: &str,
        grid_points: usize,
        categories: usize,
    ) -> Result<()> {
        self.post(Embed {
            title: "Discovery Started".to_string(),
            description: format!("Scanning **{}**", area),
            color: COLOR_COMPLETE,
            timestamp: chrono::Utc::now().to_rfc3339(),
            fields: vec![
                EmbedField::inline("Grid points", grid_points),
                EmbedField::inline("Categories", categories),
            ],
        })
        .await
    }

    pub async fn notify_run_complete(&self, area: &str, summary: &RunSummary) -> Result<()> {
        self.post(completion_embed(area, summary)).await
    }

    async fn post(&self, embed: Embed) -> Result<()> {
        let title = embed.title.clone();
        let payload = WebhookPayload {
            username: USERNAME.to_string(),
            embeds: vec![embed],
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            error!("Failed to send Discord notification: {}", error_text);
            anyhow::bail!("Discord notification failed: {}", error_text);
        }

        info!("Sent Discord notification: {}", title);
        Ok(())
    }
}

/// Build the completion embed from the run counters. Budget-exhausted
/// runs get the partial-coverage color and wording.
fn completion_embed(area: &str, summary: &RunSummary) -> Embed {
    let (color, description) = if summary.budget_exhausted {
        (
            COLOR_PARTIAL,
            format!("**{}**: halted at budget ceiling, coverage is partial", area),
        )
    } else {
        (COLOR_COMPLETE, format!("**{}**: full pass complete", area))
    };

    Embed {
        title: "Discovery Complete".to_string(),
        description,
        color,
        timestamp: chrono::Utc::now().to_rfc3339(),
        fields: vec![
            EmbedField::inline("Inserted", summary.inserted),
            EmbedField::inline("Cells queried", summary.cells_queried),
            EmbedField::inline("Duplicates", summary.duplicates),
            EmbedField::inline("Soft errors", summary.soft_errors),
            EmbedField::inline("Subdivisions", summary.subdivisions),
        ],
    }
}
