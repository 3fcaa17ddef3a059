//! Anthropic Messages API reasoner
//!
//! Sends the finding, project summary and taxonomy as one user message and
//! expects a single JSON object back (optionally fenced in ```json).
//! Transport failures and non-2xx answers are `AnalysisError::Timeout`;
//! anything that does not parse is `AnalysisError::Malformed`.

use crate::types::{AnalysisError, ReasoningRequest, ReasoningResponse, ReasoningService};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

/// Finding text beyond this is cut before sending
const MAX_FINDING_CHARS: usize = 4000;

const SYSTEM_PROMPT: &str = "You are an analyst tracking large infrastructure projects \
(semiconductor fabs, battery plants, data centers, power generation). You classify one \
news or filing excerpt at a time into a fixed taxonomy and answer with a single JSON object \
and nothing else.";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

pub struct AnthropicReasoner {
    client: Client,
    api_key: String,
    model: String,
}

impl AnthropicReasoner {
    pub fn new(api_key: String, model: String, timeout: Duration) -> nxt_common::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| nxt_common::Error::Internal(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model,
        })
    }
}

/// User message carrying the finding and the expected answer shape
fn build_prompt(request: &ReasoningRequest) -> String {
    let finding: String = request.finding_text.chars().take(MAX_FINDING_CHARS).collect();
    let published = request
        .published_at
        .map(|d| d.date_naive().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let taxonomy = request
        .taxonomy
        .iter()
        .map(|c| {
            let kinds: Vec<&str> = c.allowed_kinds().iter().map(|k| k.as_str()).collect();
            format!("- {} -> {}", c.as_str(), kinds.join(" | "))
        })
        .collect::<Vec<_>>()
        .join("\n");
    let items = if request.active_items.is_empty() {
        "(none)".to_string()
    } else {
        request
            .active_items
            .iter()
            .map(|i| format!("- {} [{} {} {}] {}", i.id, i.kind, i.severity, i.status, i.description))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"PROJECT
{summary}

ACTIVE RAID ITEMS
{items}

FINDING (published {published})
{finding}

TAXONOMY (classification -> allowed raid_kind)
{taxonomy}

Rules:
- schedule_slip is an issue when it already happened, a risk when it is anticipated.
- regulatory_milestone is an action while pending, a decision once approved or signed.
- velocity_delta only for schedule_slip or milestone_progress: negative for slips, positive for completions; otherwise null.
- confidence is your confidence in the classification, 0.0 to 1.0. Use null classification when nothing fits.
- transitions may only reference ids listed under ACTIVE RAID ITEMS and only move them forward.
- A field that does not apply is JSON null, never the string "null".

Answer with this JSON object:
{{"classification": "schedule_slip|funding_partnership|regulatory_milestone|milestone_progress",
 "raid_kind": "risk|action|issue|decision",
 "severity": "low|medium|high|critical",
 "confidence": 0.0,
 "description": "one sentence",
 "mitigation": null, "owner": null, "deadline": "YYYY-MM-DD",
 "velocity_delta": null, "justification": null,
 "related_items": [],
 "transitions": [{{"item_id": "...", "to": "in_progress|completed|mitigating|closed|investigating|resolved|superseded", "note": "..."}}]}}"#,
        summary = request.project_summary,
    )
}

/// Body of the first JSON object in a reply, with any code fence removed
fn extract_json(reply: &str) -> &str {
    let trimmed = reply.trim();
    let unfenced = if let Some(rest) = trimmed.split_once("```json").map(|(_, r)| r) {
        rest.split("```").next().unwrap_or(rest)
    } else if let Some(rest) = trimmed.split_once("```").map(|(_, r)| r) {
        rest.split("```").next().unwrap_or(rest)
    } else {
        trimmed
    };
    let unfenced = unfenced.trim();
    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if end > start => &unfenced[start..=end],
        _ => unfenced,
    }
}

fn parse_reply(reply: &str) -> Result<ReasoningResponse, AnalysisError> {
    serde_json::from_str(extract_json(reply))
        .map_err(|e| AnalysisError::Malformed(format!("reasoning reply: {}", e)))
}

#[async_trait::async_trait]
impl ReasoningService for AnthropicReasoner {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn assess(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, AnalysisError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: build_prompt(request),
            }],
        };

        debug!(project_id = %request.project_id, model = %self.model, "Calling reasoning service");

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::Timeout(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalysisError::Timeout(format!("reasoning service returned {}", status)));
        }

        let envelope: MessagesResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Malformed(format!("response envelope: {}", e)))?;

        let reply = envelope
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        parse_reply(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaxonomyClass;
    use nxt_common::db::RaidKind;

    #[test]
    fn test_fenced_reply_is_parsed() {
        let reply = "Here is my assessment:\n```json\n{\"classification\": \"funding_partnership\", \
                     \"raid_kind\": \"decision\", \"confidence\": 0.8, \"description\": \"DOE loan closed\"}\n```";

        let parsed = parse_reply(reply).unwrap();
        assert_eq!(parsed.classification, Some(TaxonomyClass::FundingPartnership));
        assert_eq!(parsed.raid_kind, Some(RaidKind::Decision));
        assert_eq!(parsed.description, "DOE loan closed");
    }

    #[test]
    fn test_bare_object_with_prose_is_parsed() {
        let reply = "Sure. {\"classification\": null, \"confidence\": 0.1} Hope that helps.";
        let parsed = parse_reply(reply).unwrap();
        assert_eq!(parsed.classification, None);
    }

    #[test]
    fn test_unknown_enum_value_is_malformed() {
        let reply = "{\"classification\": \"weather\", \"confidence\": 0.9}";
        assert!(matches!(parse_reply(reply), Err(AnalysisError::Malformed(_))));
    }

    #[test]
    fn test_prose_only_is_malformed() {
        assert!(matches!(
            parse_reply("I cannot determine this."),
            Err(AnalysisError::Malformed(_))
        ));
    }

    #[test]
    fn test_prompt_lists_taxonomy_and_items() {
        let request = ReasoningRequest {
            project_id: "SC001".to_string(),
            finding_text: "Intel delays Ohio fab".to_string(),
            published_at: None,
            project_summary: "Intel Ohio (SC001)".to_string(),
            taxonomy: TaxonomyClass::ALL.to_vec(),
            active_items: Vec::new(),
        };
        let prompt = build_prompt(&request);
        assert!(prompt.contains("- schedule_slip -> risk | issue"));
        assert!(prompt.contains("(none)"));
        assert!(prompt.contains("published unknown"));
    }

    #[test]
    fn test_prompt_template_uses_json_null() {
        let request = ReasoningRequest {
            project_id: "SC001".to_string(),
            finding_text: "Intel delays Ohio fab".to_string(),
            published_at: None,
            project_summary: "Intel Ohio (SC001)".to_string(),
            taxonomy: TaxonomyClass::ALL.to_vec(),
            active_items: Vec::new(),
        };
        let prompt = build_prompt(&request);
        assert!(!prompt.contains("|null"));
        assert!(!prompt.contains("or null"));
        assert!(prompt.contains("\"mitigation\": null"));

        // A reply that copies the template's nulls parses to absent fields
        let reply = r#"{"classification": null, "confidence": 0.2, "deadline": null, "velocity_delta": null}"#;
        let response = parse_reply(reply).unwrap();
        assert_eq!(response.classification, None);
        assert_eq!(response.velocity_delta, None);
    }
}
