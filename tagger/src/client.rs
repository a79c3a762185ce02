use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::config::TaggingConfig;
use crate::error::ItemError;
use crate::media::MediaKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TaggingResult {
    pub title: String,
    pub keywords: Vec<String>,
}

/// Splits a raw completion into title and keywords. The instruction demands
/// a comma-separated list with the title first, so this splits on `", "`
/// exactly and keeps every entry verbatim. This is a contract with the
/// prompt, not general CSV parsing.
pub(crate) fn parse_completion(raw: &str) -> TaggingResult {
    let mut entries = raw.split(", ");
    let title = entries.next().unwrap_or_default().to_string();
    let keywords = entries.map(str::to_string).collect();
    TaggingResult { title, keywords }
}

#[derive(Debug, Clone)]
pub(crate) struct TaggingClient {
    base_url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    keyword_count: usize,
    client: reqwest::Client,
}

impl TaggingClient {
    pub fn new(config: &TaggingConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build tagging client")?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
            keyword_count: config.keyword_count,
            client,
        })
    }

    /// One completion request per untagged item: one text instruction plus
    /// one base64 image attachment. A single attempt: resumability across
    /// runs comes from the result cache, not from in-run retries.
    pub async fn tag(
        &self,
        image_b64: &str,
        kind: MediaKind,
        context_keywords: &[String],
    ) -> Result<String, ItemError> {
        let url = format!("{}/chat/completions", self.base_url);
        let instruction = self.build_instruction(kind, context_keywords);
        let payload = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "text",
                        "text": instruction,
                    },
                    {
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:image/jpeg;base64,{image_b64}"),
                        },
                    },
                ],
            }],
            "max_tokens": self.max_tokens,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| ItemError::Transport(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ItemError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(ItemError::Transport(format!(
                "tagging endpoint returned {status}: {body}"
            )));
        }

        // a 2xx without the completion structure is a contract violation,
        // not a transport problem; surface the whole body
        let parsed: Value =
            serde_json::from_str(&body).map_err(|_| ItemError::MalformedResponse(body.clone()))?;
        let content = parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| ItemError::MalformedResponse(body.clone()))?;
        Ok(content.to_string())
    }

    fn build_instruction(&self, kind: MediaKind, context_keywords: &[String]) -> String {
        let mut text = format!(
            "I want {count} keywords to describe this {subject} for a stock catalog, \
             targeted towards discoverability. ",
            count = self.keyword_count,
            subject = kind.subject(),
        );
        if kind == MediaKind::Image && !context_keywords.is_empty() {
            text.push_str(&format!(
                "These keywords are already present: {}, please include the ones that \
                 are relevant or location specific. ",
                context_keywords.join(", ")
            ));
        }
        text.push_str(
            "Please output them comma separated. Please as the first entry, output an \
             editorialized title, also separated by commas. Don't output any other characters.",
        );
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> TaggingConfig {
        TaggingConfig {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 300,
            keyword_count: 30,
            timeout_secs: 5,
        }
    }

    #[test]
    fn first_entry_is_the_title() {
        let result = parse_completion("Sunset Beach, ocean, sand, palm");
        assert_eq!(result.title, "Sunset Beach");
        assert_eq!(result.keywords, ["ocean", "sand", "palm"]);
    }

    #[test]
    fn title_only_yields_no_keywords() {
        let result = parse_completion("Sunset Beach");
        assert_eq!(result.title, "Sunset Beach");
        assert!(result.keywords.is_empty());
    }

    // Entries are kept verbatim: no trimming, no dedup, no case folding,
    // and a bare comma does not split.
    #[test]
    fn entries_are_not_normalized() {
        let result = parse_completion("A Title, Ocean , ocean, beach,sand");
        assert_eq!(result.title, "A Title");
        assert_eq!(result.keywords, ["Ocean ", "ocean", "beach,sand"]);
    }

    #[test]
    fn image_instruction_carries_context_keywords() {
        let client = TaggingClient::new(&test_config(), "key".to_string()).unwrap();
        let text = client.build_instruction(
            MediaKind::Image,
            &["eiffel tower".to_string(), "paris".to_string()],
        );
        assert!(text.contains("30 keywords"));
        assert!(text.contains("this image"));
        assert!(text.contains("eiffel tower, paris"));
        assert!(text.ends_with("Don't output any other characters."));
    }

    #[test]
    fn video_instruction_has_no_context_clause() {
        let client = TaggingClient::new(&test_config(), "key".to_string()).unwrap();
        let text = client.build_instruction(MediaKind::Video, &[]);
        assert!(text.contains("this video"));
        assert!(!text.contains("already present"));
    }
}
