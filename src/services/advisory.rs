use garde::Validate;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::models::verification::FeasibilityAssessment;

/// Client for the Generative Language `generateContent` API.
///
/// Used only to give job posters an opinion on scope. Verdicts never depend on it.
pub struct AdvisoryClient {
    http: Client,
    api_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

impl AdvisoryClient {
    pub fn new(api_url: &str, api_key: &str, model: &str) -> Result<Self, AdvisoryError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(AdvisoryError::Http)?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    /// Ask the model whether a job description is feasible as a fixed-price task.
    pub async fn assess(
        &self,
        title: &str,
        description: &str,
    ) -> Result<FeasibilityAssessment, AdvisoryError> {
        let url = format!("{}/models/{}:generateContent", self.api_url, self.model);

        let prompt = format!(
            concat!(
                "You review freelance software jobs paid from escrow. Work is accepted ",
                "automatically when its test suite reaches the required line coverage. ",
                "Assess whether the job below is feasible and well specified. ",
                "Return ONLY valid JSON with these exact fields: ",
                "feasible (boolean), category (short label), ",
                "estimated_effort (e.g. \"2 days\"), rationale (one paragraph).\n\n",
                "Title: {}\n\nDescription:\n{}"
            ),
            title, description
        );

        let request_body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "application/json" }
        });

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(AdvisoryError::Http)?;

        let generated: GenerateResponse = response.json().await.map_err(AdvisoryError::Http)?;
        let text = generated
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or(AdvisoryError::EmptyResponse)?;

        parse_assessment(&text)
    }
}

/// Parse the model's JSON answer, tolerating a Markdown code fence around it.
pub fn parse_assessment(text: &str) -> Result<FeasibilityAssessment, AdvisoryError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let assessment: FeasibilityAssessment =
        serde_json::from_str(body).map_err(AdvisoryError::Parse)?;
    assessment.validate()?;
    Ok(assessment)
}

#[derive(Debug, thiserror::Error)]
pub enum AdvisoryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse advisory response as an assessment: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Advisory response failed validation: {0}")]
    Invalid(#[from] garde::Report),

    #[error("Advisory model returned no candidates")]
    EmptyResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let a = parse_assessment(
            r#"{"feasible":true,"category":"backend","estimated_effort":"3 days","rationale":"Clear scope."}"#,
        )
        .unwrap();
        assert!(a.feasible);
        assert_eq!(a.category, "backend");
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = "```json\n{\"feasible\":false,\"category\":\"research\",\"rationale\":\"Open-ended.\"}\n```";
        let a = parse_assessment(text).unwrap();
        assert!(!a.feasible);
        assert_eq!(a.estimated_effort, "");
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(matches!(
            parse_assessment("I think this is feasible."),
            Err(AdvisoryError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_rejects_empty_rationale() {
        assert!(matches!(
            parse_assessment(r#"{"feasible":true,"category":"web","rationale":""}"#),
            Err(AdvisoryError::Invalid(_))
        ));
    }
}
