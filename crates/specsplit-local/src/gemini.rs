//! Gemini text generation over HTTP (reqwest).
//!
//! Two auth modes:
//! - Generative Language API key (`?key=`) on `/v1beta/models/{model}:generateContent`
//! - Vertex AI bearer token on `/v1/projects/{p}/locations/{l}/publishers/google/models/{model}:generateContent`
//!
//! Non-success responses keep the status line and provider body in the error
//! text so the retry client can spot 429 / RESOURCE_EXHAUSTED.

use crate::config::Settings;
use serde::{Deserialize, Serialize};
use specsplit_core::{Error, GenerativeModel, Result};
use std::time::Duration;

const GENERATIVE_LANGUAGE_BASE: &str = "https://generativelanguage.googleapis.com";
const MAX_ERROR_BODY_CHARS: usize = 2_000;

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HARASSMENT",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeminiAuth {
    ApiKey(String),
    Vertex {
        project: String,
        location: String,
        access_token: String,
    },
}

#[derive(Debug, Clone)]
pub struct GeminiModel {
    client: reqwest::Client,
    auth: GeminiAuth,
    model: String,
    base_url: Option<String>,
    timeout: Duration,
}

impl GeminiModel {
    pub fn new(client: reqwest::Client, auth: GeminiAuth, model: impl Into<String>) -> Self {
        Self {
            client,
            auth,
            model: model.into(),
            base_url: None,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Vertex wins when a project and access token are both set; otherwise an
    /// API key is required.
    pub fn from_settings(client: reqwest::Client, s: &Settings) -> Result<Self> {
        let auth = match (&s.project, &s.vertex_access_token, &s.api_key) {
            (Some(project), Some(token), _) => GeminiAuth::Vertex {
                project: project.clone(),
                location: s.vertex_location.clone(),
                access_token: token.clone(),
            },
            (_, _, Some(key)) => GeminiAuth::ApiKey(key.clone()),
            _ => {
                return Err(Error::NotConfigured(
                    "missing SPECSPLIT_GEMINI_API_KEY (or GOOGLE_CLOUD_PROJECT + SPECSPLIT_VERTEX_ACCESS_TOKEN)"
                        .to_string(),
                ))
            }
        };
        let mut m = Self::new(client, auth, s.model.clone()).with_timeout(s.timeout());
        m.base_url = s.base_url.clone();
        Ok(m)
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        Self::from_settings(client, &Settings::from_env()?)
    }

    pub fn auth(&self) -> &GeminiAuth {
        &self.auth
    }

    fn endpoint(&self) -> String {
        match &self.auth {
            GeminiAuth::ApiKey(_) => {
                let base = self.base_url.as_deref().unwrap_or(GENERATIVE_LANGUAGE_BASE);
                format!(
                    "{}/v1beta/models/{}:generateContent",
                    base.trim_end_matches('/'),
                    self.model
                )
            }
            GeminiAuth::Vertex {
                project, location, ..
            } => {
                let base = self
                    .base_url
                    .clone()
                    .unwrap_or_else(|| format!("https://{location}-aiplatform.googleapis.com"));
                format!(
                    "{}/v1/projects/{project}/locations/{location}/publishers/google/models/{}:generateContent",
                    base.trim_end_matches('/'),
                    self.model
                )
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ReqPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct ReqContent {
    role: &'static str,
    parts: Vec<ReqPart>,
}

#[derive(Debug, Serialize)]
struct GenCfg {
    max_output_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Serialize)]
struct GeminiReq {
    contents: Vec<ReqContent>,
    generation_config: GenCfg,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Deserialize)]
struct GeminiResp {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<RespContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RespContent {
    #[serde(default)]
    parts: Vec<RespPart>,
}

#[derive(Debug, Deserialize)]
struct RespPart {
    #[serde(default)]
    text: Option<String>,
}

fn request_body(prompt: &str) -> GeminiReq {
    GeminiReq {
        contents: vec![ReqContent {
            role: "user",
            parts: vec![ReqPart {
                text: prompt.to_string(),
            }],
        }],
        generation_config: GenCfg {
            max_output_tokens: 30_000,
            temperature: 1.0,
            top_p: 0.95,
        },
        safety_settings: HARM_CATEGORIES
            .iter()
            .map(|c| SafetySetting {
                category: *c,
                threshold: "OFF",
            })
            .collect(),
    }
}

#[async_trait::async_trait]
impl GenerativeModel for GeminiModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let mut rb = self
            .client
            .post(self.endpoint())
            .timeout(self.timeout)
            .json(&request_body(prompt));
        rb = match &self.auth {
            GeminiAuth::ApiKey(key) => rb.query(&[("key", key)]),
            GeminiAuth::Vertex { access_token, .. } => rb.bearer_auth(access_token),
        };

        let resp = rb
            .send()
            .await
            .map_err(|e| Error::Llm(format!("gemini request failed: {}", e.without_url())))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            tracing::debug!(%status, model = %self.model, "gemini non-success response");
            return Err(Error::Llm(format!("gemini HTTP {status}: {}", body.trim())));
        }

        let parsed: GeminiResp = resp
            .json()
            .await
            .map_err(|e| Error::Llm(format!("gemini bad json: {e}")))?;
        let Some(first) = parsed.candidates.first() else {
            return Err(Error::Llm("gemini returned no candidates".to_string()));
        };
        let text: String = first
            .content
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.trim().is_empty() {
            return Err(Error::Llm(format!(
                "gemini returned empty output (finish reason: {})",
                first.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(text)
    }
}
