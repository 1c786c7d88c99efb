use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::LlmError;

/// Which gateway role issued a request. Used for logging and test scripting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmRole {
    Router,
    Judge,
    Repair,
}

impl LlmRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::Judge => "judge",
            Self::Repair => "repair",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub role: LlmRole,
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: Option<f32>,
    pub seed: Option<i64>,
    /// Ask the service to constrain output to a JSON object.
    pub json_mode: bool,
}

/// Abstraction over the classification service.
pub trait LlmClient: Send + Sync {
    /// Single non-streaming completion; returns the assistant message text.
    fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

/// Blocking client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatCompletionsClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl ChatCompletionsClient {
    /// Every request is bounded by `timeout`; an expired call surfaces as
    /// `LlmError::Timeout`.
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Request body for /chat/completions
#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    stream: bool,
}

/// Response body from /chat/completions
#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl LlmClient for ChatCompletionsClient {
    fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionBody {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            seed: request.seed,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
            stream: false,
        };

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                LlmError::Connection(self.base_url.clone())
            } else {
                LlmError::HttpClient(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatCompletionResponse = response.json().map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.timeout_secs)
            } else {
                LlmError::ResponseParsing(e.to_string())
            }
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        tracing::debug!(
            role = request.role.as_str(),
            model = %request.model,
            chars = content.len(),
            "Completion received"
        );
        Ok(content)
    }
}

/// Scripted client for testing. Responds through a closure and records
/// every request it receives.
#[cfg(test)]
pub struct MockLlmClient {
    responder: Box<dyn Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync>,
    calls: std::sync::Mutex<Vec<CompletionRequest>>,
}

#[cfg(test)]
impl MockLlmClient {
    pub fn new(
        responder: impl Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Fixed response per role.
    pub fn by_role(router: &str, judge: &str, repair: &str) -> Self {
        let (router, judge, repair) = (router.to_string(), judge.to_string(), repair.to_string());
        Self::new(move |req| {
            Ok(match req.role {
                LlmRole::Router => router.clone(),
                LlmRole::Judge => judge.clone(),
                LlmRole::Repair => repair.clone(),
            })
        })
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, role: LlmRole) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.role == role).count()
    }
}

#[cfg(test)]
impl LlmClient for MockLlmClient {
    fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(request.clone());
        (self.responder)(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(role: LlmRole) -> CompletionRequest {
        CompletionRequest {
            role,
            model: "m".into(),
            system: "s".into(),
            user: "u".into(),
            temperature: Some(0.0),
            seed: Some(42),
            json_mode: true,
        }
    }

    #[test]
    fn mock_client_responds_by_role() {
        let client = MockLlmClient::by_role("r", "j", "p");
        assert_eq!(client.complete(&request(LlmRole::Judge)).unwrap(), "j");
        assert_eq!(client.complete(&request(LlmRole::Router)).unwrap(), "r");
        assert_eq!(client.call_count(LlmRole::Judge), 1);
        assert_eq!(client.calls().len(), 2);
    }

    #[test]
    fn request_body_serializes_json_mode_and_seed() {
        let body = ChatCompletionBody {
            model: "m",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: None,
            seed: Some(42),
            response_format: Some(ResponseFormat {
                kind: "json_object",
            }),
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["seed"], 42);
        assert_eq!(json["response_format"]["type"], "json_object");
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let client =
            ChatCompletionsClient::new("http://localhost:8080/v1/", None, Duration::from_secs(5))
                .unwrap();
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn unreachable_service_is_an_error() {
        // Port 9 (discard) is closed on test hosts; the call must fail, not hang.
        let client =
            ChatCompletionsClient::new("http://127.0.0.1:9", None, Duration::from_secs(2)).unwrap();
        assert!(client.complete(&request(LlmRole::Router)).is_err());
    }
}
