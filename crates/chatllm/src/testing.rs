//! In-memory doubles shared by unit tests.

use std::sync::Mutex;

use async_trait::async_trait;
use indicatif::ProgressBar;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::budget::{BudgetError, BudgetLedger};
use crate::config::Config;
use crate::credentials::{CredentialError, CredentialResolver};
use crate::llm::{
    ChatRequest, ChatResponse, Choice, LLMError, LLMProvider, ResponseMessage, Usage,
};
use crate::ui::{Notice, OutputSurface, ProgressGuard};

/// A one-choice assistant completion.
pub fn completion(
    model: &str,
    content: &str,
    prompt_tokens: u32,
    completion_tokens: u32,
) -> ChatResponse {
    ChatResponse {
        id: "resp-1".to_string(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content: Some(content.to_string()),
            },
            finish_reason: Some("stop".to_string()),
        }],
        usage: Some(Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cost: None,
        }),
    }
}

// ============================================================================
// Provider
// ============================================================================

pub enum StubBehavior {
    Respond(ChatResponse),
    Fail { status: u16, message: String },
    /// Never completes.
    Hang,
}

pub struct StubProvider {
    behavior: StubBehavior,
    requests: Mutex<Vec<ChatRequest>>,
}

impl StubProvider {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMProvider for StubProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        self.requests.lock().unwrap().push(request);
        match &self.behavior {
            StubBehavior::Respond(response) => Ok(response.clone()),
            StubBehavior::Fail { status, message } => Err(LLMError::Api {
                status: *status,
                message: message.clone(),
            }),
            StubBehavior::Hang => std::future::pending().await,
        }
    }
}

/// HTTP client that ignores proxy settings from the environment.
pub fn local_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Serve exactly one HTTP request on localhost.
///
/// The reply carries `status` (e.g. `"429 Too Many Requests"`), the extra
/// `headers` and a JSON `body`. Returns the base URL and a handle resolving to
/// the request head, header names lowercased.
pub async fn serve_once(
    status: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let mut response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    response.push_str(body);

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        // Read the whole request so the client never sees a reset.
        let head_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before request head");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
        let content_length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < head_end + content_length {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
        head
    });

    (base_url, server)
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Default)]
pub struct RecordingLedger {
    /// Updates fail once this many have succeeded.
    fail_updates_after: Option<usize>,
    fail_saves: bool,
    updates: Mutex<Vec<(String, String)>>,
    saves: Mutex<usize>,
}

impl RecordingLedger {
    pub fn failing_updates() -> Self {
        Self::failing_updates_after(0)
    }

    /// The first `successes` updates succeed, later ones fail.
    pub fn failing_updates_after(successes: usize) -> Self {
        Self {
            fail_updates_after: Some(successes),
            ..Self::default()
        }
    }

    pub fn failing_saves() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    /// `(user, model)` for every update attempt, failed ones included.
    pub fn updates(&self) -> Vec<(String, String)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap()
    }
}

#[async_trait]
impl BudgetLedger for RecordingLedger {
    fn update_cost(&self, user: &str, completion: &ChatResponse) -> Result<f64, BudgetError> {
        let mut updates = self.updates.lock().unwrap();
        let attempt = updates.len();
        updates.push((user.to_string(), completion.model.clone()));
        if self.fail_updates_after.is_some_and(|successes| attempt >= successes) {
            return Err(BudgetError::UnknownModel(completion.model.clone()));
        }
        Ok(0.0)
    }

    fn current_cost(&self, _user: &str) -> f64 {
        0.0
    }

    async fn save(&self) -> Result<(), BudgetError> {
        *self.saves.lock().unwrap() += 1;
        if self.fail_saves {
            return Err(BudgetError::file_io(
                std::path::Path::new("budget.json"),
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Surface
// ============================================================================

#[derive(Default)]
pub struct RecordingSurface {
    notices: Mutex<Vec<Notice>>,
    bars: Mutex<Vec<ProgressBar>>,
}

impl RecordingSurface {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn all_progress_closed(&self) -> bool {
        self.bars.lock().unwrap().iter().all(ProgressBar::is_finished)
    }

    /// Final message of every progress indicator that was started.
    pub fn progress_messages(&self) -> Vec<String> {
        self.bars
            .lock()
            .unwrap()
            .iter()
            .map(|bar| bar.message())
            .collect()
    }
}

impl OutputSurface for RecordingSurface {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }

    fn progress(&self, message: &str) -> ProgressGuard {
        let guard = ProgressGuard::hidden();
        let handle = guard.handle();
        handle.set_message(message.to_string());
        self.bars.lock().unwrap().push(handle);
        guard
    }
}

// ============================================================================
// Credentials
// ============================================================================

pub struct StaticCredentials(Result<String, CredentialError>);

impl StaticCredentials {
    pub fn key(key: &str) -> Self {
        Self(Ok(key.to_string()))
    }

    pub fn missing(error: CredentialError) -> Self {
        Self(Err(error))
    }
}

impl CredentialResolver for StaticCredentials {
    fn api_key(&self, _config: &Config) -> Result<String, CredentialError> {
        self.0.clone()
    }
}
