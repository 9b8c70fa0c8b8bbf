//! One normalized request/response cycle per call.
//!
//! `converse` is the error boundary: it never fails, it reports. The flow is
//! 1. Resolve the API key
//! 2. Normalize the history for the configured provider
//! 3. Dispatch, racing the cancellation token, with an optional spinner
//! 4. Map the raw completion (the mapper charges the ledger)
//! 5. Charge the ledger with the raw completion again and persist it
//!
//! Step 5 is best-effort. Its failures are reported and the answer is still
//! returned.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::error::ChatError;
use super::normalize::normalize;
use super::response::{CanonicalResponse, ResponseMapper};
use super::turn::ConversationTurn;
use crate::budget::BudgetLedger;
use crate::config::Config;
use crate::credentials::CredentialResolver;
use crate::llm::{ChatRequest, ChatResponse, LLMProvider, ProviderRegistry};
use crate::ui::{Notice, OutputSurface};

/// Per-call settings coming from the interactive session.
#[derive(Debug, Clone, Default)]
pub struct InteractionContext {
    pub show_spinner: bool,
    /// Cancelling this token aborts an in-flight dispatch.
    pub cancel: CancellationToken,
}

impl InteractionContext {
    pub fn new(show_spinner: bool) -> Self {
        Self {
            show_spinner,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Coordinates providers, the budget ledger and the output surface.
pub struct ChatMediator {
    providers: ProviderRegistry,
    credentials: Arc<dyn CredentialResolver>,
    ledger: Arc<dyn BudgetLedger>,
    surface: Arc<dyn OutputSurface>,
    mapper: ResponseMapper,
}

impl ChatMediator {
    pub fn new(
        providers: ProviderRegistry,
        credentials: Arc<dyn CredentialResolver>,
        ledger: Arc<dyn BudgetLedger>,
        surface: Arc<dyn OutputSurface>,
    ) -> Self {
        let mapper = ResponseMapper::new(ledger.clone(), surface.clone());
        Self {
            providers,
            credentials,
            ledger,
            surface,
            mapper,
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Send `messages` to the configured provider.
    ///
    /// Returns the first choice's text and the canonical response, or `None`
    /// when the call was cancelled, failed (after a notice), or produced no
    /// usable content.
    pub async fn converse(
        &self,
        config: &Config,
        messages: &[ConversationTurn],
        ctx: &InteractionContext,
    ) -> Option<(String, CanonicalResponse)> {
        match self.try_converse(config, messages, ctx).await {
            Ok(result) => result,
            Err(ChatError::Cancelled) => {
                debug!("Chat request cancelled by user");
                None
            }
            Err(e) => {
                error!(
                    provider = %config.provider,
                    model = %config.model,
                    error = %e,
                    "Chat request failed"
                );
                self.surface
                    .notify(Notice::error(format!("An error occurred: {e}")));
                None
            }
        }
    }

    async fn try_converse(
        &self,
        config: &Config,
        messages: &[ConversationTurn],
        ctx: &InteractionContext,
    ) -> Result<Option<(String, CanonicalResponse)>, ChatError> {
        let api_key = self.credentials.api_key(config)?;

        let provider = self
            .providers
            .get(&config.provider)
            .ok_or(ChatError::UnknownProvider(config.provider))?;

        let normalized = normalize(
            messages,
            &config.model,
            api_key,
            provider.capabilities,
            config.unknown_role_policy,
        )?;
        for warning in &normalized.warnings {
            warn!(%warning, "Normalized conversation turn");
        }

        let raw = self
            .dispatch(provider.implementation.as_ref(), normalized.request, ctx)
            .await?;

        let Some((content, response)) = self.mapper.map(&config.budget_user, &raw) else {
            return Ok(None);
        };

        self.settle_ledger(&config.budget_user, &raw).await;

        Ok(Some((content, response)))
    }

    /// Record the raw completion's usage and persist the ledger.
    async fn settle_ledger(&self, user: &str, raw: &ChatResponse) {
        if let Err(e) = self.ledger.update_cost(user, raw) {
            warn!(user, model = %raw.model, error = %e, "Budget update failed");
            self.surface
                .notify(Notice::error(format!("Budget update error: {e}")));
        }

        if let Err(e) = self.ledger.save().await {
            warn!(error = %e, "Failed to persist budget ledger");
            self.surface
                .notify(Notice::error(format!("Budget update error: {e}")));
        }
    }

    /// One provider call. The spinner guard is released on every exit path.
    async fn dispatch(
        &self,
        provider: &dyn LLMProvider,
        request: ChatRequest,
        ctx: &InteractionContext,
    ) -> Result<ChatResponse, ChatError> {
        let progress = ctx
            .show_spinner
            .then(|| self.surface.progress("Waiting for response..."));

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Dispatching chat request"
        );

        let response = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(ChatError::Cancelled),
            result = provider.chat(request) => result?,
        };

        if let Some(progress) = progress {
            progress.finish("Response received!");
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialError;
    use crate::llm::{Message, Provider, ProviderCapabilities, Role};
    use crate::testing::{
        RecordingLedger, RecordingSurface, StaticCredentials, StubBehavior, StubProvider,
        completion,
    };

    struct Harness {
        provider: Arc<StubProvider>,
        ledger: Arc<RecordingLedger>,
        surface: Arc<RecordingSurface>,
        mediator: ChatMediator,
    }

    fn harness_with(
        behavior: StubBehavior,
        ledger: RecordingLedger,
        credentials: StaticCredentials,
    ) -> Harness {
        let provider = Arc::new(StubProvider::new(behavior));
        let ledger = Arc::new(ledger);
        let surface = Arc::new(RecordingSurface::default());

        let mut registry = ProviderRegistry::new();
        registry.register(
            Provider::OpenAI,
            provider.clone(),
            ProviderCapabilities::default(),
        );
        registry.register(
            Provider::Anthropic,
            provider.clone(),
            ProviderCapabilities {
                assistant_prefix: true,
            },
        );

        let mediator = ChatMediator::new(
            registry,
            Arc::new(credentials),
            ledger.clone(),
            surface.clone(),
        );
        Harness {
            provider,
            ledger,
            surface,
            mediator,
        }
    }

    fn harness(behavior: StubBehavior) -> Harness {
        harness_with(
            behavior,
            RecordingLedger::default(),
            StaticCredentials::key("sk-test"),
        )
    }

    fn config(provider: Provider) -> Config {
        Config {
            provider,
            model: "gpt-4o".to_string(),
            budget_user: "alice".to_string(),
            ..Config::default()
        }
    }

    fn ok(content: &str) -> StubBehavior {
        StubBehavior::Respond(completion("gpt-4o", content, 5, 3))
    }

    #[tokio::test]
    async fn happy_path_returns_content_and_persists_ledger() {
        let h = harness(ok("hi"));
        let history = vec![ConversationTurn::user("hello")];

        let (content, response) = h
            .mediator
            .converse(&config(Provider::OpenAI), &history, &InteractionContext::default())
            .await
            .unwrap();

        assert_eq!(content, "hi");
        assert_eq!(response.usage.total_tokens, 8);
        assert_eq!(response.model, "gpt-4o");

        let requests = h.provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].api_key, "sk-test");
        assert_eq!(requests[0].model, "gpt-4o");
        assert_eq!(requests[0].messages, vec![Message::new(Role::User, "hello")]);

        let charge = ("alice".to_string(), "gpt-4o".to_string());
        assert_eq!(h.ledger.updates(), vec![charge.clone(), charge]);
        assert_eq!(h.ledger.saves(), 1);
        assert!(h.surface.notices().is_empty());
    }

    #[tokio::test]
    async fn prefix_folding_follows_provider_capabilities() {
        let h = harness(ok("done"));
        let history = vec![
            ConversationTurn::user("write code"),
            ConversationTurn::assistant("Here:").with_prefix("```rust"),
        ];
        let ctx = InteractionContext::default();

        h.mediator
            .converse(&config(Provider::Anthropic), &history, &ctx)
            .await
            .unwrap();
        h.mediator
            .converse(&config(Provider::OpenAI), &history, &ctx)
            .await
            .unwrap();

        let requests = h.provider.requests();
        assert_eq!(requests[0].messages[1].content, "Here: ```rust");
        assert!(requests[0].messages[1].prefix.is_none());
        assert_eq!(requests[1].messages[1].content, "Here:");
        assert_eq!(requests[1].messages[1].prefix.as_deref(), Some("```rust"));
    }

    #[tokio::test]
    async fn cancellation_is_silent() {
        let h = harness(StubBehavior::Hang);
        let ctx = InteractionContext::new(true);
        ctx.cancel.cancel();

        let result = h
            .mediator
            .converse(&config(Provider::OpenAI), &[ConversationTurn::user("hi")], &ctx)
            .await;

        assert!(result.is_none());
        assert!(h.surface.notices().is_empty());
        assert!(h.ledger.updates().is_empty());
        assert!(h.surface.all_progress_closed());
    }

    #[tokio::test]
    async fn cancellation_during_dispatch() {
        let h = harness(StubBehavior::Hang);
        let ctx = InteractionContext::new(false);
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let result = h
            .mediator
            .converse(&config(Provider::OpenAI), &[ConversationTurn::user("hi")], &ctx)
            .await;

        assert!(result.is_none());
        assert!(h.surface.notices().is_empty());
    }

    #[tokio::test]
    async fn dispatch_failure_reports_once_and_closes_spinner() {
        let h = harness(StubBehavior::Fail {
            status: 401,
            message: "invalid api key".to_string(),
        });

        let result = h
            .mediator
            .converse(
                &config(Provider::OpenAI),
                &[ConversationTurn::user("hi")],
                &InteractionContext::new(true),
            )
            .await;

        assert!(result.is_none());
        let notices = h.surface.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].title, "Error");
        assert!(notices[0].message.starts_with("An error occurred:"));
        assert!(notices[0].message.contains("invalid api key"));
        assert!(h.surface.all_progress_closed());
        assert_eq!(h.ledger.saves(), 0);
    }

    #[tokio::test]
    async fn spinner_finishes_on_success() {
        let h = harness(ok("hi"));

        h.mediator
            .converse(
                &config(Provider::OpenAI),
                &[ConversationTurn::user("hi")],
                &InteractionContext::new(true),
            )
            .await
            .unwrap();

        assert_eq!(h.surface.progress_messages(), vec!["Response received!".to_string()]);
        assert!(h.surface.all_progress_closed());
    }

    #[tokio::test]
    async fn no_spinner_when_disabled() {
        let h = harness(ok("hi"));

        h.mediator
            .converse(
                &config(Provider::OpenAI),
                &[ConversationTurn::user("hi")],
                &InteractionContext::new(false),
            )
            .await
            .unwrap();

        assert!(h.surface.progress_messages().is_empty());
    }

    #[tokio::test]
    async fn missing_credentials_are_reported() {
        let h = harness_with(
            ok("hi"),
            RecordingLedger::default(),
            StaticCredentials::missing(CredentialError {
                provider: Provider::OpenAI,
                env: "OPENAI_API_KEY",
            }),
        );

        let result = h
            .mediator
            .converse(
                &config(Provider::OpenAI),
                &[ConversationTurn::user("hi")],
                &InteractionContext::default(),
            )
            .await;

        assert!(result.is_none());
        assert!(h.provider.requests().is_empty());
        let notices = h.surface.notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].message.contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn unregistered_provider_is_reported() {
        let h = harness(ok("hi"));

        let result = h
            .mediator
            .converse(
                &config(Provider::Groq),
                &[ConversationTurn::user("hi")],
                &InteractionContext::default(),
            )
            .await;

        assert!(result.is_none());
        assert_eq!(h.surface.notices().len(), 1);
        assert!(h.surface.notices()[0].message.contains("groq"));
    }

    #[tokio::test]
    async fn empty_choices_return_none_with_one_notice() {
        let mut raw = completion("gpt-4o", "unused", 5, 3);
        raw.choices.clear();
        let h = harness(StubBehavior::Respond(raw));

        let result = h
            .mediator
            .converse(
                &config(Provider::OpenAI),
                &[ConversationTurn::user("hi")],
                &InteractionContext::default(),
            )
            .await;

        assert!(result.is_none());
        let notices = h.surface.notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].message.starts_with("Unexpected response format"));
        assert_eq!(h.ledger.saves(), 0);
    }

    #[tokio::test]
    async fn ledger_update_failure_keeps_answer() {
        let h = harness_with(
            ok("hi"),
            RecordingLedger::failing_updates(),
            StaticCredentials::key("sk-test"),
        );

        let (content, _) = h
            .mediator
            .converse(
                &config(Provider::OpenAI),
                &[ConversationTurn::user("hi")],
                &InteractionContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(content, "hi");
        // Both the mapping charge and the settling charge were attempted.
        assert_eq!(h.ledger.updates().len(), 2);
        assert_eq!(h.ledger.saves(), 1);
        let notices = h.surface.notices();
        assert_eq!(notices.len(), 2);
        assert!(
            notices
                .iter()
                .all(|n| n.message.starts_with("Budget update error"))
        );
    }

    #[tokio::test]
    async fn settling_update_failure_keeps_answer() {
        let h = harness_with(
            ok("hi"),
            RecordingLedger::failing_updates_after(1),
            StaticCredentials::key("sk-test"),
        );

        let (content, response) = h
            .mediator
            .converse(
                &config(Provider::OpenAI),
                &[ConversationTurn::user("hi")],
                &InteractionContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(content, "hi");
        assert_eq!(response.usage.total_tokens, 8);
        assert_eq!(h.ledger.updates().len(), 2);
        assert_eq!(h.ledger.saves(), 1);
        let notices = h.surface.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].title, "Error");
        assert!(notices[0].message.starts_with("Budget update error"));
    }

    #[tokio::test]
    async fn ledger_save_failure_keeps_answer() {
        let h = harness_with(
            ok("hi"),
            RecordingLedger::failing_saves(),
            StaticCredentials::key("sk-test"),
        );

        let result = h
            .mediator
            .converse(
                &config(Provider::OpenAI),
                &[ConversationTurn::user("hi")],
                &InteractionContext::default(),
            )
            .await;

        assert_eq!(result.map(|(content, _)| content).as_deref(), Some("hi"));
        let notices = h.surface.notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].message.starts_with("Budget update error"));
    }

    #[tokio::test]
    async fn reject_policy_surfaces_malformed_turn() {
        let h = harness(ok("hi"));
        let mut cfg = config(Provider::OpenAI);
        cfg.unknown_role_policy = crate::chat::UnknownRolePolicy::Reject;

        let result = h
            .mediator
            .converse(
                &cfg,
                &[ConversationTurn::new("narrator", "hi")],
                &InteractionContext::default(),
            )
            .await;

        assert!(result.is_none());
        assert!(h.provider.requests().is_empty());
        assert!(h.surface.notices()[0].message.contains("malformed conversation turn"));
    }

    #[tokio::test]
    async fn repeated_calls_are_independent() {
        let h = harness(ok("hi"));
        let history = vec![
            ConversationTurn::assistant("X").with_prefix("Y"),
            ConversationTurn::new("narrator", "z"),
        ];
        let before = history.clone();
        let cfg = config(Provider::Anthropic);
        let ctx = InteractionContext::default();

        let (_, mut first) = h.mediator.converse(&cfg, &history, &ctx).await.unwrap();
        let (_, second) = h.mediator.converse(&cfg, &history, &ctx).await.unwrap();

        assert_eq!(first, second);
        first.choices[0].message.content.push_str(" mutated");
        assert_eq!(second.choices[0].message.content, "hi");
        assert_eq!(history, before);

        let requests = h.provider.requests();
        assert_eq!(requests[0].messages, requests[1].messages);
        assert_eq!(requests[0].messages[0].content, "X Y");
        assert_eq!(requests[0].messages[1].role, Role::User);
    }
}
