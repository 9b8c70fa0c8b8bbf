//! Interactive chat session.
//!
//! Reading a line blocks on the terminal, so it runs under `block_in_place`.
//! While a request is in flight a Ctrl+C watcher cancels it; at the prompt
//! Ctrl+C or Ctrl+D ends the session.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use reedline::{DefaultPrompt, DefaultPromptSegment, Reedline, Signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use chatllm::budget::{BudgetLedger, FileBudgetLedger};
use chatllm::chat::{ChatMediator, ConversationTurn, InteractionContext};
use chatllm::config::Config;
use chatllm::ui::{Notice, OutputSurface, TerminalSurface};

const HELP: &str = "\
Commands:
  /help          Show this help
  /clear         Forget the conversation so far
  /cost          Show spend and remaining budget
  /exit, /quit   Leave the session
Ctrl+C cancels a pending request. Ctrl+C or Ctrl+D at the prompt exits.";

/// A conversation bound to one config, ledger and terminal.
pub struct Session {
    config: Config,
    mediator: ChatMediator,
    ledger: Arc<FileBudgetLedger>,
    surface: Arc<TerminalSurface>,
    /// Turns a cleared session starts from.
    seed: Vec<ConversationTurn>,
    history: Vec<ConversationTurn>,
}

impl Session {
    pub fn new(
        config: Config,
        mediator: ChatMediator,
        ledger: Arc<FileBudgetLedger>,
        surface: Arc<TerminalSurface>,
        seed: Vec<ConversationTurn>,
    ) -> Self {
        Self {
            config,
            mediator,
            ledger,
            surface,
            history: seed.clone(),
            seed,
        }
    }

    /// Send one user turn and print the answer.
    ///
    /// The turn and the answer are kept in history only when the call
    /// produced an answer.
    pub async fn send(&mut self, prompt: &str, cancel: CancellationToken) -> Option<String> {
        let user = self.config.budget_user.clone();
        let spent_before = self.ledger.current_cost(&user);

        self.history.push(ConversationTurn::user(prompt));
        let ctx = InteractionContext::new(self.config.show_spinner).with_cancel(cancel);
        let Some((content, _response)) =
            self.mediator.converse(&self.config, &self.history, &ctx).await
        else {
            self.history.pop();
            return None;
        };
        self.history.push(ConversationTurn::assistant(content.clone()));

        let spent_after = self.ledger.current_cost(&user);
        let printed = self
            .surface
            .print_response(&content)
            .and_then(|()| self.surface.print_cost(spent_after - spent_before, spent_after));
        if let Err(e) = printed {
            tracing::warn!(error = %e, "Failed to write answer to terminal");
        }

        if self.ledger.is_over_budget(&user) {
            self.surface.notify(Notice::warning(format!(
                "User '{user}' has used up the budget (${spent_after:.4} spent)."
            )));
        }
        Some(content)
    }

    /// Like [`Session::send`], with Ctrl+C cancelling the request.
    pub async fn send_interruptible(&mut self, prompt: &str) -> Option<String> {
        let watch = InterruptWatch::ctrl_c();
        self.send(prompt, watch.token()).await
    }

    /// Persist the ledger before exit.
    pub async fn shutdown(&self) {
        if let Err(e) = self.ledger.save().await {
            tracing::warn!(path = %self.ledger.path().display(), error = %e, "Failed to save budget ledger");
            self.surface
                .notify(Notice::error(format!("Budget update error: {e}")));
        }
    }

    /// Run the read-eval-print loop until the user leaves.
    pub async fn run(&mut self) -> Result<()> {
        let mut editor = Reedline::create();
        let prompt = DefaultPrompt::new(
            DefaultPromptSegment::Basic(format!("{}:{}", self.config.provider, self.config.model)),
            DefaultPromptSegment::Empty,
        );

        self.surface
            .print_line("Type a message, /help for commands, Ctrl+D to exit.")?;

        loop {
            let signal = tokio::task::block_in_place(|| editor.read_line(&prompt))?;
            let Signal::Success(line) = signal else {
                break;
            };
            let input = line.trim();
            if input.is_empty() {
                continue;
            }

            if input.starts_with('/') {
                if self.command(input)? == Flow::Exit {
                    break;
                }
                continue;
            }

            self.send_interruptible(input).await;
        }

        self.surface.print_line("Goodbye!")?;
        Ok(())
    }

    fn command(&mut self, input: &str) -> Result<Flow> {
        let name = input.split_whitespace().next().unwrap_or(input);
        debug!(command = name, "Slash command");
        match name {
            "/exit" | "/quit" => return Ok(Flow::Exit),
            "/help" => self.surface.print_line(HELP)?,
            "/clear" => {
                self.history = self.seed.clone();
                self.surface.print_line("Conversation cleared.")?;
            }
            "/cost" => self.surface.print_line(&budget_summary(
                &self.ledger,
                &self.config.budget_user,
            ))?,
            other => self
                .surface
                .notify(Notice::warning(format!("Unknown command: {other} (try /help)"))),
        }
        Ok(Flow::Continue)
    }
}

/// Cancels a token when an interrupt arrives, for as long as it is alive.
pub struct InterruptWatch {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl InterruptWatch {
    pub fn ctrl_c() -> Self {
        Self::on(tokio::signal::ctrl_c())
    }

    /// Watch `interrupt`; an `Err` from it never cancels.
    pub fn on<F>(interrupt: F) -> Self
    where
        F: Future<Output = std::io::Result<()>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if interrupt.await.is_ok() {
                    debug!("Interrupt received, cancelling request");
                    cancel.cancel();
                }
            }
        });
        Self { cancel, task }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for InterruptWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// Spend line for `user`, with the remaining budget when a cap is set.
pub fn budget_summary(ledger: &FileBudgetLedger, user: &str) -> String {
    let spent = ledger.current_cost(user);
    match ledger.remaining(user) {
        Some(left) => format!("{user}: spent ${spent:.4}, remaining ${left:.4}"),
        None => format!("{user}: spent ${spent:.4}, no budget cap"),
    }
}
