//! Interactive sessions: multi-turn collection of missing arguments.
//!
//! When a command is invoked with no arguments and required parameters
//! are missing, the router opens a session. Each subsequent message from
//! the same `(chat, user)` is consumed by the session — never re-parsed
//! as a command — until the user cancels, the session expires (5 minutes
//! of inactivity, silently), or every pending parameter is collected.
//! Collected values are re-validated against their parameter definitions
//! before the session completes.
//!
//! Sessions are stored inside the chat state document, so prompts
//! survive restarts; keying them by user id enforces the one-session-
//! per-user-per-chat invariant structurally.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use valet_schema::catalog::{ParameterDef, Scope};
use valet_types::{ChatId, UserId, ValetError};

use crate::context::Loader;
use crate::parser::ParsedCommand;
use crate::state::StateManager;
use crate::typeparse::{self, ArgMap};

/// One live interactive session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub scope: Scope,
    pub command: String,
    pub syntax_index: usize,
    /// Arguments bound so far (initial binding plus collected values).
    pub args: ArgMap,
    /// Parameter names still to collect, in syntax order.
    pub pending: Vec<String>,
    /// Index into `pending` of the parameter currently prompted for.
    pub current: usize,
    /// Roles captured at authorization time; execution reuses them.
    pub user_roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    fn current_param(&self) -> Option<&str> {
        self.pending.get(self.current).map(String::as_str)
    }
}

/// What the session manager did with an input.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The user cancelled; the session is gone.
    Cancelled,
    /// More input is needed; send this prompt.
    Prompt(String),
    /// All parameters collected; execute the carried command.
    Complete(Box<Session>),
}

/// An item in a hook-provided list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookItem {
    pub label: String,
    pub sublabel: Option<String>,
}

impl HookItem {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            sublabel: None,
        }
    }

    pub fn with_sublabel(mut self, sublabel: impl Into<String>) -> Self {
        self.sublabel = Some(sublabel.into());
        self
    }
}

/// Context rendered above a prompt by a service hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookRender {
    /// Free-form context text.
    Message(String),
    /// A numbered list; `empty_message` replaces an empty list.
    List {
        items: Vec<HookItem>,
        empty_message: Option<String>,
    },
    /// Echo of a selection the collected arguments identify.
    Selected(HookItem),
}

/// A service-provided interactive-context producer: receives the
/// partially-collected arguments and the current parameter name.
pub type ContextHook = fn(&ArgMap, &str) -> Option<HookRender>;

/// Render hook output into prompt context text.
fn render_hook(render: HookRender) -> String {
    match render {
        HookRender::Message(text) => text,
        HookRender::List {
            items,
            empty_message,
        } => {
            if items.is_empty() {
                return empty_message.unwrap_or_else(|| "No entries.".into());
            }
            items
                .iter()
                .enumerate()
                .map(|(i, item)| match &item.sublabel {
                    Some(sub) => format!("{}. {} ({sub})", i + 1, item.label),
                    None => format!("{}. {}", i + 1, item.label),
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
        HookRender::Selected(item) => match item.sublabel {
            Some(sub) => format!("> {} ({sub})", item.label),
            None => format!("> {}", item.label),
        },
    }
}

/// Drives the interactive state machine over the persisted sessions.
pub struct SessionManager {
    state: Arc<StateManager>,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(state: Arc<StateManager>, timeout_secs: u64) -> Self {
        Self {
            state,
            timeout: Duration::seconds(timeout_secs as i64),
        }
    }

    /// The live session for `(chat, user)`. An expired session is
    /// deleted silently and reported as absent.
    pub async fn active(&self, chat_id: &ChatId, user_id: &UserId) -> Option<Session> {
        let session = self.state.session(chat_id, user_id).await?;
        if Utc::now() - session.last_activity > self.timeout {
            debug!(chat = %chat_id, user = %user_id, command = %session.command, "session expired");
            let _ = self.state.remove_session(chat_id, user_id).await;
            return None;
        }
        Some(session)
    }

    /// Open a session for a command whose required parameters are
    /// missing. Returns the first prompt.
    ///
    /// Pending parameters are those without a token-bound value or a
    /// declared default; optional ones among them can be skipped.
    pub async fn open(
        &self,
        chat_id: &ChatId,
        user_id: &UserId,
        parsed: &ParsedCommand,
        user_roles: Vec<String>,
        loader: &Loader,
    ) -> Result<String, ValetError> {
        let def = loader
            .command(&parsed.scope, &parsed.command)
            .ok_or_else(|| ValetError::Handler(format!("unknown command {}", parsed.command)))?;
        let syntax = def.syntaxes.get(parsed.syntax_index).ok_or_else(|| {
            ValetError::Handler(format!("syntax {} out of range", parsed.syntax_index))
        })?;

        let mut args = parsed.args.clone();
        let mut pending = Vec::new();
        for param in &syntax.params {
            let unbound = match args.get(&param.name) {
                None => true,
                Some(value) => value.is_null() && param.default.is_none(),
            };
            if unbound && param.default.is_none() {
                args.remove(&param.name);
                pending.push(param.name.clone());
            }
        }

        let now = Utc::now();
        let session = Session {
            scope: parsed.scope.clone(),
            command: parsed.command.clone(),
            syntax_index: parsed.syntax_index,
            args,
            pending,
            current: 0,
            user_roles,
            created_at: now,
            last_activity: now,
        };

        let prompt = self.prompt_for(&session, loader)?;
        debug!(chat = %chat_id, user = %user_id, command = %session.command, pending = session.pending.len(), "session opened");
        self.state.put_session(chat_id, user_id, session).await?;
        Ok(prompt)
    }

    /// Feed one message into the session for `(chat, user)`.
    ///
    /// Returns `None` when there is no live session. `cancel` tears the
    /// session down; `skip` stores `null` for an optional parameter; any
    /// other input is validated against the parameter definition and
    /// either stored or re-prompted.
    pub async fn advance(
        &self,
        chat_id: &ChatId,
        user_id: &UserId,
        input: &str,
        loader: &Loader,
    ) -> Result<Option<SessionOutcome>, ValetError> {
        let Some(mut session) = self.active(chat_id, user_id).await else {
            return Ok(None);
        };

        let input = input.trim();
        if input.eq_ignore_ascii_case("cancel") {
            self.state.remove_session(chat_id, user_id).await?;
            return Ok(Some(SessionOutcome::Cancelled));
        }

        let param = self
            .param_def(&session, loader)?
            .ok_or_else(|| ValetError::Handler("session has no pending parameter".into()))?;

        if input.eq_ignore_ascii_case("skip") {
            if param.optional {
                session
                    .args
                    .insert(param.name.clone(), crate::typeparse::ArgValue::Null);
            } else {
                let prompt = format!(
                    "_This value is required._\n\n{}",
                    self.prompt_for(&session, loader)?
                );
                session.last_activity = Utc::now();
                self.state.put_session(chat_id, user_id, session).await?;
                return Ok(Some(SessionOutcome::Prompt(prompt)));
            }
        } else {
            match typeparse::parse_token(input, &param, loader.types()) {
                Ok(value) => {
                    session.args.insert(param.name.clone(), value);
                }
                Err(reason) => {
                    let prompt =
                        format!("_{reason}_\n\n{}", self.prompt_for(&session, loader)?);
                    session.last_activity = Utc::now();
                    self.state.put_session(chat_id, user_id, session).await?;
                    return Ok(Some(SessionOutcome::Prompt(prompt)));
                }
            }
        }

        session.current += 1;
        session.last_activity = Utc::now();

        if session.current < session.pending.len() {
            let prompt = self.prompt_for(&session, loader)?;
            self.state.put_session(chat_id, user_id, session).await?;
            Ok(Some(SessionOutcome::Prompt(prompt)))
        } else {
            self.state.remove_session(chat_id, user_id).await?;
            Ok(Some(SessionOutcome::Complete(Box::new(session))))
        }
    }

    /// The definition of the currently prompted parameter.
    fn param_def(
        &self,
        session: &Session,
        loader: &Loader,
    ) -> Result<Option<ParameterDef>, ValetError> {
        let Some(name) = session.current_param() else {
            return Ok(None);
        };
        let def = loader
            .command(&session.scope, &session.command)
            .ok_or_else(|| ValetError::Handler(format!("unknown command {}", session.command)))?;
        let syntax = def.syntaxes.get(session.syntax_index).ok_or_else(|| {
            ValetError::Handler(format!("syntax {} out of range", session.syntax_index))
        })?;
        Ok(syntax.params.iter().find(|p| p.name == name).cloned())
    }

    /// The prompt for the session's current parameter: hook context (if
    /// any), a blank line, then `*<description>?* _(<type>)_`, with an
    /// `_or "skip"_` suffix for optional parameters.
    fn prompt_for(&self, session: &Session, loader: &Loader) -> Result<String, ValetError> {
        let param = self
            .param_def(session, loader)?
            .ok_or_else(|| ValetError::Handler("session has no pending parameter".into()))?;

        let mut text = String::new();
        if let Some(hook) = loader.hook(&session.scope, &session.command) {
            if let Some(render) = hook(&session.args, &param.name) {
                text.push_str(&render_hook(render));
                text.push_str("\n\n");
            }
        }
        text.push_str(&format!("*{}?* _({})_", param.description, param.kind));
        if param.optional {
            text.push_str(" _or \"skip\"_");
        }
        Ok(text)
    }
}
