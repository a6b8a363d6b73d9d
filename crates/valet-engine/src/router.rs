//! The message router: sequences the pipeline and emits replies.
//!
//! Per inbound message, under the chat's lock: write a pending audit
//! record, feed a live session first (a message typed during a prompt is
//! never re-parsed as a command), otherwise parse, authorize, re-bind
//! against the selected syntax, open an interactive session or dispatch
//! the handler, then send the reply and append the terminal audit
//! record. Group membership events keep the role lists in step with the
//! upstream group.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use valet_gateway::Gateway;
use valet_ledger::{AuditLog, AuditRecord};
use valet_schema::catalog::Scope;
use valet_schema::help::HELP_HINT;
use valet_types::{
    ChatId, InboundEvent, MessagePayload, ParticipantsPayload, UserId, ValetConfig, ValetError,
};

use crate::context::{ExecCtx, Loader, Reply};
use crate::parser::{ChatContext, CommandParser, ParsedCommand};
use crate::permission;
use crate::session::{SessionManager, SessionOutcome};
use crate::state::StateManager;
use crate::typeparse::ArgMap;

/// User-facing text for a caught handler failure.
const HANDLER_ERROR_REPLY: &str = "An error occurred while processing your command";

/// What the router did with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventOutcome {
    /// Whether the event was processed (self-messages and unknown event
    /// kinds are acknowledged un-handled).
    pub handled: bool,
    /// The reply text sent, if any.
    pub reply: Option<String>,
    /// False when a handler failed or the outbound send did.
    pub success: bool,
}

impl EventOutcome {
    fn unhandled() -> Self {
        Self {
            handled: false,
            reply: None,
            success: true,
        }
    }
}

/// The orchestrator. Holds the only reference to the outbound gateway.
pub struct Router {
    config: ValetConfig,
    parser: CommandParser,
    loader: Arc<Loader>,
    state: Arc<StateManager>,
    sessions: SessionManager,
    gateway: Arc<dyn Gateway>,
    audit: Mutex<AuditLog>,
}

impl Router {
    /// Assemble the pipeline. The invocation-prefix pattern persisted in
    /// root settings takes precedence over the configured one.
    pub async fn new(
        config: ValetConfig,
        loader: Arc<Loader>,
        state: Arc<StateManager>,
        gateway: Arc<dyn Gateway>,
    ) -> Result<Self, ValetError> {
        config.validate()?;
        let pattern = state
            .read(|s| s.root.settings.invoke_prefix_pattern.clone())
            .await
            .or_else(|| config.invoke_prefix_pattern.clone());
        let parser = CommandParser::new(
            &config.command_prefix,
            &config.root_prefix,
            &config.admin_prefix,
            pattern.as_deref(),
        )?;
        let audit = Mutex::new(AuditLog::open(&config.audit_path)?);
        let sessions = SessionManager::new(state.clone(), config.session_timeout_secs);
        Ok(Self {
            config,
            parser,
            loader,
            state,
            sessions,
            gateway,
            audit,
        })
    }

    /// Process one inbound event.
    pub async fn handle_event(&self, event: InboundEvent) -> Result<EventOutcome, ValetError> {
        match event {
            InboundEvent::Message { device_id, payload } => {
                if payload.from == device_id || payload.from == self.config.device_id {
                    debug!(message = %payload.id, "self-message skipped");
                    return Ok(EventOutcome::unhandled());
                }
                self.handle_message(payload).await
            }
            InboundEvent::GroupParticipants { payload, .. } => {
                self.handle_participants(payload).await
            }
            InboundEvent::Other => Ok(EventOutcome::unhandled()),
        }
    }

    /// Apply a group membership change to the chat's installed services.
    async fn handle_participants(
        &self,
        payload: ParticipantsPayload,
    ) -> Result<EventOutcome, ValetError> {
        let chat_id = ChatId::new(payload.chat_id.as_str());
        let lock = self.state.chat_lock(&chat_id);
        let _guard = lock.lock().await;

        let jids: Vec<UserId> = payload.jids.iter().map(|j| UserId::new(j.as_str())).collect();
        self.state
            .apply_participants(&chat_id, payload.change, &jids)
            .await?;
        debug!(chat = %chat_id, change = ?payload.change, users = jids.len(), "participants applied");
        Ok(EventOutcome {
            handled: true,
            reply: None,
            success: true,
        })
    }

    /// The message pipeline.
    async fn handle_message(&self, payload: MessagePayload) -> Result<EventOutcome, ValetError> {
        let chat_id = ChatId::new(payload.chat_id.as_str());
        let user_id = UserId::new(payload.from.as_str());

        // One lock per chat: messages of the same chat are processed in
        // arrival order, different chats proceed concurrently.
        let lock = self.state.chat_lock(&chat_id);
        let _guard = lock.lock().await;

        self.state.ensure_chat(&chat_id).await?;
        self.state
            .set_display_name(&chat_id, &user_id, &payload.from_name)
            .await?;

        let audit = AuditRecord::pending(user_id.as_str(), chat_id.as_str(), &payload.body);
        self.append_audit(&audit).await;

        // A live prompt consumes the message before any parsing.
        if let Some(outcome) = self
            .sessions
            .advance(&chat_id, &user_id, &payload.body, &self.loader)
            .await?
        {
            return match outcome {
                SessionOutcome::Cancelled => {
                    self.finish(audit, Some("Cancelled.".into()), None, &chat_id, &payload.id)
                        .await
                }
                SessionOutcome::Prompt(prompt) => {
                    self.finish(audit, Some(prompt), None, &chat_id, &payload.id).await
                }
                SessionOutcome::Complete(session) => {
                    let mut replies = Vec::new();
                    let mut errors = Vec::new();
                    self.run_handler(
                        &session.scope,
                        &session.command,
                        session.args.clone(),
                        session.user_roles.clone(),
                        &chat_id,
                        &user_id,
                        &payload,
                        &mut replies,
                        &mut errors,
                    )
                    .await;
                    let reply = (!replies.is_empty()).then(|| replies.join("\n"));
                    let error = (!errors.is_empty()).then(|| errors.join("\n"));
                    self.finish(audit, reply, error, &chat_id, &payload.id).await
                }
            };
        }

        // Parse.
        let (view, reply_on_parse_error) = self
            .state
            .read(|s| {
                let chat = s.chats.get(chat_id.as_str());
                let view = ChatContext {
                    installed_services: chat
                        .map(|c| c.services.keys().cloned().collect())
                        .unwrap_or_default(),
                    disable_service_prefix: chat
                        .and_then(|c| c.admin_settings.disable_service_prefix.clone()),
                    args_only: chat.and_then(|c| {
                        c.admin_settings
                            .args_only_command
                            .as_ref()
                            .map(|t| (t.service.clone(), t.command.clone()))
                    }),
                };
                let reply_on_parse_error = chat
                    .map(|c| c.admin_settings.reply_on_parsing_error)
                    .unwrap_or(false);
                (view, reply_on_parse_error)
            })
            .await;

        let result = self.parser.parse(&payload.body, &view, &self.loader);
        if result.commands.is_empty() {
            if let Some(name) = result.unknown.first() {
                let reply = format!("Unknown command: {name}\n{HELP_HINT}");
                return self.finish(audit, Some(reply), None, &chat_id, &payload.id).await;
            }
            return self.finish(audit, None, None, &chat_id, &payload.id).await;
        }

        let audit = audit.with_parsed(serde_json::Value::Array(
            result.commands.iter().map(ParsedCommand::summary).collect(),
        ));

        // Authorize and re-bind every command first: which syntax applies
        // (and therefore which parameters are missing) depends on the
        // caller's roles, so interactivity can only be judged afterwards.
        let mut planned: Vec<(ParsedCommand, Result<permission::Grant, permission::Denial>)> =
            Vec::new();
        let mut one_cmd_services: BTreeSet<String> = BTreeSet::new();

        for mut command in result.commands {
            // Services may restrict execution to their first command per
            // message.
            if let Scope::Service(id) = &command.scope {
                let one_per_msg = self
                    .loader
                    .get(id)
                    .map(|def| def.one_cmd_per_msg)
                    .unwrap_or(false);
                if one_per_msg && !one_cmd_services.insert(id.clone()) {
                    continue;
                }
            }

            let auth = self
                .state
                .read(|s| permission::authorize(s, &self.loader, &command, &chat_id, &user_id))
                .await;
            if let Ok(grant) = &auth {
                if grant.syntax_index != command.syntax_index {
                    self.parser.rebind(&mut command, grant.syntax_index, &self.loader);
                }
            }
            planned.push((command, auth));
        }

        // Only one command per message may open a prompt.
        let prompt_candidates = planned
            .iter()
            .filter(|(command, auth)| auth.is_ok() && self.would_prompt(command))
            .count();
        if prompt_candidates > 1 {
            let reply = "Only one interactive command per message.".to_string();
            return self.finish(audit, Some(reply), None, &chat_id, &payload.id).await;
        }

        let mut replies: Vec<String> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        for (command, auth) in planned {
            let grant = match auth {
                Ok(grant) => grant,
                Err(denial) => {
                    if !denial.silent {
                        replies.push(denial.reason);
                    }
                    continue;
                }
            };

            if !command.errors.is_empty() {
                // Args-only mismatches stay silent unless the chat opted in.
                if reply_on_parse_error || !command.args_only {
                    replies.push(command.errors.join("\n"));
                }
                continue;
            }

            if !command.missing.is_empty() {
                let interactive = self
                    .loader
                    .command(&command.scope, &command.command)
                    .map(|def| def.interactive)
                    .unwrap_or(false);
                if interactive && command.raw_args.is_empty() {
                    let prompt = self
                        .sessions
                        .open(&chat_id, &user_id, &command, grant.effective_roles, &self.loader)
                        .await?;
                    replies.push(format!("_Reply \"cancel\" to abort._\n\n{prompt}"));
                } else if reply_on_parse_error || !command.args_only {
                    replies.push(format!(
                        "Missing required parameter: {}",
                        command.missing.join(", ")
                    ));
                }
                continue;
            }

            self.run_handler(
                &command.scope,
                &command.command,
                command.args,
                grant.effective_roles,
                &chat_id,
                &user_id,
                &payload,
                &mut replies,
                &mut errors,
            )
            .await;
        }

        let reply = (!replies.is_empty()).then(|| replies.join("\n"));
        let error = (!errors.is_empty()).then(|| errors.join("\n"));
        self.finish(audit, reply, error, &chat_id, &payload.id).await
    }

    /// Whether a command, as bound against its permission-selected
    /// syntax, will open a prompt. Commands with binding errors never
    /// reach the prompt branch.
    fn would_prompt(&self, command: &ParsedCommand) -> bool {
        if !command.errors.is_empty() {
            return false;
        }
        if command.missing.is_empty() || !command.raw_args.is_empty() {
            return false;
        }
        self.loader
            .command(&command.scope, &command.command)
            .map(|def| def.interactive)
            .unwrap_or(false)
    }

    /// Invoke a handler; failures are caught, audited in full, and
    /// surfaced to the user as a generic error.
    #[allow(clippy::too_many_arguments)]
    async fn run_handler(
        &self,
        scope: &Scope,
        command: &str,
        args: ArgMap,
        user_roles: Vec<String>,
        chat_id: &ChatId,
        user_id: &UserId,
        payload: &MessagePayload,
        replies: &mut Vec<String>,
        errors: &mut Vec<String>,
    ) {
        let Some(handler) = self.loader.handler(scope, command).copied() else {
            errors.push(format!("no handler for {scope}.{command}"));
            replies.push(HANDLER_ERROR_REPLY.into());
            return;
        };

        let ctx = ExecCtx {
            args,
            chat_id: chat_id.clone(),
            user_id: user_id.clone(),
            user_name: payload.from_name.clone(),
            is_group: chat_id.is_group(),
            message_id: payload.id.clone(),
            replied_to_id: payload.replied_to_id.clone(),
            quoted_body: payload.quoted_body.clone(),
            user_roles,
            scope: scope.clone(),
            command: command.to_string(),
            prefix: self.config.command_prefix.clone(),
            state: self.state.clone(),
            loader: self.loader.clone(),
            gateway: self.gateway.clone(),
        };

        match handler(ctx).await {
            Ok(Reply::Text(text)) => replies.push(text),
            Ok(Reply::Error(text)) => replies.push(text),
            Ok(Reply::None) => {}
            Err(e) => {
                warn!(command, %e, "handler failed");
                errors.push(format!("{scope}.{command}: {e}"));
                replies.push(HANDLER_ERROR_REPLY.into());
            }
        }
    }

    /// Send the reply (if any) and append the terminal audit record.
    async fn finish(
        &self,
        audit: AuditRecord,
        reply: Option<String>,
        error: Option<String>,
        chat_id: &ChatId,
        message_id: &str,
    ) -> Result<EventOutcome, ValetError> {
        if let Some(text) = &reply {
            if let Err(e) = self.gateway.send_reply(chat_id.as_str(), text, message_id).await {
                // No retry; upstream may redeliver.
                warn!(chat = %chat_id, error = %e, "outbound send failed");
                self.append_audit(&audit.failed(format!("outbound send failed: {e}")))
                    .await;
                return Ok(EventOutcome {
                    handled: true,
                    reply,
                    success: false,
                });
            }
        }

        let success = error.is_none();
        let record = match error {
            Some(detail) => audit.failed(detail),
            None => audit.succeeded(reply.clone()),
        };
        self.append_audit(&record).await;
        Ok(EventOutcome {
            handled: true,
            reply,
            success,
        })
    }

    /// Append to the audit log; a failing sink never kills the pipeline.
    async fn append_audit(&self, record: &AuditRecord) {
        if let Err(e) = self.audit.lock().await.append(record) {
            warn!(%e, "audit append failed");
        }
    }
}
