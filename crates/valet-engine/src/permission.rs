//! Authorization: who may run what, and with which syntax.
//!
//! The layered model: global and per-chat kill switches, then the
//! global and group blacklists, then the per-scope rule (builtin is
//! open, root requires the root set, admin requires holding an `admin`
//! service role, services must be installed and enabled), and finally
//! deterministic first-match syntax selection. Denials carry one
//! human-readable line; infrastructure denials (disabled bot,
//! blacklists) stay silent.

use std::collections::BTreeSet;

use tracing::warn;

use valet_schema::catalog::{CommandDef, Scope};
use valet_types::{ChatId, UserId};

use crate::context::Loader;
use crate::parser::ParsedCommand;
use crate::state::{BlacklistEntry, BotState, ChatType};

/// A successful authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// The caller's effective roles for the command's scope.
    pub effective_roles: Vec<String>,
    /// Index of the selected syntax.
    pub syntax_index: usize,
}

/// A denial with its single-line reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub reason: String,
    /// Silent denials produce no reply (disabled bot, blacklists).
    pub silent: bool,
}

impl Denial {
    fn loud(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            silent: false,
        }
    }

    fn silent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            silent: true,
        }
    }
}

const NO_PERMISSION: &str = "You do not have permission to use this command.";

/// The effective role set of a user in a chat, relative to a service.
///
/// Root users hold `root` and `admin` everywhere. Service roles apply
/// when the service is installed in the chat; a `*` entry in a role's
/// user list grants the role to everyone.
pub fn effective_roles(
    state: &BotState,
    chat_id: &ChatId,
    user_id: &UserId,
    service: Option<&str>,
) -> Vec<String> {
    let mut roles: Vec<String> = Vec::new();
    if state.root.root_users.contains(user_id.as_str()) {
        roles.push("root".into());
        roles.push("admin".into());
    }
    if let Some(service) = service {
        if let Some(instance) = state
            .chats
            .get(chat_id.as_str())
            .and_then(|chat| chat.services.get(service))
        {
            for entry in &instance.roles {
                let holds = entry
                    .users
                    .iter()
                    .any(|u| u == user_id || u.as_str() == "*");
                if holds && !roles.contains(&entry.name) {
                    roles.push(entry.name.clone());
                }
            }
        }
    }
    roles
}

/// Whether one blacklist entry matches an invocation.
fn entry_matches(
    entry: &BlacklistEntry,
    user_id: &UserId,
    chat_id: &ChatId,
    service: Option<&str>,
    command: &str,
) -> bool {
    if &entry.user_id != user_id {
        return false;
    }
    set_matches(&entry.groups, Some(chat_id.as_str()))
        && set_matches(&entry.services, service)
        && set_matches(&entry.commands, Some(command))
}

/// A missing set matches anything; otherwise the set must contain the
/// wildcard or the concrete value.
fn set_matches(set: &Option<BTreeSet<String>>, value: Option<&str>) -> bool {
    match set {
        None => true,
        Some(set) => {
            set.contains("*") || value.is_some_and(|v| set.contains(v))
        }
    }
}

/// Select the lowest-indexed syntax whose allowed roles contain `*` or
/// intersect the user's roles. There is no implicit admin bypass.
pub fn best_matching_syntax(user_roles: &[String], def: &CommandDef) -> Option<usize> {
    (0..def.syntaxes.len()).find(|&index| {
        let allowed = def.syntax_roles(index);
        allowed
            .iter()
            .any(|role| role == "*" || user_roles.contains(role))
    })
}

/// Authorize one parsed command.
pub fn authorize(
    state: &BotState,
    loader: &Loader,
    parsed: &ParsedCommand,
    chat_id: &ChatId,
    user_id: &UserId,
) -> Result<Grant, Denial> {
    let is_root = state.root.root_users.contains(user_id.as_str());
    let chat = state.chats.get(chat_id.as_str());

    // Kill switches. Root users pass so the bot can be switched back on.
    if !is_root {
        if !state.root.settings.bot_enabled {
            return Err(Denial::silent("bot is disabled globally"));
        }
        if let Some(chat) = chat {
            if !chat.admin_settings.bot_enabled {
                return Err(Denial::silent("bot is disabled in this chat"));
            }
        }
    }

    // Blacklists: global first, then the chat's own.
    let service = parsed.scope.service();
    let group_entries = chat.map(|c| c.blacklist.as_slice()).unwrap_or(&[]);
    for entry in state.root.blacklist.iter().chain(group_entries) {
        if entry_matches(entry, user_id, chat_id, service, &parsed.command) {
            warn!(user = %user_id, chat = %chat_id, command = %parsed.command, "blacklisted invocation denied");
            return Err(Denial::silent("user is blacklisted"));
        }
    }

    // Per-scope rule.
    let roles = match &parsed.scope {
        Scope::Builtin => effective_roles(state, chat_id, user_id, None),
        Scope::Root => {
            if !is_root {
                warn!(user = %user_id, command = %parsed.command, "root command denied");
                return Err(Denial::loud(NO_PERMISSION));
            }
            effective_roles(state, chat_id, user_id, None)
        }
        Scope::Admin => {
            if !is_root {
                let is_private = chat
                    .map(|c| c.chat_type == ChatType::Private)
                    .unwrap_or_else(|| chat_id.is_private());
                let holds_service_admin = chat.is_some_and(|c| {
                    c.services.values().any(|instance| {
                        instance.role("admin").is_some_and(|entry| {
                            entry.users.iter().any(|u| u == user_id || u.as_str() == "*")
                        })
                    })
                });
                if is_private || !holds_service_admin {
                    warn!(user = %user_id, command = %parsed.command, "admin command denied");
                    return Err(Denial::loud(NO_PERMISSION));
                }
            }
            effective_roles(state, chat_id, user_id, None)
        }
        Scope::Service(id) => {
            let def = loader
                .get(id)
                .ok_or_else(|| Denial::loud(format!("Unknown service: {id}")))?;
            let instance = chat
                .and_then(|c| c.services.get(id.as_str()))
                .ok_or_else(|| {
                    Denial::loud(format!("Service '{id}' is not installed in this chat."))
                })?;
            if !instance.enabled {
                return Err(Denial::loud(format!("Service '{id}' is disabled in this chat.")));
            }
            let is_private = chat
                .map(|c| c.chat_type == ChatType::Private)
                .unwrap_or_else(|| chat_id.is_private());
            if is_private && !def.allow_in_private_chat {
                return Err(Denial::loud(format!(
                    "Service '{id}' cannot be used in private chats."
                )));
            }
            effective_roles(state, chat_id, user_id, Some(id))
        }
    };

    // Syntax selection.
    let def = loader
        .command(&parsed.scope, &parsed.command)
        .ok_or_else(|| Denial::loud(format!("Unknown command: {}", parsed.command)))?;
    match best_matching_syntax(&roles, def) {
        Some(index) => Ok(Grant {
            effective_roles: roles,
            syntax_index: index,
        }),
        None => {
            warn!(user = %user_id, command = %parsed.command, "no syntax matches caller roles");
            Err(Denial::loud(NO_PERMISSION))
        }
    }
}
