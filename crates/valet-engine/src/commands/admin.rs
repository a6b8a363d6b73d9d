//! Admin command handlers: per-chat toggles, args-only binding, the
//! group blacklist, role membership, and service settings.

use valet_types::UserId;

use super::scope_set;
use crate::context::{ExecCtx, HandlerFuture, Reply};
use crate::state::{ArgsOnlyTarget, BlacklistEntry};

/// `.admin bot <on|off>`
pub fn bot(ctx: ExecCtx) -> HandlerFuture {
    Box::pin(async move {
        let enabled = ctx.required_bool("state")?;
        ctx.state
            .update_admin_settings(&ctx.chat_id, |settings| settings.bot_enabled = enabled)
            .await?;
        Ok(Reply::text(if enabled {
            "Bot enabled in this chat."
        } else {
            "Bot disabled in this chat."
        }))
    })
}

/// `.admin argsonly <service> <command>` / `.admin argsonly off`
pub fn argsonly(ctx: ExecCtx) -> HandlerFuture {
    Box::pin(async move {
        let service = ctx.required_str("service")?.to_string();
        if service.eq_ignore_ascii_case("off") {
            ctx.state
                .update_admin_settings(&ctx.chat_id, |settings| {
                    settings.args_only_command = None;
                })
                .await?;
            return Ok(Reply::text("Args-only mode is off."));
        }

        let Some(command) = ctx.str_arg("command").map(str::to_string) else {
            return Ok(Reply::error("A command is required to enable args-only mode."));
        };
        let Some(def) = ctx.loader.get(&service) else {
            return Ok(Reply::error(format!("Unknown service: {service}")));
        };
        let Some(command_def) = def.command(&command) else {
            return Ok(Reply::error(format!(
                "Service '{}' has no command '{command}'.",
                def.id
            )));
        };

        let installed = ctx
            .state
            .read(|s| {
                s.chats
                    .get(ctx.chat_id.as_str())
                    .is_some_and(|chat| chat.services.contains_key(&def.id))
            })
            .await;
        if !installed {
            return Ok(Reply::error(format!(
                "Service '{}' is not installed in this chat.",
                def.id
            )));
        }

        let target = ArgsOnlyTarget {
            service: def.id.clone(),
            command: command_def.name.clone(),
        };
        let summary = format!("Bare messages now run '{} {}'.", target.service, target.command);
        ctx.state
            .update_admin_settings(&ctx.chat_id, |settings| {
                settings.args_only_command = Some(target);
            })
            .await?;
        Ok(Reply::text(summary))
    })
}

/// `.admin block <user> [service] [command]`
pub fn block(ctx: ExecCtx) -> HandlerFuture {
    Box::pin(async move {
        let user = UserId::new(ctx.required_str("user")?);
        let entry = BlacklistEntry {
            user_id: user.clone(),
            groups: None,
            services: scope_set(&ctx, "service"),
            commands: scope_set(&ctx, "command"),
        };
        ctx.state.add_group_blacklist(&ctx.chat_id, entry).await?;
        Ok(Reply::text(format!("Blocked {user}.")))
    })
}

/// `.admin unblock <user>`
pub fn unblock(ctx: ExecCtx) -> HandlerFuture {
    Box::pin(async move {
        let user = UserId::new(ctx.required_str("user")?);
        let removed = ctx.state.remove_group_blacklist(&ctx.chat_id, &user).await?;
        Ok(if removed > 0 {
            Reply::text(format!("Unblocked {user}."))
        } else {
            Reply::text(format!("No blacklist entries for {user}."))
        })
    })
}

/// `.admin role <add|remove> <service> <role> <users>`
pub fn role(ctx: ExecCtx) -> HandlerFuture {
    Box::pin(async move {
        let action = ctx.required_str("action")?.to_ascii_lowercase();
        let service = ctx.required_str("service")?.to_string();
        let role = ctx.required_str("role")?.to_string();
        let users: Vec<UserId> = ctx
            .list_arg("users")
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(UserId::new))
                    .collect()
            })
            .unwrap_or_default();

        if ctx.loader.get(&service).is_none() {
            return Ok(Reply::error(format!("Unknown service: {service}")));
        }

        let mut changed = 0usize;
        for user in &users {
            let result = match action.as_str() {
                "add" => ctx.state.add_user_role(&ctx.chat_id, &service, &role, user).await,
                "remove" => {
                    ctx.state
                        .remove_user_role(&ctx.chat_id, &service, &role, user)
                        .await
                }
                _ => return Ok(Reply::error("Action must be 'add' or 'remove'.")),
            };
            match result {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(_) => {
                    return Ok(Reply::error(format!(
                        "Unknown role '{role}' in service '{service}'."
                    )));
                }
            }
        }

        Ok(Reply::text(match action.as_str() {
            "add" => format!("Added {changed} user(s) to {service}/{role}."),
            _ => format!("Removed {changed} user(s) from {service}/{role}."),
        }))
    })
}

/// `.admin setting <service> <setting> <value>`
pub fn setting(ctx: ExecCtx) -> HandlerFuture {
    Box::pin(async move {
        let service = ctx.required_str("service")?.to_string();
        let name = ctx.required_str("setting")?.to_string();
        let value = ctx.required_str("value")?.to_string();

        let Some(def) = ctx.loader.get(&service) else {
            return Ok(Reply::error(format!("Unknown service: {service}")));
        };
        if def.setting_default(&name).is_none() {
            return Ok(Reply::error(format!(
                "Service '{}' has no setting '{name}'.",
                def.id
            )));
        }

        let stored = ctx
            .state
            .set_service_setting(
                &ctx.chat_id,
                &def.id,
                &name,
                serde_json::Value::String(value),
            )
            .await?;
        Ok(if stored {
            Reply::text(format!("Setting '{name}' updated."))
        } else {
            Reply::error(format!(
                "Service '{}' is not installed in this chat.",
                def.id
            ))
        })
    })
}
