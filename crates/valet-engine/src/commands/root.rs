//! Root command handlers: service installation, the global blacklist,
//! the global kill switch, and root grants.

use tracing::warn;

use valet_gateway::Participant;
use valet_types::UserId;

use super::scope_set;
use crate::context::{ExecCtx, HandlerFuture, Reply};
use crate::state::BlacklistEntry;

/// `.root install <service>`
///
/// Fetches the current group participants and partitions them into the
/// `admin` and `member` roles; every other declared role starts empty.
pub fn install(ctx: ExecCtx) -> HandlerFuture {
    Box::pin(async move {
        let service = ctx.required_str("service")?.to_string();
        let Some(def) = ctx.loader.get(&service) else {
            return Ok(Reply::error(format!("Unknown service: {service}")));
        };
        let def = def.clone();

        let installed = ctx
            .state
            .read(|s| {
                s.chats
                    .get(ctx.chat_id.as_str())
                    .is_some_and(|chat| chat.services.contains_key(&def.id))
            })
            .await;
        if installed {
            return Ok(Reply::error(format!(
                "Service '{}' is already installed in this chat.",
                def.id
            )));
        }

        let participants = if ctx.is_group {
            match ctx.gateway.group_participants(ctx.chat_id.as_str()).await {
                Ok(participants) => participants,
                Err(e) => {
                    warn!(chat = %ctx.chat_id, error = %e, "participant fetch failed");
                    return Ok(Reply::error("Could not fetch group participants."));
                }
            }
        } else {
            // Private chat: the installer is the only participant.
            vec![Participant {
                jid: ctx.user_id.to_string(),
                admin: true,
            }]
        };

        ctx.state
            .install_service(&ctx.chat_id, &def, &participants)
            .await?;
        Ok(Reply::text(format!(
            "Installed {} ({}).",
            def.display_name, def.id
        )))
    })
}

/// `.root uninstall <service>`
pub fn uninstall(ctx: ExecCtx) -> HandlerFuture {
    Box::pin(async move {
        let service = ctx.required_str("service")?.to_string();
        let removed = ctx.state.uninstall_service(&ctx.chat_id, &service).await?;
        Ok(if removed {
            Reply::text(format!("Uninstalled '{service}'."))
        } else {
            Reply::error(format!("Service '{service}' is not installed in this chat."))
        })
    })
}

/// `.root blacklist <user> [group] [service] [command]`
pub fn blacklist(ctx: ExecCtx) -> HandlerFuture {
    Box::pin(async move {
        let user = UserId::new(ctx.required_str("user")?);
        let entry = BlacklistEntry {
            user_id: user.clone(),
            groups: scope_set(&ctx, "group"),
            services: scope_set(&ctx, "service"),
            commands: scope_set(&ctx, "command"),
        };
        ctx.state.add_global_blacklist(entry).await?;
        Ok(Reply::text(format!("Blacklisted {user}.")))
    })
}

/// `.root unblacklist <user>`
pub fn unblacklist(ctx: ExecCtx) -> HandlerFuture {
    Box::pin(async move {
        let user = UserId::new(ctx.required_str("user")?);
        let removed = ctx.state.remove_global_blacklist(&user).await?;
        Ok(if removed > 0 {
            Reply::text(format!("Removed {removed} blacklist entr{} for {user}.",
                if removed == 1 { "y" } else { "ies" }))
        } else {
            Reply::text(format!("No blacklist entries for {user}."))
        })
    })
}

/// `.root bot <on|off>`
pub fn bot(ctx: ExecCtx) -> HandlerFuture {
    Box::pin(async move {
        let enabled = ctx.required_bool("state")?;
        ctx.state.set_bot_enabled(enabled).await?;
        Ok(Reply::text(if enabled {
            "Bot enabled globally."
        } else {
            "Bot disabled globally."
        }))
    })
}

/// `.root root-add <user>`
pub fn root_add(ctx: ExecCtx) -> HandlerFuture {
    Box::pin(async move {
        let user = UserId::new(ctx.required_str("user")?);
        let added = ctx.state.add_root_user(&user).await?;
        Ok(if added {
            Reply::text(format!("Granted root to {user}."))
        } else {
            Reply::text(format!("{user} is already root."))
        })
    })
}
