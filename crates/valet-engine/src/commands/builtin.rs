//! Builtin command handlers.

use valet_schema::help;

use crate::context::{ExecCtx, HandlerFuture, Reply};

/// `.ping`
pub fn ping(_ctx: ExecCtx) -> HandlerFuture {
    Box::pin(async move { Ok(Reply::text("Pong")) })
}

/// `.help [service]`
pub fn help(ctx: ExecCtx) -> HandlerFuture {
    Box::pin(async move {
        if let Some(service) = ctx.str_arg("service") {
            return Ok(match ctx.loader.get(service) {
                Some(def) => Reply::text(help::render_service(&ctx.prefix, def)),
                None => Reply::error(format!("Unknown service: {service}")),
            });
        }

        let installed: Vec<String> = ctx
            .state
            .read(|s| {
                s.chats
                    .get(ctx.chat_id.as_str())
                    .map(|chat| chat.services.keys().cloned().collect())
                    .unwrap_or_default()
            })
            .await;
        let defs: Vec<_> = installed
            .iter()
            .filter_map(|id| ctx.loader.get(id))
            .collect();
        Ok(Reply::text(help::render_overview(
            &ctx.prefix,
            ctx.loader.builtin(),
            &defs,
        )))
    })
}
