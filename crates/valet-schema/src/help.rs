//! Help text rendering.
//!
//! Builds the user-facing command listings from catalog data: a chat
//! overview (builtin commands plus the chat's installed services) and a
//! detailed per-service view. Formatting uses WhatsApp markup: `*bold*`
//! and `_italic_`.

use crate::catalog::{CommandDef, ScopeDef, ServiceDef};

/// Footer appended to unknown-command replies.
pub const HELP_HINT: &str = "_Send .help for the list of commands._";

/// Render the chat overview: every builtin command in declaration order,
/// then one section per installed service.
pub fn render_overview(prefix: &str, builtin: &ScopeDef, services: &[&ServiceDef]) -> String {
    let mut out = String::from("*Commands*\n");
    for command in &builtin.commands {
        out.push_str(&format!(
            "\u{2022} {prefix}{} \u{2014} {}\n",
            command.name, command.description
        ));
    }

    for service in services {
        out.push_str(&format!("\n*{}* ({})\n", service.display_name, service.id));
        for command in &service.commands {
            out.push_str(&format!(
                "\u{2022} {prefix}{} {}{} \u{2014} {}\n",
                service.id,
                command.name,
                signature(command),
                command.description
            ));
        }
    }

    out.trim_end().to_string()
}

/// Render detailed help for one service, including parameter types and
/// descriptions of the first syntax of each command.
pub fn render_service(prefix: &str, service: &ServiceDef) -> String {
    let mut out = format!("*{}*\n{}\n", service.display_name, service.description);
    for command in &service.commands {
        out.push_str(&format!(
            "\n\u{2022} {prefix}{} {}{}\n",
            service.id,
            command.name,
            signature(command)
        ));
        out.push_str(&format!("  {}\n", command.description));
        if let Some(syntax) = command.syntaxes.first() {
            for param in &syntax.params {
                out.push_str(&format!(
                    "  _{}_ ({}){} \u{2014} {}\n",
                    param.name,
                    param.kind,
                    if param.is_required() { "" } else { ", optional" },
                    param.description
                ));
            }
        }
    }
    out.trim_end().to_string()
}

/// Compact parameter signature of a command's first syntax:
/// `<required> [optional] ` (with a trailing space when non-empty).
pub fn signature(command: &CommandDef) -> String {
    let Some(syntax) = command.syntaxes.first() else {
        return String::new();
    };
    let mut out = String::new();
    for param in &syntax.params {
        if param.is_required() {
            out.push_str(&format!("<{}> ", param.name));
        } else {
            out.push_str(&format!("[{}] ", param.name));
        }
    }
    out
}
