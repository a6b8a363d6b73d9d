//! Built-in scope catalogs.
//!
//! The three fixed scopes (`builtin`, `admin`, `root`) ship as in-code
//! catalog data; their handlers live with the engine and are registered
//! against these definitions at boot.

use serde_json::json;

use crate::catalog::{CommandDef, ParameterDef, ScopeDef, SettingDef, Syntax};

/// Commands any user may invoke.
pub fn builtin_scope() -> ScopeDef {
    ScopeDef {
        settings: vec![],
        commands: vec![
            CommandDef::new("ping", "Check that the bot is alive")
                .with_syntax(Syntax::new(&["*"], vec![])),
            CommandDef::new("help", "List available commands")
                .non_interactive()
                .with_syntax(Syntax::new(
                    &["*"],
                    vec![ParameterDef::optional(
                        "service",
                        "Service",
                        "Service to show detailed help for",
                    )],
                )),
        ],
    }
}

/// Per-chat administration commands.
pub fn admin_scope() -> ScopeDef {
    ScopeDef {
        settings: vec![
            SettingDef {
                name: "botEnabled".into(),
                description: "Whether the bot responds in this chat".into(),
                default: json!(true),
            },
            SettingDef {
                name: "replyOnParsingError".into(),
                description: "Whether argument parse failures produce a reply".into(),
                default: json!(false),
            },
        ],
        commands: vec![
            CommandDef::new("bot", "Enable or disable the bot in this chat").with_syntax(
                Syntax::new(
                    &["*"],
                    vec![ParameterDef::required("state", "bool", "Desired state")],
                ),
            ),
            CommandDef::new(
                "argsonly",
                "Bind bare messages to a service command, or turn the binding off",
            )
            .non_interactive()
            .with_syntax(Syntax::new(
                &["*"],
                vec![
                    ParameterDef::required("service", "word", "Service id, or off"),
                    ParameterDef::optional("command", "Command", "Command to bind"),
                ],
            )),
            CommandDef::new("block", "Add a user to this group's blacklist").with_syntax(
                Syntax::new(
                    &["*"],
                    vec![
                        ParameterDef::required("user", "UserId", "User to block"),
                        ParameterDef::optional("service", "word", "Service to block, or *"),
                        ParameterDef::optional("command", "word", "Command to block, or *"),
                    ],
                ),
            ),
            CommandDef::new("unblock", "Remove a user from this group's blacklist").with_syntax(
                Syntax::new(
                    &["*"],
                    vec![ParameterDef::required("user", "UserId", "User to unblock")],
                ),
            ),
            CommandDef::new("role", "Add or remove users from a service role").with_syntax(
                Syntax::new(
                    &["*"],
                    vec![
                        ParameterDef::required("action", "word", "add or remove"),
                        ParameterDef::required("service", "Service", "Service id"),
                        ParameterDef::required("role", "Role", "Role name"),
                        ParameterDef::required("users", "UserId", "Users").list(),
                    ],
                ),
            ),
            CommandDef::new("setting", "Change a service setting in this chat").with_syntax(
                Syntax::new(
                    &["*"],
                    vec![
                        ParameterDef::required("service", "Service", "Service id"),
                        ParameterDef::required("setting", "Setting", "Setting name"),
                        ParameterDef::required("value", "string", "New value"),
                    ],
                ),
            ),
        ],
    }
}

/// Global operator commands.
pub fn root_scope() -> ScopeDef {
    ScopeDef {
        settings: vec![SettingDef {
            name: "botEnabled".into(),
            description: "Whether the bot responds anywhere".into(),
            default: json!(true),
        }],
        commands: vec![
            CommandDef::new("install", "Install a service into this chat").with_syntax(
                Syntax::new(
                    &["*"],
                    vec![ParameterDef::required("service", "Service", "Service id")],
                ),
            ),
            CommandDef::new("uninstall", "Remove a service from this chat").with_syntax(
                Syntax::new(
                    &["*"],
                    vec![ParameterDef::required("service", "Service", "Service id")],
                ),
            ),
            CommandDef::new("blacklist", "Add a user to the global blacklist")
                .non_interactive()
                .with_syntax(Syntax::new(
                    &["*"],
                    vec![
                        ParameterDef::required("user", "UserId", "User to blacklist"),
                        ParameterDef::optional("group", "word", "Group to scope to, or *"),
                        ParameterDef::optional("service", "word", "Service to scope to, or *"),
                        ParameterDef::optional("command", "word", "Command to scope to, or *"),
                    ],
                )),
            CommandDef::new("unblacklist", "Remove a user from the global blacklist").with_syntax(
                Syntax::new(
                    &["*"],
                    vec![ParameterDef::required("user", "UserId", "User to clear")],
                ),
            ),
            CommandDef::new("bot", "Enable or disable the bot globally").with_syntax(Syntax::new(
                &["*"],
                vec![ParameterDef::required("state", "bool", "Desired state")],
            )),
            CommandDef::new("root-add", "Grant root to a user").with_syntax(Syntax::new(
                &["*"],
                vec![ParameterDef::required("user", "UserId", "User to promote")],
            )),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_scope_declares_ping_and_help() {
        let scope = builtin_scope();
        let names: Vec<&str> = scope.commands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["ping", "help"]);
        assert!(scope.command("ping").unwrap().syntaxes[0].params.is_empty());
        assert!(!scope.command("help").unwrap().interactive);
    }

    #[test]
    fn admin_scope_syntaxes_are_wildcard_gated() {
        let scope = admin_scope();
        for command in &scope.commands {
            for syntax in &command.syntaxes {
                assert_eq!(
                    syntax.allowed_roles,
                    ["*".to_string()],
                    "admin command {} must be wildcard-gated (scope rule applies)",
                    command.name
                );
            }
        }
    }

    #[test]
    fn root_scope_declares_install() {
        let scope = root_scope();
        let install = scope.command("install").unwrap();
        assert_eq!(install.syntaxes[0].params[0].kind, "Service");
    }

    #[test]
    fn role_command_takes_a_user_list() {
        let scope = admin_scope();
        let role = scope.command("role").unwrap();
        let users = role.syntaxes[0].params.last().unwrap();
        assert!(users.is_list);
        assert_eq!(users.kind, "UserId");
    }
}
