//! Command parsing: from a raw message body to typed, bound commands.
//!
//! A message is split into lines; each prefixed line is tokenized with
//! shell-like quoting rules and dispatched by its first token to the
//! root, admin, builtin, or a service scope. Chats may additionally bind
//! bare (un-prefixed) lines to one designated service command
//! ("args-only mode"). Binding walks the selected syntax's ordered
//! parameter list over the ordered tokens; a trailing `string` parameter
//! is greedy, list parameters consume one comma-list token, and absent
//! parameters fall back to defaults or are recorded as missing.

use std::collections::BTreeMap;

use regex::Regex;

use valet_schema::catalog::{Scope, Syntax, TypeCatalog};
use valet_types::ValetError;

use crate::context::Loader;
use crate::typeparse::{self, ArgValue};

/// The per-chat facts the parser needs for dispatch.
#[derive(Debug, Clone, Default)]
pub struct ChatContext {
    /// Ids of services installed in the chat.
    pub installed_services: Vec<String>,
    /// When set, un-dispatched prefixed lines are treated as commands of
    /// this service.
    pub disable_service_prefix: Option<String>,
    /// When set, bare lines bind to this `(service, command)`.
    pub args_only: Option<(String, String)>,
}

impl ChatContext {
    fn is_installed(&self, service: &str) -> bool {
        self.installed_services
            .iter()
            .any(|s| s.eq_ignore_ascii_case(service))
    }
}

/// One fully dispatched and bound command.
#[derive(Debug, Clone)]
pub struct ParsedCommand {
    pub scope: Scope,
    /// Canonical command name.
    pub command: String,
    /// Argument tokens (after the scope/command words).
    pub tokens: Vec<String>,
    /// The argument portion as text; empty iff no argument tokens.
    pub raw_args: String,
    /// Bound arguments, keyed by parameter name.
    pub args: BTreeMap<String, ArgValue>,
    /// Names of required parameters that did not resolve.
    pub missing: Vec<String>,
    /// Type-binding failures, one message per parameter.
    pub errors: Vec<String>,
    /// Index of the syntax the arguments are currently bound against.
    pub syntax_index: usize,
    /// Whether this command came from args-only mode.
    pub args_only: bool,
}

impl ParsedCommand {
    /// Compact summary for the audit log.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "scope": self.scope.to_string(),
            "command": self.command,
            "syntax": self.syntax_index,
            "args": self.args,
        })
    }
}

/// Result of parsing one message body.
#[derive(Debug, Default)]
pub struct ParseResult {
    pub commands: Vec<ParsedCommand>,
    /// Names from prefixed lines that matched no command.
    pub unknown: Vec<String>,
}

/// Outcome of binding tokens against one syntax.
struct Binding {
    args: BTreeMap<String, ArgValue>,
    missing: Vec<String>,
    errors: Vec<String>,
}

/// The command parser. Holds the dispatch prefixes and the optional
/// invocation-pattern override; everything else comes in per call.
pub struct CommandParser {
    command_prefix: String,
    root_prefix: String,
    admin_prefix: String,
    invoke: Option<Regex>,
}

impl CommandParser {
    pub fn new(
        command_prefix: impl Into<String>,
        root_prefix: impl Into<String>,
        admin_prefix: impl Into<String>,
        invoke_pattern: Option<&str>,
    ) -> Result<Self, ValetError> {
        let invoke = match invoke_pattern {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                ValetError::Config(format!("invalid invoke_prefix_pattern: {e}"))
            })?),
            None => None,
        };
        Ok(Self {
            command_prefix: command_prefix.into(),
            root_prefix: root_prefix.into(),
            admin_prefix: admin_prefix.into(),
            invoke,
        })
    }

    /// Parse a message body into zero or more commands.
    pub fn parse(&self, body: &str, chat: &ChatContext, loader: &Loader) -> ParseResult {
        let mut result = ParseResult::default();
        let lines: Vec<&str> = body.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let Some(first) = lines.first() else {
            return result;
        };

        if self.strip_invoke_prefix(first).is_none() {
            // Un-prefixed first line: try binding the whole message to the
            // chat's args-only command before falling back to mixed parsing.
            let joined = lines.join(" ");
            if let Some(command) = self.parse_args_only(&joined, chat, loader) {
                result.commands.push(command);
                return result;
            }
        }

        for line in lines {
            match self.strip_invoke_prefix(line) {
                Some(rest) => match self.dispatch(&rest, chat, loader) {
                    Dispatch::Command(command) => result.commands.push(command),
                    Dispatch::Unknown(name) => result.unknown.push(name),
                    Dispatch::Empty => {}
                },
                None => {
                    if let Some(command) = self.parse_args_only(line, chat, loader) {
                        result.commands.push(command);
                    }
                }
            }
        }

        result
    }

    /// Return the command remainder when the line starts with the bot
    /// invocation prefix.
    ///
    /// The built-in fast path implements the default pattern's semantics
    /// (a leading `.` not followed by another `.`); a doubled prefix is
    /// the escape for literal leading dots. A configured pattern
    /// overrides it; capture group 1 is the remainder.
    fn strip_invoke_prefix(&self, line: &str) -> Option<String> {
        if let Some(re) = &self.invoke {
            let rest = re.captures(line)?.get(1)?.as_str().trim_start().to_string();
            return (!rest.is_empty()).then_some(rest);
        }
        let rest = line.strip_prefix(&self.command_prefix)?;
        if rest.starts_with(&self.command_prefix) {
            return None;
        }
        let rest = rest.trim_start();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    /// Dispatch a prefixed line by its first token.
    fn dispatch(&self, rest: &str, chat: &ChatContext, loader: &Loader) -> Dispatch {
        let tokens = tokenize(rest);
        let Some(first) = tokens.first() else {
            return Dispatch::Empty;
        };

        // Root and admin scopes carry the command name in the second token.
        for (prefix, scope) in [
            (&self.root_prefix, Scope::Root),
            (&self.admin_prefix, Scope::Admin),
        ] {
            if first.eq_ignore_ascii_case(prefix) {
                let Some(name) = tokens.get(1) else {
                    return Dispatch::Unknown(prefix.clone());
                };
                return match loader.command(&scope, name) {
                    Some(def) => Dispatch::Command(self.bound(
                        scope,
                        def.name.clone(),
                        tokens[2..].to_vec(),
                        loader,
                    )),
                    None => Dispatch::Unknown(format!("{prefix} {name}")),
                };
            }
        }

        if let Some(def) = loader.command(&Scope::Builtin, first) {
            return Dispatch::Command(self.bound(
                Scope::Builtin,
                def.name.clone(),
                tokens[1..].to_vec(),
                loader,
            ));
        }

        if let Some(service) = loader.get(first) {
            let scope = Scope::Service(service.id.clone());
            let Some(name) = tokens.get(1) else {
                return Dispatch::Unknown(first.clone());
            };
            return match loader.command(&scope, name) {
                Some(def) => Dispatch::Command(self.bound(
                    scope,
                    def.name.clone(),
                    tokens[2..].to_vec(),
                    loader,
                )),
                None => Dispatch::Unknown(format!("{} {name}", service.id)),
            };
        }

        // A chat may drop the service prefix for one designated service;
        // the whole line is then a command of that service.
        if let Some(service) = &chat.disable_service_prefix {
            let scope = Scope::Service(service.clone());
            if let Some(def) = loader.command(&scope, first) {
                return Dispatch::Command(self.bound(
                    scope,
                    def.name.clone(),
                    tokens[1..].to_vec(),
                    loader,
                ));
            }
        }

        Dispatch::Unknown(first.clone())
    }

    /// Bind argument tokens against the command's first syntax.
    fn bound(
        &self,
        scope: Scope,
        command: String,
        tokens: Vec<String>,
        loader: &Loader,
    ) -> ParsedCommand {
        let raw_args = tokens.join(" ");
        let mut parsed = ParsedCommand {
            scope,
            command,
            tokens,
            raw_args,
            args: BTreeMap::new(),
            missing: Vec::new(),
            errors: Vec::new(),
            syntax_index: 0,
            args_only: false,
        };
        self.rebind(&mut parsed, 0, loader);
        parsed
    }

    /// Re-bind a parsed command's tokens against the syntax at `index`
    /// (used after permission selects a non-zero syntax).
    pub fn rebind(&self, parsed: &mut ParsedCommand, index: usize, loader: &Loader) {
        let Some(def) = loader.command(&parsed.scope, &parsed.command) else {
            return;
        };
        let Some(syntax) = def.syntaxes.get(index) else {
            return;
        };
        let binding = bind_tokens(&parsed.tokens, syntax, loader.types());
        parsed.args = binding.args;
        parsed.missing = binding.missing;
        parsed.errors = binding.errors;
        parsed.syntax_index = index;
    }

    /// Bind a bare line to the chat's args-only command. The binding is
    /// accepted only when some syntax resolves every parameter without
    /// errors; otherwise the line is ignored.
    fn parse_args_only(
        &self,
        text: &str,
        chat: &ChatContext,
        loader: &Loader,
    ) -> Option<ParsedCommand> {
        let (service, command) = chat.args_only.as_ref()?;
        if !chat.is_installed(service) {
            return None;
        }
        let scope = Scope::Service(service.clone());
        let def = loader.command(&scope, command)?;

        let tokens = tokenize(text);
        if tokens.is_empty() {
            return None;
        }

        for (index, syntax) in def.syntaxes.iter().enumerate() {
            let binding = bind_tokens(&tokens, syntax, loader.types());
            if binding.errors.is_empty() && binding.missing.is_empty() {
                return Some(ParsedCommand {
                    scope,
                    command: def.name.clone(),
                    raw_args: tokens.join(" "),
                    tokens,
                    args: binding.args,
                    missing: Vec::new(),
                    errors: Vec::new(),
                    syntax_index: index,
                    args_only: true,
                });
            }
        }
        None
    }
}

enum Dispatch {
    Command(ParsedCommand),
    Unknown(String),
    Empty,
}

/// Bind ordered tokens against one syntax's ordered parameter list.
///
/// Each parameter consumes exactly one token, except a trailing `string`
/// parameter, which consumes the remaining tokens joined by single
/// spaces. Tokens beyond the parameter list are discarded.
fn bind_tokens(tokens: &[String], syntax: &Syntax, types: &TypeCatalog) -> Binding {
    let mut binding = Binding {
        args: BTreeMap::new(),
        missing: Vec::new(),
        errors: Vec::new(),
    };

    let last = syntax.params.len().saturating_sub(1);
    let mut cursor = 0usize;

    for (pi, param) in syntax.params.iter().enumerate() {
        let greedy = pi == last
            && !param.is_list
            && param
                .kind
                .split('|')
                .any(|branch| types.base_of(branch.trim()) == Some("string"));

        let raw = if greedy && cursor < tokens.len() {
            let joined = tokens[cursor..].join(" ");
            cursor = tokens.len();
            Some(joined)
        } else if cursor < tokens.len() {
            let token = tokens[cursor].clone();
            cursor += 1;
            Some(token)
        } else {
            None
        };

        match raw {
            Some(raw) => match typeparse::parse_token(&raw, param, types) {
                Ok(value) => {
                    binding.args.insert(param.name.clone(), value);
                }
                Err(reason) => binding.errors.push(reason),
            },
            None => match typeparse::missing_value(param) {
                Ok(value) => {
                    binding.args.insert(param.name.clone(), value);
                }
                Err(_) => binding.missing.push(param.name.clone()),
            },
        }
    }

    binding
}

/// Tokenize with shell-like rules: whitespace separates tokens, single
/// and double quotes preserve spaces (each kind only closes itself), and
/// backslash escapes the next character.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut started = false;
    let mut quote: Option<char> = None;
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                match chars.next() {
                    Some(next) => current.push(next),
                    None => current.push('\\'),
                }
                started = true;
            }
            q @ ('"' | '\'') => {
                if quote == Some(q) {
                    quote = None;
                } else if quote.is_some() {
                    current.push(q);
                } else {
                    quote = Some(q);
                    started = true;
                }
            }
            c if c.is_whitespace() && quote.is_none() => {
                if started {
                    tokens.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => {
                current.push(c);
                started = true;
            }
        }
    }
    if started {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::core_builder;
    use crate::context::{ExecCtx, Handler, HandlerFuture, Reply};
    use crate::typeparse::ArgValue;
    use valet_schema::catalog::{CommandDef, ParameterDef, ServiceDef, Syntax};
    use valet_schema::ServiceRegistration;

    fn noop(_ctx: ExecCtx) -> HandlerFuture {
        Box::pin(async { Ok(Reply::None) })
    }

    fn test_loader() -> Loader {
        let definition = ServiceDef {
            id: "exp".into(),
            display_name: "Expenses".into(),
            description: "Track expenses".into(),
            roles: vec!["child".into(), "parent".into()],
            allow_in_private_chat: false,
            one_cmd_per_msg: false,
            commands: vec![
                CommandDef::new("add", "Record an expense").with_syntax(Syntax::new(
                    &["*"],
                    vec![
                        ParameterDef::required("amount", "int", "Amount"),
                        ParameterDef::required("item", "string", "Item"),
                    ],
                )),
                CommandDef::new("edit", "Edit an expense")
                    .with_syntax(Syntax::new(
                        &["child"],
                        vec![
                            ParameterDef::required("itemNo", "int", "Expense number"),
                            ParameterDef::optional("price", "int", "New price"),
                            ParameterDef::optional("item", "word", "New item"),
                        ],
                    ))
                    .with_syntax(Syntax::new(
                        &["parent"],
                        vec![
                            ParameterDef::required("childNo", "int", "Child number"),
                            ParameterDef::required("itemNo", "int", "Expense number"),
                            ParameterDef::optional("price", "int", "New price"),
                            ParameterDef::optional("item", "word", "New item"),
                        ],
                    )),
            ],
            settings: vec![],
            storage: vec![],
        };
        core_builder()
            .service(
                ServiceRegistration::new(definition)
                    .handler("add", noop as Handler)
                    .handler("edit", noop as Handler),
            )
            .build()
            .unwrap()
    }

    fn test_parser() -> CommandParser {
        CommandParser::new(".", "root", "admin", None).unwrap()
    }

    fn chat_with_exp() -> ChatContext {
        ChatContext {
            installed_services: vec!["exp".into()],
            disable_service_prefix: None,
            args_only: None,
        }
    }

    #[test]
    fn builtin_dispatch_by_first_token() {
        let loader = test_loader();
        let result = test_parser().parse(".ping", &ChatContext::default(), &loader);
        assert_eq!(result.commands.len(), 1);
        assert_eq!(result.commands[0].scope, Scope::Builtin);
        assert_eq!(result.commands[0].command, "ping");
        assert!(result.commands[0].raw_args.is_empty());
    }

    #[test]
    fn command_lookup_is_case_insensitive_with_canonical_name() {
        let loader = test_loader();
        let result = test_parser().parse(".PING", &ChatContext::default(), &loader);
        assert_eq!(result.commands[0].command, "ping");

        let result = test_parser().parse(".EXP ADD 1 x", &chat_with_exp(), &loader);
        assert_eq!(result.commands[0].scope, Scope::Service("exp".into()));
        assert_eq!(result.commands[0].command, "add");
    }

    #[test]
    fn doubled_prefix_is_not_an_invocation() {
        let loader = test_loader();
        let result = test_parser().parse("..ping", &ChatContext::default(), &loader);
        assert!(result.commands.is_empty());
        assert!(result.unknown.is_empty());
    }

    #[test]
    fn root_scope_takes_command_from_second_token() {
        let loader = test_loader();
        let result = test_parser().parse(".root install exp", &ChatContext::default(), &loader);
        assert_eq!(result.commands.len(), 1);
        let command = &result.commands[0];
        assert_eq!(command.scope, Scope::Root);
        assert_eq!(command.command, "install");
        assert_eq!(command.args["service"], ArgValue::Str("exp".into()));
    }

    #[test]
    fn unknown_commands_are_reported_by_name() {
        let loader = test_loader();
        let result = test_parser().parse(".frobnicate", &ChatContext::default(), &loader);
        assert!(result.commands.is_empty());
        assert_eq!(result.unknown, ["frobnicate"]);

        let result = test_parser().parse(".root selfdestruct", &ChatContext::default(), &loader);
        assert_eq!(result.unknown, ["root selfdestruct"]);
    }

    #[test]
    fn trailing_string_parameter_is_greedy() {
        let loader = test_loader();
        let result = test_parser().parse(".exp add 5 two words here", &chat_with_exp(), &loader);
        let command = &result.commands[0];
        assert_eq!(command.args["amount"], ArgValue::Int(5));
        assert_eq!(command.args["item"], ArgValue::Str("two words here".into()));
        assert!(command.missing.is_empty());
    }

    #[test]
    fn missing_required_parameters_are_recorded() {
        let loader = test_loader();
        let result = test_parser().parse(".exp add", &chat_with_exp(), &loader);
        let command = &result.commands[0];
        assert_eq!(command.missing, ["amount", "item"]);
        assert!(command.raw_args.is_empty());
        assert!(command.errors.is_empty());
    }

    #[test]
    fn type_binding_failures_are_recorded() {
        let loader = test_loader();
        let result = test_parser().parse(".exp add abc x", &chat_with_exp(), &loader);
        let command = &result.commands[0];
        assert_eq!(command.errors.len(), 1);
        assert!(command.errors[0].contains("whole number"));
    }

    #[test]
    fn extra_tokens_beyond_the_syntax_are_discarded() {
        let loader = test_loader();
        let result = test_parser().parse(".exp edit 1 2 3 4", &chat_with_exp(), &loader);
        let command = &result.commands[0];
        assert_eq!(command.syntax_index, 0);
        assert_eq!(command.args["itemNo"], ArgValue::Int(1));
        assert_eq!(command.args["price"], ArgValue::Int(2));
        assert_eq!(command.args["item"], ArgValue::Str("3".into()));
        assert!(!command.args.contains_key("childNo"));
    }

    #[test]
    fn rebind_against_a_selected_syntax() {
        let loader = test_loader();
        let parser = test_parser();
        let mut result = parser.parse(".exp edit 1 2 3 4", &chat_with_exp(), &loader);
        let command = &mut result.commands[0];

        parser.rebind(command, 1, &loader);
        assert_eq!(command.syntax_index, 1);
        assert_eq!(command.args["childNo"], ArgValue::Int(1));
        assert_eq!(command.args["itemNo"], ArgValue::Int(2));
        assert_eq!(command.args["price"], ArgValue::Int(3));
        assert_eq!(command.args["item"], ArgValue::Str("4".into()));
    }

    #[test]
    fn multi_line_messages_parse_in_order() {
        let loader = test_loader();
        let result = test_parser().parse(".ping\n.exp add 1 x\nchatter", &chat_with_exp(), &loader);
        assert_eq!(result.commands.len(), 2);
        assert_eq!(result.commands[0].command, "ping");
        assert_eq!(result.commands[1].command, "add");
    }

    #[test]
    fn args_only_binds_bare_lines_when_configured() {
        let loader = test_loader();
        let mut chat = chat_with_exp();
        chat.args_only = Some(("exp".into(), "add".into()));

        let result = test_parser().parse("5 Lunch", &chat, &loader);
        assert_eq!(result.commands.len(), 1);
        let command = &result.commands[0];
        assert!(command.args_only);
        assert_eq!(command.args["amount"], ArgValue::Int(5));
        assert_eq!(command.args["item"], ArgValue::Str("Lunch".into()));

        // A non-binding bare line is silently ignored.
        let result = test_parser().parse("hello world", &chat, &loader);
        assert!(result.commands.is_empty());
        assert!(result.unknown.is_empty());
    }

    #[test]
    fn args_only_requires_installation() {
        let loader = test_loader();
        let chat = ChatContext {
            installed_services: vec![],
            disable_service_prefix: None,
            args_only: Some(("exp".into(), "add".into())),
        };
        let result = test_parser().parse("5 Lunch", &chat, &loader);
        assert!(result.commands.is_empty());
    }

    #[test]
    fn dropped_service_prefix_treats_line_as_service_command() {
        let loader = test_loader();
        let mut chat = chat_with_exp();
        chat.disable_service_prefix = Some("exp".into());

        let result = test_parser().parse(".add 5 Lunch", &chat, &loader);
        assert_eq!(result.commands.len(), 1);
        assert_eq!(result.commands[0].scope, Scope::Service("exp".into()));
        assert_eq!(result.commands[0].command, "add");
    }

    #[test]
    fn configured_invoke_pattern_overrides_the_default() {
        let loader = test_loader();
        let parser = CommandParser::new(".", "root", "admin", Some(r"^!\s*([\s\S]+)$")).unwrap();
        let result = parser.parse("!ping", &ChatContext::default(), &loader);
        assert_eq!(result.commands[0].command, "ping");
        let result = parser.parse(".ping", &ChatContext::default(), &loader);
        assert!(result.commands.is_empty());
    }

    #[test]
    fn tokenize_splits_on_whitespace() {
        assert_eq!(tokenize("a b  c"), ["a", "b", "c"]);
        assert_eq!(tokenize("  "), Vec::<String>::new());
    }

    #[test]
    fn tokenize_preserves_quoted_spaces() {
        assert_eq!(tokenize(r#"add "two words" x"#), ["add", "two words", "x"]);
        assert_eq!(tokenize("add 'two words'"), ["add", "two words"]);
    }

    #[test]
    fn tokenize_quote_kinds_do_not_close_each_other() {
        assert_eq!(tokenize(r#""it's fine""#), ["it's fine"]);
        assert_eq!(tokenize(r#"'she said "hi"'"#), [r#"she said "hi""#]);
    }

    #[test]
    fn tokenize_backslash_escapes_next_char() {
        assert_eq!(tokenize(r"a\ b"), ["a b"]);
        assert_eq!(tokenize(r#"\"quoted\""#), [r#""quoted""#]);
        assert_eq!(tokenize(r"trailing\"), [r"trailing\"]);
    }

    #[test]
    fn tokenize_empty_quotes_yield_empty_token() {
        assert_eq!(tokenize(r#"a "" b"#), ["a", "", "b"]);
    }
}
