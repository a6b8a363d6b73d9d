//! Schema catalog data model.
//!
//! Everything a command *is* — its scopes, syntaxes, parameters, and the
//! type vocabulary those parameters draw from — is described by the types
//! in this module. The catalog is plain data: it can be written as Rust
//! literals (the builtin scopes) or deserialized from JSON (external
//! service definitions). Ordering is significant for commands, syntaxes,
//! parameters, and roles, so those are vectors of named definitions
//! rather than maps.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

/// The permission scope a command belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Commands any user may invoke.
    Builtin,
    /// Per-chat administration commands.
    Admin,
    /// Global operator commands.
    Root,
    /// Commands of an installed service, by service id.
    Service(String),
}

impl Scope {
    /// The service id, when this scope addresses a service.
    pub fn service(&self) -> Option<&str> {
        match self {
            Scope::Service(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Builtin => write!(f, "builtin"),
            Scope::Admin => write!(f, "admin"),
            Scope::Root => write!(f, "root"),
            Scope::Service(id) => write!(f, "{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Type catalog
// ---------------------------------------------------------------------------

/// Base type names understood by the type parser.
pub const BASE_TYPES: &[&str] = &[
    "int", "float", "bool", "word", "string", "date", "time", "datetime", "email", "any", "*",
];

/// One entry in the type catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeDef {
    /// Human-readable description, shown in prompts and help.
    pub description: String,
    /// Base type this one derives from, if any.
    #[serde(default)]
    pub derived_from: Option<String>,
    /// Example values, shown in help.
    #[serde(default)]
    pub examples: Vec<String>,
}

/// Mapping from type name to definition. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeCatalog {
    types: BTreeMap<String, TypeDef>,
}

impl TypeCatalog {
    /// The standard catalog: every base type plus the WhatsApp-flavoured
    /// derived types used by the builtin scopes.
    pub fn standard() -> Self {
        let mut types = BTreeMap::new();
        let base = [
            ("int", "whole number"),
            ("float", "decimal number"),
            ("bool", "yes/no value"),
            ("word", "single word without spaces"),
            ("string", "free text"),
            ("date", "date as YYYY-MM-DD"),
            ("time", "time as HH:MM or HH:MM:SS"),
            ("datetime", "ISO-8601 date and time"),
            ("email", "email address"),
            ("any", "any value"),
            ("*", "the literal *"),
        ];
        for (name, description) in base {
            types.insert(
                name.to_string(),
                TypeDef {
                    description: description.to_string(),
                    derived_from: None,
                    examples: Vec::new(),
                },
            );
        }

        let derived = [
            ("GroupId", "word", "group chat id ending in @g.us"),
            ("UserId", "word", "user id ending in @s.whatsapp.net"),
            ("Role", "word", "service role name"),
            ("Service", "word", "service id"),
            ("Command", "word", "command name"),
            ("Setting", "word", "setting name"),
        ];
        for (name, from, description) in derived {
            types.insert(
                name.to_string(),
                TypeDef {
                    description: description.to_string(),
                    derived_from: Some(from.to_string()),
                    examples: Vec::new(),
                },
            );
        }

        Self { types }
    }

    /// Look up a type definition by name.
    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// Whether `name` is a known type (base or derived).
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Register an additional (usually derived) type.
    pub fn insert(&mut self, name: impl Into<String>, def: TypeDef) {
        self.types.insert(name.into(), def);
    }

    /// Resolve a type name to its base type by walking the derivation
    /// chain. Base types resolve to themselves; unknown names and
    /// derivation cycles yield `None`.
    pub fn base_of<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        let mut current = name;
        for _ in 0..self.types.len() + 1 {
            if BASE_TYPES.contains(&current) {
                return Some(current);
            }
            current = self.get(current)?.derived_from.as_deref()?;
        }
        None
    }

    /// Whether every branch of a (possibly union) parameter kind is known.
    pub fn kind_is_known(&self, kind: &str) -> bool {
        kind.split('|').all(|branch| self.contains(branch.trim()))
    }
}

// ---------------------------------------------------------------------------
// Parameters and syntaxes
// ---------------------------------------------------------------------------

/// One command parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterDef {
    /// Parameter name; argument maps are keyed by it.
    pub name: String,
    /// Type name from the catalog, or a union such as `int|word|*`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Whether the single consumed token is a comma-separated list.
    #[serde(default)]
    pub is_list: bool,
    /// Whether the parameter may be omitted.
    #[serde(default)]
    pub optional: bool,
    /// Value applied when the parameter is absent.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Human-readable description, shown in prompts and help.
    pub description: String,
    /// Minimum list length (lists only).
    #[serde(default)]
    pub min: Option<usize>,
    /// Maximum list length (lists only).
    #[serde(default)]
    pub max: Option<usize>,
}

impl ParameterDef {
    /// A required parameter.
    pub fn required(
        name: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            is_list: false,
            optional: false,
            default: None,
            description: description.into(),
            min: None,
            max: None,
        }
    }

    /// An optional parameter.
    pub fn optional(
        name: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let mut param = Self::required(name, kind, description);
        param.optional = true;
        param
    }

    /// Mark the parameter as a comma-separated list.
    pub fn list(mut self) -> Self {
        self.is_list = true;
        self
    }

    /// Attach a default value (applied when the parameter is absent).
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Constrain list length.
    pub fn with_bounds(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Whether an absent token is an error for this parameter.
    pub fn is_required(&self) -> bool {
        !self.optional && self.default.is_none()
    }
}

/// One alternative signature of a command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Syntax {
    /// Roles allowed to use this syntax; `*` is a wildcard. An empty set
    /// falls back to the command's `allowed_roles`.
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    /// Ordered parameter list.
    #[serde(default)]
    pub params: Vec<ParameterDef>,
}

impl Syntax {
    pub fn new(allowed_roles: &[&str], params: Vec<ParameterDef>) -> Self {
        Self {
            allowed_roles: allowed_roles.iter().map(|r| r.to_string()).collect(),
            params,
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// One command of a scope or service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandDef {
    /// Canonical command name (lookup is case-insensitive).
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Whether missing required arguments open an interactive session.
    #[serde(default = "default_true")]
    pub interactive: bool,
    /// Fallback roles for syntaxes that declare none.
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    /// Ordered list of alternative signatures.
    pub syntaxes: Vec<Syntax>,
}

fn default_true() -> bool {
    true
}

impl CommandDef {
    /// A command with no syntaxes yet; add at least one before loading.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            interactive: true,
            allowed_roles: Vec::new(),
            syntaxes: Vec::new(),
        }
    }

    /// Append a syntax.
    pub fn with_syntax(mut self, syntax: Syntax) -> Self {
        self.syntaxes.push(syntax);
        self
    }

    /// Disable interactive argument collection for this command.
    pub fn non_interactive(mut self) -> Self {
        self.interactive = false;
        self
    }

    /// Set the fallback allowed roles.
    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.allowed_roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    /// The roles that gate syntax `index`, honouring the fallback.
    pub fn syntax_roles(&self, index: usize) -> &[String] {
        match self.syntaxes.get(index) {
            Some(syntax) if !syntax.allowed_roles.is_empty() => &syntax.allowed_roles,
            _ => &self.allowed_roles,
        }
    }
}

// ---------------------------------------------------------------------------
// Scopes and services
// ---------------------------------------------------------------------------

/// A setting declaration with its default value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettingDef {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub default: serde_json::Value,
}

/// A named storage collection declared by a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// The command catalog of one of the three fixed scopes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScopeDef {
    #[serde(default)]
    pub settings: Vec<SettingDef>,
    #[serde(default)]
    pub commands: Vec<CommandDef>,
}

impl ScopeDef {
    /// Case-insensitive command lookup returning the canonical definition.
    pub fn command(&self, name: &str) -> Option<&CommandDef> {
        self.commands
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// A pluggable service: commands, roles, settings, and storage, all data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceDef {
    /// Service id; the first token of a prefixed service invocation.
    pub id: String,
    /// Name shown in help output.
    pub display_name: String,
    pub description: String,
    /// Ordered roles; `admin` and `member` are added by the loader when
    /// missing.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Whether the service's commands work in private chats.
    #[serde(default)]
    pub allow_in_private_chat: bool,
    /// Whether only the first command of this service in a multi-command
    /// message is executed.
    #[serde(default)]
    pub one_cmd_per_msg: bool,
    #[serde(default)]
    pub commands: Vec<CommandDef>,
    #[serde(default)]
    pub settings: Vec<SettingDef>,
    #[serde(default)]
    pub storage: Vec<StorageDef>,
}

impl ServiceDef {
    /// Case-insensitive command lookup returning the canonical definition.
    pub fn command(&self, name: &str) -> Option<&CommandDef> {
        self.commands
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Default value for a declared setting.
    pub fn setting_default(&self, name: &str) -> Option<&serde_json::Value> {
        self.settings.iter().find(|s| s.name == name).map(|s| &s.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalog_has_all_base_types() {
        let catalog = TypeCatalog::standard();
        for base in BASE_TYPES {
            assert!(catalog.contains(base), "missing base type {base}");
        }
    }

    #[test]
    fn base_of_resolves_derivation_chain() {
        let catalog = TypeCatalog::standard();
        assert_eq!(catalog.base_of("int"), Some("int"));
        assert_eq!(catalog.base_of("UserId"), Some("word"));
        assert_eq!(catalog.base_of("GroupId"), Some("word"));
        assert_eq!(catalog.base_of("nope"), None);
    }

    #[test]
    fn base_of_detects_cycles() {
        let mut catalog = TypeCatalog::standard();
        catalog.insert(
            "A",
            TypeDef {
                description: "a".into(),
                derived_from: Some("B".into()),
                examples: vec![],
            },
        );
        catalog.insert(
            "B",
            TypeDef {
                description: "b".into(),
                derived_from: Some("A".into()),
                examples: vec![],
            },
        );
        assert_eq!(catalog.base_of("A"), None);
    }

    #[test]
    fn union_kind_known_checks_every_branch() {
        let catalog = TypeCatalog::standard();
        assert!(catalog.kind_is_known("int|word|*"));
        assert!(!catalog.kind_is_known("int|mystery"));
    }

    #[test]
    fn command_lookup_is_case_insensitive() {
        let scope = ScopeDef {
            settings: vec![],
            commands: vec![CommandDef::new("Ping", "pong").with_syntax(Syntax::new(&["*"], vec![]))],
        };
        let found = scope.command("pInG").unwrap();
        assert_eq!(found.name, "Ping");
        assert!(scope.command("pong").is_none());
    }

    #[test]
    fn syntax_roles_fall_back_to_command_roles() {
        let command = CommandDef::new("edit", "edit a thing")
            .with_roles(&["member"])
            .with_syntax(Syntax::new(&["child"], vec![]))
            .with_syntax(Syntax::new(&[], vec![]));
        assert_eq!(command.syntax_roles(0), ["child".to_string()]);
        assert_eq!(command.syntax_roles(1), ["member".to_string()]);
    }

    #[test]
    fn required_means_no_default_and_not_optional() {
        let required = ParameterDef::required("amount", "int", "Amount");
        assert!(required.is_required());

        let optional = ParameterDef::optional("item", "string", "Item");
        assert!(!optional.is_required());

        let defaulted = ParameterDef::required("n", "int", "N")
            .with_default(serde_json::json!(1));
        assert!(!defaulted.is_required());
    }

    #[test]
    fn service_def_deserializes_with_defaults() {
        let def: ServiceDef = serde_json::from_str(
            r#"{
                "id": "exp",
                "display_name": "Expenses",
                "description": "Track expenses",
                "commands": [
                    {
                        "name": "add",
                        "description": "Record an expense",
                        "syntaxes": [
                            {"allowed_roles": ["*"], "params": [
                                {"name": "amount", "type": "int", "description": "Amount"}
                            ]}
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();
        assert!(!def.allow_in_private_chat);
        assert!(!def.one_cmd_per_msg);
        assert!(def.roles.is_empty());
        let add = def.command("ADD").unwrap();
        assert!(add.interactive);
        assert!(!add.syntaxes[0].params[0].is_list);
    }
}
