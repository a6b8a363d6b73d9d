//! Service loader: the immutable boot-time view of the schema catalog.
//!
//! Schemas are data; handlers are code. The [`LoaderBuilder`] collects
//! scope catalogs and [`ServiceRegistration`]s, validates everything
//! once, and resolves every declared command to its handler callable —
//! failing fast at boot rather than at first invocation. The resulting
//! [`ServiceLoader`] is never mutated afterwards.
//!
//! The loader is generic over the handler (`H`) and interactive-context
//! hook (`X`) callable types so the catalog layer stays independent of
//! the execution layer.

use std::collections::HashMap;

use tracing::info;

use valet_types::ValetError;

use crate::catalog::{CommandDef, Scope, ScopeDef, ServiceDef, TypeCatalog};

/// A service definition plus its code: handlers keyed by export name and
/// optional interactive-context hooks keyed by command name.
pub struct ServiceRegistration<H, X> {
    pub definition: ServiceDef,
    pub handlers: Vec<(String, H)>,
    pub hooks: Vec<(String, X)>,
}

impl<H, X> ServiceRegistration<H, X> {
    pub fn new(definition: ServiceDef) -> Self {
        Self {
            definition,
            handlers: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Register a handler under its export name.
    pub fn handler(mut self, name: impl Into<String>, handler: H) -> Self {
        self.handlers.push((name.into(), handler));
        self
    }

    /// Register an interactive-context hook for a command.
    pub fn hook(mut self, command: impl Into<String>, hook: X) -> Self {
        self.hooks.push((command.into(), hook));
        self
    }
}

/// Transform a dash-separated command name into the camelCase export
/// convention: `root-add` becomes `rootAdd`.
pub fn dash_to_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '-' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Immutable catalog view plus the handler registry.
pub struct ServiceLoader<H, X> {
    types: TypeCatalog,
    builtin: ScopeDef,
    admin: ScopeDef,
    root: ScopeDef,
    services: Vec<ServiceDef>,
    handlers: HashMap<(Scope, String), H>,
    hooks: HashMap<(Scope, String), X>,
}

impl<H, X> ServiceLoader<H, X> {
    /// Look up a service definition by id (case-insensitive).
    pub fn get(&self, service: &str) -> Option<&ServiceDef> {
        self.services
            .iter()
            .find(|s| s.id.eq_ignore_ascii_case(service))
    }

    /// The catalog of one of the three fixed scopes; `None` for service
    /// scopes (use [`get`](Self::get)).
    pub fn scope_def(&self, scope: &Scope) -> Option<&ScopeDef> {
        match scope {
            Scope::Builtin => Some(&self.builtin),
            Scope::Admin => Some(&self.admin),
            Scope::Root => Some(&self.root),
            Scope::Service(_) => None,
        }
    }

    /// Case-insensitive command lookup in any scope. The returned
    /// definition carries the canonical name.
    pub fn command(&self, scope: &Scope, name: &str) -> Option<&CommandDef> {
        match scope {
            Scope::Service(id) => self.get(id)?.command(name),
            fixed => self.scope_def(fixed)?.command(name),
        }
    }

    /// The handler for a command, if one was registered.
    pub fn handler(&self, scope: &Scope, name: &str) -> Option<&H> {
        let canonical = self.command(scope, name)?.name.clone();
        self.handlers.get(&(scope.clone(), canonical))
    }

    /// The interactive-context hook for a command, if any.
    pub fn hook(&self, scope: &Scope, name: &str) -> Option<&X> {
        let canonical = self.command(scope, name)?.name.clone();
        self.hooks.get(&(scope.clone(), canonical))
    }

    /// Ordered roles of a service; `[admin, member]` when unknown.
    pub fn roles(&self, service: &str) -> Vec<String> {
        match self.get(service) {
            Some(def) => def.roles.clone(),
            None => vec!["admin".into(), "member".into()],
        }
    }

    /// All registered services in registration order.
    pub fn services(&self) -> &[ServiceDef] {
        &self.services
    }

    pub fn types(&self) -> &TypeCatalog {
        &self.types
    }

    pub fn builtin(&self) -> &ScopeDef {
        &self.builtin
    }

    pub fn admin(&self) -> &ScopeDef {
        &self.admin
    }

    pub fn root(&self) -> &ScopeDef {
        &self.root
    }
}

/// Builder assembling a [`ServiceLoader`] at boot.
pub struct LoaderBuilder<H, X> {
    types: TypeCatalog,
    builtin: (ScopeDef, Vec<(String, H)>),
    admin: (ScopeDef, Vec<(String, H)>),
    root: (ScopeDef, Vec<(String, H)>),
    services: Vec<ServiceRegistration<H, X>>,
}

impl<H, X> LoaderBuilder<H, X> {
    pub fn new(types: TypeCatalog) -> Self {
        Self {
            types,
            builtin: (ScopeDef::default(), Vec::new()),
            admin: (ScopeDef::default(), Vec::new()),
            root: (ScopeDef::default(), Vec::new()),
            services: Vec::new(),
        }
    }

    /// Set a fixed scope's catalog and handlers.
    pub fn scope(mut self, scope: Scope, def: ScopeDef, handlers: Vec<(String, H)>) -> Self {
        match scope {
            Scope::Builtin => self.builtin = (def, handlers),
            Scope::Admin => self.admin = (def, handlers),
            Scope::Root => self.root = (def, handlers),
            Scope::Service(_) => unreachable!("service scopes are registered via service()"),
        }
        self
    }

    /// Register a service.
    pub fn service(mut self, registration: ServiceRegistration<H, X>) -> Self {
        self.services.push(registration);
        self
    }

    /// Validate the whole catalog and resolve every command to a handler.
    ///
    /// Fatal errors: duplicate command names within a scope, a command
    /// with no syntaxes, duplicate or unknown-typed parameters, a greedy
    /// `string` parameter that is not last, duplicate service ids, and a
    /// declared command with no matching handler export.
    pub fn build(self) -> Result<ServiceLoader<H, X>, ValetError>
    where
        H: Clone,
    {
        let mut handlers = HashMap::new();
        let mut hooks = HashMap::new();

        let types = self.types;
        for (scope, (def, scope_handlers)) in [
            (Scope::Builtin, &self.builtin),
            (Scope::Admin, &self.admin),
            (Scope::Root, &self.root),
        ] {
            validate_commands(&types, &scope, &def.commands)?;
            resolve_handlers(&scope, &def.commands, scope_handlers, &mut handlers)?;
        }

        let mut services = Vec::with_capacity(self.services.len());
        for registration in self.services {
            let mut def = registration.definition;
            let scope = Scope::Service(def.id.clone());

            if services
                .iter()
                .any(|existing: &ServiceDef| existing.id.eq_ignore_ascii_case(&def.id))
            {
                return Err(ValetError::Schema(format!(
                    "duplicate service id '{}'",
                    def.id
                )));
            }

            // Every service carries the admin and member roles.
            if !def.roles.iter().any(|r| r == "admin") {
                def.roles.insert(0, "admin".into());
            }
            if !def.roles.iter().any(|r| r == "member") {
                def.roles.push("member".into());
            }

            validate_commands(&types, &scope, &def.commands)?;
            resolve_handlers(&scope, &def.commands, &registration.handlers, &mut handlers)?;

            for (command, hook) in registration.hooks {
                let canonical = def
                    .command(&command)
                    .map(|c| c.name.clone())
                    .ok_or_else(|| {
                        ValetError::Schema(format!(
                            "hook registered for unknown command '{}' of service '{}'",
                            command, def.id
                        ))
                    })?;
                hooks.insert((scope.clone(), canonical), hook);
            }

            info!(service = %def.id, commands = def.commands.len(), "service registered");
            services.push(def);
        }

        Ok(ServiceLoader {
            types,
            builtin: self.builtin.0,
            admin: self.admin.0,
            root: self.root.0,
            services,
            handlers,
            hooks,
        })
    }
}

/// Structural validation of one scope's command list.
fn validate_commands(
    types: &TypeCatalog,
    scope: &Scope,
    commands: &[CommandDef],
) -> Result<(), ValetError> {
    for (i, command) in commands.iter().enumerate() {
        if commands[..i]
            .iter()
            .any(|other| other.name.eq_ignore_ascii_case(&command.name))
        {
            return Err(ValetError::Schema(format!(
                "duplicate command '{}' in scope {scope}",
                command.name
            )));
        }
        if command.syntaxes.is_empty() {
            return Err(ValetError::Schema(format!(
                "command '{}' in scope {scope} declares no syntaxes",
                command.name
            )));
        }
        for (si, syntax) in command.syntaxes.iter().enumerate() {
            let last = syntax.params.len().saturating_sub(1);
            for (pi, param) in syntax.params.iter().enumerate() {
                if syntax.params[..pi].iter().any(|p| p.name == param.name) {
                    return Err(ValetError::Schema(format!(
                        "duplicate parameter '{}' in {scope}.{} syntax {si}",
                        param.name, command.name
                    )));
                }
                if !types.kind_is_known(&param.kind) {
                    return Err(ValetError::Schema(format!(
                        "unknown type '{}' for parameter '{}' of {scope}.{}",
                        param.kind, param.name, command.name
                    )));
                }
                let greedy = !param.is_list
                    && param
                        .kind
                        .split('|')
                        .any(|branch| types.base_of(branch.trim()) == Some("string"));
                if greedy && pi != last {
                    return Err(ValetError::Schema(format!(
                        "greedy string parameter '{}' of {scope}.{} must be last",
                        param.name, command.name
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Resolve each command to a handler export: exact name first, then the
/// dash-to-camel transform. Missing handlers are fatal.
fn resolve_handlers<H>(
    scope: &Scope,
    commands: &[CommandDef],
    exports: &[(String, H)],
    out: &mut HashMap<(Scope, String), H>,
) -> Result<(), ValetError>
where
    H: Clone,
{
    for command in commands {
        let found = exports
            .iter()
            .find(|(name, _)| *name == command.name)
            .or_else(|| {
                let camel = dash_to_camel(&command.name);
                exports.iter().find(|(name, _)| *name == camel)
            });
        match found {
            Some((_, handler)) => {
                out.insert((scope.clone(), command.name.clone()), handler.clone());
            }
            None => {
                return Err(ValetError::Schema(format!(
                    "command '{}' in scope {scope} has no handler",
                    command.name
                )));
            }
        }
    }
    Ok(())
}
