//! Handlers for the three fixed scopes.
//!
//! The scope catalogs are data in `valet-schema`; the matching code
//! lives here. [`core_builder`] wires both together; the host
//! application adds its service registrations and builds the loader.

pub mod admin;
pub mod builtin;
pub mod root;

use std::collections::BTreeSet;

use valet_schema::builtin::{admin_scope, builtin_scope, root_scope};
use valet_schema::catalog::{Scope, TypeCatalog};
use valet_schema::LoaderBuilder;

use crate::context::{ExecCtx, Handler};
use crate::session::ContextHook;

/// A one-value scoping set for a blacklist field; `*` is the wildcard.
fn scope_set(ctx: &ExecCtx, name: &str) -> Option<BTreeSet<String>> {
    ctx.str_arg(name)
        .map(|value| BTreeSet::from([value.to_string()]))
}

/// A loader builder pre-populated with the builtin, admin, and root
/// scopes and their handlers.
pub fn core_builder() -> LoaderBuilder<Handler, ContextHook> {
    LoaderBuilder::new(TypeCatalog::standard())
        .scope(
            Scope::Builtin,
            builtin_scope(),
            vec![
                ("ping".into(), builtin::ping as Handler),
                ("help".into(), builtin::help as Handler),
            ],
        )
        .scope(
            Scope::Admin,
            admin_scope(),
            vec![
                ("bot".into(), admin::bot as Handler),
                ("argsonly".into(), admin::argsonly as Handler),
                ("block".into(), admin::block as Handler),
                ("unblock".into(), admin::unblock as Handler),
                ("role".into(), admin::role as Handler),
                ("setting".into(), admin::setting as Handler),
            ],
        )
        .scope(
            Scope::Root,
            root_scope(),
            vec![
                ("install".into(), root::install as Handler),
                ("uninstall".into(), root::uninstall as Handler),
                ("blacklist".into(), root::blacklist as Handler),
                ("unblacklist".into(), root::unblacklist as Handler),
                ("bot".into(), root::bot as Handler),
                // Registered under the camelCase export name; the loader's
                // dash-to-camel fallback resolves `root-add` to it.
                ("rootAdd".into(), root::root_add as Handler),
            ],
        )
}
