//! Handler execution context.
//!
//! A service handler receives one [`ExecCtx`]: the bound arguments, the
//! caller's identity and roles, and handles to the managers it may need
//! (state, scoped storage, the loader, the gateway). Handlers are plain
//! function pointers returning a boxed future, so the catalog can hold
//! them as data.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use valet_gateway::Gateway;
use valet_schema::catalog::Scope;
use valet_schema::ServiceLoader;
use valet_types::{ChatId, UserId, ValetError};

use crate::session::ContextHook;
use crate::state::StateManager;
use crate::storage::StorageHandle;
use crate::typeparse::{ArgMap, ArgValue};

/// What a handler hands back to the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Reply text, sent quoting the original message.
    Text(String),
    /// An error reply.
    Error(String),
    /// No reply.
    None,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }

    pub fn error(text: impl Into<String>) -> Self {
        Reply::Error(text.into())
    }
}

/// The boxed future a handler returns.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Reply, ValetError>> + Send>>;

/// A command handler callable.
pub type Handler = fn(ExecCtx) -> HandlerFuture;

/// The loader specialised to the engine's handler and hook types.
pub type Loader = ServiceLoader<Handler, ContextHook>;

/// Everything a handler gets to work with.
pub struct ExecCtx {
    /// Bound arguments, keyed by parameter name.
    pub args: ArgMap,
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub user_name: String,
    pub is_group: bool,
    /// Id of the message being handled (replies quote it).
    pub message_id: String,
    pub replied_to_id: Option<String>,
    pub quoted_body: Option<String>,
    /// The caller's effective roles at authorization time.
    pub user_roles: Vec<String>,
    /// The scope the command was dispatched to.
    pub scope: Scope,
    /// Canonical command name.
    pub command: String,
    /// The invocation prefix, for help texts.
    pub prefix: String,
    pub state: Arc<StateManager>,
    pub loader: Arc<Loader>,
    pub gateway: Arc<dyn Gateway>,
}

impl ExecCtx {
    // -- argument access ---------------------------------------------------

    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.args.get(name).filter(|v| !v.is_null())
    }

    pub fn str_arg(&self, name: &str) -> Option<&str> {
        self.arg(name).and_then(ArgValue::as_str)
    }

    pub fn int_arg(&self, name: &str) -> Option<i64> {
        self.arg(name).and_then(ArgValue::as_i64)
    }

    pub fn bool_arg(&self, name: &str) -> Option<bool> {
        self.arg(name).and_then(ArgValue::as_bool)
    }

    pub fn list_arg(&self, name: &str) -> Option<&[ArgValue]> {
        self.arg(name).and_then(ArgValue::as_list)
    }

    /// A string argument that binding guarantees present; absence is a
    /// handler bug.
    pub fn required_str(&self, name: &str) -> Result<&str, ValetError> {
        self.str_arg(name)
            .ok_or_else(|| ValetError::Handler(format!("missing bound argument '{name}'")))
    }

    pub fn required_int(&self, name: &str) -> Result<i64, ValetError> {
        self.int_arg(name)
            .ok_or_else(|| ValetError::Handler(format!("missing bound argument '{name}'")))
    }

    pub fn required_bool(&self, name: &str) -> Result<bool, ValetError> {
        self.bool_arg(name)
            .ok_or_else(|| ValetError::Handler(format!("missing bound argument '{name}'")))
    }

    // -- scoped helpers ----------------------------------------------------

    /// The service this command belongs to, when dispatched to one.
    pub fn service(&self) -> Option<&str> {
        self.scope.service()
    }

    /// A storage handle scoped to this chat and the current service.
    pub fn storage(&self, name: &str) -> Result<StorageHandle, ValetError> {
        let service = self
            .service()
            .ok_or_else(|| ValetError::Handler("storage requires a service scope".into()))?;
        Ok(StorageHandle::new(
            self.state.clone(),
            self.chat_id.clone(),
            service,
            name,
        ))
    }

    /// Users holding a role in the current service.
    pub async fn users_with_role(&self, role: &str) -> Result<Vec<UserId>, ValetError> {
        let service = self
            .service()
            .ok_or_else(|| ValetError::Handler("roles require a service scope".into()))?;
        Ok(self.state.users_with_role(&self.chat_id, service, role).await)
    }

    pub async fn add_user_role(&self, role: &str, user: &UserId) -> Result<bool, ValetError> {
        let service = self
            .service()
            .ok_or_else(|| ValetError::Handler("roles require a service scope".into()))?;
        self.state
            .add_user_role(&self.chat_id, service, role, user)
            .await
    }

    pub async fn remove_user_role(&self, role: &str, user: &UserId) -> Result<bool, ValetError> {
        let service = self
            .service()
            .ok_or_else(|| ValetError::Handler("roles require a service scope".into()))?;
        self.state
            .remove_user_role(&self.chat_id, service, role, user)
            .await
    }

    /// A user's display name in this chat, falling back to the id.
    pub async fn resolve_user_name(&self, user: &UserId) -> String {
        self.state.resolve_user_name(&self.chat_id, user).await
    }

    // -- sending -----------------------------------------------------------

    /// Send a free-standing message to the current chat.
    pub async fn send_message(&self, text: &str) -> Result<(), ValetError> {
        self.gateway
            .send_message(self.chat_id.as_str(), text)
            .await
            .map_err(|e| ValetError::Gateway(e.to_string()))
    }

    /// Send a reply quoting the message being handled.
    pub async fn send_reply(&self, text: &str) -> Result<(), ValetError> {
        self.gateway
            .send_reply(self.chat_id.as_str(), text, &self.message_id)
            .await
            .map_err(|e| ValetError::Gateway(e.to_string()))
    }

    /// Send an error reply quoting the message being handled.
    pub async fn send_error(&self, text: &str) -> Result<(), ValetError> {
        self.send_reply(&format!("Error: {text}")).await
    }
}
