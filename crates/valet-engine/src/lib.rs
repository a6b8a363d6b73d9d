//! The valet command pipeline.
//!
//! An inbound gateway event flows through one linear pipeline:
//! parse → route → authorize → (optionally) prompt → execute → persist →
//! reply. The [`router`] orchestrates; [`parser`] and [`typeparse`] turn
//! message text into typed arguments; [`permission`] decides who may run
//! what; [`session`] collects missing arguments over multiple turns;
//! [`state`] owns the single persistent document that [`storage`] layers
//! CRUD over; [`commands`] holds the builtin/admin/root handlers.

pub mod commands;
pub mod context;
pub mod parser;
pub mod permission;
pub mod router;
pub mod session;
pub mod state;
pub mod storage;
pub mod typeparse;

pub use context::{ExecCtx, Handler, HandlerFuture, Loader, Reply};
pub use parser::{ChatContext, CommandParser, ParseResult, ParsedCommand};
pub use permission::{authorize, best_matching_syntax, effective_roles, Denial, Grant};
pub use router::{EventOutcome, Router};
pub use session::{ContextHook, HookItem, HookRender, Session, SessionManager, SessionOutcome};
pub use state::{
    AdminSettings, ArgsOnlyTarget, BlacklistEntry, BotState, ChatState, ChatType, JsonFileStore,
    RoleEntry, RootSettings, RootState, ServiceInstance, StateManager, StateStore,
};
pub use storage::{AggregateOp, Page, StorageHandle};
pub use typeparse::ArgValue;
