//! Shared test harness: a recording mock gateway, the `exp` expense
//! service fixture, and a router wired against temp-dir state.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use valet_engine::commands::core_builder;
use valet_engine::{
    ArgValue, EventOutcome, ExecCtx, Handler, HandlerFuture, HookItem, HookRender, JsonFileStore,
    Loader, Reply, Router, StateManager,
};
use valet_gateway::{Gateway, GatewayError, Participant};
use valet_ledger::AuditRecord;
use valet_schema::catalog::{CommandDef, ParameterDef, ServiceDef, StorageDef, Syntax};
use valet_schema::ServiceRegistration;
use valet_types::{InboundEvent, MessagePayload, ParticipantsPayload, ValetConfig};

pub const DEVICE: &str = "device-1";
pub const ROOT: &str = "root@s.whatsapp.net";
pub const GROUP: &str = "g1@g.us";
pub const ADMIN_A: &str = "a@s.whatsapp.net";
pub const MEMBER_B: &str = "b@s.whatsapp.net";
pub const CHILD_C: &str = "c@s.whatsapp.net";

// ---------------------------------------------------------------------------
// Mock gateway
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: String,
    pub text: String,
    pub reply_to: Option<String>,
}

/// Records outbound sends; group participant lists are preset per chat.
#[derive(Default)]
pub struct MockGateway {
    pub sent: Mutex<Vec<SentMessage>>,
    pub participants: Mutex<HashMap<String, Vec<Participant>>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_participants(&self, chat_id: &str, participants: Vec<Participant>) {
        self.participants
            .lock()
            .unwrap()
            .insert(chat_id.to_string(), participants);
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|m| m.text.clone()).collect()
    }

    pub fn last(&self) -> Option<SentMessage> {
        self.sent.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), GatewayError> {
        self.sent.lock().unwrap().push(SentMessage {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            reply_to: None,
        });
        Ok(())
    }

    async fn send_reply(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: &str,
    ) -> Result<(), GatewayError> {
        self.sent.lock().unwrap().push(SentMessage {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            reply_to: Some(reply_to.to_string()),
        });
        Ok(())
    }

    async fn group_participants(&self, chat_id: &str) -> Result<Vec<Participant>, GatewayError> {
        self.participants
            .lock()
            .unwrap()
            .get(chat_id)
            .cloned()
            .ok_or_else(|| GatewayError::Api(format!("unknown group {chat_id}")))
    }
}

pub fn participant(jid: &str, admin: bool) -> Participant {
    Participant {
        jid: jid.to_string(),
        admin,
    }
}

// ---------------------------------------------------------------------------
// The exp expense-tracking service fixture
// ---------------------------------------------------------------------------

fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn exp_add(ctx: ExecCtx) -> HandlerFuture {
    Box::pin(async move {
        let amount = ctx.required_int("amount")?;
        let item = ctx.required_str("item")?.to_string();
        let storage = ctx.storage("expenses")?;
        let mut record = serde_json::Map::new();
        record.insert("amount".into(), json!(amount));
        record.insert("item".into(), json!(item.clone()));
        record.insert("by".into(), json!(ctx.user_id.as_str()));
        storage.add(record).await?;
        let total = storage
            .aggregate("amount", valet_engine::AggregateOp::Sum, None)
            .await?;
        Ok(Reply::text(format!(
            "Added: {item} - {amount} (new total: {})",
            format_amount(total)
        )))
    })
}

fn exp_edit(ctx: ExecCtx) -> HandlerFuture {
    Box::pin(async move {
        let item_no = ctx.required_int("itemNo")?;
        let storage = ctx.storage("expenses")?;

        let mut patch = serde_json::Map::new();
        if let Some(price) = ctx.int_arg("price") {
            patch.insert("amount".into(), json!(price));
        }
        if let Some(item) = ctx.str_arg("item") {
            patch.insert("item".into(), json!(item));
        }

        let index = usize::try_from(item_no).unwrap_or(0);
        match storage.update_by_index(index, patch).await? {
            Some(record) => Ok(Reply::text(format!(
                "Edited expense {item_no}: {} - {}",
                record["item"].as_str().unwrap_or(""),
                record["amount"]
            ))),
            None => Ok(Reply::error(format!("No expense {item_no}."))),
        }
    })
}

fn exp_list(ctx: ExecCtx) -> HandlerFuture {
    Box::pin(async move {
        let storage = ctx.storage("expenses")?;
        let page = ctx.int_arg("page").unwrap_or(1).max(1) as usize;
        let listing = storage.paginate(page, 10).await?;
        if listing.items.is_empty() {
            return Ok(Reply::text("No expenses yet."));
        }
        let lines: Vec<String> = listing
            .items
            .iter()
            .enumerate()
            .map(|(i, record)| {
                format!(
                    "{}. {} - {}",
                    (page - 1) * 10 + i + 1,
                    record["item"].as_str().unwrap_or(""),
                    record["amount"]
                )
            })
            .collect();
        Ok(Reply::text(lines.join("\n")))
    })
}

/// Interactive context for `edit`: echo which expense is being edited.
fn exp_edit_hook(
    args: &std::collections::BTreeMap<String, ArgValue>,
    param: &str,
) -> Option<HookRender> {
    if param == "itemNo" {
        return Some(HookRender::Message("Which expense should change?".into()));
    }
    args.get("itemNo")
        .and_then(ArgValue::as_i64)
        .map(|n| HookRender::Selected(HookItem::new(format!("Expense {n}"))))
}

/// The `exp` service: roles child/parent on top of the implicit
/// admin/member, with the add/edit/list commands.
pub fn exp_service() -> ServiceRegistration<Handler, valet_engine::ContextHook> {
    let definition = ServiceDef {
        id: "exp".into(),
        display_name: "Expenses".into(),
        description: "Track shared expenses".into(),
        roles: vec!["admin".into(), "parent".into(), "child".into(), "member".into()],
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
            CommandDef::new("edit", "Edit a recorded expense")
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
            CommandDef::new("list", "List recorded expenses")
                .non_interactive()
                .with_syntax(Syntax::new(
                    &["*"],
                    vec![ParameterDef::optional("page", "int", "Page")],
                )),
        ],
        settings: vec![],
        storage: vec![StorageDef {
            name: "expenses".into(),
            description: "Recorded expenses".into(),
        }],
    };

    ServiceRegistration::new(definition)
        .handler("add", exp_add as Handler)
        .handler("edit", exp_edit as Handler)
        .handler("list", exp_list as Handler)
        .hook("edit", exp_edit_hook)
}

// ---------------------------------------------------------------------------
// The echo service fixture (one command per message, private chats ok)
// ---------------------------------------------------------------------------

fn echo_say(ctx: ExecCtx) -> HandlerFuture {
    Box::pin(async move {
        let text = ctx.required_str("text")?.to_string();
        Ok(Reply::text(text))
    })
}

/// A minimal service with `one_cmd_per_msg` set and private chats allowed.
pub fn echo_service() -> ServiceRegistration<Handler, valet_engine::ContextHook> {
    let definition = ServiceDef {
        id: "echo".into(),
        display_name: "Echo".into(),
        description: "Repeat a message back".into(),
        roles: vec![],
        allow_in_private_chat: true,
        one_cmd_per_msg: true,
        commands: vec![CommandDef::new("say", "Echo the given text").with_syntax(
            Syntax::new(
                &["*"],
                vec![ParameterDef::required("text", "string", "Text")],
            ),
        )],
        settings: vec![],
        storage: vec![],
    };
    ServiceRegistration::new(definition).handler("say", echo_say as Handler)
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(1);

pub struct Harness {
    pub router: Router,
    pub gateway: Arc<MockGateway>,
    pub state: Arc<StateManager>,
    pub loader: Arc<Loader>,
    dir: tempfile::TempDir,
}

impl Harness {
    /// A router over temp-dir state with the core scopes plus `exp`.
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ValetConfig::new(ROOT, DEVICE);
        config.state_path = dir.path().join("state.json");
        config.audit_path = dir.path().join("audit.ndjson");

        let loader: Arc<Loader> = Arc::new(
            core_builder()
                .service(exp_service())
                .service(echo_service())
                .build()
                .unwrap(),
        );
        let state = Arc::new(
            StateManager::open(Box::new(JsonFileStore::new(&config.state_path)), ROOT).unwrap(),
        );
        let gateway = Arc::new(MockGateway::new());
        let router = Router::new(config, loader.clone(), state.clone(), gateway.clone())
            .await
            .unwrap();

        Self {
            router,
            gateway,
            state,
            loader,
            dir,
        }
    }

    /// Deliver one message event; returns the router's outcome.
    pub async fn message(&self, chat_id: &str, from: &str, body: &str) -> EventOutcome {
        let id = format!("m{}", MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed));
        let event = InboundEvent::Message {
            device_id: DEVICE.to_string(),
            payload: MessagePayload {
                id,
                chat_id: chat_id.to_string(),
                from: from.to_string(),
                from_name: String::new(),
                body: body.to_string(),
                timestamp: 1_700_000_000,
                replied_to_id: None,
                quoted_body: None,
            },
        };
        self.router.handle_event(event).await.unwrap()
    }

    /// Deliver one group membership event.
    pub async fn participants(
        &self,
        chat_id: &str,
        change: valet_types::ParticipantChange,
        jids: &[&str],
    ) -> EventOutcome {
        let event = InboundEvent::GroupParticipants {
            device_id: DEVICE.to_string(),
            payload: ParticipantsPayload {
                chat_id: chat_id.to_string(),
                change,
                jids: jids.iter().map(|j| j.to_string()).collect(),
            },
        };
        self.router.handle_event(event).await.unwrap()
    }

    /// Install `exp` into the group with ADMIN_A as admin and the given
    /// members, via the root install command.
    pub async fn install_exp(&self, members: &[&str]) {
        let mut participants = vec![participant(ADMIN_A, true)];
        participants.extend(members.iter().map(|m| participant(m, false)));
        self.gateway.set_participants(GROUP, participants);
        let outcome = self.message(GROUP, ROOT, ".root install exp").await;
        assert_eq!(
            outcome.reply.as_deref(),
            Some("Installed Expenses (exp)."),
            "install must succeed"
        );
    }

    /// Parsed audit records, oldest first.
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        let path = self.dir.path().join("audit.ndjson");
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}
