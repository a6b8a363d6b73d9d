//! End-to-end scenarios through the full router pipeline.

mod common;

use common::{Harness, ADMIN_A, CHILD_C, GROUP, MEMBER_B, ROOT};
use valet_types::ParticipantChange;

#[tokio::test]
async fn ping_replies_pong() {
    let harness = Harness::new().await;
    let outcome = harness.message(GROUP, MEMBER_B, ".ping").await;
    assert_eq!(outcome.reply.as_deref(), Some("Pong"));
    assert!(outcome.success);

    let sent = harness.gateway.last().unwrap();
    assert_eq!(sent.chat_id, GROUP);
    assert_eq!(sent.text, "Pong");
    assert!(sent.reply_to.is_some(), "replies quote the original message");
}

#[tokio::test]
async fn help_lists_builtin_commands_in_order() {
    let harness = Harness::new().await;
    let outcome = harness.message(GROUP, MEMBER_B, ".help").await;
    let reply = outcome.reply.unwrap();

    assert!(reply.starts_with("*Commands*"));
    let ping_pos = reply.find("\u{2022} .ping").expect("help lists ping");
    let help_pos = reply.find("\u{2022} .help").expect("help lists help");
    assert!(ping_pos < help_pos, "bullets follow declaration order");
}

#[tokio::test]
async fn interactive_expense_add_collects_and_executes() {
    let harness = Harness::new().await;
    harness.install_exp(&[MEMBER_B, CHILD_C]).await;
    harness
        .message(GROUP, ROOT, &format!(".admin role add exp child {CHILD_C}"))
        .await;

    let opened = harness.message(GROUP, CHILD_C, ".exp add").await;
    let prompt = opened.reply.unwrap();
    assert_eq!(prompt.lines().last().unwrap(), "*Amount?* _(int)_");
    assert!(prompt.contains("cancel"), "first prompt carries the cancel hint");

    let next = harness.message(GROUP, CHILD_C, "50").await;
    assert_eq!(next.reply.as_deref(), Some("*Item?* _(string)_"));

    let done = harness.message(GROUP, CHILD_C, "Lunch").await;
    assert_eq!(done.reply.as_deref(), Some("Added: Lunch - 50 (new total: 50)"));
}

#[tokio::test]
async fn syntax_selection_binds_child_and_denies_member() {
    let harness = Harness::new().await;
    harness.install_exp(&[MEMBER_B, CHILD_C]).await;
    harness
        .message(GROUP, ROOT, &format!(".admin role add exp child {CHILD_C}"))
        .await;
    harness.message(GROUP, CHILD_C, ".exp add 10 Base").await;

    // Child binds against syntax 0; the fourth token is discarded.
    let edited = harness.message(GROUP, CHILD_C, ".exp edit 1 2 3 4").await;
    assert_eq!(edited.reply.as_deref(), Some("Edited expense 1: 3 - 2"));

    // A plain member matches no syntax of edit.
    let denied = harness.message(GROUP, MEMBER_B, ".exp edit 1 2 3 4").await;
    let reason = denied.reply.unwrap();
    assert!(
        reason.contains("permission"),
        "denial must mention permission, got: {reason}"
    );
}

#[tokio::test]
async fn args_only_mode_binds_bare_lines() {
    let harness = Harness::new().await;
    harness.install_exp(&[MEMBER_B, CHILD_C]).await;
    let set = harness.message(GROUP, ROOT, ".admin argsonly exp add").await;
    assert_eq!(set.reply.as_deref(), Some("Bare messages now run 'exp add'."));

    let added = harness.message(GROUP, CHILD_C, "75 Coffee").await;
    assert_eq!(added.reply.as_deref(), Some("Added: Coffee - 75 (new total: 75)"));

    // A bare line that does not bind is silently ignored.
    let ignored = harness.message(GROUP, CHILD_C, "hello world").await;
    assert_eq!(ignored.reply, None);
}

#[tokio::test]
async fn participant_events_track_roles() {
    let harness = Harness::new().await;
    harness.install_exp(&[MEMBER_B]).await;

    harness
        .participants(GROUP, ParticipantChange::Promote, &[MEMBER_B])
        .await;
    let state = &harness.state;
    let admins = state
        .users_with_role(&GROUP.into(), "exp", "admin")
        .await
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    assert_eq!(admins, [ADMIN_A, MEMBER_B]);
    assert!(
        state
            .users_with_role(&GROUP.into(), "exp", "member")
            .await
            .is_empty(),
        "promote removes the user from member"
    );

    harness
        .participants(GROUP, ParticipantChange::Leave, &[MEMBER_B])
        .await;
    for role in ["admin", "parent", "child", "member"] {
        assert!(
            !state
                .users_with_role(&GROUP.into(), "exp", role)
                .await
                .iter()
                .any(|u| u.as_str() == MEMBER_B),
            "leave must clear {role}"
        );
    }
}
