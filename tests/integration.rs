#![cfg(test)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mockall::{mock, predicate::eq};
use teams_bridge::{
    base::{
        config::{Config, ConfigInner},
        types::{Res, Void},
    },
    bridge::Bridge,
    gateway::{FileAttachment, GatewayEvent, GatewayMessage, PARENT_NOT_FOUND},
    service::teams::{BodyKind, GenericTeamsClient, OutgoingMessage, RemoteAttachment, RemoteAuthor, RemoteMessage, TeamsClient},
};
use tokio::sync::mpsc;

// Mocks.

mock! {
    pub Teams {}

    #[async_trait]
    impl GenericTeamsClient for Teams {
        async fn resolve_self_identity(&self) -> Res<String>;
        async fn fetch_snapshot(&self, team_id: &str, channel_id: &str) -> Res<Vec<RemoteMessage>>;
        async fn create_message(&self, team_id: &str, channel_id: &str, message: &OutgoingMessage) -> Res<String>;
        async fn create_reply(&self, team_id: &str, channel_id: &str, parent_id: &str, message: &OutgoingMessage) -> Res<String>;
        async fn update_message(&self, team_id: &str, channel_id: &str, message_id: &str, message: &OutgoingMessage) -> Void;
        async fn update_reply(&self, team_id: &str, channel_id: &str, parent_id: &str, reply_id: &str, message: &OutgoingMessage) -> Void;
        async fn soft_delete_message(&self, team_id: &str, channel_id: &str, message_id: &str) -> Void;
        async fn soft_delete_reply(&self, team_id: &str, channel_id: &str, parent_id: &str, reply_id: &str) -> Void;
        async fn download_attachment(&self, url: &str) -> Res<Vec<u8>>;
    }
}

const BOT_ID: &str = "bot-1";
const TEAM: &str = "team-1";
const CHANNEL: &str = "general";

fn get_mock_teams() -> MockTeams {
    let mut mock = MockTeams::new();

    mock.expect_resolve_self_identity().returning(|| Ok(BOT_ID.to_string()));

    mock
}

fn get_config(poll_interval_ms: u64) -> Config {
    Config {
        inner: Arc::new(ConfigInner {
            access_token: "token".to_string(),
            team_id: TEAM.to_string(),
            channels: vec![CHANNEL.to_string()],
            account: "msteams.bridge".to_string(),
            graph_base_url: "http://localhost".to_string(),
            poll_interval_ms,
            attachment_tag_pattern: "<attachment id=.*?attachment>".to_string(),
            media_download_size: 16,
            id_map_capacity: 100,
            id_map_retention_secs: 3600,
            gateway_buffer: 16,
            debug: true,
        }),
    }
}

async fn connect(mock: MockTeams, poll_interval_ms: u64) -> (Bridge, mpsc::Receiver<GatewayMessage>) {
    let (tx, rx) = mpsc::channel(16);
    let bridge = Bridge::connect(&get_config(poll_interval_ms), TeamsClient::new(Arc::new(mock)), tx).await.unwrap();

    (bridge, rx)
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

fn message(id: &str, author: &str, body: &str, created: i64) -> RemoteMessage {
    let mut message = RemoteMessage::new(id, body, at(created));
    message.author = Some(RemoteAuthor {
        id: author.to_string(),
        display_name: format!("{} name", author),
    });
    message
}

/// Returns each snapshot once, then repeats the last one forever.
fn snapshots(mock: &mut MockTeams, snapshots: Vec<Vec<RemoteMessage>>) {
    let calls = AtomicUsize::new(0);

    mock.expect_fetch_snapshot().with(eq(TEAM), eq(CHANNEL)).returning(move |_, _| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        Ok(snapshots[n.min(snapshots.len() - 1)].clone())
    });
}

// Connect.

#[tokio::test]
async fn connect_resolves_bot_identity() {
    let (bridge, _rx) = connect(get_mock_teams(), 5000).await;

    assert_eq!(bridge.bot_id(), BOT_ID);
    assert!(bridge.ids().is_empty());
}

#[tokio::test]
async fn connect_fails_without_identity() {
    let mut mock = MockTeams::new();
    mock.expect_resolve_self_identity().returning(|| Err(anyhow::anyhow!("unauthorized")));

    let (tx, _rx) = mpsc::channel(1);
    let result = Bridge::connect(&get_config(5000), TeamsClient::new(Arc::new(mock)), tx).await;

    assert!(result.is_err());
}

// Inbound.

#[tokio::test]
async fn first_poll_is_silent_then_new_messages_are_forwarded() {
    let mut mock = get_mock_teams();
    let first = message("m1", "alice", "hello", 1);
    let second = message("m2", "bob", "world", 2);

    snapshots(&mut mock, vec![vec![first.clone()], vec![second, first]]);

    let (bridge, mut rx) = connect(mock, 5000).await;
    let mut poller = bridge.channel_poller(CHANNEL);

    assert_eq!(poller.poll_once().await.unwrap(), 0);
    assert!(rx.try_recv().is_err());
    assert!(poller.reconciler().has_baseline());

    assert_eq!(poller.poll_once().await.unwrap(), 1);

    let forwarded = rx.try_recv().unwrap();
    assert_eq!(forwarded.id, "m2");
    assert_eq!(forwarded.text, "world");
    assert_eq!(forwarded.username, "bob name");
    assert_eq!(forwarded.user_id, "bob");
    assert_eq!(forwarded.channel, CHANNEL);
    assert_eq!(forwarded.account, "msteams.bridge");
    assert_eq!(forwarded.event, GatewayEvent::Message);
    assert!(forwarded.parent_id.is_empty());
}

#[tokio::test]
async fn own_messages_are_not_echoed_but_their_deletes_are() {
    let mut mock = get_mock_teams();
    let own = message("m1", BOT_ID, "from the bridge", 5);

    let mut deleted = own.clone();
    deleted.deleted = Some(at(9));

    snapshots(&mut mock, vec![vec![], vec![own], vec![deleted]]);

    let (bridge, mut rx) = connect(mock, 5000).await;
    let mut poller = bridge.channel_poller(CHANNEL);

    poller.poll_once().await.unwrap();
    assert_eq!(poller.poll_once().await.unwrap(), 0);
    assert_eq!(poller.poll_once().await.unwrap(), 1);

    let forwarded = rx.try_recv().unwrap();
    assert_eq!(forwarded.id, "m1");
    assert_eq!(forwarded.event, GatewayEvent::MessageDelete);
    assert!(forwarded.text.is_empty());
}

#[tokio::test]
async fn replies_carry_their_parent_id() {
    let mut mock = get_mock_teams();
    let parent = message("m1", "alice", "question", 1);

    let mut answered = parent.clone();
    answered.replies.push(message("r1", "bob", "answer", 3));

    snapshots(&mut mock, vec![vec![parent], vec![answered]]);

    let (bridge, mut rx) = connect(mock, 5000).await;
    let mut poller = bridge.channel_poller(CHANNEL);

    poller.poll_once().await.unwrap();
    assert_eq!(poller.poll_once().await.unwrap(), 1);

    let forwarded = rx.try_recv().unwrap();
    assert_eq!(forwarded.id, "r1");
    assert_eq!(forwarded.parent_id, "m1");
    assert_eq!(forwarded.text, "answer");
}

#[tokio::test]
async fn failed_fetch_keeps_state() {
    let mut mock = get_mock_teams();
    let first = message("m1", "alice", "hello", 1);
    let calls = AtomicUsize::new(0);

    let snapshot = vec![first.clone()];
    mock.expect_fetch_snapshot().returning(move |_, _| match calls.fetch_add(1, Ordering::SeqCst) {
        1 => Err(anyhow::anyhow!("throttled")),
        _ => Ok(snapshot.clone()),
    });

    let (bridge, mut rx) = connect(mock, 5000).await;
    let mut poller = bridge.channel_poller(CHANNEL);

    poller.poll_once().await.unwrap();
    assert!(poller.poll_once().await.is_err());
    assert_eq!(poller.reconciler().state().len(), 1);

    // Same snapshot again: nothing changed, nothing is re-emitted.
    assert_eq!(poller.poll_once().await.unwrap(), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn html_bodies_are_converted_and_attachment_tags_stripped() {
    let mut mock = get_mock_teams();

    let mut html = message("m1", "alice", "<p><strong>bold</strong> move<attachment id=\"abc\"></attachment></p>", 2);
    html.body_kind = BodyKind::Html;

    snapshots(&mut mock, vec![vec![], vec![html]]);

    let (bridge, mut rx) = connect(mock, 5000).await;
    let mut poller = bridge.channel_poller(CHANNEL);

    poller.poll_once().await.unwrap();
    poller.poll_once().await.unwrap();

    let forwarded = rx.try_recv().unwrap();
    assert!(forwarded.text.contains("**bold**"));
    assert!(!forwarded.text.contains("attachment"));
}

#[tokio::test]
async fn attachments_are_downloaded_within_the_size_limit() {
    let mut mock = get_mock_teams();

    let mut with_files = message("m1", "alice", "files", 2);
    with_files.attachments = vec![
        RemoteAttachment {
            content_type: "reference".to_string(),
            name: Some("small.txt".to_string()),
            content_url: Some("https://files/small.txt".to_string()),
            content: None,
        },
        RemoteAttachment {
            content_type: "reference".to_string(),
            name: Some("large.bin".to_string()),
            content_url: Some("https://files/large.bin".to_string()),
            content: None,
        },
        RemoteAttachment {
            content_type: "reference".to_string(),
            name: Some("broken.txt".to_string()),
            content_url: Some("https://files/broken.txt".to_string()),
            content: None,
        },
    ];

    snapshots(&mut mock, vec![vec![], vec![with_files]]);

    mock.expect_download_attachment().returning(|url| match url {
        "https://files/small.txt" => Ok(b"tiny".to_vec()),
        "https://files/large.bin" => Ok(vec![0; 64]),
        _ => Err(anyhow::anyhow!("not found")),
    });

    let (bridge, mut rx) = connect(mock, 5000).await;
    let mut poller = bridge.channel_poller(CHANNEL);

    poller.poll_once().await.unwrap();
    poller.poll_once().await.unwrap();

    let forwarded = rx.try_recv().unwrap();
    assert_eq!(
        forwarded.files,
        vec![FileAttachment {
            name: "small.txt".to_string(),
            data: b"tiny".to_vec(),
            url: "https://files/small.txt".to_string(),
            comment: String::new(),
        }]
    );
}

#[tokio::test]
async fn code_snippets_are_appended_as_fenced_blocks() {
    let mut mock = get_mock_teams();

    let url = "https://graph.microsoft.com/beta/teams/t/channels/c/messages/m/hostedContents/h/$value";
    assert_eq!(url.split('/').count(), 13);

    let mut snippet = message("m1", "alice", "look", 2);
    snippet.attachments.push(RemoteAttachment {
        content_type: "application/vnd.microsoft.card.codesnippet".to_string(),
        name: None,
        content_url: None,
        content: Some(format!(r#"{{"language":"rust","codeSnippetUrl":"{}"}}"#, url)),
    });

    snapshots(&mut mock, vec![vec![], vec![snippet]]);

    mock.expect_download_attachment().with(eq(url)).returning(|_| Ok(b"fn main() {}".to_vec()));

    let (bridge, mut rx) = connect(mock, 5000).await;
    let mut poller = bridge.channel_poller(CHANNEL);

    poller.poll_once().await.unwrap();
    poller.poll_once().await.unwrap();

    let forwarded = rx.try_recv().unwrap();
    assert!(forwarded.text.starts_with("look"));
    assert!(forwarded.text.contains("```rust\nfn main() {}\n```"));
    assert!(forwarded.files.is_empty());
}

#[tokio::test]
async fn malformed_code_snippets_are_left_out() {
    let mut mock = get_mock_teams();

    let mut snippet = message("m1", "alice", "look", 2);
    snippet.attachments.push(RemoteAttachment {
        content_type: "application/vnd.microsoft.card.codesnippet".to_string(),
        name: None,
        content_url: None,
        content: Some(r#"{"language":"rust","codeSnippetUrl":"https://graph.microsoft.com/beta/too/short"}"#.to_string()),
    });

    snapshots(&mut mock, vec![vec![], vec![snippet]]);

    mock.expect_download_attachment().never();

    let (bridge, mut rx) = connect(mock, 5000).await;
    let mut poller = bridge.channel_poller(CHANNEL);

    poller.poll_once().await.unwrap();
    assert_eq!(poller.poll_once().await.unwrap(), 1);

    let forwarded = rx.try_recv().unwrap();
    assert_eq!(forwarded.id, "m1");
    assert_eq!(forwarded.text, "look");
    assert!(forwarded.files.is_empty());
}

#[tokio::test]
async fn joined_channels_poll_until_disconnect() {
    let mut mock = get_mock_teams();
    let first = message("m1", "alice", "hello", 1);
    let second = message("m2", "bob", "world", 2);

    snapshots(&mut mock, vec![vec![first.clone()], vec![second, first]]);

    let (bridge, mut rx) = connect(mock, 10).await;

    bridge.join_channel(CHANNEL);
    bridge.join_channel(CHANNEL);

    let forwarded = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(forwarded.id, "m2");

    tokio::time::timeout(Duration::from_secs(5), bridge.disconnect()).await.unwrap();

    // Nothing else changes, so nothing else arrives.
    assert!(rx.try_recv().is_err());
}

// Outbound.

fn outbound(text: &str) -> GatewayMessage {
    GatewayMessage {
        origin_id: "local-1".to_string(),
        text: text.to_string(),
        username: "carol".to_string(),
        channel: CHANNEL.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn created_messages_can_be_deleted_by_local_id() {
    let mut mock = get_mock_teams();

    mock.expect_create_message()
        .withf(|team, channel, body| team == TEAM && channel == CHANNEL && body.html.contains("<strong>carol</strong>") && body.html.contains("hi there"))
        .times(1)
        .returning(|_, _, _| Ok("remote-1".to_string()));
    mock.expect_soft_delete_message().with(eq(TEAM), eq(CHANNEL), eq("remote-1")).times(1).returning(|_, _, _| Ok(()));

    let (bridge, _rx) = connect(mock, 5000).await;

    assert_eq!(bridge.send(&outbound("hi there")).await.unwrap(), "remote-1");
    assert_eq!(bridge.ids().get("local-1").as_deref(), Some("remote-1"));

    let delete = GatewayMessage {
        id: "local-1".to_string(),
        channel: CHANNEL.to_string(),
        event: GatewayEvent::MessageDelete,
        ..Default::default()
    };

    assert_eq!(bridge.send(&delete).await.unwrap(), "remote-1");
}

#[tokio::test]
async fn edits_resolve_local_ids() {
    let mut mock = get_mock_teams();

    mock.expect_create_message().returning(|_, _, _| Ok("remote-1".to_string()));
    mock.expect_update_message()
        .withf(|_, _, id, body| id == "remote-1" && body.html.contains("edited"))
        .times(1)
        .returning(|_, _, _, _| Ok(()));

    let (bridge, _rx) = connect(mock, 5000).await;

    bridge.send(&outbound("original")).await.unwrap();

    let mut edit = outbound("edited");
    edit.id = "local-1".to_string();

    assert_eq!(bridge.send(&edit).await.unwrap(), "remote-1");
}

#[tokio::test]
async fn replies_and_reply_deletes_use_the_parent() {
    let mut mock = get_mock_teams();

    mock.expect_create_reply().withf(|_, _, parent, _| parent == "m1").times(1).returning(|_, _, _, _| Ok("r9".to_string()));
    mock.expect_soft_delete_reply().with(eq(TEAM), eq(CHANNEL), eq("m1"), eq("r9")).times(1).returning(|_, _, _, _| Ok(()));

    let (bridge, _rx) = connect(mock, 5000).await;

    let mut reply = outbound("in thread");
    reply.parent_id = "m1".to_string();

    assert_eq!(bridge.send(&reply).await.unwrap(), "r9");

    let delete = GatewayMessage {
        origin_id: "local-1".to_string(),
        parent_id: "m1".to_string(),
        channel: CHANNEL.to_string(),
        event: GatewayEvent::MessageDelete,
        ..Default::default()
    };

    bridge.send(&delete).await.unwrap();
}

#[tokio::test]
async fn unknown_parents_become_prefixed_top_level_messages() {
    let mut mock = get_mock_teams();

    mock.expect_create_reply().never();
    mock.expect_create_message()
        .withf(|_, _, body| body.html.contains("[thread]: lost reply"))
        .times(1)
        .returning(|_, _, _| Ok("remote-2".to_string()));

    let (bridge, _rx) = connect(mock, 5000).await;

    let mut orphan = outbound("lost reply");
    orphan.parent_id = PARENT_NOT_FOUND.to_string();

    assert_eq!(bridge.send(&orphan).await.unwrap(), "remote-2");
}

#[tokio::test]
async fn mentions_and_images_are_encoded() {
    let mut mock = get_mock_teams();

    mock.expect_create_message()
        .withf(|_, _, body| {
            body.mentions.len() == 1
                && body.mentions[0].channel_id == CHANNEL
                && body.html.contains(r#"<at id="0">channel</at>"#)
                && body.html.contains("@dave")
                && body.hosted_contents.len() == 1
                && body.html.contains("hostedContents/0/$value")
        })
        .times(1)
        .returning(|_, _, _| Ok("remote-3".to_string()));

    let (bridge, _rx) = connect(mock, 5000).await;

    let mut message = outbound("ping @channel and @dave");
    message.files.push(FileAttachment {
        name: "cat.png".to_string(),
        data: vec![1, 2, 3],
        ..Default::default()
    });

    bridge.send(&message).await.unwrap();
}

#[tokio::test]
async fn author_names_are_escaped() {
    let mut mock = get_mock_teams();

    mock.expect_create_message()
        .withf(|_, _, body| body.html.contains("<strong>&lt;img src=x&gt; &amp; co</strong>") && !body.html.contains("<img src=x>"))
        .times(1)
        .returning(|_, _, _| Ok("remote-4".to_string()));

    let (bridge, _rx) = connect(mock, 5000).await;

    let mut message = outbound("hello");
    message.username = "<img src=x> & co".to_string();

    bridge.send(&message).await.unwrap();
}

#[tokio::test]
async fn failed_sends_record_no_mapping() {
    let mut mock = get_mock_teams();

    mock.expect_create_message().returning(|_, _, _| Err(anyhow::anyhow!("forbidden")));

    let (bridge, _rx) = connect(mock, 5000).await;

    assert!(bridge.send(&outbound("nope")).await.is_err());
    assert!(bridge.ids().is_empty());
}

#[tokio::test]
async fn deletes_without_any_id_are_rejected() {
    let mut mock = get_mock_teams();

    mock.expect_soft_delete_message().never();

    let (bridge, _rx) = connect(mock, 5000).await;

    let delete = GatewayMessage {
        channel: CHANNEL.to_string(),
        event: GatewayEvent::MessageDelete,
        ..Default::default()
    };

    assert!(bridge.send(&delete).await.is_err());
}
