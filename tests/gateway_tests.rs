//! 推送网关：握手、常驻订阅的初始快照与按会话订阅消息

use futures_util::{SinkExt, StreamExt};
use social_core_rust::im::directory::UserProfile;
use social_core_rust::im::serialization::decompress_gzip;
use social_core_rust::{PushGateway, SocialConfig, SocialCore};
use std::collections::BTreeSet;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_gateway(compression: &str) -> anyhow::Result<(SocialCore, String)> {
    let mut config = SocialConfig::in_memory();
    config.gateway_addr = "127.0.0.1:0".into();
    config.compression = compression.into();
    let core = SocialCore::open(config).await?;
    for id in ["alice", "bob"] {
        core.register_user(&UserProfile {
            id: id.into(),
            display_name: id.into(),
            email: format!("{}@example.com", id),
            handle: id.into(),
        })
        .await?;
    }

    let gateway = PushGateway::new(core.clone());
    let listener = gateway.bind().await?;
    let addr = listener.local_addr()?;
    tokio::spawn(gateway.serve(listener));
    Ok((core, format!("ws://{}", addr)))
}

async fn next_json(client: &mut Client) -> anyhow::Result<serde_json::Value> {
    loop {
        let msg = timeout(Duration::from_secs(3), client.next())
            .await
            .map_err(|_| anyhow::anyhow!("等待下行帧超时"))?
            .ok_or_else(|| anyhow::anyhow!("连接已关闭"))??;
        let bytes = match msg {
            WsMessage::Binary(data) => decompress_gzip(&data)?,
            WsMessage::Text(text) => text.into_bytes(),
            _ => continue,
        };
        return Ok(serde_json::from_slice(&bytes)?);
    }
}

#[tokio::test]
async fn connection_receives_standing_snapshots() -> anyhow::Result<()> {
    let (_core, url) = start_gateway("gzip").await?;
    let (mut client, _) = connect_async(format!("{}/?user=alice", url)).await?;

    let mut topics = BTreeSet::new();
    for _ in 0..4 {
        let frame = next_json(&mut client).await?;
        assert_eq!(frame["type"], "snapshot");
        assert_eq!(frame["delivery"]["topic"]["user"], "alice");
        topics.insert(frame["delivery"]["topic"]["topic"].as_str().unwrap_or_default().to_string());
    }
    let expected: BTreeSet<String> = ["conversations", "notifications", "hidden_index", "friendships"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(topics, expected);
    Ok(())
}

#[tokio::test]
async fn missing_user_gets_error_frame() -> anyhow::Result<()> {
    let (_core, url) = start_gateway("").await?;
    let (mut client, _) = connect_async(format!("{}/", url)).await?;
    let frame = next_json(&mut client).await?;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["kind"], "validation");
    Ok(())
}

#[tokio::test]
async fn subscribe_messages_streams_full_history() -> anyhow::Result<()> {
    let (core, url) = start_gateway("").await?;
    let request = core.friends.send_request("alice", "bob").await?;
    core.friends.accept(&request.id, "bob").await?;
    let chat = core.gate.create_private_chat("alice", "bob").await?;
    core.ledger.send(&chat.id, "bob", "first").await?;

    let (mut client, _) = connect_async(format!("{}/?user=alice", url)).await?;
    for _ in 0..4 {
        next_json(&mut client).await?;
    }

    let op = serde_json::json!({ "op": "subscribe_messages", "conversation_id": chat.id });
    client.send(WsMessage::Text(op.to_string())).await?;

    // 订阅确认与初始快照的先后取决于调度，两者都要收到
    let mut subscribed = false;
    let mut history = None;
    while !(subscribed && history.is_some()) {
        let frame = next_json(&mut client).await?;
        match frame["type"].as_str() {
            Some("subscribed") => subscribed = true,
            Some("snapshot") if frame["delivery"]["snapshot"]["type"] == "messages" => {
                history = Some(frame["delivery"]["snapshot"]["data"].clone());
            }
            _ => {}
        }
    }
    let history = history.unwrap_or_default();
    assert_eq!(history.as_array().map(Vec::len), Some(1));

    // 新消息触发整组重投
    core.ledger.send(&chat.id, "bob", "second").await?;
    loop {
        let frame = next_json(&mut client).await?;
        if frame["type"] == "snapshot" && frame["delivery"]["snapshot"]["type"] == "messages" {
            assert_eq!(frame["delivery"]["snapshot"]["data"].as_array().map(Vec::len), Some(2));
            break;
        }
    }
    Ok(())
}
