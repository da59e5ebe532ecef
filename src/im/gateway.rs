//! WebSocket 推送网关
//!
//! 每个连接对应一个推送会话：`?user=<id>` 即为可信的当前用户，连接建立后自动订阅
//! 会话列表、通知、隐藏索引和好友关系；客户端可再按会话订阅消息。
//! 下行帧为 JSON，配置了 gzip 时以二进制帧发送压缩后的内容。

use crate::im::client::SocialCore;
use crate::im::error::ErrorKind;
use crate::im::serialization::{compress_gzip, decompress_gzip};
use crate::im::sync::{Delivery, Session, SubscriptionId, Topic};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

/// 客户端上行帧
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientFrame {
    SubscribeMessages { conversation_id: String },
    Unsubscribe { subscription_id: SubscriptionId },
}

/// 服务端下行帧
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Snapshot {
        delivery: Delivery,
    },
    Subscribed {
        subscription_id: SubscriptionId,
        topic: Topic,
    },
    Unsubscribed {
        subscription_id: SubscriptionId,
        removed: bool,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

/// 从查询串中取出 `user` 参数
pub fn user_from_query(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == "user")
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// 编码下行帧
pub fn encode_frame(frame: &ServerFrame, compression: &str) -> Result<WsMessage> {
    let json = serde_json::to_vec(frame).context("序列化下行帧失败")?;
    if compression == "gzip" {
        Ok(WsMessage::Binary(compress_gzip(&json)?))
    } else {
        Ok(WsMessage::Text(
            String::from_utf8(json).context("下行帧不是合法 UTF-8")?,
        ))
    }
}

/// 解码上行帧，二进制帧按 gzip 魔数判断是否需要解压
pub fn decode_frame(msg: &WsMessage) -> Result<Option<ClientFrame>> {
    let bytes = match msg {
        WsMessage::Text(text) => text.as_bytes().to_vec(),
        WsMessage::Binary(data) if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b => {
            decompress_gzip(data).context("解压上行帧失败")?
        }
        WsMessage::Binary(data) => data.clone(),
        _ => return Ok(None),
    };
    let frame = serde_json::from_slice(&bytes).context("解析上行帧失败")?;
    Ok(Some(frame))
}

#[derive(Clone)]
pub struct PushGateway {
    core: SocialCore,
}

impl PushGateway {
    pub fn new(core: SocialCore) -> Self {
        Self { core }
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = &self.core.config.gateway_addr;
        let listener = TcpListener::bind(addr)
            .await
            .context(format!("监听网关地址失败: {}", addr))?;
        info!("[Gateway] 📡 推送网关监听于 {}", listener.local_addr()?);
        Ok(listener)
    }

    /// 接受连接直到监听器出错
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await.context("接受连接失败")?;
            let gateway = self.clone();
            tokio::spawn(async move {
                if let Err(e) = gateway.handle_connection(stream).await {
                    warn!("[Gateway] ⚠️ 连接 {} 异常结束: {:?}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let mut user: Option<String> = None;
        let ws = accept_hdr_async(
            stream,
            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                user = req.uri().query().and_then(user_from_query);
                Ok(resp)
            },
        )
        .await
        .context("WebSocket 握手失败")?;
        let (mut write, mut read) = ws.split();
        let compression = self.core.config.compression.clone();

        let Some(user) = user else {
            let frame = ServerFrame::Error {
                kind: ErrorKind::Validation,
                message: "缺少 user 参数".into(),
            };
            write.send(encode_frame(&frame, &compression)?).await?;
            write.close().await.ok();
            return Ok(());
        };

        info!("[Gateway] ✅ 用户 {} 已连接", user);
        let mut session = self.core.session(&user);
        if let Err(e) = session.subscribe_standing().await {
            error!("[Gateway] 用户 {} 常驻订阅失败: {}", user, e);
            let frame = ServerFrame::Error {
                kind: e.kind(),
                message: e.to_string(),
            };
            write.send(encode_frame(&frame, &compression)?).await?;
            session.stop();
            return Ok(());
        }

        loop {
            tokio::select! {
                delivery = session.next_delivery() => {
                    let Some(delivery) = delivery else { break };
                    let frame = ServerFrame::Snapshot { delivery };
                    if write.send(encode_frame(&frame, &compression)?).await.is_err() {
                        break;
                    }
                }
                incoming = read.next() => {
                    let msg = match incoming {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => {
                            warn!("[Gateway] 读取 {} 的消息失败: {:?}", user, e);
                            break;
                        }
                        None => break,
                    };
                    if let WsMessage::Close(frame) = &msg {
                        debug!("[Gateway] 👋 {} 关闭连接: {:?}", user, frame);
                        break;
                    }
                    let reply = match decode_frame(&msg) {
                        Ok(Some(frame)) => self.handle_frame(&session, &user, frame).await,
                        Ok(None) => continue,
                        Err(e) => ServerFrame::Error {
                            kind: ErrorKind::Validation,
                            message: e.to_string(),
                        },
                    };
                    if write.send(encode_frame(&reply, &compression)?).await.is_err() {
                        break;
                    }
                }
            }
        }

        session.stop();
        info!("[Gateway] 用户 {} 已断开", user);
        Ok(())
    }

    async fn handle_frame(&self, session: &Session, user: &str, frame: ClientFrame) -> ServerFrame {
        match frame {
            ClientFrame::SubscribeMessages { conversation_id } => {
                let topic = Topic::Messages {
                    conversation_id,
                    viewer: user.to_string(),
                };
                match session.subscribe(topic.clone()).await {
                    Ok(subscription_id) => ServerFrame::Subscribed {
                        subscription_id,
                        topic,
                    },
                    Err(e) => ServerFrame::Error {
                        kind: e.kind(),
                        message: e.to_string(),
                    },
                }
            }
            ClientFrame::Unsubscribe { subscription_id } => ServerFrame::Unsubscribed {
                subscription_id,
                removed: session.unsubscribe(subscription_id),
            },
        }
    }
}
