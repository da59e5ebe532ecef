//! 社交核心 CLI
//!
//! `serve`：基于文件数据库启动 WebSocket 推送网关
//! `demo`：在内存数据库上跑一遍好友、私聊、未读和删除的完整流程，并打印推送快照

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use social_core_rust::im::directory::UserProfile;
use social_core_rust::im::message::AttachmentKind;
use social_core_rust::im::sync::{Delivery, Snapshot};
use social_core_rust::{DeleteScope, PushGateway, Session, SocialConfig, SocialCore};
use tokio::time::{sleep, timeout, Duration};
use tracing::info;

/// 社交核心 CLI
#[derive(Parser, Debug)]
#[command(name = "social-cli")]
#[command(about = "社交核心 CLI - 启动推送网关或运行演示流程", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// 日志级别（默认: info,social_core_rust=debug）
    #[arg(long, global = true, default_value = "info,social_core_rust=debug")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 启动推送网关
    Serve {
        /// SQLite 数据库 URL
        #[arg(long, default_value = "sqlite://social.db?mode=rwc")]
        db_url: String,

        /// 监听地址
        #[arg(long, default_value = "127.0.0.1:10003")]
        addr: String,

        /// 压缩方式（gzip 或空字符串）
        #[arg(long, default_value = "gzip")]
        compression: String,

        /// 远程用户目录地址，不指定时使用本地 users 表
        #[arg(long)]
        directory_api_url: Option<String>,

        /// 消息可编辑时长（秒）
        #[arg(long, default_value = "3600")]
        edit_window_secs: i64,

        /// 运行时长（秒），0 表示持续运行
        #[arg(short, long, default_value = "0")]
        duration: u64,
    },
    /// 在内存数据库上运行演示流程
    Demo,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .context("无法创建日志文件 debug.log")?;

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 文件不需要颜色
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
    Ok(())
}

fn describe(delivery: &Delivery) -> String {
    match &delivery.snapshot {
        Snapshot::Conversations(list) => {
            let parts: Vec<String> = list
                .iter()
                .map(|e| {
                    format!(
                        "{}(未读 {}{})",
                        e.conversation.id,
                        e.unread_count,
                        if e.conversation.deleted_for_everyone {
                            ", 已删除"
                        } else {
                            ""
                        }
                    )
                })
                .collect();
            format!("会话列表 [{}]", parts.join(", "))
        }
        Snapshot::Messages(list) => format!("消息 {} 条", list.len()),
        Snapshot::Notifications(list) => {
            let parts: Vec<&str> = list.iter().map(|n| n.message.as_str()).collect();
            format!("未读通知 {:?}", parts)
        }
        Snapshot::HiddenIndex(index) => format!(
            "隐藏索引 会话 {} / 消息 {}",
            index.conversations.len(),
            index.messages.len()
        ),
        Snapshot::Friendships(o) => format!(
            "好友 {} / 收到请求 {} / 发出请求 {}",
            o.friends.len(),
            o.incoming.len(),
            o.outgoing.len()
        ),
    }
}

/// 打印会话里已排队的快照
async fn print_deliveries(label: &str, session: &mut Session) {
    // 给推送任务一点时间消费事件
    sleep(Duration::from_millis(50)).await;
    while let Ok(Some(delivery)) = timeout(Duration::from_millis(20), session.next_delivery()).await {
        info!("[CLI] 📥 {} 收到 #{} {}", label, delivery.subscription_id, describe(&delivery));
    }
}

async fn run_demo() -> Result<()> {
    let core = SocialCore::open(SocialConfig::in_memory()).await?;
    for (id, name) in [("alice", "Alice"), ("bob", "Bob")] {
        core.register_user(&UserProfile {
            id: id.into(),
            display_name: name.into(),
            email: format!("{}@example.com", id),
            handle: id.into(),
        })
        .await?;
    }

    let mut alice = core.session("alice");
    alice.subscribe_standing().await?;
    print_deliveries("alice", &mut alice).await;

    info!("[CLI] 👥 alice 向 bob 发送好友请求");
    let request = core.friends.send_request("alice", "bob").await?;
    core.friends.accept(&request.id, "bob").await?;
    info!(
        "[CLI] ✅ bob 已接受，alice 与 bob 是好友: {}",
        core.friends.are_friends("alice", "bob").await?
    );
    print_deliveries("alice", &mut alice).await;

    let chat = core.gate.create_private_chat("alice", "bob@example.com").await?;
    info!("[CLI] 💬 私聊已创建: {}", chat.id);
    for text in ["hi", "how are you?", "movie tonight?"] {
        core.ledger.send(&chat.id, "bob", text).await?;
    }
    core.ledger
        .send_attachment(
            &chat.id,
            "bob",
            AttachmentKind::Image,
            &format!("https://files.example.com/{}/poster.png", chat.id),
            "poster.png",
        )
        .await?;
    print_deliveries("alice", &mut alice).await;

    let messages = core.unread.open_conversation(&chat.id, "alice").await?;
    info!("[CLI] 📖 alice 打开私聊，共 {} 条消息", messages.len());
    for m in &messages {
        info!("[CLI]   #{} {}: {}", m.seq, m.sender_id, m.content.summary());
    }
    print_deliveries("alice", &mut alice).await;

    core.conversations
        .delete_conversation("bob", &chat.id, DeleteScope::ForEveryone)
        .await?;
    info!("[CLI] 🗑️ bob 对所有人删除了私聊");
    print_deliveries("alice", &mut alice).await;

    alice.stop();
    info!("[CLI] 👋 演示结束");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level)?;

    match args.command {
        Command::Serve {
            db_url,
            addr,
            compression,
            directory_api_url,
            edit_window_secs,
            duration,
        } => {
            info!("[CLI] 🚀 启动推送网关");
            let mut config = SocialConfig::new(db_url);
            config.gateway_addr = addr;
            config.compression = compression;
            config.directory_api_url = directory_api_url;
            config.edit_window_secs = edit_window_secs;

            let core = SocialCore::open(config).await?;
            let gateway = PushGateway::new(core);
            let listener = gateway.bind().await?;

            if duration > 0 {
                info!("[CLI] ⏰ {} 秒后自动退出", duration);
                match timeout(Duration::from_secs(duration), gateway.serve(listener)).await {
                    Ok(res) => res?,
                    Err(_) => info!("[CLI] 👋 程序退出"),
                }
            } else {
                info!("[CLI] ⏰ 持续运行中，按 Ctrl+C 退出");
                gateway.serve(listener).await?;
            }
        }
        Command::Demo => run_demo().await?,
    }

    Ok(())
}
