//! 社交同步 CLI 客户端
//!
//! 非交互式 CLI，每次调用执行一个命令。多个进程使用同一个 SQLite 存储文件时，
//! 彼此就像同一浏览器中的多个标签页：`watch` 会在其他进程写入后重新同步。

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use social_sync_core::logging::init_logger;
use social_sync_core::{
    ClientConfig, ConnectAttempt, ConnectionStatus, FeedKind, ReconcilePolicy, Session,
    SessionStore, SharedStorage, SocialClient, SqliteStorage,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Duration, Instant};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "social-cli")]
#[command(about = "社交同步 CLI 客户端 - 连接状态与消息", long_about = None)]
struct Args {
    /// API 基础地址（默认读取 SOCIAL_API_BASE_URL）
    #[arg(long)]
    api: Option<String>,

    /// 共享存储（默认读取 SOCIAL_STORAGE_URL）
    #[arg(long)]
    storage: Option<String>,

    /// 以该用户身份登录（写入共享存储，等同于认证模块完成登录）
    #[arg(long)]
    user: Option<String>,

    /// 认证 token，配合 --user 使用
    #[arg(long, default_value = "")]
    token: String,

    /// 对账策略：ack / fixed
    #[arg(long)]
    policy: Option<ReconcilePolicy>,

    #[arg(long, default_value = "info,social_sync_core=debug")]
    log_level: String,

    /// 日志文件（追加模式）
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 查询与某个用户的连接状态
    Status { user_id: String },
    /// 发送好友申请并等待对账结束
    Connect { user_id: String, message: String },
    /// 待处理的好友申请
    Pending,
    Accept { request_id: String },
    Reject { request_id: String },
    /// 用户列表：suggested / friends / recent / same-city
    Feed {
        #[arg(value_delimiter = ',', default_value = "suggested,friends")]
        kinds: Vec<String>,
    },
    /// 会话列表
    Conversations,
    /// 打开与某个用户的会话
    Open { user_id: String },
    /// 会话消息
    Thread { conversation_id: String },
    /// 发送消息
    Send { conversation_id: String, body: String },
    /// 定期检查其他进程的变更并重新同步
    Watch {
        /// 检查间隔（秒）
        #[arg(long, default_value = "5")]
        interval: u64,
        /// 运行时长（秒），0 表示持续运行
        #[arg(long, default_value = "0")]
        duration: u64,
    },
}

fn parse_feed_kind(raw: &str) -> Result<FeedKind> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "suggested" => Ok(FeedKind::Suggested),
        "friends" => Ok(FeedKind::Friends),
        "recent" => Ok(FeedKind::Recent),
        "same-city" | "samecity" => Ok(FeedKind::SameCity),
        other => Err(anyhow!("未知的用户列表: {}", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level, args.log_file.as_deref())?;

    let mut config = ClientConfig::from_env();
    if let Some(api) = args.api {
        config.api_base_url = api;
    }
    if let Some(storage) = args.storage {
        config.storage_url = storage;
    }
    if let Some(policy) = args.policy {
        config.reconcile_policy = policy;
    }

    let storage: Arc<dyn SharedStorage> = Arc::new(
        SqliteStorage::connect(&config.storage_url)
            .await
            .context("打开共享存储失败")?,
    );
    if let Some(user_id) = args.user {
        let mut session = Session::new(user_id);
        session.token = args.token;
        SessionStore::new(storage.clone()).save(&session).await?;
    }

    let client = SocialClient::start(config, storage)
        .await
        .map_err(|e| anyhow!("启动客户端失败: {}", e))?;
    info!("[CLI] 🚀 当前用户: {}", client.session().user_id);

    run(&client, args.command).await?;
    wait_background_tasks(&client).await;
    client.dispose();
    Ok(())
}

/// 退出前等待后台已读通知完成，超时后放弃
async fn wait_background_tasks(client: &SocialClient) {
    let drained = tokio::time::timeout(Duration::from_secs(3), async {
        while client.threads().pending_tasks() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!("[CLI] 后台已读通知未完成，放弃等待");
    }
}

async fn run(client: &SocialClient, command: Command) -> Result<()> {
    match command {
        Command::Status { user_id } => {
            let outcome = client.engine().get_status(&user_id).await;
            if let Some(e) = &outcome.error {
                warn!("[CLI] 状态查询失败，显示默认值: {}", e);
            }
            println!("{}", outcome.value);
        }
        Command::Connect { user_id, message } => {
            match client.engine().request_connect(&user_id, &message)? {
                ConnectAttempt::Submitted(ticket) => {
                    println!("{}（待确认）", ConnectionStatus::Pending);
                    match ticket.outcome().await {
                        Some(Ok(request)) => println!("申请已发送: {}", request.id),
                        Some(Err(e)) => println!("申请失败: {}", e),
                        None => println!("申请已取消"),
                    }
                    let outcome = client.engine().get_status(&user_id).await;
                    println!("{}", outcome.value);
                }
                ConnectAttempt::AlreadyInFlight => println!("已有申请在进行中"),
                ConnectAttempt::NotConnectable(status) => println!("当前状态为 {}，无法申请", status),
            }
        }
        Command::Pending => {
            let outcome = client.engine().pending_requests().await;
            if let Some(e) = &outcome.error {
                warn!("[CLI] 获取待处理申请失败: {}", e);
            }
            for request in outcome.value {
                println!("{}\t{}\t{}", request.id, request.from_user_id, request.message);
            }
        }
        Command::Accept { request_id } => {
            let request = client.engine().accept_request(&request_id).await?;
            client.engine().invalidate(&request.from_user_id);
            println!("已接受 {} 的申请", request.from_user_id);
        }
        Command::Reject { request_id } => {
            let request = client.engine().reject_request(&request_id).await?;
            client.engine().invalidate(&request.from_user_id);
            println!("已拒绝 {} 的申请", request.from_user_id);
        }
        Command::Feed { kinds } => {
            let kinds = kinds
                .iter()
                .map(|k| parse_feed_kind(k))
                .collect::<Result<Vec<_>>>()?;
            let snapshot = client.feed().load(&kinds).await;
            if let Some(banner) = &snapshot.banner {
                println!("⚠️  {}", banner);
            }
            for kind in kinds {
                println!("== {} ==", kind.as_str());
                for user in snapshot.users(kind) {
                    let status = client
                        .engine()
                        .cached_status(&user.user_id)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("{}\t{}\t{}", user.user_id, user.display_name(), status);
                }
            }
        }
        Command::Conversations => {
            let outcome = client.conversations().refresh().await;
            if let Some(e) = &outcome.error {
                warn!("[CLI] 拉取会话列表失败，显示本地缓存: {}", e);
            }
            for conv in outcome.value {
                println!(
                    "{}{}\t{}\t{}",
                    if conv.has_unread { "● " } else { "  " },
                    conv.conversation_id,
                    conv.other_user_name,
                    conv.last_message_preview.unwrap_or_default()
                );
            }
        }
        Command::Open { user_id } => {
            let conv = client.conversations().open_with_user(&user_id).await?;
            println!("{}\t{}", conv.conversation_id, conv.other_user_name);
        }
        Command::Thread { conversation_id } => {
            let outcome = client.threads().load_thread(&conversation_id).await;
            if let Some(e) = &outcome.error {
                warn!("[CLI] 加载消息失败: {}", e);
            }
            for msg in outcome.value {
                println!(
                    "[{}] {}: {}",
                    msg.sent_at.format("%m-%d %H:%M"),
                    msg.sender_name,
                    msg.body
                );
            }
        }
        Command::Send {
            conversation_id,
            body,
        } => {
            client.conversations().refresh().await;
            let conversation = client
                .conversations()
                .book()
                .get(&conversation_id)
                .ok_or_else(|| anyhow!("会话不存在: {}", conversation_id))?;
            let sent = client.composer().send(&conversation, &body).await?;
            println!("已发送: {}", sent.id);
        }
        Command::Watch { interval: secs, duration } => {
            let started = Instant::now();
            let mut ticker = interval(Duration::from_secs(secs.max(1)));
            info!("[CLI] 👀 开始监听变更，间隔 {} 秒", secs);
            loop {
                ticker.tick().await;
                match client.on_focus_regained().await {
                    Ok(true) => info!("[CLI] 🔄 检测到其他进程的变更，已重新同步"),
                    Ok(false) => {}
                    Err(e) => warn!("[CLI] 检查变更失败: {}", e),
                }
                if duration > 0 && started.elapsed() >= Duration::from_secs(duration) {
                    break;
                }
            }
        }
    }
    Ok(())
}
