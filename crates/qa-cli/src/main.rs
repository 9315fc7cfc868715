mod output;

use std::io::{self, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use qa_client::{
    AuthGateway, CredentialStore, QaError, QaService, QueryController, Renderer, SendOptions,
    SessionManager, SessionSummary, TurnState, MANUAL_CANCEL_REASON,
};
use qa_core::ClientConfig;

use output::TerminalRenderer;

#[derive(Parser)]
#[command(name = "campus-qa")]
#[command(about = "Terminal client for the campus knowledge-base QA service")]
#[command(version)]
struct Cli {
    /// Base URL of the QA service (overrides config file and QA_BASE_URL)
    #[arg(long)]
    server_url: Option<String>,

    /// Enable debug output
    #[arg(long, short, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the access token
    Login {
        /// Student id / username
        username: String,
    },
    /// Change the account password
    ChangePassword,
    /// Ask a single question
    Ask {
        question: String,
        /// Wait for the complete answer instead of streaming
        #[arg(long)]
        no_stream: bool,
        /// Number of knowledge-base chunks to retrieve
        #[arg(long)]
        top_k: Option<u32>,
    },
    /// Start interactive chat
    Chat,
    /// Manage conversation sessions
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Check service health
    Health,
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List sessions
    List,
    /// Create a session and make it active
    New {
        #[arg(long)]
        title: Option<String>,
    },
    /// Rename a session
    Rename { session_id: String, title: String },
    /// Delete a session
    Delete { session_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = ClientConfig::new();
    if let Some(url) = &cli.server_url {
        config.base_url = url.clone();
    }
    if cli.debug {
        eprintln!(
            "{}",
            format!("[DEBUG] Server URL: {}", config.base_url).dimmed()
        );
    }

    let service = Arc::new(QaService::new(config.base_url.clone()));
    let auth = Arc::new(CredentialStore::new());

    match cli.command {
        Commands::Login { username } => run_login(&service, &auth, &username).await,
        Commands::ChangePassword => run_change_password(&service, &auth).await,
        Commands::Ask {
            question,
            no_stream,
            top_k,
        } => run_ask(service, auth, &config, &question, no_stream, top_k).await,
        Commands::Chat => run_chat(service, auth, &config).await,
        Commands::Sessions { command } => run_sessions(service, auth, command).await,
        Commands::Health => run_health(&service).await,
    }
}

async fn run_login(
    service: &QaService,
    auth: &CredentialStore,
    username: &str,
) -> anyhow::Result<()> {
    let password = prompt("密码: ")?;
    match service.login(username, &password).await {
        Ok(login) => {
            auth.store_credential(&login.token, login.must_change_password);
            println!("{}", "登录成功".green());
            if login.must_change_password {
                println!(
                    "{}",
                    "首次登录需要修改初始密码，请运行 campus-qa change-password".yellow()
                );
            }
        }
        Err(err) => println!("{}", format!("登录失败：{}", error_text(&err)).red()),
    }
    Ok(())
}

async fn run_change_password(service: &QaService, auth: &CredentialStore) -> anyhow::Result<()> {
    let Some(token) = auth.credential() else {
        println!("{}", "尚未登录，请先运行 campus-qa login <学号>".yellow());
        return Ok(());
    };
    let first = prompt("新密码: ")?;
    if first.len() < 6 {
        println!("{}", "新密码至少6位".red());
        return Ok(());
    }
    let second = prompt("再次输入新密码: ")?;
    if first != second {
        println!("{}", "两次输入不一致".red());
        return Ok(());
    }
    match service.change_password(&token, &first).await {
        Ok(()) => {
            auth.password_changed();
            println!("{}", "密码修改成功".green());
        }
        Err(QaError::AuthExpired) => {
            auth.clear_credential();
            println!("{}", "登录已过期，请重新登录".red());
        }
        Err(err) => println!("{}", error_text(&err).red()),
    }
    Ok(())
}

async fn run_ask(
    service: Arc<QaService>,
    auth: Arc<CredentialStore>,
    config: &ClientConfig,
    question: &str,
    no_stream: bool,
    top_k: Option<u32>,
) -> anyhow::Result<()> {
    if !require_ready(&auth) {
        return Ok(());
    }
    let renderer: Arc<dyn Renderer> = Arc::new(TerminalRenderer::new());
    let auth_gateway: Arc<dyn AuthGateway> = auth.clone();
    let sessions = SessionManager::new(service.clone(), auth_gateway.clone(), renderer.clone());
    let mut controller = QueryController::new(service, auth_gateway, renderer, sessions);

    let options = SendOptions {
        top_k: top_k.or(config.top_k),
        max_tokens: None,
        streaming: !no_stream && config.streaming,
    };
    match controller.send_query(question, options) {
        Ok(()) => {
            let state = wait_with_interrupt(&mut controller).await;
            report_turn(&auth, state);
        }
        Err(err) => println!("{}", error_text(&err).red()),
    }
    Ok(())
}

async fn run_chat(
    service: Arc<QaService>,
    auth: Arc<CredentialStore>,
    config: &ClientConfig,
) -> anyhow::Result<()> {
    if !require_ready(&auth) {
        return Ok(());
    }
    let renderer: Arc<dyn Renderer> = Arc::new(TerminalRenderer::new());
    let auth_gateway: Arc<dyn AuthGateway> = auth.clone();
    let sessions = SessionManager::new(service.clone(), auth_gateway.clone(), renderer.clone());
    let mut controller = QueryController::new(service, auth_gateway, renderer, sessions);

    println!("{}", "📚 校园知识库问答".cyan().bold());
    println!(
        "{}",
        "输入问题开始提问；/help 查看会话命令；exit 退出；Ctrl-C 停止生成".dimmed()
    );
    if let Err(err) = controller.load_history().await {
        println!("{}", error_text(&err).red());
    }
    let _ = controller.refresh_sessions().await;

    let options = SendOptions {
        top_k: config.top_k,
        max_tokens: None,
        streaming: config.streaming,
    };

    loop {
        print!("{} ", "你>".cyan().bold());
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            println!("{}", "再见！".cyan());
            break;
        }
        if let Some(command) = input.strip_prefix('/') {
            handle_command(&mut controller, &auth, command).await;
            continue;
        }

        match controller.send_query(input, options.clone()) {
            Ok(()) => {
                let state = wait_with_interrupt(&mut controller).await;
                report_turn(&auth, state);
                if auth.credential().is_none() {
                    break;
                }
            }
            Err(err) => println!("{}", error_text(&err).red()),
        }
        println!();
    }
    Ok(())
}

async fn handle_command(controller: &mut QueryController, auth: &CredentialStore, command: &str) {
    let mut parts = command.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).filter(|arg| !arg.is_empty());

    let result = match name {
        "new" => controller.create_session(arg).await.map(|session_id| {
            println!("{}", format!("已创建会话 {session_id}").green());
        }),
        "sessions" => controller.refresh_sessions().await.map(|sessions| {
            print_session_list(&sessions);
        }),
        "switch" => match arg {
            Some(session_id) => controller.switch_session(session_id).await,
            None => {
                println!("用法: /switch <会话ID>");
                Ok(())
            }
        },
        "rename" => {
            let sessions = controller.sessions();
            let active = sessions
                .lock()
                .await
                .active_session()
                .map(str::to_string);
            match (active, arg) {
                (Some(session_id), Some(title)) => controller
                    .rename_session(&session_id, title)
                    .await
                    .map(|()| println!("{}", "已重命名当前会话".green())),
                (None, _) => {
                    println!("当前没有活动会话");
                    Ok(())
                }
                (_, None) => {
                    println!("用法: /rename <新标题>");
                    Ok(())
                }
            }
        }
        "delete" => {
            let sessions = controller.sessions();
            let active = sessions
                .lock()
                .await
                .active_session()
                .map(str::to_string);
            match active {
                Some(session_id) => controller.delete_session(&session_id).await,
                None => {
                    println!("当前没有活动会话");
                    Ok(())
                }
            }
        }
        _ => {
            println!("可用命令: /new [标题]  /sessions  /switch <会话ID>  /rename <新标题>  /delete");
            Ok(())
        }
    };

    if let Err(err) = result {
        println!("{}", error_text(&err).red());
        report_turn(auth, None);
    }
}

async fn run_sessions(
    service: Arc<QaService>,
    auth: Arc<CredentialStore>,
    command: SessionCommands,
) -> anyhow::Result<()> {
    let Some(token) = auth.credential() else {
        println!("{}", "尚未登录，请先运行 campus-qa login <学号>".yellow());
        return Ok(());
    };

    match command {
        SessionCommands::List => match service.list_sessions(&token).await {
            Ok(sessions) => print_session_list(&sessions),
            Err(err) => println!("{}", error_text(&err).red()),
        },
        SessionCommands::New { title } => {
            let renderer: Arc<dyn Renderer> = Arc::new(TerminalRenderer::new());
            let mut sessions =
                SessionManager::new(service.clone(), auth.clone() as Arc<dyn AuthGateway>, renderer);
            match sessions.create_session(title.as_deref(), false).await {
                Ok(created) => println!(
                    "{}",
                    format!("已创建会话 {}（{}）", created.session_id, created.title).green()
                ),
                Err(err) => println!("{}", error_text(&err).red()),
            }
        }
        SessionCommands::Rename { session_id, title } => {
            match service.rename_session(&token, &session_id, &title).await {
                Ok(summary) => println!("{}", format!("已重命名为 {}", summary.title).green()),
                Err(err) => println!("{}", error_text(&err).red()),
            }
        }
        SessionCommands::Delete { session_id } => {
            let renderer: Arc<dyn Renderer> = Arc::new(TerminalRenderer::new());
            let mut sessions =
                SessionManager::new(service.clone(), auth.clone() as Arc<dyn AuthGateway>, renderer);
            match sessions.delete_session(&session_id).await {
                Ok(()) => println!("{}", "已删除会话".green()),
                Err(err) => println!("{}", error_text(&err).red()),
            }
        }
    }
    Ok(())
}

async fn run_health(service: &QaService) -> anyhow::Result<()> {
    match service.health().await {
        Ok(health) => {
            println!("{}", format!("状态：{}", health.status).green());
            println!("向量模型：{}", health.embedding_model);
            println!("已索引文档：{}", health.docs_indexed);
        }
        Err(err) => println!("{}", error_text(&err).red()),
    }
    Ok(())
}

/// Cancel the in-flight turn on Ctrl-C while awaiting its terminal state.
async fn wait_with_interrupt(controller: &mut QueryController) -> Option<TurnState> {
    let cancel = controller.cancel_handle();
    let listener = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel(MANUAL_CANCEL_REASON);
        }
    });
    let state = controller.wait_turn().await;
    listener.abort();
    state
}

fn report_turn(auth: &CredentialStore, state: Option<TurnState>) {
    if auth.take_login_requested() {
        println!("{}", "请重新运行 campus-qa login <学号> 登录".yellow());
    }
    if auth.take_password_change_requested() {
        println!(
            "{}",
            "请运行 campus-qa change-password 修改初始密码后重试".yellow()
        );
    }
    if let Some(TurnState::Failed { detail }) = state {
        log::debug!("turn failed: {detail}");
    }
}

fn require_ready(auth: &CredentialStore) -> bool {
    if auth.credential().is_none() {
        println!("{}", "尚未登录，请先运行 campus-qa login <学号>".yellow());
        return false;
    }
    if auth.password_change_required() {
        println!(
            "{}",
            "首次登录需要修改初始密码，请运行 campus-qa change-password".yellow()
        );
        return false;
    }
    true
}

fn print_session_list(sessions: &[SessionSummary]) {
    if sessions.is_empty() {
        println!("{}", "暂无会话".dimmed());
        return;
    }
    for summary in sessions {
        println!(
            "{}  {}  {}",
            summary.session_id.yellow(),
            summary.title,
            format!(
                "{} 条消息 · {}",
                summary.message_count,
                format_timestamp(summary.updated_at)
            )
            .dimmed()
        );
    }
}

fn format_timestamp(seconds: f64) -> String {
    chrono::DateTime::from_timestamp(seconds as i64, 0)
        .map(|instant| {
            instant
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| "-".to_string())
}

fn error_text(err: &QaError) -> String {
    match err {
        QaError::Api(detail) => detail.clone(),
        QaError::AuthExpired => "登录已过期，请重新登录".to_string(),
        QaError::PasswordRequired => "需要先修改初始密码".to_string(),
        QaError::RequestInFlight => "上一个请求还在进行中，请先停止".to_string(),
        other => other.to_string(),
    }
}

fn prompt(label: &str) -> anyhow::Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
