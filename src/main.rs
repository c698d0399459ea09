//! Ciana entry point: wires stores, agent, router, channels, scheduler.

use anyhow::Context as _;
use ciana::agent::checkpoints::CheckpointStore;
use ciana::agent::{Agent, ConversationAgent};
use ciana::channels::{ChannelDyn, ChannelRegistry, MessageHandler};
use ciana::channels::telegram::TelegramChannel;
use ciana::config::Config;
use ciana::gateway::GatewayClient;
use ciana::llm::TierRouter;
use ciana::router::{ChannelRuntimeConfig, MessageRouter};
use ciana::scheduler::Scheduler;
use ciana::sessions::SessionMap;
use ciana::store::DocStore;
use ciana::tasks::TaskLog;
use ciana::tools::ToolRegistry;
use ciana::tools::cron::{CancelTaskTool, ListTasksTool, ScheduleTaskTool};
use ciana::tools::host::HostExecuteTool;
use ciana::tools::model_router::SwitchModelTool;
use ciana::tools::web::{WebFetchTool, WebSearchTool};
use ciana::transcription::TranscriptionService;
use ciana::{context, llm};
use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ciana", version)]
#[command(about = "Multi-channel conversational-agent host")]
struct Cli {
    /// Path to the config file
    #[arg(short, long, default_value = "config.yaml")]
    config: std::path::PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config).context("configuration error")?;

    let directive = if cli.debug {
        "debug"
    } else {
        config.logging.env_filter_directive()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!("Ciana starting");

    let workspace = config.agent.workspace.clone();
    let data_dir = config.agent.data_dir.clone();
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.display()))?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

    // Agent checkpoint store (also read by session reconciliation).
    let checkpoints_path = data_dir.join("checkpoints.db");
    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(&checkpoints_path)
        .create_if_missing(true);
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect_with(connect_options)
        .await
        .with_context(|| format!("failed to open {}", checkpoints_path.display()))?;
    let checkpoints = CheckpointStore::new(pool.clone());
    checkpoints.migrate().await.context("checkpoint migration failed")?;

    // Session counters, reconciled against known checkpoint threads.
    let sessions = Arc::new(SessionMap::new(DocStore::open(
        data_dir.join("session_counters.json"),
    )));
    sessions.reconcile(&pool).await;

    // Task log shared by tools and scheduler.
    let task_log = Arc::new(TaskLog::new(config.scheduler.data_file.clone()));

    // Tier router and tools, bound once across all tiers.
    let tier_router = TierRouter::from_config(&config.model_router, &config.provider)
        .context("model router setup failed")?;

    let mut tools = ToolRegistry::new();
    tools.register(ScheduleTaskTool::new(task_log.clone()));
    tools.register(ListTasksTool::new(task_log.clone()));
    tools.register(CancelTaskTool::new(task_log.clone()));
    tools.register(WebSearchTool::new(config.web.brave_api_key.clone()));
    tools.register(WebFetchTool::new(config.web.fetch_timeout));
    if config.model_router.enabled {
        tools.register(SwitchModelTool::new(tier_router.tier_names()));
    }
    if config.gateway.enabled && !config.gateway.url.is_empty() {
        let client = Arc::new(GatewayClient::new(
            config.gateway.url.clone(),
            Some(config.gateway.token.clone()),
        ));
        let bridges: HashMap<String, Vec<String>> = config
            .gateway
            .bridges
            .iter()
            .map(|(name, bridge)| (name.clone(), bridge.allowed_commands.clone()))
            .collect();
        tools.register(HostExecuteTool::new(
            client,
            bridges,
            config.gateway.default_timeout,
        ));
    }

    let tools = Arc::new(tools);
    let bound = tier_router.bind_tools(&tools.definitions());
    tracing::info!(
        tools = tools.len(),
        tiers = ?tier_router.tier_names(),
        "tools bound across tiers"
    );

    let system_prompt = ciana::agent::load_system_prompt(&workspace);
    let agent: Arc<dyn Agent> = Arc::new(ConversationAgent::new(
        bound,
        tools,
        checkpoints,
        system_prompt,
        config.agent.max_tool_iterations,
    ));
    tracing::info!("agent ready");

    let router = Arc::new(MessageRouter::new(
        agent.clone(),
        sessions,
        workspace.join("sessions"),
    ));

    // Channels: construct, register the router callback, start. A channel
    // that fails to start is excluded, not fatal.
    let transcription = TranscriptionService::from_config(&config.transcription).map(Arc::new);
    let mut registry = ChannelRegistry::new();
    let mut running: Vec<Arc<dyn ChannelDyn>> = Vec::new();

    if config.channels.telegram.enabled {
        let telegram_config = config.channels.telegram.clone();
        let channel = Arc::new(TelegramChannel::new(&telegram_config, transcription.clone()));

        let handler_router = router.clone();
        let runtime_config = ChannelRuntimeConfig::from(&telegram_config);
        let handler: MessageHandler = Arc::new(move |msg| {
            let router = handler_router.clone();
            let runtime_config = runtime_config.clone();
            Box::pin(async move {
                // Fresh tier and invocation-context scopes per message.
                llm::router::tier_scope(context::scope(None, async move {
                    router.handle_message(&msg, &runtime_config).await
                }))
                .await
            })
        });
        channel.on_message(handler);

        match channel.start().await {
            Ok(()) => {
                tracing::info!(channel = %channel.name(), "channel started");
                registry.register(channel.clone());
                running.push(channel);
            }
            Err(error) => {
                tracing::error!(%error, "telegram channel failed to start, excluded");
            }
        }
    }
    let registry = Arc::new(registry);

    // Scheduler.
    let scheduler = if config.scheduler.enabled {
        let scheduler = Arc::new(Scheduler::new(
            task_log,
            agent,
            registry.clone(),
            config.scheduler.poll_interval,
        ));
        scheduler.clone().start().await;
        Some(scheduler)
    } else {
        None
    };

    tracing::info!("Ciana is running, press Ctrl+C to stop");
    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    if let Some(scheduler) = &scheduler {
        scheduler.stop().await;
    }
    for channel in &running {
        if let Err(error) = channel.stop().await {
            tracing::warn!(%error, channel = %channel.name(), "channel stop failed");
        }
    }
    pool.close().await;

    tracing::info!("Ciana stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(error) => {
                tracing::error!(%error, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
