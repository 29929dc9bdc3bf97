mod config;
mod serve_cmd;
mod task_cmds;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use kiln_core::Engine;
use kiln_core::agent_runner::SubprocessAgentRunner;
use kiln_core::chat::BroadcastChat;
use kiln_core::log_ring::{LogRingBuffer, LogRingLayer};
use kiln_core::modes::ModeRegistry;
use kiln_core::vcs::GitVcs;
use kiln_db::pool;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use config::KilnConfig;

#[derive(Parser)]
#[command(name = "kiln", about = "Autonomous multi-agent task pipeline")]
struct Cli {
    /// Database URL (overrides KILN_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a kiln config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/kiln")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the kiln database and run migrations
    DbInit,
    /// Run the scheduler tick loop and the HTTP surface together
    Serve {
        /// Bind address
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        /// Port to bind (overrides WEB_PORT/--port precedence: this flag wins)
        #[arg(long)]
        port: Option<u16>,
        /// Agent command to invoke for every agent-role phase (argv[0])
        #[arg(long, default_value = "true")]
        agent_command: String,
        /// Arguments passed to every invocation of --agent-command
        #[arg(long)]
        agent_arg: Vec<String>,
    },
    /// Task management
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Dead-letter queue management
    DeadLetter {
        #[command(subcommand)]
        command: DeadLetterCommands,
    },
    /// Show aggregate task stats
    Stats,
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Create a new task
    Create {
        /// Task title
        title: String,
        /// Task description
        #[arg(long, default_value = "")]
        description: String,
        /// Path to the repository this task operates on
        #[arg(long)]
        repo_path: String,
        /// Pipeline mode to dispatch through
        #[arg(long, default_value = "software-engineering")]
        mode: String,
        /// Creator identifier (e.g. chat user)
        #[arg(long, default_value = "")]
        created_by: String,
        /// Chat target to notify on phase results and dead-letter
        #[arg(long, default_value = "")]
        notify_chat: String,
    },
    /// List active tasks, priority-sorted
    List,
    /// Show one task's full detail
    Show {
        /// Task ID
        id: i64,
    },
    /// Requeue a dead-lettered task
    Requeue {
        /// Task ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum DeadLetterCommands {
    /// List dead-lettered tasks
    List,
}

/// `kiln init`: write the config file.
fn cmd_init(db_url: &str, force: bool) -> Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `kiln db-init` to create and migrate the database.");

    Ok(())
}

/// `kiln db-init`: create the database (if absent) and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> Result<()> {
    let resolved = KilnConfig::resolve(cli_db_url)?;

    println!("Initializing kiln database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;
    println!("kiln db-init complete.");
    Ok(())
}

/// `kiln serve`: build the engine from resolved config and run the
/// scheduler + HTTP server (§10.6) until interrupted.
async fn cmd_serve(
    cli_db_url: Option<&str>,
    bind: &str,
    port: Option<u16>,
    agent_command: &str,
    agent_args: Vec<String>,
    log_ring: Arc<LogRingBuffer>,
) -> Result<()> {
    let resolved = KilnConfig::resolve(cli_db_url)?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let registry = Arc::new(ModeRegistry::new());

    let agent_runner = Arc::new(SubprocessAgentRunner::new(
        agent_command.to_string(),
        agent_args,
    ));
    let vcs = Arc::new(GitVcs::new());
    let chat = Arc::new(BroadcastChat::new());

    let engine = Engine::new(
        db_pool,
        registry,
        agent_runner,
        vcs,
        chat.clone(),
        resolved.pipeline.clone(),
    )
    .with_log_ring(log_ring);

    let bound_port = port.unwrap_or(resolved.pipeline.web_port);
    serve_cmd::run_serve(engine, chat, bind, bound_port).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_ring = Arc::new(LogRingBuffer::new());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(LogRingLayer::new(log_ring.clone()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Serve {
            bind,
            port,
            agent_command,
            agent_arg,
        } => {
            cmd_serve(
                cli.database_url.as_deref(),
                &bind,
                port,
                &agent_command,
                agent_arg,
                log_ring,
            )
            .await?;
        }
        Commands::Task { command } => {
            let resolved = KilnConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let registry = ModeRegistry::new();

            let result = match command {
                TaskCommands::Create {
                    title,
                    description,
                    repo_path,
                    mode,
                    created_by,
                    notify_chat,
                } => {
                    task_cmds::run_create(
                        &db_pool,
                        &registry,
                        &title,
                        &description,
                        &repo_path,
                        &mode,
                        &created_by,
                        &notify_chat,
                    )
                    .await
                }
                TaskCommands::List => task_cmds::run_list(&db_pool, &registry).await,
                TaskCommands::Show { id } => task_cmds::run_show(&db_pool, id).await,
                TaskCommands::Requeue { id } => {
                    task_cmds::run_requeue(&db_pool, &registry, id).await
                }
            };

            db_pool.close().await;
            result?;
        }
        Commands::DeadLetter { command } => {
            let resolved = KilnConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;

            let result = match command {
                DeadLetterCommands::List => task_cmds::run_dead_letter_list(&db_pool).await,
            };

            db_pool.close().await;
            result?;
        }
        Commands::Stats => {
            let resolved = KilnConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = task_cmds::run_stats(&db_pool).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
