// ABOUTME: Entry point for the archscribe binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and either serves the HTTP API or runs one task.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use archscribe_agent::{
    AgentConfig, EventEmitter, LoopEvent, LoopSettings, TaskRequest, TaskRunner, TaskStatus,
    create_provider,
};
use archscribe_core::DiagramType;
use archscribe_server::{AppState, ServerConfig, create_router};
use archscribe_store::{FileStorage, MessageStateHandler};
use clap::{Parser, Subcommand};
use ulid::Ulid;

#[derive(Debug, Parser)]
#[command(name = "archscribe", version, about = "Explore a codebase and draw its architecture")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP server.
    Serve,
    /// Run one task in the terminal and write the diagram to a file.
    Run {
        /// Task instruction, e.g. "Generate a diagram for /path/to/repo".
        message: String,
        /// Diagram type identifier such as data-flow or database-er.
        #[arg(short = 't', long, default_value = "system-architecture")]
        diagram_type: String,
        /// Where to write the final .drawio document.
        #[arg(short, long, default_value = "diagram.drawio")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "archscribe=debug,tower_http=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve => serve().await,
        Command::Run {
            message,
            diagram_type,
            output,
        } => run(message, DiagramType::parse_or_default(&diagram_type), output).await,
    }
}

async fn serve() -> anyhow::Result<()> {
    let server = ServerConfig::from_env()?;
    let agent = AgentConfig::from_env()?;
    tracing::info!(
        bind = %server.bind,
        home = %server.home.display(),
        provider = %agent.provider.as_str(),
        model = %agent.model,
        "archscribe starting up"
    );

    let state = Arc::new(AppState::new(
        create_provider(&agent),
        Arc::new(FileStorage::new(&server.home)),
        LoopSettings::from(&agent),
    ));
    let listener = tokio::net::TcpListener::bind(server.bind)
        .await
        .with_context(|| format!("failed to bind {}", server.bind))?;
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

async fn run(message: String, diagram_type: DiagramType, output: PathBuf) -> anyhow::Result<()> {
    let server = ServerConfig::from_env()?;
    let agent = AgentConfig::from_env()?;
    let task_id = Ulid::new();
    let storage = Arc::new(FileStorage::new(&server.home));
    let handler = Arc::new(MessageStateHandler::new(task_id, storage));
    let runner = TaskRunner::new(create_provider(&agent), handler, LoopSettings::from(&agent));

    let (emitter, mut rx) = EventEmitter::channel();
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            let _ = match &event {
                LoopEvent::Text { text } => write!(stdout, "{text}"),
                LoopEvent::ToolCall { name, .. } => writeln!(stdout, "\n> {name}"),
                LoopEvent::ToolResult {
                    tool_name,
                    is_error: true,
                    ..
                } => writeln!(stdout, "  {tool_name} failed"),
                LoopEvent::Diagram { cell_count, .. } => {
                    writeln!(stdout, "  diagram now has {cell_count} cell(s)")
                }
                LoopEvent::Error { error } => writeln!(stdout, "\nerror: {error}"),
                LoopEvent::MaxTurns { turns } => {
                    writeln!(stdout, "\nstopped after {turns} turns")
                }
                _ => Ok(()),
            };
            let _ = stdout.flush();
        }
    });

    let outcome = runner
        .run(TaskRequest::new(message, diagram_type), &emitter)
        .await?;
    drop(emitter);
    let _ = printer.await;

    if let Some(xml) = &outcome.diagram {
        std::fs::write(&output, xml)
            .with_context(|| format!("failed to write {}", output.display()))?;
        println!("\nDiagram written to {}", output.display());
    }
    if let Some(result) = &outcome.completion {
        println!("\n{result}");
    }
    println!("task {} finished: {:?}", outcome.task_id, outcome.status);

    if outcome.status == TaskStatus::Failed {
        anyhow::bail!(outcome.error.unwrap_or_else(|| "task failed".to_string()));
    }
    Ok(())
}
