use std::io::Read;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use grasp_domain::request::Task;
use grasp_gateway::cli::{load_config, Cli, Command};
use grasp_gateway::runtime::{spawn_generation, CancelToken, Produced};
use grasp_gateway::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        Command::Serve { config, port, host } => {
            let mut config = load_config(Some(&config))?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            serve(config).await
        }
        Command::Run {
            config,
            input,
            task,
            kgs,
        } => {
            let config = load_config(Some(&config))?;
            run_single(config, &input, &task, kgs).await
        }
    }
}

fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(config: grasp_domain::config::AppConfig) -> anyhow::Result<()> {
    tracing::info!("GRASP server starting");

    let address = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::initialize(config)?;
    let app = grasp_gateway::api::router(state);

    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(%address, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_single(
    config: grasp_domain::config::AppConfig,
    input: &str,
    task: &str,
    kgs: Vec<String>,
) -> anyhow::Result<()> {
    let task: Task = serde_json::from_value(serde_json::json!(task))
        .map_err(|_| anyhow::anyhow!("unknown task {task}"))?;

    let input = if input == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer.trim().to_string()
    } else {
        input.to_string()
    };

    let state = AppState::initialize(config)?;
    let selection = if kgs.is_empty() { state.kg_names() } else { kgs };
    let deps = state.deps_for(&selection)?;

    let mut rx = spawn_generation(
        deps,
        task,
        serde_json::Value::String(input),
        None,
        CancelToken::new(),
    );

    while let Some(produced) = rx.recv().await {
        match produced {
            Produced::Event(event) => println!("{}", serde_json::to_string(&event)?),
            Produced::Failed(e) => anyhow::bail!("generation failed: {e}"),
        }
    }

    Ok(())
}
