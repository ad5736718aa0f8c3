use galleria::cluster::{supervisor, worker, MessageKind, WorkerMessage};
use galleria::server::{self, Role};
use galleria::tasks::{self, TaskContext};
use galleria::{config, logging};

const USAGE: &str = "usage: galleria [run-task <album-covers|album-archives|file-metadata>]";

enum Command {
    Serve,
    RunTask(String),
}

fn parse_args() -> anyhow::Result<Command> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => Ok(Command::Serve),
        [cmd, name] if cmd == "run-task" => Ok(Command::RunTask(name.clone())),
        _ => Err(anyhow::anyhow!(USAGE)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if worker::worker_id().is_some() {
        return run_worker().await;
    }

    // Logging (stdout + daily rotation under ./logs)
    let _log_guards = logging::init_console();

    let command = parse_args()?;
    let app_cfg = config::load()?;

    match command {
        Command::RunTask(name) => {
            let state = server::build_state(app_cfg).await?;
            let registry = tasks::registry(&state.config);
            let ctx = TaskContext { db: state.db.clone(), storage: state.storage.clone(), metrics: state.metrics.clone() };
            tasks::run_once(&registry, &name, &ctx).await
        }
        Command::Serve if app_cfg.cluster.enabled => supervisor::run(&app_cfg).await,
        Command::Serve => server::run(app_cfg, Role::Standalone).await,
    }
}

/// A worker reports failures to the supervisor and exits non-zero so it gets replaced.
async fn run_worker() -> anyhow::Result<()> {
    logging::init_worker();
    worker::install_panic_hook();

    let result = match config::load() {
        Ok(cfg) => worker::run(cfg).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        let _ = WorkerMessage::new(MessageKind::Error, format!("Worker failed: {:#}", e)).send();
        std::process::exit(1);
    }
    Ok(())
}
