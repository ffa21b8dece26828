use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use corral::manager::{
    api::ManagerServer,
    manager::{self, Manager},
};
use corral::store::{InMemoryStore, PersistentStore, Store};
use corral::task::types::Task;
use corral::worker::{
    api::TaskServer,
    worker::{self, Worker},
};

#[derive(Parser)]
#[command(name = "corral")]
#[command(about = "A small two-tier container-workload orchestrator")]
struct Args {
    /// Address the manager API binds to
    #[arg(long, default_value = "localhost")]
    manager_host: String,

    /// Port the manager API binds to
    #[arg(long, default_value_t = 5556)]
    manager_port: u16,

    /// Address the local worker API binds to
    #[arg(long, default_value = "localhost")]
    worker_host: String,

    /// Port the local worker API binds to
    #[arg(long, default_value_t = 5555)]
    worker_port: u16,

    /// Scheduling policy: roundrobin or epvm
    #[arg(long, default_value = "epvm")]
    scheduler: String,

    /// Store backend: memory or persistent
    #[arg(long, default_value = "memory")]
    store: String,

    /// Additional worker addresses (host:port) running elsewhere
    #[arg(long, value_delimiter = ',')]
    workers: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let worker_name = format!("{}:{}", args.worker_host, args.worker_port);
    let worker_db: Box<dyn Store<Task>> = match args.store.as_str() {
        "persistent" => Box::new(
            PersistentStore::new("worker_tasks.db", "tasks")
                .context("unable to create worker task store")?,
        ),
        _ => Box::new(InMemoryStore::new()),
    };

    let local_worker = Arc::new(Mutex::new(Worker::new(&worker_name, worker_db)));
    info!(worker = %worker_name, "starting corral worker");
    tokio::spawn(worker::run_tasks(local_worker.clone()));
    tokio::spawn(worker::collect_stats(local_worker.clone()));
    let worker_server = TaskServer::new(local_worker, &args.worker_host, args.worker_port);
    tokio::spawn(worker_server.start_server());

    let mut workers = vec![worker_name];
    workers.extend(args.workers);

    let m = Manager::new(workers, &args.scheduler, &args.store)
        .context("unable to create manager")?;
    let m = Arc::new(Mutex::new(m));
    info!(host = %args.manager_host, port = args.manager_port, "starting corral manager");
    tokio::spawn(manager::process_tasks(m.clone()));
    tokio::spawn(manager::update_tasks(m.clone()));
    tokio::spawn(manager::do_health_checks(m.clone()));

    let manager_server = ManagerServer::new(m, &args.manager_host, args.manager_port);
    manager_server
        .start_server()
        .await
        .context("manager api failed")?;

    Ok(())
}
