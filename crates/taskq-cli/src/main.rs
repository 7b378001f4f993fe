use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use taskq_core::app::{AppBuilder, from_fn};
use taskq_core::config::{DispatcherConfig, QueueConfig};
use taskq_core::domain::{Task, TaskData, TaskInit, TaskOutcome, TaskState};
use taskq_core::drivers::{InMemoryDriver, PostgresDriver};
use taskq_core::observability::init_tracing;
use taskq_core::ports::Driver;
use taskq_core::typed::{TypedAction, TypedTask};

#[derive(Parser)]
#[command(name = "taskq")]
#[command(about = "Operate a durable task queue")]
#[command(version)]
struct Cli {
    /// TOML config file; `TASKQ__*` environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the queue table and index if missing
    InitSchema,
    /// Add one task
    Enqueue(EnqueueArgs),
    /// Count live (not done, not cancelled) tasks with a name
    Count {
        name: String,
    },
    /// Count every stored task
    Length,
    /// Delete every task
    Clear {
        /// Required, this cannot be undone
        #[arg(long)]
        yes: bool,
    },
    /// Run a dispatcher until Ctrl-C, handling tasks named `log`
    ///
    /// WARNING: every other task name is unroutable here and gets cancelled
    /// for good. Only point this at a queue that carries nothing but `log`
    /// tasks.
    Run,
    /// In-memory end-to-end run, no database needed
    Demo {
        /// How many attempts fail before the task succeeds
        #[arg(long, default_value_t = 2)]
        failures: u32,
    },
}

#[derive(Args)]
struct EnqueueArgs {
    #[arg(long)]
    name: String,

    #[arg(long)]
    key: String,

    /// Payload as a JSON object
    #[arg(long, default_value = "{}")]
    data: String,

    #[arg(long, default_value = "taskq-cli")]
    created_by: String,

    /// Delay before the task becomes eligible
    #[arg(long)]
    delay_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::InitSchema => {
            let (_, driver) = connect(config_path).await?;
            driver.ensure_schema().await?;
            println!("schema ready");
        }
        Commands::Enqueue(args) => {
            let (_, driver) = connect(config_path).await?;
            enqueue(&driver, args).await?;
        }
        Commands::Count { name } => {
            let (_, driver) = connect(config_path).await?;
            println!("{}", driver.task_count(&name).await?);
        }
        Commands::Length => {
            let (_, driver) = connect(config_path).await?;
            println!("{}", driver.queue_length().await?);
        }
        Commands::Clear { yes } => {
            if !yes {
                bail!("refusing to clear the queue without --yes");
            }
            let (_, driver) = connect(config_path).await?;
            driver.clear().await?;
            println!("queue cleared");
        }
        Commands::Run => {
            let (config, driver) = connect(config_path).await?;
            run(Arc::new(driver), config.dispatcher).await?;
        }
        Commands::Demo { failures } => demo(failures).await?,
    }
    Ok(())
}

async fn connect(path: Option<&Path>) -> anyhow::Result<(QueueConfig, PostgresDriver)> {
    let config = QueueConfig::load(path).context("loading configuration")?;
    let driver = PostgresDriver::connect(&config.postgres)
        .await
        .context("connecting to postgres")?;
    Ok((config, driver))
}

async fn enqueue(driver: &PostgresDriver, args: EnqueueArgs) -> anyhow::Result<()> {
    let value: serde_json::Value = serde_json::from_str(&args.data).context("parsing --data")?;
    let data: TaskData = match value {
        serde_json::Value::Object(map) => map,
        other => bail!("--data must be a JSON object, got {other}"),
    };

    let mut init = TaskInit::new(&args.name, &args.key)
        .created_by(&args.created_by)
        .data(data);
    if let Some(delay) = args.delay_secs {
        let delay = chrono::Duration::from_std(Duration::from_secs(delay))
            .context("--delay-secs out of range")?;
        init = init.do_after(Utc::now() + delay);
    }
    driver.add_task(init).await?;
    println!("enqueued {} ({})", args.name, args.key);
    Ok(())
}

async fn run(driver: Arc<dyn Driver>, config: DispatcherConfig) -> anyhow::Result<()> {
    let log = from_fn(|task: Task| async move {
        info!(task_id = %task.id(), task_key = %task.key(), data = ?task.data(), "log task");
        TaskOutcome::success("logged")
    });
    let app = AppBuilder::new()
        .register("log", Arc::new(log))
        .with_config(config)
        .build(driver)?;

    warn!("only `log` tasks are handled; any other task claimed here is cancelled");
    let handle = app.start();
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    let counts = handle.stats();
    handle.stop().await;
    println!("{}", serde_json::to_string(&counts)?);
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    name: String,
}

impl TypedTask for Hello {
    const NAME: &'static str = "hello";
}

struct HelloAction {
    remaining_failures: AtomicU32,
}

#[async_trait]
impl TypedAction<Hello> for HelloAction {
    async fn run(&self, payload: Hello, task: &Task) -> TaskOutcome {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return TaskOutcome::retry(format!("intentional failure (left={left})"));
        }

        println!("Hello, {}! (task {})", payload.name, task.id());
        TaskOutcome::success("greeted")
    }
}

async fn demo(failures: u32) -> anyhow::Result<()> {
    let driver = Arc::new(InMemoryDriver::new());
    let app = AppBuilder::new()
        .register_typed::<Hello, _>(HelloAction {
            remaining_failures: AtomicU32::new(failures),
        })
        .expect_tasks(&[Hello::NAME])
        .with_config(DispatcherConfig {
            poll_interval_ms: 50,
            refresh_interval_ms: 50,
            retry_age_secs: 0,
            handler_timeout_secs: Some(5),
        })
        .build(driver.clone())?;

    app.client
        .add_typed("greeting", "demo", &Hello {
            name: "taskq".into(),
        })
        .await?;
    let handle = app.start();

    // Retries are reported to the error sink and picked up again after refresh.
    let task = loop {
        let tasks = driver.snapshot().await;
        if let Some(task) = tasks.into_iter().find(|t| t.state().is_terminal()) {
            break task;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };
    let counts = handle.stats();
    handle.stop().await;

    println!(
        "final status: state={} message={:?}",
        task.state(),
        task.last_attempt_message()
    );
    println!("counts: {}", serde_json::to_string(&counts)?);
    if task.state() != TaskState::Done {
        bail!("demo task ended in {}", task.state());
    }
    Ok(())
}
