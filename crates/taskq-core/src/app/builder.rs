//! AppBuilder - wiring with fail-fast validation.
//!
//! `expect_tasks` declares which task names the process must be able to
//! handle; `build` refuses to start when one of them has no action, rather
//! than cancelling those tasks as unroutable at runtime.

use std::sync::Arc;

use super::client::TaskClient;
use super::dispatcher::{Dispatcher, DispatcherHandle};
use super::registry::{ActionRegistry, TaskAction};
use super::streams::StreamScheduler;
use crate::config::DispatcherConfig;
use crate::ports::{Driver, ErrorSink, TracingErrorSink};
use crate::typed::{TypedAction, TypedTask};

/// Collects actions and settings, then validates and wires an [`App`].
///
/// # Example
///
/// ```ignore
/// let app = AppBuilder::new()
///     .register("customer_update", Arc::new(CustomerUpdate))
///     .register_typed::<Reindex, _>(ReindexAction)
///     .expect_tasks(&["customer_update", Reindex::NAME])
///     .build(driver)?;
/// let handle = app.start();
/// ```
pub struct AppBuilder {
    registry: Arc<ActionRegistry>,
    expected_tasks: Option<Vec<String>>,
    config: DispatcherConfig,
    sink: Arc<dyn ErrorSink>,
}

/// Why `AppBuilder::build` refused to wire the app.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task actions: {0:?}. These tasks were expected but not registered.")]
    MissingTaskNames(Vec<String>),
}

impl AppBuilder {
    /// Empty registry, default timings, errors logged through tracing.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ActionRegistry::new()),
            expected_tasks: None,
            config: DispatcherConfig::default(),
            sink: Arc::new(TracingErrorSink),
        }
    }

    /// Route tasks named `name` to `action`. A later registration of the
    /// same name replaces the earlier one.
    pub fn register(self, name: &str, action: Arc<dyn TaskAction>) -> Self {
        self.registry.register(name, action);
        self
    }

    /// Route `T::NAME` to `action`, decoding the payload into `T` first.
    pub fn register_typed<T: TypedTask, A: TypedAction<T> + 'static>(self, action: A) -> Self {
        self.registry.register_typed::<T, A>(action);
        self
    }

    /// Names `build` must find registered.
    ///
    /// # 検証
    ///
    /// Checked once in `build`; registering afterwards is not possible
    /// because the builder is consumed.
    pub fn expect_tasks(mut self, names: &[&str]) -> Self {
        self.expected_tasks = Some(names.iter().map(|name| name.to_string()).collect());
        self
    }

    /// Dispatcher timings.
    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Sink shared by the dispatcher and the stream scheduler.
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Check the expected names against the registry and wire everything to
    /// `driver`.
    pub fn build(self, driver: Arc<dyn Driver>) -> Result<App, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let registered = self.registry.names();
            let missing: Vec<String> = expected_tasks
                .iter()
                .filter(|name| !registered.contains(name))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskNames(missing));
            }
        }

        let dispatcher = Dispatcher::new(driver.clone(), self.registry)
            .with_config(self.config)
            .with_error_sink(self.sink.clone());
        Ok(App {
            dispatcher,
            client: TaskClient::new(driver),
            streams: StreamScheduler::with_error_sink(self.sink),
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A wired queue process: dispatcher, producer client and stream scheduler
/// sharing one driver and one error sink.
pub struct App {
    pub dispatcher: Dispatcher,
    pub client: TaskClient,
    pub streams: StreamScheduler,
}

impl App {
    /// Spawn the dispatcher. Stream actions are scheduled separately on
    /// `streams`.
    pub fn start(&self) -> DispatcherHandle {
        self.dispatcher.spawn()
    }
}
