//! Controller façade for the appointment bot.
//!
//! [`BotController`] accepts a configuration and operator commands, owns the
//! lifecycle of the engine task, and exposes owned snapshots and an event
//! stream to whatever UI sits on top.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{BotConfig, ValidationError};
use crate::engine::runner::{Capabilities, EngineCommand, PollingEngine};
use crate::engine::shared::{RunIntent, SharedState};
use crate::engine::{AppointmentDetails, ConnectionStatus, EnginePhase, FatalError};
use crate::external_deps::captcha::{CaptchaSolver, SolveError, TwoCaptchaSolver};
use crate::external_deps::notify::{LogNotificationSink, NotificationSink};
use crate::external_deps::site::SiteClient;
use crate::modules::activity_log::{DEFAULT_LOG_CAPACITY, LogEntry, Severity};
use crate::modules::events::{BotEvent, EventBus, EventHandler, LoggingHandler};
use crate::modules::proxy::{ProxyHealthReport, ProxyPool};

/// Result alias used by controller commands.
pub type BotResult<T> = Result<T, BotError>;

/// Errors returned by controller commands.
#[derive(Debug, Error)]
pub enum BotError {
	#[error(transparent)]
	Validation(#[from] ValidationError),
	#[error("cannot {command} while {status}")]
	InvalidState {
		command: &'static str,
		status: BotStatus,
	},
	#[error("captcha solver unavailable: {0}")]
	Captcha(#[from] SolveError),
}

/// Status shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
	Idle,
	Running,
	Paused,
	Error,
}

impl BotStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			BotStatus::Idle => "idle",
			BotStatus::Running => "running",
			BotStatus::Paused => "paused",
			BotStatus::Error => "error",
		}
	}
}

impl fmt::Display for BotStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Owned, read-only view of the bot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotSnapshot {
	pub status: BotStatus,
	pub phase: EnginePhase,
	pub connection: ConnectionStatus,
	pub attempts: u64,
	pub current_proxy: Option<String>,
	pub proxy_health: ProxyHealthReport,
	pub pending_appointment: Option<AppointmentDetails>,
	pub fatal: Option<FatalError>,
	pub logs: Vec<LogEntry>,
}

/// Builder used to inject capabilities before the controller is created.
pub struct BotControllerBuilder {
	site: Arc<dyn SiteClient>,
	captcha: Option<Arc<dyn CaptchaSolver>>,
	notifier: Arc<dyn NotificationSink>,
	handlers: Vec<Arc<dyn EventHandler>>,
	log_capacity: usize,
}

impl BotControllerBuilder {
	pub fn new(site: Arc<dyn SiteClient>) -> Self {
		Self {
			site,
			captcha: None,
			notifier: Arc::new(LogNotificationSink),
			handlers: Vec::new(),
			log_capacity: DEFAULT_LOG_CAPACITY,
		}
	}

	/// Overrides the solver otherwise built from `captcha.apiKey`.
	pub fn with_captcha_solver(mut self, solver: Arc<dyn CaptchaSolver>) -> Self {
		self.captcha = Some(solver);
		self
	}

	pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
		self.notifier = sink;
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn with_log_capacity(mut self, capacity: usize) -> Self {
		self.log_capacity = capacity;
		self
	}

	pub fn build(self) -> BotController {
		let mut events = EventBus::new();
		events.register_handler(Arc::new(LoggingHandler));
		for handler in self.handlers {
			events.register_handler(handler);
		}

		BotController {
			shared: Arc::new(SharedState::new(events, self.log_capacity)),
			site: self.site,
			captcha: self.captcha,
			notifier: self.notifier,
			engine: Mutex::new(None),
		}
	}
}

struct EngineHandle {
	commands: mpsc::UnboundedSender<EngineCommand>,
	shutdown: watch::Sender<bool>,
	task: JoinHandle<()>,
	grace: Duration,
}

impl EngineHandle {
	fn send(&self, command: EngineCommand) {
		if self.commands.send(command).is_err() {
			log::debug!("engine task already gone, dropping {command:?}");
		}
	}

	/// Signals shutdown and waits out the grace period before aborting.
	async fn stop(self) {
		let _ = self.shutdown.send(true);
		drop(self.commands);

		let mut task = self.task;
		if tokio::time::timeout(self.grace, &mut task).await.is_err() {
			log::warn!("engine did not stop within {:?}, aborting", self.grace);
			task.abort();
			let _ = task.await;
		}
	}
}

/// Public entry point: one controller drives at most one engine task.
pub struct BotController {
	shared: Arc<SharedState>,
	site: Arc<dyn SiteClient>,
	captcha: Option<Arc<dyn CaptchaSolver>>,
	notifier: Arc<dyn NotificationSink>,
	engine: Mutex<Option<EngineHandle>>,
}

impl BotController {
	/// Controller with the default notification sink and no extra handlers.
	pub fn new(site: Arc<dyn SiteClient>) -> Self {
		Self::builder(site).build()
	}

	pub fn builder(site: Arc<dyn SiteClient>) -> BotControllerBuilder {
		BotControllerBuilder::new(site)
	}

	/// Validates `config` and starts a run.
	///
	/// While running this is a no-op; while paused or halted it behaves
	/// like [`resume`](Self::resume).
	pub async fn start(&self, config: BotConfig) -> BotResult<()> {
		let mut engine = self.engine.lock().await;
		match (self.shared.intent(), self.shared.is_fatal()) {
			(RunIntent::Idle, _) => {}
			(RunIntent::Paused, _) | (_, true) => return self.resume_engine(engine.as_ref()),
			(RunIntent::Running, false) => {
				self.shared.log("Bot is already running", Severity::Warning);
				return Ok(());
			}
		}

		let descriptors = match config.validate().and_then(|()| config.proxy_descriptors()) {
			Ok(descriptors) => descriptors,
			Err(err) => {
				self.shared.log(err.to_string(), Severity::Error);
				return Err(err.into());
			}
		};

		let captcha = match self.captcha_for(&config) {
			Ok(captcha) => captcha,
			Err(err) => {
				self.shared.log(err.to_string(), Severity::Error);
				return Err(err.into());
			}
		};

		let proxies = if config.proxy.enabled {
			let mut pool = ProxyPool::new(config.proxy_pool_config());
			pool.load(descriptors);
			pool
		} else {
			ProxyPool::disabled()
		};

		let (commands, command_rx) = mpsc::unbounded_channel();
		let (shutdown, shutdown_rx) = watch::channel(false);
		let grace = config.engine.shutdown_grace();
		let capabilities = Capabilities {
			site: Arc::clone(&self.site),
			captcha,
			notifier: Arc::clone(&self.notifier),
		};

		let link = self.shared.begin_run();
		self.shared.log("Bot started", Severity::Info);
		let runner = PollingEngine::new(
			Arc::new(config),
			proxies,
			capabilities,
			link,
			command_rx,
			shutdown_rx,
		);
		let task = tokio::spawn(runner.run());

		*engine = Some(EngineHandle {
			commands,
			shutdown,
			task,
			grace,
		});
		Ok(())
	}

	/// Suspends polling without closing the portal session.
	pub async fn pause(&self) -> BotResult<()> {
		let engine = self.engine.lock().await;
		if self.shared.status() != BotStatus::Running {
			return self.reject("pause");
		}
		let Some(handle) = engine.as_ref() else {
			return self.reject("pause");
		};

		self.shared.set_intent(RunIntent::Paused);
		handle.send(EngineCommand::Pause);
		self.shared.log("Bot paused", Severity::Info);
		Ok(())
	}

	/// Restarts polling after a pause, or retries after the engine halted.
	pub async fn resume(&self) -> BotResult<()> {
		let engine = self.engine.lock().await;
		self.resume_engine(engine.as_ref())
	}

	/// Stops the run, waits for the engine, and resets the run state.
	pub async fn stop(&self) -> BotResult<()> {
		let mut engine = self.engine.lock().await;
		if self.shared.intent() == RunIntent::Idle {
			return self.reject("stop");
		}

		if let Some(handle) = engine.take() {
			handle.stop().await;
		}
		self.shared.end_run();
		self.shared.log("Bot stopped", Severity::Info);
		Ok(())
	}

	/// Books the pending appointment. A logged no-op when nothing is pending.
	pub async fn confirm(&self) -> BotResult<()> {
		let engine = self.engine.lock().await;
		self.decide(engine.as_ref(), EngineCommand::Confirm, "No appointment pending to confirm");
		Ok(())
	}

	/// Drops the pending appointment and resumes polling. A logged no-op when
	/// nothing is pending.
	pub async fn skip(&self) -> BotResult<()> {
		let engine = self.engine.lock().await;
		self.decide(engine.as_ref(), EngineCommand::Skip, "No appointment pending to skip");
		Ok(())
	}

	pub fn status(&self) -> BotStatus {
		self.shared.status()
	}

	pub fn snapshot(&self) -> BotSnapshot {
		self.shared.snapshot()
	}

	/// Events emitted from now on, in emission order.
	pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
		self.shared.subscribe()
	}

	pub fn clear_logs(&self) {
		self.shared.clear_logs();
	}

	fn resume_engine(&self, engine: Option<&EngineHandle>) -> BotResult<()> {
		let paused = self.shared.intent() == RunIntent::Paused;
		let halted = self.shared.is_fatal();
		let Some(handle) = engine.filter(|_| paused || halted) else {
			return self.reject("resume");
		};

		self.shared.set_intent(RunIntent::Running);
		handle.send(EngineCommand::Resume);
		self.shared.log("Bot resumed", Severity::Info);
		Ok(())
	}

	fn decide(&self, engine: Option<&EngineHandle>, command: EngineCommand, nothing_pending: &str) {
		match engine {
			Some(handle) if self.shared.awaiting_decision() && self.shared.pending().is_some() => {
				handle.send(command);
			}
			_ => self.shared.log(nothing_pending, Severity::Info),
		}
	}

	fn reject(&self, command: &'static str) -> BotResult<()> {
		let status = self.shared.status();
		self.shared.log(format!("Cannot {command} while {status}"), Severity::Warning);
		Err(BotError::InvalidState { command, status })
	}

	fn captcha_for(&self, config: &BotConfig) -> Result<Option<Arc<dyn CaptchaSolver>>, SolveError> {
		if !config.captcha.enabled {
			return Ok(None);
		}
		if let Some(solver) = &self.captcha {
			return Ok(Some(Arc::clone(solver)));
		}
		let solver: Arc<dyn CaptchaSolver> = Arc::new(TwoCaptchaSolver::new(config.captcha.api_key.expose())?);
		log::debug!("using {} captcha solver", solver.name());
		Ok(Some(solver))
	}
}
