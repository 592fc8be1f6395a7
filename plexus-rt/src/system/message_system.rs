//! Top-level message system container.
//!
//! Owns the registry, router, scheduler, kernel, and built-in services.
//! There is no process-wide singleton: every test or application
//! instantiates its own system and passes it explicitly.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

// Layer 3: Internal module imports
use super::config::KernelConfig;
use super::errors::SystemError;
use super::registry::SubsystemRegistry;
use super::router::{MessageRouter, RouteReceipt};
use super::services::CoreServices;
use crate::access::{AccessMode, AccessTable, PrincipalKind, PrincipalRegistry, PublicKeyRecord};
use crate::channel::ChannelManager;
use crate::fault::{DeadLetterQueue, ErrorManager};
use crate::kernel::{KernelSubsystem, SendOptions};
use crate::message::{Message, MessageFactory, MessagePath, RESERVED_SUBSYSTEMS};
use crate::response::ResponseManager;
use crate::sched::{GlobalScheduler, SelectionStrategy, StrategyRegistry};
use crate::subsystem::Subsystem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SystemState {
    /// Constructed; services not yet wired.
    Created,
    /// Bootstrapped and accepting traffic.
    Running,
    /// Graceful shutdown in progress.
    ShuttingDown,
    /// Shut down.
    Stopped,
}

struct SystemInner {
    name: String,
    config: KernelConfig,
    registry: Arc<SubsystemRegistry>,
    principals: Arc<PrincipalRegistry>,
    access: Arc<AccessTable>,
    factory: MessageFactory,
    strategies: Mutex<StrategyRegistry>,
    state: RwLock<SystemState>,
    services: RwLock<Option<Arc<CoreServices>>>,
    kernel: RwLock<Option<Arc<KernelSubsystem>>>,
    scheduler: RwLock<Option<GlobalScheduler>>,
}

/// The message kernel's owning container.
///
/// Cheap to clone; clones share state.
///
/// # Example
/// ```rust,no_run
/// use plexus_rt::system::{KernelConfig, MessageSystem};
/// use serde_json::json;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let system = MessageSystem::new("app", KernelConfig::default())?;
/// system.bootstrap()?;
///
/// let kernel = system.kernel_pkr();
/// let msg = system.factory().create("svc://echo", json!({"x": 1}))?;
/// system.send(msg, &kernel).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MessageSystem {
    inner: Arc<SystemInner>,
}

impl MessageSystem {
    /// Create a system with a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::InvalidConfig`] when validation fails.
    pub fn new(name: impl Into<String>, config: KernelConfig) -> Result<Self, SystemError> {
        config.validate().map_err(SystemError::InvalidConfig)?;
        let principals = Arc::new(PrincipalRegistry::new());
        let access = Arc::new(AccessTable::new(principals.kernel_pkr()));
        Ok(Self {
            inner: Arc::new(SystemInner {
                name: name.into(),
                config,
                registry: Arc::new(SubsystemRegistry::new()),
                principals,
                access,
                factory: MessageFactory::new(),
                strategies: Mutex::new(StrategyRegistry::with_builtins()),
                state: RwLock::new(SystemState::Created),
                services: RwLock::new(None),
                kernel: RwLock::new(None),
                scheduler: RwLock::new(None),
            }),
        })
    }

    /// System name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// System configuration.
    pub fn config(&self) -> &KernelConfig {
        &self.inner.config
    }

    /// Register a custom scheduler strategy. Startup only.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::AlreadyBootstrapped`] after `bootstrap()`.
    pub fn register_strategy<F>(
        &self,
        name: impl Into<String>,
        factory: F,
    ) -> Result<(), SystemError>
    where
        F: Fn() -> Box<dyn SelectionStrategy> + Send + Sync + 'static,
    {
        if *self.inner.state.read() != SystemState::Created {
            return Err(SystemError::AlreadyBootstrapped);
        }
        self.inner.strategies.lock().register(name, factory);
        Ok(())
    }

    /// Construct the kernel, wire the built-in services, and start the
    /// scheduler when `auto_start` is set. One-shot.
    ///
    /// # Errors
    ///
    /// [`SystemError::AlreadyBootstrapped`] on a second call, or
    /// [`SystemError::UnknownStrategy`] for an unresolvable strategy name.
    pub fn bootstrap(&self) -> Result<(), SystemError> {
        let config = &self.inner.config;

        // Resolve the strategy before any state changes so a bad name
        // leaves the system untouched.
        let strategy = self
            .inner
            .strategies
            .lock()
            .create(&config.scheduler_strategy)
            .ok_or_else(|| SystemError::UnknownStrategy(config.scheduler_strategy.clone()))?;

        {
            let mut state = self.inner.state.write();
            if *state != SystemState::Created {
                return Err(SystemError::AlreadyBootstrapped);
            }
            *state = SystemState::Running;
        }

        let errors = Arc::new(ErrorManager::new(config.error_store_capacity));
        let dead_letters = Arc::new(DeadLetterQueue::new(config.dead_letter_capacity));
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&self.inner.registry),
            "kernel",
            Arc::clone(&errors),
            Arc::clone(&dead_letters),
        ));
        let kernel_pkr = self.inner.principals.kernel_pkr();
        let channels = Arc::new(ChannelManager::new(
            Arc::clone(&self.inner.principals),
            kernel_pkr.clone(),
        ));
        let responses = Arc::new(ResponseManager::new(
            Arc::clone(&router),
            Arc::clone(&channels),
            self.inner.factory.clone(),
            Arc::clone(&errors),
            kernel_pkr,
        ));
        let services = Arc::new(CoreServices {
            router,
            responses,
            channels,
            errors,
            dead_letters,
            factory: self.inner.factory.clone(),
            principals: Arc::clone(&self.inner.principals),
            access: Arc::clone(&self.inner.access),
            registry: Arc::clone(&self.inner.registry),
        });

        let kernel = Arc::new(KernelSubsystem::new(
            Arc::clone(&services),
            config.default_response_timeout,
        )?);
        self.inner.registry.insert(kernel.subsystem().clone())?;

        let scheduler = GlobalScheduler::new(
            Arc::clone(&self.inner.registry),
            strategy,
            config.scheduler_time_slice,
            config.scheduler_tick_interval,
        );
        if config.auto_start {
            scheduler.start();
        }

        *self.inner.services.write() = Some(services);
        *self.inner.kernel.write() = Some(kernel);
        *self.inner.scheduler.write() = Some(scheduler);
        info!(system = %self.inner.name, "message system bootstrapped");
        Ok(())
    }

    fn require_running(&self) -> Result<(), SystemError> {
        match *self.inner.state.read() {
            SystemState::Created => Err(SystemError::NotBootstrapped),
            SystemState::Running => Ok(()),
            SystemState::ShuttingDown | SystemState::Stopped => Err(SystemError::ShuttingDown),
        }
    }

    /// Register an application subsystem.
    ///
    /// Mints a top-level principal owned by the kernel, creates its empty
    /// reader/writer set, and binds the kernel services. Returns the
    /// subsystem's identity, which the owner uses to grant access.
    ///
    /// # Errors
    ///
    /// Rejects reserved or malformed names, unbuilt subsystems, and
    /// duplicates.
    pub fn register_subsystem(
        &self,
        subsystem: Subsystem,
    ) -> Result<PublicKeyRecord, SystemError> {
        self.require_running()?;

        let name = subsystem.name().to_string();
        if RESERVED_SUBSYSTEMS.contains(&name.as_str()) {
            return Err(SystemError::ReservedName(name));
        }
        if MessagePath::parse(&format!("{name}://")).is_err() {
            return Err(SystemError::InvalidConfig(format!(
                "invalid subsystem name: {name}"
            )));
        }
        if !subsystem.is_built() {
            return Err(SystemError::SubsystemNotBuilt(name));
        }
        if self.inner.registry.contains(&name) {
            return Err(SystemError::DuplicateSubsystem(name));
        }

        let services = self
            .inner
            .services
            .read()
            .clone()
            .ok_or(SystemError::NotBootstrapped)?;
        let identity = self.inner.principals.mint(
            PrincipalKind::TopLevel,
            &name,
            Some(&self.inner.principals.kernel_pkr()),
        )?;
        self.inner.access.ensure_owner(&identity);
        // Registered subsystems may call the kernel service routes; the
        // routes authorize individual operations themselves.
        self.inner.access.grant(
            &self.inner.principals.kernel_pkr(),
            &identity,
            AccessMode::Write,
        )?;
        subsystem.bind(identity.clone(), services);
        self.inner.registry.insert(subsystem)?;
        debug!(subsystem = %name, "subsystem registered");
        Ok(identity)
    }

    /// Send a message as `caller` through the kernel's protected path.
    ///
    /// # Errors
    ///
    /// System-state failures, `access denied`, and routing failures.
    pub async fn send(
        &self,
        message: Message,
        caller: &PublicKeyRecord,
    ) -> Result<RouteReceipt, SystemError> {
        self.send_with(message, caller, SendOptions::default()).await
    }

    /// [`Self::send`] with explicit per-send options.
    ///
    /// # Errors
    ///
    /// System-state failures, `access denied`, and routing failures.
    pub async fn send_with(
        &self,
        message: Message,
        caller: &PublicKeyRecord,
        options: SendOptions,
    ) -> Result<RouteReceipt, SystemError> {
        self.require_running()?;
        let kernel = self
            .inner
            .kernel
            .read()
            .clone()
            .ok_or(SystemError::NotBootstrapped)?;
        Ok(kernel.send_protected(caller, message, options).await?)
    }

    /// The kernel root identity.
    pub fn kernel_pkr(&self) -> PublicKeyRecord {
        self.inner.principals.kernel_pkr()
    }

    /// Envelope factory stamped with this system's sender id.
    pub fn factory(&self) -> &MessageFactory {
        &self.inner.factory
    }

    /// Principal arena.
    pub fn principals(&self) -> &Arc<PrincipalRegistry> {
        &self.inner.principals
    }

    /// Reader/writer sets.
    pub fn access(&self) -> &Arc<AccessTable> {
        &self.inner.access
    }

    /// Resolve a registered subsystem.
    pub fn subsystem(&self, name: &str) -> Option<Subsystem> {
        self.inner.registry.get(name)
    }

    /// Identity of a registered subsystem.
    pub fn identity_of(&self, name: &str) -> Option<PublicKeyRecord> {
        self.inner.registry.get(name).and_then(|s| s.identity())
    }

    /// The global scheduler, once bootstrapped.
    pub fn scheduler(&self) -> Option<GlobalScheduler> {
        self.inner.scheduler.read().clone()
    }

    /// The kernel service bundle, once bootstrapped.
    pub fn services(&self) -> Option<Arc<CoreServices>> {
        self.inner.services.read().clone()
    }

    /// Dispose one subsystem and unregister it.
    ///
    /// # Errors
    ///
    /// [`SystemError::UnknownSubsystem`] when the name is not registered.
    pub async fn dispose_subsystem(&self, name: &str) -> Result<(), SystemError> {
        let subsystem = self
            .inner
            .registry
            .remove(name)
            .ok_or_else(|| SystemError::UnknownSubsystem(name.to_string()))?;
        subsystem.dispose().await;
        Ok(())
    }

    /// Stop the scheduler and dispose every subsystem. Idempotent.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.write();
            if *state != SystemState::Running {
                return;
            }
            *state = SystemState::ShuttingDown;
        }

        if let Some(scheduler) = self.scheduler() {
            scheduler.stop();
        }
        for name in self.inner.registry.names() {
            if let Some(subsystem) = self.inner.registry.remove(&name) {
                subsystem.dispose().await;
            }
        }
        *self.inner.state.write() = SystemState::Stopped;
        info!(system = %self.inner.name, "message system stopped");
    }
}

impl std::fmt::Debug for MessageSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSystem")
            .field("name", &self.inner.name)
            .field("subsystems", &self.inner.registry.len())
            .field("state", &*self.inner.state.read())
            .finish()
    }
}
