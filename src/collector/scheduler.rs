//! Collection scheduler
//!
//! The top-level driver of the collection pyramid. On every tick it snapshots
//! the registry, prunes state for services that disappeared, and fans out:
//!
//! ```text
//! tick ──► fleet scope ──► service task (per eligible service)
//!                              │
//!                              └──► probe task (per eligible probe)
//!                                       │  acquire permit
//!                                       └──► probe scope ──► probe.collect()
//! ```
//!
//! Each level joins with its own deadline; a fired deadline cancels the
//! subtree below it. Outcomes are recorded by the lowest level that observed
//! them: a probe that times out records a probe timeout, a service scope that
//! times out records only the service timeout (its cancelled probes record
//! nothing).
//!
//! [`SchedulerHandle`] wraps the driver in the usual actor shape: a spawned
//! run loop owning a ticker, controlled through an mpsc command channel.

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, instrument, trace, warn};

use crate::clock::Clock;
use crate::collector::error::{CollectError, Outcome};
use crate::collector::limiter::Limiter;
use crate::collector::scope::Scope;
use crate::collector::state::StateManager;
use crate::config::CollectionConfig;
use crate::probe::Probe;
use crate::registry::{Service, ServiceId, ServiceRegistry};

/// Runs collection passes against all registered services.
///
/// Cheap to clone; all heavy state is shared behind `Arc`s, which is what
/// lets per-service and per-probe tasks carry the scheduler into `'static`
/// futures.
#[derive(Clone)]
pub struct CollectionScheduler {
    registry: Arc<dyn ServiceRegistry>,
    probes: Arc<Vec<Arc<dyn Probe>>>,
    state: Arc<StateManager>,
    limiter: Limiter,
    clock: Arc<dyn Clock>,
    config: CollectionConfig,
}

impl CollectionScheduler {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        probes: Vec<Arc<dyn Probe>>,
        config: CollectionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = Arc::new(StateManager::new(clock.clone(), config.breaker.clone()));
        let limiter = Limiter::new(config.max_concurrent_requests);

        Self {
            registry,
            probes: Arc::new(probes),
            state,
            limiter,
            clock,
            config,
        }
    }

    /// The state manager backing this scheduler.
    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// Run one full collection pass: snapshot, prune, fan out.
    #[instrument(skip(self))]
    pub async fn tick(&self) {
        let services = self.registry.snapshot().await;
        debug!(services = services.len(), "starting collection pass");

        let live: HashSet<ServiceId> = services.iter().map(|s| s.id().clone()).collect();
        self.state.prune_inactive(&live);

        self.run_services(services).await;
    }

    /// On-demand collection for a single service with a caller-supplied
    /// timeout. Reuses the regular eligibility checks.
    pub async fn collect_service_now(&self, service: Arc<Service>, timeout: Duration) {
        debug!(service = %service.id(), ?timeout, "on-demand collection");
        let deadline = self.clock.now() + timeout;
        self.run_service(service, deadline).await;
    }

    async fn run_services(&self, services: Vec<Arc<Service>>) {
        let fleet_deadline = self.clock.now() + self.config.timeout();

        let mut scope: Scope<()> = Scope::named("fleet");
        for service in services {
            if !self.state.is_service_eligible(service.id()) {
                debug!(service = %service.id(), "service not eligible this pass");
                continue;
            }

            let this = self.clone();
            scope.fork(async move {
                // the service deadline never extends past the fleet deadline,
                // so a service task always observes its own timeout instead of
                // being silently aborted by the fleet scope
                let deadline = (this.clock.now() + this.config.group_timeout()).min(fleet_deadline);
                this.run_service(service, deadline).await;
            });
        }

        debug!(eligible = scope.len(), "waiting for service collection");
        if scope.join_until(fleet_deadline).await.is_err() {
            error!("collection pass deadline fired with services still running");
        }
    }

    #[instrument(skip_all, fields(service = %service.id()))]
    async fn run_service(&self, service: Arc<Service>, deadline: Instant) {
        if !self.state.is_service_eligible(service.id()) {
            warn!("service is not eligible at this time");
            return;
        }

        let mut scope: Scope<()> = Scope::named(format!("svc/{}", service.id()));
        for probe in self.probes.iter() {
            if !probe.properties().enabled {
                continue;
            }

            if self
                .state
                .is_probe_eligible(service.id(), probe.name(), probe.properties())
            {
                let this = self.clone();
                let probe = probe.clone();
                let service = service.clone();
                scope.fork(async move { this.run_probe(service, probe, deadline).await });
            } else {
                trace!(probe = probe.name(), "probe not eligible this pass");
            }
        }

        if scope.join_until(deadline).await.is_err() {
            // the probes below were cancelled and record nothing; this is the
            // coarsest applicable outcome
            self.state.on_service_timeout(service.id());
        }
    }

    #[instrument(skip_all, fields(service = %service.id(), probe = probe.name()))]
    async fn run_probe(&self, service: Arc<Service>, probe: Arc<dyn Probe>, service_deadline: Instant) {
        let config = probe.properties().clone();

        // Waiting longer than our own timeout (or past the service deadline)
        // for a permit would just hold everything up; running out of time
        // here is not an error for this probe.
        let acquire_deadline = (self.clock.now() + config.timeout()).min(service_deadline);
        let Some(_permit) = self.limiter.acquire(acquire_deadline).await else {
            trace!("no permit before deadline, skipping this pass");
            return;
        };

        let mut scope: Scope<Result<(), CollectError>> =
            Scope::named(format!("svc/{}/col/{}", service.id(), probe.name()));
        {
            let service = service.clone();
            let probe = probe.clone();
            scope.fork(async move { probe.collect(service).await });
        }

        let deadline = self.clock.now() + config.timeout();
        match scope.join_until(deadline).await {
            Err(_timed_out) => {
                self.state.on_timeout(service.id(), probe.name(), &config);
            }
            Ok(joined) if joined.panicked > 0 => {
                // probe code blew up; charge it as a hard failure but never
                // let it take the scheduler down
                let err = CollectError::other("probe panicked", false);
                self.state
                    .on_failure(service.id(), probe.name(), &config, &err);
            }
            Ok(joined) => match joined.completed.into_iter().next() {
                Some(Ok(())) => {
                    self.state.on_success(service.id(), probe.name(), &config);
                }
                Some(Err(err)) => match err.outcome() {
                    Outcome::Success => {
                        self.state.on_success(service.id(), probe.name(), &config);
                    }
                    Outcome::Timeout => {
                        self.state.on_timeout(service.id(), probe.name(), &config);
                    }
                    Outcome::Failure { .. } => {
                        self.state
                            .on_failure(service.id(), probe.name(), &config, &err);
                    }
                    Outcome::Cancelled | Outcome::Ignored => {
                        trace!(?err, "outcome not recorded");
                    }
                },
                // child was aborted from outside; whoever aborted records
                None => {}
            },
        }
        // _permit drops here on every path
    }
}

/// Commands understood by the scheduler run loop.
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Run one collection pass immediately (bypassing the ticker).
    TickNow { respond_to: oneshot::Sender<()> },

    /// Collect a single service now, with an optional caller-supplied
    /// timeout (defaults to the service group timeout).
    CollectNow {
        service_id: ServiceId,
        timeout: Option<Duration>,
        respond_to: oneshot::Sender<Result<()>>,
    },

    /// Cancel any in-flight pass and stop the run loop.
    Shutdown,
}

struct SchedulerActor {
    scheduler: CollectionScheduler,
    command_rx: mpsc::Receiver<SchedulerCommand>,
}

impl SchedulerActor {
    /// Run until shut down or the command channel closes.
    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!("starting collection scheduler");

        // first pass one interval after start, not immediately
        let period = self.scheduler.config.interval();
        let mut ticker = interval_at(self.scheduler.clock.now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.run_tick().await.is_break() {
                        break;
                    }
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd).await.is_break() {
                            break;
                        }
                    }
                    None => {
                        warn!("command channel closed, shutting down");
                        break;
                    }
                }
            }
        }

        debug!("collection scheduler stopped");
    }

    /// Run one scheduled pass, staying responsive to commands. A `TickNow`
    /// received mid-pass joins the running pass instead of starting a second
    /// one; running two passes at once would re-invoke probes whose first
    /// outcome is not recorded yet. A shutdown received mid-pass cancels the
    /// pass and waits up to one tick interval for in-flight probes to unwind.
    async fn run_tick(&mut self) -> ControlFlow<()> {
        let mut scope: Scope<()> = Scope::named("tick");
        let scheduler = self.scheduler.clone();
        scope.fork(async move { scheduler.tick().await });

        let mut tick_waiters: Vec<oneshot::Sender<()>> = Vec::new();

        loop {
            tokio::select! {
                _ = scope.join() => {
                    for waiter in tick_waiters {
                        let _ = waiter.send(());
                    }
                    return ControlFlow::Continue(());
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(SchedulerCommand::Shutdown) | None => {
                        debug!("shutdown during pass, cancelling in-flight collection");
                        scope.cancel();
                        let grace = self.scheduler.clock.now() + self.scheduler.config.interval();
                        let _ = scope.join_until(grace).await;
                        return ControlFlow::Break(());
                    }
                    Some(SchedulerCommand::TickNow { respond_to }) => {
                        debug!("pass already in flight, joining it");
                        tick_waiters.push(respond_to);
                    }
                    Some(cmd) => {
                        if self.handle_command(cmd).await.is_break() {
                            return ControlFlow::Break(());
                        }
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) -> ControlFlow<()> {
        match cmd {
            SchedulerCommand::TickNow { respond_to } => {
                debug!("received TickNow command");
                self.scheduler.tick().await;
                let _ = respond_to.send(());
                ControlFlow::Continue(())
            }

            SchedulerCommand::CollectNow {
                service_id,
                timeout,
                respond_to,
            } => {
                debug!(service = %service_id, "received CollectNow command");
                let result = self.collect_now(&service_id, timeout).await;
                let _ = respond_to.send(result);
                ControlFlow::Continue(())
            }

            SchedulerCommand::Shutdown => {
                debug!("received shutdown command");
                ControlFlow::Break(())
            }
        }
    }

    async fn collect_now(&self, id: &ServiceId, timeout: Option<Duration>) -> Result<()> {
        let service = self
            .scheduler
            .registry
            .snapshot()
            .await
            .into_iter()
            .find(|service| service.id() == id)
            .with_context(|| format!("service {id} is not registered"))?;

        let timeout = timeout.unwrap_or_else(|| self.scheduler.config.group_timeout());
        self.scheduler.collect_service_now(service, timeout).await;
        Ok(())
    }
}

/// Handle for controlling a spawned collection scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn the scheduler run loop as a tokio task and return a handle.
    pub fn spawn(scheduler: CollectionScheduler) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = SchedulerActor {
            scheduler,
            command_rx: cmd_rx,
        };

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Trigger an immediate collection pass and wait for it to finish.
    pub async fn tick_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::TickNow { respond_to: tx })
            .await
            .context("failed to send TickNow command")?;

        rx.await.context("failed to receive response")?;
        Ok(())
    }

    /// Collect a single service immediately.
    pub async fn collect_now(&self, service_id: ServiceId, timeout: Option<Duration>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::CollectNow {
                service_id,
                timeout,
                respond_to: tx,
            })
            .await
            .context("failed to send CollectNow command")?;

        rx.await.context("failed to receive response")?
    }

    /// Gracefully shut down the scheduler.
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
