//! # Refresh Scheduler
//!
//! The engine ties everything together and keeps the displayed state current.
//!
//! ## Architecture
//!
//! ```text
//!   Engine (handle) ──commands──> actor task ──snapshots──> watch::Receiver
//!                                   ▲    ▲
//!                ticker task ─ticks─┘    └─results── location / arbitration tasks
//! ```
//!
//! - The **actor** owns every piece of mutable state. Nothing else writes it.
//! - The **ticker** is started once, when the engine is spawned, and only asks the
//!   actor to re-run the next-prayer selection against the cached times. It
//!   never fetches or recomputes prayer times. Coordinate changes do not touch it.
//! - **Location** and **arbitration** run as short-lived tasks, at most one of
//!   each in flight. Each carries a generation number; starting a new one aborts
//!   the previous task, and a result from an older generation is dropped.
//!
//! Shutting the engine down (or dropping it) aborts the ticker and any in-flight
//! task, so nothing can mutate state after teardown.
//!
//! "Now" always comes from the engine's [`Clock`]; nothing else reads the time.

use crate::arbiter::Arbiter;
use crate::astronomy::AstronomyError;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::location::{self, Locator};
use crate::next_event;
use crate::remote::RemoteTimeSource;
use crate::{Coordinates, EngineState, NextEventInfo, TimeSourceResult};
use chrono::FixedOffset;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Tunables for an [`Engine`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Position used when the locator cannot provide one
    pub fallback: Coordinates,
    /// Display name of `fallback`
    pub fallback_name: String,
    /// Upper bound on one location attempt
    pub location_timeout: Duration,
    /// Upper bound on the remote fetch before computing locally
    pub remote_timeout: Duration,
    /// Interval between countdown recomputations
    pub tick: Duration,
    /// Offset of the civil clock the times are expressed in; host locale when `None`
    pub utc_offset: Option<FixedOffset>,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            fallback: config.location.fallback(),
            fallback_name: config.location.fallback_name.clone(),
            location_timeout: config.location.timeout(),
            remote_timeout: config.remote.timeout(),
            tick: config.schedule.tick(),
            utc_offset: config.location.utc_offset(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Everything display code needs, published after every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub state: EngineState,
    /// Coordinates of the current (or in-flight) cycle
    pub coordinates: Option<Coordinates>,
    /// Name of `coordinates` when they are the configured fallback position
    pub location_name: Option<String>,
    /// Fresh result for `coordinates`; `None` while loading or after a failure
    pub result: Option<TimeSourceResult>,
    /// Last good result from an earlier cycle, kept while loading or failed
    pub previous: Option<TimeSourceResult>,
    /// Upcoming prayer, derived from `result` on every tick
    pub next: Option<NextEventInfo>,
}

enum Command {
    SetCoordinates(Coordinates),
    Refresh,
    Shutdown,
}

enum Event {
    Located {
        generation: u64,
        coordinates: Coordinates,
    },
    Arbitrated {
        generation: u64,
        outcome: Result<TimeSourceResult, AstronomyError>,
    },
    Tick,
}

/// Handle to a running engine.
///
/// Must be created inside a Tokio runtime.
pub struct Engine {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<Snapshot>,
    actor: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
    live_tickers: Arc<AtomicUsize>,
}

impl Engine {
    /// Start the engine: resolve the location, arbitrate, and start the ticker.
    ///
    /// Time is read from the system clock at `settings.utc_offset`.
    pub fn spawn<L, R>(locator: L, remote: R, settings: EngineSettings) -> Self
    where
        L: Locator,
        R: RemoteTimeSource,
    {
        let clock = SystemClock::new(settings.utc_offset);
        Self::spawn_with_clock(locator, remote, clock, settings)
    }

    /// Like [`Engine::spawn`], reading the time from `clock`.
    pub fn spawn_with_clock<L, R, C>(
        locator: L,
        remote: R,
        clock: C,
        settings: EngineSettings,
    ) -> Self
    where
        L: Locator,
        R: RemoteTimeSource,
        C: Clock,
    {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let (publisher, snapshots) = watch::channel(Snapshot::default());

        let live_tickers = Arc::new(AtomicUsize::new(0));
        let ticker = spawn_ticker(settings.tick, events.clone(), Arc::clone(&live_tickers));

        let actor = Actor {
            locator: Arc::new(locator),
            remote: Arc::new(remote),
            clock,
            settings,
            events,
            publisher,
            snapshot: Snapshot::default(),
            location_generation: 0,
            location_task: None,
            cycle_generation: 0,
            cycle_task: None,
        };
        let actor = tokio::spawn(actor.run(command_rx, event_rx));

        Self {
            commands,
            snapshots,
            actor: Some(actor),
            ticker: Some(ticker),
            live_tickers,
        }
    }

    /// Current state.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every published change.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Re-resolve the location and re-run arbitration.
    pub fn refresh(&self) {
        self.send(Command::Refresh);
    }

    /// Report a new position (e.g. a fresh device fix).
    pub fn set_coordinates(&self, coordinates: Coordinates) {
        self.send(Command::SetCoordinates(coordinates));
    }

    /// Number of countdown tickers currently alive.
    pub fn active_tickers(&self) -> usize {
        self.live_tickers.load(Ordering::SeqCst)
    }

    /// Stop the ticker and the actor, discarding anything still in flight.
    pub async fn shutdown(mut self) {
        self.send(Command::Shutdown);
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
            let _ = ticker.await;
        }
        if let Some(actor) = self.actor.take() {
            let _ = actor.await;
        }
        info!("engine stopped");
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("engine is not running; command ignored");
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if let Some(actor) = self.actor.take() {
            actor.abort();
        }
    }
}

/// Counts itself in `live` for as long as it exists.
struct LiveTicker(Arc<AtomicUsize>);

impl LiveTicker {
    fn register(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(live)
    }
}

impl Drop for LiveTicker {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn spawn_ticker(
    period: Duration,
    events: mpsc::UnboundedSender<Event>,
    live: Arc<AtomicUsize>,
) -> JoinHandle<()> {
    let guard = LiveTicker::register(live);
    tokio::spawn(async move {
        let _guard = guard;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if events.send(Event::Tick).is_err() {
                break;
            }
        }
    })
}

/// Aborts the task it wraps when dropped, including when the actor itself is
/// torn down.
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Actor<L, R, C> {
    locator: Arc<L>,
    remote: Arc<R>,
    clock: C,
    settings: EngineSettings,
    events: mpsc::UnboundedSender<Event>,
    publisher: watch::Sender<Snapshot>,
    snapshot: Snapshot,
    location_generation: u64,
    location_task: Option<TaskGuard>,
    cycle_generation: u64,
    cycle_task: Option<TaskGuard>,
}

impl<L: Locator, R: RemoteTimeSource, C: Clock> Actor<L, R, C> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        self.begin_location();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::SetCoordinates(coordinates)) => self.on_coordinates(coordinates),
                    Some(Command::Refresh) => self.begin_location(),
                    Some(Command::Shutdown) | None => break,
                },
                Some(event) = events.recv() => self.on_event(event),
            }
        }

        self.abort_in_flight();
        debug!("engine actor exited");
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::Located {
                generation,
                coordinates,
            } => {
                if generation != self.location_generation {
                    debug!(generation, "discarding stale location result");
                    return;
                }
                self.location_task = None;
                self.begin_cycle(coordinates);
            }
            Event::Arbitrated {
                generation,
                outcome,
            } => {
                if generation != self.cycle_generation {
                    debug!(generation, "discarding stale arbitration result");
                    return;
                }
                self.cycle_task = None;
                self.finish_cycle(outcome);
            }
            Event::Tick => self.on_tick(),
        }
    }

    /// A position reported by the caller supersedes any pending lookup.
    fn on_coordinates(&mut self, coordinates: Coordinates) {
        if self.location_task.take().is_some() {
            self.location_generation += 1;
        }

        let same = self.snapshot.coordinates == Some(coordinates);
        let covered = self.cycle_task.is_some() || self.snapshot.state == EngineState::Ready;
        if same && covered {
            debug!("coordinates unchanged; keeping current cycle");
            return;
        }
        self.begin_cycle(coordinates);
    }

    fn begin_location(&mut self) {
        self.location_task = None;
        if self.cycle_task.take().is_some() {
            self.cycle_generation += 1;
        }
        self.location_generation += 1;
        let generation = self.location_generation;

        self.enter_loading(self.snapshot.coordinates);

        let locator = Arc::clone(&self.locator);
        let events = self.events.clone();
        let fallback = self.settings.fallback;
        let timeout = self.settings.location_timeout;
        self.location_task = Some(TaskGuard(tokio::spawn(async move {
            let coordinates = location::resolve(locator.as_ref(), fallback, timeout).await;
            let _ = events.send(Event::Located {
                generation,
                coordinates,
            });
        })));
    }

    fn begin_cycle(&mut self, coordinates: Coordinates) {
        self.cycle_task = None;
        self.cycle_generation += 1;
        let generation = self.cycle_generation;

        self.enter_loading(Some(coordinates));
        info!(
            generation,
            lat = coordinates.latitude,
            lon = coordinates.longitude,
            "arbitrating prayer times"
        );

        let remote = Arc::clone(&self.remote);
        let events = self.events.clone();
        let timeout = self.settings.remote_timeout;
        let now = self.clock.now();
        self.cycle_task = Some(TaskGuard(tokio::spawn(async move {
            let mut arbiter = Arbiter::new(remote, timeout);
            let outcome = arbiter.arbitrate(coordinates, now).await;
            let _ = events.send(Event::Arbitrated {
                generation,
                outcome,
            });
        })));
    }

    fn finish_cycle(&mut self, outcome: Result<TimeSourceResult, AstronomyError>) {
        match outcome {
            Ok(result) => {
                let now = self.clock.now().naive_local();
                self.snapshot.next = Some(next_event::select(&result.times, now));
                self.snapshot.result = Some(result);
                self.snapshot.previous = None;
                self.snapshot.state = EngineState::Ready;
            }
            Err(err) => {
                self.snapshot.state = EngineState::Error {
                    message: format!("Failed to load prayer times: {err}"),
                };
            }
        }
        self.publish();
    }

    fn on_tick(&mut self) {
        let now = self.clock.now().naive_local();
        let Some(result) = &self.snapshot.result else {
            return;
        };
        let next = next_event::select(&result.times, now);
        if self.snapshot.next != Some(next) {
            self.snapshot.next = Some(next);
            self.publish();
        }
    }

    /// Retire the current result into `previous` and mark the engine loading.
    fn enter_loading(&mut self, coordinates: Option<Coordinates>) {
        if let Some(result) = self.snapshot.result.take() {
            self.snapshot.previous = Some(result);
        }
        self.snapshot.next = None;
        self.snapshot.coordinates = coordinates;
        self.snapshot.location_name = coordinates
            .filter(|c| *c == self.settings.fallback)
            .map(|_| self.settings.fallback_name.clone());
        self.snapshot.state = EngineState::Loading;
        self.publish();
    }

    fn abort_in_flight(&mut self) {
        self.location_task = None;
        self.cycle_task = None;
    }

    fn publish(&self) {
        self.publisher.send_replace(self.snapshot.clone());
    }
}
