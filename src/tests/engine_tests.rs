//! # Engine Scenario Tests
//!
//! Drive a full [`Engine`] with stub locators and remote sources on a paused
//! Tokio clock. Remote stubs answer with a label derived from the requested
//! latitude so each test can tell which cycle produced the published result.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use tokio::sync::watch;

use crate::clock::Clock;
use crate::engine::{Engine, EngineSettings, Snapshot};
use crate::location::{FixedLocator, LocationError, Locator, NoLocator};
use crate::remote::{RemoteError, RemoteTimeSource, RemoteTimes};
use crate::{Coordinates, EngineState, Origin, Prayer, PrayerTimeSet, Remaining};

const KL: Coordinates = Coordinates::new(3.1390, 101.6869);
const PUTRAJAYA: Coordinates = Coordinates::new(2.9264, 101.6964);
const SHAH_ALAM: Coordinates = Coordinates::new(3.0733, 101.5185);

fn settings() -> EngineSettings {
    EngineSettings {
        fallback: KL,
        fallback_name: "Kuala Lumpur".to_string(),
        location_timeout: Duration::from_secs(5),
        remote_timeout: Duration::from_secs(10),
        tick: Duration::from_secs(60),
        utc_offset: FixedOffset::east_opt(8 * 3600),
    }
}

/// Answers after `delay` with fixed times labelled by the requested latitude.
#[derive(Clone, Default)]
struct EchoRemote {
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl EchoRemote {
    fn delayed(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RemoteTimeSource for EchoRemote {
    async fn fetch(&self, coords: Coordinates, _: i64) -> Result<RemoteTimes, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let hm = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        Ok(RemoteTimes {
            times: PrayerTimeSet::new(
                hm(5, 45),
                hm(7, 10),
                hm(13, 5),
                hm(16, 20),
                hm(19, 10),
                hm(20, 25),
            )
            .unwrap(),
            hijri_date: format!("lat {}", coords.latitude),
        })
    }
}

struct AlwaysFails;

impl RemoteTimeSource for AlwaysFails {
    async fn fetch(&self, _: Coordinates, _: i64) -> Result<RemoteTimes, RemoteError> {
        Err(RemoteError::Disabled)
    }
}

struct Hangs;

impl RemoteTimeSource for Hangs {
    async fn fetch(&self, _: Coordinates, _: i64) -> Result<RemoteTimes, RemoteError> {
        std::future::pending().await
    }
}

/// Reports `position` after `delay`, counting every call.
#[derive(Clone)]
struct CountingLocator {
    position: Coordinates,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl CountingLocator {
    fn new(position: Coordinates, delay: Duration) -> Self {
        Self {
            position,
            delay,
            calls: Arc::default(),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Locator for CountingLocator {
    async fn locate(&self) -> Result<Coordinates, LocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(self.position)
    }
}

/// Remote that never answers and counts how many of its fetches were dropped.
#[derive(Clone, Default)]
struct Stalls {
    started: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
}

struct CountOnDrop(Arc<AtomicUsize>);

impl Drop for CountOnDrop {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl RemoteTimeSource for Stalls {
    async fn fetch(&self, _: Coordinates, _: i64) -> Result<RemoteTimes, RemoteError> {
        let _cancelled = CountOnDrop(Arc::clone(&self.cancelled));
        self.started.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Civil clock that starts at a fixed instant and follows Tokio's (paused) time.
struct FollowsTokio {
    start: DateTime<FixedOffset>,
    origin: tokio::time::Instant,
}

impl FollowsTokio {
    fn starting_at(start: DateTime<FixedOffset>) -> Self {
        Self {
            start,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for FollowsTokio {
    fn now(&self) -> DateTime<FixedOffset> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap();
        self.start + elapsed
    }
}

fn kl_time(h: u32, m: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(8 * 3600)
        .unwrap()
        .with_ymd_and_hms(2024, 1, 15, h, m, 0)
        .unwrap()
}

async fn settled(updates: &mut watch::Receiver<Snapshot>) -> Snapshot {
    updates
        .wait_for(|s| s.state != EngineState::Loading)
        .await
        .unwrap()
        .clone()
}

fn label(snapshot: &Snapshot) -> Option<&str> {
    snapshot.result.as_ref()?.secondary_calendar_label()
}

#[tokio::test(start_paused = true)]
async fn remote_result_becomes_ready() {
    let remote = EchoRemote::default();
    let engine = Engine::spawn(FixedLocator(PUTRAJAYA), remote.clone(), settings());
    let mut updates = engine.subscribe();

    let snapshot = settled(&mut updates).await;
    assert_eq!(snapshot.state, EngineState::Ready);
    assert_eq!(snapshot.coordinates, Some(PUTRAJAYA));
    assert_eq!(label(&snapshot), Some("lat 2.9264"));
    assert!(snapshot.next.is_some());
    assert!(snapshot.previous.is_none());
    assert_eq!(snapshot.location_name, None);
    assert_eq!(remote.calls(), 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_remote_and_missing_location_fall_back_to_local() {
    let engine = Engine::spawn(NoLocator, AlwaysFails, settings());
    let mut updates = engine.subscribe();

    let snapshot = settled(&mut updates).await;
    assert_eq!(snapshot.state, EngineState::Ready);
    assert_eq!(snapshot.coordinates, Some(KL));
    assert_eq!(snapshot.location_name.as_deref(), Some("Kuala Lumpur"));
    let result = snapshot.result.unwrap();
    assert_eq!(result.origin, Origin::Local);
    assert!((result.qibla_bearing - 292.5).abs() < 0.1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn slow_remote_times_out_to_local() {
    let engine = Engine::spawn(FixedLocator(KL), Hangs, settings());
    let mut updates = engine.subscribe();

    let snapshot = settled(&mut updates).await;
    assert_eq!(snapshot.state, EngineState::Ready);
    assert!(!snapshot.result.unwrap().is_remote());

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rapid_coordinate_changes_publish_only_the_last() {
    let remote = EchoRemote::delayed(Duration::from_secs(2));
    let engine = Engine::spawn(FixedLocator(KL), remote.clone(), settings());
    let mut updates = engine.subscribe();
    settled(&mut updates).await;

    engine.set_coordinates(PUTRAJAYA);
    engine.set_coordinates(KL);
    engine.set_coordinates(SHAH_ALAM);

    let snapshot = updates
        .wait_for(|s| s.state == EngineState::Ready && s.coordinates == Some(SHAH_ALAM))
        .await
        .unwrap()
        .clone();
    assert_eq!(label(&snapshot), Some("lat 3.0733"));
    assert_eq!(engine.active_tickers(), 1);

    // Superseded cycles never surface later
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(label(&engine.snapshot()), Some("lat 3.0733"));
    assert_eq!(engine.active_tickers(), 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unchanged_coordinates_do_not_refetch() {
    let remote = EchoRemote::default();
    let engine = Engine::spawn(FixedLocator(KL), remote.clone(), settings());
    let mut updates = engine.subscribe();
    settled(&mut updates).await;

    engine.set_coordinates(KL);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(remote.calls(), 1);
    assert_eq!(engine.snapshot().state, EngineState::Ready);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ticks_recompute_without_refetching() {
    let remote = EchoRemote::default();
    let clock = FollowsTokio::starting_at(kl_time(20, 0));
    let engine = Engine::spawn_with_clock(FixedLocator(KL), remote.clone(), clock, settings());
    let mut updates = engine.subscribe();

    let first = settled(&mut updates).await.next.unwrap();
    assert_eq!(first.prayer, Prayer::Isha);
    assert_eq!(first.remaining, Remaining::from_minutes(25));

    // One tick later the countdown has moved on by a minute
    let ticked = updates
        .wait_for(|s| s.next.is_some_and(|n| n.remaining != first.remaining))
        .await
        .unwrap()
        .next
        .unwrap();
    assert_eq!(ticked.prayer, Prayer::Isha);
    assert_eq!(ticked.remaining, Remaining::from_minutes(24));

    // Once Isha has passed the next prayer is tomorrow's Fajr
    let rolled = updates
        .wait_for(|s| s.next.is_some_and(|n| n.prayer == Prayer::Fajr))
        .await
        .unwrap()
        .next
        .unwrap();
    let tomorrow = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
    assert_eq!(rolled.at, tomorrow.and_hms_opt(5, 45, 0).unwrap());
    assert_eq!(rolled.remaining, Remaining::from_minutes(9 * 60 + 20));

    assert_eq!(remote.calls(), 1);
    assert_eq!(engine.active_tickers(), 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn invalid_coordinates_fail_then_refresh_recovers() {
    let engine = Engine::spawn(FixedLocator(KL), EchoRemote::default(), settings());
    let mut updates = engine.subscribe();
    settled(&mut updates).await;

    engine.set_coordinates(Coordinates::new(95.0, 0.0));
    let failed = updates
        .wait_for(|s| matches!(s.state, EngineState::Error { .. }))
        .await
        .unwrap()
        .clone();
    match &failed.state {
        EngineState::Error { message } => {
            assert!(message.starts_with("Failed to load prayer times"))
        }
        other => panic!("expected error state, got {other:?}"),
    }
    assert!(failed.result.is_none());
    assert!(failed.next.is_none());
    let previous = failed.previous.as_ref().unwrap();
    assert_eq!(previous.secondary_calendar_label(), Some("lat 3.139"));

    engine.refresh();
    let recovered = updates
        .wait_for(|s| s.state == EngineState::Ready)
        .await
        .unwrap()
        .clone();
    assert_eq!(recovered.coordinates, Some(KL));
    assert!(recovered.previous.is_none());

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refresh_resolves_the_location_again() {
    let locator = CountingLocator::new(PUTRAJAYA, Duration::ZERO);
    let remote = EchoRemote::default();
    let engine = Engine::spawn(locator.clone(), remote.clone(), settings());
    let mut updates = engine.subscribe();
    settled(&mut updates).await;
    assert_eq!(locator.calls(), 1);

    engine.refresh();
    updates
        .wait_for(|s| s.state == EngineState::Ready && locator.calls() == 2)
        .await
        .unwrap();
    assert_eq!(remote.calls(), 2);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reported_position_supersedes_slow_lookup() {
    let locator = CountingLocator::new(SHAH_ALAM, Duration::from_secs(3));
    let engine = Engine::spawn(locator, EchoRemote::default(), settings());
    let mut updates = engine.subscribe();

    engine.set_coordinates(PUTRAJAYA);
    let snapshot = settled(&mut updates).await;
    assert_eq!(snapshot.coordinates, Some(PUTRAJAYA));

    // The abandoned lookup would have answered by now
    tokio::time::sleep(Duration::from_secs(10)).await;
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.coordinates, Some(PUTRAJAYA));
    assert_eq!(label(&snapshot), Some("lat 2.9264"));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn location_timeout_uses_fallback() {
    let locator = CountingLocator::new(SHAH_ALAM, Duration::from_secs(60));
    let engine = Engine::spawn(locator, EchoRemote::default(), settings());
    let mut updates = engine.subscribe();

    let snapshot = settled(&mut updates).await;
    assert_eq!(snapshot.coordinates, Some(KL));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_publishing() {
    let engine = Engine::spawn(FixedLocator(KL), EchoRemote::default(), settings());
    let mut updates = engine.subscribe();
    settled(&mut updates).await;

    engine.shutdown().await;
    drop(updates.borrow_and_update());
    assert!(updates.changed().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_engine_cancels_in_flight_fetch() {
    let remote = Stalls::default();
    let slow = EngineSettings {
        remote_timeout: Duration::from_secs(3600),
        ..settings()
    };
    let engine = Engine::spawn(FixedLocator(KL), remote.clone(), slow);
    while remote.started.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    drop(engine);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(remote.cancelled.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_in_flight_fetch() {
    let remote = Stalls::default();
    let slow = EngineSettings {
        remote_timeout: Duration::from_secs(3600),
        ..settings()
    };
    let engine = Engine::spawn(FixedLocator(KL), remote.clone(), slow);
    while remote.started.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    engine.shutdown().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(remote.cancelled.load(Ordering::SeqCst), 1);
}
