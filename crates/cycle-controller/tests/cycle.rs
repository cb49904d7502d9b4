//! Scheduler behaviour against the in-memory tc model, on a paused clock

use async_trait::async_trait;
use condition_sync::{ConditionSink, SyncError, SyncMessage};
use cycle_controller::{CancellationToken, CycleEvent, CycleScheduler, ShapingGuard};
use network_sim::{
    ApplyOutcome, Hierarchy, MemoryBackend, ObservedHierarchy, QdiscError, QdiscManager,
    TcBackend, TcObject, TcOp,
};
use parking_lot::Mutex;
use scenarios::{LayeredProfile, PresetId, Presets, Rate, Schedule};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

const IFACE: &str = "eth0";
const DWELL: Duration = Duration::from_secs(20);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("cycle_controller=debug,network_sim=debug")
        .with_test_writer()
        .try_init();
}

/// Records every message with the (virtual) time it arrived
#[derive(Clone, Default)]
struct RecordingSink {
    seen: Arc<Mutex<Vec<(SyncMessage, Instant)>>>,
}

impl RecordingSink {
    fn presets(&self) -> Vec<String> {
        self.seen.lock().iter().map(|(m, _)| m.preset.clone()).collect()
    }
}

#[async_trait]
impl ConditionSink for RecordingSink {
    async fn publish(&self, message: &SyncMessage) -> condition_sync::Result<()> {
        self.seen.lock().push((message.clone(), Instant::now()));
        Ok(())
    }
}

/// A collector that never answers before the client gives up
struct TimingOutSink {
    timeout: Duration,
}

#[async_trait]
impl ConditionSink for TimingOutSink {
    async fn publish(&self, _message: &SyncMessage) -> condition_sync::Result<()> {
        tokio::time::sleep(self.timeout).await;
        Err(SyncError::NotAcknowledged(String::new()))
    }
}

/// Cancels the run while the first qdisc is being added
struct InterruptingBackend {
    inner: MemoryBackend,
    cancel: CancellationToken,
}

#[async_trait]
impl TcBackend for InterruptingBackend {
    async fn execute(&self, dev: &str, op: &TcOp) -> Result<(), QdiscError> {
        if matches!(op, TcOp::AddQdisc { .. }) {
            self.cancel.cancel();
        }
        self.inner.execute(dev, op).await
    }

    async fn show(&self, dev: &str, object: TcObject) -> Result<String, QdiscError> {
        self.inner.show(dev, object).await
    }

    fn delete_root_blocking(&self, dev: &str) -> Result<(), QdiscError> {
        self.inner.delete_root_blocking(dev)
    }
}

struct Harness {
    backend: MemoryBackend,
    manager: Arc<QdiscManager<MemoryBackend>>,
    sink: RecordingSink,
    cancel: CancellationToken,
}

impl Harness {
    fn new() -> Self {
        init_logging();
        let backend = MemoryBackend::with_devices(&[IFACE]);
        Self {
            manager: Arc::new(QdiscManager::with_backend(backend.clone())),
            backend,
            sink: RecordingSink::default(),
            cancel: CancellationToken::new(),
        }
    }

    fn scheduler(&self, schedule: Schedule) -> CycleScheduler<MemoryBackend> {
        CycleScheduler::new(
            self.manager.clone(),
            Arc::new(self.sink.clone()),
            IFACE,
            schedule,
        )
    }

    fn cycle(presets: &[PresetId]) -> Schedule {
        Schedule::Cycle {
            presets: Presets::select(presets),
            dwell: DWELL,
        }
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<CycleEvent>) -> CycleEvent {
    rx.recv().await.expect("scheduler stopped emitting events")
}

#[tokio::test(start_paused = true)]
async fn full_cycle_visits_catalog_in_order_then_wraps() {
    let h = Harness::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let run = tokio::spawn(
        h.scheduler(Schedule::full_cycle())
            .with_events(tx)
            .run(h.cancel.clone()),
    );

    let mut applied = Vec::new();
    let mut completed_after = None;
    while applied.len() < 7 {
        match next_event(&mut rx).await {
            CycleEvent::Applied { preset, synced, .. } => {
                assert!(synced);
                applied.push(preset);
            }
            CycleEvent::CycleCompleted => completed_after = Some(applied.len()),
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(applied[..6], PresetId::ALL);
    assert_eq!(applied[6], PresetId::VeryPoor);
    assert_eq!(completed_after, Some(6));

    h.cancel.cancel();
    let state = run.await.unwrap().unwrap();
    assert!(!state.running);
    assert_eq!(state.hierarchy, None);
    assert!(!h.backend.has_hierarchy(IFACE));

    let seen = h.sink.seen.lock();
    for pair in seen[..7].windows(2) {
        assert_eq!(pair[1].1 - pair[0].1, DWELL);
    }
    assert_eq!(seen.last().unwrap().0, SyncMessage::none());
}

#[tokio::test(start_paused = true)]
async fn failing_collector_does_not_shift_timing_or_selection() {
    let h = Harness::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = CycleScheduler::new(
        h.manager.clone(),
        Arc::new(TimingOutSink {
            timeout: Duration::from_secs(2),
        }),
        IFACE,
        Harness::cycle(&[PresetId::Poor, PresetId::Fair, PresetId::Good]),
    )
    .with_events(tx);
    let run = tokio::spawn(scheduler.run(h.cancel.clone()));

    let mut steps = Vec::new();
    while steps.len() < 4 {
        match next_event(&mut rx).await {
            CycleEvent::Applied { preset, synced, .. } => {
                assert!(!synced);
                steps.push((preset, Instant::now()));
            }
            CycleEvent::CycleCompleted => {}
            other => panic!("unexpected event {:?}", other),
        }
    }
    let order: Vec<_> = steps.iter().map(|(p, _)| *p).collect();
    assert_eq!(
        order,
        [PresetId::Poor, PresetId::Fair, PresetId::Good, PresetId::Poor]
    );
    for pair in steps.windows(2) {
        assert_eq!(pair[1].1 - pair[0].1, DWELL);
    }

    h.cancel.cancel();
    run.await.unwrap().unwrap();
    assert!(!h.backend.has_hierarchy(IFACE));
}

#[tokio::test(start_paused = true)]
async fn rejected_preset_is_skipped_without_sync() {
    let h = Harness::new();
    h.backend
        .fail_on("rate 2mbit", "Error: Exclusivity flag on, cannot modify.");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let run = tokio::spawn(
        h.scheduler(Harness::cycle(&[
            PresetId::VeryPoor,
            PresetId::Poor,
            PresetId::Fair,
        ]))
        .with_events(tx)
        .run(h.cancel.clone()),
    );

    assert!(matches!(
        next_event(&mut rx).await,
        CycleEvent::Applied { preset: PresetId::VeryPoor, .. }
    ));
    match next_event(&mut rx).await {
        CycleEvent::Skipped { preset, error, .. } => {
            assert_eq!(preset, PresetId::Poor);
            assert!(error.contains("Exclusivity"));
        }
        other => panic!("expected skipped step, got {:?}", other),
    }
    assert!(matches!(
        next_event(&mut rx).await,
        CycleEvent::Applied { preset: PresetId::Fair, outcome: ApplyOutcome::Changed, .. }
    ));

    h.cancel.cancel();
    run.await.unwrap().unwrap();

    assert_eq!(h.sink.presets(), ["VeryPoor", "Fair", "NONE"]);
    let seen = h.sink.seen.lock();
    assert_eq!(seen[1].1 - seen[0].1, DWELL * 2);
}

#[tokio::test(start_paused = true)]
async fn interrupt_before_first_apply_leaves_nothing() {
    let h = Harness::new();
    h.manager
        .apply(IFACE, &Hierarchy::for_preset(&Presets::get(PresetId::Good)))
        .await
        .unwrap();
    h.backend.clear_commands();

    let (tx, mut rx) = mpsc::unbounded_channel();
    h.cancel.cancel();
    h.scheduler(Schedule::full_cycle())
        .with_events(tx)
        .run(h.cancel.clone())
        .await
        .unwrap();

    assert_eq!(next_event(&mut rx).await, CycleEvent::Finalized);
    assert!(!h.backend.has_hierarchy(IFACE));
    assert_eq!(h.backend.commands(), ["tc qdisc del dev eth0 root"]);
    assert_eq!(h.sink.presets(), ["NONE"]);
}

#[tokio::test(start_paused = true)]
async fn interrupt_mid_apply_finishes_then_cleans_up() {
    init_logging();
    let cancel = CancellationToken::new();
    let memory = MemoryBackend::with_devices(&[IFACE]);
    let manager = Arc::new(QdiscManager::with_backend(InterruptingBackend {
        inner: memory.clone(),
        cancel: cancel.clone(),
    }));
    let sink = RecordingSink::default();

    CycleScheduler::new(manager, Arc::new(sink.clone()), IFACE, Schedule::full_cycle())
        .run(cancel)
        .await
        .unwrap();

    // The add ran to completion before the teardown
    let commands = memory.commands();
    assert_eq!(commands.len(), 3);
    assert!(commands[1].starts_with("tc qdisc add dev eth0 root netem rate 1mbit"));
    assert_eq!(commands[2], "tc qdisc del dev eth0 root");
    assert!(!memory.has_hierarchy(IFACE));
    assert_eq!(sink.presets(), ["NONE"]);
}

#[tokio::test(start_paused = true)]
async fn interrupt_mid_sleep_stops_promptly() {
    let h = Harness::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let run = tokio::spawn(
        h.scheduler(Schedule::full_cycle())
            .with_events(tx)
            .run(h.cancel.clone()),
    );

    assert!(matches!(
        next_event(&mut rx).await,
        CycleEvent::Applied { preset: PresetId::VeryPoor, .. }
    ));
    let interrupted = Instant::now();
    tokio::time::sleep(Duration::from_secs(5)).await;
    h.cancel.cancel();
    run.await.unwrap().unwrap();

    assert!(interrupted.elapsed() < DWELL);
    assert_eq!(next_event(&mut rx).await, CycleEvent::Finalized);
    assert!(!h.backend.has_hierarchy(IFACE));
    assert_eq!(h.sink.presets(), ["VeryPoor", "NONE"]);
}

#[tokio::test(start_paused = true)]
async fn switching_flat_and_layered_never_mixes() {
    let h = Harness::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let run = tokio::spawn(
        h.scheduler(Harness::cycle(&[PresetId::Excellent, PresetId::Ultra]))
            .with_events(tx)
            .run(h.cancel.clone()),
    );

    let expected = [
        (PresetId::Excellent, ApplyOutcome::Created),
        (PresetId::Ultra, ApplyOutcome::Replaced),
        (PresetId::Excellent, ApplyOutcome::Replaced),
    ];
    let mut applied = 0;
    while applied < expected.len() {
        let (preset, outcome) = match next_event(&mut rx).await {
            CycleEvent::Applied { preset, outcome, .. } => (preset, outcome),
            CycleEvent::CycleCompleted => continue,
            other => panic!("unexpected event {:?}", other),
        };
        assert_eq!((preset, outcome), expected[applied]);

        match h.manager.query(IFACE).await.unwrap() {
            ObservedHierarchy::Flat(netem) => {
                assert_eq!(preset, PresetId::Excellent);
                assert_eq!(netem.rate, Some(Rate::mbit(10)));
            }
            ObservedHierarchy::Layered(observed) => {
                assert_eq!(preset, PresetId::Ultra);
                assert!(observed.matches(&LayeredProfile::ultra()));
            }
            other => panic!("unexpected hierarchy {:?}", other),
        }
        applied += 1;
    }

    h.cancel.cancel();
    run.await.unwrap().unwrap();
    assert!(!h.backend.has_hierarchy(IFACE));
}

#[tokio::test(start_paused = true)]
async fn stable_mode_holds_layered_until_cancelled() {
    let h = Harness::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let run = tokio::spawn(
        h.scheduler(Schedule::stable())
            .with_events(tx)
            .run(h.cancel.clone()),
    );

    assert!(matches!(
        next_event(&mut rx).await,
        CycleEvent::Applied { preset: PresetId::Ultra, outcome: ApplyOutcome::Created, .. }
    ));
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert!(rx.try_recv().is_err());
    assert!(matches!(
        h.manager.query(IFACE).await.unwrap(),
        ObservedHierarchy::Layered(_)
    ));

    h.cancel.cancel();
    run.await.unwrap().unwrap();
    assert!(!h.backend.has_hierarchy(IFACE));
    assert_eq!(h.sink.presets(), ["Ultra", "NONE"]);
}

#[tokio::test(start_paused = true)]
async fn stable_mode_retries_after_rejected_apply() {
    let h = Harness::new();
    h.backend.fail_on(
        "htb default",
        "RTNETLINK answers: Device or resource busy",
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let run = tokio::spawn(
        h.scheduler(Schedule::stable())
            .with_events(tx)
            .run(h.cancel.clone()),
    );

    let failed_at = match next_event(&mut rx).await {
        CycleEvent::Skipped { preset, error, .. } => {
            assert_eq!(preset, PresetId::Ultra);
            assert!(error.contains("busy"));
            Instant::now()
        }
        other => panic!("expected skipped step, got {:?}", other),
    };
    assert!(!h.backend.has_hierarchy(IFACE));

    assert!(matches!(
        next_event(&mut rx).await,
        CycleEvent::Applied { preset: PresetId::Ultra, outcome: ApplyOutcome::Created, synced: true, .. }
    ));
    assert_eq!(failed_at.elapsed(), scenarios::DEFAULT_DWELL);
    assert!(matches!(
        h.manager.query(IFACE).await.unwrap(),
        ObservedHierarchy::Layered(_)
    ));

    // Once applied, the hold is indefinite
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert!(rx.try_recv().is_err());
    let htb_adds = h
        .backend
        .commands()
        .iter()
        .filter(|c| c.contains("htb default"))
        .count();
    assert_eq!(htb_adds, 2);

    h.cancel.cancel();
    run.await.unwrap().unwrap();
    assert!(!h.backend.has_hierarchy(IFACE));
    assert_eq!(h.sink.presets(), ["Ultra", "NONE"]);
}

#[tokio::test(start_paused = true)]
async fn vanished_interface_is_fatal_and_still_reported() {
    let h = Harness::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let run = tokio::spawn(
        h.scheduler(Schedule::full_cycle())
            .with_events(tx)
            .run(h.cancel.clone()),
    );

    assert!(matches!(
        next_event(&mut rx).await,
        CycleEvent::Applied { preset: PresetId::VeryPoor, .. }
    ));
    h.backend.remove_device(IFACE);

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        cycle_controller::ControllerError::Qdisc(QdiscError::InterfaceNotFound(_))
    ));
    assert_eq!(next_event(&mut rx).await, CycleEvent::Finalized);
    assert_eq!(h.sink.presets(), ["VeryPoor", "NONE"]);
}

#[tokio::test(start_paused = true)]
async fn dropped_run_is_cleaned_up_by_guard() {
    let h = Harness::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let run = tokio::spawn(
        h.scheduler(Schedule::full_cycle())
            .with_events(tx)
            .run(h.cancel.clone()),
    );

    assert!(matches!(
        next_event(&mut rx).await,
        CycleEvent::Applied { preset: PresetId::VeryPoor, .. }
    ));
    assert!(h.backend.has_hierarchy(IFACE));

    run.abort();
    assert!(run.await.unwrap_err().is_cancelled());
    assert!(!h.backend.has_hierarchy(IFACE));
}

#[tokio::test]
async fn disarmed_guard_leaves_shaping_alone() {
    let h = Harness::new();
    let poor = Hierarchy::for_preset(&Presets::get(PresetId::Poor));

    h.manager.apply(IFACE, &poor).await.unwrap();
    ShapingGuard::new(h.manager.clone(), IFACE).disarm();
    assert!(h.backend.has_hierarchy(IFACE));

    drop(ShapingGuard::new(h.manager.clone(), IFACE));
    assert!(!h.backend.has_hierarchy(IFACE));
}
