//! Controller, in-memory tc tables and a live collector on loopback

use condition_sync::Collector;
use cycle_controller::{CancellationToken, CollectorConfig, ControllerConfig, CycleEvent, CycleScheduler};
use network_sim::{MemoryBackend, ObservedHierarchy, QdiscManager};
use scenarios::{PresetId, Rate};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

const IFACE: &str = "veth-e2e";

async fn start_collector() -> (Collector, u16, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let collector = Collector::new();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = collector.clone();
    tokio::spawn(async move {
        server
            .serve(listener, async move {
                let _ = stopped.await;
            })
            .await
    });
    (collector, port, stop)
}

#[tokio::test]
async fn collector_tracks_every_applied_preset() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("cycle_controller=debug,condition_sync=debug")
        .with_test_writer()
        .try_init();

    let (collector, port, stop) = start_collector().await;
    let config = ControllerConfig {
        interface: Some(IFACE.to_string()),
        dwell_secs: 1,
        presets: vec![PresetId::Excellent, PresetId::Poor],
        collector: Some(CollectorConfig {
            port,
            ..CollectorConfig::default()
        }),
        ..ControllerConfig::default()
    };

    let backend = MemoryBackend::with_devices(&[IFACE]);
    let manager = Arc::new(QdiscManager::with_backend(backend.clone()));
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = CycleScheduler::new(
        manager.clone(),
        config.sink().unwrap(),
        IFACE,
        config.schedule().unwrap(),
    )
    .with_events(tx);
    let run = tokio::spawn(scheduler.run(cancel.clone()));

    // Catalog order wins over the order presets were listed in
    let expected = [
        (PresetId::Poor, 2.0, 150.0, 3.0),
        (PresetId::Excellent, 10.0, 20.0, 0.0),
        (PresetId::Poor, 2.0, 150.0, 3.0),
    ];
    let mut seen = 0;
    while seen < expected.len() {
        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no progress from scheduler")
            .expect("scheduler stopped early");
        let (preset, synced) = match event {
            CycleEvent::Applied { preset, synced, .. } => (preset, synced),
            CycleEvent::CycleCompleted => continue,
            other => panic!("unexpected event {:?}", other),
        };
        let (id, rate, delay, loss) = expected[seen];
        assert_eq!(preset, id);
        assert!(synced);

        let latest = collector.latest();
        assert_eq!(latest.preset, id.name());
        assert_eq!((latest.rate, latest.delay, latest.loss), (rate, delay, loss));

        match manager.query(IFACE).await.unwrap() {
            ObservedHierarchy::Flat(netem) => {
                assert_eq!(netem.rate, Some(Rate::bps(rate as u64 * 1_000_000)))
            }
            other => panic!("expected flat netem, got {:?}", other),
        }
        seen += 1;
    }

    cancel.cancel();
    let state = timeout(Duration::from_secs(5), run)
        .await
        .expect("scheduler did not stop")
        .unwrap()
        .unwrap();
    assert!(!state.running);

    let latest = collector.latest();
    assert_eq!(latest.preset, "NONE");
    assert_eq!((latest.rate, latest.delay, latest.loss), (0.0, 0.0, 0.0));
    assert!(!backend.has_hierarchy(IFACE));
    let _ = stop.send(());
}
