//! Preset cycle scheduler
//!
//! One step applies a preset, reports it, then holds it for the dwell
//! interval. Steps run strictly in sequence on the calling task, so no two
//! traffic-control operations on the interface ever overlap. Cancellation is
//! observed between steps and while holding; an operation already in flight
//! is allowed to finish.

use crate::cleanup::{finalize, ShapingGuard};
use crate::state::CycleState;
use crate::ControllerError;
use condition_sync::{report, ConditionSink, SyncMessage};
use network_sim::{apply_preset, ApplyOutcome, Hierarchy, QdiscManager, TcBackend};
use scenarios::{PresetId, Schedule, DEFAULT_DWELL};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Wait before re-applying a held preset that failed
const HOLD_RETRY: std::time::Duration = DEFAULT_DWELL;

/// Progress notifications, mainly for tests and status output
#[derive(Debug, Clone, PartialEq)]
pub enum CycleEvent {
    Applied {
        index: usize,
        preset: PresetId,
        outcome: ApplyOutcome,
        synced: bool,
    },
    /// The preset could not be applied; its dwell is still observed
    Skipped {
        index: usize,
        preset: PresetId,
        error: String,
    },
    CycleCompleted,
    Finalized,
}

/// Drives a [`Schedule`] onto one interface
pub struct CycleScheduler<B: TcBackend> {
    manager: Arc<QdiscManager<B>>,
    sink: Arc<dyn ConditionSink>,
    schedule: Schedule,
    state: CycleState,
    events: Option<mpsc::UnboundedSender<CycleEvent>>,
}

enum Stop {
    Cancelled,
    Failed(ControllerError),
}

impl<B: TcBackend + 'static> CycleScheduler<B> {
    pub fn new(
        manager: Arc<QdiscManager<B>>,
        sink: Arc<dyn ConditionSink>,
        interface: impl Into<String>,
        schedule: Schedule,
    ) -> Self {
        Self {
            manager,
            sink,
            schedule,
            state: CycleState::new(interface),
            events: None,
        }
    }

    /// Send a [`CycleEvent`] for every step to `events`
    pub fn with_events(mut self, events: mpsc::UnboundedSender<CycleEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> &CycleState {
        &self.state
    }

    /// Run until `cancel` fires or a fatal error occurs.
    ///
    /// Shaping is always removed before this returns; if the future is
    /// dropped mid-run the guard removes it synchronously instead.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<CycleState, ControllerError> {
        if self.schedule.is_empty() {
            return Err(ControllerError::EmptySchedule);
        }
        let interface = self.state.interface.clone();
        let guard = ShapingGuard::new(self.manager.clone(), interface.clone());

        self.state.running = true;
        info!("Starting preset cycle on {}", interface);
        let stop = self.drive(&interface, &cancel).await;

        let teardown = finalize(self.manager.as_ref(), self.sink.as_ref(), &interface).await;
        guard.disarm();
        self.state.reset();
        self.emit(CycleEvent::Finalized);

        match stop {
            Stop::Cancelled => {
                teardown?;
                info!("Preset cycle on {} stopped", interface);
                Ok(self.state)
            }
            Stop::Failed(e) => Err(e),
        }
    }

    async fn drive(&mut self, interface: &str, cancel: &CancellationToken) -> Stop {
        if cancel.is_cancelled() {
            return Stop::Cancelled;
        }
        if let Err(e) = self.manager.teardown(interface).await {
            return Stop::Failed(e.into());
        }

        let schedule = self.schedule.clone();
        let dwell = match &schedule {
            Schedule::Cycle { dwell, .. } => Some(*dwell),
            Schedule::Hold(_) => None,
        };
        let mut cursor = schedule.cursor();

        loop {
            if cancel.is_cancelled() {
                return Stop::Cancelled;
            }
            let Some(step) = cursor.advance() else {
                return Stop::Failed(ControllerError::EmptySchedule);
            };
            if step.wrapped && dwell.is_some() {
                info!("Completed one full cycle");
                self.emit(CycleEvent::CycleCompleted);
            }
            let started = Instant::now();

            info!("Applying preset {}", step.preset);
            let applied = match apply_preset(self.manager.as_ref(), interface, step.preset).await {
                Ok(outcome) => {
                    let variant = Hierarchy::for_preset(step.preset).variant();
                    self.state.applied(step.index, variant);
                    if cancel.is_cancelled() {
                        return Stop::Cancelled;
                    }
                    let synced =
                        report(self.sink.as_ref(), &SyncMessage::from_preset(step.preset)).await;
                    self.emit(CycleEvent::Applied {
                        index: step.index,
                        preset: step.preset.id,
                        outcome,
                        synced,
                    });
                    true
                }
                Err(e) if e.is_fatal() => {
                    self.state.apply_failed(step.index);
                    return Stop::Failed(e.into());
                }
                Err(e) => {
                    warn!("Could not apply preset {}, skipping: {}", step.preset.name(), e);
                    self.state.apply_failed(step.index);
                    self.emit(CycleEvent::Skipped {
                        index: step.index,
                        preset: step.preset.id,
                        error: e.to_string(),
                    });
                    false
                }
            };

            match dwell {
                Some(dwell) => {
                    debug!("Holding {} for {:?}", step.preset.name(), dwell);
                    tokio::select! {
                        _ = cancel.cancelled() => return Stop::Cancelled,
                        _ = sleep_until(started + dwell) => {}
                    }
                }
                None if applied => {
                    info!("Holding {} until interrupted", step.preset.name());
                    cancel.cancelled().await;
                    return Stop::Cancelled;
                }
                None => {
                    info!("Retrying {} in {:?}", step.preset.name(), HOLD_RETRY);
                    tokio::select! {
                        _ = cancel.cancelled() => return Stop::Cancelled,
                        _ = sleep_until(started + HOLD_RETRY) => {}
                    }
                }
            }
        }
    }

    fn emit(&self, event: CycleEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
