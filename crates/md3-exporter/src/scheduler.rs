use md3_core::{Diffractometer, Timeline};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type SharedDevice = Arc<Mutex<Diffractometer>>;

pub fn lock_device(device: &SharedDevice) -> MutexGuard<'_, Diffractometer> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs the timeline in the background. It is never cancelled: the connection that started
/// it may go away and the steps still land.
pub fn spawn_timeline(device: SharedDevice, timeline: Timeline) -> JoinHandle<()> {
    info!(
        event = "md3_timeline_start",
        label = %timeline.label,
        steps = timeline.steps.len()
    );
    tokio::spawn(run_timeline(device, timeline))
}

pub async fn run_timeline(device: SharedDevice, timeline: Timeline) {
    let Timeline { label, steps } = timeline;
    for step in steps {
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        let mut guard = lock_device(&device);
        for (attribute, value) in step.writes {
            if let Err(err) = guard.write(&attribute, value) {
                warn!(
                    event = "md3_timeline_write_failed",
                    label = %label,
                    attribute = %attribute,
                    kind = err.kind(),
                    error = %err
                );
            }
        }
    }
    debug!(event = "md3_timeline_done", label = %label);
}
