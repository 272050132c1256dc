use crate::chord::routing::ChordRing;
use crate::network::MaintenanceIntervals;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Handle over the periodic maintenance workers of one node.
pub struct Maintenance {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Maintenance {
    /// Spawns stabilize, fix_fingers and check_predecessor on the current runtime.
    pub fn spawn(ring: Arc<ChordRing>, intervals: &MaintenanceIntervals) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let handles = vec![
            tokio::spawn(run_stabilize_worker(ring.clone(), intervals.stabilize, rx.clone())),
            tokio::spawn(run_finger_maintainer(ring.clone(), intervals.fix_fingers, rx.clone())),
            tokio::spawn(run_predecessor_checker(ring, intervals.check_predecessor, rx)),
        ];
        Self { shutdown, handles }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

pub async fn run_stabilize_worker(ring: Arc<ChordRing>, period: Duration, shutdown: watch::Receiver<bool>) {
    info!("Starting stabilize worker for node {}", ring.id());
    run_periodic(period, shutdown, || ring.stabilize()).await;
    debug!("Stabilize worker for node {} stopped", ring.id());
}

pub async fn run_finger_maintainer(ring: Arc<ChordRing>, period: Duration, shutdown: watch::Receiver<bool>) {
    info!("Starting finger table maintenance for node {}", ring.id());
    run_periodic(period, shutdown, || ring.fix_fingers()).await;
    debug!("Finger maintainer for node {} stopped", ring.id());
}

pub async fn run_predecessor_checker(ring: Arc<ChordRing>, period: Duration, shutdown: watch::Receiver<bool>) {
    info!("Starting predecessor health checker for node {}", ring.id());
    run_periodic(period, shutdown, || ring.check_predecessor()).await;
    debug!("Predecessor checker for node {} stopped", ring.id());
}

/// Runs `round` every `period` until shutdown is signalled. Rounds only send
/// messages, so a slow peer never delays the next tick.
async fn run_periodic<F: FnMut()>(period: Duration, mut shutdown: watch::Receiver<bool>, mut round: F) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => round(),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
