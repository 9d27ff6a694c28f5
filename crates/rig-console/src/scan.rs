//! Scan worker: walks the arm through the preset positions until stopped.

use std::{io, sync::Arc, thread::JoinHandle, time::Duration};

use arm_control::{ArmDriver, DEFAULT_MOVE_DURATION, ScanPlan, ServoAngles};
use tracing::{info, warn};

use crate::{
    cancel::CancelToken,
    events::{ConsoleEvent, EventSender},
    telemetry,
};

/// Scanning stops after this many arm failures in a row.
pub const MAX_CONSECUTIVE_ARM_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTimings {
    /// Wait after each move before the position is announced.
    pub settle: Duration,
    /// Time spent looking at each position.
    pub observe: Duration,
    pub move_duration: Duration,
}

impl Default for ScanTimings {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(2),
            observe: Duration::from_secs(3),
            move_duration: DEFAULT_MOVE_DURATION,
        }
    }
}

impl ScanTimings {
    /// Shorter observation used by the minimal viewer.
    pub fn minimal() -> Self {
        Self {
            observe: Duration::from_secs(1),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    /// Successful arm moves.
    pub moves: u32,
    pub failures: u32,
    pub aborted: bool,
}

pub struct ScanWorker {
    pub arm: Arc<dyn ArmDriver>,
    pub plan: ScanPlan,
    pub timings: ScanTimings,
    pub events: EventSender,
    pub token: CancelToken,
    /// Tags every event from this run.
    pub scan_id: u64,
}

pub fn spawn_scan_worker(worker: ScanWorker) -> io::Result<JoinHandle<ScanReport>> {
    telemetry::spawn_thread("rig-scan", move || worker.run())
}

enum MoveOutcome {
    Moved,
    Failed,
    Abort,
}

impl ScanWorker {
    fn run(self) -> ScanReport {
        let _span = tracing::info_span!(
            "scan.worker",
            arm = %self.arm.describe(),
            positions = self.plan.len(),
            scan = self.scan_id
        )
        .entered();
        info!("Scan worker started");

        let mut report = ScanReport::default();
        let mut consecutive_failures = 0;
        let total = self.plan.len();

        'cycle: loop {
            for (offset, position) in self.plan.positions().iter().enumerate() {
                if self.token.is_cancelled() {
                    break 'cycle;
                }
                let index = offset + 1;
                match self.move_to(index, position, &mut report, &mut consecutive_failures) {
                    MoveOutcome::Abort => break 'cycle,
                    MoveOutcome::Failed => continue,
                    MoveOutcome::Moved => {}
                }
                if !self.token.sleep(self.timings.settle) {
                    break 'cycle;
                }
                info!("Scanning position {index}/{total}");
                let _ = self.events.send(ConsoleEvent::ScanPosition {
                    scan: self.scan_id,
                    index,
                    total,
                });
                if !self.token.sleep(self.timings.observe) {
                    break 'cycle;
                }
            }

            if self.token.is_cancelled() {
                break;
            }
            let center = self.plan.center();
            if let MoveOutcome::Abort =
                self.move_to(1, &center, &mut report, &mut consecutive_failures)
            {
                break;
            }
            if !self.token.sleep(self.timings.settle) {
                break;
            }
        }

        info!(
            "Scan worker stopped ({} moves, {} failures)",
            report.moves, report.failures
        );
        report
    }

    fn move_to(
        &self,
        index: usize,
        position: &ServoAngles,
        report: &mut ScanReport,
        consecutive_failures: &mut u32,
    ) -> MoveOutcome {
        match self.arm.move_all(position, self.timings.move_duration) {
            Ok(()) => {
                *consecutive_failures = 0;
                report.moves += 1;
                metrics::counter!("rig_arm_moves_total").increment(1);
                MoveOutcome::Moved
            }
            Err(err) => {
                *consecutive_failures += 1;
                report.failures += 1;
                metrics::counter!("rig_arm_failures_total").increment(1);
                warn!("Arm move to position {index} failed: {err}");
                let _ = self.events.send(ConsoleEvent::ArmFault {
                    scan: self.scan_id,
                    index,
                    message: err.to_string(),
                });
                if *consecutive_failures >= MAX_CONSECUTIVE_ARM_FAILURES {
                    let reason = format!("{consecutive_failures} consecutive arm failures");
                    warn!("Scanning aborted: {reason}");
                    let _ = self.events.send(ConsoleEvent::ScanAborted {
                        scan: self.scan_id,
                        reason,
                    });
                    report.aborted = true;
                    MoveOutcome::Abort
                } else {
                    MoveOutcome::Failed
                }
            }
        }
    }
}
