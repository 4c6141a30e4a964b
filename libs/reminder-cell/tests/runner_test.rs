mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use reminder_cell::{Sweep, SweepError, SweepMode, SweepReport, SweepRunner};
use shared_utils::{Clock, ManualClock};

use common::{before, session_start, Harness};

const INTERVAL: StdDuration = StdDuration::from_secs(60);

/// Records the mode of every pass and optionally takes a while to finish.
#[derive(Default)]
struct CountingSweep {
    catch_ups: AtomicUsize,
    regular: AtomicUsize,
    work: StdDuration,
    finished: AtomicBool,
}

#[async_trait]
impl Sweep for CountingSweep {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn run(&self, _now: DateTime<Utc>, mode: SweepMode) -> Result<SweepReport, SweepError> {
        match mode {
            SweepMode::CatchUp => self.catch_ups.fetch_add(1, Ordering::SeqCst),
            SweepMode::Regular => self.regular.fetch_add(1, Ordering::SeqCst),
        };
        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }
        self.finished.store(true, Ordering::SeqCst);
        Ok(SweepReport::default())
    }
}

fn clock() -> Arc<dyn Clock> {
    Arc::new(ManualClock::new(session_start()))
}

#[tokio::test(start_paused = true)]
async fn test_start_runs_catch_up_then_ticks() {
    let sweep = Arc::new(CountingSweep::default());
    let mut runner = SweepRunner::new(vec![sweep.clone() as Arc<dyn Sweep>], clock(), INTERVAL);

    runner.start().await.unwrap();
    assert!(runner.is_running());

    tokio::time::sleep(StdDuration::from_secs(1)).await;
    assert_eq!(sweep.catch_ups.load(Ordering::SeqCst), 1);
    assert_eq!(sweep.regular.load(Ordering::SeqCst), 0);

    tokio::time::sleep(INTERVAL * 2).await;
    assert_eq!(sweep.regular.load(Ordering::SeqCst), 2);

    runner.stop().await.unwrap();
    assert!(!runner.is_running());

    tokio::time::sleep(INTERVAL * 3).await;
    assert_eq!(sweep.regular.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_errors() {
    let sweep = Arc::new(CountingSweep::default());
    let mut runner = SweepRunner::new(vec![sweep as Arc<dyn Sweep>], clock(), INTERVAL);

    assert_matches!(runner.stop().await, Err(SweepError::NotRunning));

    runner.start().await.unwrap();
    assert_matches!(runner.start().await, Err(SweepError::AlreadyRunning));
    runner.stop().await.unwrap();

    // Restart after stop
    runner.start().await.unwrap();
    runner.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_batch_in_flight() {
    let sweep = Arc::new(CountingSweep {
        work: StdDuration::from_secs(10),
        ..Default::default()
    });
    let mut runner = SweepRunner::new(vec![sweep.clone() as Arc<dyn Sweep>], clock(), INTERVAL);

    runner.start().await.unwrap();
    tokio::time::sleep(StdDuration::from_secs(1)).await;
    assert!(!sweep.finished.load(Ordering::SeqCst));

    runner.stop().await.unwrap();
    assert!(sweep.finished.load(Ordering::SeqCst));
    assert_eq!(sweep.regular.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_runner_drives_reminder_and_no_show_sweeps() {
    let h = Harness::new().await;
    let appointment = h.book(Uuid::new_v4(), session_start(), 50).await;

    let runner = SweepRunner::new(
        vec![
            h.reminders.clone() as Arc<dyn Sweep>,
            h.no_shows.clone() as Arc<dyn Sweep>,
        ],
        h.clock.clone(),
        INTERVAL,
    );

    // Down for the whole morning, back up 10 minutes before the session
    let results = runner.catch_up(before(10)).await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, result)| result.is_ok()));
    assert_eq!(
        h.dispatcher.reminder_labels_for(appointment.id),
        vec!["24h", "1h", "15m"]
    );

    // Seventy minutes after the session ended, past the no-show grace
    h.clock.set(session_start() + chrono::Duration::hours(2));
    let results = runner.tick(h.now()).await;
    let (name, report) = &results[1];
    assert_eq!(*name, "no-show");
    assert_eq!(report.as_ref().unwrap().processed, 1);
}
