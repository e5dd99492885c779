//! Named phase timers with checkpoint deltas.
//!
//! Every timer accumulates wall time across any number of start/stop
//! intervals. A checkpoint snapshots the live value of a set of timers so a
//! later report can show how much each one advanced in between. The overall
//! timer starts at construction and is never stopped.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::errors::TimerError;

#[derive(Debug, Clone, Default)]
struct TimerState {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl TimerState {
    fn live_value(&self, now: Instant) -> Duration {
        self.accumulated
            + self
                .running_since
                .map(|mark| now.saturating_duration_since(mark))
                .unwrap_or_default()
    }
}

/// One line of a timer report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerRow {
    pub name: String,
    pub elapsed: Duration,
}

pub struct CheckpointTimer {
    overall: String,
    /// Registration order is report order; the overall timer is first.
    timers: Vec<(String, TimerState)>,
    checkpoints: HashMap<String, Vec<(String, Duration)>>,
}

impl CheckpointTimer {
    pub fn new(overall: &str) -> Self {
        let state = TimerState {
            accumulated: Duration::ZERO,
            running_since: Some(Instant::now()),
        };
        Self {
            overall: overall.to_string(),
            timers: vec![(overall.to_string(), state)],
            checkpoints: HashMap::new(),
        }
    }

    /// The overall timer plus the four pipeline stage timers.
    pub fn for_pipeline() -> Self {
        let mut timer = Self::new(OVERALL);
        for name in [EIGENMODES, LIGHT_PROPAGATORS, HEAVY_PROPAGATORS, CORRELATORS] {
            timer.register(name);
        }
        timer
    }

    /// Add a stopped timer at zero. Existing timers are left alone.
    pub fn register(&mut self, name: &str) {
        if self.position(name).is_none() {
            self.timers.push((name.to_string(), TimerState::default()));
        }
    }

    pub fn start(&mut self, name: &str) {
        self.register(name);
        if let Some(i) = self.position(name) {
            let state = &mut self.timers[i].1;
            if state.running_since.is_none() {
                state.running_since = Some(Instant::now());
            }
        }
    }

    pub fn stop(&mut self, name: &str) -> Result<(), TimerError> {
        let i = self
            .position(name)
            .ok_or_else(|| TimerError::UnknownTimer(name.to_string()))?;
        let state = &mut self.timers[i].1;
        if let Some(mark) = state.running_since.take() {
            state.accumulated += mark.elapsed();
        }
        Ok(())
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.position(name)
            .is_some_and(|i| self.timers[i].1.running_since.is_some())
    }

    /// Accumulated time including the current run, without stopping it.
    pub fn live_value(&self, name: &str) -> Option<Duration> {
        let now = Instant::now();
        self.position(name).map(|i| self.timers[i].1.live_value(now))
    }

    /// Snapshot the named timers (all timers when `names` is `None`).
    pub fn create_checkpoint(&mut self, label: &str, names: Option<&[&str]>) {
        let now = Instant::now();
        let snapshot = self
            .timers
            .iter()
            .filter(|(name, _)| names.is_none_or(|wanted| wanted.contains(&name.as_str())))
            .map(|(name, state)| (name.clone(), state.live_value(now)))
            .collect();
        self.checkpoints.insert(label.to_string(), snapshot);
        tracing::debug!(checkpoint = label, "Checkpoint created");
    }

    /// How far each snapshotted timer has advanced since `label` was taken.
    pub fn checkpoint_deltas(&self, label: &str) -> Result<Vec<TimerRow>, TimerError> {
        let snapshot = self
            .checkpoints
            .get(label)
            .ok_or_else(|| TimerError::UnknownCheckpoint(label.to_string()))?;
        let now = Instant::now();
        Ok(snapshot
            .iter()
            .map(|(name, at)| {
                let live = self
                    .position(name)
                    .map(|i| self.timers[i].1.live_value(now))
                    .unwrap_or(*at);
                TimerRow {
                    name: name.clone(),
                    elapsed: live.saturating_sub(*at),
                }
            })
            .collect())
    }

    /// Log the deltas for `label`, optionally discarding the checkpoint.
    pub fn write_checkpoint(&mut self, label: &str, remove: bool) -> Result<Vec<TimerRow>, TimerError> {
        let rows = self.checkpoint_deltas(label)?;
        tracing::info!("Time since checkpoint \"{}\"", label);
        log_rows(&rows);
        if remove {
            self.checkpoints.remove(label);
        }
        Ok(rows)
    }

    pub fn has_checkpoint(&self, label: &str) -> bool {
        self.checkpoints.contains_key(label)
    }

    /// Live value of every timer, overall first.
    pub fn full_report(&self) -> Vec<TimerRow> {
        let now = Instant::now();
        self.timers
            .iter()
            .map(|(name, state)| TimerRow {
                name: name.clone(),
                elapsed: state.live_value(now),
            })
            .collect()
    }

    pub fn write_full_report(&self, last: bool) -> Vec<TimerRow> {
        let rows = self.full_report();
        if last {
            tracing::info!("Final report ({})", self.overall);
        }
        log_rows(&rows);
        rows
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.timers.iter().position(|(n, _)| n == name)
    }
}

pub const OVERALL: &str = "Overall";
pub const EIGENMODES: &str = "Eigenmodes";
pub const LIGHT_PROPAGATORS: &str = "Light Propagators";
pub const HEAVY_PROPAGATORS: &str = "Heavy Propagators";
pub const CORRELATORS: &str = "Correlation functions";

fn log_rows(rows: &[TimerRow]) {
    let width = rows.iter().map(|r| r.name.len()).max().unwrap_or(0) + 1;
    for row in rows {
        let name = format!("{}:", row.name);
        tracing::info!("{:width$}\t {}", name, format_duration(row.elapsed), width = width);
    }
}

/// `H:MM:SS.ffffff`, hours unbounded.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!(
        "{}:{:02}:{:02}.{:06}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        d.subsec_micros()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    const TICK: Duration = Duration::from_millis(20);

    #[test]
    fn test_overall_timer_runs_from_construction() {
        let timer = CheckpointTimer::new("Overall");
        sleep(TICK);
        assert!(timer.is_running("Overall"));
        assert!(timer.live_value("Overall").unwrap() >= TICK);
    }

    #[test]
    fn test_registered_timer_starts_stopped_at_zero() {
        let timer = CheckpointTimer::for_pipeline();
        assert_eq!(timer.live_value(EIGENMODES), Some(Duration::ZERO));
        assert!(!timer.is_running(EIGENMODES));
        assert_eq!(timer.full_report().len(), 5);
        assert_eq!(timer.full_report()[0].name, OVERALL);
    }

    #[test]
    fn test_accumulates_across_intervals() {
        let mut timer = CheckpointTimer::new("Overall");
        timer.start("solve");
        sleep(TICK);
        timer.stop("solve").unwrap();
        let first = timer.live_value("solve").unwrap();
        sleep(TICK);
        // Stopped timers do not advance
        assert_eq!(timer.live_value("solve").unwrap(), first);

        timer.start("solve");
        sleep(TICK);
        timer.stop("solve").unwrap();
        assert!(timer.live_value("solve").unwrap() >= first + TICK);
    }

    #[test]
    fn test_live_value_does_not_stop_timer() {
        let mut timer = CheckpointTimer::new("Overall");
        timer.start("solve");
        sleep(TICK);
        let a = timer.live_value("solve").unwrap();
        sleep(TICK);
        let b = timer.live_value("solve").unwrap();
        assert!(b > a);
        assert!(timer.is_running("solve"));
    }

    #[test]
    fn test_stop_unknown_timer_is_error() {
        let mut timer = CheckpointTimer::new("Overall");
        assert_eq!(
            timer.stop("nope"),
            Err(TimerError::UnknownTimer("nope".to_string()))
        );
        timer.register("idle");
        assert!(timer.stop("idle").is_ok());
    }

    #[test]
    fn test_checkpoint_reports_delta_only() {
        let mut timer = CheckpointTimer::new("Overall");
        timer.start("solve");
        sleep(TICK * 2);
        timer.create_checkpoint("cell", None);
        sleep(TICK);
        timer.stop("solve").unwrap();

        let rows = timer.checkpoint_deltas("cell").unwrap();
        let solve = rows.iter().find(|r| r.name == "solve").unwrap();
        assert!(solve.elapsed >= TICK);
        assert!(solve.elapsed < timer.live_value("solve").unwrap());
    }

    #[test]
    fn test_checkpoint_subset_and_removal() {
        let mut timer = CheckpointTimer::for_pipeline();
        timer.create_checkpoint("cell", Some(&[EIGENMODES]));
        let rows = timer.write_checkpoint("cell", true).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, EIGENMODES);
        assert!(!timer.has_checkpoint("cell"));
        assert!(matches!(
            timer.checkpoint_deltas("cell"),
            Err(TimerError::UnknownCheckpoint(_))
        ));
    }

    #[test]
    fn test_write_checkpoint_keeps_when_not_removing() {
        let mut timer = CheckpointTimer::new("Overall");
        timer.create_checkpoint("cell", None);
        timer.write_checkpoint("cell", false).unwrap();
        assert!(timer.has_checkpoint("cell"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_micros(1_500_000)), "0:00:01.500000");
        assert_eq!(format_duration(Duration::from_secs(3 * 3600 + 62)), "3:01:02.000000");
    }
}
