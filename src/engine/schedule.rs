//! Iteration schedule of a training run.

use serde::Serialize;

use crate::config::FitParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    Display,
    Eval,
    Snapshot,
}

/// Something the training loop does after finishing `iteration`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrainingEvent {
    pub iteration: usize,
    pub kind: EventKind,
}

/// Events fired during `1..=max_iter`, in iteration order; within one
/// iteration display comes before eval, eval before snapshot.
pub fn training_events(params: &FitParams) -> impl Iterator<Item = TrainingEvent> + '_ {
    let cadence = [
        (EventKind::Display, params.display),
        (EventKind::Eval, params.eval_interval),
        (EventKind::Snapshot, params.snapshot),
    ];
    (1..=params.max_iter).flat_map(move |iteration| {
        cadence
            .into_iter()
            .filter(move |(_, every)| *every > 0 && iteration % every == 0)
            .map(move |(kind, _)| TrainingEvent { iteration, kind })
    })
}

/// File name of the dense checkpoint written at `iteration`
pub fn snapshot_name(prefix: &str, iteration: usize) -> String {
    format!("{}{}.model", prefix, iteration)
}

/// Outcome of a training run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FitReport {
    pub iterations: usize,
    pub displays: usize,
    pub evals: usize,
    pub snapshots: Vec<String>,
}

impl FitReport {
    pub fn record(&mut self, event: &TrainingEvent, prefix: &str) {
        match event.kind {
            EventKind::Display => self.displays += 1,
            EventKind::Eval => self.evals += 1,
            EventKind::Snapshot => self.snapshots.push(snapshot_name(prefix, event.iteration)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_schedule() {
        let params = FitParams::default();
        let events: Vec<_> = training_events(&params).collect();
        assert_eq!(events.len(), 20);
        assert_eq!(
            events[0],
            TrainingEvent {
                iteration: 100,
                kind: EventKind::Display
            }
        );
        assert_eq!(events[1].kind, EventKind::Eval);
        assert!(events.iter().all(|e| e.kind != EventKind::Snapshot));
    }

    #[test]
    fn test_snapshot_at_last_iteration() {
        let params = FitParams::default()
            .with_max_iter(30)
            .with_display(7)
            .with_eval_interval(15)
            .with_snapshot(30, "ckpt");
        let mut report = FitReport::default();
        for event in training_events(&params) {
            report.record(&event, &params.snapshot_prefix);
        }
        assert_eq!(report.displays, 4);
        assert_eq!(report.evals, 2);
        assert_eq!(report.snapshots, vec!["ckpt30.model".to_string()]);
    }
}
