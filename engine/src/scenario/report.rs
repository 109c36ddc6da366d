use log::{
    error,
    info,
};
use serde::{
    Deserialize,
    Serialize,
};
use smartstring::alias::String;

use crate::graphics::gpu::RayQueryHit;

use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellMismatch {
    pub x: u32,
    pub y: u32,
    pub expected: RayQueryHit,
    pub actual: RayQueryHit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioFailure {
    InvalidParams { message: std::string::String },
    /// An engine call of the pass that ran with `worker_threads` failed.
    Error { worker_threads: u32, message: std::string::String },
    /// The pass with `worker_threads` traced, but some cells disagree with the checkerboard.
    Mismatch { worker_threads: u32, cells: Vec<CellMismatch> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub name: String,
    pub params: ScenarioParams,
    pub failure: Option<ScenarioFailure>,
}

impl ScenarioOutcome {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    pub(super) fn log(&self) {
        match &self.failure {
            None => info!("PASS {}", self.name),
            Some(ScenarioFailure::InvalidParams { message }) => error!("FAIL {}: {}", self.name, message),
            Some(ScenarioFailure::Error { worker_threads, message }) => {
                error!("FAIL {} ({} worker threads): {}", self.name, worker_threads, message)
            }
            Some(ScenarioFailure::Mismatch { worker_threads, cells }) => {
                error!("FAIL {} ({} worker threads): {} cells differ", self.name, worker_threads, cells.len());
                if let Some(cell) = cells.first() {
                    error!("  first at ({}, {}): expected {:?}, got {:?}", cell.x, cell.y, cell.expected, cell.actual);
                }
            }
        }
    }
}

/// Outcomes of a batch of scenarios in the order they were given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub outcomes: Vec<ScenarioOutcome>,
}

impl ScenarioReport {
    pub fn push(&mut self, outcome: ScenarioOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.passed_count()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(ScenarioOutcome::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScenarioOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.passed())
    }

    pub fn to_json(&self) -> Result<std::string::String, ScenarioError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn log_summary(&self) {
        if self.is_success() {
            info!("{} scenarios passed", self.outcomes.len());
        } else {
            error!(
                "{} of {} scenarios failed",
                self.failed_count(),
                self.outcomes.len()
            );
        }
    }
}

/// Cells where `actual` differs from `expected`, both laid out row by row.
pub fn compare_results(width: u32, expected: &[RayQueryHit], actual: &[RayQueryHit]) -> Vec<CellMismatch> {
    let mut mismatches: Vec<CellMismatch> = expected
        .iter()
        .zip(actual)
        .enumerate()
        .filter(|(_, (expected, actual))| expected != actual)
        .map(|(index, (expected, actual))| CellMismatch {
            x: index as u32 % width,
            y: index as u32 / width,
            expected: *expected,
            actual: *actual,
        })
        .collect();
    // Missing results count as misses.
    for (index, expected) in expected.iter().enumerate().skip(actual.len()) {
        if *expected != RayQueryHit::Miss {
            mismatches.push(CellMismatch {
                x: index as u32 % width,
                y: index as u32 / width,
                expected: *expected,
                actual: RayQueryHit::Miss,
            });
        }
    }
    mismatches
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn mismatches_carry_cell_coordinates() {
        let expected = [RayQueryHit::Miss, RayQueryHit::Triangle, RayQueryHit::Triangle, RayQueryHit::Miss];
        let actual = [RayQueryHit::Miss, RayQueryHit::Triangle, RayQueryHit::Miss, RayQueryHit::Aabb];
        assert_eq!(
            compare_results(2, &expected, &actual),
            vec![
                CellMismatch { x: 0, y: 1, expected: RayQueryHit::Triangle, actual: RayQueryHit::Miss },
                CellMismatch { x: 1, y: 1, expected: RayQueryHit::Miss, actual: RayQueryHit::Aabb },
            ]
        );
    }

    #[test]
    fn report_keeps_every_outcome() {
        let mut report = ScenarioReport::default();
        let params = ScenarioParams::default();
        report.push(ScenarioOutcome {
            name: params.name(),
            params: params.clone(),
            failure: None,
        });
        report.push(ScenarioOutcome {
            name: params.name(),
            params,
            failure: Some(ScenarioFailure::Error {
                worker_threads: 0,
                message: "out of memory".to_string(),
            }),
        });
        assert_eq!(report.passed_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert!(!report.is_success());
        assert_eq!(report.failures().count(), 1);

        let json = report.to_json().unwrap();
        let parsed: ScenarioReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }
}
