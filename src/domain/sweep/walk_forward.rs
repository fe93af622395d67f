//! Walk-forward evaluation: search on a train window, re-score the top
//! candidates on the following validation window, then roll forward.

use chrono::{Duration, NaiveDate};
use tracing::info;

use super::{
    Dispatcher, EvalWindow, ParameterSweepScheduler, ScoredCandidate, SweepReport, SweepTechnique,
};
use crate::domain::cancel::CancelToken;
use crate::domain::error::TickSweepError;

#[derive(Debug, Clone, PartialEq)]
pub struct WalkForwardConfig {
    pub train_days: i64,
    pub validation_days: i64,
    /// Calendar days between successive folds. At least `validation_days`.
    pub step_days: i64,
    /// Anchored folds keep the train start fixed and grow the train window.
    pub anchored: bool,
    pub top_k: usize,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            train_days: 20,
            validation_days: 5,
            step_days: 5,
            anchored: false,
            top_k: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fold {
    pub index: usize,
    pub train: EvalWindow,
    pub validation: EvalWindow,
}

fn invalid(key: &str, reason: impl Into<String>) -> TickSweepError {
    TickSweepError::ConfigInvalid {
        section: "sweep".into(),
        key: key.into(),
        reason: reason.into(),
    }
}

/// Folds over `start..=end`, in order. Validation windows never overlap each
/// other and always start the day after their train window ends.
pub fn build_folds(
    start: NaiveDate,
    end: NaiveDate,
    cfg: &WalkForwardConfig,
) -> Result<Vec<Fold>, TickSweepError> {
    if cfg.train_days < 1 {
        return Err(invalid("wf_train_days", "must be at least 1"));
    }
    if cfg.validation_days < 1 {
        return Err(invalid("wf_validation_days", "must be at least 1"));
    }
    if cfg.step_days < cfg.validation_days {
        return Err(invalid(
            "wf_step_days",
            format!(
                "{} is shorter than the validation window ({} days)",
                cfg.step_days, cfg.validation_days
            ),
        ));
    }
    if cfg.top_k == 0 {
        return Err(invalid("wf_top_k", "must be at least 1"));
    }

    let mut folds = Vec::new();
    loop {
        let shift = Duration::days(cfg.step_days * folds.len() as i64);
        let train_start = if cfg.anchored { start } else { start + shift };
        let train_end = start + shift + Duration::days(cfg.train_days - 1);
        let validation_start = train_end + Duration::days(1);
        let validation_end = validation_start + Duration::days(cfg.validation_days - 1);
        if validation_end > end {
            break;
        }
        folds.push(Fold {
            index: folds.len(),
            train: EvalWindow::new(train_start, train_end),
            validation: EvalWindow::new(validation_start, validation_end),
        });
    }

    if folds.is_empty() {
        return Err(invalid(
            "wf_train_days",
            format!(
                "{}..={} is too short for one fold of {}+{} days",
                start, end, cfg.train_days, cfg.validation_days
            ),
        ));
    }
    Ok(folds)
}

#[derive(Debug, Clone)]
pub struct FoldReport {
    pub fold: Fold,
    pub train: SweepReport,
    /// Top train candidates re-scored on validation, in train rank order.
    pub validation: Vec<ScoredCandidate>,
}

impl FoldReport {
    pub fn best_train_score(&self) -> f64 {
        self.train.best().map_or(0.0, |b| b.score)
    }

    /// Validation score of the train winner.
    pub fn validation_score_of_best(&self) -> f64 {
        self.validation.first().map_or(0.0, |v| v.score)
    }

    pub fn best_validation_score(&self) -> f64 {
        self.validation
            .iter()
            .map(|v| v.score)
            .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))))
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct WalkForwardReport {
    pub folds: Vec<FoldReport>,
}

impl WalkForwardReport {
    pub fn mean_train_score(&self) -> f64 {
        mean(self.folds.iter().map(FoldReport::best_train_score))
    }

    pub fn mean_validation_score(&self) -> f64 {
        mean(self.folds.iter().map(FoldReport::validation_score_of_best))
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

/// Run every fold in order. `make_technique` builds a fresh inner search per
/// fold; `train` and `validation` are separate dispatchers so validation
/// ledgers never mix with train aggregation.
pub fn run_walk_forward<F>(
    folds: &[Fold],
    top_k: usize,
    mut make_technique: F,
    train: &mut dyn Dispatcher,
    validation: &mut dyn Dispatcher,
    cancel: &CancelToken,
) -> Result<WalkForwardReport, TickSweepError>
where
    F: FnMut(&Fold) -> Box<dyn SweepTechnique>,
{
    let mut reports = Vec::with_capacity(folds.len());
    for fold in folds {
        if cancel.is_cancelled() {
            return Err(TickSweepError::Cancelled);
        }
        let mut technique = make_technique(fold);
        let train_report =
            ParameterSweepScheduler::run(technique.as_mut(), train, &fold.train, cancel)?;

        let finalists: Vec<_> = train_report
            .top(top_k)
            .iter()
            .map(|s| s.candidate.clone())
            .collect();
        let scored = if finalists.is_empty() {
            Vec::new()
        } else {
            validation.dispatch(&finalists, &fold.validation)?
        };
        if cancel.is_cancelled() {
            return Err(TickSweepError::Cancelled);
        }

        let report = FoldReport {
            fold: *fold,
            train: train_report,
            validation: scored,
        };
        info!(
            fold = fold.index,
            train = %fold.train,
            validation = %fold.validation,
            train_best = report.best_train_score(),
            validation_of_best = report.validation_score_of_best(),
            "fold done"
        );
        reports.push(report);
    }
    Ok(WalkForwardReport { folds: reports })
}

#[cfg(test)]
mod tests {
    use super::super::grid::GridSearch;
    use super::super::testing::*;
    use super::super::CandidateParameterSet;
    use super::*;
    use proptest::prelude::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn rolling_folds() {
        let cfg = WalkForwardConfig {
            train_days: 10,
            validation_days: 5,
            step_days: 5,
            anchored: false,
            top_k: 2,
        };
        let folds = build_folds(d(1), d(31), &cfg).unwrap();
        assert_eq!(folds.len(), 4);
        assert_eq!(folds[0].train, EvalWindow::new(d(1), d(10)));
        assert_eq!(folds[0].validation, EvalWindow::new(d(11), d(15)));
        assert_eq!(folds[3].train, EvalWindow::new(d(16), d(25)));
        assert_eq!(folds[3].validation, EvalWindow::new(d(26), d(30)));
    }

    #[test]
    fn anchored_folds_grow_train() {
        let cfg = WalkForwardConfig {
            train_days: 10,
            validation_days: 5,
            step_days: 5,
            anchored: true,
            top_k: 1,
        };
        let folds = build_folds(d(1), d(25), &cfg).unwrap();
        assert_eq!(folds.len(), 3);
        assert!(folds.iter().all(|f| f.train.start == d(1)));
        assert_eq!(folds[2].train.days(), 20);
    }

    #[test]
    fn rejects_bad_configs() {
        let short_step = WalkForwardConfig {
            step_days: 2,
            ..Default::default()
        };
        assert!(build_folds(d(1), d(31), &short_step).is_err());
        assert!(build_folds(d(1), d(10), &WalkForwardConfig::default()).is_err());
        let no_k = WalkForwardConfig {
            top_k: 0,
            ..Default::default()
        };
        assert!(build_folds(d(1), d(31), &no_k).is_err());
    }

    #[test]
    fn top_candidates_are_revalidated_per_fold() {
        let cfg = WalkForwardConfig {
            train_days: 10,
            validation_days: 5,
            step_days: 10,
            anchored: false,
            top_k: 2,
        };
        let folds = build_folds(d(1), d(31), &cfg).unwrap();
        let mut train = FnDispatcher::new(|c: &CandidateParameterSet| c.values[0] + c.values[1]);
        let mut validation = FnDispatcher::new(|c: &CandidateParameterSet| c.values[1]);
        let report = run_walk_forward(
            &folds,
            cfg.top_k,
            |_| -> Box<dyn SweepTechnique> { Box::new(GridSearch::new(space_2x3(), 6, None, None)) },
            &mut train,
            &mut validation,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(report.folds.len(), folds.len());
        assert_eq!(validation.calls, folds.len());
        for (fr, w) in report.folds.iter().zip(validation.windows.iter()) {
            assert_eq!(*w, fr.fold.validation);
            assert_eq!(fr.validation.len(), 2);
            assert_eq!(fr.best_train_score(), 5.0);
            assert_eq!(fr.validation_score_of_best(), 3.0);
        }
        assert!(train.windows.iter().all(|w| folds.iter().any(|f| f.train == *w)));
        assert_eq!(report.mean_train_score(), 5.0);
    }

    #[test]
    fn cancelled_before_first_fold() {
        let folds = build_folds(d(1), d(31), &WalkForwardConfig::default()).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut train = FnDispatcher::new(|_: &CandidateParameterSet| 0.0);
        let mut validation = FnDispatcher::new(|_: &CandidateParameterSet| 0.0);
        let err = run_walk_forward(
            &folds,
            1,
            |_| -> Box<dyn SweepTechnique> { Box::new(GridSearch::new(space_2x3(), 6, None, None)) },
            &mut train,
            &mut validation,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, TickSweepError::Cancelled));
        assert_eq!(train.calls, 0);
    }

    proptest! {
        #[test]
        fn folds_never_overlap(
            train in 1i64..30,
            validation in 1i64..10,
            extra in 0i64..10,
            span in 1i64..200,
            anchored in any::<bool>(),
        ) {
            let cfg = WalkForwardConfig {
                train_days: train,
                validation_days: validation,
                step_days: validation + extra,
                anchored,
                top_k: 1,
            };
            let end = d(1) + Duration::days(span);
            if let Ok(folds) = build_folds(d(1), end, &cfg) {
                for (i, f) in folds.iter().enumerate() {
                    prop_assert_eq!(f.index, i);
                    prop_assert!(f.train.end < f.validation.start);
                    prop_assert!(f.validation.end <= end);
                    prop_assert!(!f.train.overlaps(&f.validation));
                }
                for pair in folds.windows(2) {
                    prop_assert!(pair[0].validation.end < pair[1].validation.start);
                    prop_assert!(pair[0].train.start <= pair[1].train.start);
                }
            }
        }
    }
}
