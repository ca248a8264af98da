//! Monte-Carlo estimation of the sample size an assertion needs.

use std::collections::BTreeMap;

use rla_stats::{find_quantile, Deciles, SequentialTest, TestH0Status};
use serde::Serialize;
use tracing::debug;

use crate::context::RunContext;
use crate::contest::ContestId;
use crate::error::RlaError;
use crate::sampler::{draw_fn, Sampler};

/// Distribution of sample counts over repeated trials.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRepeatedResult {
    /// One entry per trial; trials that did not confirm record the population size.
    pub sample_counts: Vec<usize>,
    pub n_trials: usize,
    pub n_success: usize,
    pub status_counts: BTreeMap<TestH0Status, usize>,
    /// Histogram of `sample_count / population`.
    pub deciles: Deciles,
    pub avg_samples_needed: f64,
}

impl RunRepeatedResult {
    /// Nearest-rank quantile of the sample counts.
    pub fn percentile(&self, q: f64) -> usize {
        find_quantile(&self.sample_counts, q)
    }

    pub fn success_pct(&self) -> f64 {
        if self.n_trials == 0 {
            0.0
        } else {
            100.0 * self.n_success as f64 / self.n_trials as f64
        }
    }
}

/// Runs `test` to completion `n_trials` times, resetting `sampler` before
/// each trial.
///
/// # Parameters
/// - `starting_statistic`: `T_0` of every trial
/// - `population`: recorded for trials that do not confirm the assertion
pub fn run_repeated(
    sampler: &mut dyn Sampler,
    test: &dyn SequentialTest,
    n_trials: usize,
    starting_statistic: f64,
    population: usize,
    ctx: &mut RunContext,
) -> Result<RunRepeatedResult, RlaError> {
    let mut sample_counts = Vec::with_capacity(n_trials);
    let mut status_counts: BTreeMap<TestH0Status, usize> = BTreeMap::new();
    let mut deciles = Deciles::new(population);
    let mut n_success = 0;

    for trial in 0..n_trials {
        sampler.reset(ctx);
        let max_samples = sampler.max_samples();
        let result = {
            let mut draw = draw_fn(sampler);
            test.test_h0(max_samples, true, starting_statistic, &mut draw)?
        };
        let count = if result.status.is_success() {
            n_success += 1;
            result.sample_count
        } else {
            population
        };
        if ctx.verbose {
            debug!(
                trial,
                status = %result.status,
                samples = result.sample_count,
                pvalue = result.pvalue_min,
                "trial finished"
            );
        }
        *status_counts.entry(result.status).or_default() += 1;
        deciles.add(count);
        sample_counts.push(count);
    }

    let avg_samples_needed = if sample_counts.is_empty() {
        0.0
    } else {
        sample_counts.iter().sum::<usize>() as f64 / sample_counts.len() as f64
    };
    Ok(RunRepeatedResult {
        sample_counts,
        n_trials,
        n_success,
        status_counts,
        deciles,
        avg_samples_needed,
    })
}

// ---------------------------------------------------------------------------
// Estimation tasks
// ---------------------------------------------------------------------------

/// One (contest, assertion) estimation, self-contained so it can run on any
/// worker.
#[derive(Debug)]
pub struct EstimationTask {
    pub contest_id: ContestId,
    pub assertion: String,
    pub sampler: Box<dyn Sampler>,
    pub test: Box<dyn SequentialTest>,
    pub n_trials: usize,
    pub quantile: f64,
    pub starting_statistic: f64,
    /// Population size of the contest.
    pub population: usize,
    /// Samples already taken in earlier rounds.
    pub prev_samples: usize,
    pub cutoff: Option<usize>,
    pub ctx: RunContext,
}

/// Sample-size estimate for one assertion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimationResult {
    pub contest_id: ContestId,
    pub assertion: String,
    pub repeated: RunRepeatedResult,
    /// Quantile of the trial sample counts, clipped to the population and
    /// the cutoff.
    pub estimated_new: usize,
    /// `min(prev_samples + estimated_new, population)`.
    pub estimated_total: usize,
}

impl EstimationTask {
    /// Runs the trials and takes the configured quantile.
    pub fn run(mut self) -> Result<EstimationResult, RlaError> {
        let repeated = run_repeated(
            self.sampler.as_mut(),
            self.test.as_ref(),
            self.n_trials,
            self.starting_statistic,
            self.population,
            &mut self.ctx,
        )?;
        let mut estimated_new = repeated.percentile(self.quantile).min(self.population);
        if let Some(cutoff) = self.cutoff {
            estimated_new = estimated_new.min(cutoff);
        }
        let estimated_total = (self.prev_samples + estimated_new).min(self.population);
        debug!(
            contest = self.contest_id,
            assertion = %self.assertion,
            estimated_new,
            estimated_total,
            success_pct = repeated.success_pct(),
            "estimated sample size"
        );
        Ok(EstimationResult {
            contest_id: self.contest_id,
            assertion: self.assertion,
            repeated,
            estimated_new,
            estimated_total,
        })
    }
}
