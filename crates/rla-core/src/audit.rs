//! Multi-round audits: estimate, select, test, repeat.
//!
//! Each round estimates how many samples every unproved assertion still
//! needs, turns the per-contest maxima into one consistent PRN-ordered card
//! selection, and then re-tests every unproved assertion against the MVRs of
//! all cards selected so far. Closed rounds are appended to the
//! [`AuditRecord`] and never changed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rla_stats::{ErrorCounts, PluralityErrorRates, SequentialTest, TestH0Status};
use serde::Serialize;
use tracing::{info, warn};

use crate::assorter::{assorters_for, Assorter, AssorterKind};
use crate::card::{sort_by_prn, Card, CardPool};
use crate::clca::ClcaAssorter;
use crate::config::{AuditConfig, AuditType, ErrorStrategy};
use crate::consistent::{estimation_subset, sample_with_budget, SampleSelection, SampleTarget};
use crate::context::RunContext;
use crate::contest::{Contest, ContestId, ContestUnderAudit};
use crate::error::RlaError;
use crate::estimate::{EstimationResult, EstimationTask};
use crate::fuzz::{fuzzed_polling, FuzzSampler};
use crate::runner::{run_tasks, TaskOutcome};
use crate::sampler::{draw_fn, ClcaWithoutReplacement, PollWithoutReplacement, Sampler};
use crate::simulate::ClcaSimulatedErrorRates;
use crate::strategy::{clca_test, polling_test};

/// The assorter an assertion is tested with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionKind {
    Polling(AssorterKind),
    Clca(ClcaAssorter),
}

/// One assorter to prove, polling or comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assertion {
    pub contest_id: ContestId,
    pub desc: String,
    pub kind: AssertionKind,
}

impl Assertion {
    pub fn primitive(&self) -> &AssorterKind {
        match &self.kind {
            AssertionKind::Polling(a) => a,
            AssertionKind::Clca(c) => c.assorter(),
        }
    }
}

/// State of one assertion after a round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssertionRound {
    pub round: usize,
    pub contest_id: ContestId,
    pub assertion: String,
    pub estimated_new: usize,
    /// Cumulative samples tested.
    pub sample_count: usize,
    pub pvalue: f64,
    pub pvalue_last: f64,
    pub status: TestH0Status,
    pub error_counts: Option<ErrorCounts>,
    pub proved_round: Option<usize>,
}

/// Per-contest state after a round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContestRound {
    pub contest_id: ContestId,
    pub name: String,
    pub estimated_new: usize,
    pub estimated_total: usize,
    pub actual_new: usize,
    pub actual_total: usize,
    pub done: bool,
    pub status: TestH0Status,
}

/// An estimation or test that failed without stopping the round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedTask {
    pub task: String,
    pub contest_id: ContestId,
    pub assertion: String,
    pub reason: String,
}

/// Everything estimated, selected and tested in one round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRound {
    pub round: usize,
    pub contests: Vec<ContestRound>,
    pub assertions: Vec<AssertionRound>,
    /// PRNs of every card selected through this round, in PRN order.
    pub sampled_prns: Vec<u64>,
    pub n_new: usize,
    pub failed_tasks: Vec<FailedTask>,
}

/// Rounds run so far, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditRecord {
    pub rounds: Vec<AuditRound>,
}

impl AuditRecord {
    pub fn last(&self) -> Option<&AuditRound> {
        self.rounds.last()
    }
}

#[derive(Debug, Clone)]
struct AssertionState {
    assertion: Assertion,
    last: Option<AssertionRound>,
    measured: Option<PluralityErrorRates>,
}

impl AssertionState {
    fn proved(&self) -> bool {
        self.last.as_ref().is_some_and(|r| r.proved_round.is_some())
    }

    fn complete(&self) -> bool {
        self.last.as_ref().is_some_and(|r| r.status.complete())
    }

    fn starting_statistic(&self) -> f64 {
        match &self.last {
            Some(r) if r.pvalue_last > 0.0 => 1.0 / r.pvalue_last,
            _ => 1.0,
        }
    }

    fn sample_count(&self) -> usize {
        self.last.as_ref().map_or(0, |r| r.sample_count)
    }
}

#[derive(Debug)]
struct PendingRound {
    round: AuditRound,
    selection: SampleSelection,
    estimated_new: BTreeMap<String, usize>,
}

/// Drives an audit one round at a time.
#[derive(Debug)]
pub struct Audit {
    config: AuditConfig,
    contests: Vec<ContestUnderAudit>,
    assertions: Vec<AssertionState>,
    cards: Arc<Vec<Card>>,
    previous: BTreeSet<u64>,
    record: AuditRecord,
    pending: Option<PendingRound>,
    ctx: RunContext,
}

impl Audit {
    /// # Parameters
    /// - `cards`: every card (CVRs for comparison audits), in any order
    /// - `pools`: pooled tallies for cards whose CVRs carry a `pool_id`
    pub fn new(
        contests: Vec<Contest>,
        mut cards: Vec<Card>,
        pools: &[CardPool],
        config: AuditConfig,
    ) -> Result<Self, RlaError> {
        config.validate()?;
        sort_by_prn(&mut cards);

        let mut under_audit = Vec::with_capacity(contests.len());
        let mut assertions = Vec::new();
        for contest in contests {
            let mut cua = ContestUnderAudit::new(contest);
            let contest_id = cua.id();
            let mut built = Vec::new();
            for assorter in assorters_for(&cua.contest, &cards)? {
                let desc = assorter.desc();
                let kind = match config.audit_type {
                    AuditType::Polling if assorter.reported_mean() > rla_stats::T_NULL => {
                        Ok(AssertionKind::Polling(assorter))
                    }
                    AuditType::Polling => Err(RlaError::InvalidMargin {
                        assertion: desc.clone(),
                        mean: assorter.reported_mean(),
                        noerror: assorter.reported_mean(),
                    }),
                    AuditType::Clca => ClcaAssorter::new(assorter, config.has_style)
                        .and_then(|c| c.with_pools(pools))
                        .map(AssertionKind::Clca),
                };
                match kind {
                    Ok(kind) => built.push(Assertion {
                        contest_id,
                        desc,
                        kind,
                    }),
                    Err(err @ RlaError::InvalidMargin { .. }) => {
                        warn!(contest = contest_id, %err, "contest cannot be audited");
                        built.clear();
                        cua.finish(TestH0Status::ContestMisformed);
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
            if built.is_empty() && !cua.done {
                info!(contest = contest_id, "no reported loser; nothing to audit");
                cua.finish(TestH0Status::NoLosers);
            }
            assertions.extend(built.into_iter().map(|assertion| AssertionState {
                assertion,
                last: None,
                measured: None,
            }));
            under_audit.push(cua);
        }

        let ctx = RunContext::new(config.seed);
        Ok(Self {
            config,
            contests: under_audit,
            assertions,
            cards: Arc::new(cards),
            previous: BTreeSet::new(),
            record: AuditRecord::default(),
            pending: None,
            ctx,
        })
    }

    /// Logs every estimation trial at debug level.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.ctx = self.ctx.verbose(verbose);
        self
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn contests(&self) -> &[ContestUnderAudit] {
        &self.contests
    }

    pub fn assertions(&self) -> impl Iterator<Item = &Assertion> {
        self.assertions.iter().map(|s| &s.assertion)
    }

    pub fn record(&self) -> &AuditRecord {
        &self.record
    }

    /// Cards in sampling order.
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// Every contest is done or the round limit has been reached.
    pub fn is_complete(&self) -> bool {
        self.contests.iter().all(|c| c.done) || self.record.rounds.len() >= self.config.max_rounds
    }

    fn contest(&self, id: ContestId) -> Option<&ContestUnderAudit> {
        self.contests.iter().find(|c| c.id() == id)
    }

    fn active(&self, state: &AssertionState) -> bool {
        !state.proved()
            && !state.complete()
            && self
                .contest(state.assertion.contest_id)
                .is_some_and(|c| !c.done)
    }

    /// Discrepancy rates the bet starts from.
    fn rates_for(&self, state: &AssertionState, contest: &Contest) -> PluralityErrorRates {
        match self.config.error_strategy {
            ErrorStrategy::MeasuredFromPreviousRound => state
                .measured
                .unwrap_or(self.config.apriori_rates)
                .with_phantom_floor(contest.phantom_rate()),
            ErrorStrategy::PhantomRateOnly => {
                PluralityErrorRates::ZERO.with_phantom_floor(contest.phantom_rate())
            }
            ErrorStrategy::FixedFuzzPercent | ErrorStrategy::AprioriRates => {
                self.config.apriori_rates
            }
        }
    }

    /// Discrepancy rates flipped into real records by the simulation. The
    /// phantom cards in the card list supply their own share.
    fn simulation_rates(&self, rates: PluralityErrorRates, contest: &Contest) -> PluralityErrorRates {
        match self.config.error_strategy {
            ErrorStrategy::MeasuredFromPreviousRound | ErrorStrategy::PhantomRateOnly => {
                rates.without_phantoms(contest.phantom_rate())
            }
            ErrorStrategy::FixedFuzzPercent | ErrorStrategy::AprioriRates => rates,
        }
    }

    /// Cards an estimation simulates over: all of them in the first round,
    /// afterwards only the contest's cards not sampled yet.
    fn estimation_cards(&self, contest: &Contest) -> Arc<Vec<Card>> {
        if self.previous.is_empty() {
            self.cards.clone()
        } else {
            Arc::new(estimation_subset(
                &self.cards,
                contest.id,
                &self.previous,
                contest.nc,
            ))
        }
    }

    fn estimation_task(
        &self,
        state: &AssertionState,
        contest: &Contest,
        ctx: &mut RunContext,
    ) -> Result<EstimationTask, RlaError> {
        let n = contest.nc.max(1);
        let contests = std::slice::from_ref(contest);
        let rates = self.rates_for(state, contest);
        let cards = self.estimation_cards(contest);
        let (sampler, test): (Box<dyn Sampler>, Box<dyn SequentialTest>) =
            match &state.assertion.kind {
                AssertionKind::Clca(clca) => {
                    let test = clca_test(clca, n, &self.config, &rates)?;
                    let sampler: Box<dyn Sampler> = match self.config.error_strategy {
                        ErrorStrategy::FixedFuzzPercent => Box::new(FuzzSampler::new(
                            cards,
                            contests,
                            clca.clone(),
                            self.config.fuzz_pct,
                            ctx,
                        )?),
                        _ => Box::new(ClcaSimulatedErrorRates::new(
                            &cards,
                            clca.clone(),
                            &self.simulation_rates(rates, contest),
                        )?),
                    };
                    (sampler, test)
                }
                AssertionKind::Polling(assorter) => {
                    let test = polling_test(assorter, n, &self.config)?;
                    let fuzz_pct = match self.config.error_strategy {
                        ErrorStrategy::FixedFuzzPercent => self.config.fuzz_pct,
                        _ => 0.0,
                    };
                    let sampler: Box<dyn Sampler> = if fuzz_pct > 0.0 {
                        Box::new(fuzzed_polling(
                            &cards,
                            contests,
                            assorter.clone(),
                            self.config.use_phantoms,
                            fuzz_pct,
                            ctx,
                        )?)
                    } else {
                        Box::new(PollWithoutReplacement::new(
                            cards,
                            assorter.clone(),
                            self.config.use_phantoms,
                        ))
                    };
                    (sampler, test)
                }
            };
        Ok(EstimationTask {
            contest_id: contest.id,
            assertion: state.assertion.desc.clone(),
            sampler,
            test,
            n_trials: self.config.n_trials,
            quantile: self.config.quantile,
            starting_statistic: state.starting_statistic(),
            population: n,
            prev_samples: state.sample_count(),
            cutoff: self.config.sample_budget_cutoff,
            ctx: ctx.clone(),
        })
    }

    /// Estimates sample sizes and selects the cards for the next round.
    ///
    /// Returns the round as planned; its `sampled_prns` are the cards whose
    /// MVRs [`Audit::run_round`] needs.
    pub fn estimate_round(&mut self) -> Result<AuditRound, RlaError> {
        let round = self.record.rounds.len() + 1;

        // tasks are built on the workers so a build error stays with its task
        let this = &*self;
        let mut labels: BTreeMap<String, (ContestId, String)> = BTreeMap::new();
        let mut tasks = Vec::new();
        for (i, state) in this.assertions.iter().enumerate() {
            if !this.active(state) {
                continue;
            }
            let Some(cua) = this.contest(state.assertion.contest_id) else {
                continue;
            };
            let mut ctx = this.ctx.fork((round * 10_000 + i) as u64);
            let id = format!("{round:03}-{i:05}");
            labels.insert(id.clone(), (cua.id(), state.assertion.desc.clone()));
            tasks.push((id, move || {
                this.estimation_task(state, &cua.contest, &mut ctx)?.run()
            }));
        }

        let outcomes = run_tasks(tasks, self.config.n_workers);
        let mut failed_tasks = Vec::new();
        let mut estimates: Vec<EstimationResult> = Vec::new();
        for outcome in outcomes {
            match outcome {
                TaskOutcome::Done { value, .. } => estimates.push(value),
                TaskOutcome::Failed { task_id, reason } => {
                    let (contest_id, assertion) =
                        labels.remove(&task_id).unwrap_or_default();
                    failed_tasks.push(FailedTask {
                        task: task_id,
                        contest_id,
                        assertion,
                        reason,
                    });
                }
            }
        }

        let mut contest_totals: BTreeMap<ContestId, usize> = BTreeMap::new();
        let mut estimated_new = BTreeMap::new();
        for est in &estimates {
            let total = contest_totals.entry(est.contest_id).or_default();
            *total = (*total).max(est.estimated_total);
            estimated_new.insert(est.assertion.clone(), est.estimated_new);
        }
        // a failed estimate asks for the whole contest
        for state in self.assertions.iter().filter(|s| self.active(s)) {
            if !estimated_new.contains_key(&state.assertion.desc) {
                if let Some(cua) = self.contest(state.assertion.contest_id) {
                    contest_totals.insert(cua.id(), cua.contest.nc);
                }
            }
        }

        // an assertion that needs more than the budget sinks its contest
        if let Some(cutoff) = self.config.sample_budget_cutoff {
            let over: BTreeSet<ContestId> = estimates
                .iter()
                .filter(|est| est.repeated.percentile(self.config.quantile) > cutoff)
                .map(|est| est.contest_id)
                .collect();
            for cua in self.contests.iter_mut().filter(|c| over.contains(&c.id())) {
                info!(round, contest = cua.id(), cutoff, "estimate exceeds the sample budget");
                cua.finish(TestH0Status::FailMaxSamplesAllowed);
            }
        }

        let mut targets: Vec<SampleTarget> = self
            .contests
            .iter()
            .filter(|c| !c.done)
            .map(|c| SampleTarget::new(c.id(), contest_totals.get(&c.id()).copied().unwrap_or(0)))
            .collect();
        let budgeted = sample_with_budget(
            &mut targets,
            &self.cards,
            &self.previous,
            self.config.sample_budget_cutoff,
        );
        for id in &budgeted.abandoned {
            if let Some(cua) = self.contests.iter_mut().find(|c| c.id() == *id) {
                cua.finish(TestH0Status::FailMaxSamplesAllowed);
            }
        }

        let selection = budgeted.selection;
        let contests = self
            .contests
            .iter()
            .map(|cua| {
                let alloc = selection.per_contest.get(&cua.id());
                let estimated_total = contest_totals.get(&cua.id()).copied().unwrap_or(0);
                let prev = self.contest_samples(cua.id());
                info!(
                    round,
                    contest = cua.id(),
                    estimated_total,
                    done = cua.done,
                    "contest estimate"
                );
                ContestRound {
                    contest_id: cua.id(),
                    name: cua.contest.name.clone(),
                    estimated_new: estimated_total.saturating_sub(prev),
                    estimated_total,
                    actual_new: alloc.map_or(0, |a| a.have_new),
                    actual_total: alloc.map_or(0, |a| a.have),
                    done: cua.done,
                    status: cua.status,
                }
            })
            .collect();

        let planned = AuditRound {
            round,
            contests,
            assertions: Vec::new(),
            sampled_prns: selection.prns.clone(),
            n_new: selection.n_new,
            failed_tasks,
        };
        info!(
            round,
            selected = selection.len(),
            new = selection.n_new,
            "round planned"
        );
        self.pending = Some(PendingRound {
            round: planned.clone(),
            selection,
            estimated_new,
        });
        Ok(planned)
    }

    fn contest_samples(&self, id: ContestId) -> usize {
        self.assertions
            .iter()
            .filter(|s| s.assertion.contest_id == id)
            .map(AssertionState::sample_count)
            .max()
            .unwrap_or(0)
    }

    /// Tests every unproved assertion against the MVRs of all cards selected
    /// so far, in PRN order, and closes the round.
    ///
    /// `mvrs` maps card index to its hand interpretation and must cover
    /// every selected card.
    pub fn run_round(&mut self, mvrs: &BTreeMap<usize, Card>) -> Result<AuditRound, RlaError> {
        let PendingRound {
            mut round,
            selection,
            estimated_new,
        } = self
            .pending
            .take()
            .ok_or_else(|| RlaError::config("round", "estimate_round must run first"))?;

        let cvrs: Vec<Card> = selection
            .indices
            .iter()
            .map(|&i| self.cards[i].clone())
            .collect();
        let sampled: Vec<Card> = cvrs
            .iter()
            .map(|cvr| {
                mvrs.get(&cvr.index)
                    .cloned()
                    .ok_or(RlaError::MissingMvr { index: cvr.index })
            })
            .collect::<Result<_, _>>()?;
        let cvrs = Arc::new(cvrs);
        let sampled = Arc::new(sampled);

        for i in 0..self.assertions.len() {
            if !self.active(&self.assertions[i]) {
                continue;
            }
            let state = &self.assertions[i];
            let contest_id = state.assertion.contest_id;
            let Some(cua) = self.contest(contest_id) else {
                continue;
            };
            let have = selection.per_contest.get(&contest_id).map_or(0, |a| a.have);

            let result = match self.test_assertion(state, &cua.contest, &sampled, &cvrs, have) {
                Ok(result) => result,
                Err(err) => {
                    warn!(
                        round = round.round,
                        assertion = %state.assertion.desc,
                        %err,
                        "assertion could not be tested"
                    );
                    round.failed_tasks.push(FailedTask {
                        task: format!("{:03}-{i:05}-test", round.round),
                        contest_id,
                        assertion: state.assertion.desc.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let proved_round = result.status.is_success().then_some(round.round);
            let assertion_round = AssertionRound {
                round: round.round,
                contest_id,
                assertion: state.assertion.desc.clone(),
                estimated_new: estimated_new.get(&state.assertion.desc).copied().unwrap_or(0),
                sample_count: result.sample_count,
                pvalue: result.pvalue_min,
                pvalue_last: result.pvalue_last,
                status: result.status,
                error_counts: result.tracker.error_counts,
                proved_round,
            };
            info!(
                round = round.round,
                assertion = %assertion_round.assertion,
                samples = result.sample_count,
                pvalue = result.pvalue_min,
                status = %result.status,
                "assertion tested"
            );
            let measured = result.tracker.error_counts.map(|c| c.rates());
            let state = &mut self.assertions[i];
            state.measured = measured.or(state.measured);
            state.last = Some(assertion_round.clone());
            round.assertions.push(assertion_round);
        }

        self.previous.extend(selection.prns.iter().copied());
        self.close_contests(round.round, &selection);
        for cr in &mut round.contests {
            if let Some(cua) = self.contest(cr.contest_id) {
                cr.done = cua.done;
                cr.status = cua.status;
            }
        }
        self.record.rounds.push(round.clone());
        Ok(round)
    }

    /// Runs one assertion's test over the cards selected so far.
    fn test_assertion(
        &self,
        state: &AssertionState,
        contest: &Contest,
        sampled: &Arc<Vec<Card>>,
        cvrs: &Arc<Vec<Card>>,
        have: usize,
    ) -> Result<rla_stats::TestH0Result, RlaError> {
        let n = contest.nc.max(1);
        let (mut sampler, test): (Box<dyn Sampler>, Box<dyn SequentialTest>) =
            match &state.assertion.kind {
                AssertionKind::Clca(clca) => (
                    Box::new(ClcaWithoutReplacement::new(
                        sampled.clone(),
                        cvrs.clone(),
                        clca.clone(),
                    )?),
                    clca_test(clca, n, &self.config, &self.config.apriori_rates)?,
                ),
                AssertionKind::Polling(assorter) => (
                    Box::new(PollWithoutReplacement::audited(
                        sampled.clone(),
                        cvrs.clone(),
                        assorter.clone(),
                        self.config.use_phantoms,
                    )?),
                    polling_test(assorter, n, &self.config)?,
                ),
            };
        let max_samples = have.min(sampler.max_samples());
        let mut draw = draw_fn(sampler.as_mut());
        Ok(test.test_h0(max_samples, true, 1.0, &mut draw)?)
    }

    fn close_contests(&mut self, round: usize, selection: &SampleSelection) {
        let last_round = round >= self.config.max_rounds;
        for cua in self.contests.iter_mut().filter(|c| !c.done) {
            let states: Vec<&AssertionState> = self
                .assertions
                .iter()
                .filter(|s| s.assertion.contest_id == cua.id())
                .collect();
            let have = selection.per_contest.get(&cua.id()).map_or(0, |a| a.have);
            let status = if let Some(failed) = states
                .iter()
                .filter_map(|s| s.last.as_ref())
                .find(|r| r.status.is_failure())
            {
                Some(failed.status)
            } else if !states.is_empty() && states.iter().all(|s| s.proved()) {
                let worst = states
                    .iter()
                    .filter_map(|s| s.last.as_ref())
                    .map(|r| r.status)
                    .max()
                    .unwrap_or(TestH0Status::StatRejectNull);
                Some(worst)
            } else if have >= cua.contest.nc {
                Some(TestH0Status::LimitReached)
            } else if last_round {
                Some(TestH0Status::FailPValue)
            } else {
                None
            };
            if let Some(status) = status {
                info!(contest = cua.id(), %status, "contest finished");
                cua.finish(status);
            }
        }
    }

    /// Runs rounds until every contest is done or `max_rounds` is reached.
    pub fn run_to_completion(
        &mut self,
        mvrs: &BTreeMap<usize, Card>,
    ) -> Result<&AuditRecord, RlaError> {
        while !self.is_complete() {
            self.estimate_round()?;
            self.run_round(mvrs)?;
        }
        Ok(&self.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contest::{ChoiceFunction, ContestSpec};
    use crate::test_data::{make_cards, TestContest};

    fn small_config() -> AuditConfig {
        AuditConfig {
            n_trials: 10,
            n_workers: 2,
            ..AuditConfig::default()
        }
    }

    fn contest(id: ContestId, votes: &[(u32, u64)], nc: usize) -> Contest {
        Contest::new(ContestSpec {
            id,
            name: format!("c{id}"),
            choice: ChoiceFunction::Plurality,
            candidates: votes.iter().map(|(c, _)| *c).collect(),
            votes: votes.iter().copied().collect(),
            nc,
            n_phantoms: 0,
            n_winners: 1,
            winners: None,
        })
        .unwrap()
    }

    fn identity_mvrs(cards: &[Card]) -> BTreeMap<usize, Card> {
        cards.iter().map(|c| (c.index, c.clone())).collect()
    }

    #[test]
    fn run_round_requires_estimate() {
        let c = contest(1, &[(0, 600), (1, 400)], 1000);
        let cards = make_cards(&[TestContest::from(&c)], 1000, 3);
        let mut audit = Audit::new(vec![c], cards, &[], small_config()).unwrap();
        assert!(audit.run_round(&BTreeMap::new()).is_err());
    }

    #[test]
    fn clean_comparison_audit_finishes_in_one_round() {
        let c = contest(1, &[(0, 600), (1, 400)], 1000);
        let cards = make_cards(&[TestContest::from(&c)], 1000, 3);
        let mvrs = identity_mvrs(&cards);
        let mut audit = Audit::new(vec![c], cards, &[], small_config()).unwrap();

        let planned = audit.estimate_round().unwrap();
        assert!(planned.n_new > 0);
        assert!(planned.failed_tasks.is_empty());
        let closed = audit.run_round(&mvrs).unwrap();
        assert_eq!(closed.assertions.len(), 1);
        assert_eq!(closed.assertions[0].proved_round, Some(1));
        assert!(audit.is_complete());
        assert!(audit.contests()[0].status.is_success());
    }

    #[test]
    fn missing_mvr_is_an_error() {
        let c = contest(1, &[(0, 600), (1, 400)], 1000);
        let cards = make_cards(&[TestContest::from(&c)], 1000, 3);
        let mut audit = Audit::new(vec![c], cards, &[], small_config()).unwrap();
        audit.estimate_round().unwrap();
        assert!(matches!(
            audit.run_round(&BTreeMap::new()),
            Err(RlaError::MissingMvr { .. })
        ));
    }

    #[test]
    fn tied_contest_is_misformed_not_fatal() {
        let tied = contest(1, &[(0, 500), (1, 500)], 1000);
        let clear = contest(2, &[(0, 700), (1, 300)], 1000);
        let cards = make_cards(
            &[TestContest::from(&tied), TestContest::from(&clear)],
            1000,
            5,
        );
        let audit = Audit::new(vec![tied, clear], cards, &[], small_config()).unwrap();
        assert_eq!(audit.contests()[0].status, TestH0Status::ContestMisformed);
        assert!(audit.contests()[0].done);
        assert!(!audit.contests()[1].done);
        assert_eq!(audit.assertions().count(), 1);
    }

    #[test]
    fn uncontested_race_is_not_audited() {
        let unopposed = contest(1, &[(0, 800)], 1000);
        let clear = contest(2, &[(0, 700), (1, 300)], 1000);
        let cards = make_cards(
            &[TestContest::from(&unopposed), TestContest::from(&clear)],
            1000,
            6,
        );
        let mvrs = identity_mvrs(&cards);
        let mut audit = Audit::new(vec![unopposed, clear], cards, &[], small_config()).unwrap();
        assert_eq!(audit.contests()[0].status, TestH0Status::NoLosers);
        assert!(audit.contests()[0].done);

        audit.run_to_completion(&mvrs).unwrap();
        let last = audit.record().last().unwrap();
        assert_eq!(last.contests[0].status, TestH0Status::NoLosers);
        assert_eq!(last.contests[0].actual_total, 0);
        assert!(last.contests[1].status.is_success());
    }

    #[test]
    fn later_estimates_skip_sampled_cards() {
        let c = contest(1, &[(0, 600), (1, 400)], 1000);
        let cards = make_cards(&[TestContest::from(&c)], 1000, 3);
        let mut audit = Audit::new(vec![c], cards, &[], small_config()).unwrap();
        let contest = audit.contests()[0].contest.clone();
        assert_eq!(audit.estimation_cards(&contest).len(), 1000);

        let first: Vec<u64> = audit.cards().iter().take(25).map(|c| c.prn).collect();
        audit.previous.extend(first.iter().copied());
        let later = audit.estimation_cards(&contest);
        assert_eq!(later.len(), 975);
        assert!(later.iter().all(|c| !first.contains(&c.prn)));
    }

    #[test]
    fn phantom_share_is_not_simulated_twice() {
        let c = Contest::new(ContestSpec {
            id: 1,
            name: "c1".into(),
            choice: ChoiceFunction::Plurality,
            candidates: vec![0, 1],
            votes: [(0, 600), (1, 380)].into_iter().collect(),
            nc: 1000,
            n_phantoms: 20,
            n_winners: 1,
            winners: None,
        })
        .unwrap();
        let cards = make_cards(&[TestContest::from(&c)], 980, 4);
        let config = AuditConfig {
            error_strategy: ErrorStrategy::PhantomRateOnly,
            ..small_config()
        };
        let mut audit = Audit::new(vec![c], cards, &[], config).unwrap();
        let contest = audit.contests()[0].contest.clone();

        let rates = audit.rates_for(&audit.assertions[0], &contest);
        assert_eq!(rates.p1o, 0.02);
        assert_eq!(rates.p2o, 0.0);
        assert_eq!(audit.simulation_rates(rates, &contest), PluralityErrorRates::ZERO);

        audit.config.error_strategy = ErrorStrategy::AprioriRates;
        let standard = PluralityErrorRates::STANDARD;
        assert_eq!(audit.simulation_rates(standard, &contest), standard);
    }

    #[test]
    fn budget_abandons_contest() {
        let close = contest(1, &[(0, 505), (1, 495)], 1000);
        let cards = make_cards(&[TestContest::from(&close)], 1000, 8);
        let config = AuditConfig {
            sample_budget_cutoff: Some(10),
            ..small_config()
        };
        let mut audit = Audit::new(vec![close], cards, &[], config).unwrap();
        let planned = audit.estimate_round().unwrap();
        assert_eq!(planned.contests[0].status, TestH0Status::FailMaxSamplesAllowed);
        assert!(planned.sampled_prns.is_empty());
    }
}
