//! Chained submission: each job enqueues the next incomplete configuration.

use anyhow::{Result, bail};
use tracing::info;

use crate::context::{JobContext, SweepGrid};
use crate::lattice::Ensemble;
use crate::oracle::CompletionOracle;
use crate::scheduler::Scheduler;

pub struct ChainSubmitter<'a> {
    oracle: &'a CompletionOracle,
    scheduler: &'a dyn Scheduler,
}

impl<'a> ChainSubmitter<'a> {
    pub fn new(oracle: &'a CompletionOracle, scheduler: &'a dyn Scheduler) -> Self {
        Self { oracle, scheduler }
    }

    /// Submit the first index after `current`, stepping by the ensemble
    /// stride, whose outputs are not all present. Returns the submitted
    /// index, or `None` once the ensemble is exhausted.
    pub async fn submit_next(
        &self,
        grid: &SweepGrid,
        ctx: &JobContext,
        ensemble: &Ensemble,
        current: u32,
    ) -> Result<Option<u32>> {
        if ensemble.stride == 0 {
            bail!("Ensemble stride must be at least 1");
        }

        let mut candidate = current;
        loop {
            candidate = match candidate.checked_add(ensemble.stride) {
                Some(next) if next <= ensemble.size => next,
                _ => {
                    info!(
                        current,
                        size = ensemble.size,
                        "No new configurations to submit"
                    );
                    return Ok(None);
                }
            };

            let candidate_ctx = ctx.for_config(candidate, ensemble.config_id(candidate));
            if !self.oracle.is_complete(&candidate_ctx, grid, None, None) {
                break;
            }
            info!(
                nth = candidate,
                cfg = %candidate_ctx.config_id,
                "Configuration already complete, moving on"
            );
        }

        let submission = self.scheduler.submit(candidate).await?;
        info!(
            nth = candidate,
            cfg = %ensemble.config_id(candidate),
            job_id = submission.job_id.as_deref().unwrap_or("unknown"),
            "Submitted next configuration"
        );
        Ok(Some(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Cell;
    use crate::errors::SchedulerError;
    use crate::oracle::tests::{grid, resolver_in, write_correlators};
    use crate::paths::PathResolver;
    use crate::scheduler::Submission;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recording {
        submitted: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl Scheduler for Recording {
        async fn submit(&self, nth: u32) -> Result<Submission, SchedulerError> {
            self.submitted.lock().unwrap().push(nth);
            Ok(Submission {
                nth,
                job_id: Some("100".to_string()),
            })
        }
    }

    fn ensemble(size: u32, stride: u32) -> Ensemble {
        Ensemble::new("a", 1880, size, None, stride).unwrap()
    }

    fn complete(resolver: &dyn PathResolver, ctx: &JobContext, g: &SweepGrid, ens: &Ensemble, nth: u32) {
        let target = ctx.for_config(nth, ens.config_id(nth));
        for shift in g.shifts() {
            for &kd in g.kds() {
                write_correlators(resolver, &target, &Cell::new(kd, shift.clone()));
            }
        }
    }

    #[tokio::test]
    async fn test_skips_complete_candidates() {
        let dir = tempdir().unwrap();
        let resolver = resolver_in(&dir);
        let oracle = CompletionOracle::new(resolver.clone());
        let scheduler = Recording::default();
        let g = grid(&["x0t0"], &[0, 1]);
        let ctx = crate::paths::tests::sample_context();
        let ens = ensemble(400, 1);
        complete(resolver.as_ref(), &ctx, &g, &ens, 6);

        let next = ChainSubmitter::new(&oracle, &scheduler)
            .submit_next(&g, &ctx, &ens, 5)
            .await
            .unwrap();

        assert_eq!(next, Some(7));
        assert_eq!(*scheduler.submitted.lock().unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn test_submits_immediate_successor_when_incomplete() {
        let dir = tempdir().unwrap();
        let oracle = CompletionOracle::new(resolver_in(&dir));
        let scheduler = Recording::default();
        let g = grid(&["x0t0"], &[1]);
        let ctx = crate::paths::tests::sample_context();

        let next = ChainSubmitter::new(&oracle, &scheduler)
            .submit_next(&g, &ctx, &ensemble(400, 1), 5)
            .await
            .unwrap();
        assert_eq!(next, Some(6));
    }

    #[tokio::test]
    async fn test_nothing_submitted_when_all_remaining_complete() {
        let dir = tempdir().unwrap();
        let resolver = resolver_in(&dir);
        let oracle = CompletionOracle::new(resolver.clone());
        let scheduler = Recording::default();
        let g = grid(&["x0t0"], &[1]);
        let ctx = crate::paths::tests::sample_context();
        let ens = ensemble(10, 2);
        for nth in [7, 9] {
            complete(resolver.as_ref(), &ctx, &g, &ens, nth);
        }

        let next = ChainSubmitter::new(&oracle, &scheduler)
            .submit_next(&g, &ctx, &ens, 5)
            .await
            .unwrap();

        assert_eq!(next, None);
        assert!(scheduler.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_index_has_no_successor() {
        let dir = tempdir().unwrap();
        let oracle = CompletionOracle::new(resolver_in(&dir));
        let scheduler = Recording::default();
        let g = grid(&["x0t0"], &[1]);
        let ctx = crate::paths::tests::sample_context();

        let next = ChainSubmitter::new(&oracle, &scheduler)
            .submit_next(&g, &ctx, &ensemble(400, 1), 400)
            .await
            .unwrap();
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn test_zero_stride_rejected() {
        let dir = tempdir().unwrap();
        let oracle = CompletionOracle::new(resolver_in(&dir));
        let scheduler = Recording::default();
        let g = grid(&["x0t0"], &[1]);
        let ctx = crate::paths::tests::sample_context();
        let mut ens = ensemble(400, 1);
        ens.stride = 0;

        assert!(
            ChainSubmitter::new(&oracle, &scheduler)
                .submit_next(&g, &ctx, &ens, 5)
                .await
                .is_err()
        );
    }
}
