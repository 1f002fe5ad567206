//! The check orchestrator.
//!
//! A run validates its configuration, plans ranges through the memory
//! limiter and then executes the phases strictly in order:
//! schema, node, relationship, property, index, counts. Within a phase the
//! ranges are spread over a dedicated rayon pool; a phase starts only after
//! every range of the previous one has finished, because later phases read
//! the global state earlier ones filled in.
//!
//! A run ends in one of two ways: a [`ConsistencySummary`] or a
//! [`CheckError`]. Nothing partial is returned for a run that was cancelled
//! or hit an unreadable page.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, info, info_span, warn};

use super::checkers::{counts, index, node, property, relationship, schema};
use super::checkers::{CheckContext, Phase};
use super::error::{CheckError, Result};
use super::limiter::{
    budget_factory, coalesce, EntityRange, MemoryLimiter, MemoryLimiterFactory,
};
use super::memory::MemoryTracker;
use super::options::{CheckOptions, ConsistencyFlags};
use super::progress::{no_progress, ProgressListener};
use super::state::GlobalState;
use super::summary::{ConsistencySummary, RangeStats, SummaryAccumulator};
use crate::primitives::pager::{PageCache, PageCacheTracer};
use crate::storage::{CountsStore, DegreesStore, IndexLookup, OpenedStore, StoreAccess};
use crate::types::EntityType;

/// Which part of the id spaces a run covers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CheckScope {
    /// Every range the limiter plans.
    #[default]
    Full,
    /// Only the given ranges, clipped to the high ids and merged where they
    /// overlap. Checks that need the whole id space are skipped.
    Limited(Vec<EntityRange>),
}

/// Collaborators a run reads from.
#[derive(Clone, Copy)]
pub struct CheckInputs<'a> {
    /// Page cache the store reads through; sizes the range budget.
    pub page_cache: &'a PageCache,
    /// Record access.
    pub store: &'a dyn StoreAccess,
    /// Precomputed counts.
    pub counts: &'a CountsStore,
    /// Precomputed per-node degrees.
    pub degrees: &'a DegreesStore,
    /// Resolves the schema's index rules to readable indexes.
    pub indexes: &'a dyn IndexLookup,
    /// Tracer whose counters are diffed into [`ConsistencySummary::cache`].
    pub tracer: &'a dyn PageCacheTracer,
    /// Tracks range caches and other bounded state of the run.
    pub memory: &'a MemoryTracker,
}

impl<'a> CheckInputs<'a> {
    /// Inputs for a store opened through its catalog.
    pub fn from_opened(opened: &'a OpenedStore, memory: &'a MemoryTracker) -> Self {
        Self {
            page_cache: &opened.cache,
            store: opened.store.as_ref(),
            counts: &opened.counts,
            degrees: &opened.degrees,
            indexes: opened.indexes.as_ref(),
            tracer: opened.cache.tracer().as_ref(),
            memory,
        }
    }
}

/// A configured consistency check.
///
/// ```no_run
/// use sombra_check::check::{CheckInputs, CheckOptions, FullCheck, MemoryTracker};
/// use sombra_check::primitives::pager::null_tracer;
/// use sombra_check::storage::OpenedStore;
///
/// let opened = OpenedStore::open_path("graph.db".as_ref(), 1024, null_tracer())?;
/// let memory = MemoryTracker::new();
/// let summary = FullCheck::new(CheckOptions::default())
///     .execute(CheckInputs::from_opened(&opened, &memory))?;
/// println!("{summary}");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct FullCheck {
    options: CheckOptions,
    limiter_factory: Option<MemoryLimiterFactory>,
    progress: Arc<dyn ProgressListener>,
    scope: CheckScope,
    cancel: Arc<AtomicBool>,
}

impl FullCheck {
    /// A full-scope check with the limiter taken from `options.memory`.
    pub fn new(options: CheckOptions) -> Self {
        Self {
            options,
            limiter_factory: None,
            progress: no_progress(),
            scope: CheckScope::Full,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replaces the limiter derived from [`CheckOptions::memory`].
    pub fn with_memory_limiter(mut self, factory: MemoryLimiterFactory) -> Self {
        self.limiter_factory = Some(factory);
        self
    }

    /// Listener advanced once per range and finalisation step.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressListener>) -> Self {
        self.progress = progress;
        self
    }

    /// Restricts the run to `scope`.
    pub fn with_scope(mut self, scope: CheckScope) -> Self {
        self.scope = scope;
        self
    }

    /// Flag that stops the run at the next record or range boundary.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Options the check was built with.
    pub fn options(&self) -> &CheckOptions {
        &self.options
    }

    /// Runs every enabled phase and returns the summary.
    ///
    /// # Errors
    ///
    /// [`CheckError::Configuration`] when no range plan or worker pool can
    /// be built, [`CheckError::Incomplete`] when a page, record or index
    /// cannot be read, and [`CheckError::Cancelled`] when the cancel flag is
    /// raised. In every case the partial findings are discarded.
    pub fn execute(&self, inputs: CheckInputs<'_>) -> Result<ConsistencySummary> {
        let high = inputs.store.high_ids();
        let factory = self
            .limiter_factory
            .clone()
            .unwrap_or_else(|| budget_factory(self.options.memory));
        let limiter = factory(inputs.page_cache.memory_bytes(), high.nodes, high.relationships)?;
        let workers = self.options.worker_threads();
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("check-worker-{i}"))
            .build()
            .map_err(|err| CheckError::configuration(format!("worker pool: {err}")))?;

        let plan = self.plan(&limiter, |entity_type| high.of(entity_type));
        let full = matches!(self.scope, CheckScope::Full);
        let flags = self.options.flags;
        let phases: Vec<Phase> = Phase::ALL
            .into_iter()
            .filter(|phase| phase.enabled(&flags, full))
            .collect();
        let total: u64 = phases.iter().map(|phase| plan.units(*phase, full, &flags)).sum();
        info!(
            nodes = high.nodes,
            relationships = high.relationships,
            properties = high.properties,
            node_ranges = plan.nodes.len(),
            relationship_ranges = plan.relationships.len(),
            entities_per_range = limiter.entities_per_range(),
            workers,
            full,
            "starting consistency check"
        );

        let state = GlobalState::new(high, inputs.store.tokens(), workers);
        debug!(bytes = state.heap_bytes(), "global state allocated");
        let summary = SummaryAccumulator::new(self.options.max_findings);
        let cache_before = inputs.tracer.snapshot();
        let started = Instant::now();

        self.progress.started(total);
        let outcome = {
            let ctx = CheckContext {
                store: inputs.store,
                indexes: inputs.indexes,
                counts: inputs.counts,
                degrees: inputs.degrees,
                state: &state,
                summary: &summary,
                memory: inputs.memory,
                cancel: &self.cancel,
                flags,
                high,
                full,
                per_entity_footprint: limiter.budget().per_entity_footprint,
            };
            pool.install(|| self.run_phases(&ctx, &phases, &plan))
        };
        self.progress.finished();
        state.duplicates.release(inputs.memory);
        if let Err(err) = outcome {
            warn!(error = %err, "consistency check did not complete");
            return Err(err);
        }

        let peak = inputs.memory.peak();
        let allowed = limiter
            .budget()
            .range_budget()
            .saturating_mul(workers as u64);
        if peak > allowed {
            warn!(peak, allowed, "check caches exceeded the memory budget");
        }

        let mut result = summary.freeze();
        result.cache = match (cache_before, inputs.tracer.snapshot()) {
            (Some(before), Some(after)) => Some(after.since(&before)),
            _ => None,
        };
        result.page_cache = inputs.page_cache.stats();
        result.peak_memory_bytes = peak;
        result.ranges = RangeStats {
            node_ranges: plan.nodes.len(),
            relationship_ranges: plan.relationships.len(),
            entities_per_range: limiter.entities_per_range(),
        };
        result.limited = !full;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            inconsistencies = result.total(),
            "consistency check finished"
        );
        Ok(result)
    }

    fn plan(&self, limiter: &MemoryLimiter, high_of: impl Fn(EntityType) -> u64) -> RangePlan {
        match &self.scope {
            CheckScope::Full => RangePlan {
                nodes: limiter.ranges(EntityType::Node).to_vec(),
                relationships: limiter.ranges(EntityType::Relationship).to_vec(),
            },
            CheckScope::Limited(ranges) => {
                let clipped = |entity_type: EntityType| -> Vec<EntityRange> {
                    coalesce(
                        ranges
                            .iter()
                            .filter(|range| range.entity_type == entity_type)
                            .filter_map(|range| range.clipped(high_of(entity_type)))
                            .collect(),
                    )
                };
                RangePlan {
                    nodes: clipped(EntityType::Node),
                    relationships: clipped(EntityType::Relationship),
                }
            }
        }
    }

    fn run_phases(&self, ctx: &CheckContext<'_>, phases: &[Phase], plan: &RangePlan) -> Result<()> {
        for &phase in phases {
            ctx.check_cancelled()?;
            let span = info_span!("check_phase", phase = phase.as_str());
            let _entered = span.enter();
            let started = Instant::now();
            let before = ctx.summary.total();
            self.run_phase(ctx, phase, plan)?;
            info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                found = ctx.summary.total() - before,
                "phase complete"
            );
        }
        Ok(())
    }

    fn run_phase(&self, ctx: &CheckContext<'_>, phase: Phase, plan: &RangePlan) -> Result<()> {
        match phase {
            Phase::Schema => {
                schema::check(ctx);
                self.progress.advance(1);
            }
            Phase::Node => self.each_range(ctx, &plan.nodes, |range| node::check_range(ctx, range))?,
            Phase::Relationship => self.each_range(ctx, &plan.relationships, |range| {
                relationship::check_range(ctx, range)
            })?,
            Phase::Property => {
                for ranges in [&plan.nodes, &plan.relationships] {
                    self.each_range(ctx, ranges, |range| property::check_range(ctx, range))?;
                }
                if ctx.full && ctx.flags.check_property_owners {
                    property::sweep_orphans(ctx)?;
                    self.progress.advance(1);
                }
            }
            Phase::Index => {
                let handles = index::open_handles(ctx)?;
                for ranges in [&plan.nodes, &plan.relationships] {
                    self.each_range(ctx, ranges, |range| index::check_range(ctx, &handles, range))?;
                }
                index::finish(ctx, &handles)?;
                self.progress.advance(1);
            }
            Phase::Counts => {
                counts::check(ctx);
                self.progress.advance(1);
            }
        }
        Ok(())
    }

    fn each_range<F>(&self, ctx: &CheckContext<'_>, ranges: &[EntityRange], check: F) -> Result<()>
    where
        F: Fn(&EntityRange) -> Result<()> + Sync + Send,
    {
        ranges.par_iter().try_for_each(|range| {
            ctx.check_cancelled()?;
            check(range)?;
            self.progress.advance(1);
            Ok(())
        })
    }
}

/// Ranges one run iterates, per entity type.
struct RangePlan {
    nodes: Vec<EntityRange>,
    relationships: Vec<EntityRange>,
}

impl RangePlan {
    /// Progress units `phase` contributes.
    fn units(&self, phase: Phase, full: bool, flags: &ConsistencyFlags) -> u64 {
        let nodes = self.nodes.len() as u64;
        let relationships = self.relationships.len() as u64;
        match phase {
            Phase::Schema | Phase::Counts => 1,
            Phase::Node => nodes,
            Phase::Relationship => relationships,
            Phase::Property => {
                nodes + relationships + u64::from(full && flags.check_property_owners)
            }
            Phase::Index => nodes + relationships + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::check::limiter::MemoryBudget;
    use crate::check::progress::CountingProgress;
    use crate::check::summary::RecordType;
    use crate::primitives::pager::null_tracer;
    use crate::storage::GraphBuilder;

    fn opened() -> OpenedStore {
        GraphBuilder::random(7, 200, 400)
            .build()
            .unwrap()
            .open_in_memory(8, null_tracer())
            .unwrap()
    }

    fn small_ranges(entities: u64) -> MemoryLimiterFactory {
        Arc::new(move |page_cache, high_node, high_rel| {
            MemoryLimiter::new(
                MemoryBudget {
                    total_memory: page_cache + entities * 64,
                    page_cache_memory: page_cache,
                    off_heap_memory: 0,
                    per_entity_footprint: 64,
                },
                high_node,
                high_rel,
            )
        })
    }

    #[test]
    fn progress_reaches_its_total() {
        let opened = opened();
        let memory = MemoryTracker::new();
        let progress = Arc::new(CountingProgress::new());
        let summary = FullCheck::new(CheckOptions {
            threads: Some(3),
            ..CheckOptions::default()
        })
        .with_memory_limiter(small_ranges(17))
        .with_progress(progress.clone())
        .execute(CheckInputs::from_opened(&opened, &memory))
        .unwrap();
        summary.assert_consistent();
        assert!(progress.is_finished());
        assert_eq!(progress.done(), progress.total());
        // schema, 12+24 ranges three times over, orphan sweep, index tail, counts
        assert_eq!(progress.total(), 1 + 12 + 24 + (12 + 24 + 1) + (12 + 24 + 1) + 1);
        assert_eq!(summary.ranges.node_ranges, 12);
        assert_eq!(memory.usage(), 0);
        assert!(summary.peak_memory_bytes > 0);
    }

    #[test]
    fn raised_cancel_flag_discards_the_run() {
        let opened = opened();
        let memory = MemoryTracker::new();
        let check = FullCheck::new(CheckOptions::default());
        check.cancel_handle().store(true, Ordering::Relaxed);
        let err = check
            .execute(CheckInputs::from_opened(&opened, &memory))
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn budget_without_room_is_a_configuration_error() {
        let opened = opened();
        let memory = MemoryTracker::new();
        let err = FullCheck::new(CheckOptions {
            memory: MemoryBudget {
                total_memory: 1,
                ..MemoryBudget::default()
            },
            ..CheckOptions::default()
        })
        .execute(CheckInputs::from_opened(&opened, &memory))
        .unwrap_err();
        assert!(matches!(err, CheckError::Configuration(_)));
    }

    #[test]
    fn limited_scope_clips_and_skips_counts() {
        let mut builder = GraphBuilder::random(7, 200, 400);
        builder
            .node_mut(crate::types::NodeId(150))
            .unwrap()
            .labels
            .push(crate::types::LabelId(40));
        let mut built = builder.build().unwrap();
        built.catalog.counts.set_node_count(None, 1);
        let opened = built.open_in_memory(8, null_tracer()).unwrap();
        let memory = MemoryTracker::new();
        let ranges = vec![
            EntityRange::new(EntityType::Node, 100, 10_000).unwrap(),
            EntityRange::new(EntityType::Relationship, 0, 10).unwrap(),
        ];
        let summary = FullCheck::new(CheckOptions::default())
            .with_scope(CheckScope::Limited(ranges))
            .execute(CheckInputs::from_opened(&opened, &memory))
            .unwrap();
        assert!(summary.limited);
        assert_eq!(summary.ranges.node_ranges, 1);
        summary.verify(RecordType::Node, 1).and_thats_all_folks();
    }

    #[test]
    fn overlapping_limited_ranges_check_each_id_once() {
        let opened = opened();
        let memory = MemoryTracker::new();
        let node = |low, high| EntityRange::new(EntityType::Node, low, high).unwrap();
        let summary = FullCheck::new(CheckOptions::default())
            .with_scope(CheckScope::Limited(vec![
                node(0, 100),
                node(50, 150),
                node(50, 150),
            ]))
            .execute(CheckInputs::from_opened(&opened, &memory))
            .unwrap();
        assert!(summary.limited);
        assert_eq!(summary.ranges.node_ranges, 1);
        assert_eq!(summary.ranges.relationship_ranges, 0);
        summary.assert_consistent();
    }
}
