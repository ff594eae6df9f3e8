//! Discovery run driver.
//!
//! Outer loop over categories in config order, inner loop over the grid
//! points of this instance's chunk. Each grid point seeds an explicit
//! cell work queue; capped cells push their four children onto it.
//! Budgets are checked before starting a cell, never mid-call, so an
//! in-flight query is never interrupted.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{info, warn};

use crate::config::CategoryDef;
use crate::grid::GridPoint;
use crate::overpass::CellQuerier;
use crate::store::{CandidateStore, CandidateWriter, WriteOutcome};
use crate::subdivide::{Cell, SubdivisionPolicy};
use crate::tags::{translate_category, TagMap};

const PROGRESS_EVERY_CELLS: usize = 25;

/// Hard limits for one run. Hitting any of them is a successful partial
/// completion, not an error.
#[derive(Debug, Clone, Copy)]
pub struct Budgets {
    pub max_cells_per_category: usize,
    pub max_total_inserts: usize,
    /// Wall-clock safety ceiling for scheduled batch jobs
    pub max_runtime: Duration,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            max_cells_per_category: 1000,
            max_total_inserts: 5000,
            max_runtime: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct CategoryStats {
    pub name: String,
    pub cells_queried: usize,
    pub raw_elements: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub soft_errors: usize,
    pub subdivisions: usize,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub cells_queried: usize,
    pub raw_elements: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub soft_errors: usize,
    pub subdivisions: usize,
    /// True when the wall-clock ceiling or the insert cap halted the run
    pub budget_exhausted: bool,
    pub per_category: Vec<CategoryStats>,
}

impl RunSummary {
    fn absorb(&mut self, stats: CategoryStats) {
        self.cells_queried += stats.cells_queried;
        self.raw_elements += stats.raw_elements;
        self.inserted += stats.inserted;
        self.duplicates += stats.duplicates;
        self.soft_errors += stats.soft_errors;
        self.subdivisions += stats.subdivisions;
        self.per_category.push(stats);
    }
}

enum Halt {
    None,
    /// Per-category cell cap: move on to the next category
    CategoryCells,
    Deadline,
    InsertCap,
}

/// Drives one discovery run.
pub struct DiscoveryOrchestrator<Q, S> {
    querier: Q,
    writer: CandidateWriter<S>,
    policy: SubdivisionPolicy,
    budgets: Budgets,
    /// Radius of depth-0 cells, meters
    radius_m: f64,
}

impl<Q: CellQuerier + Send, S: CandidateStore> DiscoveryOrchestrator<Q, S> {
    pub fn new(
        querier: Q,
        writer: CandidateWriter<S>,
        policy: SubdivisionPolicy,
        budgets: Budgets,
        radius_m: f64,
    ) -> Self {
        Self {
            querier,
            writer,
            policy,
            budgets,
            radius_m,
        }
    }

    pub async fn run(
        mut self,
        categories: &[CategoryDef],
        food_hints: &[TagMap],
        points: &[GridPoint],
    ) -> Result<RunSummary> {
        let deadline = Instant::now() + self.budgets.max_runtime;
        let mut summary = RunSummary::default();

        for category in categories {
            let fragments = translate_category(&category.rules, category.food, food_hints);
            info!(
                category = %category.name,
                fragments = fragments.len(),
                grid_points = points.len(),
                "starting category"
            );

            let (stats, halt) = self
                .run_category(category, &fragments, points, deadline)
                .await?;

            info!(
                category = %category.name,
                cells = stats.cells_queried,
                inserted = stats.inserted,
                duplicates = stats.duplicates,
                soft_errors = stats.soft_errors,
                subdivisions = stats.subdivisions,
                "category complete"
            );
            summary.absorb(stats);

            match halt {
                Halt::None | Halt::CategoryCells => {}
                Halt::Deadline => {
                    warn!("wall-clock ceiling reached, halting run with partial results");
                    summary.budget_exhausted = true;
                    break;
                }
                Halt::InsertCap => {
                    warn!(
                        cap = self.budgets.max_total_inserts,
                        "global insert cap reached, halting run"
                    );
                    summary.budget_exhausted = true;
                    break;
                }
            }
        }

        Ok(summary)
    }

    async fn run_category(
        &mut self,
        category: &CategoryDef,
        fragments: &[String],
        points: &[GridPoint],
        deadline: Instant,
    ) -> Result<(CategoryStats, Halt)> {
        let mut stats = CategoryStats {
            name: category.name.clone(),
            ..Default::default()
        };

        for point in points {
            let mut queue =
                VecDeque::from([Cell::from_grid_point(*point, self.radius_m)]);

            while let Some(cell) = queue.pop_front() {
                if Instant::now() >= deadline {
                    return Ok((stats, Halt::Deadline));
                }
                if self.writer.stats().0 >= self.budgets.max_total_inserts {
                    return Ok((stats, Halt::InsertCap));
                }
                if stats.cells_queried >= self.budgets.max_cells_per_category {
                    info!(
                        category = %category.name,
                        cap = self.budgets.max_cells_per_category,
                        "per-category cell cap reached"
                    );
                    return Ok((stats, Halt::CategoryCells));
                }

                let outcome = self
                    .querier
                    .query_cell(&cell, &category.name, fragments)
                    .await?;
                stats.cells_queried += 1;
                stats.raw_elements += outcome.raw_count;
                if outcome.failure.is_some() {
                    stats.soft_errors += 1;
                }

                for place in &outcome.places {
                    match self.writer.write(place).await? {
                        WriteOutcome::Inserted => {
                            stats.inserted += 1;
                            if self.writer.stats().0 >= self.budgets.max_total_inserts {
                                return Ok((stats, Halt::InsertCap));
                            }
                        }
                        WriteOutcome::SeenThisRun | WriteOutcome::AlreadyStored => {
                            stats.duplicates += 1;
                        }
                    }
                }

                if let Some(children) = self.policy.children(&cell, outcome.capped) {
                    stats.subdivisions += 1;
                    queue.extend(children);
                }

                if stats.cells_queried % PROGRESS_EVERY_CELLS == 0 {
                    info!(
                        category = %category.name,
                        cells = stats.cells_queried,
                        inserted = stats.inserted,
                        soft_errors = stats.soft_errors,
                        "progress"
                    );
                }
            }
        }

        Ok((stats, Halt::None))
    }
}
