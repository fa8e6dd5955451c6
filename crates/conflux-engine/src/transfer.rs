//! Transfer executor
//!
//! Moves the rows of one integration from its source connector to its
//! target connector in pages of `batch_size`. Every page is written as one
//! batch, so a failure leaves earlier pages committed and nothing of the
//! failing page.
//!
//! Each page copy is bounded by the page timeout. With `process_count > 1`
//! the pages are shared out over that many source/target session pairs
//! ("lanes"), each pulling the next unclaimed page until none are left. The
//! first failure stops every lane; all sessions are closed before the
//! transfer returns.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};

use conflux_rdbc::types::{Row, Value};

use crate::broker::Publisher;
use crate::connector::{Connector, ConnectorContext, ConnectorRegistry, WriteStatement};
use crate::error::{EngineError, Result};
use crate::events::TaskMessage;
use crate::operation::{Integration, TransferRules};
use crate::scheduler::WorkItem;
use crate::telemetry::batch_span;

/// Result of one completed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    /// Integration name
    pub integration: String,
    /// Rows written to the target
    pub rows: u64,
    /// Batches written
    pub batches: u64,
    /// Wall time of the transfer
    pub duration: Duration,
}

/// Runs the transfer of one work item
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    /// Open source and target, move every row, disconnect both.
    ///
    /// Progress is reported through `publisher` as `LOG` messages. Both
    /// connectors are disconnected before this returns, on success or error.
    async fn start(
        &self,
        item: &WorkItem,
        publisher: &Publisher,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary>;
}

/// Default executor: count, then read and write page by page
pub struct PagedTransferExecutor {
    registry: Arc<ConnectorRegistry>,
    connect_timeout: Duration,
    default_batch_size: u32,
    page_timeout: Duration,
}

impl PagedTransferExecutor {
    /// Create an executor that builds connectors from `registry`
    pub fn new(registry: Arc<ConnectorRegistry>, connect_timeout: Duration, default_batch_size: u32) -> Self {
        Self {
            registry,
            connect_timeout,
            default_batch_size: default_batch_size.max(1),
            page_timeout: Duration::from_secs(1800),
        }
    }

    /// Page timeout applied when a rule does not set one
    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    /// Batch size applied when a rule does not set one
    pub fn default_batch_size(&self) -> u32 {
        self.default_batch_size
    }

    fn lane(&self, integration: &Integration, index: u32) -> Result<Lane> {
        let suffix = if index == 0 { String::new() } else { format!("#{index}") };
        let source = self.registry.create(
            &integration.source,
            &ConnectorContext::new(
                format!("{}/source{suffix}", integration.name),
                self.connect_timeout,
            ),
        )?;
        let target = self.registry.create(
            &integration.target,
            &ConnectorContext::new(
                format!("{}/target{suffix}", integration.name),
                self.connect_timeout,
            ),
        )?;
        Ok(Lane { source, target })
    }

    fn page_plan(&self, rules: &TransferRules, total: u64) -> PagePlan {
        PagePlan {
            total,
            batch_size: u64::from(rules.batch_size.unwrap_or(self.default_batch_size).max(1)),
            timeout: rules
                .page_timeout_ms
                .map_or(self.page_timeout, Duration::from_millis),
        }
    }

    /// Connect the lead lane, truncate, count
    async fn prepare(
        &self,
        item: &WorkItem,
        lead: &mut Lane,
        publisher: &Publisher,
        cancel: &CancellationToken,
    ) -> Result<PagePlan> {
        let integration = item.integration();
        let rules = &integration.rules;

        lead.source.connect(cancel).await?;
        lead.target.connect(cancel).await?;

        if rules.truncate_target {
            lead.target.truncate(&rules.target, cancel).await?;
        }

        let total = lead.source.count(&rules.source, cancel).await?;
        let plan = self.page_plan(rules, total);
        info!(
            integration = %integration.name,
            rows = total,
            batch_size = plan.batch_size,
            "Starting transfer"
        );
        publisher.publish(TaskMessage::log(
            item.operation_name(),
            &integration.name,
            format!("transferring {total} rows in batches of {}", plan.batch_size),
            Some(0),
        ));
        Ok(plan)
    }

    async fn copy_sequential(
        &self,
        item: &WorkItem,
        lead: &mut Lane,
        plan: PagePlan,
        publisher: &Publisher,
        cancel: &CancellationToken,
    ) -> Result<Progress> {
        let integration = item.integration();
        let name = integration.name.as_str();
        let rules = &integration.rules;

        let mut writes = WritePlan::from_rules(rules, lead.target.as_ref())?;
        let mut progress = Progress::default();
        let mut start = 0u64;

        while start < plan.total {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let end = (start + plan.batch_size).min(plan.total);

            let rows = lead
                .copy_page(rules, &mut writes, start, end, plan.timeout, cancel)
                .instrument(batch_span(name, start, end))
                .await?;
            if rows == 0 {
                warn!(integration = %name, start, end, "Source returned an empty page, stopping");
                break;
            }

            progress.rows += rows;
            progress.batches += 1;
            publisher.publish(TaskMessage::log(
                item.operation_name(),
                name,
                format!("rows {}..{} of {} written", start + 1, end, plan.total),
                Some(progress.rows),
            ));
            start = end;
        }
        Ok(progress)
    }

    /// Share the pages out over `lanes` concurrent session pairs.
    ///
    /// `lead` is already connected; the extra lanes connect inside their
    /// worker. Every lane is disconnected before this returns.
    async fn copy_parallel(
        &self,
        item: &WorkItem,
        lead: Lane,
        lanes: u32,
        plan: PagePlan,
        publisher: &Publisher,
        cancel: &CancellationToken,
    ) -> Result<Progress> {
        let mut pending = vec![lead];
        for index in 1..lanes {
            match self.lane(item.integration(), index) {
                Ok(lane) => pending.push(lane),
                Err(e) => {
                    for lane in &mut pending {
                        lane.disconnect().await;
                    }
                    return Err(e);
                }
            }
        }

        let shared = Arc::new(SharedPages::default());
        let stop = cancel.child_token();
        let mut workers = JoinSet::new();
        for (index, lane) in pending.into_iter().enumerate() {
            let worker = PageWorker {
                index,
                item: item.clone(),
                lane,
                plan,
                shared: shared.clone(),
                publisher: publisher.clone(),
                stop: stop.clone(),
            };
            workers.spawn(worker.run().instrument(Span::current()));
        }
        debug!(integration = %item.integration().name, lanes, "Page workers started");

        let mut failure: Option<EngineError> = None;
        while let Some(joined) = workers.join_next().await {
            let outcome = joined
                .unwrap_or_else(|e| Err(EngineError::transfer(format!("page worker stopped: {e}"))));
            let Err(err) = outcome else {
                continue;
            };
            stop.cancel();
            // Lanes stopped by another lane's failure report Cancelled
            match &failure {
                None => failure = Some(err),
                Some(EngineError::Cancelled) if !err.is_cancelled() => failure = Some(err),
                Some(_) => {}
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(Progress {
                rows: shared.rows.load(Ordering::SeqCst),
                batches: shared.batches.load(Ordering::SeqCst),
            }),
        }
    }
}

/// Page geometry and bound of one transfer
#[derive(Debug, Clone, Copy)]
struct PagePlan {
    total: u64,
    batch_size: u64,
    timeout: Duration,
}

impl PagePlan {
    fn pages(&self) -> u64 {
        self.total.div_ceil(self.batch_size)
    }

    fn page(&self, index: u64) -> Option<(u64, u64)> {
        let start = index.checked_mul(self.batch_size)?;
        (start < self.total).then(|| (start, (start + self.batch_size).min(self.total)))
    }
}

#[derive(Debug, Default)]
struct Progress {
    rows: u64,
    batches: u64,
}

/// Page cursor and tallies shared by concurrent lanes
#[derive(Debug, Default)]
struct SharedPages {
    next: AtomicU64,
    rows: AtomicU64,
    batches: AtomicU64,
}

/// One source session and one target session
struct Lane {
    source: Box<dyn Connector>,
    target: Box<dyn Connector>,
}

impl Lane {
    async fn disconnect(&mut self) {
        self.source.disconnect().await;
        self.target.disconnect().await;
    }

    /// Read rows `start < n <= end` and write them as one batch, within `timeout`
    async fn copy_page(
        &mut self,
        rules: &TransferRules,
        plan: &mut WritePlan,
        start: u64,
        end: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let copy = self.copy_page_unbounded(rules, plan, start, end, cancel);
        match tokio::time::timeout(timeout, copy).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::transfer(format!(
                "rows {}..{} not copied within {} ms",
                start + 1,
                end,
                timeout.as_millis()
            ))),
        }
    }

    async fn copy_page_unbounded(
        &mut self,
        rules: &TransferRules,
        plan: &mut WritePlan,
        start: u64,
        end: u64,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let page = self
            .source
            .read_page(&rules.source, &plan.source_columns, start, end, cancel)
            .await?;
        let Some(first) = page.first() else {
            return Ok(0);
        };

        let statement = match &plan.statement {
            Some(statement) => statement.clone(),
            None => {
                // No mapping: copy the columns of the first page as they are
                let columns = first.columns().to_vec();
                let statement = self.target.write_statement(&rules.target, &columns)?;
                plan.source_columns = columns;
                plan.statement = Some(statement.clone());
                statement
            }
        };

        let values = page
            .iter()
            .map(|row| plan.project(row))
            .collect::<Result<Vec<_>>>()?;
        debug!(rows = values.len(), "Writing page");
        self.target.execute_many(&statement, &values, cancel).await
    }
}

/// One lane pulling pages until none are left
struct PageWorker {
    index: usize,
    item: WorkItem,
    lane: Lane,
    plan: PagePlan,
    shared: Arc<SharedPages>,
    publisher: Publisher,
    stop: CancellationToken,
}

impl PageWorker {
    async fn run(mut self) -> Result<()> {
        let result = self.copy().await;
        self.lane.disconnect().await;
        if let Err(err) = &result {
            if !err.is_cancelled() {
                warn!(lane = self.index, error = %err, "Page worker failed");
            }
        }
        result
    }

    async fn copy(&mut self) -> Result<()> {
        if self.index > 0 {
            self.lane.source.connect(&self.stop).await?;
            self.lane.target.connect(&self.stop).await?;
        }
        let integration = self.item.integration();
        let rules = &integration.rules;
        let mut writes = WritePlan::from_rules(rules, self.lane.target.as_ref())?;

        loop {
            if self.stop.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let index = self.shared.next.fetch_add(1, Ordering::SeqCst);
            let Some((start, end)) = self.plan.page(index) else {
                return Ok(());
            };

            let rows = self
                .lane
                .copy_page(rules, &mut writes, start, end, self.plan.timeout, &self.stop)
                .instrument(batch_span(&integration.name, start, end))
                .await?;
            if rows == 0 {
                warn!(integration = %integration.name, start, end, "Source returned an empty page");
                continue;
            }

            let written = self.shared.rows.fetch_add(rows, Ordering::SeqCst) + rows;
            self.shared.batches.fetch_add(1, Ordering::SeqCst);
            self.publisher.publish(TaskMessage::log(
                self.item.operation_name(),
                &integration.name,
                format!("rows {}..{} of {} written", start + 1, end, self.plan.total),
                Some(written),
            ));
        }
    }
}

/// Which source columns feed which target statement
struct WritePlan {
    source_columns: Vec<String>,
    statement: Option<WriteStatement>,
}

impl WritePlan {
    fn from_rules(rules: &TransferRules, target: &dyn Connector) -> Result<Self> {
        if rules.columns.is_empty() {
            return Ok(Self {
                source_columns: Vec::new(),
                statement: None,
            });
        }
        let source_columns = rules.columns.iter().map(|c| c.source.clone()).collect();
        let target_columns: Vec<String> = rules.columns.iter().map(|c| c.target.clone()).collect();
        Ok(Self {
            source_columns,
            statement: Some(target.write_statement(&rules.target, &target_columns)?),
        })
    }

    fn project(&self, row: &Row) -> Result<Vec<Value>> {
        self.source_columns
            .iter()
            .map(|column| {
                row.get_by_name(column).cloned().ok_or_else(|| {
                    EngineError::transfer(format!("source row has no column '{column}'"))
                })
            })
            .collect()
    }
}

#[async_trait]
impl TransferExecutor for PagedTransferExecutor {
    async fn start(
        &self,
        item: &WorkItem,
        publisher: &Publisher,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary> {
        let started = Instant::now();
        let integration = item.integration();
        let mut lead = self.lane(integration, 0)?;

        let plan = match self.prepare(item, &mut lead, publisher, cancel).await {
            Ok(plan) => plan,
            Err(e) => {
                lead.disconnect().await;
                return Err(e);
            }
        };

        let lanes = u64::from(integration.rules.process_count.unwrap_or(1).max(1))
            .min(plan.pages())
            .max(1);
        let progress = if lanes > 1 {
            self.copy_parallel(item, lead, lanes as u32, plan, publisher, cancel)
                .await?
        } else {
            let result = self
                .copy_sequential(item, &mut lead, plan, publisher, cancel)
                .await;
            lead.disconnect().await;
            result?
        };

        let summary = TransferSummary {
            integration: integration.name.clone(),
            rows: progress.rows,
            batches: progress.batches,
            duration: started.elapsed(),
        };
        info!(
            integration = %summary.integration,
            rows = summary.rows,
            batches = summary.batches,
            lanes,
            elapsed_ms = summary.duration.as_millis() as u64,
            "Transfer complete"
        );
        Ok(summary)
    }
}
