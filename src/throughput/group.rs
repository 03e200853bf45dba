//! Per-group request gating.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::{RequestCharge, ThroughputRequest};
use crate::config::ThroughputControlGroup;
use crate::error::{FeedError, FeedResult};
use crate::metrics;

#[derive(Debug)]
struct Budget {
    cycle_start: Instant,
    consumed: f64,
}

/// Gates and annotates requests for one throughput-control group.
///
/// Groups without a `target_throughput` only annotate. Groups with one admit
/// requests until the charges recorded in the current cycle reach the target,
/// then reject with [`FeedError::Throttled`] until the next cycle starts.
#[derive(Debug)]
pub struct ThroughputGroupController {
    group: ThroughputControlGroup,
    cycle: Duration,
    budget: Mutex<Budget>,
}

impl ThroughputGroupController {
    pub fn new(group: ThroughputControlGroup, cycle: Duration) -> Self {
        Self {
            group,
            cycle,
            budget: Mutex::new(Budget {
                cycle_start: Instant::now(),
                consumed: 0.0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.group.name
    }

    pub fn group(&self) -> &ThroughputControlGroup {
        &self.group
    }

    /// Stamp the group's priority level, throughput bucket and diagnostics
    /// tag on the request.
    pub fn annotate(&self, request: &mut ThroughputRequest) {
        if let Some(level) = self.group.priority_level {
            request.priority_level = Some(level);
        }
        if let Some(bucket) = self.group.throughput_bucket {
            request.throughput_bucket = Some(bucket);
        }
        if !self.group.diagnostics_tag.is_empty() {
            request.diagnostics.push(self.group.diagnostics_tag.clone());
        }
    }

    /// Check the current cycle's budget.
    pub fn try_admit(&self) -> FeedResult<()> {
        let Some(target) = self.group.target_throughput else {
            return Ok(());
        };

        let mut budget = self.budget.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = self.roll_cycle(&mut budget);
        if budget.consumed >= target {
            return Err(FeedError::Throttled {
                group: self.group.name.clone(),
                retry_after: self.cycle.saturating_sub(elapsed),
            });
        }
        Ok(())
    }

    /// Charge `request_units` against the current cycle.
    pub fn record_charge(&self, request_units: f64) {
        if self.group.target_throughput.is_none() {
            return;
        }
        let mut budget = self.budget.lock().unwrap_or_else(|e| e.into_inner());
        self.roll_cycle(&mut budget);
        budget.consumed += request_units.max(0.0);
    }

    /// Request units charged in the current cycle.
    pub fn consumed(&self) -> f64 {
        let mut budget = self.budget.lock().unwrap_or_else(|e| e.into_inner());
        self.roll_cycle(&mut budget);
        budget.consumed
    }

    /// Annotate, admit, forward the request to `next`, then charge its cost.
    pub async fn process_request<R, F, Fut>(
        &self,
        mut request: ThroughputRequest,
        next: F,
    ) -> FeedResult<R>
    where
        R: RequestCharge,
        F: FnOnce(ThroughputRequest) -> Fut,
        Fut: Future<Output = FeedResult<R>>,
    {
        self.annotate(&mut request);

        if let Err(e) = self.try_admit() {
            debug!(group = %self.group.name, operation = %request.operation, "Request throttled");
            metrics::THROUGHPUT_REQUESTS
                .with_label_values(&[&self.group.name, "throttled"])
                .inc();
            return Err(e);
        }

        match next(request).await {
            Ok(response) => {
                self.record_charge(response.request_charge());
                metrics::THROUGHPUT_REQUESTS
                    .with_label_values(&[&self.group.name, "admitted"])
                    .inc();
                Ok(response)
            }
            Err(e) => {
                metrics::THROUGHPUT_REQUESTS
                    .with_label_values(&[&self.group.name, "failed"])
                    .inc();
                Err(e)
            }
        }
    }

    /// Start a new cycle if the current one has elapsed. Returns the time
    /// spent in the (possibly new) current cycle.
    fn roll_cycle(&self, budget: &mut Budget) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(budget.cycle_start);
        if elapsed >= self.cycle {
            budget.cycle_start = now;
            budget.consumed = 0.0;
            return Duration::ZERO;
        }
        elapsed
    }
}

/// Controllers are identities: two handles are equal only if they point at
/// the same controller.
impl PartialEq for ThroughputGroupController {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}
