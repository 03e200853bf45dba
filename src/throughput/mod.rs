//! Per-group throughput control.
//!
//! Every outgoing request names an optional throughput-control group. The
//! [`ThroughputContainerController`] resolves that name (falling back to the
//! default group for empty or unregistered names), lazily builds the group's
//! [`ThroughputGroupController`] exactly once through an
//! [`AsyncCache`](crate::cache::AsyncCache), and lets it gate and annotate
//! the request before forwarding it.
//!
//! ```rust,ignore
//! let controller = ThroughputContainerController::new(config)?;
//! let response = controller
//!     .process_request(ThroughputRequest::new("read_feed").with_group("batch"), |req| {
//!         source.read(req)
//!     })
//!     .await?;
//! ```

mod container;
mod group;

use serde::{Deserialize, Serialize};

use crate::config::PriorityLevel;

pub use container::{ControllerFactory, InitReport, ThroughputContainerController};
pub use group::ThroughputGroupController;

/// An outgoing request as seen by throughput control.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThroughputRequest {
    /// Operation name, used in logs.
    pub operation: String,
    /// Requested throughput-control group; `None` or empty uses the default.
    pub group_name: Option<String>,
    pub priority_level: Option<PriorityLevel>,
    pub throughput_bucket: Option<u32>,
    /// Diagnostics tags added by the controllers that handled the request.
    pub diagnostics: Vec<String>,
}

impl ThroughputRequest {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn with_group(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = Some(group_name.into());
        self
    }
}

/// Cost of a completed request in request units.
pub trait RequestCharge {
    fn request_charge(&self) -> f64;
}

impl RequestCharge for f64 {
    fn request_charge(&self) -> f64 {
        *self
    }
}

/// A response paired with its charge.
impl<T> RequestCharge for (T, f64) {
    fn request_charge(&self) -> f64 {
        self.1
    }
}
