//! Container-level throughput control: group resolution and lazy controllers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use super::{RequestCharge, ThroughputGroupController, ThroughputRequest};
use crate::cache::AsyncCache;
use crate::config::{ThroughputControlConfig, ThroughputControlGroup};
use crate::error::{FeedError, FeedResult};

/// Builds the controller for one group. Receives the group and the cycle
/// length.
pub type ControllerFactory = Arc<
    dyn Fn(
            ThroughputControlGroup,
            Duration,
        ) -> BoxFuture<'static, FeedResult<ThroughputGroupController>>
        + Send
        + Sync,
>;

/// Result of eagerly initializing every group controller.
#[derive(Debug, Default)]
pub struct InitReport {
    pub initialized: Vec<String>,
    pub failed: Vec<(String, Arc<FeedError>)>,
}

impl InitReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Routes requests of one container through their group controllers.
pub struct ThroughputContainerController {
    groups: HashMap<String, ThroughputControlGroup>,
    default_group: Option<String>,
    cycle: Duration,
    controllers: AsyncCache<String, Arc<ThroughputGroupController>>,
    factory: ControllerFactory,
}

impl ThroughputContainerController {
    /// Create a controller that builds plain [`ThroughputGroupController`]s.
    pub fn new(config: ThroughputControlConfig) -> FeedResult<Self> {
        let factory: ControllerFactory =
            Arc::new(|group: ThroughputControlGroup, cycle: Duration| {
                async move { Ok::<_, FeedError>(ThroughputGroupController::new(group, cycle)) }
                    .boxed()
            });
        Self::with_factory(config, factory)
    }

    /// Create a controller with a custom group controller factory.
    ///
    /// The default group is resolved here, once.
    pub fn with_factory(
        config: ThroughputControlConfig,
        factory: ControllerFactory,
    ) -> FeedResult<Self> {
        config
            .validate()
            .map_err(|errors| FeedError::Config(errors.join("; ")))?;

        let default_group = config.default_group().map(|g| g.name.clone());
        let groups = config
            .groups
            .into_iter()
            .map(|g| (g.name.clone(), g))
            .collect::<HashMap<_, _>>();

        info!(
            groups = groups.len(),
            default_group = default_group.as_deref().unwrap_or("<none>"),
            "Throughput control configured"
        );

        Ok(Self {
            groups,
            default_group,
            cycle: config.throughput_cycle,
            controllers: AsyncCache::new(config.controller_cache_capacity),
            factory,
        })
    }

    /// Returns true if any group is configured.
    pub fn is_enabled(&self) -> bool {
        !self.groups.is_empty()
    }

    pub fn default_group(&self) -> Option<&ThroughputControlGroup> {
        self.default_group.as_ref().and_then(|name| self.groups.get(name))
    }

    /// Resolve a group name. Empty, missing or unregistered names resolve to
    /// the default group.
    pub fn resolve_group(&self, name: Option<&str>) -> Option<&ThroughputControlGroup> {
        match name {
            Some(name) if !name.is_empty() => {
                self.groups.get(name).or_else(|| self.default_group())
            }
            _ => self.default_group(),
        }
    }

    /// Resolve and, on first use, build the controller for a group name.
    pub async fn resolve(
        &self,
        name: Option<&str>,
    ) -> FeedResult<Option<Arc<ThroughputGroupController>>> {
        let Some(group) = self.resolve_group(name) else {
            return Ok(None);
        };
        self.controller_for(group, None).await.map(Some)
    }

    /// Replace a controller that the caller has found unusable.
    ///
    /// If the cache still holds `stale`, a new controller is built; if another
    /// caller already replaced it, that replacement is returned.
    pub async fn rebuild(
        &self,
        stale: &Arc<ThroughputGroupController>,
    ) -> FeedResult<Arc<ThroughputGroupController>> {
        let group = self.groups.get(stale.name()).ok_or_else(|| {
            FeedError::Config(format!("unknown throughput group {}", stale.name()))
        })?;
        self.controller_for(group, Some(stale)).await
    }

    /// Build every group's controller. A failing group is reported and
    /// logged without affecting the others.
    pub async fn init(&self) -> InitReport {
        let attempts = self.groups.values().map(|group| async move {
            (group.name.clone(), self.controller_for(group, None).await)
        });

        let mut report = InitReport::default();
        for (name, result) in futures::future::join_all(attempts).await {
            match result {
                Ok(_) => report.initialized.push(name),
                Err(FeedError::ControllerInit { source, .. }) => {
                    warn!(group = %name, error = %source, "Failed to initialize throughput group");
                    report.failed.push((name, source));
                }
                Err(e) => {
                    warn!(group = %name, error = %e, "Failed to initialize throughput group");
                    report.failed.push((name, Arc::new(e)));
                }
            }
        }
        report.initialized.sort();
        report.failed.sort_by(|a, b| a.0.cmp(&b.0));
        report
    }

    /// Gate `request` through its group's controller and forward it to
    /// `next`. Without configured groups the request passes through untouched.
    pub async fn process_request<R, F, Fut>(
        &self,
        request: ThroughputRequest,
        next: F,
    ) -> FeedResult<R>
    where
        R: RequestCharge,
        F: FnOnce(ThroughputRequest) -> Fut,
        Fut: Future<Output = FeedResult<R>>,
    {
        if !self.is_enabled() {
            return next(request).await;
        }

        match self.resolve(request.group_name.as_deref()).await? {
            Some(controller) => controller.process_request(request, next).await,
            None => {
                debug!(
                    operation = %request.operation,
                    group = request.group_name.as_deref().unwrap_or(""),
                    "No throughput group applies, forwarding request"
                );
                next(request).await
            }
        }
    }

    async fn controller_for(
        &self,
        group: &ThroughputControlGroup,
        obsolete: Option<&Arc<ThroughputGroupController>>,
    ) -> FeedResult<Arc<ThroughputGroupController>> {
        self.controllers
            .get_or_init(group.name.clone(), obsolete, || {
                let build = (self.factory)(group.clone(), self.cycle);
                async move {
                    let controller = build.await?;
                    debug!(group = %controller.name(), "Built throughput group controller");
                    Ok::<_, FeedError>(Arc::new(controller))
                }
            })
            .await
            .map_err(|source| FeedError::ControllerInit {
                group: group.name.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(groups: Vec<ThroughputControlGroup>) -> ThroughputControlConfig {
        ThroughputControlConfig {
            groups,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_empty_and_unknown_names_resolve_to_default() {
        let controller = ThroughputContainerController::new(config(vec![
            ThroughputControlGroup::new("interactive").with_default(),
            ThroughputControlGroup::new("batch"),
        ]))
        .unwrap();

        let by_empty = controller.resolve(Some("")).await.unwrap().unwrap();
        let by_none = controller.resolve(None).await.unwrap().unwrap();
        let by_unknown = controller.resolve(Some("nope")).await.unwrap().unwrap();
        let batch = controller.resolve(Some("batch")).await.unwrap().unwrap();

        assert_eq!(by_empty.name(), "interactive");
        assert!(Arc::ptr_eq(&by_empty, &by_none));
        assert!(Arc::ptr_eq(&by_empty, &by_unknown));
        assert_eq!(batch.name(), "batch");
    }

    #[tokio::test]
    async fn test_no_default_resolves_to_none() {
        let controller =
            ThroughputContainerController::new(config(vec![ThroughputControlGroup::new("batch")]))
                .unwrap();
        assert!(controller.resolve(Some("other")).await.unwrap().is_none());
    }

    #[test]
    fn test_required_default_missing_fails_construction() {
        let result = ThroughputContainerController::new(ThroughputControlConfig {
            groups: vec![ThroughputControlGroup::new("batch")],
            require_default: true,
            ..Default::default()
        });
        assert!(matches!(result, Err(FeedError::Config(_))));
    }

    #[tokio::test]
    async fn test_controller_built_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let factory: ControllerFactory =
            Arc::new(move |group: ThroughputControlGroup, cycle: Duration| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, FeedError>(ThroughputGroupController::new(group, cycle)) }
                    .boxed()
            });
        let controller = ThroughputContainerController::with_factory(
            config(vec![ThroughputControlGroup::new("a").with_default()]),
            factory,
        )
        .unwrap();

        let lookups = (0..5).map(|_| controller.resolve(Some("a")));
        let results = futures::future::join_all(lookups).await;
        assert!(results.iter().all(|r| r.is_ok()));
        controller.resolve(None).await.unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_init_isolates_failures() {
        let factory: ControllerFactory = Arc::new(|group: ThroughputControlGroup, cycle: Duration| {
            async move {
                if group.name == "broken" {
                    Err(FeedError::Config("no capacity for broken".into()))
                } else {
                    Ok::<_, FeedError>(ThroughputGroupController::new(group, cycle))
                }
            }
            .boxed()
        });
        let controller = ThroughputContainerController::with_factory(
            config(vec![
                ThroughputControlGroup::new("a").with_default(),
                ThroughputControlGroup::new("broken"),
                ThroughputControlGroup::new("c"),
            ]),
            factory,
        )
        .unwrap();

        let report = controller.init().await;
        assert_eq!(report.initialized, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "broken");
        assert!(!report.is_complete());

        let err = controller.resolve(Some("broken")).await.unwrap_err();
        assert!(matches!(err, FeedError::ControllerInit { ref group, .. } if group == "broken"));
    }

    #[tokio::test]
    async fn test_rebuild_replaces_stale_controller() {
        let controller =
            ThroughputContainerController::new(config(vec![ThroughputControlGroup::new("a")]))
                .unwrap();
        let first = controller.resolve(Some("a")).await.unwrap().unwrap();
        let second = controller.rebuild(&first).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        // A second rebuild with the old handle keeps the replacement.
        let third = controller.rebuild(&first).await.unwrap();
        assert!(Arc::ptr_eq(&second, &third));
    }

    #[tokio::test]
    async fn test_pass_through_without_groups() {
        let controller =
            ThroughputContainerController::new(ThroughputControlConfig::default()).unwrap();
        assert!(!controller.is_enabled());

        let charge = controller
            .process_request(ThroughputRequest::new("read").with_group("x"), |request| async move {
                assert!(request.diagnostics.is_empty());
                Ok::<_, FeedError>(3.0)
            })
            .await
            .unwrap();
        assert_eq!(charge, 3.0);
    }
}
