//! Replacement orchestrator.
//!
//! One run walks these steps in order, rebuilding the cluster snapshot
//! after every step that can change membership:
//!
//! 1. classify and remember the starting group membership
//! 2. stop idle outdated nodes, bracketed by the deployment state machine
//! 3. refuse to continue unless the deployment is closed
//! 4. add one node of headroom when no free node exists
//! 5. swap the in-place-replaceable nodes
//! 6. refuse to restore unless the deployment is closed
//! 7. restore the starting size
//!
//! Any failing step aborts the run. Nothing is retried here beyond what
//! the step's own polling already does.

use tracing::info;

use reimage_fleet::{Cluster, ScalingGroupRef};

use crate::capacity::{set_size, wait_for_size};
use crate::classifier::classify;
use crate::context::RunContext;
use crate::deploy::Deployment;
use crate::error::{ReplaceError, ReplaceResult};
use crate::report::RunReport;
use crate::stop::stop_unused;
use crate::swap::swap_all;
use crate::target::newest_image;

/// What to replace and which images qualify as the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceRequest {
    pub group: String,
    pub cluster: String,
    /// Image name filter; `*` matches any run of characters.
    pub image_filter: String,
    pub owner: String,
}

/// What to do about capacity when no free node exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Headroom {
    /// Resize the group to this many members.
    Grow(usize),
    /// Extra members already exist; wait for them at this size.
    Await(usize),
}

impl Headroom {
    /// Grow by one unless the group is already more than one member
    /// above its starting size.
    fn plan(members: usize, default_size: usize) -> Self {
        if members > default_size + 1 {
            Self::Await(members)
        } else {
            Self::Grow(members + 1)
        }
    }
}

/// Drives one cluster onto its newest image.
#[derive(Debug)]
pub struct Replacer {
    ctx: RunContext,
    deploy: Deployment,
}

impl Replacer {
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            deploy: Deployment::new(),
        }
    }

    pub fn with_deployment(mut self, deploy: Deployment) -> Self {
        self.deploy = deploy;
        self
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deploy
    }

    /// Resolve the newest matching image, then run [`Replacer::replace`].
    pub async fn run(&mut self, req: &ReplaceRequest) -> ReplaceResult<RunReport> {
        let target = newest_image(&self.ctx, &req.owner, &req.image_filter).await?;
        self.replace(&req.cluster, ScalingGroupRef::new(&req.group, &target))
            .await
    }

    /// Replace every outdated node of `cluster_name` with one on
    /// `group.target_image`.
    pub async fn replace(&mut self, cluster_name: &str, group: ScalingGroupRef) -> ReplaceResult<RunReport> {
        info!(
            cluster = %cluster_name,
            group = %group.name,
            image = %group.target_image,
            dry_run = self.ctx.dry_run,
            "replacement run started"
        );
        let mut report = RunReport {
            cluster: cluster_name.to_string(),
            group: group.name.clone(),
            target_image: group.target_image.clone(),
            dry_run: self.ctx.dry_run,
            ..RunReport::default()
        };

        let cluster = match classify(&self.ctx, cluster_name, &group).await {
            Ok(cluster) => cluster,
            Err(ReplaceError::AlreadyConverged { .. }) => {
                info!(cluster = %cluster_name, image = %group.target_image, "already converged");
                report.converged = true;
                return Ok(report);
            }
            Err(e) => return Err(e),
        };
        let default_size = cluster.members;
        report.default_size = default_size;

        self.rotate(cluster, &mut report).await?;

        if !self.deploy.is_closed() {
            return Err(ReplaceError::NotSteadyState { cause: None });
        }

        info!(group = %group.name, size = default_size, "restoring group size");
        set_size(&self.ctx, &group.name, cluster_name, default_size).await?;
        report.final_size = default_size;

        info!(
            cluster = %cluster_name,
            stopped = report.stopped.len(),
            swapped = report.swapped.len(),
            converged = report.converged,
            "replacement run finished"
        );
        Ok(report)
    }

    /// Steps 2 to 5. Returns early once a reclassification finds the
    /// cluster converged.
    async fn rotate(&mut self, mut cluster: Cluster, report: &mut RunReport) -> ReplaceResult<()> {
        let default_size = report.default_size;

        if !cluster.unused.is_empty() {
            info!(cluster = %cluster.name, count = cluster.unused.len(), "stopping unused nodes");
            self.deploy.start()?;
            stop_unused(&self.ctx, &cluster.group.name, &cluster.unused, cluster.members).await?;
            self.deploy.finish()?;
            report.stopped = cluster.unused.clone();

            match self.reclassify(&cluster).await? {
                Some(next) => cluster = next,
                None => {
                    report.converged = true;
                    return Ok(());
                }
            }
        }

        if !self.deploy.is_closed() {
            return Err(ReplaceError::NotSteadyState { cause: None });
        }

        if cluster.free.is_empty() {
            match Headroom::plan(cluster.members, default_size) {
                Headroom::Await(size) => {
                    info!(cluster = %cluster.name, size, "waiting for existing headroom");
                    if !self.ctx.dry_run {
                        wait_for_size(&self.ctx, &cluster.group.name, &cluster.name, size).await?;
                    }
                }
                Headroom::Grow(size) => {
                    info!(cluster = %cluster.name, size, "adding headroom");
                    set_size(&self.ctx, &cluster.group.name, &cluster.name, size).await?;
                    report.headroom_added = true;
                }
            }

            match self.reclassify(&cluster).await? {
                Some(next) => cluster = next,
                None => {
                    report.converged = true;
                    return Ok(());
                }
            }
        }

        if !cluster.in_place.is_empty() {
            match swap_all(&self.ctx, &mut self.deploy, &cluster).await {
                Ok(swapped) => report.swapped = swapped,
                Err(e) if !self.deploy.is_closed() => {
                    return Err(ReplaceError::NotSteadyState {
                        cause: Some(Box::new(e)),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn reclassify(&self, cluster: &Cluster) -> ReplaceResult<Option<Cluster>> {
        match classify(&self.ctx, &cluster.name, &cluster.group).await {
            Ok(next) => Ok(Some(next)),
            Err(ReplaceError::AlreadyConverged { .. }) => {
                info!(cluster = %cluster.name, "converged after reclassification");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use reimage_fleet::{Call, Operation, RegistrationStatus};

    fn request() -> ReplaceRequest {
        ReplaceRequest {
            group: GROUP.to_string(),
            cluster: CLUSTER.to_string(),
            image_filter: "base-*".to_string(),
            owner: "self".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_newest_image_as_target() {
        let fleet = fleet(&[new("i-a", 1)]);
        let mut replacer = Replacer::new(context(&fleet));

        let report = replacer.run(&request()).await.unwrap();
        assert_eq!(report.target_image, NEW);
        assert!(report.converged);
        assert!(fleet.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_image_filter_is_not_found() {
        let fleet = fleet(&[old("i-a", 1)]);
        let mut replacer = Replacer::new(context(&fleet));
        let req = ReplaceRequest {
            image_filter: "other-*".to_string(),
            ..request()
        };

        let err = replacer.run(&req).await.unwrap_err();
        assert!(matches!(err, ReplaceError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn mixed_cluster_ends_on_target_at_original_size() {
        let fleet = fleet(&[old("i-idle", 0), old("i-busy", 1), old("i-work", 1)]);
        let mut replacer = Replacer::new(context(&fleet));

        let report = replacer.run(&request()).await.unwrap();

        assert_eq!(report.default_size, 3);
        assert_eq!(report.final_size, 3);
        assert_eq!(report.stopped, vec!["i-idle".to_string()]);
        assert_eq!(report.swapped, vec!["i-busy".to_string(), "i-work".to_string()]);
        assert!(!report.headroom_added);
        assert!(replacer.deployment().is_closed());

        let members = fleet.members(GROUP);
        assert_eq!(members.len(), 3);
        for id in &members {
            assert_eq!(fleet.image_of(id).as_deref(), Some(NEW));
        }
        assert_eq!(fleet.running_work(CLUSTER), 2);
    }

    #[test]
    fn headroom_grows_until_more_than_one_above_default() {
        assert_eq!(Headroom::plan(3, 3), Headroom::Grow(4));
        assert_eq!(Headroom::plan(4, 3), Headroom::Grow(5));
        assert_eq!(Headroom::plan(5, 3), Headroom::Await(5));
    }

    #[tokio::test(start_paused = true)]
    async fn draining_member_is_kept_through_the_run() {
        let mut draining = old("i-drain", 1);
        draining.status = RegistrationStatus::Draining;
        let fleet = fleet(&[draining, old("i-busy", 1), new("i-free", 0)]);
        fleet.pin("i-drain");
        let mut replacer = Replacer::new(context(&fleet));

        let report = replacer.run(&request()).await.unwrap();

        assert_eq!(report.default_size, 3);
        assert_eq!(report.final_size, 3);
        assert_eq!(report.swapped, vec!["i-busy".to_string()]);
        assert_eq!(fleet.desired(GROUP), Some(3));
        let members = fleet.members(GROUP);
        assert_eq!(members.len(), 3);
        assert!(members.contains(&"i-drain".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn pre_started_deployment_blocks_the_run() {
        let fleet = fleet(&[old("i-busy", 1), new("i-free", 0)]);
        let mut deploy = Deployment::new();
        deploy.start().unwrap();
        let mut replacer = Replacer::new(context(&fleet)).with_deployment(deploy);

        let err = replacer.run(&request()).await.unwrap_err();
        assert!(matches!(err, ReplaceError::NotSteadyState { cause: None }));
        assert!(fleet.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_stop_propagates_without_restore() {
        let fleet = fleet(&[old("i-idle", 0), old("i-busy", 1)]);
        fleet.fail(Operation::StopInstances);
        let mut replacer = Replacer::new(context(&fleet));

        let err = replacer.run(&request()).await.unwrap_err();
        assert!(matches!(err, ReplaceError::Fleet { .. }));
        assert!(!fleet.calls().iter().any(|c| matches!(c, Call::UpdateGroup { .. })));
    }
}
