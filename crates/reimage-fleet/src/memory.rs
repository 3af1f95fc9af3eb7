//! MemoryFleet — an in-process simulated provider.
//!
//! Implements every collaborator trait over a single mutex-guarded
//! state. Every describe call first advances the simulation by one tick:
//!
//! - stopping instances settle to stopped, and halted instances lose
//!   their cluster registration;
//! - each scaling group drops halted members, then scales in (unprotected,
//!   idle, oldest first) or launches replacements up to `desired`;
//! - running work on draining nodes moves onto idle active nodes, one
//!   unit per idle node, unless the draining node is pinned.
//!
//! Mutating calls are recorded in a call log so tests can assert on what
//! the engine asked for. Failures can be injected per operation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::*;
use crate::error::{FleetError, FleetResult};
use crate::types::*;

// ── Fleet description ──────────────────────────────────────────────

/// Serializable description of a simulated fleet (TOML).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetSpec {
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
    #[serde(default)]
    pub templates: Vec<TemplateSpec>,
    #[serde(default)]
    pub instances: Vec<InstanceSpec>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    /// Cluster that members of this group register with.
    pub cluster: String,
    pub min_size: u32,
    pub max_size: u32,
    /// Defaults to the number of declared member instances.
    #[serde(default)]
    pub desired: Option<u32>,
    pub template_id: String,
    /// Template version new members launch from.
    pub template_version: String,
    #[serde(default)]
    pub protect_new: bool,
    #[serde(default = "default_zones")]
    pub zones: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub template_id: String,
    pub version: String,
    pub image_id: ImageId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub instance_id: InstanceId,
    pub group: String,
    /// Defaults to the group's current template version.
    #[serde(default)]
    pub template_version: Option<String>,
    #[serde(default = "default_zone")]
    pub availability_zone: String,
    #[serde(default)]
    pub running: u32,
    #[serde(default)]
    pub pending: u32,
    #[serde(default)]
    pub status: RegistrationStatus,
    #[serde(default)]
    pub protected: bool,
    /// Work on a pinned node never migrates away when it drains.
    #[serde(default)]
    pub pinned: bool,
    #[serde(default = "default_true")]
    pub registered: bool,
}

fn default_zones() -> Vec<String> {
    vec!["sim-1a".to_string(), "sim-1c".to_string()]
}

fn default_zone() -> String {
    "sim-1a".to_string()
}

fn default_true() -> bool {
    true
}

impl FleetSpec {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

// ── Operations and call log ────────────────────────────────────────

/// A collaborator operation, used for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    DescribeGroup,
    DescribeGroupInstance,
    UpdateGroup,
    SetScaleInProtection,
    DescribeInstances,
    StopInstances,
    DescribeLaunchTemplate,
    ListNodes,
    DescribeNodes,
    SetNodeStatus,
    DescribeImages,
    DeregisterImage,
    DescribeSnapshots,
    DescribeVolumes,
    DeleteSnapshot,
}

/// A recorded mutating call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    UpdateGroup {
        group: String,
        desired: u32,
        dry_run: bool,
    },
    SetScaleInProtection {
        instance_id: InstanceId,
        protect: bool,
        dry_run: bool,
    },
    StopInstances {
        ids: Vec<InstanceId>,
        dry_run: bool,
    },
    SetNodeStatus {
        arn: String,
        status: RegistrationStatus,
        dry_run: bool,
    },
    DeregisterImage {
        image_id: ImageId,
        dry_run: bool,
    },
    DeleteSnapshot {
        snapshot_id: String,
        dry_run: bool,
    },
}

impl Call {
    pub fn is_dry_run(&self) -> bool {
        match self {
            Self::UpdateGroup { dry_run, .. }
            | Self::SetScaleInProtection { dry_run, .. }
            | Self::StopInstances { dry_run, .. }
            | Self::SetNodeStatus { dry_run, .. }
            | Self::DeregisterImage { dry_run, .. }
            | Self::DeleteSnapshot { dry_run, .. } => *dry_run,
        }
    }
}

// ── Simulation state ───────────────────────────────────────────────

struct GroupState {
    cluster: String,
    desired: u32,
    min_size: u32,
    max_size: u32,
    protect_new: bool,
    template_id: String,
    template_version: String,
    zones: Vec<String>,
    next_zone: usize,
    /// Member ids in launch order.
    members: Vec<InstanceId>,
}

struct InstanceRecord {
    group: String,
    availability_zone: String,
    state: InstanceState,
    template_version: String,
    protected: bool,
    pinned: bool,
}

struct Registration {
    arn: String,
    instance_id: InstanceId,
    status: RegistrationStatus,
    running: u32,
    pending: u32,
}

impl Registration {
    fn accepts_work(&self) -> bool {
        self.status == RegistrationStatus::Active && self.running == 0 && self.pending == 0
    }
}

#[derive(Default)]
struct FleetState {
    groups: BTreeMap<String, GroupState>,
    templates: HashMap<(String, String), ImageId>,
    instances: BTreeMap<InstanceId, InstanceRecord>,
    /// cluster name → registrations.
    registrations: BTreeMap<String, Vec<Registration>>,
    images: Vec<Image>,
    snapshots: Vec<Snapshot>,
    volumes: Vec<Volume>,
    failing: HashSet<Operation>,
    calls: Vec<Call>,
    launched: u64,
}

fn node_arn(cluster: &str, instance_id: &str) -> String {
    format!("arn:sim:cluster:container-instance/{cluster}/{instance_id}")
}

impl FleetState {
    fn check(&self, op: Operation) -> FleetResult<()> {
        if self.failing.contains(&op) {
            return Err(FleetError::Api(format!("injected failure in {op:?}")));
        }
        Ok(())
    }

    fn tick(&mut self) {
        for inst in self.instances.values_mut() {
            if inst.state == InstanceState::Stopping {
                inst.state = InstanceState::Stopped;
            } else if inst.state == InstanceState::ShuttingDown {
                inst.state = InstanceState::Terminated;
            }
        }
        let halted: Vec<InstanceId> = self
            .instances
            .iter()
            .filter(|(_, inst)| inst.state.is_halted())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &halted {
            self.deregister(id);
        }

        let names: Vec<String> = self.groups.keys().cloned().collect();
        for name in &names {
            self.heal_group(name);
        }

        self.migrate_draining();
    }

    fn heal_group(&mut self, name: &str) {
        let instances = &self.instances;
        let Some(group) = self.groups.get_mut(name) else {
            return;
        };
        group
            .members
            .retain(|id| instances.get(id).is_some_and(|i| !i.state.is_halted()));

        let desired = group.desired as usize;
        let current = group.members.len();
        if current > desired {
            for victim in self.scale_in_victims(name, current - desired) {
                self.terminate(&victim);
            }
        } else {
            for _ in current..desired {
                self.launch(name);
            }
        }
    }

    /// Unprotected members, idle ones first, oldest first within each class.
    fn scale_in_victims(&self, name: &str, count: usize) -> Vec<InstanceId> {
        let Some(group) = self.groups.get(name) else {
            return Vec::new();
        };
        let mut candidates: Vec<(bool, usize, &InstanceId)> = group
            .members
            .iter()
            .enumerate()
            .filter(|(_, id)| self.instances.get(*id).is_some_and(|i| !i.protected))
            .map(|(order, id)| (!self.is_idle(&group.cluster, id), order, id))
            .collect();
        candidates.sort();
        candidates
            .into_iter()
            .take(count)
            .map(|(_, _, id)| id.clone())
            .collect()
    }

    fn is_idle(&self, cluster: &str, instance_id: &str) -> bool {
        self.registrations
            .get(cluster)
            .and_then(|regs| regs.iter().find(|r| r.instance_id == instance_id))
            .is_none_or(|r| r.running == 0 && r.pending == 0)
    }

    fn terminate(&mut self, instance_id: &str) {
        if let Some(inst) = self.instances.get_mut(instance_id) {
            inst.state = InstanceState::Terminated;
            if let Some(group) = self.groups.get_mut(&inst.group) {
                group.members.retain(|id| id != instance_id);
            }
        }
        self.deregister(instance_id);
        debug!(instance = %instance_id, "simulated scale-in termination");
    }

    fn launch(&mut self, name: &str) {
        self.launched += 1;
        let instance_id = format!("i-sim{:06}", self.launched);
        let Some(group) = self.groups.get_mut(name) else {
            return;
        };
        let availability_zone = if group.zones.is_empty() {
            default_zone()
        } else {
            group.zones[group.next_zone % group.zones.len()].clone()
        };
        group.next_zone += 1;
        group.members.push(instance_id.clone());
        let cluster = group.cluster.clone();

        self.instances.insert(
            instance_id.clone(),
            InstanceRecord {
                group: name.to_string(),
                availability_zone,
                state: InstanceState::Running,
                template_version: group.template_version.clone(),
                protected: group.protect_new,
                pinned: false,
            },
        );
        self.registrations
            .entry(cluster.clone())
            .or_default()
            .push(Registration {
                arn: node_arn(&cluster, &instance_id),
                instance_id: instance_id.clone(),
                status: RegistrationStatus::Active,
                running: 0,
                pending: 0,
            });
        debug!(group = %name, instance = %instance_id, "simulated launch");
    }

    /// Remove a registration, rescheduling its work onto idle nodes.
    fn deregister(&mut self, instance_id: &str) {
        for regs in self.registrations.values_mut() {
            let Some(pos) = regs.iter().position(|r| r.instance_id == instance_id) else {
                continue;
            };
            let removed = regs.remove(pos);
            let mut orphaned = removed.running;
            while orphaned > 0 {
                let Some(target) = regs.iter_mut().find(|r| r.accepts_work()) else {
                    break;
                };
                target.running += 1;
                orphaned -= 1;
            }
        }
    }

    fn migrate_draining(&mut self) {
        let instances = &self.instances;
        for regs in self.registrations.values_mut() {
            for i in 0..regs.len() {
                if regs[i].status != RegistrationStatus::Draining || regs[i].running == 0 {
                    continue;
                }
                if instances.get(&regs[i].instance_id).is_some_and(|inst| inst.pinned) {
                    continue;
                }
                while regs[i].running > 0 {
                    let Some(j) = regs.iter().position(Registration::accepts_work) else {
                        break;
                    };
                    regs[i].running -= 1;
                    regs[j].running += 1;
                }
            }
        }
    }

    fn registration(&self, cluster: &str, arn: &str) -> Option<&Registration> {
        self.registrations
            .get(cluster)
            .and_then(|regs| regs.iter().find(|r| r.arn == arn))
    }

    fn knows_cluster(&self, cluster: &str) -> bool {
        self.registrations.contains_key(cluster)
            || self.groups.values().any(|g| g.cluster == cluster)
    }
}

/// Translate a `*` wildcard filter into an anchored regex.
fn name_filter(filter: &str) -> FleetResult<Regex> {
    let pattern = filter
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{pattern}$"))
        .map_err(|e| FleetError::InvalidRequest(format!("bad name filter {filter:?}: {e}")))
}

// ── MemoryFleet ────────────────────────────────────────────────────

/// Simulated provider implementing every collaborator trait.
pub struct MemoryFleet {
    inner: Mutex<FleetState>,
}

impl MemoryFleet {
    /// Build a fleet from its description.
    pub fn from_spec(spec: FleetSpec) -> FleetResult<Self> {
        let mut state = FleetState::default();

        for t in spec.templates {
            state.templates.insert((t.template_id, t.version), t.image_id);
        }

        let mut declared_desired = HashSet::new();
        for g in spec.groups {
            if g.desired.is_some() {
                declared_desired.insert(g.name.clone());
            }
            if g.min_size > g.max_size {
                return Err(FleetError::InvalidRequest(format!(
                    "group {}: min_size {} exceeds max_size {}",
                    g.name, g.min_size, g.max_size
                )));
            }
            state.groups.insert(
                g.name.clone(),
                GroupState {
                    cluster: g.cluster,
                    desired: g.desired.unwrap_or(0),
                    min_size: g.min_size,
                    max_size: g.max_size,
                    protect_new: g.protect_new,
                    template_id: g.template_id,
                    template_version: g.template_version,
                    zones: g.zones,
                    next_zone: 0,
                    members: Vec::new(),
                },
            );
        }

        for inst in spec.instances {
            let group = state.groups.get_mut(&inst.group).ok_or_else(|| {
                FleetError::InvalidRequest(format!(
                    "instance {} references unknown group {}",
                    inst.instance_id, inst.group
                ))
            })?;
            let version = inst
                .template_version
                .unwrap_or_else(|| group.template_version.clone());
            if !state
                .templates
                .contains_key(&(group.template_id.clone(), version.clone()))
            {
                return Err(FleetError::InvalidRequest(format!(
                    "instance {} uses unknown template version {}",
                    inst.instance_id, version
                )));
            }
            group.members.push(inst.instance_id.clone());
            if !declared_desired.contains(&inst.group) {
                group.desired += 1;
            }
            if inst.registered {
                state
                    .registrations
                    .entry(group.cluster.clone())
                    .or_default()
                    .push(Registration {
                        arn: node_arn(&group.cluster, &inst.instance_id),
                        instance_id: inst.instance_id.clone(),
                        status: inst.status,
                        running: inst.running,
                        pending: inst.pending,
                    });
            }
            state.instances.insert(
                inst.instance_id,
                InstanceRecord {
                    group: inst.group,
                    availability_zone: inst.availability_zone,
                    state: InstanceState::Running,
                    template_version: version,
                    protected: inst.protected,
                    pinned: inst.pinned,
                },
            );
        }

        state.images = spec.images;
        state.snapshots = spec.snapshots;
        state.volumes = spec.volumes;

        Ok(Self {
            inner: Mutex::new(state),
        })
    }

    fn state(&self) -> MutexGuard<'_, FleetState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent call of `op` fail.
    pub fn fail(&self, op: Operation) {
        self.state().failing.insert(op);
    }

    /// Stop failing `op`.
    pub fn recover(&self, op: Operation) {
        self.state().failing.remove(&op);
    }

    /// Keep work on this node from migrating when it drains.
    pub fn pin(&self, instance_id: &str) {
        if let Some(inst) = self.state().instances.get_mut(instance_id) {
            inst.pinned = true;
        }
    }

    /// Recorded mutating calls, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn desired(&self, group: &str) -> Option<u32> {
        self.state().groups.get(group).map(|g| g.desired)
    }

    /// Member count after letting the simulation settle one tick.
    pub fn group_size(&self, group: &str) -> Option<usize> {
        let mut state = self.state();
        state.tick();
        state.groups.get(group).map(|g| g.members.len())
    }

    pub fn members(&self, group: &str) -> Vec<InstanceId> {
        self.state()
            .groups
            .get(group)
            .map(|g| g.members.clone())
            .unwrap_or_default()
    }

    pub fn instance_state(&self, instance_id: &str) -> Option<InstanceState> {
        self.state().instances.get(instance_id).map(|i| i.state)
    }

    pub fn is_protected(&self, instance_id: &str) -> Option<bool> {
        self.state().instances.get(instance_id).map(|i| i.protected)
    }

    /// Image the instance was launched with.
    pub fn image_of(&self, instance_id: &str) -> Option<ImageId> {
        let state = self.state();
        let inst = state.instances.get(instance_id)?;
        let group = state.groups.get(&inst.group)?;
        state
            .templates
            .get(&(group.template_id.clone(), inst.template_version.clone()))
            .cloned()
    }

    /// Total running work units registered in a cluster.
    pub fn running_work(&self, cluster: &str) -> u32 {
        self.state()
            .registrations
            .get(cluster)
            .map(|regs| regs.iter().map(|r| r.running).sum())
            .unwrap_or(0)
    }

    pub fn image_ids(&self) -> Vec<ImageId> {
        self.state().images.iter().map(|i| i.image_id.clone()).collect()
    }

    pub fn snapshot_ids(&self) -> Vec<String> {
        self.state()
            .snapshots
            .iter()
            .map(|s| s.snapshot_id.clone())
            .collect()
    }
}

#[async_trait]
impl ScalingGroupClient for MemoryFleet {
    async fn describe_group(&self, name: &str) -> FleetResult<GroupDescription> {
        let mut state = self.state();
        state.check(Operation::DescribeGroup)?;
        state.tick();
        let group = state
            .groups
            .get(name)
            .ok_or_else(|| FleetError::NotFound(format!("scaling group {name}")))?;
        let members = group
            .members
            .iter()
            .map(|id| GroupMember {
                instance_id: id.clone(),
                protected_from_scale_in: state.instances.get(id).is_some_and(|i| i.protected),
            })
            .collect();
        Ok(GroupDescription {
            name: name.to_string(),
            desired: group.desired,
            min_size: group.min_size,
            max_size: group.max_size,
            protect_new: group.protect_new,
            members,
        })
    }

    async fn describe_instance(&self, instance_id: &str) -> FleetResult<LaunchTemplateRef> {
        let state = self.state();
        state.check(Operation::DescribeGroupInstance)?;
        let inst = state
            .instances
            .get(instance_id)
            .ok_or_else(|| FleetError::NotFound(format!("group instance {instance_id}")))?;
        let group = state
            .groups
            .get(&inst.group)
            .ok_or_else(|| FleetError::NotFound(format!("scaling group {}", inst.group)))?;
        Ok(LaunchTemplateRef {
            template_id: group.template_id.clone(),
            version: inst.template_version.clone(),
        })
    }

    async fn update_group(
        &self,
        name: &str,
        update: &GroupUpdate,
        dry_run: bool,
    ) -> FleetResult<()> {
        let mut state = self.state();
        state.check(Operation::UpdateGroup)?;
        if !state.groups.contains_key(name) {
            return Err(FleetError::NotFound(format!("scaling group {name}")));
        }
        if update.min_size > update.desired || update.desired > update.max_size {
            return Err(FleetError::InvalidRequest(format!(
                "desired {} outside [{}, {}]",
                update.desired, update.min_size, update.max_size
            )));
        }
        state.calls.push(Call::UpdateGroup {
            group: name.to_string(),
            desired: update.desired,
            dry_run,
        });
        if dry_run {
            return Ok(());
        }
        if let Some(group) = state.groups.get_mut(name) {
            group.desired = update.desired;
            group.min_size = update.min_size;
            group.max_size = update.max_size;
            group.protect_new = update.protect_new;
        }
        Ok(())
    }

    async fn set_scale_in_protection(
        &self,
        group: &str,
        instance_id: &str,
        protect: bool,
        dry_run: bool,
    ) -> FleetResult<()> {
        let mut state = self.state();
        state.check(Operation::SetScaleInProtection)?;
        let is_member = state
            .groups
            .get(group)
            .is_some_and(|g| g.members.iter().any(|id| id == instance_id));
        if !is_member {
            return Err(FleetError::InvalidRequest(format!(
                "instance {instance_id} is not a member of {group}"
            )));
        }
        state.calls.push(Call::SetScaleInProtection {
            instance_id: instance_id.to_string(),
            protect,
            dry_run,
        });
        if !dry_run && let Some(inst) = state.instances.get_mut(instance_id) {
            inst.protected = protect;
        }
        Ok(())
    }
}

#[async_trait]
impl ComputeClient for MemoryFleet {
    async fn describe_instances(&self, ids: &[InstanceId]) -> FleetResult<Vec<InstanceDescription>> {
        let mut state = self.state();
        state.check(Operation::DescribeInstances)?;
        state.tick();
        ids.iter()
            .map(|id| {
                state
                    .instances
                    .get(id)
                    .map(|inst| InstanceDescription {
                        instance_id: id.clone(),
                        availability_zone: inst.availability_zone.clone(),
                        state: inst.state,
                    })
                    .ok_or_else(|| FleetError::NotFound(format!("instance {id}")))
            })
            .collect()
    }

    async fn stop_instances(&self, ids: &[InstanceId], dry_run: bool) -> FleetResult<()> {
        let mut state = self.state();
        state.check(Operation::StopInstances)?;
        if let Some(missing) = ids.iter().find(|id| !state.instances.contains_key(*id)) {
            return Err(FleetError::NotFound(format!("instance {missing}")));
        }
        state.calls.push(Call::StopInstances {
            ids: ids.to_vec(),
            dry_run,
        });
        if dry_run {
            return Ok(());
        }
        for id in ids {
            if let Some(inst) = state.instances.get_mut(id)
                && matches!(inst.state, InstanceState::Pending | InstanceState::Running)
            {
                inst.state = InstanceState::Stopping;
            }
        }
        Ok(())
    }

    async fn describe_launch_template_version(
        &self,
        template_id: &str,
        version: &str,
    ) -> FleetResult<ImageId> {
        let state = self.state();
        state.check(Operation::DescribeLaunchTemplate)?;
        state
            .templates
            .get(&(template_id.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| {
                FleetError::NotFound(format!("launch template {template_id} version {version}"))
            })
    }
}

#[async_trait]
impl ClusterClient for MemoryFleet {
    async fn list_registered_nodes(&self, cluster: &str) -> FleetResult<Vec<String>> {
        let mut state = self.state();
        state.check(Operation::ListNodes)?;
        if !state.knows_cluster(cluster) {
            return Err(FleetError::NotFound(format!("cluster {cluster}")));
        }
        state.tick();
        Ok(state
            .registrations
            .get(cluster)
            .map(|regs| regs.iter().map(|r| r.arn.clone()).collect())
            .unwrap_or_default())
    }

    async fn describe_nodes(&self, cluster: &str, arns: &[String]) -> FleetResult<Vec<NodeStatus>> {
        let mut state = self.state();
        state.check(Operation::DescribeNodes)?;
        state.tick();
        Ok(arns
            .iter()
            .filter_map(|arn| state.registration(cluster, arn))
            .map(|r| NodeStatus {
                instance_id: r.instance_id.clone(),
                arn: r.arn.clone(),
                status: r.status,
                running_count: r.running,
                pending_count: r.pending,
            })
            .collect())
    }

    async fn set_node_status(
        &self,
        cluster: &str,
        arn: &str,
        status: RegistrationStatus,
        dry_run: bool,
    ) -> FleetResult<()> {
        let mut state = self.state();
        state.check(Operation::SetNodeStatus)?;
        if state.registration(cluster, arn).is_none() {
            return Err(FleetError::NotFound(format!("container instance {arn}")));
        }
        state.calls.push(Call::SetNodeStatus {
            arn: arn.to_string(),
            status,
            dry_run,
        });
        if dry_run {
            return Ok(());
        }
        if let Some(reg) = state
            .registrations
            .get_mut(cluster)
            .and_then(|regs| regs.iter_mut().find(|r| r.arn == arn))
        {
            reg.status = status;
        }
        Ok(())
    }
}

#[async_trait]
impl ImageClient for MemoryFleet {
    async fn describe_images(&self, owner: &str, name_filter_str: &str) -> FleetResult<Vec<Image>> {
        let state = self.state();
        state.check(Operation::DescribeImages)?;
        let filter = name_filter(name_filter_str)?;
        Ok(state
            .images
            .iter()
            .filter(|i| i.owner == owner && filter.is_match(&i.name))
            .cloned()
            .collect())
    }

    async fn deregister_image(&self, image_id: &str, dry_run: bool) -> FleetResult<()> {
        let mut state = self.state();
        state.check(Operation::DeregisterImage)?;
        if !state.images.iter().any(|i| i.image_id == image_id) {
            return Err(FleetError::NotFound(format!("image {image_id}")));
        }
        state.calls.push(Call::DeregisterImage {
            image_id: image_id.to_string(),
            dry_run,
        });
        if !dry_run {
            state.images.retain(|i| i.image_id != image_id);
        }
        Ok(())
    }

    async fn describe_snapshots(&self, owner: &str) -> FleetResult<Vec<Snapshot>> {
        let state = self.state();
        state.check(Operation::DescribeSnapshots)?;
        Ok(state
            .snapshots
            .iter()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect())
    }

    async fn images_using_snapshot(&self, snapshot_id: &str) -> FleetResult<Vec<Image>> {
        let state = self.state();
        state.check(Operation::DescribeImages)?;
        Ok(state
            .images
            .iter()
            .filter(|i| i.snapshot_ids.iter().any(|s| s == snapshot_id))
            .cloned()
            .collect())
    }

    async fn volumes_from_snapshot(&self, snapshot_id: &str) -> FleetResult<Vec<Volume>> {
        let state = self.state();
        state.check(Operation::DescribeVolumes)?;
        Ok(state
            .volumes
            .iter()
            .filter(|v| v.snapshot_id.as_deref() == Some(snapshot_id))
            .cloned()
            .collect())
    }

    async fn delete_snapshot(&self, snapshot_id: &str, dry_run: bool) -> FleetResult<()> {
        let mut state = self.state();
        state.check(Operation::DeleteSnapshot)?;
        if !state.snapshots.iter().any(|s| s.snapshot_id == snapshot_id) {
            return Err(FleetError::NotFound(format!("snapshot {snapshot_id}")));
        }
        state.calls.push(Call::DeleteSnapshot {
            snapshot_id: snapshot_id.to_string(),
            dry_run,
        });
        if !dry_run {
            state.snapshots.retain(|s| s.snapshot_id != snapshot_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLEET: &str = r#"
[[groups]]
name = "asg"
cluster = "ecs"
min_size = 1
max_size = 4
template_id = "lt-1"
template_version = "2"

[[templates]]
template_id = "lt-1"
version = "1"
image_id = "ami-old"

[[templates]]
template_id = "lt-1"
version = "2"
image_id = "ami-new"

[[instances]]
instance_id = "i-old"
group = "asg"
template_version = "1"
running = 1

[[instances]]
instance_id = "i-new"
group = "asg"
"#;

    fn fleet() -> MemoryFleet {
        MemoryFleet::from_spec(FleetSpec::from_toml_str(FLEET).unwrap()).unwrap()
    }

    #[test]
    fn desired_defaults_to_declared_members() {
        let fleet = fleet();
        assert_eq!(fleet.desired("asg"), Some(2));
        assert_eq!(fleet.image_of("i-old").as_deref(), Some("ami-old"));
        assert_eq!(fleet.image_of("i-new").as_deref(), Some("ami-new"));
    }

    #[test]
    fn name_filter_wildcards() {
        let re = name_filter("base-*").unwrap();
        assert!(re.is_match("base-2024"));
        assert!(!re.is_match("other-base-2024"));
        let exact = name_filter("a.b").unwrap();
        assert!(exact.is_match("a.b"));
        assert!(!exact.is_match("axb"));
    }

    #[tokio::test]
    async fn stopped_member_is_replaced_on_next_describe() {
        let fleet = fleet();
        fleet.stop_instances(&["i-new".to_string()], false).await.unwrap();

        let desc = fleet.describe_group("asg").await.unwrap();
        assert_eq!(desc.size(), 2);
        assert!(!desc.contains("i-new"));
        assert_eq!(fleet.instance_state("i-new"), Some(InstanceState::Stopped));
    }

    #[tokio::test]
    async fn draining_work_moves_to_idle_node() {
        let fleet = fleet();
        let arn = node_arn("ecs", "i-old");
        fleet
            .set_node_status("ecs", &arn, RegistrationStatus::Draining, false)
            .await
            .unwrap();

        let nodes = fleet.describe_nodes("ecs", &[arn]).await.unwrap();
        assert_eq!(nodes[0].running_count, 0);
        assert_eq!(fleet.running_work("ecs"), 1);
    }

    #[tokio::test]
    async fn pinned_node_never_drains() {
        let fleet = fleet();
        fleet.pin("i-old");
        let arn = node_arn("ecs", "i-old");
        fleet
            .set_node_status("ecs", &arn, RegistrationStatus::Draining, false)
            .await
            .unwrap();

        let nodes = fleet.describe_nodes("ecs", &[arn]).await.unwrap();
        assert_eq!(nodes[0].running_count, 1);
    }

    #[tokio::test]
    async fn scale_in_prefers_idle_unprotected_members() {
        let fleet = fleet();
        let update = GroupUpdate {
            desired: 1,
            min_size: 1,
            max_size: 4,
            protect_new: false,
        };
        fleet.update_group("asg", &update, false).await.unwrap();

        let desc = fleet.describe_group("asg").await.unwrap();
        assert_eq!(desc.size(), 1);
        assert!(desc.contains("i-old"));
    }

    #[tokio::test]
    async fn dry_run_records_without_applying() {
        let fleet = fleet();
        fleet.stop_instances(&["i-old".to_string()], true).await.unwrap();

        assert_eq!(fleet.instance_state("i-old"), Some(InstanceState::Running));
        assert_eq!(
            fleet.calls(),
            vec![Call::StopInstances {
                ids: vec!["i-old".to_string()],
                dry_run: true
            }]
        );
    }

    #[tokio::test]
    async fn update_outside_bounds_is_rejected() {
        let fleet = fleet();
        let update = GroupUpdate {
            desired: 9,
            min_size: 1,
            max_size: 4,
            protect_new: false,
        };
        let err = fleet.update_group("asg", &update, false).await.unwrap_err();
        assert!(matches!(err, FleetError::InvalidRequest(_)));
        assert!(fleet.calls().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_surface_as_api_errors() {
        let fleet = fleet();
        fleet.fail(Operation::ListNodes);
        assert!(matches!(
            fleet.list_registered_nodes("ecs").await,
            Err(FleetError::Api(_))
        ));
        fleet.recover(Operation::ListNodes);
        assert_eq!(fleet.list_registered_nodes("ecs").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_cluster_is_not_found() {
        let fleet = fleet();
        assert!(matches!(
            fleet.list_registered_nodes("nope").await,
            Err(FleetError::NotFound(_))
        ));
    }
}
