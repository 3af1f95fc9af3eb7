//! Fixtures for unit tests.

use std::sync::Arc;

use reimage_fleet::memory::{GroupSpec, InstanceSpec, TemplateSpec};
use reimage_fleet::{Clients, FleetSpec, Image, MemoryFleet, RegistrationStatus, ScalingGroupRef};

use crate::context::RunContext;

pub(crate) const GROUP: &str = "asg";
pub(crate) const CLUSTER: &str = "ecs";
pub(crate) const OLD: &str = "ami-old";
pub(crate) const NEW: &str = "ami-new";

/// Shape of one declared node.
pub(crate) struct NodeDef {
    pub id: &'static str,
    pub outdated: bool,
    pub running: u32,
    pub pending: u32,
    pub status: RegistrationStatus,
}

pub(crate) fn old(id: &'static str, running: u32) -> NodeDef {
    NodeDef {
        id,
        outdated: true,
        running,
        pending: 0,
        status: RegistrationStatus::Active,
    }
}

pub(crate) fn new(id: &'static str, running: u32) -> NodeDef {
    NodeDef {
        id,
        outdated: false,
        running,
        pending: 0,
        status: RegistrationStatus::Active,
    }
}

pub(crate) fn spec(nodes: &[NodeDef]) -> FleetSpec {
    FleetSpec {
        groups: vec![GroupSpec {
            name: GROUP.to_string(),
            cluster: CLUSTER.to_string(),
            min_size: 0,
            max_size: 8,
            desired: None,
            template_id: "lt-1".to_string(),
            template_version: "2".to_string(),
            protect_new: false,
            zones: vec!["sim-1a".to_string(), "sim-1c".to_string()],
        }],
        templates: vec![
            TemplateSpec {
                template_id: "lt-1".to_string(),
                version: "1".to_string(),
                image_id: OLD.to_string(),
            },
            TemplateSpec {
                template_id: "lt-1".to_string(),
                version: "2".to_string(),
                image_id: NEW.to_string(),
            },
        ],
        instances: nodes
            .iter()
            .map(|n| InstanceSpec {
                instance_id: n.id.to_string(),
                group: GROUP.to_string(),
                template_version: Some(if n.outdated { "1" } else { "2" }.to_string()),
                availability_zone: "sim-1a".to_string(),
                running: n.running,
                pending: n.pending,
                status: n.status,
                protected: n.running > 0,
                pinned: false,
                registered: true,
            })
            .collect(),
        images: vec![
            Image {
                image_id: OLD.to_string(),
                name: "base-2024.01".to_string(),
                owner: "self".to_string(),
                creation_date: "2024-01-10T00:00:00.000Z".to_string(),
                snapshot_ids: vec![],
            },
            Image {
                image_id: NEW.to_string(),
                name: "base-2024.06".to_string(),
                owner: "self".to_string(),
                creation_date: "2024-06-10T00:00:00.000Z".to_string(),
                snapshot_ids: vec![],
            },
        ],
        snapshots: vec![],
        volumes: vec![],
    }
}

pub(crate) fn fleet(nodes: &[NodeDef]) -> Arc<MemoryFleet> {
    Arc::new(MemoryFleet::from_spec(spec(nodes)).unwrap())
}

pub(crate) fn context(fleet: &Arc<MemoryFleet>) -> RunContext {
    RunContext::new(Clients::from_provider(fleet.clone()))
}

pub(crate) fn group_ref() -> ScalingGroupRef {
    ScalingGroupRef::new(GROUP, NEW)
}
