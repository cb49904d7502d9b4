//! Qdisc hierarchy management for traffic control

use crate::backend::{CommandBackend, TcBackend};
use crate::ops::{Handle, HtbClassSpec, NetemSpec, Parent, PortFilterSpec, QdiscSpec, TcObject, TcOp};
use crate::show::{
    layered_observation, managed_root, parse_classes, parse_netem, parse_port_filters,
    parse_qdiscs, HierarchyVariant, ObservedHierarchy,
};
use crate::types::QdiscError;
use log::{debug, info, warn};
use scenarios::{LayeredProfile, Preset, Shaping};
use std::fmt;

const HTB_ROOT: Handle = Handle::qdisc(1);
const HTB_CLASS_MINOR: u16 = 0x10;
const NETEM_HANDLE: Handle = Handle::qdisc(0x10);
const SFQ_HANDLE: Handle = Handle::qdisc(0x100);

/// Desired hierarchy for one interface
#[derive(Debug, Clone, PartialEq)]
pub enum Hierarchy {
    Flat(NetemSpec),
    Layered(LayeredProfile),
}

impl Hierarchy {
    pub fn for_preset(preset: &Preset) -> Self {
        match &preset.shaping {
            Shaping::Flat { rate, delay, loss } => {
                Hierarchy::Flat(NetemSpec::flat(*rate, *delay, *loss))
            }
            Shaping::Layered(profile) => Hierarchy::Layered(profile.clone()),
        }
    }

    pub fn variant(&self) -> HierarchyVariant {
        match self {
            Hierarchy::Flat(_) => HierarchyVariant::Flat,
            Hierarchy::Layered(_) => HierarchyVariant::Layered,
        }
    }
}

/// What an apply call did to the interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Nothing was installed; a new hierarchy was added
    Created,
    /// The existing flat node was changed in place
    Changed,
    /// The requested parameters were already live
    Unchanged,
    /// A different hierarchy was torn down first
    Replaced,
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApplyOutcome::Created => "created",
            ApplyOutcome::Changed => "changed",
            ApplyOutcome::Unchanged => "unchanged",
            ApplyOutcome::Replaced => "replaced",
        })
    }
}

/// Result of removing the root qdisc
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    Removed,
    AlreadyClean,
}

/// Manager for qdisc traffic control
#[derive(Debug, Clone)]
pub struct QdiscManager<B = CommandBackend> {
    backend: B,
}

impl QdiscManager<CommandBackend> {
    pub fn new() -> Self {
        Self {
            backend: CommandBackend::new(),
        }
    }
}

impl Default for QdiscManager<CommandBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: TcBackend> QdiscManager<B> {
    pub fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Read back the hierarchy currently installed on `interface`
    pub async fn query(&self, interface: &str) -> Result<ObservedHierarchy, QdiscError> {
        let qdiscs = parse_qdiscs(&self.backend.show(interface, TcObject::Qdisc).await?)?;
        let Some(root) = managed_root(&qdiscs) else {
            return Ok(ObservedHierarchy::None);
        };

        match root.kind.as_str() {
            "netem" => Ok(ObservedHierarchy::Flat(parse_netem(&root.options)?)),
            "htb" => {
                let classes = parse_classes(&self.backend.show(interface, TcObject::Class).await?)?;
                let filters =
                    parse_port_filters(&self.backend.show(interface, TcObject::Filter).await?);
                let observed = layered_observation(&qdiscs, &classes, &filters, root.handle)?;
                Ok(ObservedHierarchy::Layered(observed))
            }
            other => Ok(ObservedHierarchy::Foreign(other.to_string())),
        }
    }

    /// Bring `interface` to the requested hierarchy
    pub async fn apply(
        &self,
        interface: &str,
        hierarchy: &Hierarchy,
    ) -> Result<ApplyOutcome, QdiscError> {
        match hierarchy {
            Hierarchy::Flat(netem) => self.apply_flat(interface, netem).await,
            Hierarchy::Layered(profile) => self.apply_layered(interface, profile).await,
        }
    }

    /// Install or update a single root netem node.
    ///
    /// An existing flat node is changed in place; any other managed root is
    /// removed first so the two variants never coexist.
    pub async fn apply_flat(
        &self,
        interface: &str,
        netem: &NetemSpec,
    ) -> Result<ApplyOutcome, QdiscError> {
        let add = TcOp::AddQdisc {
            parent: Parent::Root,
            handle: None,
            qdisc: QdiscSpec::Netem(netem.clone()),
        };

        match self.query(interface).await? {
            ObservedHierarchy::Flat(current) if current.matches(netem) => {
                debug!("{} already carries the requested netem parameters", interface);
                Ok(ApplyOutcome::Unchanged)
            }
            ObservedHierarchy::Flat(_) => {
                let change = TcOp::ChangeQdisc {
                    parent: Parent::Root,
                    qdisc: QdiscSpec::Netem(netem.clone()),
                };
                match self.backend.execute(interface, &change).await {
                    Ok(()) => Ok(ApplyOutcome::Changed),
                    Err(QdiscError::NotPresent(_)) => {
                        debug!("Root netem vanished on {}, adding instead", interface);
                        self.backend.execute(interface, &add).await?;
                        Ok(ApplyOutcome::Created)
                    }
                    Err(e) => Err(e),
                }
            }
            ObservedHierarchy::None => {
                self.backend.execute(interface, &add).await?;
                Ok(ApplyOutcome::Created)
            }
            ObservedHierarchy::Layered(_) | ObservedHierarchy::Foreign(_) => {
                info!("Replacing existing hierarchy on {} with flat netem", interface);
                self.teardown(interface).await?;
                self.backend.execute(interface, &add).await?;
                Ok(ApplyOutcome::Replaced)
            }
        }
    }

    /// Rebuild the HTB -> netem -> SFQ chain with its port filter
    pub async fn apply_layered(
        &self,
        interface: &str,
        profile: &LayeredProfile,
    ) -> Result<ApplyOutcome, QdiscError> {
        let outcome = match self.teardown(interface).await? {
            Teardown::Removed => ApplyOutcome::Replaced,
            Teardown::AlreadyClean => ApplyOutcome::Created,
        };

        let class = Handle::new(HTB_ROOT.major, HTB_CLASS_MINOR);
        let chain = [
            TcOp::AddQdisc {
                parent: Parent::Root,
                handle: Some(HTB_ROOT),
                qdisc: QdiscSpec::Htb {
                    default_class: HTB_CLASS_MINOR,
                },
            },
            TcOp::AddClass {
                parent: HTB_ROOT,
                classid: class,
                class: HtbClassSpec {
                    rate: profile.rate,
                    ceil: profile.rate,
                    burst_bytes: profile.burst_bytes,
                },
            },
            TcOp::AddQdisc {
                parent: Parent::Handle(class),
                handle: Some(NETEM_HANDLE),
                qdisc: QdiscSpec::Netem(NetemSpec::low_latency(profile)),
            },
            TcOp::AddQdisc {
                parent: Parent::Handle(NETEM_HANDLE),
                handle: Some(SFQ_HANDLE),
                qdisc: QdiscSpec::Sfq {
                    perturb_secs: profile.perturb_secs,
                },
            },
            TcOp::AddFilter {
                parent: HTB_ROOT,
                filter: PortFilterSpec {
                    prio: 1,
                    dport: profile.steer_port,
                    flowid: class,
                },
            },
        ];

        for op in &chain {
            if let Err(e) = self.backend.execute(interface, op).await {
                warn!("Layered setup failed at `{}`: {}", op.command_line(interface), e);
                // Leave nothing half-built behind
                if let Err(cleanup) = self.teardown(interface).await {
                    warn!("Cleanup after failed layered setup also failed: {}", cleanup);
                }
                return Err(e);
            }
        }
        Ok(outcome)
    }

    /// Remove whatever hierarchy is on `interface`; safe to repeat
    pub async fn teardown(&self, interface: &str) -> Result<Teardown, QdiscError> {
        match self.backend.execute(interface, &TcOp::DeleteRoot).await {
            Ok(()) => {
                debug!("Deleted root qdisc on {}", interface);
                Ok(Teardown::Removed)
            }
            Err(QdiscError::NotPresent(_)) => {
                debug!("No qdisc to delete on {}", interface);
                Ok(Teardown::AlreadyClean)
            }
            Err(e) => Err(e),
        }
    }

    /// [`teardown`](Self::teardown) usable from `Drop` without a runtime
    pub fn teardown_blocking(&self, interface: &str) -> Result<Teardown, QdiscError> {
        match self.backend.delete_root_blocking(interface) {
            Ok(()) => Ok(Teardown::Removed),
            Err(QdiscError::NotPresent(_)) => Ok(Teardown::AlreadyClean),
            Err(e) => Err(e),
        }
    }
}
