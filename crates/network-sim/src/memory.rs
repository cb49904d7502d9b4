//! In-memory traffic-control backend for tests
//!
//! Models the kernel rules the hierarchy manager depends on: one root qdisc
//! per device, parents must exist before children, deleting an absent root
//! fails, and every table is rendered back in `tc ... show` format so the
//! parsing path is exercised as well.

use crate::backend::TcBackend;
use crate::ops::{Handle, HtbClassSpec, Parent, PortFilterSpec, QdiscSpec, TcObject, TcOp};
use crate::types::QdiscError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct QdiscNode {
    handle: Handle,
    parent: Parent,
    spec: QdiscSpec,
}

#[derive(Debug, Clone)]
struct ClassNode {
    classid: Handle,
    spec: HtbClassSpec,
}

#[derive(Debug, Clone, Default)]
struct DeviceTables {
    qdiscs: Vec<QdiscNode>,
    classes: Vec<ClassNode>,
    filters: Vec<(Handle, PortFilterSpec)>,
}

impl DeviceTables {
    fn root(&self) -> Option<&QdiscNode> {
        self.qdiscs.iter().find(|q| q.parent == Parent::Root)
    }

    fn has_parent(&self, parent: Handle) -> bool {
        if parent.minor == 0 {
            self.qdiscs.iter().any(|q| q.handle == parent)
        } else {
            self.classes.iter().any(|c| c.classid == parent)
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    devices: HashMap<String, DeviceTables>,
    log: Vec<String>,
    failures: VecDeque<(String, String)>,
    next_auto_handle: u16,
}

/// Shared, cloneable in-memory tc state
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    /// Backend with the given devices present and unshaped
    pub fn with_devices(devices: &[&str]) -> Self {
        let backend = Self::default();
        for dev in devices {
            backend.add_device(dev);
        }
        backend
    }

    pub fn add_device(&self, dev: &str) {
        self.inner
            .lock()
            .devices
            .insert(dev.to_string(), DeviceTables::default());
    }

    /// Simulate the device disappearing (unplugged, renamed)
    pub fn remove_device(&self, dev: &str) {
        self.inner.lock().devices.remove(dev);
    }

    /// Make the next mutation fail as if `tc` printed `stderr`
    pub fn fail_next(&self, stderr: &str) {
        self.fail_on("", stderr);
    }

    /// Fail the next mutation whose command line contains `fragment`
    pub fn fail_on(&self, fragment: &str, stderr: &str) {
        self.inner
            .lock()
            .failures
            .push_back((fragment.to_string(), stderr.to_string()));
    }

    /// Every mutation attempted so far, as `tc` command lines
    pub fn commands(&self) -> Vec<String> {
        self.inner.lock().log.clone()
    }

    pub fn clear_commands(&self) {
        self.inner.lock().log.clear();
    }

    /// Whether anything besides default queueing is installed on `dev`
    pub fn has_hierarchy(&self, dev: &str) -> bool {
        self.inner
            .lock()
            .devices
            .get(dev)
            .map(|t| !t.qdiscs.is_empty())
            .unwrap_or(false)
    }

    fn apply(inner: &mut Inner, dev: &str, op: &TcOp) -> Result<(), QdiscError> {
        let command = op.command_line(dev);
        inner.log.push(command.clone());
        if let Some(pos) = inner
            .failures
            .iter()
            .position(|(fragment, _)| command.contains(fragment.as_str()))
        {
            if let Some((_, stderr)) = inner.failures.remove(pos) {
                return Err(QdiscError::Rejected { command, stderr });
            }
        }
        let reject = |stderr: &str| QdiscError::Rejected {
            command: command.clone(),
            stderr: stderr.to_string(),
        };

        if !inner.devices.contains_key(dev) {
            return Err(QdiscError::InterfaceNotFound(dev.to_string()));
        }
        let auto_handle = Handle::qdisc(0x8001u16.wrapping_add(inner.next_auto_handle));
        let tables = inner
            .devices
            .get_mut(dev)
            .ok_or_else(|| QdiscError::InterfaceNotFound(dev.to_string()))?;

        match op {
            TcOp::AddQdisc {
                parent,
                handle,
                qdisc,
            } => {
                match parent {
                    Parent::Root if tables.root().is_some() => {
                        return Err(reject("Error: Exclusivity flag on, cannot modify."));
                    }
                    Parent::Handle(p) if !tables.has_parent(*p) => {
                        return Err(reject("Error: Failed to find qdisc with specified classid."));
                    }
                    Parent::Handle(_) if tables.qdiscs.iter().any(|q| q.parent == *parent) => {
                        return Err(reject("Error: Exclusivity flag on, cannot modify."));
                    }
                    _ => {}
                }
                let handle = match handle {
                    Some(h) if tables.qdiscs.iter().any(|q| q.handle == *h) => {
                        return Err(reject("Error: Exclusivity flag on, cannot modify."));
                    }
                    Some(h) => *h,
                    None => auto_handle,
                };
                tables.qdiscs.push(QdiscNode {
                    handle,
                    parent: *parent,
                    spec: qdisc.clone(),
                });
                if handle == auto_handle {
                    inner.next_auto_handle = inner.next_auto_handle.wrapping_add(1);
                }
            }
            TcOp::ChangeQdisc { parent, qdisc } => {
                let node = tables
                    .qdiscs
                    .iter_mut()
                    .find(|q| q.parent == *parent)
                    .ok_or_else(|| QdiscError::NotPresent(dev.to_string()))?;
                if node.spec.kind() != qdisc.kind() {
                    return Err(reject("Error: Invalid qdisc name."));
                }
                node.spec = qdisc.clone();
            }
            TcOp::DeleteRoot => {
                if tables.root().is_none() {
                    return Err(QdiscError::NotPresent(dev.to_string()));
                }
                *tables = DeviceTables::default();
            }
            TcOp::AddClass {
                parent,
                classid,
                class,
            } => {
                let parent_is_htb = tables
                    .qdiscs
                    .iter()
                    .any(|q| q.handle == *parent && q.spec.kind() == "htb");
                if !parent_is_htb || classid.major != parent.major {
                    return Err(reject("Error: Specified class not found."));
                }
                if tables.classes.iter().any(|c| c.classid == *classid) {
                    return Err(reject("RTNETLINK answers: File exists"));
                }
                tables.classes.push(ClassNode {
                    classid: *classid,
                    spec: class.clone(),
                });
            }
            TcOp::AddFilter { parent, filter } => {
                if !tables.qdiscs.iter().any(|q| q.handle == *parent) {
                    return Err(reject("Error: Parent Qdisc doesn't exists."));
                }
                tables.filters.push((*parent, filter.clone()));
            }
        }
        Ok(())
    }

    fn render(tables: &DeviceTables, object: TcObject) -> String {
        let mut out = String::new();
        match object {
            TcObject::Qdisc => {
                if tables.qdiscs.is_empty() {
                    out.push_str("qdisc fq_codel 0: root refcnt 2 limit 10240p flows 1024 quantum 1514 target 5ms interval 100ms memory_limit 32Mb ecn drop_batch 64\n");
                }
                for q in &tables.qdiscs {
                    let _ = write!(out, "qdisc {} {} {}", q.spec.kind(), q.handle, q.parent);
                    if q.parent == Parent::Root {
                        out.push_str(" refcnt 2");
                    }
                    match &q.spec {
                        QdiscSpec::Netem(netem) => {
                            out.push_str(" limit 1000");
                            if !netem.delay.is_zero() {
                                let _ = write!(out, " delay {}", netem.delay.to_tc_arg());
                                if let Some(jitter) = netem.jitter.filter(|j| !j.is_zero()) {
                                    let _ = write!(out, "  {}", jitter.to_tc_arg());
                                }
                            }
                            for (keyword, value) in [
                                ("loss", Some(netem.loss)),
                                ("corrupt", netem.corrupt),
                                ("reorder", netem.reorder),
                                ("duplicate", netem.duplicate),
                            ] {
                                if let Some(value) = value.filter(|v| !v.is_zero()) {
                                    let _ = write!(out, " {} {}", keyword, value.to_tc_arg());
                                }
                            }
                            if let Some(rate) = netem.rate {
                                let _ = write!(out, " rate {}", rate.to_tc_arg());
                            }
                        }
                        QdiscSpec::Htb { default_class } => {
                            let _ = write!(
                                out,
                                " r2q 10 default {:#x} direct_packets_stat 0 direct_qlen 1000",
                                default_class
                            );
                        }
                        QdiscSpec::Sfq { perturb_secs } => {
                            let _ = write!(
                                out,
                                " limit 127p quantum 1514b depth 127 divisor 1024 perturb {}sec",
                                perturb_secs
                            );
                        }
                    }
                    out.push('\n');
                }
            }
            TcObject::Class => {
                for c in &tables.classes {
                    let leaf = tables
                        .qdiscs
                        .iter()
                        .find(|q| q.parent == Parent::Handle(c.classid))
                        .map(|q| format!(" leaf {}", q.handle))
                        .unwrap_or_default();
                    let _ = writeln!(
                        out,
                        "class htb {} root{} prio 0 rate {} ceil {} burst {}b cburst 1600b",
                        c.classid,
                        leaf,
                        c.spec.rate.to_tc_arg(),
                        c.spec.ceil.to_tc_arg(),
                        c.spec.burst_bytes
                    );
                }
            }
            TcObject::Filter => {
                for (parent, f) in &tables.filters {
                    let _ = writeln!(out, "filter parent {} protocol ip pref {} u32 chain 0", parent, f.prio);
                    let _ = writeln!(
                        out,
                        "filter parent {} protocol ip pref {} u32 chain 0 fh 800: ht divisor 1",
                        parent, f.prio
                    );
                    let _ = writeln!(
                        out,
                        "filter parent {} protocol ip pref {} u32 chain 0 fh 800::800 order 2048 key ht 800 bkt 0 flowid {} not_in_hw",
                        parent, f.prio, f.flowid
                    );
                    let _ = writeln!(out, "  match {:08x}/0000ffff at 20", f.dport);
                }
            }
        }
        out
    }
}

#[async_trait]
impl TcBackend for MemoryBackend {
    async fn execute(&self, dev: &str, op: &TcOp) -> Result<(), QdiscError> {
        let mut inner = self.inner.lock();
        Self::apply(&mut inner, dev, op)
    }

    async fn show(&self, dev: &str, object: TcObject) -> Result<String, QdiscError> {
        let inner = self.inner.lock();
        let tables = inner
            .devices
            .get(dev)
            .ok_or_else(|| QdiscError::InterfaceNotFound(dev.to_string()))?;
        Ok(Self::render(tables, object))
    }

    fn delete_root_blocking(&self, dev: &str) -> Result<(), QdiscError> {
        let mut inner = self.inner.lock();
        Self::apply(&mut inner, dev, &TcOp::DeleteRoot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::NetemSpec;
    use scenarios::{Delay, Percent, Rate};

    fn flat_root() -> TcOp {
        TcOp::AddQdisc {
            parent: Parent::Root,
            handle: None,
            qdisc: QdiscSpec::Netem(NetemSpec::flat(
                Rate::mbit(2),
                Delay::from_millis(150),
                Percent::new(3.0),
            )),
        }
    }

    #[tokio::test]
    async fn test_auto_handles_wrap_instead_of_overflowing() {
        let backend = MemoryBackend::with_devices(&["veth0"]);
        backend.inner.lock().next_auto_handle = u16::MAX;

        backend.execute("veth0", &flat_root()).await.unwrap();
        let qdiscs = backend.show("veth0", TcObject::Qdisc).await.unwrap();
        assert!(qdiscs.starts_with("qdisc netem 8000: root"));
        assert_eq!(backend.inner.lock().next_auto_handle, 0);

        backend.execute("veth0", &TcOp::DeleteRoot).await.unwrap();
        backend.execute("veth0", &flat_root()).await.unwrap();
        let qdiscs = backend.show("veth0", TcObject::Qdisc).await.unwrap();
        assert!(qdiscs.starts_with("qdisc netem 8001: root"));
    }
}
