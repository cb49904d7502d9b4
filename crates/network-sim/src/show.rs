//! Parsing of `tc ... show` output
//!
//! Turns the qdisc, class and filter tables of an interface back into an
//! [`ObservedHierarchy`] so the live state can be compared with what was
//! commanded.

use crate::ops::{Handle, NetemSpec, Parent};
use crate::types::QdiscError;
use scenarios::{Delay, LayeredProfile, Percent, Rate};

/// One line of `tc qdisc show`
#[derive(Clone, Debug, PartialEq)]
pub struct QdiscEntry {
    pub kind: String,
    pub handle: Handle,
    pub parent: Parent,
    pub options: Vec<String>,
}

/// One line of `tc class show`
#[derive(Clone, Debug, PartialEq)]
pub struct ClassEntry {
    pub kind: String,
    pub classid: Handle,
    pub rate: Option<Rate>,
    pub ceil: Option<Rate>,
}

/// A u32 destination-port match from `tc filter show`
#[derive(Clone, Debug, PartialEq)]
pub struct PortFilterEntry {
    pub dport: u16,
    pub flowid: Option<Handle>,
}

fn parse_handle(token: &str) -> Result<Handle, QdiscError> {
    token.parse().map_err(QdiscError::Parse)
}

pub fn parse_qdiscs(text: &str) -> Result<Vec<QdiscEntry>, QdiscError> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() != Some(&"qdisc") {
            continue;
        }
        if tokens.len() < 4 {
            return Err(QdiscError::Parse(line.to_string()));
        }
        let kind = tokens[1].to_string();
        let handle = parse_handle(tokens[2])?;
        let (parent, rest) = match tokens[3] {
            "root" => (Parent::Root, &tokens[4..]),
            "parent" if tokens.len() > 4 => {
                (Parent::Handle(parse_handle(tokens[4])?), &tokens[5..])
            }
            _ => return Err(QdiscError::Parse(line.to_string())),
        };
        entries.push(QdiscEntry {
            kind,
            handle,
            parent,
            options: rest.iter().map(|t| t.to_string()).collect(),
        });
    }
    Ok(entries)
}

pub fn parse_classes(text: &str) -> Result<Vec<ClassEntry>, QdiscError> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() != Some(&"class") || tokens.len() < 3 {
            continue;
        }
        let value_after = |keyword: &str| -> Option<Rate> {
            tokens
                .iter()
                .position(|t| *t == keyword)
                .and_then(|i| tokens.get(i + 1))
                .and_then(|v| v.parse().ok())
        };
        entries.push(ClassEntry {
            kind: tokens[1].to_string(),
            classid: parse_handle(tokens[2])?,
            rate: value_after("rate"),
            ceil: value_after("ceil"),
        });
    }
    Ok(entries)
}

/// Extract `match VVVVVVVV/0000ffff at 20` port matches with their flowid
pub fn parse_port_filters(text: &str) -> Vec<PortFilterEntry> {
    let mut entries = Vec::new();
    let mut flowid = None;
    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() == Some(&"filter") {
            flowid = tokens
                .iter()
                .position(|t| *t == "flowid")
                .and_then(|i| tokens.get(i + 1))
                .and_then(|v| v.parse::<Handle>().ok());
            continue;
        }
        if tokens.len() >= 4 && tokens[0] == "match" && tokens[2] == "at" && tokens[3] == "20" {
            if let Some((value, mask)) = tokens[1].split_once('/') {
                let value = u32::from_str_radix(value, 16).ok();
                let mask = u32::from_str_radix(mask, 16).ok();
                if let (Some(value), Some(0xffff)) = (value, mask) {
                    entries.push(PortFilterEntry {
                        dport: (value & 0xffff) as u16,
                        flowid,
                    });
                }
            }
        }
    }
    entries
}

/// Read netem parameters from the option tokens of a qdisc line
pub fn parse_netem(options: &[String]) -> Result<NetemSpec, QdiscError> {
    let mut spec = NetemSpec {
        delay: Delay::ZERO,
        jitter: None,
        distribution: None,
        loss: Percent::ZERO,
        corrupt: None,
        reorder: None,
        duplicate: None,
        rate: None,
    };
    let bad = |token: &str| QdiscError::Parse(format!("netem option {:?}", token));

    let mut i = 0;
    while i < options.len() {
        let value = options.get(i + 1).map(String::as_str);
        match (options[i].as_str(), value) {
            ("delay", Some(v)) => {
                spec.delay = v.parse().map_err(|_| bad(v))?;
                i += 1;
                if let Some(jitter) = options.get(i + 1).and_then(|j| j.parse::<Delay>().ok()) {
                    spec.jitter = Some(jitter);
                    i += 1;
                }
            }
            ("loss", Some(v)) => {
                spec.loss = v.parse().map_err(|_| bad(v))?;
                i += 1;
            }
            ("corrupt", Some(v)) => {
                spec.corrupt = Some(v.parse().map_err(|_| bad(v))?);
                i += 1;
            }
            ("reorder", Some(v)) => {
                spec.reorder = Some(v.parse().map_err(|_| bad(v))?);
                i += 1;
            }
            ("duplicate", Some(v)) => {
                spec.duplicate = Some(v.parse().map_err(|_| bad(v))?);
                i += 1;
            }
            ("rate", Some(v)) => {
                spec.rate = Some(v.parse().map_err(|_| bad(v))?);
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    Ok(spec)
}

/// Components of a layered hierarchy found on the interface
#[derive(Clone, Debug, PartialEq)]
pub struct LayeredObservation {
    pub class_rate: Option<Rate>,
    pub netem: Option<NetemSpec>,
    pub fair_queue: bool,
    pub steered_port: Option<u16>,
}

impl LayeredObservation {
    /// Whether every component of `profile` is present with its parameters
    pub fn matches(&self, profile: &LayeredProfile) -> bool {
        let netem_ok = self
            .netem
            .as_ref()
            .map(|n| n.matches(&NetemSpec::low_latency(profile)))
            .unwrap_or(false);
        self.class_rate == Some(profile.rate)
            && netem_ok
            && self.fair_queue
            && self.steered_port == Some(profile.steer_port)
    }
}

/// Which shaping hierarchy an interface currently carries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HierarchyVariant {
    Flat,
    Layered,
}

/// Live hierarchy as read back from the kernel
#[derive(Clone, Debug, PartialEq)]
pub enum ObservedHierarchy {
    /// Only the kernel's default queueing
    None,
    Flat(NetemSpec),
    Layered(LayeredObservation),
    /// A managed root qdisc this tool never installs
    Foreign(String),
}

impl ObservedHierarchy {
    pub fn is_none(&self) -> bool {
        matches!(self, ObservedHierarchy::None)
    }

    pub fn variant(&self) -> Option<HierarchyVariant> {
        match self {
            ObservedHierarchy::Flat(_) => Some(HierarchyVariant::Flat),
            ObservedHierarchy::Layered(_) => Some(HierarchyVariant::Layered),
            _ => None,
        }
    }
}

/// The root qdisc with an assigned handle, if any
pub fn managed_root(qdiscs: &[QdiscEntry]) -> Option<&QdiscEntry> {
    qdiscs
        .iter()
        .find(|q| q.parent == Parent::Root && !q.handle.is_unspecified())
}

/// Assemble the layered view from the three tables
pub fn layered_observation(
    qdiscs: &[QdiscEntry],
    classes: &[ClassEntry],
    filters: &[PortFilterEntry],
    root: Handle,
) -> Result<LayeredObservation, QdiscError> {
    let class = classes
        .iter()
        .find(|c| c.kind == "htb" && c.classid.major == root.major);
    let netem = qdiscs
        .iter()
        .find(|q| q.kind == "netem" && q.parent != Parent::Root)
        .map(|q| parse_netem(&q.options))
        .transpose()?;
    let fair_queue = qdiscs.iter().any(|q| q.kind == "sfq");
    let steered_port = filters
        .iter()
        .find(|f| match (class, f.flowid) {
            (Some(class), Some(flowid)) => class.classid == flowid,
            _ => true,
        })
        .map(|f| f.dport);

    Ok(LayeredObservation {
        class_rate: class.and_then(|c| c.rate),
        netem,
        fair_queue,
        steered_port,
    })
}
