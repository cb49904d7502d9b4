//! Typed traffic-control operations
//!
//! Every mutation the hierarchy manager performs is expressed as a [`TcOp`],
//! which a backend either renders to `tc` arguments or applies to an
//! in-memory model.

use scenarios::{Delay, LayeredProfile, Percent, Rate};
use std::fmt;
use std::str::FromStr;

/// A tc handle `major:minor`; both halves are hexadecimal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    pub major: u16,
    pub minor: u16,
}

impl Handle {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Qdisc handle `major:`
    pub const fn qdisc(major: u16) -> Self {
        Self { major, minor: 0 }
    }

    /// The unassigned handle `0:` the kernel gives default qdiscs
    pub fn is_unspecified(&self) -> bool {
        self.major == 0 && self.minor == 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minor == 0 {
            write!(f, "{:x}:", self.major)
        } else {
            write!(f, "{:x}:{:x}", self.major, self.minor)
        }
    }
}

impl FromStr for Handle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid handle {:?}", s))?;
        let parse = |part: &str| -> Result<u16, String> {
            if part.is_empty() {
                Ok(0)
            } else {
                u16::from_str_radix(part, 16).map_err(|_| format!("invalid handle {:?}", s))
            }
        };
        Ok(Self::new(parse(major)?, parse(minor)?))
    }
}

/// Attachment point of a qdisc
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Parent {
    Root,
    Handle(Handle),
}

impl Parent {
    fn push_args(&self, args: &mut Vec<String>) {
        match self {
            Parent::Root => args.push("root".into()),
            Parent::Handle(handle) => {
                args.push("parent".into());
                args.push(handle.to_string());
            }
        }
    }
}

impl fmt::Display for Parent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parent::Root => f.write_str("root"),
            Parent::Handle(handle) => write!(f, "parent {}", handle),
        }
    }
}

/// Netem jitter distribution tables shipped with iproute2
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Distribution {
    Uniform,
    Normal,
    Pareto,
    ParetoNormal,
}

impl Distribution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distribution::Uniform => "uniform",
            Distribution::Normal => "normal",
            Distribution::Pareto => "pareto",
            Distribution::ParetoNormal => "paretonormal",
        }
    }
}

/// Network emulation (netem) parameters
#[derive(Clone, Debug, PartialEq)]
pub struct NetemSpec {
    pub delay: Delay,
    pub jitter: Option<Delay>,
    pub distribution: Option<Distribution>,
    pub loss: Percent,
    pub corrupt: Option<Percent>,
    pub reorder: Option<Percent>,
    pub duplicate: Option<Percent>,
    pub rate: Option<Rate>,
}

impl NetemSpec {
    /// A single rate/delay/loss shaping node
    pub fn flat(rate: Rate, delay: Delay, loss: Percent) -> Self {
        Self {
            delay,
            jitter: None,
            distribution: None,
            loss,
            corrupt: None,
            reorder: None,
            duplicate: None,
            rate: Some(rate),
        }
    }

    /// The minimal-impairment node under the layered HTB class
    pub fn low_latency(profile: &LayeredProfile) -> Self {
        Self {
            delay: profile.delay,
            jitter: Some(profile.jitter),
            distribution: Some(Distribution::Normal),
            loss: Percent::ZERO,
            corrupt: Some(Percent::ZERO),
            reorder: Some(Percent::ZERO),
            duplicate: Some(Percent::ZERO),
            rate: None,
        }
    }

    /// Compare the parameters `tc qdisc show` reports back.
    ///
    /// Distribution is not printed and zero-valued probabilities are omitted,
    /// so those compare as equal to their absence.
    pub fn matches(&self, other: &NetemSpec) -> bool {
        let jitter = |spec: &NetemSpec| spec.jitter.filter(|j| !j.is_zero());
        let pct = |p: Option<Percent>| p.unwrap_or(Percent::ZERO);
        self.delay == other.delay
            && jitter(self) == jitter(other)
            && self.loss.approx_eq(&other.loss)
            && pct(self.corrupt).approx_eq(&pct(other.corrupt))
            && pct(self.reorder).approx_eq(&pct(other.reorder))
            && pct(self.duplicate).approx_eq(&pct(other.duplicate))
            && self.rate == other.rate
    }

    fn push_args(&self, args: &mut Vec<String>) {
        args.push("netem".into());
        if let Some(rate) = self.rate {
            args.push("rate".into());
            args.push(rate.to_tc_arg());
        }
        args.push("delay".into());
        args.push(self.delay.to_tc_arg());
        if let Some(jitter) = self.jitter {
            args.push(jitter.to_tc_arg());
            if let Some(distribution) = self.distribution {
                args.push("distribution".into());
                args.push(distribution.as_str().into());
            }
        }
        args.push("loss".into());
        args.push(self.loss.to_tc_arg());
        for (keyword, value) in [
            ("corrupt", self.corrupt),
            ("reorder", self.reorder),
            ("duplicate", self.duplicate),
        ] {
            if let Some(value) = value {
                args.push(keyword.into());
                args.push(value.to_tc_arg());
            }
        }
    }
}

/// Queueing discipline with its parameters
#[derive(Clone, Debug, PartialEq)]
pub enum QdiscSpec {
    Netem(NetemSpec),
    /// Hierarchical token bucket; unclassified traffic goes to `default_class`
    Htb { default_class: u16 },
    /// Stochastic fairness queueing
    Sfq { perturb_secs: u32 },
}

impl QdiscSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            QdiscSpec::Netem(_) => "netem",
            QdiscSpec::Htb { .. } => "htb",
            QdiscSpec::Sfq { .. } => "sfq",
        }
    }

    fn push_args(&self, args: &mut Vec<String>) {
        match self {
            QdiscSpec::Netem(netem) => netem.push_args(args),
            QdiscSpec::Htb { default_class } => {
                args.push("htb".into());
                args.push("default".into());
                args.push(format!("{:x}", default_class));
            }
            QdiscSpec::Sfq { perturb_secs } => {
                args.push("sfq".into());
                args.push("perturb".into());
                args.push(perturb_secs.to_string());
            }
        }
    }
}

/// HTB class parameters
#[derive(Clone, Debug, PartialEq)]
pub struct HtbClassSpec {
    pub rate: Rate,
    pub ceil: Rate,
    pub burst_bytes: u32,
}

impl HtbClassSpec {
    fn push_args(&self, args: &mut Vec<String>) {
        args.push("htb".into());
        args.push("rate".into());
        args.push(self.rate.to_tc_arg());
        args.push("ceil".into());
        args.push(self.ceil.to_tc_arg());
        args.push("burst".into());
        if self.burst_bytes % 1024 == 0 {
            args.push(format!("{}k", self.burst_bytes / 1024));
        } else {
            args.push(format!("{}b", self.burst_bytes));
        }
    }
}

/// u32 filter steering an IPv4 destination port into a class
#[derive(Clone, Debug, PartialEq)]
pub struct PortFilterSpec {
    pub prio: u16,
    pub dport: u16,
    pub flowid: Handle,
}

/// One mutation of an interface's traffic-control tables
#[derive(Clone, Debug, PartialEq)]
pub enum TcOp {
    AddQdisc {
        parent: Parent,
        handle: Option<Handle>,
        qdisc: QdiscSpec,
    },
    ChangeQdisc {
        parent: Parent,
        qdisc: QdiscSpec,
    },
    DeleteRoot,
    AddClass {
        parent: Handle,
        classid: Handle,
        class: HtbClassSpec,
    },
    AddFilter {
        parent: Handle,
        filter: PortFilterSpec,
    },
}

impl TcOp {
    /// Arguments for the `tc` binary operating on `dev`
    pub fn args(&self, dev: &str) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match self {
            TcOp::AddQdisc {
                parent,
                handle,
                qdisc,
            } => {
                args.extend(["qdisc", "add", "dev", dev].map(String::from));
                parent.push_args(&mut args);
                if let Some(handle) = handle {
                    args.push("handle".into());
                    args.push(handle.to_string());
                }
                qdisc.push_args(&mut args);
            }
            TcOp::ChangeQdisc { parent, qdisc } => {
                args.extend(["qdisc", "change", "dev", dev].map(String::from));
                parent.push_args(&mut args);
                qdisc.push_args(&mut args);
            }
            TcOp::DeleteRoot => {
                args.extend(["qdisc", "del", "dev", dev, "root"].map(String::from));
            }
            TcOp::AddClass {
                parent,
                classid,
                class,
            } => {
                args.extend(["class", "add", "dev", dev].map(String::from));
                args.push("parent".into());
                args.push(parent.to_string());
                args.push("classid".into());
                args.push(classid.to_string());
                class.push_args(&mut args);
            }
            TcOp::AddFilter { parent, filter } => {
                args.extend(["filter", "add", "dev", dev].map(String::from));
                args.push("parent".into());
                args.push(parent.to_string());
                args.extend(["protocol", "ip", "prio"].map(String::from));
                args.push(filter.prio.to_string());
                args.extend(["u32", "match", "ip", "dport"].map(String::from));
                args.push(filter.dport.to_string());
                args.push("0xffff".into());
                args.push("flowid".into());
                args.push(filter.flowid.to_string());
            }
        }
        args
    }

    /// Command line as it would be typed, for logs and error messages
    pub fn command_line(&self, dev: &str) -> String {
        format!("tc {}", self.args(dev).join(" "))
    }
}

/// Table dumped by `tc <object> show dev <dev>`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcObject {
    Qdisc,
    Class,
    Filter,
}

impl TcObject {
    pub fn as_str(&self) -> &'static str {
        match self {
            TcObject::Qdisc => "qdisc",
            TcObject::Class => "class",
            TcObject::Filter => "filter",
        }
    }

    pub fn show_args(&self, dev: &str) -> Vec<String> {
        [self.as_str(), "show", "dev", dev]
            .map(String::from)
            .to_vec()
    }
}
