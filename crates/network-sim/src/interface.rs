//! Network interface resolution
//!
//! Picks the interface to shape: the one carrying the default route, or an
//! explicit name validated against the links the host actually has.

use crate::types::InterfaceError;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::path::PathBuf;
use tokio::process::Command;

/// Address used to look up the default route
const ROUTE_PROBE: &str = "8.8.8.8";

/// How the caller wants the interface chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceChoice {
    /// Use the default-route interface, optionally asking the user first
    Auto { confirm: bool },
    Explicit(String),
}

/// Source of routing and link information
#[async_trait]
pub trait LinkSource: Send + Sync {
    /// Interface the default route leaves through, if there is one
    async fn default_route_interface(&self) -> Result<Option<String>, InterfaceError>;

    /// Non-loopback interface names
    async fn list_interfaces(&self) -> Result<Vec<String>, InterfaceError>;
}

/// Queries the iproute2 `ip` binary
#[derive(Debug, Clone)]
pub struct IpCommand {
    program: PathBuf,
}

impl IpCommand {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("ip"),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Option<String>, InterfaceError> {
        debug!("Running: ip {}", args.join(" "));
        let output = Command::new(&self.program).args(args).output().await?;
        if !output.status.success() {
            debug!(
                "ip {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }
}

impl Default for IpCommand {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LinkSource for IpCommand {
    async fn default_route_interface(&self) -> Result<Option<String>, InterfaceError> {
        Ok(self
            .run(&["route", "get", ROUTE_PROBE])
            .await?
            .and_then(|out| parse_route_get(&out)))
    }

    async fn list_interfaces(&self) -> Result<Vec<String>, InterfaceError> {
        Ok(self
            .run(&["-o", "link", "show"])
            .await?
            .map(|out| parse_link_list(&out))
            .unwrap_or_default())
    }
}

/// Device named after `dev` in `ip route get` output
pub fn parse_route_get(output: &str) -> Option<String> {
    let mut tokens = output.split_whitespace();
    tokens.find(|t| *t == "dev")?;
    tokens.next().map(str::to_string)
}

/// Interface names from `ip -o link show`, loopback excluded
pub fn parse_link_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split(": ").nth(1))
        .map(|name| name.split('@').next().unwrap_or(name).trim())
        .filter(|name| !name.is_empty() && *name != "lo")
        .map(str::to_string)
        .collect()
}

/// Interactive questions asked while resolving
pub trait Prompt: Send + Sync {
    /// Ask whether to use the detected interface
    fn confirm(&self, interface: &str) -> bool;

    /// Ask the user to pick one of `available`; `None` when they decline
    fn choose(&self, available: &[String]) -> Option<String>;
}

/// Non-interactive prompt: accepts detections, never chooses
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl Prompt for NoPrompt {
    fn confirm(&self, _interface: &str) -> bool {
        true
    }

    fn choose(&self, _available: &[String]) -> Option<String> {
        None
    }
}

pub struct InterfaceResolver<S = IpCommand, P = NoPrompt> {
    links: S,
    prompt: P,
}

impl InterfaceResolver<IpCommand, NoPrompt> {
    pub fn new() -> Self {
        Self {
            links: IpCommand::new(),
            prompt: NoPrompt,
        }
    }
}

impl Default for InterfaceResolver<IpCommand, NoPrompt> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: LinkSource, P: Prompt> InterfaceResolver<S, P> {
    pub fn with_parts(links: S, prompt: P) -> Self {
        Self { links, prompt }
    }

    pub async fn resolve(&self, choice: &InterfaceChoice) -> Result<String, InterfaceError> {
        match choice {
            InterfaceChoice::Explicit(name) => self.validate(name).await,
            InterfaceChoice::Auto { confirm } => {
                let detected = match self.links.default_route_interface().await {
                    Ok(detected) => detected,
                    Err(e) => {
                        warn!("Could not detect default interface automatically: {}", e);
                        None
                    }
                };

                if let Some(interface) = detected {
                    if !*confirm || self.prompt.confirm(&interface) {
                        info!("Detected default interface: {}", interface);
                        return Ok(interface);
                    }
                    debug!("Detected interface {} declined", interface);
                } else {
                    warn!("No default route found");
                }

                let available = self.available().await;
                match self.prompt.choose(&available) {
                    Some(name) if !name.trim().is_empty() => self.validate(name.trim()).await,
                    _ => Err(InterfaceError::Unresolved),
                }
            }
        }
    }

    async fn available(&self) -> Vec<String> {
        match self.links.list_interfaces().await {
            Ok(list) => list,
            Err(e) => {
                warn!("Could not list interfaces: {}", e);
                Vec::new()
            }
        }
    }

    /// Accept `name` if it exists, or if the host cannot be enumerated
    async fn validate(&self, name: &str) -> Result<String, InterfaceError> {
        let available = self.available().await;
        if available.is_empty() || available.iter().any(|a| a == name) {
            info!("Using interface: {}", name);
            Ok(name.to_string())
        } else {
            Err(InterfaceError::NotFound {
                name: name.to_string(),
                available,
            })
        }
    }
}
