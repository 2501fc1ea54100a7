// ============================================
// File: crates/overlan-switch/src/firewall.rs
// ============================================
//! # Firewall Rules
//!
//! ## Creation Reason
//! Tenants whose routes leave the overlay through the bridge address need
//! forwarding and masquerade rules on the host. The switch declares those
//! rules during initialization, installs them at start and removes them
//! at stop.
//!
//! ## Main Functionality
//! - `FilterRule`: declarative iptables rule
//! - `RuleBackend`: installs and removes rules
//! - `IptablesBackend`: shells out to `iptables`
//! - `MemoryBackend`: keeps rules in memory (dry-run and tests)
//! - `Firewall`: declared rules plus what is currently installed
//!
//! ## ⚠️ Important Note for Next Developer
//! - `stop()` removes exactly what `start()` managed to install, in
//!   reverse order
//!
//! ## Last Modified
//! v0.1.0 - Initial firewall declaration

use std::process::Command;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, ServerError};

// ============================================
// FilterRule
// ============================================

/// One iptables rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FilterRule {
    /// Table, `filter` when omitted
    #[serde(default = "default_table")]
    pub table: String,
    /// Chain, e.g. `FORWARD`
    pub chain: String,
    /// Inbound interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Source address or prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// SNAT target address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_source: Option<String>,
    /// Destination address or prefix
    #[serde(default, rename = "destination", skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
    /// DNAT target address
    #[serde(default, rename = "to-destination", skip_serializing_if = "Option::is_none")]
    pub to_dest: Option<String>,
    /// Outbound interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Rule comment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Target: ACCEPT, MASQUERADE, SNAT, RETURN, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jump: Option<String>,
}

fn default_table() -> String {
    "filter".to_string()
}

impl FilterRule {
    /// A rule on `table`/`chain` with nothing else set.
    #[must_use]
    pub fn new(table: &str, chain: &str) -> Self {
        Self {
            table: table.to_string(),
            chain: chain.to_string(),
            input: None,
            source: None,
            to_source: None,
            dest: None,
            to_dest: None,
            output: None,
            comment: None,
            jump: None,
        }
    }

    #[must_use]
    fn from_to(mut self, source: &str, dest: &str) -> Self {
        self.source = Some(source.to_string());
        self.dest = Some(dest.to_string());
        self
    }

    #[must_use]
    fn jump(mut self, target: &str) -> Self {
        self.jump = Some(target.to_string());
        self
    }
}

/// Rules letting traffic between `source` (the bridge address) and a
/// routed `prefix` through the host: accept forwarding, masquerade both
/// directions.
#[must_use]
pub fn masquerade_rules(source: &str, prefix: &str) -> [FilterRule; 3] {
    [
        FilterRule::new("filter", "FORWARD")
            .from_to(source, prefix)
            .jump("ACCEPT"),
        FilterRule::new("nat", "POSTROUTING")
            .from_to(source, prefix)
            .jump("MASQUERADE"),
        FilterRule::new("nat", "POSTROUTING")
            .from_to(prefix, source)
            .jump("MASQUERADE"),
    ]
}

// ============================================
// Backends
// ============================================

/// Installs rules on the host.
pub trait RuleBackend: Send + Sync {
    /// Appends `rule`.
    fn insert(&self, rule: &FilterRule) -> Result<()>;

    /// Deletes `rule`.
    fn remove(&self, rule: &FilterRule) -> Result<()>;
}

/// Runs `iptables`.
#[derive(Debug, Default, Clone)]
pub struct IptablesBackend;

impl IptablesBackend {
    /// Argument vector for `iptables`; `op` is `-A` or `-D`.
    #[must_use]
    pub fn to_args(rule: &FilterRule, op: &str) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            rule.table.clone(),
            op.to_string(),
            rule.chain.clone(),
        ];
        let mut push = |flag: &str, value: &Option<String>| {
            if let Some(v) = value {
                args.push(flag.to_string());
                args.push(v.clone());
            }
        };
        push("-i", &rule.input);
        push("-s", &rule.source);
        push("-d", &rule.dest);
        push("-o", &rule.output);
        if let Some(comment) = &rule.comment {
            args.extend(["-m", "comment", "--comment"].map(String::from));
            args.push(comment.clone());
        }
        if let Some(jump) = &rule.jump {
            args.push("-j".to_string());
            args.push(jump.clone());
        }
        let mut push = |flag: &str, value: &Option<String>| {
            if let Some(v) = value {
                args.push(flag.to_string());
                args.push(v.clone());
            }
        };
        push("--to-source", &rule.to_source);
        push("--to-destination", &rule.to_dest);
        args
    }

    fn run(rule: &FilterRule, op: &str) -> Result<()> {
        let args = Self::to_args(rule, op);
        debug!(args = %args.join(" "), "iptables");
        let output = Command::new("iptables").args(&args).output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ServerError::resource(format!(
                "iptables {}: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl RuleBackend for IptablesBackend {
    fn insert(&self, rule: &FilterRule) -> Result<()> {
        Self::run(rule, "-A")
    }

    fn remove(&self, rule: &FilterRule) -> Result<()> {
        Self::run(rule, "-D")
    }
}

/// Keeps installed rules in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    installed: Mutex<Vec<FilterRule>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules currently installed, in insertion order.
    #[must_use]
    pub fn installed(&self) -> Vec<FilterRule> {
        self.installed.lock().clone()
    }
}

impl RuleBackend for MemoryBackend {
    fn insert(&self, rule: &FilterRule) -> Result<()> {
        self.installed.lock().push(rule.clone());
        Ok(())
    }

    fn remove(&self, rule: &FilterRule) -> Result<()> {
        let mut installed = self.installed.lock();
        if let Some(pos) = installed.iter().rposition(|r| r == rule) {
            installed.remove(pos);
        }
        Ok(())
    }
}

// ============================================
// Firewall
// ============================================

/// Declared rules and their installation state.
pub struct Firewall {
    backend: Arc<dyn RuleBackend>,
    declared: Mutex<Vec<FilterRule>>,
    applied: Mutex<Vec<FilterRule>>,
}

impl Firewall {
    /// Creates a firewall over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn RuleBackend>) -> Self {
        Self {
            backend,
            declared: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
        }
    }

    /// Declares rules to install at start.
    pub fn declare(&self, rules: impl IntoIterator<Item = FilterRule>) {
        self.declared.lock().extend(rules);
    }

    /// Declared rules.
    #[must_use]
    pub fn rules(&self) -> Vec<FilterRule> {
        self.declared.lock().clone()
    }

    /// Installs every declared rule not yet installed. A rule the backend
    /// rejects is logged and skipped.
    pub fn start(&self) {
        let declared = self.rules();
        let mut applied = self.applied.lock();
        for rule in declared {
            if applied.contains(&rule) {
                continue;
            }
            match self.backend.insert(&rule) {
                Ok(()) => applied.push(rule),
                Err(e) => warn!(chain = %rule.chain, error = %e, "Firewall rule not installed"),
            }
        }
        info!(rules = applied.len(), "Firewall started");
    }

    /// Removes installed rules, newest first.
    pub fn stop(&self) {
        let applied = std::mem::take(&mut *self.applied.lock());
        for rule in applied.iter().rev() {
            if let Err(e) = self.backend.remove(rule) {
                warn!(chain = %rule.chain, error = %e, "Firewall rule not removed");
            }
        }
        info!(rules = applied.len(), "Firewall stopped");
    }
}

impl std::fmt::Debug for Firewall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Firewall")
            .field("declared", &self.declared.lock().len())
            .field("applied", &self.applied.lock().len())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masquerade_rules() {
        let [forward, out, back] = masquerade_rules("10.0.0.1/24", "192.168.10.0/24");
        assert_eq!(forward.table, "filter");
        assert_eq!(forward.jump.as_deref(), Some("ACCEPT"));
        assert_eq!(out.source.as_deref(), Some("10.0.0.1/24"));
        assert_eq!(back.source.as_deref(), Some("192.168.10.0/24"));
        assert_eq!(back.dest.as_deref(), Some("10.0.0.1/24"));
        assert_eq!(back.jump.as_deref(), Some("MASQUERADE"));
    }

    #[test]
    fn test_iptables_args() {
        let mut rule = FilterRule::new("nat", "POSTROUTING").from_to("10.0.0.0/24", "0.0.0.0/0");
        rule.output = Some("eth0".into());
        rule.comment = Some("overlan".into());
        rule.jump = Some("SNAT".into());
        rule.to_source = Some("192.0.2.1".into());

        assert_eq!(
            IptablesBackend::to_args(&rule, "-A").join(" "),
            "-t nat -A POSTROUTING -s 10.0.0.0/24 -d 0.0.0.0/0 -o eth0 \
             -m comment --comment overlan -j SNAT --to-source 192.0.2.1"
        );
    }

    #[test]
    fn test_rule_from_config_keys() {
        let rule: FilterRule = toml::from_str(
            r#"
            chain = "PREROUTING"
            table = "nat"
            destination = "192.0.2.10"
            to-destination = "10.0.0.5"
            jump = "DNAT"
            "#,
        )
        .unwrap();
        assert_eq!(rule.dest.as_deref(), Some("192.0.2.10"));
        assert_eq!(rule.to_dest.as_deref(), Some("10.0.0.5"));

        let bare: FilterRule = toml::from_str(r#"chain = "FORWARD""#).unwrap();
        assert_eq!(bare.table, "filter");
    }

    #[test]
    fn test_start_stop_reverses() {
        let backend = Arc::new(MemoryBackend::new());
        let firewall = Firewall::new(backend.clone());
        firewall.declare(masquerade_rules("10.0.0.1/24", "192.168.0.0/16"));

        firewall.start();
        firewall.start();
        assert_eq!(backend.installed().len(), 3);

        firewall.stop();
        assert!(backend.installed().is_empty());
        assert_eq!(firewall.rules().len(), 3);
    }
}
