//! Vendor command sets.
//!
//! A command set maps a platform tag to the ordered list of commands one
//! poll cycle runs. Every command carries a [`CommandKind`] telling the
//! extractor which parser applies to its output.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Logical command kinds understood by the state extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Full interface listing with counters.
    Interfaces,
    /// Brief interface table (status only).
    InterfacesBrief,
    /// BGP neighbor summary.
    BgpSummary,
    /// OSPF neighbor table.
    OspfNeighbors,
    /// Detailed OSPF neighbor listing (carries areas).
    OspfNeighborDetail,
    /// VLAN table.
    VlanBrief,
    /// Trunk port table.
    InterfacesTrunk,
    /// CPU utilization.
    Cpu,
    /// Memory statistics.
    Memory,
}

impl CommandKind {
    /// Returns the kind name as used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Interfaces => "interfaces",
            CommandKind::InterfacesBrief => "interfaces_brief",
            CommandKind::BgpSummary => "bgp_summary",
            CommandKind::OspfNeighbors => "ospf_neighbors",
            CommandKind::OspfNeighborDetail => "ospf_neighbor_detail",
            CommandKind::VlanBrief => "vlan_brief",
            CommandKind::InterfacesTrunk => "interfaces_trunk",
            CommandKind::Cpu => "cpu",
            CommandKind::Memory => "memory",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One command of a command set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Parser selector.
    pub kind: CommandKind,
    /// CLI text sent to the device.
    pub command: String,
    /// A device that rejects this command contributes no records for it
    /// instead of failing the cycle.
    #[serde(default)]
    pub optional: bool,
}

impl CommandSpec {
    /// Creates a required command spec.
    pub fn new(kind: CommandKind, command: impl Into<String>) -> Self {
        Self {
            kind,
            command: command.into(),
            optional: false,
        }
    }

    /// Creates a command spec that devices may reject.
    pub fn optional(kind: CommandKind, command: impl Into<String>) -> Self {
        Self {
            optional: true,
            ..Self::new(kind, command)
        }
    }
}

/// Ordered commands for one platform.
pub type CommandSet = Vec<CommandSpec>;

/// Built-in command sets.
pub mod defaults {
    use super::{CommandKind, CommandSet, CommandSpec};

    /// Platform tags that share the Cisco IOS command family.
    pub const CISCO_FAMILY: &[&str] = &["cisco_ios", "cisco_xe"];

    /// Commands run against Cisco IOS / IOS-XE devices. The switching
    /// commands are optional so pure routers still poll cleanly.
    pub fn cisco_ios() -> CommandSet {
        vec![
            CommandSpec::new(CommandKind::Interfaces, "show interfaces"),
            CommandSpec::new(CommandKind::BgpSummary, "show ip bgp summary"),
            CommandSpec::new(CommandKind::OspfNeighbors, "show ip ospf neighbor"),
            CommandSpec::optional(CommandKind::VlanBrief, "show vlan brief"),
            CommandSpec::optional(CommandKind::InterfacesTrunk, "show interfaces trunk"),
            CommandSpec::new(CommandKind::Cpu, "show processes cpu | include CPU utilization"),
            CommandSpec::new(CommandKind::Memory, "show memory statistics"),
        ]
    }
}

/// Platform tag → command set mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSetTable {
    sets: BTreeMap<String, CommandSet>,
}

impl CommandSetTable {
    /// Creates an empty table.
    pub fn empty() -> Self {
        Self {
            sets: BTreeMap::new(),
        }
    }

    /// Sets (or replaces) the command set for a platform.
    pub fn insert(&mut self, platform: impl Into<String>, commands: CommandSet) {
        self.sets.insert(platform.into(), commands);
    }

    /// Returns the command set for a platform, if one is configured.
    pub fn get(&self, platform: &str) -> Option<&CommandSet> {
        self.sets.get(platform)
    }

    /// Returns the configured platform tags.
    pub fn platforms(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }
}

impl Default for CommandSetTable {
    fn default() -> Self {
        let mut table = Self::empty();
        for platform in defaults::CISCO_FAMILY {
            table.insert(*platform, defaults::cisco_ios());
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_kind_names() {
        assert_eq!(CommandKind::BgpSummary.as_str(), "bgp_summary");
        assert_eq!(CommandKind::OspfNeighborDetail.to_string(), "ospf_neighbor_detail");
    }

    #[test]
    fn test_default_table() {
        let table = CommandSetTable::default();
        let ios = table.get("cisco_ios").unwrap();
        assert_eq!(ios[0].kind, CommandKind::Interfaces);
        assert_eq!(ios[0].command, "show interfaces");
        assert_eq!(table.get("cisco_xe"), Some(ios));
        assert!(table.get("junos").is_none());

        let optional: Vec<CommandKind> = ios.iter().filter(|c| c.optional).map(|c| c.kind).collect();
        assert_eq!(optional, vec![CommandKind::VlanBrief, CommandKind::InterfacesTrunk]);
    }

    #[test]
    fn test_optional_flag_from_config() {
        #[derive(Deserialize)]
        struct Wrapper {
            commands: CommandSet,
        }
        let parsed: Wrapper = toml::from_str(
            r#"commands = [
                { kind = "interfaces", command = "show interfaces" },
                { kind = "vlan_brief", command = "show vlan brief", optional = true },
            ]"#,
        )
        .unwrap();
        assert!(!parsed.commands[0].optional);
        assert!(parsed.commands[1].optional);
    }

    #[test]
    fn test_override_platform() {
        let mut table = CommandSetTable::default();
        table.insert(
            "cisco_ios",
            vec![CommandSpec::new(CommandKind::InterfacesBrief, "show ip interface brief")],
        );
        assert_eq!(table.get("cisco_ios").unwrap().len(), 1);
        assert_eq!(table.platforms().count(), 2);
    }
}
