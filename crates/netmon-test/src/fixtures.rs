//! Router state fixtures rendered as Cisco IOS CLI output.

use netmon_common::platform::defaults;
use netmon_common::{CommandKind, Device};
use netmond::CredentialEntry;
use std::collections::HashMap;
use std::fmt::Write;

/// Credential reference every fixture device uses.
pub const LAB_CREDENTIALS: &str = "lab";

/// Device owned by account 1 with the default cisco_ios platform.
pub fn lab_device(id: u64) -> Device {
    Device::new(id, 1, format!("rtr-{}", id), format!("192.0.2.{}", id), LAB_CREDENTIALS)
}

/// Key-based credentials for [`LAB_CREDENTIALS`].
pub fn lab_credentials() -> CredentialEntry {
    CredentialEntry {
        reference: LAB_CREDENTIALS.to_string(),
        username: "netops".to_string(),
        password: None,
        password_env: None,
    }
}

#[derive(Debug, Clone)]
struct Interface {
    name: String,
    admin_up: bool,
    oper_up: bool,
    in_octets: u64,
    out_octets: u64,
}

#[derive(Debug, Clone)]
struct BgpPeer {
    peer: String,
    as_number: u32,
    state: String,
}

#[derive(Debug, Clone)]
struct OspfPeer {
    neighbor_id: String,
    state: String,
    address: String,
    interface: String,
}

/// Operational state of a simulated router, rendered per command.
#[derive(Debug, Clone)]
pub struct RouterOutputs {
    interfaces: Vec<Interface>,
    bgp: Vec<BgpPeer>,
    ospf: Vec<OspfPeer>,
    vlans: Vec<(u32, String, bool)>,
    trunks: Vec<(String, bool)>,
    switching: bool,
    cpu_percent: f64,
    memory_percent: f64,
}

impl Default for RouterOutputs {
    fn default() -> Self {
        Self::healthy()
    }
}

impl RouterOutputs {
    /// Two up interfaces, VLAN 1 active, low CPU and memory, no routing
    /// protocols.
    pub fn healthy() -> Self {
        Self {
            interfaces: Vec::new(),
            bgp: Vec::new(),
            ospf: Vec::new(),
            vlans: vec![(1, "default".to_string(), true)],
            trunks: Vec::new(),
            switching: true,
            cpu_percent: 5.0,
            memory_percent: 40.0,
        }
        .interface("Gi0/0", true, true)
        .interface("Gi0/1", true, true)
    }

    /// Adds or replaces an interface.
    pub fn interface(mut self, name: &str, admin_up: bool, oper_up: bool) -> Self {
        self.interfaces.retain(|i| i.name != name);
        self.interfaces.push(Interface {
            name: name.to_string(),
            admin_up,
            oper_up,
            in_octets: 1_000_000,
            out_octets: 500_000,
        });
        self
    }

    /// Adds or replaces a BGP neighbor. `state` is either `Established`
    /// or the state name shown in the summary (`Idle`, `Active`, ...).
    pub fn bgp_neighbor(mut self, peer: &str, as_number: u32, state: &str) -> Self {
        self.bgp.retain(|b| b.peer != peer);
        self.bgp.push(BgpPeer {
            peer: peer.to_string(),
            as_number,
            state: state.to_string(),
        });
        self
    }

    pub fn without_bgp_neighbor(mut self, peer: &str) -> Self {
        self.bgp.retain(|b| b.peer != peer);
        self
    }

    /// Adds or replaces an OSPF neighbor (state such as `FULL` or `INIT`).
    pub fn ospf_neighbor(mut self, neighbor_id: &str, address: &str, state: &str, interface: &str) -> Self {
        self.ospf.retain(|o| o.address != address);
        self.ospf.push(OspfPeer {
            neighbor_id: neighbor_id.to_string(),
            state: state.to_string(),
            address: address.to_string(),
            interface: interface.to_string(),
        });
        self
    }

    pub fn vlan(mut self, id: u32, name: &str, active: bool) -> Self {
        self.vlans.retain(|v| v.0 != id);
        self.vlans.push((id, name.to_string(), active));
        self
    }

    pub fn trunk(mut self, port: &str, trunking: bool) -> Self {
        self.trunks.retain(|t| t.0 != port);
        self.trunks.push((port.to_string(), trunking));
        self
    }

    /// A router without switch ports: VLAN and trunk commands are refused.
    pub fn routed_only(mut self) -> Self {
        self.switching = false;
        self.vlans.clear();
        self.trunks.clear();
        self
    }

    pub fn cpu(mut self, percent: f64) -> Self {
        self.cpu_percent = percent;
        self
    }

    pub fn memory(mut self, percent: f64) -> Self {
        self.memory_percent = percent;
        self
    }

    /// Output of one logical command.
    pub fn render(&self, kind: CommandKind) -> String {
        match kind {
            CommandKind::Interfaces => self.render_interfaces(),
            CommandKind::InterfacesBrief => self.render_interfaces_brief(),
            CommandKind::BgpSummary => self.render_bgp(),
            CommandKind::OspfNeighbors => self.render_ospf(),
            CommandKind::OspfNeighborDetail => String::new(),
            CommandKind::VlanBrief | CommandKind::InterfacesTrunk if !self.switching => {
                "        ^\n% Invalid input detected at '^' marker.\n".to_string()
            }
            CommandKind::VlanBrief => self.render_vlans(),
            CommandKind::InterfacesTrunk => self.render_trunks(),
            CommandKind::Cpu => format!(
                "CPU utilization for five seconds: {}%/0%; one minute: 5%; five minutes: 4%\n",
                self.cpu_percent
            ),
            CommandKind::Memory => {
                let total: u64 = 100_000_000;
                let used = (self.memory_percent * 1_000_000.0) as u64;
                format!(
                    "                Head    Total(b)     Used(b)     Free(b)   Lowest(b)  Largest(b)\n\
                     Processor   6A4F3E8   {}    {}    {}    48000000    47000000\n",
                    total,
                    used,
                    total - used
                )
            }
        }
    }

    /// Outputs keyed by the command strings of the default cisco_ios set.
    pub fn command_outputs(&self) -> HashMap<String, String> {
        defaults::cisco_ios()
            .into_iter()
            .map(|spec| (spec.command, self.render(spec.kind)))
            .collect()
    }

    fn render_interfaces(&self) -> String {
        let mut out = String::new();
        for i in &self.interfaces {
            let admin = match (i.admin_up, i.oper_up) {
                (false, _) => "administratively down",
                (true, true) => "up",
                (true, false) => "down",
            };
            let oper = if i.oper_up { "up" } else { "down" };
            let _ = writeln!(out, "{} is {}, line protocol is {}", i.name, admin, oper);
            let _ = writeln!(out, "     1200 packets input, {} bytes, 0 no buffer", i.in_octets);
            let _ = writeln!(out, "     900 packets output, {} bytes, 0 underruns", i.out_octets);
        }
        out
    }

    fn render_interfaces_brief(&self) -> String {
        let mut out = String::from(
            "Interface              IP-Address      OK? Method Status                Protocol\n",
        );
        for i in &self.interfaces {
            let status = if !i.admin_up {
                "administratively down"
            } else if i.oper_up {
                "up"
            } else {
                "down"
            };
            let oper = if i.oper_up { "up" } else { "down" };
            let _ = writeln!(out, "{:<22} unassigned      YES NVRAM  {:<21} {}", i.name, status, oper);
        }
        out
    }

    fn render_bgp(&self) -> String {
        if self.bgp.is_empty() {
            return "% BGP not active\n".to_string();
        }
        let mut out = String::from(
            "BGP router identifier 1.1.1.1, local AS number 65000\n\
             BGP table version is 12, main routing table version 12\n\n\
             Neighbor        V           AS MsgRcvd MsgSent   TblVer  InQ OutQ Up/Down  State/PfxRcd\n",
        );
        for b in &self.bgp {
            let (uptime, last) = if b.state == "Established" {
                ("01:02:03", "5".to_string())
            } else {
                ("never", b.state.clone())
            };
            let _ = writeln!(
                out,
                "{:<15} 4 {:>12}     120     118       12    0    0 {:<8} {}",
                b.peer, b.as_number, uptime, last
            );
        }
        out
    }

    fn render_ospf(&self) -> String {
        if self.ospf.is_empty() {
            return String::new();
        }
        let mut out = String::from(
            "Neighbor ID     Pri   State           Dead Time   Address         Interface\n",
        );
        for o in &self.ospf {
            let _ = writeln!(
                out,
                "{:<15}   1   {:<15} 00:00:38    {:<15} {}",
                o.neighbor_id,
                format!("{}/DR", o.state),
                o.address,
                o.interface
            );
        }
        out
    }

    fn render_vlans(&self) -> String {
        let mut out = String::from(
            "VLAN Name                             Status    Ports\n\
             ---- -------------------------------- --------- -------------------------------\n",
        );
        for (id, name, active) in &self.vlans {
            let status = if *active { "active" } else { "act/lshut" };
            let _ = writeln!(out, "{:<4} {:<32} {:<9}", id, name, status);
        }
        out
    }

    fn render_trunks(&self) -> String {
        if self.trunks.is_empty() {
            return String::new();
        }
        let mut out =
            String::from("Port        Mode             Encapsulation  Status        Native vlan\n");
        for (port, trunking) in &self.trunks {
            let status = if *trunking { "trunking" } else { "not-trunking" };
            let _ = writeln!(out, "{:<11} on               802.1q         {:<13} 1", port, status);
        }
        out
    }
}
