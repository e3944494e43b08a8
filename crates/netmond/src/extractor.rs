//! State extractor: turns raw vendor CLI output into typed records.
//!
//! Parsing is strictly all-or-nothing. A command whose output does not look
//! like what the parser expects yields [`MonitorError::Parse`] and no
//! records, and [`Extractor::extract`] only builds a [`Snapshot`] when every
//! command of the cycle parsed. Inside a table every non-blank row must be
//! understood; a row the parser cannot read fails the command.
//!
//! The one exception is an optional command the device refuses (`% Invalid
//! input`, as switching commands on a pure router): it contributes nothing.

use chrono::{DateTime, Utc};
use netmon_common::platform::defaults::CISCO_FAMILY;
use netmon_common::{CommandKind, CommandOutput, MonitorError, MonitorResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::types::{
    BgpNeighbor, InterfaceState, L2Kind, L2Service, LinkStatus, OspfNeighbor, Snapshot,
    BGP_ESTABLISHED,
};

/// Output family understood by the parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Cisco IOS and IOS-XE style CLI.
    CiscoIos,
}

impl Dialect {
    /// Looks up a dialect by name as used in configuration.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "cisco_ios" | "cisco_xe" | "cisco" => Some(Dialect::CiscoIos),
            _ => None,
        }
    }
}

/// Typed records produced by one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Records {
    Interfaces(Vec<InterfaceState>),
    BgpNeighbors(Vec<BgpNeighbor>),
    OspfNeighbors(Vec<OspfNeighbor>),
    /// Peer address → area, from the detailed OSPF listing.
    OspfAreas(Vec<(String, String)>),
    L2Services(Vec<L2Service>),
    CpuPercent(f64),
    MemoryPercent(f64),
}

static CLI_ERROR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*% (Invalid input|Incomplete command|Ambiguous command|Unknown command)")
        .expect("Invalid regex pattern")
});

static IF_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\S+) is (administratively down|up|down|deleted)(?: \([^)]*\))?, line protocol is (up|down)",
    )
    .expect("Invalid regex pattern")
});

static IF_INPUT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+\d+ packets input, (\d+) bytes").expect("Invalid regex pattern")
});

static IF_OUTPUT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+\d+ packets output, (\d+) bytes").expect("Invalid regex pattern")
});

static IF_BRIEF_ROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\S+)\s+(\S+)\s+(?:YES|NO)\s+(\S+)\s+(administratively down|up|down|deleted)\s+(up|down)\s*$",
    )
    .expect("Invalid regex pattern")
});

static BGP_ROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([0-9]{1,3}(?:\.[0-9]{1,3}){3}|[0-9A-Fa-f]*:[0-9A-Fa-f:]+)\s+[46]\s+(\d+(?:\.\d+)?)\s+\d+\s+\d+\s+\d+\s+\d+\s+\d+\s+(\S+)\s+(.+?)\s*$",
    )
    .expect("Invalid regex pattern")
});

/// A neighbor address alone on its line; IOS wraps long addresses.
static BGP_WRAPPED_ADDR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]{1,3}(?:\.[0-9]{1,3}){3}|[0-9A-Fa-f]*:[0-9A-Fa-f:]+)\s*$")
        .expect("Invalid regex pattern")
});

static UPTIME_CLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+):(\d{2}):(\d{2})$").expect("Invalid regex pattern"));

static UPTIME_UNITS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d+[ywdhm])+$").expect("Invalid regex pattern"));

static UPTIME_UNIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)([ywdhm])").expect("Invalid regex pattern"));

static OSPF_ROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d+\.\d+\.\d+\.\d+)\s+(\d+)\s+([A-Za-z0-9]+)(?:/\s*(\S+))?\s+(\S+)\s+(\d+\.\d+\.\d+\.\d+)\s+(\S+)\s*$",
    )
    .expect("Invalid regex pattern")
});

static OSPF_DETAIL_NEIGHBOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Neighbor (\S+), interface address (\S+)").expect("Invalid regex pattern")
});

static OSPF_DETAIL_AREA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"In the area (\S+) via interface").expect("Invalid regex pattern")
});

static VLAN_ROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)\s+(\S+)\s+(\S+)").expect("Invalid regex pattern")
});

static TRUNK_ROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\S+)\s+(\S+)\s+(\S+)\s+(\S+)\s+(\d+)\s*$").expect("Invalid regex pattern")
});

static CPU_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"CPU utilization for five seconds: (\d+(?:\.\d+)?)%(?:/(\d+(?:\.\d+)?)%)?")
        .expect("Invalid regex pattern")
});

static MEMORY_PROCESSOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*Processor\s+\S+\s+(\d+)\s+(\d+)\s+(\d+)").expect("Invalid regex pattern")
});

/// Reserved token-ring / FDDI VLANs present on every Catalyst.
const RESERVED_VLANS: std::ops::RangeInclusive<u32> = 1002..=1005;

/// Parses command output according to the device's platform.
#[derive(Debug, Clone)]
pub struct Extractor {
    dialects: HashMap<String, Dialect>,
}

impl Default for Extractor {
    fn default() -> Self {
        let dialects = CISCO_FAMILY
            .iter()
            .map(|p| (p.to_string(), Dialect::CiscoIos))
            .collect();
        Self { dialects }
    }
}

impl Extractor {
    /// Maps an additional platform tag onto a known dialect.
    pub fn register_platform(&mut self, platform: impl Into<String>, dialect: Dialect) {
        self.dialects.insert(platform.into(), dialect);
    }

    /// Returns the dialect for a platform tag.
    pub fn dialect(&self, platform: &str) -> Option<Dialect> {
        self.dialects.get(platform).copied()
    }

    /// Returns true if the device refused to run the command.
    pub fn is_rejected(raw: &str) -> bool {
        CLI_ERROR_RE.is_match(raw)
    }

    /// Parses one command output into typed records.
    pub fn parse(&self, platform: &str, kind: CommandKind, raw: &str) -> MonitorResult<Records> {
        let Some(dialect) = self.dialect(platform) else {
            return Err(MonitorError::parse(platform, kind.as_str(), "unsupported platform"));
        };
        let fail = |reason: &str| MonitorError::parse(platform, kind.as_str(), reason);

        if let Some(m) = CLI_ERROR_RE.captures(raw) {
            return Err(fail(&format!("device rejected command: {}", &m[1])));
        }

        let parsed = match dialect {
            Dialect::CiscoIos => match kind {
                CommandKind::Interfaces => cisco::interfaces(raw).map(Records::Interfaces),
                CommandKind::InterfacesBrief => {
                    cisco::interfaces_brief(raw).map(Records::Interfaces)
                }
                CommandKind::BgpSummary => cisco::bgp_summary(raw).map(Records::BgpNeighbors),
                CommandKind::OspfNeighbors => {
                    cisco::ospf_neighbors(raw).map(Records::OspfNeighbors)
                }
                CommandKind::OspfNeighborDetail => {
                    cisco::ospf_neighbor_detail(raw).map(Records::OspfAreas)
                }
                CommandKind::VlanBrief => cisco::vlan_brief(raw).map(Records::L2Services),
                CommandKind::InterfacesTrunk => {
                    cisco::interfaces_trunk(raw).map(Records::L2Services)
                }
                CommandKind::Cpu => cisco::cpu(raw).map(Records::CpuPercent),
                CommandKind::Memory => cisco::memory(raw).map(Records::MemoryPercent),
            },
        };
        parsed.map_err(|reason| fail(reason))
    }

    /// Parses every output of a cycle and folds them into a snapshot.
    pub fn extract(
        &self,
        platform: &str,
        outputs: &[CommandOutput],
        taken_at: DateTime<Utc>,
    ) -> MonitorResult<Snapshot> {
        let mut builder = SnapshotBuilder::new(taken_at);
        for output in outputs {
            if output.spec.optional && Self::is_rejected(&output.raw) {
                debug!(
                    platform,
                    command = %output.spec.command,
                    "Optional command not supported by device, skipped"
                );
                continue;
            }
            let records = self.parse(platform, output.spec.kind, &output.raw)?;
            builder.add(records);
        }
        Ok(builder.build())
    }
}

/// Folds records of one cycle into a [`Snapshot`].
#[derive(Debug)]
pub struct SnapshotBuilder {
    snapshot: Snapshot,
    ospf_areas: BTreeMap<String, String>,
}

impl SnapshotBuilder {
    pub fn new(taken_at: DateTime<Utc>) -> Self {
        Self {
            snapshot: Snapshot::new(taken_at),
            ospf_areas: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, records: Records) {
        let s = &mut self.snapshot;
        match records {
            Records::Interfaces(list) => {
                for iface in list {
                    s.interfaces.insert(iface.name.clone(), iface);
                }
            }
            Records::BgpNeighbors(list) => {
                for n in list {
                    s.bgp_neighbors.insert(n.peer_address.clone(), n);
                }
            }
            Records::OspfNeighbors(list) => {
                for n in list {
                    s.ospf_neighbors.insert(n.peer_address.clone(), n);
                }
            }
            Records::OspfAreas(areas) => self.ospf_areas.extend(areas),
            Records::L2Services(list) => {
                for svc in list {
                    s.l2_services.insert(svc.key(), svc);
                }
            }
            Records::CpuPercent(v) => s.resources.cpu_percent = Some(v),
            Records::MemoryPercent(v) => s.resources.memory_percent = Some(v),
        }
    }

    pub fn build(mut self) -> Snapshot {
        for (addr, area) in self.ospf_areas {
            if let Some(n) = self.snapshot.ospf_neighbors.get_mut(&addr) {
                n.area = Some(area);
            }
        }
        self.snapshot
    }
}

/// Converts a BGP `Up/Down` column to seconds. `never` yields `None`.
///
/// Accepts `hh:mm:ss` and unit strings such as `1d02h`, `2w3d`, `1y5w`.
/// Values that do not fit in `u64` seconds yield `None`.
pub fn parse_uptime(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("never") {
        return None;
    }
    if let Some(c) = UPTIME_CLOCK_RE.captures(s) {
        let h: u64 = c[1].parse().ok()?;
        let m: u64 = c[2].parse().ok()?;
        let sec: u64 = c[3].parse().ok()?;
        return h.checked_mul(3600)?.checked_add(m * 60 + sec);
    }
    if !UPTIME_UNITS_RE.is_match(s) {
        return None;
    }
    let mut total = 0u64;
    for c in UPTIME_UNIT_RE.captures_iter(s) {
        let n: u64 = c[1].parse().ok()?;
        let unit: u64 = match &c[2] {
            "y" => 365 * 86_400,
            "w" => 7 * 86_400,
            "d" => 86_400,
            "h" => 3_600,
            _ => 60,
        };
        total = total.checked_add(n.checked_mul(unit)?)?;
    }
    Some(total)
}

/// Parses an AS number in asplain (`65001`) or asdot (`1.10`) notation.
fn parse_as_number(s: &str) -> Option<u32> {
    match s.split_once('.') {
        Some((high, low)) => {
            let high: u32 = high.parse().ok()?;
            let low: u32 = low.parse().ok()?;
            if high > 0xFFFF || low > 0xFFFF {
                return None;
            }
            Some((high << 16) | low)
        }
        None => s.parse().ok(),
    }
}

fn percent(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

mod cisco {
    use super::*;

    type ParseResult<T> = Result<T, &'static str>;

    fn admin_status(word: &str) -> LinkStatus {
        if word == "administratively down" || word == "deleted" {
            LinkStatus::Down
        } else {
            LinkStatus::Up
        }
    }

    fn oper_status(word: &str) -> LinkStatus {
        if word == "up" {
            LinkStatus::Up
        } else {
            LinkStatus::Down
        }
    }

    pub(super) fn interfaces(raw: &str) -> ParseResult<Vec<InterfaceState>> {
        let mut out: Vec<InterfaceState> = Vec::new();
        for line in raw.lines() {
            if let Some(c) = IF_HEADER_RE.captures(line) {
                out.push(InterfaceState {
                    name: c[1].to_string(),
                    admin_status: admin_status(&c[2]),
                    oper_status: oper_status(&c[3]),
                    in_octets: 0,
                    out_octets: 0,
                });
                continue;
            }
            let Some(current) = out.last_mut() else {
                continue;
            };
            if let Some(c) = IF_INPUT_RE.captures(line) {
                current.in_octets = c[1].parse().map_err(|_| "input byte counter overflow")?;
            } else if let Some(c) = IF_OUTPUT_RE.captures(line) {
                current.out_octets = c[1].parse().map_err(|_| "output byte counter overflow")?;
            }
        }
        if out.is_empty() {
            return Err("no interfaces found");
        }
        Ok(out)
    }

    pub(super) fn interfaces_brief(raw: &str) -> ParseResult<Vec<InterfaceState>> {
        let mut rows = raw
            .lines()
            .skip_while(|l| !(l.starts_with("Interface") && l.contains("Protocol")));
        if rows.next().is_none() {
            return Err("missing interface table header");
        }
        let mut out = Vec::new();
        for line in rows.filter(|l| !l.trim().is_empty()) {
            let c = IF_BRIEF_ROW_RE
                .captures(line)
                .ok_or("unrecognized interface row")?;
            out.push(InterfaceState {
                name: c[1].to_string(),
                admin_status: admin_status(&c[4]),
                oper_status: oper_status(&c[5]),
                in_octets: 0,
                out_octets: 0,
            });
        }
        if out.is_empty() {
            return Err("no interfaces found");
        }
        Ok(out)
    }

    fn bgp_row(c: regex::Captures<'_>) -> ParseResult<BgpNeighbor> {
        let as_number = parse_as_number(&c[2]).ok_or("invalid AS number")?;
        let last = c[4].trim();
        let (session_state, prefixes_received) = match last.parse::<u64>() {
            Ok(pfx) => (BGP_ESTABLISHED.to_string(), Some(pfx)),
            Err(_) => (last.split_whitespace().collect::<Vec<_>>().join(" "), None),
        };
        Ok(BgpNeighbor {
            peer_address: c[1].to_string(),
            as_number,
            session_state,
            uptime_secs: parse_uptime(&c[3]),
            prefixes_received,
        })
    }

    pub(super) fn bgp_summary(raw: &str) -> ParseResult<Vec<BgpNeighbor>> {
        if raw.trim().is_empty() || raw.contains("BGP not active") {
            return Ok(Vec::new());
        }
        let is_header = |l: &str| l.starts_with("Neighbor") && l.contains("State/PfxRcd");
        if !raw.lines().any(is_header) {
            if raw.contains("BGP router identifier") {
                return Ok(Vec::new());
            }
            return Err("unrecognized BGP summary output");
        }

        let mut out = Vec::new();
        let mut wrapped: Option<&str> = None;
        for line in raw.lines().skip_while(|l| !is_header(*l)).skip(1) {
            if let Some(address) = wrapped.take() {
                let joined = format!("{} {}", address, line.trim_start());
                let c = BGP_ROW_RE
                    .captures(&joined)
                    .ok_or("wrapped BGP neighbor row without continuation")?;
                out.push(bgp_row(c)?);
                continue;
            }
            if line.trim().is_empty() || line.starts_with("Total number of neighbors") {
                continue;
            }
            if let Some(c) = BGP_ROW_RE.captures(line) {
                out.push(bgp_row(c)?);
            } else if let Some(c) = BGP_WRAPPED_ADDR_RE.captures(line) {
                wrapped = c.get(1).map(|m| m.as_str());
            } else {
                return Err("unrecognized BGP neighbor row");
            }
        }
        if wrapped.is_some() {
            return Err("wrapped BGP neighbor row without continuation");
        }
        Ok(out)
    }

    pub(super) fn ospf_neighbors(raw: &str) -> ParseResult<Vec<OspfNeighbor>> {
        let lower = raw.to_ascii_lowercase();
        if raw.trim().is_empty() || lower.contains("no router process") {
            return Ok(Vec::new());
        }
        let mut rows = raw.lines().skip_while(|l| !l.starts_with("Neighbor ID"));
        if rows.next().is_none() {
            return Err("unrecognized OSPF neighbor output");
        }
        let mut out = Vec::new();
        for line in rows.filter(|l| !l.trim().is_empty()) {
            let c = OSPF_ROW_RE
                .captures(line)
                .ok_or("unrecognized OSPF neighbor row")?;
            let role = c
                .get(4)
                .map(|m| m.as_str())
                .filter(|r| *r != "-")
                .map(str::to_string);
            out.push(OspfNeighbor {
                neighbor_id: c[1].to_string(),
                state: c[3].to_ascii_uppercase(),
                role,
                area: None,
                peer_address: c[6].to_string(),
                interface: c[7].to_string(),
            });
        }
        Ok(out)
    }

    pub(super) fn ospf_neighbor_detail(raw: &str) -> ParseResult<Vec<(String, String)>> {
        if raw.trim().is_empty() || raw.to_ascii_lowercase().contains("no router process") {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut pending: Option<String> = None;
        for line in raw.lines() {
            if let Some(c) = OSPF_DETAIL_NEIGHBOR_RE.captures(line) {
                if pending.is_some() {
                    return Err("OSPF neighbor without area");
                }
                pending = Some(c[2].to_string());
            } else if let Some(c) = OSPF_DETAIL_AREA_RE.captures(line) {
                let addr = pending.take().ok_or("OSPF area without neighbor")?;
                out.push((addr, c[1].to_string()));
            }
        }
        if pending.is_some() {
            return Err("OSPF neighbor without area");
        }
        if out.is_empty() {
            return Err("unrecognized OSPF neighbor detail output");
        }
        Ok(out)
    }

    pub(super) fn vlan_brief(raw: &str) -> ParseResult<Vec<L2Service>> {
        if !raw.lines().any(|l| l.starts_with("VLAN") && l.contains("Status")) {
            return Err("missing VLAN table header");
        }
        let rows = raw
            .lines()
            .skip_while(|l| !(l.starts_with("VLAN") && l.contains("Status")))
            .skip(1);
        let mut out = Vec::new();
        for line in rows {
            // Separator and wrapped port lists.
            if line.trim().is_empty() || line.starts_with("----") || line.starts_with(' ') {
                continue;
            }
            let c = VLAN_ROW_RE.captures(line).ok_or("unrecognized VLAN row")?;
            let id: u32 = c[1].parse().map_err(|_| "invalid VLAN id")?;
            if RESERVED_VLANS.contains(&id) {
                continue;
            }
            let state = if &c[3] == "active" {
                LinkStatus::Up
            } else {
                LinkStatus::Down
            };
            out.push(L2Service {
                kind: L2Kind::Vlan,
                name: id.to_string(),
                state,
            });
        }
        Ok(out)
    }

    pub(super) fn interfaces_trunk(raw: &str) -> ParseResult<Vec<L2Service>> {
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut lines = raw.lines().skip_while(|l| !l.starts_with("Port"));
        match lines.next() {
            Some(header) if header.contains("Mode") => {}
            _ => return Err("missing trunk table header"),
        }
        let mut out = Vec::new();
        for line in lines {
            if line.trim().is_empty() || line.starts_with("Port") {
                break;
            }
            let c = TRUNK_ROW_RE.captures(line).ok_or("unrecognized trunk row")?;
            let state = if &c[4] == "trunking" {
                LinkStatus::Up
            } else {
                LinkStatus::Down
            };
            out.push(L2Service {
                kind: L2Kind::Trunk,
                name: c[1].to_string(),
                state,
            });
        }
        Ok(out)
    }

    pub(super) fn cpu(raw: &str) -> ParseResult<f64> {
        let c = CPU_RE.captures(raw).ok_or("missing CPU utilization line")?;
        let value: f64 = c[1].parse().map_err(|_| "invalid CPU percentage")?;
        Ok(percent(value))
    }

    pub(super) fn memory(raw: &str) -> ParseResult<f64> {
        let c = MEMORY_PROCESSOR_RE
            .captures(raw)
            .ok_or("missing Processor memory pool")?;
        let total: f64 = c[1].parse().map_err(|_| "invalid total memory")?;
        let used: f64 = c[2].parse().map_err(|_| "invalid used memory")?;
        if total <= 0.0 {
            return Err("processor pool reports zero total");
        }
        Ok(percent(used * 100.0 / total))
    }
}
