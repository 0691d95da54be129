//! Builders for the `tc`, `ip` and `iptables` invocations a [`TcBackend`](crate::TcBackend)
//! issues.
//!
//! Every builder only constructs the [`Command`]; running it is left to
//! [`Runner`](crate::command::Runner).

use std::process::Command;

use hopctl_common::IpNet;

use crate::{
    directive::{ClassOp, MatchOn},
    handle::ClassId,
};

/// The `mangle` chain marks are installed in.
const MARK_CHAIN: &str = "PREROUTING";

/// Prefixes programs with `sudo` when the daemon does not run as root.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandBuilder {
    sudo: bool,
}

/// Whether an iptables rule invocation checks for or appends the rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Check,
    Append,
}

impl RuleAction {
    const fn flag(self) -> &'static str {
        match self {
            Self::Check => "-C",
            Self::Append => "-A",
        }
    }
}

impl CommandBuilder {
    pub const fn new() -> Self {
        Self { sudo: false }
    }

    /// Run every command through `sudo`.
    pub const fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    fn program(&self, program: &str) -> Command {
        if self.sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg(program);
            cmd
        } else {
            Command::new(program)
        }
    }

    /// `tc qdisc del dev <device> root`
    pub fn delete_root_qdisc(&self, device: &str) -> Command {
        let mut cmd = self.program("tc");
        cmd.args(["qdisc", "del", "dev", device, "root"]);
        cmd
    }

    /// `tc qdisc add dev <device> root handle 1: htb`
    pub fn add_htb_root(&self, device: &str) -> Command {
        let mut cmd = self.program("tc");
        cmd.args(["qdisc", "add", "dev", device, "root", "handle"])
            .arg(ClassId::ROOT_QDISC.qdisc())
            .arg("htb");
        cmd
    }

    /// `tc class <add|change> dev <device> parent <parent> classid <class>`
    /// `htb rate <r>kbit ceil <c>kbit`
    pub fn htb_class(
        &self,
        device: &str,
        op: ClassOp,
        parent: ClassId,
        class: ClassId,
        rate_kbps: u64,
        ceil_kbps: u64,
    ) -> Command {
        let parent =
            if parent == ClassId::ROOT_QDISC { parent.qdisc() } else { parent.to_string() };
        let rate = format!("{rate_kbps}kbit");
        let ceil = format!("{ceil_kbps}kbit");

        let mut cmd = self.program("tc");
        cmd.args(["class", op.as_str(), "dev", device, "parent", &parent, "classid"])
            .arg(class.to_string())
            .args(["htb", "rate", &rate, "ceil", &ceil]);
        cmd
    }

    /// `iptables -t mangle <-C|-A> PREROUTING <-s|-d> <subnet> -j MARK --set-mark <mark>`
    ///
    /// Uses `ip6tables` for IPv6 subnets. Host bits of `subnet` are cleared.
    pub fn mark_rule(
        &self,
        action: RuleAction,
        subnet: IpNet,
        match_on: MatchOn,
        mark: u32,
    ) -> Command {
        let program = match subnet {
            IpNet::V4(_) => "iptables",
            IpNet::V6(_) => "ip6tables",
        };
        let selector = match match_on {
            MatchOn::Source => "-s",
            MatchOn::Destination => "-d",
        };

        let mut cmd = self.program(program);
        cmd.args(["-t", "mangle", action.flag(), MARK_CHAIN, selector])
            .arg(subnet.trunc().to_string())
            .args(["-j", "MARK", "--set-mark", &mark.to_string()]);
        cmd
    }

    /// `tc filter add dev <device> parent 1: protocol all prio 1 handle <mark> fw flowid <class>`
    pub fn fw_filter(&self, device: &str, mark: u32, class: ClassId) -> Command {
        let mut cmd = self.program("tc");
        cmd.args(["filter", "add", "dev", device, "parent"])
            .arg(ClassId::ROOT_QDISC.qdisc())
            .args(["protocol", "all", "prio", "1", "handle", &mark.to_string(), "fw", "flowid"])
            .arg(class.to_string());
        cmd
    }

    /// `tc filter add dev <device> parent 1: protocol <ip|ipv6> prio <2|3> u32 match <ip|ip6>
    /// <src|dst> <subnet> flowid <class>`
    ///
    /// IPv4 and IPv6 filters sit at different priorities, as tc requires one protocol per
    /// priority.
    pub fn subnet_filter(
        &self,
        device: &str,
        subnet: IpNet,
        match_on: MatchOn,
        class: ClassId,
    ) -> Command {
        let (protocol, prio, selector) = match subnet {
            IpNet::V4(_) => ("ip", "2", "ip"),
            IpNet::V6(_) => ("ipv6", "3", "ip6"),
        };
        let field = match match_on {
            MatchOn::Source => "src",
            MatchOn::Destination => "dst",
        };

        let mut cmd = self.program("tc");
        cmd.args(["filter", "add", "dev", device, "parent"])
            .arg(ClassId::ROOT_QDISC.qdisc())
            .args(["protocol", protocol, "prio", prio, "u32", "match", selector, field])
            .arg(subnet.trunc().to_string())
            .arg("flowid")
            .arg(class.to_string());
        cmd
    }

    /// `ip link set dev <device> up`
    pub fn link_up(&self, device: &str) -> Command {
        let mut cmd = self.program("ip");
        cmd.args(["link", "set", "dev", device, "up"]);
        cmd
    }

    /// `tc qdisc del dev <device> ingress`
    pub fn delete_ingress_qdisc(&self, device: &str) -> Command {
        let mut cmd = self.program("tc");
        cmd.args(["qdisc", "del", "dev", device, "ingress"]);
        cmd
    }

    /// `tc qdisc add dev <device> handle ffff: ingress`
    pub fn add_ingress_qdisc(&self, device: &str) -> Command {
        let mut cmd = self.program("tc");
        cmd.args(["qdisc", "add", "dev", device, "handle"])
            .arg(ClassId::INGRESS.qdisc())
            .arg("ingress");
        cmd
    }

    /// `tc filter add dev <device> parent ffff: protocol all u32 match u32 0 0`
    /// `action mirred egress redirect dev <shaping>`
    ///
    /// `match u32 0 0` matches every packet (a zero mask means "don't care").
    pub fn mirred_redirect(&self, device: &str, shaping: &str) -> Command {
        let mut cmd = self.program("tc");
        cmd.args(["filter", "add", "dev", device, "parent"])
            .arg(ClassId::INGRESS.qdisc())
            .args(["protocol", "all", "u32", "match", "u32", "0", "0"])
            .args(["action", "mirred", "egress", "redirect", "dev", shaping]);
        cmd
    }
}
