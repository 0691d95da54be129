use std::process::Command;

use crate::{
    command::{self, Runner},
    commands::{CommandBuilder, RuleAction},
    directive::Directive,
    plan::QueuePlan,
};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("command `{cmd}` failed: {source}")]
    Command {
        cmd: String,
        #[source]
        source: command::Error,
    },
    #[error("directive rejected: {0}")]
    Rejected(String),
}

/// Turns [`Directive`]s into actual queueing configuration.
///
/// The core only needs to know whether each directive succeeded.
pub trait QueueBackend {
    fn execute(&mut self, directive: &Directive) -> Result<(), BackendError>;
}

impl<B: QueueBackend + ?Sized> QueueBackend for Box<B> {
    fn execute(&mut self, directive: &Directive) -> Result<(), BackendError> {
        (**self).execute(directive)
    }
}

/// Outcome of applying one plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub failed: usize,
}

impl ApplyReport {
    pub const fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Apply every directive of `plan`, in order.
///
/// Failures are logged and skipped. Nothing is rolled back.
pub fn apply_plan<B: QueueBackend + ?Sized>(backend: &mut B, plan: &QueuePlan) -> ApplyReport {
    let mut report = ApplyReport::default();

    for directive in plan.directives() {
        match backend.execute(&directive) {
            Ok(()) => report.applied += 1,
            Err(e) => {
                tracing::warn!(%directive, error = %e, "queue directive failed");
                report.failed += 1;
            }
        }
    }

    tracing::debug!(
        owner = %plan.owner,
        direction = %plan.direction,
        mode = ?plan.mode,
        applied = report.applied,
        failed = report.failed,
        "applied queue plan"
    );

    report
}

/// One command of a directive's script.
enum Step {
    /// Must succeed.
    Run(Command),
    /// Failure is expected when there is nothing to undo (e.g. deleting a missing qdisc).
    Tolerate(Command),
    /// Run `apply` only if `check` fails. Keeps rules from being installed twice.
    Ensure { check: Command, apply: Command },
}

/// A backend that drives `tc`, `ip` and `iptables`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcBackend {
    builder: CommandBuilder,
}

impl TcBackend {
    pub const fn new() -> Self {
        Self { builder: CommandBuilder::new() }
    }

    /// Run every command through `sudo`.
    pub const fn with_sudo(mut self, sudo: bool) -> Self {
        self.builder = self.builder.with_sudo(sudo);
        self
    }

    fn script(&self, directive: &Directive) -> Vec<Step> {
        let b = &self.builder;

        match directive {
            Directive::Reset { device } => vec![
                Step::Tolerate(b.delete_root_qdisc(device)),
                Step::Run(b.add_htb_root(device)),
            ],
            Directive::InstallClass { device, op, parent, class, rate_kbps, ceil_kbps } => {
                vec![Step::Run(b.htb_class(device, *op, *parent, *class, *rate_kbps, *ceil_kbps))]
            }
            Directive::BindMark { device, subnet, match_on, mark, class } => vec![
                Step::Ensure {
                    check: b.mark_rule(RuleAction::Check, *subnet, *match_on, *mark),
                    apply: b.mark_rule(RuleAction::Append, *subnet, *match_on, *mark),
                },
                Step::Run(b.fw_filter(device, *mark, *class)),
            ],
            Directive::MatchSubnet { device, subnet, match_on, class } => {
                vec![Step::Run(b.subnet_filter(device, *subnet, *match_on, *class))]
            }
            Directive::Redirect { device, shaping } => vec![
                Step::Run(b.link_up(shaping)),
                Step::Tolerate(b.delete_ingress_qdisc(device)),
                Step::Run(b.add_ingress_qdisc(device)),
                Step::Run(b.mirred_redirect(device, shaping)),
            ],
        }
    }
}

fn run(mut cmd: Command) -> Result<(), BackendError> {
    Runner::run(&mut cmd)
        .map(|_| ())
        .map_err(|source| BackendError::Command { cmd: command::to_string(&cmd), source })
}

impl QueueBackend for TcBackend {
    fn execute(&mut self, directive: &Directive) -> Result<(), BackendError> {
        for step in self.script(directive) {
            match step {
                Step::Run(cmd) => run(cmd)?,
                Step::Tolerate(cmd) => {
                    if let Err(e) = run(cmd) {
                        tracing::trace!(error = %e, "ignoring failure of cleanup command");
                    }
                }
                Step::Ensure { check, apply } => {
                    if run(check).is_err() {
                        run(apply)?;
                    }
                }
            }
        }

        Ok(())
    }
}

/// A backend that only records and logs directives.
///
/// Used for dry runs, and as a test double for the control loop.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    directives: Vec<Directive>,
    failing_devices: Vec<String>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every directive that targets `device`.
    pub fn fail_device(mut self, device: impl Into<String>) -> Self {
        self.failing_devices.push(device.into());
        self
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    /// Drain the recorded directives.
    pub fn take(&mut self) -> Vec<Directive> {
        std::mem::take(&mut self.directives)
    }
}

impl QueueBackend for RecordingBackend {
    fn execute(&mut self, directive: &Directive) -> Result<(), BackendError> {
        if self.failing_devices.iter().any(|d| d == directive.device()) {
            return Err(BackendError::Rejected(directive.to_string()));
        }

        tracing::info!(%directive, "dry-run directive");
        self.directives.push(directive.clone());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use hopctl_common::{Direction, NodeId};

    use super::*;
    use crate::{
        directive::MatchOn,
        handle::ClassId,
        plan::{PlanMode, RateClass, ShapedInterface},
    };

    fn plan() -> QueuePlan {
        QueuePlan {
            owner: NodeId::new("n0"),
            direction: Direction::Downlink,
            mode: PlanMode::Initialize,
            interfaces: vec![ShapedInterface::new("eth0"), ShapedInterface::new("eth9")],
            ceiling_kbps: 500,
            classes: vec![RateClass {
                id: ClassId::for_index(0),
                node: NodeId::new("n1"),
                subnet: "10.1.0.0/24".parse().unwrap(),
                mark: 11,
                rate_kbps: 500,
                ceil_kbps: 500,
            }],
        }
    }

    #[test]
    fn apply_plan_continues_after_failures() {
        let mut backend = RecordingBackend::new().fail_device("eth9");

        let report = apply_plan(&mut backend, &plan());

        // reset + aggregate + class + mark per device
        assert_eq!(report, ApplyReport { applied: 4, failed: 4 });
        assert!(!report.is_complete());
        assert!(backend.directives().iter().all(|d| d.device() == "eth0"));
    }

    #[test]
    fn tc_script_shapes() {
        let backend = TcBackend::new();
        let directives = plan().directives();

        let rendered = |step: &Step| match step {
            Step::Run(cmd) | Step::Tolerate(cmd) => command::to_string(cmd),
            Step::Ensure { apply, .. } => command::to_string(apply),
        };

        let reset = backend.script(&directives[0]);
        assert_eq!(reset.len(), 2);
        assert!(matches!(reset[0], Step::Tolerate(_)));
        assert_eq!(rendered(&reset[1]), "tc qdisc add dev eth0 root handle 1: htb");

        let mark = backend.script(&directives[3]);
        assert!(matches!(mark[0], Step::Ensure { .. }));
        assert_eq!(
            rendered(&mark[0]),
            "iptables -t mangle -A PREROUTING -d 10.1.0.0/24 -j MARK --set-mark 11"
        );

        let matched = backend.script(&Directive::MatchSubnet {
            device: "ifb0".to_owned(),
            subnet: "10.1.0.0/24".parse().unwrap(),
            match_on: MatchOn::Source,
            class: ClassId::for_index(0),
        });
        assert_eq!(matched.len(), 1);
        assert_eq!(
            rendered(&matched[0]),
            "tc filter add dev ifb0 parent 1: protocol ip prio 2 u32 match ip src 10.1.0.0/24 \
             flowid 1:10"
        );

        let redirect = backend.script(&Directive::Redirect {
            device: "eth0".to_owned(),
            shaping: "ifb0".to_owned(),
        });
        assert_eq!(redirect.len(), 4);
        assert_eq!(rendered(&redirect[0]), "ip link set dev ifb0 up");
    }
}
