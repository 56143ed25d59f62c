//! Installation of the firewall policy into a switch's flow table.
//!
//! Each rule becomes one flow with an empty action list. OpenFlow 1.0 drops
//! packets matching a flow that has no actions, so these flows block traffic
//! without any explicit drop action; switches with other default semantics
//! would need one.

use tracing::{info, warn};

use crate::ofp_controller::SwitchHandle;
use crate::openflow0x01::message::{add_flow, Message};
use crate::openflow0x01::{FlowMod, Pattern, OFP_DEFAULT_PRIORITY};
use crate::packet::ETH_TYP_IP;
use crate::policy::{FirewallRule, PolicyError, Protocol};

/// Firewall flows share the default priority with learned flows; precedence
/// comes from being installed first.
pub const FIREWALL_PRIORITY: u16 = OFP_DEFAULT_PRIORITY;

/// Whether a session enforces a policy, and why not if it doesn't.
#[derive(Debug)]
pub enum FirewallState {
    Enabled(Vec<FirewallRule>),
    Disabled(PolicyError),
}

impl FirewallState {
    pub fn is_enabled(&self) -> bool {
        matches!(self, FirewallState::Enabled(_))
    }

    /// Rules in force; empty when the firewall is disabled.
    pub fn rules(&self) -> &[FirewallRule] {
        match self {
            FirewallState::Enabled(rules) => rules,
            FirewallState::Disabled(_) => &[],
        }
    }
}

/// IPv4 match for `rule`. Unset rule fields stay wildcarded.
pub fn match_of_rule(rule: &FirewallRule) -> Pattern {
    Pattern {
        dl_typ: Some(ETH_TYP_IP),
        nw_src: rule.src,
        nw_dst: rule.dst,
        nw_proto: rule.effective_protocol().and_then(Protocol::ip_proto),
        tp_dst: rule.port,
        ..Pattern::match_all()
    }
}

pub fn flow_mod_of_rule(rule: &FirewallRule) -> FlowMod {
    add_flow(FIREWALL_PRIORITY, match_of_rule(rule), vec![])
}

/// Push one blocking flow per rule, in rule order, then a barrier so the
/// switch has committed them before anything sent afterwards.
///
/// Sends that fail are logged and skipped.
pub fn apply<H: SwitchHandle>(rules: &[FirewallRule], handle: &mut H) {
    for rule in rules {
        match handle.send_message(0, Message::FlowMod(flow_mod_of_rule(rule))) {
            Ok(()) => info!(%rule, "firewall rule added"),
            Err(e) => warn!(%rule, error = %e, "failed to send firewall rule"),
        }
    }
    if rules.is_empty() {
        return;
    }
    if let Err(e) = handle.send_message(0, Message::BarrierRequest) {
        warn!(error = %e, "failed to send barrier after firewall rules");
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::openflow0x01::{FlowModCmd, Timeout};
    use crate::packet::{IP_PROTO_TCP, IP_PROTO_UDP};
    use crate::policy::parse_rules;

    fn rule(line: &str) -> FirewallRule {
        parse_rules(line.as_bytes()).unwrap()[0]
    }

    #[test]
    fn source_port_tcp_rule_match() {
        let pat = match_of_rule(&rule("10.0.0.1,,80,tcp"));
        assert_eq!(
            pat,
            Pattern {
                dl_typ: Some(0x0800),
                nw_src: Some(Ipv4Addr::new(10, 0, 0, 1)),
                nw_proto: Some(IP_PROTO_TCP),
                tp_dst: Some(80),
                ..Pattern::match_all()
            }
        );
        assert_eq!(pat.nw_dst, None);
        assert_eq!(pat.tp_src, None);
    }

    #[test]
    fn port_without_protocol_matches_tcp() {
        let pat = match_of_rule(&rule(",10.0.0.2,22,"));
        assert_eq!(pat.nw_proto, Some(IP_PROTO_TCP));
        assert_eq!(pat.tp_dst, Some(22));
        assert_eq!(pat.nw_dst, Some(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[test]
    fn udp_rule_without_port() {
        let pat = match_of_rule(&rule(",,,UDP"));
        assert_eq!(pat.nw_proto, Some(IP_PROTO_UDP));
        assert_eq!(pat.tp_dst, None);
    }

    #[test]
    fn other_protocol_leaves_ip_protocol_wildcarded() {
        let pat = match_of_rule(&rule("10.0.0.1,,,icmp"));
        assert_eq!(
            pat,
            Pattern {
                dl_typ: Some(ETH_TYP_IP),
                nw_src: Some(Ipv4Addr::new(10, 0, 0, 1)),
                ..Pattern::match_all()
            }
        );

        let pat = match_of_rule(&rule(",,80,icmp"));
        assert_eq!(pat.nw_proto, None);
        assert_eq!(pat.tp_dst, Some(80));
    }

    #[test]
    fn unconstrained_rule_matches_all_ipv4() {
        let pat = match_of_rule(&FirewallRule::default());
        assert_eq!(
            pat,
            Pattern {
                dl_typ: Some(ETH_TYP_IP),
                ..Pattern::match_all()
            }
        );
    }

    #[test]
    fn firewall_flow_has_no_actions() {
        let fm = flow_mod_of_rule(&rule("10.0.0.1,,,"));
        assert!(fm.actions.is_empty());
        assert_eq!(fm.command, FlowModCmd::AddFlow);
        assert_eq!(fm.priority, FIREWALL_PRIORITY);
        assert_eq!(fm.idle_timeout, Timeout::Permanent);
        assert_eq!(fm.hard_timeout, Timeout::Permanent);
    }

    #[test]
    fn apply_sends_rules_in_order_then_barrier() {
        let rules = parse_rules("10.0.0.1,,,\n10.0.0.2,,,\n".as_bytes()).unwrap();
        let mut sent: Vec<Message> = vec![];
        apply(&rules, &mut sent);
        assert_eq!(
            sent,
            vec![
                Message::FlowMod(flow_mod_of_rule(&rules[0])),
                Message::FlowMod(flow_mod_of_rule(&rules[1])),
                Message::BarrierRequest,
            ]
        );
    }

    #[test]
    fn apply_unconstrained_rule_still_sends_flow() {
        let mut sent: Vec<Message> = vec![];
        apply(&[FirewallRule::default()], &mut sent);
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0], Message::FlowMod(ref fm) if fm.pattern.dl_typ == Some(ETH_TYP_IP)));
    }

    #[test]
    fn apply_without_rules_sends_nothing() {
        let mut sent: Vec<Message> = vec![];
        apply(&[], &mut sent);
        assert!(sent.is_empty());
    }

    #[test]
    fn disabled_state_has_no_rules() {
        let state = FirewallState::Disabled(PolicyError::Malformed { line: 1, fields: 5 });
        assert!(!state.is_enabled());
        assert!(state.rules().is_empty());
    }
}
