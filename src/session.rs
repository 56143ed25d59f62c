//! Per-switch control state.
//!
//! A `SwitchSession` is created when a switch finishes its handshake and lives
//! until the connection closes. It owns the firewall policy, the learning
//! switch with its MAC table, and the handle used to talk to the switch.
//! Nothing in a session is shared with other sessions, and packet-ins are
//! handled one at a time through `&mut self`.

use tracing::{info, warn};

use crate::config::{ForwardingMode, SessionConfig};
use crate::firewall::{self, FirewallState};
use crate::learning_switch::LearningSwitch;
use crate::mac_table::MacTable;
use crate::ofp_controller::SwitchHandle;
use crate::openflow0x01::message::Message;
use crate::openflow0x01::PacketIn;
use crate::policy::{self, FirewallRule, PolicyError};

pub struct SwitchSession<H: SwitchHandle> {
    datapath_id: u64,
    handle: H,
    firewall: FirewallState,
    switch: LearningSwitch,
}

impl<H: SwitchHandle> SwitchSession<H> {
    /// Start controlling the switch identified by `datapath_id`.
    ///
    /// Loads the policy from `config.rules_path` and installs it before the
    /// session exists, so no packet can be forwarded ahead of the firewall.
    pub fn on_connection_up(datapath_id: u64, handle: H, config: &SessionConfig) -> Self {
        let policy = policy::load(&config.rules_path);
        if let Err(ref e) = policy {
            warn!(
                dpid = datapath_id,
                path = %config.rules_path.display(),
                error = %e,
                "cannot load firewall policy"
            );
        }
        Self::with_policy(datapath_id, handle, config.mode, policy)
    }

    /// Same as `on_connection_up`, with the policy already loaded.
    ///
    /// Any policy error leaves the firewall disabled for the whole session.
    pub fn with_policy(
        datapath_id: u64,
        mut handle: H,
        mode: ForwardingMode,
        policy: Result<Vec<FirewallRule>, PolicyError>,
    ) -> Self {
        let firewall = match policy {
            Ok(rules) => {
                firewall::apply(&rules, &mut handle);
                info!(dpid = datapath_id, rules = rules.len(), "firewall enabled");
                FirewallState::Enabled(rules)
            }
            Err(e) => {
                warn!(dpid = datapath_id, error = %e, "continuing without firewall");
                FirewallState::Disabled(e)
            }
        };
        info!(dpid = datapath_id, ?mode, "switch session started");
        SwitchSession {
            datapath_id,
            handle,
            firewall,
            switch: LearningSwitch::new(mode),
        }
    }

    /// Handle one packet-in to completion.
    ///
    /// A packet with an incomplete Ethernet header is dropped without reply.
    pub fn packet_in(&mut self, pkt: PacketIn) {
        match self.switch.packet_in(pkt) {
            Ok(msg) => self.send(msg),
            Err(e) => warn!(dpid = self.datapath_id, error = %e, "ignoring incomplete packet"),
        }
    }

    /// Fire-and-forget send; failures are logged, not retried.
    pub fn send(&mut self, msg: Message) {
        if let Err(e) = self.handle.send_message(0, msg) {
            warn!(dpid = self.datapath_id, error = %e, "failed to send message to switch");
        }
    }

    pub fn datapath_id(&self) -> u64 {
        self.datapath_id
    }

    pub fn firewall(&self) -> &FirewallState {
        &self.firewall
    }

    pub fn known_hosts(&self) -> &MacTable {
        self.switch.known_hosts()
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut H {
        &mut self.handle
    }

    /// End the session, releasing its state and returning the switch handle.
    pub fn into_handle(self) -> H {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::openflow0x01::{PacketInReason, Payload};
    use crate::policy::parse_rules;

    fn packet_in(port: u16, src: u8, dst: u8) -> PacketIn {
        let mut frame = vec![0xaa, 0xbb, 0xcc, 0xdd, 0xee, dst];
        frame.extend_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, src]);
        frame.extend_from_slice(&[0x08, 0x06]);
        PacketIn {
            total_len: frame.len() as u16,
            input_payload: Payload::NotBuffered(frame),
            port,
            reason: PacketInReason::NoMatch,
        }
    }

    #[test]
    fn rules_are_installed_at_connection_up() {
        let rules = parse_rules("10.0.0.1,,80,tcp\n".as_bytes());
        let session = SwitchSession::with_policy(1, Vec::<Message>::new(), ForwardingMode::Switch, rules);
        assert!(session.firewall().is_enabled());
        assert_eq!(session.handle().len(), 2);
        assert!(matches!(session.handle()[0], Message::FlowMod(ref fm) if fm.actions.is_empty()));
        assert_eq!(session.handle()[1], Message::BarrierRequest);
    }

    #[test]
    fn policy_error_disables_firewall() {
        let rules = parse_rules("10.0.0.1,,80\n".as_bytes());
        let session = SwitchSession::with_policy(1, Vec::<Message>::new(), ForwardingMode::Switch, rules);
        assert!(!session.firewall().is_enabled());
        assert!(session.handle().is_empty());
    }

    #[test]
    fn connection_up_reads_configured_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, ",10.0.0.9,,udp").unwrap();
        let config = SessionConfig {
            rules_path: file.path().to_path_buf(),
            mode: ForwardingMode::Hub,
        };
        let session = SwitchSession::on_connection_up(7, Vec::<Message>::new(), &config);
        assert_eq!(session.datapath_id(), 7);
        assert_eq!(session.firewall().rules().len(), 1);
    }

    #[test]
    fn packet_in_replies_through_handle() {
        let mut session = SwitchSession::with_policy(1, Vec::<Message>::new(), ForwardingMode::Switch, Ok(vec![]));
        session.packet_in(packet_in(3, 0x01, 0x02));
        session.packet_in(packet_in(4, 0x02, 0x01));
        let sent = session.into_handle();
        assert!(matches!(sent[0], Message::PacketOut(_)));
        assert!(matches!(sent[1], Message::FlowMod(_)));
    }

    #[test]
    fn incomplete_packet_sends_nothing() {
        let mut session = SwitchSession::with_policy(1, Vec::<Message>::new(), ForwardingMode::Switch, Ok(vec![]));
        let mut pkt = packet_in(3, 0x01, 0x02);
        pkt.input_payload = Payload::NotBuffered(vec![0; 13]);
        session.packet_in(pkt);
        assert!(session.handle().is_empty());
        assert!(session.known_hosts().is_empty());
    }
}
