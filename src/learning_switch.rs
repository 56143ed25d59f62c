use tracing::debug;

use crate::config::ForwardingMode;
use crate::mac_table::MacTable;
use crate::openflow0x01::message::{add_flow, parse_payload, Message};
use crate::openflow0x01::{Action, PacketIn, PacketOut, Pattern, PseudoPort, OFP_DEFAULT_PRIORITY};
use crate::packet::{Packet, PacketError};

/// Priority of flows installed toward learned hosts.
pub const LEARNED_PRIORITY: u16 = OFP_DEFAULT_PRIORITY;

/// Implements L2 learning switch functionality. Switches forward packets to the
/// learning controller, which will examine the packet and learn the source-port
/// mapping. If the controller already knows the destination location, it pushes
/// a flow entry down to the switch that matches this exact packet and outputs
/// it on the learned port.
///
/// Abstractly, a learning switch can be thought of in terms of two logically
/// distinct components.
///
///  - A _Learning Module_ that builds a map from host MAC addresses to the
///    switch port on which they are connected.
///
///  - A _Routing Module_ that performs traffic routing. If the destination
///    location is known, it installs a flow; otherwise it floods the packet
///    out all ports but the one it came in on.
///
/// In `ForwardingMode::Hub` neither module runs and every packet is flooded.
#[derive(Debug)]
pub struct LearningSwitch {
    mode: ForwardingMode,
    known_hosts: MacTable,
}

impl LearningSwitch {
    pub fn new(mode: ForwardingMode) -> LearningSwitch {
        LearningSwitch {
            mode,
            known_hosts: MacTable::new(),
        }
    }

    pub fn mode(&self) -> ForwardingMode {
        self.mode
    }

    pub fn known_hosts(&self) -> &MacTable {
        &self.known_hosts
    }

    fn learning_packet_in(&mut self, pkt: &PacketIn, pk: &Packet) {
        self.known_hosts.observe(pk.dl_src, pkt.port);
    }

    fn routing_packet_in(&self, pkt: PacketIn, pk: &Packet) -> Message {
        match self.known_hosts.lookup(&pk.dl_dst) {
            Some(p) => {
                debug!(src = %pk.dl_src, dst = %pk.dl_dst, port = p, "installing flow");
                let actions = vec![Action::Output(PseudoPort::PhysicalPort(p))];
                let mut flow = add_flow(LEARNED_PRIORITY, Pattern::from_packet(pkt.port, pk), actions);
                flow.apply_to_packet = pkt.input_payload.buffer_id();
                Message::FlowMod(flow)
            }
            None => {
                debug!(dst = %pk.dl_dst, in_port = pkt.port, "flooding");
                flood(pkt)
            }
        }
    }

    /// Decide what to send back for one packet-in.
    ///
    /// Fails without learning anything when the Ethernet header is incomplete.
    pub fn packet_in(&mut self, pkt: PacketIn) -> Result<Message, PacketError> {
        let pk = parse_payload(&pkt.input_payload)?;
        match self.mode {
            ForwardingMode::Hub => Ok(flood(pkt)),
            ForwardingMode::Switch => {
                self.learning_packet_in(&pkt, &pk);
                Ok(self.routing_packet_in(pkt, &pk))
            }
        }
    }
}

/// Resend the packet out every port except the one it arrived on.
fn flood(pkt: PacketIn) -> Message {
    Message::PacketOut(PacketOut {
        output_payload: pkt.input_payload,
        port_id: Some(pkt.port),
        apply_actions: vec![Action::Output(PseudoPort::AllPorts)],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openflow0x01::{PacketInReason, Payload};
    use crate::packet::MacAddr;

    const HOST_1: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
    const HOST_2: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02]);

    fn frame(src: MacAddr, dst: MacAddr) -> Vec<u8> {
        let mut frame = dst.octets().to_vec();
        frame.extend_from_slice(&src.octets());
        frame.extend_from_slice(&[0x88, 0xb5, 0xde, 0xad]);
        frame
    }

    fn packet_in(port: u16, payload: Payload) -> PacketIn {
        PacketIn {
            total_len: payload.data().len() as u16,
            input_payload: payload,
            port,
            reason: PacketInReason::NoMatch,
        }
    }

    #[test]
    fn unknown_destination_floods_and_learns_source() {
        let mut sw = LearningSwitch::new(ForwardingMode::Switch);
        let payload = Payload::NotBuffered(frame(HOST_1, HOST_2));
        let msg = sw.packet_in(packet_in(3, payload.clone())).unwrap();
        assert_eq!(
            msg,
            Message::PacketOut(PacketOut {
                output_payload: payload,
                port_id: Some(3),
                apply_actions: vec![Action::Output(PseudoPort::AllPorts)],
            })
        );
        assert_eq!(sw.known_hosts().lookup(&HOST_1), Some(3));
        assert_eq!(sw.known_hosts().lookup(&HOST_2), None);
    }

    #[test]
    fn known_destination_installs_exact_flow() {
        let mut sw = LearningSwitch::new(ForwardingMode::Switch);
        sw.packet_in(packet_in(3, Payload::NotBuffered(frame(HOST_1, HOST_2))))
            .unwrap();
        let reply = frame(HOST_2, HOST_1);
        let msg = sw
            .packet_in(packet_in(5, Payload::Buffered(42, reply.clone())))
            .unwrap();
        let Message::FlowMod(flow) = msg else {
            panic!("expected a flow_mod");
        };
        assert_eq!(flow.actions, vec![Action::Output(PseudoPort::PhysicalPort(3))]);
        assert_eq!(flow.apply_to_packet, Some(42));
        assert_eq!(flow.priority, LEARNED_PRIORITY);
        let expected = Pattern::from_packet(5, &Packet::parse(&reply).unwrap());
        assert_eq!(flow.pattern, expected);
        assert_eq!(flow.pattern.in_port, Some(5));
        assert_eq!(flow.pattern.dl_src, Some(HOST_2));
        assert_eq!(flow.pattern.dl_dst, Some(HOST_1));
        assert_eq!(sw.known_hosts().lookup(&HOST_2), Some(5));
    }

    #[test]
    fn unbuffered_hit_has_no_buffer_id() {
        let mut sw = LearningSwitch::new(ForwardingMode::Switch);
        sw.packet_in(packet_in(1, Payload::NotBuffered(frame(HOST_1, HOST_2))))
            .unwrap();
        let msg = sw
            .packet_in(packet_in(2, Payload::NotBuffered(frame(HOST_2, HOST_1))))
            .unwrap();
        assert!(matches!(msg, Message::FlowMod(ref fm) if fm.apply_to_packet.is_none()));
    }

    #[test]
    fn source_moving_ports_is_relearned() {
        let mut sw = LearningSwitch::new(ForwardingMode::Switch);
        sw.packet_in(packet_in(1, Payload::NotBuffered(frame(HOST_1, HOST_2))))
            .unwrap();
        sw.packet_in(packet_in(4, Payload::NotBuffered(frame(HOST_1, HOST_2))))
            .unwrap();
        assert_eq!(sw.known_hosts().lookup(&HOST_1), Some(4));
    }

    #[test]
    fn hub_mode_floods_and_learns_nothing() {
        let mut sw = LearningSwitch::new(ForwardingMode::Hub);
        for port in [1, 2, 1] {
            let msg = sw
                .packet_in(packet_in(port, Payload::NotBuffered(frame(HOST_1, HOST_2))))
                .unwrap();
            assert!(matches!(msg, Message::PacketOut(ref po) if po.port_id == Some(port)));
        }
        assert!(sw.known_hosts().is_empty());
    }

    #[test]
    fn incomplete_packet_is_rejected_before_learning() {
        let mut sw = LearningSwitch::new(ForwardingMode::Switch);
        let err = sw
            .packet_in(packet_in(3, Payload::NotBuffered(vec![0xaa; 9])))
            .unwrap_err();
        assert!(matches!(err, PacketError::Incomplete { got: 9, .. }));
        assert!(sw.known_hosts().is_empty());
    }
}
