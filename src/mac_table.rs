use std::collections::HashMap;

use crate::packet::MacAddr;

/// Where each host was last seen on one switch.
///
/// The latest observation of an address always replaces the previous one and
/// entries never expire; the table lives exactly as long as its session.
#[derive(Debug, Default)]
pub struct MacTable {
    known_hosts: HashMap<MacAddr, u16>,
}

impl MacTable {
    pub fn new() -> MacTable {
        MacTable::default()
    }

    /// Record that `mac` was seen arriving on `port`.
    pub fn observe(&mut self, mac: MacAddr, port: u16) {
        self.known_hosts.insert(mac, port);
    }

    pub fn lookup(&self, mac: &MacAddr) -> Option<u16> {
        self.known_hosts.get(mac).copied()
    }

    pub fn len(&self) -> usize {
        self.known_hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known_hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST_A: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
    const HOST_B: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02]);

    #[test]
    fn lookup_misses_unobserved_address() {
        let table = MacTable::new();
        assert_eq!(table.lookup(&HOST_A), None);
        assert!(table.is_empty());
    }

    #[test]
    fn observe_then_lookup() {
        let mut table = MacTable::new();
        table.observe(HOST_A, 3);
        assert_eq!(table.lookup(&HOST_A), Some(3));
        assert_eq!(table.lookup(&HOST_B), None);
    }

    #[test]
    fn latest_observation_wins() {
        let mut table = MacTable::new();
        table.observe(HOST_A, 3);
        table.observe(HOST_A, 7);
        assert_eq!(table.lookup(&HOST_A), Some(7));
        assert_eq!(table.len(), 1);
    }
}
