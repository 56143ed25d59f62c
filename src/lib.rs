mod bits;
pub mod config;
pub mod error;
pub mod firewall;
pub mod learning_switch;
pub mod logging;
pub mod mac_table;
pub mod ofp_controller;
pub mod ofp_header;
pub mod ofp_message;
pub mod openflow0x01;
pub mod packet;
pub mod policy;
pub mod session;
