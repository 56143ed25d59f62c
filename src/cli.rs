use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use ofp_firewall::config::{
    ControllerConfig, ForwardingMode, LogFormat, LogLevel, SessionConfig, DEFAULT_LISTEN_ADDR,
    DEFAULT_RULES_PATH,
};

#[derive(Parser, Debug)]
#[command(
    name = "ofp_firewall_controller",
    about = "OpenFlow 1.0 controller with a static firewall and L2 learning",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Address to accept switch connections on
    #[arg(short, long, default_value = DEFAULT_LISTEN_ADDR, env = "OFP_LISTEN")]
    pub listen: SocketAddr,

    /// Firewall policy file, read each time a switch connects
    #[arg(short, long, default_value = DEFAULT_RULES_PATH, env = "OFP_FIREWALL_RULES")]
    pub rules: PathBuf,

    /// Forwarding behaviour for packets without a flow
    #[arg(short, long, value_enum, default_value_t = ForwardingMode::Switch)]
    pub mode: ForwardingMode,

    /// Log level, overridden by RUST_LOG when set
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Log format: text (development) or json (log aggregators)
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn into_config(self) -> ControllerConfig {
        ControllerConfig {
            listen: self.listen,
            session: SessionConfig {
                rules_path: self.rules,
                mode: self.mode,
            },
            log_level: self.log_level,
            log_format: self.log_format,
        }
    }
}
