use std::io;

use thiserror::Error;

/// Errors raised while encoding, decoding, or exchanging OpenFlow messages.
#[derive(Debug, Error)]
pub enum OfpError {
    #[error("I/O error on switch connection: {0}")]
    Io(#[from] io::Error),

    #[error("unsupported OpenFlow version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("unknown OpenFlow message type: {0}")]
    UnknownMessageType(u8),

    #[error("truncated {what}: needed {needed} bytes, got {got}")]
    Truncated {
        what: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("message of {0} bytes exceeds the 16-bit OpenFlow length field")]
    MessageTooLarge(usize),

    #[error("invalid value {value:#x} for {field}")]
    InvalidField { field: &'static str, value: u32 },

    #[error("invalid action: {0}")]
    InvalidAction(&'static str),
}

impl OfpError {
    /// Fail with `Truncated` unless `buf` holds at least `needed` bytes.
    pub(crate) fn ensure_len(what: &'static str, buf: &[u8], needed: usize) -> Result<(), Self> {
        if buf.len() < needed {
            return Err(OfpError::Truncated {
                what,
                needed,
                got: buf.len(),
            });
        }
        Ok(())
    }
}
