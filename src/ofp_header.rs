use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::OfpError;
use crate::openflow0x01::MsgCode;

/// OpenFlow Header
///
/// The first fields of every OpenFlow message, no matter the protocol version.
/// This is parsed to determine version and length of the remaining message, so that
/// it can be properly handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfpHeader {
    version: u8,
    typ: MsgCode,
    length: u16,
    xid: u32,
}

impl OfpHeader {
    /// Byte-size of an encoded `OfpHeader`.
    pub const SIZE: usize = 8;

    /// Create an `OfpHeader` out of the arguments.
    pub fn new(version: u8, typ: MsgCode, length: u16, xid: u32) -> OfpHeader {
        OfpHeader {
            version,
            typ,
            length,
            xid,
        }
    }

    /// Fills a message buffer with the header fields of an `OfpHeader`.
    pub fn marshal(&self, bytes: &mut Vec<u8>) -> Result<(), OfpError> {
        bytes.write_u8(self.version)?;
        bytes.write_u8(self.typ as u8)?;
        bytes.write_u16::<BigEndian>(self.length)?;
        bytes.write_u32::<BigEndian>(self.xid)?;
        Ok(())
    }

    /// Takes a message buffer (sized for an `OfpHeader`) and returns an `OfpHeader`.
    ///
    /// Fails on an unknown message type code or a length shorter than the header itself.
    pub fn parse(buf: [u8; OfpHeader::SIZE]) -> Result<Self, OfpError> {
        let mut bytes = &buf[..];
        let version = bytes.read_u8()?;
        let typ = MsgCode::try_from(bytes.read_u8()?)?;
        let length = bytes.read_u16::<BigEndian>()?;
        let xid = bytes.read_u32::<BigEndian>()?;
        if (length as usize) < OfpHeader::SIZE {
            return Err(OfpError::Truncated {
                what: "message header",
                needed: OfpHeader::SIZE,
                got: length as usize,
            });
        }
        Ok(OfpHeader {
            version,
            typ,
            length,
            xid,
        })
    }

    /// Return the `version` field of a header.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Return the OpenFlow message type code of a header.
    pub fn type_code(&self) -> MsgCode {
        self.typ
    }

    /// Return the `length` field of a header. Includes the length of the header itself.
    pub fn length(&self) -> usize {
        self.length as usize
    }

    /// Return the byte-size of the message body following the header.
    pub fn body_length(&self) -> usize {
        self.length() - OfpHeader::SIZE
    }

    /// Return the `xid` field of a header, the transaction id associated with this packet.
    ///  Replies use the same id to facilitate pairing.
    pub fn xid(&self) -> u32 {
        self.xid
    }
}
