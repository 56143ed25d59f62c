use std::io::{ErrorKind, Read};

use crate::error::OfpError;
use crate::ofp_header::OfpHeader;

/// OpenFlow Message
///
/// Version-agnostic API for handling OpenFlow messages at the byte-buffer level.
pub trait OfpMessage: Sized {
    /// Return the byte-size of an `OfpMessage`, header included.
    fn size_of(msg: &Self) -> usize;
    /// Create an `OfpHeader` for the given transaction id and OpenFlow message.
    fn header_of(xid: u32, msg: &Self) -> Result<OfpHeader, OfpError>;
    /// Return a marshaled buffer containing an OpenFlow header and the message `msg`.
    fn marshal(xid: u32, msg: &Self) -> Result<Vec<u8>, OfpError>;
    /// Returns a pair `(u32, OfpMessage)` of the transaction id and OpenFlow message parsed from
    /// the given OpenFlow header `header`, and buffer `buf`.
    fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Self), OfpError>;

    /// Read the header and body of one message from `reader` without decoding
    /// the body.
    ///
    /// Returns `Ok(None)` when the stream ends before a new header starts.
    fn read_frame<R: Read>(reader: &mut R) -> Result<Option<(OfpHeader, Vec<u8>)>, OfpError> {
        let mut buf = [0u8; OfpHeader::SIZE];
        match reader.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let header = OfpHeader::parse(buf)?;
        let mut body = vec![0; header.body_length()];
        reader.read_exact(&mut body)?;
        Ok(Some((header, body)))
    }

    /// Read and decode one framed message from `reader`.
    fn read_from<R: Read>(reader: &mut R) -> Result<Option<(u32, Self)>, OfpError> {
        match Self::read_frame(reader)? {
            Some((header, body)) => Self::parse(&header, &body).map(Some),
            None => Ok(None),
        }
    }
}
