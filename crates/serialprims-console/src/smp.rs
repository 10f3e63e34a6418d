//! Management-protocol header carried inside console payloads.
//!
//! ```text
//! ┌────┬───────┬─────┬───────┬─────┬────┬──────┐
//! │ OP │ FLAGS │ LEN │ GROUP │ SEQ │ ID │ BODY │
//! │ 1B │ 1B    │ 2B  │ 2B    │ 1B  │ 1B │ LEN  │
//! └────┴───────┴─────┴───────┴─────┴────┴──────┘
//! ```
//! Multi-byte fields are big-endian.

use bytes::Bytes;

use crate::error::{ConsoleError, Result};

pub const SMP_HEADER_LEN: usize = 8;

/// File-system management group.
pub const GROUP_FS: u16 = 8;
/// Shell management group.
pub const GROUP_SHELL: u16 = 9;
/// Application-defined management group.
pub const GROUP_APP: u16 = 65;

/// File upload/download command within [`GROUP_FS`].
pub const FS_FILE_ID: u8 = 0;

/// Management operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MgmtOp {
    ReadRequest = 0,
    ReadResponse = 1,
    WriteRequest = 2,
    WriteResponse = 3,
}

impl MgmtOp {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MgmtOp::ReadRequest),
            1 => Some(MgmtOp::ReadResponse),
            2 => Some(MgmtOp::WriteRequest),
            3 => Some(MgmtOp::WriteResponse),
            _ => None,
        }
    }

    pub fn is_response(self) -> bool {
        matches!(self, MgmtOp::ReadResponse | MgmtOp::WriteResponse)
    }

    pub fn name(self) -> &'static str {
        match self {
            MgmtOp::ReadRequest => "READ",
            MgmtOp::ReadResponse => "READ_RSP",
            MgmtOp::WriteRequest => "WRITE",
            MgmtOp::WriteResponse => "WRITE_RSP",
        }
    }
}

/// The 8-byte management header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmpHeader {
    pub op: u8,
    pub flags: u8,
    pub len: u16,
    pub group: u16,
    pub seq: u8,
    pub id: u8,
}

impl SmpHeader {
    pub fn new(op: MgmtOp, group: u16, id: u8, seq: u8, len: u16) -> Self {
        Self {
            op: op as u8,
            flags: 0,
            len,
            group,
            seq,
            id,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SMP_HEADER_LEN {
            return Err(ConsoleError::HeaderTooShort { len: bytes.len() });
        }
        Ok(Self {
            op: bytes[0],
            flags: bytes[1],
            len: u16::from_be_bytes([bytes[2], bytes[3]]),
            group: u16::from_be_bytes([bytes[4], bytes[5]]),
            seq: bytes[6],
            id: bytes[7],
        })
    }

    pub fn encode(&self) -> [u8; SMP_HEADER_LEN] {
        let len = self.len.to_be_bytes();
        let group = self.group.to_be_bytes();
        [
            self.op, self.flags, len[0], len[1], group[0], group[1], self.seq, self.id,
        ]
    }

    pub fn mgmt_op(&self) -> Option<MgmtOp> {
        MgmtOp::from_u8(self.op)
    }

    /// True for a file-system read response, whose body may continue in
    /// later transmissions that carry no header of their own.
    pub fn is_file_read_response(&self) -> bool {
        self.mgmt_op() == Some(MgmtOp::ReadResponse)
            && self.group == GROUP_FS
            && self.id == FS_FILE_ID
    }
}

/// A header plus its (opaque, usually CBOR) body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmpMessage {
    pub header: SmpHeader,
    pub body: Bytes,
}

impl SmpMessage {
    /// Build a message; the header length is taken from the body.
    pub fn new(op: MgmtOp, group: u16, id: u8, seq: u8, body: impl Into<Bytes>) -> Result<Self> {
        let body = body.into();
        let len = u16::try_from(body.len()).map_err(|_| ConsoleError::MessageTooLarge {
            size: body.len(),
            max: u16::MAX as usize,
        })?;
        Ok(Self {
            header: SmpHeader::new(op, group, id, seq, len),
            body,
        })
    }

    /// Parse header and body without checking the declared body length.
    pub fn parse_unchecked(payload: &[u8]) -> Result<Self> {
        let header = SmpHeader::decode(payload)?;
        Ok(Self {
            header,
            body: Bytes::copy_from_slice(&payload[SMP_HEADER_LEN..]),
        })
    }

    /// Parse a complete message; the header length must match the body.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let message = Self::parse_unchecked(payload)?;
        message.check_complete()?;
        Ok(message)
    }

    pub fn is_complete(&self) -> bool {
        usize::from(self.header.len) == self.body.len()
    }

    pub fn check_complete(&self) -> Result<()> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(ConsoleError::HeaderLengthMismatch {
                declared: usize::from(self.header.len),
                actual: self.body.len(),
            })
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SMP_HEADER_LEN + self.body.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.body);
        out
    }
}

/// Per-connection sequence counter: 1, 2, ..., 255, 1, ... (0 is skipped).
#[derive(Debug, Clone)]
pub struct SmpSequence {
    next: u8,
}

impl Default for SmpSequence {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl SmpSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from `seq` (0 is bumped to 1).
    pub fn starting_at(seq: u8) -> Self {
        Self { next: seq.max(1) }
    }

    pub fn allocate(&mut self) -> u8 {
        let seq = self.next;
        self.next = match self.next.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        seq
    }
}
