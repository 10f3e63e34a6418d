use std::io::Write;

use bytes::Bytes;
use tracing::debug;

use crate::config::ConsoleConfig;
use crate::error::Result;
use crate::fragment::pack;
use crate::smp::{MgmtOp, SmpMessage, SmpSequence};

/// Packs management messages into console fragments and writes them out.
pub struct ConsoleWriter<W> {
    inner: W,
    max_packet_size: usize,
    seq: SmpSequence,
}

impl<W: Write> ConsoleWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_config(inner, &ConsoleConfig::default())
    }

    pub fn with_config(inner: W, config: &ConsoleConfig) -> Self {
        Self {
            inner,
            max_packet_size: config.max_packet_size,
            seq: SmpSequence::new(),
        }
    }

    /// Write one transmission carrying `payload`; returns the fragment count.
    pub fn write_payload(&mut self, payload: &[u8]) -> Result<usize> {
        let fragments = pack(payload, self.max_packet_size)?;
        for fragment in &fragments {
            self.inner.write_all(fragment)?;
        }
        self.inner.flush()?;
        debug!(
            payload = payload.len(),
            fragments = fragments.len(),
            "console transmission written"
        );
        Ok(fragments.len())
    }

    /// Build a request with the next sequence number and send it.
    pub fn send(
        &mut self,
        op: MgmtOp,
        group: u16,
        id: u8,
        body: impl Into<Bytes>,
    ) -> Result<SmpMessage> {
        let message = SmpMessage::new(op, group, id, self.seq.allocate(), body)?;
        self.write_payload(&message.to_bytes())?;
        Ok(message)
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::unpack;
    use crate::reassembly::decode_batch;
    use crate::smp::{GROUP_APP, GROUP_SHELL};

    #[test]
    fn writes_unpackable_transmission() {
        let mut writer = ConsoleWriter::new(Vec::new());
        let count = writer.write_payload(&[0xAB; 200]).unwrap();

        let wire = writer.into_inner();
        assert_eq!(count, 3);
        assert_eq!(unpack(&wire).unwrap(), vec![0xAB; 200]);
    }

    #[test]
    fn send_assigns_increasing_sequence() {
        let mut writer = ConsoleWriter::new(Vec::new());
        let first = writer
            .send(MgmtOp::WriteRequest, GROUP_SHELL, 0, vec![0xA0])
            .unwrap();
        let second = writer
            .send(MgmtOp::ReadRequest, GROUP_APP, 1, Bytes::new())
            .unwrap();
        assert_eq!((first.header.seq, second.header.seq), (1, 2));

        let decoded: Vec<SmpMessage> = decode_batch(&writer.into_inner())
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(decoded, vec![first, second]);
    }

    #[test]
    fn honours_packet_size() {
        let config = ConsoleConfig {
            max_packet_size: 20,
            ..ConsoleConfig::default()
        };
        let mut writer = ConsoleWriter::with_config(Vec::new(), &config);
        writer.write_payload(&[1; 50]).unwrap();

        let wire = writer.into_inner();
        assert!(wire.split_inclusive(|b| *b == 0x0A).all(|f| f.len() <= 20));
    }
}
