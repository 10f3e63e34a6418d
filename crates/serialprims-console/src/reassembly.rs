//! Turning a completed receive buffer into management messages.
//!
//! A buffer may hold several back-to-back transmissions. Each is unpacked on
//! its own, except after a file-system read response: the device splits such
//! a reply across transmissions and only the first carries a header, so the
//! decoded bytes of every later transmission extend the first body.

use bytes::BytesMut;
use tracing::{debug, warn};

use crate::error::Result;
use crate::fragment::{split_transmissions, unpack};
use crate::smp::SmpMessage;

/// Decode every transmission in `buf`.
///
/// Results are returned in arrival order; a failed transmission yields an
/// `Err` and does not affect its neighbours, except inside a file read reply,
/// where any failure discards the whole reply.
pub fn decode_batch(buf: &[u8]) -> Vec<Result<SmpMessage>> {
    let transmissions = split_transmissions(buf);
    let Some((first, rest)) = transmissions.split_first() else {
        return Vec::new();
    };

    let head = unpack(first).and_then(|payload| SmpMessage::parse_unchecked(&payload));
    match head {
        Ok(message) if message.header.is_file_read_response() => {
            vec![extend_file_read(message, rest)]
        }
        head => {
            let mut out = Vec::with_capacity(transmissions.len());
            out.push(head.and_then(checked));
            out.extend(rest.iter().map(|raw| {
                unpack(raw)
                    .and_then(|payload| SmpMessage::parse_unchecked(&payload))
                    .and_then(checked)
            }));
            for result in out.iter().filter_map(|r| r.as_ref().err()) {
                warn!(error = %result, "discarding console transmission");
            }
            out
        }
    }
}

fn checked(message: SmpMessage) -> Result<SmpMessage> {
    message.check_complete()?;
    Ok(message)
}

fn extend_file_read(mut message: SmpMessage, continuations: &[&[u8]]) -> Result<SmpMessage> {
    if !continuations.is_empty() {
        let mut body = BytesMut::from(message.body.as_ref());
        for raw in continuations {
            let chunk = unpack(raw).inspect_err(|err| {
                warn!(error = %err, "discarding file read reply");
            })?;
            body.extend_from_slice(&chunk);
        }
        message.body = body.freeze();
    }

    debug!(
        declared = message.header.len,
        received = message.body.len(),
        parts = continuations.len() + 1,
        "reassembled file read reply"
    );
    checked(message).inspect_err(|err| {
        warn!(error = %err, "discarding file read reply");
    })
}
