//! Record layer: framing plus per-direction AEAD protection.
//!
//! ```text
//! +------+-------+----------+--------+----------------+
//! | type | epoch | sequence | length |    payload     |
//! | (1B) | (2B)  |   (8B)   |  (2B)  | (length bytes) |
//! +------+-------+----------+--------+----------------+
//! ```
//!
//! Epoch 0 carries plaintext handshake records. Epoch 1 records are sealed
//! with the negotiated suite; the header is the additional data and the
//! nonce is the write IV XORed with the sequence number.
//!
//! Protected records are accepted at most once. Over a stream each record
//! must carry exactly the next sequence number; over datagrams a sliding
//! window of [`REPLAY_WINDOW`] sequence numbers tolerates reordering.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use pintrust::crypto::aead::{record_nonce, AeadKey, TAG_LEN};
use pintrust::{CipherSuite, PinTrustError, Result};

pub const RECORD_HEADER_LEN: usize = 13;
/// Largest plaintext carried in one record.
pub const MAX_RECORD_PAYLOAD: usize = 16384;

pub const EPOCH_PLAINTEXT: u16 = 0;
pub const EPOCH_PROTECTED: u16 = 1;

/// Width of the datagram replay window, in records.
pub const REPLAY_WINDOW: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ContentType {
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl TryFrom<u8> for ContentType {
    type Error = PinTrustError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            21 => Ok(ContentType::Alert),
            22 => Ok(ContentType::Handshake),
            23 => Ok(ContentType::ApplicationData),
            other => Err(PinTrustError::Decode(format!("unknown record type {other}"))),
        }
    }
}

/// A framed record as read off the wire; `payload` is still sealed for epoch 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub content_type: ContentType,
    pub epoch: u16,
    pub sequence: u64,
    pub payload: Bytes,
}

impl Record {
    /// Split one complete record off the front of `buf`.
    ///
    /// Returns `Ok(None)` while the record is incomplete; the buffer is left untouched.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Record>> {
        if buf.len() < RECORD_HEADER_LEN {
            return Ok(None);
        }
        let length = u16::from_be_bytes([buf[11], buf[12]]) as usize;
        if length > MAX_RECORD_PAYLOAD + TAG_LEN {
            return Err(PinTrustError::Decode(format!("record length {length} too large")));
        }
        if buf.len() < RECORD_HEADER_LEN + length {
            return Ok(None);
        }
        let content_type = ContentType::try_from(buf[0])?;
        let mut header = buf.split_to(RECORD_HEADER_LEN);
        header.advance(1);
        let epoch = header.get_u16();
        let sequence = header.get_u64();
        let payload = buf.split_to(length).freeze();
        Ok(Some(Record {
            content_type,
            epoch,
            sequence,
            payload,
        }))
    }

    fn header(&self) -> [u8; RECORD_HEADER_LEN] {
        encode_header(self.content_type, self.epoch, self.sequence, self.payload.len())
    }
}

fn encode_header(
    content_type: ContentType,
    epoch: u16,
    sequence: u64,
    length: usize,
) -> [u8; RECORD_HEADER_LEN] {
    let mut header = [0u8; RECORD_HEADER_LEN];
    let mut out = &mut header[..];
    out.put_u8(content_type as u8);
    out.put_u16(epoch);
    out.put_u64(sequence);
    out.put_u16(length as u16);
    header
}

struct DirectionKey {
    key: AeadKey,
    iv: [u8; 12],
}

/// Sequence numbers already accepted under the read key.
#[derive(Debug, Default)]
struct ReplayWindow {
    /// Highest accepted sequence number, if any.
    highest: Option<u64>,
    /// Bit `n` set means `highest - n` was accepted.
    seen: u64,
}

impl ReplayWindow {
    fn check(&self, sequence: u64, in_order: bool) -> Result<()> {
        let next = self.highest.map_or(0, |h| h + 1);
        let fresh = if in_order {
            sequence == next
        } else {
            match self.highest {
                None => true,
                Some(highest) if sequence > highest => true,
                Some(highest) => {
                    let age = highest - sequence;
                    age < REPLAY_WINDOW && self.seen & (1 << age) == 0
                }
            }
        };
        if fresh {
            Ok(())
        } else {
            Err(PinTrustError::ReplayedRecord(sequence))
        }
    }

    fn accept(&mut self, sequence: u64) {
        match self.highest {
            Some(highest) if sequence <= highest => self.seen |= 1 << (highest - sequence),
            Some(highest) => {
                let shift = sequence - highest;
                self.seen = if shift >= REPLAY_WINDOW { 0 } else { self.seen << shift };
                self.seen |= 1;
                self.highest = Some(sequence);
            }
            None => {
                self.seen = 1;
                self.highest = Some(sequence);
            }
        }
    }
}

/// Sealing and opening state for both directions of one connection.
#[derive(Default)]
pub struct RecordLayer {
    write_epoch: u16,
    write_sequence: u64,
    write_key: Option<DirectionKey>,
    read_key: Option<DirectionKey>,
    replay: ReplayWindow,
    reorder_tolerant: bool,
}

impl RecordLayer {
    /// Record layer for an ordered stream: protected records must arrive in sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record layer for datagrams: protected records may be reordered within the replay window.
    pub fn for_datagrams() -> Self {
        Self {
            reorder_tolerant: true,
            ..Self::default()
        }
    }

    /// Switch outbound records to epoch 1 under `key`/`iv`.
    pub fn install_write_key(&mut self, suite: CipherSuite, key: &[u8; 32], iv: [u8; 12]) -> Result<()> {
        self.write_key = Some(DirectionKey {
            key: AeadKey::new(suite, key)?,
            iv,
        });
        self.write_epoch = EPOCH_PROTECTED;
        self.write_sequence = 0;
        Ok(())
    }

    pub fn install_read_key(&mut self, suite: CipherSuite, key: &[u8; 32], iv: [u8; 12]) -> Result<()> {
        self.read_key = Some(DirectionKey {
            key: AeadKey::new(suite, key)?,
            iv,
        });
        self.replay = ReplayWindow::default();
        Ok(())
    }

    pub fn has_read_key(&self) -> bool {
        self.read_key.is_some()
    }

    pub fn write_epoch(&self) -> u16 {
        self.write_epoch
    }

    /// Frame a plaintext handshake record. Always epoch 0 so flights can be resent verbatim.
    pub fn seal_handshake(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > MAX_RECORD_PAYLOAD {
            return Err(PinTrustError::Encryption("handshake flight exceeds one record".into()));
        }
        let mut out = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
        out.extend_from_slice(&encode_header(
            ContentType::Handshake,
            EPOCH_PLAINTEXT,
            0,
            payload.len(),
        ));
        out.extend_from_slice(payload);
        Ok(out)
    }

    /// Frame `payload` at the current write epoch, sealing it once keys are installed.
    pub fn seal(&mut self, content_type: ContentType, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > MAX_RECORD_PAYLOAD {
            return Err(PinTrustError::Encryption(format!(
                "record payload of {} bytes too large",
                payload.len()
            )));
        }
        let sequence = self.write_sequence;
        self.write_sequence += 1;
        let Some(dir) = &self.write_key else {
            let mut out = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
            out.extend_from_slice(&encode_header(content_type, EPOCH_PLAINTEXT, sequence, payload.len()));
            out.extend_from_slice(payload);
            return Ok(out);
        };
        let header = encode_header(content_type, self.write_epoch, sequence, payload.len() + TAG_LEN);
        let sealed = dir.key.encrypt(&record_nonce(&dir.iv, sequence), payload, &header)?;
        let mut out = Vec::with_capacity(RECORD_HEADER_LEN + sealed.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Return the plaintext of `record`, authenticating epoch-1 records.
    ///
    /// A protected record's sequence number is marked as seen only once it
    /// authenticates, so forged headers cannot move the window.
    pub fn open(&mut self, record: &Record) -> Result<Bytes> {
        match record.epoch {
            EPOCH_PLAINTEXT => {
                if record.content_type == ContentType::ApplicationData {
                    return Err(PinTrustError::UnexpectedMessage(
                        "unprotected application data".into(),
                    ));
                }
                Ok(record.payload.clone())
            }
            EPOCH_PROTECTED => {
                let dir = self.read_key.as_ref().ok_or_else(|| {
                    PinTrustError::UnexpectedMessage("protected record before keys".into())
                })?;
                self.replay.check(record.sequence, !self.reorder_tolerant)?;
                let plain = dir.key.decrypt(
                    &record_nonce(&dir.iv, record.sequence),
                    &record.payload,
                    &record.header(),
                )?;
                self.replay.accept(record.sequence);
                Ok(Bytes::from(plain))
            }
            other => Err(PinTrustError::Decode(format!("unknown epoch {other}"))),
        }
    }
}
