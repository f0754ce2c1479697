//! Wire framing for one device's export, as exchanged between devices.
//!
//! ```text
//! [sender_uid: u32_le][send_time: f64_le][len: u32_le][payload: len bytes]
//! ```
//!
//! In real mode a single trailing byte is appended, `delay_128ths`,
//! encoding the sender's estimate of one-way transit delay in
//! hundred-twenty-eighths of a second (`delay_128ths as f64 / 128.0`), one
//! byte covering 0..=(255/128)s and losing precision above that. Simulated
//! mode never writes it; [`Envelope::decode`] treats the field as present
//! only when the caller says so, since the frame carries no self-describing
//! mode marker.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::{Time, Uid};

/// One device's export in transit, with the frame's own metadata attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub sender_uid: Uid,
    pub send_time: Time,
    pub payload: Vec<u8>,
    /// Sender-estimated one-way delay, present only for real-mode frames.
    pub delay: Option<f64>,
}

/// The delay field's unit: hundred-twenty-eighths of a second, so one byte
/// spans 0..=(255/128)s, roughly two seconds, with precision loss above that.
const DELAY_128THS_PER_SECOND: f64 = 128.0;
const MAX_DELAY_SECONDS: f64 = u8::MAX as f64 / DELAY_128THS_PER_SECOND;

impl Envelope {
    pub fn new(sender_uid: Uid, send_time: Time, payload: Vec<u8>) -> Self {
        Envelope { sender_uid, send_time, payload, delay: None }
    }

    /// Attaches a one-way delay estimate, clamped to what one byte at
    /// hundred-twenty-eighths-of-a-second resolution can represent.
    pub fn with_delay(mut self, delay_seconds: f64) -> Self {
        self.delay = Some(delay_seconds.clamp(0.0, MAX_DELAY_SECONDS));
        self
    }

    /// Serialises the envelope. `real_mode` controls whether the trailing
    /// `delay_128ths` byte is written; it is an encoding error to request
    /// it when no delay was attached.
    pub fn encode(&self, real_mode: bool) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(4 + 8 + 4 + self.payload.len() + if real_mode { 1 } else { 0 });
        buf.write_u32::<LittleEndian>(self.sender_uid)?;
        buf.write_f64::<LittleEndian>(self.send_time.0)?;
        buf.write_u32::<LittleEndian>(self.payload.len() as u32)?;
        buf.write_all(&self.payload)?;
        if real_mode {
            let delay = self.delay.ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "real-mode envelope missing a delay estimate")
            })?;
            let units = (delay * DELAY_128THS_PER_SECOND).round().clamp(0.0, u8::MAX as f64) as u8;
            buf.write_u8(units)?;
        }
        Ok(buf)
    }

    /// Parses an envelope. `real_mode` must match how it was encoded, since
    /// the frame carries no mode marker of its own.
    pub fn decode(bytes: &[u8], real_mode: bool) -> io::Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let sender_uid = cursor.read_u32::<LittleEndian>()?;
        let send_time = Time(cursor.read_f64::<LittleEndian>()?);
        let len = cursor.read_u32::<LittleEndian>()? as usize;
        let mut payload = vec![0u8; len];
        cursor.read_exact(&mut payload)?;
        let delay = if real_mode {
            Some(cursor.read_u8()? as f64 / DELAY_128THS_PER_SECOND)
        } else {
            None
        };
        Ok(Envelope { sender_uid, send_time, payload, delay })
    }
}
