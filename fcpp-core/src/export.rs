//! `Export`: the type-erased trace→value map a device produces each round.
//!
//! Values are tagged by a small, fixed wire vocabulary (`WireValue`) rather
//! than a general serialisation format, so that a payload blob can be
//! decoded entry-by-entry without a length prefix per entry, matching the
//! wire layout `[trace: u64_le][type_tag: u8][value_bytes]` where
//! `value_bytes` is exactly as long as `type_tag`'s own encoding needs.
//!
//! An `ExportBuilder` accumulates entries during a round; calling `seal`
//! turns it into an immutable `Export`, mirroring the append-only-then-sealed
//! discipline in the round invariants.

use std::collections::BTreeMap;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read};

use crate::ProtocolError;
use crate::trace::Trace;

/// One exported value, tagged by its wire representation.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    I64(i64),
    F64(f64),
    Bool(bool),
    Str(String),
}

impl WireValue {
    pub fn type_tag(&self) -> u8 {
        match self {
            WireValue::I64(_) => 1,
            WireValue::F64(_) => 2,
            WireValue::Bool(_) => 3,
            WireValue::Str(_) => 4,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) -> io::Result<()> {
        match self {
            WireValue::I64(v) => out.write_i64::<LittleEndian>(*v),
            WireValue::F64(v) => out.write_f64::<LittleEndian>(*v),
            WireValue::Bool(v) => out.write_u8(*v as u8),
            WireValue::Str(s) => {
                out.write_u32::<LittleEndian>(s.len() as u32)?;
                out.extend_from_slice(s.as_bytes());
                Ok(())
            }
        }
    }

    fn decode(tag: u8, cursor: &mut Cursor<&[u8]>) -> Result<Self, ProtocolError> {
        let err = |e: io::Error| ProtocolError::Undecodable(0, e.to_string());
        match tag {
            1 => Ok(WireValue::I64(cursor.read_i64::<LittleEndian>().map_err(err)?)),
            2 => Ok(WireValue::F64(cursor.read_f64::<LittleEndian>().map_err(err)?)),
            3 => Ok(WireValue::Bool(cursor.read_u8().map_err(err)? != 0)),
            4 => {
                let len = cursor.read_u32::<LittleEndian>().map_err(err)? as usize;
                let mut bytes = vec![0u8; len];
                cursor.read_exact(&mut bytes).map_err(err)?;
                String::from_utf8(bytes)
                    .map(WireValue::Str)
                    .map_err(|e| ProtocolError::Undecodable(0, e.to_string()))
            }
            other => Err(ProtocolError::Undecodable(0, format!("unknown type tag {other}"))),
        }
    }
}

/// A type a round primitive can carry. Implemented for the fixed wire
/// vocabulary this core understands; there is deliberately no blanket
/// `Serialize`-based impl, since the wire tag must be a small closed set
/// for entries to be self-delimiting without a length prefix.
pub trait AggregateValue: Clone + 'static {
    const TYPE_TAG: u8;
    fn to_wire(&self) -> WireValue;
    fn from_wire(wire: &WireValue) -> Option<Self>
    where
        Self: Sized;
}

impl AggregateValue for i64 {
    const TYPE_TAG: u8 = 1;
    fn to_wire(&self) -> WireValue {
        WireValue::I64(*self)
    }
    fn from_wire(wire: &WireValue) -> Option<Self> {
        match wire {
            WireValue::I64(v) => Some(*v),
            _ => None,
        }
    }
}

impl AggregateValue for f64 {
    const TYPE_TAG: u8 = 2;
    fn to_wire(&self) -> WireValue {
        WireValue::F64(*self)
    }
    fn from_wire(wire: &WireValue) -> Option<Self> {
        match wire {
            WireValue::F64(v) => Some(*v),
            _ => None,
        }
    }
}

impl AggregateValue for bool {
    const TYPE_TAG: u8 = 3;
    fn to_wire(&self) -> WireValue {
        WireValue::Bool(*self)
    }
    fn from_wire(wire: &WireValue) -> Option<Self> {
        match wire {
            WireValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl AggregateValue for String {
    const TYPE_TAG: u8 = 4;
    fn to_wire(&self) -> WireValue {
        WireValue::Str(self.clone())
    }
    fn from_wire(wire: &WireValue) -> Option<Self> {
        match wire {
            WireValue::Str(v) => Some(v.clone()),
            _ => None,
        }
    }
}

/// An export being built over the course of one round. Entries may only be
/// added, never removed, until `seal` freezes it.
#[derive(Debug, Default)]
pub struct ExportBuilder {
    entries: BTreeMap<Trace, WireValue>,
}

impl ExportBuilder {
    pub fn new() -> Self {
        ExportBuilder { entries: BTreeMap::new() }
    }

    pub fn put<T: AggregateValue>(&mut self, trace: Trace, value: T) {
        self.entries.insert(trace, value.to_wire());
    }

    pub fn contains(&self, trace: Trace) -> bool {
        self.entries.contains_key(&trace)
    }

    pub fn seal(self) -> Export {
        Export { entries: self.entries }
    }
}

/// An immutable, fully-built export: the result of one device's one round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Export {
    entries: BTreeMap<Trace, WireValue>,
}

impl Export {
    pub fn empty() -> Self {
        Export { entries: BTreeMap::new() }
    }

    pub fn contains(&self, trace: Trace) -> bool {
        self.entries.contains_key(&trace)
    }

    /// Reads the value at `trace`, decoded as `T`. `Ok(None)` means the
    /// trace was never visited; `Err` means it was visited but holds a
    /// value of a different wire type than `T` expects.
    pub fn get<T: AggregateValue>(&self, trace: Trace) -> Result<Option<T>, ProtocolError> {
        match self.entries.get(&trace) {
            None => Ok(None),
            Some(wire) => T::from_wire(wire).map(Some).ok_or(ProtocolError::TypeTagMismatch {
                trace,
                declared: wire.type_tag(),
                expected: T::TYPE_TAG,
            }),
        }
    }

    pub fn traces(&self) -> impl Iterator<Item = Trace> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialises the payload portion of the wire envelope: a sequence of
    /// `[trace: u64_le][type_tag: u8][value_bytes]` entries in ascending
    /// trace order.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (trace, wire) in &self.entries {
            out.write_u64::<LittleEndian>(*trace).expect("writing to a Vec never fails");
            out.write_u8(wire.type_tag()).expect("writing to a Vec never fails");
            wire.encode(&mut out).expect("writing to a Vec never fails");
        }
        out
    }

    /// Parses a payload blob produced by `encode`.
    pub fn decode(bytes: &[u8]) -> Result<Export, ProtocolError> {
        let mut cursor = Cursor::new(bytes);
        let mut entries = BTreeMap::new();
        while (cursor.position() as usize) < bytes.len() {
            let trace = cursor
                .read_u64::<LittleEndian>()
                .map_err(|e| ProtocolError::Malformed { sender: None, reason: e.to_string() })?;
            let tag = cursor
                .read_u8()
                .map_err(|e| ProtocolError::Malformed { sender: None, reason: e.to_string() })?;
            let wire = WireValue::decode(tag, &mut cursor).map_err(|e| match e {
                ProtocolError::Undecodable(_, reason) => ProtocolError::Undecodable(trace, reason),
                other => other,
            })?;
            entries.insert(trace, wire);
        }
        Ok(Export { entries })
    }
}
