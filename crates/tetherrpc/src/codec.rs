//! # Value Codec
//!
//! Translates `WireValue` trees to and from tetherpack.
//!
//! ## Invariants
//! - **Bounded**: decoding refuses values nested deeper than `MAX_DEPTH`.
//! - **Panic Safety**: every decoding path returns `Result`.

use tetherpack::Reader;
use tetherpack::Tag;
use tetherpack::Writer;

use crate::endpoint::EndpointAddress;
use crate::error::Error;
use crate::error::Result;
use crate::value::Capability;
use crate::value::LongReference;
use crate::value::ObjectId;
use crate::value::WireValue;

/// Maximum nesting of lists and records accepted by the decoder.
pub const MAX_DEPTH: usize = 128;

/// Encodes a value into the writer.
pub fn encode_value(w: &mut Writer, value: &WireValue) -> Result<()> {
    encode_at(w, value, 0)
}

fn encode_at(w: &mut Writer, value: &WireValue, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }
    match value {
        WireValue::Unit => w.unit(),
        WireValue::Bool(b) => w.bool(*b),
        WireValue::Int(i) => w.i64(*i),
        WireValue::Float(x) => w.f64(*x),
        WireValue::Text(s) => w.str(s)?,
        WireValue::Bytes(b) => w.bytes(b)?,
        WireValue::List(items) => {
            w.list_begin();
            for item in items {
                encode_at(w, item, depth + 1)?;
            }
            w.list_end()?;
        }
        WireValue::Record { slot, type_name, fields } => {
            w.tagged_begin("rec")?;
            w.u64(u64::from(*slot));
            w.str(type_name)?;
            w.list_begin();
            for (name, field) in fields {
                w.tagged_begin(name)?;
                encode_at(w, field, depth + 1)?;
                w.tagged_end()?;
            }
            w.list_end()?;
            w.tagged_end()?;
        }
        WireValue::Backref(slot) => {
            w.tagged_begin("back")?;
            w.u64(u64::from(*slot));
            w.tagged_end()?;
        }
        WireValue::Reference(r) => {
            w.tagged_begin("ref")?;
            encode_reference(w, r)?;
            w.tagged_end()?;
        }
    }
    Ok(())
}

fn encode_reference(w: &mut Writer, r: &LongReference) -> Result<()> {
    w.str(&r.owner.to_string())?;
    w.u64(r.id.0);
    w.str(&r.interface)?;
    w.str(r.capability.wire_name())?;
    Ok(())
}

/// Decodes one value from the reader.
pub fn decode_value(r: &mut Reader<'_>) -> Result<WireValue> {
    decode_at(r, 0)
}

fn decode_at(r: &mut Reader<'_>, depth: usize) -> Result<WireValue> {
    if depth > MAX_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }
    let value = match r.peek_tag()? {
        Tag::Unit => { r.unit()?; WireValue::Unit }
        Tag::True | Tag::False => WireValue::Bool(r.bool()?),
        Tag::I64 => WireValue::Int(r.i64()?),
        Tag::F64 => WireValue::Float(r.f64()?),
        Tag::Str => WireValue::Text(r.str()?.to_string()),
        Tag::Bytes => WireValue::Bytes(r.bytes()?.to_vec()),
        Tag::List => {
            let mut items = r.list()?;
            let mut out = Vec::new();
            while !items.is_empty() {
                out.push(decode_at(&mut items, depth + 1)?);
            }
            WireValue::List(out)
        }
        Tag::Tagged => {
            let (name, mut body) = r.tagged()?;
            let value = match name {
                "rec" => {
                    let slot = decode_slot(&mut body)?;
                    let type_name = body.str()?.to_string();
                    let mut list = body.list()?;
                    let mut fields = Vec::new();
                    while !list.is_empty() {
                        let (field, mut payload) = list.tagged()?;
                        fields.push((field.to_string(), decode_at(&mut payload, depth + 1)?));
                        payload.finish()?;
                    }
                    WireValue::Record { slot, type_name, fields }
                }
                "back" => WireValue::Backref(decode_slot(&mut body)?),
                "ref" => WireValue::Reference(decode_reference(&mut body)?),
                other => return Err(Error::UnknownVariant(format!("value '{}'", other))),
            };
            body.finish()?;
            value
        }
        Tag::U64 => {
            return Err(Error::ProtocolViolation("bare u64 is not a value".into()));
        }
    };
    Ok(value)
}

fn decode_slot(r: &mut Reader<'_>) -> Result<u32> {
    let raw = r.u64()?;
    u32::try_from(raw).map_err(|_| Error::ProtocolViolation(format!("slot {} out of range", raw)))
}

fn decode_reference(r: &mut Reader<'_>) -> Result<LongReference> {
    let owner: EndpointAddress = r.str()?.parse()?;
    let id = ObjectId(r.u64()?);
    let interface = r.str()?.to_string();
    let cap = r.str()?;
    let capability = Capability::from_wire_name(cap)
        .ok_or_else(|| Error::UnknownVariant(format!("capability '{}'", cap)))?;
    if !capability.is_referenced() {
        return Err(Error::ProtocolViolation("reference to a copiable type".into()));
    }
    Ok(LongReference { owner, id, interface, capability })
}

/// Encodes a value into a standalone byte buffer.
pub fn value_to_bytes(value: &WireValue) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    encode_value(&mut w, value)?;
    Ok(w.finish()?)
}

/// Decodes a standalone byte buffer holding exactly one value.
pub fn value_from_bytes(bytes: &[u8]) -> Result<WireValue> {
    let mut r = Reader::new(bytes);
    let value = decode_value(&mut r)?;
    r.finish()?;
    Ok(value)
}
