//! # Protocol Frames
//!
//! The request/response envelope carried over a secure channel.
//!
//! ## Invariants
//! - **Correlation**: every `Result` echoes the `request_id` of its `Invoke`.
//!   Ids are unique per channel per direction.
//! - **Forward Compatibility**: unknown header fields are skipped.
//! - **Panic Safety**: decoding never panics on hostile input.

use tetherpack::Reader;
use tetherpack::Writer;

use crate::codec::decode_value;
use crate::codec::encode_value;
use crate::error::Error;
use crate::error::Failure;
use crate::error::FailureKind;
use crate::error::Result;
use crate::value::ObjectId;
use crate::value::WireValue;

/// What an `Invoke` is addressed to on the receiving process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// An object in the receiver's object table.
    Object(ObjectId),
    /// A task registered under this name (the remote-execution entry point).
    Task(String),
    /// The receiver's distributed garbage collector (renew / release / acquire).
    Collector,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Invoke {
        request_id: u64,
        target: Target,
        selector: String,
        args: Vec<WireValue>,
    },
    Result {
        request_id: u64,
        outcome: std::result::Result<WireValue, Failure>,
    },
}

impl Frame {
    pub fn request_id(&self) -> u64 {
        match self {
            Frame::Invoke { request_id, .. } | Frame::Result { request_id, .. } => *request_id,
        }
    }

    /// Encodes this frame into a standalone buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new();
        self.encode(&mut w)?;
        Ok(w.finish()?)
    }

    pub fn encode(&self, w: &mut Writer) -> Result<()> {
        match self {
            Frame::Invoke { request_id, target, selector, args } => {
                w.tagged_begin("Invoke")?;
                write_field_u64(w, "id", *request_id)?;

                w.tagged_begin("target")?;
                match target {
                    Target::Object(id) => {
                        w.tagged_begin("object")?;
                        w.u64(id.0);
                        w.tagged_end()?;
                    }
                    Target::Task(name) => {
                        w.tagged_begin("task")?;
                        w.str(name)?;
                        w.tagged_end()?;
                    }
                    Target::Collector => {
                        w.tagged_begin("collector")?;
                        w.unit();
                        w.tagged_end()?;
                    }
                }
                w.tagged_end()?;

                w.tagged_begin("selector")?;
                w.str(selector)?;
                w.tagged_end()?;

                w.tagged_begin("args")?;
                w.list_begin();
                for arg in args {
                    encode_value(w, arg)?;
                }
                w.list_end()?;
                w.tagged_end()?;

                w.tagged_end()?;
            }
            Frame::Result { request_id, outcome } => {
                w.tagged_begin("Result")?;
                write_field_u64(w, "id", *request_id)?;
                match outcome {
                    Ok(value) => {
                        w.tagged_begin("ok")?;
                        encode_value(w, value)?;
                        w.tagged_end()?;
                    }
                    Err(failure) => {
                        w.tagged_begin("err")?;
                        w.str(failure.kind.wire_name())?;
                        match &failure.kind {
                            FailureKind::Application(kind) => w.str(kind)?,
                            _ => w.str("")?,
                        }
                        w.str(&failure.message)?;
                        w.tagged_end()?;
                    }
                }
                w.tagged_end()?;
            }
        }
        Ok(())
    }

    /// Decodes exactly one frame from a buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let frame = Self::decode(&mut r)?;
        r.finish()?;
        Ok(frame)
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let (kind, mut body) = r.tagged()?;
        match kind {
            "Invoke" => decode_invoke(&mut body),
            "Result" => decode_result(&mut body),
            other => Err(Error::UnknownVariant(format!("frame '{}'", other))),
        }
    }
}

fn decode_invoke(body: &mut Reader<'_>) -> Result<Frame> {
    let mut request_id = None;
    let mut target = None;
    let mut selector = None;
    let mut args = None;

    while !body.is_empty() {
        let (key, mut val) = body.tagged()?;
        match key {
            "id" => request_id = Some(val.u64()?),
            "target" => target = Some(decode_target(&mut val)?),
            "selector" => selector = Some(val.str()?.to_string()),
            "args" => {
                let mut list = val.list()?;
                let mut out = Vec::new();
                while !list.is_empty() {
                    out.push(decode_value(&mut list)?);
                }
                args = Some(out);
            }
            _ => continue,
        }
        val.finish()?;
    }

    Ok(Frame::Invoke {
        request_id: request_id.ok_or(Error::MissingField("id"))?,
        target: target.ok_or(Error::MissingField("target"))?,
        selector: selector.ok_or(Error::MissingField("selector"))?,
        args: args.ok_or(Error::MissingField("args"))?,
    })
}

fn decode_target(r: &mut Reader<'_>) -> Result<Target> {
    let (kind, mut body) = r.tagged()?;
    let target = match kind {
        "object" => Target::Object(ObjectId(body.u64()?)),
        "task" => Target::Task(body.str()?.to_string()),
        "collector" => { body.unit()?; Target::Collector }
        other => return Err(Error::UnknownVariant(format!("target '{}'", other))),
    };
    body.finish()?;
    Ok(target)
}

fn decode_result(body: &mut Reader<'_>) -> Result<Frame> {
    let mut request_id = None;
    let mut outcome = None;

    while !body.is_empty() {
        let (key, mut val) = body.tagged()?;
        match key {
            "id" => request_id = Some(val.u64()?),
            "ok" => outcome = Some(Ok(decode_value(&mut val)?)),
            "err" => outcome = Some(Err(decode_failure(&mut val)?)),
            _ => continue,
        }
        val.finish()?;
    }

    Ok(Frame::Result {
        request_id: request_id.ok_or(Error::MissingField("id"))?,
        outcome: outcome.ok_or(Error::MissingField("outcome"))?,
    })
}

fn decode_failure(r: &mut Reader<'_>) -> Result<Failure> {
    let tag = r.str()?;
    let app_kind = r.str()?;
    let message = r.str()?.to_string();
    let kind = match tag {
        "App" => FailureKind::Application(app_kind.to_string()),
        "NoObject" => FailureKind::NoSuchObject,
        "NoMethod" => FailureKind::NoSuchMethod,
        "NoTask" => FailureKind::NoSuchTask,
        "BadArgs" => FailureKind::BadArguments,
        "Marshal" => FailureKind::Marshal,
        "Unavailable" => FailureKind::Unavailable,
        other => return Err(Error::UnknownVariant(format!("failure '{}'", other))),
    };
    Ok(Failure { kind, message })
}

/// Recovers just the request id and frame kind from a raw frame.
///
/// Used to answer an `Invoke` whose body failed to decode, so the caller
/// is not left waiting.
pub fn peek_request_id(bytes: &[u8]) -> Option<(bool, u64)> {
    let mut r = Reader::new(bytes);
    let (kind, mut body) = r.tagged().ok()?;
    let is_invoke = match kind {
        "Invoke" => true,
        "Result" => false,
        _ => return None,
    };
    while !body.is_empty() {
        let (key, mut val) = body.tagged().ok()?;
        if key == "id" {
            return val.u64().ok().map(|id| (is_invoke, id));
        }
    }
    None
}

fn write_field_u64(w: &mut Writer, key: &str, val: u64) -> Result<()> {
    w.tagged_begin(key)?;
    w.u64(val);
    w.tagged_end()?;
    Ok(())
}
