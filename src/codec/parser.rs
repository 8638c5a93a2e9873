//! Forward parser for the binary-XML wire format.
//!
//! A document is a stream of self-identifying records: a dictionary of
//! `Name` records defining 16-bit string ids, followed by element
//! records referring back into it. The dictionary may be split across
//! the `dict` and `doc` blobs, so `Name` records are accepted anywhere.
//!
//! The parser is a straight-line consumer that drives an [`XmlHandler`].
//! Attribute records arrive between `StartTag` and the first child
//! start, end tag, or character data; they are collated internally and
//! delivered together with the start event.

use smallvec::SmallVec;

use crate::codec::attribute::{Attribute, Value};
use crate::codec::stream::StreamReader;
use crate::common::{ChunkedBuffer, Error, Result};

/// Record opcodes of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    CharSize = 0,
    StartTag = 1,
    EndTag = 2,
    String = 3,
    Int = 4,
    Bool = 5,
    Long = 6,
    LongLong = 7,
    SizeT = 8,
    Float = 9,
    Double = 10,
    Data = 11,
    Raw = 12,
    Push = 13,
    Pop = 14,
    Name = 15,
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self> {
        Ok(match raw {
            0 => Opcode::CharSize,
            1 => Opcode::StartTag,
            2 => Opcode::EndTag,
            3 => Opcode::String,
            4 => Opcode::Int,
            5 => Opcode::Bool,
            6 => Opcode::Long,
            7 => Opcode::LongLong,
            8 => Opcode::SizeT,
            9 => Opcode::Float,
            10 => Opcode::Double,
            11 => Opcode::Data,
            12 => Opcode::Raw,
            13 => Opcode::Push,
            14 => Opcode::Pop,
            15 => Opcode::Name,
            other => return Err(Error::Malformed(format!("unsupported opcode {other}"))),
        })
    }
}

/// Sink for parse events.
///
/// Attributes are not separate events; they are delivered with the
/// start event once the element head is complete.
pub trait XmlHandler {
    fn tag_start(&mut self, name: &str, attributes: &[Attribute<'_>]) -> Result<()>;
    fn tag_end(&mut self, name: &str) -> Result<()>;
    fn char_data(&mut self, data: &str) -> Result<()>;
}

/// The id-to-string lookup built from `Name` records.
#[derive(Default)]
struct Dictionary {
    entries: Vec<String>,
}

impl Dictionary {
    /// Define entry `id`, replacing an existing definition. Ids must be
    /// dense: defining past the current end is a wire error.
    fn define(&mut self, id: u16, value: String) -> Result<()> {
        let index = id as usize;

        match index.cmp(&self.entries.len()) {
            std::cmp::Ordering::Less => {
                self.entries[index] = value;
                Ok(())
            }
            std::cmp::Ordering::Equal => {
                self.entries.push(value);
                Ok(())
            }
            std::cmp::Ordering::Greater => Err(Error::Malformed(format!(
                "dictionary entry {id} defined out of order"
            ))),
        }
    }

    fn get(&self, id: u16) -> Result<&str> {
        self.entries
            .get(id as usize)
            .map(String::as_str)
            .ok_or_else(|| Error::Malformed(format!("undefined dictionary entry {id}")))
    }
}

/// Parse a `dict ++ doc` byte stream, driving `handler`.
pub fn parse<H: XmlHandler>(buffer: &ChunkedBuffer, handler: &mut H) -> Result<()> {
    let mut stream = StreamReader::new(buffer);
    let mut dictionary = Dictionary::default();

    // Element head under construction: tag id plus collated attributes.
    let mut pending_tag: Option<u16> = None;
    let mut pending_attrs: Vec<(u16, Value<String>)> = Vec::new();

    while !stream.is_eof() {
        let opcode = Opcode::try_from(stream.read_scalar::<u8>()?)?;

        match opcode {
            Opcode::CharSize => {
                let width = stream.read_scalar::<u8>()?;
                stream.set_char_width(width)?;
            }
            Opcode::StartTag => {
                let id = stream.read_scalar::<u16>()?;
                dictionary.get(id)?;
                flush_start(&dictionary, &mut pending_tag, &mut pending_attrs, handler)?;
                pending_tag = Some(id);
            }
            Opcode::EndTag => {
                let id = stream.read_scalar::<u16>()?;
                flush_start(&dictionary, &mut pending_tag, &mut pending_attrs, handler)?;
                handler.tag_end(dictionary.get(id)?)?;
            }
            Opcode::String => {
                let id = stream.read_scalar::<u16>()?;
                let value = stream.read_utf8_string(true)?;
                push_attr(&dictionary, pending_tag, &mut pending_attrs, id, Value::Str(value))?;
            }
            Opcode::Int | Opcode::Long => {
                let id = stream.read_scalar::<u16>()?;
                let value = stream.read_scalar::<i32>()?;
                push_attr(&dictionary, pending_tag, &mut pending_attrs, id, Value::Int(value))?;
            }
            Opcode::Bool => {
                let id = stream.read_scalar::<u16>()?;
                let value = stream.read_scalar::<u8>()? != 0;
                push_attr(&dictionary, pending_tag, &mut pending_attrs, id, Value::Bool(value))?;
            }
            Opcode::LongLong => {
                let id = stream.read_scalar::<u16>()?;
                let value = stream.read_scalar::<i64>()?;
                push_attr(&dictionary, pending_tag, &mut pending_attrs, id, Value::Long(value))?;
            }
            Opcode::SizeT => {
                let id = stream.read_scalar::<u16>()?;
                let value = stream.read_scalar::<u32>()?;
                push_attr(&dictionary, pending_tag, &mut pending_attrs, id, Value::UInt(value))?;
            }
            Opcode::Float => {
                let id = stream.read_scalar::<u16>()?;
                let value = stream.read_scalar::<f32>()?;
                // Digits suffix: recorded on the wire, ignored here.
                stream.skip(4)?;
                push_attr(&dictionary, pending_tag, &mut pending_attrs, id, Value::Float(value))?;
            }
            Opcode::Double => {
                let id = stream.read_scalar::<u16>()?;
                let value = stream.read_scalar::<f64>()?;
                stream.skip(4)?;
                push_attr(&dictionary, pending_tag, &mut pending_attrs, id, Value::Double(value))?;
            }
            Opcode::Data => {
                let data = stream.read_utf8_string(true)?;
                flush_start(&dictionary, &mut pending_tag, &mut pending_attrs, handler)?;
                handler.char_data(&data)?;
            }
            Opcode::Name => {
                let id = stream.read_scalar::<u16>()?;
                let value = stream.read_dictionary_string(false)?;
                dictionary.define(id, value)?;
            }
            Opcode::Raw => {
                stream.skip_string(true)?;
            }
            Opcode::Push | Opcode::Pop => {
                return Err(Error::Malformed(format!("reserved opcode {}", opcode as u8)));
            }
        }
    }

    // A dangling open element from a producer that stopped mid-head is
    // still delivered, and closed.
    if let Some(id) = pending_tag {
        let name = dictionary.get(id)?.to_owned();
        flush_start(&dictionary, &mut pending_tag, &mut pending_attrs, handler)?;
        handler.tag_end(&name)?;
    }

    Ok(())
}

fn flush_start<H: XmlHandler>(
    dictionary: &Dictionary,
    pending_tag: &mut Option<u16>,
    pending_attrs: &mut Vec<(u16, Value<String>)>,
    handler: &mut H,
) -> Result<()> {
    let Some(id) = pending_tag.take() else {
        return Ok(());
    };

    let attributes: SmallVec<[Attribute<'_>; 16]> = pending_attrs
        .iter()
        .map(|(name_id, value)| {
            Ok(Attribute {
                name: dictionary.get(*name_id)?,
                value: value.as_borrowed(),
            })
        })
        .collect::<Result<_>>()?;

    handler.tag_start(dictionary.get(id)?, &attributes)?;
    drop(attributes);
    pending_attrs.clear();
    Ok(())
}

fn push_attr(
    dictionary: &Dictionary,
    pending_tag: Option<u16>,
    pending_attrs: &mut Vec<(u16, Value<String>)>,
    name_id: u16,
    value: Value<String>,
) -> Result<()> {
    // Fail on unknown names immediately, before more records are consumed.
    let name = dictionary.get(name_id)?;

    if pending_tag.is_none() {
        return Err(Error::Malformed(format!(
            "attribute {name} outside of a tag context"
        )));
    }

    pending_attrs.push((name_id, value));
    Ok(())
}
