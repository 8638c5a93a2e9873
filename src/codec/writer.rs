//! Serializer: in-memory tree back to the binary-XML wire form.
//!
//! The output is two buffers, stored in separate columns of the project
//! row: `dict` receives a `CharSize 1` record and the dictionary in pool
//! order, `doc` a depth-first emission of the tree. Strings always go
//! out in UTF-8 regardless of how the source document encoded them.

use crate::codec::attribute::Value;
use crate::codec::parser::Opcode;
use crate::codec::stream::StreamWriter;
use crate::common::{ChunkedBuffer, Error, Result};
use crate::project::tree::{NamePool, NodeId, ProjectTree, ValuePool};

/// Serialize a document into `(dict, doc)` buffers.
///
/// An empty tree produces an empty `doc`. Fails with
/// [`Error::UnknownName`] when a node refers to a name that is not in
/// the pool; the parser interns every observed name, so this indicates a
/// mutation that bypassed the pool.
pub fn serialize_project(
    names: &NamePool,
    values: &ValuePool,
    tree: &ProjectTree,
    root: Option<NodeId>,
) -> Result<(ChunkedBuffer, ChunkedBuffer)> {
    let mut dict = ChunkedBuffer::new();
    let mut doc = ChunkedBuffer::new();

    // Strings are written solely in UTF-8.
    dict.append_scalar(Opcode::CharSize as u8);
    dict.append_scalar(1u8);

    {
        let mut writer = StreamWriter::new(&mut dict);
        for (index, name) in names.iter().enumerate() {
            writer.write_scalar(Opcode::Name as u8);
            writer.write_scalar(index as u16);
            writer.write_string_u16(name);
        }
    }

    if let Some(root) = root {
        write_node(names, values, tree, root, &mut doc)?;
    }

    Ok((dict, doc))
}

fn write_node(
    names: &NamePool,
    values: &ValuePool,
    tree: &ProjectTree,
    id: NodeId,
    doc: &mut ChunkedBuffer,
) -> Result<()> {
    let node = tree.node(id);

    let tag_index = name_index(names, node.tag)?;

    doc.append_scalar(Opcode::StartTag as u8);
    doc.append_scalar(tag_index);

    for attr in &node.attributes {
        let attr_index = name_index(names, attr.name)?;
        let mut writer = StreamWriter::new(doc);

        // Encoding is keyed on the attribute's current kind, not on the
        // opcode it was read from: `Long` collapses to `Int`.
        match attr.value {
            Value::Bool(value) => {
                writer.write_scalar(Opcode::Bool as u8);
                writer.write_scalar(attr_index);
                writer.write_scalar(value as u8);
            }
            Value::Int(value) => {
                writer.write_scalar(Opcode::Int as u8);
                writer.write_scalar(attr_index);
                writer.write_scalar(value);
            }
            Value::UInt(value) => {
                writer.write_scalar(Opcode::SizeT as u8);
                writer.write_scalar(attr_index);
                writer.write_scalar(value);
            }
            Value::Long(value) => {
                writer.write_scalar(Opcode::LongLong as u8);
                writer.write_scalar(attr_index);
                writer.write_scalar(value);
            }
            Value::Size(value) => {
                writer.write_scalar(Opcode::SizeT as u8);
                writer.write_scalar(attr_index);
                writer.write_scalar(value as u32);
            }
            Value::Float(value) => {
                writer.write_scalar(Opcode::Float as u8);
                writer.write_scalar(attr_index);
                writer.write_scalar(value);
                writer.write_scalar(7i32);
            }
            Value::Double(value) => {
                writer.write_scalar(Opcode::Double as u8);
                writer.write_scalar(attr_index);
                writer.write_scalar(value);
                writer.write_scalar(19i32);
            }
            Value::Str(value) => {
                writer.write_scalar(Opcode::String as u8);
                writer.write_scalar(attr_index);
                writer.write_string_u32(values.get(value));
            }
        }
    }

    if !node.data.is_empty() {
        let mut writer = StreamWriter::new(doc);
        writer.write_scalar(Opcode::Data as u8);
        writer.write_string_u32(&node.data);
    }

    for &child in &node.children {
        write_node(names, values, tree, child, doc)?;
    }

    doc.append_scalar(Opcode::EndTag as u8);
    doc.append_scalar(tag_index);

    Ok(())
}

fn name_index(names: &NamePool, id: crate::project::tree::NameId) -> Result<u16> {
    match names.get(id) {
        Some(_) => Ok(id.index()),
        None => Err(Error::UnknownName(format!("#{}", id.index()))),
    }
}
