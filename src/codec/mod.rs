//! Binary-XML codec: wire opcodes, streaming parser, serializer, and the
//! XML textualization sink.

pub mod attribute;
pub mod parser;
pub mod stream;
pub mod writer;
pub mod xml_text;

pub use attribute::{Attribute, Value};
pub use parser::{parse, Opcode, XmlHandler};
pub use stream::{StreamReader, StreamWriter};
pub use writer::serialize_project;
pub use xml_text::XmlTextWriter;
