//! Textualization sink: renders the parse event stream as indented XML.
//!
//! This is a plain rendering of what the binary document says, meant for
//! operators inspecting a damaged project. Indentation is two spaces per
//! depth; an element closed immediately after it was opened collapses to
//! ` />`. Character data is escaped; attribute values are rendered by
//! value kind as-is.

use crate::codec::attribute::Attribute;
use crate::codec::parser::XmlHandler;
use crate::common::{ChunkedBuffer, Result};

/// [`XmlHandler`] that renders events into a text buffer.
#[derive(Default)]
pub struct XmlTextWriter {
    buffer: ChunkedBuffer,
    indent: String,
    last_tag: String,
    in_tag: bool,
}

impl XmlTextWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The rendered text accumulated so far.
    pub fn into_buffer(self) -> ChunkedBuffer {
        self.buffer
    }

    fn write(&mut self, text: &str) {
        self.buffer.append(text.as_bytes());
    }
}

impl XmlHandler for XmlTextWriter {
    fn tag_start(&mut self, name: &str, attributes: &[Attribute<'_>]) -> Result<()> {
        if self.in_tag {
            self.write(">\n");
        }

        let indent = self.indent.clone();
        self.write(&indent);
        self.write("<");
        self.write(name);

        for attr in attributes {
            let rendered = attr.value.to_string();
            self.write(" ");
            self.write(attr.name);
            self.write("=\"");
            self.write(&rendered);
            self.write("\"");
        }

        self.last_tag.clear();
        self.last_tag.push_str(name);
        self.in_tag = true;

        self.indent.push_str("  ");
        Ok(())
    }

    fn tag_end(&mut self, name: &str) -> Result<()> {
        self.indent.truncate(self.indent.len().saturating_sub(2));

        if self.last_tag == name {
            self.write(" />\n");
        } else {
            let indent = self.indent.clone();
            self.write(&indent);
            self.write("</");
            self.write(name);
            self.write(">\n");
        }

        self.in_tag = false;
        Ok(())
    }

    fn char_data(&mut self, data: &str) -> Result<()> {
        for byte in data.bytes() {
            match byte {
                b'\'' => self.write("&apos;"),
                b'"' => self.write("&quot;"),
                b'&' => self.write("&amp;"),
                b'<' => self.write("&lt;"),
                b'>' => self.write("&gt;"),
                // Control bytes other than backspace, tab, LF and CR are
                // dropped: they would make the output unreadable and the
                // authoring tool never writes them intentionally.
                0x08 | 0x09 | 0x0A | 0x0D => self.buffer.append(&[byte]),
                b if b < 0x20 => {}
                b => self.buffer.append(&[b]),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::attribute::Value;

    fn text(writer: XmlTextWriter) -> String {
        String::from_utf8(writer.into_buffer().to_vec()).unwrap()
    }

    #[test]
    fn leaf_collapses() {
        let mut writer = XmlTextWriter::new();
        writer.tag_start("project", &[]).unwrap();
        writer.tag_end("project").unwrap();

        assert_eq!(text(writer), "<project />\n");
    }

    #[test]
    fn nested_elements_indent() {
        let mut writer = XmlTextWriter::new();
        writer
            .tag_start(
                "wavetrack",
                &[
                    Attribute { name: "rate", value: Value::Int(44100) },
                    Attribute { name: "name", value: Value::Str("Audio 1") },
                ],
            )
            .unwrap();
        writer
            .tag_start("waveclip", &[Attribute { name: "offset", value: Value::Double(0.5) }])
            .unwrap();
        writer.tag_end("waveclip").unwrap();
        writer.tag_end("wavetrack").unwrap();

        assert_eq!(
            text(writer),
            "<wavetrack rate=\"44100\" name=\"Audio 1\">\n  <waveclip offset=\"0.5\" />\n</wavetrack>\n"
        );
    }

    #[test]
    fn char_data_is_escaped() {
        let mut writer = XmlTextWriter::new();
        writer.tag_start("label", &[]).unwrap();
        writer.char_data("a < b & \"c\"\x01\x07\tdone").unwrap();
        writer.tag_end("label").unwrap();

        let rendered = text(writer);
        assert!(rendered.contains("a &lt; b &amp; &quot;c&quot;\tdone"));
        assert!(!rendered.contains('\x01'));
        assert!(!rendered.contains('\x07'));
    }
}
