//! XML-shaped element tree and its serialized form.
//!
//! Config state is an ordered sequence of named elements with text content
//! and child sequences. The writer is deliberately deterministic (two-space
//! indentation, text on its own line when children follow) so that encoding
//! the same state twice yields identical bytes.

use std::fs;
use std::path::Path;

use quick_xml::escape::escape;
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;

use crate::error::ConfigError;

/// One node of the config tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            text: String::new(),
            children: Vec::new(),
        }
    }

    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            text: text.into(),
            children: Vec::new(),
        }
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(child);
    }

    /// First child with the given name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// Parse a single root element from XML text.
pub fn parse(input: &str) -> Result<Element, ConfigError> {
    let mut reader = Reader::from_str(input);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(start)) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                stack.push(Element::new(name));
            }
            Ok(XmlEvent::Empty(start)) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                let element = Element::new(name);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(element),
                }
            }
            Ok(XmlEvent::Text(text)) => {
                let text = text.unescape()?;
                if let Some(top) = stack.last_mut() {
                    if !top.text.is_empty() {
                        top.text.push(' ');
                    }
                    top.text.push_str(text.trim());
                }
            }
            Ok(XmlEvent::CData(data)) => {
                if let Some(top) = stack.last_mut() {
                    top.text
                        .push_str(&String::from_utf8_lossy(data.into_inner().as_ref()));
                }
            }
            Ok(XmlEvent::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| ConfigError::Xml("unbalanced end tag".to_string()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(element),
                }
            }
            Ok(XmlEvent::Eof) => {
                return Err(ConfigError::Xml("unexpected end of input".to_string()));
            }
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }
    }
}

/// Serialize an element tree. Output is stable for identical trees.
pub fn to_xml(root: &Element) -> String {
    let mut out = String::new();
    write_element(&mut out, root, 0);
    out
}

fn write_element(out: &mut String, element: &Element, depth: usize) {
    let indent = "  ".repeat(depth);
    if element.children.is_empty() {
        if element.text.is_empty() {
            out.push_str(&format!("{indent}<{} />\n", element.name));
        } else {
            out.push_str(&format!(
                "{indent}<{}>{}</{}>\n",
                element.name,
                escape(&element.text),
                element.name
            ));
        }
    } else {
        out.push_str(&format!("{indent}<{}>\n", element.name));
        if !element.text.is_empty() {
            out.push_str(&format!("{indent}  {}\n", escape(&element.text)));
        }
        for child in &element.children {
            write_element(out, child, depth + 1);
        }
        out.push_str(&format!("{indent}</{}>\n", element.name));
    }
}

/// Read and parse a config file.
pub fn read_config_file(path: &Path) -> Result<Element, ConfigError> {
    parse(&fs::read_to_string(path)?)
}

/// Serialize and write a config file.
pub fn write_config_file(path: &Path, root: &Element) -> Result<(), ConfigError> {
    fs::write(path, to_xml(root))?;
    Ok(())
}
