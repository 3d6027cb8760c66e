//! Namespace-free XML documents and the field mapping table.
//!
//! Responses are parsed once into a small element tree with namespace
//! prefixes and attributes dropped. Fields are then looked up through
//! [`XmlPath`], a fixed table from logical field to element path, so the rest
//! of the crate never deals with query syntax.

use crate::error::QueueError;
use quick_xml::events::Event;
use quick_xml::Reader;

#[cfg(test)]
#[path = "xml_tests.rs"]
mod tests;

/// Logical response fields and where they live
///
/// Paths match anywhere in the document for their first segment, then
/// descend through direct children for the remaining ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlPath {
    ErrorType,
    ErrorCode,
    ErrorMessage,
    QueueUrl,
    ListedQueueUrl,
    Message,
    MessageId,
    ReceiptHandle,
    Body,
    Md5OfMessageBody,
    Attribute,
    AttributeName,
    AttributeValue,
    BatchResultEntry,
    BatchErrorEntry,
    EntryId,
    EntryCode,
    EntryMessage,
    EntrySenderFault,
}

impl XmlPath {
    pub fn segments(self) -> &'static [&'static str] {
        match self {
            Self::ErrorType => &["Error", "Type"],
            Self::ErrorCode => &["Error", "Code"],
            Self::ErrorMessage => &["Error", "Message"],
            Self::QueueUrl => &["QueueUrl"],
            Self::ListedQueueUrl => &["ListQueuesResult", "QueueUrl"],
            Self::Message => &["ReceiveMessageResult", "Message"],
            Self::MessageId => &["MessageId"],
            Self::ReceiptHandle => &["ReceiptHandle"],
            Self::Body => &["Body"],
            Self::Md5OfMessageBody => &["MD5OfMessageBody"],
            Self::Attribute => &["Attribute"],
            Self::AttributeName => &["Name"],
            Self::AttributeValue => &["Value"],
            Self::BatchResultEntry => &["SendMessageBatchResultEntry"],
            Self::BatchErrorEntry => &["BatchResultErrorEntry"],
            Self::EntryId => &["Id"],
            Self::EntryCode => &["Code"],
            Self::EntryMessage => &["Message"],
            Self::EntrySenderFault => &["SenderFault"],
        }
    }

    /// Name used in error messages when a required field is absent
    pub fn field_name(self) -> &'static str {
        let segments = self.segments();
        segments[segments.len() - 1]
    }
}

/// One element with its local name, concatenated text and children
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    /// All elements matching `path` within this element (including itself)
    pub fn find_all(&self, path: XmlPath) -> Vec<&XmlElement> {
        let segments = path.segments();
        let Some((first, rest)) = segments.split_first() else {
            return Vec::new();
        };

        let mut anchors = Vec::new();
        self.collect_named(first, &mut anchors);

        let mut current = anchors;
        for segment in rest {
            current = current
                .into_iter()
                .flat_map(|element| element.children.iter().filter(|c| c.name == *segment))
                .collect();
        }
        current
    }

    /// Text of the first element matching `path`
    pub fn find_text(&self, path: XmlPath) -> Option<String> {
        self.find_all(path).first().map(|e| e.text.clone())
    }

    /// Text of the first direct child with the given path's final segment
    pub fn child_text(&self, path: XmlPath) -> Option<String> {
        let name = path.field_name();
        self.children
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.text.clone())
    }

    /// Like [`XmlElement::child_text`] but the field must be present
    pub fn required_child_text(&self, path: XmlPath) -> Result<String, QueueError> {
        self.child_text(path).ok_or(QueueError::MissingField {
            field: path.field_name(),
        })
    }

    fn collect_named<'a>(&'a self, name: &str, out: &mut Vec<&'a XmlElement>) {
        if self.name == name {
            out.push(self);
        }
        for child in &self.children {
            child.collect_named(name, out);
        }
    }
}

/// Parsed response document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    root: XmlElement,
}

impl XmlDocument {
    /// Parse a document, stripping namespace prefixes from element names.
    pub fn parse(xml: &str) -> Result<Self, QueueError> {
        // Text is kept verbatim; message bodies may carry meaningful whitespace.
        let mut reader = Reader::from_str(xml);
        reader.trim_text(false);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    stack.push(XmlElement::new(name));
                }
                Ok(Event::Empty(ref e)) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    attach(&mut stack, &mut root, XmlElement::new(name));
                }
                Ok(Event::Text(e)) => {
                    let text = e.unescape().map_err(|e| QueueError::Xml {
                        message: format!("Failed to unescape text: {}", e),
                    })?;
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text);
                    }
                }
                Ok(Event::CData(e)) => {
                    let raw = e.into_inner();
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(&raw));
                    }
                }
                Ok(Event::End(_)) => {
                    let element = stack.pop().ok_or_else(|| QueueError::Xml {
                        message: "Unbalanced closing tag".to_string(),
                    })?;
                    attach(&mut stack, &mut root, element);
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(QueueError::Xml {
                        message: format!("XML parsing error at {}: {}", reader.buffer_position(), e),
                    })
                }
                _ => {}
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(QueueError::Xml {
                message: "Unexpected end of document".to_string(),
            });
        }

        root.map(|root| Self { root }).ok_or_else(|| QueueError::Xml {
            message: "Document has no root element".to_string(),
        })
    }

    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    pub fn find_all(&self, path: XmlPath) -> Vec<&XmlElement> {
        self.root.find_all(path)
    }

    pub fn find_text(&self, path: XmlPath) -> Option<String> {
        self.root.find_text(path)
    }

    /// All texts matching `path`, in document order
    pub fn find_texts(&self, path: XmlPath) -> Vec<String> {
        self.find_all(path).into_iter().map(|e| e.text.clone()).collect()
    }

    pub fn required_text(&self, path: XmlPath) -> Result<String, QueueError> {
        self.find_text(path).ok_or(QueueError::MissingField {
            field: path.field_name(),
        })
    }

    /// `Attribute/Name|Value` pairs anywhere in the document
    pub fn attribute_pairs(&self) -> Vec<(String, String)> {
        attribute_pairs(&self.root)
    }
}

/// `Attribute/Name|Value` pairs found under `element`
pub fn attribute_pairs(element: &XmlElement) -> Vec<(String, String)> {
    element
        .find_all(XmlPath::Attribute)
        .into_iter()
        .filter_map(|attribute| {
            let name = attribute.child_text(XmlPath::AttributeName)?;
            let value = attribute.child_text(XmlPath::AttributeValue).unwrap_or_default();
            Some((name, value))
        })
        .collect()
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}
