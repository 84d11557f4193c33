//! Minimal XML tree over quick-xml.
//!
//! Protocol messages are parsed into an owned [`XmlElement`] tree. Elements
//! are matched by local name; prefixes are kept verbatim. Character data,
//! whitespace included, is kept as parsed, and every parsed element
//! remembers the namespace bindings it inherited from its ancestors.
//!
//! [`XmlElement::canonicalize`] renders Exclusive XML Canonicalization 1.0
//! without comments: a namespace declaration is written only on the
//! outermost element that visibly uses its prefix, attributes are sorted by
//! namespace URI then local name, empty elements become a start/end pair.
//! A subtree canonicalizes the same in place and extracted.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{SamlError, SamlResult};

/// Maximum element nesting accepted from peers.
const MAX_DEPTH: usize = 64;

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Prefix to namespace URI; the default namespace is keyed by `""`.
type Namespaces = BTreeMap<String, String>;

/// A node inside an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    /// Child element.
    Element(XmlElement),
    /// Character data.
    Text(String),
}

/// An owned XML element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    /// Qualified name as written, e.g. `saml:Assertion`.
    pub name: String,
    /// Attributes in document order, values unescaped.
    pub attributes: Vec<(String, String)>,
    /// Child nodes in document order.
    pub children: Vec<XmlNode>,
    inherited: Namespaces,
}

impl XmlElement {
    /// Parses a document and returns its root element.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::MalformedMessage`] for ill-formed input, DTDs,
    /// multiple roots or excessive nesting.
    pub fn parse(xml: &str) -> SamlResult<Self> {
        let mut reader = Reader::from_str(xml);

        let mut stack: Vec<Self> = Vec::new();
        let mut root: Option<Self> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    if stack.len() >= MAX_DEPTH {
                        return Err(SamlError::malformed("XML nesting too deep"));
                    }
                    let inherited = stack.last().map(Self::in_scope).unwrap_or_default();
                    stack.push(Self::from_start(&e, inherited)?);
                }
                Event::Empty(e) => {
                    let inherited = stack.last().map(Self::in_scope).unwrap_or_default();
                    let element = Self::from_start(&e, inherited)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| SamlError::malformed("unexpected closing tag"))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(t) => {
                    let text = t.unescape()?;
                    push_text(&mut stack, &text)?;
                }
                Event::CData(c) => {
                    let raw = c.into_inner();
                    let text = std::str::from_utf8(&raw)
                        .map_err(|_| SamlError::malformed("CDATA is not UTF-8"))?;
                    push_text(&mut stack, text)?;
                }
                Event::DocType(_) => {
                    return Err(SamlError::malformed("document type declarations are not accepted"));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(SamlError::malformed("unclosed element"));
        }
        root.ok_or_else(|| SamlError::malformed("empty document"))
    }

    fn from_start(e: &BytesStart<'_>, inherited: Namespaces) -> SamlResult<Self> {
        let name = std::str::from_utf8(e.name().as_ref())
            .map_err(|_| SamlError::malformed("element name is not UTF-8"))?
            .to_string();

        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|_| SamlError::malformed("attribute name is not UTF-8"))?
                .to_string();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }

        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
            inherited,
        })
    }

    /// Namespace bindings in scope at this element, its own declarations
    /// included.
    fn in_scope(&self) -> Namespaces {
        let mut scope = self.inherited.clone();
        scope.extend(
            self.attributes
                .iter()
                .filter_map(|(k, v)| declared_prefix(k).map(|p| (p.to_string(), v.clone()))),
        );
        scope
    }

    /// Creates an element with no attributes or children.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
            inherited: Namespaces::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Adds an attribute when `value` is present.
    #[must_use]
    pub fn with_opt_attr(self, key: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.with_attr(key, v),
            None => self,
        }
    }

    /// Appends a child element.
    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    /// Appends a child element when present.
    #[must_use]
    pub fn with_opt_child(self, child: Option<Self>) -> Self {
        match child {
            Some(c) => self.with_child(c),
            None => self,
        }
    }

    /// Appends character data.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    /// Inserts a child element at `index` among all child nodes.
    pub fn insert_child(&mut self, index: usize, child: Self) {
        let index = index.min(self.children.len());
        self.children.insert(index, XmlNode::Element(child));
    }

    /// Returns the position of the first child element with this local
    /// name among all child nodes.
    #[must_use]
    pub fn child_position(&self, local: &str) -> Option<usize> {
        self.children
            .iter()
            .position(|node| matches!(node, XmlNode::Element(e) if e.local_name() == local))
    }

    /// Returns the name without its prefix.
    #[must_use]
    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    /// Returns the value of an attribute, matched by local name.
    ///
    /// Namespace declarations are never returned.
    #[must_use]
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| !is_namespace_decl(k) && local_part(k) == local)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates over child elements.
    pub fn elements(&self) -> impl Iterator<Item = &Self> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// Returns the first child element with this local name.
    #[must_use]
    pub fn child(&self, local: &str) -> Option<&Self> {
        self.elements().find(|e| e.local_name() == local)
    }

    /// Iterates over child elements with this local name.
    pub fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a Self> + 'a {
        self.elements().filter(move |e| e.local_name() == local)
    }

    /// Returns the concatenated text content of this element's direct
    /// text children, without surrounding whitespace.
    #[must_use]
    pub fn text(&self) -> String {
        let text: String = self
            .children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(t) => Some(t.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect();
        text.trim().to_string()
    }

    /// Returns the text of the first child element with this local name.
    #[must_use]
    pub fn child_text(&self, local: &str) -> Option<String> {
        self.child(local).map(Self::text)
    }

    /// Depth-first search of descendants (not including `self`).
    #[must_use]
    pub fn find(&self, local: &str) -> Option<&Self> {
        for child in self.elements() {
            if child.local_name() == local {
                return Some(child);
            }
            if let Some(found) = child.find(local) {
                return Some(found);
            }
        }
        None
    }

    /// Serializes the element.
    ///
    /// Namespaces the element inherited from a parsed document are declared
    /// on it, so an extracted subtree stays self-contained.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        let extra: Vec<(&String, &String)> = self
            .inherited
            .iter()
            .filter(|(prefix, _)| {
                !self
                    .attributes
                    .iter()
                    .any(|(k, _)| declared_prefix(k) == Some(prefix.as_str()))
            })
            .collect();
        self.write(&mut out, &extra);
        out
    }

    fn write(&self, out: &mut String, extra: &[(&String, &String)]) {
        out.push('<');
        out.push_str(&self.name);
        for (prefix, uri) in extra {
            write_namespace(out, prefix, uri);
        }
        let mut attrs: Vec<&(String, String)> = self.attributes.iter().collect();
        attrs.sort_by(|a, b| {
            (!is_namespace_decl(&a.0), &a.0).cmp(&(!is_namespace_decl(&b.0), &b.0))
        });
        for (key, value) in attrs {
            write_attr(out, key, value);
        }
        out.push('>');

        for child in &self.children {
            match child {
                XmlNode::Element(e) => e.write(out, &[]),
                XmlNode::Text(t) => out.push_str(&escape_text(t)),
            }
        }

        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }

    /// Exclusive canonical form of the element in its document context.
    #[must_use]
    pub fn canonicalize(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out, &self.inherited, &Namespaces::new(), false);
        out
    }

    /// Exclusive canonical form leaving out a direct `Signature` child.
    /// This is the digest input of an enveloped signature.
    #[must_use]
    pub fn canonicalize_enveloped(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out, &self.inherited, &Namespaces::new(), true);
        out
    }

    fn write_canonical(&self, out: &mut String, inherited: &Namespaces, rendered: &Namespaces, skip_signature: bool) {
        let mut scope = inherited.clone();
        let mut attributes = Vec::new();
        for (key, value) in &self.attributes {
            match declared_prefix(key) {
                Some(prefix) => {
                    scope.insert(prefix.to_string(), value.clone());
                }
                None => attributes.push((key.as_str(), value.as_str())),
            }
        }

        let mut utilized = BTreeSet::new();
        utilized.insert(prefix_part(&self.name).unwrap_or(""));
        utilized.extend(
            attributes
                .iter()
                .filter_map(|(k, _)| prefix_part(k))
                .filter(|p| *p != "xml"),
        );

        let mut rendered = rendered.clone();
        out.push('<');
        out.push_str(&self.name);
        for prefix in utilized {
            let uri = scope.get(prefix).map_or("", String::as_str);
            let current = rendered.get(prefix).map_or("", String::as_str);
            if uri != current {
                write_namespace(out, prefix, uri);
                rendered.insert(prefix.to_string(), uri.to_string());
            }
        }

        attributes.sort_by(|a, b| {
            (namespace_of(a.0, &scope), local_part(a.0)).cmp(&(namespace_of(b.0, &scope), local_part(b.0)))
        });
        for (key, value) in attributes {
            write_attr(out, key, value);
        }
        out.push('>');

        for child in &self.children {
            match child {
                XmlNode::Element(e) if skip_signature && e.local_name() == "Signature" => {}
                XmlNode::Element(e) => e.write_canonical(out, &scope, &rendered, false),
                XmlNode::Text(t) => out.push_str(&escape_text(t)),
            }
        }

        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn write_namespace(out: &mut String, prefix: &str, uri: &str) {
    if prefix.is_empty() {
        write_attr(out, "xmlns", uri);
    } else {
        write_attr(out, &format!("xmlns:{prefix}"), uri);
    }
}

fn write_attr(out: &mut String, key: &str, value: &str) {
    out.push(' ');
    out.push_str(key);
    out.push_str("=\"");
    out.push_str(&escape_attr(value));
    out.push('"');
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) -> SamlResult<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(XmlNode::Element(element));
        return Ok(());
    }
    if root.is_some() {
        return Err(SamlError::malformed("multiple root elements"));
    }
    *root = Some(element);
    Ok(())
}

fn push_text(stack: &mut [XmlElement], text: &str) -> SamlResult<()> {
    let Some(parent) = stack.last_mut() else {
        if text.trim().is_empty() {
            return Ok(());
        }
        return Err(SamlError::malformed("text outside the root element"));
    };
    // Parsed line ends are normalized to LF.
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    match parent.children.last_mut() {
        Some(XmlNode::Text(previous)) => previous.push_str(&text),
        _ => parent.children.push(XmlNode::Text(text)),
    }
    Ok(())
}

fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

fn prefix_part(name: &str) -> Option<&str> {
    name.split_once(':').map(|(prefix, _)| prefix)
}

fn namespace_of<'a>(key: &str, scope: &'a Namespaces) -> &'a str {
    match prefix_part(key) {
        None => "",
        Some("xml") => XML_NS,
        Some(prefix) => scope.get(prefix).map_or("", String::as_str),
    }
}

fn is_namespace_decl(key: &str) -> bool {
    declared_prefix(key).is_some()
}

/// Prefix bound by a namespace declaration attribute, `""` for the default
/// namespace.
fn declared_prefix(key: &str) -> Option<&str> {
    if key == "xmlns" {
        Some("")
    } else {
        key.strip_prefix("xmlns:")
    }
}

/// Escapes character data.
#[must_use]
pub fn escape_text(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>', '\r']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Escapes an attribute value for double-quoted output.
#[must_use]
pub fn escape_attr(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '"', '\t', '\n', '\r']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}
