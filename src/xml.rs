// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Owned XML node tree with the path addressing the DSL needs.
//!
//! Parsing and serialization go through [`quick_xml`]; path evaluation is a
//! deliberately small XPath subset: absolute child steps, `//` descent,
//! positional `[n]` and `[@attr='v']` predicates, trailing `@attr` and
//! `text()` selections, and `count(...)`.

use derive_more::with_trait::{Display, Error};
use quick_xml::{
    Reader, Writer,
    events::{BytesEnd, BytesStart, BytesText, Event},
};

use crate::value::{Map, Value};

/// One XML element: name, attributes and ordered children.
///
/// CDATA sections are coerced to plain text at parse time.
#[derive(Clone, Debug, PartialEq)]
pub struct XmlNode {
    /// Element name, namespace prefix included verbatim.
    pub name: String,

    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,

    /// Child elements and text nodes in document order.
    pub children: Vec<XmlChild>,
}

/// A child of an [`XmlNode`].
#[derive(Clone, Debug, PartialEq)]
pub enum XmlChild {
    /// Nested element.
    Element(XmlNode),

    /// Text content (whitespace-only runs are dropped at parse time).
    Text(String),
}

/// Error of XML parsing or path evaluation.
#[derive(Clone, Debug, Display, Error)]
pub enum XmlError {
    /// Input is not well-formed XML.
    #[display("malformed xml: {_0}")]
    Malformed(#[error(not(source))] String),

    /// Path expression is not part of the supported subset.
    #[display("unsupported xpath: {_0}")]
    BadPath(#[error(not(source))] String),
}

/// Parses a single-rooted XML document.
///
/// # Errors
///
/// If the input is not well-formed or has no root element.
pub fn parse(text: &str) -> Result<XmlNode, XmlError> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| XmlError::Malformed(e.to_string()))?;
        match event {
            Event::Start(start) => {
                stack.push(element_of(&start)?);
            }
            Event::Empty(start) => {
                let node = element_of(&start)?;
                attach(&mut stack, &mut root, node);
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| {
                    XmlError::Malformed("unbalanced end tag".into())
                })?;
                attach(&mut stack, &mut root, node);
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| XmlError::Malformed(e.to_string()))?;
                push_text(&mut stack, &text);
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                push_text(&mut stack, &text);
            }
            Event::Eof => break,
            // Declarations, comments, PIs and doctypes carry no data.
            _ => {}
        }
    }

    root.ok_or_else(|| XmlError::Malformed("no root element".into()))
}

fn element_of(start: &BytesStart<'_>) -> Result<XmlNode, XmlError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmlError::Malformed(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| XmlError::Malformed(e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(XmlNode { name, attributes, children: Vec::new() })
}

fn attach(stack: &mut Vec<XmlNode>, root: &mut Option<XmlNode>, node: XmlNode) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(XmlChild::Element(node));
    } else if root.is_none() {
        *root = Some(node);
    }
}

fn push_text(stack: &mut [XmlNode], text: &str) {
    if text.trim().is_empty() {
        return;
    }
    if let Some(parent) = stack.last_mut() {
        parent.children.push(XmlChild::Text(text.to_owned()));
    }
}

impl XmlNode {
    /// Creates an element with no attributes or children.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), attributes: Vec::new(), children: Vec::new() }
    }

    /// Serializes without an XML declaration.
    #[must_use]
    pub fn serialize(&self) -> String {
        let mut writer = Writer::new(Vec::new());
        write_node(&mut writer, self);
        String::from_utf8(writer.into_inner()).unwrap_or_default()
    }

    /// Concatenated text content of all direct text children.
    #[must_use]
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                XmlChild::Text(t) => Some(t.as_str()),
                XmlChild::Element(_) => None,
            })
            .collect()
    }

    /// Indicates whether this element has no element children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        !self
            .children
            .iter()
            .any(|c| matches!(c, XmlChild::Element(_)))
    }

    /// Direct child elements.
    pub fn elements(&self) -> impl Iterator<Item = &Self> {
        self.children.iter().filter_map(|c| match c {
            XmlChild::Element(e) => Some(e),
            XmlChild::Text(_) => None,
        })
    }

    /// Attribute value by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.as_str() == name)
            .map(|(_, v)| v.as_str())
    }
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &XmlNode) {
    let mut start = BytesStart::new(node.name.as_str());
    for (k, v) in &node.attributes {
        start.push_attribute((k.as_str(), v.as_str()));
    }
    if node.children.is_empty() {
        drop(writer.write_event(Event::Empty(start)));
        return;
    }
    drop(writer.write_event(Event::Start(start)));
    for child in &node.children {
        match child {
            XmlChild::Element(e) => write_node(writer, e),
            XmlChild::Text(t) => {
                drop(writer.write_event(Event::Text(BytesText::new(t))));
            }
        }
    }
    drop(writer.write_event(Event::End(BytesEnd::new(node.name.as_str()))));
}

/// One parsed step of a path expression.
#[derive(Debug)]
struct PathStep {
    /// `true` for `//name` descent steps.
    descend: bool,
    name: String,
    /// 1-based positional predicate.
    index: Option<usize>,
    /// `[@attr='value']` predicate.
    attr_eq: Option<(String, String)>,
}

/// Trailing selection of a path.
#[derive(Debug)]
enum PathLeaf {
    Node,
    Text,
    Attribute(String),
}

fn parse_path(path: &str) -> Result<(Vec<PathStep>, PathLeaf), XmlError> {
    let mut steps = Vec::new();
    let mut leaf = PathLeaf::Node;
    let mut rest = path.trim();
    rest = rest.strip_prefix('/').unwrap_or(rest);

    let mut descend = false;
    for raw in rest.split('/') {
        if raw.is_empty() {
            // Empty segment between two slashes: the next step descends.
            descend = true;
            continue;
        }
        if raw == "text()" {
            leaf = PathLeaf::Text;
            continue;
        }
        if let Some(attr) = raw.strip_prefix('@') {
            leaf = PathLeaf::Attribute(attr.to_owned());
            continue;
        }
        let (name, index, attr_eq) = parse_predicates(raw)?;
        steps.push(PathStep { descend, name, index, attr_eq });
        descend = false;
    }
    Ok((steps, leaf))
}

fn parse_predicates(
    raw: &str,
) -> Result<(String, Option<usize>, Option<(String, String)>), XmlError> {
    let Some(open) = raw.find('[') else {
        return Ok((raw.to_owned(), None, None));
    };
    let name = raw[..open].to_owned();
    let inner = raw[open..]
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| XmlError::BadPath(raw.to_owned()))?;
    if let Ok(n) = inner.parse::<usize>() {
        if n == 0 {
            return Err(XmlError::BadPath(raw.to_owned()));
        }
        return Ok((name, Some(n), None));
    }
    if let Some(cond) = inner.strip_prefix('@') {
        if let Some((k, v)) = cond.split_once('=') {
            let v = v.trim().trim_matches('\'').trim_matches('"');
            return Ok((name, None, Some((k.trim().to_owned(), v.to_owned()))));
        }
    }
    Err(XmlError::BadPath(raw.to_owned()))
}

fn collect_descendants<'n>(node: &'n XmlNode, name: &str, out: &mut Vec<&'n XmlNode>) {
    for child in node.elements() {
        if name == "*" || child.name == name {
            out.push(child);
        }
        collect_descendants(child, name, out);
    }
}

fn apply_step<'n>(set: &[&'n XmlNode], step: &PathStep) -> Vec<&'n XmlNode> {
    let mut next = Vec::new();
    for node in set {
        let mut matched: Vec<&XmlNode> = Vec::new();
        if step.descend {
            if step.name == "*" || node.name == step.name {
                matched.push(node);
            }
            collect_descendants(node, &step.name, &mut matched);
        } else {
            matched.extend(
                node.elements()
                    .filter(|e| step.name == "*" || e.name == step.name),
            );
        }
        if let Some((k, v)) = &step.attr_eq {
            matched.retain(|e| e.attribute(k) == Some(v.as_str()));
        }
        if let Some(n) = step.index {
            if let Some(e) = matched.get(n - 1) {
                next.push(*e);
            }
        } else {
            next.append(&mut matched);
        }
    }
    next
}

/// Evaluates a path against `root`, returning `None` when nothing matches.
///
/// A matched leaf element collapses to its text; a matched branch element is
/// returned as a node; several matches become a list.
///
/// # Errors
///
/// If the path is outside the supported subset.
pub fn select(root: &XmlNode, path: &str) -> Result<Option<Value>, XmlError> {
    let trimmed = path.trim();
    if trimmed == "/" || trimmed.is_empty() {
        return Ok(Some(Value::Xml(root.clone())));
    }
    let (steps, leaf) = parse_path(trimmed)?;

    // An absolute first step names the root element itself.
    let mut set: Vec<&XmlNode> = vec![root];
    let mut steps = steps.as_slice();
    if let Some(first) = steps.first() {
        if !first.descend {
            if first.name != "*" && first.name != root.name {
                return Ok(None);
            }
            if let Some((k, v)) = &first.attr_eq {
                if root.attribute(k) != Some(v.as_str()) {
                    return Ok(None);
                }
            }
            steps = &steps[1..];
        }
    }
    for step in steps {
        set = apply_step(&set, step);
    }
    if set.is_empty() {
        return Ok(None);
    }

    let mut values: Vec<Value> = Vec::new();
    for node in set {
        match &leaf {
            PathLeaf::Node => {
                if node.is_leaf() {
                    values.push(Value::String(node.text()));
                } else {
                    values.push(Value::Xml(node.clone()));
                }
            }
            PathLeaf::Text => values.push(Value::String(node.text())),
            PathLeaf::Attribute(name) => {
                if let Some(v) = node.attribute(name) {
                    values.push(Value::String(v.to_owned()));
                }
            }
        }
    }
    Ok(match values.len() {
        0 => None,
        1 => values.pop(),
        _ => Some(Value::List(values)),
    })
}

/// Counts the nodes a path matches (the `count(...)` XPath function).
///
/// # Errors
///
/// If the path is outside the supported subset.
pub fn count(root: &XmlNode, path: &str) -> Result<i64, XmlError> {
    Ok(match select(root, path)? {
        None => 0,
        Some(Value::List(items)) => items.len() as i64,
        Some(_) => 1,
    })
}

/// Sets the location addressed by `path`, creating missing elements.
///
/// Positional steps pad out preceding siblings, so `/r/a[3]` on an empty
/// `<r/>` produces three `<a/>` elements. A trailing `@attr` sets an
/// attribute. An XML `value` replaces the target's children wholesale.
///
/// # Errors
///
/// If the path uses predicates other than positions, or descends with `//`.
pub fn set(root: &mut XmlNode, path: &str, value: &Value) -> Result<(), XmlError> {
    let (steps, leaf) = parse_path(path)?;
    let mut steps = steps.as_slice();
    if let Some(first) = steps.first() {
        if !first.descend && (first.name == root.name || first.name == "*") {
            steps = &steps[1..];
        }
    }

    let mut node = root;
    for step in steps {
        if step.descend || step.attr_eq.is_some() {
            return Err(XmlError::BadPath(path.to_owned()));
        }
        let wanted = step.index.unwrap_or(1);
        loop {
            let have = node
                .elements()
                .filter(|e| e.name == step.name)
                .count();
            if have >= wanted {
                break;
            }
            node.children
                .push(XmlChild::Element(XmlNode::new(step.name.clone())));
        }
        let mut seen = 0;
        let mut target = None;
        for child in &mut node.children {
            if let XmlChild::Element(e) = child {
                if e.name == step.name {
                    seen += 1;
                    if seen == wanted {
                        target = Some(e);
                        break;
                    }
                }
            }
        }
        // The loop above guarantees enough siblings exist.
        node = target.ok_or_else(|| XmlError::BadPath(path.to_owned()))?;
    }

    match leaf {
        PathLeaf::Attribute(name) => {
            let text = value.display_string();
            if let Some(slot) =
                node.attributes.iter_mut().find(|(k, _)| *k == name)
            {
                slot.1 = text;
            } else {
                node.attributes.push((name, text));
            }
        }
        PathLeaf::Node | PathLeaf::Text => match value {
            Value::Xml(replacement) => {
                node.children =
                    vec![XmlChild::Element(replacement.clone())];
            }
            Value::Null => node.children.clear(),
            other => {
                node.children = vec![XmlChild::Text(other.display_string())];
            }
        },
    }
    Ok(())
}

/// Removes the element or attribute addressed by `path`. Missing targets are
/// a no-op.
///
/// # Errors
///
/// If the path is outside the supported subset.
pub fn remove(root: &mut XmlNode, path: &str) -> Result<(), XmlError> {
    let (steps, leaf) = parse_path(path)?;
    let mut steps = steps.as_slice();
    if let Some(first) = steps.first() {
        if !first.descend && (first.name == root.name || first.name == "*") {
            steps = &steps[1..];
        }
    }

    if steps.is_empty() {
        if let PathLeaf::Attribute(name) = leaf {
            root.attributes.retain(|(k, _)| *k != name);
        }
        return Ok(());
    }

    let (last, parents) = steps.split_last().ok_or_else(|| {
        XmlError::BadPath(path.to_owned())
    })?;
    let mut node = root;
    for step in parents {
        if step.descend {
            return Err(XmlError::BadPath(path.to_owned()));
        }
        let wanted = step.index.unwrap_or(1);
        let mut seen = 0;
        let mut target = None;
        for child in &mut node.children {
            if let XmlChild::Element(e) = child {
                if e.name == step.name {
                    seen += 1;
                    if seen == wanted {
                        target = Some(e);
                        break;
                    }
                }
            }
        }
        match target {
            Some(t) => node = t,
            None => return Ok(()),
        }
    }

    if let PathLeaf::Attribute(name) = leaf {
        let wanted = last.index.unwrap_or(1);
        let mut seen = 0;
        for child in &mut node.children {
            if let XmlChild::Element(e) = child {
                if e.name == last.name {
                    seen += 1;
                    if seen == wanted {
                        e.attributes.retain(|(k, _)| *k != name);
                        break;
                    }
                }
            }
        }
        return Ok(());
    }

    let wanted = last.index.unwrap_or(1);
    let mut seen = 0;
    node.children.retain(|child| {
        if let XmlChild::Element(e) = child {
            if e.name == last.name {
                seen += 1;
                return seen != wanted;
            }
        }
        true
    });
    Ok(())
}

/// Converts a map into an XML tree. A single-keyed map supplies the root
/// element; anything else is wrapped in `<root>`.
#[must_use]
pub fn from_map(map: &Map) -> XmlNode {
    if map.len() == 1 {
        let (name, value) = map.iter().next().unwrap_or_else(|| unreachable!());
        let mut node = XmlNode::new(name.clone());
        fill_element(&mut node, value);
        node
    } else {
        let mut node = XmlNode::new("root");
        fill_element(&mut node, &Value::Map(map.clone()));
        node
    }
}

fn fill_element(node: &mut XmlNode, value: &Value) {
    match value {
        Value::Null => {}
        Value::Map(m) => {
            for (k, v) in m {
                if let Some(attrs) = k.strip_prefix('@') {
                    node.attributes.push((attrs.to_owned(), v.display_string()));
                    continue;
                }
                if let Value::List(items) = v {
                    for item in items {
                        let mut child = XmlNode::new(k.clone());
                        fill_element(&mut child, item);
                        node.children.push(XmlChild::Element(child));
                    }
                } else {
                    let mut child = XmlNode::new(k.clone());
                    fill_element(&mut child, v);
                    node.children.push(XmlChild::Element(child));
                }
            }
        }
        Value::List(items) => {
            for item in items {
                let mut child = XmlNode::new("value");
                fill_element(&mut child, item);
                node.children.push(XmlChild::Element(child));
            }
        }
        Value::Xml(x) => node.children.push(XmlChild::Element(x.clone())),
        other => node.children.push(XmlChild::Text(other.display_string())),
    }
}

/// Converts an XML tree into a map-shaped [`Value`]: `{name: content}`,
/// attributes under an `"@"` sub-map, repeated child names collapsing to
/// lists, leaf elements to their text.
#[must_use]
pub fn to_map(node: &XmlNode) -> Value {
    let mut out = Map::new();
    out.insert(node.name.clone(), element_value(node));
    Value::Map(out)
}

fn element_value(node: &XmlNode) -> Value {
    let content = if node.is_leaf() {
        let text = node.text();
        if text.is_empty() { Value::Null } else { Value::String(text) }
    } else {
        let mut m = Map::new();
        for child in node.elements() {
            let v = element_value(child);
            match m.get_mut(&child.name) {
                Some(Value::List(items)) => items.push(v),
                Some(existing) => {
                    let prev = std::mem::replace(existing, Value::Null);
                    *existing = Value::List(vec![prev, v]);
                }
                None => {
                    m.insert(child.name.clone(), v);
                }
            }
        }
        Value::Map(m)
    };

    if node.attributes.is_empty() {
        return content;
    }
    let mut attrs = Map::new();
    for (k, v) in &node.attributes {
        attrs.insert(k.clone(), Value::String(v.clone()));
    }
    let mut wrapped = Map::new();
    wrapped.insert("@".into(), Value::Map(attrs));
    wrapped.insert("_".into(), content);
    Value::Map(wrapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_serialize_round_trip() {
        let xml = parse(r#"<cat id="1"><name>Billie</name><tail/></cat>"#).unwrap();
        assert_eq!(
            xml.serialize(),
            r#"<cat id="1"><name>Billie</name><tail/></cat>"#,
        );
    }

    #[test]
    fn cdata_coerces_to_text() {
        let xml = parse("<a><![CDATA[x < y]]></a>").unwrap();
        assert_eq!(xml.text(), "x < y");
    }

    #[test]
    fn select_collapses_leaf_to_text() {
        let xml = parse("<cat><name>Billie</name></cat>").unwrap();
        assert_eq!(
            select(&xml, "/cat/name").unwrap(),
            Some(Value::String("Billie".into())),
        );
    }

    #[test]
    fn select_missing_is_none() {
        let xml = parse("<cat><name>Billie</name></cat>").unwrap();
        assert_eq!(select(&xml, "/cat/age").unwrap(), None);
    }

    #[test]
    fn select_with_position_and_attribute_predicates() {
        let xml = parse(
            r#"<zoo><cat id="a">x</cat><cat id="b">y</cat></zoo>"#,
        )
        .unwrap();
        assert_eq!(
            select(&xml, "/zoo/cat[2]").unwrap(),
            Some(Value::String("y".into())),
        );
        assert_eq!(
            select(&xml, "/zoo/cat[@id='a']").unwrap(),
            Some(Value::String("x".into())),
        );
        assert_eq!(
            select(&xml, "/zoo/cat[1]/@id").unwrap(),
            Some(Value::String("a".into())),
        );
    }

    #[test]
    fn descent_selects_all_depths() {
        let xml = parse("<a><b>1</b><c><b>2</b></c></a>").unwrap();
        assert_eq!(
            select(&xml, "//b").unwrap(),
            Some(Value::List(vec![
                Value::String("1".into()),
                Value::String("2".into()),
            ])),
        );
        assert_eq!(count(&xml, "//b").unwrap(), 2);
    }

    #[test]
    fn set_creates_missing_and_indexed_elements() {
        let mut xml = parse("<r/>").unwrap();
        set(&mut xml, "/r/a[2]/b", &Value::Int(7)).unwrap();
        assert_eq!(xml.serialize(), "<r><a/><a><b>7</b></a></r>");

        set(&mut xml, "/r/a[1]/@id", &Value::String("x".into())).unwrap();
        assert_eq!(
            select(&xml, "/r/a[1]/@id").unwrap(),
            Some(Value::String("x".into())),
        );
    }

    #[test]
    fn remove_element_and_attribute() {
        let mut xml =
            parse(r#"<r id="1"><a>x</a><a>y</a></r>"#).unwrap();
        remove(&mut xml, "/r/a[1]").unwrap();
        assert_eq!(xml.serialize(), r#"<r id="1"><a>y</a></r>"#);
        remove(&mut xml, "/r/@id").unwrap();
        assert_eq!(xml.serialize(), "<r><a>y</a></r>");
    }

    #[test]
    fn map_conversions() {
        let mut inner = Map::new();
        inner.insert("name".into(), Value::String("Billie".into()));
        let mut m = Map::new();
        m.insert("cat".into(), Value::Map(inner));

        let xml = from_map(&m);
        assert_eq!(xml.serialize(), "<cat><name>Billie</name></cat>");

        let back = to_map(&xml);
        assert_eq!(back, Value::Map(m));
    }
}
