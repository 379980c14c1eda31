//! Consuming reader and position-aware writer used by the per-kind XML
//! mappings.
//!
//! Decoding walks an owned element with a [`Cursor`]: every attribute or
//! child a mapping asks for is taken out, and whatever is left when the
//! cursor is finished becomes [`RawItem`]s tagged with the path of
//! sub-elements (scope) and the index they had among their siblings.
//! Encoding builds the element again with an [`ElementBuilder`], emitting
//! the recognized content in canonical order and merging the raw items back
//! in at their recorded index.

use crate::backend::types::{RawContent, RawExtra, RawItem, ScopeStep, XmlValue};
use crate::backend::types::TriState;
use crate::backend::xml::{XmlElement, XmlNode};
use std::collections::HashMap;
use std::str::FromStr;

pub(crate) struct Cursor {
    name: String,
    scope: Vec<ScopeStep>,
    attrs: Vec<Option<(String, String)>>,
    children: Vec<Option<XmlNode>>,
    consumed: HashMap<String, usize>,
    pending: Vec<RawItem>,
}

impl Cursor {
    pub(crate) fn new(el: XmlElement) -> Self {
        Self::scoped(el, Vec::new())
    }

    fn scoped(el: XmlElement, scope: Vec<ScopeStep>) -> Self {
        Self {
            name: el.name,
            scope,
            attrs: el.attrs.into_iter().map(Some).collect(),
            children: el.children.into_iter().map(Some).collect(),
            consumed: HashMap::new(),
            pending: Vec::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn peek_attr(&self, key: &str) -> Option<&str> {
        self.attrs.iter().find_map(|a| match a {
            Some((k, v)) if k == key => Some(v.as_str()),
            _ => None,
        })
    }

    pub(crate) fn attr(&mut self, key: &str) -> Option<String> {
        self.attrs
            .iter_mut()
            .find(|a| matches!(a, Some((k, _)) if k == key))
            .and_then(Option::take)
            .map(|(_, v)| v)
    }

    /// Take a numeric attribute, but only when the parsed value renders back
    /// to the exact same text. Anything else (`"01"`, `"+4"`, `"0x10"`) is
    /// left behind as raw content.
    pub(crate) fn parsed<T: FromStr + ToString>(&mut self, key: &str) -> Option<T> {
        let value = lossless::<T>(self.peek_attr(key)?)?;
        self.attr(key);
        Some(value)
    }

    pub(crate) fn enum_attr<T: for<'s> From<&'s str>>(&mut self, key: &str) -> Option<T> {
        self.attr(key).map(|v| T::from(v.as_str()))
    }

    pub(crate) fn yes_no(&mut self, key: &str) -> TriState {
        TriState::from_yes_no(self.attr(key).as_deref())
    }

    pub(crate) fn on_off(&mut self, key: &str) -> TriState {
        TriState::from_on_off(self.attr(key).as_deref())
    }

    /// Take every remaining attribute in document order.
    pub(crate) fn take_attrs(&mut self) -> Vec<(String, String)> {
        self.attrs.iter_mut().filter_map(Option::take).collect()
    }

    fn peek_text(&self) -> Option<&str> {
        match self.children.as_slice() {
            [Some(XmlNode::Text(t))] => Some(t.as_str()),
            _ => None,
        }
    }

    /// Take the element's text when it is the only child node. CDATA and
    /// mixed content stay raw.
    pub(crate) fn text(&mut self) -> Option<String> {
        self.peek_text()?;
        match self.children.first_mut().and_then(Option::take) {
            Some(XmlNode::Text(t)) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn parsed_text<T: FromStr + ToString>(&mut self) -> Option<T> {
        let value = lossless::<T>(self.peek_text()?)?;
        self.text();
        Some(value)
    }

    fn element_positions(&self, name: &str) -> Vec<usize> {
        self.children
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Some(XmlNode::Element(e)) if e.name == name))
            .map(|(i, _)| i)
            .collect()
    }

    /// Decode the first remaining child element called `name`. When `f`
    /// returns `None` the child is left untouched and will be kept raw.
    pub(crate) fn child<T>(&mut self, name: &str, f: impl FnOnce(&mut Cursor) -> Option<T>) -> Option<T> {
        let index = *self.element_positions(name).first()?;
        self.try_child(index, f)
    }

    /// Decode every remaining child element called `name`, in document order.
    pub(crate) fn children<T>(&mut self, name: &str, mut f: impl FnMut(&mut Cursor) -> Option<T>) -> Vec<T> {
        self.element_positions(name)
            .into_iter()
            .filter_map(|index| self.try_child(index, &mut f))
            .collect()
    }

    /// Take an empty marker element such as `<readonly/>`.
    pub(crate) fn flag(&mut self, name: &str) -> bool {
        self.child(name, |_| Some(())).is_some()
    }

    /// Take every remaining child element, leaving comments and text raw.
    pub(crate) fn take_elements(&mut self) -> Vec<XmlElement> {
        let mut out = Vec::new();
        for slot in self.children.iter_mut() {
            if matches!(slot, Some(XmlNode::Element(_))) {
                if let Some(XmlNode::Element(el)) = slot.take() {
                    out.push(el);
                }
            }
        }
        out
    }

    fn try_child<T>(&mut self, index: usize, f: impl FnOnce(&mut Cursor) -> Option<T>) -> Option<T> {
        let Some(XmlNode::Element(el)) = &self.children[index] else {
            return None;
        };
        let occurrence = self.consumed.get(&el.name).copied().unwrap_or(0);
        let mut scope = self.scope.clone();
        scope.push(ScopeStep {
            name: el.name.clone(),
            occurrence,
        });

        let mut sub = Cursor::scoped(el.clone(), scope);
        let value = f(&mut sub)?;

        *self.consumed.entry(sub.name.clone()).or_default() += 1;
        self.children[index] = None;
        self.pending.extend(sub.into_items());
        Some(value)
    }

    fn into_items(self) -> Vec<RawItem> {
        let mut items = Vec::new();
        for (position, attr) in self.attrs.into_iter().enumerate() {
            if let Some((name, value)) = attr {
                items.push(RawItem {
                    scope: self.scope.clone(),
                    position,
                    decoded_siblings: 0,
                    content: RawContent::Attribute { name, value },
                });
            }
        }
        for (position, node) in self.children.into_iter().enumerate() {
            if let Some(node) = node {
                let decoded_siblings = match &node {
                    XmlNode::Element(el) => self.consumed.get(&el.name).copied().unwrap_or(0),
                    _ => 0,
                };
                items.push(RawItem {
                    scope: self.scope.clone(),
                    position,
                    decoded_siblings,
                    content: RawContent::Node(node),
                });
            }
        }
        items.extend(self.pending);
        items
    }

    pub(crate) fn finish(self) -> RawExtra {
        let mut extra = RawExtra::default();
        for item in self.into_items() {
            extra.push(item);
        }
        extra
    }
}

fn lossless<T: FromStr + ToString>(text: &str) -> Option<T> {
    let value: T = text.parse().ok()?;
    (value.to_string() == text).then_some(value)
}

pub(crate) struct ElementBuilder<'a> {
    name: String,
    scope: Vec<ScopeStep>,
    extra: &'a RawExtra,
    attrs: Vec<(String, String)>,
    children: Vec<XmlNode>,
    emitted: HashMap<String, usize>,
}

impl<'a> ElementBuilder<'a> {
    pub(crate) fn new(name: &str, extra: &'a RawExtra) -> Self {
        Self::scoped(name, Vec::new(), extra)
    }

    fn scoped(name: &str, scope: Vec<ScopeStep>, extra: &'a RawExtra) -> Self {
        Self {
            name: name.to_string(),
            scope,
            extra,
            attrs: Vec::new(),
            children: Vec::new(),
            emitted: HashMap::new(),
        }
    }

    pub(crate) fn attr<T: XmlValue + ?Sized>(&mut self, key: &str, value: Option<&T>) -> &mut Self {
        if let Some(value) = value {
            self.attrs
                .push((key.to_string(), value.xml_value().into_owned()));
        }
        self
    }

    pub(crate) fn attrs(&mut self, attrs: &[(String, String)]) -> &mut Self {
        self.attrs.extend(attrs.iter().cloned());
        self
    }

    pub(crate) fn text(&mut self, value: &str) -> &mut Self {
        if !value.is_empty() {
            self.children.push(XmlNode::Text(value.to_string()));
        }
        self
    }

    pub(crate) fn child(&mut self, name: &str, f: impl FnOnce(&mut ElementBuilder<'a>)) -> &mut Self {
        let counter = self.emitted.entry(name.to_string()).or_default();
        let mut scope = self.scope.clone();
        scope.push(ScopeStep {
            name: name.to_string(),
            occurrence: *counter,
        });
        *counter += 1;

        let mut sub = ElementBuilder::scoped(name, scope, self.extra);
        f(&mut sub);
        self.children.push(XmlNode::Element(sub.build()));
        self
    }

    pub(crate) fn child_if<T: ?Sized>(
        &mut self,
        name: &str,
        value: Option<&T>,
        f: impl FnOnce(&mut ElementBuilder<'a>, &T),
    ) -> &mut Self {
        if let Some(value) = value {
            self.child(name, |b| f(b, value));
        }
        self
    }

    pub(crate) fn text_child(&mut self, name: &str, value: Option<&str>) -> &mut Self {
        self.child_if(name, value, |b, v| {
            b.text(v);
        })
    }

    pub(crate) fn flag(&mut self, name: &str, on: bool) -> &mut Self {
        if on {
            self.child(name, |_| {});
        }
        self
    }

    /// Append an element built elsewhere (a nested device).
    pub(crate) fn element(&mut self, el: XmlElement) -> &mut Self {
        self.children.push(XmlNode::Element(el));
        self
    }

    pub(crate) fn build(self) -> XmlElement {
        let mut raw_attrs = Vec::new();
        let mut raw_nodes = Vec::new();
        for item in self.extra.in_scope(&self.scope) {
            match &item.content {
                RawContent::Attribute { name, value } => {
                    if !self.attrs.iter().any(|(k, _)| k == name) {
                        raw_attrs.push((item.position, (name.clone(), value.clone())));
                    }
                }
                RawContent::Node(XmlNode::Element(el))
                    if self.emitted.get(&el.name).copied().unwrap_or(0) > item.decoded_siblings =>
                {
                    log::debug!("Dropping raw <{}> replaced by a typed value", el.name);
                }
                RawContent::Node(node) => raw_nodes.push((item.position, node.clone())),
            }
        }

        let mut children = merge_at_positions(self.children, raw_nodes);

        // Raw content below a sub-element this builder no longer produces.
        for step in self.extra.child_steps(&self.scope) {
            let produced = self.emitted.get(&step.name).copied().unwrap_or(0);
            if step.occurrence < produced {
                continue;
            }
            let mut scope = self.scope.clone();
            let name = step.name.clone();
            scope.push(step);
            let orphan = ElementBuilder::scoped(&name, scope, self.extra).build();
            children.push(XmlNode::Element(orphan));
        }

        XmlElement {
            name: self.name,
            attrs: merge_at_positions(self.attrs, raw_attrs),
            children,
        }
    }
}

/// Interleave `raw` items into `recognized` so each lands at its recorded
/// index where possible. Items whose index is past the end are appended.
fn merge_at_positions<T>(recognized: Vec<T>, mut raw: Vec<(usize, T)>) -> Vec<T> {
    raw.sort_by_key(|(position, _)| *position);
    let mut out = Vec::with_capacity(recognized.len() + raw.len());
    let mut recognized = recognized.into_iter();
    let mut raw = raw.into_iter().peekable();
    loop {
        if raw.peek().is_some_and(|(position, _)| *position <= out.len()) {
            if let Some((_, item)) = raw.next() {
                out.push(item);
            }
            continue;
        }
        match recognized.next() {
            Some(item) => out.push(item),
            None => break,
        }
    }
    out.extend(raw.map(|(_, item)| item));
    out
}
