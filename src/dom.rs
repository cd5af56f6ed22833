//! In-memory host document
//!
//! The coordinator does not own the page it lives in. The host may rebuild any
//! part of this tree at any time, so nothing outside this module holds on to
//! element references: everything is addressed through [`NodeId`] handles that
//! simply stop resolving once the host removes the node.
//!
//! The tree is a `scraper::Html` document. Selectors are full CSS selectors
//! parsed and matched by `scraper`.

use crate::error::{OverlayError, OverlayResult};
use scraper::{ElementRef, Html, Node};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Handle to an element in a [`Document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(ego_tree::NodeId);

/// Declarative description of a subtree to insert
#[derive(Debug, Clone, Default)]
pub struct ElementSpec {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    attrs: BTreeMap<String, String>,
    text: String,
    hidden: bool,
    children: Vec<ElementSpec>,
}

impl ElementSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn with_child(mut self, child: ElementSpec) -> Self {
        self.children.push(child);
        self
    }

    fn attributes(&self) -> Vec<(String, String)> {
        let mut attrs = Vec::new();
        if let Some(id) = &self.id {
            attrs.push(("id".to_string(), id.clone()));
        }
        if !self.classes.is_empty() {
            attrs.push(("class".to_string(), self.classes.join(" ")));
        }
        attrs.extend(self.attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
        if self.hidden {
            attrs.push(("hidden".to_string(), String::new()));
        }
        attrs
    }
}

/// A DOM event targeted at one element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomEvent {
    pub event_type: String,
    pub target: NodeId,
}

impl DomEvent {
    pub fn new(event_type: impl Into<String>, target: NodeId) -> Self {
        Self {
            event_type: event_type.into(),
            target,
        }
    }

    pub fn click(target: NodeId) -> Self {
        Self::new("click", target)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Build a detached element node by letting the HTML parser construct it
fn element_node(tag: &str, attrs: &[(String, String)]) -> Option<Node> {
    if tag.is_empty() || !tag.chars().all(is_ident_char) {
        return None;
    }

    let mut markup = format!("<{tag}");
    for (name, value) in attrs {
        if name.is_empty() || !name.chars().all(|c| is_ident_char(c) || c == ':') {
            return None;
        }
        markup.push_str(&format!(" {name}=\"{}\"", escape(value)));
    }
    markup.push_str(&format!("></{tag}>"));

    // The fragment root is a synthetic <html>; the element follows it
    let fragment = Html::parse_fragment(&markup);
    let element = fragment
        .tree
        .root()
        .descendants()
        .filter_map(ElementRef::wrap)
        .nth(1)?;
    if !element.value().name().eq_ignore_ascii_case(tag) {
        return None;
    }
    Some(Node::Element(element.value().clone()))
}

/// The host page
#[derive(Debug, Clone)]
pub struct Document {
    html: Html,
    body: ego_tree::NodeId,
}

impl Document {
    pub fn new() -> Self {
        Self::parse("<!DOCTYPE html>")
    }

    /// Parse a host page. Everything outside `<body>` is kept but never
    /// queried.
    pub fn parse(markup: &str) -> Self {
        let html = Html::parse_document(markup);
        let body = html
            .tree
            .root()
            .descendants()
            .find(|n| n.value().as_element().is_some_and(|el| el.name() == "body"))
            .map(|n| n.id())
            .unwrap_or_else(|| html.tree.root().id());
        Self { html, body }
    }

    pub fn root(&self) -> NodeId {
        NodeId(self.body)
    }

    /// Number of elements, including the root
    pub fn len(&self) -> usize {
        self.attached()
            .filter(|n| n.value().is_element())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.element(node).is_some()
    }

    /// The element behind `node`, while it is still part of the page
    pub fn element(&self, node: NodeId) -> Option<ElementRef<'_>> {
        let candidate = self.html.tree.get(node.0)?;
        let attached =
            node.0 == self.body || candidate.ancestors().any(|a| a.id() == self.body);
        if attached {
            ElementRef::wrap(candidate)
        } else {
            None
        }
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node)?.value().attr(name)
    }

    /// Concatenated text below `node`
    pub fn text(&self, node: NodeId) -> Option<String> {
        self.element(node).map(|el| el.text().collect())
    }

    pub fn is_hidden(&self, node: NodeId) -> bool {
        self.attr(node, "hidden").is_some()
    }

    /// Append `spec` as the last child of `parent`
    pub fn append(&mut self, parent: NodeId, spec: ElementSpec) -> Option<NodeId> {
        self.element(parent)?;
        let value = element_node(&spec.tag, &spec.attributes())?;
        let node = self.html.tree.get_mut(parent.0)?.append(value).id();
        self.fill(node, spec);
        Some(NodeId(node))
    }

    /// Remove `node` and its whole subtree. Returns false if it was already gone.
    pub fn remove(&mut self, node: NodeId) -> bool {
        if node.0 == self.body || !self.contains(node) {
            return false;
        }
        match self.html.tree.get_mut(node.0) {
            Some(mut detached) => {
                detached.detach();
                true
            }
            None => false,
        }
    }

    /// Replace `node` with a freshly built subtree at the same position.
    ///
    /// This is what a host re-render looks like from the coordinator's side:
    /// the old handle stops resolving and an equivalent element appears under
    /// a new handle.
    pub fn replace(&mut self, node: NodeId, spec: ElementSpec) -> Option<NodeId> {
        if node.0 == self.body || !self.contains(node) {
            return None;
        }
        let value = element_node(&spec.tag, &spec.attributes())?;
        let replacement = {
            let mut old = self.html.tree.get_mut(node.0)?;
            let replacement = old.insert_before(value).id();
            old.detach();
            replacement
        };
        self.fill(replacement, spec);
        Some(NodeId(replacement))
    }

    /// Replace the text directly under `node`
    pub fn set_text(&mut self, node: NodeId, text: impl Into<String>) -> bool {
        let Some(element) = self.element(node) else {
            return false;
        };
        let stale: Vec<ego_tree::NodeId> = element
            .children()
            .filter(|c| c.value().is_text())
            .map(|c| c.id())
            .collect();
        for id in stale {
            if let Some(mut child) = self.html.tree.get_mut(id) {
                child.detach();
            }
        }

        let text = text.into();
        if let Some(value) = text_node(&text) {
            if let Some(mut target) = self.html.tree.get_mut(node.0) {
                target.prepend(value);
            }
        }
        true
    }

    pub fn set_hidden(&mut self, node: NodeId, hidden: bool) -> bool {
        self.edit_attrs(node, |attrs| {
            attrs.retain(|(name, _)| name != "hidden");
            if hidden {
                attrs.push(("hidden".to_string(), String::new()));
            }
        })
    }

    pub fn set_attr(&mut self, node: NodeId, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        let value = value.into();
        self.edit_attrs(node, |attrs| {
            attrs.retain(|(n, _)| *n != name);
            attrs.push((name, value));
        })
    }

    /// First element with the given `id` attribute, in document order
    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        self.attached()
            .find(|n| n.value().as_element().and_then(|el| el.id()) == Some(id))
            .map(|n| NodeId(n.id()))
    }

    /// All elements matching `selector`, in document order
    pub fn query_all(&self, selector: &Selector) -> Vec<NodeId> {
        self.attached()
            .filter(|n| ElementRef::wrap(*n).is_some_and(|el| selector.inner.matches(&el)))
            .map(|n| NodeId(n.id()))
            .collect()
    }

    pub fn query(&self, selector: &Selector) -> Option<NodeId> {
        self.query_all(selector).into_iter().next()
    }

    /// Propagation path of an event: the target first, then each ancestor up
    /// to and including the root.
    pub fn path(&self, node: NodeId) -> Vec<NodeId> {
        let Some(element) = self.element(node) else {
            return Vec::new();
        };
        let mut path = vec![node];
        if node.0 != self.body {
            for ancestor in element.ancestors() {
                path.push(NodeId(ancestor.id()));
                if ancestor.id() == self.body {
                    break;
                }
            }
        }
        path
    }

    /// Nearest element on the path from `node` to the root that matches
    pub fn closest(&self, node: NodeId, selector: &Selector) -> Option<NodeId> {
        self.path(node)
            .into_iter()
            .find(|n| self.matches(*n, selector))
    }

    pub fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        self.element(node)
            .is_some_and(|el| selector.inner.matches(&el))
    }

    /// Every node under the root, root included, in document order
    fn attached(&self) -> impl Iterator<Item = ego_tree::NodeRef<'_, Node>> {
        self.html
            .tree
            .get(self.body)
            .into_iter()
            .flat_map(|body| body.descendants())
    }

    fn fill(&mut self, node: ego_tree::NodeId, spec: ElementSpec) {
        let ElementSpec { text, children, .. } = spec;
        if let Some(value) = text_node(&text) {
            if let Some(mut target) = self.html.tree.get_mut(node) {
                target.append(value);
            }
        }
        for child in children {
            self.append(NodeId(node), child);
        }
    }

    /// Rebuild the element value with edited attributes; children stay put
    fn edit_attrs<F>(&mut self, node: NodeId, edit: F) -> bool
    where
        F: FnOnce(&mut Vec<(String, String)>),
    {
        let Some(element) = self.element(node) else {
            return false;
        };
        let tag = element.value().name().to_string();
        let mut attrs: Vec<(String, String)> = element
            .value()
            .attrs()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        edit(&mut attrs);

        let Some(value) = element_node(&tag, &attrs) else {
            return false;
        };
        match self.html.tree.get_mut(node.0) {
            Some(mut target) => {
                *target.value() = value;
                true
            }
            None => false,
        }
    }
}

/// Build a detached text node the same way as [`element_node`]
fn text_node(text: &str) -> Option<Node> {
    let fragment = Html::parse_fragment(&escape(text));
    let node = fragment
        .tree
        .root()
        .descendants()
        .find(|n| n.value().is_text())
        .map(|n| n.value().clone());
    node
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

/// A parsed CSS selector
///
/// Equality and hashing go by the (trimmed) source text, which is what
/// listener deduplication keys on.
#[derive(Debug, Clone)]
pub struct Selector {
    source: String,
    inner: scraper::Selector,
}

impl Selector {
    pub fn parse(input: &str) -> OverlayResult<Self> {
        let source = input.trim();
        if source.is_empty() {
            return Err(OverlayError::InvalidSelector {
                selector: input.to_string(),
                reason: "empty selector".to_string(),
            });
        }

        let inner = scraper::Selector::parse(source).map_err(|e| OverlayError::InvalidSelector {
            selector: input.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: source.to_string(),
            inner,
        })
    }

    /// Selector matching exactly the element with this id
    pub fn id(id: &str) -> OverlayResult<Self> {
        if id.is_empty() || !id.chars().all(is_ident_char) {
            return Err(OverlayError::InvalidSelector {
                selector: format!("#{id}"),
                reason: "not a valid element id".to_string(),
            });
        }
        Self::parse(&format!("#{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Selector {}

impl Hash for Selector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for Selector {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
