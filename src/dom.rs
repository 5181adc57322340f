// Lenient XML document model and tolerant lookup.
//
// The source documents come from two generations of exports: newer ones put
// every element in a default namespace, older ones use no namespace at all,
// and both nest the same fields at varying depths. Parsing builds a small
// owned element tree once; `Locator` then resolves names through an ordered
// list of lookup strategies so both conventions work without a schema flag.
use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tracing::{debug, warn};

use crate::error::{Result, StatsError};

/// One element of the parsed document: local name, resolved namespace URI,
/// attributes (local names, declaration attributes stripped), direct text
/// content and child elements. Read-only after parsing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub namespace: Option<String>,
    attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    text: String,
}

impl Element {
    /// Attribute value by local name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Trimmed text content; `None` when empty.
    pub fn text(&self) -> Option<&str> {
        let t = self.text.trim();
        if t.is_empty() {
            None
        } else {
            Some(t)
        }
    }

    /// All descendants in document order, excluding `self`.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<&'a Element> {
        let el = self.stack.pop()?;
        self.stack.extend(el.children.iter().rev());
        Some(el)
    }
}

// Namespace declarations in scope while an element is open.
#[derive(Debug, Clone, Default)]
struct NsScope {
    default: Option<String>,
    prefixes: HashMap<String, String>,
}

struct Frame {
    el: Element,
    scope: NsScope,
}

fn split_qname(raw: &[u8]) -> (Option<String>, String) {
    let s = String::from_utf8_lossy(raw);
    match s.split_once(':') {
        Some((p, l)) => (Some(p.to_string()), l.to_string()),
        None => (None, s.into_owned()),
    }
}

/// Parses a document into an [`Element`] tree, recovering from malformed
/// markup where possible: mismatched or stray end tags are skipped, elements
/// left open at end of input are closed, and fragments the reader cannot
/// make sense of are dropped with a warning. Only input that yields no root
/// element at all is a fatal error.
pub fn parse_document(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    // Mismatched and stray end tags are handled below instead of aborting
    // the read.
    reader.config_mut().check_end_names = false;
    reader.config_mut().allow_unmatched_ends = true;

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<Element> = None;
    let mut last_err_pos = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let frame = open_element(e.name().as_ref(), e.attributes().flatten(), &stack);
                stack.push(frame);
            }
            Ok(Event::Empty(e)) => {
                let frame = open_element(e.name().as_ref(), e.attributes().flatten(), &stack);
                attach(frame.el, &mut stack, &mut root);
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    match t.unescape() {
                        Ok(text) => top.el.text.push_str(&text),
                        Err(e) => warn!(error = %e, "dropping undecodable text node"),
                    }
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(top) = stack.last_mut() {
                    top.el
                        .text
                        .push_str(&String::from_utf8_lossy(t.as_ref()));
                }
            }
            Ok(Event::End(e)) => {
                let (_, local) = split_qname(e.name().as_ref());
                match stack.iter().rposition(|f| f.el.name == local) {
                    Some(idx) => {
                        // Close any elements the document left open above the
                        // matching one.
                        while stack.len() > idx {
                            let Some(frame) = stack.pop() else { break };
                            attach(frame.el, &mut stack, &mut root);
                        }
                    }
                    None => debug!(element = %local, "ignoring stray end tag"),
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                let pos = reader.buffer_position();
                if last_err_pos == Some(pos) {
                    // The reader cannot advance past this point.
                    if root.is_none() && stack.is_empty() {
                        return Err(StatsError::XmlParse(e.to_string()));
                    }
                    warn!(error = %e, "stopping parse at unrecoverable fragment");
                    break;
                }
                last_err_pos = Some(pos);
                warn!(error = %e, "skipping malformed fragment");
            }
        }
    }

    // Close elements still open at end of input.
    while let Some(frame) = stack.pop() {
        attach(frame.el, &mut stack, &mut root);
    }

    root.ok_or_else(|| StatsError::XmlParse("document contains no root element".into()))
}

fn open_element<'a>(
    qname: &[u8],
    attributes: impl Iterator<Item = quick_xml::events::attributes::Attribute<'a>>,
    stack: &[Frame],
) -> Frame {
    let mut scope = stack.last().map(|f| f.scope.clone()).unwrap_or_default();
    let mut attrs = Vec::new();

    for attr in attributes {
        let key = attr.key.as_ref().to_vec();
        let value = match attr.unescape_value() {
            Ok(v) => v.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        };
        if key == b"xmlns" {
            scope.default = if value.is_empty() { None } else { Some(value) };
        } else if let Some(prefix) = key.strip_prefix(b"xmlns:") {
            scope
                .prefixes
                .insert(String::from_utf8_lossy(prefix).into_owned(), value);
        } else {
            let (_, local) = split_qname(&key);
            attrs.push((local, value));
        }
    }

    let (prefix, local) = split_qname(qname);
    let namespace = match prefix {
        Some(p) => scope.prefixes.get(&p).cloned(),
        None => scope.default.clone(),
    };

    Frame {
        el: Element {
            name: local,
            namespace,
            attrs,
            children: Vec::new(),
            text: String::new(),
        },
        scope,
    }
}

fn attach(el: Element, stack: &mut Vec<Frame>, root: &mut Option<Element>) {
    match stack.last_mut() {
        Some(parent) => parent.el.children.push(el),
        // The first completed top-level element is the document root;
        // trailing siblings in broken documents are dropped.
        None => {
            if root.is_none() {
                *root = Some(el);
            }
        }
    }
}

/// Resolves field names against a document that may or may not use a default
/// namespace, with the target at varying depths. Each lookup walks an
/// ordered strategy list, first non-empty result wins:
///
/// 1. direct child in the default namespace (when one is declared),
/// 2. descendant at any depth in the default namespace,
/// 3. direct child with no namespace,
/// 4. descendant at any depth with no namespace.
///
/// An absent context or a name that matches nothing yields an empty result,
/// never an error.
#[derive(Debug, Clone)]
pub struct Locator {
    default_ns: Option<String>,
}

impl Locator {
    pub fn new(default_ns: Option<String>) -> Self {
        Self { default_ns }
    }

    fn strategies(&self) -> impl Iterator<Item = (Option<&str>, bool)> {
        let ns = self.default_ns.as_deref();
        [
            ns.map(|n| (Some(n), false)),
            ns.map(|n| (Some(n), true)),
            Some((None, false)),
            Some((None, true)),
        ]
        .into_iter()
        .flatten()
    }

    /// First element matching `name` under `ctx`.
    pub fn find<'a>(&self, ctx: Option<&'a Element>, name: &str) -> Option<&'a Element> {
        let ctx = ctx?;
        for (ns, deep) in self.strategies() {
            let hit = if deep {
                ctx.descendants()
                    .find(|c| c.name == name && c.namespace.as_deref() == ns)
            } else {
                ctx.children
                    .iter()
                    .find(|c| c.name == name && c.namespace.as_deref() == ns)
            };
            if hit.is_some() {
                return hit;
            }
        }
        None
    }

    /// All elements matching `name` under `ctx`, in document order.
    pub fn find_all<'a>(&self, ctx: Option<&'a Element>, name: &str) -> Vec<&'a Element> {
        let Some(ctx) = ctx else {
            return Vec::new();
        };
        for (ns, deep) in self.strategies() {
            let hits: Vec<&Element> = if deep {
                ctx.descendants()
                    .filter(|c| c.name == name && c.namespace.as_deref() == ns)
                    .collect()
            } else {
                ctx.children
                    .iter()
                    .filter(|c| c.name == name && c.namespace.as_deref() == ns)
                    .collect()
            };
            if !hits.is_empty() {
                return hits;
            }
        }
        Vec::new()
    }

    /// Trimmed text of the first element matching `name`; `None` when the
    /// element is missing or its text is empty.
    pub fn find_text<'a>(&self, ctx: Option<&'a Element>, name: &str) -> Option<&'a str> {
        self.find(ctx, name).and_then(Element::text)
    }

    /// First `name` child of `ctx` whose `id` attribute equals `id`.
    pub fn find_by_id<'a>(
        &self,
        ctx: Option<&'a Element>,
        name: &str,
        id: &str,
    ) -> Option<&'a Element> {
        self.find_all(ctx, name)
            .into_iter()
            .find(|e| e.attr("id") == Some(id))
    }
}
