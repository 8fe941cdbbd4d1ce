//! Read-only queries over parsed messages, and subtree serialization.
//!
//! Queries match on namespace URI and local name, never on the prefix a sender
//! happened to use.

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use roxmltree::{Document, Node};

use crate::error::DocumentError;

pub fn parse(xml: &str) -> Result<Document<'_>, DocumentError> {
    Ok(Document::parse(xml)?)
}

pub fn is_element(node: Node<'_, '_>, namespace: &str, local: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local
        && node.tag_name().namespace().unwrap_or("") == namespace
}

/// Direct element children named `{namespace}local`
pub fn children<'a, 'input: 'a, 'q>(
    node: Node<'a, 'input>,
    namespace: &'q str,
    local: &'q str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |child| is_element(*child, namespace, local))
}

/// Elements named `{namespace}local` anywhere below `node`, excluding `node` itself
pub fn descendants<'a, 'input: 'a, 'q>(
    node: Node<'a, 'input>,
    namespace: &'q str,
    local: &'q str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.descendants()
        .skip(1)
        .filter(move |child| is_element(*child, namespace, local))
}

/// Elements with local name `local` in any namespace, excluding `node` itself
pub fn descendants_any_namespace<'a, 'input: 'a, 'q>(
    node: Node<'a, 'input>,
    local: &'q str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.descendants()
        .skip(1)
        .filter(move |child| child.is_element() && child.tag_name().name() == local)
}

pub fn first_descendant<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    namespace: &str,
    local: &str,
) -> Option<Node<'a, 'input>> {
    descendants(node, namespace, local).next()
}

/// Serialize `node` and its subtree as a standalone document.
///
/// Every namespace in scope at `node` is declared on the output root, so the result
/// parses to the same expanded names as the subtree it came from.
pub fn serialize_subtree(node: Node<'_, '_>) -> Result<String, DocumentError> {
    if !node.is_element() {
        return Err(DocumentError::Serialize {
            element: format!("{:?}", node.node_type()),
            details: "only element nodes can be serialized".to_string(),
        });
    }

    let mut writer = Writer::new(Vec::new());
    write_element(&mut writer, node, None)?;

    String::from_utf8(writer.into_inner()).map_err(|e| serialize_error(node, e))
}

fn write_element<'a, 'input: 'a>(
    writer: &mut Writer<Vec<u8>>,
    node: Node<'a, 'input>,
    parent: Option<Node<'a, 'input>>,
) -> Result<(), DocumentError> {
    let name = qualified_name(node, node.tag_name().namespace(), node.tag_name().name(), true)?;
    let mut start = BytesStart::new(name.as_str());

    for (prefix, uri) in declarations(node, parent) {
        match prefix {
            Some(prefix) => {
                let key = format!("xmlns:{}", prefix);
                start.push_attribute((key.as_str(), uri));
            }
            None => start.push_attribute(("xmlns", uri)),
        }
    }

    for attr in node.attributes() {
        let key = match attr.namespace() {
            Some(uri) => qualified_name(node, Some(uri), attr.name(), false)?,
            None => attr.name().to_string(),
        };
        start.push_attribute((key.as_str(), attr.value()));
    }

    if !node.has_children() {
        return writer
            .write_event(Event::Empty(start))
            .map_err(|e| serialize_error(node, e));
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| serialize_error(node, e))?;

    for child in node.children() {
        if child.is_element() {
            write_element(writer, child, Some(node))?;
        } else if let Some(text) = child.text().filter(|_| child.is_text()) {
            writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(|e| serialize_error(node, e))?;
        }
    }

    writer
        .write_event(Event::End(BytesEnd::new(name.as_str())))
        .map_err(|e| serialize_error(node, e))
}

/// Namespace declarations `node` needs on top of what `parent` already declared.
///
/// `(None, "")` undeclares a default namespace inherited from the parent.
fn declarations<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    parent: Option<Node<'a, 'input>>,
) -> Vec<(Option<&'a str>, &'a str)> {
    let scope = in_scope(node);
    let Some(parent) = parent else {
        return scope;
    };

    let parent_scope = in_scope(parent);
    let mut declared: Vec<_> = scope
        .iter()
        .filter(|binding| !parent_scope.contains(binding))
        .copied()
        .collect();

    if has_default(&parent_scope) && !has_default(&scope) {
        declared.push((None, ""));
    }
    declared
}

fn in_scope<'a, 'input: 'a>(node: Node<'a, 'input>) -> Vec<(Option<&'a str>, &'a str)> {
    node.namespaces()
        .filter(|ns| ns.name() != Some("xml"))
        .map(|ns| (ns.name(), ns.uri()))
        .collect()
}

fn has_default(bindings: &[(Option<&str>, &str)]) -> bool {
    bindings.iter().any(|(prefix, _)| prefix.is_none())
}

/// Lexical name for `{namespace}local` using a binding in scope at `node`.
///
/// Attributes never take the default namespace.
fn qualified_name(
    node: Node<'_, '_>,
    namespace: Option<&str>,
    local: &str,
    allow_default: bool,
) -> Result<String, DocumentError> {
    let Some(uri) = namespace else {
        return Ok(local.to_string());
    };

    if uri == roxmltree::NS_XML_URI {
        return Ok(format!("xml:{}", local));
    }

    let bindings = || node.namespaces().filter(|ns| ns.uri() == uri);

    if allow_default && bindings().any(|ns| ns.name().is_none()) {
        return Ok(local.to_string());
    }

    bindings()
        .find_map(|ns| ns.name())
        .map(|prefix| format!("{}:{}", prefix, local))
        .ok_or_else(|| DocumentError::Serialize {
            element: local.to_string(),
            details: format!("no prefix in scope for namespace {}", uri),
        })
}

fn serialize_error(node: Node<'_, '_>, err: impl std::fmt::Display) -> DocumentError {
    DocumentError::Serialize {
        element: node.tag_name().name().to_string(),
        details: err.to_string(),
    }
}
