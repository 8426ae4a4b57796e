//! Structural merge of markup into an element's children.
//!
//! Nodes from the new markup are matched against the existing children by kind,
//! tag name and `id`. Matches are updated in place, so node identity survives a
//! patch whenever the structure allows it. Unmatched old nodes are removed and
//! unmatched new nodes are moved into the tree.
//!
//! An element that carries [`UID_ATTRIBUTE`] is a live component: it keeps its
//! uid and its children are left to that component's own patches.

use kuchiki::traits::*;
use kuchiki::{ElementData, NodeData, NodeRef};

use super::elements::UID_ATTRIBUTE;

#[derive(Debug, Default)]
pub struct MorphSummary {
    /// Text, comment or attribute changes applied to kept nodes.
    pub updated: usize,
    /// Roots of the subtrees that were newly inserted.
    pub inserted: Vec<NodeRef>,
    /// Roots of the subtrees that were taken out of the tree.
    pub removed: Vec<NodeRef>,
}

/// Parse `markup` as the children of an element like `context`, detached from
/// any document.
pub fn parse_fragment(context: &ElementData, markup: &str) -> Vec<NodeRef> {
    let root = kuchiki::parse_fragment(context.name.clone(), Vec::new()).one(markup);
    let Some(container) = root.first_child() else {
        return Vec::new();
    };
    let nodes: Vec<NodeRef> = container.children().collect();
    for node in &nodes {
        node.detach();
    }
    nodes
}

/// Replace the children of `target` with `markup`, reusing existing nodes.
/// Non-element targets are left alone.
pub fn morph_children(target: &NodeRef, markup: &str) -> MorphSummary {
    let mut summary = MorphSummary::default();
    if let Some(element) = target.as_element() {
        let new_children = parse_fragment(element, markup);
        merge_children(target, new_children, &mut summary);
    }
    summary
}

pub fn inner_html(node: &NodeRef) -> String {
    node.children().map(|child| child.to_string()).collect()
}

fn merge_children(parent: &NodeRef, new_children: Vec<NodeRef>, summary: &mut MorphSummary) {
    let mut cursor = parent.first_child();

    for new_child in new_children {
        if let Some(old) = cursor.clone().filter(|old| same_node(old, &new_child)) {
            cursor = old.next_sibling();
            morph_node(&old, &new_child, summary);
            continue;
        }

        if let Some(keyed) = find_keyed(cursor.as_ref(), &new_child) {
            keyed.detach();
            insert_at(parent, cursor.as_ref(), keyed.clone());
            morph_node(&keyed, &new_child, summary);
            continue;
        }

        new_child.detach();
        insert_at(parent, cursor.as_ref(), new_child.clone());
        summary.inserted.push(new_child);
    }

    while let Some(old) = cursor {
        cursor = old.next_sibling();
        old.detach();
        summary.removed.push(old);
    }
}

fn insert_at(parent: &NodeRef, before: Option<&NodeRef>, node: NodeRef) {
    match before {
        Some(reference) => reference.insert_before(node),
        None => parent.append(node),
    }
}

fn morph_node(old: &NodeRef, new: &NodeRef, summary: &mut MorphSummary) {
    match (old.data(), new.data()) {
        (NodeData::Text(old_text), NodeData::Text(new_text))
        | (NodeData::Comment(old_text), NodeData::Comment(new_text)) => {
            if *old_text.borrow() != *new_text.borrow() {
                let replacement = new_text.borrow().clone();
                old_text.replace(replacement);
                summary.updated += 1;
            }
        }
        (NodeData::Element(old_element), NodeData::Element(new_element)) => {
            if sync_attributes(old_element, new_element) {
                summary.updated += 1;
            }
            if old_element.attributes.borrow().contains(UID_ATTRIBUTE) {
                return;
            }
            let children: Vec<NodeRef> = new.children().collect();
            merge_children(old, children, summary);
        }
        _ => {}
    }
}

fn same_node(old: &NodeRef, new: &NodeRef) -> bool {
    match (old.data(), new.data()) {
        (NodeData::Element(old_element), NodeData::Element(new_element)) => {
            old_element.name == new_element.name && key(old_element) == key(new_element)
        }
        (NodeData::Text(_), NodeData::Text(_)) | (NodeData::Comment(_), NodeData::Comment(_)) => {
            true
        }
        _ => false,
    }
}

fn key(element: &ElementData) -> Option<String> {
    element.attributes.borrow().get("id").map(str::to_string)
}

fn find_keyed(start: Option<&NodeRef>, new: &NodeRef) -> Option<NodeRef> {
    let new_element = new.as_element()?;
    let wanted = key(new_element)?;

    let mut next = start.cloned();
    while let Some(node) = next {
        let matches = node.as_element().is_some_and(|element| {
            element.name == new_element.name && key(element).as_deref() == Some(wanted.as_str())
        });
        if matches {
            return Some(node);
        }
        next = node.next_sibling();
    }
    None
}

/// Returns whether anything changed. The uid attribute is owned by the page and is
/// neither removed nor overwritten.
fn sync_attributes(old: &ElementData, new: &ElementData) -> bool {
    let new_attributes = new.attributes.borrow();
    let mut old_attributes = old.attributes.borrow_mut();

    let before = old_attributes.map.len();
    old_attributes
        .map
        .retain(|name, _| &*name.local == UID_ATTRIBUTE || new_attributes.map.contains_key(name));
    let mut changed = old_attributes.map.len() != before;

    for (name, attribute) in &new_attributes.map {
        if &*name.local == UID_ATTRIBUTE {
            continue;
        }
        let current = old_attributes.map.get(name).map(|existing| &existing.value);
        if current != Some(&attribute.value) {
            old_attributes.map.insert(name.clone(), attribute.clone());
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(html: &str) -> (NodeRef, NodeRef) {
        let document = kuchiki::parse_html().one(html);
        let target = document
            .select_first("#t")
            .expect("target element")
            .as_node()
            .clone();
        (document, target)
    }

    #[test]
    fn updates_text_in_place() {
        let (_document, target) = target("<div id=t><p>Count <span>0</span></p></div>");
        let paragraph = target.first_child().unwrap();
        let markup = "<p>Count <span>1</span></p>";

        let summary = morph_children(&target, markup);

        assert_eq!(inner_html(&target), markup);
        assert!(target.first_child().unwrap() == paragraph);
        assert_eq!(summary.updated, 1);
        assert!(summary.inserted.is_empty());
    }

    #[test]
    fn replaces_placeholder_text() {
        let (_document, target) = target("<my-counter id=t>Placeholder</my-counter>");
        let markup = "<p><strong>Count</strong>: <span>0</span></p>";
        let summary = morph_children(&target, markup);

        assert_eq!(inner_html(&target), markup);
        assert_eq!(summary.removed.len(), 1);
        assert_eq!(summary.inserted.len(), 1);
    }

    #[test]
    fn removes_and_inserts_by_position() {
        let (_document, target) = target("<ul id=t><li>a</li><li>b</li><li>c</li></ul>");
        let markup = "<li>a</li><p>x</p>";
        let first = target.first_child().unwrap();

        let summary = morph_children(&target, markup);

        assert_eq!(inner_html(&target), markup);
        assert!(target.first_child().unwrap() == first);
        assert_eq!(summary.inserted.len(), 1);
        assert_eq!(summary.removed.len(), 2);
    }

    #[test]
    fn keyed_nodes_move_instead_of_being_recreated() {
        let (_document, target) =
            target(r#"<ul id=t><li id="a">A</li><li id="b">B</li></ul>"#);
        let a = target.select_first("#a").unwrap().as_node().clone();
        let b = target.select_first("#b").unwrap().as_node().clone();
        let markup = r#"<li id="b">B</li><li id="a">A!</li>"#;

        let summary = morph_children(&target, markup);

        assert_eq!(inner_html(&target), markup);
        let children: Vec<NodeRef> = target.children().collect();
        assert!(children[0] == b);
        assert!(children[1] == a);
        assert!(summary.inserted.is_empty());
        assert!(summary.removed.is_empty());
    }

    #[test]
    fn syncs_attributes_but_keeps_uid() {
        let (_document, target) =
            target(r#"<div id=t><x-child data-uid="n7" class="old" hidden>live</x-child></div>"#);
        let child = target.first_child().unwrap();

        morph_children(&target, r#"<x-child class="new">ignored</x-child>"#);

        let element = child.as_element().unwrap();
        let attributes = element.attributes.borrow();
        assert_eq!(attributes.get("class"), Some("new"));
        assert_eq!(attributes.get(UID_ATTRIBUTE), Some("n7"));
        assert!(!attributes.contains("hidden"));
        drop(attributes);
        assert!(target.first_child().unwrap() == child);
        assert_eq!(child.text_contents(), "live");
    }

    #[test]
    fn keeps_leading_comments_and_whitespace() {
        let (_document, target) = target("<div id=t>old</div>");

        let summary = morph_children(&target, "<!--c-->  <p>x</p>");

        assert_eq!(inner_html(&target), "<!--c-->  <p>x</p>");
        assert_eq!(summary.inserted.len(), 2);
    }

    #[test]
    fn parses_in_the_target_context() {
        let (_document, target) = target("<table><tbody id=t></tbody></table>");

        morph_children(&target, "<tr><td>1</td></tr>");

        assert_eq!(inner_html(&target), "<tr><td>1</td></tr>");
    }

    #[test]
    fn reports_removed_subtrees() {
        let (_document, target) = target(r#"<div id=t><x-child data-uid="n9">live</x-child></div>"#);
        let child = target.first_child().unwrap();

        let summary = morph_children(&target, "<p>gone</p>");

        assert_eq!(summary.removed.len(), 1);
        assert!(summary.removed[0] == child);
        assert!(child.parent().is_none());
    }

    #[test]
    fn leaves_nodes_outside_target_alone() {
        let (document, target) = target("<p id=before>b</p><div id=t>old</div><p id=after>a</p>");
        let before = document.select_first("#before").unwrap().as_node().clone();
        let after = document.select_first("#after").unwrap().as_node().clone();

        morph_children(&target, "<em>new</em>");

        assert!(target.previous_sibling().unwrap() == before);
        assert!(target.next_sibling().unwrap() == after);
        assert_eq!(before.text_contents(), "b");
        assert_eq!(after.text_contents(), "a");
    }
}
