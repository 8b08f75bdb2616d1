use super::*;

/// Depth-first pre-order element traversal over the composed tree, driven
/// by an explicit stack. A node is visited before its subtrees, and its
/// shadow tree is visited before its light children.
pub(crate) struct DeepTreeIter<'a> {
    dom: &'a Document,
    stack: Vec<NodeId>,
}

impl<'a> DeepTreeIter<'a> {
    pub(crate) fn new(dom: &'a Document, root: NodeId) -> Self {
        Self {
            dom,
            stack: vec![root],
        }
    }
}

impl Iterator for DeepTreeIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let node = self.stack.pop()?;
        // Light children first so the shadow tree ends up on top.
        for child in self.dom.nodes[node.0].children.iter().rev() {
            if self.dom.element(*child).is_some() {
                self.stack.push(*child);
            }
        }
        if let Some(shadow) = self.dom.shadow_root_of(node) {
            for child in self.dom.nodes[shadow.0].children.iter().rev() {
                if self.dom.element(*child).is_some() {
                    self.stack.push(*child);
                }
            }
        }
        Some(node)
    }
}

pub(crate) fn collect_matches(
    scope: &MatchScope<'_>,
    root: NodeId,
    list: &SelectorList,
) -> Vec<NodeId> {
    let mut results = Vec::new();
    for el in DeepTreeIter::new(scope.dom, root) {
        if let Some(target) = scope.match_groups(el, list) {
            results.push(target);
        }
    }
    results
}

pub(crate) fn find_first_match(
    scope: &MatchScope<'_>,
    root: NodeId,
    list: &SelectorList,
) -> Option<NodeId> {
    for el in DeepTreeIter::new(scope.dom, root) {
        if let Some(target) = scope.match_groups(el, list) {
            return Some(target);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_visits_shadow_tree_before_light_children() -> Result<()> {
        let mut dom = Document::new();
        let body = dom.body;
        let host = dom.create_element("div");
        dom.append_child(body, host)?;
        let light_child = dom.create_element("p");
        dom.append_child(host, light_child)?;
        let shadow = dom.attach_shadow(host)?;
        let shadow_child = dom.create_element("span");
        dom.append_child(shadow, shadow_child)?;

        let order: Vec<NodeId> = DeepTreeIter::new(&dom, host).collect();
        assert_eq!(order, vec![host, shadow_child, light_child]);
        Ok(())
    }

    #[test]
    fn nested_shadow_roots_are_traversed() -> Result<()> {
        let mut dom = Document::new();
        let body = dom.body;
        let outer_host = dom.create_element("div");
        dom.append_child(body, outer_host)?;
        let outer_shadow = dom.attach_shadow(outer_host)?;
        let inner_host = dom.create_element("div");
        dom.append_child(outer_shadow, inner_host)?;
        let inner_shadow = dom.attach_shadow(inner_host)?;
        let leaf = dom.create_element("em");
        dom.append_child(inner_shadow, leaf)?;

        let order: Vec<NodeId> = DeepTreeIter::new(&dom, body).collect();
        assert_eq!(order, vec![body, outer_host, inner_host, leaf]);
        Ok(())
    }

    #[test]
    fn collect_matches_reports_redirected_targets() -> Result<()> {
        let mut dom = Document::new();
        let body = dom.body;
        let section = dom.create_element("section");
        dom.append_child(body, section)?;
        let first = dom.create_element("p");
        let second = dom.create_element("p");
        dom.append_child(section, first)?;
        dom.append_child(section, second)?;

        let media = MediaSettings::default();
        let scope = MatchScope {
            dom: &dom,
            media: &media,
            path_query: "/",
        };
        let list = parse_selector("p:upward(section)")?;
        // Both paragraphs redirect to the same section; dedup is the
        // caller's concern.
        assert_eq!(
            collect_matches(&scope, body, &list),
            vec![section, section]
        );
        assert_eq!(find_first_match(&scope, body, &list), Some(section));
        Ok(())
    }
}
