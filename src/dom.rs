use super::*;

/// Stable identity of a node for the lifetime of its document.
///
/// Ids are arena indices and are never reused, so an id held across a
/// detach and reinsert still names the same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Document,
    Element(ElementData),
    ShadowRoot { host: NodeId },
    Text(String),
}

#[derive(Debug, Clone)]
pub(crate) struct ElementData {
    pub(crate) tag_name: String,
    pub(crate) attrs: HashMap<String, String>,
    pub(crate) shadow_root: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) kind: NodeKind,
}

#[derive(Debug, Clone)]
pub(crate) struct Document {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
    pub(crate) document_element: NodeId,
    pub(crate) body: NodeId,
}

impl Document {
    pub(crate) fn new() -> Self {
        let root = NodeId(0);
        let mut document = Self {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Document,
            }],
            root,
            document_element: root,
            body: root,
        };
        let html = document.create_element("html");
        let body = document.create_element("body");
        document.link(root, html, None);
        document.link(html, body, None);
        document.document_element = html;
        document.body = body;
        document
    }

    fn push_node(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            kind,
        });
        NodeId(self.nodes.len() - 1)
    }

    pub(crate) fn create_element(&mut self, tag: &str) -> NodeId {
        self.push_node(NodeKind::Element(ElementData {
            tag_name: tag.to_ascii_lowercase(),
            attrs: HashMap::new(),
            shadow_root: None,
        }))
    }

    pub(crate) fn create_text(&mut self, text: &str) -> NodeId {
        self.push_node(NodeKind::Text(text.to_string()))
    }

    pub(crate) fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.check_insertion(parent, child)?;
        self.link(parent, child, None);
        Ok(())
    }

    pub(crate) fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<()> {
        self.check_insertion(parent, child)?;
        if let Some(reference) = reference {
            if self.nodes[reference.0].parent != Some(parent) {
                return Err(Error::DomOperation(
                    "reference node is not a child of the insertion parent".into(),
                ));
            }
        }
        self.link(parent, child, reference);
        Ok(())
    }

    fn check_insertion(&self, parent: NodeId, child: NodeId) -> Result<()> {
        if matches!(self.nodes[parent.0].kind, NodeKind::Text(_)) {
            return Err(Error::DomOperation("text nodes cannot have children".into()));
        }
        if matches!(
            self.nodes[child.0].kind,
            NodeKind::Document | NodeKind::ShadowRoot { .. }
        ) {
            return Err(Error::DomOperation(
                "only element and text nodes can be inserted".into(),
            ));
        }
        // Host-including ancestor check: shadow trees count through their host.
        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == child {
                return Err(Error::DomOperation(
                    "cannot insert a node inside its own subtree".into(),
                ));
            }
            cursor = match &self.nodes[current.0].kind {
                NodeKind::ShadowRoot { host } => Some(*host),
                _ => self.nodes[current.0].parent,
            };
        }
        Ok(())
    }

    fn link(&mut self, parent: NodeId, child: NodeId, before: Option<NodeId>) {
        self.detach(child);
        let position = match before {
            Some(reference) => self.nodes[parent.0]
                .children
                .iter()
                .position(|id| *id == reference)
                .unwrap_or(self.nodes[parent.0].children.len()),
            None => self.nodes[parent.0].children.len(),
        };
        self.nodes[parent.0].children.insert(position, child);
        self.nodes[child.0].parent = Some(parent);
    }

    pub(crate) fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.nodes[node.0].parent else {
            return;
        };
        self.nodes[parent.0].children.retain(|id| *id != node);
        self.nodes[node.0].parent = None;
    }

    pub(crate) fn attach_shadow(&mut self, host: NodeId) -> Result<NodeId> {
        let Some(element) = self.element(host) else {
            return Err(Error::DomOperation(
                "shadow roots can only be attached to elements".into(),
            ));
        };
        if element.shadow_root.is_some() {
            return Err(Error::DomOperation(
                "element already hosts a shadow root".into(),
            ));
        }
        let shadow = self.push_node(NodeKind::ShadowRoot { host });
        if let Some(element) = self.element_mut(host) {
            element.shadow_root = Some(shadow);
        }
        Ok(shadow)
    }

    pub(crate) fn element(&self, node: NodeId) -> Option<&ElementData> {
        match self.nodes.get(node.0).map(|node| &node.kind) {
            Some(NodeKind::Element(element)) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn element_mut(&mut self, node: NodeId) -> Option<&mut ElementData> {
        match self.nodes.get_mut(node.0).map(|node| &mut node.kind) {
            Some(NodeKind::Element(element)) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn tag_name(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(|element| element.tag_name.as_str())
    }

    pub(crate) fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node)
            .and_then(|element| element.attrs.get(name))
            .map(String::as_str)
    }

    pub(crate) fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<()> {
        let name = name.to_ascii_lowercase();
        let Some(element) = self.element_mut(node) else {
            return Err(Error::DomOperation(
                "attributes can only be set on elements".into(),
            ));
        };
        element.attrs.insert(name, value.to_string());
        Ok(())
    }

    pub(crate) fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<()> {
        let name = name.to_ascii_lowercase();
        let Some(element) = self.element_mut(node) else {
            return Err(Error::DomOperation(
                "attributes can only be removed from elements".into(),
            ));
        };
        element.attrs.remove(&name);
        Ok(())
    }

    pub(crate) fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0).and_then(|node| node.parent)
    }

    pub(crate) fn shadow_root_of(&self, node: NodeId) -> Option<NodeId> {
        self.element(node).and_then(|element| element.shadow_root)
    }

    /// Parent element in the composed tree: hops from a shadow-tree top
    /// level to the shadow host instead of stopping at the shadow root.
    pub(crate) fn composed_parent_element(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.nodes[node.0].parent?;
        match &self.nodes[parent.0].kind {
            NodeKind::Element(_) => Some(parent),
            NodeKind::ShadowRoot { host } => Some(*host),
            _ => None,
        }
    }

    pub(crate) fn previous_element_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let children = &self.nodes[parent.0].children;
        let pos = children.iter().position(|id| *id == node)?;
        for sibling in children[..pos].iter().rev() {
            if self.element(*sibling).is_some() {
                return Some(*sibling);
            }
        }
        None
    }

    pub(crate) fn next_element_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let children = &self.nodes[parent.0].children;
        let pos = children.iter().position(|id| *id == node)?;
        for sibling in children.iter().skip(pos + 1) {
            if self.element(*sibling).is_some() {
                return Some(*sibling);
            }
        }
        None
    }

    pub(crate) fn element_children(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[node.0]
            .children
            .iter()
            .copied()
            .filter(move |child| self.element(*child).is_some())
    }

    pub(crate) fn child_count(&self, node: NodeId) -> usize {
        self.nodes[node.0].children.len()
    }

    /// Text of the node's light subtree; shadow trees do not contribute.
    pub(crate) fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.append_text(node, &mut out);
        out
    }

    fn append_text(&self, node: NodeId, out: &mut String) {
        match &self.nodes[node.0].kind {
            NodeKind::Text(text) => out.push_str(text),
            _ => {
                for child in &self.nodes[node.0].children {
                    self.append_text(*child, out);
                }
            }
        }
    }

    pub(crate) fn collect_element_descendants(&self, node: NodeId, out: &mut Vec<NodeId>) {
        for child in &self.nodes[node.0].children {
            if self.element(*child).is_some() {
                out.push(*child);
                self.collect_element_descendants(*child, out);
            }
        }
    }

    /// Elements of the light tree rooted at `root`, in document order,
    /// without descending into shadow trees.
    pub(crate) fn light_tree_elements(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if self.element(node).is_some() {
                out.push(node);
            }
            for child in self.nodes[node.0].children.iter().rev() {
                if self.element(*child).is_some() {
                    stack.push(*child);
                }
            }
        }
        out
    }

    pub(crate) fn is_connected(&self, node: NodeId) -> bool {
        let mut cursor = node;
        loop {
            if cursor == self.root {
                return true;
            }
            match &self.nodes[cursor.0].kind {
                NodeKind::ShadowRoot { host } => cursor = *host,
                _ => match self.nodes[cursor.0].parent {
                    Some(parent) => cursor = parent,
                    None => return false,
                },
            }
        }
    }
}
