use super::*;

pub const DEFAULT_SHADOW_POLL_INTERVAL_MS: i64 = 500;

/// Handle returned by [`Page::observe`]; pass it to [`Page::disconnect`]
/// to tear the observer down. Ids are never reused.
///
/// [`Page::observe`]: crate::Page::observe
/// [`Page::disconnect`]: crate::Page::disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) usize);

pub(crate) type MatchCallback = Box<dyn FnMut(&[NodeId])>;

pub struct ObserveOptions {
    pub(crate) on_match: MatchCallback,
    pub(crate) on_unmatch: Option<MatchCallback>,
    pub(crate) poll_interval_ms: i64,
}

impl ObserveOptions {
    pub fn new(on_match: impl FnMut(&[NodeId]) + 'static) -> Self {
        Self {
            on_match: Box::new(on_match),
            on_unmatch: None,
            poll_interval_ms: DEFAULT_SHADOW_POLL_INTERVAL_MS,
        }
    }

    /// Called when a conditional match stops holding; only conditional
    /// selector groups ever unmatch.
    pub fn on_unmatch(mut self, on_unmatch: impl FnMut(&[NodeId]) + 'static) -> Self {
        self.on_unmatch = Some(Box::new(on_unmatch));
        self
    }

    pub fn poll_interval_ms(mut self, interval_ms: i64) -> Self {
        self.poll_interval_ms = interval_ms.max(1);
        self
    }
}

pub(crate) struct ObserverInstance {
    pub(crate) id: ObserverId,
    pub(crate) root: NodeId,
    pub(crate) unconditional: SelectorList,
    pub(crate) conditional: SelectorList,
    /// Targets already delivered for unconditional groups. Never cleared,
    /// so a removed and reinserted element is not delivered twice.
    pub(crate) seen: HashSet<NodeId>,
    /// Targets currently matched by conditional groups; shrinks when a
    /// condition stops holding.
    pub(crate) conditionally_matched: HashSet<NodeId>,
    /// The observe root plus every discovered shadow root.
    pub(crate) watched_roots: HashSet<NodeId>,
    pub(crate) pending: Vec<NodeId>,
    pub(crate) flush_scheduled: bool,
    pub(crate) media_queries: Vec<String>,
    pub(crate) watches_path: bool,
    pub(crate) on_match: MatchCallback,
    pub(crate) on_unmatch: Option<MatchCallback>,
}

impl ObserverInstance {
    pub(crate) fn check_element(&mut self, scope: &MatchScope<'_>, el: NodeId) {
        if !self.unconditional.is_empty() {
            if let Some(target) = scope.match_groups(el, &self.unconditional) {
                if self.seen.insert(target) {
                    self.pending.push(target);
                }
            }
        }
        if !self.conditional.is_empty() {
            if let Some(target) = scope.match_groups(el, &self.conditional) {
                if self.conditionally_matched.insert(target) {
                    self.pending.push(target);
                }
            }
        }
    }

    pub(crate) fn scan_subtree(&mut self, scope: &MatchScope<'_>, node: NodeId) {
        self.check_element(scope, node);
        if let Some(shadow) = scope.dom.shadow_root_of(node) {
            self.scan_shadow_root(scope, shadow);
        }
        for child in scope.dom.element_children(node) {
            self.scan_subtree(scope, child);
        }
    }

    fn scan_shadow_root(&mut self, scope: &MatchScope<'_>, shadow: NodeId) {
        if !self.watched_roots.insert(shadow) {
            return;
        }
        for child in scope.dom.element_children(shadow) {
            self.scan_subtree(scope, child);
        }
    }

    /// Shadow roots attached without any accompanying mutation record are
    /// found here. Only the light tree is walked; nested shadow roots are
    /// discovered when their enclosing root is scanned.
    pub(crate) fn poll_shadow_roots(&mut self, scope: &MatchScope<'_>) {
        for el in scope.dom.light_tree_elements(self.root) {
            if let Some(shadow) = scope.dom.shadow_root_of(el) {
                if !self.watched_roots.contains(&shadow) {
                    self.scan_shadow_root(scope, shadow);
                }
            }
        }
    }

    /// True when the node's own tree (not crossing shadow hosts) is rooted
    /// at something this observer watches.
    pub(crate) fn watches(&self, dom: &Document, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if self.watched_roots.contains(&current) {
                return true;
            }
            cursor = dom.parent(current);
        }
        false
    }

    pub(crate) fn take_batch(&mut self) -> Vec<NodeId> {
        self.flush_scheduled = false;
        std::mem::take(&mut self.pending)
    }

    /// Two-phase conditional re-evaluation. Unmatches are reported before
    /// new matches, and both bypass frame batching: the caller invoked us
    /// synchronously from a media or navigation change.
    pub(crate) fn reevaluate(&mut self, scope: &MatchScope<'_>) {
        let mut unmatched = Vec::new();
        let tracked: Vec<NodeId> = self.conditionally_matched.iter().copied().collect();
        for el in tracked {
            if !scope.dom.is_connected(el) {
                self.conditionally_matched.remove(&el);
                continue;
            }
            if scope.match_groups(el, &self.conditional).is_none() {
                self.conditionally_matched.remove(&el);
                let still_matched = !self.unconditional.is_empty()
                    && scope.match_groups(el, &self.unconditional).is_some();
                if !still_matched {
                    unmatched.push(el);
                }
            }
        }
        if !unmatched.is_empty() {
            if let Some(on_unmatch) = self.on_unmatch.as_mut() {
                on_unmatch(&unmatched);
            }
        }

        let mut matched = Vec::new();
        self.walk_conditional(scope, self.root, &mut matched);
        if !matched.is_empty() {
            (self.on_match)(&matched);
        }
    }

    fn walk_conditional(&mut self, scope: &MatchScope<'_>, node: NodeId, out: &mut Vec<NodeId>) {
        if let Some(target) = scope.match_groups(node, &self.conditional) {
            if self.conditionally_matched.insert(target) {
                out.push(target);
            }
        }
        if let Some(shadow) = scope.dom.shadow_root_of(node) {
            for child in scope.dom.element_children(shadow) {
                self.walk_conditional(scope, child, out);
            }
        }
        for child in scope.dom.element_children(node) {
            self.walk_conditional(scope, child, out);
        }
    }
}

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    slots: Vec<Option<ObserverInstance>>,
}

impl ObserverRegistry {
    pub(crate) fn allocate(&mut self) -> ObserverId {
        self.slots.push(None);
        ObserverId(self.slots.len() - 1)
    }

    pub(crate) fn install(&mut self, id: ObserverId, instance: ObserverInstance) {
        if let Some(slot) = self.slots.get_mut(id.0) {
            *slot = Some(instance);
        }
    }

    /// Removing the instance while it runs lets callbacks borrow the rest
    /// of the page; `install` puts it back afterwards.
    pub(crate) fn take(&mut self, id: ObserverId) -> Option<ObserverInstance> {
        self.slots.get_mut(id.0).and_then(Option::take)
    }

    pub(crate) fn get(&self, id: ObserverId) -> Option<&ObserverInstance> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub(crate) fn ids(&self) -> Vec<ObserverId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|_| ObserverId(index)))
            .collect()
    }

    pub(crate) fn media_query_subscribers(&self, query: &str) -> Vec<ObserverId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref()
                    .filter(|instance| instance.media_queries.iter().any(|q| q == query))
                    .map(|_| ObserverId(index))
            })
            .collect()
    }
}

/// Reference-counted hook into history changes: installed when the first
/// path-dependent observer subscribes, removed when the last one leaves.
#[derive(Debug, Default)]
pub(crate) struct NavigationBridge {
    subscribers: HashSet<ObserverId>,
    installed: bool,
}

impl NavigationBridge {
    pub(crate) fn subscribe(&mut self, id: ObserverId) {
        self.subscribers.insert(id);
        self.installed = true;
    }

    pub(crate) fn unsubscribe(&mut self, id: ObserverId) {
        if self.subscribers.remove(&id) && self.subscribers.is_empty() {
            self.installed = false;
        }
    }

    pub(crate) fn installed(&self) -> bool {
        self.installed
    }

    pub(crate) fn subscriber_ids(&self) -> Vec<ObserverId> {
        let mut ids: Vec<ObserverId> = self.subscribers.iter().copied().collect();
        ids.sort_by_key(|id| id.0);
        ids
    }
}

pub(crate) fn partition_selector_groups(list: SelectorList) -> (SelectorList, SelectorList) {
    let mut unconditional = Vec::new();
    let mut conditional = Vec::new();
    for group in list {
        if group_has_condition(&group) {
            conditional.push(group);
        } else {
            unconditional.push(group);
        }
    }
    (unconditional, conditional)
}

fn group_has_condition(group: &SelectorGroup) -> bool {
    group.iter().any(token_has_condition)
}

fn token_has_condition(token: &SelectorToken) -> bool {
    let SelectorToken::Pseudo(pseudo) = token else {
        return false;
    };
    match pseudo {
        PseudoClass::MatchesMedia(_) | PseudoClass::MatchesPath(_) => true,
        _ => nested_selector_list(pseudo)
            .is_some_and(|list| list.iter().any(|group| group_has_condition(group))),
    }
}

fn nested_selector_list(pseudo: &PseudoClass) -> Option<&SelectorList> {
    match pseudo {
        PseudoClass::Not(list)
        | PseudoClass::Is(list)
        | PseudoClass::Where(list)
        | PseudoClass::Has(list)
        | PseudoClass::Upward(UpwardArg::Ancestor(list)) => Some(list),
        _ => None,
    }
}

pub(crate) fn collect_media_queries(list: &SelectorList) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for group in list {
        for token in group {
            collect_media_queries_from_token(token, &mut seen, &mut out);
        }
    }
    out
}

fn collect_media_queries_from_token(
    token: &SelectorToken,
    seen: &mut HashSet<String>,
    out: &mut Vec<String>,
) {
    let SelectorToken::Pseudo(pseudo) = token else {
        return;
    };
    if let PseudoClass::MatchesMedia(query) = pseudo {
        if seen.insert(query.clone()) {
            out.push(query.clone());
        }
        return;
    }
    if let Some(list) = nested_selector_list(pseudo) {
        for group in list {
            for token in group {
                collect_media_queries_from_token(token, seen, out);
            }
        }
    }
}

pub(crate) fn references_path(list: &SelectorList) -> bool {
    list.iter().any(|group| group.iter().any(token_references_path))
}

fn token_references_path(token: &SelectorToken) -> bool {
    let SelectorToken::Pseudo(pseudo) = token else {
        return false;
    };
    match pseudo {
        PseudoClass::MatchesPath(_) => true,
        _ => nested_selector_list(pseudo)
            .is_some_and(|list| references_path(list)),
    }
}
