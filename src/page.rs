use super::*;

/// Deterministic host runtime: a document, a virtual clock, mock media
/// and history state, and the observers wired across them.
///
/// DOM mutations queue mutation records; records are delivered to
/// observers at the next event-loop turn (`tick`, `advance_time` or
/// `run_frame`), and observer match batches flush once per frame.
pub struct Page {
    dom: Document,
    env: Environment,
    scheduler: Scheduler,
    observers: ObserverRegistry,
    nav_bridge: NavigationBridge,
    pending_mutations: Vec<MutationRecord>,
}

#[derive(Debug, Clone)]
enum MutationRecord {
    ChildrenAdded { parent: NodeId, nodes: Vec<NodeId> },
    AttributeChanged { target: NodeId, name: String },
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl Page {
    pub fn new() -> Self {
        Self::from_location(LocationParts::root("https", "app.local"))
    }

    pub fn with_url(url: &str) -> Result<Self> {
        let location = LocationParts::parse(url)
            .ok_or_else(|| Error::DomOperation(format!("invalid page url: {url}")))?;
        Ok(Self::from_location(location))
    }

    fn from_location(location: LocationParts) -> Self {
        Self {
            dom: Document::new(),
            env: Environment::new(location),
            scheduler: Scheduler::new(),
            observers: ObserverRegistry::default(),
            nav_bridge: NavigationBridge::default(),
            pending_mutations: Vec::new(),
        }
    }

    pub fn document_element(&self) -> NodeId {
        self.dom.document_element
    }

    pub fn body(&self) -> NodeId {
        self.dom.body
    }

    pub fn now_ms(&self) -> i64 {
        self.scheduler.now_ms
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.dom.create_element(tag)
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.dom.create_text(text)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.dom.append_child(parent, child)?;
        self.pending_mutations.push(MutationRecord::ChildrenAdded {
            parent,
            nodes: vec![child],
        });
        Ok(())
    }

    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<()> {
        self.dom.insert_before(parent, child, reference)?;
        self.pending_mutations.push(MutationRecord::ChildrenAdded {
            parent,
            nodes: vec![child],
        });
        Ok(())
    }

    /// Removals produce no observer work: matches are never retracted by
    /// disconnection, only conditional re-evaluation unmatches.
    pub fn remove_node(&mut self, node: NodeId) {
        self.dom.detach(node);
    }

    pub fn set_attribute(&mut self, el: NodeId, name: &str, value: &str) -> Result<()> {
        let name = name.to_ascii_lowercase();
        self.dom.set_attribute(el, &name, value)?;
        self.pending_mutations
            .push(MutationRecord::AttributeChanged { target: el, name });
        Ok(())
    }

    pub fn remove_attribute(&mut self, el: NodeId, name: &str) -> Result<()> {
        let name = name.to_ascii_lowercase();
        self.dom.remove_attribute(el, &name)?;
        self.pending_mutations
            .push(MutationRecord::AttributeChanged { target: el, name });
        Ok(())
    }

    /// Attaching a shadow root is not observable through mutation records;
    /// live observers find new roots through their discovery poll.
    pub fn attach_shadow(&mut self, host: NodeId) -> Result<NodeId> {
        self.dom.attach_shadow(host)
    }

    pub fn shadow_root(&self, host: NodeId) -> Option<NodeId> {
        self.dom.shadow_root_of(host)
    }

    pub fn tag_name(&self, el: NodeId) -> Option<&str> {
        self.dom.tag_name(el)
    }

    pub fn attribute(&self, el: NodeId, name: &str) -> Option<&str> {
        self.dom.attribute(el, name)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.dom.parent(node)
    }

    pub fn text_content(&self, node: NodeId) -> String {
        self.dom.text_content(node)
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.dom.is_connected(node)
    }

    /// Tests `el` against `selector`; `Some` carries the reported target,
    /// which differs from `el` when `:upward()` redirected the match.
    pub fn matches(&self, el: NodeId, selector: &str) -> Result<Option<NodeId>> {
        let list = parse_selector(selector)?;
        validate_selector(&list)?;
        Ok(self.matches_list(el, &list))
    }

    pub fn matches_list(&self, el: NodeId, list: &SelectorList) -> Option<NodeId> {
        let path = self.env.path_and_query();
        let scope = MatchScope {
            dom: &self.dom,
            media: &self.env.media,
            path_query: &path,
        };
        stacker::grow(32 * 1024 * 1024, || scope.match_groups(el, list))
    }

    pub fn query_all(&self, root: NodeId, selector: &str) -> Result<Vec<NodeId>> {
        if self.dom.element(root).is_none() {
            return Err(Error::DomOperation("query root must be an element".into()));
        }
        let list = parse_selector(selector)?;
        validate_selector(&list)?;
        let path = self.env.path_and_query();
        let scope = MatchScope {
            dom: &self.dom,
            media: &self.env.media,
            path_query: &path,
        };
        Ok(stacker::grow(32 * 1024 * 1024, || {
            collect_matches(&scope, root, &list)
        }))
    }

    pub fn query_one(&self, root: NodeId, selector: &str) -> Result<Option<NodeId>> {
        if self.dom.element(root).is_none() {
            return Err(Error::DomOperation("query root must be an element".into()));
        }
        let list = parse_selector(selector)?;
        validate_selector(&list)?;
        let path = self.env.path_and_query();
        let scope = MatchScope {
            dom: &self.dom,
            media: &self.env.media,
            path_query: &path,
        };
        Ok(stacker::grow(32 * 1024 * 1024, || {
            find_first_match(&scope, root, &list)
        }))
    }

    /// Starts observing `root` for current and future matches. The initial
    /// scan runs before this returns and delivers its batch synchronously.
    pub fn observe(
        &mut self,
        root: NodeId,
        selector: &str,
        options: ObserveOptions,
    ) -> Result<ObserverId> {
        if self.dom.element(root).is_none() {
            return Err(Error::DomOperation("observe root must be an element".into()));
        }
        let list = parse_selector(selector)?;
        validate_selector(&list)?;
        let (unconditional, conditional) = partition_selector_groups(list);
        let media_queries = collect_media_queries(&conditional);
        let watches_path = references_path(&conditional);

        let id = self.observers.allocate();
        let ObserveOptions {
            on_match,
            on_unmatch,
            poll_interval_ms,
        } = options;
        let mut instance = ObserverInstance {
            id,
            root,
            unconditional,
            conditional,
            seen: HashSet::new(),
            conditionally_matched: HashSet::new(),
            watched_roots: HashSet::from([root]),
            pending: Vec::new(),
            flush_scheduled: false,
            media_queries,
            watches_path,
            on_match,
            on_unmatch,
        };

        {
            let path = self.env.path_and_query();
            let scope = MatchScope {
                dom: &self.dom,
                media: &self.env.media,
                path_query: &path,
            };
            stacker::grow(32 * 1024 * 1024, || instance.scan_subtree(&scope, root));
        }
        let batch = instance.take_batch();
        if !batch.is_empty() {
            (instance.on_match)(&batch);
        }

        self.scheduler.schedule(
            poll_interval_ms,
            Some(poll_interval_ms),
            TaskKind::ShadowPoll(id),
        );
        if instance.watches_path {
            self.nav_bridge.subscribe(id);
        }
        self.observers.install(id, instance);
        Ok(id)
    }

    /// Idempotent teardown: pending batches are discarded, the discovery
    /// poll is cancelled, and the navigation hook is released.
    pub fn disconnect(&mut self, id: ObserverId) {
        if self.observers.take(id).is_none() {
            return;
        }
        self.scheduler.cancel_observer_work(id);
        self.nav_bridge.unsubscribe(id);
    }

    pub fn set_media_query(&mut self, query: &str, matches: bool) {
        let previous = self.env.media.results.insert(query.to_string(), matches);
        if previous == Some(matches) {
            return;
        }
        for id in self.observers.media_query_subscribers(query) {
            self.reevaluate_observer(id);
        }
    }

    pub fn set_default_media_result(&mut self, matches: bool) {
        if self.env.media.default_result == matches {
            return;
        }
        self.env.media.default_result = matches;
        for id in self.observers.ids() {
            let affected = self.observers.get(id).is_some_and(|instance| {
                instance
                    .media_queries
                    .iter()
                    .any(|query| !self.env.media.results.contains_key(query))
            });
            if affected {
                self.reevaluate_observer(id);
            }
        }
    }

    pub fn push_state(&mut self, url: &str) {
        self.env.push(url);
        self.handle_navigation();
    }

    pub fn replace_state(&mut self, url: &str) {
        self.env.replace(url);
        self.handle_navigation();
    }

    pub fn history_back(&mut self) -> bool {
        if self.env.back() {
            self.handle_navigation();
            true
        } else {
            false
        }
    }

    pub fn history_forward(&mut self) -> bool {
        if self.env.forward() {
            self.handle_navigation();
            true
        } else {
            false
        }
    }

    pub fn current_url(&self) -> String {
        self.env.current_url()
    }

    pub fn path_and_query(&self) -> String {
        self.env.path_and_query()
    }

    fn handle_navigation(&mut self) {
        if !self.nav_bridge.installed() {
            return;
        }
        for id in self.nav_bridge.subscriber_ids() {
            self.reevaluate_observer(id);
        }
    }

    fn reevaluate_observer(&mut self, id: ObserverId) {
        let Some(mut instance) = self.observers.take(id) else {
            return;
        };
        if !instance.conditional.is_empty() {
            let path = self.env.path_and_query();
            let scope = MatchScope {
                dom: &self.dom,
                media: &self.env.media,
                path_query: &path,
            };
            stacker::grow(32 * 1024 * 1024, || instance.reevaluate(&scope));
        }
        self.observers.install(id, instance);
    }

    /// Delivers queued mutation records to observers without advancing
    /// the clock.
    pub fn tick(&mut self) {
        self.process_mutations();
    }

    /// Advances the virtual clock, firing due timers in (due time,
    /// scheduling order). Mutation records queued by timer work are
    /// delivered between timers, like macrotask turns.
    pub fn advance_time(&mut self, ms: i64) {
        self.process_mutations();
        let target = self.scheduler.now_ms + ms.max(0);
        while let Some(task) = self.scheduler.pop_due(target) {
            if task.due_at > self.scheduler.now_ms {
                self.scheduler.now_ms = task.due_at;
            }
            self.run_task(&task);
            if let Some(interval) = task.interval_ms {
                self.scheduler.reschedule(&task, interval);
            }
            self.process_mutations();
        }
        self.scheduler.now_ms = target;
    }

    /// One animation frame: queued records are delivered, then every
    /// observer with a scheduled flush reports its batch.
    pub fn run_frame(&mut self) {
        self.process_mutations();
        self.scheduler.now_ms += FRAME_INTERVAL_MS;
        for task in self.scheduler.take_frame_tasks() {
            match task {
                FrameTask::FlushMatches(id) => self.flush_observer(id),
            }
        }
        self.process_mutations();
    }

    fn flush_observer(&mut self, id: ObserverId) {
        let Some(mut instance) = self.observers.take(id) else {
            return;
        };
        let batch = instance.take_batch();
        if !batch.is_empty() {
            (instance.on_match)(&batch);
        }
        self.observers.install(id, instance);
    }

    fn run_task(&mut self, task: &ScheduledTask) {
        match task.kind {
            TaskKind::ShadowPoll(id) => {
                let Some(mut instance) = self.observers.take(id) else {
                    return;
                };
                {
                    let path = self.env.path_and_query();
                    let scope = MatchScope {
                        dom: &self.dom,
                        media: &self.env.media,
                        path_query: &path,
                    };
                    stacker::grow(32 * 1024 * 1024, || instance.poll_shadow_roots(&scope));
                }
                self.schedule_flush_if_needed(&mut instance);
                self.observers.install(id, instance);
            }
        }
    }

    fn schedule_flush_if_needed(&mut self, instance: &mut ObserverInstance) {
        if !instance.pending.is_empty() && !instance.flush_scheduled {
            instance.flush_scheduled = true;
            self.scheduler
                .request_frame(FrameTask::FlushMatches(instance.id));
        }
    }

    fn process_mutations(&mut self) {
        if self.pending_mutations.is_empty() {
            return;
        }
        let records = std::mem::take(&mut self.pending_mutations);
        let ids = self.observers.ids();
        if ids.is_empty() {
            return;
        }
        let path = self.env.path_and_query();
        for id in ids {
            let Some(mut instance) = self.observers.take(id) else {
                continue;
            };
            {
                let scope = MatchScope {
                    dom: &self.dom,
                    media: &self.env.media,
                    path_query: &path,
                };
                stacker::grow(32 * 1024 * 1024, || {
                    for record in &records {
                        match record {
                            MutationRecord::ChildrenAdded { parent, nodes } => {
                                if !instance.watches(&self.dom, *parent) {
                                    continue;
                                }
                                for node in nodes {
                                    if self.dom.element(*node).is_some() {
                                        instance.scan_subtree(&scope, *node);
                                    }
                                }
                            }
                            MutationRecord::AttributeChanged { target, name } => {
                                if name != "class" && name != "id" {
                                    continue;
                                }
                                if self.dom.element(*target).is_none() {
                                    continue;
                                }
                                if !instance.watches(&self.dom, *target) {
                                    continue;
                                }
                                instance.check_element(&scope, *target);
                            }
                        }
                    }
                });
            }
            self.schedule_flush_if_needed(&mut instance);
            self.observers.install(id, instance);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recording_options() -> (ObserveOptions, Rc<RefCell<Vec<Vec<NodeId>>>>) {
        let batches: Rc<RefCell<Vec<Vec<NodeId>>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&batches);
        let options = ObserveOptions::new(move |matched: &[NodeId]| {
            sink.borrow_mut().push(matched.to_vec());
        });
        (options, batches)
    }

    #[test]
    fn initial_scan_delivers_synchronously() -> Result<()> {
        let mut page = Page::new();
        let body = page.body();
        let div = page.create_element("div");
        page.append_child(body, div)?;
        page.set_attribute(div, "class", "hit")?;
        page.tick();

        let (options, batches) = recording_options();
        page.observe(body, ".hit", options)?;
        assert_eq!(*batches.borrow(), vec![vec![div]]);
        Ok(())
    }

    #[test]
    fn initial_scan_matches_query_all() -> Result<()> {
        let mut page = Page::new();
        let body = page.body();
        for tag in ["div", "span", "div"] {
            let node = page.create_element(tag);
            page.append_child(body, node)?;
            page.set_attribute(node, "class", "x")?;
        }
        let host = page.create_element("div");
        page.append_child(body, host)?;
        let shadow = page.attach_shadow(host)?;
        let inner = page.create_element("p");
        page.append_child(shadow, inner)?;
        page.set_attribute(inner, "class", "x")?;
        page.tick();

        let snapshot = page.query_all(body, ".x")?;
        let (options, batches) = recording_options();
        page.observe(body, ".x", options)?;
        assert_eq!(batches.borrow().concat(), snapshot);
        Ok(())
    }

    #[test]
    fn mutations_batch_into_one_frame_flush() -> Result<()> {
        let mut page = Page::new();
        let body = page.body();
        let (options, batches) = recording_options();
        page.observe(body, "p", options)?;

        let mut added = Vec::new();
        for _ in 0..5 {
            let p = page.create_element("p");
            page.append_child(body, p)?;
            added.push(p);
        }
        page.tick();
        assert!(batches.borrow().is_empty());

        page.run_frame();
        assert_eq!(*batches.borrow(), vec![added]);

        // An empty frame delivers nothing further.
        page.run_frame();
        assert_eq!(batches.borrow().len(), 1);
        Ok(())
    }

    #[test]
    fn attribute_change_can_create_match() -> Result<()> {
        let mut page = Page::new();
        let body = page.body();
        let div = page.create_element("div");
        page.append_child(body, div)?;
        page.tick();

        let (options, batches) = recording_options();
        page.observe(body, ".late", options)?;
        assert!(batches.borrow().is_empty());

        page.set_attribute(div, "class", "late")?;
        page.tick();
        page.run_frame();
        assert_eq!(*batches.borrow(), vec![vec![div]]);

        // Non class/id attributes are not watched.
        let other = page.create_element("div");
        page.append_child(body, other)?;
        page.tick();
        page.run_frame();
        page.set_attribute(other, "data-class", "late")?;
        page.tick();
        page.run_frame();
        assert_eq!(batches.borrow().len(), 1);
        Ok(())
    }

    #[test]
    fn removed_and_reinserted_element_is_not_redelivered() -> Result<()> {
        let mut page = Page::new();
        let body = page.body();
        let (options, batches) = recording_options();
        page.observe(body, ".once", options)?;

        let div = page.create_element("div");
        page.set_attribute(div, "class", "once")?;
        page.append_child(body, div)?;
        page.tick();
        page.run_frame();
        assert_eq!(batches.borrow().len(), 1);

        page.remove_node(div);
        page.tick();
        page.append_child(body, div)?;
        page.tick();
        page.run_frame();
        assert_eq!(batches.borrow().len(), 1);
        Ok(())
    }

    #[test]
    fn upward_matches_deduplicate_on_target() -> Result<()> {
        let mut page = Page::new();
        let body = page.body();
        let section = page.create_element("section");
        page.append_child(body, section)?;
        page.tick();

        let (options, batches) = recording_options();
        page.observe(body, "p:upward(section)", options)?;
        assert!(batches.borrow().is_empty());

        for _ in 0..3 {
            let p = page.create_element("p");
            page.append_child(section, p)?;
        }
        page.tick();
        page.run_frame();
        // Three matching paragraphs redirect to one section.
        assert_eq!(*batches.borrow(), vec![vec![section]]);
        Ok(())
    }

    #[test]
    fn observer_scoped_to_subtree() -> Result<()> {
        let mut page = Page::new();
        let body = page.body();
        let left = page.create_element("div");
        let right = page.create_element("div");
        page.append_child(body, left)?;
        page.append_child(body, right)?;
        page.tick();

        let (options, batches) = recording_options();
        page.observe(left, "em", options)?;

        let outside = page.create_element("em");
        page.append_child(right, outside)?;
        let inside = page.create_element("em");
        page.append_child(left, inside)?;
        page.tick();
        page.run_frame();
        assert_eq!(*batches.borrow(), vec![vec![inside]]);
        Ok(())
    }

    #[test]
    fn disconnect_discards_pending_batch() -> Result<()> {
        let mut page = Page::new();
        let body = page.body();
        let (options, batches) = recording_options();
        let id = page.observe(body, "p", options)?;

        let p = page.create_element("p");
        page.append_child(body, p)?;
        page.tick();
        page.disconnect(id);
        page.disconnect(id);
        page.run_frame();
        page.advance_time(5_000);
        assert!(batches.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn media_change_reevaluates_synchronously() -> Result<()> {
        let mut page = Page::new();
        let body = page.body();
        let div = page.create_element("div");
        page.append_child(body, div)?;
        page.set_attribute(div, "class", "gated")?;
        page.tick();

        let unmatched: Rc<RefCell<Vec<NodeId>>> = Rc::new(RefCell::new(Vec::new()));
        let unmatch_sink = Rc::clone(&unmatched);
        let (options, batches) = recording_options();
        let options = options.on_unmatch(move |nodes: &[NodeId]| {
            unmatch_sink.borrow_mut().extend_from_slice(nodes);
        });
        page.observe(body, ".gated:matches-media((max-width: 600px))", options)?;
        assert!(batches.borrow().is_empty());

        page.set_media_query("(max-width: 600px)", true);
        assert_eq!(*batches.borrow(), vec![vec![div]]);
        assert!(unmatched.borrow().is_empty());

        page.set_media_query("(max-width: 600px)", false);
        assert_eq!(*unmatched.borrow(), vec![div]);

        // Matching again after a rematch cycle is delivered again.
        page.set_media_query("(max-width: 600px)", true);
        assert_eq!(batches.borrow().len(), 2);
        Ok(())
    }

    #[test]
    fn unchanged_media_result_does_not_reevaluate() -> Result<()> {
        let mut page = Page::new();
        let body = page.body();
        let div = page.create_element("div");
        page.append_child(body, div)?;
        page.set_attribute(div, "class", "gated")?;
        page.tick();

        let (options, batches) = recording_options();
        page.observe(body, ".gated:matches-media((print))", options)?;
        page.set_media_query("(print)", true);
        assert_eq!(batches.borrow().len(), 1);
        page.set_media_query("(print)", true);
        assert_eq!(batches.borrow().len(), 1);
        Ok(())
    }
}
