use super::*;

/// Rejects selector lists where `:upward()` is followed by a combinator.
/// The pseudo-class redirects the match target to an ancestor, so trailing
/// combinators would silently apply to the wrong element.
pub fn validate_selector(list: &SelectorList) -> Result<()> {
    for group in list {
        for (index, token) in group.iter().enumerate() {
            if matches!(token, SelectorToken::Pseudo(PseudoClass::Upward(_)))
                && matches!(group.get(index + 1), Some(SelectorToken::Combinator(_)))
            {
                return Err(Error::UpwardPlacement(
                    ":upward() must end its selector group".into(),
                ));
            }
        }
    }
    Ok(())
}

pub(crate) struct MatchScope<'a> {
    pub(crate) dom: &'a Document,
    pub(crate) media: &'a MediaSettings,
    pub(crate) path_query: &'a str,
}

enum TokenMatch {
    Miss,
    Hit,
    /// `:upward()` matched; the reported element becomes this ancestor.
    Retarget(NodeId),
}

fn outcome(matched: bool) -> TokenMatch {
    if matched { TokenMatch::Hit } else { TokenMatch::Miss }
}

impl MatchScope<'_> {
    /// First matching group wins; returns the reported target, which is
    /// the tested element unless `:upward()` redirected it.
    pub(crate) fn match_groups(&self, el: NodeId, list: &SelectorList) -> Option<NodeId> {
        for group in list {
            if let Some(target) = self.match_tokens(el, group, group.len()) {
                return Some(target);
            }
        }
        None
    }

    /// Matches `tokens[..end]` against `el` right to left. On a combinator
    /// the remaining prefix is retried against candidate elements on the
    /// other side of it.
    fn match_tokens(&self, el: NodeId, tokens: &[SelectorToken], end: usize) -> Option<NodeId> {
        let mut target = el;
        let mut index = end;
        while index > 0 {
            let token = &tokens[index - 1];
            if let SelectorToken::Combinator(combinator) = token {
                return match combinator {
                    Combinator::Child => {
                        let parent = self.dom.composed_parent_element(el)?;
                        self.match_tokens(parent, tokens, index - 1).map(|_| target)
                    }
                    Combinator::Descendant => {
                        let mut cursor = self.dom.composed_parent_element(el);
                        while let Some(ancestor) = cursor {
                            if self.match_tokens(ancestor, tokens, index - 1).is_some() {
                                return Some(target);
                            }
                            cursor = self.dom.composed_parent_element(ancestor);
                        }
                        None
                    }
                    Combinator::AdjacentSibling => {
                        let previous = self.dom.previous_element_sibling(el)?;
                        self.match_tokens(previous, tokens, index - 1)
                            .map(|_| target)
                    }
                    Combinator::GeneralSibling => {
                        let mut cursor = self.dom.previous_element_sibling(el);
                        while let Some(sibling) = cursor {
                            if self.match_tokens(sibling, tokens, index - 1).is_some() {
                                return Some(target);
                            }
                            cursor = self.dom.previous_element_sibling(sibling);
                        }
                        None
                    }
                    Combinator::Column => None,
                };
            }
            match self.match_token(el, token) {
                TokenMatch::Miss => return None,
                TokenMatch::Hit => {}
                TokenMatch::Retarget(ancestor) => target = ancestor,
            }
            index -= 1;
        }
        Some(target)
    }

    fn match_token(&self, el: NodeId, token: &SelectorToken) -> TokenMatch {
        if self.dom.element(el).is_none() {
            return TokenMatch::Miss;
        }
        match token {
            SelectorToken::Tag { name } => outcome(
                self.dom
                    .tag_name(el)
                    .is_some_and(|tag| tag.eq_ignore_ascii_case(name)),
            ),
            SelectorToken::Universal => TokenMatch::Hit,
            SelectorToken::Attribute {
                name,
                action,
                value,
                ignore_case,
            } => outcome(self.match_attribute(el, name, *action, value, *ignore_case)),
            SelectorToken::Pseudo(pseudo) => self.match_pseudo(el, pseudo),
            SelectorToken::PseudoElement { .. } => TokenMatch::Miss,
            SelectorToken::Combinator(_) => TokenMatch::Miss,
        }
    }

    fn match_attribute(
        &self,
        el: NodeId,
        name: &str,
        action: AttrAction,
        value: &str,
        ignore_case: bool,
    ) -> bool {
        let attr = self.dom.attribute(el, name);
        if action == AttrAction::Exists {
            return attr.is_some();
        }
        let Some(attr) = attr else {
            return false;
        };
        let actual: Cow<'_, str> = if ignore_case {
            Cow::Owned(attr.to_lowercase())
        } else {
            Cow::Borrowed(attr)
        };
        let expected: Cow<'_, str> = if ignore_case {
            Cow::Owned(value.to_lowercase())
        } else {
            Cow::Borrowed(value)
        };
        match action {
            AttrAction::Exists => true,
            AttrAction::Equals => actual == expected,
            AttrAction::Element => actual
                .split_whitespace()
                .any(|token| token == expected.as_ref()),
            AttrAction::Start => !expected.is_empty() && actual.starts_with(expected.as_ref()),
            AttrAction::End => !expected.is_empty() && actual.ends_with(expected.as_ref()),
            AttrAction::Any => !expected.is_empty() && actual.contains(expected.as_ref()),
            AttrAction::Hyphen => {
                actual == expected || actual.starts_with(&format!("{expected}-"))
            }
            AttrAction::Not => actual != expected,
        }
    }

    fn match_pseudo(&self, el: NodeId, pseudo: &PseudoClass) -> TokenMatch {
        match pseudo {
            PseudoClass::Not(list) => outcome(self.match_groups(el, list).is_none()),
            PseudoClass::Is(list) | PseudoClass::Where(list) => {
                outcome(self.match_groups(el, list).is_some())
            }
            PseudoClass::Has(list) => {
                let mut descendants = Vec::new();
                self.dom.collect_element_descendants(el, &mut descendants);
                outcome(
                    descendants
                        .iter()
                        .any(|descendant| self.match_groups(*descendant, list).is_some()),
                )
            }
            PseudoClass::Upward(UpwardArg::Levels(levels)) => {
                let mut cursor = Some(el);
                for _ in 0..*levels {
                    cursor = cursor.and_then(|node| self.dom.composed_parent_element(node));
                }
                match cursor {
                    Some(ancestor) => TokenMatch::Retarget(ancestor),
                    None => TokenMatch::Miss,
                }
            }
            PseudoClass::Upward(UpwardArg::Ancestor(list)) => {
                let mut cursor = self.dom.composed_parent_element(el);
                while let Some(ancestor) = cursor {
                    if self.match_groups(ancestor, list).is_some() {
                        return TokenMatch::Retarget(ancestor);
                    }
                    cursor = self.dom.composed_parent_element(ancestor);
                }
                TokenMatch::Miss
            }
            PseudoClass::FirstChild => {
                outcome(self.dom.previous_element_sibling(el).is_none())
            }
            PseudoClass::LastChild => outcome(self.dom.next_element_sibling(el).is_none()),
            PseudoClass::OnlyChild => outcome(
                self.dom.previous_element_sibling(el).is_none()
                    && self.dom.next_element_sibling(el).is_none(),
            ),
            PseudoClass::FirstOfType => {
                outcome(self.sibling_position(el, true, false) == Some(1))
            }
            PseudoClass::LastOfType => outcome(self.sibling_position(el, true, true) == Some(1)),
            PseudoClass::OnlyOfType => outcome(
                self.sibling_position(el, true, false) == Some(1)
                    && self.sibling_position(el, true, true) == Some(1),
            ),
            PseudoClass::NthChild(nth) => outcome(
                self.sibling_position(el, false, false)
                    .is_some_and(|position| nth_matches(*nth, position)),
            ),
            PseudoClass::NthLastChild(nth) => outcome(
                self.sibling_position(el, false, true)
                    .is_some_and(|position| nth_matches(*nth, position)),
            ),
            PseudoClass::NthOfType(nth) => outcome(
                self.sibling_position(el, true, false)
                    .is_some_and(|position| nth_matches(*nth, position)),
            ),
            PseudoClass::NthLastOfType(nth) => outcome(
                self.sibling_position(el, true, true)
                    .is_some_and(|position| nth_matches(*nth, position)),
            ),
            PseudoClass::Empty => outcome(self.dom.child_count(el) == 0),
            PseudoClass::Root => outcome(el == self.dom.document_element),
            PseudoClass::HasText(pattern) => {
                outcome(pattern.matches(&self.dom.text_content(el)))
            }
            PseudoClass::MatchesMedia(query) => outcome(self.media.evaluate(query)),
            PseudoClass::MatchesPath(pattern) => outcome(pattern.matches(self.path_query)),
            PseudoClass::Unknown(_) => TokenMatch::Miss,
        }
    }

    /// 1-based position among element siblings, counted from the front or
    /// the back, optionally restricted to the element's own tag.
    fn sibling_position(&self, el: NodeId, of_type: bool, from_end: bool) -> Option<i64> {
        let own_tag = self.dom.tag_name(el)?;
        let step = |node: NodeId| {
            if from_end {
                self.dom.next_element_sibling(node)
            } else {
                self.dom.previous_element_sibling(node)
            }
        };
        let mut position = 1i64;
        let mut cursor = step(el);
        while let Some(sibling) = cursor {
            if !of_type
                || self
                    .dom
                    .tag_name(sibling)
                    .is_some_and(|tag| tag.eq_ignore_ascii_case(own_tag))
            {
                position += 1;
            }
            cursor = step(sibling);
        }
        Some(position)
    }
}

fn nth_matches(nth: Nth, position: i64) -> bool {
    let diff = position - nth.b;
    if nth.a == 0 {
        return diff == 0;
    }
    if nth.a > 0 {
        diff >= 0 && diff % nth.a == 0
    } else {
        diff <= 0 && diff % nth.a == 0
    }
}
