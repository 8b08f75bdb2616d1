use super::*;

/// Comma-separated alternatives; an element matches the list when it
/// matches any group.
pub type SelectorList = Vec<SelectorGroup>;

/// One alternative: compound steps with combinators inline between them,
/// in source order.
pub type SelectorGroup = Vec<SelectorToken>;

#[derive(Debug, Clone)]
pub enum SelectorToken {
    Tag {
        name: String,
    },
    Universal,
    Attribute {
        name: String,
        action: AttrAction,
        value: String,
        ignore_case: bool,
    },
    Pseudo(PseudoClass),
    PseudoElement {
        name: String,
    },
    Combinator(Combinator),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    Descendant,
    Child,
    AdjacentSibling,
    GeneralSibling,
    Column,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrAction {
    Exists,
    Equals,
    /// Whitespace-token match; class selectors lower to this.
    Element,
    Start,
    End,
    Any,
    Hyphen,
    Not,
}

#[derive(Debug, Clone)]
pub enum PseudoClass {
    Not(SelectorList),
    Is(SelectorList),
    Where(SelectorList),
    Has(SelectorList),
    Upward(UpwardArg),
    FirstChild,
    LastChild,
    OnlyChild,
    FirstOfType,
    LastOfType,
    OnlyOfType,
    NthChild(Nth),
    NthLastChild(Nth),
    NthOfType(Nth),
    NthLastOfType(Nth),
    Empty,
    Root,
    HasText(TextPattern),
    MatchesMedia(String),
    MatchesPath(TextPattern),
    Unknown(String),
}

#[derive(Debug, Clone)]
pub enum UpwardArg {
    Levels(usize),
    Ancestor(SelectorList),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nth {
    pub a: i64,
    pub b: i64,
}

#[derive(Debug, Clone)]
pub enum TextPattern {
    Literal(String),
    Regex(fancy_regex::Regex),
}

impl TextPattern {
    pub(crate) fn parse(raw: &str) -> Result<Self> {
        if let Some(rest) = raw.strip_prefix('/') {
            if let Some(slash) = rest.rfind('/') {
                let body = &rest[..slash];
                let flags = &rest[slash + 1..];
                let mut builder = fancy_regex::RegexBuilder::new(body);
                for flag in flags.chars() {
                    match flag {
                        'i' => {
                            builder.case_insensitive(true);
                        }
                        'm' => {
                            builder.multi_line(true);
                        }
                        's' => {
                            builder.dot_matches_new_line(true);
                        }
                        'd' | 'g' | 'u' | 'v' | 'y' => {}
                        other => {
                            return Err(Error::InvalidPattern(format!(
                                "unsupported regex flag '{other}' in {raw}"
                            )));
                        }
                    }
                }
                let regex = builder
                    .build()
                    .map_err(|err| Error::InvalidPattern(err.to_string()))?;
                return Ok(Self::Regex(regex));
            }
        }
        Ok(Self::Literal(raw.to_string()))
    }

    pub(crate) fn matches(&self, text: &str) -> bool {
        match self {
            Self::Literal(needle) => text.contains(needle),
            Self::Regex(regex) => regex.is_match(text).unwrap_or(false),
        }
    }
}

pub fn parse_selector(selector: &str) -> Result<SelectorList> {
    let trimmed = selector.trim();
    if trimmed.is_empty() {
        return Err(parse_error(selector));
    }
    let mut list = Vec::new();
    for group in split_selector_groups(trimmed, selector)? {
        list.push(parse_group(&group, selector)?);
    }
    Ok(list)
}

fn parse_error(selector: &str) -> Error {
    Error::SelectorParse(selector.to_string())
}

fn split_selector_groups(trimmed: &str, selector: &str) -> Result<Vec<String>> {
    let mut groups = Vec::new();
    let mut current = String::new();
    let mut paren_depth = 0usize;
    let mut bracket_depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in trimmed.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        if ch == '\\' {
            current.push(ch);
            escaped = true;
            continue;
        }
        if let Some(open) = quote {
            current.push(ch);
            if ch == open {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                current.push(ch);
            }
            '(' => {
                paren_depth += 1;
                current.push(ch);
            }
            ')' => {
                paren_depth = paren_depth
                    .checked_sub(1)
                    .ok_or_else(|| parse_error(selector))?;
                current.push(ch);
            }
            '[' => {
                bracket_depth += 1;
                current.push(ch);
            }
            ']' => {
                bracket_depth = bracket_depth
                    .checked_sub(1)
                    .ok_or_else(|| parse_error(selector))?;
                current.push(ch);
            }
            ',' if paren_depth == 0 && bracket_depth == 0 => {
                if current.trim().is_empty() {
                    return Err(parse_error(selector));
                }
                groups.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if quote.is_some() || paren_depth != 0 || bracket_depth != 0 || current.trim().is_empty() {
        return Err(parse_error(selector));
    }
    groups.push(current);
    Ok(groups)
}

enum RawPiece {
    Compound(String),
    Comb(Combinator),
}

fn parse_group(group: &str, selector: &str) -> Result<SelectorGroup> {
    let pieces = tokenize_group(group, selector)?;
    let mut tokens: SelectorGroup = Vec::new();
    let mut pending: Option<Combinator> = None;
    let mut has_compound = false;

    for piece in pieces {
        match piece {
            RawPiece::Comb(combinator) => {
                if !has_compound || pending.is_some() {
                    return Err(parse_error(selector));
                }
                pending = Some(combinator);
            }
            RawPiece::Compound(text) => {
                if has_compound {
                    tokens.push(SelectorToken::Combinator(
                        pending.take().unwrap_or(Combinator::Descendant),
                    ));
                }
                parse_compound(&text, selector, &mut tokens)?;
                has_compound = true;
            }
        }
    }
    if pending.is_some() || !has_compound {
        return Err(parse_error(selector));
    }
    Ok(tokens)
}

fn tokenize_group(group: &str, selector: &str) -> Result<Vec<RawPiece>> {
    let chars: Vec<char> = group.chars().collect();
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut paren_depth = 0usize;
    let mut bracket_depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut index = 0usize;

    let flush = |current: &mut String, pieces: &mut Vec<RawPiece>| {
        if !current.is_empty() {
            pieces.push(RawPiece::Compound(std::mem::take(current)));
        }
    };

    while index < chars.len() {
        let ch = chars[index];
        if escaped {
            current.push(ch);
            escaped = false;
            index += 1;
            continue;
        }
        if let Some(open) = quote {
            current.push(ch);
            if ch == '\\' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
            index += 1;
            continue;
        }
        match ch {
            '\\' => {
                current.push(ch);
                escaped = true;
            }
            '"' | '\'' => {
                current.push(ch);
                quote = Some(ch);
            }
            '(' => {
                paren_depth += 1;
                current.push(ch);
            }
            ')' => {
                paren_depth = paren_depth
                    .checked_sub(1)
                    .ok_or_else(|| parse_error(selector))?;
                current.push(ch);
            }
            '[' => {
                bracket_depth += 1;
                current.push(ch);
            }
            ']' => {
                bracket_depth = bracket_depth
                    .checked_sub(1)
                    .ok_or_else(|| parse_error(selector))?;
                current.push(ch);
            }
            '>' | '+' | '~' if paren_depth == 0 && bracket_depth == 0 => {
                flush(&mut current, &mut pieces);
                let combinator = match ch {
                    '>' => Combinator::Child,
                    '+' => Combinator::AdjacentSibling,
                    _ => Combinator::GeneralSibling,
                };
                pieces.push(RawPiece::Comb(combinator));
            }
            '|' if paren_depth == 0
                && bracket_depth == 0
                && chars.get(index + 1) == Some(&'|') =>
            {
                flush(&mut current, &mut pieces);
                pieces.push(RawPiece::Comb(Combinator::Column));
                index += 1;
            }
            _ if ch.is_whitespace() && paren_depth == 0 && bracket_depth == 0 => {
                flush(&mut current, &mut pieces);
            }
            _ => current.push(ch),
        }
        index += 1;
    }
    if quote.is_some() || paren_depth != 0 || bracket_depth != 0 {
        return Err(parse_error(selector));
    }
    flush(&mut current, &mut pieces);
    Ok(pieces)
}

fn parse_compound(compound: &str, selector: &str, out: &mut SelectorGroup) -> Result<()> {
    let chars: Vec<char> = compound.chars().collect();
    let mut index = 0usize;
    let mut consumed_any = false;

    while index < chars.len() {
        match chars[index] {
            '*' => {
                out.push(SelectorToken::Universal);
                index += 1;
                consumed_any = true;
            }
            '#' => {
                let (name, next) = parse_identifier(&chars, index + 1);
                if name.is_empty() {
                    return Err(parse_error(selector));
                }
                out.push(SelectorToken::Attribute {
                    name: "id".to_string(),
                    action: AttrAction::Equals,
                    value: name,
                    ignore_case: false,
                });
                index = next;
                consumed_any = true;
            }
            '.' => {
                let (name, next) = parse_identifier(&chars, index + 1);
                if name.is_empty() {
                    return Err(parse_error(selector));
                }
                out.push(SelectorToken::Attribute {
                    name: "class".to_string(),
                    action: AttrAction::Element,
                    value: name,
                    ignore_case: false,
                });
                index = next;
                consumed_any = true;
            }
            '[' => {
                let (token, next) = parse_attribute(&chars, index, selector)?;
                out.push(token);
                index = next;
                consumed_any = true;
            }
            ':' => {
                if chars.get(index + 1) == Some(&':') {
                    let (name, mut next) = parse_identifier(&chars, index + 2);
                    if name.is_empty() {
                        return Err(parse_error(selector));
                    }
                    if chars.get(next) == Some(&'(') {
                        let close = find_matching_paren(&chars, next)
                            .ok_or_else(|| parse_error(selector))?;
                        next = close + 1;
                    }
                    out.push(SelectorToken::PseudoElement {
                        name: name.to_ascii_lowercase(),
                    });
                    index = next;
                } else {
                    let (kind, next) = parse_pseudo_class(&chars, index + 1, selector)?;
                    out.push(SelectorToken::Pseudo(kind));
                    index = next;
                }
                consumed_any = true;
            }
            c if is_identifier_char(c) => {
                if consumed_any {
                    return Err(parse_error(selector));
                }
                let (name, next) = parse_identifier(&chars, index);
                out.push(SelectorToken::Tag {
                    name: name.to_ascii_lowercase(),
                });
                index = next;
                consumed_any = true;
            }
            _ => return Err(parse_error(selector)),
        }
    }
    Ok(())
}

fn is_identifier_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'
}

fn parse_identifier(chars: &[char], start: usize) -> (String, usize) {
    let mut index = start;
    let mut name = String::new();
    while index < chars.len() && is_identifier_char(chars[index]) {
        name.push(chars[index]);
        index += 1;
    }
    (name, index)
}

fn parse_pseudo_class(
    chars: &[char],
    start: usize,
    selector: &str,
) -> Result<(PseudoClass, usize)> {
    let (name, mut index) = parse_identifier(chars, start);
    if name.is_empty() {
        return Err(parse_error(selector));
    }
    let name = name.to_ascii_lowercase();
    let mut argument: Option<String> = None;
    if chars.get(index) == Some(&'(') {
        let close = find_matching_paren(chars, index).ok_or_else(|| parse_error(selector))?;
        let inner: String = chars[index + 1..close].iter().collect();
        argument = Some(inner.trim().to_string());
        index = close + 1;
    }
    let kind = build_pseudo_class(&name, argument, selector)?;
    Ok((kind, index))
}

fn build_pseudo_class(
    name: &str,
    argument: Option<String>,
    selector: &str,
) -> Result<PseudoClass> {
    let kind = match name {
        "not" => PseudoClass::Not(parse_selector(&required_argument(argument, selector)?)?),
        "is" | "matches" => {
            PseudoClass::Is(parse_selector(&required_argument(argument, selector)?)?)
        }
        "where" => PseudoClass::Where(parse_selector(&required_argument(argument, selector)?)?),
        "has" => PseudoClass::Has(parse_selector(&required_argument(argument, selector)?)?),
        "upward" => {
            let argument = required_argument(argument, selector)?;
            match leading_integer(&argument) {
                Some(levels) if levels > 0 => {
                    PseudoClass::Upward(UpwardArg::Levels(levels as usize))
                }
                Some(_) => return Err(parse_error(selector)),
                None => PseudoClass::Upward(UpwardArg::Ancestor(parse_selector(&argument)?)),
            }
        }
        "nth-child" => PseudoClass::NthChild(parse_nth(&required_argument(argument, selector)?)),
        "nth-last-child" => {
            PseudoClass::NthLastChild(parse_nth(&required_argument(argument, selector)?))
        }
        "nth-of-type" => {
            PseudoClass::NthOfType(parse_nth(&required_argument(argument, selector)?))
        }
        "nth-last-of-type" => {
            PseudoClass::NthLastOfType(parse_nth(&required_argument(argument, selector)?))
        }
        "first-child" => PseudoClass::FirstChild,
        "last-child" => PseudoClass::LastChild,
        "only-child" => PseudoClass::OnlyChild,
        "first-of-type" => PseudoClass::FirstOfType,
        "last-of-type" => PseudoClass::LastOfType,
        "only-of-type" => PseudoClass::OnlyOfType,
        "empty" => PseudoClass::Empty,
        "root" => PseudoClass::Root,
        "has-text" => match argument {
            Some(argument) if !argument.is_empty() => {
                PseudoClass::HasText(TextPattern::parse(strip_outer_quotes(&argument))?)
            }
            _ => PseudoClass::Unknown(name.to_string()),
        },
        "matches-media" => match argument {
            Some(argument) if !argument.is_empty() => PseudoClass::MatchesMedia(argument),
            _ => PseudoClass::Unknown(name.to_string()),
        },
        "matches-path" => match argument {
            // No quote stripping here; quotes are significant in paths.
            Some(argument) if !argument.is_empty() => {
                PseudoClass::MatchesPath(TextPattern::parse(&argument)?)
            }
            _ => PseudoClass::Unknown(name.to_string()),
        },
        _ => PseudoClass::Unknown(name.to_string()),
    };
    Ok(kind)
}

fn required_argument(argument: Option<String>, selector: &str) -> Result<String> {
    argument
        .filter(|argument| !argument.is_empty())
        .ok_or_else(|| parse_error(selector))
}

fn strip_outer_quotes(value: &str) -> &str {
    let mut out = value;
    if let Some(rest) = out.strip_prefix(['"', '\'']) {
        out = rest;
    }
    if let Some(rest) = out.strip_suffix(['"', '\'']) {
        out = rest;
    }
    out
}

fn leading_integer(value: &str) -> Option<i64> {
    let bytes = value.as_bytes();
    let mut index = 0usize;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        index = 1;
    }
    let digits_start = index;
    while index < bytes.len() && bytes[index].is_ascii_digit() {
        index += 1;
    }
    if index == digits_start {
        return None;
    }
    value[..index].parse::<i64>().ok()
}

/// An+B parsing never fails: unparseable input degrades to a leading
/// integer if one exists, otherwise to `0n+0`, which matches nothing.
pub(crate) fn parse_nth(raw: &str) -> Nth {
    let normalized: String = raw
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .map(|ch| ch.to_ascii_lowercase())
        .collect();
    match normalized.as_str() {
        "odd" => return Nth { a: 2, b: 1 },
        "even" => return Nth { a: 2, b: 0 },
        _ => {}
    }
    if let Some(split) = normalized.find('n') {
        let a_part = &normalized[..split];
        let b_part = &normalized[split + 1..];
        if let (Some(a), Some(b)) = (parse_nth_coefficient(a_part), parse_nth_offset(b_part)) {
            return Nth { a, b };
        }
    }
    match leading_integer(&normalized) {
        Some(b) => Nth { a: 0, b },
        None => Nth { a: 0, b: 0 },
    }
}

fn parse_nth_coefficient(part: &str) -> Option<i64> {
    match part {
        "" | "+" => Some(1),
        "-" => Some(-1),
        _ => strict_integer(part),
    }
}

fn parse_nth_offset(part: &str) -> Option<i64> {
    if part.is_empty() {
        return Some(0);
    }
    if !part.starts_with(['+', '-']) {
        return None;
    }
    strict_integer(part)
}

fn strict_integer(part: &str) -> Option<i64> {
    let digits = part.strip_prefix(['+', '-']).unwrap_or(part);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse::<i64>().ok()
}

fn find_matching_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (offset, ch) in chars[open..].iter().enumerate() {
        let ch = *ch;
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if let Some(open_quote) = quote {
            if ch == open_quote {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_attribute(
    chars: &[char],
    open: usize,
    selector: &str,
) -> Result<(SelectorToken, usize)> {
    let mut index = open + 1;
    index = skip_whitespace(chars, index);

    let (name, next) = parse_identifier(chars, index);
    if name.is_empty() {
        return Err(parse_error(selector));
    }
    let name = name.to_ascii_lowercase();
    index = skip_whitespace(chars, next);

    if chars.get(index) == Some(&']') {
        return Ok((
            SelectorToken::Attribute {
                name,
                action: AttrAction::Exists,
                value: String::new(),
                ignore_case: false,
            },
            index + 1,
        ));
    }

    let action = match chars.get(index).copied() {
        Some('=') => {
            index += 1;
            AttrAction::Equals
        }
        Some(op @ ('^' | '$' | '*' | '~' | '|' | '!')) => {
            if chars.get(index + 1) != Some(&'=') {
                return Err(parse_error(selector));
            }
            index += 2;
            match op {
                '^' => AttrAction::Start,
                '$' => AttrAction::End,
                '*' => AttrAction::Any,
                '~' => AttrAction::Element,
                '|' => AttrAction::Hyphen,
                _ => AttrAction::Not,
            }
        }
        _ => return Err(parse_error(selector)),
    };
    index = skip_whitespace(chars, index);

    let mut value = String::new();
    match chars.get(index).copied() {
        Some(open_quote @ ('"' | '\'')) => {
            index += 1;
            let mut closed = false;
            while index < chars.len() {
                let ch = chars[index];
                if ch == '\\' && index + 1 < chars.len() {
                    value.push(chars[index + 1]);
                    index += 2;
                    continue;
                }
                if ch == open_quote {
                    closed = true;
                    index += 1;
                    break;
                }
                value.push(ch);
                index += 1;
            }
            if !closed {
                return Err(parse_error(selector));
            }
        }
        _ => {
            while index < chars.len() && chars[index] != ']' && !chars[index].is_whitespace() {
                value.push(chars[index]);
                index += 1;
            }
        }
    }
    index = skip_whitespace(chars, index);

    let mut ignore_case = false;
    match chars.get(index).copied() {
        Some('i') | Some('I') => {
            ignore_case = true;
            index = skip_whitespace(chars, index + 1);
        }
        Some('s') | Some('S') => {
            index = skip_whitespace(chars, index + 1);
        }
        _ => {}
    }

    if chars.get(index) != Some(&']') {
        return Err(parse_error(selector));
    }
    Ok((
        SelectorToken::Attribute {
            name,
            action,
            value,
            ignore_case,
        },
        index + 1,
    ))
}

fn skip_whitespace(chars: &[char], mut index: usize) -> usize {
    while index < chars.len() && chars[index].is_whitespace() {
        index += 1;
    }
    index
}
