use super::*;

/// Mock media-query evaluation: explicit per-query results with a
/// default for anything not configured.
#[derive(Debug, Clone, Default)]
pub(crate) struct MediaSettings {
    pub(crate) results: HashMap<String, bool>,
    pub(crate) default_result: bool,
}

impl MediaSettings {
    pub(crate) fn evaluate(&self, query: &str) -> bool {
        self.results.get(query).copied().unwrap_or(self.default_result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LocationParts {
    pub(crate) scheme: String,
    pub(crate) host: String,
    pub(crate) pathname: String,
    pub(crate) search: String,
    pub(crate) hash: String,
}

impl LocationParts {
    pub(crate) fn parse(url: &str) -> Option<Self> {
        let (scheme, rest) = url.split_once("://")?;
        if scheme.is_empty() {
            return None;
        }
        let (host, path_part) = match rest.find(['/', '?', '#']) {
            Some(split) => (&rest[..split], &rest[split..]),
            None => (rest, ""),
        };
        if host.is_empty() {
            return None;
        }
        let (pathname, search, hash) = split_path_search_hash(path_part);
        Some(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_string(),
            pathname: normalize_pathname(&pathname),
            search,
            hash,
        })
    }

    pub(crate) fn root(scheme: &str, host: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            pathname: "/".to_string(),
            search: String::new(),
            hash: String::new(),
        }
    }

    pub(crate) fn href(&self) -> String {
        format!(
            "{}://{}{}{}{}",
            self.scheme, self.host, self.pathname, self.search, self.hash
        )
    }

    pub(crate) fn path_and_query(&self) -> String {
        format!("{}{}", self.pathname, self.search)
    }
}

fn split_path_search_hash(part: &str) -> (String, String, String) {
    let (without_hash, hash) = match part.find('#') {
        Some(index) => (&part[..index], part[index..].to_string()),
        None => (part, String::new()),
    };
    let (pathname, search) = match without_hash.find('?') {
        Some(index) => (
            without_hash[..index].to_string(),
            without_hash[index..].to_string(),
        ),
        None => (without_hash.to_string(), String::new()),
    };
    let pathname = if pathname.is_empty() {
        "/".to_string()
    } else {
        pathname
    };
    (pathname, search, hash)
}

fn normalize_pathname(pathname: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in pathname.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let trailing_slash = pathname.ends_with('/') && !segments.is_empty();
    let mut out = String::from("/");
    out.push_str(&segments.join("/"));
    if trailing_slash {
        out.push('/');
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HistoryEntry {
    pub(crate) url: String,
}

#[derive(Debug)]
pub(crate) struct Environment {
    pub(crate) media: MediaSettings,
    pub(crate) location: LocationParts,
    history_entries: Vec<HistoryEntry>,
    history_index: usize,
}

impl Environment {
    pub(crate) fn new(location: LocationParts) -> Self {
        let entry = HistoryEntry {
            url: location.href(),
        };
        Self {
            media: MediaSettings::default(),
            location,
            history_entries: vec![entry],
            history_index: 0,
        }
    }

    fn resolve(&self, target: &str) -> LocationParts {
        if let Some(absolute) = LocationParts::parse(target) {
            return absolute;
        }
        let mut next = self.location.clone();
        if let Some(fragment) = target.strip_prefix('#') {
            next.hash = format!("#{fragment}");
            return next;
        }
        let path_part = if target.starts_with('/') {
            target.to_string()
        } else if target.starts_with('?') {
            format!("{}{}", self.location.pathname, target)
        } else {
            // Relative path: resolve against the current directory.
            let base = match self.location.pathname.rfind('/') {
                Some(index) => &self.location.pathname[..index + 1],
                None => "/",
            };
            format!("{base}{target}")
        };
        let (pathname, search, hash) = split_path_search_hash(&path_part);
        next.pathname = normalize_pathname(&pathname);
        next.search = search;
        next.hash = hash;
        next
    }

    pub(crate) fn push(&mut self, target: &str) {
        self.location = self.resolve(target);
        self.history_entries.truncate(self.history_index + 1);
        self.history_entries.push(HistoryEntry {
            url: self.location.href(),
        });
        self.history_index = self.history_entries.len() - 1;
    }

    pub(crate) fn replace(&mut self, target: &str) {
        self.location = self.resolve(target);
        let href = self.location.href();
        if let Some(entry) = self.history_entries.get_mut(self.history_index) {
            entry.url = href;
        }
    }

    pub(crate) fn back(&mut self) -> bool {
        if self.history_index == 0 {
            return false;
        }
        self.history_index -= 1;
        self.apply_current_entry()
    }

    pub(crate) fn forward(&mut self) -> bool {
        if self.history_index + 1 >= self.history_entries.len() {
            return false;
        }
        self.history_index += 1;
        self.apply_current_entry()
    }

    fn apply_current_entry(&mut self) -> bool {
        let Some(entry) = self.history_entries.get(self.history_index) else {
            return false;
        };
        let Some(location) = LocationParts::parse(&entry.url) else {
            return false;
        };
        self.location = location;
        true
    }

    pub(crate) fn current_url(&self) -> String {
        self.location.href()
    }

    pub(crate) fn path_and_query(&self) -> String {
        self.location.path_and_query()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_url_components() {
        let parts = LocationParts::parse("https://example.com/a/b?x=1#frag").unwrap();
        assert_eq!(parts.scheme, "https");
        assert_eq!(parts.host, "example.com");
        assert_eq!(parts.pathname, "/a/b");
        assert_eq!(parts.search, "?x=1");
        assert_eq!(parts.hash, "#frag");
        assert_eq!(parts.path_and_query(), "/a/b?x=1");

        let bare = LocationParts::parse("https://example.com").unwrap();
        assert_eq!(bare.pathname, "/");
        assert!(LocationParts::parse("not a url").is_none());
    }

    #[test]
    fn pathname_normalization() {
        let parts = LocationParts::parse("https://example.com/a/./b/../c/").unwrap();
        assert_eq!(parts.pathname, "/a/c/");
    }

    #[test]
    fn push_resolves_relative_targets() {
        let mut env = Environment::new(LocationParts::root("https", "example.com"));
        env.push("/videos/list?page=2");
        assert_eq!(env.path_and_query(), "/videos/list?page=2");

        env.push("detail");
        assert_eq!(env.location.pathname, "/videos/detail");

        env.push("?page=3");
        assert_eq!(env.path_and_query(), "/videos/detail?page=3");

        env.push("#anchor");
        assert_eq!(env.location.hash, "#anchor");
        assert_eq!(env.path_and_query(), "/videos/detail?page=3");
    }

    #[test]
    fn history_back_and_forward() {
        let mut env = Environment::new(LocationParts::root("https", "example.com"));
        env.push("/one");
        env.push("/two");

        assert!(env.back());
        assert_eq!(env.location.pathname, "/one");
        assert!(env.back());
        assert_eq!(env.location.pathname, "/");
        assert!(!env.back());

        assert!(env.forward());
        assert_eq!(env.location.pathname, "/one");

        // Pushing from the middle drops the forward entries.
        env.push("/three");
        assert!(!env.forward());
        assert!(env.back());
        assert_eq!(env.location.pathname, "/one");
    }

    #[test]
    fn replace_overwrites_current_entry() {
        let mut env = Environment::new(LocationParts::root("https", "example.com"));
        env.push("/one");
        env.replace("/uno");
        assert_eq!(env.location.pathname, "/uno");
        assert!(env.back());
        assert_eq!(env.location.pathname, "/");
        assert!(env.forward());
        assert_eq!(env.location.pathname, "/uno");
    }

    #[test]
    fn media_results_fall_back_to_default() {
        let mut media = MediaSettings::default();
        assert!(!media.evaluate("(min-width: 800px)"));
        media.default_result = true;
        assert!(media.evaluate("(min-width: 800px)"));
        media.results.insert("(min-width: 800px)".to_string(), false);
        assert!(!media.evaluate("(min-width: 800px)"));
    }
}
