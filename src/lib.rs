use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;

mod dom;
mod env;
mod matcher;
mod observe;
mod page;
mod parser;
mod query;
mod scheduler;

use dom::*;
use env::*;
use matcher::*;
use observe::*;
use query::*;
use scheduler::*;

pub use dom::NodeId;
pub use matcher::validate_selector;
pub use observe::{DEFAULT_SHADOW_POLL_INTERVAL_MS, ObserveOptions, ObserverId};
pub use page::Page;
pub use parser::{
    AttrAction, Combinator, Nth, PseudoClass, SelectorGroup, SelectorList, SelectorToken,
    TextPattern, UpwardArg, parse_selector,
};
pub use scheduler::FRAME_INTERVAL_MS;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    SelectorParse(String),
    UpwardPlacement(String),
    InvalidPattern(String),
    DomOperation(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SelectorParse(selector) => write!(f, "failed to parse selector: {selector}"),
            Error::UpwardPlacement(message) => write!(f, "invalid :upward() placement: {message}"),
            Error::InvalidPattern(message) => write!(f, "invalid pattern: {message}"),
            Error::DomOperation(message) => write!(f, "dom operation failed: {message}"),
        }
    }
}

impl std::error::Error for Error {}
