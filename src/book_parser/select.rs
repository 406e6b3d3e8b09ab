//! 章节范围选择与标题过滤。

use regex::Regex;
use tracing::{debug, warn};

/// Verdict for one incoming chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Accept,
    Skip,
    /// The `to` bound was reached; nothing after this is wanted.
    Stop,
}

/// Chapter range from the command line. Numbers are 1-based; 0 / empty means
/// unset. The `to` chapter itself is not included.
#[derive(Debug, Clone, Default)]
pub struct ChapterSelector {
    pub from_chapter: usize,
    pub to_chapter: usize,
    pub from_title: String,
    pub to_title: String,
    seen: usize,
    started: bool,
    stopped: bool,
}

impl ChapterSelector {
    pub fn new(from_chapter: usize, to_chapter: usize, from_title: &str, to_title: &str) -> Self {
        let mut selector = Self {
            from_chapter,
            to_chapter,
            from_title: from_title.to_string(),
            to_title: to_title.to_string(),
            ..Self::default()
        };
        selector.reset();
        selector
    }

    fn has_from(&self) -> bool {
        self.from_chapter > 0 || !self.from_title.is_empty()
    }

    pub fn reset(&mut self) {
        self.seen = 0;
        self.started = !self.has_from();
        self.stopped = false;
    }

    /// Chapters offered so far.
    pub fn seen(&self) -> usize {
        self.seen
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn check(&mut self, title: &str) -> Selection {
        if self.stopped {
            return Selection::Stop;
        }
        self.seen += 1;

        if self.started {
            let hit_to = self.seen == self.to_chapter
                || (!self.to_title.is_empty() && self.to_title == title);
            if hit_to {
                debug!("到达结束章节 {} ({})", self.seen, title);
                self.stopped = true;
                return Selection::Stop;
            }
            return Selection::Accept;
        }

        let hit_from = self.seen == self.from_chapter
            || (!self.from_title.is_empty() && self.from_title == title);
        if hit_from {
            debug!("从第 {} 章开始 ({})", self.seen, title);
            self.started = true;
            Selection::Accept
        } else {
            Selection::Skip
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Contains(String),
    Equal(String),
    Prefix(String),
    Suffix(String),
    Regex(Regex),
    /// `regex(...)` whose pattern doesn't compile: matches nothing.
    BrokenRegex,
    Any,
}

/// Title predicate, e.g. `contains(番外)` or `!regex(^第.+章$)`.
#[derive(Debug, Clone)]
pub struct TitleFilter {
    matcher: Matcher,
    negate: bool,
}

impl Default for TitleFilter {
    fn default() -> Self {
        Self {
            matcher: Matcher::Any,
            negate: false,
        }
    }
}

impl TitleFilter {
    pub fn parse(expr: &str) -> Self {
        let expr = expr.trim();
        let (negate, body) = match expr.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, expr),
        };

        let Some((kind, arg)) = body
            .strip_suffix(')')
            .and_then(|b| b.split_once('('))
            .filter(|(_, arg)| !arg.is_empty())
        else {
            if !expr.is_empty() {
                warn!("不支持的过滤表达式 '{expr}'，不做过滤");
            }
            return Self::default();
        };

        let matcher = match kind {
            "contains" => Matcher::Contains(arg.to_string()),
            "equal" => Matcher::Equal(arg.to_string()),
            "prefix" => Matcher::Prefix(arg.to_string()),
            "suffix" => Matcher::Suffix(arg.to_string()),
            "regex" => match Regex::new(arg) {
                Ok(re) => Matcher::Regex(re),
                Err(e) => {
                    warn!("过滤正则 '{arg}' 无效，所有章节都会被过滤: {e}");
                    Matcher::BrokenRegex
                }
            },
            _ => {
                warn!("不支持的过滤表达式 '{expr}'，不做过滤");
                return Self::default();
            }
        };
        Self { matcher, negate }
    }

    pub fn accepts(&self, title: &str) -> bool {
        let hit = match &self.matcher {
            Matcher::Any => return true,
            Matcher::BrokenRegex => return false,
            Matcher::Contains(p) => title.contains(p.as_str()),
            Matcher::Equal(p) => title == p,
            Matcher::Prefix(p) => title.starts_with(p.as_str()),
            Matcher::Suffix(p) => title.ends_with(p.as_str()),
            Matcher::Regex(re) => re.is_match(title),
        };
        hit != self.negate
    }
}
