//! Strategy tags, method parsing and the pure auto-selection rules.
//!
//! Fallback order is fixed and cheapest-first:
//!
//! ```text
//! simple --> framework --> browser --> stealth
//! ```
//!
//! Auto-selection starts at `simple` unless the request carries a signal
//! that justifies starting further down the chain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::models::ScrapeOptions;

/// One concrete way of fetching a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Plain HTTP GET.
    Simple,
    /// HTTP crawl with browser-like headers and redirect/alternate following.
    Framework,
    /// Headless browser rendering.
    Browser,
    /// Headless browser with automation fingerprints masked.
    Stealth,
}

/// Cheapest first. Derived `Ord` on [`StrategyKind`] follows this order.
pub const FALLBACK_ORDER: [StrategyKind; 4] = [
    StrategyKind::Simple,
    StrategyKind::Framework,
    StrategyKind::Browser,
    StrategyKind::Stealth,
];

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Simple => "simple",
            StrategyKind::Framework => "framework",
            StrategyKind::Browser => "browser",
            StrategyKind::Stealth => "stealth",
        }
    }

    /// Next strategy in the fallback order, if any.
    pub fn next(&self) -> Option<StrategyKind> {
        FALLBACK_ORDER.into_iter().find(|k| k > self)
    }

    /// Executes JavaScript before handing back the document.
    pub fn renders_js(&self) -> bool {
        matches!(self, StrategyKind::Browser | StrategyKind::Stealth)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simple" | "http" => Ok(StrategyKind::Simple),
            "framework" | "crawl" => Ok(StrategyKind::Framework),
            "browser" => Ok(StrategyKind::Browser),
            "stealth" => Ok(StrategyKind::Stealth),
            _ => Err(format!("Unknown strategy: {s}")),
        }
    }
}

/// Caller's method choice: `"auto"` or an explicit strategy name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Method {
    #[default]
    Auto,
    Explicit(StrategyKind),
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Auto => "auto",
            Method::Explicit(kind) => kind.as_str(),
        }
    }

    /// Fallback default: on for `auto`, off when the caller named a strategy.
    pub fn allows_fallback_by_default(&self) -> bool {
        matches!(self, Method::Auto)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(Method::Auto)
        } else {
            s.parse().map(Method::Explicit)
        }
    }
}

impl TryFrom<String> for Method {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Method> for String {
    fn from(method: Method) -> Self {
        method.as_str().to_string()
    }
}

/// What we know about a target before fetching it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSignals {
    /// Caller asked for JavaScript rendering.
    pub render_js: bool,
    /// Caller wants to wait for a selector, which only renderers can do.
    pub wait_for: bool,
    /// `#!` routes are client-side rendered.
    pub hash_bang: bool,
    /// Most expensive strategy recently blocked by anti-bot on this target.
    pub blocked_by: Option<StrategyKind>,
}

impl TargetSignals {
    pub fn inspect(url: &Url, options: &ScrapeOptions, blocked_by: Option<StrategyKind>) -> Self {
        Self {
            render_js: options.render_js,
            wait_for: options.wait_for.as_deref().is_some_and(|s| !s.trim().is_empty()),
            hash_bang: url.fragment().is_some_and(|f| f.starts_with('!')),
            blocked_by,
        }
    }

    fn needs_rendering(&self) -> bool {
        self.render_js || self.wait_for || self.hash_bang
    }
}

/// Pick the first strategy to try. Pure: depends only on its inputs.
///
/// - an explicit method always wins;
/// - a recorded anti-bot block escalates past the blocked strategy
///   (this is the only way auto-selection reaches `stealth`);
/// - rendering signals start at `browser`;
/// - everything else starts at `simple`.
pub fn select(signals: &TargetSignals, method: Method) -> StrategyKind {
    if let Method::Explicit(kind) = method {
        return kind;
    }

    let floor = if signals.needs_rendering() {
        StrategyKind::Browser
    } else {
        StrategyKind::Simple
    };

    match signals.blocked_by {
        Some(blocked) => blocked.next().unwrap_or(blocked).max(floor),
        None => floor,
    }
}

/// Ordered candidate list starting at `start`, restricted to `available`.
///
/// When `start` itself is not available the chain begins at the next
/// available strategy after it; if none follows, at the most capable one
/// that precedes it. Without fallback only the head is kept.
pub fn plan(start: StrategyKind, available: &[StrategyKind], allow_fallback: bool) -> Vec<StrategyKind> {
    let mut chain: Vec<StrategyKind> = FALLBACK_ORDER
        .into_iter()
        .filter(|k| *k >= start && available.contains(k))
        .collect();

    if chain.is_empty()
        && let Some(best) = FALLBACK_ORDER
            .into_iter()
            .rev()
            .find(|k| available.contains(k))
    {
        chain.push(best);
    }

    if !allow_fallback {
        chain.truncate(1);
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn strategy_roundtrip() {
        for kind in FALLBACK_ORDER {
            assert_eq!(kind.as_str().parse::<StrategyKind>().unwrap(), kind);
        }
        assert!("teleport".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn method_parses_auto_and_explicit() {
        assert_eq!("auto".parse::<Method>().unwrap(), Method::Auto);
        assert_eq!("AUTO".parse::<Method>().unwrap(), Method::Auto);
        assert_eq!(
            "stealth".parse::<Method>().unwrap(),
            Method::Explicit(StrategyKind::Stealth)
        );
        assert!("nope".parse::<Method>().is_err());

        let json = serde_json::to_string(&Method::Explicit(StrategyKind::Browser)).unwrap();
        assert_eq!(json, "\"browser\"");
        assert!(serde_json::from_str::<Method>("\"bogus\"").is_err());
    }

    #[test]
    fn next_follows_fallback_order() {
        assert_eq!(StrategyKind::Simple.next(), Some(StrategyKind::Framework));
        assert_eq!(StrategyKind::Framework.next(), Some(StrategyKind::Browser));
        assert_eq!(StrategyKind::Browser.next(), Some(StrategyKind::Stealth));
        assert_eq!(StrategyKind::Stealth.next(), None);
    }

    #[test]
    fn plain_target_starts_simple() {
        let signals = TargetSignals::inspect(&url("https://example.com"), &ScrapeOptions::default(), None);
        assert_eq!(select(&signals, Method::Auto), StrategyKind::Simple);
    }

    #[test]
    fn rendering_signals_start_at_browser() {
        let opts = ScrapeOptions {
            wait_for: Some("#app".into()),
            ..Default::default()
        };
        let signals = TargetSignals::inspect(&url("https://example.com"), &opts, None);
        assert_eq!(select(&signals, Method::Auto), StrategyKind::Browser);

        let signals = TargetSignals::inspect(
            &url("https://example.com/#!/inbox"),
            &ScrapeOptions::default(),
            None,
        );
        assert_eq!(select(&signals, Method::Auto), StrategyKind::Browser);
    }

    #[test]
    fn auto_never_jumps_to_stealth_without_signal() {
        let opts = ScrapeOptions {
            render_js: true,
            wait_for: Some("main".into()),
            ..Default::default()
        };
        let signals = TargetSignals::inspect(&url("https://example.com/#!/x"), &opts, None);
        assert_ne!(select(&signals, Method::Auto), StrategyKind::Stealth);
    }

    #[test]
    fn recorded_block_escalates() {
        let signals = TargetSignals {
            blocked_by: Some(StrategyKind::Simple),
            ..Default::default()
        };
        assert_eq!(select(&signals, Method::Auto), StrategyKind::Framework);

        let signals = TargetSignals {
            blocked_by: Some(StrategyKind::Browser),
            ..Default::default()
        };
        assert_eq!(select(&signals, Method::Auto), StrategyKind::Stealth);

        let signals = TargetSignals {
            blocked_by: Some(StrategyKind::Stealth),
            ..Default::default()
        };
        assert_eq!(select(&signals, Method::Auto), StrategyKind::Stealth);
    }

    #[test]
    fn explicit_method_wins() {
        let signals = TargetSignals {
            render_js: true,
            blocked_by: Some(StrategyKind::Browser),
            ..Default::default()
        };
        assert_eq!(
            select(&signals, Method::Explicit(StrategyKind::Simple)),
            StrategyKind::Simple
        );
    }

    #[test]
    fn plan_respects_availability_and_fallback() {
        let all = FALLBACK_ORDER;
        assert_eq!(plan(StrategyKind::Simple, &all, true), all.to_vec());
        assert_eq!(
            plan(StrategyKind::Browser, &all, true),
            vec![StrategyKind::Browser, StrategyKind::Stealth]
        );
        assert_eq!(plan(StrategyKind::Simple, &all, false), vec![StrategyKind::Simple]);

        let http_only = [StrategyKind::Simple, StrategyKind::Framework];
        assert_eq!(
            plan(StrategyKind::Browser, &http_only, true),
            vec![StrategyKind::Framework]
        );
        assert_eq!(
            plan(StrategyKind::Simple, &[StrategyKind::Browser], true),
            vec![StrategyKind::Browser]
        );
        assert!(plan(StrategyKind::Simple, &[], true).is_empty());
    }
}
