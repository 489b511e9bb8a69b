//! Lexical safety pre-filter for the subprocess backend
//!
//! This is a heuristic, not a security boundary. It only recognizes literal
//! `import <module>` and `from <module>` statements, so dynamically built or
//! indirect imports (`__import__("o" + "s")`, `import sys, os`) pass, while
//! mentions inside comments or strings are rejected. The container backend
//! never consults it.

use regex::Regex;
use tracing::warn;

/// Modules that give target code system-level capabilities
pub const DEFAULT_DENIED_MODULES: &[&str] = &[
    "os",
    "subprocess",
    "shutil",
    "socket",
    "ctypes",
    "multiprocessing",
    "threading",
    "signal",
    "pty",
    "tty",
    "termios",
    "resource",
];

/// Verdict of the pre-filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Permitted,
    /// Rejected because of the named module
    Denied(String),
}

impl FilterVerdict {
    #[must_use]
    pub fn is_permitted(&self) -> bool {
        matches!(self, FilterVerdict::Permitted)
    }
}

/// Deny-list check run ahead of the subprocess backend
#[derive(Debug, Clone)]
pub struct SafetyFilter {
    modules: Vec<String>,
    pattern: Option<Regex>,
}

impl SafetyFilter {
    /// Create a filter denying the given modules
    pub fn new<I, S>(modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let modules: Vec<String> = modules.into_iter().map(Into::into).collect();
        let pattern = if modules.is_empty() {
            None
        } else {
            let alternatives = modules
                .iter()
                .map(|m| regex::escape(m))
                .collect::<Vec<_>>()
                .join("|");
            match Regex::new(&format!(r"\b(?:import|from)\s+({alternatives})\b")) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(error = %e, "deny-list pattern rejected, denying all code");
                    None
                }
            }
        };
        Self { modules, pattern }
    }

    /// Modules this filter denies
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    /// Scan code for denied imports
    pub fn check(&self, code: &str) -> FilterVerdict {
        let Some(pattern) = &self.pattern else {
            // No pattern with a non-empty list means it failed to compile
            return match self.modules.first() {
                Some(module) => FilterVerdict::Denied(module.clone()),
                None => FilterVerdict::Permitted,
            };
        };

        match pattern.captures(code).and_then(|caps| caps.get(1)) {
            Some(module) => {
                warn!(
                    module = module.as_str(),
                    "denied import detected, code will not run outside a container"
                );
                FilterVerdict::Denied(module.as_str().to_string())
            }
            None => FilterVerdict::Permitted,
        }
    }

    /// Whether code may run outside a container
    #[must_use]
    pub fn is_permitted(&self, code: &str) -> bool {
        self.check(code).is_permitted()
    }
}

impl Default for SafetyFilter {
    fn default() -> Self {
        Self::new(DEFAULT_DENIED_MODULES.iter().copied())
    }
}
