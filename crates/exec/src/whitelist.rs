use aish_core::Action;
use regex::Regex;

use crate::policy::PolicyError;

/// Shell command patterns that accept-all mode may run without asking.
///
/// Patterns are plain regexes searched anywhere in the command (`ls` also
/// matches `rm -rf / && ls`), so anchor them with `^...$` to be strict.
/// Matching grants nothing by itself; the approval controller decides.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    patterns: Vec<(String, Regex)>,
}

impl Whitelist {
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self, PolicyError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                let p = p.as_ref();
                Regex::new(p)
                    .map(|re| (p.to_string(), re))
                    .map_err(|e| PolicyError::InvalidWhitelist {
                        pattern: p.to_string(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// The first pattern matching the action's full command, for shell
    /// actions only.
    pub fn matches(&self, action: &Action) -> Option<&str> {
        let command = action.command()?;
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(command))
            .map(|(source, _)| source.as_str())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
