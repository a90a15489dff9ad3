//! Vote grammars
//!
//! A grammar decides whether a normalised message is a vote and which choice
//! it names. Downstream components only see the choice string, so grammars
//! can be swapped without touching them.

use crate::config::GrammarConfig;
use crate::types::Result;
use regex::Regex;

/// Recognises votes in normalised message text
pub trait VoteGrammar: Send + Sync {
    /// The choice named by `text`, or None if it is not a vote
    fn parse(&self, text: &str) -> Option<String>;

    /// Choices the grammar can produce, when known up front
    fn choices(&self) -> Option<Vec<String>> {
        None
    }
}

/// Whole message equals one of the tokens (the default `1`/`2`/`3` rule)
#[derive(Debug, Clone)]
pub struct ExactTokens {
    tokens: Vec<String>,
}

impl ExactTokens {
    pub fn new(tokens: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

impl VoteGrammar for ExactTokens {
    fn parse(&self, text: &str) -> Option<String> {
        self.tokens.iter().find(|t| t.as_str() == text).cloned()
    }

    fn choices(&self) -> Option<Vec<String>> {
        Some(self.tokens.clone())
    }
}

/// Message starts with a token followed by whitespace or the end of text
///
/// Accepts "2 let's go" as a vote for "2" but not "22" or "2nd".
#[derive(Debug, Clone)]
pub struct PrefixTokens {
    tokens: Vec<String>,
}

impl PrefixTokens {
    pub fn new(tokens: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        // longest first so "10" wins over "1"
        tokens.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Self { tokens }
    }
}

impl VoteGrammar for PrefixTokens {
    fn parse(&self, text: &str) -> Option<String> {
        self.tokens
            .iter()
            .find(|token| match text.strip_prefix(token.as_str()) {
                Some(rest) => rest.chars().next().map_or(true, char::is_whitespace),
                None => false,
            })
            .cloned()
    }

    fn choices(&self) -> Option<Vec<String>> {
        let mut choices = self.tokens.clone();
        choices.sort();
        Some(choices)
    }
}

/// Regular expression grammar; the first capture group (or whole match) is the choice
#[derive(Debug, Clone)]
pub struct RegexGrammar {
    pattern: Regex,
}

impl RegexGrammar {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }
}

impl VoteGrammar for RegexGrammar {
    fn parse(&self, text: &str) -> Option<String> {
        let caps = self.pattern.captures(text)?;
        let choice = caps.get(1).or_else(|| caps.get(0))?.as_str().trim();
        if choice.is_empty() {
            None
        } else {
            Some(choice.to_string())
        }
    }
}

/// Build the grammar described by a configuration
pub fn build_grammar(config: &GrammarConfig) -> Result<Box<dyn VoteGrammar>> {
    let grammar: Box<dyn VoteGrammar> = match config {
        GrammarConfig::Exact { tokens } => Box::new(ExactTokens::new(tokens.iter().cloned())),
        GrammarConfig::Prefix { tokens } => Box::new(PrefixTokens::new(tokens.iter().cloned())),
        GrammarConfig::Regex { pattern } => Box::new(RegexGrammar::new(pattern)?),
    };
    Ok(grammar)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_tokens() {
        let grammar = ExactTokens::new(["1", "2", "3"]);
        assert_eq!(grammar.parse("2"), Some("2".to_string()));
        assert_eq!(grammar.parse("4"), None);
        assert_eq!(grammar.parse("2 please"), None);
        assert_eq!(grammar.parse("12"), None);
    }

    #[test]
    fn test_prefix_tokens() {
        let grammar = PrefixTokens::new(["1", "10", "2"]);
        assert_eq!(grammar.parse("2 go go go"), Some("2".to_string()));
        assert_eq!(grammar.parse("10"), Some("10".to_string()));
        assert_eq!(grammar.parse("1"), Some("1".to_string()));
        assert_eq!(grammar.parse("2nd"), None);
        assert_eq!(grammar.parse("hello 2"), None);
        assert_eq!(grammar.choices().unwrap(), vec!["1", "10", "2"]);
    }

    #[test]
    fn test_regex_grammar() {
        let grammar = RegexGrammar::new(r"^(?i)vote\s*([abc])$").unwrap();
        assert_eq!(grammar.parse("vote b"), Some("b".to_string()));
        assert_eq!(grammar.parse("VOTE c"), Some("c".to_string()));
        assert_eq!(grammar.parse("vote d"), None);

        let whole = RegexGrammar::new(r"^[123]$").unwrap();
        assert_eq!(whole.parse("3"), Some("3".to_string()));
    }

    #[test]
    fn test_build_grammar_rejects_bad_pattern() {
        let config = GrammarConfig::Regex {
            pattern: "([unclosed".to_string(),
        };
        assert!(build_grammar(&config).is_err());

        let default = build_grammar(&GrammarConfig::default()).unwrap();
        assert_eq!(default.parse("1"), Some("1".to_string()));
    }
}
