//! Offline simplifier: whitespace cleanup and line wrapping only.

use async_trait::async_trait;

use super::{ProviderError, SimplificationProvider};

/// Text longer than this is wrapped.
const WRAP_THRESHOLD: usize = 100;
const WRAP_WIDTH: usize = 80;
const CONTINUATION_INDENT: &str = "   ";

/// Collapses whitespace and wraps long text; never changes the wording, so
/// citations always survive.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainSimplifier;

impl PlainSimplifier {
    pub fn clean(text: &str) -> String {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.chars().count() <= WRAP_THRESHOLD {
            return collapsed;
        }

        // A citation keyword stays on the same line as its number.
        let mut words: Vec<String> = Vec::new();
        let mut glue = false;
        for word in collapsed.split(' ') {
            match words.last_mut() {
                Some(prev) if glue => {
                    prev.push(' ');
                    prev.push_str(word);
                }
                _ => words.push(word.to_string()),
            }
            glue = matches!(
                word.to_lowercase().as_str(),
                "article" | "art." | "section" | "sec."
            );
        }

        let mut lines: Vec<String> = Vec::new();
        let mut line = String::new();
        for word in &words {
            let indent = if lines.is_empty() { 0 } else { CONTINUATION_INDENT.len() };
            let len = line.chars().count();
            if len > 0 && indent + len + 1 + word.chars().count() > WRAP_WIDTH {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
        }
        if !line.is_empty() {
            lines.push(line);
        }
        lines.join(&format!("\n{CONTINUATION_INDENT}"))
    }
}

#[async_trait]
impl SimplificationProvider for PlainSimplifier {
    async fn simplify(&self, text: &str) -> Result<String, ProviderError> {
        Ok(Self::clean(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_collapsed_only() {
        assert_eq!(PlainSimplifier::clean("  right   to\nprivacy "), "right to privacy");
    }

    #[test]
    fn long_text_wrapped_with_indent() {
        let text = "No person shall be deprived of his life or personal liberty except according \
                    to procedure established by law, as held under Article 21 of the Constitution.";
        let out = PlainSimplifier::clean(text);
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines.len() > 1);
        assert!(lines[1].starts_with(CONTINUATION_INDENT));
        assert!(lines.iter().all(|l| l.chars().count() <= WRAP_WIDTH));
        assert!(out.contains("Article 21"));
    }
}
