//! Verification prompt templates
//!
//! Two slots: the citing text and the reference text. Slots are written as
//! `{}` (filled in order) or `{0}` / `{1}`; `{{` and `}}` are literal braces.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read prompt template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported placeholder {{{0}}} in prompt template (use {{}}, {{0}} or {{1}})")]
    UnknownSlot(String),

    #[error("prompt template has more than two {{}} slots")]
    TooManySlots,

    #[error("unmatched '{0}' in prompt template")]
    Unbalanced(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Citation,
    Reference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Text(String),
    Slot(Slot),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pieces: Vec<Piece>,
}

impl PromptTemplate {
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let text = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let mut pieces = Vec::new();
        let mut text = String::new();
        let mut next_auto = 0;
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    text.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    text.push('}');
                }
                '}' => return Err(TemplateError::Unbalanced('}')),
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => name.push(ch),
                            None => return Err(TemplateError::Unbalanced('{')),
                        }
                    }
                    let slot = match name.as_str() {
                        "" => {
                            next_auto += 1;
                            match next_auto {
                                1 => Slot::Citation,
                                2 => Slot::Reference,
                                _ => return Err(TemplateError::TooManySlots),
                            }
                        }
                        "0" => Slot::Citation,
                        "1" => Slot::Reference,
                        _ => return Err(TemplateError::UnknownSlot(name)),
                    };
                    if !text.is_empty() {
                        pieces.push(Piece::Text(std::mem::take(&mut text)));
                    }
                    pieces.push(Piece::Slot(slot));
                }
                _ => text.push(c),
            }
        }
        if !text.is_empty() {
            pieces.push(Piece::Text(text));
        }

        Ok(Self { pieces })
    }

    /// Fill the template for one citation
    pub fn render(&self, citation: &str, reference: &str) -> String {
        let mut out = String::with_capacity(citation.len() + reference.len() + 256);
        for piece in &self.pieces {
            match piece {
                Piece::Text(t) => out.push_str(t),
                Piece::Slot(Slot::Citation) => out.push_str(citation),
                Piece::Slot(Slot::Reference) => out.push_str(reference),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_slots() {
        let t = PromptTemplate::parse("引文：{}\n文献：{}\n请回答<是>或<否>").unwrap();
        assert_eq!(
            t.render("句子[1]。", "paper text"),
            "引文：句子[1]。\n文献：paper text\n请回答<是>或<否>"
        );
    }

    #[test]
    fn test_indexed_slots_and_reuse() {
        let t = PromptTemplate::parse("{1} / {0} / {0}").unwrap();
        assert_eq!(t.render("c", "r"), "r / c / c");
    }

    #[test]
    fn test_escaped_braces() {
        let t = PromptTemplate::parse("{{\"answer\": \"{}\"}} {}").unwrap();
        assert_eq!(t.render("a", "b"), "{\"answer\": \"a\"} b");
    }

    #[test]
    fn test_substituted_text_is_not_reparsed() {
        let t = PromptTemplate::parse("{} {}").unwrap();
        assert_eq!(t.render("{1}", "{}"), "{1} {}");
    }

    #[test]
    fn test_rejects_bad_templates() {
        assert!(matches!(
            PromptTemplate::parse("{name}"),
            Err(TemplateError::UnknownSlot(n)) if n == "name"
        ));
        assert!(matches!(
            PromptTemplate::parse("{} {} {}"),
            Err(TemplateError::TooManySlots)
        ));
        assert!(matches!(
            PromptTemplate::parse("open {"),
            Err(TemplateError::Unbalanced('{'))
        ));
        assert!(matches!(
            PromptTemplate::parse("close }"),
            Err(TemplateError::Unbalanced('}'))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.txt");
        std::fs::write(&path, "{}|{}").unwrap();
        let t = PromptTemplate::load(&path).unwrap();
        assert_eq!(t.render("x", "y"), "x|y");
    }
}
