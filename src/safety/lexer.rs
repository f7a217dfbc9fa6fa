//! Lexical view of candidate SQL shared by both gate checks.
//!
//! Uses the sqlparser tokenizer with the PostgreSQL dialect. Only the token
//! stream is used; statements are never parsed into an AST. String
//! literals, quoted identifiers and comments come out as their own tokens,
//! so a comment marker inside a literal can never hide the text after it.

use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer, TokenizerError, Whitespace};

/// Significant tokens of one SQL text, with whitespace and comments removed.
#[derive(Debug, Clone)]
pub struct SqlTokens {
    tokens: Vec<Token>,
    ends_with_comment: bool,
}

impl SqlTokens {
    /// Tokenizes SQL text.
    ///
    /// Fails on unterminated string literals, quoted identifiers and block
    /// comments.
    pub fn tokenize(sql: &str) -> Result<Self, TokenizerError> {
        let raw = Tokenizer::new(&PostgreSqlDialect {}, sql).tokenize()?;

        let ends_with_comment = matches!(
            raw.iter().rev().find(|t| !is_blank(t)),
            Some(Token::Whitespace(
                Whitespace::SingleLineComment { .. } | Whitespace::MultiLineComment(_)
            ))
        );
        let tokens = raw
            .into_iter()
            .filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF))
            .collect();

        Ok(Self {
            tokens,
            ends_with_comment,
        })
    }

    pub fn as_slice(&self) -> &[Token] {
        &self.tokens
    }

    /// True when nothing but semicolons is left.
    pub fn is_empty(&self) -> bool {
        self.tokens.iter().all(|t| *t == Token::SemiColon)
    }

    /// Number of non-empty statements separated by semicolons.
    pub fn statement_count(&self) -> usize {
        self.tokens
            .split(|t| *t == Token::SemiColon)
            .filter(|segment| !segment.is_empty())
            .count()
    }

    /// Whether the source text ends in a comment.
    pub fn ends_with_comment(&self) -> bool {
        self.ends_with_comment
    }

    /// Upper-cased unquoted words, in order.
    pub fn words(&self) -> impl Iterator<Item = String> + '_ {
        self.tokens.iter().filter_map(bare_word)
    }

    pub fn count(&self, token: &Token) -> usize {
        self.tokens.iter().filter(|t| *t == token).count()
    }
}

/// Returns the upper-cased text of an unquoted word.
///
/// Quoted identifiers such as `"delete"` are names, not keywords.
pub fn bare_word(token: &Token) -> Option<String> {
    match token {
        Token::Word(word) if word.quote_style.is_none() => Some(word.value.to_uppercase()),
        _ => None,
    }
}

/// True when the token is an unquoted word among `expected` (upper case).
pub fn is_word(token: Option<&Token>, expected: &[&str]) -> bool {
    token
        .and_then(bare_word)
        .is_some_and(|word| expected.contains(&word.as_str()))
}

fn is_blank(token: &Token) -> bool {
    matches!(
        token,
        Token::Whitespace(Whitespace::Space | Whitespace::Newline | Whitespace::Tab)
    )
}
