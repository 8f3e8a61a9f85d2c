//! Lexer: tokenizes JavaScript module source.
//!
//! Keywords are lexed as identifiers; the parser decides by context. Whether
//! a `/` starts a regular expression is decided from the previous token.

use crate::error::SyntaxError;
use crate::span::Span;

/// A token produced by the lexer.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// The raw source text of the token.
    pub text: String,
    pub span: Span,
    /// A line terminator separates this token from the previous one.
    pub newline_before: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifiers and keywords.
    Identifier,
    /// `#name`
    PrivateName,
    String,
    Number,
    BigInt,
    Regex,
    /// A template literal without substitutions.
    Template,
    /// `` `...${ ``
    TemplateHead,
    /// `}...${`
    TemplateMiddle,
    /// `` }...` ``
    TemplateTail,
    Punct,
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Identifier => "identifier",
            Self::PrivateName => "private name",
            Self::String => "string literal",
            Self::Number | Self::BigInt => "number",
            Self::Regex => "regular expression",
            Self::Template | Self::TemplateHead | Self::TemplateMiddle | Self::TemplateTail => {
                "template literal"
            }
            Self::Punct => "punctuator",
            Self::Eof => "end of input",
        };
        f.write_str(name)
    }
}

/// Longest first, so the first prefix match wins.
const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==", "!=",
    "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=",
    "**", "<<", ">>", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-", "*", "/", "%",
    "&", "|", "^", "!", "~", "?", ":", "=", ".", "@",
];

/// Keywords after which an expression, and so a regular expression, may start.
const EXPRESSION_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await", "extends",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Brace {
    Block,
    Template,
}

/// Tokenize a whole module. The last token is always [`TokenKind::Eof`].
pub fn tokenize(src: &str) -> Result<Vec<Token>, SyntaxError> {
    Lexer::new(src).tokenize()
}

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    newline_before: bool,
    regex_allowed: bool,
    braces: Vec<Brace>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            newline_before: false,
            regex_allowed: true,
            braces: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut tokens = Vec::new();
        if self.src.starts_with("#!") {
            self.skip_line();
        }

        loop {
            self.skip_trivia()?;
            let Some(c) = self.peek() else {
                tokens.push(self.token(TokenKind::Eof, self.pos));
                break;
            };
            let token = self.next_token(c)?;
            self.regex_allowed = regex_allowed_after(&token);
            tokens.push(token);
        }

        Ok(tokens)
    }

    fn next_token(&mut self, c: char) -> Result<Token, SyntaxError> {
        let start = self.pos;
        match c {
            '"' | '\'' => self.read_string(c),
            '`' => {
                self.bump();
                self.read_template(start, true)
            }
            '}' if self.braces.last() == Some(&Brace::Template) => {
                self.braces.pop();
                self.bump();
                self.read_template(start, false)
            }
            '#' => {
                self.bump();
                if !self.peek().is_some_and(is_id_start) {
                    return Err(self.error(start, "expected a private name after `#`"));
                }
                self.eat_while(is_id_continue);
                Ok(self.token(TokenKind::PrivateName, start))
            }
            c if c.is_ascii_digit() => self.read_number(),
            '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.read_number(),
            '/' if self.regex_allowed => self.read_regex(),
            c if is_id_start(c) => {
                self.eat_while(is_id_continue);
                Ok(self.token(TokenKind::Identifier, start))
            }
            _ => self.read_punct(),
        }
    }

    fn read_string(&mut self, quote: char) -> Result<Token, SyntaxError> {
        let start = self.pos;
        self.bump();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(self.error(start, "unterminated string literal"));
                }
                Some('\\') => {
                    self.bump();
                    self.bump();
                }
                Some(c) if c == quote => {
                    self.bump();
                    break;
                }
                Some(_) => self.bump(),
            }
        }
        Ok(self.token(TokenKind::String, start))
    }

    /// Continue a template after its opening `` ` `` or a closing `}`.
    fn read_template(&mut self, start: usize, head: bool) -> Result<Token, SyntaxError> {
        loop {
            match self.peek() {
                None => return Err(self.error(start, "unterminated template literal")),
                Some('`') => {
                    self.bump();
                    let kind = if head {
                        TokenKind::Template
                    } else {
                        TokenKind::TemplateTail
                    };
                    return Ok(self.token(kind, start));
                }
                Some('$') if self.peek_at(1) == Some('{') => {
                    self.bump();
                    self.bump();
                    self.braces.push(Brace::Template);
                    let kind = if head {
                        TokenKind::TemplateHead
                    } else {
                        TokenKind::TemplateMiddle
                    };
                    return Ok(self.token(kind, start));
                }
                Some('\\') => {
                    self.bump();
                    self.bump();
                }
                Some(_) => self.bump(),
            }
        }
    }

    fn read_number(&mut self) -> Result<Token, SyntaxError> {
        let start = self.pos;
        let radix_prefix = self.peek() == Some('0')
            && matches!(self.peek_at(1), Some('x' | 'X' | 'o' | 'O' | 'b' | 'B'));

        if radix_prefix {
            self.bump();
            self.bump();
            self.eat_while(|c| c.is_ascii_alphanumeric() || c == '_');
        } else {
            self.eat_while(|c| c.is_ascii_digit() || c == '_');
            if self.peek() == Some('.') {
                self.bump();
                self.eat_while(|c| c.is_ascii_digit() || c == '_');
            }
            if matches!(self.peek(), Some('e' | 'E')) {
                self.bump();
                if matches!(self.peek(), Some('+' | '-')) {
                    self.bump();
                }
                self.eat_while(|c| c.is_ascii_digit() || c == '_');
            }
        }

        let kind = if self.peek() == Some('n') {
            self.bump();
            TokenKind::BigInt
        } else {
            TokenKind::Number
        };
        if self.peek().is_some_and(is_id_start) {
            return Err(self.error(start, "identifier directly after number"));
        }
        Ok(self.token(kind, start))
    }

    fn read_regex(&mut self) -> Result<Token, SyntaxError> {
        let start = self.pos;
        self.bump();
        let mut in_class = false;
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(self.error(start, "unterminated regular expression"));
                }
                Some('\\') => {
                    self.bump();
                    self.bump();
                }
                Some('[') => {
                    in_class = true;
                    self.bump();
                }
                Some(']') => {
                    in_class = false;
                    self.bump();
                }
                Some('/') if !in_class => {
                    self.bump();
                    break;
                }
                Some(_) => self.bump(),
            }
        }
        self.eat_while(is_id_continue);
        Ok(self.token(TokenKind::Regex, start))
    }

    fn read_punct(&mut self) -> Result<Token, SyntaxError> {
        let start = self.pos;
        let rest = &self.src[self.pos..];
        let punct = PUNCTUATORS
            .iter()
            .find(|p| rest.starts_with(**p))
            // `a?.5:b` is a conditional, not optional chaining
            .filter(|p| {
                **p != "?." || !rest[2..].starts_with(|c: char| c.is_ascii_digit())
            })
            .copied()
            .or_else(|| rest.starts_with('?').then_some("?"));

        let Some(punct) = punct else {
            let c = self.peek().unwrap_or_default();
            return Err(self.error(start, format!("unexpected character `{c}`")));
        };

        self.pos += punct.len();
        match punct {
            "{" => self.braces.push(Brace::Block),
            "}" => {
                self.braces.pop();
            }
            _ => {}
        }
        Ok(self.token(TokenKind::Punct, start))
    }

    fn skip_trivia(&mut self) -> Result<(), SyntaxError> {
        while let Some(c) = self.peek() {
            match c {
                '\n' | '\r' | '\u{2028}' | '\u{2029}' => {
                    self.newline_before = true;
                    self.bump();
                }
                c if c.is_whitespace() || c == '\u{feff}' => self.bump(),
                '/' if self.peek_at(1) == Some('/') => self.skip_line(),
                '/' if self.peek_at(1) == Some('*') => {
                    let start = self.pos;
                    let Some(len) = self.src[self.pos + 2..].find("*/") else {
                        return Err(self.error(start, "unterminated comment"));
                    };
                    let end = self.pos + 2 + len + 2;
                    if self.src[self.pos..end].contains('\n') {
                        self.newline_before = true;
                    }
                    self.pos = end;
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn skip_line(&mut self) {
        self.eat_while(|c| c != '\n');
    }

    fn token(&mut self, kind: TokenKind, start: usize) -> Token {
        Token {
            kind,
            text: self.src[start..self.pos].to_string(),
            span: Span::new(start, self.pos),
            newline_before: std::mem::take(&mut self.newline_before),
        }
    }

    fn error(&self, start: usize, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, Span::new(start, self.pos.max(start)))
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn eat_while(&mut self, predicate: impl Fn(char) -> bool) {
        while self.peek().is_some_and(&predicate) {
            self.bump();
        }
    }
}

fn regex_allowed_after(token: &Token) -> bool {
    match token.kind {
        TokenKind::Identifier => EXPRESSION_KEYWORDS.contains(&token.text.as_str()),
        TokenKind::Punct => !matches!(token.text.as_str(), ")" | "]" | "++" | "--"),
        TokenKind::TemplateHead | TokenKind::TemplateMiddle | TokenKind::Eof => true,
        _ => false,
    }
}

pub fn is_id_start(c: char) -> bool {
    c == '$' || c == '_' || c.is_alphabetic()
}

pub fn is_id_continue(c: char) -> bool {
    is_id_start(c) || c.is_alphanumeric() || c == '\u{200c}' || c == '\u{200d}'
}

/// Decode the value of a string literal token, quotes included.
pub fn string_value(raw: &str) -> String {
    let inner = raw.get(1..raw.len().saturating_sub(1)).unwrap_or_default();
    let mut value = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            value.push(c);
            continue;
        }
        let Some(escaped) = chars.next() else { break };
        match escaped {
            'n' => value.push('\n'),
            't' => value.push('\t'),
            'r' => value.push('\r'),
            'b' => value.push('\u{8}'),
            'f' => value.push('\u{c}'),
            'v' => value.push('\u{b}'),
            '0' => value.push('\0'),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                push_code_point(&mut value, &hex);
            }
            'u' if chars.peek() == Some(&'{') => {
                chars.next();
                let hex: String = chars.by_ref().take_while(|c| *c != '}').collect();
                push_code_point(&mut value, &hex);
            }
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                push_code_point(&mut value, &hex);
            }
            // line continuation
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            '\n' | '\u{2028}' | '\u{2029}' => {}
            other => value.push(other),
        }
    }
    value
}

fn push_code_point(value: &mut String, hex: &str) {
    if let Some(c) = u32::from_str_radix(hex, 16).ok().and_then(char::from_u32) {
        value.push(c);
    }
}

/// Whether `name` is a valid JavaScript identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(is_id_start) && chars.all(is_id_continue)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<(TokenKind, String)> {
        tokenize(src)
            .unwrap()
            .into_iter()
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn punctuators_take_the_longest_match() {
        let tokens = kinds("a ??= b?.c >>>= 1");
        let texts: Vec<&str> = tokens.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["a", "??=", "b", "?.", "c", ">>>=", "1", ""]);
    }

    #[test]
    fn optional_chain_is_not_taken_before_a_digit() {
        let texts: Vec<String> = kinds("a?.5:b").into_iter().map(|(_, t)| t).collect();
        assert_eq!(texts, vec!["a", "?", ".5", ":", "b", ""]);
    }

    #[test]
    fn slash_is_division_after_an_operand() {
        let tokens = kinds("x = a / b / c");
        assert!(tokens.iter().all(|(kind, _)| *kind != TokenKind::Regex));

        let tokens = kinds("return /ab+c/gi.test(s)");
        assert_eq!(tokens[1], (TokenKind::Regex, "/ab+c/gi".to_string()));
    }

    #[test]
    fn regex_classes_may_contain_slashes() {
        let tokens = kinds("const re = /[/]+/;");
        assert_eq!(tokens[3], (TokenKind::Regex, "/[/]+/".to_string()));
    }

    #[test]
    fn templates_split_around_substitutions() {
        let tokens = kinds("`a${ {b: 1}.b }c${d}e`");
        let kinds: Vec<TokenKind> = tokens.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::TemplateHead,
                TokenKind::Punct,
                TokenKind::Identifier,
                TokenKind::Punct,
                TokenKind::Number,
                TokenKind::Punct,
                TokenKind::Punct,
                TokenKind::Identifier,
                TokenKind::TemplateMiddle,
                TokenKind::Identifier,
                TokenKind::TemplateTail,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn newlines_are_tracked_through_comments() {
        let tokens = tokenize("a /* x\n */ b // c\nd").unwrap();
        assert!(!tokens[0].newline_before);
        assert!(tokens[1].newline_before);
        assert!(tokens[2].newline_before);
    }

    #[test]
    fn numbers_in_every_radix() {
        let tokens = kinds("0xFF 0b1_0 1.5e-3 .25 10n");
        assert_eq!(tokens[0].0, TokenKind::Number);
        assert_eq!(tokens[1].1, "0b1_0");
        assert_eq!(tokens[2].1, "1.5e-3");
        assert_eq!(tokens[3].1, ".25");
        assert_eq!(tokens[4].0, TokenKind::BigInt);
    }

    #[test]
    fn string_values_are_unescaped() {
        assert_eq!(string_value(r#""use step""#), "use step");
        assert_eq!(string_value(r"'a\n\x41B\u{43}\'b'"), "a\nABC'b");
    }

    #[test]
    fn unterminated_literals_are_errors() {
        assert_eq!(
            tokenize("'abc").unwrap_err().message,
            "unterminated string literal"
        );
        assert!(tokenize("`abc${x}").is_err());
        assert!(tokenize("/* open").is_err());
    }

    #[test]
    fn hashbang_is_skipped() {
        let tokens = kinds("#!/usr/bin/env node\nfoo");
        assert_eq!(tokens[0], (TokenKind::Identifier, "foo".to_string()));
    }

    #[test]
    fn identifier_validity() {
        assert!(is_identifier("checkout$charge"));
        assert!(is_identifier("_anonymousStep0"));
        assert!(!is_identifier("my-key"));
        assert!(!is_identifier("1st"));
    }
}
