//! Lexer for Tilde source text
//!
//! Produces a flat token stream with source positions. The preprocessor
//! strips `#` directives before the text reaches this module, so the lexer
//! only sees declarations, statements, and expressions.

/// Lexical category of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Keyword,
    Identifier,
    IntLiteral,
    HexLiteral,
    StringLiteral,
    Punctuator,
    Operator,
}

/// A lexical unit with its source position (1-based line and column)
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, column: usize) -> Self {
        Token {
            kind,
            text: text.into(),
            line,
            column,
        }
    }

    /// Integer value of an IntLiteral or HexLiteral token
    pub fn int_value(&self) -> Result<i64, String> {
        match self.kind {
            TokenKind::IntLiteral => self
                .text
                .parse::<i64>()
                .map_err(|_| format!("Invalid integer literal '{}'", self.text)),
            TokenKind::HexLiteral => {
                i64::from_str_radix(self.text.trim_start_matches("0x").trim_start_matches("0X"), 16)
                    .map_err(|_| format!("Invalid hex literal '{}'", self.text))
            }
            _ => Err(format!("Token '{}' is not an integer literal", self.text)),
        }
    }
}

const KEYWORDS: &[&str] = &[
    "namespace",
    "using",
    "struct",
    "enum",
    "virtual",
    "override",
    "new",
    "delete",
    "return",
    "if",
    "else",
    "while",
    "const",
    "sizeof",
    "public",
    "private",
    "operator",
    "int",
    "char",
    "void",
    "this",
    "null",
];

struct Lexer<'s> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    source_name: &'s str,
}

/// Tokenize a source text, returning the token stream or a lexer error
/// with the offending position.
pub fn tokenize(source: &str, source_name: &str) -> Result<Vec<Token>, String> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
        source_name,
    };
    lexer.run()
}

impl<'s> Lexer<'s> {
    fn run(&mut self) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek() {
            if c == '\n' {
                self.advance();
                continue;
            }
            if c.is_whitespace() {
                self.advance();
                continue;
            }
            if c == '/' && self.peek_at(1) == Some('/') {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
                continue;
            }
            if c == '/' && self.peek_at(1) == Some('*') {
                self.skip_block_comment()?;
                continue;
            }
            tokens.push(self.next_token()?);
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token, String> {
        let (line, column) = (self.line, self.column);
        let c = self.peek().expect("next_token called at end of input");

        if c == '"' {
            return self.string_literal(line, column);
        }
        if c.is_ascii_digit() {
            return Ok(self.number(line, column));
        }
        if c.is_ascii_alphabetic() || c == '_' {
            return Ok(self.identifier(line, column));
        }
        self.operator_or_punctuator(line, column)
    }

    fn string_literal(&mut self, line: usize, column: usize) -> Result<Token, String> {
        self.advance(); // opening quote
        let mut text = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(format!(
                        "{}:{}:{}: unterminated string literal",
                        self.source_name, line, column
                    ));
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    let escaped = self.peek().ok_or_else(|| {
                        format!(
                            "{}:{}:{}: unterminated string literal",
                            self.source_name, line, column
                        )
                    })?;
                    text.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        '\\' => '\\',
                        '"' => '"',
                        other => {
                            return Err(format!(
                                "{}:{}:{}: unknown escape '\\{}'",
                                self.source_name, self.line, self.column, other
                            ));
                        }
                    });
                    self.advance();
                }
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
            }
        }
        Ok(Token::new(TokenKind::StringLiteral, text, line, column))
    }

    fn number(&mut self, line: usize, column: usize) -> Token {
        let mut text = String::new();
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            text.push(self.advance().unwrap());
            text.push(self.advance().unwrap());
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            return Token::new(TokenKind::HexLiteral, text, line, column);
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        Token::new(TokenKind::IntLiteral, text, line, column)
    }

    fn identifier(&mut self, line: usize, column: usize) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let kind = if KEYWORDS.contains(&text.as_str()) {
            TokenKind::Keyword
        } else {
            TokenKind::Identifier
        };
        Token::new(kind, text, line, column)
    }

    fn operator_or_punctuator(&mut self, line: usize, column: usize) -> Result<Token, String> {
        let c = self.peek().unwrap();
        let two: Option<String> = self.peek_at(1).map(|n| {
            let mut s = String::new();
            s.push(c);
            s.push(n);
            s
        });

        // Two-character operators first
        if let Some(pair) = two {
            if matches!(
                pair.as_str(),
                "::" | "->" | "==" | "!=" | "<=" | ">=" | "&&" | "||"
            ) {
                self.advance();
                self.advance();
                return Ok(Token::new(TokenKind::Operator, pair, line, column));
            }
        }

        let kind = match c {
            '(' | ')' | '{' | '}' | ',' | ';' | ':' | '~' => TokenKind::Punctuator,
            '+' | '-' | '*' | '/' | '%' | '<' | '>' | '=' | '!' | '&' | '.' => TokenKind::Operator,
            other => {
                return Err(format!(
                    "{}:{}:{}: unexpected character '{}'",
                    self.source_name, line, column, other
                ));
            }
        };
        self.advance();
        Ok(Token::new(kind, c.to_string(), line, column))
    }

    fn skip_block_comment(&mut self) -> Result<(), String> {
        let (line, column) = (self.line, self.column);
        self.advance(); // '/'
        self.advance(); // '*'
        loop {
            match self.peek() {
                None => {
                    return Err(format!(
                        "{}:{}:{}: unterminated block comment",
                        self.source_name, line, column
                    ));
                }
                Some('*') if self.peek_at(1) == Some('/') => {
                    self.advance();
                    self.advance();
                    return Ok(());
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if let Some(c) = c {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source, "test.td")
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_simple_function() {
        let tokens = tokenize("int main() { return 0; }", "test.td").unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["int", "main", "(", ")", "{", "return", "0", ";", "}"]
        );
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[6].kind, TokenKind::IntLiteral);
    }

    #[test]
    fn test_positions_are_one_based() {
        let tokens = tokenize("int x;\nint y;", "test.td").unwrap();
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (1, 5));
        assert_eq!((tokens[3].line, tokens[3].column), (2, 1));
    }

    #[test]
    fn test_two_char_operators() {
        assert_eq!(
            kinds("a :: b -> c == d"),
            vec![
                TokenKind::Identifier,
                TokenKind::Operator,
                TokenKind::Identifier,
                TokenKind::Operator,
                TokenKind::Identifier,
                TokenKind::Operator,
                TokenKind::Identifier,
            ]
        );
        let tokens = tokenize("x <= y >= z", "test.td").unwrap();
        assert_eq!(tokens[1].text, "<=");
        assert_eq!(tokens[3].text, ">=");
    }

    #[test]
    fn test_hex_literal() {
        let tokens = tokenize("0xFF 0x10", "test.td").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::HexLiteral);
        assert_eq!(tokens[0].int_value().unwrap(), 255);
        assert_eq!(tokens[1].int_value().unwrap(), 16);
    }

    #[test]
    fn test_string_escapes() {
        let tokens = tokenize(r#""a\nb\tc""#, "test.td").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].text, "a\nb\tc");
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("\"oops", "test.td").unwrap_err();
        assert!(err.contains("unterminated string"));
        assert!(err.contains("test.td:1:1"));
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = tokenize("int x; // trailing\n/* block\ncomment */ int y;", "test.td").unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["int", "x", ";", "int", "y", ";"]);
    }

    #[test]
    fn test_destructor_tokens() {
        let tokens = tokenize("~Handle()", "test.td").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Punctuator);
        assert_eq!(tokens[0].text, "~");
    }
}
