//! Token definitions

use logos::Logos;

/// Listing token
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r";[^\n]*")]
pub enum Token {
    #[token("\n")]
    Newline,

    // Directives
    #[token(".macro")]
    Macro,
    #[token(".end")]
    End,
    #[token(".local")]
    Local,
    #[token(".global")]
    Global,
    #[token(".iter")]
    Iter,
    #[token(".loop")]
    Loop,
    #[token(".endloop")]
    EndLoop,

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    IntLit(i64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    StringLit(String),

    /// Mnemonics, labels and symbol names, including `$`-prefixed ones
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    #[regex(r"\$[a-zA-Z0-9_]+", |lex| lex.slice().to_string())]
    Ident(String),

    #[token(":")]
    Colon,
}

/// Strip the quotes and process escape sequences; unknown escapes fail
fn unescape(s: &str) -> Option<String> {
    let inner = &s[1..s.len() - 1];
    let mut result = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next()? {
            'n' => result.push('\n'),
            't' => result.push('\t'),
            'r' => result.push('\r'),
            '0' => result.push('\0'),
            'e' => result.push('\x1b'),
            '\\' => result.push('\\'),
            '"' => result.push('"'),
            _ => return None,
        }
    }
    Some(result)
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Newline => write!(f, "end of line"),
            Token::Macro => write!(f, ".macro"),
            Token::End => write!(f, ".end"),
            Token::Local => write!(f, ".local"),
            Token::Global => write!(f, ".global"),
            Token::Iter => write!(f, ".iter"),
            Token::Loop => write!(f, ".loop"),
            Token::EndLoop => write!(f, ".endloop"),
            Token::IntLit(n) => write!(f, "{n}"),
            Token::StringLit(s) => write!(f, "{s:?}"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Colon => write!(f, ":"),
        }
    }
}
