//! Error types and reporting for program construction

use crate::span::Span;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, AsmError>;

/// Error raised while building or assembling a program
#[derive(Debug, Error)]
pub enum AsmError {
    #[error("Lexer error at {span:?}: {message}")]
    Lexer { message: String, span: Span },

    #[error("Syntax error at {span:?}: {message}")]
    Syntax { message: String, span: Span },

    #[error("undefined label: {name}")]
    UndefinedLabel { name: String, span: Span },

    /// Emission buffer full
    #[error("macro too large")]
    ProgramTooLarge { capacity: usize },

    #[error("break or continue outside of a loop")]
    NotInLoop,

    #[error("IO error: {message}")]
    Io { message: String },
}

impl AsmError {
    pub fn lexer(message: impl Into<String>, span: Span) -> Self {
        Self::Lexer {
            message: message.into(),
            span,
        }
    }

    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self::Syntax {
            message: message.into(),
            span,
        }
    }

    pub fn undefined_label(name: impl Into<String>, span: Span) -> Self {
        Self::UndefinedLabel {
            name: name.into(),
            span,
        }
    }

    pub fn io_error(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            Self::Lexer { span, .. } | Self::Syntax { span, .. } | Self::UndefinedLabel { span, .. } => {
                Some(*span)
            }
            Self::ProgramTooLarge { .. } | Self::NotInLoop | Self::Io { .. } => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Lexer { message, .. } | Self::Syntax { message, .. } | Self::Io { message } => {
                message.clone()
            }
            other => other.to_string(),
        }
    }
}

/// Report error with ariadne
pub fn report_error(filename: &str, source: &str, error: &AsmError) {
    use ariadne::{Color, Label, Report, ReportKind, Source};

    let kind = match error {
        AsmError::Lexer { .. } => "Lexer",
        AsmError::Syntax { .. } => "Syntax",
        AsmError::UndefinedLabel { .. } => "Label",
        AsmError::ProgramTooLarge { .. } | AsmError::NotInLoop => "Assembly",
        AsmError::Io { .. } => "IO",
    };

    let report = match error.span() {
        Some(span) => Report::build(ReportKind::Error, (filename, span.start..span.end))
            .with_message(format!("{kind} error"))
            .with_label(
                Label::new((filename, span.start..span.end))
                    .with_message(error.message())
                    .with_color(Color::Red),
            )
            .finish(),
        None => Report::build(ReportKind::Error, (filename, 0..0))
            .with_message(format!("{kind} error: {}", error.message()))
            .finish(),
    };
    if report.eprint((filename, Source::from(source))).is_err() {
        eprintln!("{kind} error: {}", error.message());
    }
}
