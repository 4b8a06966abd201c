//! Short text notices sent to the chat.
//!
//! Every outbound plain-text message is one of the [`Notice`] kinds. Each kind
//! has a fixed prefix and a fixed sanitization rule so user-provided text
//! (track titles, queries) can never break formatting or ping anyone.

const ZERO_WIDTH_SPACE: char = '\u{200B}';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Search(String),
    Failure(String),
    /// Texto literal dentro de un bloque de código
    Escaped(String),
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self::Info(text.into())
    }

    pub fn search(text: impl Into<String>) -> Self {
        Self::Search(text.into())
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self::Failure(text.into())
    }

    pub fn escaped(text: impl Into<String>) -> Self {
        Self::Escaped(text.into())
    }

    pub fn render(&self) -> String {
        match self {
            Self::Info(text) => format!(":musical_note: | {}", sanitize(text)),
            Self::Search(text) => format!(":mag: | {}", sanitize(text)),
            Self::Failure(text) => format!(":no_entry_sign: | {}", sanitize(text)),
            Self::Escaped(text) => format!("```\n{}\n```", sanitize(text)),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// Inserta un espacio de ancho cero tras cada ` y cada @.
///
/// A backtick can then never close a code block, and user text such as a track
/// title can never become `@everyone` or a user mention.
fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        out.push(c);
        if c == '`' || c == '@' {
            out.push(ZERO_WIDTH_SPACE);
        }
    }
    out
}

/// Escapa markdown para mostrar títulos tal cual dentro de embeds.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '`' | '*' | '_' | '~' => {
                out.push('\\');
                out.push(c);
            }
            '@' => {
                out.push(c);
                out.push(ZERO_WIDTH_SPACE);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Reemplaza cualquier aparición del secreto antes de enviar texto.
pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, "[REDACTED]")
}
