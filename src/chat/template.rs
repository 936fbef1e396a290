//! Chat template rendering and response extraction
//!
//! The template is an explicit value handed to whatever needs it (dataset
//! templating, the inference loop) rather than state mutated on a shared
//! tokenizer. Rendering is a pure function of the message list.

use serde::{Deserialize, Serialize};

/// Speaker role of a single chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Conversation-level instructions, rendered verbatim
    System,
    /// Human turn
    User,
    /// Model turn
    Assistant,
}

/// A single role/content turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Speaker role
    pub role: Role,
    /// Turn text
    pub content: String,
}

impl Message {
    /// Convenience constructor for a user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Convenience constructor for an assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Convenience constructor for a system turn
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Outcome of extracting an assistant response from generated text
///
/// `MarkerMissing` carries the full decoded text so callers can decide how
/// to degrade instead of indexing into a failed split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseExtract<'a> {
    /// Text following the final assistant marker
    Found(&'a str),
    /// No assistant marker present in the decoded text
    MarkerMissing(&'a str),
}

impl<'a> ResponseExtract<'a> {
    /// The extracted response if the marker was found
    #[must_use]
    pub fn found(&self) -> Option<&'a str> {
        match self {
            Self::Found(s) => Some(s),
            Self::MarkerMissing(_) => None,
        }
    }
}

/// Human/Assistant chat template without special role tokens
///
/// Renders a message list into a single flat transcript:
///
/// ```text
/// {system content}
///
/// Human: {user content}{eos}
///
/// Assistant: {assistant content}{eos}
/// ```
///
/// With a generation prompt, the transcript ends in a bare `\n\nAssistant: `
/// so the model continues in the assistant voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTemplate {
    /// End-of-turn token text appended after user and assistant turns
    eos: String,
    /// Marker opening a user turn
    user_prefix: String,
    /// Marker opening an assistant turn
    assistant_prefix: String,
}

impl Default for ChatTemplate {
    fn default() -> Self {
        Self::new("</s>")
    }
}

impl ChatTemplate {
    /// Template using the given end-of-turn token text
    pub fn new(eos: impl Into<String>) -> Self {
        Self {
            eos: eos.into(),
            user_prefix: "\n\nHuman: ".to_string(),
            assistant_prefix: "\n\nAssistant: ".to_string(),
        }
    }

    /// End-of-turn token text
    #[must_use]
    pub fn eos(&self) -> &str {
        &self.eos
    }

    /// Marker opening an assistant turn
    #[must_use]
    pub fn assistant_prefix(&self) -> &str {
        &self.assistant_prefix
    }

    /// Render messages into a flat transcript.
    ///
    /// With `add_generation_prompt`, a trailing assistant marker is appended
    /// so generation continues as the assistant.
    #[must_use]
    pub fn render(&self, messages: &[Message], add_generation_prompt: bool) -> String {
        let mut out = String::new();
        for message in messages {
            match message.role {
                Role::System => out.push_str(&message.content),
                Role::User => {
                    out.push_str(&self.user_prefix);
                    out.push_str(&message.content);
                    out.push_str(&self.eos);
                }
                Role::Assistant => {
                    out.push_str(&self.assistant_prefix);
                    out.push_str(&message.content);
                    out.push_str(&self.eos);
                }
            }
        }
        if add_generation_prompt {
            out.push_str(&self.assistant_prefix);
        }
        out
    }

    /// Extract the text following the final assistant marker.
    ///
    /// Trailing end-of-turn text and surrounding whitespace are stripped from
    /// a found response.
    #[must_use]
    pub fn extract_response<'a>(&self, transcript: &'a str) -> ResponseExtract<'a> {
        match transcript.rfind(&self.assistant_prefix) {
            Some(idx) => {
                let mut response = &transcript[idx + self.assistant_prefix.len()..];
                if let Some(stripped) = response.strip_suffix(&self.eos) {
                    response = stripped;
                }
                ResponseExtract::Found(response.trim())
            }
            None => ResponseExtract::MarkerMissing(transcript),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> ChatTemplate {
        ChatTemplate::new("</s>")
    }

    #[test]
    fn renders_system_verbatim() {
        let rendered = template().render(&[Message::system("You are a doctor.")], false);
        assert_eq!(rendered, "You are a doctor.");
    }

    #[test]
    fn renders_full_exchange() {
        let messages = [
            Message::user("What is diabetes?"),
            Message::assistant("A chronic condition."),
        ];
        let rendered = template().render(&messages, false);
        assert_eq!(
            rendered,
            "\n\nHuman: What is diabetes?</s>\n\nAssistant: A chronic condition.</s>"
        );
    }

    #[test]
    fn generation_prompt_appends_assistant_marker() {
        let rendered = template().render(&[Message::user("hi")], true);
        assert!(rendered.ends_with("\n\nAssistant: "));
    }

    #[test]
    fn extract_finds_last_assistant_turn() {
        let tpl = template();
        let transcript = tpl.render(
            &[
                Message::user("q1"),
                Message::assistant("a1"),
                Message::user("q2"),
                Message::assistant("a2"),
            ],
            false,
        );
        assert_eq!(tpl.extract_response(&transcript), ResponseExtract::Found("a2"));
    }

    #[test]
    fn extract_inverts_generation_prompt_framing() {
        let tpl = template();
        let prompt = tpl.render(&[Message::user("What is diabetes?")], true);
        let completion = format!("{prompt}A chronic condition.</s>");
        assert_eq!(
            tpl.extract_response(&completion),
            ResponseExtract::Found("A chronic condition.")
        );
    }

    #[test]
    fn extract_reports_missing_marker() {
        let tpl = template();
        let extract = tpl.extract_response("no markers here");
        assert_eq!(extract, ResponseExtract::MarkerMissing("no markers here"));
        assert!(extract.found().is_none());
    }

    #[test]
    fn render_is_deterministic() {
        let messages = [Message::user("same input")];
        let a = template().render(&messages, true);
        let b = template().render(&messages, true);
        assert_eq!(a, b);
    }
}
