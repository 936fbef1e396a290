//! Interactive question/answer loop
//!
//! Two states: awaiting input and generating. A non-empty prompt is framed
//! as a single-turn chat exchange with the generation prompt appended, sent
//! through the backend, and the assistant portion of the decoded transcript
//! is printed. An empty line (or end of input) terminates the loop before
//! any generation happens.

use crate::chat::{ChatTemplate, Message, ResponseExtract};
use crate::infer::backend::{ChatBackend, GenerationConfig};
use crate::Result;
use std::io::{BufRead, Write};

/// Counters from a finished REPL session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplOutcome {
    /// Completed question/answer exchanges
    pub exchanges: usize,
}

/// Run the question/answer loop until an empty line or end of input.
///
/// # Errors
/// Propagates IO failures and backend generation errors.
pub fn run_repl<R, W, B>(
    input: &mut R,
    output: &mut W,
    backend: &mut B,
    template: &ChatTemplate,
    config: &GenerationConfig,
) -> Result<ReplOutcome>
where
    R: BufRead,
    W: Write,
    B: ChatBackend,
{
    let mut outcome = ReplOutcome::default();

    loop {
        write!(output, "What is your question: ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            break;
        }

        let prompt = template.render(&[Message::user(question)], true);
        let transcript = backend.generate(&prompt, config)?;

        match template.extract_response(&transcript) {
            ResponseExtract::Found(response) => writeln!(output, "{response}")?,
            ResponseExtract::MarkerMissing(raw) => {
                writeln!(output, "[no assistant marker in model output]")?;
                writeln!(output, "{}", raw.trim())?;
            }
        }
        outcome.exchanges += 1;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend that records calls and echoes a canned answer.
    struct CountingBackend {
        calls: usize,
        last_config: Option<GenerationConfig>,
        answer: Option<String>,
    }

    impl CountingBackend {
        fn answering(answer: &str) -> Self {
            Self {
                calls: 0,
                last_config: None,
                answer: Some(answer.to_string()),
            }
        }

        fn markerless() -> Self {
            Self {
                calls: 0,
                last_config: None,
                answer: None,
            }
        }
    }

    impl ChatBackend for CountingBackend {
        fn generate(&mut self, prompt: &str, config: &GenerationConfig) -> Result<String> {
            self.calls += 1;
            self.last_config = Some(config.clone());
            match &self.answer {
                Some(answer) => Ok(format!("{prompt}{answer}</s>")),
                None => Ok("decoded output with no role markers".to_string()),
            }
        }
    }

    fn run(input: &str, backend: &mut CountingBackend) -> (ReplOutcome, String) {
        let template = ChatTemplate::new("</s>");
        let config = GenerationConfig::default();
        let mut reader = input.as_bytes();
        let mut out = Vec::new();
        let outcome =
            run_repl(&mut reader, &mut out, backend, &template, &config).expect("repl");
        (outcome, String::from_utf8(out).expect("utf8"))
    }

    #[test]
    fn empty_input_terminates_without_generating() {
        let mut backend = CountingBackend::answering("unused");
        let (outcome, _) = run("\n", &mut backend);
        assert_eq!(backend.calls, 0);
        assert_eq!(outcome.exchanges, 0);
    }

    #[test]
    fn end_of_input_terminates_without_generating() {
        let mut backend = CountingBackend::answering("unused");
        let (outcome, _) = run("", &mut backend);
        assert_eq!(backend.calls, 0);
        assert_eq!(outcome.exchanges, 0);
    }

    #[test]
    fn question_generates_exactly_once_with_bounded_length() {
        let mut backend = CountingBackend::answering("A chronic condition.");
        let (outcome, printed) = run("What is diabetes?\n\n", &mut backend);

        assert_eq!(backend.calls, 1);
        assert_eq!(outcome.exchanges, 1);
        let config = backend.last_config.as_ref().expect("config recorded");
        assert_eq!(config.max_length, 150);
        assert_eq!(config.num_return_sequences, 1);
        assert!(printed.contains("A chronic condition."));
    }

    #[test]
    fn consecutive_questions_each_generate() {
        let mut backend = CountingBackend::answering("ok");
        let (outcome, _) = run("first?\nsecond?\n\n", &mut backend);
        assert_eq!(backend.calls, 2);
        assert_eq!(outcome.exchanges, 2);
    }

    #[test]
    fn missing_marker_degrades_to_raw_output() {
        let mut backend = CountingBackend::markerless();
        let (outcome, printed) = run("anything?\n\n", &mut backend);
        assert_eq!(outcome.exchanges, 1);
        assert!(printed.contains("no assistant marker"));
        assert!(printed.contains("decoded output with no role markers"));
    }

    #[test]
    fn whitespace_only_line_terminates() {
        let mut backend = CountingBackend::answering("unused");
        let (_, _) = run("   \n", &mut backend);
        assert_eq!(backend.calls, 0);
    }
}
