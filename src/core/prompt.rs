//! Operator input, abstracted so interactive stages run against scripted answers.

use crate::error::{Error, Result};

pub trait Prompter {
    /// Ask a question and return the trimmed answer.
    fn ask(&mut self, question: &str) -> Result<String>;

    /// Show a notice (e.g. why an answer was rejected).
    fn notify(&mut self, message: &str);
}

/// Ask with a displayed default; an empty answer keeps the default.
pub fn ask_with_default(prompter: &mut dyn Prompter, label: &str, default: &str) -> Result<String> {
    let question = if default.is_empty() {
        format!("{} [auto]: ", label)
    } else {
        format!("{} [{}]: ", label, default)
    };
    let answer = prompter.ask(&question)?;
    if answer.trim().is_empty() {
        Ok(default.to_string())
    } else {
        Ok(answer.trim().to_string())
    }
}

/// Yes/no question; anything other than y/yes is "no".
pub fn confirm(prompter: &mut dyn Prompter, question: &str) -> Result<bool> {
    let answer = prompter.ask(&format!("{} [y/N]: ", question))?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Prompter for non-interactive runs: every question is an error.
#[derive(Debug, Default)]
pub struct NoPrompt;

impl Prompter for NoPrompt {
    fn ask(&mut self, question: &str) -> Result<String> {
        Err(Error::validation_missing_argument(vec![question
            .trim_end_matches([':', ' '])
            .to_string()])
        .with_hint("Provide the value as a flag, or run interactively without --yes"))
    }

    fn notify(&mut self, message: &str) {
        log_status!("input", "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Answers(VecDeque<&'static str>, Vec<String>);

    impl Prompter for Answers {
        fn ask(&mut self, question: &str) -> Result<String> {
            self.1.push(question.to_string());
            Ok(self.0.pop_front().unwrap_or_default().to_string())
        }
        fn notify(&mut self, _message: &str) {}
    }

    #[test]
    fn empty_answer_keeps_default() {
        let mut p = Answers(VecDeque::from([""]), Vec::new());
        assert_eq!(ask_with_default(&mut p, "Port", "8000").unwrap(), "8000");
        assert_eq!(p.1[0], "Port [8000]: ");
    }

    #[test]
    fn answer_overrides_default() {
        let mut p = Answers(VecDeque::from(["  9000 "]), Vec::new());
        assert_eq!(ask_with_default(&mut p, "Port", "8000").unwrap(), "9000");
    }

    #[test]
    fn confirm_accepts_only_yes() {
        let mut p = Answers(VecDeque::from(["Y", "no", ""]), Vec::new());
        assert!(confirm(&mut p, "Replace?").unwrap());
        assert!(!confirm(&mut p, "Replace?").unwrap());
        assert!(!confirm(&mut p, "Replace?").unwrap());
    }

    #[test]
    fn no_prompt_refuses() {
        let err = NoPrompt.ask("Model id: ").unwrap_err();
        assert_eq!(err.code.as_str(), "validation.missing_argument");
        assert_eq!(err.details["args"][0], "Model id");
    }
}
