//! Interactive input needed by the vault and the registry.
//!
//! The vault only consumes answers; [`TerminalPrompt`] gathers them from a
//! terminal, and tests substitute scripted answers.

use crate::models::Flavor;
use crate::{DbVaultError, Result};
use std::io::{BufRead, Write};

/// Source of interactive answers.
pub trait Prompt: Send {
    /// Picks one of the supported flavors.
    fn choose_flavor(&mut self) -> Result<Flavor>;

    /// Reads a free-text answer; `default` is returned for an empty answer.
    fn text(&mut self, label: &str, default: Option<&str>) -> Result<String>;

    /// Reads a masked answer.
    fn password(&mut self, label: &str) -> Result<String>;

    /// Asks a yes/no question.
    fn confirm(&mut self, message: &str) -> Result<bool>;
}

/// Prompt reading from stdin and writing questions to stderr.
///
/// Passwords are read without echo through `rpassword`.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    pub fn new() -> Self {
        Self
    }

    fn ask(&self, question: &str) -> Result<String> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{}: ", question)
            .and_then(|()| stderr.flush())
            .map_err(|e| DbVaultError::io("writing prompt", e))?;

        let mut line = String::new();
        let read = std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| DbVaultError::io("reading answer", e))?;
        if read == 0 {
            return Err(DbVaultError::configuration("Input closed before an answer was given"));
        }
        Ok(line.trim().to_string())
    }
}

impl Prompt for TerminalPrompt {
    fn choose_flavor(&mut self) -> Result<Flavor> {
        let choices: Vec<&str> = Flavor::ALL.iter().map(|f| f.as_str()).collect();
        let question = format!("Database flavor ({})", choices.join(", "));
        loop {
            match self.ask(&question)?.parse::<Flavor>() {
                Ok(flavor) => return Ok(flavor),
                Err(e) => eprintln!("Error: {}", e),
            }
        }
    }

    fn text(&mut self, label: &str, default: Option<&str>) -> Result<String> {
        loop {
            let question = match default {
                Some(d) if !d.is_empty() => format!("{} [{}]", label, d),
                _ => label.to_string(),
            };
            let answer = self.ask(&question)?;
            match (answer.is_empty(), default) {
                (true, Some(d)) => return Ok(d.to_string()),
                (true, None) => eprintln!("Error: a value is required"),
                (false, _) => return Ok(answer),
            }
        }
    }

    fn password(&mut self, label: &str) -> Result<String> {
        rpassword::prompt_password(format!("{}: ", label))
            .map_err(|e| DbVaultError::io("reading password", e))
    }

    fn confirm(&mut self, message: &str) -> Result<bool> {
        loop {
            match self.ask(&format!("{} [y/N]", message))?.to_ascii_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "" | "n" | "no" => return Ok(false),
                _ => eprintln!("Error: invalid input"),
            }
        }
    }
}

/// Answers queued in advance, consumed in order.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ScriptedPrompt {
    pub(crate) flavors: std::collections::VecDeque<Flavor>,
    pub(crate) answers: std::collections::VecDeque<String>,
    pub(crate) confirmations: std::collections::VecDeque<bool>,
    pub(crate) asked: Vec<String>,
}

#[cfg(test)]
impl ScriptedPrompt {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn flavor(mut self, flavor: Flavor) -> Self {
        self.flavors.push_back(flavor);
        self
    }

    pub(crate) fn answer(mut self, answer: &str) -> Self {
        self.answers.push_back(answer.to_string());
        self
    }

    pub(crate) fn confirm_with(mut self, yes: bool) -> Self {
        self.confirmations.push_back(yes);
        self
    }

    fn exhausted(what: &str) -> DbVaultError {
        DbVaultError::configuration(format!("scripted prompt ran out of {}", what))
    }
}

#[cfg(test)]
impl Prompt for ScriptedPrompt {
    fn choose_flavor(&mut self) -> Result<Flavor> {
        self.asked.push("flavor".to_string());
        self.flavors.pop_front().ok_or_else(|| Self::exhausted("flavors"))
    }

    fn text(&mut self, label: &str, default: Option<&str>) -> Result<String> {
        self.asked.push(label.to_string());
        let answer = self.answers.pop_front().ok_or_else(|| Self::exhausted("answers"))?;
        match (answer.is_empty(), default) {
            (true, Some(d)) => Ok(d.to_string()),
            _ => Ok(answer),
        }
    }

    fn password(&mut self, label: &str) -> Result<String> {
        self.asked.push(label.to_string());
        self.answers.pop_front().ok_or_else(|| Self::exhausted("answers"))
    }

    fn confirm(&mut self, message: &str) -> Result<bool> {
        self.asked.push(message.to_string());
        self.confirmations
            .pop_front()
            .ok_or_else(|| Self::exhausted("confirmations"))
    }
}
