use dialoguer::{Confirm, Input, Password, Select};

use crate::error::ForgeError;

/// The person at the console. Every decision the pipeline cannot make on
/// its own goes through here.
pub trait Operator {
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, ForgeError>;
    fn input(&mut self, prompt: &str, default: &str) -> Result<String, ForgeError>;
    fn secret(&mut self, prompt: &str) -> Result<String, ForgeError>;
    fn select(&mut self, prompt: &str, items: &[String], default: usize) -> Result<usize, ForgeError>;
    /// False when answers come from defaults rather than a person.
    fn is_interactive(&self) -> bool {
        true
    }
}

/// Arrow-key prompts on the controlling terminal.
#[derive(Debug, Default)]
pub struct Console;

impl Operator for Console {
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, ForgeError> {
        Ok(Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()?)
    }

    fn input(&mut self, prompt: &str, default: &str) -> Result<String, ForgeError> {
        Ok(Input::<String>::new()
            .with_prompt(prompt)
            .default(default.to_string())
            .allow_empty(true)
            .interact_text()?)
    }

    fn secret(&mut self, prompt: &str) -> Result<String, ForgeError> {
        Ok(Password::new().with_prompt(prompt).interact()?)
    }

    fn select(&mut self, prompt: &str, items: &[String], default: usize) -> Result<usize, ForgeError> {
        Ok(Select::new()
            .with_prompt(prompt)
            .items(items)
            .default(default)
            .interact()?)
    }
}

/// `--no-prompt`: every question takes its default, so destructive offers
/// (which default to no) are always declined.
#[derive(Debug, Default)]
pub struct Unattended;

impl Operator for Unattended {
    fn confirm(&mut self, _prompt: &str, default: bool) -> Result<bool, ForgeError> {
        Ok(default)
    }

    fn input(&mut self, _prompt: &str, default: &str) -> Result<String, ForgeError> {
        Ok(default.to_string())
    }

    fn secret(&mut self, _prompt: &str) -> Result<String, ForgeError> {
        Ok(String::new())
    }

    fn select(&mut self, _prompt: &str, _items: &[String], default: usize) -> Result<usize, ForgeError> {
        Ok(default)
    }

    fn is_interactive(&self) -> bool {
        false
    }
}
