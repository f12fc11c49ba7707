use std::io::{self, BufRead, Write};

use anyhow::{Result, bail};

/// Source of interactive answers.
pub trait Prompt {
    /// Shows `message` and returns the trimmed answer.
    fn ask(&mut self, message: &str) -> Result<String>;
}

/// Prompts on stdout and reads answers from stdin.
pub struct Terminal;

impl Prompt for Terminal {
    fn ask(&mut self, message: &str) -> Result<String> {
        print!("{message}");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().lock().read_line(&mut input)? == 0 {
            bail!("stdin closed while waiting for input");
        }

        Ok(input.trim().to_string())
    }
}

/// Asks for a device serial until a non-empty one is given.
pub fn device_serial(prompt: &mut impl Prompt, profile: &str) -> Result<String> {
    loop {
        let serial = prompt.ask(&format!("2FA device serial number for profile '{profile}': "))?;
        if !serial.is_empty() {
            return Ok(serial);
        }
    }
}

/// Asks for a one-time code until exactly six characters are given.
pub fn token_code(prompt: &mut impl Prompt) -> Result<String> {
    loop {
        let code = prompt.ask("2FA code: ")?;
        if code.chars().count() == 6 {
            return Ok(code);
        }
    }
}
