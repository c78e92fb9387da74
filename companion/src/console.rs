//! Line input and status output.

use crate::render::write_styled;
use crate::theme::TextStyle;
use crossterm::{
    cursor::MoveTo,
    execute,
    style::{Attribute, Color, Stylize},
    terminal::{Clear, ClearType},
};
use std::io::{self, BufRead, Write};
use tokio::sync::mpsc;

/// What came back from a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Line(String),
    /// Ctrl+C at the prompt.
    Interrupted,
    /// Stdin reached end of file.
    Closed,
}

const PROMPT_STYLE: TextStyle = TextStyle::new(Color::Yellow, &[]);

/// Reads stdin on a dedicated thread so a prompt can be abandoned on Ctrl+C.
pub struct Console {
    lines: mpsc::Receiver<io::Result<String>>,
}

impl Console {
    pub fn new() -> Self {
        let (tx, lines) = mpsc::channel(16);
        std::thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
        Self { lines }
    }

    /// Show `prompt` and wait for a trimmed line.
    pub async fn read_line(&mut self, prompt: &str, style: TextStyle) -> io::Result<Input> {
        let mut out = io::stdout();
        write_styled(&mut out, prompt, style)?;
        out.flush()?;

        tokio::select! {
            biased;
            signal = tokio::signal::ctrl_c() => {
                signal?;
                println!();
                Ok(Input::Interrupted)
            }
            line = self.lines.recv() => match line {
                Some(line) => Ok(Input::Line(line?.trim().to_string())),
                None => Ok(Input::Closed),
            },
        }
    }

    /// Ask a yes/no question. Anything but `y` is a no.
    pub async fn confirm(&mut self, question: &str) -> io::Result<bool> {
        let prompt = format!("{question} (y/n): ");
        let answer = self
            .read_line(&prompt, TextStyle::new(Color::Red, &[]))
            .await?;
        Ok(matches!(answer, Input::Line(line) if line.eq_ignore_ascii_case("y")))
    }

    /// Ask for a number in `1..=max`. `None` when the user cancels.
    pub async fn read_choice(&mut self, prompt: &str, max: usize) -> io::Result<Option<usize>> {
        loop {
            match self.read_line(prompt, PROMPT_STYLE).await? {
                Input::Line(line) if line.is_empty() => continue,
                Input::Line(line) => match line.parse::<usize>() {
                    Ok(n) if (1..=max).contains(&n) => return Ok(Some(n - 1)),
                    Ok(_) => error("Invalid selection."),
                    Err(_) => error("Please enter a valid number."),
                },
                Input::Interrupted | Input::Closed => return Ok(None),
            }
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

pub fn clear_screen() -> io::Result<()> {
    execute!(io::stdout(), Clear(ClearType::All), Clear(ClearType::Purge), MoveTo(0, 0))
}

pub fn heading(text: &str) {
    println!("{}", text.yellow().bold());
}

pub fn notice(text: &str) {
    println!("{}", text.yellow());
}

pub fn success(text: &str) {
    println!("{}", text.green());
}

pub fn error(text: &str) {
    println!("{}", text.red());
}

pub fn item(text: &str) {
    println!("{}", text.cyan());
}

pub fn divider() {
    println!("{}", "-".repeat(30).grey().attribute(Attribute::Dim));
}
