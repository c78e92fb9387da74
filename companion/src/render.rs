//! Narration-aware reply rendering.
//!
//! Text between narration symbols is drawn in the narration style; the
//! symbols themselves are not printed.

use crate::theme::{CharacterTheme, TextStyle};
use crossterm::{
    cursor::MoveLeft,
    queue,
    style::{Attribute, Print, ResetColor, SetAttribute, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use std::io::{self, Write};

/// Placeholder shown until the first fragment of a reply arrives.
pub const THINKING: &str = "thinking...";

/// Write `text` in `style`, then reset.
pub fn write_styled<W: Write>(out: &mut W, text: &str, style: TextStyle) -> io::Result<()> {
    queue!(out, SetForegroundColor(style.color))?;
    for attribute in style.attributes {
        queue!(out, SetAttribute(*attribute))?;
    }
    queue!(out, Print(text), SetAttribute(Attribute::Reset), ResetColor)
}

/// Streams one reply to the terminal.
pub struct ReplyPainter<W: Write> {
    out: W,
    theme: CharacterTheme,
    symbol: char,
    narrating: bool,
    placeholder: usize,
}

impl<W: Write> ReplyPainter<W> {
    pub fn new(out: W, theme: CharacterTheme, symbol: char) -> Self {
        Self {
            out,
            theme,
            symbol,
            narrating: false,
            placeholder: 0,
        }
    }

    /// Print the thinking placeholder; it is erased by the first write.
    pub fn show_placeholder(&mut self) -> io::Result<()> {
        write_styled(
            &mut self.out,
            THINKING,
            TextStyle::new(crossterm::style::Color::Reset, &[Attribute::Dim]),
        )?;
        self.placeholder = THINKING.chars().count();
        self.out.flush()
    }

    pub fn write(&mut self, text: &str) -> io::Result<()> {
        self.clear_placeholder()?;

        let mut run = String::new();
        for c in text.chars() {
            if c == self.symbol {
                self.flush_run(&mut run)?;
                self.narrating = !self.narrating;
            } else {
                run.push(c);
            }
        }
        self.flush_run(&mut run)?;
        self.out.flush()
    }

    /// End the reply line and hand back the writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.clear_placeholder()?;
        queue!(self.out, SetAttribute(Attribute::Reset), ResetColor, Print("\n"))?;
        self.out.flush()?;
        Ok(self.out)
    }

    fn clear_placeholder(&mut self) -> io::Result<()> {
        if self.placeholder > 0 {
            let width = u16::try_from(self.placeholder).unwrap_or(u16::MAX);
            queue!(self.out, MoveLeft(width), Clear(ClearType::UntilNewLine))?;
            self.placeholder = 0;
        }
        Ok(())
    }

    fn flush_run(&mut self, run: &mut String) -> io::Result<()> {
        if run.is_empty() {
            return Ok(());
        }
        let style = if self.narrating {
            self.theme.narration
        } else {
            self.theme.speech
        };
        write_styled(&mut self.out, run, style)?;
        run.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(bytes: &[u8]) -> String {
        // Drop CSI escape sequences.
        let text = String::from_utf8_lossy(bytes);
        let mut out = String::new();
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\u{1b}' {
                if chars.peek() == Some(&'[') {
                    chars.next();
                    for c in chars.by_ref() {
                        if c.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
                continue;
            }
            out.push(c);
        }
        out
    }

    #[test]
    fn test_symbols_hidden_and_state_tracked() {
        let mut painter = ReplyPainter::new(Vec::new(), CharacterTheme::default(), '*');
        painter.write("Hi *wav").unwrap();
        assert!(painter.narrating);
        painter.write("es* ok").unwrap();
        assert!(!painter.narrating);

        let out = painter.finish().unwrap();
        assert_eq!(plain(&out), "Hi waves ok\n");
    }

    #[test]
    fn test_placeholder_erased_on_first_write() {
        let mut painter = ReplyPainter::new(Vec::new(), CharacterTheme::default(), '*');
        painter.show_placeholder().unwrap();
        painter.write("Hello").unwrap();
        painter.write(" again").unwrap();

        let out = painter.finish().unwrap();
        let text = String::from_utf8_lossy(&out);
        assert_eq!(text.matches("\u{1b}[11D").count(), 1);
        assert!(plain(&out).ends_with("Hello again\n"));
    }

    #[test]
    fn test_custom_symbol() {
        let mut painter = ReplyPainter::new(Vec::new(), CharacterTheme::default(), '~');
        painter.write("a ~b~ *c*").unwrap();
        let out = painter.finish().unwrap();
        assert_eq!(plain(&out), "a b *c*\n");
    }
}
