#![deny(elided_lifetimes_in_paths)]
#![deny(unreachable_pub)]

//! Output-safety helpers shared by the `stencil` engine: escaping of
//! rendered values, tag stripping and inter-tag whitespace collapsing.

use std::borrow::Cow;
use std::fmt::{self, Display, Formatter, Write};

/// Writes `string` with all characters the escaper considers dangerous
/// replaced by a safe spelling.
pub trait Escaper {
    fn write_escaped<W>(&self, fmt: W, string: &str) -> fmt::Result
    where
        W: Write;
}

/// Escapes the five HTML-significant characters.
pub struct Html;

impl Escaper for Html {
    fn write_escaped<W>(&self, mut fmt: W, string: &str) -> fmt::Result
    where
        W: Write,
    {
        let mut last = 0;
        for (index, byte) in string.bytes().enumerate() {
            let escaped = match byte {
                b'<' => Some("&lt;"),
                b'>' => Some("&gt;"),
                b'&' => Some("&amp;"),
                b'"' => Some("&quot;"),
                b'\'' => Some("&#x27;"),
                _ => None,
            };
            if let Some(escaped) = escaped {
                fmt.write_str(&string[last..index])?;
                fmt.write_str(escaped)?;
                last = index + 1;
            }
        }
        fmt.write_str(&string[last..])
    }
}

/// Pass-through escaper for non-markup output.
pub struct Text;

impl Escaper for Text {
    fn write_escaped<W>(&self, mut fmt: W, string: &str) -> fmt::Result
    where
        W: Write,
    {
        fmt.write_str(string)
    }
}

pub fn escape<E>(string: &str, escaper: E) -> Escaped<'_, E>
where
    E: Escaper,
{
    Escaped { string, escaper }
}

#[derive(Debug)]
pub struct Escaped<'a, E>
where
    E: Escaper,
{
    string: &'a str,
    escaper: E,
}

impl<E> Display for Escaped<'_, E>
where
    E: Escaper,
{
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        self.escaper.write_escaped(fmt, self.string)
    }
}

/// HTML-escapes `string`, borrowing it unchanged when nothing needs
/// replacing.
pub fn escape_html(string: &str) -> Cow<'_, str> {
    if !string
        .bytes()
        .any(|b| matches!(b, b'<' | b'>' | b'&' | b'"' | b'\''))
    {
        return Cow::Borrowed(string);
    }
    let mut out = String::with_capacity(string.len() + string.len() / 8);
    // Infallible: writing into a String cannot fail.
    let _ = Html.write_escaped(&mut out, string);
    Cow::Owned(out)
}

/// Removes everything between `<` and the matching `>`, leaving the text
/// content. An unterminated `<` swallows the rest of the input, matching
/// the behavior expected from a sanitizing strip.
pub fn strip_tags(string: &str) -> String {
    let mut out = String::with_capacity(string.len());
    let mut in_tag = false;
    for c in string.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Collapses whitespace that sits strictly between a closing `>` and the
/// next opening `<`. Whitespace adjacent to inline text is preserved.
pub fn collapse_between_tags(string: &str) -> String {
    let bytes = string.as_bytes();
    let mut out = String::with_capacity(string.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'>' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'<' && j > i + 1 {
                out.push('>');
                i = j;
                continue;
            }
        }
        // Multi-byte characters are copied from the source slice so the
        // output stays valid UTF-8.
        let ch_len = utf8_len(c);
        out.push_str(&string[i..i + ch_len]);
        i += ch_len;
    }
    out
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b < 0xe0 => 2,
        b if b < 0xf0 => 3,
        _ => 4,
    }
}
