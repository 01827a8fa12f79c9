// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian control file primitives.

See <https://www.debian.org/doc/debian-policy/ch-controlfields.html>
for how control files are structured.

`Packages` and `Release` files are control files. They are produced here, never
consumed from the outside, so the types are geared towards assembling and
serializing paragraphs. [ControlFile::parse_str()] exists to read produced
content back.
*/

use {
    crate::error::{RepositoryError, Result},
    std::{borrow::Cow, io::Write},
};

/// A field in a control paragraph.
///
/// The value is held as lines. The first line is the text following the colon
/// and may be empty, as is customary for multiline fields like `SHA256`.
/// Continuation lines are stored without their leading space.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ControlField<'a> {
    name: Cow<'a, str>,
    lines: Vec<Cow<'a, str>>,
}

impl<'a> ControlField<'a> {
    /// Construct a single line field.
    pub fn new(name: Cow<'a, str>, value: Cow<'a, str>) -> Self {
        Self {
            name,
            lines: vec![value],
        }
    }

    /// Construct a multiline field from its lines.
    pub fn from_lines(name: Cow<'a, str>, lines: impl Iterator<Item = String>) -> Self {
        let mut lines = lines.map(Cow::Owned).collect::<Vec<_>>();
        if lines.is_empty() {
            lines.push(Cow::Borrowed(""));
        }

        Self { name, lines }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The text on the same line as the field name.
    pub fn first_line(&self) -> &str {
        self.lines.first().map(|l| &**l).unwrap_or_default()
    }

    /// Iterate over every line of the value, the first line included.
    pub fn iter_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(|l| &**l)
    }

    fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Serialize the field, including the terminating newline.
    pub fn write(&self, writer: &mut impl Write) -> std::io::Result<()> {
        write!(writer, "{}:", self.name)?;

        let first = self.first_line();
        if !first.is_empty() {
            write!(writer, " {}", first)?;
        }
        writeln!(writer)?;

        for line in self.lines.iter().skip(1) {
            writeln!(writer, " {}", line)?;
        }

        Ok(())
    }
}

/// An ordered series of fields.
///
/// Field names are matched case insensitively and stored as given.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ControlParagraph<'a> {
    fields: Vec<ControlField<'a>>,
}

impl<'a> ControlParagraph<'a> {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Set a field.
    ///
    /// An existing field of the same name is removed and the new one is appended.
    pub fn set_field(&mut self, field: ControlField<'a>) {
        self.fields.retain(|f| !f.is_named(&field.name));
        self.fields.push(field);
    }

    /// Set a single line field.
    pub fn set_field_from_string(&mut self, name: Cow<'a, str>, value: Cow<'a, str>) {
        self.set_field(ControlField::new(name, value));
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Iterate over fields in insertion order.
    pub fn iter_fields(&self) -> impl Iterator<Item = &ControlField<'a>> {
        self.fields.iter()
    }

    pub fn field(&self, name: &str) -> Option<&ControlField<'a>> {
        self.fields.iter().find(|f| f.is_named(name))
    }

    /// The first line of the value of the named field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.first_line())
    }

    /// Serialize all fields. No blank line is written after the last field.
    pub fn write(&self, writer: &mut impl Write) -> std::io::Result<()> {
        self.fields.iter().try_for_each(|f| f.write(writer))
    }
}

impl<'a> std::fmt::Display for ControlParagraph<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buf = vec![];
        self.write(&mut buf).map_err(|_| std::fmt::Error)?;
        f.write_str(&String::from_utf8_lossy(&buf))
    }
}

/// A series of paragraphs separated by blank lines.
#[derive(Clone, Debug, Default)]
pub struct ControlFile<'a> {
    paragraphs: Vec<ControlParagraph<'a>>,
}

impl<'a> ControlFile<'a> {
    pub fn add_paragraph(&mut self, p: ControlParagraph<'a>) {
        self.paragraphs.push(p);
    }

    pub fn paragraphs(&self) -> impl Iterator<Item = &ControlParagraph<'a>> {
        self.paragraphs.iter()
    }

    pub fn write(&self, writer: &mut impl Write) -> std::io::Result<()> {
        for (i, p) in self.paragraphs.iter().enumerate() {
            if i > 0 {
                writeln!(writer)?;
            }
            p.write(writer)?;
        }

        Ok(())
    }
}

impl ControlFile<'static> {
    /// Parse control file text.
    ///
    /// Lines starting with a space or tab continue the preceding field. Any other
    /// non-blank line must contain a colon.
    pub fn parse_str(s: &str) -> Result<Self> {
        let mut cf = Self::default();
        let mut paragraph = ControlParagraph::default();
        let mut pending: Option<ControlField<'static>> = None;

        for line in s.lines() {
            if line.trim().is_empty() {
                if let Some(field) = pending.take() {
                    paragraph.set_field(field);
                }
                if !paragraph.is_empty() {
                    cf.add_paragraph(std::mem::take(&mut paragraph));
                }
            } else if line.starts_with(' ') || line.starts_with('\t') {
                let field = pending.as_mut().ok_or_else(|| {
                    RepositoryError::Other(format!("continuation line without field: '{}'", line))
                })?;
                field.lines.push(Cow::Owned(line.trim_start().to_string()));
            } else {
                let (name, value) = line.split_once(':').ok_or_else(|| {
                    RepositoryError::Other(format!("control line without colon: '{}'", line))
                })?;

                if let Some(field) = pending.replace(ControlField::new(
                    Cow::Owned(name.to_string()),
                    Cow::Owned(value.trim().to_string()),
                )) {
                    paragraph.set_field(field);
                }
            }
        }

        if let Some(field) = pending {
            paragraph.set_field(field);
        }
        if !paragraph.is_empty() {
            cf.add_paragraph(paragraph);
        }

        Ok(cf)
    }
}
