// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `Release` file rendering. */

use {
    crate::{
        control::{ControlField, ControlParagraph},
        io::{digest_data, MultiContentDigest},
    },
    chrono::{DateTime, Utc},
    std::{
        borrow::Cow,
        collections::{BTreeMap, BTreeSet},
    },
};

/// Formatter string for dates in `Release` files.
///
/// Always applied to UTC values, yielding a `+0000` offset.
pub const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Builds the content of a `Release` file.
#[derive(Clone, Debug, Default)]
pub struct ReleaseBuilder {
    origin: Option<String>,
    label: Option<String>,
    suite: Option<String>,
    codename: Option<String>,
    components: BTreeSet<String>,
    architectures: BTreeSet<String>,
    date: Option<DateTime<Utc>>,
    description: Option<String>,
    indices: BTreeMap<String, (u64, MultiContentDigest)>,
}

impl ReleaseBuilder {
    pub fn set_origin(&mut self, value: impl ToString) {
        self.origin = Some(value.to_string());
    }

    pub fn set_label(&mut self, value: impl ToString) {
        self.label = Some(value.to_string());
    }

    pub fn set_suite(&mut self, value: impl ToString) {
        self.suite = Some(value.to_string());
    }

    pub fn set_codename(&mut self, value: impl ToString) {
        self.codename = Some(value.to_string());
    }

    pub fn set_description(&mut self, value: impl ToString) {
        self.description = Some(value.to_string());
    }

    pub fn set_date(&mut self, value: DateTime<Utc>) {
        self.date = Some(value);
    }

    pub fn add_component(&mut self, value: impl ToString) {
        self.components.insert(value.to_string());
    }

    pub fn add_architecture(&mut self, value: impl ToString) {
        self.architectures.insert(value.to_string());
    }

    /// Register an index file by its path relative to the `Release` file.
    pub fn add_index(&mut self, path: impl ToString, data: &[u8]) {
        self.indices
            .insert(path.to_string(), (data.len() as u64, digest_data(data)));
    }

    /// Derive the `Release` paragraph.
    pub fn paragraph(&self) -> ControlParagraph<'_> {
        let mut p = ControlParagraph::default();

        let join = |values: &BTreeSet<String>| {
            values
                .iter()
                .map(|x| x.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        };

        let simple = [
            ("Origin", self.origin.as_deref()),
            ("Label", self.label.as_deref()),
            ("Suite", self.suite.as_deref()),
            ("Codename", self.codename.as_deref()),
        ];
        for (name, value) in simple {
            if let Some(value) = value {
                p.set_field_from_string(name.into(), value.into());
            }
        }

        p.set_field_from_string("Components".into(), join(&self.components).into());
        p.set_field_from_string("Architectures".into(), join(&self.architectures).into());

        if let Some(date) = &self.date {
            p.set_field_from_string(
                "Date".into(),
                format!("{}", date.format(DATE_FORMAT)).into(),
            );
        }
        if let Some(description) = &self.description {
            p.set_field_from_string("Description".into(), description.as_str().into());
        }

        let longest_size = self
            .indices
            .values()
            .map(|(size, _)| format!("{}", size).len())
            .max()
            .unwrap_or_default();

        let mut entries_by_field: BTreeMap<usize, (&'static str, Vec<String>)> = BTreeMap::new();

        for (path, (size, digests)) in &self.indices {
            for (i, digest) in digests.iter_release_digests().enumerate() {
                entries_by_field
                    .entry(i)
                    .or_insert_with(|| (digest.release_field_name(), vec![]))
                    .1
                    .push(format!(
                        "{}  {:>size_width$} {}",
                        digest.digest_hex(),
                        size,
                        path,
                        size_width = longest_size
                    ));
            }
        }

        for (_, (name, lines)) in entries_by_field {
            p.set_field(ControlField::from_lines(
                Cow::Borrowed(name),
                std::iter::once("".to_string()).chain(lines.into_iter()),
            ));
        }

        p
    }

    /// Render the `Release` file content.
    pub fn render(&self) -> String {
        self.paragraph().to_string()
    }
}
