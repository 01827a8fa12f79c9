// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `Packages` index rendering. */

use {
    crate::{
        control::{ControlFile, ControlParagraph},
        descriptor::PackageDescriptor,
        error::Result,
    },
    std::borrow::Cow,
};

/// `Section` value used when a package doesn't declare one.
pub const DEFAULT_SECTION: &str = "misc";

/// `Priority` value used when a package doesn't declare one.
pub const DEFAULT_PRIORITY: &str = "optional";

/// Build the `Packages` paragraph advertising a descriptor.
///
/// `filename` is the repository relative path clients request the package from.
pub fn packages_paragraph<'a>(
    descriptor: &'a PackageDescriptor,
    filename: impl Into<Cow<'a, str>>,
) -> ControlParagraph<'a> {
    let mut p = ControlParagraph::default();

    p.set_field_from_string("Package".into(), descriptor.package.as_str().into());
    p.set_field_from_string("Version".into(), descriptor.version.as_str().into());
    p.set_field_from_string(
        "Architecture".into(),
        descriptor.architecture.as_str().into(),
    );
    p.set_field_from_string("Maintainer".into(), descriptor.maintainer.as_str().into());

    for (name, value) in [
        ("Depends", &descriptor.depends),
        ("Recommends", &descriptor.recommends),
        ("Suggests", &descriptor.suggests),
    ] {
        if let Some(value) = value {
            p.set_field_from_string(name.into(), value.as_str().into());
        }
    }

    p.set_field_from_string("Filename".into(), filename.into());
    p.set_field_from_string("Size".into(), format!("{}", descriptor.size).into());
    p.set_field_from_string("MD5sum".into(), descriptor.md5.as_str().into());
    p.set_field_from_string("SHA256".into(), descriptor.sha256.as_str().into());
    p.set_field_from_string("SHA512".into(), descriptor.sha512.as_str().into());
    p.set_field_from_string(
        "Section".into(),
        descriptor
            .section
            .as_deref()
            .unwrap_or(DEFAULT_SECTION)
            .into(),
    );
    p.set_field_from_string(
        "Priority".into(),
        descriptor
            .priority
            .as_deref()
            .unwrap_or(DEFAULT_PRIORITY)
            .into(),
    );

    if let Some(homepage) = &descriptor.homepage {
        p.set_field_from_string("Homepage".into(), homepage.as_str().into());
    }
    if let Some(description) = &descriptor.description {
        p.set_field_from_string("Description".into(), description.as_str().into());
    }

    p
}

/// Serialize paragraphs into `Packages` file content.
///
/// Paragraphs are separated by a blank line.
pub fn render_packages<'a>(
    paragraphs: impl Iterator<Item = ControlParagraph<'a>>,
) -> Result<String> {
    let mut cf = ControlFile::default();
    for p in paragraphs {
        cf.add_paragraph(p);
    }

    let mut buf = vec![];
    cf.write(&mut buf)?;

    Ok(String::from_utf8_lossy(&buf).to_string())
}
