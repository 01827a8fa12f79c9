// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Content digesting.

Upstream files are digested exactly once, while they stream in. [MultiDigester]
feeds every supported hash at the same time and [DigestingReader] plugs it into
an [AsyncRead] pipeline.
*/

use {
    digest::Digest,
    futures::AsyncRead,
    pin_project::pin_project,
    std::{
        pin::Pin,
        task::{Context, Poll},
    },
};

/// A hash algorithm.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DigestFlavor {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl DigestFlavor {
    /// Name of the `Release` file field listing digests of this flavor.
    pub fn release_field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5Sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }
}

/// A computed content digest.
#[derive(Clone, Eq, PartialEq)]
pub struct ContentDigest {
    flavor: DigestFlavor,
    digest: Vec<u8>,
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self.flavor, self.digest_hex())
    }
}

impl ContentDigest {
    pub fn flavor(&self) -> DigestFlavor {
        self.flavor
    }

    pub fn digest_bytes(&self) -> &[u8] {
        &self.digest
    }

    /// Lower-case hex encoding of the digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(&self.digest)
    }

    pub fn release_field_name(&self) -> &'static str {
        self.flavor.release_field_name()
    }
}

/// Every flavor of digest of the same content.
#[derive(Clone, Debug)]
pub struct MultiContentDigest {
    pub md5: ContentDigest,
    pub sha1: ContentDigest,
    pub sha256: ContentDigest,
    pub sha512: ContentDigest,
}

impl MultiContentDigest {
    /// The digest of a given flavor.
    pub fn get(&self, flavor: DigestFlavor) -> &ContentDigest {
        match flavor {
            DigestFlavor::Md5 => &self.md5,
            DigestFlavor::Sha1 => &self.sha1,
            DigestFlavor::Sha256 => &self.sha256,
            DigestFlavor::Sha512 => &self.sha512,
        }
    }

    /// Digests advertised in `Release` files, in field order.
    pub fn iter_release_digests(&self) -> impl Iterator<Item = &ContentDigest> + '_ {
        [DigestFlavor::Md5, DigestFlavor::Sha1, DigestFlavor::Sha256]
            .into_iter()
            .map(move |flavor| self.get(flavor))
    }
}

/// Computes MD5, SHA-1, SHA-256 and SHA-512 over the same input.
#[derive(Clone, Default)]
pub struct MultiDigester {
    md5: md5::Md5,
    sha1: sha1::Sha1,
    sha256: sha2::Sha256,
    sha512: sha2::Sha512,
}

impl MultiDigester {
    pub fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
        self.sha256.update(data);
        self.sha512.update(data);
    }

    pub fn finish(self) -> MultiContentDigest {
        let digest = |flavor, digest: &[u8]| ContentDigest {
            flavor,
            digest: digest.to_vec(),
        };

        MultiContentDigest {
            md5: digest(DigestFlavor::Md5, &self.md5.finalize()),
            sha1: digest(DigestFlavor::Sha1, &self.sha1.finalize()),
            sha256: digest(DigestFlavor::Sha256, &self.sha256.finalize()),
            sha512: digest(DigestFlavor::Sha512, &self.sha512.finalize()),
        }
    }
}

/// Digest an in-memory buffer.
pub fn digest_data(data: &[u8]) -> MultiContentDigest {
    let mut digester = MultiDigester::default();
    digester.update(data);
    digester.finish()
}

/// An [AsyncRead] adapter digesting and counting everything read through it.
#[pin_project]
pub struct DigestingReader<R> {
    digester: MultiDigester,
    size: u64,
    #[pin]
    source: R,
}

impl<R> DigestingReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            digester: MultiDigester::default(),
            size: 0,
            source,
        }
    }

    /// Consume the adapter.
    ///
    /// Returns the source, the number of bytes read and their digests.
    pub fn finish(self) -> (R, u64, MultiContentDigest) {
        (self.source, self.size, self.digester.finish())
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DigestingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.project();

        let res = this.source.poll_read(cx, buf);
        if let Poll::Ready(Ok(size)) = &res {
            this.digester.update(&buf[..*size]);
            *this.size += *size as u64;
        }

        res
    }
}
