// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Republish vendor releases as APT repositories.

This crate turns the JSON release manifests a software vendor publishes into the
metadata of an APT repository. Package content is never mirrored: packages are
advertised under stable proxy paths that a serving layer redirects to the vendor.

# Goals

## Integrity

Every package advertised by a repository has been downloaded in full and its
SHA-512 compared against the digest the vendor declares. A package whose digest
disagrees is never cached and never rendered.

## Incremental Updates

Upstream packages are large and content at a published URL is assumed to never
change. Validated package descriptors are kept in a persistent cache keyed by URL,
so a run only downloads files it hasn't seen before.

# A Tour of Functionality

The [manifest] module defines the vendor manifest ([manifest::ReleaseManifest])
and fetches and validates it. [selection::select_candidates()] picks the files of
interest out of a manifest.

Content is obtained through the [fetch::ContentFetcher] trait.
[http::HttpFetcher] is the production implementation and
[fetch::StaticFetcher] serves content from memory.

[download::compute_digests()] downloads a file once, computing MD5, SHA-256 and
SHA-512 with the helpers in [io] and optionally retaining the content. The
[inspect] module extracts the control paragraph embedded in a `.deb` through the
[inspect::ArchiveInspector] trait. [descriptor::build_descriptor()] ties both
together and enforces the digest check, producing a
[descriptor::PackageDescriptor].

[cache::DescriptorCache] persists descriptors in a [store::KeyValueStore]. Stores
exist for memory, the filesystem, Cloudflare Workers KV and S3.

[pipeline::DescriptorPipeline] runs the whole process for a set of products,
configured by a [config::PipelineConfig]. Per-file failures are collected into a
[pipeline::RunReport] instead of aborting the run.

The [render] module reduces descriptors to the newest version of each package
([selection::select_latest_per_package()]) and renders `Packages` and `Release`
files using the [control] primitives. [signing] produces `InRelease` and
`Release.gpg`.

# Crate Features

The optional and enabled-by-default `http` feature enables HTTP content fetching
and the Cloudflare Workers KV store. The `s3` feature enables the S3 store.
*/

pub mod cache;
pub mod config;
pub mod control;
pub mod descriptor;
pub mod download;
pub mod error;
pub mod fetch;
#[cfg(feature = "http")]
pub mod http;
pub mod inspect;
pub mod io;
pub mod manifest;
pub mod pipeline;
pub mod render;
pub mod selection;
pub mod signing;
pub mod store;
