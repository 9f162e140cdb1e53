//! # sfc-loader
//!
//! Runtime loader for single-file components. A component document holds
//! at most one `<template>` (markup), at most one `<script>` (Lua logic)
//! and any number of `<style>` sections. Loading one runs:
//!
//! 1. **Fetch**: retrieve the document and compute its base URI.
//! 2. **Split**: recognize the top-level sections.
//! 3. **Normalize**: resolve `src` and `lang` on every section.
//! 4. **Compile**: evaluate the logic section in a sandbox, then insert
//!    styles into the [`Head`] (scoping them when `scoped`).
//! 5. **Export**: assemble the [`ComponentDefinition`].
//!
//! ## Invariants
//!
//! - Nothing is fetched until a [`ComponentFactory`] is awaited.
//! - A component's scope identifier is assigned at most once and stamped on
//!   the first element of its markup.
//! - Logic errors report lines counted from the top of the whole document.
//! - Concurrent loads share no state beyond the loader's registries, head
//!   and scope counter; one failing load never affects another.

pub mod component;
pub mod config;
pub mod css;
pub mod dom;
pub mod error;
pub mod evaluate;
pub mod fetch;
pub mod head;
pub mod loader;
pub mod registry;
pub mod resolve;
pub mod section;


pub use component::{Component, ComponentDefinition};
pub use config::{CachePolicy, LoaderConfig};
pub use error::{LoaderError, Result, ScriptError, ScriptErrorKind};
pub use evaluate::{ExportsHandler, IdentityExports};
pub use fetch::{Fetcher, HttpFetcher, MemoryFetcher};
pub use head::{Head, StyleElement};
pub use loader::{
    ComponentDecl, ComponentFactory, ComponentOptions, ComponentRegistry, Loader, LoaderBuilder,
    LoaderPlugin,
};
pub use registry::{Dependencies, LanguageProcessor, LanguageProcessors};
pub use resolve::{join_relative, resolve, ComponentRef};
