//! Paint regions of interest over an image and export them as binary masks.
//!
//! The GUI (`app`) and the headless exporter (`cli`) share one pipeline:
//! `form` drives an `EditorState` per session, `mask` thresholds its paint
//! layer and `export` names and writes the result at the source resolution.

#![allow(clippy::too_many_arguments)]

#[macro_use]
pub mod logger;
pub mod app;
pub mod canvas;
pub mod cli;
pub mod export;
pub mod form;
pub mod io;
pub mod mask;
pub mod project;
pub mod session;
pub mod settings;
