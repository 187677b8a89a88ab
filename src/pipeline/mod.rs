//! Pipeline building blocks shared by every orchestration strategy.
//!
//! Each submodule does one step and is tested on its own; the strategies in
//! [`crate::orchestrator`] only decide how the steps are sequenced.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ pages ──▶ batch ──▶ llm ──▶ extract ──▶ parse
//! (path/URL) (pdfium)  (base64)  (offsets) (chunks)  (VLM)   (JSON text) (typed)
//! ```
//!
//! 1. [`input`]   resolve a path or URL to named PDF bytes
//! 2. [`render`]  rasterise every page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`encode`]  JPEG/PNG-encode and base64-wrap each page
//! 4. [`pages`]   concatenate files into one global page sequence
//! 5. [`batch`]   fixed-size page batches for the batched strategy
//! 6. [`llm`]     the inference client, with timeout and retry; the only
//!    step with network I/O besides URL download
//! 7. [`extract`] pull one JSON value out of free-form model text
//! 8. [`parse`]   lenient conversion of that JSON into report types

pub mod batch;
pub mod encode;
pub mod extract;
pub mod input;
pub mod llm;
pub mod pages;
pub mod parse;
pub mod render;
