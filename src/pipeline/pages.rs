//! The global page sequence of a run and the per-file offset table.
//!
//! Segments come back from the model as file-local page ranges; the offset
//! table (cumulative page counts of the preceding files, in input order)
//! maps them onto slices of the concatenated sequence.

use crate::config::ImageEncoding;
use crate::error::AnalysisError;
use crate::output::{InputFile, PageImage, UnsupportedPage};
use crate::pipeline::encode;
use crate::pipeline::render::RasterizedFile;
use edgequake_llm::ImageData;
use std::collections::HashSet;
use std::ops::Range;
use tracing::warn;

/// Every page of every input file, in input order.
#[derive(Debug, Clone, Default)]
pub struct PageSet {
    pub input_files: Vec<InputFile>,
    pub pages: Vec<PageImage>,
    /// Pages that failed to render, already in report form.
    pub unsupported: Vec<UnsupportedPage>,
}

impl PageSet {
    /// Concatenate rasterised files. Failed pages become blank placeholders
    /// so the sequence still has exactly one entry per page.
    pub fn from_rasterized(
        files: Vec<RasterizedFile>,
        encoding: ImageEncoding,
    ) -> Result<Self, AnalysisError> {
        let mut set = PageSet::default();
        let mut seen = HashSet::new();
        let mut placeholder: Option<ImageData> = None;

        for file in files {
            let name = unique_name(&file.name, &mut seen);
            set.input_files.push(InputFile {
                name: name.clone(),
                total_pages: file.total_pages(),
            });

            for (idx, slot) in file.pages.into_iter().enumerate() {
                let page_number = idx + 1;
                let (image, rendered) = match slot {
                    Ok(image) => (image, true),
                    Err(e) => {
                        set.unsupported.push(UnsupportedPage {
                            source_file_name: name.clone(),
                            page_number_in_source_file: page_number,
                            reason: format!("Page could not be rendered: {}", e.detail()),
                        });
                        let blank = match &placeholder {
                            Some(b) => b.clone(),
                            None => {
                                let b = encode::blank_page(encoding).map_err(|e| {
                                    AnalysisError::Internal(format!("placeholder encoding failed: {e}"))
                                })?;
                                placeholder = Some(b.clone());
                                b
                            }
                        };
                        (blank, false)
                    }
                };
                let global_index = set.pages.len();
                set.pages.push(PageImage {
                    source_file_name: name.clone(),
                    page_number_in_source_file: page_number,
                    global_index,
                    image,
                    rendered,
                });
            }
        }
        Ok(set)
    }

    /// Pre-rendered page images of one logical file, already in page order.
    pub fn from_images(file_name: &str, images: Vec<ImageData>) -> Self {
        let pages: Vec<PageImage> = images
            .into_iter()
            .enumerate()
            .map(|(idx, image)| PageImage {
                source_file_name: file_name.to_string(),
                page_number_in_source_file: idx + 1,
                global_index: idx,
                image,
                rendered: true,
            })
            .collect();
        PageSet {
            input_files: vec![InputFile {
                name: file_name.to_string(),
                total_pages: pages.len(),
            }],
            pages,
            unsupported: Vec::new(),
        }
    }

    pub fn total_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn offsets(&self) -> FileOffsets {
        FileOffsets::new(&self.input_files)
    }

    /// Emit the large-input warnings.
    pub fn warn_if_large(&self, per_file: usize, total: usize) {
        for f in &self.input_files {
            if f.total_pages > per_file {
                warn!(
                    "{} has {} pages (more than {}); analysis may be slow or hit request limits",
                    f.name, f.total_pages, per_file
                );
            }
        }
        if self.total_pages() > total {
            warn!(
                "Run has {} pages in total (more than {}); consider the batched pipeline",
                self.total_pages(),
                total
            );
        }
    }
}

fn unique_name(name: &str, seen: &mut HashSet<String>) -> String {
    if seen.insert(name.to_string()) {
        return name.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{name} ({n})");
        if seen.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[derive(Debug, Clone)]
struct FileEntry {
    name: String,
    offset: usize,
    pages: usize,
}

/// Cumulative page offsets of each input file.
#[derive(Debug, Clone)]
pub struct FileOffsets {
    entries: Vec<FileEntry>,
}

impl FileOffsets {
    pub fn new(files: &[InputFile]) -> Self {
        let mut offset = 0;
        let entries = files
            .iter()
            .map(|f| {
                let e = FileEntry {
                    name: f.name.clone(),
                    offset,
                    pages: f.total_pages,
                };
                offset += f.total_pages;
                e
            })
            .collect();
        Self { entries }
    }

    /// Match a model-supplied file name: exact, then case-insensitive, then
    /// ignoring a `.pdf` extension.
    fn find(&self, name: &str) -> Option<&FileEntry> {
        let name = name.trim();
        let stem = |s: &str| {
            let lower = s.to_lowercase();
            lower.strip_suffix(".pdf").map(str::to_string).unwrap_or(lower)
        };
        self.entries
            .iter()
            .find(|e| e.name == name)
            .or_else(|| self.entries.iter().find(|e| e.name.eq_ignore_ascii_case(name)))
            .or_else(|| self.entries.iter().find(|e| stem(&e.name) == stem(name)))
    }

    /// Canonical input name for a model-supplied file name.
    pub fn canonical_name(&self, name: &str) -> Option<&str> {
        self.find(name).map(|e| e.name.as_str())
    }

    /// Global half-open index range for a 1-based inclusive local page range.
    ///
    /// `None` for an unknown file, a zero or inverted range, or a range past
    /// the end of the file.
    pub fn resolve_range(&self, file: &str, start: usize, end: usize) -> Option<Range<usize>> {
        let entry = self.find(file)?;
        if start == 0 || start > end || end > entry.pages {
            return None;
        }
        Some(entry.offset + start - 1..entry.offset + end)
    }

    /// File name and 1-based local page of a global index.
    pub fn locate(&self, global_index: usize) -> Option<(&str, usize)> {
        self.entries
            .iter()
            .find(|e| global_index >= e.offset && global_index < e.offset + e.pages)
            .map(|e| (e.name.as_str(), global_index - e.offset + 1))
    }

    /// Position of the file in input order.
    pub fn file_order(&self, file: &str) -> Option<usize> {
        let name = self.find(file)?.name.clone();
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn file_pages(&self, file: &str) -> Option<usize> {
        self.find(file).map(|e| e.pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageError;

    fn files() -> Vec<InputFile> {
        vec![
            InputFile {
                name: "title.pdf".into(),
                total_pages: 3,
            },
            InputFile {
                name: "lease.pdf".into(),
                total_pages: 10,
            },
        ]
    }

    fn img() -> ImageData {
        ImageData::new("AA==".to_string(), "image/jpeg")
    }

    #[test]
    fn resolve_ranges() {
        let o = FileOffsets::new(&files());
        assert_eq!(o.resolve_range("title.pdf", 1, 3), Some(0..3));
        assert_eq!(o.resolve_range("lease.pdf", 1, 10), Some(3..13));
        assert_eq!(o.resolve_range("lease.pdf", 4, 4), Some(6..7));
    }

    #[test]
    fn rejects_bad_ranges() {
        let o = FileOffsets::new(&files());
        assert_eq!(o.resolve_range("title.pdf", 0, 2), None);
        assert_eq!(o.resolve_range("title.pdf", 3, 2), None);
        assert_eq!(o.resolve_range("title.pdf", 1, 4), None);
        assert_eq!(o.resolve_range("other.pdf", 1, 1), None);
    }

    #[test]
    fn lenient_file_matching() {
        let o = FileOffsets::new(&files());
        assert_eq!(o.resolve_range("LEASE.PDF", 1, 1), Some(3..4));
        assert_eq!(o.resolve_range("lease", 2, 2), Some(4..5));
        assert_eq!(o.canonical_name(" Title.pdf "), Some("title.pdf"));
    }

    #[test]
    fn locate_and_order() {
        let o = FileOffsets::new(&files());
        assert_eq!(o.locate(0), Some(("title.pdf", 1)));
        assert_eq!(o.locate(3), Some(("lease.pdf", 1)));
        assert_eq!(o.locate(12), Some(("lease.pdf", 10)));
        assert_eq!(o.locate(13), None);
        assert_eq!(o.file_order("lease.pdf"), Some(1));
        assert_eq!(o.file_pages("title.pdf"), Some(3));
    }

    #[test]
    fn from_rasterized_fills_placeholders_and_dedups_names() {
        let files = vec![
            RasterizedFile {
                name: "deed.pdf".into(),
                pages: vec![Ok(img()), Ok(img())],
            },
            RasterizedFile {
                name: "deed.pdf".into(),
                pages: vec![
                    Ok(img()),
                    Err(PageError::RenderFailed {
                        file: "deed.pdf".into(),
                        page: 2,
                        detail: "bad xobject".into(),
                    }),
                ],
            },
        ];
        let set = PageSet::from_rasterized(files, ImageEncoding::Png).unwrap();
        assert_eq!(set.total_pages(), 4);
        assert_eq!(set.input_files[1].name, "deed.pdf (2)");
        assert_eq!(
            set.input_files.iter().map(|f| f.total_pages).sum::<usize>(),
            set.total_pages()
        );
        let last = &set.pages[3];
        assert!(!last.rendered);
        assert_eq!(last.global_index, 3);
        assert_eq!(last.source_file_name, "deed.pdf (2)");
        assert_eq!(set.unsupported.len(), 1);
        assert_eq!(set.unsupported[0].page_number_in_source_file, 2);
        assert!(set.unsupported[0].reason.contains("bad xobject"));
    }

    #[test]
    fn from_images_numbers_pages() {
        let set = PageSet::from_images("bundle", vec![img(), img(), img()]);
        assert_eq!(set.total_pages(), 3);
        assert_eq!(set.input_files[0].total_pages, 3);
        assert_eq!(set.pages[2].page_number_in_source_file, 3);
        assert_eq!(set.pages[2].global_index, 2);
    }
}
