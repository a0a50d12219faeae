use crate::error::IngestError;
use crate::models::{digest_bytes, Document};
use lopdf::Document as PdfDocument;
use std::fmt::Display;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Debug, Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
        let document =
            PdfDocument::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        Ok(readable_pages(
            document
                .get_pages()
                .into_keys()
                .map(|page_no| (page_no, document.extract_text(&[page_no]))),
        ))
    }
}

/// Keeps pages with text, in order. Pages whose text cannot be extracted are
/// skipped with a warning rather than failing the whole document.
fn readable_pages<I, E>(pages: I) -> Vec<PageText>
where
    I: IntoIterator<Item = (u32, Result<String, E>)>,
    E: Display,
{
    pages
        .into_iter()
        .filter_map(|(number, text)| match text {
            Ok(text) if !text.trim().is_empty() => Some(PageText { number, text }),
            Ok(_) => None,
            Err(error) => {
                warn!(page = number, %error, "skipping unreadable pdf page");
                None
            }
        })
        .collect()
}

/// Joins page texts in page order, one newline between pages.
pub fn join_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| page.text.trim_end_matches('\n'))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extracts a PDF's text into a [`Document`] whose id is the SHA-256 of the file bytes.
pub fn load_pdf_document(path: &Path) -> Result<Document, IngestError> {
    let bytes = std::fs::read(path)?;
    document_from_pdf_bytes(&bytes, &LopdfExtractor)
        .map_err(|error| match error {
            IngestError::PdfParse(details) => {
                IngestError::PdfParse(format!("{}: {details}", path.display()))
            }
            other => other,
        })
}

pub fn document_from_pdf_bytes<X: PdfExtractor + ?Sized>(
    bytes: &[u8],
    extractor: &X,
) -> Result<Document, IngestError> {
    let pages = extractor.extract_pages(bytes)?;
    if pages.is_empty() {
        return Err(IngestError::PdfParse(
            "pdf had no readable page text".to_string(),
        ));
    }

    let document = Document::new(digest_bytes(bytes), join_pages(&pages));
    debug!(
        document_id = %document.id,
        pages = pages.len(),
        chars = document.text.chars().count(),
        "pdf text extracted"
    );
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    struct FixedPages(Vec<PageText>);

    impl PdfExtractor for FixedPages {
        fn extract_pages(&self, _bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn pages_are_joined_in_order() {
        let extractor = FixedPages(vec![
            PageText {
                number: 1,
                text: "First page\n".to_string(),
            },
            PageText {
                number: 2,
                text: "Second page".to_string(),
            },
        ]);

        let document = document_from_pdf_bytes(b"%PDF-fake", &extractor).unwrap();
        assert_eq!(document.text, "First page\nSecond page");
        assert_eq!(document.id, digest_bytes(b"%PDF-fake"));
    }

    #[test]
    fn unreadable_pages_are_skipped() {
        let pages = readable_pages(vec![
            (1, Ok("Intro".to_string())),
            (2, Err("bad content stream")),
            (3, Ok("   \n".to_string())),
            (4, Ok("Closing".to_string())),
        ]);

        let numbers: Vec<u32> = pages.iter().map(|page| page.number).collect();
        assert_eq!(numbers, vec![1, 4]);
        assert_eq!(join_pages(&pages), "Intro\nClosing");
    }

    #[test]
    fn pdf_without_text_is_rejected() {
        let result = document_from_pdf_bytes(b"%PDF-fake", &FixedPages(Vec::new()));
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
    }

    #[test]
    fn unreadable_pdf_reports_path() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\n%broken")?;

        match load_pdf_document(&path) {
            Err(IngestError::PdfParse(details)) => assert!(details.contains("broken.pdf")),
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = load_pdf_document(Path::new("/definitely/not/here.pdf"));
        assert!(matches!(result, Err(IngestError::Io(_))));
    }
}
