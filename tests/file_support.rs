//! Multi-format ingestion: PDF, DOCX, Markdown and the rejection paths.

use std::sync::Arc;

use ragchat::config::UploadConfig;
use ragchat::ingest::{Ingestor, UploadState};
use ragchat_core::chunk::Chunker;
use ragchat_core::error::RagError;
use ragchat_core::models::{DocumentStatus, Query, QueryMode};
use ragchat_core::retrieve;
use ragchat_core::store::{InMemoryStore, Store};

/// One-page PDF with a single line of Helvetica text.
fn minimal_pdf_with_text(phrase: &str) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![100.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal(phrase)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// Minimal docx (ZIP) whose `word/document.xml` holds one paragraph per entry.
fn minimal_docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
    use std::io::Write;
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file(
            "word/document.xml",
            zip::write::SimpleFileOptions::default(),
        )
        .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn ingestor(limits: UploadConfig) -> Ingestor {
    Ingestor::new(
        Arc::new(InMemoryStore::default()),
        Chunker::default(),
        limits,
    )
}

async fn naive_search(ing: &Ingestor, text: &str, documents: Vec<String>) -> Vec<String> {
    let query = Query {
        mode: QueryMode::Naive,
        text: text.to_string(),
        documents,
        max_passages: 5,
        max_tokens: 2000,
    };
    retrieve::search(ing.store().as_ref(), &query)
        .await
        .unwrap()
        .passages
        .into_iter()
        .map(|p| p.text)
        .collect()
}

#[tokio::test]
async fn pdf_ingest_and_search() {
    let ing = ingestor(UploadConfig::default());
    let status = ing
        .ingest("report.pdf", minimal_pdf_with_text("quarterly revenue grew"))
        .await
        .unwrap();
    assert_eq!(status.state, UploadState::Indexed);

    let hits = naive_search(&ing, "revenue", vec![status.document_id]).await;
    assert_eq!(hits.len(), 1);
    assert!(hits[0].contains("revenue"));
}

#[tokio::test]
async fn docx_paragraphs_become_text() {
    let ing = ingestor(UploadConfig::default());
    let bytes = minimal_docx_with_paragraphs(&["Renewal terms", "The contract renews yearly."]);
    let status = ing.ingest("contract.docx", bytes).await.unwrap();

    let doc = ing
        .store()
        .get_document(&status.document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.text, "Renewal terms\n\nThe contract renews yearly.");
    assert_eq!(
        doc.content_type,
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
    );

    let hits = naive_search(&ing, "contract renews", vec![status.document_id]).await;
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn identical_bytes_under_new_name_are_not_reindexed() {
    let ing = ingestor(UploadConfig::default());
    let bytes = minimal_docx_with_paragraphs(&["Same content"]);
    let first = ing.ingest("a.docx", bytes.clone()).await.unwrap();
    let second = ing.ingest("b.docx", bytes).await.unwrap();
    assert_eq!(second.state, UploadState::AlreadyIndexed);
    assert_eq!(first.document_id, second.document_id);
    assert_eq!(ing.store().snapshot().await.unwrap().document_count(), 1);
}

#[tokio::test]
async fn corrupt_docx_is_marked_failed() {
    let ing = ingestor(UploadConfig::default());
    let err = ing
        .ingest("broken.docx", b"PK not really a zip".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::UnsupportedFormat(_)));

    let listed = ing.store().list_documents().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(matches!(listed[0].status, DocumentStatus::Failed(_)));
    assert!(ing.store().snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn extension_outside_allow_list_is_rejected() {
    let limits = UploadConfig {
        allowed_extensions: vec!["txt".to_string()],
        ..UploadConfig::default()
    };
    let ing = ingestor(limits);
    let err = ing
        .ingest("notes.md", b"# Notes".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::UnsupportedFormat(_)));
    assert!(ing.store().list_documents().await.unwrap().is_empty());
}

#[tokio::test]
async fn markdown_with_bom_is_indexed() {
    let ing = ingestor(UploadConfig::default());
    let mut bytes = vec![0xEF, 0xBB, 0xBF];
    bytes.extend_from_slice(b"# Tides\n\nThe moon drives the tides.");
    let status = ing.ingest("tides.md", bytes).await.unwrap();
    let doc = ing
        .store()
        .get_document(&status.document_id)
        .await
        .unwrap()
        .unwrap();
    assert!(doc.text.starts_with("# Tides"));
}
