//! Tabular document generation: CSV, SpreadsheetML and a minimal PDF.
//!
//! Rendering is pure; the only side effect is the final upload to storage.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::info;

use super::{payload_mismatch, JobProcessor};
use crate::execution::{ExecutionError, ProgressReporter};
use crate::models::{DocumentFormat, DocumentJob, Job, JobKind, JobPayload};
use crate::services::StorageClient;

const PDF_LINES_PER_PAGE: usize = 50;
const PDF_COLUMN_SEPARATOR: &str = " | ";

#[derive(Debug, Clone)]
pub struct DocumentProcessor {
    storage: Arc<dyn StorageClient>,
}

impl DocumentProcessor {
    pub fn new(storage: Arc<dyn StorageClient>) -> Self {
        Self { storage }
    }

    pub async fn generate(
        &self,
        job: &DocumentJob,
        progress: Option<&ProgressReporter>,
    ) -> Result<Value, ExecutionError> {
        report(progress, 10).await;
        let bytes = render(job);
        let size = bytes.len();
        report(progress, 60).await;

        let url = self
            .storage
            .upload(bytes, &job.destination_key, job.format.content_type())
            .await
            .map_err(|e| ExecutionError::from(e).context("document upload"))?;
        report(progress, 100).await;

        info!(
            document_id = %job.document_id,
            format = ?job.format,
            rows = job.rows.len(),
            bytes = size,
            "📄 Document generated"
        );
        Ok(json!({
            "documentId": job.document_id,
            "url": url,
            "format": job.format,
            "rows": job.rows.len(),
            "bytes": size,
        }))
    }
}

async fn report(progress: Option<&ProgressReporter>, value: u8) {
    if let Some(progress) = progress {
        progress.update(value).await;
    }
}

#[async_trait]
impl JobProcessor for DocumentProcessor {
    fn kind(&self) -> JobKind {
        JobKind::Document
    }

    async fn process(&self, job: &Job, progress: &ProgressReporter) -> Result<Value, ExecutionError> {
        let JobPayload::Document(document) = &job.payload else {
            return Err(payload_mismatch(JobKind::Document, job));
        };
        self.generate(document, Some(progress)).await
    }
}

pub fn render(job: &DocumentJob) -> Vec<u8> {
    match job.format {
        DocumentFormat::Csv => render_csv(job).into_bytes(),
        DocumentFormat::Spreadsheet => render_spreadsheet(job).into_bytes(),
        DocumentFormat::Pdf => render_pdf(job),
    }
}

/// Plain text of a cell; `null` renders empty
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

fn render_csv(job: &DocumentJob) -> String {
    let mut out = String::new();
    let header: Vec<String> = job.columns.iter().map(|c| csv_field(c)).collect();
    out.push_str(&header.join(","));
    out.push('\n');
    for row in &job.rows {
        let cells: Vec<String> = row.iter().map(|v| csv_field(&cell_text(v))).collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn spreadsheet_cell(value: &Value) -> String {
    let (kind, text) = match value {
        Value::Number(n) => ("Number", n.to_string()),
        Value::Bool(b) => ("Boolean", if *b { "1" } else { "0" }.to_string()),
        other => ("String", cell_text(other)),
    };
    format!(
        "<Cell><Data ss:Type=\"{kind}\">{}</Data></Cell>",
        xml_escape(&text)
    )
}

fn render_spreadsheet(job: &DocumentJob) -> String {
    // Worksheet names are capped at 31 characters
    let sheet: String = if job.title.trim().is_empty() {
        "Sheet1".to_string()
    } else {
        job.title.chars().take(31).collect()
    };

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<?mso-application progid=\"Excel.Sheet\"?>\n");
    out.push_str(
        "<Workbook xmlns=\"urn:schemas-microsoft-com:office:spreadsheet\" \
         xmlns:ss=\"urn:schemas-microsoft-com:office:spreadsheet\">\n",
    );
    let _ = writeln!(out, " <Worksheet ss:Name=\"{}\">", xml_escape(&sheet));
    out.push_str("  <Table>\n");

    out.push_str("   <Row>");
    for column in &job.columns {
        out.push_str(&spreadsheet_cell(&Value::String(column.clone())));
    }
    out.push_str("</Row>\n");

    for row in &job.rows {
        out.push_str("   <Row>");
        for value in row {
            out.push_str(&spreadsheet_cell(value));
        }
        out.push_str("</Row>\n");
    }

    out.push_str("  </Table>\n </Worksheet>\n</Workbook>\n");
    out
}

/// Escape a line for a PDF literal string; Helvetica here only covers ASCII
fn pdf_text(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for c in line.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

fn pdf_lines(job: &DocumentJob) -> Vec<String> {
    let mut lines = Vec::with_capacity(job.rows.len() + 3);
    if !job.title.trim().is_empty() {
        lines.push(job.title.clone());
        lines.push(String::new());
    }
    lines.push(job.columns.join(PDF_COLUMN_SEPARATOR));
    for row in &job.rows {
        let cells: Vec<String> = row.iter().map(cell_text).collect();
        lines.push(cells.join(PDF_COLUMN_SEPARATOR));
    }
    lines
}

fn render_pdf(job: &DocumentJob) -> Vec<u8> {
    let lines = pdf_lines(job);
    let pages: Vec<&[String]> = lines.chunks(PDF_LINES_PER_PAGE).collect();

    // 1 catalog, 2 page tree, 3 font, then a page and its content stream per page
    let mut objects: Vec<String> = Vec::with_capacity(3 + pages.len() * 2);
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    let kids: Vec<String> = (0..pages.len()).map(|i| format!("{} 0 R", 4 + 2 * i)).collect();
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids.join(" "),
        pages.len()
    ));
    objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string());

    for (index, page) in pages.iter().enumerate() {
        let mut content = String::from("BT\n/F1 10 Tf\n14 TL\n50 760 Td\n");
        for line in page.iter() {
            let _ = writeln!(content, "({}) Tj T*", pdf_text(line));
        }
        content.push_str("ET");

        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
            5 + 2 * index
        ));
        objects.push(format!(
            "<< /Length {} >>\nstream\n{content}\nendstream",
            content.len()
        ));
    }

    let mut out: Vec<u8> = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (index, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", index + 1).as_bytes());
    }

    let xref_offset = out.len();
    let mut trailer = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        let _ = writeln!(trailer, "{offset:010} 00000 n ");
    }
    let _ = write!(
        trailer,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
        objects.len() + 1
    );
    out.extend_from_slice(trailer.as_bytes());
    out
}
