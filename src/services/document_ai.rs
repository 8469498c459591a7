//! Entity extraction via a Document AI style `:process` endpoint.
//!
//! ## Wire format
//!
//! ```text
//! POST {endpoint}
//! { "rawDocument": { "content": "<base64 pdf>", "mimeType": "application/pdf" } }
//!
//! 200 { "document": { "text": "...",
//!                     "entities": [{ "type": "...", "mentionText": "...", "confidence": 0.93 }],
//!                     "pages": [ ... ] } }
//! ```
//!
//! Only top-level entities are consumed. Missing fields default to empty
//! values so a sparse response still maps to a (mostly sentinel) report.

use super::EntityExtractor;
use crate::error::ServiceError;
use crate::pipeline::validate::PDF_MIME_TYPE;
use crate::report::{EntityRecord, ExtractedDocument};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const SERVICE: &str = "document-ai";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest<'a> {
    raw_document: RawDocument<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument<'a> {
    content: String,
    mime_type: &'a str,
}

#[derive(Deserialize)]
struct ProcessResponse {
    #[serde(default)]
    document: WireDocument,
}

#[derive(Debug, Default, Deserialize)]
struct WireDocument {
    #[serde(default)]
    text: String,
    #[serde(default)]
    entities: Vec<WireEntity>,
    #[serde(default)]
    pages: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEntity {
    #[serde(rename = "type", default)]
    type_label: String,
    #[serde(default)]
    mention_text: String,
    #[serde(default)]
    confidence: f32,
}

impl From<WireDocument> for ExtractedDocument {
    fn from(doc: WireDocument) -> Self {
        ExtractedDocument {
            text: doc.text,
            entities: doc
                .entities
                .into_iter()
                .map(|e| EntityRecord::new(e.type_label, e.mention_text, e.confidence))
                .collect(),
            page_count: doc.pages.len(),
        }
    }
}

/// HTTP client for a hosted document processor.
#[derive(Debug, Clone)]
pub struct DocumentAiExtractor {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl DocumentAiExtractor {
    /// `endpoint` is the full `:process` URL.
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ServiceError::Extraction(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token,
        })
    }

    /// Build the endpoint for a Google Cloud processor.
    pub fn processor_endpoint(project_id: &str, location: &str, processor_id: &str) -> String {
        format!(
            "https://{location}-documentai.googleapis.com/v1/projects/{project_id}/locations/{location}/processors/{processor_id}:process"
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EntityExtractor for DocumentAiExtractor {
    async fn process(&self, pdf_bytes: &[u8]) -> Result<ExtractedDocument, ServiceError> {
        info!("Sending {} bytes to document processor", pdf_bytes.len());
        let body = ProcessRequest {
            raw_document: RawDocument {
                content: base64::engine::general_purpose::STANDARD.encode(pdf_bytes),
                mime_type: PDF_MIME_TYPE,
            },
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::Extraction(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ServiceError::Extraction(e.to_string()))?;

        if !status.is_success() {
            return Err(ServiceError::Http {
                service: SERVICE,
                status: status.as_u16(),
                detail: text.chars().take(300).collect(),
            });
        }

        let parsed: ProcessResponse = serde_json::from_str(&text)?;
        let doc = ExtractedDocument::from(parsed.document);
        debug!(
            "Processor returned {} entities, {} pages, {} chars",
            doc.entities.len(),
            doc.page_count,
            doc.text.len()
        );
        Ok(doc)
    }
}

/// Returns a fixed, pre-recorded extraction result.
#[derive(Debug, Clone, Default)]
pub struct StaticExtractor {
    document: ExtractedDocument,
}

impl StaticExtractor {
    pub fn new(document: ExtractedDocument) -> Self {
        Self { document }
    }

    /// Parse a saved processor response, either the full `{document: ..}`
    /// envelope or the bare document object.
    pub fn from_document_ai_json(json: &str) -> Result<Self, ServiceError> {
        let mut value: serde_json::Value = serde_json::from_str(json)?;
        let doc_value = if value.get("document").is_some() {
            value["document"].take()
        } else {
            value
        };
        let wire: WireDocument = serde_json::from_value(doc_value)?;
        Ok(Self::new(wire.into()))
    }

    pub fn document(&self) -> &ExtractedDocument {
        &self.document
    }
}

#[async_trait]
impl EntityExtractor for StaticExtractor {
    async fn process(&self, _pdf_bytes: &[u8]) -> Result<ExtractedDocument, ServiceError> {
        Ok(self.document.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "document": {
            "text": "Paciente: Luna\nDiagnóstico: Cistitis",
            "entities": [
                {"type": "patient_name", "mentionText": "Luna", "confidence": 0.94},
                {"type": "species", "mentionText": "Felino"}
            ],
            "pages": [{"pageNumber": 1}, {"pageNumber": 2}]
        }
    }"#;

    #[test]
    fn parses_full_envelope() {
        let ex = StaticExtractor::from_document_ai_json(RESPONSE).unwrap();
        let doc = ex.document();
        assert_eq!(doc.page_count, 2);
        assert_eq!(doc.entities.len(), 2);
        assert_eq!(doc.entities[0], EntityRecord::new("patient_name", "Luna", 0.94));
        assert_eq!(doc.entities[1].confidence, 0.0);
        assert!(doc.text.starts_with("Paciente"));
    }

    #[test]
    fn parses_bare_document_and_sparse_fields() {
        let ex = StaticExtractor::from_document_ai_json(r#"{"text": "hola"}"#).unwrap();
        assert_eq!(ex.document().text, "hola");
        assert!(ex.document().entities.is_empty());
        assert_eq!(ex.document().page_count, 0);
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let err = StaticExtractor::from_document_ai_json("{not json").unwrap_err();
        assert!(matches!(err, ServiceError::Decode(_)));
    }

    #[test]
    fn request_body_shape() {
        let body = ProcessRequest {
            raw_document: RawDocument {
                content: base64::engine::general_purpose::STANDARD.encode(b"%PDF-"),
                mime_type: PDF_MIME_TYPE,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["rawDocument"]["content"], "JVBERi0=");
        assert_eq!(json["rawDocument"]["mimeType"], "application/pdf");
    }

    #[test]
    fn processor_endpoint_format() {
        assert_eq!(
            DocumentAiExtractor::processor_endpoint("proj", "us", "abc123"),
            "https://us-documentai.googleapis.com/v1/projects/proj/locations/us/processors/abc123:process"
        );
    }

    #[tokio::test]
    async fn static_extractor_ignores_input() {
        let ex = StaticExtractor::from_document_ai_json(RESPONSE).unwrap();
        let a = ex.process(b"%PDF-1.4").await.unwrap();
        let b = ex.process(b"").await.unwrap();
        assert_eq!(a, b);
    }
}
