//! Form submission on the receiving side.
//!
//! Once the file is reassembled, the receiving form is packaged as a
//! `multipart/form-data` payload and handed to a caller-supplied
//! [`SubmitRoutine`] (the frame's own backend call).

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::core::config::{DEFAULT_FILE_FIELD, MULTIPART_BOUNDARY_PREFIX};
use crate::core::pipeline::AssembledFile;
use crate::core::protocol::EntityData;

// ── Form data ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    Text(String),
    File {
        file_name: String,
        content_type: String,
        data: Bytes,
    },
}

impl From<&AssembledFile> for FormValue {
    fn from(file: &AssembledFile) -> Self {
        FormValue::File {
            file_name: file.name.clone(),
            content_type: file.mime_type.clone(),
            data: file.bytes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub value: FormValue,
}

impl FormField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FormValue::Text(value.into()),
        }
    }
}

/// The form's fields plus the bound file, in form order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPayload {
    boundary: String,
    fields: Vec<FormField>,
}

impl Default for MultipartPayload {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartPayload {
    pub fn new() -> Self {
        Self {
            boundary: format!("{MULTIPART_BOUNDARY_PREFIX}{}", uuid::Uuid::new_v4().simple()),
            fields: Vec::new(),
        }
    }

    pub fn from_fields(fields: impl IntoIterator<Item = FormField>) -> Self {
        let mut payload = Self::new();
        payload.fields.extend(fields);
        payload
    }

    pub fn append(&mut self, name: impl Into<String>, value: FormValue) {
        self.fields.push(FormField {
            name: name.into(),
            value,
        });
    }

    /// Replace every field called `name` by a single `value`, keeping the
    /// position of the first one (appended when absent).
    pub fn set(&mut self, name: &str, value: FormValue) {
        match self.fields.iter().position(|f| f.name == name) {
            Some(first) => {
                self.fields[first].value = value;
                let mut idx = 0;
                self.fields.retain(|f| {
                    let keep = idx <= first || f.name != name;
                    idx += 1;
                    keep
                });
            }
            None => self.append(name, value),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FormValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `Content-Type` header value for the encoded body.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Encode the body per RFC 7578.
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        for field in &self.fields {
            body.put_slice(format!("--{}\r\n", self.boundary).as_bytes());
            match &field.value {
                FormValue::Text(text) => {
                    body.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                            escape_quoted(&field.name)
                        )
                        .as_bytes(),
                    );
                    body.put_slice(text.as_bytes());
                }
                FormValue::File {
                    file_name,
                    content_type,
                    data,
                } => {
                    let content_type = if content_type.is_empty() {
                        "application/octet-stream"
                    } else {
                        content_type
                    };
                    body.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                             Content-Type: {content_type}\r\n\r\n",
                            escape_quoted(&field.name),
                            escape_quoted(file_name)
                        )
                        .as_bytes(),
                    );
                    body.put_slice(data);
                }
            }
            body.put_slice(b"\r\n");
        }
        body.put_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        body.freeze()
    }
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

// ── Submission ───────────────────────────────────────────────────────────────

/// Name of the form field the reassembled file is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFieldBinding {
    pub name: String,
}

impl FileFieldBinding {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for FileFieldBinding {
    fn default() -> Self {
        Self::new(DEFAULT_FILE_FIELD)
    }
}

/// Everything the caller's backend call needs.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub url: String,
    pub method: String,
    pub payload: MultipartPayload,
    pub entity_data: EntityData,
}

/// The frame's own backend call. Its result is echoed to the sender as the
/// `file-uploaded` payload.
#[async_trait]
pub trait SubmitRoutine: Send + Sync {
    async fn submit(&self, request: SubmitRequest) -> anyhow::Result<Value>;
}
