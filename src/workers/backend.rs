//! Local stand-in for the frame's backend.
//!
//! Each submission lands in `<out_dir>/<uuid>/`: the encoded multipart
//! request, every file part under its (sanitized) file name and the entity
//! data as `entity.json`.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

use framedrop::core::submit::{FormValue, SubmitRequest, SubmitRoutine};

pub struct LocalBackend {
    out_dir: PathBuf,
}

impl LocalBackend {
    pub fn new(out_dir: PathBuf) -> Self {
        Self { out_dir }
    }
}

#[async_trait]
impl SubmitRoutine for LocalBackend {
    async fn submit(&self, request: SubmitRequest) -> anyhow::Result<Value> {
        let id = Uuid::new_v4();
        let dir = self.out_dir.join(id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        let body = request.payload.encode();
        tokio::fs::write(dir.join("request.multipart"), &body)
            .await
            .context("writing multipart request")?;

        let mut stored = Vec::new();
        for field in request.payload.fields() {
            if let FormValue::File { file_name, data, .. } = &field.value {
                let name = sanitize_file_name(file_name);
                tokio::fs::write(dir.join(&name), data)
                    .await
                    .with_context(|| format!("writing {name}"))?;
                stored.push(name);
            }
        }

        let entity = serde_json::to_vec_pretty(&request.entity_data)?;
        tokio::fs::write(dir.join("entity.json"), entity)
            .await
            .context("writing entity data")?;

        info!(
            event = "upload_stored",
            %id,
            url = %request.url,
            method = %request.method,
            content_type = %request.payload.content_type(),
            bytes = body.len(),
            dir = %dir.display(),
            "Stored submission"
        );
        Ok(json!({ "id": id, "files": stored }))
    }
}

/// Keep only the last path component and replace anything unusual.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == ' ');
    if cleaned.is_empty() {
        "upload.bin".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use framedrop::core::protocol::EntityData;
    use framedrop::core::submit::{FormField, MultipartPayload};

    #[test]
    fn sanitizes_file_names() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\temp\\a b.png"), "a b.png");
        assert_eq!(sanitize_file_name("x\"y.txt"), "x_y.txt");
        assert_eq!(sanitize_file_name(".."), "upload.bin");
    }

    #[tokio::test]
    async fn stores_submission_on_disk() {
        let out = std::env::temp_dir().join("framedrop_test").join("backend");
        let _ = std::fs::remove_dir_all(&out);
        let backend = LocalBackend::new(out.clone());

        let mut payload = MultipartPayload::from_fields([FormField::text("title", "Cover")]);
        payload.set(
            "file",
            FormValue::File {
                file_name: "cover.png".into(),
                content_type: "image/png".into(),
                data: Bytes::from_static(b"png"),
            },
        );
        let result = backend
            .submit(SubmitRequest {
                url: "/upload".into(),
                method: "POST".into(),
                payload,
                entity_data: EntityData::parse(r#"{"caseId":1}"#).unwrap(),
            })
            .await
            .unwrap();

        let id = result["id"].as_str().unwrap();
        let dir = out.join(id);
        assert_eq!(std::fs::read(dir.join("cover.png")).unwrap(), b"png");
        assert!(dir.join("request.multipart").exists());
        let entity: Value = serde_json::from_slice(&std::fs::read(dir.join("entity.json")).unwrap()).unwrap();
        assert_eq!(entity["caseId"], 1);
        assert_eq!(result["files"], json!(["cover.png"]));

        let _ = std::fs::remove_dir_all(&out);
    }
}
