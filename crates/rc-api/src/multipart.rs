//! Reads request forms: text fields plus image files, each capped in size.

use actix_multipart::Multipart;
use bytes::BytesMut;
use futures_util::TryStreamExt;
use rc_core::ImageUpload;
use std::collections::HashMap;

use crate::error::ApiError;

/// Text fields are small; anything bigger is a client bug.
const MAX_TEXT_FIELD: usize = 16 * 1024;

#[derive(Debug, Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    files: Vec<(String, ImageUpload)>,
}

impl FormData {
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// First file sent under `name`.
    pub fn take_file(&mut self, name: &str) -> Option<ImageUpload> {
        let index = self.files.iter().position(|(n, _)| n == name)?;
        Some(self.files.remove(index).1)
    }

    /// Every file sent under `name`, in upload order. `evidence` and `evidence[]` both match.
    pub fn take_files(&mut self, name: &str) -> Vec<ImageUpload> {
        let bracketed = format!("{name}[]");
        let (taken, kept) = std::mem::take(&mut self.files)
            .into_iter()
            .partition::<Vec<_>, _>(|(n, _)| *n == name || *n == bracketed);
        self.files = kept;
        taken.into_iter().map(|(_, f)| f).collect()
    }
}

/// Drains `payload`. Parts with a filename are files, the rest are text.
pub async fn read_form(mut payload: Multipart, max_file_bytes: usize) -> Result<FormData, ApiError> {
    let mut form = FormData::default();

    while let Some(mut field) = payload.try_next().await.map_err(malformed)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);
        let content_type = field
            .content_type()
            .cloned()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM);
        let limit = if file_name.is_some() { max_file_bytes } else { MAX_TEXT_FIELD };

        let mut buf = BytesMut::new();
        while let Some(chunk) = field.try_next().await.map_err(malformed)? {
            if buf.len() + chunk.len() > limit {
                return Err(ApiError::bad_request(format!("field {name} exceeds {limit} bytes")));
            }
            buf.extend_from_slice(&chunk);
        }

        match file_name {
            Some(file_name) => {
                form.files
                    .push((name, ImageUpload::new(file_name, content_type, buf.freeze())));
            }
            None => {
                let value = String::from_utf8(buf.to_vec())
                    .map_err(|_| ApiError::bad_request(format!("field {name} is not UTF-8")))?;
                form.fields.insert(name, value);
            }
        }
    }
    Ok(form)
}

fn malformed(e: actix_multipart::MultipartError) -> ApiError {
    ApiError::bad_request(format!("malformed multipart body: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str) -> ImageUpload {
        ImageUpload::new(name, mime::IMAGE_PNG, vec![1u8, 2, 3])
    }

    #[test]
    fn evidence_accepts_both_field_spellings() {
        let mut form = FormData {
            fields: HashMap::new(),
            files: vec![
                ("id_photo".into(), upload("id.png")),
                ("evidence[]".into(), upload("a.png")),
                ("evidence".into(), upload("b.png")),
            ],
        };

        let evidence = form.take_files("evidence");
        assert_eq!(
            evidence.iter().map(|f| f.file_name.as_str()).collect::<Vec<_>>(),
            vec!["a.png", "b.png"]
        );
        assert_eq!(form.take_file("id_photo").map(|f| f.file_name), Some("id.png".to_string()));
        assert!(form.take_file("id_photo").is_none());
    }
}
