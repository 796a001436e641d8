use std::path::{Path, PathBuf};

use bytes::{BufMut as _, Bytes, BytesMut};

use super::{Error, Result};

/// Fixed so that request bodies are byte-identical across iterations.
pub const BOUNDARY: &str = "----rampr-multipart-boundary-7MA4YWxkTrZu0gW";

/// A file part whose contents are loaded once, when the form is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: String,
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

impl FilePart {
    pub async fn from_path(
        field: impl Into<String>,
        path: &Path,
        filename: Option<String>,
        content_type: Option<String>,
    ) -> Result<Self> {
        let data = tokio::fs::read(path).await.map_err(|source| Error::Fixture {
            path: PathBuf::from(path),
            source,
        })?;
        let filename = filename.unwrap_or_else(|| {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string())
        });
        let content_type = content_type.unwrap_or_else(|| guess_content_type(&filename).to_string());

        tracing::debug!(path = %path.display(), bytes = data.len(), "loaded upload fixture");
        Ok(Self {
            field: field.into(),
            filename,
            content_type,
            data: Bytes::from(data),
        })
    }
}

/// `multipart/form-data` body with text fields followed by file parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub files: Vec<FilePart>,
}

impl MultipartForm {
    pub fn content_type() -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }

    pub fn encode(&self) -> Bytes {
        let files_len: usize = self.files.iter().map(|f| f.data.len() + 256).sum();
        let mut out = BytesMut::with_capacity(files_len + self.fields.len() * 128 + 64);

        for (name, value) in &self.fields {
            put_boundary(&mut out);
            out.put_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", escape(name))
                    .as_bytes(),
            );
            out.put_slice(value.as_bytes());
            out.put_slice(b"\r\n");
        }

        for file in &self.files {
            put_boundary(&mut out);
            out.put_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                    escape(&file.field),
                    escape(&file.filename),
                    file.content_type
                )
                .as_bytes(),
            );
            out.put_slice(&file.data);
            out.put_slice(b"\r\n");
        }

        out.put_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        out.freeze()
    }
}

fn put_boundary(out: &mut BytesMut) {
    out.put_slice(format!("--{BOUNDARY}\r\n").as_bytes());
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn guess_content_type(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "json" => "application/json",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn encodes_fields_then_files() {
        let form = MultipartForm {
            fields: vec![("bucket".to_string(), "test-bucket".to_string())],
            files: vec![FilePart {
                field: "file".to_string(),
                filename: "test.jpg".to_string(),
                content_type: "image/jpeg".to_string(),
                data: Bytes::from_static(&[0xff, 0xd8, 0x00, 0xff]),
            }],
        };

        let body = form.encode();
        let mut expected = Vec::new();
        expected.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        expected.extend_from_slice(b"Content-Disposition: form-data; name=\"bucket\"\r\n\r\ntest-bucket\r\n");
        expected.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        expected.extend_from_slice(
            b"Content-Disposition: form-data; name=\"file\"; filename=\"test.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n",
        );
        expected.extend_from_slice(&[0xff, 0xd8, 0x00, 0xff]);
        expected.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        assert_eq!(body.as_ref(), expected.as_slice());
        assert_eq!(form.encode(), body);
    }

    #[tokio::test]
    async fn file_part_reads_fixture_once_and_guesses_type() {
        let mut fixture = tempfile::Builder::new()
            .suffix(".jpg")
            .tempfile()
            .unwrap_or_else(|e| panic!("{e}"));
        fixture
            .write_all(&[1, 2, 3, 4, 5])
            .unwrap_or_else(|e| panic!("{e}"));

        let part = FilePart::from_path("file", fixture.path(), None, None)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(part.data.len(), 5);
        assert_eq!(part.content_type, "image/jpeg");
        assert!(part.filename.ends_with(".jpg"));
    }

    #[tokio::test]
    async fn missing_fixture_is_an_error() {
        match FilePart::from_path("file", Path::new("/definitely/not/here.jpg"), None, None).await {
            Err(Error::Fixture { path, .. }) => {
                assert_eq!(path, PathBuf::from("/definitely/not/here.jpg"));
            }
            other => panic!("expected fixture error, got {other:?}"),
        }
    }
}
