//! Upload of captured artifacts to the remote file store.
//!
//! Each file is sent by one invocation of the transport program (a
//! multipart POST to `<server>/system/file/upload`). The response body is
//! expected to contain `"url":"<locator>"`.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::command::{Invocation, build_upload_args};
use crate::error::{DocflowError, Result};
use crate::process::{OperationKind, ProcessOutput};

pub const DEFAULT_PARENT: &str = "/exam/";

static URL_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""url"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("valid regex")
});

/// Locator from an upload response body.
pub fn parse_url(body: &str) -> Result<String> {
    let url = URL_FIELD
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace("\\/", "/"))
        .filter(|u| !u.is_empty());
    url.ok_or_else(|| {
        let snippet: String = body.chars().take(120).collect();
        DocflowError::ParseError(format!("no url field in upload response: {snippet:?}"))
    })
}

/// One file's trip to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadRecord {
    pub source_path: PathBuf,
    pub destination_parent: String,
    pub result_url: Option<String>,
}

/// Builds upload invocations against one server.
#[derive(Debug, Clone)]
pub struct UploadPipeline {
    program: String,
    server: String,
}

impl UploadPipeline {
    pub fn new(program: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            server: server.into(),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Fails fast with [`DocflowError::FileNotFound`] before anything is
    /// launched.
    pub fn prepare(&self, file: &Path, parent: &str) -> Result<(UploadRecord, Invocation)> {
        if !file.is_file() {
            return Err(DocflowError::FileNotFound(file.to_path_buf()));
        }
        let record = UploadRecord {
            source_path: file.to_path_buf(),
            destination_parent: parent.to_string(),
            result_url: None,
        };
        let args = build_upload_args(&self.server, file, parent);
        Ok((record, Invocation::new(OperationKind::Upload, &self.program, args)))
    }

    /// Fills in the locator from a successful transport run.
    pub fn complete(&self, mut record: UploadRecord, output: &ProcessOutput) -> Result<UploadRecord> {
        record.result_url = Some(parse_url(&output.stdout)?);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_from_compact_json() {
        let body = r#"{"code":200,"msg":"ok","data":{"url":"http://files.test/exam/x.jpg"}}"#;
        assert_eq!(parse_url(body).unwrap(), "http://files.test/exam/x.jpg");
    }

    #[test]
    fn url_with_whitespace_and_escaped_slashes() {
        let body = "{\n  \"url\" : \"http:\\/\\/files.test\\/a.jpg\"\n}";
        assert_eq!(parse_url(body).unwrap(), "http://files.test/a.jpg");
    }

    #[test]
    fn malformed_response_is_a_parse_error() {
        assert!(matches!(
            parse_url("<html>502 Bad Gateway</html>"),
            Err(DocflowError::ParseError(_))
        ));
        assert!(matches!(parse_url(r#"{"url":""}"#), Err(DocflowError::ParseError(_))));
    }

    #[test]
    fn prepare_fails_fast_on_missing_file() {
        let pipeline = UploadPipeline::new("curl", "http://files.test");
        let err = pipeline
            .prepare(Path::new("/tmp/docflow-missing-x.jpg"), DEFAULT_PARENT)
            .unwrap_err();
        assert!(matches!(err, DocflowError::FileNotFound(_)));
    }

    #[test]
    fn prepare_and_complete() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let pipeline = UploadPipeline::new("curl", "http://files.test");
        let (record, inv) = pipeline.prepare(file.path(), "/exam/").unwrap();
        assert_eq!(inv.program, "curl");
        assert_eq!(inv.last_arg(), Some("http://files.test/system/file/upload"));
        assert_eq!(record.result_url, None);

        let done = pipeline
            .complete(record, &ProcessOutput::success(r#"{"url":"http://files.test/f"}"#))
            .unwrap();
        assert_eq!(done.result_url.as_deref(), Some("http://files.test/f"));
        assert_eq!(done.destination_parent, "/exam/");
    }
}
