// src/docs/mod.rs — Document collaborator
//
// Validation outcomes, comment responses and citations land here as
// artifacts; pending comments and external references are discovered
// by scanning the main document for `%% COMMENT:` and `%% REF:`
// marker lines.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::core::state::Comment;
use crate::infra::errors::ArfError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Full raw output of one validation run.
    ValidationAppendix,
    /// Short summary appended to the running summary document.
    ValidationSummary,
    CommentResponse,
    Citation,
    /// Prose produced by a full-review synthesis pass.
    Synthesis,
    /// The accumulated open-questions feed (replaced wholesale).
    Questions,
}

/// A reference discovered in the main document that has not yet been
/// processed into a citation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist an artifact and return a stable reference to it.
    async fn append_artifact(
        &self,
        kind: ArtifactKind,
        id: &str,
        content: &str,
    ) -> Result<String, ArfError>;

    async fn pending_comments(&self) -> Result<Vec<Comment>, ArfError>;

    async fn unprocessed_references(&self) -> Result<Vec<Reference>, ArfError>;
}

/// Filesystem-backed document store rooted at an output directory.
pub struct FsDocumentStore {
    output_dir: PathBuf,
    main_doc: String,
}

impl FsDocumentStore {
    pub fn new(output_dir: impl Into<PathBuf>, main_doc: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            main_doc: main_doc.into(),
        }
    }

    fn main_doc_path(&self) -> PathBuf {
        self.output_dir.join(&self.main_doc)
    }

    async fn append_to(&self, file: &str, content: &str) -> Result<(), ArfError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(file);
        let mut existing = tokio::fs::read_to_string(&path).await.unwrap_or_default();
        existing.push_str(content);
        existing.push('\n');
        tokio::fs::write(&path, existing).await?;
        Ok(())
    }

    /// Lines of the main document, or empty if it does not exist yet.
    async fn main_doc_lines(&self) -> Result<Vec<String>, ArfError> {
        match tokio::fs::read_to_string(self.main_doc_path()).await {
            Ok(c) => Ok(c.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn append_artifact(
        &self,
        kind: ArtifactKind,
        id: &str,
        content: &str,
    ) -> Result<String, ArfError> {
        match kind {
            ArtifactKind::ValidationAppendix => {
                let dir = self.output_dir.join("appendices");
                tokio::fs::create_dir_all(&dir).await?;
                let name = format!("appendix_{id}.md");
                tokio::fs::write(dir.join(&name), content).await?;
                Ok(format!("appendices/{name}"))
            }
            ArtifactKind::ValidationSummary => {
                self.append_to("summary.md", content).await?;
                Ok(format!("summary.md#{id}"))
            }
            ArtifactKind::CommentResponse => {
                self.append_to("responses.md", content).await?;
                Ok(format!("responses.md#{id}"))
            }
            ArtifactKind::Citation => {
                self.append_to("citations.md", content).await?;
                Ok(format!("citations.md#{id}"))
            }
            ArtifactKind::Synthesis => {
                self.append_to("synthesis.md", content).await?;
                Ok(format!("synthesis.md#{id}"))
            }
            ArtifactKind::Questions => {
                tokio::fs::create_dir_all(&self.output_dir).await?;
                tokio::fs::write(self.output_dir.join("questions.md"), content).await?;
                Ok("questions.md".to_string())
            }
        }
    }

    async fn pending_comments(&self) -> Result<Vec<Comment>, ArfError> {
        let mut comments = Vec::new();
        for line in self.main_doc_lines().await? {
            if let Some(text) = line.trim().strip_prefix("%% COMMENT:") {
                let text = text.trim().to_string();
                if !text.is_empty() {
                    comments.push(Comment {
                        id: format!("comment-{:016x}", fnv1a(text.as_bytes())),
                        text,
                    });
                }
            }
        }
        Ok(comments)
    }

    async fn unprocessed_references(&self) -> Result<Vec<Reference>, ArfError> {
        let mut refs = Vec::new();
        for line in self.main_doc_lines().await? {
            if let Some(url) = line.trim().strip_prefix("%% REF:") {
                let url = url.trim().to_string();
                if !url.is_empty() {
                    refs.push(Reference {
                        id: format!("ref-{:016x}", fnv1a(url.as_bytes())),
                        url,
                    });
                }
            }
        }
        Ok(refs)
    }
}

/// FNV-1a, used for stable comment/reference identifiers derived from
/// their text.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
