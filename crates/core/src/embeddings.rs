use crate::error::Result;
use crate::models::Repository;
use providers::ProviderRegistry;

#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    pub texts: Vec<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub vectors: Vec<Vec<f32>>,
}

pub async fn embed(req: EmbeddingRequest, registry: &ProviderRegistry) -> Result<EmbeddingResult> {
    let provider = registry.embedding(req.provider.as_deref())?;
    let resp = provider.embed(&req.texts).await?;
    Ok(EmbeddingResult {
        vectors: resp.vectors,
    })
}

/// Text embedded for a repository: identity, description, topics and summary.
pub fn repository_text(repo: &Repository) -> String {
    let mut parts = vec![repo.full_name.replace('/', " ")];
    if let Some(desc) = repo.description.as_deref().filter(|d| !d.trim().is_empty()) {
        parts.push(desc.to_string());
    }
    if let Some(lang) = &repo.language {
        parts.push(format!("Language: {lang}"));
    }
    if !repo.topics.is_empty() {
        parts.push(format!("Topics: {}", repo.topics.join(", ")));
    }
    if let Some(summary) = repo.summary.as_deref().filter(|s| !s.trim().is_empty()) {
        parts.push(summary.to_string());
    }
    if !repo.categories.is_empty() {
        parts.push(format!("Categories: {}", repo.categories.join(", ")));
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_text_skips_empty_parts() {
        let repo = Repository {
            full_name: "tokio-rs/axum".into(),
            description: Some("  ".into()),
            topics: vec!["http".into(), "web".into()],
            ..Repository::default()
        };
        let text = repository_text(&repo);
        assert_eq!(text, "tokio-rs axum\nTopics: http, web");
    }
}
