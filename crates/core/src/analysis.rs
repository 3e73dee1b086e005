use crate::error::{with_timeout, CoreError};
use crate::models::{AnalysisFields, Repository};
use providers::{AnalysisRequest, AnalysisResponse, ProviderRegistry};
use std::time::Duration;
use tracing::{debug, warn};

/// LLM analysis of a repository. Failures degrade to "no analysis".
#[derive(Clone)]
pub struct Analyzer {
    registry: ProviderRegistry,
    provider: Option<String>,
    timeout: Duration,
}

impl Analyzer {
    pub fn new(registry: ProviderRegistry, provider: Option<String>, timeout: Duration) -> Self {
        Self {
            registry,
            provider,
            timeout,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.registry.llm(self.provider.as_deref()).is_ok()
    }

    pub async fn analyze(&self, repo: &Repository, readme: Option<String>) -> Option<AnalysisFields> {
        let llm = match self.registry.llm(self.provider.as_deref()) {
            Ok(llm) => llm,
            Err(e) => {
                debug!(repo = %repo.full_name, "analysis skipped: {e}");
                return None;
            }
        };
        let request = AnalysisRequest {
            full_name: repo.full_name.clone(),
            description: repo.description.clone(),
            readme,
            language: repo.language.clone(),
            topics: repo.topics.clone(),
        };
        let call = async { llm.analyze(&request).await.map_err(CoreError::from) };
        match with_timeout("repository analysis", self.timeout, call).await {
            Ok(resp) => Some(to_fields(resp, chrono::Utc::now().timestamp())),
            Err(e) => {
                warn!(repo = %repo.full_name, "analysis failed: {e}");
                None
            }
        }
    }
}

fn to_fields(resp: AnalysisResponse, analyzed_at: i64) -> AnalysisFields {
    let summary = resp.summary.trim();
    AnalysisFields {
        summary: (!summary.is_empty()).then(|| summary.to_string()),
        categories: clean(resp.categories),
        features: clean(resp.features),
        use_cases: clean(resp.use_cases),
        analyzed_at: Some(analyzed_at),
    }
}

fn clean(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values {
        let v = v.trim().to_string();
        if !v.is_empty() && !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::{LlmProvider, ProviderError};
    use std::sync::Arc;

    struct Slow;

    #[async_trait::async_trait]
    impl LlmProvider for Slow {
        async fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(AnalysisResponse::default())
        }
    }

    #[test]
    fn response_is_trimmed_and_deduplicated() {
        let fields = to_fields(
            AnalysisResponse {
                summary: "  ".into(),
                categories: vec!["cli".into(), " cli ".into(), "".into(), "db".into()],
                features: vec![],
                use_cases: vec!["ops".into()],
            },
            7,
        );
        assert_eq!(fields.summary, None);
        assert_eq!(fields.categories, vec!["cli", "db"]);
        assert_eq!(fields.use_cases, vec!["ops"]);
        assert_eq!(fields.analyzed_at, Some(7));
    }

    #[tokio::test]
    async fn unconfigured_provider_yields_none() {
        let analyzer = Analyzer::new(ProviderRegistry::new(), None, Duration::from_secs(1));
        assert!(!analyzer.is_configured());
        assert!(analyzer.analyze(&Repository::default(), None).await.is_none());
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let registry = ProviderRegistry::new()
            .with_llm("slow", Arc::new(Slow))
            .set_preferred_llm("slow");
        let analyzer = Analyzer::new(registry, None, Duration::from_millis(20));
        assert!(analyzer.analyze(&Repository::default(), None).await.is_none());
    }
}
