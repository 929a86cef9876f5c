use reqwest::{Client, ClientBuilder};
use std::collections::HashSet;
use std::time::Duration;
use tracing::warn;
use url::Url;
use crate::error::PerioscopeError;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = concat!("Perioscope/", env!("CARGO_PKG_VERSION"));

/// An HTTP client that only talks to approved hosts.
///
/// Every provider client goes through this type so a misconfigured base URL
/// cannot leak document text to an arbitrary host.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    client: Client,
    allowlist: HashSet<String>,
}

impl SandboxClient {
    /// Creates a client with the default bibliographic and model-provider allowlist
    /// and a 30 second request timeout.
    pub fn new() -> Result<Self, PerioscopeError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, PerioscopeError> {
        let domains = [
            "eutils.ncbi.nlm.nih.gov", // PubMed E-utilities
            "www.ncbi.nlm.nih.gov",    // PMC
            "pubmed.ncbi.nlm.nih.gov", // PubMed web
            "api.crossref.org",        // CrossRef
            "api.semanticscholar.org", // Semantic Scholar
            "api.openai.com",          // OpenAI
            "api.anthropic.com",       // Anthropic
            "localhost",               // Ollama / local gateways
            "127.0.0.1",
        ];
        let allowlist = domains.iter().map(|d| d.to_string()).collect();

        let client = ClientBuilder::new()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PerioscopeError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, allowlist })
    }

    /// Appends an exact hostname to the allowlist.
    pub fn allow_domain(&mut self, domain: &str) {
        self.allowlist.insert(domain.to_string());
    }

    /// Allows the host of a configured base URL (e.g. a self-hosted mirror).
    pub fn allow_url_host(&mut self, url: &str) -> Result<(), PerioscopeError> {
        let parsed = Url::parse(url)
            .map_err(|e| PerioscopeError::Config(format!("invalid base URL {url}: {e}")))?;
        match parsed.host_str() {
            Some(host) => {
                self.allow_domain(host);
                Ok(())
            }
            None => Err(PerioscopeError::Config(format!("base URL {url} has no host"))),
        }
    }

    pub fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else { return false };
        let Some(host) = parsed.host_str() else { return false };
        self.allowlist
            .iter()
            .any(|allowed| host == allowed || host.ends_with(&format!(".{}", allowed)))
    }

    fn check(&self, url: &str) -> Result<(), PerioscopeError> {
        if self.is_allowed(url) {
            Ok(())
        } else {
            warn!(url, "Blocked request to host outside the allowlist");
            Err(PerioscopeError::SecurityError(format!(
                "domain not in allowlist for URL {}",
                url
            )))
        }
    }

    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, PerioscopeError> {
        self.check(url)?;
        Ok(self.client.get(url))
    }

    pub fn post(&self, url: &str) -> Result<reqwest::RequestBuilder, PerioscopeError> {
        self.check(url)?;
        Ok(self.client.post(url))
    }
}
