//! Explanatory text around a finished decision.
//!
//! Two collaborators live behind traits here: a [`NarrativeGenerator`] that
//! turns a decision into prose (typically a language model) and a
//! [`ContextSearch`] that supplies research snippets for it. Neither can alter
//! the risk label, severity or phenotype; the decision is final before they
//! run, and every failure degrades to a deterministic template.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{Explanation, Gene, Phenotype, RiskLabel};

/// Attempts made against the generator: the first call plus one retry
pub const MAX_GENERATION_ATTEMPTS: usize = 2;

/// Search results requested per query
pub const SEARCH_RESULT_LIMIT: usize = 3;

/// Characters of each snippet passed on to the generator
pub const SNIPPET_PREVIEW_CHARS: usize = 200;

pub const NO_SEARCH_RESULTS: &str = "No web search results available.";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Everything a generator may see about one drug decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeRequest {
    pub gene: Gene,
    pub diplotype: String,
    pub phenotype: Phenotype,
    pub drug: String,
    pub risk_label: RiskLabel,
    pub recommendation: String,
    pub rsids: Vec<String>,
    pub research_context: Option<String>,
}

impl NarrativeRequest {
    /// Prompt text for generators backed by a chat model
    pub fn prompt(&self) -> String {
        let rsids = if self.rsids.is_empty() {
            "N/A".to_string()
        } else {
            self.rsids.join(", ")
        };

        let context = match &self.research_context {
            Some(context) if !context.is_empty() => {
                format!("\n\nAdditional context from recent research:\n{}\n", context)
            }
            _ => String::new(),
        };

        format!(
            "Explain the following pharmacogenomic finding for a clinician and a patient.\n\n\
             Gene: {gene}\n\
             Diplotype: {diplotype}\n\
             Phenotype: {phenotype}\n\
             Drug: {drug}\n\
             Risk assessment: {risk}\n\
             Recommendation: {recommendation}\n\
             Detected variants (rsIDs): {rsids}{context}\n\n\
             Respond with a JSON object holding exactly three non-empty string fields:\n\
             \"mechanism\": how {gene} affects {drug} metabolism, 2-3 sentences.\n\
             \"clinical_context\": why this risk assessment applies, 2-3 sentences.\n\
             \"patient_friendly_summary\": a plain-language summary, 2-3 sentences.\n\
             Do not change the risk assessment or the recommendation.",
            gene = self.gene,
            diplotype = self.diplotype,
            phenotype = self.phenotype,
            drug = self.drug,
            risk = self.risk_label,
            recommendation = self.recommendation,
            rsids = rsids,
            context = context,
        )
    }
}

/// Produces raw explanation text, expected to be a JSON object
pub trait NarrativeGenerator: Send + Sync {
    fn generate(&self, request: &NarrativeRequest) -> Result<String, CollaboratorError>;
}

/// Outcome of reading a generator response
#[derive(Debug)]
pub enum ParsedExplanation {
    Valid(Explanation),
    /// Well-formed JSON missing the named field, or carrying it empty
    Incomplete(&'static str),
    Malformed(serde_json::Error),
}

/// Parse generator output, tolerating a surrounding Markdown code fence
pub fn parse_explanation(raw: &str) -> ParsedExplanation {
    let value: Value = match serde_json::from_str(strip_code_fence(raw)) {
        Ok(value) => value,
        Err(err) => return ParsedExplanation::Malformed(err),
    };

    match explanation_from(&value) {
        Ok(explanation) => ParsedExplanation::Valid(explanation),
        Err(field) => ParsedExplanation::Incomplete(field),
    }
}

fn explanation_from(value: &Value) -> Result<Explanation, &'static str> {
    Ok(Explanation {
        mechanism: required_field(value, "mechanism")?,
        clinical_context: required_field(value, "clinical_context")?,
        patient_friendly_summary: required_field(value, "patient_friendly_summary")?,
    })
}

fn required_field(value: &Value, name: &'static str) -> Result<String, &'static str> {
    match value.get(name).and_then(Value::as_str) {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        _ => Err(name),
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Deterministic explanation used whenever generation is skipped or fails
pub fn fallback_explanation(request: &NarrativeRequest) -> Explanation {
    let NarrativeRequest {
        gene,
        diplotype,
        phenotype,
        drug,
        ..
    } = request;

    let mechanism = match request.risk_label {
        RiskLabel::Safe => format!(
            "{gene} encodes an enzyme that metabolizes {drug}. The {diplotype} diplotype \
             gives {phenotype} metabolizer status, consistent with normal enzyme function."
        ),
        RiskLabel::AdjustDosage => format!(
            "The {gene} {diplotype} diplotype gives {phenotype} metabolizer status, which \
             alters {drug} metabolism. A dose change is needed to reach the intended effect."
        ),
        RiskLabel::Toxic => format!(
            "The {gene} {diplotype} diplotype gives {phenotype} status and markedly changes \
             how {drug} is processed, raising the risk of accumulation and toxicity."
        ),
        RiskLabel::Ineffective => format!(
            "The {gene} {diplotype} diplotype gives {phenotype} metabolizer status, reducing \
             activation or speeding clearance of {drug} so that it may not work as intended."
        ),
        RiskLabel::Unknown => format!(
            "Little evidence links the {gene} {diplotype} diplotype to {drug} metabolism. \
             Standard clinical monitoring is advised."
        ),
    };

    Explanation {
        mechanism,
        clinical_context: format!(
            "CPIC guidance calls for particular care when prescribing {drug} to patients with \
             {phenotype} status for {gene}. The recommendation balances efficacy against the \
             risk of adverse effects."
        ),
        patient_friendly_summary: format!(
            "Your genetic test suggests your body handles {drug} differently from most people. \
             Your care team will use this to choose a safe and effective treatment for you."
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplanationSource {
    Generated,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationOutcome {
    pub explanation: Explanation,
    pub source: ExplanationSource,
}

/// Applies the retry-then-fallback policy around the optional collaborators
#[derive(Clone, Copy, Default)]
pub struct Narrator<'a> {
    generator: Option<&'a dyn NarrativeGenerator>,
    search: Option<&'a dyn ContextSearch>,
}

impl<'a> Narrator<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generator(mut self, generator: &'a dyn NarrativeGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_search(mut self, search: &'a dyn ContextSearch) -> Self {
        self.search = Some(search);
        self
    }

    /// Explain a decision.
    ///
    /// A response missing a field is retried once; malformed JSON or a
    /// transport error goes straight to the fallback template.
    pub fn explain(&self, mut request: NarrativeRequest) -> ExplanationOutcome {
        let generator = match self.generator {
            Some(generator) => generator,
            None => {
                debug!("No narrative generator configured, using template");
                return Self::fallback(&request);
            }
        };

        if request.research_context.is_none() {
            request.research_context = self.research_context(&request);
        }

        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let raw = match generator.generate(&request) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!("Narrative generation failed for {}: {}", request.drug, err);
                    return Self::fallback(&request);
                }
            };

            match parse_explanation(&raw) {
                ParsedExplanation::Valid(explanation) => {
                    return ExplanationOutcome {
                        explanation,
                        source: ExplanationSource::Generated,
                    }
                }
                ParsedExplanation::Incomplete(field) => {
                    warn!(
                        "Narrative for {} missing '{}' (attempt {}/{})",
                        request.drug, field, attempt, MAX_GENERATION_ATTEMPTS
                    );
                }
                ParsedExplanation::Malformed(err) => {
                    warn!("Narrative for {} is not valid JSON: {}", request.drug, err);
                    return Self::fallback(&request);
                }
            }
        }

        Self::fallback(&request)
    }

    fn research_context(&self, request: &NarrativeRequest) -> Option<String> {
        let search = self.search?;
        let query = context_query(request.gene, &request.diplotype, &request.drug);

        let hits = search
            .search(&query, SEARCH_RESULT_LIMIT)
            .unwrap_or_else(|err| {
                warn!("Context search failed: {}", err);
                Vec::new()
            });

        Some(format_search_results(&hits))
    }

    fn fallback(request: &NarrativeRequest) -> ExplanationOutcome {
        ExplanationOutcome {
            explanation: fallback_explanation(request),
            source: ExplanationSource::Fallback,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
    pub source: String,
}

impl SearchHit {
    /// Build a hit, deriving `source` from the URL's host
    pub fn new(title: impl Into<String>, snippet: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            title: title.into(),
            snippet: snippet.into(),
            source: source_domain(&url),
            url,
        }
    }
}

/// Web or literature search used only to enrich explanations
pub trait ContextSearch: Send + Sync {
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, CollaboratorError>;
}

pub fn context_query(gene: Gene, diplotype: &str, drug: &str) -> String {
    format!(
        "{} {} pharmacogenomics {} CPIC clinical guidelines",
        gene, diplotype, drug
    )
}

/// Render hits as a numbered block for the generator prompt
pub fn format_search_results(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return NO_SEARCH_RESULTS.to_string();
    }

    let mut formatted = String::from("Web Search Results:\n\n");
    for (i, hit) in hits.iter().enumerate() {
        let preview: String = hit.snippet.chars().take(SNIPPET_PREVIEW_CHARS).collect();
        formatted.push_str(&format!(
            "{}. {}\n   Source: {}\n   {}...\n\n",
            i + 1,
            hit.title,
            hit.source,
            preview
        ));
    }
    formatted
}

/// Host part of a URL, or `Unknown`
pub fn source_domain(url: &str) -> String {
    let rest = match url.split_once("://") {
        Some((_, rest)) => rest,
        None => return "Unknown".to_string(),
    };

    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();

    if host.is_empty() {
        "Unknown".to_string()
    } else {
        host.to_string()
    }
}

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(500);

/// Search wrapper with a TTL cache and a minimum spacing between upstream calls.
///
/// Construct once and share by reference; the cache and the limiter are owned
/// by the instance. Only successful responses are cached.
pub struct CachedSearch<S> {
    inner: S,
    ttl: Duration,
    capacity: usize,
    min_interval: Duration,
    cache: Mutex<HashMap<String, (Instant, Vec<SearchHit>)>>,
    last_request: Mutex<Option<Instant>>,
}

impl<S: ContextSearch> CachedSearch<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            ttl: DEFAULT_CACHE_TTL,
            capacity: DEFAULT_CACHE_CAPACITY,
            min_interval: DEFAULT_MIN_INTERVAL,
            cache: Mutex::new(HashMap::new()),
            last_request: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().len()
    }

    fn cached(&self, key: &str) -> Option<Vec<SearchHit>> {
        let cache = self.cache.lock();
        cache
            .get(key)
            .filter(|(stored, _)| stored.elapsed() < self.ttl)
            .map(|(_, hits)| hits.clone())
    }

    /// Block until the minimum interval since the previous upstream call has passed
    fn wait_for_slot(&self) {
        let mut last = self.last_request.lock();
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                std::thread::sleep(self.min_interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }

    fn store(&self, key: String, hits: Vec<SearchHit>) {
        let mut cache = self.cache.lock();
        let ttl = self.ttl;
        cache.retain(|_, (stored, _)| stored.elapsed() < ttl);

        while cache.len() >= self.capacity {
            let oldest = cache
                .iter()
                .min_by_key(|(_, (stored, _))| *stored)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(oldest) => {
                    cache.remove(&oldest);
                }
                None => break,
            }
        }

        cache.insert(key, (Instant::now(), hits));
    }
}

impl<S: ContextSearch> ContextSearch for CachedSearch<S> {
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, CollaboratorError> {
        let key = format!("{}:{}", max_results, query);
        if let Some(hits) = self.cached(&key) {
            debug!("Search cache hit: {}", query);
            return Ok(hits);
        }

        self.wait_for_slot();
        let hits = self.inner.search(query, max_results)?;
        self.store(key, hits.clone());
        Ok(hits)
    }
}
