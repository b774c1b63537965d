//! Domain/query fan-out for a seed concept.

use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Result, XkgError};
use crate::graph::{normalize_text, Domain};
use crate::llm::{extract_json_object, GenerationClient};

pub const MIN_QUERIES: usize = 3;
pub const MAX_QUERIES: usize = 6;

const PLANNER_SYSTEM: &str = "You plan literature searches for a cross-domain knowledge graph. \
Return ONLY a JSON object of the form {\"domains\": {\"<Domain>\": [\"query\", ...]}}. No markdown.";

/// Planner input.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub concept: String,
    /// Explicit domain subset; `None` uses the configured defaults
    pub domains: Option<Vec<Domain>>,
    pub depth: u8,
    /// Plan a `Core` pass about the concept itself
    pub include_core: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DomainQueries {
    pub domain: Domain,
    pub queries: Vec<String>,
}

/// Ordered mapping domain -> queries.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub concept: String,
    pub entries: Vec<DomainQueries>,
}

impl QueryPlan {
    pub fn domains(&self) -> impl Iterator<Item = &Domain> {
        self.entries.iter().map(|e| &e.domain)
    }

    pub fn queries(&self, domain: &Domain) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|e| &e.domain == domain)
            .map(|e| e.queries.as_slice())
    }

    pub fn total_queries(&self) -> usize {
        self.entries.iter().map(|e| e.queries.len()).sum()
    }
}

/// Number of queries per domain for a depth (1..=3).
pub fn queries_for_depth(depth: u8) -> usize {
    (depth as usize + 2).clamp(MIN_QUERIES, MAX_QUERIES)
}

#[derive(Clone)]
pub struct Planner {
    default_domains: Vec<Domain>,
    generator: Option<Arc<dyn GenerationClient>>,
}

impl Planner {
    pub fn new(default_domains: Vec<Domain>) -> Self {
        Self {
            default_domains,
            generator: None,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn GenerationClient>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn default_domains(&self) -> &[Domain] {
        &self.default_domains
    }

    /// Domain set for a request: explicit or defaults, `Bridge` removed,
    /// duplicates removed, `Core` appended when requested.
    pub fn resolve_domains(&self, request: &PlanRequest) -> Result<Vec<Domain>> {
        let requested: &[Domain] = match &request.domains {
            Some(explicit) => explicit,
            None => &self.default_domains,
        };

        let mut seen = HashSet::new();
        let mut domains: Vec<Domain> = requested
            .iter()
            .filter(|d| !d.as_str().is_empty() && !d.is_bridge())
            .filter(|d| seen.insert((*d).clone()))
            .cloned()
            .collect();

        if domains.is_empty() {
            return Err(XkgError::Planning("the domain set is empty".to_string()));
        }
        if request.include_core && !domains.iter().any(Domain::is_core) {
            domains.push(Domain::core());
        }
        Ok(domains)
    }

    /// Build the query plan, asking the generation model when one is configured.
    pub async fn plan(&self, request: &PlanRequest) -> Result<QueryPlan> {
        let concept = request.concept.trim();
        if concept.is_empty() {
            return Err(XkgError::Planning("the concept is empty".to_string()));
        }
        let domains = self.resolve_domains(request)?;
        let per_domain = queries_for_depth(request.depth);

        let suggested = match &self.generator {
            Some(generator) => match self.ask_model(generator.as_ref(), concept, &domains, per_domain).await {
                Ok(suggested) => suggested,
                Err(e) => {
                    log::warn!("Model planning failed for '{}', using templates: {}", concept, e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let mut used: HashSet<String> = HashSet::new();
        let mut entries = Vec::with_capacity(domains.len());
        for domain in domains {
            let from_model = suggested
                .iter()
                .find(|(d, _)| *d == domain)
                .map(|(_, qs)| qs.as_slice())
                .unwrap_or_default();
            let queries = select_queries(concept, &domain, from_model, per_domain, &mut used);
            entries.push(DomainQueries { domain, queries });
        }

        Ok(QueryPlan {
            concept: concept.to_string(),
            entries,
        })
    }

    async fn ask_model(
        &self,
        generator: &dyn GenerationClient,
        concept: &str,
        domains: &[Domain],
        per_domain: usize,
    ) -> Result<Vec<(Domain, Vec<String>)>> {
        let payload = json!({
            "concept": concept,
            "domains": domains.iter().map(Domain::as_str).collect::<Vec<_>>(),
            "queries_per_domain": per_domain,
            "requirements": [
                "For EACH domain output 3-6 short search queries or related textbook concepts.",
                "Queries must be specific to the domain; never repeat a query across domains.",
                "Output {\"domains\": {\"Domain\": [\"query\", ...]}}",
            ],
        });

        let raw = generator.complete(PLANNER_SYSTEM, &payload.to_string()).await?;
        let obj = extract_json_object(&raw)?;
        let Some(Value::Object(by_domain)) = obj.get("domains") else {
            return Err(XkgError::Planning("model plan has no domains object".to_string()));
        };

        Ok(domains
            .iter()
            .map(|domain| {
                let queries = by_domain
                    .get(domain.as_str())
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::trim)
                            .filter(|q| !q.is_empty())
                            .take(MAX_QUERIES)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                (domain.clone(), queries)
            })
            .collect())
    }
}

/// Model suggestions first, then templates, skipping anything already used
/// by an earlier domain.
fn select_queries(
    concept: &str,
    domain: &Domain,
    from_model: &[String],
    per_domain: usize,
    used: &mut HashSet<String>,
) -> Vec<String> {
    let target = per_domain.max(from_model.len().min(MAX_QUERIES));
    let mut out = Vec::with_capacity(target);

    let candidates = from_model
        .iter()
        .cloned()
        .chain(template_queries(concept, domain));
    for query in candidates {
        if out.len() >= target {
            break;
        }
        if used.insert(normalize_text(&query)) {
            out.push(query);
        }
    }
    out
}

fn domain_vocabulary(domain: &Domain) -> &'static [&'static str] {
    match domain.as_str() {
        "Mathematics" => &["formal definition", "theorem", "probability theory", "proof techniques", "mathematical model"],
        "Physics" => &["physical law", "thermodynamics", "statistical mechanics", "experimental evidence", "physical systems"],
        "Computer Science" => &["algorithms", "information theory", "machine learning", "data structures", "computational complexity"],
        "Biology" => &["living systems", "evolution", "genetics", "ecology", "bioinformatics"],
        "Economics" => &["markets", "decision making", "game theory", "economic models", "risk and uncertainty"],
        _ => &[],
    }
}

/// Curated related terms for seeds that are common in demos.
fn curated_terms(concept: &str, domain: &Domain) -> &'static [&'static str] {
    let c = concept.to_lowercase();
    if c.contains("entropy") {
        match domain.as_str() {
            "Mathematics" => &["probability distribution", "KL divergence", "mutual information"],
            "Physics" => &["second law of thermodynamics", "statistical mechanics entropy", "microstates"],
            "Computer Science" => &["Shannon entropy", "cross-entropy", "coding theory"],
            "Biology" => &["sequence diversity", "information content of DNA", "diversity index"],
            "Economics" => &["uncertainty", "information asymmetry", "diversity measure"],
            _ => &[],
        }
    } else if c.contains("recursion") || c.contains("recursive") {
        match domain.as_str() {
            "Mathematics" => &["recurrence relation", "mathematical induction", "Fibonacci sequence"],
            "Physics" => &["fractal", "self-similarity", "scale invariance"],
            "Computer Science" => &["recursive function", "call stack", "divide and conquer"],
            "Biology" => &["feedback loop", "branching structures", "hierarchical organization"],
            "Economics" => &["dynamic programming", "Bellman equation", "recursive utility"],
            _ => &[],
        }
    } else {
        &[]
    }
}

/// Deterministic candidate queries for one domain, most specific first.
pub fn template_queries(concept: &str, domain: &Domain) -> Vec<String> {
    let c = concept.trim();
    if domain.is_core() {
        return ["", " definition", " overview", " history", " key properties", " examples"]
            .iter()
            .map(|suffix| format!("{}{}", c, suffix))
            .collect();
    }

    let d = domain.as_str();
    let mut out = vec![format!("{} in {}", c, d)];
    out.extend(curated_terms(c, domain).iter().map(|t| t.to_string()));
    out.extend(domain_vocabulary(domain).iter().map(|v| format!("{} {}", c, v)));
    out.extend([
        format!("{} applications ({})", c, d),
        format!("{} related concepts ({})", c, d),
        format!("{} methods ({})", c, d),
        format!("{} history ({})", c, d),
        format!("{} open problems ({})", c, d),
    ]);
    out
}
