//! Request/response bodies shared by the HTTP adapter and the CLIs.

use serde::{Deserialize, Serialize};

use crate::error::{Result, XkgError};
use crate::graph::{Domain, Edge, Node};
use crate::jobs::{ExpandRequest, GenerationRequest};

pub const MAX_CONCEPT_CHARS: usize = 80;
pub const MIN_DEPTH: u8 = 1;
pub const MAX_DEPTH: u8 = 3;
pub const MAX_DEPTH_INCREMENT: u8 = 2;

fn default_depth() -> u8 {
    2
}

fn default_strict() -> bool {
    true
}

fn default_increment() -> u8 {
    1
}

fn validate_concept(concept: &str) -> Result<String> {
    let trimmed = concept.trim();
    let chars = trimmed.chars().count();
    if chars == 0 || chars > MAX_CONCEPT_CHARS {
        return Err(XkgError::InvalidInput(format!(
            "concept must be 1-{} characters, got {}",
            MAX_CONCEPT_CHARS, chars
        )));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerateBody {
    pub concept: String,
    #[serde(default)]
    pub domains: Option<Vec<String>>,
    #[serde(default = "default_depth")]
    pub depth: u8,
    #[serde(default = "default_strict")]
    pub strict_check: bool,
}

impl GenerateBody {
    /// Validate and convert into a pipeline request.
    pub fn into_request(self) -> Result<GenerationRequest> {
        let concept = validate_concept(&self.concept)?;
        if !(MIN_DEPTH..=MAX_DEPTH).contains(&self.depth) {
            return Err(XkgError::InvalidInput(format!(
                "depth must be {}-{}, got {}",
                MIN_DEPTH, MAX_DEPTH, self.depth
            )));
        }
        let domains = match self.domains {
            Some(labels) => {
                if labels.iter().any(|d| d.trim().is_empty()) {
                    return Err(XkgError::InvalidInput("domain labels must not be blank".to_string()));
                }
                Some(labels.iter().map(|d| Domain::new(d.trim())).collect())
            }
            None => None,
        };
        Ok(GenerationRequest {
            concept,
            domains,
            depth: self.depth,
            strict_check: self.strict_check,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExpandBody {
    pub node_id: String,
    #[serde(default = "default_increment")]
    pub depth_increment: u8,
    #[serde(default)]
    pub concept: Option<String>,
    #[serde(default = "default_strict")]
    pub strict_check: bool,
}

impl ExpandBody {
    pub fn into_request(self) -> Result<ExpandRequest> {
        let node_id = self.node_id.trim().to_string();
        if node_id.is_empty() {
            return Err(XkgError::InvalidInput("node_id is required".to_string()));
        }
        if !(1..=MAX_DEPTH_INCREMENT).contains(&self.depth_increment) {
            return Err(XkgError::InvalidInput(format!(
                "depth_increment must be 1-{}, got {}",
                MAX_DEPTH_INCREMENT, self.depth_increment
            )));
        }
        let concept = self.concept.as_deref().map(validate_concept).transpose()?;
        Ok(ExpandRequest {
            node_id,
            depth_increment: self.depth_increment,
            concept,
            strict_check: self.strict_check,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAccepted {
    pub job_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphParams {
    pub depth: Option<usize>,
    pub version: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathParams {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub version: Option<u32>,
}

/// Shortest undirected path between two nodes of one graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathResponse {
    pub concept: String,
    pub version: u32,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(concept: &str, depth: u8) -> GenerateBody {
        GenerateBody {
            concept: concept.to_string(),
            domains: None,
            depth,
            strict_check: true,
        }
    }

    #[test]
    fn test_generate_defaults() {
        let body: GenerateBody = serde_json::from_str(r#"{"concept": "  Entropy "}"#).unwrap();
        let request = body.into_request().unwrap();
        assert_eq!(request.concept, "Entropy");
        assert_eq!(request.depth, 2);
        assert!(request.strict_check);
        assert!(request.domains.is_none());
    }

    #[test]
    fn test_generate_validation() {
        assert!(body("", 2).into_request().is_err());
        assert!(body(&"x".repeat(81), 2).into_request().is_err());
        assert!(body(&"x".repeat(80), 2).into_request().is_ok());
        assert!(body("Entropy", 0).into_request().is_err());
        assert!(body("Entropy", 4).into_request().is_err());

        let mut blank = body("Entropy", 1);
        blank.domains = Some(vec!["Physics".to_string(), " ".to_string()]);
        assert!(matches!(blank.into_request(), Err(XkgError::InvalidInput(_))));
    }

    #[test]
    fn test_expand_validation() {
        let ok: ExpandBody = serde_json::from_str(r#"{"node_id": "physics:heat"}"#).unwrap();
        let request = ok.into_request().unwrap();
        assert_eq!(request.depth_increment, 1);

        let too_deep: ExpandBody =
            serde_json::from_str(r#"{"node_id": "physics:heat", "depth_increment": 3}"#).unwrap();
        assert!(too_deep.into_request().is_err());

        let blank: ExpandBody = serde_json::from_str(r#"{"node_id": " "}"#).unwrap();
        assert!(blank.into_request().is_err());
    }
}
