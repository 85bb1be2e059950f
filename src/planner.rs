//! Configuration documents and dependency-ordered plans.
//!
//! A document lists resources; each may name others in `depends_on`. The plan is a
//! stable topological order (ties keep document order). Cycles and dangling
//! dependencies are rejected.

use crate::crypto::{canonical_json, sha256_hex};
use crate::managers::{ManagerError, ManagerResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Json,
    Yaml,
    Toml,
}

impl DocumentFormat {
    pub fn parse(raw: &str) -> ManagerResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            other => Err(ManagerError::Invalid(format!("unsupported format {other:?}"))),
        }
    }

    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("yaml") | Some("yml") => Self::Yaml,
            Some("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

/// Parse `content` into a generic JSON value.
pub fn parse_value(content: &str, format: DocumentFormat) -> ManagerResult<Value> {
    let parsed = match format {
        DocumentFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        DocumentFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        DocumentFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
    };
    parsed.map_err(|e| ManagerError::Invalid(format!("invalid document: {e}")))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl ConfigDocument {
    pub fn from_value(value: Value) -> ManagerResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| ManagerError::Invalid(format!("invalid config document: {e}")))
    }

    pub fn load(path: &Path) -> ManagerResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_value(parse_value(&content, DocumentFormat::from_path(path))?)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlanStep {
    pub order: usize,
    pub resource_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub host: String,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
    /// SHA-256 of the canonical step list
    pub digest: String,
}

/// Kahn's algorithm over `depends_on`, seeded in document order.
pub fn build_plan(doc: &ConfigDocument) -> ManagerResult<Plan> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(doc.resources.len());
    for (i, r) in doc.resources.iter().enumerate() {
        let id = r.id.trim();
        if id.is_empty() {
            return Err(ManagerError::Invalid(format!("resource #{i} has no id")));
        }
        if index.insert(id, i).is_some() {
            return Err(ManagerError::Invalid(format!("duplicate resource id {id}")));
        }
    }

    let mut indegree = vec![0usize; doc.resources.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); doc.resources.len()];
    for (i, r) in doc.resources.iter().enumerate() {
        for dep in &r.depends_on {
            let &j = index.get(dep.trim()).ok_or_else(|| {
                ManagerError::Invalid(format!("resource {} depends on unknown {}", r.id, dep))
            })?;
            indegree[i] += 1;
            dependents[j].push(i);
        }
    }

    let mut ready: VecDeque<usize> = (0..doc.resources.len())
        .filter(|&i| indegree[i] == 0)
        .collect();
    let mut steps = Vec::with_capacity(doc.resources.len());
    while let Some(i) = ready.pop_front() {
        let r = &doc.resources[i];
        steps.push(PlanStep {
            order: steps.len() + 1,
            resource_id: r.id.trim().to_string(),
            kind: r.kind.clone(),
            host: r.host.clone(),
            depends_on: r.depends_on.iter().map(|d| d.trim().to_string()).collect(),
        });
        for &next in &dependents[i] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if steps.len() != doc.resources.len() {
        let stuck: Vec<&str> = doc
            .resources
            .iter()
            .enumerate()
            .filter(|(i, _)| indegree[*i] > 0)
            .map(|(_, r)| r.id.as_str())
            .collect();
        return Err(ManagerError::Invalid(format!(
            "dependency cycle between {}",
            stuck.join(", ")
        )));
    }

    let digest = sha256_hex(canonical_json(&serde_json::to_value(&steps)?).as_bytes());
    Ok(Plan { steps, digest })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> ConfigDocument {
        ConfigDocument::from_value(value).unwrap()
    }

    #[test]
    fn test_dependency_order() {
        let d = doc(json!({"resources": [
            {"id": "svc", "type": "service", "depends_on": ["cfg", "pkg"]},
            {"id": "pkg", "type": "package"},
            {"id": "cfg", "type": "file", "depends_on": ["pkg"]}
        ]}));
        let plan = build_plan(&d).unwrap();
        let order: Vec<&str> = plan.steps.iter().map(|s| s.resource_id.as_str()).collect();
        assert_eq!(order, vec!["pkg", "cfg", "svc"]);
        assert_eq!(plan.steps[0].order, 1);
        assert_eq!(plan.digest.len(), 64);
    }

    #[test]
    fn test_cycle_is_invalid() {
        let d = doc(json!({"resources": [
            {"id": "a", "depends_on": ["b"]},
            {"id": "b", "depends_on": ["a"]}
        ]}));
        let err = build_plan(&d).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_unknown_dependency_is_invalid() {
        let d = doc(json!({"resources": [{"id": "a", "depends_on": ["ghost"]}]}));
        assert!(matches!(build_plan(&d).unwrap_err(), ManagerError::Invalid(_)));
    }

    #[test]
    fn test_yaml_and_toml_documents() {
        let yaml = "resources:\n  - id: pkg\n    type: package\n    name: nginx\n";
        let v = parse_value(yaml, DocumentFormat::Yaml).unwrap();
        let d = ConfigDocument::from_value(v).unwrap();
        assert_eq!(d.resources[0].attributes["name"], "nginx");

        let toml_doc = "[[resources]]\nid = \"pkg\"\ntype = \"package\"\n";
        let v = parse_value(toml_doc, DocumentFormat::Toml).unwrap();
        assert_eq!(ConfigDocument::from_value(v).unwrap().resources.len(), 1);
    }

    #[test]
    fn test_plan_digest_is_stable() {
        let d = doc(json!({"resources": [{"id": "a"}, {"id": "b"}]}));
        assert_eq!(build_plan(&d).unwrap().digest, build_plan(&d).unwrap().digest);
    }
}
