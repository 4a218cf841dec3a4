use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};

/// An immutable, partially specified filter over inventory resources.
///
/// Blank values are treated as absent. A criterion with every field absent is
/// rejected at construction, so every `Criterion` value constrains something.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "CriterionFields", into = "CriterionFields")]
pub struct Criterion {
    id: Option<String>,
    name: Option<String>,
    version: Option<String>,
    status: Option<String>,
    tags: BTreeSet<String>,
}

/// Unvalidated criterion fields. Also the serialized form of [`Criterion`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl CriterionFields {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<Criterion> {
        Criterion::try_from(self)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

impl TryFrom<CriterionFields> for Criterion {
    type Error = DispatchError;

    fn try_from(fields: CriterionFields) -> Result<Self> {
        let criterion = Criterion {
            id: non_blank(fields.id),
            name: non_blank(fields.name),
            version: non_blank(fields.version),
            status: non_blank(fields.status),
            tags: fields
                .tags
                .into_iter()
                .filter_map(|t| non_blank(Some(t)))
                .collect(),
        };

        if criterion.id.is_none()
            && criterion.name.is_none()
            && criterion.version.is_none()
            && criterion.status.is_none()
            && criterion.tags.is_empty()
        {
            return Err(DispatchError::InvalidCriterion(
                "at least one of id, name, version, status or tags must be set".to_string(),
            ));
        }

        Ok(criterion)
    }
}

impl From<Criterion> for CriterionFields {
    fn from(c: Criterion) -> Self {
        Self {
            id: c.id,
            name: c.name,
            version: c.version,
            status: c.status,
            tags: c.tags,
        }
    }
}

impl Criterion {
    pub fn builder() -> CriterionFields {
        CriterionFields::default()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Returns a copy carrying `status` if this criterion does not already
    /// constrain the status; otherwise an unchanged copy.
    pub fn with_default_status(&self, status: &str) -> Criterion {
        let mut copy = self.clone();
        if copy.status.is_none() {
            copy.status = Some(status.to_string());
        }
        copy
    }
}

impl std::fmt::Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(id) = &self.id {
            parts.push(format!("id={}", id));
        }
        if let Some(name) = &self.name {
            parts.push(format!("name={}", name));
        }
        if let Some(version) = &self.version {
            parts.push(format!("version={}", version));
        }
        if let Some(status) = &self.status {
            parts.push(format!("status={}", status));
        }
        if !self.tags.is_empty() {
            let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
            parts.push(format!("tags={}", tags.join("|")));
        }
        write!(f, "{}", parts.join(","))
    }
}

/// Parses the command-line form `key=value[,key=value...]` where key is one of
/// `id`, `name`, `version`, `status`, `tag` or `tags` (`|`-separated).
impl FromStr for Criterion {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        let mut fields = CriterionFields::default();

        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                DispatchError::InvalidCriterion(format!("expected key=value, got '{}'", pair))
            })?;
            let value = value.trim();
            match key.trim() {
                "id" => fields = fields.id(value),
                "name" => fields = fields.name(value),
                "version" => fields = fields.version(value),
                "status" => fields = fields.status(value),
                "tag" | "tags" => fields = fields.tags(value.split('|')),
                other => {
                    return Err(DispatchError::InvalidCriterion(format!(
                        "unknown criterion field '{}'",
                        other
                    )))
                }
            }
        }

        fields.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_criterion_is_rejected() {
        assert!(matches!(
            Criterion::builder().build(),
            Err(DispatchError::InvalidCriterion(_))
        ));
    }

    #[test]
    fn blank_fields_count_as_empty() {
        let result = Criterion::builder().name("  ").tag(" ").build();
        assert!(result.is_err());
    }

    #[test]
    fn parse_all_fields() {
        let c: Criterion = "id=c1, name=spark ,version=3.1,status=ACTIVE,tags=a|b"
            .parse()
            .unwrap();
        assert_eq!(c.id(), Some("c1"));
        assert_eq!(c.name(), Some("spark"));
        assert_eq!(c.version(), Some("3.1"));
        assert_eq!(c.status(), Some("ACTIVE"));
        assert_eq!(c.tags().len(), 2);
        assert!(c.tags().contains("a"));
    }

    #[test]
    fn parse_repeated_tag_keys() {
        let c: Criterion = "tag=gpu,tag=large".parse().unwrap();
        assert_eq!(c.tags().len(), 2);
    }

    #[test]
    fn parse_rejects_unknown_key() {
        assert!("colour=red".parse::<Criterion>().is_err());
        assert!("name".parse::<Criterion>().is_err());
        assert!("".parse::<Criterion>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let c = Criterion::builder()
            .name("spark")
            .tags(["gpu", "prod"])
            .build()
            .unwrap();
        let parsed: Criterion = c.to_string().parse().unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn default_status_only_fills_missing_status() {
        let c = Criterion::builder().name("spark").build().unwrap();
        assert_eq!(c.with_default_status("ACTIVE").status(), Some("ACTIVE"));

        let c = Criterion::builder().status("DEPRECATED").build().unwrap();
        assert_eq!(c.with_default_status("ACTIVE").status(), Some("DEPRECATED"));
    }

    #[test]
    fn deserialize_validates() {
        let ok: Criterion = serde_json::from_str(r#"{"tags":["gpu"]}"#).unwrap();
        assert!(ok.tags().contains("gpu"));

        let err = serde_json::from_str::<Criterion>(r#"{"name":""}"#);
        assert!(err.is_err());
    }
}
