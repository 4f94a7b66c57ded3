//! Image references declared in chart values.

use std::collections::{BTreeMap, BTreeSet};

use super::value::{ValueNode, Visitor};

/// A `repository`/`tag` pair found in a values mapping
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    /// Typed view of a mapping that declares an image.
    pub fn from_mapping(map: &BTreeMap<String, ValueNode>) -> Option<Self> {
        let repository = map.get("repository")?.as_scalar()?.trim();
        let tag = map.get("tag")?.as_scalar()?.trim();
        if repository.is_empty() || tag.is_empty() {
            return None;
        }
        Some(Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }
}

/// Collects images whose repository starts with one of the prefixes.
#[derive(Debug, Default)]
pub struct ImageExtractor {
    prefixes: Vec<String>,
    found: BTreeSet<ImageRef>,
}

impl ImageExtractor {
    pub fn new(prefixes: &[String]) -> Self {
        Self {
            prefixes: prefixes.to_vec(),
            found: BTreeSet::new(),
        }
    }

    pub fn into_images(self) -> BTreeSet<ImageRef> {
        self.found
    }
}

impl Visitor for ImageExtractor {
    fn visit_mapping(&mut self, map: &BTreeMap<String, ValueNode>) {
        let Some(image) = ImageRef::from_mapping(map) else {
            return;
        };
        if self.prefixes.is_empty() || self.prefixes.iter().any(|p| image.repository.starts_with(p.as_str())) {
            self.found.insert(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(yaml: &str, prefixes: &[&str]) -> Vec<ImageRef> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        let prefixes: Vec<String> = prefixes.iter().map(|p| p.to_string()).collect();
        let mut extractor = ImageExtractor::new(&prefixes);
        ValueNode::from_yaml(&value).unwrap().walk(&mut extractor);
        extractor.into_images().into_iter().collect()
    }

    #[test]
    fn test_nested_images() {
        let yaml = r#"
image:
  repository: rancher/fleet
  tag: v0.9.0
agent:
  sidecars:
    - image:
        repository: rancher/fleet-agent
        tag: v0.9.0
    - image:
        repository: quay.io/other/thing
        tag: "1.0"
"#;
        let images = extract(yaml, &["rancher/"]);
        assert_eq!(
            images,
            vec![
                ImageRef {
                    repository: "rancher/fleet".to_string(),
                    tag: "v0.9.0".to_string()
                },
                ImageRef {
                    repository: "rancher/fleet-agent".to_string(),
                    tag: "v0.9.0".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_numeric_tag_and_missing_fields() {
        let yaml = "a:\n  repository: rancher/kubectl\n  tag: 1.29\nb:\n  repository: rancher/shell\n";
        let images = extract(yaml, &["rancher/"]);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].tag, "1.29");
    }
}
