//! A values file as a tree of scalars, sequences and mappings.

use std::collections::BTreeMap;

/// One node of a parsed values file.
///
/// Strings are kept as written. Numbers and booleans are re-rendered from
/// their parsed value, so an unquoted `tag: 1.20` becomes `"1.2"`; charts
/// quote such tags. `null` has no node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueNode {
    Scalar(String),
    Sequence(Vec<ValueNode>),
    Mapping(BTreeMap<String, ValueNode>),
}

impl ValueNode {
    /// Convert parsed YAML. Non-string mapping keys are stringified;
    /// nulls are dropped.
    pub fn from_yaml(value: &serde_yaml::Value) -> Option<Self> {
        use serde_yaml::Value;

        match value {
            Value::Null => None,
            Value::Bool(b) => Some(ValueNode::Scalar(b.to_string())),
            Value::Number(n) => Some(ValueNode::Scalar(n.to_string())),
            Value::String(s) => Some(ValueNode::Scalar(s.clone())),
            Value::Sequence(items) => Some(ValueNode::Sequence(items.iter().filter_map(Self::from_yaml).collect())),
            Value::Mapping(map) => Some(ValueNode::Mapping(
                map.iter()
                    .filter_map(|(k, v)| Some((scalar_key(k)?, Self::from_yaml(v)?)))
                    .collect(),
            )),
            Value::Tagged(tagged) => Self::from_yaml(&tagged.value),
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            ValueNode::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Visit this node and everything below it, depth first.
    pub fn walk<V: Visitor + ?Sized>(&self, visitor: &mut V) {
        match self {
            ValueNode::Scalar(s) => visitor.visit_scalar(s),
            ValueNode::Sequence(items) => {
                for item in items {
                    item.walk(visitor);
                }
            }
            ValueNode::Mapping(map) => {
                visitor.visit_mapping(map);
                for value in map.values() {
                    value.walk(visitor);
                }
            }
        }
    }
}

fn scalar_key(key: &serde_yaml::Value) -> Option<String> {
    match key {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Callbacks for [`ValueNode::walk`].
pub trait Visitor {
    fn visit_mapping(&mut self, _map: &BTreeMap<String, ValueNode>) {}

    fn visit_scalar(&mut self, _value: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountScalars(usize);

    impl Visitor for CountScalars {
        fn visit_scalar(&mut self, _value: &str) {
            self.0 += 1;
        }
    }

    #[test]
    fn test_from_yaml() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("a: 1\nb: [x, true, ~]\nc:\n  d: null\n").unwrap();
        let node = ValueNode::from_yaml(&yaml).unwrap();

        let ValueNode::Mapping(map) = &node else {
            panic!("expected mapping");
        };
        assert_eq!(map["a"].as_scalar(), Some("1"));
        assert_eq!(
            map["b"],
            ValueNode::Sequence(vec![
                ValueNode::Scalar("x".to_string()),
                ValueNode::Scalar("true".to_string())
            ])
        );
        assert_eq!(map["c"], ValueNode::Mapping(BTreeMap::new()));
    }

    #[test]
    fn test_numbers_are_rendered_not_preserved() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("quoted: \"1.20\"\nbare: 1.20\n").unwrap();
        let ValueNode::Mapping(map) = ValueNode::from_yaml(&yaml).unwrap() else {
            panic!("expected mapping");
        };
        assert_eq!(map["quoted"].as_scalar(), Some("1.20"));
        assert_eq!(map["bare"].as_scalar(), Some("1.2"));
    }

    #[test]
    fn test_walk_visits_every_scalar() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("a: 1\nb: [x, y]\nc: {d: z}\n").unwrap();
        let mut counter = CountScalars(0);
        ValueNode::from_yaml(&yaml).unwrap().walk(&mut counter);
        assert_eq!(counter.0, 4);
    }
}
