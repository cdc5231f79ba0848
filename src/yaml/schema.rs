use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlDirectory {
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub schema: Option<SchemaConfig>,
    #[serde(default)]
    pub entries: Vec<YamlEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub base_dn: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub object_classes: Vec<ObjectClassDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectClassDef {
    pub name: String,
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlEntry {
    pub dn: String,
    #[serde(rename = "objectClass")]
    pub object_class: Vec<String>,
    #[serde(flatten)]
    pub attributes: HashMap<String, serde_yaml::Value>,
}

impl YamlEntry {
    /// Attribute values as strings; nested mappings are ignored.
    pub fn string_values(value: &serde_yaml::Value) -> Vec<String> {
        match value {
            serde_yaml::Value::String(s) => vec![s.clone()],
            serde_yaml::Value::Number(n) => vec![n.to_string()],
            serde_yaml::Value::Bool(b) => vec![if *b { "TRUE" } else { "FALSE" }.to_string()],
            serde_yaml::Value::Sequence(seq) => seq.iter().flat_map(Self::string_values).collect(),
            _ => Vec::new(),
        }
    }
}

/// Required attributes per object class, keyed by lowercased class name.
#[derive(Debug, Clone)]
pub struct YamlSchema {
    pub object_classes: HashMap<String, Vec<String>>,
}

impl YamlSchema {
    pub fn required_attributes(&self, object_class: &str) -> &[String] {
        self.object_classes
            .get(&object_class.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl From<SchemaConfig> for YamlSchema {
    fn from(config: SchemaConfig) -> Self {
        let mut schema = YamlSchema::default();
        for oc in config.object_classes {
            schema.object_classes.insert(oc.name.to_lowercase(), oc.attributes);
        }
        schema
    }
}

impl Default for YamlSchema {
    fn default() -> Self {
        let mut object_classes = HashMap::new();

        object_classes.insert("top".to_string(), vec![]);
        object_classes.insert("domain".to_string(), vec!["dc".to_string()]);
        object_classes.insert("organizationalunit".to_string(), vec!["ou".to_string()]);
        object_classes.insert(
            "person".to_string(),
            vec!["cn".to_string(), "sn".to_string()],
        );
        object_classes.insert(
            "groupofnames".to_string(),
            vec!["cn".to_string(), "member".to_string()],
        );
        object_classes.insert("referral".to_string(), vec!["ref".to_string()]);

        YamlSchema { object_classes }
    }
}
