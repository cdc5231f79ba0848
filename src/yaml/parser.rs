use super::schema::{YamlDirectory, YamlEntry, YamlSchema};
use crate::directory::{Directory, Entry, Partition};
use crate::dn::Dn;
use crate::{LdapMuxError, Result};
use std::path::Path;
use tracing::info;

pub async fn parse_directory_file(path: &Path) -> Result<Directory> {
    let content = tokio::fs::read_to_string(path).await?;
    let directory = parse_directory_str(&content)?;
    info!(
        "Loaded {} entries from {}",
        directory.len(),
        path.display()
    );
    Ok(directory)
}

pub fn parse_directory_str(content: &str) -> Result<Directory> {
    let yaml_dir: YamlDirectory = serde_yaml::from_str(content)?;

    if yaml_dir.directory.base_dn.trim().is_empty() {
        return Err(LdapMuxError::Config("Base DN cannot be empty".to_string()));
    }
    let suffix = Dn::parse(&yaml_dir.directory.base_dn)?;

    let schema: YamlSchema = yaml_dir
        .schema
        .clone()
        .map(Into::into)
        .unwrap_or_default();

    let mut entries = yaml_dir
        .entries
        .iter()
        .map(|yaml_entry| to_entry(yaml_entry, &schema))
        .collect::<Result<Vec<_>>>()?;
    // Parents before children, whatever order the file lists them in
    entries.sort_by_key(|entry| entry.dn().len());

    let directory = Directory::new(suffix);
    for entry in entries {
        directory.add(entry)?;
    }
    Ok(directory)
}

fn to_entry(yaml_entry: &YamlEntry, schema: &YamlSchema) -> Result<Entry> {
    if yaml_entry.dn.trim().is_empty() {
        return Err(LdapMuxError::Config("Entry DN cannot be empty".to_string()));
    }
    if yaml_entry.object_class.is_empty() {
        return Err(LdapMuxError::Config(format!(
            "Entry {} must have at least one objectClass",
            yaml_entry.dn
        )));
    }

    let mut entry = Entry::new(Dn::parse(&yaml_entry.dn)?)
        .with_attribute("objectClass", yaml_entry.object_class.iter().cloned());
    for (name, value) in &yaml_entry.attributes {
        for value in YamlEntry::string_values(value) {
            entry.add_value(name, value);
        }
    }

    for oc in &yaml_entry.object_class {
        for attr in schema.required_attributes(oc) {
            if !entry.has_attribute(attr) {
                return Err(LdapMuxError::Config(format!(
                    "Entry {} with objectClass {} is missing required attribute {}",
                    yaml_entry.dn, oc, attr
                )));
            }
        }
    }

    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const DIRECTORY: &str = r#"
directory:
  base_dn: "dc=example,dc=com"

entries:
  - dn: "uid=john,ou=users,dc=example,dc=com"
    objectClass: ["top", "person"]
    cn: "John"
    sn: "Doe"
    uidNumber: 1001
    mail:
      - john@example.com
      - jdoe@example.com

  - dn: "dc=example,dc=com"
    objectClass: ["top", "domain"]
    dc: "example"

  - dn: "ou=users,dc=example,dc=com"
    objectClass: ["top", "organizationalUnit"]
    ou: "users"

  - dn: "ou=remote,dc=example,dc=com"
    objectClass: ["top", "referral"]
    ref: "ldap://remote.example.com/ou=remote,dc=example,dc=com"
"#;

    #[tokio::test]
    async fn test_parse_valid_directory() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(DIRECTORY.as_bytes()).unwrap();

        let directory = parse_directory_file(temp_file.path()).await.unwrap();
        assert_eq!(directory.suffix().to_string(), "dc=example,dc=com");
        assert_eq!(directory.len(), 4);

        let john = directory
            .lookup(&Dn::parse("uid=john,ou=users,dc=example,dc=com").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(john.values("uidNumber"), &["1001".to_string()]);
        assert_eq!(john.values("mail").len(), 2);

        let remote = directory
            .lookup(&Dn::parse("ou=remote,dc=example,dc=com").unwrap())
            .unwrap()
            .unwrap();
        assert!(remote.is_referral());
    }

    #[test]
    fn test_missing_required_attribute() {
        let yaml = r#"
directory:
  base_dn: "dc=example,dc=com"
entries:
  - dn: "dc=example,dc=com"
    objectClass: ["domain"]
"#;
        assert!(matches!(parse_directory_str(yaml), Err(LdapMuxError::Config(_))));
    }

    #[test]
    fn test_custom_schema_and_bad_dn() {
        let yaml = r#"
directory:
  base_dn: "o=corp"
schema:
  object_classes:
    - name: organization
      attributes: [o, description]
entries:
  - dn: "o=corp"
    objectClass: ["organization"]
    o: corp
"#;
        assert!(matches!(parse_directory_str(yaml), Err(LdapMuxError::Config(_))));

        let yaml = r#"
directory:
  base_dn: "o=corp"
entries:
  - dn: "o=corp,,x"
    objectClass: ["top"]
"#;
        assert!(matches!(parse_directory_str(yaml), Err(LdapMuxError::InvalidDn(_))));
    }
}
