//! RFC 6570 level-1 URI templates (`scheme://{var}/path/{other}`)

use regex::Regex;
use std::collections::HashMap;
use std::fmt;

use crate::{Error, Result};

/// A parsed URI template with named variables
#[derive(Debug, Clone)]
pub struct UriTemplate {
    template: String,
    variables: Vec<String>,
    pattern: Regex,
}

impl UriTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        let mut variables = Vec::new();
        let mut pattern = String::from("^");
        let mut rest = template;

        while let Some(start) = rest.find('{') {
            pattern.push_str(&regex::escape(&rest[..start]));
            let after = &rest[start + 1..];
            let end = after
                .find('}')
                .ok_or_else(|| Error::Config(format!("Unclosed '{{' in URI template: {}", template)))?;
            let name = &after[..end];

            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(Error::Config(format!(
                    "Invalid variable '{}' in URI template: {}",
                    name, template
                )));
            }
            if variables.iter().any(|v| v == name) {
                return Err(Error::Config(format!(
                    "Variable '{}' repeated in URI template: {}",
                    name, template
                )));
            }

            pattern.push_str(&format!("(?P<{}>[^/]+)", name));
            variables.push(name.to_string());
            rest = &after[end + 1..];
        }

        if rest.contains('}') {
            return Err(Error::Config(format!(
                "Unmatched '}}' in URI template: {}",
                template
            )));
        }
        pattern.push_str(&regex::escape(rest));
        pattern.push('$');

        let pattern = Regex::new(&pattern)
            .map_err(|e| Error::Config(format!("Bad URI template {}: {}", template, e)))?;

        Ok(Self {
            template: template.to_string(),
            variables,
            pattern,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Match a concrete URI, returning the variable bindings
    pub fn match_uri(&self, uri: &str) -> Option<HashMap<String, String>> {
        let caps = self.pattern.captures(uri)?;
        Some(
            self.variables
                .iter()
                .filter_map(|name| caps.name(name).map(|m| (name.clone(), m.as_str().to_string())))
                .collect(),
        )
    }
}

impl fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

impl PartialEq for UriTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.template == other.template
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_variable() {
        let t = UriTemplate::parse("echo://{message}").unwrap();
        assert_eq!(t.variables(), &["message".to_string()]);

        let vars = t.match_uri("echo://hello").unwrap();
        assert_eq!(vars.get("message").map(String::as_str), Some("hello"));
    }

    #[test]
    fn test_hyphenated_value_binds_exactly() {
        let t = UriTemplate::parse("echo://{message}").unwrap();
        let vars = t.match_uri("echo://hello-world").unwrap();
        assert_eq!(vars["message"], "hello-world");
    }

    #[test]
    fn test_multiple_variables() {
        let t = UriTemplate::parse("repo://{owner}/{name}/readme").unwrap();
        let vars = t.match_uri("repo://mikalv/relay/readme").unwrap();
        assert_eq!(vars["owner"], "mikalv");
        assert_eq!(vars["name"], "relay");
        assert!(t.match_uri("repo://mikalv/relay").is_none());
    }

    #[test]
    fn test_no_match() {
        let t = UriTemplate::parse("echo://{message}").unwrap();
        assert!(t.match_uri("other://hello").is_none());
        assert!(t.match_uri("echo://").is_none());
        assert!(t.match_uri("echo://a/b").is_none());
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        let t = UriTemplate::parse("file://docs.v1/{name}").unwrap();
        assert!(t.match_uri("file://docsXv1/readme").is_none());
        assert!(t.match_uri("file://docs.v1/readme").is_some());
    }

    #[test]
    fn test_parse_errors() {
        assert!(UriTemplate::parse("echo://{message").is_err());
        assert!(UriTemplate::parse("echo://message}").is_err());
        assert!(UriTemplate::parse("echo://{}").is_err());
        assert!(UriTemplate::parse("echo://{a}/{a}").is_err());
        assert!(UriTemplate::parse("echo://{bad-name}").is_err());
    }
}
