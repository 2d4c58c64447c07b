//! Owned, read-only view of the configuration document.

use super::ConfigError;

/// One element of the configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigNode {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<ConfigNode>,
    text: Option<String>,
}

impl ConfigNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_child(mut self, child: ConfigNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Parses an XML document and returns its root element.
    pub fn parse_document(text: &str) -> Result<Self, ConfigError> {
        let doc = roxmltree::Document::parse(text).map_err(|e| ConfigError::Document(e.to_string()))?;
        Ok(Self::from_element(doc.root_element()))
    }

    fn from_element(node: roxmltree::Node<'_, '_>) -> Self {
        let attributes = node
            .attributes()
            .map(|a| (a.name().to_string(), a.value().to_string()))
            .collect();

        let mut children = Vec::new();
        let mut text = String::new();
        for child in node.children() {
            if child.is_element() {
                children.push(Self::from_element(child));
            } else if let Some(t) = child.text() {
                text.push_str(t);
            }
        }

        let text = text.trim();
        Self {
            name: node.tag_name().name().to_string(),
            attributes,
            children,
            text: (!text.is_empty()).then(|| text.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of a named attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// First child element with the given name.
    pub fn child(&self, name: &str) -> Option<&ConfigNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children(&self) -> &[ConfigNode] {
        &self.children
    }

    /// Trimmed text content, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}
