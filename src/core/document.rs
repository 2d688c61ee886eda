//! Document: the opaque, immutable unit of content a query reasons over.

/// An opaque string payload plus an identifier, loaded once into the
/// sandbox namespace as `context[index]`. Immutable for the life of a
/// query; document order is stable and visible to the driver LLM.
#[derive(Debug, Clone)]
pub struct Document {
    /// Caller-assigned identifier (e.g. a filename or URL); not interpreted.
    pub id: String,
    /// The document's full text content.
    pub content: String,
}

impl Document {
    /// Creates a document from an id and content.
    #[must_use]
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
        }
    }

    /// Character length of the content, used for the system prompt's
    /// size distribution and for per-call character ceiling accounting.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_len() {
        let doc = Document::new("a.txt", "hello");
        assert_eq!(doc.char_len(), 5);
    }

    #[test]
    fn test_new() {
        let doc = Document::new("id1", "content");
        assert_eq!(doc.id, "id1");
        assert_eq!(doc.content, "content");
    }
}
