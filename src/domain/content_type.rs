#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Html,
    Plain,
    /// Rich text that has already been converted to HTML upstream (spec.md §3).
    Richtext,
}

impl ContentType {
    pub fn is_plain(self) -> bool {
        matches!(self, ContentType::Plain)
    }
}
