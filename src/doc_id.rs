/// A stable document identifier derived from the uploaded title and bytes.
///
/// Re-uploading the same file under the same name yields the same id, so the
/// upload replaces the earlier document instead of duplicating it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId {
    /// The numeric ID used as the key in redb tables.
    pub numeric: u64,
    /// The short hex string for human display (e.g. "a1b2c3").
    pub short: String,
}

impl DocumentId {
    /// Derive the id from an upload's title and raw content.
    ///
    /// # Examples
    ///
    /// ```
    /// use docseek::DocumentId;
    ///
    /// let a = DocumentId::new("paper.pdf", b"%PDF-1.7 ...");
    /// let b = DocumentId::new("paper.pdf", b"%PDF-1.7 ...");
    /// assert_eq!(a, b);
    /// assert_eq!(a.short.len(), 6);
    /// ```
    pub fn new(title: &str, content: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(title.as_bytes());
        hasher.update(&[0]);
        hasher.update(content);
        let digest = hasher.finalize();

        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        Self::from_numeric(u64::from_le_bytes(head))
    }

    pub fn from_numeric(numeric: u64) -> Self {
        Self {
            numeric,
            short: Self::short_hex(numeric, 6),
        }
    }

    /// Parse a full 16-digit hex id, with or without a leading `#`.
    pub fn parse_hex(s: &str) -> Option<Self> {
        let s = s.strip_prefix('#').unwrap_or(s);
        if s.len() != 16 {
            return None;
        }
        u64::from_str_radix(s, 16).ok().map(Self::from_numeric)
    }

    /// The full 16-digit hex form, used by the HTTP and MCP APIs.
    pub fn hex(&self) -> String {
        format!("{:016x}", self.numeric)
    }

    fn short_hex(value: u64, len: usize) -> String {
        let full = format!("{value:016x}");
        full[..len].to_string()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.short)
    }
}
