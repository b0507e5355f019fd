//! Signature line embedding and extraction.
//!
//! A validated artifact carries a single trailing signature line in the
//! comment syntax of its file format:
//!
//! ```text
//! <!-- kiwi-mcp:validated:{hash}:SIGNATURE:{item_id} -->     markdown
//! # Signature: kiwi-mcp:validated:{hash}:SIGNATURE:{item_id}   scripts
//! ```
//!
//! Embedding always strips any previous signature first, so signing an
//! already-signed file replaces the line instead of stacking a second one.

use once_cell::sync::Lazy;
use regex::Regex;

static HTML_SIGNATURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<!--\s*kiwi-mcp:validated:([^:]+):([^:]+):([^\s]+)\s*-->").expect("valid regex")
});

static SCRIPT_SIGNATURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:#{1,2}|//)\s*Signature:\s*kiwi-mcp:validated:([^:]+):([^:]+):([^\s]+)\s*$")
        .expect("valid regex")
});

static HTML_STRIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n?<!--\s*kiwi-mcp:validated:[^>]*-->\s*$").expect("valid regex"));

static SCRIPT_STRIP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\n*(?:#{1,2}|//)\s*Signature:\s*kiwi-mcp:validated:[^\n]*\s*$")
        .expect("valid regex")
});

/// Comment syntax used for the trailing signature line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    /// `<!-- ... -->`, for markdown-based kinds (directives, knowledge).
    Html,
    /// `# Signature: ...`, for `#`-commented scripts.
    Hash,
    /// `// Signature: ...`, for `//`-commented scripts.
    Slash,
}

impl CommentStyle {
    /// Picks the style for a tool file extension. Markdown kinds always
    /// use [`CommentStyle::Html`] and never consult this.
    pub fn for_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.') {
            "js" | "ts" | "rs" | "go" | "c" | "cpp" | "java" => CommentStyle::Slash,
            _ => CommentStyle::Hash,
        }
    }
}

/// An embedded signature extracted from artifact content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBlock {
    /// The integrity hash recorded at signing time.
    pub hash: String,
    /// The signature marker field (currently the literal `SIGNATURE`).
    pub signature: String,
    /// The artifact id the signature was issued for.
    pub item_id: String,
}

/// Extracts the embedded signature from content, if present.
///
/// Both comment syntaxes are recognized, since a reader does not always
/// know the originating file format.
pub fn extract_signature(content: &str) -> Option<SignatureBlock> {
    let caps = HTML_SIGNATURE
        .captures(content)
        .or_else(|| SCRIPT_SIGNATURE.captures(content))?;

    Some(SignatureBlock {
        hash: caps[1].to_string(),
        signature: caps[2].to_string(),
        item_id: caps[3].to_string(),
    })
}

/// Removes any trailing signature line, returning the unsigned content.
pub fn strip_signature(content: &str) -> String {
    let stripped = HTML_STRIP.replace(content, "");
    SCRIPT_STRIP.replace(&stripped, "").into_owned()
}

/// Appends a signature line for `hash` and `item_id`, replacing any
/// previous signature.
///
/// # Example
///
/// ```rust
/// use kiwi_integrity::{embed_signature, extract_signature, CommentStyle};
///
/// let signed = embed_signature("# tool body\n", CommentStyle::Hash, "cafe", "my_tool");
/// let block = extract_signature(&signed).unwrap();
/// assert_eq!(block.hash, "cafe");
/// assert_eq!(block.item_id, "my_tool");
///
/// // Re-signing replaces instead of stacking.
/// let resigned = embed_signature(&signed, CommentStyle::Hash, "beef", "my_tool");
/// assert_eq!(extract_signature(&resigned).unwrap().hash, "beef");
/// assert_eq!(resigned.matches("Signature:").count(), 1);
/// ```
pub fn embed_signature(content: &str, style: CommentStyle, hash: &str, item_id: &str) -> String {
    let base = strip_signature(content);
    let base = base.trim_end_matches('\n');

    match style {
        CommentStyle::Html => format!(
            "{}\n<!-- kiwi-mcp:validated:{}:SIGNATURE:{} -->\n",
            base, hash, item_id
        ),
        CommentStyle::Hash => format!(
            "{}\n\n# Signature: kiwi-mcp:validated:{}:SIGNATURE:{}\n",
            base, hash, item_id
        ),
        CommentStyle::Slash => format!(
            "{}\n\n// Signature: kiwi-mcp:validated:{}:SIGNATURE:{}\n",
            base, hash, item_id
        ),
    }
}
