//! Hex dumps of raw word buffers for corruption diagnostics

use std::fmt;

/// Default number of words per dump line
pub const WORDS_PER_LINE: usize = 10;

/// Copy of the words around a failure, printed as a hex table
#[derive(Clone, PartialEq, Eq, Default)]
pub struct BlockDump {
    /// Word offset of `words[0]` within the enclosing buffer
    pub offset: usize,
    pub words: Vec<u32>,
}

impl BlockDump {
    pub fn new(offset: usize, words: &[u32]) -> Self {
        Self {
            offset,
            words: words.to_vec(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Render with a custom line width and an optional word limit
    pub fn render(&self, words_per_line: usize, max_words: Option<usize>) -> String {
        format_words(&self.words, self.offset, words_per_line, max_words)
    }
}

impl fmt::Display for BlockDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(WORDS_PER_LINE, None))
    }
}

impl fmt::Debug for BlockDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockDump")
            .field("offset", &self.offset)
            .field("nwords", &self.words.len())
            .finish()
    }
}

/// Format words as `offset: w0 w1 ...` lines
pub fn format_words(
    words: &[u32],
    offset: usize,
    words_per_line: usize,
    max_words: Option<usize>,
) -> String {
    let per_line = words_per_line.max(1);
    let shown = max_words.map_or(words.len(), |m| m.min(words.len()));
    let mut out = String::with_capacity(shown * 9 + (shown / per_line + 1) * 10);

    for (line, chunk) in words[..shown].chunks(per_line).enumerate() {
        out.push_str(&format!("{:8}:", offset + line * per_line));
        for word in chunk {
            out.push_str(&format!(" {:08x}", word));
        }
        out.push('\n');
    }

    if shown < words.len() {
        out.push_str(&format!("... ({} more words)\n", words.len() - shown));
    }
    out
}
