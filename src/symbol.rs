//! Symbol interning for terminals and nonterminal labels.
//!
//! Every word and every nonterminal label is mapped to a dense integer id so
//! that trie lookups, signatures and comparisons are O(1). Nonterminal labels
//! are stored in bracketed form (`[X]`) and share the id space with words, so a
//! trie can be keyed by a single `SymbolId` regardless of symbol kind.

use rustc_hash::FxHashMap;
use std::fmt;

/// Interned symbol ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);

impl SymbolId {
    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One element of a rule's source or target pattern.
///
/// A `Slot` is a nonterminal occurrence: `label` is the interned `[X]` id and
/// `index` is the zero-based antecedent position it binds to. On the source
/// side slots appear in antecedent order; on the target side `index` says which
/// antecedent is realised at that position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Symbol {
    Word(SymbolId),
    Slot { label: SymbolId, index: u8 },
}

impl Symbol {
    /// The id used to walk a grammar trie.
    #[inline]
    pub fn key(&self) -> SymbolId {
        match *self {
            Symbol::Word(id) => id,
            Symbol::Slot { label, .. } => label,
        }
    }

    pub fn is_slot(&self) -> bool {
        matches!(self, Symbol::Slot { .. })
    }
}

/// String <-> id table.
///
/// Built while grammars are loaded and then shared read-only; a sentence is
/// interned before decoding, so parsing never touches the table.
#[derive(Debug, Default, Clone)]
pub struct Vocabulary {
    str_to_id: FxHashMap<Box<str>, SymbolId>,
    id_to_str: Vec<Box<str>>,
    nonterminal: Vec<bool>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, s: &str, is_nonterminal: bool) -> SymbolId {
        if let Some(&id) = self.str_to_id.get(s) {
            return id;
        }

        let id = SymbolId(self.id_to_str.len() as u32);
        let boxed: Box<str> = s.into();
        self.str_to_id.insert(boxed.clone(), id);
        self.id_to_str.push(boxed);
        self.nonterminal.push(is_nonterminal);
        id
    }

    /// Intern a word.
    pub fn terminal(&mut self, word: &str) -> SymbolId {
        self.intern(word, false)
    }

    /// Intern a nonterminal label. `X`, `[X]` and `[X,1]` all map to `[X]`.
    pub fn nonterminal(&mut self, label: &str) -> SymbolId {
        let bare = strip_label(label).0;
        self.intern(&format!("[{}]", bare), true)
    }

    /// Look up an already interned string.
    pub fn id(&self, s: &str) -> Option<SymbolId> {
        self.str_to_id.get(s).copied()
    }

    pub fn resolve(&self, id: SymbolId) -> &str {
        &self.id_to_str[id.index()]
    }

    pub fn is_nonterminal(&self, id: SymbolId) -> bool {
        self.nonterminal.get(id.index()).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.id_to_str.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_str.is_empty()
    }

    /// Intern a whitespace-tokenized sentence.
    pub fn sentence(&mut self, text: &str) -> Vec<SymbolId> {
        text.split_whitespace().map(|w| self.terminal(w)).collect()
    }

    /// Parse pattern notation such as `"[X,1] de [X,2]"`.
    ///
    /// Bracketed tokens become slots; `[X,k]` binds antecedent `k - 1`, a bare
    /// `[X]` takes the next unused position. Everything else is a word.
    pub fn pattern(&mut self, text: &str) -> Vec<Symbol> {
        let mut next_slot = 0u8;
        let mut out = Vec::new();
        for token in text.split_whitespace() {
            if token.len() > 2 && token.starts_with('[') && token.ends_with(']') {
                let (bare, index) = strip_label(token);
                let label = self.intern(&format!("[{}]", bare), true);
                let index = match index {
                    Some(k) if k > 0 => k - 1,
                    _ => next_slot,
                };
                next_slot = next_slot.max(index + 1);
                out.push(Symbol::Slot { label, index });
            } else {
                out.push(Symbol::Word(self.terminal(token)));
            }
        }
        out
    }

    /// Render a pattern back to notation.
    pub fn render(&self, pattern: &[Symbol]) -> String {
        pattern
            .iter()
            .map(|s| match *s {
                Symbol::Word(id) => self.resolve(id).to_string(),
                Symbol::Slot { label, index } => {
                    let name = self.resolve(label);
                    format!("{},{}]", &name[..name.len() - 1], index + 1)
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Split `[X,1]` into (`X`, Some(1)); `X` and `[X]` give (`X`, None).
fn strip_label(label: &str) -> (&str, Option<u8>) {
    let inner = label
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(label);
    match inner.rsplit_once(',') {
        Some((name, idx)) => match idx.trim().parse::<u8>() {
            Ok(k) => (name, Some(k)),
            Err(_) => (inner, None),
        },
        None => (inner, None),
    }
}
