use std::sync::atomic::{AtomicU64, Ordering};

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Source of unique name suffixes for per-run cluster objects.
pub trait NameGenerator: Send + Sync {
    fn generate_suffix(&self) -> String;
}

/// Random lowercase alphanumeric suffixes (valid in DNS-1123 labels).
#[derive(Debug, Clone)]
pub struct RandomSuffix {
    len: usize,
}

impl RandomSuffix {
    pub fn new(len: usize) -> Self {
        Self { len: len.max(1) }
    }
}

impl Default for RandomSuffix {
    fn default() -> Self {
        Self::new(5)
    }
}

impl NameGenerator for RandomSuffix {
    fn generate_suffix(&self) -> String {
        (0..self.len)
            .map(|_| SUFFIX_ALPHABET[fastrand::usize(..SUFFIX_ALPHABET.len())] as char)
            .collect()
    }
}

/// Deterministic suffixes: `<prefix>0`, `<prefix>1`, ...
#[derive(Debug, Default)]
pub struct SequentialSuffix {
    prefix: String,
    next: AtomicU64,
}

impl SequentialSuffix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(0),
        }
    }
}

impl NameGenerator for SequentialSuffix {
    fn generate_suffix(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", self.prefix, n)
    }
}
