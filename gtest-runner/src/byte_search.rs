// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Boyer-Moore substring search over raw bytes.
//!
//! Test executables are scanned for marker strings that GoogleTest embeds in every binary linking
//! it. Binaries can be large, so this uses the bad-character and good-suffix rules to skip through
//! the haystack instead of comparing at every offset.

/// Returns the lowest index at which `pattern` occurs in `haystack`.
///
/// An empty pattern matches at index 0.
pub fn index_of(haystack: &[u8], pattern: &[u8]) -> Option<usize> {
    BoyerMoore::new(pattern).find_in(haystack)
}

/// Returns true if every one of `patterns` occurs somewhere in `haystack`.
pub fn contains_all<P: AsRef<[u8]>>(haystack: &[u8], patterns: impl IntoIterator<Item = P>) -> bool {
    patterns
        .into_iter()
        .all(|pattern| index_of(haystack, pattern.as_ref()).is_some())
}

/// A preprocessed pattern, reusable across several haystacks.
#[derive(Clone, Debug)]
pub struct BoyerMoore<'a> {
    pattern: &'a [u8],
    bad_char: [usize; 256],
    good_suffix: Vec<usize>,
}

impl<'a> BoyerMoore<'a> {
    /// Builds the shift tables for `pattern`.
    pub fn new(pattern: &'a [u8]) -> Self {
        Self {
            pattern,
            bad_char: bad_char_table(pattern),
            good_suffix: good_suffix_table(pattern),
        }
    }

    /// Returns the lowest index at which the pattern occurs in `haystack`.
    pub fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        let len = self.pattern.len();
        if len == 0 {
            return Some(0);
        }

        let mut i = len - 1;
        while i < haystack.len() {
            let mut j = len - 1;
            while self.pattern[j] == haystack[i] {
                if j == 0 {
                    return Some(i);
                }
                i -= 1;
                j -= 1;
            }
            let shift = self.good_suffix[len - 1 - j].max(self.bad_char[haystack[i] as usize]);
            i += shift;
        }

        None
    }
}

fn bad_char_table(pattern: &[u8]) -> [usize; 256] {
    let len = pattern.len();
    let mut table = [len; 256];
    for (i, &byte) in pattern.iter().enumerate().take(len.saturating_sub(1)) {
        table[byte as usize] = len - 1 - i;
    }
    table
}

fn good_suffix_table(pattern: &[u8]) -> Vec<usize> {
    let len = pattern.len();
    let mut table = vec![0; len];
    if len == 0 {
        return table;
    }

    let mut last_prefix_position = len;
    for i in (1..=len).rev() {
        if is_prefix(pattern, i) {
            last_prefix_position = i;
        }
        table[len - i] = last_prefix_position - i + len;
    }

    for i in 0..len - 1 {
        let suffix_len = suffix_length(pattern, i);
        table[suffix_len] = len - 1 - i + suffix_len;
    }

    table
}

/// Whether `pattern[p..]` is a prefix of `pattern`.
fn is_prefix(pattern: &[u8], p: usize) -> bool {
    pattern[p..]
        .iter()
        .zip(pattern.iter())
        .all(|(a, b)| a == b)
}

/// Length of the longest substring ending at `p` that is also a suffix of `pattern`.
fn suffix_length(pattern: &[u8], p: usize) -> usize {
    pattern[..=p]
        .iter()
        .rev()
        .zip(pattern.iter().rev())
        .take_while(|(a, b)| a == b)
        .count()
}
