//! Natural ordering for tent and office names
//!
//! Tent names mix digits and separators ("71-2", "Tent 10"). Digit runs compare
//! by numeric value and everything else compares case-insensitively, so
//! "71-2" sorts after "71-1" and before "71-10".

use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Chunk {
    Text(String),
    Number(u128, usize),
}

impl Ord for Chunk {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // Equal values: fewer leading zeros first
            (Chunk::Number(a, a_len), Chunk::Number(b, b_len)) => {
                a.cmp(b).then(a_len.cmp(b_len))
            }
            (Chunk::Text(a), Chunk::Text(b)) => a.cmp(b),
            (Chunk::Number(..), Chunk::Text(_)) => Ordering::Less,
            (Chunk::Text(_), Chunk::Number(..)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Chunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort key splitting `name` into alternating text and number chunks
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NaturalKey(Vec<Chunk>);

pub fn natural_key(name: &str) -> NaturalKey {
    let mut chunks = Vec::new();
    let mut text = String::new();
    let mut digits = String::new();

    for ch in name.chars() {
        if ch.is_ascii_digit() {
            if !text.is_empty() {
                chunks.push(Chunk::Text(std::mem::take(&mut text)));
            }
            digits.push(ch);
        } else {
            if !digits.is_empty() {
                chunks.push(number_chunk(&std::mem::take(&mut digits)));
            }
            text.extend(ch.to_lowercase());
        }
    }
    if !text.is_empty() {
        chunks.push(Chunk::Text(text));
    }
    if !digits.is_empty() {
        chunks.push(number_chunk(&digits));
    }

    NaturalKey(chunks)
}

fn number_chunk(digits: &str) -> Chunk {
    match digits.parse::<u128>() {
        Ok(value) => Chunk::Number(value, digits.len()),
        // Absurdly long digit run: fall back to text ordering
        Err(_) => Chunk::Text(digits.to_string()),
    }
}

/// Compare two names in natural order
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_key(a).cmp(&natural_key(b))
}
