//! Context assembly for retrieval results.
//!
//! Turns ranked [`RetrievalResult`]s into one bounded context string plus
//! citations.
//!
//! # Algorithm
//!
//! 1. Group candidates by document and merge runs of contiguous
//!    `sequence_index` into a single [`ContextBlock`]. Overlapping text is
//!    removed using the chunks' character offsets. A block scores as its
//!    best member and ranks at its best member's position.
//! 2. Walk blocks by descending score (ties: earlier rank first) and
//!    append each one that still fits into `max_context_chars`, counting
//!    the separator.
//! 3. A block that does not fit whole falls back to its member chunks in
//!    score order. Each member is kept if it still fits; kept members that
//!    are contiguous are merged again. Nothing is ever truncated.
//! 4. Citations are the distinct `source_uri`s of included blocks, in
//!    inclusion order.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::models::RetrievalResult;

/// Placed between blocks in the assembled context.
pub const BLOCK_SEPARATOR: &str = "\n\n";

/// Descending score order with NaN treated as the lowest score.
pub fn by_score_desc(a: f32, b: f32) -> Ordering {
    let key = |s: f32| if s.is_nan() { f32::NEG_INFINITY } else { s };
    key(b).total_cmp(&key(a))
}

/// One or more adjacent chunks of a single document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextBlock {
    pub document_id: String,
    pub source_uri: String,
    pub chunk_ids: Vec<String>,
    pub first_index: usize,
    pub last_index: usize,
    pub char_start: usize,
    pub char_end: usize,
    pub score: f32,
    pub text: String,
    #[serde(skip)]
    rank: usize,
    /// Member chunks with their candidate rank.
    #[serde(skip)]
    members: Vec<(usize, RetrievalResult)>,
}

impl ContextBlock {
    fn from_result(rank: usize, r: &RetrievalResult) -> Self {
        Self {
            document_id: r.document_id.clone(),
            source_uri: r.source_uri.clone(),
            chunk_ids: vec![r.chunk_id.clone()],
            first_index: r.sequence_index,
            last_index: r.sequence_index,
            char_start: r.char_start,
            char_end: r.char_end,
            score: r.score,
            text: r.text.clone(),
            rank,
            members: vec![(rank, r.clone())],
        }
    }

    fn absorb(&mut self, rank: usize, r: &RetrievalResult) {
        let shared = self.char_end.saturating_sub(r.char_start);
        self.text.extend(r.text.chars().skip(shared));
        self.chunk_ids.push(r.chunk_id.clone());
        self.last_index = r.sequence_index;
        self.char_end = self.char_end.max(r.char_end);
        if by_score_desc(r.score, self.score) == Ordering::Less {
            self.score = r.score;
        }
        self.rank = self.rank.min(rank);
        self.members.push((rank, r.clone()));
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Output of [`assemble_context`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievedContext {
    pub context: String,
    pub citations: Vec<String>,
    pub blocks: Vec<ContextBlock>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Merge contiguous chunks of the same document. Returns blocks ordered by
/// descending score, then by best candidate rank.
pub fn merge_adjacent(candidates: &[RetrievalResult]) -> Vec<ContextBlock> {
    let ranked: Vec<(usize, &RetrievalResult)> = candidates.iter().enumerate().collect();
    merge_ranked(&ranked)
}

fn merge_ranked(ranked: &[(usize, &RetrievalResult)]) -> Vec<ContextBlock> {
    let mut by_doc: HashMap<&str, Vec<(usize, &RetrievalResult)>> = HashMap::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for &(rank, c) in ranked {
        if seen.insert(c.chunk_id.as_str()) {
            by_doc.entry(c.document_id.as_str()).or_default().push((rank, c));
        }
    }

    let mut blocks = Vec::new();
    for (_, mut members) in by_doc {
        members.sort_by_key(|(_, c)| c.sequence_index);
        let mut current: Option<ContextBlock> = None;
        for (rank, c) in members {
            let contiguous =
                matches!(&current, Some(block) if c.sequence_index == block.last_index + 1);
            if contiguous {
                if let Some(block) = current.as_mut() {
                    block.absorb(rank, c);
                }
            } else if let Some(done) = current.replace(ContextBlock::from_result(rank, c)) {
                blocks.push(done);
            }
        }
        if let Some(done) = current {
            blocks.push(done);
        }
    }

    blocks.sort_by(|a, b| by_score_desc(a.score, b.score).then(a.rank.cmp(&b.rank)));
    blocks
}

/// Characters taken by `pieces`, with a separator before each one except
/// the first (and before the first too when `after_other` is set).
fn packed_len(pieces: &[ContextBlock], after_other: bool) -> usize {
    if pieces.is_empty() {
        return 0;
    }
    let separators = pieces.len() - 1 + usize::from(after_other);
    pieces.iter().map(ContextBlock::char_len).sum::<usize>()
        + separators * BLOCK_SEPARATOR.chars().count()
}

/// Best-scoring subset of `block`'s members that fits into `remaining`
/// characters, re-merged where the kept members are contiguous.
fn pack_members(block: &ContextBlock, remaining: usize, after_other: bool) -> Vec<ContextBlock> {
    let mut order: Vec<(usize, &RetrievalResult)> =
        block.members.iter().map(|(rank, r)| (*rank, r)).collect();
    order.sort_by(|a, b| by_score_desc(a.1.score, b.1.score).then(a.0.cmp(&b.0)));

    let mut kept: Vec<(usize, &RetrievalResult)> = Vec::new();
    let mut pieces = Vec::new();
    for member in order {
        kept.push(member);
        let trial = merge_ranked(&kept);
        if packed_len(&trial, after_other) <= remaining {
            pieces = trial;
        } else {
            kept.pop();
        }
    }
    pieces
}

/// Build a context of at most `max_context_chars` characters from ranked
/// candidates.
pub fn assemble_context(candidates: &[RetrievalResult], max_context_chars: usize) -> RetrievedContext {
    let mut out = RetrievedContext::default();
    let mut used = 0usize;

    for block in merge_adjacent(candidates) {
        if used >= max_context_chars {
            break;
        }
        let after_other = !out.blocks.is_empty();
        let remaining = max_context_chars - used;
        let whole = std::slice::from_ref(&block);
        let pieces = if packed_len(whole, after_other) <= remaining {
            vec![block]
        } else if block.members.len() > 1 {
            pack_members(&block, remaining, after_other)
        } else {
            continue;
        };

        for piece in pieces {
            if !out.blocks.is_empty() {
                out.context.push_str(BLOCK_SEPARATOR);
            }
            out.context.push_str(&piece.text);
            if !out.citations.contains(&piece.source_uri) {
                out.citations.push(piece.source_uri.clone());
            }
            out.blocks.push(piece);
        }
        used = out.context.chars().count();
    }

    out
}
