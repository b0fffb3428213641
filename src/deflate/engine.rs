//! LZ77 match finding.
//!
//! The engine keeps a 64 KiB window over the input. Positions are indexed by
//! a rolling hash of their first three bytes; `head` holds the most recent
//! position per hash and `prev` chains each position to the previous one with
//! the same hash. Position 0 is never inserted and doubles as "no match".

use tracing::trace;

use super::blocks::{BlockEncoder, MAX_STORED_BLOCK};
use super::bits::BitSink;
use super::tables::{MAX_MATCH, MIN_MATCH};
use crate::checksum::{Adler32, Checksum};
use crate::error::{Error, Result};

const WSIZE: usize = 1 << 15;
const WMASK: usize = WSIZE - 1;
const HASH_BITS: usize = 15;
const HASH_SIZE: usize = 1 << HASH_BITS;
const HASH_MASK: usize = HASH_SIZE - 1;
const HASH_SHIFT: usize = 5;

/// Lookahead needed to guarantee a full-length match.
const MIN_LOOKAHEAD: usize = MAX_MATCH + MIN_MATCH + 1;

/// Furthest back a match may start, keeping MIN_LOOKAHEAD inside the window.
const MAX_DIST: usize = WSIZE - MIN_LOOKAHEAD;

/// Three-byte matches further back than this are not worth a reference.
const TOO_FAR: usize = 4096;

/// Match-finding strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeflateStrategy {
    #[default]
    Default,
    /// Prefer literals over short matches, for data with small random values.
    Filtered,
    /// No matching at all.
    HuffmanOnly,
}

/// How a level searches for matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Stored,
    Fast,
    Slow,
}

/// Search tuning for one compression level.
#[derive(Debug, Clone, Copy)]
struct LevelConfig {
    good_length: usize,
    max_lazy: usize,
    nice_length: usize,
    max_chain: usize,
    function: Function,
}

const fn level(
    good_length: usize,
    max_lazy: usize,
    nice_length: usize,
    max_chain: usize,
    function: Function,
) -> LevelConfig {
    LevelConfig {
        good_length,
        max_lazy,
        nice_length,
        max_chain,
        function,
    }
}

const LEVELS: [LevelConfig; 10] = [
    level(0, 0, 0, 0, Function::Stored),
    level(4, 4, 8, 4, Function::Fast),
    level(4, 5, 16, 8, Function::Fast),
    level(4, 6, 32, 32, Function::Fast),
    level(4, 16, 16, 16, Function::Slow),
    level(8, 16, 32, 32, Function::Slow),
    level(8, 16, 128, 128, Function::Slow),
    level(8, 32, 128, 256, Function::Slow),
    level(32, 128, 258, 1024, Function::Slow),
    level(32, 258, 258, 4096, Function::Slow),
];

/// Bytes of the current block when they are still inside the window.
fn block_bytes(window: &[u8], block_start: isize, len: usize) -> Option<&[u8]> {
    let start = usize::try_from(block_start).ok()?;
    window.get(start..start + len)
}

/// Sliding-window LZ77 compressor feeding a [`BlockEncoder`].
pub struct DeflaterEngine {
    window: Vec<u8>,
    head: Vec<u16>,
    prev: Vec<u16>,
    ins_h: usize,

    strstart: usize,
    lookahead: usize,
    /// Start of the open block; negative once the window slid past it.
    block_start: isize,
    match_start: usize,
    match_len: usize,
    prev_available: bool,

    config: LevelConfig,
    strategy: DeflateStrategy,

    input: Vec<u8>,
    input_pos: usize,
    total_in: u64,
    adler: Adler32,

    blocks: BlockEncoder,
}

impl std::fmt::Debug for DeflaterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeflaterEngine")
            .field("strstart", &self.strstart)
            .field("lookahead", &self.lookahead)
            .field("block_start", &self.block_start)
            .field("config", &self.config)
            .field("strategy", &self.strategy)
            .field("total_in", &self.total_in)
            .finish_non_exhaustive()
    }
}

impl DeflaterEngine {
    pub fn new(level: u8, strategy: DeflateStrategy) -> Self {
        let mut engine = Self {
            window: vec![0; 2 * WSIZE],
            head: vec![0; HASH_SIZE],
            prev: vec![0; WSIZE],
            ins_h: 0,
            strstart: 1,
            lookahead: 0,
            block_start: 1,
            match_start: 0,
            match_len: MIN_MATCH - 1,
            prev_available: false,
            config: LEVELS[(level as usize).min(9)],
            strategy,
            input: Vec::new(),
            input_pos: 0,
            total_in: 0,
            adler: Adler32::new(),
            blocks: BlockEncoder::new(),
        };
        engine.reset();
        engine
    }

    /// Forget all history, pending input and output.
    pub fn reset(&mut self) {
        self.blocks.reset();
        self.head.fill(0);
        self.prev.fill(0);
        self.ins_h = 0;
        self.strstart = 1;
        self.block_start = 1;
        self.lookahead = 0;
        self.match_start = 0;
        self.match_len = MIN_MATCH - 1;
        self.prev_available = false;
        self.input.clear();
        self.input_pos = 0;
        self.total_in = 0;
        self.adler.reset();
    }

    pub fn reset_adler(&mut self) {
        self.adler.reset();
    }

    /// Adler-32 of everything consumed so far.
    pub fn adler(&self) -> u32 {
        self.adler.value()
    }

    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    pub fn pending(&self) -> &BitSink {
        self.blocks.sink()
    }

    pub fn pending_mut(&mut self) -> &mut BitSink {
        self.blocks.sink_mut()
    }

    pub fn strategy(&self) -> DeflateStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: DeflateStrategy) {
        self.strategy = strategy;
    }

    /// True when all queued input has been pulled into the window.
    pub fn needs_input(&self) -> bool {
        self.input_pos == self.input.len()
    }

    /// Queue input. The previous input must be fully consumed.
    pub fn set_input(&mut self, data: &[u8]) -> Result<()> {
        if !self.needs_input() {
            return Err(Error::usage("previous input was not completely processed"));
        }
        self.input.clear();
        self.input.extend_from_slice(data);
        self.input_pos = 0;
        Ok(())
    }

    /// Prime the window with a preset dictionary. Only the last
    /// `MAX_DIST` bytes are kept.
    pub fn set_dictionary(&mut self, dictionary: &[u8]) {
        self.adler.update(dictionary);
        if dictionary.len() < MIN_MATCH {
            return;
        }
        let dictionary = &dictionary[dictionary.len().saturating_sub(MAX_DIST)..];

        self.window[self.strstart..self.strstart + dictionary.len()].copy_from_slice(dictionary);
        self.update_hash();
        for _ in 0..dictionary.len() - 2 {
            self.insert_string();
            self.strstart += 1;
        }
        self.strstart += 2;
        self.block_start = self.strstart as isize;
    }

    /// Switch compression level, closing the open block first when the
    /// search function changes.
    pub fn set_level(&mut self, level: u8) {
        let config = LEVELS[(level as usize).min(9)];
        if config.function != self.config.function {
            let len = (self.strstart as isize - self.block_start).max(0) as usize;
            match self.config.function {
                Function::Stored => {
                    if len > 0 {
                        if let Some(data) = block_bytes(&self.window, self.block_start, len) {
                            self.blocks.flush_stored_block(data, false);
                        }
                        self.block_start = self.strstart as isize;
                    }
                }
                Function::Fast => {
                    if len > 0 {
                        let data = block_bytes(&self.window, self.block_start, len);
                        self.blocks.flush_block(data, false);
                        self.block_start = self.strstart as isize;
                    }
                }
                Function::Slow => {
                    if self.prev_available {
                        self.blocks.tally_literal(self.window[self.strstart - 1]);
                    }
                    if len > 0 {
                        let data = block_bytes(&self.window, self.block_start, len);
                        self.blocks.flush_block(data, false);
                        self.block_start = self.strstart as isize;
                    }
                    self.prev_available = false;
                    self.match_len = MIN_MATCH - 1;
                }
            }
        }
        self.config = config;
    }

    /// Run the search until output is pending or no progress can be made.
    ///
    /// `flush` closes the open block once all input is consumed; `finish`
    /// additionally marks it final. Returns false when more input is needed
    /// (or, with `finish`, the final block has been written).
    pub fn deflate(&mut self, flush: bool, finish: bool) -> bool {
        loop {
            self.fill_window();
            let can_flush = flush && self.needs_input();
            let progress = match self.config.function {
                Function::Stored => self.deflate_stored(can_flush, finish),
                Function::Fast => self.deflate_fast(can_flush, finish),
                Function::Slow => self.deflate_slow(can_flush, finish),
            };
            if !(self.blocks.sink().is_flushed() && progress) {
                return progress;
            }
        }
    }

    fn fill_window(&mut self) {
        if self.strstart >= WSIZE + MAX_DIST {
            self.slide_window();
        }

        while self.lookahead < MIN_LOOKAHEAD && self.input_pos < self.input.len() {
            let free = 2 * WSIZE - self.lookahead - self.strstart;
            let more = free.min(self.input.len() - self.input_pos);
            if more == 0 {
                break;
            }
            let dest = self.strstart + self.lookahead;
            let chunk = &self.input[self.input_pos..self.input_pos + more];
            self.window[dest..dest + more].copy_from_slice(chunk);
            self.adler.update(chunk);
            self.input_pos += more;
            self.total_in += more as u64;
            self.lookahead += more;
        }

        if self.lookahead >= MIN_MATCH {
            self.update_hash();
        }
    }

    fn slide_window(&mut self) {
        trace!(strstart = self.strstart, "sliding window");
        self.window.copy_within(WSIZE..2 * WSIZE, 0);
        self.match_start = self.match_start.saturating_sub(WSIZE);
        self.strstart -= WSIZE;
        self.block_start -= WSIZE as isize;

        for slot in self.head.iter_mut().chain(self.prev.iter_mut()) {
            let pos = *slot as usize;
            *slot = if pos >= WSIZE { (pos - WSIZE) as u16 } else { 0 };
        }
    }

    #[inline]
    fn update_hash(&mut self) {
        self.ins_h = ((self.window[self.strstart] as usize) << HASH_SHIFT)
            ^ self.window[self.strstart + 1] as usize;
    }

    /// Insert the string at `strstart` and return the previous head of its
    /// hash chain.
    #[inline]
    fn insert_string(&mut self) -> usize {
        let hash = ((self.ins_h << HASH_SHIFT) ^ self.window[self.strstart + 2] as usize)
            & HASH_MASK;
        let previous = self.head[hash];
        self.prev[self.strstart & WMASK] = previous;
        self.head[hash] = self.strstart as u16;
        self.ins_h = hash;
        previous as usize
    }

    /// Walk the hash chain from `cur_match` looking for a match longer than
    /// the current `match_len`.
    fn find_longest_match(&mut self, mut cur_match: usize) -> bool {
        let scan = self.strstart;
        let max_len = MAX_MATCH.min(self.lookahead);
        let nice_length = self.config.nice_length.min(self.lookahead);
        let limit = scan.saturating_sub(MAX_DIST);
        let mut chain = self.config.max_chain;
        let mut best_len = self.match_len.max(MIN_MATCH - 1);

        if best_len >= max_len {
            return false;
        }
        if best_len >= self.config.good_length {
            chain >>= 1;
        }

        let window = &self.window;
        let mut found = false;
        loop {
            if window[cur_match + best_len] == window[scan + best_len]
                && window[cur_match + best_len - 1] == window[scan + best_len - 1]
                && window[cur_match] == window[scan]
                && window[cur_match + 1] == window[scan + 1]
            {
                let len = window[cur_match..cur_match + max_len]
                    .iter()
                    .zip(&window[scan..scan + max_len])
                    .take_while(|(a, b)| a == b)
                    .count();
                if len > best_len {
                    self.match_start = cur_match;
                    best_len = len;
                    found = true;
                    if len >= nice_length {
                        break;
                    }
                }
            }

            cur_match = self.prev[cur_match & WMASK] as usize;
            if cur_match <= limit || chain <= 1 {
                break;
            }
            chain -= 1;
        }

        if found {
            self.match_len = best_len;
        }
        found
    }

    fn deflate_stored(&mut self, flush: bool, finish: bool) -> bool {
        if !flush && self.lookahead == 0 {
            return false;
        }
        self.strstart += self.lookahead;
        self.lookahead = 0;

        let mut stored_len = (self.strstart as isize - self.block_start) as usize;
        if stored_len >= MAX_STORED_BLOCK
            || (self.block_start < WSIZE as isize && stored_len >= MAX_DIST)
            || flush
        {
            let mut last = finish;
            if stored_len > MAX_STORED_BLOCK {
                stored_len = MAX_STORED_BLOCK;
                last = false;
            }
            // Stored blocks are closed before the window can slide past them.
            debug_assert!(self.block_start >= 0);
            let data = block_bytes(&self.window, self.block_start, stored_len).unwrap_or_default();
            self.blocks.flush_stored_block(data, last);
            self.block_start += stored_len as isize;
            return !last;
        }
        true
    }

    fn deflate_fast(&mut self, flush: bool, finish: bool) -> bool {
        if self.lookahead < MIN_LOOKAHEAD && !flush {
            return false;
        }

        while self.lookahead >= MIN_LOOKAHEAD || flush {
            if self.lookahead == 0 {
                self.flush_open_block(finish);
                return false;
            }
            if self.strstart >= WSIZE + MAX_DIST {
                self.slide_window();
            }

            let mut matched = false;
            if self.lookahead >= MIN_MATCH {
                let hash_head = self.insert_string();
                matched = hash_head != 0
                    && self.strategy != DeflateStrategy::HuffmanOnly
                    && self.strstart - hash_head <= MAX_DIST
                    && self.find_longest_match(hash_head);
            }

            if matched {
                let full = self
                    .blocks
                    .tally_match(self.strstart - self.match_start, self.match_len);
                self.lookahead -= self.match_len;
                if self.match_len <= self.config.max_lazy && self.lookahead >= MIN_MATCH {
                    for _ in 1..self.match_len {
                        self.strstart += 1;
                        self.insert_string();
                    }
                    self.strstart += 1;
                } else {
                    self.strstart += self.match_len;
                    if self.lookahead >= MIN_MATCH - 1 {
                        self.update_hash();
                    }
                }
                self.match_len = MIN_MATCH - 1;
                if !full {
                    continue;
                }
            } else {
                self.blocks.tally_literal(self.window[self.strstart]);
                self.strstart += 1;
                self.lookahead -= 1;
            }

            if self.blocks.is_full() {
                let last = finish && self.lookahead == 0;
                let len = (self.strstart as isize - self.block_start) as usize;
                let data = block_bytes(&self.window, self.block_start, len);
                self.blocks.flush_block(data, last);
                self.block_start = self.strstart as isize;
                return !last;
            }
        }
        true
    }

    fn deflate_slow(&mut self, flush: bool, finish: bool) -> bool {
        if self.lookahead < MIN_LOOKAHEAD && !flush {
            return false;
        }

        while self.lookahead >= MIN_LOOKAHEAD || flush {
            if self.lookahead == 0 {
                if self.prev_available {
                    self.blocks.tally_literal(self.window[self.strstart - 1]);
                }
                self.prev_available = false;
                self.flush_open_block(finish);
                return false;
            }
            if self.strstart >= WSIZE + MAX_DIST {
                self.slide_window();
            }

            let prev_match = self.match_start;
            let prev_len = self.match_len;
            if self.lookahead >= MIN_MATCH {
                let hash_head = self.insert_string();
                if self.strategy != DeflateStrategy::HuffmanOnly
                    && prev_len < self.config.max_lazy
                    && hash_head != 0
                    && self.strstart - hash_head <= MAX_DIST
                    && self.find_longest_match(hash_head)
                    && self.match_len <= 5
                    && (self.strategy == DeflateStrategy::Filtered
                        || (self.match_len == MIN_MATCH
                            && self.strstart - self.match_start > TOO_FAR))
                {
                    self.match_len = MIN_MATCH - 1;
                }
            }

            if prev_len >= MIN_MATCH && self.match_len <= prev_len {
                self.blocks
                    .tally_match(self.strstart - 1 - prev_match, prev_len);
                // The match started one byte back; skip the rest of it.
                for _ in 0..prev_len - 2 {
                    self.strstart += 1;
                    self.lookahead -= 1;
                    if self.lookahead >= MIN_MATCH {
                        self.insert_string();
                    }
                }
                self.strstart += 1;
                self.lookahead -= 1;
                self.prev_available = false;
                self.match_len = MIN_MATCH - 1;
            } else {
                if self.prev_available {
                    self.blocks.tally_literal(self.window[self.strstart - 1]);
                }
                self.prev_available = true;
                self.strstart += 1;
                self.lookahead -= 1;
            }

            if self.blocks.is_full() {
                let mut len = (self.strstart as isize - self.block_start) as usize;
                if self.prev_available {
                    len -= 1;
                }
                let last = finish && self.lookahead == 0 && !self.prev_available;
                let data = block_bytes(&self.window, self.block_start, len);
                self.blocks.flush_block(data, last);
                self.block_start += len as isize;
                return !last;
            }
        }
        true
    }

    fn flush_open_block(&mut self, last: bool) {
        let len = (self.strstart as isize - self.block_start) as usize;
        let data = block_bytes(&self.window, self.block_start, len);
        self.blocks.flush_block(data, last);
        self.block_start = self.strstart as isize;
    }
}
