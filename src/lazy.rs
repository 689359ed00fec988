//! Lazy cursors over packed containers.
//!
//! A cursor wraps a TOC node that kept its child table and resolves one
//! child at a time, fetching only the byte range that holds the requested
//! value. Children without a table of their own come back as plain values;
//! children with one come back as nested cursors. Cursors are read-only and
//! idempotent, and optionally memoise decoded children.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;

use crate::error::{LazyError, Result};
use crate::path::PathSeg;
use crate::reader::SessionInner;
use crate::toc::{GroupBlock, TocChildren, TocNode};
use crate::value::Value;

/// A value resolved from a blob: fully decoded, or a cursor onto a
/// still-packed container.
pub enum LazyValue {
    Plain(Value),
    Map(LazyMap),
    Seq(LazySeq),
}

impl LazyValue {
    /// Materialises the full tree behind this value.
    pub fn to_plain(&self) -> Result<Value> {
        match self {
            LazyValue::Plain(value) => Ok(value.clone()),
            LazyValue::Map(map) => map.to_value(),
            LazyValue::Seq(seq) => seq.to_value(),
        }
    }

    /// Structural comparison against a plain value, decoding on demand.
    pub fn eq_value(&self, other: &Value) -> Result<bool> {
        match self {
            LazyValue::Plain(value) => Ok(value == other),
            LazyValue::Map(map) => map.eq_value(other),
            LazyValue::Seq(seq) => seq.eq_value(other),
        }
    }

    #[must_use]
    pub fn as_plain(&self) -> Option<&Value> {
        match self {
            LazyValue::Plain(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&LazyMap> {
        match self {
            LazyValue::Map(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_seq(&self) -> Option<&LazySeq> {
        match self {
            LazyValue::Seq(seq) => Some(seq),
            _ => None,
        }
    }
}

impl fmt::Debug for LazyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LazyValue::Plain(value) => f.debug_tuple("Plain").field(value).finish(),
            LazyValue::Map(_) => f.write_str("LazyMap(..)"),
            LazyValue::Seq(_) => f.write_str("LazySeq(..)"),
        }
    }
}

impl PartialEq<Value> for LazyValue {
    fn eq(&self, other: &Value) -> bool {
        self.eq_value(other).unwrap_or(false)
    }
}

impl PartialEq<LazyValue> for Value {
    fn eq(&self, other: &LazyValue) -> bool {
        other.eq_value(self).unwrap_or(false)
    }
}

/// Materialises the full tree behind any lazy value.
pub fn to_plain(value: &LazyValue) -> Result<Value> {
    value.to_plain()
}

/// Builds the right wrapper for a TOC node: a cursor when the node kept its
/// child table, the decoded value otherwise.
pub(crate) fn materialise(
    session: &Arc<SessionInner>,
    node_path: Vec<usize>,
    node: &TocNode,
) -> Result<LazyValue> {
    match &node.children {
        Some(TocChildren::Keyed(_)) => Ok(LazyValue::Map(LazyMap::new(
            session.clone(),
            node_path,
        ))),
        Some(_) => Ok(LazyValue::Seq(LazySeq::new(session.clone(), node_path))),
        None => {
            let bytes = session.read_payload(node.start, node.end)?;
            Ok(LazyValue::Plain(session.codec().decode(&bytes)?))
        }
    }
}

/// Resolves one path segment inside an already-decoded value.
pub(crate) fn descend_plain(value: &Value, segment: &PathSeg) -> Result<Value> {
    match value {
        Value::Map(pairs) => {
            let key = segment.as_key().ok_or(LazyError::WrongType {
                expected: "string key",
                found: "integer index",
            })?;
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| LazyError::KeyNotFound {
                    key: key.to_string(),
                })
        }
        Value::Seq(items) => {
            let index = segment.as_index().ok_or(LazyError::WrongType {
                expected: "integer index",
                found: "string key",
            })?;
            items
                .get(index)
                .cloned()
                .ok_or(LazyError::IndexOutOfBounds {
                    index,
                    len: items.len(),
                })
        }
        other => Err(LazyError::WrongType {
            expected: "container",
            found: other.type_name(),
        }),
    }
}

/// Cursor over a packed map that kept a keyed child table.
pub struct LazyMap {
    session: Arc<SessionInner>,
    node_path: Vec<usize>,
    cache: Mutex<HashMap<usize, Value>>,
    /// Indices resolved through this cursor, cached or not. Drives the
    /// fast-load decision in [`LazyMap::to_value`].
    accessed: Mutex<HashSet<usize>>,
}

impl LazyMap {
    pub(crate) fn new(session: Arc<SessionInner>, node_path: Vec<usize>) -> Self {
        Self {
            session,
            node_path,
            cache: Mutex::new(HashMap::new()),
            accessed: Mutex::new(HashSet::new()),
        }
    }

    fn entries(&self) -> Result<&[(String, TocNode)]> {
        let toc = self.session.toc()?;
        let node = self.session.node_at(toc, &self.node_path)?;
        match &node.children {
            Some(TocChildren::Keyed(entries)) => Ok(entries),
            _ => Err(LazyError::format("map cursor lost its keyed table")),
        }
    }

    fn range(&self) -> Result<(u64, u64)> {
        let toc = self.session.toc()?;
        let node = self.session.node_at(toc, &self.node_path)?;
        Ok((node.start, node.end))
    }

    /// Number of entries.
    pub fn len(&self) -> Result<usize> {
        self.session.ensure_open()?;
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Keys in stored order.
    pub fn keys(&self) -> Result<Vec<String>> {
        self.session.ensure_open()?;
        Ok(self.entries()?.iter().map(|(k, _)| k.clone()).collect())
    }

    pub fn contains_key(&self, key: &str) -> Result<bool> {
        self.session.ensure_open()?;
        Ok(self.entries()?.iter().any(|(k, _)| k == key))
    }

    /// Resolves a child by key.
    pub fn get(&self, key: &str) -> Result<LazyValue> {
        self.session.ensure_open()?;
        let index = self
            .entries()?
            .iter()
            .position(|(k, _)| k == key)
            .ok_or_else(|| LazyError::KeyNotFound {
                key: key.to_string(),
            })?;
        self.resolve_child(index)
    }

    /// Iterates `(key, value)` pairs in stored order, resolving lazily.
    pub fn iter(&self) -> Result<LazyMapIter<'_>> {
        self.session.ensure_open()?;
        let len = self.entries()?.len();
        Ok(LazyMapIter {
            map: self,
            index: 0,
            len,
        })
    }

    /// Structural comparison against a plain map: same keys in stored order,
    /// each corresponding value equal.
    pub fn eq_value(&self, other: &Value) -> Result<bool> {
        self.session.ensure_open()?;
        let Some(pairs) = other.as_map() else {
            return Ok(false);
        };
        let entries = self.entries()?;
        if entries.len() != pairs.len() {
            return Ok(false);
        }
        let keys_match = entries
            .iter()
            .zip(pairs.iter())
            .all(|((mine, _), (theirs, _))| mine == theirs);
        if !keys_match {
            return Ok(false);
        }
        for (index, (_, theirs)) in pairs.iter().enumerate() {
            if !self.resolve_child(index)?.eq_value(theirs)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Materialises the whole map.
    ///
    /// With fast loading on and little of the map already decoded, the whole
    /// byte range is fetched in one read; otherwise children are resolved
    /// individually so cache hits are reused.
    pub fn to_value(&self) -> Result<Value> {
        self.session.ensure_open()?;
        let entries = self.entries()?;
        let total = entries.len();
        let accessed = self
            .accessed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len();
        if whole_fetch_is_cheaper(self.session.as_ref(), accessed, total) {
            let (start, end) = self.range()?;
            let bytes = self.session.read_payload(start, end)?;
            return self.session.codec().decode(&bytes);
        }
        let keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
        let mut pairs = Vec::with_capacity(total);
        for (index, key) in keys.into_iter().enumerate() {
            let value = self.resolve_child(index)?.to_plain()?;
            pairs.push((key, value));
        }
        Ok(Value::Map(pairs))
    }

    fn resolve_child(&self, index: usize) -> Result<LazyValue> {
        self.session.ensure_open()?;
        self.accessed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(index);
        if self.session.cache_enabled() {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(value) = cache.get(&index) {
                return Ok(LazyValue::Plain(value.clone()));
            }
        }
        let (leaf, start, end) = {
            let child = &self.entries()?[index].1;
            (child.is_leaf(), child.start, child.end)
        };
        if leaf {
            let bytes = self.session.read_payload(start, end)?;
            let value = self.session.codec().decode(&bytes)?;
            if self.session.cache_enabled() {
                let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
                cache.insert(index, value.clone());
            }
            Ok(LazyValue::Plain(value))
        } else {
            let mut node_path = self.node_path.clone();
            node_path.push(index);
            let toc = self.session.toc()?;
            let node = self.session.node_at(toc, &node_path)?;
            materialise(&self.session, node_path, node)
        }
    }
}

impl fmt::Debug for LazyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LazyMap(..)")
    }
}

impl PartialEq<Value> for LazyMap {
    fn eq(&self, other: &Value) -> bool {
        self.eq_value(other).unwrap_or(false)
    }
}

impl PartialEq<LazyMap> for Value {
    fn eq(&self, other: &LazyMap) -> bool {
        other.eq_value(self).unwrap_or(false)
    }
}

/// Lazily resolving `(key, value)` iterator over a [`LazyMap`].
pub struct LazyMapIter<'a> {
    map: &'a LazyMap,
    index: usize,
    len: usize,
}

impl Iterator for LazyMapIter<'_> {
    type Item = Result<(String, LazyValue)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.len {
            return None;
        }
        let index = self.index;
        self.index += 1;
        let item = (|| {
            let key = self.map.entries()?[index].0.clone();
            let value = self.map.resolve_child(index)?;
            Ok((key, value))
        })();
        Some(item)
    }
}

/// Cursor over a packed sequence with a positional or grouped child table.
pub struct LazySeq {
    session: Arc<SessionInner>,
    node_path: Vec<usize>,
    cache: Mutex<HashMap<usize, Value>>,
    /// Indices resolved through this cursor, cached or not.
    accessed: Mutex<HashSet<usize>>,
    /// Cumulative element counts per grouped block, built on first use.
    prefix: OnceCell<Vec<u64>>,
}

enum SeqTable<'a> {
    Positional(&'a [TocNode]),
    Grouped(&'a [GroupBlock]),
}

impl LazySeq {
    pub(crate) fn new(session: Arc<SessionInner>, node_path: Vec<usize>) -> Self {
        Self {
            session,
            node_path,
            cache: Mutex::new(HashMap::new()),
            accessed: Mutex::new(HashSet::new()),
            prefix: OnceCell::new(),
        }
    }

    fn table(&self) -> Result<SeqTable<'_>> {
        let toc = self.session.toc()?;
        let node = self.session.node_at(toc, &self.node_path)?;
        match &node.children {
            Some(TocChildren::Positional(nodes)) => Ok(SeqTable::Positional(nodes)),
            Some(TocChildren::Grouped(blocks)) => Ok(SeqTable::Grouped(blocks)),
            _ => Err(LazyError::format("sequence cursor lost its table")),
        }
    }

    fn range(&self) -> Result<(u64, u64)> {
        let toc = self.session.toc()?;
        let node = self.session.node_at(toc, &self.node_path)?;
        Ok((node.start, node.end))
    }

    fn prefix_sums(&self, blocks: &[GroupBlock]) -> &[u64] {
        self.prefix.get_or_init(|| {
            let mut total = 0u64;
            blocks
                .iter()
                .map(|b| {
                    total += b.count;
                    total
                })
                .collect()
        })
    }

    /// Number of elements.
    pub fn len(&self) -> Result<usize> {
        self.session.ensure_open()?;
        match self.table()? {
            SeqTable::Positional(nodes) => Ok(nodes.len()),
            SeqTable::Grouped(blocks) => {
                let sums = self.prefix_sums(blocks);
                Ok(sums.last().copied().unwrap_or(0) as usize)
            }
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Resolves the element at `index`.
    pub fn get(&self, index: usize) -> Result<LazyValue> {
        self.session.ensure_open()?;
        self.accessed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(index);
        if self.session.cache_enabled() {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(value) = cache.get(&index) {
                return Ok(LazyValue::Plain(value.clone()));
            }
        }
        match self.table()? {
            SeqTable::Positional(nodes) => {
                let len = nodes.len();
                let child = nodes
                    .get(index)
                    .ok_or(LazyError::IndexOutOfBounds { index, len })?;
                let (leaf, start, end) = (child.is_leaf(), child.start, child.end);
                if leaf {
                    let bytes = self.session.read_payload(start, end)?;
                    let value = self.session.codec().decode(&bytes)?;
                    if self.session.cache_enabled() {
                        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
                        cache.insert(index, value.clone());
                    }
                    Ok(LazyValue::Plain(value))
                } else {
                    let mut node_path = self.node_path.clone();
                    node_path.push(index);
                    let toc = self.session.toc()?;
                    let node = self.session.node_at(toc, &node_path)?;
                    materialise(&self.session, node_path, node)
                }
            }
            SeqTable::Grouped(blocks) => {
                let (block, base) = {
                    let sums = self.prefix_sums(blocks);
                    let total = sums.last().copied().unwrap_or(0) as usize;
                    if index >= total {
                        return Err(LazyError::IndexOutOfBounds { index, len: total });
                    }
                    let block_index = sums.partition_point(|&c| c <= index as u64);
                    let base = if block_index == 0 {
                        0
                    } else {
                        sums[block_index - 1] as usize
                    };
                    (blocks[block_index], base)
                };
                let value = self.decode_block(&block, base, index)?;
                Ok(LazyValue::Plain(value))
            }
        }
    }

    /// Decodes one grouped block and returns the element at global `index`,
    /// memoising every element of the block along the way.
    fn decode_block(&self, block: &GroupBlock, base: usize, index: usize) -> Result<Value> {
        let bytes = self.session.read_payload(block.start, block.end)?;
        let codec = self.session.codec();
        let mut offset = 0usize;
        let mut target = None;
        let mut cache = if self.session.cache_enabled() {
            Some(self.cache.lock().unwrap_or_else(|e| e.into_inner()))
        } else {
            None
        };
        for position in 0..block.count as usize {
            let (value, consumed) = codec.decode_skipping(&bytes[offset..])?;
            offset += consumed;
            if base + position == index {
                target = Some(value.clone());
            }
            if let Some(cache) = cache.as_mut() {
                cache.insert(base + position, value);
            }
        }
        if offset != bytes.len() {
            return Err(LazyError::format("grouped block length mismatch"));
        }
        target.ok_or_else(|| LazyError::format("grouped block miscounted"))
    }

    /// Lazily iterated view over `range`.
    pub fn slice(&self, range: Range<usize>) -> Result<LazySeqIter<'_>> {
        self.session.ensure_open()?;
        let len = self.len()?;
        if range.end > len || range.start > range.end {
            return Err(LazyError::IndexOutOfBounds {
                index: range.end,
                len,
            });
        }
        Ok(LazySeqIter {
            seq: self,
            index: range.start,
            end: range.end,
        })
    }

    /// Iterates every element in order.
    pub fn iter(&self) -> Result<LazySeqIter<'_>> {
        let len = self.len()?;
        self.slice(0..len)
    }

    /// Structural comparison against a plain sequence.
    pub fn eq_value(&self, other: &Value) -> Result<bool> {
        self.session.ensure_open()?;
        let Some(items) = other.as_seq() else {
            return Ok(false);
        };
        if self.len()? != items.len() {
            return Ok(false);
        }
        for (index, item) in items.iter().enumerate() {
            if !self.get(index)?.eq_value(item)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Materialises the whole sequence. Same fast-load policy as
    /// [`LazyMap::to_value`].
    pub fn to_value(&self) -> Result<Value> {
        self.session.ensure_open()?;
        let total = self.len()?;
        let accessed = self
            .accessed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len();
        if whole_fetch_is_cheaper(self.session.as_ref(), accessed, total) {
            let (start, end) = self.range()?;
            let bytes = self.session.read_payload(start, end)?;
            return self.session.codec().decode(&bytes);
        }
        let mut items = Vec::with_capacity(total);
        for index in 0..total {
            items.push(self.get(index)?.to_plain()?);
        }
        Ok(Value::Seq(items))
    }
}

impl fmt::Debug for LazySeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LazySeq(..)")
    }
}

impl PartialEq<Value> for LazySeq {
    fn eq(&self, other: &Value) -> bool {
        self.eq_value(other).unwrap_or(false)
    }
}

impl PartialEq<LazySeq> for Value {
    fn eq(&self, other: &LazySeq) -> bool {
        other.eq_value(self).unwrap_or(false)
    }
}

/// Lazily resolving element iterator over a [`LazySeq`].
pub struct LazySeqIter<'a> {
    seq: &'a LazySeq,
    index: usize,
    end: usize,
}

impl Iterator for LazySeqIter<'_> {
    type Item = Result<LazyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.end {
            return None;
        }
        let index = self.index;
        self.index += 1;
        Some(self.seq.get(index))
    }
}

/// Fast-load policy: fetch the whole range when little of the container has
/// been touched, otherwise descend so cache hits are reused.
fn whole_fetch_is_cheaper(session: &SessionInner, accessed: usize, total: usize) -> bool {
    if !session.config().fast_load {
        return false;
    }
    if total == 0 {
        return true;
    }
    (accessed as f64) / (total as f64) < session.config().fast_load_threshold
}
