//! Table-of-contents tree: byte-range descriptors over the payload region.
//!
//! Every node records the half-open `[start, end)` range of its value's
//! encoding, offsets relative to payload start. Containers large enough to
//! warrant expansion also carry a child table: keyed for maps, positional
//! for sequences, or grouped block triples for long runs of small elements.

use crate::codec::{Codec, encode_to_vec};
use crate::constants::{TOC_KEY_POS, TOC_KEY_TABLE};
use crate::error::{LazyError, Result};
use crate::value::Value;

/// One block of a grouped table: `count` consecutive elements whose
/// concatenated encodings occupy `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupBlock {
    pub count: u64,
    pub start: u64,
    pub end: u64,
}

/// Child table of an expanded container node.
#[derive(Debug, Clone, PartialEq)]
pub enum TocChildren {
    /// Map children, in payload order. Positions cover value bytes only.
    Keyed(Vec<(String, TocNode)>),
    /// Sequence children, in payload order.
    Positional(Vec<TocNode>),
    /// Block ranges over a long run of trivially sized elements.
    Grouped(Vec<GroupBlock>),
}

/// A node of the TOC tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TocNode {
    pub start: u64,
    pub end: u64,
    pub children: Option<TocChildren>,
}

impl TocNode {
    /// Leaf entry covering `[start, end)`.
    #[must_use]
    pub fn leaf(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            children: None,
        }
    }

    /// True when the node carries no child table.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Encoded length of the value this node covers.
    #[must_use]
    pub fn byte_len(&self) -> u64 {
        self.end - self.start
    }

    /// Shifts every position in this subtree by `delta`. Used when grafting
    /// a blob's TOC into a combined blob.
    pub fn shift(&mut self, delta: u64) {
        self.start += delta;
        self.end += delta;
        match &mut self.children {
            None => {}
            Some(TocChildren::Keyed(pairs)) => {
                for (_, child) in pairs {
                    child.shift(delta);
                }
            }
            Some(TocChildren::Positional(nodes)) => {
                for child in nodes {
                    child.shift(delta);
                }
            }
            Some(TocChildren::Grouped(blocks)) => {
                for block in blocks {
                    block.start += delta;
                    block.end += delta;
                }
            }
        }
    }

    /// Serialises the tree with the compact wire keys.
    pub fn encode(&self, codec: &dyn Codec) -> Result<Vec<u8>> {
        encode_to_vec(codec, &self.to_wire())
    }

    /// Deserialises a tree, rejecting trailing bytes.
    pub fn decode(codec: &dyn Codec, bytes: &[u8]) -> Result<Self> {
        let wire = codec.decode(bytes).map_err(|e| match e {
            LazyError::Decode { reason } => LazyError::Format {
                reason: format!("undecodable TOC: {reason}").into(),
            },
            other => other,
        })?;
        Self::from_wire(&wire)
    }

    fn to_wire(&self) -> Value {
        let pos = Value::Seq(vec![offset_value(self.start), offset_value(self.end)]);
        let mut pairs = vec![(TOC_KEY_POS.to_string(), pos)];
        if let Some(children) = &self.children {
            let table = match children {
                TocChildren::Keyed(entries) => Value::Map(
                    entries
                        .iter()
                        .map(|(key, node)| (key.clone(), node.to_wire()))
                        .collect(),
                ),
                TocChildren::Positional(nodes) => {
                    Value::Seq(nodes.iter().map(TocNode::to_wire).collect())
                }
                TocChildren::Grouped(blocks) => Value::Seq(
                    blocks
                        .iter()
                        .map(|b| {
                            Value::Seq(vec![
                                offset_value(b.count),
                                offset_value(b.start),
                                offset_value(b.end),
                            ])
                        })
                        .collect(),
                ),
            };
            pairs.push((TOC_KEY_TABLE.to_string(), table));
        }
        Value::Map(pairs)
    }

    /// Parses a node from its wire form. Unknown keys are ignored so readers
    /// stay compatible with packers that stash extra metadata.
    pub fn from_wire(wire: &Value) -> Result<Self> {
        let pairs = wire
            .as_map()
            .ok_or_else(|| LazyError::format("TOC node is not a map"))?;
        let pos = wire
            .get(TOC_KEY_POS)
            .ok_or_else(|| LazyError::format("TOC node is missing its position"))?;
        let (start, end) = parse_pos(pos)?;
        let children = match pairs.iter().find(|(k, _)| k == TOC_KEY_TABLE) {
            None => None,
            Some((_, table)) => Some(parse_table(table)?),
        };
        Ok(Self {
            start,
            end,
            children,
        })
    }

    /// Enforces the structural invariants over a full tree whose root must
    /// cover `[0, payload_len)`.
    pub fn validate(&self, payload_len: u64) -> Result<()> {
        if self.start != 0 || self.end != payload_len {
            return Err(LazyError::format(
                "TOC root does not cover the payload region",
            ));
        }
        self.validate_node()
    }

    fn validate_node(&self) -> Result<()> {
        if self.end < self.start {
            return Err(LazyError::format("TOC position is inverted"));
        }
        match &self.children {
            None => Ok(()),
            Some(TocChildren::Keyed(entries)) => {
                let mut cursor = self.start;
                for (idx, (key, child)) in entries.iter().enumerate() {
                    if entries[..idx].iter().any(|(other, _)| other == key) {
                        return Err(LazyError::format(format!("duplicate TOC key '{key}'")));
                    }
                    self.check_child_range(child.start, child.end, cursor)?;
                    cursor = child.end;
                    child.validate_node()?;
                }
                Ok(())
            }
            Some(TocChildren::Positional(nodes)) => {
                let mut cursor = self.start;
                for child in nodes {
                    self.check_child_range(child.start, child.end, cursor)?;
                    cursor = child.end;
                    child.validate_node()?;
                }
                Ok(())
            }
            Some(TocChildren::Grouped(blocks)) => {
                if blocks.is_empty() {
                    return Err(LazyError::format("grouped TOC has no blocks"));
                }
                let mut cursor = None;
                for block in blocks {
                    if block.count == 0 {
                        return Err(LazyError::format("grouped TOC block is empty"));
                    }
                    if block.end <= block.start {
                        return Err(LazyError::format("grouped TOC block is inverted"));
                    }
                    match cursor {
                        // First block sits just past the container header.
                        None => {
                            if block.start <= self.start || block.end > self.end {
                                return Err(LazyError::format(
                                    "grouped TOC block escapes its parent",
                                ));
                            }
                        }
                        Some(prev_end) => {
                            if block.start != prev_end || block.end > self.end {
                                return Err(LazyError::format(
                                    "grouped TOC blocks are not contiguous",
                                ));
                            }
                        }
                    }
                    cursor = Some(block.end);
                }
                if cursor != Some(self.end) {
                    return Err(LazyError::format(
                        "grouped TOC blocks do not cover their parent",
                    ));
                }
                Ok(())
            }
        }
    }

    fn check_child_range(&self, start: u64, end: u64, cursor: u64) -> Result<()> {
        if start < cursor || end > self.end || end < start {
            return Err(LazyError::format("TOC child escapes its parent range"));
        }
        Ok(())
    }
}

fn offset_value(v: u64) -> Value {
    i64::try_from(v).map(Value::Int).unwrap_or(Value::UInt(v))
}

fn parse_pos(pos: &Value) -> Result<(u64, u64)> {
    let items = pos
        .as_seq()
        .ok_or_else(|| LazyError::format("TOC position is not a pair"))?;
    if items.len() != 2 {
        return Err(LazyError::format("TOC position is not a pair"));
    }
    Ok((parse_offset(&items[0])?, parse_offset(&items[1])?))
}

fn parse_offset(value: &Value) -> Result<u64> {
    match value {
        Value::Int(v) if *v >= 0 => Ok(*v as u64),
        Value::UInt(v) => Ok(*v),
        _ => Err(LazyError::format("TOC offset is not a non-negative integer")),
    }
}

fn parse_table(table: &Value) -> Result<TocChildren> {
    match table {
        Value::Map(pairs) => {
            let mut entries = Vec::with_capacity(pairs.len());
            for (key, node) in pairs {
                entries.push((key.clone(), TocNode::from_wire(node)?));
            }
            Ok(TocChildren::Keyed(entries))
        }
        Value::Seq(items) => {
            // Positional children are node maps; grouped blocks are triples.
            match items.first() {
                None => Ok(TocChildren::Positional(Vec::new())),
                Some(Value::Map(_)) => {
                    let mut nodes = Vec::with_capacity(items.len());
                    for item in items {
                        nodes.push(TocNode::from_wire(item)?);
                    }
                    Ok(TocChildren::Positional(nodes))
                }
                Some(Value::Seq(_)) => {
                    let mut blocks = Vec::with_capacity(items.len());
                    for item in items {
                        blocks.push(parse_block(item)?);
                    }
                    Ok(TocChildren::Grouped(blocks))
                }
                Some(other) => Err(LazyError::format(format!(
                    "TOC table entry has unexpected type {}",
                    other.type_name()
                ))),
            }
        }
        other => Err(LazyError::format(format!(
            "TOC table has unexpected type {}",
            other.type_name()
        ))),
    }
}

fn parse_block(value: &Value) -> Result<GroupBlock> {
    let items = value
        .as_seq()
        .ok_or_else(|| LazyError::format("grouped TOC block is not a triple"))?;
    if items.len() != 3 {
        return Err(LazyError::format("grouped TOC block is not a triple"));
    }
    Ok(GroupBlock {
        count: parse_offset(&items[0])?,
        start: parse_offset(&items[1])?,
        end: parse_offset(&items[2])?,
    })
}
