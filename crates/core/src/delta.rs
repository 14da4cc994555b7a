//! Model deltas: tree-shaped descriptions of structural and state changes
//!
//! A delta mirrors a subset of the real tree. The root node stands for the
//! viewer input; every other node is addressed relative to its parent delta.
//! The same structure doubles as a saved viewer state, in which case the
//! elements below the root are replaced by provider-issued tokens.

use crate::path::TreePath;
use crate::token::Token;
use smallvec::SmallVec;
use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

/// Child positions from the delta root down to a node
///
/// Addresses stay valid for the lifetime of a delta because nodes are never
/// detached, only marked as [`DeltaElement::Removed`].
pub type DeltaAddress = SmallVec<[usize; 8]>;

/// Bitmask of change flags carried by a delta node
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeltaFlags(u32);

impl DeltaFlags {
    pub const NO_CHANGE: DeltaFlags = DeltaFlags(0);
    pub const ADDED: DeltaFlags = DeltaFlags(1);
    pub const REMOVED: DeltaFlags = DeltaFlags(1 << 1);
    pub const CONTENT: DeltaFlags = DeltaFlags(1 << 10);
    pub const EXPAND: DeltaFlags = DeltaFlags(1 << 11);
    pub const INSERTED: DeltaFlags = DeltaFlags(1 << 12);
    pub const REPLACED: DeltaFlags = DeltaFlags(1 << 13);
    pub const SELECT: DeltaFlags = DeltaFlags(1 << 21);
    pub const STATE: DeltaFlags = DeltaFlags(1 << 20);
    pub const COLLAPSE: DeltaFlags = DeltaFlags(1 << 22);
    pub const INSTALL: DeltaFlags = DeltaFlags(1 << 23);
    pub const UNINSTALL: DeltaFlags = DeltaFlags(1 << 24);
    pub const REVEAL: DeltaFlags = DeltaFlags(1 << 25);
    pub const FORCE: DeltaFlags = DeltaFlags(1 << 26);

    const NAMES: [(DeltaFlags, &'static str); 13] = [
        (Self::ADDED, "ADDED"),
        (Self::REMOVED, "REMOVED"),
        (Self::CONTENT, "CONTENT"),
        (Self::EXPAND, "EXPAND"),
        (Self::INSERTED, "INSERTED"),
        (Self::REPLACED, "REPLACED"),
        (Self::STATE, "STATE"),
        (Self::SELECT, "SELECT"),
        (Self::COLLAPSE, "COLLAPSE"),
        (Self::INSTALL, "INSTALL"),
        (Self::UNINSTALL, "UNINSTALL"),
        (Self::REVEAL, "REVEAL"),
        (Self::FORCE, "FORCE"),
    ];

    /// Raw bit representation
    pub fn bits(self) -> u32 {
        self.0
    }

    /// `self | other`, usable in constants
    pub const fn union(self, other: DeltaFlags) -> DeltaFlags {
        DeltaFlags(self.0 | other.0)
    }

    /// Whether every bit of `other` is set
    pub fn contains(self, other: DeltaFlags) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Whether any bit of `other` is set
    pub fn intersects(self, other: DeltaFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: DeltaFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: DeltaFlags) {
        self.0 &= !other.0;
    }

    /// Whether this is `NO_CHANGE`
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for DeltaFlags {
    type Output = DeltaFlags;

    fn bitor(self, rhs: DeltaFlags) -> DeltaFlags {
        DeltaFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for DeltaFlags {
    fn bitor_assign(&mut self, rhs: DeltaFlags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for DeltaFlags {
    type Output = DeltaFlags;

    fn bitand(self, rhs: DeltaFlags) -> DeltaFlags {
        DeltaFlags(self.0 & rhs.0)
    }
}

impl BitAndAssign for DeltaFlags {
    fn bitand_assign(&mut self, rhs: DeltaFlags) {
        self.0 &= rhs.0;
    }
}

impl Not for DeltaFlags {
    type Output = DeltaFlags;

    fn not(self) -> DeltaFlags {
        DeltaFlags(!self.0)
    }
}

impl fmt::Display for DeltaFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NO_CHANGE");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES.iter() {
            if self.contains(*flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DeltaFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeltaFlags({})", self)
    }
}

/// Identity carried by a delta node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaElement<E> {
    /// A live model element
    Element(E),
    /// A saved-state token awaiting comparison against a live element
    Token(Token),
    /// Node dropped from a pending delta; kept so addresses stay stable
    Removed,
}

impl<E> DeltaElement<E> {
    /// The live element, if any
    pub fn as_element(&self) -> Option<&E> {
        match self {
            DeltaElement::Element(element) => Some(element),
            _ => None,
        }
    }

    /// The token, if any
    pub fn as_token(&self) -> Option<&Token> {
        match self {
            DeltaElement::Token(token) => Some(token),
            _ => None,
        }
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, DeltaElement::Removed)
    }
}

/// One node of a delta tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDelta<E> {
    /// Element (or token) this node describes
    pub element: DeltaElement<E>,
    /// Model-space index within the parent, when known
    pub index: Option<usize>,
    /// Change flags, relative to the parent delta
    pub flags: DeltaFlags,
    /// Model-space child count, when known
    pub child_count: Option<usize>,
    /// New element for `REPLACED` nodes
    pub replacement: Option<E>,
    /// Ordered child deltas
    pub children: Vec<ModelDelta<E>>,
}

impl<E: Clone + PartialEq> ModelDelta<E> {
    /// Create a root delta for `element`
    pub fn new(element: E, flags: DeltaFlags) -> Self {
        Self::with_element(DeltaElement::Element(element), flags)
    }

    /// Create a root delta addressed by a token
    pub fn new_token(token: Token, flags: DeltaFlags) -> Self {
        Self::with_element(DeltaElement::Token(token), flags)
    }

    fn with_element(element: DeltaElement<E>, flags: DeltaFlags) -> Self {
        Self {
            element,
            index: None,
            flags,
            child_count: None,
            replacement: None,
            children: Vec::new(),
        }
    }

    /// Set the model-space index
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// Set the model-space child count
    pub fn with_child_count(mut self, count: usize) -> Self {
        self.child_count = Some(count);
        self
    }

    /// Set the replacement element
    pub fn with_replacement(mut self, replacement: E) -> Self {
        self.replacement = Some(replacement);
        self
    }

    /// Append a child node and return it for further building
    pub fn add_node(&mut self, element: E, flags: DeltaFlags) -> &mut ModelDelta<E> {
        self.push_child(ModelDelta::new(element, flags))
    }

    /// Append a child node carrying an index and child count
    pub fn add_indexed_node(
        &mut self,
        element: E,
        index: usize,
        flags: DeltaFlags,
        child_count: Option<usize>,
    ) -> &mut ModelDelta<E> {
        let mut node = ModelDelta::new(element, flags).with_index(index);
        node.child_count = child_count;
        self.push_child(node)
    }

    /// Append a token-addressed child node
    pub fn add_token_node(
        &mut self,
        token: Token,
        index: usize,
        flags: DeltaFlags,
        child_count: Option<usize>,
    ) -> &mut ModelDelta<E> {
        let mut node = ModelDelta::new_token(token, flags).with_index(index);
        node.child_count = child_count;
        self.push_child(node)
    }

    /// Append an already built child delta
    pub fn push_child(&mut self, child: ModelDelta<E>) -> &mut ModelDelta<E> {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Position of the child delta for `element`
    ///
    /// When `index` is given, a child recorded at that index is preferred so
    /// that duplicate elements under one parent resolve correctly.
    pub fn child_position(&self, element: &E, index: Option<usize>) -> Option<usize> {
        let mut fallback = None;
        for (pos, child) in self.children.iter().enumerate() {
            if child.element.as_element() == Some(element) {
                if index.is_none() || child.index == index {
                    return Some(pos);
                }
                fallback.get_or_insert(pos);
            }
        }
        fallback
    }

    /// Position of the child addressed exactly like `element` at `index`
    ///
    /// Unlike [`child_position`](Self::child_position) this matches tokens
    /// too, and the index must agree.
    pub fn find_child(&self, element: &DeltaElement<E>, index: Option<usize>) -> Option<usize> {
        self.children
            .iter()
            .position(|child| &child.element == element && child.index == index)
    }

    /// Child delta describing `element`
    pub fn child_delta(&self, element: &E, index: Option<usize>) -> Option<&ModelDelta<E>> {
        self.child_position(element, index)
            .map(|pos| &self.children[pos])
    }

    /// Mutable child delta describing `element`
    pub fn child_delta_mut(
        &mut self,
        element: &E,
        index: Option<usize>,
    ) -> Option<&mut ModelDelta<E>> {
        self.child_position(element, index)
            .map(move |pos| &mut self.children[pos])
    }

    /// Depth-first visit; the visitor returns whether to descend
    pub fn accept<F>(&self, visitor: &mut F)
    where
        F: FnMut(&ModelDelta<E>, usize) -> bool,
    {
        self.accept_at(visitor, 0);
    }

    fn accept_at<F>(&self, visitor: &mut F, depth: usize)
    where
        F: FnMut(&ModelDelta<E>, usize) -> bool,
    {
        if visitor(self, depth) {
            for child in &self.children {
                child.accept_at(visitor, depth + 1);
            }
        }
    }

    /// Depth-first visit handing out each node's address
    pub fn accept_addressed<F>(&self, visitor: &mut F)
    where
        F: FnMut(&DeltaAddress, &ModelDelta<E>) -> bool,
    {
        let mut address = DeltaAddress::new();
        self.accept_addressed_at(visitor, &mut address);
    }

    fn accept_addressed_at<F>(&self, visitor: &mut F, address: &mut DeltaAddress)
    where
        F: FnMut(&DeltaAddress, &ModelDelta<E>) -> bool,
    {
        if visitor(address, self) {
            for (pos, child) in self.children.iter().enumerate() {
                address.push(pos);
                child.accept_addressed_at(visitor, address);
                address.pop();
            }
        }
    }

    /// Depth-first mutable visit; the visitor returns whether to descend
    pub fn accept_mut<F>(&mut self, visitor: &mut F)
    where
        F: FnMut(&mut ModelDelta<E>, usize) -> bool,
    {
        self.accept_mut_at(visitor, 0);
    }

    fn accept_mut_at<F>(&mut self, visitor: &mut F, depth: usize)
    where
        F: FnMut(&mut ModelDelta<E>, usize) -> bool,
    {
        if visitor(self, depth) {
            for child in &mut self.children {
                child.accept_mut_at(visitor, depth + 1);
            }
        }
    }

    /// Node at `address`
    pub fn node_at(&self, address: &[usize]) -> Option<&ModelDelta<E>> {
        let mut node = self;
        for pos in address {
            node = node.children.get(*pos)?;
        }
        Some(node)
    }

    /// Mutable node at `address`
    pub fn node_at_mut(&mut self, address: &[usize]) -> Option<&mut ModelDelta<E>> {
        let mut node = self;
        for pos in address {
            node = node.children.get_mut(*pos)?;
        }
        Some(node)
    }

    /// Tree path of the node at `address`
    ///
    /// Returns `None` while any node on the way (root excluded) is still
    /// token-addressed or removed.
    pub fn path_of(&self, address: &[usize]) -> Option<TreePath<E>> {
        let mut node = self;
        let mut segments = Vec::with_capacity(address.len());
        for pos in address {
            node = node.children.get(*pos)?;
            segments.push(node.element.as_element()?.clone());
        }
        Some(TreePath::from_segments(segments))
    }

    /// Delta addressing `path`, matching elements by equality only
    pub fn find_path(&self, path: &TreePath<E>) -> Option<DeltaAddress> {
        let mut node = self;
        let mut address = DeltaAddress::new();
        for segment in path.iter() {
            let pos = node.child_position(segment, None)?;
            address.push(pos);
            node = &node.children[pos];
        }
        Some(address)
    }

    /// Whether this node and all of its descendants carry no flags
    pub fn is_prunable(&self) -> bool {
        self.flags.is_empty() && self.children.iter().all(|c| c.is_prunable())
    }

    /// Whether any live node of this subtree carries one of `mask`
    pub fn any_flags(&self, mask: DeltaFlags) -> bool {
        let mut found = false;
        self.accept(&mut |node, _| {
            if !node.element.is_removed() && node.flags.intersects(mask) {
                found = true;
            }
            !found
        });
        found
    }

    /// Clear `mask` on every node of this subtree
    pub fn clear_flags(&mut self, mask: DeltaFlags) {
        self.accept_mut(&mut |node, _| {
            node.flags.remove(mask);
            true
        });
    }

    /// Drop the node and its whole subtree from consideration
    pub fn mark_removed(&mut self) {
        self.element = DeltaElement::Removed;
        self.flags = DeltaFlags::NO_CHANGE;
        self.children.clear();
    }

    /// Remove child nodes that no longer carry any information
    pub fn prune(&mut self) {
        for child in &mut self.children {
            child.prune();
        }
        self.children
            .retain(|c| !c.element.is_removed() && !c.is_prunable());
    }

    fn write_node(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result
    where
        E: fmt::Debug,
    {
        let pad = "  ".repeat(indent);
        match &self.element {
            DeltaElement::Element(element) => writeln!(f, "{}Element: {:?}", pad, element)?,
            DeltaElement::Token(token) => writeln!(f, "{}Token: {}", pad, token)?,
            DeltaElement::Removed => writeln!(f, "{}<removed>", pad)?,
        }
        write!(f, "{}  Flags: {}", pad, self.flags)?;
        if let Some(index) = self.index {
            write!(f, " Index: {}", index)?;
        }
        if let Some(count) = self.child_count {
            write!(f, " Child count: {}", count)?;
        }
        writeln!(f)?;
        for child in &self.children {
            child.write_node(f, indent + 1)?;
        }
        Ok(())
    }
}

impl<E: Clone + PartialEq + fmt::Debug> fmt::Display for ModelDelta<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_node(f, 0)
    }
}
