//! Directory listing order

use crate::node::{FsNode, Node};
use std::cmp::Ordering;
use std::time::SystemTime;

/// Sort key for directory listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Name,
    Size,
    Modified,
    Type,
}

impl SortBy {
    /// Parse a sort property such as `"name"` or `"-size"`
    ///
    /// A leading `-` means reverse order.
    pub fn parse_property(property: &str) -> Option<(SortBy, bool)> {
        let (reverse, name) = match property.strip_prefix('-') {
            Some(name) => (true, name),
            None => (false, property),
        };

        let sort = match name {
            "name" | "text" => SortBy::Name,
            "size" => SortBy::Size,
            "modified" | "mtime" => SortBy::Modified,
            "type" | "mimetype" => SortBy::Type,
            _ => return None,
        };

        Some((sort, reverse))
    }

    /// Property string, inverse of [`SortBy::parse_property`]
    pub fn property(self, reverse: bool) -> String {
        let name = match self {
            SortBy::Name => "name",
            SortBy::Size => "size",
            SortBy::Modified => "modified",
            SortBy::Type => "type",
        };
        if reverse {
            format!("-{}", name)
        } else {
            name.to_string()
        }
    }

    /// Sort nodes, directories first (last when reversed)
    pub fn sort(self, nodes: &mut [&Node], reverse: bool) {
        nodes.sort_by(|a, b| {
            let cmp = b
                .is_directory()
                .cmp(&a.is_directory())
                .then_with(|| self.compare(a, b))
                .then_with(|| natural_sort_key(&a.name()).cmp(&natural_sort_key(&b.name())));

            if reverse {
                cmp.reverse()
            } else {
                cmp
            }
        });
    }

    fn compare(self, a: &Node, b: &Node) -> Ordering {
        match self {
            SortBy::Name => Ordering::Equal,
            SortBy::Size => byte_size(a).cmp(&byte_size(b)),
            SortBy::Modified => mtime(a).cmp(&mtime(b)),
            SortBy::Type => a.media_type().cmp(b.media_type()),
        }
    }
}

fn byte_size(node: &Node) -> u64 {
    if node.is_directory() {
        return 0;
    }
    node.stats().map(|m| m.len()).unwrap_or(0)
}

fn mtime(node: &Node) -> Option<SystemTime> {
    node.stats().ok().and_then(|m| m.modified().ok())
}

/// Generate a natural sort key (handles numbers correctly)
/// "image2.jpg" < "image10.jpg"
pub(crate) fn natural_sort_key(s: &str) -> Vec<NaturalSortPart> {
    let mut parts = Vec::new();
    let mut current_num = String::new();
    let mut current_str = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            if !current_str.is_empty() {
                parts.push(NaturalSortPart::Str(current_str.to_lowercase()));
                current_str.clear();
            }
            current_num.push(c);
        } else {
            if !current_num.is_empty() {
                parts.push(NaturalSortPart::num(&current_num));
                current_num.clear();
            }
            current_str.push(c);
        }
    }

    if !current_num.is_empty() {
        parts.push(NaturalSortPart::num(&current_num));
    }
    if !current_str.is_empty() {
        parts.push(NaturalSortPart::Str(current_str.to_lowercase()));
    }

    parts
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum NaturalSortPart {
    Num(u64),
    Str(String),
}

impl NaturalSortPart {
    fn num(digits: &str) -> Self {
        // Overflowing runs still sort, as text
        digits
            .parse::<u64>()
            .map(NaturalSortPart::Num)
            .unwrap_or_else(|_| NaturalSortPart::Str(digits.to_string()))
    }
}
