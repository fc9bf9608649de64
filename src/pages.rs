//! Page selection parsing
//!
//! Parses page range expressions such as `1-3,4,6-7` into the set of
//! 1-based page numbers a conversion should touch.

use std::ops::RangeInclusive;
use crate::error::{Error, Result};

/// A set of 1-based page numbers, kept as sorted, non-overlapping ranges
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageSelection {
    ranges: Vec<RangeInclusive<u32>>,
}

impl PageSelection {
    /// Parse a page range expression
    ///
    /// Supported formats:
    /// - `""` (empty) → empty selection, meaning "all pages"
    /// - `"4"` → page 4
    /// - `"1-3"` → pages 1, 2 and 3
    /// - `"1-3, 4, 6-7"` → pages 1, 2, 3, 4, 6 and 7 (spaces are ignored)
    pub fn parse(expr: &str) -> Result<Self> {
        let expr: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
        let mut ranges = Vec::new();

        for item in expr.split(',') {
            if item.is_empty() {
                continue;
            }

            let bounds: Vec<&str> = item.split('-').collect();
            match bounds.as_slice() {
                [single] => {
                    let page = parse_page_number(single)?;
                    ranges.push(page..=page);
                }
                [start, end] => {
                    let start = parse_page_number(start)?;
                    let end = parse_page_number(end)?;
                    if start > end {
                        return Err(Error::InvalidPageRange(format!(
                            "range end must not be less than its start: {}",
                            item
                        )));
                    }
                    ranges.push(start..=end);
                }
                _ => {
                    return Err(Error::InvalidPageRange(format!("malformed range: {}", item)));
                }
            }
        }

        Ok(Self {
            ranges: merge(ranges),
        })
    }

    /// True when no page was named (the caller treats this as "all pages")
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Whether `page` (1-based) is selected; an empty selection selects everything
    pub fn contains(&self, page: u32) -> bool {
        self.ranges.is_empty() || self.ranges.iter().any(|range| range.contains(&page))
    }

    /// Largest selected page number
    pub fn last(&self) -> Option<u32> {
        self.ranges.last().map(|range| *range.end())
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ranges.iter().flat_map(|range| range.clone())
    }
}

/// Sort and join overlapping or adjacent ranges
fn merge(mut ranges: Vec<RangeInclusive<u32>>) -> Vec<RangeInclusive<u32>> {
    ranges.sort_by_key(|range| *range.start());
    let mut merged: Vec<RangeInclusive<u32>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if *range.start() <= last.end().saturating_add(1) => {
                if range.end() > last.end() {
                    *last = *last.start()..=*range.end();
                }
            }
            _ => merged.push(range),
        }
    }
    merged
}

fn parse_page_number(s: &str) -> Result<u32> {
    let page: u32 = s
        .parse()
        .map_err(|_| Error::InvalidPageRange(format!("invalid page number: {:?}", s)))?;
    if page < 1 {
        return Err(Error::InvalidPageRange("page numbers start at 1".to_string()));
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        let selection = PageSelection::parse("").unwrap();
        assert!(selection.is_empty());
        assert!(selection.contains(1));
        assert!(selection.contains(250));

        let selection = PageSelection::parse(" , ").unwrap();
        assert!(selection.is_empty());
    }

    #[test]
    fn test_parse_single_pages() {
        let selection = PageSelection::parse("4,2").unwrap();
        assert_eq!(selection.iter().collect::<Vec<_>>(), vec![2, 4]);
        assert!(!selection.contains(3));
    }

    #[test]
    fn test_parse_ranges_with_spaces() {
        let selection = PageSelection::parse("1-3, 4, 6 - 7").unwrap();
        assert_eq!(selection.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4, 6, 7]);
        assert!(!selection.contains(5));
        assert_eq!(selection.last(), Some(7));
    }

    #[test]
    fn test_parse_overlapping_ranges() {
        let selection = PageSelection::parse("1-3,2-4").unwrap();
        assert_eq!(selection.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_huge_range_is_not_expanded() {
        let selection = PageSelection::parse("1-4000000000").unwrap();
        assert_eq!(selection.last(), Some(4_000_000_000));
        assert!(selection.contains(123_456_789));
        assert!(!selection.contains(4_000_000_001));
        assert_eq!(selection.ranges.len(), 1);
    }

    #[test]
    fn test_adjacent_ranges_merge() {
        let selection = PageSelection::parse("5-6,1-2,3").unwrap();
        assert_eq!(selection.ranges, vec![1..=3, 5..=6]);
        assert!(!selection.contains(4));
    }

    #[test]
    fn test_parse_rejects_zero() {
        assert!(matches!(
            PageSelection::parse("0"),
            Err(Error::InvalidPageRange(_))
        ));
        assert!(matches!(
            PageSelection::parse("0-2"),
            Err(Error::InvalidPageRange(_))
        ));
    }

    #[test]
    fn test_parse_rejects_reversed_range() {
        assert!(PageSelection::parse("5-2").is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(PageSelection::parse("1-2-3").is_err());
        assert!(PageSelection::parse("abc").is_err());
        assert!(PageSelection::parse("-3").is_err());
    }
}
