//! Offset mapping between rendered host code and the template buffer.
//!
//! The renderer copies code spans verbatim into the generated text, so each
//! copied chunk is a plain translation: no escapes, no compression. Anything
//! outside a chunk (class scaffolding, write calls) has no source position.

use std::ops::Range;

/// One verbatim chunk of template code inside the generated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetMapper {
    /// Byte offset of the chunk in the template buffer.
    pub source_offset: usize,
    /// Byte offset of the chunk in the generated text.
    pub generated_offset: usize,
    pub length: usize,
}

impl OffsetMapper {
    pub fn new(source_offset: usize, generated_offset: usize, length: usize) -> Self {
        Self {
            source_offset,
            generated_offset,
            length,
        }
    }

    /// End inclusive so a position right after the chunk still maps.
    pub fn contains_generated(&self, offset: usize) -> bool {
        offset >= self.generated_offset && offset <= self.generated_offset + self.length
    }

    pub fn to_source(&self, generated: usize) -> Option<usize> {
        self.contains_generated(generated)
            .then(|| self.source_offset + (generated - self.generated_offset))
    }

    pub fn to_generated(&self, source: usize) -> Option<usize> {
        (source >= self.source_offset && source <= self.source_offset + self.length)
            .then(|| self.generated_offset + (source - self.source_offset))
    }
}

/// All chunks of one rendered unit, ordered by generated offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    mappings: Vec<OffsetMapper>,
}

impl SourceMap {
    pub fn new(mut mappings: Vec<OffsetMapper>) -> Self {
        mappings.sort_by_key(|m| m.generated_offset);
        Self { mappings }
    }

    pub fn push(&mut self, mapper: OffsetMapper) {
        let at = self
            .mappings
            .partition_point(|m| m.generated_offset <= mapper.generated_offset);
        self.mappings.insert(at, mapper);
    }

    pub fn mappings(&self) -> &[OffsetMapper] {
        &self.mappings
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Template offset for a generated offset, if it lies in a chunk.
    pub fn to_source(&self, generated: usize) -> Option<usize> {
        let after = self
            .mappings
            .partition_point(|m| m.generated_offset <= generated);
        self.mappings[..after]
            .iter()
            .rev()
            .find_map(|m| m.to_source(generated))
    }

    /// Template span for a generated span. Both ends must land in the same
    /// chunk; a span straddling scaffolding does not map.
    pub fn span_to_source(&self, span: &Range<usize>) -> Option<Range<usize>> {
        let after = self
            .mappings
            .partition_point(|m| m.generated_offset <= span.start);
        let chunk = self.mappings[..after]
            .iter()
            .rev()
            .find(|m| m.contains_generated(span.start))?;
        let end = chunk.to_source(span.end)?;
        Some(chunk.to_source(span.start)?..end)
    }

    /// Generated offset for a template offset.
    pub fn to_generated(&self, source: usize) -> Option<usize> {
        self.mappings.iter().find_map(|m| m.to_generated(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk() {
        let mapper = OffsetMapper::new(10, 100, 5);
        assert_eq!(mapper.to_source(100), Some(10));
        assert_eq!(mapper.to_source(105), Some(15));
        assert_eq!(mapper.to_source(106), None);
        assert_eq!(mapper.to_source(99), None);
        assert_eq!(mapper.to_generated(12), Some(102));
    }

    #[test]
    fn picks_the_containing_chunk() {
        let map = SourceMap::new(vec![
            OffsetMapper::new(40, 300, 8),
            OffsetMapper::new(2, 120, 12),
        ]);
        assert_eq!(map.mappings()[0].generated_offset, 120);
        assert_eq!(map.to_source(125), Some(7));
        assert_eq!(map.to_source(304), Some(44));
        assert_eq!(map.to_source(200), None);
        assert_eq!(map.to_generated(45), Some(305));
    }

    #[test]
    fn spans_must_stay_in_one_chunk() {
        let mut map = SourceMap::default();
        map.push(OffsetMapper::new(0, 50, 10));
        map.push(OffsetMapper::new(30, 80, 10));
        assert_eq!(map.span_to_source(&(52..55)), Some(2..5));
        assert_eq!(map.span_to_source(&(55..85)), None);
    }

    #[test]
    fn empty_map() {
        let map = SourceMap::default();
        assert!(map.is_empty());
        assert_eq!(map.to_source(0), None);
    }
}
