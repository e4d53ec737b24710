//! The host-editor capability surface (§6) and a small in-memory reference
//! implementation used by tests and the CLI binary.
use crate::presence::Decoration;

/// One contiguous UTF-16 range replacement within a single local change
/// event, as the host editor reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct EditRange {
    pub utf16_offset: u64,
    pub utf16_length: u64,
    pub text: String,
}

/// A batch of edits the host editor made in one change event. Ranges are
/// expressed against the editor's content *before* the change, and must be
/// processed in descending `utf16_offset` order so each range's offsets
/// stay valid against that pre-change snapshot (§4.C).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangeEvent {
    pub ranges: Vec<EditRange>,
}

/// The capability set a host text widget must provide: reading/writing the
/// full value, applying an edit expressed in UTF-16 ranges while
/// preserving caret intent, and rendering decorations. This crate does not
/// depend on any concrete GUI toolkit — `PlainTextEditor` below is the
/// reference host used by the test suite and `padsync-cli`.
pub trait Editor {
    fn get_value(&self) -> String;
    fn set_value(&mut self, value: &str);

    /// Applies a set of UTF-16 range replacements to the editor's content,
    /// in one atomic update, preserving caret intent where possible.
    fn push_edit(&mut self, ranges: &[EditRange]);

    /// Converts a UTF-16 offset into whatever the host calls a "position"
    /// (e.g. line/column). For hosts with no richer position concept this
    /// can be the identity function.
    fn get_offset_at(&self, position: u64) -> u64;
    fn get_position_at(&self, offset: u64) -> u64;

    /// Replaces the current decoration set, returning the new decoration
    /// ids (mirroring Monaco's `delta_decorations` primitive).
    fn delta_decorations(&mut self, old_ids: &[u64], decorations: &[Decoration]) -> Vec<u64>;
}

/// An in-memory plain-text editor, used as the reference host for tests and
/// the CLI demo. EOL is forced to `\n` at construction, per §6.
#[derive(Debug, Default)]
pub struct PlainTextEditor {
    content: String,
    next_decoration_id: u64,
    decorations: Vec<(u64, Decoration)>,
}

impl PlainTextEditor {
    pub fn new(initial: &str) -> Self {
        Self {
            content: initial.replace("\r\n", "\n"),
            next_decoration_id: 0,
            decorations: Vec::new(),
        }
    }

    pub fn current_decorations(&self) -> &[(u64, Decoration)] {
        &self.decorations
    }
}

impl Editor for PlainTextEditor {
    fn get_value(&self) -> String {
        self.content.clone()
    }

    fn set_value(&mut self, value: &str) {
        self.content = value.replace("\r\n", "\n");
    }

    fn push_edit(&mut self, ranges: &[EditRange]) {
        // Apply in descending offset order, same requirement as on_local_change.
        let mut sorted = ranges.to_vec();
        sorted.sort_by(|a, b| b.utf16_offset.cmp(&a.utf16_offset));
        let mut units: Vec<u16> = self.content.encode_utf16().collect();
        for range in sorted {
            let start = range.utf16_offset as usize;
            let end = start + range.utf16_length as usize;
            let replacement: Vec<u16> = range.text.encode_utf16().collect();
            units.splice(start..end, replacement);
        }
        self.content = String::from_utf16_lossy(&units);
    }

    fn get_offset_at(&self, position: u64) -> u64 {
        // This reference editor has no line/column concept; position and
        // UTF-16 offset coincide.
        position
    }

    fn get_position_at(&self, offset: u64) -> u64 {
        offset
    }

    fn delta_decorations(&mut self, old_ids: &[u64], decorations: &[Decoration]) -> Vec<u64> {
        self.decorations
            .retain(|(id, _)| !old_ids.contains(id));
        let mut new_ids = Vec::with_capacity(decorations.len());
        for decoration in decorations {
            let id = self.next_decoration_id;
            self.next_decoration_id += 1;
            self.decorations.push((id, decoration.clone()));
            new_ids.push(id);
        }
        new_ids
    }
}
