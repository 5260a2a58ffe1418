//! Clip trimming with undo/redo. The active clip is a half-open frame
//! range over the captured sequence; every edit is a reversible command
//! on an explicit stack.

use tracing::debug;

/// Half-open frame range `[begin, end)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClipRange {
    pub begin: usize,
    pub end: usize,
}

impl ClipRange {
    pub fn new(begin: usize, end: usize) -> Self {
        Self { begin, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.begin
    }

    pub fn contains(&self, frame: usize) -> bool {
        frame >= self.begin && frame < self.end
    }

    /// Frame indices of the clip at the given stride.
    pub fn frames(&self, step: usize) -> impl Iterator<Item = usize> {
        (self.begin..self.end).step_by(step.max(1))
    }
}

/// One reversible range edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipCommand {
    old: ClipRange,
    new: ClipRange,
}

/// Tracks the active clip over a frame sequence and the edit history.
#[derive(Debug, Default)]
pub struct ClipEditor {
    frame_count: usize,
    range: ClipRange,
    undo_stack: Vec<ClipCommand>,
    redo_stack: Vec<ClipCommand>,
}

impl ClipEditor {
    pub fn new(frame_count: usize) -> Self {
        Self {
            frame_count,
            range: ClipRange::new(0, frame_count),
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn range(&self) -> ClipRange {
        self.range
    }

    /// Grows the sequence during ingestion and keeps the clip covering
    /// everything captured so far.
    pub fn extend_to(&mut self, frame_count: usize) {
        self.frame_count = frame_count;
        self.range = ClipRange::new(0, frame_count);
    }

    /// Applies a new range as an undoable edit. Rejects empty or
    /// out-of-bounds ranges without touching the history.
    pub fn set_range(&mut self, begin: usize, end: usize) -> bool {
        if begin >= end || end > self.frame_count {
            debug!(begin, end, frame_count = self.frame_count, "rejected clip range");
            return false;
        }
        let command = ClipCommand {
            old: self.range,
            new: ClipRange::new(begin, end),
        };
        self.range = command.new;
        self.undo_stack.push(command);
        self.redo_stack.clear();
        true
    }

    /// Drops everything before `position`.
    pub fn cut_left(&mut self, position: usize) -> bool {
        if self.frame_count < 2 || position >= self.range.end {
            return false;
        }
        self.set_range(position, self.range.end)
    }

    /// Drops `position` and everything after it.
    pub fn cut_right(&mut self, position: usize) -> bool {
        if self.frame_count < 2 || position <= self.range.begin {
            return false;
        }
        self.set_range(self.range.begin, position)
    }

    /// Widens the clip back to the full sequence.
    pub fn restore(&mut self) -> bool {
        self.set_range(0, self.frame_count)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo(&mut self) -> bool {
        match self.undo_stack.pop() {
            Some(command) => {
                self.range = command.old;
                self.redo_stack.push(command);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.redo_stack.pop() {
            Some(command) => {
                self.range = command.new;
                self.undo_stack.push(command);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cut_sequence_with_undo_redo() {
        let mut editor = ClipEditor::new(10);
        assert_eq!(editor.range(), ClipRange::new(0, 10));

        assert!(editor.cut_left(3));
        assert_eq!(editor.range(), ClipRange::new(3, 10));
        assert!(editor.cut_right(8));
        assert_eq!(editor.range(), ClipRange::new(3, 8));

        assert!(editor.undo());
        assert_eq!(editor.range(), ClipRange::new(3, 10));
        assert!(editor.undo());
        assert_eq!(editor.range(), ClipRange::new(0, 10));
        assert!(!editor.undo());

        assert!(editor.redo());
        assert_eq!(editor.range(), ClipRange::new(3, 10));
        assert!(editor.redo());
        assert_eq!(editor.range(), ClipRange::new(3, 8));
        assert!(!editor.redo());
    }

    #[test]
    fn range_edits_unwind_and_replay() {
        let mut editor = ClipEditor::new(100);
        assert!(editor.set_range(10, 90));
        assert!(editor.set_range(20, 80));
        assert!(editor.undo());
        assert!(editor.undo());
        assert_eq!(editor.range(), ClipRange::new(0, 100));
        assert!(editor.redo());
        assert!(editor.redo());
        assert_eq!(editor.range(), ClipRange::new(20, 80));
    }

    #[test]
    fn new_edit_clears_redo() {
        let mut editor = ClipEditor::new(10);
        assert!(editor.cut_left(4));
        assert!(editor.undo());
        assert!(editor.can_redo());
        assert!(editor.cut_right(6));
        assert!(!editor.can_redo());
        assert_eq!(editor.range(), ClipRange::new(0, 6));
    }

    #[test]
    fn invalid_ranges_are_no_ops() {
        let mut editor = ClipEditor::new(5);
        assert!(!editor.set_range(3, 3));
        assert!(!editor.set_range(4, 2));
        assert!(!editor.set_range(0, 6));
        assert_eq!(editor.range(), ClipRange::new(0, 5));
        assert!(!editor.can_undo());
    }

    #[test]
    fn cuts_respect_current_range() {
        let mut editor = ClipEditor::new(10);
        assert!(editor.cut_left(5));
        // Cutting right at or before the new begin does nothing.
        assert!(!editor.cut_right(5));
        assert!(!editor.cut_left(10));
        assert!(editor.restore());
        assert_eq!(editor.range(), ClipRange::new(0, 10));
    }

    #[test]
    fn single_frame_sequences_cannot_be_cut() {
        let mut editor = ClipEditor::new(1);
        assert!(!editor.cut_left(0));
        assert!(!editor.cut_right(1));
    }

    #[test]
    fn extend_during_ingestion() {
        let mut editor = ClipEditor::new(0);
        editor.extend_to(4);
        editor.extend_to(9);
        assert_eq!(editor.frame_count(), 9);
        assert_eq!(editor.range(), ClipRange::new(0, 9));
        let frames: Vec<usize> = editor.range().frames(3).collect();
        assert_eq!(frames, vec![0, 3, 6]);
    }
}
