// Debug Information Recorder
// Assigns small integer ids to source files and accumulates .DEBUG-* records
// that are written at the end of the data file.

use indexmap::IndexMap;

use crate::operand::Operand;

/// A source position: file, 1-based line, 1-based column.
///
/// The file is carried by name until the game is finished, when names are
/// resolved to their assigned file numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugLineRef {
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl DebugLineRef {
    pub fn new(file: &str, line: u32, column: u32) -> DebugLineRef {
        DebugLineRef {
            file: Some(file.to_string()),
            line,
            column,
        }
    }
}

#[derive(Debug, Default)]
pub struct DebugFileBuilder {
    // file name -> assigned number, starting at 1
    files: IndexMap<String, u32>,
    stored_lines: Vec<String>,
}

impl DebugFileBuilder {
    pub fn new() -> DebugFileBuilder {
        DebugFileBuilder::default()
    }

    /// The number for a file, assigning the next one on first sight.
    /// An unknown file maps to 0.
    pub fn file_number(&mut self, file: Option<&str>) -> u32 {
        match file {
            None => 0,
            Some(name) => {
                let next = self.files.len() as u32 + 1;
                *self.files.entry(name.to_string()).or_insert(next)
            }
        }
    }

    pub fn files(&self) -> &IndexMap<String, u32> {
        &self.files
    }

    pub fn stored_lines(&self) -> &[String] {
        &self.stored_lines
    }

    /// Format a source position using assigned file numbers.
    pub fn format_line_ref(&mut self, line_ref: &DebugLineRef) -> String {
        let file = self.file_number(line_ref.file.as_deref());
        format!("{},{},{}", file, line_ref.line, line_ref.column)
    }

    pub fn mark_action(&mut self, action: &Operand, name: &str) {
        self.stored_lines
            .push(format!(".DEBUG-ACTION {},\"{}\"", action, name));
    }

    pub fn mark_object(&mut self, object_name: &str, start: &DebugLineRef, end: &DebugLineRef) {
        let start_text = self.format_line_ref(start);
        let end_text = self.format_line_ref(end);
        self.stored_lines.push(format!(
            ".DEBUG-OBJECT {},{},{}",
            object_name, start_text, end_text
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn file_numbers_assigned_in_first_use_order() {
        let mut debug = DebugFileBuilder::new();
        assert_eq!(debug.file_number(Some("b.zil")), 1);
        assert_eq!(debug.file_number(Some("a.zil")), 2);
        assert_eq!(debug.file_number(Some("b.zil")), 1);
        assert_eq!(debug.file_number(None), 0);
    }

    #[test]
    fn line_refs_format_with_file_numbers() {
        let mut debug = DebugFileBuilder::new();
        let here = DebugLineRef::new("main.zil", 12, 3);
        assert_eq!(debug.format_line_ref(&here), "1,12,3");
    }
}
