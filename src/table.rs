// Table and Vocabulary Word Builders
// Accumulate byte/word slots and render them as .BYTE/.WORD runs, at most
// ten values per line, switching directives whenever the width changes.

use std::fmt::Write;

use crate::operand::Operand;

/// Handle to a table defined on the game builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRef {
    pub(crate) pure: bool,
    pub(crate) index: usize,
}

/// Handle to a vocabulary word defined on the game builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordRef(pub(crate) usize);

#[derive(Debug, Clone)]
enum Slot {
    NumByte(u8),
    NumWord(i16),
    OpByte(Operand),
    OpWord(Operand),
}

impl Slot {
    fn is_word(&self) -> bool {
        matches!(self, Slot::NumWord(_) | Slot::OpWord(_))
    }
}

#[derive(Debug, Clone)]
pub struct TableBuilder {
    name: String,
    slots: Vec<Slot>,
    size: usize,
}

impl TableBuilder {
    pub(crate) fn new(name: String) -> TableBuilder {
        TableBuilder {
            name,
            slots: Vec::new(),
            size: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes of the data added so far.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn operand(&self) -> Operand {
        Operand::Const(self.name.clone())
    }

    pub fn add_byte(&mut self, value: u8) {
        self.slots.push(Slot::NumByte(value));
        self.size += 1;
    }

    pub fn add_byte_operand(&mut self, value: &Operand) {
        self.slots.push(Slot::OpByte(value.clone()));
        self.size += 1;
    }

    pub fn add_word(&mut self, value: i16) {
        self.slots.push(Slot::NumWord(value));
        self.size += 2;
    }

    pub fn add_word_operand(&mut self, value: &Operand) {
        self.slots.push(Slot::OpWord(value.clone()));
        self.size += 2;
    }

    /// The table contents as .BYTE/.WORD directive lines.
    pub(crate) fn render(&self) -> String {
        let mut out = String::new();
        if self.slots.is_empty() {
            return out;
        }
        let mut was_word = false;
        let mut line_count = 0;
        for (i, slot) in self.slots.iter().enumerate() {
            let is_word = slot.is_word();
            if line_count == 0 || line_count == 10 || is_word != was_word {
                if i != 0 {
                    out.push('\n');
                }
                out.push_str(if is_word { "\t.WORD " } else { "\t.BYTE " });
                line_count = 0;
            } else {
                out.push(',');
            }
            match slot {
                Slot::NumByte(b) => {
                    let _ = write!(out, "{}", b);
                }
                Slot::NumWord(w) => {
                    let _ = write!(out, "{}", w);
                }
                // table slots hold variable values, never indirect refs
                Slot::OpByte(op) | Slot::OpWord(op) => {
                    let _ = write!(out, "{}", op.strip_indirect());
                }
            }
            was_word = is_word;
            line_count += 1;
        }
        out.push('\n');
        out
    }
}

/// A vocabulary word: the dictionary text plus its per-entry data table.
///
/// A removed word stays in its arena slot as a tombstone so that handles to
/// later words keep indexing the right entry; the dictionary writer skips it.
#[derive(Debug, Clone)]
pub struct WordBuilder {
    pub(crate) word: String,
    removed: bool,
    data: TableBuilder,
}

impl WordBuilder {
    pub(crate) fn new(table_name: String, word: String) -> WordBuilder {
        WordBuilder {
            data: TableBuilder::new(table_name),
            removed: false,
            word,
        }
    }

    pub fn word(&self) -> &str {
        &self.word
    }

    pub(crate) fn mark_removed(&mut self) {
        self.removed = true;
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed
    }
}

impl std::ops::Deref for WordBuilder {
    type Target = TableBuilder;

    fn deref(&self) -> &TableBuilder {
        &self.data
    }
}

impl std::ops::DerefMut for WordBuilder {
    fn deref_mut(&mut self) -> &mut TableBuilder {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn runs_wrap_at_ten_values() {
        let mut t = TableBuilder::new("T?0".to_string());
        for i in 0..12 {
            t.add_byte(i);
        }
        assert_eq!(
            t.render(),
            "\t.BYTE 0,1,2,3,4,5,6,7,8,9\n\t.BYTE 10,11\n"
        );
        assert_eq!(t.size(), 12);
    }

    #[test]
    fn directive_switches_with_width() {
        let mut t = TableBuilder::new("T?1".to_string());
        t.add_byte(1);
        t.add_word(300);
        t.add_word(-2);
        t.add_byte(9);
        assert_eq!(t.render(), "\t.BYTE 1\n\t.WORD 300,-2\n\t.BYTE 9\n");
        assert_eq!(t.size(), 6);
    }

    #[test]
    fn operand_slots_drop_indirection() {
        use crate::operand::Variable;
        let mut t = TableBuilder::new("T?2".to_string());
        t.add_word_operand(&Operand::Indirect(Variable::Global("G-SCORE".to_string())));
        assert_eq!(t.render(), "\t.WORD G-SCORE\n");
    }
}
