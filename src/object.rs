// Object, Property, and Flag Builders
// Objects collect flags and property values; numbering and the .OBJECT
// records themselves are handled by the game builder at finish time.

use std::fmt::Write;

use crate::operand::Operand;
use crate::table::TableBuilder;

/// Handle to an object defined on the game builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef(pub(crate) usize);

/// Handle to a property definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropRef(pub(crate) usize);

/// Handle to a flag (attribute) definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagRef(pub(crate) usize);

/// A named property with a version-dependent number, assigned downward from
/// the version's maximum as properties are defined.
#[derive(Debug, Clone)]
pub struct PropertyBuilder {
    pub(crate) name: String,
    pub(crate) number: u16,
    pub(crate) default: Option<Operand>,
}

impl PropertyBuilder {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    pub fn default_value(&self) -> Option<&Operand> {
        self.default.as_ref()
    }

    pub fn set_default_value(&mut self, value: Operand) {
        self.default = Some(value);
    }

    pub fn operand(&self) -> Operand {
        Operand::Const(self.name.clone())
    }
}

/// A named flag with a version-dependent number, assigned downward like
/// properties.
#[derive(Debug, Clone)]
pub struct FlagBuilder {
    pub(crate) name: String,
    pub(crate) number: u16,
}

impl FlagBuilder {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    pub fn operand(&self) -> Operand {
        Operand::Const(self.name.clone())
    }
}

#[derive(Debug, Clone)]
pub(crate) enum PropertyValue {
    Byte(Operand),
    Word(Operand),
    Table(TableBuilder),
}

#[derive(Debug, Clone)]
pub(crate) struct PropertyEntry {
    pub(crate) prop: PropRef,
    pub(crate) value: PropertyValue,
}

#[derive(Debug, Clone)]
pub struct ObjectBuilder {
    pub(crate) name: String,
    pub(crate) descriptive_name: String,
    pub(crate) parent: Option<ObjectRef>,
    pub(crate) sibling: Option<ObjectRef>,
    pub(crate) child: Option<ObjectRef>,
    pub(crate) flags: Vec<FlagRef>,
    pub(crate) props: Vec<PropertyEntry>,
}

impl ObjectBuilder {
    pub(crate) fn new(name: String) -> ObjectBuilder {
        ObjectBuilder {
            name,
            descriptive_name: String::new(),
            parent: None,
            sibling: None,
            child: None,
            flags: Vec::new(),
            props: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operand(&self) -> Operand {
        Operand::Const(self.name.clone())
    }

    pub fn set_descriptive_name(&mut self, name: &str) {
        self.descriptive_name = name.to_string();
    }

    pub fn set_parent(&mut self, parent: Option<ObjectRef>) {
        self.parent = parent;
    }

    pub fn set_sibling(&mut self, sibling: Option<ObjectRef>) {
        self.sibling = sibling;
    }

    pub fn set_child(&mut self, child: Option<ObjectRef>) {
        self.child = child;
    }

    pub fn add_flag(&mut self, flag: FlagRef) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }

    pub fn add_byte_property(&mut self, prop: PropRef, value: Operand) {
        self.props.push(PropertyEntry {
            prop,
            value: PropertyValue::Byte(value),
        });
    }

    pub fn add_word_property(&mut self, prop: PropRef, value: Operand) {
        self.props.push(PropertyEntry {
            prop,
            value: PropertyValue::Word(value),
        });
    }

    /// One 16-flag word of the object record, as FX?NAME symbols joined
    /// with +, or "0" when no flag falls in the range.
    pub(crate) fn flags_word(&self, start: u16, flag_defs: &[FlagBuilder]) -> String {
        let mut out = String::new();
        for flag in &self.flags {
            let def = &flag_defs[flag.0];
            if def.number >= start && def.number < start + 16 {
                if !out.is_empty() {
                    out.push('+');
                }
                out.push_str("FX?");
                out.push_str(&def.name);
            }
        }
        if out.is_empty() {
            out.push('0');
        }
        out
    }

    /// The object's property table: .STRL description, then .PROP entries
    /// in descending property-number order, then a zero terminator.
    pub(crate) fn render_properties(&self, prop_defs: &[PropertyBuilder]) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "\t.STRL \"{}\"",
            self.descriptive_name.replace('"', "\"\"")
        );

        let mut props = self.props.clone();
        props.sort_by(|a, b| prop_defs[b.prop.0].number.cmp(&prop_defs[a.prop.0].number));

        for entry in &props {
            let def = &prop_defs[entry.prop.0];
            match &entry.value {
                PropertyValue::Byte(value) => {
                    let _ = writeln!(out, "\t.PROP 1,{}", def.name);
                    let _ = writeln!(out, "\t.BYTE {}", value);
                }
                PropertyValue::Word(value) => {
                    let _ = writeln!(out, "\t.PROP 2,{}", def.name);
                    let _ = writeln!(out, "\t.WORD {}", value);
                }
                PropertyValue::Table(table) => {
                    let _ = writeln!(out, "\t.PROP {},{}", table.size(), def.name);
                    out.push_str(&table.render());
                }
            }
        }

        out.push_str("\t.BYTE 0\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn flag(name: &str, number: u16) -> FlagBuilder {
        FlagBuilder {
            name: name.to_string(),
            number,
        }
    }

    fn prop(name: &str, number: u16) -> PropertyBuilder {
        PropertyBuilder {
            name: name.to_string(),
            number,
            default: None,
        }
    }

    #[test]
    fn flag_words_split_by_number_range() {
        let defs = vec![flag("TAKEBIT", 3), flag("LIGHTBIT", 17), flag("SACREDBIT", 40)];
        let mut obj = ObjectBuilder::new("LANTERN".to_string());
        obj.add_flag(FlagRef(0));
        obj.add_flag(FlagRef(1));
        obj.add_flag(FlagRef(2));
        assert_eq!(obj.flags_word(0, &defs), "FX?TAKEBIT");
        assert_eq!(obj.flags_word(16, &defs), "FX?LIGHTBIT");
        assert_eq!(obj.flags_word(32, &defs), "FX?SACREDBIT");
        let empty = ObjectBuilder::new("SAND".to_string());
        assert_eq!(empty.flags_word(0, &defs), "0");
    }

    #[test]
    fn properties_render_in_descending_number_order() {
        let defs = vec![prop("P?SIZE", 5), prop("P?CAPACITY", 9)];
        let mut obj = ObjectBuilder::new("SACK".to_string());
        obj.set_descriptive_name("brown sack");
        obj.add_byte_property(PropRef(0), Operand::Num(15));
        obj.add_word_property(PropRef(1), Operand::Num(300));
        assert_eq!(
            obj.render_properties(&defs),
            "\t.STRL \"brown sack\"\n\
             \t.PROP 2,P?CAPACITY\n\
             \t.WORD 300\n\
             \t.PROP 1,P?SIZE\n\
             \t.BYTE 15\n\
             \t.BYTE 0\n"
        );
    }
}
