// Game Module Emitter
// Owns the flat global namespace and every top-level declaration, enforces
// the version-dependent numbering and size limits, and serializes the whole
// module across the main/data/strings output sections in the fixed order
// the ZAP assembler expects.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use indexmap::{IndexMap, IndexSet};
use log::debug;

use crate::debug_file::{DebugFileBuilder, DebugLineRef};
use crate::error::EmitError;
use crate::object::{
    FlagBuilder, FlagRef, ObjectBuilder, ObjectRef, PropRef, PropertyBuilder, PropertyEntry,
    PropertyValue,
};
use crate::operand::{Operand, Variable};
use crate::routine::{RoutineBuilder, RoutineRef};
use crate::streams::StreamFactory;
use crate::table::{TableBuilder, TableRef, WordBuilder, WordRef};

lazy_static! {
    // ZSCII codes for the accented characters ZAPF understands by default
    static ref DEFAULT_UNICODE_MAPPING: HashMap<char, u8> = {
        let pairs: [(char, u8); 69] = [
            ('ä', 155), ('ö', 156), ('ü', 157), ('Ä', 158), ('Ö', 159),
            ('Ü', 160), ('ß', 161), ('»', 162), ('«', 163), ('ë', 164),
            ('ï', 165), ('ÿ', 166), ('Ë', 167), ('Ï', 168), ('á', 169),
            ('é', 170), ('í', 171), ('ó', 172), ('ú', 173), ('ý', 174),
            ('Á', 175), ('É', 176), ('Í', 177), ('Ó', 178), ('Ú', 179),
            ('Ý', 180), ('à', 181), ('è', 182), ('ì', 183), ('ò', 184),
            ('ù', 185), ('À', 186), ('È', 187), ('Ì', 188), ('Ò', 189),
            ('Ù', 190), ('â', 191), ('ê', 192), ('î', 193), ('ô', 194),
            ('û', 195), ('Â', 196), ('Ê', 197), ('Î', 198), ('Ô', 199),
            ('Û', 200), ('å', 201), ('Å', 202), ('ø', 203), ('Ø', 204),
            ('ã', 205), ('ñ', 206), ('õ', 207), ('Ã', 208), ('Ñ', 209),
            ('Õ', 210), ('æ', 211), ('Æ', 212), ('ç', 213), ('Ç', 214),
            ('þ', 215), ('ð', 216), ('Þ', 217), ('Ð', 218), ('£', 219),
            ('œ', 220), ('Œ', 221), ('¡', 222), ('¿', 223),
        ];
        pairs.iter().copied().collect()
    };
}

/// Escape interior quotes by doubling them, per ZAP string syntax.
pub fn sanitize_string(text: &str) -> String {
    text.replace('"', "\"\"")
}

/// Make an arbitrary source-language identifier into a legal ZAP symbol.
/// Four punctuation atoms get fixed mnemonic names; every other character
/// that is not alphanumeric, `?`, `#`, or `-` becomes a `$hhhh` escape.
pub fn sanitize_symbol(symbol: &str) -> String {
    match symbol {
        "." => return "$PERIOD".to_string(),
        "," => return "$COMMA".to_string(),
        "\"" => return "$QUOTE".to_string(),
        "'" => return "$APOSTROPHE".to_string(),
        _ => {}
    }

    let mut out = String::with_capacity(symbol.len());
    for c in symbol.chars() {
        if c.is_alphanumeric() || c == '?' || c == '#' || c == '-' {
            out.push(c);
        } else {
            out.push('$');
            out.push_str(&format!("{:04x}", c as u32));
        }
    }
    out
}

/// Version-specific capability settings, chosen at construction and reflected
/// in the header directives and FLAGS2 bits.
#[derive(Debug, Clone)]
pub enum GameOptions {
    V3 {
        time_status_line: bool,
        sound_effects: bool,
    },
    V4 {
        sound_effects: bool,
    },
    V5(V5Options),
}

/// Options shared by versions 5 through 8.
#[derive(Debug, Clone, Default)]
pub struct V5Options {
    pub sound_effects: bool,
    pub display_ops: bool,
    pub undo: bool,
    pub mouse: bool,
    pub color: bool,
    pub menus: bool,
    pub header_extension_table: Option<TableRef>,
    pub charset0: Option<String>,
    pub charset1: Option<String>,
    pub charset2: Option<String>,
    pub language_id: u16,
    pub language_escape_char: Option<char>,
}

impl GameOptions {
    fn default_for(zversion: u8) -> GameOptions {
        match zversion {
            3 => GameOptions::V3 {
                time_status_line: false,
                sound_effects: false,
            },
            4 => GameOptions::V4 {
                sound_effects: false,
            },
            _ => GameOptions::V5(V5Options::default()),
        }
    }

    fn matches_version(&self, zversion: u8) -> bool {
        match self {
            GameOptions::V3 { .. } => zversion == 3,
            GameOptions::V4 { .. } => zversion == 4,
            GameOptions::V5(_) => zversion >= 5,
        }
    }

    fn v5(&self) -> Option<&V5Options> {
        match self {
            GameOptions::V5(opts) => Some(opts),
            _ => None,
        }
    }
}

/// Handle to a global variable defined on the game builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalRef(pub(crate) usize);

#[derive(Debug, Clone)]
pub struct GlobalBuilder {
    name: String,
    default: Option<Operand>,
}

impl GlobalBuilder {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variable(&self) -> Variable {
        Variable::Global(self.name.clone())
    }

    pub fn operand(&self) -> Operand {
        Operand::Var(self.variable())
    }

    pub fn default_value(&self) -> Option<&Operand> {
        self.default.as_ref()
    }

    pub fn set_default_value(&mut self, value: Operand) {
        self.default = Some(value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymbolKind {
    Constant,
    Global,
    Table,
    Routine,
    Object,
    Property,
    Flag,
    Word,
}

pub struct GameBuilder {
    zversion: u8,
    options: GameOptions,
    stream_factory: Box<dyn StreamFactory>,
    debug: Option<DebugFileBuilder>,

    symbols: IndexMap<String, SymbolKind>,
    routines: Vec<RoutineBuilder>,
    entry_routine: Option<RoutineRef>,
    objects: Vec<ObjectBuilder>,
    props: Vec<PropertyBuilder>,
    flags: Vec<FlagBuilder>,
    constants: IndexMap<String, Operand>,
    globals: Vec<GlobalBuilder>,
    impure_tables: Vec<TableBuilder>,
    pure_tables: Vec<TableBuilder>,
    vocabulary: Vec<WordBuilder>,
    si_breaks: IndexSet<char>,
    // string content -> interned STR?<n> symbol, in first-seen order
    string_pool: IndexMap<String, String>,
}

impl GameBuilder {
    pub fn new(
        zversion: u8,
        stream_factory: Box<dyn StreamFactory>,
        want_debug_info: bool,
        options: Option<GameOptions>,
    ) -> Result<GameBuilder, EmitError> {
        // ZAP has no directives for versions 1 and 2
        if !(3..=8).contains(&zversion) {
            return Err(EmitError::UnsupportedVersion(zversion));
        }

        let options = match options {
            Some(options) => {
                if !options.matches_version(zversion) {
                    return Err(EmitError::OptionsVersionMismatch(zversion));
                }
                options
            }
            None => GameOptions::default_for(zversion),
        };

        Ok(GameBuilder {
            zversion,
            options,
            stream_factory,
            debug: if want_debug_info {
                Some(DebugFileBuilder::new())
            } else {
                None
            },
            symbols: IndexMap::new(),
            routines: Vec::new(),
            entry_routine: None,
            objects: Vec::new(),
            props: Vec::new(),
            flags: Vec::new(),
            constants: IndexMap::new(),
            globals: Vec::new(),
            impure_tables: Vec::new(),
            pure_tables: Vec::new(),
            vocabulary: Vec::new(),
            si_breaks: IndexSet::new(),
            string_pool: IndexMap::new(),
        })
    }

    pub fn zversion(&self) -> u8 {
        self.zversion
    }

    pub fn options(&self) -> &GameOptions {
        &self.options
    }

    // version-derived limits

    pub fn max_property_length(&self) -> usize {
        if self.zversion > 3 {
            64
        } else {
            8
        }
    }

    pub fn max_properties(&self) -> usize {
        if self.zversion > 3 {
            63
        } else {
            31
        }
    }

    pub fn max_flags(&self) -> usize {
        if self.zversion > 3 {
            48
        } else {
            32
        }
    }

    pub fn max_call_arguments(&self) -> usize {
        if self.zversion > 3 {
            7
        } else {
            3
        }
    }

    // operand interning

    pub fn zero(&self) -> Operand {
        Operand::Num(0)
    }

    pub fn one(&self) -> Operand {
        Operand::Num(1)
    }

    /// The vocabulary table's well-known symbol.
    pub fn vocab_operand(&self) -> Operand {
        Operand::Const("VOCAB".to_string())
    }

    pub fn operand_for_number(&self, value: i32) -> Operand {
        // numeric operands compare structurally, so every request for the
        // same value yields the canonical operand
        Operand::Num(value)
    }

    /// The pooled symbol for a string literal, interning it on first sight.
    pub fn operand_for_string(&mut self, value: &str) -> Operand {
        let next = format!("STR?{}", self.string_pool.len());
        let symbol = self
            .string_pool
            .entry(value.to_string())
            .or_insert(next)
            .clone();
        Operand::Const(symbol)
    }

    // declarations

    fn claim_symbol(&mut self, name: &str, kind: SymbolKind) -> Result<(), EmitError> {
        if self.symbols.contains_key(name) {
            return Err(EmitError::DuplicateSymbol(name.to_string()));
        }
        self.symbols.insert(name.to_string(), kind);
        Ok(())
    }

    pub fn define_constant(&mut self, name: &str, value: Operand) -> Result<Operand, EmitError> {
        let name = sanitize_symbol(name);
        self.claim_symbol(&name, SymbolKind::Constant)?;
        self.constants.insert(name.clone(), value);
        Ok(Operand::Const(name))
    }

    pub fn define_global(&mut self, name: &str) -> Result<GlobalRef, EmitError> {
        let name = sanitize_symbol(name);
        self.claim_symbol(&name, SymbolKind::Global)?;
        self.globals.push(GlobalBuilder {
            name,
            default: None,
        });
        Ok(GlobalRef(self.globals.len() - 1))
    }

    pub fn global(&self, global: GlobalRef) -> &GlobalBuilder {
        &self.globals[global.0]
    }

    pub fn global_mut(&mut self, global: GlobalRef) -> &mut GlobalBuilder {
        &mut self.globals[global.0]
    }

    /// Define a table; an anonymous table gets a generated `T?<n>` name.
    pub fn define_table(&mut self, name: Option<&str>, pure: bool) -> Result<TableRef, EmitError> {
        let name = match name {
            Some(name) => sanitize_symbol(name),
            None => format!("T?{}", self.pure_tables.len() + self.impure_tables.len()),
        };
        self.claim_symbol(&name, SymbolKind::Table)?;
        let table = TableBuilder::new(name);
        if pure {
            self.pure_tables.push(table);
            Ok(TableRef {
                pure: true,
                index: self.pure_tables.len() - 1,
            })
        } else {
            self.impure_tables.push(table);
            Ok(TableRef {
                pure: false,
                index: self.impure_tables.len() - 1,
            })
        }
    }

    pub fn table(&self, table: TableRef) -> &TableBuilder {
        if table.pure {
            &self.pure_tables[table.index]
        } else {
            &self.impure_tables[table.index]
        }
    }

    pub fn table_mut(&mut self, table: TableRef) -> &mut TableBuilder {
        if table.pure {
            &mut self.pure_tables[table.index]
        } else {
            &mut self.impure_tables[table.index]
        }
    }

    pub fn define_routine(
        &mut self,
        name: &str,
        entry_point: bool,
        clean_stack: bool,
    ) -> Result<RoutineRef, EmitError> {
        let name = sanitize_symbol(name);
        self.claim_symbol(&name, SymbolKind::Routine)?;
        self.routines.push(RoutineBuilder::new(
            name,
            entry_point,
            clean_stack,
            self.zversion,
            self.max_call_arguments(),
            self.debug.is_some(),
        ));
        let routine = RoutineRef(self.routines.len() - 1);
        if entry_point {
            self.entry_routine = Some(routine);
        }
        Ok(routine)
    }

    pub fn routine(&self, routine: RoutineRef) -> &RoutineBuilder {
        &self.routines[routine.0]
    }

    pub fn routine_mut(&mut self, routine: RoutineRef) -> &mut RoutineBuilder {
        &mut self.routines[routine.0]
    }

    pub fn define_object(&mut self, name: &str) -> Result<ObjectRef, EmitError> {
        let name = sanitize_symbol(name);
        self.claim_symbol(&name, SymbolKind::Object)?;
        self.objects.push(ObjectBuilder::new(name));
        Ok(ObjectRef(self.objects.len() - 1))
    }

    pub fn object(&self, object: ObjectRef) -> &ObjectBuilder {
        &self.objects[object.0]
    }

    pub fn object_mut(&mut self, object: ObjectRef) -> &mut ObjectBuilder {
        &mut self.objects[object.0]
    }

    /// Define a property; numbers are assigned downward from the version's
    /// maximum, so declaration order determines table iteration order.
    pub fn define_property(&mut self, name: &str) -> Result<PropRef, EmitError> {
        let max = self.max_properties();
        if self.props.len() >= max {
            return Err(EmitError::TooManyProperties(max));
        }
        let name = format!("P?{}", sanitize_symbol(name));
        self.claim_symbol(&name, SymbolKind::Property)?;
        let number = (max - self.props.len()) as u16;
        self.props.push(PropertyBuilder {
            name,
            number,
            default: None,
        });
        Ok(PropRef(self.props.len() - 1))
    }

    pub fn property(&self, prop: PropRef) -> &PropertyBuilder {
        &self.props[prop.0]
    }

    pub fn property_mut(&mut self, prop: PropRef) -> &mut PropertyBuilder {
        &mut self.props[prop.0]
    }

    pub fn define_flag(&mut self, name: &str) -> Result<FlagRef, EmitError> {
        let max = self.max_flags();
        if self.flags.len() >= max {
            return Err(EmitError::TooManyFlags(max));
        }
        let name = sanitize_symbol(name);
        self.claim_symbol(&name, SymbolKind::Flag)?;
        let number = (max - 1 - self.flags.len()) as u16;
        self.flags.push(FlagBuilder { name, number });
        Ok(FlagRef(self.flags.len() - 1))
    }

    pub fn flag(&self, flag: FlagRef) -> &FlagBuilder {
        &self.flags[flag.0]
    }

    pub fn define_vocabulary_word(&mut self, word: &str) -> Result<WordRef, EmitError> {
        let name = format!("W?{}", sanitize_symbol(&word.to_uppercase()));
        self.claim_symbol(&name, SymbolKind::Word)?;
        self.vocabulary
            .push(WordBuilder::new(name, word.to_lowercase()));
        Ok(WordRef(self.vocabulary.len() - 1))
    }

    pub fn word(&self, word: WordRef) -> &WordBuilder {
        &self.vocabulary[word.0]
    }

    pub fn word_mut(&mut self, word: WordRef) -> &mut WordBuilder {
        &mut self.vocabulary[word.0]
    }

    /// Remove a previously defined word so it can be redefined. Handles out
    /// for other words stay valid; the handle for the removed word must not
    /// be used again.
    pub fn remove_vocabulary_word(&mut self, word: &str) {
        let name = format!("W?{}", sanitize_symbol(&word.to_uppercase()));
        if self.symbols.shift_remove(&name).is_some() {
            // tombstone rather than compact, so later WordRefs keep their slots
            for wb in &mut self.vocabulary {
                if !wb.is_removed() && wb.name() == name {
                    wb.mark_removed();
                }
            }
        }
    }

    pub fn add_self_inserting_break(&mut self, ch: char) {
        self.si_breaks.insert(ch);
    }

    /// Attach a table-valued property to an object; returns the table so the
    /// caller can fill it in.
    pub fn add_complex_property(
        &mut self,
        object: ObjectRef,
        prop: PropRef,
    ) -> &mut TableBuilder {
        let name = format!(
            "?{}?CP?{}",
            self.objects[object.0].name(),
            self.props[prop.0].name()
        );
        self.objects[object.0].props.push(PropertyEntry {
            prop,
            value: PropertyValue::Table(TableBuilder::new(name)),
        });
        match self.objects[object.0].props.last_mut() {
            Some(PropertyEntry {
                value: PropertyValue::Table(table),
                ..
            }) => table,
            _ => unreachable!("just pushed a table property"),
        }
    }

    // debug recording

    pub fn debug_file_mut(&mut self) -> Option<&mut DebugFileBuilder> {
        self.debug.as_mut()
    }

    /// Record the source span of a routine's definition.
    pub fn mark_routine(&mut self, routine: RoutineRef, start: DebugLineRef, end: DebugLineRef) {
        if self.debug.is_some() {
            let rb = &mut self.routines[routine.0];
            rb.defn_start = Some(start);
            rb.defn_end = Some(end);
        }
    }

    /// Optimize and render one routine. Also done implicitly by `finish` for
    /// any routine not yet finished.
    pub fn finish_routine(&mut self, routine: RoutineRef) -> Result<(), EmitError> {
        let GameBuilder {
            routines, debug, ..
        } = self;
        routines[routine.0].finish(debug.as_mut())
    }

    // finalization

    /// Serialize the whole module. Consumes the builder; every phase writes
    /// to its own output section through the stream factory.
    pub fn finish(mut self) -> Result<(), EmitError> {
        for i in 0..self.routines.len() {
            let GameBuilder {
                routines, debug, ..
            } = &mut self;
            if routines[i].rendered.is_none() {
                routines[i].finish(debug.as_mut())?;
            }
        }

        debug!(
            "finishing module: v{}, {} routines, {} objects, {} words",
            self.zversion,
            self.routines.len(),
            self.objects.len(),
            self.vocabulary.iter().filter(|wb| !wb.is_removed()).count()
        );

        let mut main = self.stream_factory.create_main_stream()?;
        self.write_main(&mut main)?;
        drop(main);

        let mut data = self.stream_factory.create_data_stream()?;
        self.write_data(&mut data)?;
        drop(data);

        let mut strings = self.stream_factory.create_string_stream()?;
        self.write_strings(&mut strings)?;
        drop(strings);

        if !self.stream_factory.frequent_words_file_exists() {
            let mut freq = self.stream_factory.create_frequent_words_stream()?;
            self.write_dummy_frequent_words(&mut freq)?;
        }

        Ok(())
    }

    fn write_main(&self, w: &mut Box<dyn Write>) -> Result<(), EmitError> {
        match self.zversion {
            3 => {
                if let GameOptions::V3 {
                    time_status_line,
                    sound_effects,
                } = &self.options
                {
                    if *time_status_line {
                        writeln!(w, "\t.TIME")?;
                    }
                    if *sound_effects {
                        writeln!(w, "\t.SOUND")?;
                    }
                }
            }
            4 => {
                writeln!(w, "\t.NEW 4")?;
                if let GameOptions::V4 { sound_effects } = &self.options {
                    if *sound_effects {
                        writeln!(w, "\t.SOUND")?;
                    }
                }
            }
            _ => {
                writeln!(w, "\t.NEW {}", self.zversion)?;
                if let Some(opts) = self.options.v5() {
                    if let Some(escape) = opts.language_escape_char {
                        writeln!(w, "\t.LANG {},{}", opts.language_id, escape as u32)?;
                    }
                    if opts.charset0.is_some() || opts.charset1.is_some() || opts.charset2.is_some()
                    {
                        writeln!(w, "\t.CHRSET 0,{}", expand_chrset(opts.charset0.as_deref()))?;
                        writeln!(w, "\t.CHRSET 1,{}", expand_chrset(opts.charset1.as_deref()))?;
                        writeln!(w, "\t.CHRSET 2,{}", expand_chrset(opts.charset2.as_deref()))?;
                    }
                }

                writeln!(w)?;
                writeln!(w, "\t.BYTE {}", self.zversion)?;
                writeln!(w, "\t.BYTE FLAGS")?;
                writeln!(w, "\t.WORD RELEASEID")?;
                writeln!(w, "\t.WORD ENDLOD")?;
                writeln!(w, "\t.WORD START")?;
                writeln!(w, "\t.WORD VOCAB")?;
                writeln!(w, "\t.WORD OBJECT")?;
                writeln!(w, "\t.WORD GLOBAL")?;
                writeln!(w, "\t.WORD IMPURE")?;
                writeln!(w, "\t.WORD FLAGS2")?;
                // serial number, patched by the assembler
                writeln!(w, "\t.BYTE 0,0,0,0,0,0")?;
                writeln!(w, "\t.WORD WORDS")?;
                // length and checksum, patched by the assembler
                writeln!(w, "\t.WORD 0,0")?;

                // interpreter number/version, screen size, font size
                for _ in 0..5 {
                    writeln!(w, "\t.WORD 0")?;
                }
                // routine and string offsets are meaningful only in V6
                if self.zversion == 6 {
                    writeln!(w, "\t.WORD FOFF")?;
                    writeln!(w, "\t.WORD SOFF")?;
                } else {
                    writeln!(w, "\t.WORD 0")?;
                    writeln!(w, "\t.WORD 0")?;
                }
                // default colors
                writeln!(w, "\t.WORD 0")?;
                writeln!(w, "\t.WORD TCHARS")?;
                // stream 3 width, standard revision
                writeln!(w, "\t.WORD 0")?;
                writeln!(w, "\t.WORD 0")?;
                writeln!(w, "\t.WORD CHRSET")?;
                writeln!(w, "\t.WORD EXTAB")?;
                for _ in 0..4 {
                    writeln!(w, "\t.WORD 0")?;
                }
            }
        }

        writeln!(
            w,
            "\t.INSERT \"{}\"",
            self.stream_factory.frequent_words_file_name(false)
        )?;
        writeln!(
            w,
            "\t.INSERT \"{}\"",
            self.stream_factory.data_file_name(false)
        )?;

        for routine in &self.routines {
            writeln!(w)?;
            if let Some(text) = &routine.rendered {
                w.write_all(text.as_bytes())?;
            }
        }

        writeln!(w)?;
        writeln!(
            w,
            "\t.INSERT \"{}\"",
            self.stream_factory.string_file_name(false)
        )?;
        writeln!(w, "\t.END")?;
        Ok(())
    }

    fn write_data(&mut self, w: &mut Box<dyn Write>) -> Result<(), EmitError> {
        writeln!(
            w,
            "\t; Data to accompany {}",
            self.stream_factory.main_file_name(true)
        )?;

        self.write_symbols(w)?;
        self.write_objects(w)?;
        self.write_globals(w)?;

        for table in &self.impure_tables {
            writeln!(w)?;
            writeln!(w, "{}:: .TABLE {}", table.name(), table.size())?;
            w.write_all(table.render().as_bytes())?;
            writeln!(w, "\t.ENDT")?;
        }

        writeln!(w)?;
        writeln!(w, "IMPURE::")?;

        self.write_vocabulary(w)?;

        for table in &self.pure_tables {
            writeln!(w)?;
            writeln!(w, "{}:: .TABLE {}", table.name(), table.size())?;
            w.write_all(table.render().as_bytes())?;
            writeln!(w, "\t.ENDT")?;
        }

        if let Some(opts) = self.options.v5() {
            if opts.charset0.is_some() || opts.charset1.is_some() || opts.charset2.is_some() {
                writeln!(w)?;
                writeln!(w, "CHRSET:: .TABLE 78")?;
                writeln!(w, "\t.BYTE {}", expand_chrset(opts.charset0.as_deref()))?;
                writeln!(w, "\t.BYTE {}", expand_chrset(opts.charset1.as_deref()))?;
                writeln!(w, "\t.BYTE {}", expand_chrset(opts.charset2.as_deref()))?;
                writeln!(w, "\t.ENDT")?;
            }
        }

        writeln!(w)?;
        writeln!(w, "ENDLOD::")?;

        if let Some(debug) = &self.debug {
            let mut files: Vec<(&String, &u32)> = debug.files().iter().collect();
            files.sort_by_key(|&(_, num)| *num);
            for (name, num) in files {
                let stem = Path::new(name)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                writeln!(w, "\t.DEBUG-FILE {},\"{}\",\"{}\"", num, stem, name)?;
            }

            let mut flag_names: Vec<&str> = self.flags.iter().map(|f| f.name()).collect();
            flag_names.sort_unstable();
            for name in flag_names {
                writeln!(w, "\t.DEBUG-ATTR {},\"{}\"", name, name)?;
            }

            let mut prop_names: Vec<&str> = self.props.iter().map(|p| p.name()).collect();
            prop_names.sort_unstable();
            for name in prop_names {
                writeln!(w, "\t.DEBUG-PROP {},\"{}\"", name, name)?;
            }

            let mut global_names: Vec<&str> = self.globals.iter().map(|g| g.name()).collect();
            global_names.sort_unstable();
            for name in global_names {
                writeln!(w, "\t.DEBUG-GLOBAL {},\"{}\"", name, name)?;
            }

            let mut table_names: Vec<&str> = self
                .impure_tables
                .iter()
                .chain(&self.pure_tables)
                .map(|t| t.name())
                .collect();
            table_names.sort_unstable();
            for name in table_names {
                writeln!(w, "\t.DEBUG-ARRAY {},\"{}\"", name, name)?;
            }

            for line in debug.stored_lines() {
                writeln!(w, "\t{}", line)?;
            }
        }

        writeln!(w, "\t.ENDI")?;
        Ok(())
    }

    fn write_symbols(&self, w: &mut Box<dyn Write>) -> Result<(), EmitError> {
        writeln!(w)?;

        if self.zversion >= 5 {
            writeln!(w, "\tFLAGS=0")?;
        }

        let mut flags2: u16 = 0;
        let mut extension_table = None;
        let mut define_tchars = true;
        let mut define_chrset = false;
        if let Some(opts) = self.options.v5() {
            if opts.display_ops {
                flags2 |= 8;
            }
            if opts.undo {
                flags2 |= 16;
            }
            if opts.mouse {
                flags2 |= 32;
            }
            if opts.color {
                flags2 |= 64;
            }
            if opts.sound_effects {
                flags2 |= 128;
            }
            if opts.menus {
                flags2 |= 256;
            }
            extension_table = opts.header_extension_table;
            define_tchars = !self.symbols.contains_key("TCHARS");
            define_chrset =
                opts.charset0.is_none() && opts.charset1.is_none() && opts.charset2.is_none();
        }

        writeln!(w, "\tFLAGS2={}", flags2)?;

        match extension_table {
            Some(table) => writeln!(w, "\tEXTAB={}", self.table(table).name())?,
            None => writeln!(w, "\tEXTAB=0")?,
        }
        if define_tchars {
            writeln!(w, "\tTCHARS=0")?;
        }
        if define_chrset {
            writeln!(w, "\tCHRSET=0")?;
        }
        // V6 has no START:: label; point the symbol at the entry routine
        if self.zversion == 6 {
            if let Some(entry) = self.entry_routine {
                writeln!(w, "\tSTART={}", self.routines[entry.0].name())?;
            }
        }

        if !self.flags.is_empty() {
            writeln!(w)?;
        }
        let mut flags: Vec<&FlagBuilder> = self.flags.iter().collect();
        flags.sort_by_key(|f| f.number());
        for flag in flags {
            writeln!(w, "\t{}={}", flag.name(), flag.number())?;
            writeln!(
                w,
                "\tFX?{}={}",
                flag.name(),
                1u16 << (15 - (flag.number() % 16))
            )?;
        }

        if !self.props.is_empty() {
            writeln!(w)?;
        }
        let mut props: Vec<&PropertyBuilder> = self.props.iter().collect();
        props.sort_by_key(|p| p.number());
        for prop in props {
            writeln!(w, "\t{}={}", prop.name(), prop.number())?;
        }

        if !self.constants.is_empty() {
            writeln!(w)?;
        }
        let mut constants: Vec<(&String, &Operand)> = self.constants.iter().collect();
        constants.sort_by_key(|&(name, _)| name);
        for (name, value) in constants {
            writeln!(w, "\t{}={}", name, value)?;
        }

        Ok(())
    }

    fn write_objects(&self, w: &mut Box<dyn Write>) -> Result<(), EmitError> {
        writeln!(w)?;
        writeln!(w, "OBJECT:: .TABLE")?;

        // one default word per property slot, declared or not
        for num in 1..=self.max_properties() as u16 {
            match self.props.iter().find(|p| p.number() == num) {
                Some(prop) => {
                    writeln!(w, "\t; {}", prop.name())?;
                    match prop.default_value() {
                        Some(value) => writeln!(w, "\t.WORD {}", value)?,
                        None => writeln!(w, "\t.WORD 0")?,
                    }
                }
                None => {
                    writeln!(w, "\t; Unused property #{}", num)?;
                    writeln!(w, "\t.WORD 0")?;
                }
            }
        }

        if !self.objects.is_empty() {
            writeln!(w)?;
        }
        for obj in &self.objects {
            let name_of = |r: Option<ObjectRef>| match r {
                Some(r) => self.objects[r.0].name().to_string(),
                None => "0".to_string(),
            };
            let mut record = format!(
                "\t.OBJECT {},{},{}",
                obj.name(),
                obj.flags_word(0, &self.flags),
                obj.flags_word(16, &self.flags)
            );
            if self.zversion >= 4 {
                record.push(',');
                record.push_str(&obj.flags_word(32, &self.flags));
            }
            writeln!(
                w,
                "{},{},{},{},?PTBL?{}",
                record,
                name_of(obj.parent),
                name_of(obj.sibling),
                name_of(obj.child),
                obj.name()
            )?;
        }
        writeln!(w, "\t.ENDT")?;

        for obj in &self.objects {
            writeln!(w)?;
            writeln!(w, "?PTBL?{}:: .TABLE", obj.name())?;
            w.write_all(obj.render_properties(&self.props).as_bytes())?;
            writeln!(w, "\t.ENDT")?;
        }

        Ok(())
    }

    fn write_globals(&mut self, w: &mut Box<dyn Write>) -> Result<(), EmitError> {
        writeln!(w)?;
        writeln!(w, "GLOBAL:: .TABLE")?;

        // V3 interpreters read the status line from the first three globals
        if self.zversion < 4 {
            for (slot, name) in ["HERE", "SCORE", "MOVES"].iter().enumerate() {
                if let Some(cur) = self.globals.iter().position(|g| g.name() == *name) {
                    if cur != slot {
                        let gb = self.globals.remove(cur);
                        self.globals.insert(slot, gb);
                    }
                }
            }
        }

        for global in &self.globals {
            match global.default_value() {
                Some(value) => writeln!(w, "\t.GVAR {}={}", global.name(), value)?,
                None => writeln!(w, "\t.GVAR {}=0", global.name())?,
            }
        }
        writeln!(w, "\t.ENDT")?;
        Ok(())
    }

    fn write_vocabulary(&self, w: &mut Box<dyn Write>) -> Result<(), EmitError> {
        writeln!(w)?;
        writeln!(w, "VOCAB:: .TABLE")?;

        if self.si_breaks.len() > 255 {
            return Err(EmitError::TooManySelfInsertingBreaks(255));
        }
        writeln!(w, "\t.BYTE {}", self.si_breaks.len())?;
        for &ch in &self.si_breaks {
            if ch as u32 > 255 {
                return Err(EmitError::BreakCharOutOfRange(ch));
            }
            writeln!(w, "\t.BYTE {}", ch as u32)?;
        }

        let mut live: Vec<&WordBuilder> = self
            .vocabulary
            .iter()
            .filter(|wb| !wb.is_removed())
            .collect();
        if live.is_empty() {
            // the parser still expects a well-formed, empty dictionary
            writeln!(w, "\t.BYTE 7")?;
            writeln!(w, "\t.WORD 0")?;
        } else {
            let zword_bytes = if self.zversion < 4 { 4 } else { 6 };
            // every record carries the extra-data width of the first word
            let data_bytes = live[0].size();

            writeln!(w, "\t.BYTE {}", zword_bytes + data_bytes)?;
            writeln!(w, "\t.WORD {}", live.len())?;
            writeln!(w, "\t.VOCBEG {},{}", zword_bytes + data_bytes, zword_bytes)?;

            live.sort_by(|a, b| a.word().cmp(b.word()));
            for wb in live {
                writeln!(w, "{}:: .ZWORD \"{}\"", wb.name(), sanitize_string(wb.word()))?;
                w.write_all(wb.render().as_bytes())?;
            }
            writeln!(w, "\t.VOCEND")?;
        }

        writeln!(w, "\t.ENDT")?;
        Ok(())
    }

    fn write_strings(&self, w: &mut Box<dyn Write>) -> Result<(), EmitError> {
        writeln!(
            w,
            "\t; Strings to accompany {}",
            self.stream_factory.main_file_name(true)
        )?;

        if !self.string_pool.is_empty() {
            writeln!(w)?;
        }
        let mut strings: Vec<(&String, &String)> = self.string_pool.iter().collect();
        strings.sort_by_key(|&(content, _)| content);
        for (content, symbol) in strings {
            writeln!(w, "\t.GSTR {},\"{}\"", symbol, sanitize_string(content))?;
        }

        writeln!(w, "\t.ENDI")?;
        Ok(())
    }

    fn write_dummy_frequent_words(&self, w: &mut Box<dyn Write>) -> Result<(), EmitError> {
        writeln!(
            w,
            "\t; Dummy frequent words file for {}",
            self.stream_factory.main_file_name(true)
        )?;
        writeln!(w, "\t.FSTR FSTR?DUMMY,\"\"")?;
        writeln!(w, "WORDS::")?;
        for _ in 0..96 {
            writeln!(w, "\tFSTR?DUMMY")?;
        }
        writeln!(w, "\t.ENDI")?;
        Ok(())
    }
}

/// Expand a custom alphabet string into 26 comma-separated ZSCII codes,
/// padding short alphabets with spaces at the front.
fn expand_chrset(alphabet: Option<&str>) -> String {
    let alphabet = alphabet.unwrap_or("");
    let mut parts: Vec<String> = Vec::with_capacity(26);
    for _ in alphabet.chars().count()..26 {
        parts.push("32".to_string());
    }
    for c in alphabet.chars() {
        let code = DEFAULT_UNICODE_MAPPING
            .get(&c)
            .copied()
            .unwrap_or(c as u32 as u8);
        parts.push(code.to_string());
    }
    parts.join(",")
}
