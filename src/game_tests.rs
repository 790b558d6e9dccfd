// Game Module Emission Tests

#[cfg(test)]
mod tests {
    use test_log::test;

    use crate::debug_file::DebugLineRef;
    use crate::error::EmitError;
    use crate::game::{sanitize_string, sanitize_symbol, GameBuilder, GameOptions, V5Options};
    use crate::operand::Operand;
    use crate::streams::MemoryStreamFactory;
    use crate::table::TableRef;

    fn game(zversion: u8) -> (GameBuilder, MemoryStreamFactory) {
        let factory = MemoryStreamFactory::new();
        let builder = GameBuilder::new(zversion, Box::new(factory.clone()), false, None).unwrap();
        (builder, factory)
    }

    #[test]
    fn test_sanitize_symbol() {
        assert_eq!(sanitize_symbol("."), "$PERIOD");
        assert_eq!(sanitize_symbol(","), "$COMMA");
        assert_eq!(sanitize_symbol("\""), "$QUOTE");
        assert_eq!(sanitize_symbol("'"), "$APOSTROPHE");
        assert_eq!(sanitize_symbol("AUX-VAL?"), "AUX-VAL?");
        assert_eq!(sanitize_symbol("FOO!BAR"), "FOO$0021BAR");
    }

    #[test]
    fn test_sanitize_string_doubles_quotes() {
        assert_eq!(sanitize_string("say \"hi\""), "say \"\"hi\"\"");
    }

    #[test]
    fn test_unsupported_versions_rejected() {
        let factory = MemoryStreamFactory::new();
        assert!(matches!(
            GameBuilder::new(2, Box::new(factory.clone()), false, None),
            Err(EmitError::UnsupportedVersion(2))
        ));
        assert!(matches!(
            GameBuilder::new(9, Box::new(factory), false, None),
            Err(EmitError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_options_must_match_version() {
        let factory = MemoryStreamFactory::new();
        let options = GameOptions::V4 {
            sound_effects: false,
        };
        assert!(matches!(
            GameBuilder::new(3, Box::new(factory), false, Some(options)),
            Err(EmitError::OptionsVersionMismatch(3))
        ));
    }

    #[test]
    fn test_string_interning_is_idempotent() {
        let (mut g, _factory) = game(5);
        let a = g.operand_for_string("hello");
        let b = g.operand_for_string("hello");
        assert_eq!(a, b);
        assert_eq!(a, Operand::Const("STR?0".to_string()));
        assert_eq!(
            g.operand_for_string("world"),
            Operand::Const("STR?1".to_string())
        );
    }

    #[test]
    fn test_duplicate_symbols_rejected_across_kinds() {
        let (mut g, _factory) = game(5);
        g.define_global("FOO").unwrap();
        assert!(matches!(
            g.define_table(Some("FOO"), true),
            Err(EmitError::DuplicateSymbol(_))
        ));
        assert!(matches!(
            g.define_routine("FOO", false, true),
            Err(EmitError::DuplicateSymbol(_))
        ));
    }

    #[test]
    fn test_property_numbers_descend_from_version_maximum() {
        let (mut g, _factory) = game(5);
        let size = g.define_property("SIZE").unwrap();
        let capacity = g.define_property("CAPACITY").unwrap();
        assert_eq!(g.property(size).name(), "P?SIZE");
        assert_eq!(g.property(size).number(), 63);
        assert_eq!(g.property(capacity).number(), 62);

        let (mut g, _factory) = game(3);
        let size = g.define_property("SIZE").unwrap();
        assert_eq!(g.property(size).number(), 31);
    }

    #[test]
    fn test_flag_numbers_descend_from_version_maximum() {
        let (mut g, _factory) = game(5);
        let f = g.define_flag("TAKEBIT").unwrap();
        assert_eq!(g.flag(f).number(), 47);

        let (mut g, _factory) = game(3);
        let f = g.define_flag("TAKEBIT").unwrap();
        assert_eq!(g.flag(f).number(), 31);
    }

    #[test]
    fn test_too_many_properties() {
        let (mut g, _factory) = game(3);
        for i in 0..31 {
            g.define_property(&format!("P{}", i)).unwrap();
        }
        assert!(matches!(
            g.define_property("EXTRA"),
            Err(EmitError::TooManyProperties(31))
        ));
    }

    #[test]
    fn test_flag_bitmask_symbols() {
        let (mut g, factory) = game(5);
        g.define_flag("TAKEBIT").unwrap(); // 47
        g.define_flag("LIGHTBIT").unwrap(); // 46
        g.finish().unwrap();
        let data = factory.data_text();
        // bit position is within the flag's 16-bit word
        assert!(data.contains("\tLIGHTBIT=46\n\tFX?LIGHTBIT=2\n"));
        assert!(data.contains("\tTAKEBIT=47\n\tFX?TAKEBIT=1\n"));
    }

    #[test]
    fn test_v3_status_globals_move_to_the_front() {
        let (mut g, factory) = game(3);
        g.define_global("FOO").unwrap();
        g.define_global("HERE").unwrap();
        g.define_global("BAR").unwrap();
        g.define_global("SCORE").unwrap();
        g.define_global("MOVES").unwrap();
        g.finish().unwrap();
        assert!(factory.data_text().contains(
            "GLOBAL:: .TABLE\n\
             \t.GVAR HERE=0\n\
             \t.GVAR SCORE=0\n\
             \t.GVAR MOVES=0\n\
             \t.GVAR FOO=0\n\
             \t.GVAR BAR=0\n\
             \t.ENDT\n"
        ));
    }

    #[test]
    fn test_vocabulary_is_sorted_and_sized() {
        let (mut g, factory) = game(3);
        for word in ["zebra", "apple", "Mango"] {
            let w = g.define_vocabulary_word(word).unwrap();
            g.word_mut(w).add_word(0);
        }
        g.finish().unwrap();
        let data = factory.data_text();
        // 4 zword bytes + 2 data bytes per entry
        assert!(data.contains("\t.BYTE 6\n\t.WORD 3\n\t.VOCBEG 6,4\n"));
        let apple = data.find("W?APPLE:: .ZWORD \"apple\"").unwrap();
        let mango = data.find("W?MANGO:: .ZWORD \"mango\"").unwrap();
        let zebra = data.find("W?ZEBRA:: .ZWORD \"zebra\"").unwrap();
        assert!(apple < mango && mango < zebra);
        assert!(data.contains("\t.VOCEND\n"));
    }

    #[test]
    fn test_empty_vocabulary_still_forms_a_dictionary() {
        let (g, factory) = game(5);
        g.finish().unwrap();
        assert!(factory
            .data_text()
            .contains("VOCAB:: .TABLE\n\t.BYTE 0\n\t.BYTE 7\n\t.WORD 0\n\t.ENDT\n"));
    }

    #[test]
    fn test_removed_word_can_be_redefined() {
        let (mut g, _factory) = game(5);
        g.define_vocabulary_word("take").unwrap();
        g.remove_vocabulary_word("take");
        assert!(g.define_vocabulary_word("take").is_ok());
    }

    #[test]
    fn test_word_handles_survive_removal() {
        let (mut g, factory) = game(3);
        g.define_vocabulary_word("apple").unwrap();
        let banana = g.define_vocabulary_word("banana").unwrap();
        g.remove_vocabulary_word("apple");

        // the later handle still resolves to its own word
        assert_eq!(g.word(banana).word(), "banana");
        g.word_mut(banana).add_word(0);

        let cherry = g.define_vocabulary_word("cherry").unwrap();
        g.word_mut(cherry).add_word(0);
        g.finish().unwrap();

        let data = factory.data_text();
        assert!(data.contains("\t.WORD 2\n\t.VOCBEG 6,4\n"));
        assert!(!data.contains("W?APPLE"));
        assert_eq!(data.matches("W?BANANA:: .ZWORD \"banana\"").count(), 1);
        assert_eq!(data.matches("W?CHERRY:: .ZWORD \"cherry\"").count(), 1);
    }

    #[test]
    fn test_strings_written_sorted_by_content() {
        let (mut g, factory) = game(5);
        g.operand_for_string("zebra");
        g.operand_for_string("apple");
        g.operand_for_string("say \"hi\"");
        g.finish().unwrap();
        assert_eq!(
            factory.string_text(),
            "\t; Strings to accompany game.zap\n\
             \n\
             \t.GSTR STR?1,\"apple\"\n\
             \t.GSTR STR?2,\"say \"\"hi\"\"\"\n\
             \t.GSTR STR?0,\"zebra\"\n\
             \t.ENDI\n"
        );
    }

    #[test]
    fn test_v5_header_layout() {
        let (g, factory) = game(5);
        g.finish().unwrap();
        let main = factory.main_text();
        assert!(main.starts_with("\t.NEW 5\n"));
        for line in [
            "\t.BYTE 5\n",
            "\t.BYTE FLAGS\n",
            "\t.WORD RELEASEID\n",
            "\t.WORD ENDLOD\n",
            "\t.WORD START\n",
            "\t.WORD VOCAB\n",
            "\t.WORD TCHARS\n",
            "\t.WORD CHRSET\n",
            "\t.WORD EXTAB\n",
            "\t.INSERT \"game_freq\"\n",
            "\t.INSERT \"game_data\"\n",
        ] {
            assert!(main.contains(line), "missing {:?}", line);
        }
        assert!(main.ends_with("\t.INSERT \"game_str\"\n\t.END\n"));
        // the defaults define the optional symbols away
        let data = factory.data_text();
        assert!(data.contains("\tFLAGS=0\n"));
        assert!(data.contains("\tFLAGS2=0\n"));
        assert!(data.contains("\tEXTAB=0\n"));
        assert!(data.contains("\tTCHARS=0\n"));
        assert!(data.contains("\tCHRSET=0\n"));
    }

    #[test]
    fn test_v3_header_directives() {
        let factory = MemoryStreamFactory::new();
        let options = GameOptions::V3 {
            time_status_line: true,
            sound_effects: false,
        };
        let g = GameBuilder::new(3, Box::new(factory.clone()), false, Some(options)).unwrap();
        g.finish().unwrap();
        let main = factory.main_text();
        // V3 has no .NEW and no header block, just capability directives
        assert!(main.starts_with("\t.TIME\n\t.INSERT \"game_freq\"\n"));
        let data = factory.data_text();
        assert!(!data.contains("FLAGS=0"));
        assert!(data.contains("\tFLAGS2=0\n"));
    }

    #[test]
    fn test_flags2_bits() {
        let factory = MemoryStreamFactory::new();
        let options = GameOptions::V5(V5Options {
            sound_effects: true,
            undo: true,
            color: true,
            ..Default::default()
        });
        let g = GameBuilder::new(5, Box::new(factory.clone()), false, Some(options)).unwrap();
        g.finish().unwrap();
        assert!(factory.data_text().contains("\tFLAGS2=208\n"));
    }

    #[test]
    fn test_header_extension_table_symbol() {
        let factory = MemoryStreamFactory::new();
        let options = GameOptions::V5(V5Options {
            header_extension_table: Some(TableRef {
                pure: true,
                index: 0,
            }),
            ..Default::default()
        });
        let mut g = GameBuilder::new(5, Box::new(factory.clone()), false, Some(options)).unwrap();
        let t = g.define_table(Some("EXTTAB"), true).unwrap();
        g.table_mut(t).add_word(3);
        g.finish().unwrap();
        assert!(factory.data_text().contains("\tEXTAB=EXTTAB\n"));
    }

    #[test]
    fn test_custom_charsets() {
        let factory = MemoryStreamFactory::new();
        let options = GameOptions::V5(V5Options {
            charset0: Some("äö".to_string()),
            ..Default::default()
        });
        let g = GameBuilder::new(5, Box::new(factory.clone()), false, Some(options)).unwrap();
        g.finish().unwrap();
        // short alphabets pad with spaces at the front, then map through
        // the default ZSCII table
        assert!(factory.main_text().contains("\t.CHRSET 0,32,32"));
        assert!(factory.main_text().contains(",155,156\n"));
        let data = factory.data_text();
        assert!(data.contains("CHRSET:: .TABLE 78\n"));
        assert!(!data.contains("\tCHRSET=0\n"));
    }

    #[test]
    fn test_v6_header_offsets_and_start_symbol() {
        let (mut g, factory) = game(6);
        let r = g.define_routine("GO", true, true).unwrap();
        g.routine_mut(r).emit_quit();
        g.finish().unwrap();
        let main = factory.main_text();
        assert!(main.contains("\t.WORD FOFF\n\t.WORD SOFF\n"));
        assert!(!main.contains("START::"));
        assert!(factory.data_text().contains("\tSTART=GO\n"));
    }

    #[test]
    fn test_entry_routine_rendered_with_start_label() {
        let (mut g, factory) = game(5);
        let r = g.define_routine("GO", true, true).unwrap();
        g.routine_mut(r).emit_quit();
        g.finish().unwrap();
        assert!(factory
            .main_text()
            .contains("\t.FUNCT GO\nSTART::\n\tQUIT\n"));
    }

    #[test]
    fn test_property_defaults_table() {
        let (mut g, factory) = game(3);
        let p = g.define_property("SIZE").unwrap();
        g.property_mut(p).set_default_value(Operand::Num(42));
        g.finish().unwrap();
        let data = factory.data_text();
        assert!(data.contains("\t; Unused property #1\n\t.WORD 0\n"));
        assert!(data.contains("\t; P?SIZE\n\t.WORD 42\n"));
    }

    #[test]
    fn test_object_records_and_property_tables() {
        let (mut g, factory) = game(3);
        let take = g.define_flag("TAKEBIT").unwrap(); // number 31
        let size = g.define_property("SIZE").unwrap();
        let o = g.define_object("LANTERN").unwrap();
        g.object_mut(o).add_flag(take);
        g.object_mut(o).set_descriptive_name("brass lantern");
        g.object_mut(o).add_byte_property(size, Operand::Num(15));
        g.finish().unwrap();
        let data = factory.data_text();
        // flag 31 lands in the second flag word; V3 records have two
        assert!(data.contains("\t.OBJECT LANTERN,0,FX?TAKEBIT,0,0,0,?PTBL?LANTERN\n"));
        assert!(data.contains(
            "?PTBL?LANTERN:: .TABLE\n\
             \t.STRL \"brass lantern\"\n\
             \t.PROP 1,P?SIZE\n\
             \t.BYTE 15\n\
             \t.BYTE 0\n\
             \t.ENDT\n"
        ));
    }

    #[test]
    fn test_complex_property_renders_inline() {
        let (mut g, factory) = game(3);
        let things = g.define_property("THINGS").unwrap();
        let o = g.define_object("BOX").unwrap();
        let t = g.add_complex_property(o, things);
        t.add_word(5);
        t.add_byte(1);
        g.finish().unwrap();
        assert!(factory
            .data_text()
            .contains("\t.PROP 3,P?THINGS\n\t.WORD 5\n\t.BYTE 1\n"));
    }

    #[test]
    fn test_dummy_frequent_words_file() {
        let (g, factory) = game(5);
        g.finish().unwrap();
        let freq = factory.frequent_words_text();
        assert!(freq.contains("\t.FSTR FSTR?DUMMY,\"\"\nWORDS::\n"));
        assert_eq!(freq.matches("\tFSTR?DUMMY\n").count(), 96);

        // with a precompiled file available, nothing is written
        let mut factory = MemoryStreamFactory::new();
        factory.frequent_words_exist = true;
        let g = GameBuilder::new(5, Box::new(factory.clone()), false, None).unwrap();
        g.finish().unwrap();
        assert_eq!(factory.frequent_words_text(), "");
    }

    #[test]
    fn test_debug_records() {
        let factory = MemoryStreamFactory::new();
        let mut g = GameBuilder::new(5, Box::new(factory.clone()), true, None).unwrap();
        g.define_flag("TAKEBIT").unwrap();
        g.define_global("SCORE").unwrap();
        let r = g.define_routine("GO", true, true).unwrap();
        g.mark_routine(
            r,
            DebugLineRef::new("main.zil", 1, 1),
            DebugLineRef::new("main.zil", 5, 1),
        );
        g.routine_mut(r)
            .mark_sequence_point(DebugLineRef::new("main.zil", 2, 3));
        g.routine_mut(r).emit_quit();
        g.finish().unwrap();

        let main = factory.main_text();
        assert!(main.contains("\t.DEBUG-ROUTINE 1,1,1,\"GO\"\n\t.FUNCT GO\n"));
        assert!(main.contains("\t.DEBUG-LINE 1,2,3\n\tQUIT\n"));
        assert!(main.contains("\t.DEBUG-ROUTINE-END 1,5,1\n"));

        let data = factory.data_text();
        assert!(data.contains("\t.DEBUG-FILE 1,\"main\",\"main.zil\"\n"));
        assert!(data.contains("\t.DEBUG-ATTR TAKEBIT,\"TAKEBIT\"\n"));
        assert!(data.contains("\t.DEBUG-GLOBAL SCORE,\"SCORE\"\n"));
    }
}
