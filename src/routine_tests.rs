// Routine Emission Tests

#[cfg(test)]
mod tests {
    use test_log::test;

    use crate::error::EmitError;
    use crate::operand::{Operand, Variable};
    use crate::ops::{BinaryOp, Condition, UnaryOp};
    use crate::routine::RoutineBuilder;

    fn routine(zversion: u8) -> RoutineBuilder {
        let max_args = if zversion < 4 { 3 } else { 7 };
        RoutineBuilder::new(
            "TEST-ROUTINE".to_string(),
            false,
            true,
            zversion,
            max_args,
            false,
        )
    }

    fn render(mut r: RoutineBuilder) -> String {
        r.finish(None).unwrap();
        r.rendered.unwrap()
    }

    #[test]
    fn test_duplicate_locals_rejected() {
        let mut r = routine(5);
        r.define_local("X").unwrap();
        assert!(matches!(
            r.define_required_parameter("X"),
            Err(EmitError::DuplicateLocal(_))
        ));
        assert!(matches!(
            r.define_optional_parameter("X"),
            Err(EmitError::DuplicateLocal(_))
        ));
    }

    #[test]
    fn test_entry_routine_rejects_locals() {
        let mut r = RoutineBuilder::new("GO".to_string(), true, false, 5, 7, false);
        assert!(matches!(
            r.define_local("X"),
            Err(EmitError::EntryRoutineLocal(_))
        ));
    }

    #[test]
    fn test_add_one_reduces_to_inc() {
        let mut r = routine(5);
        let v = r.define_local("CNT").unwrap();
        r.emit_binary(BinaryOp::Add, Operand::Num(1), Operand::Var(v.clone()), Some(&v));
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE,CNT\n\tINC 'CNT\n");
    }

    #[test]
    fn test_sub_one_reduces_to_dec() {
        let mut r = routine(5);
        let v = r.define_local("CNT").unwrap();
        r.emit_binary(BinaryOp::Sub, Operand::Var(v.clone()), Operand::Num(1), Some(&v));
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE,CNT\n\tDEC 'CNT\n");
    }

    #[test]
    fn test_add_one_to_other_variable_does_not_reduce() {
        let mut r = routine(5);
        let x = r.define_local("X").unwrap();
        let y = r.define_local("Y").unwrap();
        r.emit_binary(BinaryOp::Add, Operand::Num(1), Operand::Var(x), Some(&y));
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE,X,Y\n\tADD 1,X >Y\n");
    }

    #[test]
    fn test_store_of_variable_to_itself_is_elided() {
        let mut r = routine(5);
        let v = r.define_local("V").unwrap();
        r.emit_store(&v, Operand::Var(v.clone()));
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE,V\n");
    }

    #[test]
    fn test_store_shapes() {
        // to the stack: PUSH
        let mut r = routine(5);
        r.emit_store(&Variable::Stack, Operand::Num(5));
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE\n\tPUSH 5\n");

        // from the stack: POP 'dest
        let mut r = routine(5);
        let v = r.define_local("V").unwrap();
        r.emit_store(&v, Operand::Var(Variable::Stack));
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE,V\n\tPOP 'V\n");

        // from the stack in V6: POP is a store instruction
        let mut r = routine(6);
        let v = r.define_local("V").unwrap();
        r.emit_store(&v, Operand::Var(Variable::Stack));
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE,V\n\tPOP >V\n");

        // variable to variable: SET
        let mut r = routine(5);
        let v = r.define_local("V").unwrap();
        r.emit_store(&v, Operand::Num(7));
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE,V\n\tSET 'V,7\n");
    }

    #[test]
    fn test_store_indirect_from_stack_becomes_pop() {
        let mut r = routine(5);
        let x = r.define_local("X").unwrap();
        r.emit_binary(
            BinaryOp::StoreIndirect,
            Operand::Indirect(x.clone()),
            Operand::Var(Variable::Stack),
            None,
        );
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE,X\n\tPOP 'X\n");

        // V6 keeps the SET form
        let mut r = routine(6);
        let x = r.define_local("X").unwrap();
        r.emit_binary(
            BinaryOp::StoreIndirect,
            Operand::Indirect(x.clone()),
            Operand::Var(Variable::Stack),
            None,
        );
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE,X\n\tSET 'X,STACK\n");
    }

    #[test]
    fn test_call_opcode_selection_v3() {
        let mut r = routine(3);
        let v = r.define_local("V").unwrap();
        let foo = Operand::Const("FOO".to_string());
        r.emit_call(
            foo.clone(),
            &[Operand::Num(1), Operand::Num(2), Operand::Num(3)],
            Some(&v),
        )
        .unwrap();
        assert_eq!(
            render(r),
            "\t.FUNCT TEST-ROUTINE,V\n\tCALL FOO,1,2,3 >V\n"
        );
    }

    #[test]
    fn test_call_with_too_many_arguments() {
        let mut r = routine(3);
        let foo = Operand::Const("FOO".to_string());
        let args = vec![
            Operand::Num(1),
            Operand::Num(2),
            Operand::Num(3),
            Operand::Num(4),
        ];
        assert!(matches!(
            r.emit_call(foo, &args, None),
            Err(EmitError::TooManyCallArguments(4, 3))
        ));
    }

    #[test]
    fn test_call_discarding_result_below_v5_flushes_stack() {
        let mut r = routine(4);
        let foo = Operand::Const("FOO".to_string());
        r.emit_call(foo, &[Operand::Num(9)], None).unwrap();
        assert_eq!(
            render(r),
            "\t.FUNCT TEST-ROUTINE\n\tCALL2 FOO,9\n\tFSTACK\n"
        );
    }

    #[test]
    fn test_call_opcode_selection_v5() {
        // discarded result uses the ICALL family, with no stack cleanup
        let mut r = routine(5);
        let foo = Operand::Const("FOO".to_string());
        r.emit_call(foo.clone(), &[], None).unwrap();
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE\n\tICALL1 FOO\n");

        let mut r = routine(5);
        r.emit_call(foo.clone(), &[Operand::Num(1)], None).unwrap();
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE\n\tICALL2 FOO,1\n");

        // more than three arguments takes the extended form
        let mut r = routine(5);
        let v = r.define_local("V").unwrap();
        r.emit_call(
            foo,
            &[
                Operand::Num(1),
                Operand::Num(2),
                Operand::Num(3),
                Operand::Num(4),
            ],
            Some(&v),
        )
        .unwrap();
        assert_eq!(
            render(r),
            "\t.FUNCT TEST-ROUTINE,V\n\tXCALL FOO,1,2,3,4 >V\n"
        );
    }

    #[test]
    fn test_v3_defaults_are_inline_in_funct() {
        let mut r = routine(3);
        let p = r.define_optional_parameter("CNT").unwrap();
        r.set_local_default(&p, Operand::Num(5));
        let l = r.define_local("TMP").unwrap();
        r.set_local_default(&l, Operand::Num(2));
        r.ret(Operand::Num(1));
        assert_eq!(
            render(r),
            "\t.FUNCT TEST-ROUTINE,CNT=5,TMP=2\n\tRTRUE\n"
        );
    }

    #[test]
    fn test_v5_defaults_use_a_prologue() {
        let mut r = routine(5);
        let p = r.define_optional_parameter("CNT").unwrap();
        r.set_local_default(&p, Operand::Num(5));
        let l = r.define_local("TMP").unwrap();
        r.set_local_default(&l, Operand::Num(2));
        r.ret(Operand::Num(1));
        assert_eq!(
            render(r),
            "\t.FUNCT TEST-ROUTINE,CNT,TMP\n\
             \tASSIGNED? 'CNT /?L1\n\
             \tSET 'CNT,5\n\
             ?L1:\tSET 'TMP,2\n\
             \tRTRUE\n"
        );
    }

    #[test]
    fn test_entry_routine_start_label() {
        let mut r = RoutineBuilder::new("GO".to_string(), true, false, 5, 7, false);
        r.emit_quit();
        assert_eq!(render(r), "\t.FUNCT GO\nSTART::\n\tQUIT\n");

        // V6 starts at the routine itself instead
        let mut r = RoutineBuilder::new("GO".to_string(), true, false, 6, 7, false);
        r.emit_quit();
        assert_eq!(render(r), "\t.FUNCT GO\n\tQUIT\n");
    }

    #[test]
    fn test_condition_operand_shapes() {
        let mut r = routine(5);
        let v = r.define_local("V").unwrap();
        let label = r.define_label();

        // nullary conditions take no operands
        assert!(matches!(
            r.branch_if(Condition::Verify, Some(Operand::Num(1)), None, label, true),
            Err(EmitError::ConditionArity(_, _))
        ));

        // increment-and-test needs a variable on the left
        assert!(matches!(
            r.branch_if(
                Condition::IncCheck,
                Some(Operand::Num(1)),
                Some(Operand::Num(2)),
                label,
                true
            ),
            Err(EmitError::ConditionNeedsVariable(_))
        ));

        r.branch_if(
            Condition::IncCheck,
            Some(Operand::Var(v)),
            Some(Operand::Num(10)),
            label,
            true,
        )
        .unwrap();
        r.emit_print_newline();
        r.mark_label(label);
        r.ret(Operand::Num(0));
        assert_eq!(
            render(r),
            "\t.FUNCT TEST-ROUTINE,V\n\
             \tIGRTR? 'V,10 /?L1\n\
             \tCRLF\n\
             ?L1:\tRFALSE\n"
        );
    }

    #[test]
    fn test_negative_polarity_branch_rendering() {
        let mut r = routine(5);
        let a = r.define_local("A").unwrap();
        let label = r.define_label();
        r.branch_if(
            Condition::Greater,
            Some(Operand::Var(a)),
            Some(Operand::Num(3)),
            label,
            false,
        )
        .unwrap();
        r.emit_print("low");
        r.mark_label(label);
        r.ret(Operand::Num(0));
        assert_eq!(
            render(r),
            "\t.FUNCT TEST-ROUTINE,A\n\
             \tGRTR? A,3 \\?L1\n\
             \tPRINTI \"low\"\n\
             ?L1:\tRFALSE\n"
        );
    }

    #[test]
    fn test_branch_if_equal_rendering() {
        let mut r = routine(5);
        let x = r.define_local("X").unwrap();
        let label = r.define_label();
        r.branch_if_equal(
            Operand::Var(x),
            &[Operand::Num(1), Operand::Num(2)],
            label,
            true,
        );
        r.emit_print_newline();
        r.mark_label(label);
        r.ret(Operand::Num(0));
        assert_eq!(
            render(r),
            "\t.FUNCT TEST-ROUTINE,X\n\
             \tEQUAL? X,1,2 /?L1\n\
             \tCRLF\n\
             ?L1:\tRFALSE\n"
        );
    }

    #[test]
    fn test_predicate_opcode_gets_a_dummy_branch() {
        let mut r = routine(5);
        let obj = r.define_local("OBJ").unwrap();
        let v = r.define_local("V").unwrap();
        r.emit_unary(UnaryOp::GetChild, Operand::Var(obj), Some(&v));
        r.ret(Operand::Var(v.clone()));
        assert_eq!(
            render(r),
            "\t.FUNCT TEST-ROUTINE,OBJ,V\n\
             \tFIRST? OBJ >V /?L1\n\
             ?L1:\tRETURN V\n"
        );
    }

    #[test]
    fn test_negation_lowers_to_subtraction() {
        let mut r = routine(5);
        let x = r.define_local("X").unwrap();
        let y = r.define_local("Y").unwrap();
        r.emit_unary(UnaryOp::Neg, Operand::Var(x), Some(&y));
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE,X,Y\n\tSUB 0,X >Y\n");
    }

    #[test]
    fn test_print_then_newline_then_return_true_becomes_printr() {
        let mut r = routine(5);
        r.emit_print("Goodbye");
        r.emit_print_newline();
        r.ret(Operand::Num(1));
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE\n\tPRINTR \"Goodbye\"\n");
    }

    #[test]
    fn test_fused_newline_return_renders_as_two_lines() {
        let mut r = routine(5);
        r.emit_print_newline();
        r.ret(Operand::Num(1));
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE\n\tCRLF\n\tRTRUE\n");
    }

    #[test]
    fn test_pop_stack_by_version() {
        let mut r = routine(4);
        r.emit_pop_stack();
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE\n\tFSTACK\n");

        let mut r = routine(6);
        r.emit_pop_stack();
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE\n\tFSTACK 1\n");

        let mut r = routine(8);
        r.emit_pop_stack();
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE\n\tICALL2 0,STACK\n");

        // a routine that doesn't keep the stack clean emits nothing
        let mut r = RoutineBuilder::new("TEST-ROUTINE".to_string(), false, false, 5, 7, false);
        r.emit_pop_stack();
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE\n");
    }

    #[test]
    fn test_save_shapes_by_version() {
        // V3: SAVE branches
        let mut r = routine(3);
        let label = r.define_label();
        assert!(r.has_branch_save());
        r.emit_save_branch(label, true);
        r.emit_quit();
        r.mark_label(label);
        r.ret(Operand::Num(1));
        assert_eq!(
            render(r),
            "\t.FUNCT TEST-ROUTINE\n\tSAVE /?L1\n\tQUIT\n?L1:\tRTRUE\n"
        );

        // V4: SAVE stores
        let mut r = routine(4);
        let v = r.define_local("V").unwrap();
        assert!(r.has_store_save());
        r.emit_save_result(&v);
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE,V\n\tSAVE >V\n");

        // V5: extended SAVE with table, size, and filename
        let mut r = routine(5);
        let v = r.define_local("V").unwrap();
        assert!(r.has_extended_save());
        r.emit_save_extended(
            Operand::Const("TBL".to_string()),
            Operand::Num(10),
            Operand::Const("FN".to_string()),
            &v,
        );
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE,V\n\tSAVE TBL,10,FN >V\n");
    }

    #[test]
    fn test_read_char_prepends_the_device() {
        let mut r = routine(5);
        let v = r.define_local("V").unwrap();
        r.emit_read_char(None, None, &v);
        assert_eq!(render(r), "\t.FUNCT TEST-ROUTINE,V\n\tINPUT 1 >V\n");
    }

    #[test]
    fn test_finish_twice_is_an_error() {
        let mut r = routine(5);
        r.ret(Operand::Num(1));
        r.finish(None).unwrap();
        assert!(matches!(r.finish(None), Err(EmitError::AlreadyFinished(_))));
    }
}
