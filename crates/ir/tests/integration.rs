//! Integration tests for the ir crate
//!
//! Parses the shared samples, prints them back and checks the printed text
//! describes the same program.

use indoc::indoc;
use ir::{parse_module, BlockGraph, Module, ParseError};

const SAMPLES: &[(&str, &str)] = &[
    ("scenario", include_str!("../../../tests/ir_samples/scenario.ir")),
    ("array_canary", include_str!("../../../tests/ir_samples/array_canary.ir")),
    ("two_returns", include_str!("../../../tests/ir_samples/two_returns.ir")),
    ("misaligned", include_str!("../../../tests/ir_samples/misaligned.ir")),
];

fn reparse(module: &Module) -> Module {
    parse_module(&module.to_string()).expect("printed module should parse")
}

#[test]
fn test_samples_survive_printing() {
    for (name, source) in SAMPLES {
        let module = parse_module(source).unwrap_or_else(|e| panic!("{name}: {e}"));
        let printed = module.to_string();
        assert_eq!(reparse(&module).to_string(), printed, "{name}");
    }
}

#[test]
fn test_sample_shapes() {
    let module = parse_module(SAMPLES[2].1).unwrap();
    assert_eq!(module.functions().len(), 2);

    let select = module.function("select").unwrap();
    let graph = BlockGraph::new(select);
    let entry = select.entry().unwrap();
    assert_eq!(graph.successors(entry).count(), 2);
    assert!(graph.unreachable_blocks().is_empty());

    let dominance = graph.dominance().unwrap();
    for block in select.blocks() {
        assert!(dominance.dominates(entry, block));
    }
}

#[test]
fn test_generated_code_round_trips() {
    let source = indoc! {"
        fn @f() -> i64 {
        canary.prologue: !gen(prologue)
          %buf.canary = alloca ptr, 2 !gen(canary %buf)
          %buf = alloca i8, 32 !protect(16) !src
          %canary.idx = alloca i64 !gen(loop-index)
          %guard = load volatile ptr, @__stack_chk_guard !gen(guard-read)
          canary.mark %guard, %buf.canary, %buf !gen(mark)
          br entry
        entry:
          ret i64 0
        canary.fail: !gen(failure)
          call @__stack_chk_fail()
          unreachable
        }
    "};
    let module = parse_module(source).unwrap();
    let printed = module.to_string();
    assert_eq!(reparse(&module).to_string(), printed);
    assert!(printed.contains("!gen(canary %buf)"));
}

#[test]
fn test_errors_carry_line_numbers() {
    let err = parse_module(indoc! {"
        fn @f() {
        entry:
          %x = frobnicate i64 1
          ret
        }
    "})
    .unwrap_err();
    assert!(matches!(err, ParseError::Syntax { line: 3, .. }), "{err:?}");

    let err = parse_module(indoc! {"
        fn @f() {
        entry:
          br nowhere
        }
    "})
    .unwrap_err();
    assert!(matches!(err, ParseError::UndefinedBlock { .. }), "{err:?}");
}
