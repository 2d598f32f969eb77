//! End-to-end compilation of small but complete formsets.

use vfr_core::opcode::{BinaryOp, Constant, Opcode, RuleId};
use vfr_core::symbols::VarLocation;
use vfr_core::{
    compile, lex, parse_expression, CompiledUnit, OpcodeNode, ParserConfig, Reference, VfrError,
};

/// Ten lines of declarations; the form body starts on line 11.
const HEADER: &str = "typedef struct {
  UINT8  Enable;
  UINT16 Timeout;
  UINT32 Values[4];
} SETUP_DATA;

formset guid = {0x12345678, 0x1234, 0x5678, {0x9a, 0xbc, 0xde, 0xf0, 0x12, 0x34, 0x56, 0x78}},
  title = STRING_TOKEN(1), help = STRING_TOKEN(2),
  varstore SETUP_DATA, name = Setup, guid = {0x12345678, 0x1234, 0x5678, {0x9a, 0xbc, 0xde, 0xf0, 0x12, 0x34, 0x56, 0x78}};
  form formid = 1, title = STRING_TOKEN(3);
";

fn source(body: &str) -> String {
    format!("{}{}\n  endform;\nendformset;\n", HEADER, body)
}

fn build(body: &str) -> Result<CompiledUnit, VfrError> {
    compile(&source(body), &ParserConfig::default())
}

fn form_body(unit: &CompiledUnit) -> Vec<OpcodeNode> {
    let form = unit
        .formset
        .body()
        .iter()
        .find(|n| matches!(n.op, Opcode::Form { .. }))
        .cloned()
        .expect("form");
    form.body().to_vec()
}

// ──────────────────────────────────────────────
// Questions and storage
// ──────────────────────────────────────────────

#[test]
fn numeric_on_a_word_field() {
    let unit = build(
        "    numeric varid = Setup.Timeout, prompt = STRING_TOKEN(4), help = STRING_TOKEN(5),
      minimum = 1, maximum = 10, step = 1,
    endnumeric;",
    )
    .unwrap();
    let body = form_body(&unit);
    assert_eq!(body.len(), 1);
    match &body[0].op {
        Opcode::Numeric(op) => {
            let range = op.range.expect("range");
            assert_eq!((range.min, range.max, range.step), (1, 10, 1));
            let storage = op.header.storage.as_ref().expect("storage");
            assert_eq!(storage.width(), Some(2));
            assert_eq!(storage.location, VarLocation::Offset(2));
        }
        other => panic!("expected numeric, got {:?}", other),
    }
    assert_eq!(body[0].line, 11);
}

#[test]
fn array_element_offsets_scale_by_element_size() {
    let unit = build(
        "    numeric varid = Setup.Values[2], prompt = STRING_TOKEN(4), help = STRING_TOKEN(5),
      minimum = 0, maximum = 100,
    endnumeric;",
    )
    .unwrap();
    let header = form_body(&unit)[0].op.question_header().cloned().unwrap();
    let storage = header.storage.unwrap();
    assert_eq!(storage.location, VarLocation::Offset(4 + 2 * 4));
    assert_eq!(storage.width(), Some(4));
}

#[test]
fn array_index_past_the_end_is_rejected() {
    let err = build(
        "    numeric varid = Setup.Values[4], prompt = STRING_TOKEN(4), help = STRING_TOKEN(5),
      minimum = 0, maximum = 100,
    endnumeric;",
    )
    .unwrap_err();
    assert!(matches!(err, VfrError::MalformedLiteral { line: 11, .. }), "{:?}", err);
}

#[test]
fn missing_end_keyword_points_after_the_last_item() {
    let err = build(
        "    checkbox varid = Setup.Enable, prompt = STRING_TOKEN(4), help = STRING_TOKEN(5),
      default = 1,",
    )
    .unwrap_err();
    assert!(matches!(err, VfrError::Syntax { line: 13, .. }), "{:?}", err);
}

#[test]
fn undeclared_field_in_a_condition_is_named() {
    let err = build(
        "    suppressif ideqval Setup.Field == 5;
      text help = STRING_TOKEN(4), text = STRING_TOKEN(4);
    endif;",
    )
    .unwrap_err();
    assert_eq!(err, VfrError::undeclared(11, "Field"));
}

#[test]
fn sibling_suppressif_blocks_stay_separate() {
    let unit = build(
        "    checkbox varid = Setup.Enable, prompt = STRING_TOKEN(4), help = STRING_TOKEN(5),
    endcheckbox;
    suppressif ideqval Setup.Enable == 0;
      numeric varid = Setup.Timeout, prompt = STRING_TOKEN(6), help = STRING_TOKEN(7),
        minimum = 1, maximum = 10,
      endnumeric;
    endif;
    suppressif TRUE;
      text help = STRING_TOKEN(8), text = STRING_TOKEN(8);
      text help = STRING_TOKEN(9), text = STRING_TOKEN(9);
    endif;",
    )
    .unwrap();
    let body = form_body(&unit);
    assert_eq!(body.len(), 3);

    let first = body[1].body();
    assert_eq!(body[1].op, Opcode::SuppressIf);
    assert!(matches!(first[0].op, Opcode::EqIdVal { value: 0, .. }));
    assert!(matches!(first[1].op, Opcode::Numeric(_)));
    assert_eq!(first.len(), 2);

    let second = body[2].body();
    assert_eq!(body[2].op, Opcode::SuppressIf);
    assert_eq!(second[0].op, Opcode::Constant(Constant::True));
    assert_eq!(second.len(), 3);
    assert!(second[1..].iter().all(|n| matches!(n.op, Opcode::Text { .. })));
}

// ──────────────────────────────────────────────
// Forward references
// ──────────────────────────────────────────────

#[test]
fn forward_rule_reference_matches_a_later_use() {
    let unit = build(
        "    suppressif ruleref(Hidden);
      text help = STRING_TOKEN(4), text = STRING_TOKEN(4);
    endif;
    rule Hidden, TRUE endrule;
    grayoutif ruleref(Hidden);
      text help = STRING_TOKEN(5), text = STRING_TOKEN(5);
    endif;",
    )
    .unwrap();
    let mut refs = Vec::new();
    unit.formset.walk(&mut |n| {
        if let Opcode::RuleRef { rule } = &n.op {
            refs.push(rule.clone());
        }
    });
    assert_eq!(
        refs,
        vec![Reference::Resolved(RuleId(0)), Reference::Resolved(RuleId(0))]
    );
}

#[test]
fn forward_question_reference_resolves() {
    let unit = build(
        "    grayoutif ideqval Toggle == 1;
      text help = STRING_TOKEN(4), text = STRING_TOKEN(4);
    endif;
    checkbox name = Toggle, varid = Setup.Enable, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),
    endcheckbox;",
    )
    .unwrap();
    let toggle = unit.symbols.find_question("Toggle").unwrap();
    let cond = &form_body(&unit)[0].children[0];
    assert_eq!(
        cond.op,
        Opcode::EqIdVal {
            question: Reference::Resolved(toggle),
            value: 1
        }
    );
}

#[test]
fn reference_to_a_question_that_never_appears_fails() {
    let err = build(
        "    grayoutif ideqval Ghost == 1;
      text help = STRING_TOKEN(4), text = STRING_TOKEN(4);
    endif;",
    )
    .unwrap_err();
    assert_eq!(err, VfrError::undeclared(11, "Ghost"));
}

// ──────────────────────────────────────────────
// Tree shape
// ──────────────────────────────────────────────

#[test]
fn every_scope_with_a_body_ends_once() {
    let unit = build(
        "    subtitle text = STRING_TOKEN(4);
    checkbox varid = Setup.Enable, prompt = STRING_TOKEN(4), help = STRING_TOKEN(5),
      default = 1,
    endcheckbox;
    oneof varid = Setup.Timeout, prompt = STRING_TOKEN(6), help = STRING_TOKEN(7),
      option text = STRING_TOKEN(8), value = 1, flags = DEFAULT;
      option text = STRING_TOKEN(9), value = 2, flags = 0;
    endoneof;
    rule Always, TRUE endrule;
    disableif ruleref(Always);
      grayoutif NOT ideqval Setup.Enable == 1;
        numeric varid = Setup.Values[0], prompt = STRING_TOKEN(10), help = STRING_TOKEN(11),
          minimum = 0, maximum = 0xffff,
          inconsistentif prompt = STRING_TOKEN(12), ideqval Setup.Values[0] == 7 endif;
        endnumeric;
      endif;
    endif;",
    )
    .unwrap();

    let mut scopes = 0;
    unit.formset.walk(&mut |n| {
        if n.op.opens_scope() && !n.children.is_empty() {
            scopes += 1;
            let ends = n.children.iter().filter(|c| c.op == Opcode::End).count();
            assert_eq!(ends, 1, "{:?} at line {}", n.op, n.line);
            assert_eq!(n.children.last().unwrap().op, Opcode::End);
        }
    });
    assert!(scopes >= 9, "only {} scopes", scopes);
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let tokens = lex("1 + 2 * 3").unwrap();
    let root = parse_expression(&tokens, &ParserConfig::default())
        .unwrap()
        .root;
    assert_eq!(root.op, Opcode::Binary(BinaryOp::Add));
    assert_eq!(root.children[0].op, Opcode::Constant(Constant::uint(1)));
    assert_eq!(root.children[1].op, Opcode::Binary(BinaryOp::Multiply));
}

#[test]
fn depth_limit_comes_from_the_config() {
    let src = source(
        "    suppressif ((((TRUE))));
      text help = STRING_TOKEN(4), text = STRING_TOKEN(4);
    endif;",
    );
    assert!(compile(&src, &ParserConfig::default()).is_ok());
    let shallow = ParserConfig {
        max_depth: 3,
        ..ParserConfig::default()
    };
    assert!(matches!(
        compile(&src, &shallow).unwrap_err(),
        VfrError::Syntax { line: 11, .. }
    ));
}

#[test]
fn oversized_array_in_a_typedef_is_malformed() {
    let src = HEADER.replacen(
        "  UINT32 Values[4];",
        "  UINT32 Values[4];\n  UINT64 Big[0x20000000];",
        1,
    );
    let err = compile(&format!("{}  endform;\nendformset;\n", src), &ParserConfig::default())
        .unwrap_err();
    assert!(matches!(err, VfrError::MalformedLiteral { line: 5, .. }), "{:?}", err);
}

#[test]
fn default_pack_outside_the_pragma_values_fails_before_parsing() {
    for pack in [0, 3] {
        let config = ParserConfig {
            default_pack: pack,
            ..ParserConfig::default()
        };
        let err = compile(&source(""), &config).unwrap_err();
        assert!(matches!(err, VfrError::Config { .. }), "{:?}", err);
    }
}

#[test]
fn long_condition_chain_is_bounded_by_the_depth_limit() {
    let chain = vec!["ideqval Setup.Enable == 1"; 200].join(" OR ");
    let err = build(&format!(
        "    suppressif {};\n      text help = STRING_TOKEN(4), text = STRING_TOKEN(4);\n    endif;",
        chain
    ))
    .unwrap_err();
    assert!(matches!(err, VfrError::Syntax { line: 11, .. }), "{:?}", err);
}

#[test]
fn compiled_tree_serializes_to_json() {
    let unit = build(
        "    checkbox varid = Setup.Enable, prompt = STRING_TOKEN(4), help = STRING_TOKEN(5),
    endcheckbox;",
    )
    .unwrap();
    let value = serde_json::to_value(&unit.formset).unwrap();
    assert_eq!(value["line"], 7);
    assert!(value["op"]["FormSet"].is_object());
    let text = value.to_string();
    assert!(text.contains("CheckBox"));
    assert!(text.contains("\"End\""));
}
