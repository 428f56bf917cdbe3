use std::collections::BTreeMap;

use maplit::btreemap;

use wam_resolution::{CompileError, EngineError, MachineConfig, MachineError, ResolutionEngine};

const FAMILY: &str = "
parent(tom, bob).
parent(bob, ann).
grandparent(X, Z) :- parent(X, Y), parent(Y, Z).
";

const LISTS: &str = "
member(X, [X | _]).
member(X, [_ | T]) :- member(X, T).

len([], 0).
len([_ | T], N) :- len(T, M), N is M + 1.
";

fn engine_with(program: &str) -> ResolutionEngine {
  let mut engine = ResolutionEngine::new().unwrap();
  engine.consult(program).unwrap();
  engine
}

/// Every solution of `query` as name to value maps.
fn solve(engine: &mut ResolutionEngine, query: &str) -> Vec<BTreeMap<String, String>> {
  engine.query(query)
        .unwrap()
        .map(|solution| solution.unwrap().texts())
        .collect()
}

fn s(text: &str) -> String {
  text.to_string()
}

#[test]
fn grandparent_has_exactly_one_solution() {
  let mut engine = engine_with(FAMILY);
  assert_eq!(solve(&mut engine, "grandparent(tom, W)"), vec![btreemap!{ s("W") => s("ann") }]);
  assert_eq!(solve(&mut engine, "grandparent(W, ann)"), vec![btreemap!{ s("W") => s("tom") }]);
  assert!(solve(&mut engine, "grandparent(ann, W)").is_empty());
}

#[test]
fn member_succeeds_and_fails_without_machine_errors() {
  let mut engine = engine_with(LISTS);

  let found: Vec<_> = engine.query("member(2, [1, 2, 3])").unwrap().collect();
  assert_eq!(found.len(), 1);
  assert!(found[0].as_ref().unwrap().is_empty());

  let missing: Vec<_> = engine.query("member(4, [1, 2, 3])").unwrap().collect();
  assert!(missing.is_empty());
}

#[test]
fn member_enumerates_in_clause_order() {
  let mut engine = engine_with(LISTS);
  assert_eq!(
    solve(&mut engine, "member(X, [1, 2, 3])"),
    vec![
      btreemap!{ s("X") => s("1") },
      btreemap!{ s("X") => s("2") },
      btreemap!{ s("X") => s("3") },
    ]
  );
}

#[test]
fn arithmetic_and_indexing() {
  let mut engine = engine_with(LISTS);
  assert_eq!(solve(&mut engine, "len([a, b, c], N)"), vec![btreemap!{ s("N") => s("3") }]);
  assert_eq!(
    solve(&mut engine, "A is 7 / 2, B is 6 / 2, C is 7 mod -2, D is max(3, 4.5)"),
    vec![btreemap!{ s("A") => s("3.5"), s("B") => s("3"), s("C") => s("-1"), s("D") => s("4.5") }]
  );
  // Division by zero is a failure, not an error.
  assert!(solve(&mut engine, "X is 1 // 0").is_empty());
  assert!(solve(&mut engine, "3 < 2").is_empty());
}

#[test]
fn cut_commits_to_the_first_choice() {
  let mut engine = engine_with(&format!("{}\nfirst(X, L) :- member(X, L), !.", LISTS));
  assert_eq!(solve(&mut engine, "first(X, [a, b, c])"), vec![btreemap!{ s("X") => s("a") }]);
}

#[test]
fn cut_is_local_to_its_clause() {
  let mut engine = engine_with(&format!(
    "{}\nfirst(X, L) :- member(X, L), !.\nboth(X, Y) :- member(X, [1, 2]), first(Y, [a, b]).",
    LISTS
  ));
  assert_eq!(
    solve(&mut engine, "both(X, Y)"),
    vec![
      btreemap!{ s("X") => s("1"), s("Y") => s("a") },
      btreemap!{ s("X") => s("2"), s("Y") => s("a") },
    ]
  );
}

#[test]
fn if_then_else_and_disjunction() {
  let mut engine = engine_with("
    max(X, Y, Z) :- ( X >= Y -> Z = X ; Z = Y ).
    colour(C) :- ( C = red ; C = green ).
  ");
  assert_eq!(solve(&mut engine, "max(3, 5, M)"), vec![btreemap!{ s("M") => s("5") }]);
  assert_eq!(solve(&mut engine, "max(7, 2, M)"), vec![btreemap!{ s("M") => s("7") }]);
  assert_eq!(
    solve(&mut engine, "colour(C)"),
    vec![btreemap!{ s("C") => s("red") }, btreemap!{ s("C") => s("green") }]
  );
}

#[test]
fn negation_as_failure() {
  let mut engine = engine_with(&format!("{}\nabsent(X, L) :- \\+ member(X, L).", LISTS));
  assert_eq!(solve(&mut engine, "absent(4, [1, 2, 3])").len(), 1);
  assert!(solve(&mut engine, "absent(2, [1, 2, 3])").is_empty());
}

#[test]
fn control_constructs_work_when_meta_called() {
  let mut engine = engine_with(LISTS);
  assert_eq!(
    solve(&mut engine, "G = member(X, [1, 2]), call(G)"),
    vec![btreemap!{ s("G") => s("member(1, [1, 2])"), s("X") => s("1") },
         btreemap!{ s("G") => s("member(2, [1, 2])"), s("X") => s("2") }]
  );
  assert_eq!(
    solve(&mut engine, "G = (X = 1 ; X = 2), call(G), X > 1"),
    vec![btreemap!{ s("G") => s(";(=(2, 1), =(2, 2))"), s("X") => s("2") }]
  );
}

#[test]
fn structures_and_partial_lists_read_back() {
  let mut engine = engine_with("wrap(X, box(X, [X | T]), T).");
  assert_eq!(
    solve(&mut engine, "wrap(f(a), B, [])"),
    vec![btreemap!{ s("B") => s("box(f(a), [f(a)])") }]
  );
  assert_eq!(solve(&mut engine, "wrap(1, B, T)"), vec![btreemap!{ s("B") => s("box(1, [1 | T])") }]);
}

#[test]
fn consulting_again_appends_clauses() {
  let mut engine = engine_with("p(1).");
  engine.consult("p(2).").unwrap();
  assert_eq!(
    solve(&mut engine, "p(X)"),
    vec![btreemap!{ s("X") => s("1") }, btreemap!{ s("X") => s("2") }]
  );
}

#[test]
fn undefined_predicates_are_reported_and_fail() {
  let mut engine = ResolutionEngine::new().unwrap();
  match engine.consult("q :- undefined_goal.") {
    Err(EngineError::Compile(errors)) => assert_eq!(
      errors,
      vec![CompileError::UnresolvedReference{ predicate: s("undefined_goal/0") }]
    ),
    other => panic!("expected an unresolved reference, got {:?}", other.map(|queries| queries.len())),
  }
  assert!(solve(&mut engine, "q").is_empty());
}

#[test]
fn syntax_errors_do_not_stop_the_batch() {
  let mut engine = ResolutionEngine::new().unwrap();
  let result = engine.consult("a(1).\na(2 3).\na(4).");
  match result {
    Err(EngineError::Compile(errors)) => {
      assert_eq!(errors.len(), 1);
      assert!(matches!(errors[0], CompileError::SourceCode{ .. }));
    }
    other => panic!("expected a syntax error, got {:?}", other.map(|queries| queries.len())),
  }
  assert_eq!(
    solve(&mut engine, "a(X)"),
    vec![btreemap!{ s("X") => s("1") }, btreemap!{ s("X") => s("4") }]
  );
}

#[test]
fn occurs_check_is_configurable() {
  let mut plain = ResolutionEngine::new().unwrap();
  assert_eq!(plain.query("X = f(Y), Y = a").unwrap().count(), 1);

  let mut checked = ResolutionEngine::with_config(MachineConfig::default().with_occurs_check(true)).unwrap();
  assert_eq!(checked.query("X = f(X)").unwrap().count(), 0);
}

#[test]
fn indexing_does_not_change_answers() {
  let program = "
    colour(red, warm).
    colour(blue, cold).
    colour(orange, warm).
    colour(f(x), odd).
    colour(f(y), odder).
  ";
  let mut indexed = engine_with(program);
  let mut plain = ResolutionEngine::with_config(MachineConfig::default().with_first_argument_indexing(false)).unwrap();
  plain.consult(program).unwrap();

  for query in ["colour(red, T)", "colour(C, warm)", "colour(f(Z), T)", "colour(green, T)"].iter() {
    assert_eq!(solve(&mut indexed, query), solve(&mut plain, query), "{}", query);
  }
  assert_eq!(
    solve(&mut indexed, "colour(C, warm)"),
    vec![btreemap!{ s("C") => s("red") }, btreemap!{ s("C") => s("orange") }]
  );
}

#[test]
fn disassembly_lists_loaded_predicates() {
  let engine = engine_with(LISTS);
  let listing = engine.disassemble().unwrap();
  assert!(listing.contains("member/2"));
  assert!(listing.contains("try_me_else"));
  assert!(listing.contains("switch_on_term"));
}

#[test]
fn deterministic_recursion_runs_in_constant_environment_space() {
  let mut engine = engine_with("
    count(N, N) :- !.
    count(I, N) :- J is I + 1, count(J, N).
  ");
  assert_eq!(solve(&mut engine, "count(0, 300000)").len(), 1);
}

#[test]
fn tail_calls_inside_if_then_else_are_last_calls() {
  let mut engine = engine_with("loop(I, N) :- ( I >= N -> true ; J is I + 1, loop(J, N) ).");
  assert_eq!(solve(&mut engine, "loop(0, 300000)").len(), 1);
}

#[test]
fn long_lists_are_built_read_back_and_printed() {
  let mut engine = engine_with("
    mk(0, []) :- !.
    mk(N, [N | T]) :- M is N - 1, mk(M, T).
  ");
  let solutions = solve(&mut engine, "mk(2000, L)");
  assert_eq!(solutions.len(), 1);
  let text = &solutions[0]["L"];
  assert!(text.starts_with("[2000, 1999, "), "{}", &text[..20]);
  assert!(text.ends_with(", 2, 1]"));
}

#[test]
fn cyclic_bindings_report_term_depth() {
  let mut engine = ResolutionEngine::new().unwrap();
  let results: Vec<_> = engine.query("X = f(X)").unwrap().collect();
  assert_eq!(results.len(), 1);
  assert!(matches!(results[0], Err(MachineError::TermDepth(_))));
}

#[test]
fn query_code_does_not_fill_the_code_area() {
  let library = ResolutionEngine::new().unwrap().code_area().insertion_point() as usize;
  let config = MachineConfig::default().with_code_capacity(library + 512);
  let mut engine = ResolutionEngine::with_config(config).unwrap();
  engine.consult("p(1).\np(2).").unwrap();
  let loaded = engine.code_area().insertion_point();

  for _ in 0..1000 {
    assert_eq!(solve(&mut engine, "p(X), X > 1"), vec![btreemap!{ s("X") => s("2") }]);
  }
  assert_eq!(engine.code_area().insertion_point(), loaded);
}

#[test]
fn cut_inside_call_is_local_to_the_call() {
  let mut engine = engine_with(LISTS);
  assert_eq!(
    solve(&mut engine, "call((member(X, [1, 2, 3]), !))"),
    vec![btreemap!{ s("X") => s("1") }]
  );
  assert_eq!(solve(&mut engine, "\\+ (member(X, [1, 2]), !, X == 2)").len(), 1);
  assert_eq!(
    solve(&mut engine, "G = (member(X, [1, 2, 3]), !), G")
      .into_iter()
      .map(|solution| solution["X"].clone())
      .collect::<Vec<_>>(),
    vec![s("1")]
  );
  assert_eq!(
    solve(&mut engine, "member(Y, [a, b]), call((member(X, [1, 2]), !))").len(),
    2
  );
}

#[test]
fn long_list_literals_compile() {
  let items: Vec<String> = (1..=300).map(|i| i.to_string()).collect();
  let list = format!("[{}]", items.join(", "));
  let mut engine = engine_with(&format!("{}\nbig({}).", LISTS, list));

  assert_eq!(solve(&mut engine, &format!("len({}, N)", list)), vec![btreemap!{ s("N") => s("300") }]);
  assert_eq!(solve(&mut engine, "big(L), len(L, N)")[0]["N"], s("300"));
}

#[test]
fn atoms_print_quoted_when_needed() {
  let mut engine = ResolutionEngine::new().unwrap();
  assert_eq!(
    solve(&mut engine, "X = 'hello world', Y = [], Z = 'Abc'"),
    vec![btreemap!{ s("X") => s("'hello world'"), s("Y") => s("[]"), s("Z") => s("'Abc'") }]
  );
}
