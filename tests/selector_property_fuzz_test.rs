use proptest::collection::vec;
use proptest::prelude::*;
use proptest::test_runner::{FileFailurePersistence, TestCaseResult};
use selector_observer::{NodeId, ObserveOptions, Page};
use std::cell::RefCell;
use std::rc::Rc;

const SELECTOR_PROPTEST_REGRESSION_FILE: &str =
    "tests/proptest-regressions/selector_property_fuzz_test.txt";
const DEFAULT_SELECTOR_PROPTEST_CASES: u32 = 256;

fn env_proptest_cases(var_name: &str, default_cases: u32) -> u32 {
    std::env::var(var_name)
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default_cases)
}

fn selector_proptest_cases() -> u32 {
    env_proptest_cases(
        "SELECTOR_OBSERVER_PROPTEST_CASES",
        DEFAULT_SELECTOR_PROPTEST_CASES,
    )
}

fn nth_matches_oracle(a: i64, b: i64, position: i64) -> bool {
    let diff = position - b;
    if a == 0 {
        return diff == 0;
    }
    if a > 0 {
        diff >= 0 && diff % a == 0
    } else {
        diff <= 0 && diff % a == 0
    }
}

fn assert_nth_child_agrees_with_formula(a: i64, b: i64, count: usize) -> TestCaseResult {
    let mut page = Page::new();
    let body = page.body();
    let ul = page.create_element("ul");
    page.append_child(body, ul)
        .map_err(|err| proptest::test_runner::TestCaseError::fail(format!("{err:?}")))?;
    let mut items = Vec::new();
    for _ in 0..count {
        let li = page.create_element("li");
        page.append_child(ul, li)
            .map_err(|err| proptest::test_runner::TestCaseError::fail(format!("{err:?}")))?;
        items.push(li);
    }

    let selector = if a == 0 {
        format!("li:nth-child({b})")
    } else {
        format!("li:nth-child({a}n{b:+})")
    };
    let matched = page
        .query_all(body, &selector)
        .map_err(|err| proptest::test_runner::TestCaseError::fail(format!("{err:?}")))?;

    let expected: Vec<NodeId> = items
        .iter()
        .enumerate()
        .filter(|(index, _)| nth_matches_oracle(a, b, *index as i64 + 1))
        .map(|(_, li)| *li)
        .collect();
    prop_assert_eq!(matched, expected, "selector {} over {} items", selector, count);
    Ok(())
}

#[derive(Clone, Debug)]
struct TreeOp {
    parent_choice: usize,
    tag_index: usize,
    with_class: bool,
    with_shadow: bool,
}

fn tree_op_strategy() -> BoxedStrategy<TreeOp> {
    (0..64usize, 0..3usize, any::<bool>(), any::<bool>())
        .prop_map(|(parent_choice, tag_index, with_class, with_shadow)| TreeOp {
            parent_choice,
            tag_index,
            with_class,
            with_shadow,
        })
        .boxed()
}

fn tree_ops_strategy() -> BoxedStrategy<Vec<TreeOp>> {
    vec(tree_op_strategy(), 1..=32).boxed()
}

const TREE_TAGS: [&str; 3] = ["div", "span", "p"];

fn build_tree(page: &mut Page, ops: &[TreeOp]) -> selector_observer::Result<()> {
    let mut parents = vec![page.body()];
    for op in ops {
        let parent = parents[op.parent_choice % parents.len()];
        let node = page.create_element(TREE_TAGS[op.tag_index % TREE_TAGS.len()]);
        if op.with_class {
            page.set_attribute(node, "class", "t")?;
        }
        page.append_child(parent, node)?;
        parents.push(node);
        if op.with_shadow {
            let shadow = page.attach_shadow(node)?;
            parents.push(shadow);
        }
    }
    page.tick();
    Ok(())
}

fn assert_initial_scan_equals_snapshot(ops: &[TreeOp], selector: &str) -> TestCaseResult {
    let mut page = Page::new();
    build_tree(&mut page, ops)
        .map_err(|err| proptest::test_runner::TestCaseError::fail(format!("{err:?}")))?;
    let body = page.body();

    let snapshot = page
        .query_all(body, selector)
        .map_err(|err| proptest::test_runner::TestCaseError::fail(format!("{err:?}")))?;

    let delivered: Rc<RefCell<Vec<NodeId>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&delivered);
    let options = ObserveOptions::new(move |matched: &[NodeId]| {
        sink.borrow_mut().extend_from_slice(matched);
    });
    page.observe(body, selector, options)
        .map_err(|err| proptest::test_runner::TestCaseError::fail(format!("{err:?}")))?;

    prop_assert_eq!(
        delivered.borrow().clone(),
        snapshot,
        "selector {} over {} ops",
        selector,
        ops.len()
    );
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: selector_proptest_cases(),
        failure_persistence: Some(Box::new(
            FileFailurePersistence::Direct(SELECTOR_PROPTEST_REGRESSION_FILE),
        )),
        .. ProptestConfig::default()
    })]

    #[test]
    fn nth_child_selection_matches_formula(
        a in -4i64..=4,
        b in -3i64..=8,
        count in 1usize..=10,
    ) {
        assert_nth_child_agrees_with_formula(a, b, count)?;
    }

    #[test]
    fn observe_initial_scan_equals_query_snapshot(ops in tree_ops_strategy()) {
        assert_initial_scan_equals_snapshot(&ops, ".t")?;
    }

    #[test]
    fn observe_initial_scan_equals_query_snapshot_by_tag(ops in tree_ops_strategy()) {
        assert_initial_scan_equals_snapshot(&ops, "span")?;
    }
}
