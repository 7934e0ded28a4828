//! Integration Tests for Reactive System
//!
//! These tests verify that sources, deriveds and effects work together
//! correctly through the public runtime API.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cascade_core::reactive::{
    Derived, Equality, NodeId, ReactiveError, Runtime, Source, Status,
};

fn counter() -> Rc<Cell<usize>> {
    Rc::new(Cell::new(0))
}

/// Walk through the canonical source/derived lifecycle.
#[test]
fn doubled_source_scenario() {
    let rt = Runtime::new();
    let s = rt.source(1);
    let calls = counter();
    let calls_clone = calls.clone();
    let a = rt.derived(move |rt| {
        calls_clone.set(calls_clone.get() + 1);
        Ok(rt.get(&s)? * 2)
    });

    assert_eq!(rt.status(a), Status::Dirty);
    assert_eq!(rt.version(&a), 0);

    // First read computes S*2.
    assert_eq!(rt.get(&a).unwrap(), 2);
    assert_eq!(rt.version(&a), 1);
    assert_eq!(calls.get(), 1);

    // Writing the same value is not a change.
    assert!(!rt.set(&s, 1).unwrap());
    assert_eq!(rt.get(&a).unwrap(), 2);
    assert_eq!(rt.version(&a), 1);
    assert_eq!(calls.get(), 1);

    // A real change recomputes on next read.
    assert!(rt.set(&s, 5).unwrap());
    assert_eq!(rt.get(&a).unwrap(), 10);
    assert_eq!(rt.version(&a), 2);
    assert_eq!(calls.get(), 2);
}

/// The same scenario under an owner, where the derived settles `Clean`.
#[test]
fn owned_derived_becomes_clean() {
    let rt = Runtime::new();
    let s = rt.source(1);
    let (root, a) = rt.root(|rt| rt.derived(move |rt| Ok(rt.get(&s)? * 2)));

    assert!(!rt.is_unowned(&a));
    assert_eq!(rt.owner(a), Some(root.id()));
    assert_eq!(rt.get(&a).unwrap(), 2);
    assert_eq!(rt.status(a), Status::Clean);

    rt.set(&s, 5).unwrap();
    assert_eq!(rt.status(a), Status::Dirty);
    assert_eq!(rt.get(&a).unwrap(), 10);
    assert_eq!(rt.status(a), Status::Clean);
    assert_eq!(rt.version(&a), 2);
}

/// Equal recomputation results keep the version and the cached allocation.
#[test]
fn memoization_hides_equal_results() {
    let rt = Runtime::new();
    let s = rt.source(3);
    let parity = rt.derived(move |rt| Ok(format!("odd={}", rt.get(&s)? % 2 == 1)));
    let downstream_calls = counter();
    let calls_clone = downstream_calls.clone();
    let shout = rt.derived(move |rt| {
        calls_clone.set(calls_clone.get() + 1);
        Ok(rt.read(&parity)?.to_uppercase())
    });

    let first = rt.read(&parity).unwrap();
    assert_eq!(rt.get(&shout).unwrap(), "ODD=TRUE");
    let clock = rt.clock();

    rt.set(&s, 5).unwrap();
    let second = rt.read(&parity).unwrap();
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(rt.version(&parity), 1);
    assert_eq!(rt.clock(), clock + 1, "only the source write advanced the clock");

    assert_eq!(rt.get(&shout).unwrap(), "ODD=TRUE");
    assert_eq!(downstream_calls.get(), 1, "downstream saw no change");
}

/// Deriveds form chains and diamonds; each node computes once per change.
#[test]
fn diamond_recomputes_each_node_once() {
    let rt = Runtime::new();
    let s = rt.source(1);
    let left_calls = counter();
    let right_calls = counter();
    let join_calls = counter();

    let lc = left_calls.clone();
    let left = rt.derived(move |rt| {
        lc.set(lc.get() + 1);
        Ok(rt.get(&s)? + 1)
    });
    let rc = right_calls.clone();
    let right = rt.derived(move |rt| {
        rc.set(rc.get() + 1);
        Ok(rt.get(&s)? * 10)
    });
    let jc = join_calls.clone();
    let join = rt.derived(move |rt| {
        jc.set(jc.get() + 1);
        Ok(rt.get(&left)? + rt.get(&right)?)
    });

    assert_eq!(rt.get(&join).unwrap(), 12);
    rt.set(&s, 2).unwrap();
    assert_eq!(rt.get(&join).unwrap(), 23);

    assert_eq!(left_calls.get(), 2);
    assert_eq!(right_calls.get(), 2);
    assert_eq!(join_calls.get(), 2);
    assert_eq!(rt.dependencies(join), vec![left.id(), right.id()]);
}

/// Dependency sets are replaced, never merged.
#[test]
fn dynamic_dependencies_are_replaced() {
    let rt = Runtime::new();
    let flag = rt.source(true);
    let a = rt.source(1);
    let b = rt.source(2);
    let pick = rt.derived(move |rt| {
        if rt.get(&flag)? {
            rt.get(&a)
        } else {
            rt.get(&b)
        }
    });

    assert_eq!(rt.get(&pick).unwrap(), 1);
    assert_eq!(rt.subscriber_count(a), 1);
    assert_eq!(rt.subscriber_count(b), 0);

    rt.set(&flag, false).unwrap();
    assert_eq!(rt.get(&pick).unwrap(), 2);
    assert_eq!(rt.dependencies(pick), vec![flag.id(), b.id()]);
    assert_eq!(rt.subscriber_count(a), 0);
    assert_eq!(rt.subscriber_count(b), 1);

    // The abandoned branch no longer invalidates the derived.
    rt.set(&a, 100).unwrap();
    assert_ne!(rt.status(pick), Status::Dirty);
}

/// A child built in one branch is disposed before the other branch runs.
#[test]
fn conditional_child_is_disposed_on_branch_switch() {
    let rt = Runtime::new();
    let flag = rt.source(true);
    let inner_source = rt.source(7);
    let created: Rc<RefCell<Vec<NodeId>>> = Rc::new(RefCell::new(Vec::new()));
    let created_clone = created.clone();

    let (_root, outer) = rt.root(|rt| {
        rt.derived(move |rt| {
            if rt.get(&flag)? {
                let child: Derived<i32> = rt.derived(move |rt| rt.get(&inner_source));
                created_clone.borrow_mut().push(child.id());
                rt.get(&child)
            } else {
                Ok(0)
            }
        })
    });

    assert_eq!(rt.get(&outer).unwrap(), 7);
    let child = created.borrow()[0];
    assert_eq!(rt.children(outer), vec![child]);
    assert_eq!(rt.subscriber_count(inner_source), 1);

    rt.set(&flag, false).unwrap();
    assert_eq!(rt.get(&outer).unwrap(), 0);

    assert_eq!(rt.status(child), Status::Destroyed);
    assert!(rt.children(outer).is_empty());
    assert_eq!(rt.subscriber_count(inner_source), 0);
    assert_eq!(created.borrow().len(), 1);
}

/// Children are recreated, not accumulated, across recomputations.
#[test]
fn children_do_not_accumulate() {
    let rt = Runtime::new();
    let s = rt.source(0);
    let outer = rt.derived(move |rt| {
        let n = rt.get(&s)?;
        let child = rt.derived(move |_| Ok(n + 1));
        rt.get(&child)
    });

    for i in 0..5 {
        rt.set(&s, i).unwrap();
        assert_eq!(rt.get(&outer).unwrap(), i + 1);
        assert_eq!(rt.children(outer).len(), 1);
    }
    // s, outer and the single live child.
    assert_eq!(rt.node_count(), 3);
}

/// Indirect self-reference through another derived is rejected.
#[test]
fn indirect_self_reference_is_rejected() {
    let rt = Runtime::new();
    let slot: Rc<Cell<Option<Derived<i32>>>> = Rc::new(Cell::new(None));

    let slot_clone = slot.clone();
    let a = rt.derived(move |rt| match slot_clone.get() {
        Some(b) => Ok(rt.get(&b)? + 1),
        None => Ok(0),
    });
    let b = rt.derived(move |rt| Ok(rt.get(&a)? + 1));
    slot.set(Some(b));

    let err = rt.get(&a).unwrap_err();
    assert!(err.is_self_reference());
    match err {
        ReactiveError::SelfReference { node, path } => {
            assert_eq!(node, a.id());
            assert_eq!(path, vec![a.id(), b.id(), a.id()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    // The evaluation stack unwound completely.
    assert!(!rt.is_evaluating(a));
    assert!(!rt.is_evaluating(b));
    assert_eq!(rt.status(a), Status::Dirty);
    assert_eq!(rt.version(&a), 0);

    // Breaking the cycle lets the graph recover.
    slot.set(None);
    assert_eq!(rt.get(&a).unwrap(), 0);
}

/// A compute failure surfaces once, at the read, and commits nothing.
#[test]
fn compute_failure_propagates_through_chain() {
    let rt = Runtime::new();
    let s = rt.source(4);
    let checked = rt.derived(move |rt| {
        let value = rt.get(&s)?;
        if value < 0 {
            return Err(ReactiveError::msg(format!("negative input {value}")));
        }
        Ok(value)
    });
    let doubled = rt.derived(move |rt| Ok(rt.get(&checked)? * 2));

    assert_eq!(rt.get(&doubled).unwrap(), 8);
    rt.set(&s, -1).unwrap();

    let err = rt.get(&doubled).unwrap_err();
    assert_eq!(err.to_string(), "computation failed: negative input -1");
    assert_eq!(rt.status(checked), Status::Dirty);
    assert_eq!(rt.version(&checked), 1);
    assert_eq!(rt.version(&doubled), 1);

    rt.set(&s, 6).unwrap();
    assert_eq!(rt.get(&doubled).unwrap(), 12);
}

/// Conservative equality treats every fresh allocation as a change.
#[test]
fn conservative_equality_reports_changes() {
    let rt = Runtime::new();
    let s = rt.source(1);
    let list = rt.derived_safe(move |rt| Ok(Rc::new(vec![rt.get(&s)? % 2])));
    let observer_calls = counter();
    let calls_clone = observer_calls.clone();
    let observer = rt.derived(move |rt| {
        calls_clone.set(calls_clone.get() + 1);
        Ok(rt.read(&list)?.len())
    });

    assert_eq!(rt.get(&observer).unwrap(), 1);
    rt.set(&s, 3).unwrap();
    assert_eq!(rt.get(&list).unwrap(), vec![1]);
    assert_eq!(rt.version(&list), 2);
    assert_eq!(rt.get(&observer).unwrap(), 1);
    assert_eq!(observer_calls.get(), 2);

    // The default strategy would have hidden the same recomputation.
    let t = rt.source(1);
    let structural = rt.derived(move |rt| Ok(vec![rt.get(&t)? % 2]));
    rt.get(&structural).unwrap();
    rt.set(&t, 3).unwrap();
    rt.get(&structural).unwrap();
    assert_eq!(rt.version(&structural), 1);
}

/// Strict float comparison keeps NaN results from churning.
#[test]
fn same_value_equality_settles_on_nan() {
    let rt = Runtime::new();
    let s = rt.source(-1.0_f64);
    let root = rt.derived_with(move |rt| Ok(rt.get(&s)?.sqrt()), Equality::same_value::<f64>());

    assert!(rt.get(&root).unwrap().is_nan());
    rt.set(&s, -4.0).unwrap();
    assert!(rt.get(&root).unwrap().is_nan());
    assert_eq!(rt.version(&root), 1);
}

/// A disposed node is terminal.
#[test]
fn disposal_is_terminal() {
    let rt = Runtime::new();
    let s = rt.source(1);
    let (root, d) = rt.root(|rt| rt.derived(move |rt| rt.get(&s)));
    rt.get(&d).unwrap();

    rt.dispose(d);
    assert_eq!(rt.status(d), Status::Destroyed);
    assert!(rt.dependencies(d).is_empty());
    assert!(rt.children(d).is_empty());
    assert!(rt.owner(d).is_none());
    assert_eq!(rt.subscriber_count(s), 0);
    assert!(rt.children(root).is_empty());

    rt.set(&s, 2).unwrap();
    rt.set_status(d, Status::Clean);
    assert_eq!(rt.status(d), Status::Destroyed);
    assert!(matches!(rt.get(&d), Err(ReactiveError::Destroyed { .. })));
}

/// Stale handles never alias nodes that reuse their slot.
#[test]
fn stale_handles_do_not_alias() {
    let rt = Runtime::new();
    let old: Source<i32> = rt.source(1);
    rt.dispose(old);
    let new = rt.source(2);

    assert_eq!(old.id().index(), new.id().index());
    assert!(rt.get(&old).is_err());
    assert_eq!(rt.get(&new).unwrap(), 2);
}

/// An unowned derived stays `MaybeDirty` and re-validates cheaply.
#[test]
fn unowned_derived_revalidates() {
    let rt = Runtime::new();
    let s = rt.source(2);
    let calls = counter();
    let calls_clone = calls.clone();
    let d = rt.derived(move |rt| {
        calls_clone.set(calls_clone.get() + 1);
        Ok(rt.get(&s)? * rt.get(&s)?)
    });

    assert!(rt.is_unowned(&d));
    assert_eq!(rt.get(&d).unwrap(), 4);
    assert_eq!(rt.status(d), Status::MaybeDirty);

    for _ in 0..3 {
        assert_eq!(rt.get(&d).unwrap(), 4);
    }
    assert_eq!(calls.get(), 1);
    assert_eq!(rt.status(d), Status::MaybeDirty);
}

/// Deriveds evaluated on behalf of an unowned derived inherit its distrust.
#[test]
fn nested_evaluation_inherits_skip_tracking() {
    let rt = Runtime::new();
    let s = rt.source(1);
    let (_root, owned) = rt.root(|rt| rt.derived(move |rt| rt.get(&s)));
    let unowned = rt.derived(move |rt| rt.get(&owned));

    rt.get(&unowned).unwrap();
    assert_eq!(rt.status(unowned), Status::MaybeDirty);
    assert_eq!(rt.status(owned), Status::MaybeDirty);

    // Read directly, the owned derived is trusted again.
    rt.get(&owned).unwrap();
    assert_eq!(rt.status(owned), Status::Clean);
}

/// Effects created while a derived evaluates belong to the derived's owner.
#[test]
fn effects_inside_deriveds_attach_to_owner() {
    let rt = Runtime::new();
    let s = rt.source(1);
    let log = Rc::new(RefCell::new(Vec::new()));
    let log_clone = log.clone();

    let (root, d) = rt.root(|rt| {
        rt.derived(move |rt| {
            let value = rt.get(&s)?;
            let log = log_clone.clone();
            rt.effect(move |_| {
                log.borrow_mut().push(value);
                Ok(())
            })?;
            Ok(value)
        })
    });
    assert!(rt.has_derived_child(root));

    rt.get(&d).unwrap();
    let children = rt.children(d);
    assert_eq!(children.len(), 1);
    assert_eq!(rt.owner(children[0]), Some(root.id()));

    rt.set(&s, 2).unwrap();
    rt.get(&d).unwrap();
    assert_eq!(rt.status(children[0]), Status::Destroyed);
    assert_eq!(*log.borrow(), vec![1, 2]);
}

/// Effects observe deriveds and run once per real change.
#[test]
fn effects_follow_derived_changes() {
    let rt = Runtime::new();
    let first = rt.source(String::from("Ada"));
    let last = rt.source(String::from("Lovelace"));
    let full = rt.derived(move |rt| Ok(format!("{} {}", rt.get(&first)?, rt.get(&last)?)));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();

    let effect = rt
        .effect(move |rt| {
            seen_clone.borrow_mut().push(rt.get(&full)?);
            Ok(())
        })
        .unwrap();

    rt.set(&first, String::from("Augusta")).unwrap();
    rt.set(&last, String::from("King")).unwrap();
    assert_eq!(rt.pending_effects(), 1);
    assert_eq!(rt.flush_effects().unwrap(), 1);

    assert_eq!(
        *seen.borrow(),
        vec![String::from("Ada Lovelace"), String::from("Augusta King")]
    );
    assert_eq!(rt.run_count(&effect), 2);
}

/// Reads inside `untracked` do not subscribe.
#[test]
fn untracked_reads_do_not_subscribe() {
    let rt = Runtime::new();
    let tracked = rt.source(1);
    let peeked = rt.source(10);
    let d = rt.derived(move |rt| Ok(rt.get(&tracked)? + rt.untracked(|rt| rt.get(&peeked))?));

    assert_eq!(rt.get(&d).unwrap(), 11);
    assert_eq!(rt.dependencies(d), vec![tracked.id()]);

    rt.set(&peeked, 20).unwrap();
    assert_eq!(rt.get(&d).unwrap(), 11);
    rt.set(&tracked, 2).unwrap();
    assert_eq!(rt.get(&d).unwrap(), 22);
}

/// Long chains are bounded by the configured depth.
#[test]
fn depth_limit_bounds_long_chains() {
    let rt = Runtime::builder().max_depth(16).build();
    let s = rt.source(0);
    let mut tail = rt.derived(move |rt| rt.get(&s));
    for _ in 0..31 {
        let prev = tail;
        tail = rt.derived(move |rt| Ok(rt.get(&prev)? + 1));
    }

    assert!(matches!(
        rt.get(&tail),
        Err(ReactiveError::DepthExceeded { depth: 16 })
    ));

    let shallow = Runtime::new();
    let s = shallow.source(0);
    let mut tail = shallow.derived(move |rt| rt.get(&s));
    for _ in 0..31 {
        let prev = tail;
        tail = shallow.derived(move |rt| Ok(rt.get(&prev)? + 1));
    }
    assert_eq!(shallow.get(&tail).unwrap(), 31);
}
