//! Lifetime token trees across systems

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use keepsake::LifetimeToken;

#[test]
fn disposing_a_root_invalidates_the_whole_tree() {
    let root = LifetimeToken::new("root");
    let child = root.child("child");
    let grandchild = child.child("grandchild");
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    grandchild
        .on_invalidate(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .detach();

    assert!(root.dispose());
    assert!(!root.dispose());
    assert!(child.is_disposed());
    assert!(grandchild.check().unwrap_err().is_invalidated());
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn disposing_a_child_leaves_the_parent_alone() {
    let root = LifetimeToken::new("root");
    let child = root.child("child");
    child.dispose();
    assert!(root.is_valid());
    // The child no longer listens on its parent
    assert_eq!(root.listener_count(), 0);
}

#[test]
fn listeners_on_disposed_tokens_run_immediately() {
    let token = LifetimeToken::new("token");
    token.dispose();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let _registration = token.on_invalidate(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}
