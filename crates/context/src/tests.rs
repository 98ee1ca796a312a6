use std::time::Duration;

use crate::{registry, ContextBuilder, Relation};

#[test]
fn detached_context_gets_lazily_generated_id() {
    let ctx = ContextBuilder::new("leaf").no_parent().create_detached();
    let id = ctx.id();
    assert!(!id.is_empty());
    // Calling id() again must return the same value rather than generating a fresh one.
    assert_eq!(ctx.id(), id);
}

#[test]
fn supplied_id_is_used_verbatim() {
    let ctx = ContextBuilder::new("leaf")
        .id("custom-id")
        .no_parent()
        .create_detached();
    assert_eq!(ctx.id(), "custom-id");
}

#[test]
fn child_without_explicit_timeout_inherits_parent_deadline() {
    let parent = ContextBuilder::new("parent")
        .timeout(Duration::from_secs(60))
        .no_parent()
        .create_detached();
    let child = ContextBuilder::new("child")
        .parent(parent.clone())
        .create_detached();
    assert_eq!(child.deadline_nanos(), parent.deadline_nanos());
}

#[test]
fn child_requesting_looser_timeout_is_clamped_to_parent_deadline() {
    let parent = ContextBuilder::new("parent")
        .timeout(Duration::from_millis(10))
        .no_parent()
        .create_detached();
    let child = ContextBuilder::new("child")
        .parent(parent.clone())
        .timeout(Duration::from_secs(3600))
        .create_detached();
    assert_eq!(child.deadline_nanos(), parent.deadline_nanos());
}

#[test]
fn child_requesting_tighter_timeout_keeps_its_own_deadline() {
    let parent = ContextBuilder::new("parent")
        .timeout(Duration::from_secs(3600))
        .no_parent()
        .create_detached();
    let child = ContextBuilder::new("child")
        .parent(parent.clone())
        .timeout(Duration::from_millis(10))
        .create_detached();
    assert!(child.deadline_nanos() < parent.deadline_nanos());
}

#[test]
fn closing_parent_cascades_to_open_children() {
    let parent = ContextBuilder::new("parent").no_parent().create_detached();
    let child = ContextBuilder::new("child")
        .parent(parent.clone())
        .create_detached();
    let grandchild = ContextBuilder::new("grandchild")
        .parent(child.clone())
        .create_detached();

    assert!(!child.is_closed());
    assert!(!grandchild.is_closed());

    parent.close();

    assert!(parent.is_closed());
    assert!(child.is_closed());
    assert!(grandchild.is_closed());
}

#[test]
fn close_is_idempotent() {
    let ctx = ContextBuilder::new("leaf").no_parent().create_detached();
    ctx.close();
    ctx.close();
    assert!(ctx.is_closed());
}

#[test]
fn attachments_are_set_membership() {
    let ctx = ContextBuilder::new("leaf").no_parent().create_detached();
    assert!(!ctx.has_attachment("retried"));
    ctx.add_attachment("retried");
    assert!(ctx.has_attachment("retried"));
}

#[test]
fn follows_from_relation_still_inherits_deadline() {
    let parent = ContextBuilder::new("parent")
        .timeout(Duration::from_secs(60))
        .no_parent()
        .create_detached();
    let child = ContextBuilder::new("child")
        .parent(parent.clone())
        .relation(Relation::FollowsFrom)
        .create_detached();
    assert_eq!(child.relation(), Relation::FollowsFrom);
    assert_eq!(child.deadline_nanos(), parent.deadline_nanos());
}

#[test]
fn start_attaches_and_scoped_drop_detaches() {
    assert!(registry::current().is_none());
    {
        let scoped = crate::start("scoped");
        assert!(registry::current().unwrap().is_same_as(&scoped));
    }
    assert!(registry::current().is_none());
}

#[test]
fn nested_start_inherits_ambient_context_as_parent() {
    let outer = crate::start("outer");
    let outer_ctx = outer.context().clone();
    {
        let inner = crate::start("inner");
        assert!(inner.parent().unwrap().is_same_as(&outer_ctx));
    }
}
