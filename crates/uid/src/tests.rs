use crate::generate;
use std::collections::HashSet;

#[test]
fn ids_have_the_expected_shape() {
    let id = generate();
    assert!(id.starts_with("ec-"));
    assert_eq!(id.matches('-').count(), 2);
}

#[test]
fn ids_are_unique_within_a_thread() {
    let seen: HashSet<String> = (0..1000).map(|_| generate()).collect();
    assert_eq!(seen.len(), 1000);
}

#[test]
fn ids_are_unique_across_threads() {
    let handles: Vec<_> = (0..8)
        .map(|_| std::thread::spawn(|| (0..200).map(|_| generate()).collect::<Vec<_>>()))
        .collect();
    let mut all = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(all.insert(id), "duplicate id generated across threads");
        }
    }
    assert_eq!(all.len(), 8 * 200);
}
