use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use meridian_core::{Pattern, ServiceKey};

use super::PatternIndex;

fn pattern(expr: &str) -> Pattern {
    Pattern::new("public", expr).unwrap()
}

fn key(group: &str, name: &str) -> ServiceKey {
    ServiceKey::new("public", group, name)
}

fn keys(index: &PatternIndex, expr: &str) -> Vec<String> {
    index
        .match_service_keys(&pattern(expr))
        .into_iter()
        .map(|k| format!("{}.{}", k.group, k.name))
        .collect()
}

/// `*` covers exactly one segment; only `**` crosses segment boundaries.
#[test]
fn single_segment_wildcard_does_not_cross_boundaries() {
    let index = PatternIndex::new();
    let one = pattern("group1.*");
    let suffix = pattern("group1.**");
    index.add_pattern(&one);
    index.add_pattern(&suffix);

    for name in ["svcA", "svcB"] {
        let matched = index.match_patterns(&key("group1", name));
        assert!(matched.contains(&one));
        assert!(matched.contains(&suffix));
    }

    let nested = index.match_patterns(&key("group1", "sub.svcC"));
    assert!(!nested.contains(&one));
    assert!(nested.contains(&suffix));

    assert!(index.match_patterns(&key("group2", "svcA")).is_empty());
}

/// Exact and wildcard patterns coexist on the same trie branch.
#[test]
fn exact_and_wildcard_patterns_share_branches() {
    let index = PatternIndex::new();
    let exact = pattern("group1.svcA");
    let any_group = pattern("*.svcA");
    let any = pattern("**");
    for p in [&exact, &any_group, &any] {
        assert!(index.add_pattern(p));
    }
    assert!(!index.add_pattern(&exact));

    let matched = index.match_patterns(&key("group1", "svcA"));
    assert_eq!(matched.len(), 3);

    let matched = index.match_patterns(&key("group1", "svcB"));
    assert_eq!(matched.len(), 1);
    assert!(matched.contains(&any));
}

/// Patterns and keys never match across namespaces.
#[test]
fn namespaces_are_isolated() {
    let index = PatternIndex::new();
    index.add_pattern(&Pattern::new("prod", "group1.*").unwrap());
    index.add_service(&ServiceKey::new("prod", "group1", "svcA"));

    assert!(index.match_patterns(&key("group1", "svcA")).is_empty());
    assert!(index.match_service_keys(&pattern("group1.*")).is_empty());
}

/// Removing a pattern drops it from lookups and prunes its branch.
#[test]
fn remove_pattern_prunes_empty_branches() {
    let index = PatternIndex::new();
    let deep = pattern("a.b.*.d");
    let shallow = pattern("a.*");
    index.add_pattern(&deep);
    index.add_pattern(&shallow);

    assert!(index.remove_pattern(&deep));
    assert!(!index.remove_pattern(&deep));
    assert!(index.match_patterns(&key("a.b", "c.d")).is_empty());
    assert_eq!(index.match_patterns(&key("a", "x")).len(), 1);

    assert!(index.remove_pattern(&shallow));
    assert!(index.patterns.read().is_empty());
}

/// The inverse lookup returns known keys in key order.
#[test]
fn match_service_keys_is_ordered() {
    let index = PatternIndex::new();
    for (group, name) in [
        ("group1", "svcB"),
        ("group1", "svcA"),
        ("group1", "sub.svcC"),
        ("group2", "svcA"),
    ] {
        index.add_service(&key(group, name));
    }

    assert_eq!(keys(&index, "group1.*"), ["group1.svcA", "group1.svcB"]);
    assert_eq!(
        keys(&index, "group1.**"),
        ["group1.sub.svcC", "group1.svcA", "group1.svcB"]
    );
    assert_eq!(keys(&index, "*.svcA"), ["group1.svcA", "group2.svcA"]);
    assert_eq!(keys(&index, "group1.sub.*"), ["group1.sub.svcC"]);
    assert!(keys(&index, "group3.*").is_empty());
}

/// A key that is a path prefix of another key is still matched on its own.
#[test]
fn prefix_keys_are_distinct() {
    let index = PatternIndex::new();
    index.add_service(&key("group1", "sub"));
    index.add_service(&key("group1", "sub.svcC"));

    assert_eq!(keys(&index, "group1.*"), ["group1.sub"]);
    assert!(index.remove_service(&key("group1", "sub")));
    assert_eq!(keys(&index, "group1.**"), ["group1.sub.svcC"]);
    assert!(index.remove_service(&key("group1", "sub.svcC")));
    assert!(index.services.read().is_empty());
}

/// Trie lookups agree with the direct matcher on every pattern/key pair.
#[test]
fn index_agrees_with_direct_matching() {
    let exprs = [
        "g.*", "g.**", "*.a", "*.*", "**", "g.a", "g.a.*", "g.*.b", "*.a.**", "h.a",
    ];
    let paths = [
        ("g", "a"),
        ("g", "b"),
        ("g", "a.b"),
        ("g", "x.b"),
        ("h", "a"),
        ("h", "a.c.d"),
        ("g.a", "z"),
    ];

    let index = PatternIndex::new();
    let patterns: Vec<Pattern> = exprs.iter().map(|e| pattern(e)).collect();
    let service_keys: Vec<ServiceKey> = paths.iter().map(|(g, n)| key(g, n)).collect();
    patterns.iter().for_each(|p| {
        index.add_pattern(p);
    });
    service_keys.iter().for_each(|k| {
        index.add_service(k);
    });

    for k in &service_keys {
        let expected: BTreeSet<&Pattern> = patterns.iter().filter(|p| p.matches(k)).collect();
        let matched = index.match_patterns(k);
        let actual: BTreeSet<&Pattern> = matched.iter().collect();
        assert_eq!(actual, expected, "patterns matching {k}");
    }
    for p in &patterns {
        let expected: BTreeSet<ServiceKey> =
            service_keys.iter().filter(|k| p.matches(k)).cloned().collect();
        assert_eq!(index.match_service_keys(p), expected, "keys matched by {p}");
    }
}

/// Concurrent registration and lookup never observe a half-applied write.
#[test]
fn concurrent_registration_and_lookup() {
    let index = Arc::new(PatternIndex::new());
    let stable = pattern("group1.*");
    index.add_pattern(&stable);

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for i in 0..200 {
                    let p = pattern(&format!("group1.svc{w}_{i}"));
                    index.add_pattern(&p);
                    index.remove_pattern(&p);
                }
            })
        })
        .collect();

    let reader = {
        let index = Arc::clone(&index);
        let stable = stable.clone();
        thread::spawn(move || {
            for _ in 0..500 {
                let matched = index.match_patterns(&key("group1", "svcX"));
                assert!(matched.contains(&stable));
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();

    let matched = index.match_patterns(&key("group1", "svc0_0"));
    assert_eq!(matched.len(), 1);
    assert!(matched.contains(&stable));
}
