//! Export/import round trips, in memory and through real files

use poolfs::shell::Shell;
use poolfs::{save, NodeId, NodeKind, SimConfig, SimError, Simulator};
use std::fs;

fn assert_same_tree(a: &Simulator, b: &Simulator) {
    fn walk(a: &Simulator, aid: NodeId, b: &Simulator, bid: NodeId) {
        let na = a.node(aid);
        let nb = b.node(bid);
        assert_eq!(na.meta.name, nb.meta.name);
        assert_eq!(na.meta.ctime, nb.meta.ctime, "ctime of {:?}", na.meta.name);
        assert_eq!(na.meta.mtime, nb.meta.mtime, "mtime of {:?}", na.meta.name);
        assert_eq!(
            na.meta.mode.bits(),
            nb.meta.mode.bits(),
            "mode of {:?}",
            na.meta.name
        );
        match (&na.kind, &nb.kind) {
            (NodeKind::File { .. }, NodeKind::File { .. }) => {
                assert_eq!(a.content(aid).unwrap(), b.content(bid).unwrap());
            }
            (NodeKind::Folder { .. }, NodeKind::Folder { .. }) => {
                let ca = a.children_of(aid);
                let cb = b.children_of(bid);
                assert_eq!(ca.len(), cb.len(), "children of {:?}", na.meta.name);
                for (&x, &y) in ca.iter().zip(cb.iter()) {
                    walk(a, x, b, y);
                }
            }
            _ => panic!("node kind mismatch at {:?}", na.meta.name),
        }
    }
    walk(a, a.root_id(), b, b.root_id());
}

fn build_sample() -> Simulator {
    let mut s = Simulator::new(SimConfig::default());
    s.mkdir("docs").unwrap();
    s.cd("docs").unwrap();
    s.create("plain.txt").unwrap();
    s.write("plain.txt", b"hello world").unwrap();
    s.create("binary.dat").unwrap();
    s.write("binary.dat", &[0u8, 1, 2, 255, b';', b'"', b'\\', b'{', b'}'])
        .unwrap();
    s.mkdir("nested").unwrap();
    s.cd("nested").unwrap();
    s.create("deep").unwrap();
    s.cd("..").unwrap();
    s.cd("..").unwrap();
    s.create("top").unwrap();
    s.chmod("top", 0o5).unwrap();
    s
}

#[test]
fn in_memory_round_trip_is_exact() {
    let original = build_sample();
    let mut doc = Vec::new();
    save::export(&original, &mut doc).unwrap();
    let loaded = save::import(&doc, SimConfig::default()).unwrap();
    assert_same_tree(&original, &loaded);
}

#[test]
fn round_trip_preserves_sibling_order() {
    let mut s = Simulator::new(SimConfig::default());
    s.create("first").unwrap();
    s.create("second").unwrap();
    s.mkdir("third").unwrap();

    let mut doc = Vec::new();
    save::export(&s, &mut doc).unwrap();
    let loaded = save::import(&doc, SimConfig::default()).unwrap();

    let names: Vec<_> = loaded
        .children_of(loaded.root_id())
        .iter()
        .map(|&id| loaded.node(id).meta.name.clone())
        .collect();
    assert_eq!(names, ["third", "second", "first"]);
}

#[test]
fn content_with_quotes_and_semicolons_round_trips() {
    let mut s = Simulator::new(SimConfig::default());
    s.create("f").unwrap();
    s.write("f", b"say \"hi\"; then stop").unwrap();

    let mut doc = Vec::new();
    save::export(&s, &mut doc).unwrap();
    let loaded = save::import(&doc, SimConfig::default()).unwrap();
    let id = loaded.children_of(loaded.root_id())[0];
    assert_eq!(loaded.content(id).unwrap(), b"say \"hi\"; then stop");
}

#[test]
fn double_round_trip_is_stable() {
    let original = build_sample();
    let mut doc1 = Vec::new();
    save::export(&original, &mut doc1).unwrap();
    let once = save::import(&doc1, SimConfig::default()).unwrap();
    let mut doc2 = Vec::new();
    save::export(&once, &mut doc2).unwrap();
    assert_eq!(doc1, doc2);
}

#[test]
fn shell_export_import_through_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut out = Vec::new();

    let mut first = Shell::new(SimConfig::default(), dir.path());
    first.run_line("mkdir work", &mut out).unwrap();
    first.run_line("cd work", &mut out).unwrap();
    first.run_line("create a.txt", &mut out).unwrap();
    first
        .run_line(r#"write a.txt escaped \; and \" bytes"#, &mut out)
        .unwrap();
    first.run_line("cd ..", &mut out).unwrap();

    out.clear();
    first.run_line("export snap", &mut out).unwrap();
    let text = String::from_utf8(out.clone()).unwrap();
    assert!(text.starts_with("saved to"), "{text:?}");
    assert!(dir.path().join("snap.simsave").exists());

    let mut second = Shell::new(SimConfig::default(), dir.path());
    out.clear();
    second.run_line("import snap", &mut out).unwrap();
    let text = String::from_utf8(out.clone()).unwrap();
    assert!(text.starts_with("imported"), "{text:?}");

    assert_same_tree(first.simulator(), second.simulator());

    out.clear();
    second.run_line("cd work", &mut out).unwrap();
    out.clear();
    second.run_line("read a.txt", &mut out).unwrap();
    assert_eq!(out, b"escaped ; and \" bytes\n");
}

#[test]
fn failed_import_keeps_the_current_tree() {
    let dir = tempfile::tempdir().unwrap();
    let mut out = Vec::new();

    let mut shell = Shell::new(SimConfig::default(), dir.path());
    shell.run_line("create keep.txt", &mut out).unwrap();
    shell.run_line("write keep.txt payload", &mut out).unwrap();

    fs::write(dir.path().join("broken.simsave"), b"[;0;0;7]{(f;0;0").unwrap();
    out.clear();
    shell.run_line("import broken", &mut out).unwrap();
    let text = String::from_utf8(out.clone()).unwrap();
    assert!(text.contains("error:"), "{text:?}");
    assert!(text.contains("current tree kept"), "{text:?}");

    out.clear();
    shell.run_line("read keep.txt", &mut out).unwrap();
    assert_eq!(out, b"payload\n");
}

#[test]
fn import_rejects_trees_larger_than_the_pool() {
    let mut s = Simulator::new(SimConfig::default());
    s.create("big").unwrap();
    s.write("big", &[b'x'; 200]).unwrap();
    let mut doc = Vec::new();
    save::export(&s, &mut doc).unwrap();

    let small = SimConfig {
        capacity: 64,
        ..SimConfig::default()
    };
    assert!(matches!(
        save::import(&doc, small),
        Err(SimError::OutOfSpace)
    ));
}
