//! Packages file parsing and `.spin` loading through the public API.

mod helpers;

use helpers::SpinEnv;
use imgspin::spec::{OperationKind, Parser};
use imgspin::{ImageSpec, SpinError};

fn kinds(content: &str) -> Vec<(OperationKind, usize)> {
    Parser::default()
        .parse_str(content)
        .expect("parse should succeed")
        .blocks()
        .iter()
        .map(|b| (b.kind(), b.len()))
        .collect()
}

#[test]
fn test_comment_only_file_has_no_blocks() {
    let stack = Parser::default()
        .parse_str("# Solus base\n\n   \n# nothing else\n")
        .unwrap();
    assert!(stack.is_empty());
    assert_eq!(stack.blocks().len(), 0);
    assert_eq!(stack.operation_count(), 0);
}

#[test]
fn test_repos_never_merge() {
    assert_eq!(
        kinds("repo1 = http://a\nrepo2 = http://b\n"),
        vec![(OperationKind::Repo, 1), (OperationKind::Repo, 1)]
    );
}

#[test]
fn test_packages_merge_until_safety_changes() {
    let stack = Parser::default().parse_str("pkgA\npkgB\n~pkgC\n").unwrap();
    let blocks = stack.blocks();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].names(), vec!["pkgA", "pkgB"]);
    assert!(!blocks[0].ignore_safety());
    assert_eq!(blocks[1].names(), vec!["pkgC"]);
    assert!(blocks[1].ignore_safety());
}

#[test]
fn test_groups_merge_but_not_with_packages() {
    assert_eq!(
        kinds("@groupA\n@groupB\npkgA\n@groupC\n"),
        vec![
            (OperationKind::Group, 2),
            (OperationKind::Package, 1),
            (OperationKind::Group, 1),
        ]
    );
}

#[test]
fn test_safety_marker_before_group_marker() {
    let stack = Parser::default().parse_str("~@system.devel\n").unwrap();
    let block = &stack.blocks()[0];
    assert_eq!(block.kind(), OperationKind::Group);
    assert!(block.ignore_safety());
    assert_eq!(block.names(), vec!["system.devel"]);
}

#[test]
fn test_empty_repo_value_reports_line() {
    let err = Parser::default()
        .parse_str("# repos\nSolus = https://mirrors/solus\nUnstable =   \n")
        .unwrap_err();
    match err {
        SpinError::MissingRepoValue { name, line } => {
            assert_eq!(name, "Unstable");
            assert_eq!(line, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_load_spin_file() {
    let env = SpinEnv::basic("Solus = https://mirrors/solus\n@system.base\nnano\n");
    let spec = ImageSpec::load(&env.spin_file).unwrap();

    assert_eq!(spec.base_dir, env.dir);
    assert_eq!(spec.config.branding.title, "Solus Budgie");
    assert_eq!(spec.config.liveos.label, "SolusLive");
    assert_eq!(spec.stack.blocks().len(), 3);
    assert_eq!(spec.stack.operation_count(), 3);
}

#[test]
fn test_load_with_empty_packages_file() {
    let env = SpinEnv::basic("");
    let spec = ImageSpec::load(&env.spin_file).unwrap();
    assert!(spec.stack.is_empty());
}

#[test]
fn test_load_rejects_invalid_config() {
    let env = SpinEnv::new(
        &helpers::BASIC_SPIN.replace("label = \"SolusLive\"", "label = \"Solus Live\""),
        "nano\n",
    );
    let err = ImageSpec::load(&env.spin_file).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SpinError>(),
        Some(SpinError::InvalidConfig(_))
    ));
}
