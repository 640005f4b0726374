// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

use super::*;

#[yare::parameterized(
    plain     = { "out.txt" },
    nested    = { "data/frames/0001.png" },
    dotfile   = { ".profile" },
    spaces    = { "my report.csv" },
)]
fn good_paths_validate(path: &str) {
    assert!(validate_rel_path(path).is_ok());
}

#[yare::parameterized(
    empty       = { "" },
    absolute    = { "/etc/passwd" },
    parent      = { "../secrets" },
    inner_parent = { "data/../../x" },
    dot_segment = { "./x" },
    trailing    = { "dir/" },
    double_slash = { "a//b" },
    newline     = { "a\nb" },
)]
fn bad_paths_are_rejected(path: &str) {
    assert!(validate_rel_path(path).is_err());
}

#[test]
fn to_relative_strips_workspace_prefix() {
    assert_eq!(to_relative("/workspace/out.txt").unwrap(), "out.txt");
    assert_eq!(to_relative("out.txt").unwrap(), "out.txt");
    assert!(to_relative("/workspace/../x").is_err());
    assert_eq!(to_absolute("out.txt"), "/workspace/out.txt");
}

#[test]
fn write_cmd_quotes_hostile_paths() {
    let argv = write_cmd("it's here.txt");
    assert_eq!(argv[0], "sh");
    assert_eq!(argv[1], "-c");
    assert!(argv[2].contains(r#"'/workspace/it'\''s here.txt'"#), "got: {}", argv[2]);
    assert!(argv[2].starts_with("mkdir -p"));
}

#[test]
fn read_and_remove_target_the_workspace() {
    assert_eq!(read_cmd("a.txt")[2], "cat -- '/workspace/a.txt'");
    assert_eq!(remove_cmd("a.txt")[2], "rm -f -- '/workspace/a.txt'");
}

#[test]
fn parse_listing_handles_find_output() {
    let h1 = "2d711642b726b04401627ca9fbac32f5c8530fb1903cc4db02258717921a4881";
    let h2 = "9834876dcfb05cb167a5c24953eba58c4ac89b1adf57f28f2f9d09af107ee8f0";
    let out = format!("{}  ./out.txt\n{}  ./data/in.csv\n", h1, h2);
    let files = parse_listing(&out).unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files["out.txt"].as_str(), h1);
    assert_eq!(files["data/in.csv"].as_str(), h2);
}

#[test]
fn parse_listing_of_empty_workspace() {
    assert!(parse_listing("").unwrap().is_empty());
    assert!(parse_listing("\n").unwrap().is_empty());
}

#[test]
fn parse_listing_rejects_garbage() {
    assert!(parse_listing("not a listing").is_err());
    let escape = "2d711642b726b04401627ca9fbac32f5c8530fb1903cc4db02258717921a4881  ../oops";
    assert!(parse_listing(escape).is_err());
}
